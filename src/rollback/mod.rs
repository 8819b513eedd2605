use serde::{Deserialize, Serialize};

use crate::archive::ArchiveCodec;
use crate::backup::{BackupDescriptor, ExecutionScope};
use crate::errors::Result;
use crate::transport::RemoteTransport;

pub mod local;
pub mod remote;

pub use local::LocalRollback;
pub use remote::RemoteRollback;

/// Remote installation root plus the connection used to reach it.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RemoteTarget {
    pub connection: String,
    #[serde(default)]
    pub path: String,
}

/// How restored files reach the installation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Delivery {
    #[default]
    Local,
    Remote(RemoteTarget),
}

/// Performs the file-level restore for one artifact. Built per rollback call.
pub trait RollbackWorker {
    fn name(&self) -> &'static str;

    fn run(&mut self, scope: &ExecutionScope) -> Result<()>;
}

/// `transport` overrides the one chosen from the connection string.
pub fn select_worker<'a>(
    descriptor: &'a BackupDescriptor,
    delivery: &'a Delivery,
    codec: &'a dyn ArchiveCodec,
    transport: Option<Box<dyn RemoteTransport>>,
) -> Box<dyn RollbackWorker + 'a> {
    match delivery {
        Delivery::Local => Box::new(LocalRollback::new(descriptor, codec)),
        Delivery::Remote(target) => Box::new(RemoteRollback::new(descriptor, target, codec, transport)),
    }
}
