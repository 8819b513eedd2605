pub mod settings;

pub use settings::{ResolvedSettings, SETTINGS_FILE, Settings};
