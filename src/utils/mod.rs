pub mod io;
pub mod probe;
