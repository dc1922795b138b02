/// Installs the `tracing` subscriber with console and file output and rotates old log files.
pub mod loggerlocal;

pub use loggerlocal::{LoggerError, init_logging, rotate_logs};
