mod cloud;
mod config;
mod file;
mod meta;
mod redo_metrics;
mod registry;
mod writer;

pub use cloud::CloudStore;
pub use config::LogWriterConfig;
pub use file::{FileLogWriter, FileType};
pub use meta::{meta_file_name, LogMeta};
pub use registry::new_log_writer;
pub use writer::LogWriter;
