//! Access log pipeline: the `$var` format compiler and the size/day
//! rotating writer with gzip archives.

mod format;
mod rotate;

pub use format::{
    access_log_allowed_vars, colorize_status_with, resolve_access_log_format, AccessLogFormatter,
};
pub use rotate::{AccessLogRotateOptions, AccessRotateWriter};
