pub mod aggregate;
pub mod app;
pub mod cli;
pub mod config;
pub mod debounce;
pub mod document;
pub mod error;
pub mod identity;
pub mod mode;
pub mod monitor;
pub mod report;
pub mod snapshot;
pub mod store;
pub mod ui;
pub mod util;
pub mod watch;

pub use error::{MonitorError, Result};
