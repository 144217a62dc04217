// Per-user replication engine: the append-only vector clock, the
// export/import replication protocol, service selection, and the
// content-addressed read path.

pub mod app_state;
pub mod config;
pub mod error;
pub mod http;
pub mod infrastructure;
pub mod models;

pub use error::{AppError, AppResult};
