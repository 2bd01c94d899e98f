pub mod api;
pub mod cache;
pub mod client;
pub mod config;
pub mod coordinator;
pub mod errors;
pub mod session;
pub mod storage;
pub mod telemetry;
pub mod transport;

pub use client::Client;
pub use config::{ClientConfig, Protocol};
pub use errors::{ApiError, MutationError};
pub use taskdeck_common as model;
