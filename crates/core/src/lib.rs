pub mod config;
pub mod credentials;
pub mod error;
pub mod job;
pub mod log;

pub use config::Config;
pub use credentials::CredentialSet;
pub use error::*;
pub use job::{DeviceKind, Job};
