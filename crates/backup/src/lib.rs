//! Device configuration backups over SSH/SCP.
//!
//! This crate provides:
//! - `BackupExecutor`, which rotates through candidate credentials and
//!   copies one remote file into the local artifact store
//! - `RemoteTransport` / `RemoteSession` seams with an ssh2 implementation
//! - `ArtifactStore` for collision-free `<address>_<timestamp>.cfg` files
//! - `BackupOutcome`, the terminal result reported to the control plane

pub mod artifact;
pub mod executor;
pub mod outcome;
pub mod ssh;
pub mod transport;

pub use artifact::{artifact_name, ArtifactStore};
pub use executor::{BackupExecutor, DeviceBackup};
pub use outcome::BackupOutcome;
pub use ssh::{SshSession, SshTransport};
pub use transport::{AttemptError, RemoteSession, RemoteTransport, TransferError};
