//! Remote session seams used by the backup executor.
//!
//! Connection attempts return a classified [`AttemptError`] so credential
//! rotation branches on data rather than on error identity.

use std::io::Write;

use thiserror::Error;

/// Why a single authenticated-session attempt did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttemptError {
    /// The device refused this secret. The next candidate may still work.
    ///
    /// `note` carries any connection-layer condition seen along the way.
    #[error("authentication rejected")]
    AuthRejected { note: Option<String> },

    /// Timeout, name resolution failure or SSH protocol error. A property of
    /// the network path, so other secrets cannot help.
    #[error("{0}")]
    Connection(String),

    #[error("{0}")]
    Unexpected(String),
}

/// Failure while copying the artifact over an authenticated session.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("{0}")]
    Protocol(String),

    #[error("Local file error: {0}")]
    LocalIo(#[from] std::io::Error),

    #[error("{0}")]
    Unexpected(String),
}

/// Opens authenticated sessions to devices.
///
/// Implementations block; callers run them off the async runtime.
pub trait RemoteTransport: Send + Sync {
    type Session: RemoteSession;

    /// Open a fresh session to `address` authenticated as `username`/`secret`.
    fn open(
        &self,
        address: &str,
        username: &str,
        secret: &str,
    ) -> Result<Self::Session, AttemptError>;
}

/// An authenticated session. Dropping it releases the connection.
pub trait RemoteSession {
    /// Copy `remote_path` verbatim into `out`, returning the byte count.
    fn fetch(&mut self, remote_path: &str, out: &mut dyn Write) -> Result<u64, TransferError>;
}
