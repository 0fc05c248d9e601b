//! SSH/SCP transport built on libssh2.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;

use ssh2::{ErrorCode, Session};
use tracing::debug;

use crate::transport::{AttemptError, RemoteSession, RemoteTransport, TransferError};

// libssh2 session error codes seen from userauth_password.
const LIBSSH2_ERROR_ALLOC: i32 = -6;
const LIBSSH2_ERROR_PASSWORD_EXPIRED: i32 = -15;
const LIBSSH2_ERROR_METHOD_NONE: i32 = -17;
const LIBSSH2_ERROR_AUTHENTICATION_FAILED: i32 = -18;

const READ_CHUNK: usize = 32 * 1024;

/// Password-authenticated SSH sessions with separate connect, handshake
/// and transfer timeouts.
///
/// Host keys are not verified; devices are addressed by IP and re-keyed on
/// firmware upgrades.
#[derive(Debug, Clone)]
pub struct SshTransport {
    port: u16,
    connect_timeout: Duration,
    handshake_timeout: Duration,
    transfer_timeout: Duration,
}

impl SshTransport {
    pub fn new(
        port: u16,
        connect_timeout: Duration,
        handshake_timeout: Duration,
        transfer_timeout: Duration,
    ) -> Self {
        Self {
            port,
            connect_timeout,
            handshake_timeout,
            transfer_timeout,
        }
    }

    /// Resolve and connect, trying each resolved address within the timeout.
    fn connect_tcp(&self, address: &str) -> Result<TcpStream, AttemptError> {
        let addrs: Vec<SocketAddr> = (address, self.port)
            .to_socket_addrs()
            .map_err(|e| AttemptError::Connection(format!("cannot resolve {address}: {e}")))?
            .collect();

        let mut last_error = None;
        for addr in &addrs {
            match TcpStream::connect_timeout(addr, self.connect_timeout) {
                Ok(stream) => return Ok(stream),
                Err(e) => last_error = Some(e),
            }
        }

        Err(AttemptError::Connection(match last_error {
            Some(e) => format!("{address}:{}: {e}", self.port),
            None => format!("{address}: no addresses resolved"),
        }))
    }
}

fn millis(d: Duration) -> u32 {
    u32::try_from(d.as_millis()).unwrap_or(u32::MAX)
}

/// Map a failed `userauth_password` to rotate-or-abort.
fn classify_auth_error(e: ssh2::Error) -> AttemptError {
    match e.code() {
        ErrorCode::Session(
            LIBSSH2_ERROR_AUTHENTICATION_FAILED
            | LIBSSH2_ERROR_PASSWORD_EXPIRED
            | LIBSSH2_ERROR_METHOD_NONE,
        ) => AttemptError::AuthRejected { note: None },
        ErrorCode::Session(LIBSSH2_ERROR_ALLOC) => AttemptError::Unexpected(e.to_string()),
        _ => AttemptError::Connection(e.to_string()),
    }
}

impl RemoteTransport for SshTransport {
    type Session = SshSession;

    fn open(&self, address: &str, username: &str, secret: &str) -> Result<SshSession, AttemptError> {
        let tcp = self.connect_tcp(address)?;

        let mut session = Session::new().map_err(|e| AttemptError::Unexpected(e.to_string()))?;
        session.set_timeout(millis(self.handshake_timeout));
        session.set_tcp_stream(tcp);
        session
            .handshake()
            .map_err(|e| AttemptError::Connection(format!("SSH handshake failed: {e}")))?;

        // Wrap before authenticating so the session is disconnected on rejection too.
        let session = SshSession { session };
        session
            .session
            .userauth_password(username, secret)
            .map_err(classify_auth_error)?;
        if !session.session.authenticated() {
            return Err(AttemptError::AuthRejected { note: None });
        }

        session.session.set_timeout(millis(self.transfer_timeout));
        Ok(session)
    }
}

/// An authenticated libssh2 session; disconnects on drop.
pub struct SshSession {
    session: Session,
}

impl RemoteSession for SshSession {
    fn fetch(&mut self, remote_path: &str, out: &mut dyn Write) -> Result<u64, TransferError> {
        let (mut channel, stat) = self
            .session
            .scp_recv(Path::new(remote_path))
            .map_err(|e| TransferError::Protocol(format!("{remote_path}: {e}")))?;

        let expected = stat.size();
        let mut received: u64 = 0;
        let mut buf = vec![0u8; READ_CHUNK];
        while received < expected {
            let n = channel
                .read(&mut buf)
                .map_err(|e| TransferError::Protocol(e.to_string()))?;
            if n == 0 {
                break;
            }
            out.write_all(&buf[..n])?;
            received += n as u64;
        }

        if received < expected {
            return Err(TransferError::Protocol(format!(
                "short read: received {received} of {expected} bytes"
            )));
        }
        out.flush()?;

        let mut close = || -> Result<(), ssh2::Error> {
            channel.send_eof()?;
            channel.wait_eof()?;
            channel.close()?;
            channel.wait_close()
        };
        if let Err(e) = close() {
            debug!(error = %e, "scp channel did not close cleanly");
        }

        Ok(received)
    }
}

impl Drop for SshSession {
    fn drop(&mut self) {
        if let Err(e) = self.session.disconnect(None, "backup finished", None) {
            debug!(error = %e, "ssh disconnect failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    fn transport(port: u16) -> SshTransport {
        SshTransport::new(
            port,
            Duration::from_millis(500),
            Duration::from_secs(1),
            Duration::from_secs(1),
        )
    }

    #[test]
    fn auth_failure_codes_rotate() {
        for code in [
            LIBSSH2_ERROR_AUTHENTICATION_FAILED,
            LIBSSH2_ERROR_PASSWORD_EXPIRED,
            LIBSSH2_ERROR_METHOD_NONE,
        ] {
            let err = ssh2::Error::new(ErrorCode::Session(code), "denied");
            assert_eq!(classify_auth_error(err), AttemptError::AuthRejected { note: None });
        }
    }

    #[test]
    fn timeout_during_auth_is_connection_level() {
        let err = ssh2::Error::new(ErrorCode::Session(-9), "Timed out waiting on socket");
        assert!(matches!(classify_auth_error(err), AttemptError::Connection(_)));
    }

    #[test]
    fn refused_port_is_connection_level() {
        // Bind then drop to get a port that is almost certainly closed.
        let port = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let err = transport(port).open("127.0.0.1", "ubnt", "ubnt").err().unwrap();
        assert!(matches!(err, AttemptError::Connection(_)), "{err:?}");
    }

    #[test]
    fn unresolvable_name_is_connection_level() {
        let err = transport(22)
            .open("no-such-host.invalid", "ubnt", "ubnt")
            .err()
            .unwrap();
        assert!(matches!(err, AttemptError::Connection(_)), "{err:?}");
    }

    #[test]
    fn silent_peer_fails_handshake_as_connection_level() {
        // Accepts TCP but never sends an SSH banner.
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let holder = std::thread::spawn(move || {
            let (_stream, _) = listener.accept().unwrap();
            std::thread::sleep(Duration::from_secs(2));
        });

        let err = transport(port).open("127.0.0.1", "ubnt", "ubnt").err().unwrap();
        let AttemptError::Connection(detail) = &err else {
            panic!("expected connection error, got {err:?}");
        };
        assert!(detail.contains("handshake"), "{detail}");
        holder.join().unwrap();
    }
}
