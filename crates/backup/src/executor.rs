//! Credential rotation and artifact retrieval for one device.

use chrono::Local;
use tracing::{debug, info, warn};

use netbackup_core::log::sanitize;
use netbackup_core::CredentialSet;

use crate::artifact::ArtifactStore;
use crate::outcome::{BackupOutcome, ALL_CANDIDATES_FAILED};
use crate::transport::{AttemptError, RemoteSession, RemoteTransport, TransferError};

/// Something that can back up a device by address.
///
/// The queue consumer depends on this seam rather than on a concrete
/// executor, so tests can count invocations without a network.
pub trait DeviceBackup: Send + Sync {
    /// Run one backup to completion. Blocking.
    fn backup(&self, address: &str) -> BackupOutcome;
}

/// Backs up devices by trying each candidate secret in order, then copying
/// a single fixed remote file into the [`ArtifactStore`].
pub struct BackupExecutor<T: RemoteTransport> {
    transport: T,
    credentials: CredentialSet,
    store: ArtifactStore,
    remote_path: String,
}

impl<T: RemoteTransport> BackupExecutor<T> {
    pub fn new(
        transport: T,
        credentials: CredentialSet,
        store: ArtifactStore,
        remote_path: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            credentials,
            store,
            remote_path: remote_path.into(),
        }
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Back up `address` using `credentials`.
    ///
    /// Never fails: every problem becomes a terminal [`BackupOutcome`]. The
    /// session is dropped (and so released) on every path out of here.
    pub fn execute(&self, address: &str, credentials: &CredentialSet) -> BackupOutcome {
        let shown = sanitize(address);
        debug!(address = %shown, candidates = credentials.len(), "starting device backup");

        let outcome = match self.authenticate(address, credentials) {
            Ok(mut session) => self.retrieve(address, &mut session),
            Err(outcome) => outcome,
        };

        match &outcome {
            BackupOutcome::Success { .. } => {}
            failed => warn!(
                address = %shown,
                outcome = failed.kind(),
                status = %sanitize(&failed.status_text()),
                "backup failed"
            ),
        }
        outcome
    }

    /// Open a session with the first secret the device accepts.
    fn authenticate(
        &self,
        address: &str,
        credentials: &CredentialSet,
    ) -> Result<T::Session, BackupOutcome> {
        let shown = sanitize(address);
        let mut last_condition: Option<String> = None;

        for (index, secret) in credentials.secrets().enumerate() {
            let attempt = index + 1;
            match self.transport.open(address, credentials.username(), secret) {
                Ok(session) => {
                    debug!(address = %shown, attempt, "authenticated");
                    return Ok(session);
                }
                Err(AttemptError::AuthRejected { note }) => {
                    debug!(address = %shown, attempt, "candidate secret rejected");
                    if note.is_some() {
                        last_condition = note;
                    }
                }
                Err(AttemptError::Connection(detail)) => {
                    debug!(address = %shown, attempt, error = %sanitize(&detail), "connection-level failure, not trying further secrets");
                    return Err(BackupOutcome::ConnectionFailed {
                        address: address.to_string(),
                        detail,
                    });
                }
                Err(AttemptError::Unexpected(detail)) => {
                    return Err(BackupOutcome::UnexpectedError { detail });
                }
            }
        }

        Err(BackupOutcome::AuthExhausted {
            detail: last_condition.unwrap_or_else(|| ALL_CANDIDATES_FAILED.to_string()),
        })
    }

    /// Copy the remote artifact into a freshly named local file.
    fn retrieve(&self, address: &str, session: &mut T::Session) -> BackupOutcome {
        let now = Local::now().naive_local();
        let (name, mut file) = match self.store.create(address, &now) {
            Ok(created) => created,
            Err(e) => {
                return BackupOutcome::TransferFailed {
                    detail: TransferError::LocalIo(e).to_string(),
                }
            }
        };

        let result = session
            .fetch(&self.remote_path, &mut file)
            .and_then(|bytes| {
                file.sync_all()?;
                Ok(bytes)
            });
        drop(file);

        match result {
            Ok(bytes) => {
                info!(address = %sanitize(address), artifact = %sanitize(&name), bytes, "backup successful");
                BackupOutcome::Success { artifact_name: name }
            }
            Err(e) => {
                if let Err(rm) = self.store.remove(&name) {
                    warn!(address = %sanitize(address), artifact = %sanitize(&name), error = %rm, "failed to remove partial artifact");
                }
                match e {
                    TransferError::Unexpected(detail) => BackupOutcome::UnexpectedError { detail },
                    other => BackupOutcome::TransferFailed {
                        detail: other.to_string(),
                    },
                }
            }
        }
    }
}

impl<T: RemoteTransport> DeviceBackup for BackupExecutor<T> {
    fn backup(&self, address: &str) -> BackupOutcome {
        self.execute(address, &self.credentials)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// What the fake device does when a given secret is tried.
    #[derive(Clone)]
    enum Reply {
        Accept,
        Reject(Option<String>),
        Connection(String),
        Unexpected(String),
    }

    /// What the fake session does when asked for the artifact.
    #[derive(Clone)]
    enum Fetch {
        Bytes(Vec<u8>),
        Protocol(String),
        Unexpected(String),
    }

    struct MockTransport {
        replies: HashMap<String, Reply>,
        fetch: Fetch,
        attempts: Mutex<Vec<String>>,
        released: Arc<AtomicUsize>,
    }

    impl MockTransport {
        fn new(replies: &[(&str, Reply)], fetch: Fetch) -> Self {
            Self {
                replies: replies
                    .iter()
                    .map(|(s, r)| (s.to_string(), r.clone()))
                    .collect(),
                fetch,
                attempts: Mutex::new(Vec::new()),
                released: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    struct MockSession {
        fetch: Fetch,
        released: Arc<AtomicUsize>,
    }

    impl Drop for MockSession {
        fn drop(&mut self) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl RemoteSession for MockSession {
        fn fetch(&mut self, remote_path: &str, out: &mut dyn Write) -> Result<u64, TransferError> {
            assert_eq!(remote_path, "/tmp/system.cfg");
            match &self.fetch {
                Fetch::Bytes(b) => {
                    out.write_all(b)?;
                    Ok(b.len() as u64)
                }
                Fetch::Protocol(e) => {
                    out.write_all(b"partial")?;
                    Err(TransferError::Protocol(e.clone()))
                }
                Fetch::Unexpected(e) => Err(TransferError::Unexpected(e.clone())),
            }
        }
    }

    impl RemoteTransport for &MockTransport {
        type Session = MockSession;

        fn open(&self, address: &str, username: &str, secret: &str) -> Result<MockSession, AttemptError> {
            assert_eq!(address, "10.0.0.5");
            assert_eq!(username, "ubnt");
            self.attempts.lock().unwrap().push(secret.to_string());
            match self.replies.get(secret).cloned().unwrap_or(Reply::Reject(None)) {
                Reply::Accept => Ok(MockSession {
                    fetch: self.fetch.clone(),
                    released: self.released.clone(),
                }),
                Reply::Reject(note) => Err(AttemptError::AuthRejected { note }),
                Reply::Connection(d) => Err(AttemptError::Connection(d)),
                Reply::Unexpected(d) => Err(AttemptError::Unexpected(d)),
            }
        }
    }

    fn run(
        transport: &MockTransport,
        secrets: &str,
    ) -> (BackupOutcome, tempfile::TempDir, Vec<String>) {
        let tmp = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(tmp.path()).unwrap();
        let creds = CredentialSet::from_whitespace("ubnt", secrets);
        let executor = BackupExecutor::new(transport, creds, store, "/tmp/system.cfg");
        let outcome = executor.backup("10.0.0.5");
        let attempts = transport.attempts.lock().unwrap().clone();
        (outcome, tmp, attempts)
    }

    fn stored_files(dir: &tempfile::TempDir) -> Vec<String> {
        std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn second_secret_authenticates_and_artifact_is_written() {
        let transport = MockTransport::new(
            &[("wrong", Reply::Reject(None)), ("right", Reply::Accept)],
            Fetch::Bytes(b"aaa.status=enabled\n".to_vec()),
        );
        let (outcome, dir, attempts) = run(&transport, "wrong right");

        assert_eq!(attempts, ["wrong", "right"]);
        let BackupOutcome::Success { artifact_name } = &outcome else {
            panic!("expected success, got {outcome:?}");
        };
        assert!(artifact_name.starts_with("10.0.0.5_"));
        assert!(artifact_name.ends_with(".cfg"));
        assert!(outcome.status_text().contains("Backup successful"));

        let contents = std::fs::read(dir.path().join(artifact_name)).unwrap();
        assert_eq!(contents, b"aaa.status=enabled\n");
        assert_eq!(transport.released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn secrets_after_the_first_success_are_never_tried() {
        let transport = MockTransport::new(
            &[("a", Reply::Reject(None)), ("b", Reply::Accept), ("c", Reply::Accept)],
            Fetch::Bytes(b"cfg".to_vec()),
        );
        let (outcome, _dir, attempts) = run(&transport, "a b c d");
        assert!(outcome.is_success());
        assert_eq!(attempts, ["a", "b"]);
    }

    #[test]
    fn all_rejected_tries_each_secret_once_in_order() {
        let transport = MockTransport::new(&[], Fetch::Bytes(Vec::new()));
        let (outcome, dir, attempts) = run(&transport, "wrong1 wrong2 wrong3");

        assert_eq!(attempts, ["wrong1", "wrong2", "wrong3"]);
        assert_eq!(
            outcome,
            BackupOutcome::AuthExhausted { detail: "All passwords failed".into() }
        );
        assert!(outcome.status_text().contains("failed"));
        assert!(stored_files(&dir).is_empty());
    }

    #[test]
    fn exhausted_detail_uses_last_connection_note() {
        let transport = MockTransport::new(
            &[
                ("a", Reply::Reject(Some("server sent disconnect".into()))),
                ("b", Reply::Reject(Some("keepalive lost".into()))),
                ("c", Reply::Reject(None)),
            ],
            Fetch::Bytes(Vec::new()),
        );
        let (outcome, _dir, _) = run(&transport, "a b c");
        assert_eq!(
            outcome,
            BackupOutcome::AuthExhausted { detail: "keepalive lost".into() }
        );
    }

    #[test]
    fn connection_failure_stops_rotation() {
        let transport = MockTransport::new(
            &[("a", Reply::Connection("timed out".into())), ("b", Reply::Accept)],
            Fetch::Bytes(b"cfg".to_vec()),
        );
        let (outcome, dir, attempts) = run(&transport, "a b");

        assert_eq!(attempts, ["a"]);
        assert_eq!(
            outcome,
            BackupOutcome::ConnectionFailed {
                address: "10.0.0.5".into(),
                detail: "timed out".into(),
            }
        );
        assert_eq!(
            outcome.status_text(),
            "Backup failed: [10.0.0.5] Connection error: timed out"
        );
        assert!(stored_files(&dir).is_empty());
    }

    #[test]
    fn connection_failure_after_rejection_still_stops() {
        let transport = MockTransport::new(
            &[
                ("a", Reply::Reject(None)),
                ("b", Reply::Connection("no route to host".into())),
            ],
            Fetch::Bytes(Vec::new()),
        );
        let (outcome, _dir, attempts) = run(&transport, "a b c");
        assert_eq!(attempts, ["a", "b"]);
        assert!(matches!(outcome, BackupOutcome::ConnectionFailed { .. }));
    }

    #[test]
    fn unexpected_attempt_error_aborts() {
        let transport = MockTransport::new(
            &[("a", Reply::Unexpected("session init failed".into()))],
            Fetch::Bytes(Vec::new()),
        );
        let (outcome, _dir, attempts) = run(&transport, "a b");
        assert_eq!(attempts, ["a"]);
        assert_eq!(
            outcome,
            BackupOutcome::UnexpectedError { detail: "session init failed".into() }
        );
    }

    #[test]
    fn transfer_failure_leaves_no_file_and_releases_session() {
        let transport = MockTransport::new(
            &[("a", Reply::Accept)],
            Fetch::Protocol("scp: /tmp/system.cfg: No such file".into()),
        );
        let (outcome, dir, _) = run(&transport, "a");

        assert_eq!(
            outcome,
            BackupOutcome::TransferFailed {
                detail: "scp: /tmp/system.cfg: No such file".into()
            }
        );
        assert!(stored_files(&dir).is_empty());
        assert_eq!(transport.released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unexpected_transfer_error_is_reported_as_unexpected() {
        let transport = MockTransport::new(
            &[("a", Reply::Accept)],
            Fetch::Unexpected("channel vanished".into()),
        );
        let (outcome, dir, _) = run(&transport, "a");
        assert_eq!(
            outcome,
            BackupOutcome::UnexpectedError { detail: "channel vanished".into() }
        );
        assert!(stored_files(&dir).is_empty());
    }

    #[test]
    fn local_file_error_is_a_transfer_failure() {
        let transport = MockTransport::new(&[("a", Reply::Accept)], Fetch::Bytes(b"cfg".to_vec()));
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("backups");
        let store = ArtifactStore::open(&dir).unwrap();
        std::fs::remove_dir(&dir).unwrap();

        let executor = BackupExecutor::new(
            &transport,
            CredentialSet::from_whitespace("ubnt", "a"),
            store,
            "/tmp/system.cfg",
        );
        let outcome = executor.backup("10.0.0.5");

        let BackupOutcome::TransferFailed { detail } = &outcome else {
            panic!("expected transfer failure, got {outcome:?}");
        };
        assert!(detail.starts_with("Local file error"), "{detail}");
        assert_eq!(transport.released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn empty_credential_list_is_exhausted_immediately() {
        let transport = MockTransport::new(&[], Fetch::Bytes(Vec::new()));
        let (outcome, _dir, attempts) = run(&transport, "");
        assert!(attempts.is_empty());
        assert!(matches!(outcome, BackupOutcome::AuthExhausted { .. }));
    }
}
