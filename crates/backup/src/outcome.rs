//! Terminal result of one backup run.

use std::fmt;

/// Detail used when every candidate secret was rejected.
pub const ALL_CANDIDATES_FAILED: &str = "All passwords failed";

/// What happened to a backup, as seen by the queue consumer.
///
/// Every variant is terminal: the job is acknowledged and the
/// [`status_text`](BackupOutcome::status_text) is reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupOutcome {
    Success { artifact_name: String },
    AuthExhausted { detail: String },
    /// The network path failed; `address` is echoed in the status text.
    ConnectionFailed { address: String, detail: String },
    TransferFailed { detail: String },
    UnexpectedError { detail: String },
}

impl BackupOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, BackupOutcome::Success { .. })
    }

    /// Human-readable status sent to the control API as `backup_status`.
    pub fn status_text(&self) -> String {
        match self {
            BackupOutcome::Success { artifact_name } => {
                format!("Backup successful: {artifact_name}")
            }
            BackupOutcome::AuthExhausted { detail } => format!("Backup failed: {detail}"),
            BackupOutcome::ConnectionFailed { address, detail } => {
                format!("Backup failed: [{address}] Connection error: {detail}")
            }
            BackupOutcome::TransferFailed { detail } => format!("File transfer failed: {detail}"),
            BackupOutcome::UnexpectedError { detail } => format!("Unexpected error: {detail}"),
        }
    }

    /// Short machine-friendly label for log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            BackupOutcome::Success { .. } => "success",
            BackupOutcome::AuthExhausted { .. } => "auth_exhausted",
            BackupOutcome::ConnectionFailed { .. } => "connection_failed",
            BackupOutcome::TransferFailed { .. } => "transfer_failed",
            BackupOutcome::UnexpectedError { .. } => "unexpected_error",
        }
    }
}

impl fmt::Display for BackupOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.status_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_status_names_the_artifact() {
        let outcome = BackupOutcome::Success {
            artifact_name: "10.0.0.5_20240101_120000.cfg".into(),
        };
        assert!(outcome.is_success());
        assert_eq!(
            outcome.status_text(),
            "Backup successful: 10.0.0.5_20240101_120000.cfg"
        );
    }

    #[test]
    fn failure_statuses_say_failed_or_error() {
        let cases = [
            BackupOutcome::AuthExhausted { detail: ALL_CANDIDATES_FAILED.into() },
            BackupOutcome::ConnectionFailed {
                address: "10.0.0.5".into(),
                detail: "timed out".into(),
            },
            BackupOutcome::TransferFailed { detail: "no such file".into() },
        ];
        for outcome in cases {
            assert!(!outcome.is_success());
            assert!(outcome.status_text().contains("failed"), "{outcome}");
        }
        let unexpected = BackupOutcome::UnexpectedError { detail: "boom".into() };
        assert_eq!(unexpected.status_text(), "Unexpected error: boom");
    }

    #[test]
    fn connection_failure_status_is_prefixed() {
        let outcome = BackupOutcome::ConnectionFailed {
            address: "192.168.1.20".into(),
            detail: "no route to host".into(),
        };
        assert_eq!(
            outcome.to_string(),
            "Backup failed: [192.168.1.20] Connection error: no route to host"
        );
        assert_eq!(outcome.kind(), "connection_failed");
    }
}
