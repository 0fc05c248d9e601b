//! Device account credentials.

use std::fmt;

/// One service account and its candidate secrets, tried in order.
///
/// Loaded once at startup and never mutated afterwards.
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialSet {
    username: String,
    secrets: Vec<String>,
}

impl CredentialSet {
    pub fn new(username: impl Into<String>, secrets: Vec<String>) -> Self {
        Self {
            username: username.into(),
            secrets,
        }
    }

    /// Split a whitespace-separated secret list (`UBNT_PASSWORDS` style).
    pub fn from_whitespace(username: impl Into<String>, secrets: &str) -> Self {
        Self::new(
            username,
            secrets.split_whitespace().map(str::to_string).collect(),
        )
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Candidate secrets in attempt order.
    pub fn secrets(&self) -> impl ExactSizeIterator<Item = &str> {
        self.secrets.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.secrets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.secrets.is_empty()
    }
}

impl fmt::Debug for CredentialSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialSet")
            .field("username", &self.username)
            .field("secrets", &format_args!("[{} redacted]", self.secrets.len()))
            .finish()
    }
}
