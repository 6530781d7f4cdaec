//! Commit annotations as supplied by callers.
//!
//! Callers either name the commit hash explicitly (`hash:message`) or only
//! provide messages, in which case a short random hash is generated.

use std::str::FromStr;

use crate::error::RegistryError;
use crate::model::Commit;

/// Length of generated commit hashes.
pub const GENERATED_HASH_LEN: usize = 7;

/// A commit as supplied by a caller, before hashes are filled in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitInput {
    /// Explicit hash, if the caller has one.
    pub hash: Option<String>,
    /// Commit message.
    pub message: String,
}

impl CommitInput {
    /// A commit with a known hash.
    pub fn new(hash: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            hash: Some(hash.into()),
            message: message.into(),
        }
    }

    /// A commit which will get a generated hash.
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            hash: None,
            message: message.into(),
        }
    }

    /// Parse the `hash:message` form, splitting at the first colon.
    pub fn parse(input: &str) -> Result<Self, RegistryError> {
        let (hash, message) = input
            .split_once(':')
            .ok_or_else(|| RegistryError::InvalidCommit(input.to_owned()))?;
        let hash = hash.trim();
        if hash.is_empty() {
            return Err(RegistryError::InvalidCommit(input.to_owned()));
        }
        Ok(Self::new(hash, message.trim()))
    }

    fn into_commit(self) -> Option<Commit> {
        let message = self.message.trim();
        if message.is_empty() {
            return None;
        }

        let hash = match self.hash.as_deref().map(str::trim) {
            Some(hash) if !hash.is_empty() => hash.to_owned(),
            _ => generate_hash(),
        };

        Some(Commit {
            hash,
            message: message.to_owned(),
        })
    }
}

impl FromStr for CommitInput {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// One commit per non-blank line of `text`, each with a generated hash.
pub fn commits_from_lines(text: &str) -> Vec<CommitInput> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(CommitInput::message)
        .collect()
}

/// A random lowercase hexadecimal token of [`GENERATED_HASH_LEN`] characters.
pub fn generate_hash() -> String {
    let mut hash = uuid::Uuid::new_v4().simple().to_string();
    hash.truncate(GENERATED_HASH_LEN);
    hash
}

/// Turn caller input into stored commits: messages are trimmed, empty
/// messages dropped, and missing hashes generated. Order is preserved.
pub fn resolve(inputs: impl IntoIterator<Item = CommitInput>) -> Vec<Commit> {
    inputs
        .into_iter()
        .filter_map(CommitInput::into_commit)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_explicit_hash() {
        let commit = CommitInput::parse("abc123: fix bug").unwrap();
        assert_eq!(commit, CommitInput::new("abc123", "fix bug"));

        let commit: CommitInput = "abc123:feat: colons in message".parse().unwrap();
        assert_eq!(commit.message, "feat: colons in message");
    }

    #[test]
    fn parse_rejects_malformed() {
        assert!(CommitInput::parse("no colon here").is_err());
        assert!(CommitInput::parse(" : message").is_err());
    }

    #[test]
    fn lines_skip_blanks() {
        let inputs = commits_from_lines("first\n\n   \n second \n");
        assert_eq!(
            inputs,
            vec![CommitInput::message("first"), CommitInput::message("second")]
        );
    }

    #[test]
    fn generated_hashes_are_short_hex() {
        let hash = generate_hash();
        assert_eq!(hash.len(), GENERATED_HASH_LEN);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn resolve_fills_hashes_and_drops_empty_messages() {
        let commits = resolve(vec![
            CommitInput::new("abc123", " fix bug "),
            CommitInput::message("   "),
            CommitInput {
                hash: Some(" ".into()),
                message: "generated".into(),
            },
        ]);

        assert_eq!(commits.len(), 2);
        assert_eq!(commits[0].hash, "abc123");
        assert_eq!(commits[0].message, "fix bug");
        assert_eq!(commits[1].hash.len(), GENERATED_HASH_LEN);
        assert_eq!(commits[1].message, "generated");
    }
}
