//! Execution keys.

use std::fmt;

use redfault_shared::constants::artifacts::KEY_PREFIX;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::target::TargetDescriptor;

/// Unique identifier of one execution: `<target identity>#<ULID>`.
///
/// The ULID nonce is time-ordered and carries 80 random bits, so keys
/// generated concurrently for the same target never collide.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionKey(String);

impl ExecutionKey {
    pub fn generate(target: &TargetDescriptor) -> Self {
        Self(format!("{}#{}", target.identity(), Ulid::new()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The nonce part of the key.
    pub fn nonce(&self) -> &str {
        self.0.rsplit_once('#').map(|(_, n)| n).unwrap_or(&self.0)
    }

    /// Naming prefix for temporary artifacts created by this execution,
    /// e.g. `redfault-big-key-01hx...-`.
    ///
    /// Enumerative cleanup removes everything matching this prefix.
    pub fn artifact_prefix(&self, kind: &str) -> String {
        format!(
            "{}-{}-{}-",
            KEY_PREFIX,
            kind,
            self.nonce().to_ascii_lowercase()
        )
    }
}

impl fmt::Display for ExecutionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ExecutionKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_key_shape() {
        let target = TargetDescriptor::new("redis://:pw@cache:6379");
        let key = ExecutionKey::generate(&target);
        assert!(key.as_str().starts_with("cache:6379/0#"));
        assert_eq!(key.nonce().len(), 26);
        assert!(!key.as_str().contains("pw"));
    }

    #[test]
    fn test_keys_unique_for_same_target() {
        let target = TargetDescriptor::new("memory://local");
        let keys: HashSet<_> = (0..1000).map(|_| ExecutionKey::generate(&target)).collect();
        assert_eq!(keys.len(), 1000);
    }

    #[test]
    fn test_artifact_prefix() {
        let key = ExecutionKey::from("cache:6379/0#01HX0000000000000000000000");
        assert_eq!(
            key.artifact_prefix("big-key"),
            "redfault-big-key-01hx0000000000000000000000-"
        );
    }
}
