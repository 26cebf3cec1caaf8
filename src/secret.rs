//! A small `Zeroize`-on-`Drop` wrapper for bind credentials, modeled on
//! the teacher crate's `crypto::KeyMaterial` / `StaticKeyProvider` pattern:
//! secrets get scrubbed from memory as soon as their owner goes away
//! instead of lingering in a freed heap allocation.

use serde::Serialize;
use std::fmt;
use zeroize::Zeroize;

#[derive(Clone, Default)]
pub struct SecretString(String);

impl SecretString {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for SecretString {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SecretString {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl PartialEq for SecretString {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}
impl Eq for SecretString {}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretString(***)")
    }
}

// Serialized only ever as a redaction marker: settings dumps (CLI `--json`,
// FFI debug helpers) must never leak the cleartext password.
impl Serialize for SecretString {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(if self.0.is_empty() { "" } else { "***" })
    }
}

impl Drop for SecretString {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_never_prints_cleartext() {
        let s = SecretString::new("s3cret");
        assert_eq!(format!("{s:?}"), "SecretString(***)");
    }

    #[test]
    fn serialize_redacts_nonempty() {
        let s = SecretString::new("s3cret");
        assert_eq!(serde_json::to_string(&s).unwrap(), "\"***\"");
    }

    #[test]
    fn serialize_keeps_empty_visible() {
        let s = SecretString::new("");
        assert_eq!(serde_json::to_string(&s).unwrap(), "\"\"");
    }
}
