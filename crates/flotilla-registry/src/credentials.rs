//! Credential lookup.

use std::collections::BTreeMap;
use std::fmt;

use flotilla_core::CredentialEntry;
use tracing::debug;

/// A string that never shows up in `Debug` output or logs.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(<redacted>)")
    }
}

/// Access/secret key pair for the remote infrastructure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_key: String,
    pub secret_key: Secret,
}

/// Resolves an opaque credentials id to a key pair.
///
/// `scope` is the name of the cloud asking; stores may refuse ids that
/// belong to another cloud.
pub trait CredentialStore: Send + Sync {
    fn lookup(&self, id: &str, scope: &str) -> Option<Credentials>;
}

/// Credentials declared in the `[credentials.<id>]` tables of flotilla.toml.
#[derive(Debug, Clone, Default)]
pub struct ConfigCredentialStore {
    entries: BTreeMap<String, CredentialEntry>,
}

impl ConfigCredentialStore {
    pub fn new(entries: BTreeMap<String, CredentialEntry>) -> Self {
        Self { entries }
    }
}

impl CredentialStore for ConfigCredentialStore {
    fn lookup(&self, id: &str, scope: &str) -> Option<Credentials> {
        if id.trim().is_empty() {
            return None;
        }
        let entry = self.entries.get(id)?;
        if let Some(allowed) = &entry.scope
            && allowed != scope
        {
            debug!(%id, %scope, %allowed, "credentials scoped to another cloud");
            return None;
        }
        Some(Credentials {
            access_key: entry.access_key.clone(),
            secret_key: Secret::new(entry.secret_key.clone()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ConfigCredentialStore {
        let mut entries = BTreeMap::new();
        entries.insert(
            "prod".to_string(),
            CredentialEntry {
                access_key: "AK".into(),
                secret_key: "SK".into(),
                scope: None,
            },
        );
        entries.insert(
            "eu-only".to_string(),
            CredentialEntry {
                access_key: "EU".into(),
                secret_key: "ESK".into(),
                scope: Some("eu".into()),
            },
        );
        ConfigCredentialStore::new(entries)
    }

    #[test]
    fn lookup_known_id() {
        let creds = store().lookup("prod", "hyper").unwrap();
        assert_eq!(creds.access_key, "AK");
        assert_eq!(creds.secret_key.expose(), "SK");
    }

    #[test]
    fn blank_or_unknown_id_resolves_to_none() {
        let store = store();
        assert!(store.lookup("", "hyper").is_none());
        assert!(store.lookup("   ", "hyper").is_none());
        assert!(store.lookup("missing", "hyper").is_none());
    }

    #[test]
    fn scoped_entry_only_serves_its_cloud() {
        let store = store();
        assert!(store.lookup("eu-only", "hyper").is_none());
        assert_eq!(store.lookup("eu-only", "eu").unwrap().access_key, "EU");
    }

    #[test]
    fn secret_debug_is_redacted() {
        let creds = store().lookup("prod", "hyper").unwrap();
        assert!(!format!("{creds:?}").contains("SK"));
    }
}
