//! Credential records and the lookup capability the token service relies on.
//!
//! The token service never owns staff records. It asks a [`CredentialStore`]
//! for the record matching a principal and works from the returned copy. The
//! in-memory implementation here backs both the binary (seeded from
//! configuration) and the tests; a relational store can implement the same
//! trait without touching `auth`.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Coarse permission tier carried in a session token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Captain,
}

impl Role {
    /// Returns the lowercase wire name of the role.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Captain => "captain",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a role name is not recognised.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown role '{0}', expected 'admin' or 'captain'")]
pub struct UnknownRole(pub String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Self::Admin),
            "captain" => Ok(Self::Captain),
            _ => Err(UnknownRole(s.to_string())),
        }
    }
}

/// A staff member's stored credential.
///
/// Records are immutable once the store is built.
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialRecord {
    /// Unique login identifier (username or email).
    pub principal_id: String,

    /// Shared secret compared verbatim at login.
    pub secret: String,

    /// Organization the principal belongs to.
    pub org_id: i64,

    /// Permission tier, absent for principals provisioned without one.
    pub role: Option<Role>,
}

impl CredentialRecord {
    /// Creates a record for one principal.
    pub fn new(
        principal_id: impl Into<String>,
        secret: impl Into<String>,
        org_id: i64,
        role: Option<Role>,
    ) -> Self {
        Self {
            principal_id: principal_id.into(),
            secret: secret.into(),
            org_id,
            role,
        }
    }
}

// Never print the secret, even in debug output.
impl fmt::Debug for CredentialRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialRecord")
            .field("principal_id", &self.principal_id)
            .field("secret", &"<redacted>")
            .field("org_id", &self.org_id)
            .field("role", &self.role)
            .finish()
    }
}

/// Lookup capability over staff credentials.
///
/// Implementations must be safe to share across request tasks.
pub trait CredentialStore: Send + Sync {
    /// Returns the record for `principal_id`, or `None` if it is unknown.
    fn lookup(&self, principal_id: &str) -> Option<CredentialRecord>;

    /// Number of principals known to the store.
    fn len(&self) -> usize;

    /// Returns true if the store holds no principals.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Credential store backed by a map built once at startup.
#[derive(Debug, Default, Clone)]
pub struct InMemoryCredentialStore {
    records: HashMap<String, CredentialRecord>,
}

impl InMemoryCredentialStore {
    /// Builds a store from the given records.
    ///
    /// A later record with the same principal replaces an earlier one;
    /// configuration loading rejects duplicates before this point.
    pub fn new(records: impl IntoIterator<Item = CredentialRecord>) -> Self {
        let records: HashMap<_, _> = records
            .into_iter()
            .map(|record| (record.principal_id.clone(), record))
            .collect();
        debug!(principal_count = records.len(), "Built credential store");
        Self { records }
    }
}

impl CredentialStore for InMemoryCredentialStore {
    fn lookup(&self, principal_id: &str) -> Option<CredentialRecord> {
        self.records.get(principal_id).cloned()
    }

    fn len(&self) -> usize {
        self.records.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_store() -> InMemoryCredentialStore {
        InMemoryCredentialStore::new(vec![
            CredentialRecord::new("biryanis", "biryanis", 1, None),
            CredentialRecord::new("ammammagarillu", "ammammagarillu", 2, Some(Role::Captain)),
            CredentialRecord::new("royalspice@smartserver.com", "spice", 3, Some(Role::Admin)),
        ])
    }

    #[test]
    fn lookup_returns_matching_record() {
        let store = sample_store();
        let record = store.lookup("ammammagarillu").expect("record present");
        assert_eq!(record.org_id, 2);
        assert_eq!(record.role, Some(Role::Captain));
    }

    #[test]
    fn lookup_unknown_principal_returns_none() {
        let store = sample_store();
        assert!(store.lookup("nobody").is_none());
        assert!(store.lookup("").is_none());
    }

    #[test]
    fn lookup_is_case_sensitive() {
        let store = sample_store();
        assert!(store.lookup("Biryanis").is_none());
    }

    #[test]
    fn len_and_is_empty() {
        assert_eq!(sample_store().len(), 3);
        assert!(!sample_store().is_empty());
        assert!(InMemoryCredentialStore::default().is_empty());
    }

    #[test]
    fn later_record_for_same_principal_replaces_earlier() {
        let store = InMemoryCredentialStore::new(vec![
            CredentialRecord::new("a", "first", 5, None),
            CredentialRecord::new("a", "second", 2, None),
        ]);
        assert_eq!(store.len(), 1);
        assert_eq!(store.lookup("a").unwrap().org_id, 2);
    }

    #[test]
    fn role_parses_case_insensitively() {
        assert_eq!("admin".parse::<Role>(), Ok(Role::Admin));
        assert_eq!(" Captain ".parse::<Role>(), Ok(Role::Captain));
        assert_eq!("ADMIN".parse::<Role>(), Ok(Role::Admin));
        assert!(matches!("waiter".parse::<Role>(), Err(UnknownRole(ref r)) if r == "waiter"));
    }

    #[test]
    fn role_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Role::Captain).unwrap(), "\"captain\"");
        assert_eq!(Role::Admin.to_string(), "admin");
    }

    #[test]
    fn debug_output_redacts_secret() {
        let record = CredentialRecord::new("biryanis", "super-secret", 1, None);
        let debug_str = format!("{:?}", record);
        assert!(debug_str.contains("biryanis"));
        assert!(!debug_str.contains("super-secret"));
    }
}
