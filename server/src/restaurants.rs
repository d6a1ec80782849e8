//! Restaurant directory.
//!
//! A read-only listing of the organizations served by this deployment. It
//! sits outside the authentication path: routes read it, nothing in `auth`
//! does.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::trace;

/// Errors raised by a [`RestaurantDirectory`] backend.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    /// The backing store could not be reached or read.
    #[error("restaurant directory unavailable: {0}")]
    Unavailable(String),
}

/// Public summary of one restaurant organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestaurantSummary {
    /// Organization id, shared with the staff roster.
    pub org_id: i64,

    /// Display name.
    pub name: String,
}

impl RestaurantSummary {
    /// Creates a summary.
    pub fn new(org_id: i64, name: impl Into<String>) -> Self {
        Self {
            org_id,
            name: name.into(),
        }
    }
}

/// Read access to restaurant summaries.
pub trait RestaurantDirectory: Send + Sync {
    /// Lists every restaurant, ordered by organization id.
    fn list(&self) -> Result<Vec<RestaurantSummary>, DirectoryError>;

    /// Returns the restaurant for `org_id`, if any.
    fn get(&self, org_id: i64) -> Result<Option<RestaurantSummary>, DirectoryError> {
        Ok(self.list()?.into_iter().find(|r| r.org_id == org_id))
    }
}

/// Directory held in memory, keyed by organization id.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRestaurantDirectory {
    entries: BTreeMap<i64, RestaurantSummary>,
}

impl InMemoryRestaurantDirectory {
    /// Builds a directory. The first summary seen for an organization wins.
    pub fn new(summaries: impl IntoIterator<Item = RestaurantSummary>) -> Self {
        let mut entries = BTreeMap::new();
        for summary in summaries {
            entries.entry(summary.org_id).or_insert(summary);
        }
        Self { entries }
    }
}

impl RestaurantDirectory for InMemoryRestaurantDirectory {
    fn list(&self) -> Result<Vec<RestaurantSummary>, DirectoryError> {
        trace!(count = self.entries.len(), "Listing restaurants");
        Ok(self.entries.values().cloned().collect())
    }

    fn get(&self, org_id: i64) -> Result<Option<RestaurantSummary>, DirectoryError> {
        Ok(self.entries.get(&org_id).cloned())
    }
}
