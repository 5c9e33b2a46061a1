//! Store ports - transaction and tag rule persistence

use std::collections::HashSet;

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::result::Result;
use crate::domain::{DuplicateProbe, Tag, TagRule, Transaction};

/// Profile-scoped transaction persistence
#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Return the composite keys (`date:amount`) among `probes` that already exist
    async fn existing_duplicate_keys(
        &self,
        profile_id: &str,
        probes: &[DuplicateProbe],
    ) -> Result<HashSet<String>>;

    /// Persist a single transaction
    async fn insert_transaction(&self, profile_id: &str, tx: &Transaction) -> Result<()>;

    /// The profile's tag vocabulary
    async fn list_tags(&self, profile_id: &str) -> Result<Vec<Tag>>;
}

/// Durable, profile-scoped tag rule storage
///
/// Rule order is significant and must be preserved by `list_rules`.
#[async_trait]
pub trait TagRuleStore: Send + Sync {
    async fn list_rules(&self, profile_id: &str) -> Result<Vec<TagRule>>;

    /// Append a rule to the end of the profile's list
    async fn create_rule(&self, profile_id: &str, rule: &TagRule) -> Result<()>;

    /// Update a rule in place; fails with `NotFound` for unknown ids
    async fn update_rule(&self, profile_id: &str, rule: &TagRule) -> Result<()>;

    /// Delete a rule; returns false if it did not exist
    async fn delete_rule(&self, profile_id: &str, rule_id: Uuid) -> Result<bool>;

    /// Replace the profile's whole rule list, keeping the given order
    async fn replace_rules(&self, profile_id: &str, rules: &[TagRule]) -> Result<()>;
}
