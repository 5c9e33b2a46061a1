//! In-memory store for tests and dry runs
//!
//! Implements both store ports over plain maps. Failures can be injected to
//! exercise partial-commit and collaborator-outage paths.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::result::{Error, Result};
use crate::domain::{DuplicateProbe, Tag, TagRule, Transaction};
use crate::ports::{TagRuleStore, TransactionStore};

#[derive(Debug, Default)]
struct State {
    transactions: HashMap<String, Vec<Transaction>>,
    tags: HashMap<String, Vec<Tag>>,
    rules: HashMap<String, Vec<TagRule>>,
    /// Inserts of transactions with this description fail
    fail_descriptions: HashSet<String>,
}

/// Profile-scoped in-memory transaction and rule store
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<State>,
    unavailable: AtomicBool,
    insert_attempts: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate a persisted transaction (e.g., from an earlier import)
    pub fn seed(&self, tx: Transaction) {
        let mut state = self.write();
        state
            .transactions
            .entry(tx.profile_id.clone())
            .or_default()
            .push(tx);
    }

    /// Add a tag to a profile's vocabulary
    pub fn add_tag(&self, profile_id: &str, name: &str) {
        let mut state = self.write();
        let tags = state.tags.entry(profile_id.to_string()).or_default();
        if !tags.iter().any(|t| t.name == name) {
            tags.push(Tag {
                id: Uuid::new_v4().to_string(),
                name: name.to_string(),
            });
        }
    }

    /// Make inserts of transactions with this description fail
    pub fn fail_insert_for(&self, description: &str) {
        self.write().fail_descriptions.insert(description.to_string());
    }

    /// Make every call fail as if the backend were down
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of `insert_transaction` calls, successful or not
    pub fn insert_attempts(&self) -> usize {
        self.insert_attempts.load(Ordering::SeqCst)
    }

    pub fn transactions(&self, profile_id: &str) -> Vec<Transaction> {
        self.read()
            .transactions
            .get(profile_id)
            .cloned()
            .unwrap_or_default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(Error::store("Store unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl TransactionStore for MemoryStore {
    async fn existing_duplicate_keys(
        &self,
        profile_id: &str,
        probes: &[DuplicateProbe],
    ) -> Result<HashSet<String>> {
        self.check_available()?;
        let wanted: HashSet<String> = probes.iter().map(|p| p.key()).collect();
        let state = self.read();
        Ok(state
            .transactions
            .get(profile_id)
            .into_iter()
            .flatten()
            .map(|tx| tx.duplicate_key())
            .filter(|key| wanted.contains(key))
            .collect())
    }

    async fn insert_transaction(&self, profile_id: &str, tx: &Transaction) -> Result<()> {
        self.insert_attempts.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;

        let mut state = self.write();
        if state.fail_descriptions.contains(&tx.description) {
            return Err(Error::store(format!("Insert rejected for transaction {}", tx.id)));
        }

        let vocabulary = state.tags.entry(profile_id.to_string()).or_default();
        for name in &tx.tags {
            if !vocabulary.iter().any(|t| t.name == *name) {
                vocabulary.push(Tag {
                    id: Uuid::new_v4().to_string(),
                    name: name.clone(),
                });
            }
        }

        state
            .transactions
            .entry(profile_id.to_string())
            .or_default()
            .push(tx.clone());
        Ok(())
    }

    async fn list_tags(&self, profile_id: &str) -> Result<Vec<Tag>> {
        self.check_available()?;
        Ok(self.read().tags.get(profile_id).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl TagRuleStore for MemoryStore {
    async fn list_rules(&self, profile_id: &str) -> Result<Vec<TagRule>> {
        self.check_available()?;
        Ok(self.read().rules.get(profile_id).cloned().unwrap_or_default())
    }

    async fn create_rule(&self, profile_id: &str, rule: &TagRule) -> Result<()> {
        self.check_available()?;
        self.write()
            .rules
            .entry(profile_id.to_string())
            .or_default()
            .push(rule.clone());
        Ok(())
    }

    async fn update_rule(&self, profile_id: &str, rule: &TagRule) -> Result<()> {
        self.check_available()?;
        let mut state = self.write();
        let slot = state
            .rules
            .get_mut(profile_id)
            .and_then(|rules| rules.iter_mut().find(|r| r.id == rule.id))
            .ok_or_else(|| Error::not_found(format!("Rule {}", rule.id)))?;
        *slot = rule.clone();
        Ok(())
    }

    async fn delete_rule(&self, profile_id: &str, rule_id: Uuid) -> Result<bool> {
        self.check_available()?;
        let mut state = self.write();
        let Some(rules) = state.rules.get_mut(profile_id) else {
            return Ok(false);
        };
        let before = rules.len();
        rules.retain(|r| r.id != rule_id);
        Ok(rules.len() != before)
    }

    async fn replace_rules(&self, profile_id: &str, rules: &[TagRule]) -> Result<()> {
        self.check_available()?;
        self.write()
            .rules
            .insert(profile_id.to_string(), rules.to_vec());
        Ok(())
    }
}
