//! DuckDB store implementation
//!
//! Implements both store ports on a single connection. Amounts are stored as
//! exact decimal text and every transaction carries its precomputed
//! `dedup_key`, so duplicate lookups are a plain indexed `IN` query.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use duckdb::{params, params_from_iter, Connection};
use rust_decimal::Decimal;
use tracing::warn;
use uuid::Uuid;

use crate::domain::result::{Error, Result};
use crate::domain::{DuplicateProbe, MatchMode, Tag, TagRule, Transaction, TransactionType};
use crate::ports::{TagRuleStore, TransactionStore};
use crate::services::migration::{MigrationResult, MigrationService};

/// Maximum number of attempts when the database file is locked
const MAX_RETRIES: u32 = 5;

/// Initial retry delay in milliseconds (doubles each retry)
const INITIAL_RETRY_DELAY_MS: u64 = 50;

/// Whether an open error looks like another process holding the file
fn is_retryable_error(err_msg: &str) -> bool {
    let lower = err_msg.to_lowercase();
    lower.contains("being used by another process")
        || lower.contains("cannot access the file")
        || lower.contains("resource temporarily unavailable")
        || lower.contains("database is locked")
        || lower.contains("file is already open")
}

/// DuckDB-backed transaction and tag rule store
pub struct DuckDbStore {
    conn: Mutex<Connection>,
    db_path: Option<PathBuf>,
}

impl DuckDbStore {
    /// Open (or create) a database file and bring its schema up to date
    ///
    /// Retries with exponential backoff while another process holds the file.
    pub fn open(db_path: &Path) -> Result<Self> {
        let mut attempt = 0;
        let conn = loop {
            match Self::try_open_connection(db_path) {
                Ok(conn) => break conn,
                Err(e) if attempt + 1 < MAX_RETRIES && is_retryable_error(&e.to_string()) => {
                    let delay = Duration::from_millis(INITIAL_RETRY_DELAY_MS * 2u64.pow(attempt));
                    warn!(
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "database busy, retrying"
                    );
                    thread::sleep(delay);
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        };

        let store = Self {
            conn: Mutex::new(conn),
            db_path: Some(db_path.to_path_buf()),
        };
        store.ensure_schema()?;
        Ok(store)
    }

    /// Throwaway in-memory database (dry runs and tests)
    pub fn open_in_memory() -> Result<Self> {
        let config = duckdb::Config::default().enable_autoload_extension(false)?;
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory_with_flags(config)?),
            db_path: None,
        };
        store.ensure_schema()?;
        Ok(store)
    }

    fn try_open_connection(db_path: &Path) -> duckdb::Result<Connection> {
        // Extension autoloading stays off; JSON is linked in through the "json" feature
        let config = duckdb::Config::default().enable_autoload_extension(false)?;
        Connection::open_with_flags(db_path, config)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Run pending schema migrations
    pub fn run_migrations(&self) -> Result<MigrationResult> {
        let conn = self.conn();
        MigrationService::new(&conn).run_pending()
    }

    pub fn ensure_schema(&self) -> Result<()> {
        self.run_migrations()?;
        Ok(())
    }

    /// All persisted transactions for a profile, oldest first
    pub fn list_transactions(&self, profile_id: &str) -> Result<Vec<Transaction>> {
        let conn = self.conn();
        // duckdb-rs cannot read VARCHAR[] directly; go through JSON text
        let mut stmt = conn.prepare(
            "SELECT transaction_id, profile_id, transaction_type, amount, description,
                    transaction_date, reference, to_json(tags)::VARCHAR, created_at::VARCHAR
             FROM transactions
             WHERE profile_id = ?
             ORDER BY created_at, transaction_id",
        )?;

        let rows = stmt
            .query_map([profile_id], |row| {
                Ok(RawTransaction {
                    id: row.get(0)?,
                    profile_id: row.get(1)?,
                    transaction_type: row.get(2)?,
                    amount: row.get(3)?,
                    description: row.get(4)?,
                    transaction_date: row.get(5)?,
                    reference: row.get(6)?,
                    tags: row.get::<_, Option<String>>(7)?,
                    created_at: row.get(8)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter().map(RawTransaction::into_transaction).collect()
    }

    fn insert_tags(conn: &Connection, profile_id: &str, names: &[String]) -> Result<()> {
        for name in names {
            conn.execute(
                "INSERT INTO tags (tag_id, profile_id, name) VALUES (?, ?, ?)
                 ON CONFLICT (profile_id, name) DO NOTHING",
                params![Uuid::new_v4().to_string(), profile_id, name],
            )?;
        }
        Ok(())
    }

    fn insert_rule(conn: &Connection, profile_id: &str, rule: &TagRule, sort_order: i64) -> Result<()> {
        conn.execute(
            "INSERT INTO tag_rules (rule_id, profile_id, sort_order, match_text, match_mode, tag, replacement_description)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                rule.id.to_string(),
                profile_id,
                sort_order,
                rule.match_text,
                rule.match_mode.as_str(),
                rule.tag,
                rule.replacement_description,
            ],
        )?;
        Ok(())
    }
}

/// Row as read from `transactions`, before type conversion
struct RawTransaction {
    id: String,
    profile_id: String,
    transaction_type: String,
    amount: String,
    description: String,
    transaction_date: String,
    reference: Option<String>,
    tags: Option<String>,
    created_at: String,
}

impl RawTransaction {
    fn into_transaction(self) -> Result<Transaction> {
        let id = Uuid::parse_str(&self.id)
            .map_err(|e| Error::store(format!("Invalid transaction id '{}': {}", self.id, e)))?;
        let amount: Decimal = self
            .amount
            .parse()
            .map_err(|e| Error::store(format!("Invalid amount for transaction {}: {}", id, e)))?;
        let tags = match self.tags {
            Some(json) => serde_json::from_str(&json)?,
            None => Vec::new(),
        };

        Ok(Transaction {
            id,
            profile_id: self.profile_id,
            transaction_type: TransactionType::from_cell(&self.transaction_type),
            amount,
            description: self.description,
            transaction_date: self.transaction_date,
            reference: self.reference,
            tags,
            created_at: parse_timestamp(&self.created_at),
        })
    }
}

#[async_trait]
impl TransactionStore for DuckDbStore {
    async fn existing_duplicate_keys(
        &self,
        profile_id: &str,
        probes: &[DuplicateProbe],
    ) -> Result<HashSet<String>> {
        if probes.is_empty() {
            return Ok(HashSet::new());
        }

        let keys: Vec<String> = probes.iter().map(|p| p.key()).collect();
        let placeholders = vec!["?"; keys.len()].join(", ");
        let sql = format!(
            "SELECT DISTINCT dedup_key FROM transactions WHERE profile_id = ? AND dedup_key IN ({})",
            placeholders
        );

        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let params = std::iter::once(profile_id.to_string()).chain(keys);
        let found = stmt
            .query_map(params_from_iter(params), |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<HashSet<_>, _>>()?;
        Ok(found)
    }

    async fn insert_transaction(&self, profile_id: &str, tx: &Transaction) -> Result<()> {
        let mut conn = self.conn();
        let db_tx = conn.transaction()?;

        let sql = format!(
            "INSERT INTO transactions (transaction_id, profile_id, transaction_type, amount, description,
                                       transaction_date, reference, tags, dedup_key, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, {}, ?, ?)",
            format_tags_array(&tx.tags)
        );
        db_tx.execute(
            &sql,
            params![
                tx.id.to_string(),
                profile_id,
                tx.transaction_type.as_str(),
                tx.amount.to_string(),
                tx.description,
                tx.transaction_date,
                tx.reference,
                tx.duplicate_key(),
                format_timestamp(&tx.created_at),
            ],
        )?;
        Self::insert_tags(&db_tx, profile_id, &tx.tags)?;

        db_tx.commit()?;
        Ok(())
    }

    async fn list_tags(&self, profile_id: &str) -> Result<Vec<Tag>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT tag_id, name FROM tags WHERE profile_id = ? ORDER BY name")?;
        let tags = stmt
            .query_map([profile_id], |row| {
                Ok(Tag {
                    id: row.get(0)?,
                    name: row.get(1)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(tags)
    }
}

#[async_trait]
impl TagRuleStore for DuckDbStore {
    async fn list_rules(&self, profile_id: &str) -> Result<Vec<TagRule>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT rule_id, match_text, match_mode, tag, replacement_description
             FROM tag_rules WHERE profile_id = ? ORDER BY sort_order",
        )?;

        let rows = stmt
            .query_map([profile_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<String>>(4)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, match_text, mode, tag, replacement_description)| {
                Ok(TagRule {
                    id: Uuid::parse_str(&id)
                        .map_err(|e| Error::store(format!("Invalid rule id '{}': {}", id, e)))?,
                    match_text,
                    match_mode: mode.parse::<MatchMode>().unwrap_or_default(),
                    tag,
                    replacement_description,
                })
            })
            .collect()
    }

    async fn create_rule(&self, profile_id: &str, rule: &TagRule) -> Result<()> {
        let conn = self.conn();
        let next: i64 = conn.query_row(
            "SELECT COALESCE(MAX(sort_order), -1) + 1 FROM tag_rules WHERE profile_id = ?",
            [profile_id],
            |row| row.get(0),
        )?;
        Self::insert_rule(&conn, profile_id, rule, next)
    }

    async fn update_rule(&self, profile_id: &str, rule: &TagRule) -> Result<()> {
        let changed = self.conn().execute(
            "UPDATE tag_rules
             SET match_text = ?, match_mode = ?, tag = ?, replacement_description = ?
             WHERE rule_id = ? AND profile_id = ?",
            params![
                rule.match_text,
                rule.match_mode.as_str(),
                rule.tag,
                rule.replacement_description,
                rule.id.to_string(),
                profile_id,
            ],
        )?;
        if changed == 0 {
            return Err(Error::not_found(format!("Rule {}", rule.id)));
        }
        Ok(())
    }

    async fn delete_rule(&self, profile_id: &str, rule_id: Uuid) -> Result<bool> {
        let deleted = self.conn().execute(
            "DELETE FROM tag_rules WHERE rule_id = ? AND profile_id = ?",
            params![rule_id.to_string(), profile_id],
        )?;
        Ok(deleted > 0)
    }

    async fn replace_rules(&self, profile_id: &str, rules: &[TagRule]) -> Result<()> {
        let mut conn = self.conn();
        let db_tx = conn.transaction()?;
        db_tx.execute("DELETE FROM tag_rules WHERE profile_id = ?", [profile_id])?;
        for (order, rule) in rules.iter().enumerate() {
            Self::insert_rule(&db_tx, profile_id, rule, order as i64)?;
        }
        db_tx.commit()?;
        Ok(())
    }
}

/// Format tags as a DuckDB list literal: ['tag1', 'tag2']
fn format_tags_array(tags: &[String]) -> String {
    if tags.is_empty() {
        return "[]::VARCHAR[]".to_string();
    }

    let escaped: Vec<String> = tags
        .iter()
        .map(|t| format!("'{}'", t.replace('\'', "''")))
        .collect();

    format!("[{}]", escaped.join(", "))
}

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S%.6f").to_string()
}

/// Parse a TIMESTAMP rendered as text by DuckDB
fn parse_timestamp(s: &str) -> DateTime<Utc> {
    let s = s.trim();
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S"))
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f"))
        .map(|naive| naive.and_utc())
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::CandidateTransaction;

    fn transaction(date: &str, cents: i64, description: &str, tags: &[&str]) -> Transaction {
        let mut candidate = CandidateTransaction::new(0);
        candidate.transaction_date = date.to_string();
        candidate.amount = Decimal::new(cents, 2);
        candidate.description = description.to_string();
        let tags: Vec<String> = tags.iter().map(|t| t.to_string()).collect();
        Transaction::from_candidate("p1", &candidate, &tags)
    }

    #[test]
    fn test_format_tags_array() {
        assert_eq!(format_tags_array(&[]), "[]::VARCHAR[]");
        assert_eq!(
            format_tags_array(&["Coffee".to_string(), "Bob's".to_string()]),
            "['Coffee', 'Bob''s']"
        );
    }

    #[test]
    fn test_timestamp_round_trip_is_lossless_to_the_microsecond() {
        let ts = parse_timestamp("2024-03-01 12:30:45.123456");
        assert_eq!(format_timestamp(&ts), "2024-03-01 12:30:45.123456");
    }

    #[tokio::test]
    async fn test_insert_and_read_back() {
        let store = DuckDbStore::open_in_memory().unwrap();
        let tx = transaction("2024-01-05", -4200, "STARBUCKS, #123", &["Coffee", "it's"]);
        store.insert_transaction("p1", &tx).await.unwrap();

        let saved = store.list_transactions("p1").unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].id, tx.id);
        assert_eq!(saved[0].amount, Decimal::new(-4200, 2));
        assert_eq!(saved[0].description, "STARBUCKS, #123");
        assert_eq!(saved[0].tags, vec!["Coffee", "it's"]);
        assert!(store.list_transactions("p2").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_keys_match_normalized_amounts() {
        let store = DuckDbStore::open_in_memory().unwrap();
        store
            .insert_transaction("p1", &transaction("2024-02-01", 1000, "GROCER", &[]))
            .await
            .unwrap();

        let probes = vec![
            DuplicateProbe {
                transaction_date: "2024-02-01".to_string(),
                amount: Decimal::new(10, 0),
            },
            DuplicateProbe {
                transaction_date: "2024-02-02".to_string(),
                amount: Decimal::new(10, 0),
            },
        ];
        let found = store.existing_duplicate_keys("p1", &probes).await.unwrap();
        assert_eq!(found.len(), 1);
        assert!(found.contains("2024-02-01:10"));
        assert!(store.existing_duplicate_keys("p2", &probes).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_commit_extends_vocabulary_once() {
        let store = DuckDbStore::open_in_memory().unwrap();
        store
            .insert_transaction("p1", &transaction("2024-01-01", 100, "A", &["Coffee"]))
            .await
            .unwrap();
        store
            .insert_transaction("p1", &transaction("2024-01-02", 200, "B", &["Coffee", "Food"]))
            .await
            .unwrap();

        let names: Vec<String> = store.list_tags("p1").await.unwrap().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["Coffee", "Food"]);
    }

    #[tokio::test]
    async fn test_rule_crud_preserves_order() {
        let store = DuckDbStore::open_in_memory().unwrap();
        let a = TagRule::new("starbucks", MatchMode::Substring, "Coffee").with_replacement("Starbucks");
        let b = TagRule::new("^acme", MatchMode::Regex, "Work");
        store.create_rule("p1", &a).await.unwrap();
        store.create_rule("p1", &b).await.unwrap();

        let rules = store.list_rules("p1").await.unwrap();
        assert_eq!(rules, vec![a.clone(), b.clone()]);

        let mut edited = b.clone();
        edited.tag = "Office".to_string();
        store.update_rule("p1", &edited).await.unwrap();
        assert_eq!(store.list_rules("p1").await.unwrap()[1].tag, "Office");

        let ghost = TagRule::new("x", MatchMode::FullString, "y");
        assert!(matches!(store.update_rule("p1", &ghost).await, Err(Error::NotFound(_))));

        assert!(store.delete_rule("p1", a.id).await.unwrap());
        assert!(!store.delete_rule("p1", a.id).await.unwrap());

        store.replace_rules("p1", &[b.clone(), a.clone()]).await.unwrap();
        let ids: Vec<Uuid> = store.list_rules("p1").await.unwrap().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![b.id, a.id]);
    }
}
