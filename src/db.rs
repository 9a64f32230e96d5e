// 🗄️ Repository - Persisted card records
//
// Layout: one `entities` row per card, `category_rewards` child rows and an
// optional `signup_bonuses` child row, both keyed by entity id. Foreign keys
// are enforced and nothing cascades: children must go before their parent.
// Every write leaves an event in the `events` audit table.

use crate::deduplication::{RemovalDirective, RemovalStep};
use crate::entities::{
    AnnualFee, CategoryReward, EntityRecord, LimitPeriod, RewardCurrency, RewardRate, RewardUnit,
    SignupBonus, SpendCategory, SpendLimit,
};
use crate::error::Result;
use crate::scoring::RewardLookup;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::{debug, warn};

const ENTITY_TYPE: &str = "card";
const DEFAULT_ACTOR: &str = "card-recon";

// ============================================================================
// REPOSITORY TRAIT
// ============================================================================

pub trait Repository {
    fn find_by_storage_key(&self, storage_key: &str) -> Result<Option<EntityRecord>>;

    /// Insert or update by storage key, replacing the record's children.
    /// Returns the entity id.
    fn upsert(&mut self, record: &EntityRecord) -> Result<String>;

    fn delete_category_rewards(&mut self, entity_id: &str) -> Result<usize>;

    fn delete_signup_bonus(&mut self, entity_id: &str) -> Result<usize>;

    /// Delete the entity row itself. Fails while children still reference it.
    fn delete(&mut self, entity_id: &str) -> Result<bool>;

    /// Every persisted record, oldest first
    fn all_entities(&self) -> Result<Vec<EntityRecord>>;

    fn category_reward_count(&self, entity_id: &str) -> Result<usize>;

    /// Apply a removal directive: children, then parent.
    /// Returns false when the loser was never persisted.
    fn apply_removal(&mut self, directive: &RemovalDirective) -> Result<bool> {
        let entity_id = match &directive.entity_id {
            Some(id) => Some(id.clone()),
            None => self
                .find_by_storage_key(&directive.storage_key)?
                .and_then(|record| record.entity_id),
        };
        let Some(entity_id) = entity_id else {
            return Ok(false);
        };

        let mut removed = false;
        for step in directive.steps() {
            match step {
                RemovalStep::CategoryRewards => {
                    self.delete_category_rewards(&entity_id)?;
                }
                RemovalStep::SignupBonus => {
                    self.delete_signup_bonus(&entity_id)?;
                }
                RemovalStep::Entity => removed = self.delete(&entity_id)?,
            }
        }
        Ok(removed)
    }
}

/// Reward counts from the repository's child rows; records that were never
/// persisted fall back to their in-memory rewards
pub struct RepositoryRewards<'a, R: Repository + ?Sized>(pub &'a R);

impl<R: Repository + ?Sized> RewardLookup for RepositoryRewards<'_, R> {
    fn reward_count(&self, record: &EntityRecord) -> usize {
        let Some(entity_id) = &record.entity_id else {
            return record.category_rewards.len();
        };
        match self.0.category_reward_count(entity_id) {
            Ok(count) => count,
            Err(e) => {
                warn!(target: "repository", entity_id = %entity_id, error = %e, "reward count lookup failed");
                record.category_rewards.len()
            }
        }
    }
}

// ============================================================================
// EVENTS
// ============================================================================

/// Audit trail entry
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Event {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl Event {
    pub fn new(event_type: &str, entity_id: &str, data: serde_json::Value, actor: &str) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            entity_type: ENTITY_TYPE.to_string(),
            entity_id: entity_id.to_string(),
            data,
            actor: actor.to_string(),
        }
    }
}

pub fn insert_event(conn: &Connection, event: &Event) -> Result<()> {
    let data_json = serde_json::to_string(&event.data)?;

    conn.execute(
        "INSERT INTO events (
            event_id, timestamp, event_type, entity_type, entity_id, data, actor
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.event_id,
            event.timestamp.to_rfc3339(),
            event.event_type,
            event.entity_type,
            event.entity_id,
            data_json,
            event.actor,
        ],
    )?;

    Ok(())
}

pub fn get_events_for_entity(conn: &Connection, entity_id: &str) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, timestamp, event_type, entity_type, entity_id, data, actor
         FROM events
         WHERE entity_type = ?1 AND entity_id = ?2
         ORDER BY id ASC",
    )?;

    let events = stmt
        .query_map(params![ENTITY_TYPE, entity_id], |row| {
            let timestamp_str: String = row.get(1)?;
            let data_json: String = row.get(5)?;

            Ok(Event {
                event_id: row.get(0)?,
                timestamp: parse_timestamp(&timestamp_str, 1)?,
                event_type: row.get(2)?,
                entity_type: row.get(3)?,
                entity_id: row.get(4)?,
                data: serde_json::from_str(&data_json)
                    .map_err(|e| conversion_error(5, e.to_string()))?,
                actor: row.get(6)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(events)
}

// ============================================================================
// SCHEMA
// ============================================================================

pub fn setup_database(conn: &Connection) -> Result<()> {
    // WAL for crash recovery; in-memory databases answer "memory"
    conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
    conn.pragma_update(None, "foreign_keys", true)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS entities (
            id TEXT PRIMARY KEY,
            storage_key TEXT UNIQUE NOT NULL,
            identity_key TEXT NOT NULL,
            display_name TEXT NOT NULL,
            issuer TEXT NOT NULL,
            program_name TEXT NOT NULL,
            reward_currency TEXT NOT NULL,
            point_valuation REAL NOT NULL,
            annual_fee REAL,
            base_reward_rate REAL,
            base_reward_unit TEXT,
            sources TEXT NOT NULL,
            confidence REAL NOT NULL,
            last_verified_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS category_rewards (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            entity_id TEXT NOT NULL REFERENCES entities(id),
            category TEXT NOT NULL,
            multiplier REAL NOT NULL,
            reward_unit TEXT NOT NULL,
            description TEXT NOT NULL,
            spend_limit REAL,
            spend_limit_period TEXT,
            UNIQUE(entity_id, category)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS signup_bonuses (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            entity_id TEXT UNIQUE NOT NULL REFERENCES entities(id),
            bonus_amount REAL NOT NULL,
            bonus_currency TEXT NOT NULL,
            spend_requirement REAL NOT NULL,
            timeframe_days INTEGER NOT NULL,
            valid_until TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            data TEXT NOT NULL,
            actor TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_entities_identity ON entities(identity_key)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_rewards_entity ON category_rewards(entity_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id)",
        [],
    )?;

    Ok(())
}

// ============================================================================
// ROW CONVERSION
// ============================================================================

const ENTITY_COLUMNS: &str = "id, storage_key, identity_key, display_name, issuer, program_name,
    reward_currency, point_valuation, annual_fee, base_reward_rate, base_reward_unit,
    sources, confidence, last_verified_at";

fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, message.into())
}

fn parse_timestamp(s: &str, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e.to_string()))
}

fn entity_from_row(row: &Row) -> rusqlite::Result<EntityRecord> {
    let currency_text: String = row.get(6)?;
    let reward_currency = RewardCurrency::parse(&currency_text)
        .ok_or_else(|| conversion_error(6, format!("unknown reward currency '{}'", currency_text)))?;

    let fee: Option<f64> = row.get(8)?;
    let rate: Option<f64> = row.get(9)?;
    let unit: Option<String> = row.get(10)?;
    let base_reward = match (rate, unit) {
        (Some(rate), Some(unit)) => {
            let unit = RewardUnit::parse(&unit)
                .ok_or_else(|| conversion_error(10, format!("unknown reward unit '{}'", unit)))?;
            Some(RewardRate::new(rate, unit))
        }
        _ => None,
    };

    let sources_json: String = row.get(11)?;
    let sources: BTreeSet<String> =
        serde_json::from_str(&sources_json).map_err(|e| conversion_error(11, e.to_string()))?;

    let verified: Option<String> = row.get(13)?;
    let last_verified_at = verified.map(|s| parse_timestamp(&s, 13)).transpose()?;

    Ok(EntityRecord {
        entity_id: Some(row.get(0)?),
        storage_key: row.get(1)?,
        identity_key: row.get(2)?,
        display_name: row.get(3)?,
        issuer: row.get(4)?,
        program_name: row.get(5)?,
        reward_currency,
        point_valuation: row.get(7)?,
        annual_fee: AnnualFee::from_amount(fee),
        base_reward,
        category_rewards: BTreeMap::new(),
        signup_bonus: None,
        sources,
        confidence: row.get(12)?,
        last_verified_at,
        discovery_seq: 0,
    })
}

fn load_children(conn: &Connection, record: &mut EntityRecord) -> Result<()> {
    let Some(entity_id) = record.entity_id.clone() else {
        return Ok(());
    };

    let mut stmt = conn.prepare(
        "SELECT category, multiplier, reward_unit, description, spend_limit, spend_limit_period
         FROM category_rewards WHERE entity_id = ?1 ORDER BY id",
    )?;
    let rewards = stmt
        .query_map(params![entity_id], |row| {
            let category_text: String = row.get(0)?;
            let unit_text: String = row.get(2)?;
            let limit: Option<f64> = row.get(4)?;
            let period: Option<String> = row.get(5)?;

            Ok(CategoryReward {
                category: SpendCategory::parse(&category_text).unwrap_or(SpendCategory::Other),
                multiplier: row.get(1)?,
                unit: RewardUnit::parse(&unit_text)
                    .ok_or_else(|| conversion_error(2, format!("unknown reward unit '{}'", unit_text)))?,
                description: row.get(3)?,
                spend_limit: match (limit, period.as_deref().and_then(LimitPeriod::parse)) {
                    (Some(amount), Some(period)) => Some(SpendLimit { amount, period }),
                    _ => None,
                },
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    for reward in rewards {
        record.add_category_reward(reward);
    }

    record.signup_bonus = conn
        .query_row(
            "SELECT bonus_amount, bonus_currency, spend_requirement, timeframe_days, valid_until
             FROM signup_bonuses WHERE entity_id = ?1",
            params![entity_id],
            |row| {
                let currency_text: String = row.get(1)?;
                let valid_until: Option<String> = row.get(4)?;
                Ok(SignupBonus {
                    amount: row.get(0)?,
                    currency: RewardCurrency::parse(&currency_text).unwrap_or(RewardCurrency::Points),
                    spend_requirement: row.get(2)?,
                    timeframe_days: row.get(3)?,
                    expires_on: valid_until.and_then(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok()),
                })
            },
        )
        .optional()?;

    Ok(())
}

// ============================================================================
// WRITES
// ============================================================================

/// Upsert the entity row. Child rows are replaced only when the record
/// carries some; an empty set leaves the stored ones alone. Caller owns the
/// transaction.
fn write_entity(conn: &Connection, record: &EntityRecord) -> Result<String> {
    let now = Utc::now().to_rfc3339();

    let mut existing: Option<String> = conn
        .query_row(
            "SELECT id FROM entities WHERE storage_key = ?1",
            params![record.storage_key],
            |row| row.get(0),
        )
        .optional()?;
    if existing.is_none() {
        if let Some(id) = &record.entity_id {
            existing = conn
                .query_row("SELECT id FROM entities WHERE id = ?1", params![id], |row| row.get(0))
                .optional()?;
        }
    }

    let sources_json = serde_json::to_string(&record.sources)?;
    let rate = record.base_reward.map(|r| r.rate);
    let unit = record.base_reward.map(|r| r.unit.as_str());
    let verified = record.last_verified_at.map(|t| t.to_rfc3339());

    let entity_id = match existing {
        Some(id) => {
            conn.execute(
                "UPDATE entities SET
                    storage_key = ?2, identity_key = ?3, display_name = ?4, issuer = ?5,
                    program_name = ?6, reward_currency = ?7, point_valuation = ?8,
                    annual_fee = ?9, base_reward_rate = ?10, base_reward_unit = ?11,
                    sources = ?12, confidence = ?13, last_verified_at = ?14, updated_at = ?15
                 WHERE id = ?1",
                params![
                    id,
                    record.storage_key,
                    record.identity_key,
                    record.display_name,
                    record.issuer,
                    record.program_name,
                    record.reward_currency.as_str(),
                    record.point_valuation,
                    record.annual_fee.amount(),
                    rate,
                    unit,
                    sources_json,
                    record.confidence,
                    verified,
                    now,
                ],
            )?;
            id
        }
        None => {
            let id = record
                .entity_id
                .clone()
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            conn.execute(
                "INSERT INTO entities (
                    id, storage_key, identity_key, display_name, issuer, program_name,
                    reward_currency, point_valuation, annual_fee, base_reward_rate,
                    base_reward_unit, sources, confidence, last_verified_at, created_at, updated_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?15)",
                params![
                    id,
                    record.storage_key,
                    record.identity_key,
                    record.display_name,
                    record.issuer,
                    record.program_name,
                    record.reward_currency.as_str(),
                    record.point_valuation,
                    record.annual_fee.amount(),
                    rate,
                    unit,
                    sources_json,
                    record.confidence,
                    verified,
                    now,
                ],
            )?;
            id
        }
    };

    if !record.category_rewards.is_empty() {
        conn.execute("DELETE FROM category_rewards WHERE entity_id = ?1", params![entity_id])?;
    }
    for reward in record.category_rewards.values() {
        conn.execute(
            "INSERT INTO category_rewards (
                entity_id, category, multiplier, reward_unit, description, spend_limit, spend_limit_period
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                entity_id,
                reward.category.as_str(),
                reward.multiplier,
                reward.unit.as_str(),
                reward.description,
                reward.spend_limit.map(|l| l.amount),
                reward.spend_limit.map(|l| l.period.as_str()),
            ],
        )?;
    }

    if let Some(bonus) = &record.signup_bonus {
        conn.execute("DELETE FROM signup_bonuses WHERE entity_id = ?1", params![entity_id])?;
        conn.execute(
            "INSERT INTO signup_bonuses (
                entity_id, bonus_amount, bonus_currency, spend_requirement, timeframe_days, valid_until
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                entity_id,
                bonus.amount,
                bonus.currency.as_str(),
                bonus.spend_requirement,
                bonus.timeframe_days,
                bonus.expires_on.map(|d| d.format("%Y-%m-%d").to_string()),
            ],
        )?;
    }

    Ok(entity_id)
}

// ============================================================================
// SQLITE REPOSITORY
// ============================================================================

pub struct SqliteRepository {
    conn: Connection,
    actor: String,
}

impl SqliteRepository {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    pub fn from_connection(conn: Connection) -> Result<Self> {
        setup_database(&conn)?;
        Ok(SqliteRepository {
            conn,
            actor: DEFAULT_ACTOR.to_string(),
        })
    }

    /// Builder pattern: name recorded on audit events
    pub fn with_actor(mut self, actor: &str) -> Self {
        self.actor = actor.to_string();
        self
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn count(&self) -> Result<usize> {
        let count: i64 = self.conn.query_row("SELECT COUNT(*) FROM entities", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn events_for_entity(&self, entity_id: &str) -> Result<Vec<Event>> {
        get_events_for_entity(&self.conn, entity_id)
    }
}

impl Repository for SqliteRepository {
    fn find_by_storage_key(&self, storage_key: &str) -> Result<Option<EntityRecord>> {
        let sql = format!("SELECT {} FROM entities WHERE storage_key = ?1", ENTITY_COLUMNS);
        let record = self
            .conn
            .query_row(&sql, params![storage_key], entity_from_row)
            .optional()?;

        match record {
            Some(mut record) => {
                load_children(&self.conn, &mut record)?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    fn upsert(&mut self, record: &EntityRecord) -> Result<String> {
        let tx = self.conn.transaction()?;
        let entity_id = write_entity(&tx, record)?;
        insert_event(
            &tx,
            &Event::new(
                "entity_upserted",
                &entity_id,
                serde_json::json!({
                    "storage_key": record.storage_key,
                    "confidence": record.confidence,
                    "sources": record.sources,
                }),
                &self.actor,
            ),
        )?;
        tx.commit()?;

        debug!(target: "repository", entity_id = %entity_id, storage_key = %record.storage_key, "upserted");
        Ok(entity_id)
    }

    fn delete_category_rewards(&mut self, entity_id: &str) -> Result<usize> {
        Ok(self
            .conn
            .execute("DELETE FROM category_rewards WHERE entity_id = ?1", params![entity_id])?)
    }

    fn delete_signup_bonus(&mut self, entity_id: &str) -> Result<usize> {
        Ok(self
            .conn
            .execute("DELETE FROM signup_bonuses WHERE entity_id = ?1", params![entity_id])?)
    }

    fn delete(&mut self, entity_id: &str) -> Result<bool> {
        let deleted = self
            .conn
            .execute("DELETE FROM entities WHERE id = ?1", params![entity_id])?;
        Ok(deleted > 0)
    }

    fn all_entities(&self) -> Result<Vec<EntityRecord>> {
        let sql = format!(
            "SELECT {} FROM entities ORDER BY rowid ASC",
            ENTITY_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut records = stmt
            .query_map([], entity_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        for (seq, record) in records.iter_mut().enumerate() {
            record.discovery_seq = seq as u64;
            load_children(&self.conn, record)?;
        }
        Ok(records)
    }

    fn category_reward_count(&self, entity_id: &str) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM category_rewards WHERE entity_id = ?1",
            params![entity_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// All three deletes and the audit event in one transaction
    fn apply_removal(&mut self, directive: &RemovalDirective) -> Result<bool> {
        let tx = self.conn.transaction()?;

        let entity_id: Option<String> = match &directive.entity_id {
            Some(id) => tx
                .query_row("SELECT id FROM entities WHERE id = ?1", params![id], |row| row.get(0))
                .optional()?,
            None => tx
                .query_row(
                    "SELECT id FROM entities WHERE storage_key = ?1",
                    params![directive.storage_key],
                    |row| row.get(0),
                )
                .optional()?,
        };
        let Some(entity_id) = entity_id else {
            return Ok(false);
        };

        for step in directive.steps() {
            let sql = match step {
                RemovalStep::CategoryRewards => "DELETE FROM category_rewards WHERE entity_id = ?1",
                RemovalStep::SignupBonus => "DELETE FROM signup_bonuses WHERE entity_id = ?1",
                RemovalStep::Entity => "DELETE FROM entities WHERE id = ?1",
            };
            tx.execute(sql, params![entity_id])?;
        }

        insert_event(
            &tx,
            &Event::new(
                "entity_superseded",
                &entity_id,
                serde_json::to_value(directive)?,
                &self.actor,
            ),
        )?;
        tx.commit()?;

        debug!(target: "repository", entity_id = %entity_id, "{}", directive.reason());
        Ok(true)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::normalize;

    fn create_test_record(name: &str) -> EntityRecord {
        let mut record = EntityRecord::new(normalize(name, "TD"), name, "TD");
        record.annual_fee = AnnualFee::Known(139.0);
        record.base_reward = Some(RewardRate::new(1.0, RewardUnit::Percent));
        record.program_name = "Aeroplan".to_string();
        record.reward_currency = RewardCurrency::AirlineMiles;
        record.point_valuation = 1.8;
        record.confidence = 0.9;
        record.sources.insert("x".to_string());
        record.sources.insert("y".to_string());
        record.add_category_reward(
            CategoryReward::new(SpendCategory::Travel, 1.5, RewardUnit::Multiplier)
                .unwrap()
                .with_spend_limit(5000.0, LimitPeriod::Annual),
        );
        record.signup_bonus = Some(SignupBonus {
            amount: 20000.0,
            currency: RewardCurrency::AirlineMiles,
            spend_requirement: 1000.0,
            timeframe_days: 90,
            expires_on: NaiveDate::from_ymd_opt(2025, 6, 30),
        });
        record
    }

    fn create_test_directive(storage_key: &str) -> RemovalDirective {
        RemovalDirective {
            identity_key: "loser".to_string(),
            storage_key: storage_key.to_string(),
            display_name: "Loser".to_string(),
            entity_id: None,
            score: 10,
            survivor_identity_key: "winner".to_string(),
            survivor_storage_key: "winner".to_string(),
            survivor_score: 180,
        }
    }

    #[test]
    fn test_upsert_then_find() {
        let mut repo = SqliteRepository::open_in_memory().unwrap();
        let record = create_test_record("TD Aeroplan Visa Infinite");

        let id = repo.upsert(&record).unwrap();
        let loaded = repo.find_by_storage_key("td-aeroplan-visa-infinite").unwrap().unwrap();

        assert_eq!(loaded.entity_id.as_deref(), Some(id.as_str()));
        assert_eq!(loaded.annual_fee, AnnualFee::Known(139.0));
        assert_eq!(loaded.sources, record.sources);
        assert_eq!(loaded.category_rewards, record.category_rewards);
        assert_eq!(loaded.signup_bonus, record.signup_bonus);
        assert_eq!(loaded.reward_currency, RewardCurrency::AirlineMiles);
    }

    #[test]
    fn test_unknown_fee_persists_as_unknown() {
        let mut repo = SqliteRepository::open_in_memory().unwrap();
        let mut record = create_test_record("TD Aeroplan Visa Infinite");
        record.annual_fee = AnnualFee::Unknown;
        record.base_reward = None;

        repo.upsert(&record).unwrap();
        let loaded = repo.find_by_storage_key(&record.storage_key).unwrap().unwrap();
        assert_eq!(loaded.annual_fee, AnnualFee::Unknown);
        assert!(loaded.base_reward.is_none());
    }

    #[test]
    fn test_upsert_same_key_updates_and_replaces_children() {
        let mut repo = SqliteRepository::open_in_memory().unwrap();
        let mut record = create_test_record("TD Aeroplan Visa Infinite");
        let first_id = repo.upsert(&record).unwrap();

        record.category_rewards.clear();
        record.add_category_reward(CategoryReward::new(SpendCategory::Dining, 2.0, RewardUnit::Multiplier).unwrap());
        record.add_category_reward(CategoryReward::new(SpendCategory::Gas, 2.0, RewardUnit::Multiplier).unwrap());
        if let Some(bonus) = record.signup_bonus.as_mut() {
            bonus.amount = 30000.0;
        }
        let second_id = repo.upsert(&record).unwrap();

        assert_eq!(first_id, second_id);
        assert_eq!(repo.count().unwrap(), 1);
        assert_eq!(repo.category_reward_count(&first_id).unwrap(), 2);
        let loaded = repo.find_by_storage_key(&record.storage_key).unwrap().unwrap();
        assert!(!loaded.category_rewards.contains_key(&SpendCategory::Travel));
        assert_eq!(loaded.signup_bonus.map(|b| b.amount), Some(30000.0));
    }

    #[test]
    fn test_upsert_without_children_keeps_stored_ones() {
        let mut repo = SqliteRepository::open_in_memory().unwrap();
        let full = create_test_record("TD Aeroplan Visa Infinite");
        let id = repo.upsert(&full).unwrap();

        let mut bare = create_test_record("TD Aeroplan Visa Infinite");
        bare.category_rewards.clear();
        bare.signup_bonus = None;
        bare.annual_fee = AnnualFee::Known(150.0);
        assert_eq!(repo.upsert(&bare).unwrap(), id);

        let loaded = repo.find_by_storage_key(&full.storage_key).unwrap().unwrap();
        assert_eq!(loaded.annual_fee, AnnualFee::Known(150.0));
        assert_eq!(loaded.category_rewards, full.category_rewards);
        assert_eq!(loaded.signup_bonus, full.signup_bonus);
    }

    #[test]
    fn test_parent_cannot_go_before_children() {
        let mut repo = SqliteRepository::open_in_memory().unwrap();
        let id = repo.upsert(&create_test_record("TD Aeroplan Visa Infinite")).unwrap();

        assert!(repo.delete(&id).is_err());

        repo.delete_category_rewards(&id).unwrap();
        repo.delete_signup_bonus(&id).unwrap();
        assert!(repo.delete(&id).unwrap());
        assert_eq!(repo.count().unwrap(), 0);
    }

    #[test]
    fn test_apply_removal_cascades_in_order() {
        let mut repo = SqliteRepository::open_in_memory().unwrap();
        let id = repo.upsert(&create_test_record("Best TD Aeroplan Card")).unwrap();

        let removed = repo.apply_removal(&create_test_directive("td-best-td-aeroplan-card")).unwrap();
        assert!(removed);
        assert_eq!(repo.count().unwrap(), 0);
        assert_eq!(repo.category_reward_count(&id).unwrap(), 0);

        let events = repo.events_for_entity(&id).unwrap();
        let types: Vec<&str> = events.iter().map(|e| e.event_type.as_str()).collect();
        assert_eq!(types, vec!["entity_upserted", "entity_superseded"]);
    }

    #[test]
    fn test_apply_removal_of_unpersisted_loser() {
        let mut repo = SqliteRepository::open_in_memory().unwrap();
        assert!(!repo.apply_removal(&create_test_directive("never-stored")).unwrap());
    }

    #[test]
    fn test_all_entities_in_insertion_order() {
        let mut repo = SqliteRepository::open_in_memory().unwrap();
        repo.upsert(&create_test_record("TD Aeroplan Visa Infinite")).unwrap();
        repo.upsert(&create_test_record("TD First Class Travel Visa Infinite")).unwrap();

        let records = repo.all_entities().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].storage_key, "td-aeroplan-visa-infinite");
        assert_eq!(records[1].discovery_seq, 1);
        assert_eq!(records[1].category_rewards.len(), 1);
    }

    #[test]
    fn test_repository_reward_lookup() {
        let mut repo = SqliteRepository::open_in_memory().unwrap();
        let mut record = create_test_record("TD Aeroplan Visa Infinite");
        let id = repo.upsert(&record).unwrap();

        // Persisted count wins over the in-memory rewards
        record.entity_id = Some(id);
        record.category_rewards.clear();
        assert_eq!(RepositoryRewards(&repo).reward_count(&record), 1);

        let unsaved = create_test_record("TD Cash Back Visa");
        assert_eq!(RepositoryRewards(&repo).reward_count(&unsaved), 1);
    }
}
