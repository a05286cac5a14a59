//! SQLite store for bid history, message templates and policy settings

use crate::config::Policy;
use crate::currency::CurrencyConverter;
use crate::types::{
    prompt_hash, BidRecord, BidStatus, BidSummaryStats, PromptAnalytics, PromptStat,
    PromptTemplate,
};
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{Map, Value};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqliteConnection};
use std::collections::HashMap;
use std::str::FromStr;
use tracing::{info, warn};

/// Schema history, applied in order and recorded in `schema_migrations`
const MIGRATIONS: &[(i64, &str, &str)] = &[
    (
        1,
        "create bids",
        r#"
        CREATE TABLE IF NOT EXISTS bids (
            project_id INTEGER PRIMARY KEY,
            title TEXT NOT NULL DEFAULT '',
            bid_amount INTEGER NOT NULL DEFAULT 0,
            currency_code TEXT NOT NULL DEFAULT 'USD',
            status TEXT NOT NULL DEFAULT 'applied',
            bid_message TEXT NOT NULL DEFAULT '',
            prompt_id INTEGER,
            prompt_hash TEXT,
            outsource_cost TEXT,
            profit TEXT,
            reply_count INTEGER NOT NULL DEFAULT 0,
            applied_at TEXT
        )
        "#,
    ),
    (
        2,
        "create prompts",
        r#"
        CREATE TABLE IF NOT EXISTS prompts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            description TEXT,
            template TEXT NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT,
            stats_bids INTEGER NOT NULL DEFAULT 0,
            stats_replies INTEGER NOT NULL DEFAULT 0,
            stats_won INTEGER NOT NULL DEFAULT 0
        )
        "#,
    ),
    (
        3,
        "at most one active prompt",
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_prompts_single_active ON prompts(is_active) WHERE is_active = 1",
    ),
    (
        4,
        "create settings",
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    ),
    (
        5,
        "index bids by prompt hash",
        "CREATE INDEX IF NOT EXISTS idx_bids_prompt_hash ON bids(prompt_hash)",
    ),
];

/// Fields for a new template
#[derive(Debug, Clone, Deserialize)]
pub struct NewPrompt {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub template: String,
    #[serde(default)]
    pub is_active: bool,
}

/// Partial template update; `None` leaves a field unchanged
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PromptUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub template: Option<String>,
    pub is_active: Option<bool>,
}

/// A bid as reported by the marketplace, merged into local history by sync
#[derive(Debug, Clone)]
pub struct SyncedBid {
    pub project_id: i64,
    pub title: Option<String>,
    pub bid_amount: i64,
    pub currency_code: Option<String>,
    pub bid_message: String,
    pub reply_count: i64,
    pub applied_at: Option<DateTime<Utc>>,
}

/// Database connection pool
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Create a new database connection
    pub async fn new(path: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(path)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(10));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    /// Private in-memory database on a single long-lived connection
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .context("Failed to open in-memory database")?;

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    /// Apply pending migrations once, in version order
    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                applied_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        let applied: Vec<(i64,)> = sqlx::query_as("SELECT version FROM schema_migrations")
            .fetch_all(&self.pool)
            .await?;
        let applied: Vec<i64> = applied.into_iter().map(|(v,)| v).collect();

        for (version, name, sql) in MIGRATIONS {
            if applied.contains(version) {
                continue;
            }

            let mut tx = self.pool.begin().await?;
            sqlx::query(sql)
                .execute(&mut *tx)
                .await
                .with_context(|| format!("Migration {} ({}) failed", version, name))?;
            sqlx::query("INSERT INTO schema_migrations (version, name, applied_at) VALUES (?, ?, ?)")
                .bind(*version)
                .bind(*name)
                .bind(Utc::now().to_rfc3339())
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;

            info!("Applied migration {}: {}", version, name);
        }

        Ok(())
    }

    // ==================== BIDS ====================

    /// Insert or overwrite a bid record. A stored `won` status is kept.
    pub async fn upsert_bid_record(&self, record: &BidRecord) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        upsert_bid(&mut conn, record).await
    }

    /// Bump one usage counter on a template
    pub async fn increment_prompt_stats(&self, prompt_id: i64, stat: PromptStat) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        increment_stat(&mut conn, prompt_id, stat).await
    }

    /// Record a placed bid and count it against its template in one transaction
    pub async fn record_placed_bid(&self, record: &BidRecord) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        upsert_bid(&mut tx, record).await?;
        if let Some(prompt_id) = record.prompt_id {
            increment_stat(&mut tx, prompt_id, PromptStat::Bids).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn get_bid_status(&self, project_id: i64) -> Result<Option<BidStatus>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT status FROM bids WHERE project_id = ?")
            .bind(project_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(s,)| BidStatus::parse(&s)))
    }

    pub async fn get_bid(&self, project_id: i64) -> Result<Option<BidRecord>> {
        let row = sqlx::query(
            r#"
            SELECT b.*, p.name AS prompt_name
            FROM bids b LEFT JOIN prompts p ON b.prompt_id = p.id
            WHERE b.project_id = ?
            "#,
        )
        .bind(project_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| row_to_bid(&r)).transpose()
    }

    /// Newest first; `None` returns everything
    pub async fn list_bids(&self, limit: Option<i64>) -> Result<Vec<BidRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT b.*, p.name AS prompt_name
            FROM bids b LEFT JOIN prompts p ON b.prompt_id = p.id
            ORDER BY b.applied_at IS NULL, b.applied_at DESC, b.project_id DESC
            LIMIT ?
            "#,
        )
        .bind(limit.unwrap_or(-1))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_bid).collect()
    }

    /// Record the outsourcing cost of a won project.
    /// Sets profit = bid amount - cost and status = won; `None` when there is no such bid.
    pub async fn record_outsource_cost(
        &self,
        project_id: i64,
        cost: Decimal,
    ) -> Result<Option<BidRecord>> {
        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query("SELECT bid_amount, status, prompt_id FROM bids WHERE project_id = ?")
            .bind(project_id)
            .fetch_optional(&mut *tx)
            .await?;

        let Some(existing) = existing else {
            return Ok(None);
        };

        let bid_amount: i64 = existing.get("bid_amount");
        let previous = BidStatus::parse(&existing.get::<String, _>("status"));
        let prompt_id: Option<i64> = existing.get("prompt_id");
        let profit = Decimal::from(bid_amount) - cost;

        sqlx::query("UPDATE bids SET outsource_cost = ?, profit = ?, status = 'won' WHERE project_id = ?")
            .bind(cost.to_string())
            .bind(profit.to_string())
            .bind(project_id)
            .execute(&mut *tx)
            .await?;

        if previous != BidStatus::Won {
            if let Some(prompt_id) = prompt_id {
                increment_stat(&mut tx, prompt_id, PromptStat::Wins).await?;
            }
        }

        tx.commit().await?;
        self.get_bid(project_id).await
    }

    /// Merge a remotely reported bid: keeps `won`, the higher reply count, an
    /// existing non-USD currency and local prompt attribution.
    pub async fn upsert_synced_bid(&self, bid: &SyncedBid) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query("SELECT title, status, reply_count, currency_code FROM bids WHERE project_id = ?")
            .bind(bid.project_id)
            .fetch_optional(&mut *tx)
            .await?;

        let (old_title, old_status, old_replies, old_currency) = match &existing {
            Some(row) => (
                Some(row.get::<String, _>("title")).filter(|t| !t.is_empty()),
                BidStatus::parse(&row.get::<String, _>("status")),
                row.get::<i64, _>("reply_count"),
                Some(row.get::<String, _>("currency_code")),
            ),
            None => (None, BidStatus::Applied, 0, None),
        };

        let title = bid
            .title
            .clone()
            .filter(|t| !t.is_empty())
            .or(old_title)
            .unwrap_or_else(|| format!("Project {}", bid.project_id));

        let remote_currency = bid.currency_code.clone().map(|c| c.to_uppercase());
        let currency_code = match (remote_currency, old_currency) {
            (Some(remote), _) if remote != "USD" => remote,
            (_, Some(old)) if old != "USD" => old,
            (Some(remote), _) => remote,
            _ => "USD".to_string(),
        };

        let reply_count = bid.reply_count.max(old_replies);

        sqlx::query(
            r#"
            INSERT INTO bids (project_id, title, bid_amount, currency_code, status, bid_message, reply_count, applied_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(project_id) DO UPDATE SET
                title = excluded.title,
                bid_amount = excluded.bid_amount,
                currency_code = excluded.currency_code,
                status = excluded.status,
                bid_message = CASE WHEN excluded.bid_message = '' THEN bids.bid_message ELSE excluded.bid_message END,
                reply_count = excluded.reply_count,
                applied_at = COALESCE(excluded.applied_at, bids.applied_at)
            "#,
        )
        .bind(bid.project_id)
        .bind(title)
        .bind(bid.bid_amount)
        .bind(currency_code)
        .bind(old_status.as_str())
        .bind(&bid.bid_message)
        .bind(reply_count)
        .bind(bid.applied_at.map(|t| t.to_rfc3339()))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Totals across all bids; amounts converted to USD
    pub async fn bid_stats(&self, converter: &dyn CurrencyConverter) -> Result<BidSummaryStats> {
        let (total_bids, applied, won, replies): (i64, i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*),
                COALESCE(SUM(CASE WHEN status = 'applied' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN status = 'won' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN reply_count > 0 THEN 1 ELSE 0 END), 0)
            FROM bids
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let amounts: Vec<(i64, String, Option<String>)> =
            sqlx::query_as("SELECT bid_amount, currency_code, profit FROM bids")
                .fetch_all(&self.pool)
                .await?;

        let mut total_value = Decimal::ZERO;
        let mut total_profit = Decimal::ZERO;
        for (amount, currency, profit) in amounts {
            total_value += converter.to_usd(Decimal::from(amount), &currency);
            if let Some(profit) = profit.and_then(|p| Decimal::from_str(&p).ok()) {
                total_profit += converter.to_usd(profit, &currency);
            }
        }

        Ok(BidSummaryStats {
            total_bids,
            applied,
            won,
            replies,
            total_value: total_value.round_dp(2),
            total_profit: total_profit.round_dp(2),
        })
    }

    // ==================== PROMPTS ====================

    pub async fn get_active_prompt_template(&self) -> Result<Option<PromptTemplate>> {
        let row = sqlx::query("SELECT * FROM prompts WHERE is_active = 1 LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| row_to_prompt(&r)).transpose()
    }

    pub async fn list_prompt_templates(&self) -> Result<Vec<PromptTemplate>> {
        let rows = sqlx::query("SELECT * FROM prompts ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_prompt).collect()
    }

    pub async fn get_prompt(&self, id: i64) -> Result<Option<PromptTemplate>> {
        let row = sqlx::query("SELECT * FROM prompts WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| row_to_prompt(&r)).transpose()
    }

    /// Insert a template; activating it deactivates every other one
    pub async fn create_prompt(&self, prompt: &NewPrompt) -> Result<PromptTemplate> {
        let mut tx = self.pool.begin().await?;

        if prompt.is_active {
            sqlx::query("UPDATE prompts SET is_active = 0 WHERE is_active = 1")
                .execute(&mut *tx)
                .await?;
        }

        let result = sqlx::query(
            "INSERT INTO prompts (name, description, template, is_active, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&prompt.name)
        .bind(&prompt.description)
        .bind(&prompt.template)
        .bind(prompt.is_active)
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        let id = result.last_insert_rowid();
        self.get_prompt(id)
            .await?
            .context("Inserted prompt not found")
    }

    /// Apply a partial update; `None` when the template does not exist
    pub async fn update_prompt(&self, id: i64, update: &PromptUpdate) -> Result<Option<PromptTemplate>> {
        let mut tx = self.pool.begin().await?;

        let exists: Option<(i64,)> = sqlx::query_as("SELECT id FROM prompts WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Ok(None);
        }

        if update.is_active == Some(true) {
            sqlx::query("UPDATE prompts SET is_active = 0 WHERE is_active = 1 AND id != ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }

        sqlx::query(
            r#"
            UPDATE prompts SET
                name = COALESCE(?, name),
                description = COALESCE(?, description),
                template = COALESCE(?, template),
                is_active = COALESCE(?, is_active),
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&update.name)
        .bind(&update.description)
        .bind(&update.template)
        .bind(update.is_active)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        self.get_prompt(id).await
    }

    /// Make `id` the only active template; false when it does not exist
    pub async fn activate_prompt(&self, id: i64) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let exists: Option<(i64,)> = sqlx::query_as("SELECT id FROM prompts WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Ok(false);
        }

        sqlx::query("UPDATE prompts SET is_active = 0 WHERE is_active = 1")
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE prompts SET is_active = 1, updated_at = ? WHERE id = ?")
            .bind(Utc::now().to_rfc3339())
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }

    pub async fn delete_prompt(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM prompts WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Recompute every template's counters from the bids carrying its hash
    pub async fn sync_prompt_stats(&self) -> Result<()> {
        let prompts: Vec<(i64, String)> = sqlx::query_as("SELECT id, template FROM prompts")
            .fetch_all(&self.pool)
            .await?;

        let mut tx = self.pool.begin().await?;
        for (id, template) in prompts {
            let (bids, replies, won): (i64, i64, i64) = sqlx::query_as(
                r#"
                SELECT
                    COUNT(*),
                    COALESCE(SUM(CASE WHEN reply_count > 0 THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN status = 'won' THEN 1 ELSE 0 END), 0)
                FROM bids WHERE prompt_hash = ?
                "#,
            )
            .bind(prompt_hash(&template))
            .fetch_one(&mut *tx)
            .await?;

            sqlx::query("UPDATE prompts SET stats_bids = ?, stats_replies = ?, stats_won = ? WHERE id = ?")
                .bind(bids)
                .bind(replies)
                .bind(won)
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Performance per template hash, including templates that have no bids yet.
    /// Sorted by bid count, most used first.
    pub async fn prompt_analytics(&self) -> Result<Vec<PromptAnalytics>> {
        let prompts: Vec<(String, String, String)> =
            sqlx::query_as("SELECT name, template, created_at FROM prompts ORDER BY id")
                .fetch_all(&self.pool)
                .await?;

        let mut known: HashMap<String, (String, String)> = HashMap::new();
        for (name, template, created_at) in prompts {
            known.entry(prompt_hash(&template)).or_insert((name, created_at));
        }

        let rows = sqlx::query(
            r#"
            SELECT
                prompt_hash,
                COUNT(*) AS total_bids,
                COALESCE(SUM(CASE WHEN reply_count > 0 THEN 1 ELSE 0 END), 0) AS total_replies,
                COALESCE(SUM(CASE WHEN status = 'won' THEN 1 ELSE 0 END), 0) AS total_won,
                ROUND(AVG(CASE WHEN reply_count > 0 THEN 1.0 ELSE 0.0 END) * 100, 2) AS reply_rate,
                MIN(applied_at) AS first_used,
                MAX(applied_at) AS last_used
            FROM bids
            WHERE prompt_hash IS NOT NULL
            GROUP BY prompt_hash
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut analytics: Vec<PromptAnalytics> = rows
            .iter()
            .map(|row| {
                let hash: String = row.get("prompt_hash");
                PromptAnalytics {
                    prompt_name: known.get(&hash).map(|(name, _)| name.clone()),
                    prompt_hash: hash,
                    total_bids: row.get("total_bids"),
                    total_replies: row.get("total_replies"),
                    total_won: row.get("total_won"),
                    reply_rate: row.get::<Option<f64>, _>("reply_rate").unwrap_or(0.0),
                    first_used: parse_timestamp(row.get("first_used")),
                    last_used: parse_timestamp(row.get("last_used")),
                }
            })
            .collect();

        for (hash, (name, created_at)) in known {
            if analytics.iter().any(|a| a.prompt_hash == hash) {
                continue;
            }
            analytics.push(PromptAnalytics {
                prompt_hash: hash,
                prompt_name: Some(name),
                total_bids: 0,
                total_replies: 0,
                total_won: 0,
                reply_rate: 0.0,
                first_used: parse_timestamp(Some(created_at)),
                last_used: None,
            });
        }

        analytics.sort_by(|a, b| {
            b.total_bids
                .cmp(&a.total_bids)
                .then_with(|| a.prompt_name.cmp(&b.prompt_name))
        });

        Ok(analytics)
    }

    // ==================== POLICY ====================

    /// Read the bidding policy. Keys missing from storage are seeded from the
    /// environment or defaults and written back; unreadable stored values are
    /// logged and replaced by the seed.
    pub async fn load_policy(&self) -> Result<Policy> {
        let rows: Vec<(String, String)> = sqlx::query_as("SELECT key, value FROM settings")
            .fetch_all(&self.pool)
            .await?;
        let stored: HashMap<String, String> = rows.into_iter().collect();

        let seed = Policy::seeded_from_env();
        let mut policy = seed.clone();

        for key in Policy::KEYS {
            let Some(raw) = stored.get(key) else {
                continue;
            };
            let value: Value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.clone()));
            let mut overlay = Map::new();
            overlay.insert(key.to_string(), value);
            match policy.merged(&overlay) {
                Ok(updated) => policy = updated,
                Err(e) => warn!("Ignoring stored setting {}: {}", key, e),
            }
        }

        let missing: Vec<(String, Value)> = seed
            .to_settings()
            .into_iter()
            .filter(|(key, _)| !stored.contains_key(key))
            .collect();

        if !missing.is_empty() {
            let mut tx = self.pool.begin().await?;
            for (key, value) in &missing {
                sqlx::query("INSERT OR IGNORE INTO settings (key, value) VALUES (?, ?)")
                    .bind(key)
                    .bind(value.to_string())
                    .execute(&mut *tx)
                    .await?;
            }
            tx.commit().await?;
        }

        Ok(policy)
    }

    /// Validate and persist every policy key
    pub async fn save_policy(&self, policy: &Policy) -> Result<()> {
        policy.validate()?;

        let mut tx = self.pool.begin().await?;
        for (key, value) in policy.to_settings() {
            sqlx::query(
                "INSERT INTO settings (key, value) VALUES (?, ?) ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            )
            .bind(key)
            .bind(value.to_string())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

async fn upsert_bid(conn: &mut SqliteConnection, record: &BidRecord) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO bids (project_id, title, bid_amount, currency_code, status, bid_message, prompt_id, prompt_hash, applied_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(project_id) DO UPDATE SET
            title = excluded.title,
            bid_amount = excluded.bid_amount,
            currency_code = excluded.currency_code,
            status = CASE WHEN bids.status = 'won' THEN 'won' ELSE excluded.status END,
            bid_message = excluded.bid_message,
            prompt_id = excluded.prompt_id,
            prompt_hash = excluded.prompt_hash,
            applied_at = excluded.applied_at
        "#,
    )
    .bind(record.project_id)
    .bind(&record.title)
    .bind(record.bid_amount)
    .bind(&record.currency_code)
    .bind(record.status.as_str())
    .bind(&record.bid_message)
    .bind(record.prompt_id)
    .bind(&record.prompt_hash)
    .bind(record.applied_at.map(|t| t.to_rfc3339()))
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn increment_stat(conn: &mut SqliteConnection, prompt_id: i64, stat: PromptStat) -> Result<()> {
    let sql = format!(
        "UPDATE prompts SET {column} = {column} + 1 WHERE id = ?",
        column = stat.column()
    );
    sqlx::query(&sql).bind(prompt_id).execute(&mut *conn).await?;
    Ok(())
}

fn row_to_bid(row: &SqliteRow) -> Result<BidRecord> {
    let status: String = row.try_get("status")?;
    let outsource_cost: Option<String> = row.try_get("outsource_cost")?;
    let profit: Option<String> = row.try_get("profit")?;

    Ok(BidRecord {
        project_id: row.try_get("project_id")?,
        title: row.try_get("title")?,
        bid_amount: row.try_get("bid_amount")?,
        currency_code: row.try_get("currency_code")?,
        status: BidStatus::parse(&status),
        bid_message: row.try_get("bid_message")?,
        prompt_id: row.try_get("prompt_id")?,
        prompt_hash: row.try_get("prompt_hash")?,
        outsource_cost: outsource_cost.and_then(|s| Decimal::from_str(&s).ok()),
        profit: profit.and_then(|s| Decimal::from_str(&s).ok()),
        reply_count: row.try_get("reply_count")?,
        applied_at: parse_timestamp(row.try_get("applied_at")?),
        // Absent when the query skips the prompts join
        prompt_name: row.try_get("prompt_name").unwrap_or(None),
    })
}

fn row_to_prompt(row: &SqliteRow) -> Result<PromptTemplate> {
    let created_at: String = row.get("created_at");

    Ok(PromptTemplate {
        id: row.get("id"),
        name: row.get("name"),
        description: row.get("description"),
        template: row.get("template"),
        is_active: row.get("is_active"),
        created_at: parse_timestamp(Some(created_at)).context("Invalid prompt created_at")?,
        updated_at: parse_timestamp(row.get("updated_at")),
        stats_bids: row.get("stats_bids"),
        stats_replies: row.get("stats_replies"),
        stats_won: row.get("stats_won"),
    })
}

/// RFC 3339, or SQLite's `YYYY-MM-DD HH:MM:SS` taken as UTC
fn parse_timestamp(raw: Option<String>) -> Option<DateTime<Utc>> {
    let raw = raw?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|d| d.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(&raw, "%Y-%m-%d %H:%M:%S")
                .ok()
                .map(|naive| naive.and_utc())
        })
}
