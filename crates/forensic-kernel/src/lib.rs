use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Config key holding the model id used for generation.
pub const KEY_LATEST_MODEL: &str = "latest_model";
/// Config key holding the most recently submitted fine-tune job.
pub const KEY_LATEST_MODEL_JOB: &str = "latest_model_job";

const DB_FILE: &str = "forensic-reports.sqlite";

/// Store handle. Cheap to clone; every operation opens its own connection
/// and drops it before returning.
#[derive(Clone)]
pub struct Kernel {
    db_path: PathBuf,
    busy_timeout: Duration,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConfigRecord {
    pub key: String,
    pub model_id: Option<String>,
    pub job_id: Option<String>,
    pub triggered_at: Option<String>,
    pub timestamp: Option<String>,
}

/// A rating as submitted, before it is given an id.
#[derive(Debug, Clone)]
pub struct NewFeedback {
    pub section_id: String,
    pub rating: i64,
    pub feedback_text: String,
    pub generated_content: String,
    pub original_prompt: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackEntry {
    pub id: String,
    pub section_id: String,
    pub rating: i64,
    pub feedback_text: String,
    pub generated_content: String,
    pub original_prompt: serde_json::Value,
    pub timestamp: String,
    pub messages: Vec<ChatMessage>,
}

/// Canonical timestamp encoding. Fixed width, so lexical order is chronological.
pub fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

impl Kernel {
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create state dir {}", dir.display()))?;
        let db_path = dir.join(DB_FILE);
        let conn = Connection::open(&db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        // Busy timeout (default 5000ms; override with FORENSIC_SQLITE_BUSY_MS)
        let busy_ms: u64 = std::env::var("FORENSIC_SQLITE_BUSY_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(5000);
        let busy_timeout = Duration::from_millis(busy_ms);
        conn.busy_timeout(busy_timeout)?;
        Self::init_schema(&conn)?;
        Ok(Self {
            db_path,
            busy_timeout,
        })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            -- Config: one row per key, updated in place
            CREATE TABLE IF NOT EXISTS config (
              key TEXT PRIMARY KEY,
              model_id TEXT,
              job_id TEXT,
              triggered_at TEXT,
              timestamp TEXT
            );

            -- Feedback log: append-only
            CREATE TABLE IF NOT EXISTS feedback (
              id TEXT PRIMARY KEY,
              section_id TEXT NOT NULL,
              rating INTEGER NOT NULL,
              feedback_text TEXT NOT NULL,
              generated_content TEXT NOT NULL,
              original_prompt TEXT NOT NULL,
              timestamp TEXT NOT NULL,
              messages TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_feedback_time ON feedback(timestamp);
            CREATE INDEX IF NOT EXISTS idx_feedback_section ON feedback(section_id);

            -- Trainable subset: denormalized copies of highly rated feedback rows
            CREATE TABLE IF NOT EXISTS high_quality_examples (
              feedback_id TEXT PRIMARY KEY,
              section_id TEXT NOT NULL,
              rating INTEGER NOT NULL,
              feedback_text TEXT NOT NULL,
              generated_content TEXT NOT NULL,
              original_prompt TEXT NOT NULL,
              timestamp TEXT NOT NULL,
              messages TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_hq_time ON high_quality_examples(timestamp);
            CREATE INDEX IF NOT EXISTS idx_hq_section ON high_quality_examples(section_id);

            -- Fine-tune claims: at most one submission per epoch
            CREATE TABLE IF NOT EXISTS finetune_claims (
              epoch INTEGER PRIMARY KEY,
              claimed_at TEXT NOT NULL,
              reason TEXT
            );
            "#,
        )?;
        Ok(())
    }

    fn conn(&self) -> Result<Connection> {
        let conn = Connection::open(&self.db_path)
            .with_context(|| format!("failed to open {}", self.db_path.display()))?;
        conn.busy_timeout(self.busy_timeout)?;
        Ok(conn)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    // ---------- Feedback ----------

    /// Appends a feedback row and, when `high_quality` is set, its trainable copy.
    /// Both writes share one transaction.
    pub fn insert_feedback(&self, new: &NewFeedback, high_quality: bool) -> Result<FeedbackEntry> {
        let mut conn = self.conn()?;
        let entry = FeedbackEntry {
            id: uuid::Uuid::new_v4().to_string(),
            section_id: new.section_id.clone(),
            rating: new.rating,
            feedback_text: new.feedback_text.clone(),
            generated_content: new.generated_content.clone(),
            original_prompt: new.original_prompt.clone(),
            timestamp: format_ts(new.timestamp),
            messages: new.messages.clone(),
        };
        let prompt_s = serde_json::to_string(&entry.original_prompt)?;
        let messages_s = serde_json::to_string(&entry.messages)?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO feedback(id,section_id,rating,feedback_text,generated_content,original_prompt,timestamp,messages) VALUES(?,?,?,?,?,?,?,?)",
            params![
                entry.id,
                entry.section_id,
                entry.rating,
                entry.feedback_text,
                entry.generated_content,
                prompt_s,
                entry.timestamp,
                messages_s
            ],
        )?;
        if high_quality {
            tx.execute(
                "INSERT INTO high_quality_examples(feedback_id,section_id,rating,feedback_text,generated_content,original_prompt,timestamp,messages) VALUES(?,?,?,?,?,?,?,?)",
                params![
                    entry.id,
                    entry.section_id,
                    entry.rating,
                    entry.feedback_text,
                    entry.generated_content,
                    prompt_s,
                    entry.timestamp,
                    messages_s
                ],
            )?;
        }
        tx.commit()?;
        Ok(entry)
    }

    pub fn get_feedback(&self, id: &str) -> Result<Option<FeedbackEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id,section_id,rating,feedback_text,generated_content,original_prompt,timestamp,messages FROM feedback WHERE id=? LIMIT 1",
        )?;
        let row = stmt.query_row([id], feedback_from_row).optional()?;
        Ok(row)
    }

    pub fn count_feedback(&self) -> Result<i64> {
        let conn = self.conn()?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM feedback", [], |r| r.get(0))?;
        Ok(n)
    }

    pub fn get_high_quality(&self, feedback_id: &str) -> Result<Option<FeedbackEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT feedback_id,section_id,rating,feedback_text,generated_content,original_prompt,timestamp,messages FROM high_quality_examples WHERE feedback_id=? LIMIT 1",
        )?;
        let row = stmt.query_row([feedback_id], feedback_from_row).optional()?;
        Ok(row)
    }

    pub fn count_high_quality_since(&self, since: DateTime<Utc>) -> Result<i64> {
        let conn = self.conn()?;
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM high_quality_examples WHERE timestamp >= ?",
            [format_ts(since)],
            |r| r.get(0),
        )?;
        Ok(n)
    }

    /// Trainable examples written at or after `since`, oldest first.
    pub fn list_high_quality_since(&self, since: DateTime<Utc>) -> Result<Vec<FeedbackEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT feedback_id,section_id,rating,feedback_text,generated_content,original_prompt,timestamp,messages FROM high_quality_examples WHERE timestamp >= ? ORDER BY timestamp ASC",
        )?;
        let rows = stmt.query_map([format_ts(since)], feedback_from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Most recent trainable examples for one section, newest first.
    pub fn recent_high_quality_for_section(
        &self,
        section_id: &str,
        limit: i64,
    ) -> Result<Vec<FeedbackEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT feedback_id,section_id,rating,feedback_text,generated_content,original_prompt,timestamp,messages FROM high_quality_examples WHERE section_id=? ORDER BY timestamp DESC LIMIT ?",
        )?;
        let rows = stmt.query_map(params![section_id, limit], feedback_from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    // ---------- Config ----------

    pub fn get_config(&self, key: &str) -> Result<Option<ConfigRecord>> {
        let conn = self.conn()?;
        read_config(&conn, key)
    }

    pub fn set_latest_model(&self, model_id: &str, at: DateTime<Utc>) -> Result<ConfigRecord> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO config(key,model_id,timestamp) VALUES(?,?,?)
             ON CONFLICT(key) DO UPDATE SET model_id=excluded.model_id, timestamp=excluded.timestamp",
            params![KEY_LATEST_MODEL, model_id, format_ts(at)],
        )?;
        read_config(&conn, KEY_LATEST_MODEL)?
            .ok_or_else(|| anyhow!("config row {} missing after upsert", KEY_LATEST_MODEL))
    }

    pub fn record_finetune_job(&self, job_id: &str, at: DateTime<Utc>) -> Result<ConfigRecord> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO config(key,job_id,triggered_at) VALUES(?,?,?)
             ON CONFLICT(key) DO UPDATE SET job_id=excluded.job_id, triggered_at=excluded.triggered_at",
            params![KEY_LATEST_MODEL_JOB, job_id, format_ts(at)],
        )?;
        read_config(&conn, KEY_LATEST_MODEL_JOB)?
            .ok_or_else(|| anyhow!("config row {} missing after upsert", KEY_LATEST_MODEL_JOB))
    }

    // ---------- Fine-tune claims ----------

    /// Claims `epoch` for a fine-tune submission. Returns false when another
    /// caller already holds it.
    pub fn try_claim_finetune(&self, epoch: i64, reason: &str, at: DateTime<Utc>) -> Result<bool> {
        let conn = self.conn()?;
        let n = conn.execute(
            "INSERT OR IGNORE INTO finetune_claims(epoch,claimed_at,reason) VALUES(?,?,?)",
            params![epoch, format_ts(at), reason],
        )?;
        Ok(n == 1)
    }

    pub fn release_finetune_claim(&self, epoch: i64) -> Result<bool> {
        let conn = self.conn()?;
        let n = conn.execute("DELETE FROM finetune_claims WHERE epoch=?", [epoch])?;
        Ok(n > 0)
    }

    // ---------------- Async wrappers (spawn_blocking) ----------------
    // These helpers offload rusqlite work from async executors.

    pub async fn insert_feedback_async(
        &self,
        new: NewFeedback,
        high_quality: bool,
    ) -> Result<FeedbackEntry> {
        let k = self.clone();
        tokio::task::spawn_blocking(move || k.insert_feedback(&new, high_quality))
            .await
            .map_err(|e| anyhow!("join error: {}", e))?
    }

    pub async fn count_high_quality_since_async(&self, since: DateTime<Utc>) -> Result<i64> {
        let k = self.clone();
        tokio::task::spawn_blocking(move || k.count_high_quality_since(since))
            .await
            .map_err(|e| anyhow!("join error: {}", e))?
    }

    pub async fn list_high_quality_since_async(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<FeedbackEntry>> {
        let k = self.clone();
        tokio::task::spawn_blocking(move || k.list_high_quality_since(since))
            .await
            .map_err(|e| anyhow!("join error: {}", e))?
    }

    pub async fn recent_high_quality_for_section_async(
        &self,
        section_id: &str,
        limit: i64,
    ) -> Result<Vec<FeedbackEntry>> {
        let k = self.clone();
        let s = section_id.to_string();
        tokio::task::spawn_blocking(move || k.recent_high_quality_for_section(&s, limit))
            .await
            .map_err(|e| anyhow!("join error: {}", e))?
    }

    pub async fn get_config_async(&self, key: &str) -> Result<Option<ConfigRecord>> {
        let k = self.clone();
        let s = key.to_string();
        tokio::task::spawn_blocking(move || k.get_config(&s))
            .await
            .map_err(|e| anyhow!("join error: {}", e))?
    }

    pub async fn set_latest_model_async(
        &self,
        model_id: &str,
        at: DateTime<Utc>,
    ) -> Result<ConfigRecord> {
        let k = self.clone();
        let s = model_id.to_string();
        tokio::task::spawn_blocking(move || k.set_latest_model(&s, at))
            .await
            .map_err(|e| anyhow!("join error: {}", e))?
    }

    pub async fn record_finetune_job_async(
        &self,
        job_id: &str,
        at: DateTime<Utc>,
    ) -> Result<ConfigRecord> {
        let k = self.clone();
        let s = job_id.to_string();
        tokio::task::spawn_blocking(move || k.record_finetune_job(&s, at))
            .await
            .map_err(|e| anyhow!("join error: {}", e))?
    }

    pub async fn try_claim_finetune_async(
        &self,
        epoch: i64,
        reason: &str,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let k = self.clone();
        let r = reason.to_string();
        tokio::task::spawn_blocking(move || k.try_claim_finetune(epoch, &r, at))
            .await
            .map_err(|e| anyhow!("join error: {}", e))?
    }

    pub async fn release_finetune_claim_async(&self, epoch: i64) -> Result<bool> {
        let k = self.clone();
        tokio::task::spawn_blocking(move || k.release_finetune_claim(epoch))
            .await
            .map_err(|e| anyhow!("join error: {}", e))?
    }
}

fn read_config(conn: &Connection, key: &str) -> Result<Option<ConfigRecord>> {
    let mut stmt = conn.prepare(
        "SELECT key,model_id,job_id,triggered_at,timestamp FROM config WHERE key=? LIMIT 1",
    )?;
    let rec = stmt
        .query_row([key], |row| {
            Ok(ConfigRecord {
                key: row.get(0)?,
                model_id: row.get(1)?,
                job_id: row.get(2)?,
                triggered_at: row.get(3)?,
                timestamp: row.get(4)?,
            })
        })
        .optional()?;
    Ok(rec)
}

fn feedback_from_row(row: &Row<'_>) -> rusqlite::Result<FeedbackEntry> {
    let prompt_s: String = row.get(5)?;
    let messages_s: String = row.get(7)?;
    let original_prompt = serde_json::from_str(&prompt_s).unwrap_or(serde_json::Value::Null);
    let messages = serde_json::from_str::<Vec<ChatMessage>>(&messages_s).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(7, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(FeedbackEntry {
        id: row.get(0)?,
        section_id: row.get(1)?,
        rating: row.get(2)?,
        feedback_text: row.get(3)?,
        generated_content: row.get(4)?,
        original_prompt,
        timestamp: row.get(6)?,
        messages,
    })
}
