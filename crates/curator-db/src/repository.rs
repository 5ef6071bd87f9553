//! SQLite implementation of IMetadataRepository
//!
//! This module provides the concrete SQLite-based implementation of the
//! metadata repository port defined in curator-core. It handles all domain
//! type serialization/deserialization and SQL query construction.
//!
//! ## Type Mapping
//!
//! | Domain Type            | SQL Type | Strategy                            |
//! |------------------------|----------|-------------------------------------|
//! | FileName, StoreName,   | TEXT     | String via `.as_str()` / `new()`    |
//! | PeerName, StorePath    |          |                                     |
//! | ContentHash            | TEXT     | lowercase hex string                |
//! | TransferId, BatchId    | TEXT     | UUID string via `to_string()`       |
//! | DateTime<Utc>          | TEXT     | RFC 3339 via `to_rfc3339()`         |
//! | state enums            | TEXT     | `as_str()` / `parse()`              |
//! | QueueEntry[]           | TEXT     | serde_json array                    |
//!
//! State transitions and task claims are conditional updates
//! (`... WHERE state = ?` / `... WHERE claimed_at IS NULL OR ...`); the
//! caller learns from the affected-row count whether its guard held.

use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use curator_core::domain::{
    AuthLevel, BackgroundTaskLog, BatchId, ContentHash, DeletionPolicy, ErrorCategory, ErrorLog,
    File, FileName, IncomingState, IncomingTransfer, Instance, OutgoingState, OutgoingTransfer,
    Peer, PeerName, QueueEntry, QueueState, RemoteInstance, SendQueueItem, Severity, Store,
    StoreKind, StoreName, StorePath, TaskOutcome, TransferId, User,
};
use curator_core::ports::{FileSearchFilters, IMetadataRepository};

use crate::retry::with_backoff;
use crate::DbError;

/// SQLite-based implementation of the metadata repository port
///
/// All operations go through a connection pool; writes are wrapped in the
/// fixed-backoff retry for transient busy/locked errors.
pub struct SqliteMetadataRepository {
    pool: SqlitePool,
}

impl SqliteMetadataRepository {
    /// Creates a new repository instance with the given connection pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

// ============================================================================
// Helper functions for type conversion
// ============================================================================

/// Parse a DateTime<Utc> from an RFC 3339 string
fn parse_datetime(s: &str) -> Result<DateTime<Utc>, DbError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DbError::Serialization(format!("Failed to parse datetime '{}': {}", s, e)))
}

/// Parse an optional DateTime<Utc> from an optional string
fn parse_optional_datetime(s: Option<String>) -> Result<Option<DateTime<Utc>>, DbError> {
    match s {
        Some(ref val) if !val.is_empty() => parse_datetime(val).map(Some),
        _ => Ok(None),
    }
}

fn ser_err(what: &str, detail: impl std::fmt::Display) -> DbError {
    DbError::Serialization(format!("Invalid {what}: {detail}"))
}

/// A typed bind value for dynamically built queries
enum Bind {
    Text(String),
    Int(i64),
}

fn bind_all<'q>(
    mut query: sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    binds: &'q [Bind],
) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    for bind in binds {
        query = match bind {
            Bind::Text(s) => query.bind(s.as_str()),
            Bind::Int(i) => query.bind(*i),
        };
    }
    query
}

// ============================================================================
// Row mapping functions
// ============================================================================

fn file_from_row(row: &SqliteRow) -> Result<File, DbError> {
    let name: String = row.get("name");
    let size: i64 = row.get("size");
    let hash: String = row.get("hash");
    let created_at: String = row.get("created_at");
    let uploader: String = row.get("uploader");
    let obsid: Option<i64> = row.get("obsid");
    let session_id: Option<String> = row.get("session_id");

    Ok(File {
        name: FileName::new(name.clone()).map_err(|e| ser_err("file name", e))?,
        size: size as u64,
        hash: ContentHash::new(hash).map_err(|e| ser_err("hash", e))?,
        created_at: parse_datetime(&created_at)?,
        uploader,
        obsid,
        session_id,
    })
}

fn instance_from_row(row: &SqliteRow) -> Result<Instance, DbError> {
    let id: i64 = row.get("id");
    let file_name: String = row.get("file_name");
    let store_name: String = row.get("store_name");
    let store_path: String = row.get("store_path");
    let available: i64 = row.get("available");
    let deletion_policy: String = row.get("deletion_policy");
    let created_at: String = row.get("created_at");

    Ok(Instance {
        id,
        file_name: FileName::new(file_name).map_err(|e| ser_err("file name", e))?,
        store_name: StoreName::new(store_name).map_err(|e| ser_err("store name", e))?,
        store_path: StorePath::new(store_path).map_err(|e| ser_err("store path", e))?,
        available: available != 0,
        deletion_policy: DeletionPolicy::parse(&deletion_policy)
            .ok_or_else(|| ser_err("deletion policy", &deletion_policy))?,
        created_at: parse_datetime(&created_at)?,
    })
}

fn remote_instance_from_row(row: &SqliteRow) -> Result<RemoteInstance, DbError> {
    let file_name: String = row.get("file_name");
    let librarian_name: String = row.get("librarian_name");
    let copied_at: String = row.get("copied_at");

    Ok(RemoteInstance {
        file_name: FileName::new(file_name).map_err(|e| ser_err("file name", e))?,
        librarian_name: PeerName::new(librarian_name).map_err(|e| ser_err("peer name", e))?,
        copied_at: parse_datetime(&copied_at)?,
    })
}

fn store_from_row(row: &SqliteRow) -> Result<Store, DbError> {
    let name: String = row.get("name");
    let kind: String = row.get("kind");
    let capacity: i64 = row.get("capacity");
    let used: i64 = row.get("used");
    let ingestible: i64 = row.get("ingestible");
    let enabled: i64 = row.get("enabled");
    let available: i64 = row.get("available");
    let report_full_fraction: f64 = row.get("report_full_fraction");

    Ok(Store {
        name: StoreName::new(name).map_err(|e| ser_err("store name", e))?,
        kind: StoreKind::parse(&kind).ok_or_else(|| ser_err("store kind", &kind))?,
        capacity: capacity as u64,
        used: used as u64,
        ingestible: ingestible != 0,
        enabled: enabled != 0,
        available: available != 0,
        report_full_fraction,
    })
}

fn outgoing_from_row(row: &SqliteRow) -> Result<OutgoingTransfer, DbError> {
    let id: String = row.get("id");
    let file_name: String = row.get("file_name");
    let destination: String = row.get("destination");
    let source_store: String = row.get("source_store");
    let method: String = row.get("method");
    let external_id: Option<String> = row.get("external_id");
    let batch_id: Option<String> = row.get("batch_id");
    let state: String = row.get("state");
    let created_at: String = row.get("created_at");
    let updated_at: String = row.get("updated_at");
    let error: Option<String> = row.get("error");

    Ok(OutgoingTransfer {
        id: TransferId::from_str(&id).map_err(|e| ser_err("transfer id", e))?,
        file_name: FileName::new(file_name).map_err(|e| ser_err("file name", e))?,
        destination: PeerName::new(destination).map_err(|e| ser_err("peer name", e))?,
        source_store: StoreName::new(source_store).map_err(|e| ser_err("store name", e))?,
        method,
        external_id,
        batch_id: batch_id
            .map(|b| BatchId::from_str(&b).map_err(|e| ser_err("batch id", e)))
            .transpose()?,
        state: OutgoingState::parse(&state).ok_or_else(|| ser_err("outgoing state", &state))?,
        created_at: parse_datetime(&created_at)?,
        updated_at: parse_datetime(&updated_at)?,
        error,
    })
}

fn incoming_from_row(row: &SqliteRow) -> Result<IncomingTransfer, DbError> {
    let id: String = row.get("id");
    let file_name: String = row.get("file_name");
    let expected_hash: String = row.get("expected_hash");
    let expected_size: i64 = row.get("expected_size");
    let store_name: String = row.get("store_name");
    let staging_path: String = row.get("staging_path");
    let source: String = row.get("source");
    let state: String = row.get("state");
    let created_at: String = row.get("created_at");
    let updated_at: String = row.get("updated_at");
    let error: Option<String> = row.get("error");

    Ok(IncomingTransfer {
        id: TransferId::from_str(&id).map_err(|e| ser_err("transfer id", e))?,
        file_name: FileName::new(file_name).map_err(|e| ser_err("file name", e))?,
        expected_hash: ContentHash::new(expected_hash).map_err(|e| ser_err("hash", e))?,
        expected_size: expected_size as u64,
        store_name: StoreName::new(store_name).map_err(|e| ser_err("store name", e))?,
        staging_path,
        source: PeerName::new(source).map_err(|e| ser_err("peer name", e))?,
        state: IncomingState::parse(&state).ok_or_else(|| ser_err("incoming state", &state))?,
        created_at: parse_datetime(&created_at)?,
        updated_at: parse_datetime(&updated_at)?,
        error,
    })
}

fn queue_item_from_row(row: &SqliteRow) -> Result<SendQueueItem, DbError> {
    let id: String = row.get("id");
    let destination: String = row.get("destination");
    let source_store: String = row.get("source_store");
    let destination_endpoint: String = row.get("destination_endpoint");
    let entries: String = row.get("entries");
    let method: String = row.get("method");
    let external_id: Option<String> = row.get("external_id");
    let state: String = row.get("state");
    let created_at: String = row.get("created_at");
    let updated_at: String = row.get("updated_at");

    let entries: Vec<QueueEntry> = serde_json::from_str(&entries)
        .map_err(|e| ser_err("queue entries JSON", e))?;

    Ok(SendQueueItem {
        id: BatchId::from_str(&id).map_err(|e| ser_err("batch id", e))?,
        destination: PeerName::new(destination).map_err(|e| ser_err("peer name", e))?,
        source_store: StoreName::new(source_store).map_err(|e| ser_err("store name", e))?,
        destination_endpoint,
        entries,
        method,
        external_id,
        state: QueueState::parse(&state).ok_or_else(|| ser_err("queue state", &state))?,
        created_at: parse_datetime(&created_at)?,
        updated_at: parse_datetime(&updated_at)?,
    })
}

fn peer_from_row(row: &SqliteRow) -> Result<Peer, DbError> {
    let name: String = row.get("name");
    let base_url: String = row.get("base_url");
    let port: i64 = row.get("port");
    let authenticator_enc: String = row.get("authenticator_enc");
    let transfers_enabled: i64 = row.get("transfers_enabled");
    let last_seen: Option<String> = row.get("last_seen");
    let last_error: Option<String> = row.get("last_error");

    Ok(Peer {
        name: PeerName::new(name).map_err(|e| ser_err("peer name", e))?,
        base_url,
        port: port as u16,
        authenticator_enc,
        transfers_enabled: transfers_enabled != 0,
        last_seen: parse_optional_datetime(last_seen)?,
        last_error,
    })
}

fn user_from_row(row: &SqliteRow) -> Result<User, DbError> {
    let name: String = row.get("name");
    let password_digest: String = row.get("password_digest");
    let level: String = row.get("level");

    Ok(User {
        name,
        password_digest,
        level: AuthLevel::parse(&level).ok_or_else(|| ser_err("auth level", &level))?,
    })
}

fn error_log_from_row(row: &SqliteRow) -> Result<ErrorLog, DbError> {
    let id: i64 = row.get("id");
    let severity: String = row.get("severity");
    let category: String = row.get("category");
    let message: String = row.get("message");
    let created_at: String = row.get("created_at");

    Ok(ErrorLog {
        id,
        severity: Severity::parse(&severity).ok_or_else(|| ser_err("severity", &severity))?,
        category: ErrorCategory::parse(&category)
            .ok_or_else(|| ser_err("category", &category))?,
        message,
        created_at: parse_datetime(&created_at)?,
    })
}

fn task_log_from_row(row: &SqliteRow) -> Result<BackgroundTaskLog, DbError> {
    let id: i64 = row.get("id");
    let task_name: String = row.get("task_name");
    let claimed_at: String = row.get("claimed_at");
    let finished_at: Option<String> = row.get("finished_at");
    let outcome: Option<String> = row.get("outcome");

    Ok(BackgroundTaskLog {
        id,
        task_name,
        claimed_at: parse_datetime(&claimed_at)?,
        finished_at: parse_optional_datetime(finished_at)?,
        outcome: outcome
            .map(|o| TaskOutcome::parse(&o).ok_or_else(|| ser_err("task outcome", &o)))
            .transpose()?,
    })
}

/// RFC 3339 cutoff for "older than `days`" comparisons
fn age_cutoff(days: i64) -> String {
    (Utc::now() - Duration::days(days)).to_rfc3339()
}

// ============================================================================
// IMetadataRepository implementation
// ============================================================================

#[async_trait::async_trait]
impl IMetadataRepository for SqliteMetadataRepository {
    // --- File operations ---

    async fn create_file(&self, file: &File) -> anyhow::Result<()> {
        let name = file.name.as_str();
        let size = file.size as i64;
        let hash = file.hash.as_str();
        let created_at = file.created_at.to_rfc3339();

        with_backoff("create_file", || async {
            sqlx::query(
                "INSERT INTO files (name, size, hash, created_at, uploader, obsid, session_id) \
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(name)
            .bind(size)
            .bind(hash)
            .bind(&created_at)
            .bind(&file.uploader)
            .bind(file.obsid)
            .bind(&file.session_id)
            .execute(&self.pool)
            .await
        })
        .await?;

        tracing::trace!(file = name, "Created file row");
        Ok(())
    }

    async fn get_file(&self, name: &FileName) -> anyhow::Result<Option<File>> {
        let row = sqlx::query("SELECT * FROM files WHERE name = ?")
            .bind(name.as_str())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref r) => Ok(Some(file_from_row(r)?)),
            None => Ok(None),
        }
    }

    async fn search_files(&self, filters: &FileSearchFilters) -> anyhow::Result<Vec<File>> {
        let mut sql = String::from("SELECT DISTINCT f.* FROM files f");
        let mut binds: Vec<Bind> = Vec::new();

        if let Some(ref store) = filters.store {
            sql.push_str(
                " JOIN instances i ON i.file_name = f.name \
                 AND i.store_name = ? AND i.available = 1",
            );
            binds.push(Bind::Text(store.as_str().to_string()));
        }

        sql.push_str(" WHERE 1=1");

        if let Some(ref name) = filters.name {
            sql.push_str(" AND f.name = ?");
            binds.push(Bind::Text(name.as_str().to_string()));
        }
        if let Some(ref pattern) = filters.name_like {
            sql.push_str(" AND f.name LIKE ?");
            binds.push(Bind::Text(pattern.clone()));
        }
        if let Some(ref uploader) = filters.uploader {
            sql.push_str(" AND f.uploader = ?");
            binds.push(Bind::Text(uploader.clone()));
        }
        if let Some(obsid) = filters.obsid {
            sql.push_str(" AND f.obsid = ?");
            binds.push(Bind::Int(obsid));
        }
        if let Some(ref session) = filters.session_id {
            sql.push_str(" AND f.session_id = ?");
            binds.push(Bind::Text(session.clone()));
        }
        if let Some(min) = filters.min_size {
            sql.push_str(" AND f.size >= ?");
            binds.push(Bind::Int(min as i64));
        }
        if let Some(max) = filters.max_size {
            sql.push_str(" AND f.size <= ?");
            binds.push(Bind::Int(max as i64));
        }
        if let Some(after) = filters.created_after {
            sql.push_str(" AND f.created_at > ?");
            binds.push(Bind::Text(after.to_rfc3339()));
        }
        if let Some(before) = filters.created_before {
            sql.push_str(" AND f.created_at < ?");
            binds.push(Bind::Text(before.to_rfc3339()));
        }

        sql.push_str(" ORDER BY f.created_at DESC");
        if let Some(limit) = filters.limit {
            sql.push_str(" LIMIT ?");
            binds.push(Bind::Int(limit as i64));
        }

        let rows = bind_all(sqlx::query(&sql), &binds)
            .fetch_all(&self.pool)
            .await?;

        let mut files = Vec::with_capacity(rows.len());
        for row in &rows {
            files.push(file_from_row(row)?);
        }
        Ok(files)
    }

    async fn files_needing_push(
        &self,
        peer: &PeerName,
        store: &StoreName,
        min_age_days: i64,
        limit: u32,
    ) -> anyhow::Result<Vec<File>> {
        let cutoff = age_cutoff(min_age_days);

        let rows = sqlx::query(
            "SELECT DISTINCT f.* FROM files f \
             JOIN instances i ON i.file_name = f.name \
                 AND i.store_name = ? AND i.available = 1 \
             WHERE f.created_at <= ? \
               AND NOT EXISTS (SELECT 1 FROM remote_instances r \
                   WHERE r.file_name = f.name AND r.librarian_name = ?) \
               AND NOT EXISTS (SELECT 1 FROM outgoing_transfers o \
                   WHERE o.file_name = f.name AND o.destination = ? \
                     AND o.state IN ('initiated', 'ongoing', 'staged')) \
             ORDER BY f.created_at ASC LIMIT ?",
        )
        .bind(store.as_str())
        .bind(&cutoff)
        .bind(peer.as_str())
        .bind(peer.as_str())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut files = Vec::with_capacity(rows.len());
        for row in &rows {
            files.push(file_from_row(row)?);
        }
        Ok(files)
    }

    async fn files_needing_local_clone(
        &self,
        source: &StoreName,
        destinations: &[StoreName],
        min_age_days: i64,
        limit: u32,
    ) -> anyhow::Result<Vec<File>> {
        if destinations.is_empty() {
            return Ok(Vec::new());
        }
        let cutoff = age_cutoff(min_age_days);
        let placeholders = vec!["?"; destinations.len()].join(", ");

        let sql = format!(
            "SELECT DISTINCT f.* FROM files f \
             JOIN instances i ON i.file_name = f.name \
                 AND i.store_name = ? AND i.available = 1 \
             WHERE f.created_at <= ? \
               AND NOT EXISTS (SELECT 1 FROM instances d \
                   WHERE d.file_name = f.name AND d.store_name IN ({placeholders})) \
             ORDER BY f.created_at ASC LIMIT ?"
        );

        let mut query = sqlx::query(&sql).bind(source.as_str()).bind(&cutoff);
        for dest in destinations {
            query = query.bind(dest.as_str());
        }
        let rows = query.bind(limit as i64).fetch_all(&self.pool).await?;

        let mut files = Vec::with_capacity(rows.len());
        for row in &rows {
            files.push(file_from_row(row)?);
        }
        Ok(files)
    }

    async fn files_for_integrity_check(
        &self,
        store: &StoreName,
        age_in_days: i64,
    ) -> anyhow::Result<Vec<(File, Instance)>> {
        let cutoff = age_cutoff(age_in_days);

        let rows = sqlx::query(
            "SELECT f.name AS f_name, f.size, f.hash, f.created_at AS f_created_at, \
                    f.uploader, f.obsid, f.session_id, \
                    i.id, i.file_name, i.store_name, i.store_path, i.available, \
                    i.deletion_policy, i.created_at \
             FROM files f \
             JOIN instances i ON i.file_name = f.name \
                 AND i.store_name = ? AND i.available = 1 \
             WHERE f.created_at >= ? \
             ORDER BY f.created_at ASC",
        )
        .bind(store.as_str())
        .bind(&cutoff)
        .fetch_all(&self.pool)
        .await?;

        let mut pairs = Vec::with_capacity(rows.len());
        for row in &rows {
            let name: String = row.get("f_name");
            let size: i64 = row.get("size");
            let hash: String = row.get("hash");
            let created_at: String = row.get("f_created_at");
            let uploader: String = row.get("uploader");
            let obsid: Option<i64> = row.get("obsid");
            let session_id: Option<String> = row.get("session_id");
            let file = File {
                name: FileName::new(name).map_err(|e| ser_err("file name", e))?,
                size: size as u64,
                hash: ContentHash::new(hash).map_err(|e| ser_err("hash", e))?,
                created_at: parse_datetime(&created_at)?,
                uploader,
                obsid,
                session_id,
            };
            pairs.push((file, instance_from_row(row)?));
        }
        Ok(pairs)
    }

    // --- Instance operations ---

    async fn create_instance(&self, instance: &Instance) -> anyhow::Result<i64> {
        let file_name = instance.file_name.as_str();
        let store_name = instance.store_name.as_str();
        let store_path = instance.store_path.as_str();
        let deletion_policy = instance.deletion_policy.as_str();
        let created_at = instance.created_at.to_rfc3339();

        let result = with_backoff("create_instance", || async {
            sqlx::query(
                "INSERT INTO instances \
                 (file_name, store_name, store_path, available, deletion_policy, created_at) \
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(file_name)
            .bind(store_name)
            .bind(store_path)
            .bind(instance.available as i64)
            .bind(deletion_policy)
            .bind(&created_at)
            .execute(&self.pool)
            .await
        })
        .await?;

        tracing::trace!(file = file_name, store = store_name, "Created instance row");
        Ok(result.last_insert_rowid())
    }

    async fn get_instance(
        &self,
        file: &FileName,
        store: &StoreName,
    ) -> anyhow::Result<Option<Instance>> {
        let row = sqlx::query(
            "SELECT * FROM instances WHERE file_name = ? AND store_name = ? LIMIT 1",
        )
        .bind(file.as_str())
        .bind(store.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref r) => Ok(Some(instance_from_row(r)?)),
            None => Ok(None),
        }
    }

    async fn instances_for_file(&self, file: &FileName) -> anyhow::Result<Vec<Instance>> {
        let rows = sqlx::query("SELECT * FROM instances WHERE file_name = ? ORDER BY id ASC")
            .bind(file.as_str())
            .fetch_all(&self.pool)
            .await?;

        let mut instances = Vec::with_capacity(rows.len());
        for row in &rows {
            instances.push(instance_from_row(row)?);
        }
        Ok(instances)
    }

    async fn instances_on_store(&self, store: &StoreName) -> anyhow::Result<Vec<Instance>> {
        let rows = sqlx::query(
            "SELECT * FROM instances WHERE store_name = ? AND available = 1 ORDER BY id ASC",
        )
        .bind(store.as_str())
        .fetch_all(&self.pool)
        .await?;

        let mut instances = Vec::with_capacity(rows.len());
        for row in &rows {
            instances.push(instance_from_row(row)?);
        }
        Ok(instances)
    }

    async fn soft_delete_instance(
        &self,
        file: &FileName,
        store: &StoreName,
    ) -> anyhow::Result<bool> {
        let result = with_backoff("soft_delete_instance", || async {
            sqlx::query(
                "UPDATE instances SET available = 0 \
                 WHERE file_name = ? AND store_name = ? AND available = 1 \
                   AND deletion_policy != 'disallowed'",
            )
            .bind(file.as_str())
            .bind(store.as_str())
            .execute(&self.pool)
            .await
        })
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_instance_unavailable(&self, instance_id: i64) -> anyhow::Result<bool> {
        let result = with_backoff("mark_instance_unavailable", || async {
            sqlx::query("UPDATE instances SET available = 0 WHERE id = ?")
                .bind(instance_id)
                .execute(&self.pool)
                .await
        })
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn remove_instance(&self, instance_id: i64) -> anyhow::Result<bool> {
        let result = with_backoff("remove_instance", || async {
            sqlx::query(
                "DELETE FROM instances WHERE id = ? AND deletion_policy != 'disallowed'",
            )
            .bind(instance_id)
            .execute(&self.pool)
            .await
        })
        .await?;

        Ok(result.rows_affected() > 0)
    }

    // --- Remote instance operations ---

    async fn create_remote_instance(&self, remote: &RemoteInstance) -> anyhow::Result<()> {
        let file_name = remote.file_name.as_str();
        let librarian = remote.librarian_name.as_str();
        let copied_at = remote.copied_at.to_rfc3339();

        with_backoff("create_remote_instance", || async {
            sqlx::query(
                "INSERT OR IGNORE INTO remote_instances (file_name, librarian_name, copied_at) \
                 VALUES (?, ?, ?)",
            )
            .bind(file_name)
            .bind(librarian)
            .bind(&copied_at)
            .execute(&self.pool)
            .await
        })
        .await?;

        tracing::trace!(file = file_name, peer = librarian, "Recorded remote instance");
        Ok(())
    }

    async fn get_remote_instance(
        &self,
        file: &FileName,
        peer: &PeerName,
    ) -> anyhow::Result<Option<RemoteInstance>> {
        let row = sqlx::query(
            "SELECT * FROM remote_instances WHERE file_name = ? AND librarian_name = ?",
        )
        .bind(file.as_str())
        .bind(peer.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref r) => Ok(Some(remote_instance_from_row(r)?)),
            None => Ok(None),
        }
    }

    async fn remote_instances_for_file(
        &self,
        file: &FileName,
    ) -> anyhow::Result<Vec<RemoteInstance>> {
        let rows = sqlx::query(
            "SELECT * FROM remote_instances WHERE file_name = ? ORDER BY librarian_name ASC",
        )
        .bind(file.as_str())
        .fetch_all(&self.pool)
        .await?;

        let mut remotes = Vec::with_capacity(rows.len());
        for row in &rows {
            remotes.push(remote_instance_from_row(row)?);
        }
        Ok(remotes)
    }

    // --- Store operations ---

    async fn upsert_store(&self, store: &Store) -> anyhow::Result<()> {
        let name = store.name.as_str();
        let kind = store.kind.as_str();

        with_backoff("upsert_store", || async {
            sqlx::query(
                "INSERT INTO stores \
                 (name, kind, capacity, used, ingestible, enabled, available, report_full_fraction) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?) \
                 ON CONFLICT (name) DO UPDATE SET \
                     kind = excluded.kind, \
                     capacity = excluded.capacity, \
                     ingestible = excluded.ingestible, \
                     report_full_fraction = excluded.report_full_fraction",
            )
            .bind(name)
            .bind(kind)
            .bind(store.capacity as i64)
            .bind(store.used as i64)
            .bind(store.ingestible as i64)
            .bind(store.enabled as i64)
            .bind(store.available as i64)
            .bind(store.report_full_fraction)
            .execute(&self.pool)
            .await
        })
        .await?;

        tracing::trace!(store = name, "Upserted store row");
        Ok(())
    }

    async fn get_store(&self, name: &StoreName) -> anyhow::Result<Option<Store>> {
        let row = sqlx::query("SELECT * FROM stores WHERE name = ?")
            .bind(name.as_str())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref r) => Ok(Some(store_from_row(r)?)),
            None => Ok(None),
        }
    }

    async fn list_stores(&self) -> anyhow::Result<Vec<Store>> {
        let rows = sqlx::query("SELECT * FROM stores ORDER BY name ASC")
            .fetch_all(&self.pool)
            .await?;

        let mut stores = Vec::with_capacity(rows.len());
        for row in &rows {
            stores.push(store_from_row(row)?);
        }
        Ok(stores)
    }

    async fn set_store_enabled(&self, name: &StoreName, enabled: bool) -> anyhow::Result<bool> {
        let result = with_backoff("set_store_enabled", || async {
            sqlx::query("UPDATE stores SET enabled = ? WHERE name = ?")
                .bind(enabled as i64)
                .bind(name.as_str())
                .execute(&self.pool)
                .await
        })
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_store_ingestible(
        &self,
        name: &StoreName,
        ingestible: bool,
    ) -> anyhow::Result<bool> {
        let result = with_backoff("set_store_ingestible", || async {
            sqlx::query("UPDATE stores SET ingestible = ? WHERE name = ?")
                .bind(ingestible as i64)
                .bind(name.as_str())
                .execute(&self.pool)
                .await
        })
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_store_available(&self, name: &StoreName, available: bool) -> anyhow::Result<bool> {
        let result = with_backoff("set_store_available", || async {
            sqlx::query("UPDATE stores SET available = ? WHERE name = ?")
                .bind(available as i64)
                .bind(name.as_str())
                .execute(&self.pool)
                .await
        })
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn adjust_store_used(&self, name: &StoreName, delta: i64) -> anyhow::Result<()> {
        with_backoff("adjust_store_used", || async {
            sqlx::query("UPDATE stores SET used = MAX(used + ?, 0) WHERE name = ?")
                .bind(delta)
                .bind(name.as_str())
                .execute(&self.pool)
                .await
        })
        .await?;
        Ok(())
    }

    async fn set_store_usage(
        &self,
        name: &StoreName,
        capacity: u64,
        used: u64,
    ) -> anyhow::Result<()> {
        with_backoff("set_store_usage", || async {
            sqlx::query("UPDATE stores SET capacity = ?, used = ? WHERE name = ?")
                .bind(capacity as i64)
                .bind(used as i64)
                .bind(name.as_str())
                .execute(&self.pool)
                .await
        })
        .await?;
        Ok(())
    }

    // --- Outgoing transfer operations ---

    async fn create_outgoing(&self, transfer: &OutgoingTransfer) -> anyhow::Result<()> {
        let id = transfer.id.to_string();
        let file_name = transfer.file_name.as_str();
        let destination = transfer.destination.as_str();
        let source_store = transfer.source_store.as_str();
        let batch_id = transfer.batch_id.map(|b| b.to_string());
        let state = transfer.state.as_str();
        let created_at = transfer.created_at.to_rfc3339();
        let updated_at = transfer.updated_at.to_rfc3339();

        with_backoff("create_outgoing", || async {
            sqlx::query(
                "INSERT INTO outgoing_transfers \
                 (id, file_name, destination, source_store, method, external_id, batch_id, \
                  state, created_at, updated_at, error) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&id)
            .bind(file_name)
            .bind(destination)
            .bind(source_store)
            .bind(&transfer.method)
            .bind(&transfer.external_id)
            .bind(&batch_id)
            .bind(state)
            .bind(&created_at)
            .bind(&updated_at)
            .bind(&transfer.error)
            .execute(&self.pool)
            .await
        })
        .await?;

        tracing::trace!(transfer = %id, file = file_name, "Created outgoing transfer");
        Ok(())
    }

    async fn get_outgoing(&self, id: TransferId) -> anyhow::Result<Option<OutgoingTransfer>> {
        let row = sqlx::query("SELECT * FROM outgoing_transfers WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref r) => Ok(Some(outgoing_from_row(r)?)),
            None => Ok(None),
        }
    }

    async fn advance_outgoing(
        &self,
        id: TransferId,
        from: OutgoingState,
        to: OutgoingState,
        error: Option<&str>,
    ) -> anyhow::Result<bool> {
        if !from.can_advance_to(to) {
            anyhow::bail!("illegal outgoing transition {from} -> {to}");
        }
        let id = id.to_string();
        let now = Utc::now().to_rfc3339();

        let result = with_backoff("advance_outgoing", || async {
            sqlx::query(
                "UPDATE outgoing_transfers \
                 SET state = ?, updated_at = ?, error = COALESCE(?, error) \
                 WHERE id = ? AND state = ?",
            )
            .bind(to.as_str())
            .bind(&now)
            .bind(error)
            .bind(&id)
            .bind(from.as_str())
            .execute(&self.pool)
            .await
        })
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn set_outgoing_external(
        &self,
        id: TransferId,
        external_id: &str,
    ) -> anyhow::Result<()> {
        let id = id.to_string();
        with_backoff("set_outgoing_external", || async {
            sqlx::query("UPDATE outgoing_transfers SET external_id = ? WHERE id = ?")
                .bind(external_id)
                .bind(&id)
                .execute(&self.pool)
                .await
        })
        .await?;
        Ok(())
    }

    async fn outgoing_stuck_in(
        &self,
        state: OutgoingState,
        min_age_days: i64,
    ) -> anyhow::Result<Vec<OutgoingTransfer>> {
        let cutoff = age_cutoff(min_age_days);

        let rows = sqlx::query(
            "SELECT * FROM outgoing_transfers WHERE state = ? AND updated_at <= ? \
             ORDER BY updated_at ASC",
        )
        .bind(state.as_str())
        .bind(&cutoff)
        .fetch_all(&self.pool)
        .await?;

        let mut transfers = Vec::with_capacity(rows.len());
        for row in &rows {
            transfers.push(outgoing_from_row(row)?);
        }
        Ok(transfers)
    }

    // --- Incoming transfer operations ---

    async fn create_incoming(&self, transfer: &IncomingTransfer) -> anyhow::Result<()> {
        let id = transfer.id.to_string();
        let file_name = transfer.file_name.as_str();
        let state = transfer.state.as_str();
        let created_at = transfer.created_at.to_rfc3339();
        let updated_at = transfer.updated_at.to_rfc3339();

        with_backoff("create_incoming", || async {
            sqlx::query(
                "INSERT INTO incoming_transfers \
                 (id, file_name, expected_hash, expected_size, store_name, staging_path, \
                  source, state, created_at, updated_at, error) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&id)
            .bind(file_name)
            .bind(transfer.expected_hash.as_str())
            .bind(transfer.expected_size as i64)
            .bind(transfer.store_name.as_str())
            .bind(&transfer.staging_path)
            .bind(transfer.source.as_str())
            .bind(state)
            .bind(&created_at)
            .bind(&updated_at)
            .bind(&transfer.error)
            .execute(&self.pool)
            .await
        })
        .await?;

        tracing::trace!(transfer = %id, file = file_name, "Created incoming transfer");
        Ok(())
    }

    async fn get_incoming(&self, id: TransferId) -> anyhow::Result<Option<IncomingTransfer>> {
        let row = sqlx::query("SELECT * FROM incoming_transfers WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref r) => Ok(Some(incoming_from_row(r)?)),
            None => Ok(None),
        }
    }

    async fn advance_incoming(
        &self,
        id: TransferId,
        from: IncomingState,
        to: IncomingState,
        error: Option<&str>,
    ) -> anyhow::Result<bool> {
        if !from.can_advance_to(to) {
            anyhow::bail!("illegal incoming transition {from} -> {to}");
        }
        let id = id.to_string();
        let now = Utc::now().to_rfc3339();

        let result = with_backoff("advance_incoming", || async {
            sqlx::query(
                "UPDATE incoming_transfers \
                 SET state = ?, updated_at = ?, error = COALESCE(?, error) \
                 WHERE id = ? AND state = ?",
            )
            .bind(to.as_str())
            .bind(&now)
            .bind(error)
            .bind(&id)
            .bind(from.as_str())
            .execute(&self.pool)
            .await
        })
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn incoming_in_state(
        &self,
        state: IncomingState,
        limit: u32,
    ) -> anyhow::Result<Vec<IncomingTransfer>> {
        let rows = sqlx::query(
            "SELECT * FROM incoming_transfers WHERE state = ? \
             ORDER BY updated_at ASC LIMIT ?",
        )
        .bind(state.as_str())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut transfers = Vec::with_capacity(rows.len());
        for row in &rows {
            transfers.push(incoming_from_row(row)?);
        }
        Ok(transfers)
    }

    async fn incoming_stuck_in(
        &self,
        state: IncomingState,
        min_age_days: i64,
    ) -> anyhow::Result<Vec<IncomingTransfer>> {
        let cutoff = age_cutoff(min_age_days);

        let rows = sqlx::query(
            "SELECT * FROM incoming_transfers WHERE state = ? AND updated_at <= ? \
             ORDER BY updated_at ASC",
        )
        .bind(state.as_str())
        .bind(&cutoff)
        .fetch_all(&self.pool)
        .await?;

        let mut transfers = Vec::with_capacity(rows.len());
        for row in &rows {
            transfers.push(incoming_from_row(row)?);
        }
        Ok(transfers)
    }

    // --- Send queue operations ---

    async fn enqueue_batch(&self, item: &SendQueueItem) -> anyhow::Result<()> {
        let id = item.id.to_string();
        let entries = serde_json::to_string(&item.entries)
            .map_err(|e| anyhow::anyhow!("Failed to serialize queue entries: {e}"))?;
        let state = item.state.as_str();
        let created_at = item.created_at.to_rfc3339();
        let updated_at = item.updated_at.to_rfc3339();

        with_backoff("enqueue_batch", || async {
            sqlx::query(
                "INSERT INTO send_queue \
                 (id, destination, source_store, destination_endpoint, entries, method, \
                  external_id, state, created_at, updated_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&id)
            .bind(item.destination.as_str())
            .bind(item.source_store.as_str())
            .bind(&item.destination_endpoint)
            .bind(&entries)
            .bind(&item.method)
            .bind(&item.external_id)
            .bind(state)
            .bind(&created_at)
            .bind(&updated_at)
            .execute(&self.pool)
            .await
        })
        .await?;

        tracing::trace!(batch = %id, entries = item.entries.len(), "Enqueued batch");
        Ok(())
    }

    async fn queued_batches(&self, limit: u32) -> anyhow::Result<Vec<SendQueueItem>> {
        let rows = sqlx::query(
            "SELECT * FROM send_queue WHERE state = 'queued' \
             ORDER BY created_at ASC LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut items = Vec::with_capacity(rows.len());
        for row in &rows {
            items.push(queue_item_from_row(row)?);
        }
        Ok(items)
    }

    async fn submitted_batches(&self) -> anyhow::Result<Vec<SendQueueItem>> {
        let rows = sqlx::query(
            "SELECT * FROM send_queue WHERE state = 'submitted' ORDER BY created_at ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut items = Vec::with_capacity(rows.len());
        for row in &rows {
            items.push(queue_item_from_row(row)?);
        }
        Ok(items)
    }

    async fn count_submitted_batches(&self) -> anyhow::Result<u64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM send_queue WHERE state = 'submitted'")
                .fetch_one(&self.pool)
                .await?;
        Ok(count as u64)
    }

    async fn set_batch_state(
        &self,
        id: BatchId,
        from: QueueState,
        to: QueueState,
    ) -> anyhow::Result<bool> {
        let id = id.to_string();
        let now = Utc::now().to_rfc3339();

        let result = with_backoff("set_batch_state", || async {
            sqlx::query(
                "UPDATE send_queue SET state = ?, updated_at = ? WHERE id = ? AND state = ?",
            )
            .bind(to.as_str())
            .bind(&now)
            .bind(&id)
            .bind(from.as_str())
            .execute(&self.pool)
            .await
        })
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn set_batch_external(&self, id: BatchId, external_id: &str) -> anyhow::Result<()> {
        let id = id.to_string();
        with_backoff("set_batch_external", || async {
            sqlx::query("UPDATE send_queue SET external_id = ? WHERE id = ?")
                .bind(external_id)
                .bind(&id)
                .execute(&self.pool)
                .await
        })
        .await?;
        Ok(())
    }

    // --- Peer operations ---

    async fn upsert_peer(&self, peer: &Peer) -> anyhow::Result<()> {
        let name = peer.name.as_str();
        let last_seen = peer.last_seen.map(|dt| dt.to_rfc3339());

        with_backoff("upsert_peer", || async {
            sqlx::query(
                "INSERT INTO peers \
                 (name, base_url, port, authenticator_enc, transfers_enabled, last_seen, last_error) \
                 VALUES (?, ?, ?, ?, ?, ?, ?) \
                 ON CONFLICT (name) DO UPDATE SET \
                     base_url = excluded.base_url, \
                     port = excluded.port, \
                     authenticator_enc = excluded.authenticator_enc, \
                     transfers_enabled = excluded.transfers_enabled",
            )
            .bind(name)
            .bind(&peer.base_url)
            .bind(peer.port as i64)
            .bind(&peer.authenticator_enc)
            .bind(peer.transfers_enabled as i64)
            .bind(&last_seen)
            .bind(&peer.last_error)
            .execute(&self.pool)
            .await
        })
        .await?;

        tracing::trace!(peer = name, "Upserted peer row");
        Ok(())
    }

    async fn get_peer(&self, name: &PeerName) -> anyhow::Result<Option<Peer>> {
        let row = sqlx::query("SELECT * FROM peers WHERE name = ?")
            .bind(name.as_str())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref r) => Ok(Some(peer_from_row(r)?)),
            None => Ok(None),
        }
    }

    async fn list_peers(&self) -> anyhow::Result<Vec<Peer>> {
        let rows = sqlx::query("SELECT * FROM peers ORDER BY name ASC")
            .fetch_all(&self.pool)
            .await?;

        let mut peers = Vec::with_capacity(rows.len());
        for row in &rows {
            peers.push(peer_from_row(row)?);
        }
        Ok(peers)
    }

    async fn remove_peer(&self, name: &PeerName) -> anyhow::Result<bool> {
        let result = with_backoff("remove_peer", || async {
            sqlx::query("DELETE FROM peers WHERE name = ?")
                .bind(name.as_str())
                .execute(&self.pool)
                .await
        })
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_peer_transfers_enabled(
        &self,
        name: &PeerName,
        enabled: bool,
    ) -> anyhow::Result<bool> {
        let result = with_backoff("set_peer_transfers_enabled", || async {
            sqlx::query("UPDATE peers SET transfers_enabled = ? WHERE name = ?")
                .bind(enabled as i64)
                .bind(name.as_str())
                .execute(&self.pool)
                .await
        })
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn record_peer_seen(&self, name: &PeerName) -> anyhow::Result<()> {
        let now = Utc::now().to_rfc3339();
        with_backoff("record_peer_seen", || async {
            sqlx::query("UPDATE peers SET last_seen = ?, last_error = NULL WHERE name = ?")
                .bind(&now)
                .bind(name.as_str())
                .execute(&self.pool)
                .await
        })
        .await?;
        Ok(())
    }

    async fn record_peer_error(&self, name: &PeerName, error: &str) -> anyhow::Result<()> {
        with_backoff("record_peer_error", || async {
            sqlx::query("UPDATE peers SET last_error = ? WHERE name = ?")
                .bind(error)
                .bind(name.as_str())
                .execute(&self.pool)
                .await
        })
        .await?;
        Ok(())
    }

    // --- User operations ---

    async fn create_user(&self, user: &User) -> anyhow::Result<()> {
        with_backoff("create_user", || async {
            sqlx::query("INSERT INTO users (name, password_digest, level) VALUES (?, ?, ?)")
                .bind(&user.name)
                .bind(&user.password_digest)
                .bind(user.level.as_str())
                .execute(&self.pool)
                .await
        })
        .await?;

        tracing::trace!(user = %user.name, level = %user.level, "Created user");
        Ok(())
    }

    async fn get_user(&self, name: &str) -> anyhow::Result<Option<User>> {
        let row = sqlx::query("SELECT * FROM users WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref r) => Ok(Some(user_from_row(r)?)),
            None => Ok(None),
        }
    }

    async fn delete_user(&self, name: &str) -> anyhow::Result<bool> {
        let result = with_backoff("delete_user", || async {
            sqlx::query("DELETE FROM users WHERE name = ?")
                .bind(name)
                .execute(&self.pool)
                .await
        })
        .await?;
        Ok(result.rows_affected() > 0)
    }

    // --- Error log operations ---

    async fn append_error(&self, row: &ErrorLog) -> anyhow::Result<i64> {
        let created_at = row.created_at.to_rfc3339();

        let result = with_backoff("append_error", || async {
            sqlx::query(
                "INSERT INTO error_log (severity, category, message, created_at) \
                 VALUES (?, ?, ?, ?)",
            )
            .bind(row.severity.as_str())
            .bind(row.category.as_str())
            .bind(&row.message)
            .bind(&created_at)
            .execute(&self.pool)
            .await
        })
        .await?;

        Ok(result.last_insert_rowid())
    }

    async fn recent_errors(
        &self,
        min_severity: Option<Severity>,
        category: Option<ErrorCategory>,
        limit: u32,
    ) -> anyhow::Result<Vec<ErrorLog>> {
        let mut sql = String::from("SELECT * FROM error_log WHERE 1=1");
        let mut binds: Vec<Bind> = Vec::new();

        if let Some(min) = min_severity {
            // Severities sort by rank, not alphabetically.
            let allowed: Vec<String> = [
                Severity::Info,
                Severity::Warning,
                Severity::Error,
                Severity::Critical,
            ]
            .iter()
            .filter(|s| **s >= min)
            .map(|s| format!("'{}'", s.as_str()))
            .collect();
            sql.push_str(&format!(" AND severity IN ({})", allowed.join(", ")));
        }
        if let Some(cat) = category {
            sql.push_str(" AND category = ?");
            binds.push(Bind::Text(cat.as_str().to_string()));
        }

        sql.push_str(" ORDER BY id DESC LIMIT ?");
        binds.push(Bind::Int(limit as i64));

        let rows = bind_all(sqlx::query(&sql), &binds)
            .fetch_all(&self.pool)
            .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in &rows {
            entries.push(error_log_from_row(row)?);
        }
        Ok(entries)
    }

    // --- Background task claims ---

    async fn claim_task(&self, task_name: &str, stale_after_secs: i64) -> anyhow::Result<bool> {
        with_backoff("claim_task_insert", || async {
            sqlx::query("INSERT OR IGNORE INTO task_claims (task_name, claimed_at) VALUES (?, NULL)")
                .bind(task_name)
                .execute(&self.pool)
                .await
        })
        .await?;

        let now = Utc::now().to_rfc3339();
        let stale_cutoff = (Utc::now() - Duration::seconds(stale_after_secs)).to_rfc3339();

        let result = with_backoff("claim_task", || async {
            sqlx::query(
                "UPDATE task_claims SET claimed_at = ? \
                 WHERE task_name = ? AND (claimed_at IS NULL OR claimed_at < ?)",
            )
            .bind(&now)
            .bind(task_name)
            .bind(&stale_cutoff)
            .execute(&self.pool)
            .await
        })
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn release_task(
        &self,
        task_name: &str,
        claimed_at: DateTime<Utc>,
        outcome: TaskOutcome,
    ) -> anyhow::Result<()> {
        let claimed = claimed_at.to_rfc3339();
        let finished = Utc::now().to_rfc3339();

        with_backoff("release_task_clear", || async {
            sqlx::query("UPDATE task_claims SET claimed_at = NULL WHERE task_name = ?")
                .bind(task_name)
                .execute(&self.pool)
                .await
        })
        .await?;

        with_backoff("release_task_log", || async {
            sqlx::query(
                "INSERT INTO background_task_log (task_name, claimed_at, finished_at, outcome) \
                 VALUES (?, ?, ?, ?)",
            )
            .bind(task_name)
            .bind(&claimed)
            .bind(&finished)
            .bind(outcome.as_str())
            .execute(&self.pool)
            .await
        })
        .await?;

        Ok(())
    }

    async fn recent_task_runs(&self, limit: u32) -> anyhow::Result<Vec<BackgroundTaskLog>> {
        let rows = sqlx::query("SELECT * FROM background_task_log ORDER BY id DESC LIMIT ?")
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        let mut runs = Vec::with_capacity(rows.len());
        for row in &rows {
            runs.push(task_log_from_row(row)?);
        }
        Ok(runs)
    }
}
