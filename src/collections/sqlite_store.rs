use super::{CollectionId, CollectionStatus, CollectionStore, MembershipDelta, SmartCollection};
use crate::catalog::{SongId, UserId};
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde_json::Value as JsonValue;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;

pub struct SqliteCollectionStore {
    conn: Mutex<Connection>,
}

const DB_VERSION: i32 = 1;

const TABLE_COLLECTION: &str = "smart_collection";
const TABLE_MEMBERSHIP: &str = "collection_song";

const SCHEMA_TABLES: &[&str] = &[
    "CREATE TABLE smart_collection (id TEXT NOT NULL UNIQUE, owner TEXT NOT NULL, rules TEXT NOT NULL, last_refreshed_at INTEGER, pending INTEGER NOT NULL DEFAULT 0, retry_count INTEGER NOT NULL DEFAULT 0, status TEXT NOT NULL DEFAULT 'healthy', PRIMARY KEY (id));",
    "CREATE TABLE collection_song (collection_id TEXT NOT NULL, song_id TEXT NOT NULL, PRIMARY KEY (collection_id, song_id), CONSTRAINT collection_id FOREIGN KEY (collection_id) REFERENCES smart_collection (id));",
    "CREATE INDEX collection_owner_index ON smart_collection (owner);",
    "CREATE INDEX collection_refreshed_index ON smart_collection (last_refreshed_at);",
];

impl SqliteCollectionStore {
    pub fn new<T: AsRef<Path>>(db_path: T) -> Result<Self> {
        let conn = if db_path.as_ref().exists() {
            Connection::open_with_flags(
                db_path,
                rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                    | rusqlite::OpenFlags::SQLITE_OPEN_URI
                    | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?
        } else {
            let conn = Connection::open(db_path)?;
            Self::create_schema(&conn)?;
            conn
        };

        let version: i32 = conn
            .query_row("PRAGMA user_version;", [], |row| row.get(0))
            .context("Failed to read database version")?;

        match version {
            DB_VERSION => Self::validate_schema(&conn)?,
            _ => bail!("Unknown database version {}", version),
        }

        Ok(SqliteCollectionStore {
            conn: Mutex::new(conn),
        })
    }

    fn create_schema(conn: &Connection) -> Result<()> {
        conn.execute("PRAGMA foreign_keys = ON;", [])?;
        for table in SCHEMA_TABLES {
            conn.execute(table, [])?;
        }
        conn.execute(&format!("PRAGMA user_version = {}", DB_VERSION), [])?;
        Ok(())
    }

    fn validate_schema(conn: &Connection) -> Result<()> {
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({});", TABLE_COLLECTION))?;
        let columns: Vec<String> = stmt
            .query_map([], |row| row.get(1))?
            .collect::<Result<_, _>>()?;
        if columns
            != [
                "id",
                "owner",
                "rules",
                "last_refreshed_at",
                "pending",
                "retry_count",
                "status",
            ]
        {
            bail!(
                "Schema validation failed for {} table, found {:?}",
                TABLE_COLLECTION,
                columns
            );
        }

        let mut stmt = conn.prepare(&format!("PRAGMA table_info({});", TABLE_MEMBERSHIP))?;
        let columns: Vec<String> = stmt
            .query_map([], |row| row.get(1))?
            .collect::<Result<_, _>>()?;
        if columns != ["collection_id", "song_id"] {
            bail!(
                "Schema validation failed for {} table, found {:?}",
                TABLE_MEMBERSHIP,
                columns
            );
        }

        Ok(())
    }
}

struct CollectionRow {
    id: String,
    owner: String,
    rules: String,
    last_refreshed_at: Option<i64>,
    pending: i64,
    retry_count: i64,
    status: String,
}

const COLLECTION_COLUMNS: &str =
    "id, owner, rules, last_refreshed_at, pending, retry_count, status";

fn read_row(row: &rusqlite::Row) -> rusqlite::Result<CollectionRow> {
    Ok(CollectionRow {
        id: row.get(0)?,
        owner: row.get(1)?,
        rules: row.get(2)?,
        last_refreshed_at: row.get(3)?,
        pending: row.get(4)?,
        retry_count: row.get(5)?,
        status: row.get(6)?,
    })
}

fn into_collection(row: CollectionRow) -> Result<SmartCollection> {
    let rules: JsonValue = serde_json::from_str(&row.rules)
        .with_context(|| format!("Stored rules for {} are not valid JSON", row.id))?;
    let last_refreshed_at = match row.last_refreshed_at {
        Some(secs) => Some(
            DateTime::from_timestamp(secs, 0)
                .with_context(|| format!("Bad refresh timestamp {} for {}", secs, row.id))?,
        ),
        None => None,
    };
    let status = CollectionStatus::parse(&row.status)
        .with_context(|| format!("Unknown status {} for {}", row.status, row.id))?;
    Ok(SmartCollection {
        id: row.id,
        owner: row.owner,
        rules,
        last_refreshed_at,
        pending: row.pending != 0,
        retry_count: row.retry_count as u32,
        status,
    })
}

impl CollectionStore for SqliteCollectionStore {
    fn create_collection(&self, owner: &UserId, rules: &JsonValue) -> Result<SmartCollection> {
        let id: CollectionId = uuid::Uuid::new_v4().to_string();
        let serialized = serde_json::to_string(rules)?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            &format!(
                "INSERT INTO {} (id, owner, rules) VALUES (?1, ?2, ?3)",
                TABLE_COLLECTION
            ),
            params![id, owner, serialized],
        )
        .with_context(|| format!("Failed to create collection for {}", owner))?;
        Ok(SmartCollection {
            id,
            owner: owner.clone(),
            rules: rules.clone(),
            last_refreshed_at: None,
            pending: false,
            retry_count: 0,
            status: CollectionStatus::Healthy,
        })
    }

    fn get_collection(&self, id: &CollectionId) -> Result<Option<SmartCollection>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM {} WHERE id = ?1",
            COLLECTION_COLUMNS, TABLE_COLLECTION
        ))?;
        let mut rows = stmt.query_map(params![id], read_row)?;
        match rows.next() {
            Some(row) => Ok(Some(into_collection(row?)?)),
            None => Ok(None),
        }
    }

    fn list_collections(&self) -> Result<Vec<SmartCollection>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM {}",
            COLLECTION_COLUMNS, TABLE_COLLECTION
        ))?;
        let rows: Vec<CollectionRow> = stmt
            .query_map([], read_row)?
            .collect::<Result<_, _>>()?;
        rows.into_iter().map(into_collection).collect()
    }

    fn set_rules(&self, id: &CollectionId, rules: &JsonValue) -> Result<()> {
        let serialized = serde_json::to_string(rules)?;
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            &format!("UPDATE {} SET rules = ?1 WHERE id = ?2", TABLE_COLLECTION),
            params![serialized, id],
        )?;
        if updated == 0 {
            bail!("Collection {} not found", id);
        }
        Ok(())
    }

    fn get_membership(&self, id: &CollectionId) -> Result<HashSet<SongId>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT song_id FROM {} WHERE collection_id = ?1",
            TABLE_MEMBERSHIP
        ))?;
        let songs = stmt
            .query_map(params![id], |row| row.get(0))?
            .collect::<Result<_, _>>()?;
        Ok(songs)
    }

    fn set_pending(&self, id: &CollectionId, pending: bool) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            &format!("UPDATE {} SET pending = ?1 WHERE id = ?2", TABLE_COLLECTION),
            params![pending as i64, id],
        )?;
        if updated == 0 {
            bail!("Collection {} not found", id);
        }
        Ok(())
    }

    fn apply_refresh(
        &self,
        id: &CollectionId,
        delta: &MembershipDelta,
        refreshed_at: DateTime<Utc>,
        clear_pending: bool,
    ) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        for song_id in &delta.added {
            tx.execute(
                &format!(
                    "INSERT OR IGNORE INTO {} (collection_id, song_id) VALUES (?1, ?2)",
                    TABLE_MEMBERSHIP
                ),
                params![id, song_id],
            )?;
        }
        for song_id in &delta.removed {
            tx.execute(
                &format!(
                    "DELETE FROM {} WHERE collection_id = ?1 AND song_id = ?2",
                    TABLE_MEMBERSHIP
                ),
                params![id, song_id],
            )?;
        }
        let updated = tx.execute(
            &format!(
                "UPDATE {} SET last_refreshed_at = ?1, retry_count = 0, status = ?2, pending = CASE WHEN ?3 THEN 0 ELSE pending END WHERE id = ?4",
                TABLE_COLLECTION
            ),
            params![
                refreshed_at.timestamp(),
                CollectionStatus::Healthy.as_str(),
                clear_pending,
                id
            ],
        )?;
        if updated == 0 {
            bail!("Collection {} not found", id);
        }
        tx.commit()?;
        Ok(())
    }

    fn record_failure(&self, id: &CollectionId) -> Result<u32> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            &format!(
                "UPDATE {} SET retry_count = retry_count + 1 WHERE id = ?1",
                TABLE_COLLECTION
            ),
            params![id],
        )?;
        if updated == 0 {
            bail!("Collection {} not found", id);
        }
        let count: i64 = conn.query_row(
            &format!("SELECT retry_count FROM {} WHERE id = ?1", TABLE_COLLECTION),
            params![id],
            |row| row.get(0),
        )?;
        Ok(count as u32)
    }

    fn mark_stale_error(&self, id: &CollectionId) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            &format!(
                "UPDATE {} SET status = ?1, pending = 0 WHERE id = ?2",
                TABLE_COLLECTION
            ),
            params![CollectionStatus::StaleError.as_str(), id],
        )?;
        if updated == 0 {
            bail!("Collection {} not found", id);
        }
        Ok(())
    }

    fn list_stale(&self, older_than: DateTime<Utc>) -> Result<Vec<SmartCollection>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM {} WHERE last_refreshed_at IS NULL OR last_refreshed_at < ?1",
            COLLECTION_COLUMNS, TABLE_COLLECTION
        ))?;
        let rows: Vec<CollectionRow> = stmt
            .query_map(params![older_than.timestamp()], read_row)?
            .collect::<Result<_, _>>()?;
        rows.into_iter().map(into_collection).collect()
    }
}
