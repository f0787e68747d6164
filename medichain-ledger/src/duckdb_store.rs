//! DuckDB-backed block store.

use crate::block::{Block, GENESIS_HASH, NewBlock, format_timestamp};
use crate::error::{LedgerError, LedgerResult};
use crate::store::{BlockFilter, LedgerStore};
use chrono::{DateTime, Utc};
use duckdb::{Connection, params};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, error};

const SELECT_BLOCKS: &str = "SELECT id, doctor_id, patient_id, content_ref, data_hash, \
     previous_hash, hash_value, created_at FROM blocks";

/// Persists blocks in a `blocks` table keyed by a sequence-assigned id.
///
/// Clones share one connection and its mutex, so appends through any clone
/// are serialized against each other.
#[derive(Clone)]
pub struct DuckDbLedgerStore {
    conn: Arc<Mutex<Connection>>,
}

impl DuckDbLedgerStore {
    /// Opens or creates a ledger database at the given path.
    pub fn open(path: &Path) -> LedgerResult<Self> {
        let conn = open_duckdb(path, "128MB", 1)?;
        initialize_ledger_schema(&conn)?;
        debug!(path = %path.display(), "opened ledger store");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Opens an in-memory ledger database (for testing).
    pub fn open_in_memory() -> LedgerResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_ledger_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> LedgerResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| LedgerError::LockPoisoned)
    }

    fn query_blocks(
        &self,
        sql: &str,
        params: &[&dyn duckdb::ToSql],
    ) -> LedgerResult<Vec<Block>> {
        let conn = self.lock()?;
        query_blocks(&conn, sql, params)
    }
}

fn query_blocks(
    conn: &Connection,
    sql: &str,
    params: &[&dyn duckdb::ToSql],
) -> LedgerResult<Vec<Block>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, row_to_raw)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(RawBlock::into_block).collect()
}

fn tail_block(conn: &Connection) -> LedgerResult<Option<Block>> {
    let sql = format!("{SELECT_BLOCKS} ORDER BY id DESC LIMIT 1");
    Ok(query_blocks(conn, &sql, &[])?.pop())
}

impl LedgerStore for DuckDbLedgerStore {
    fn tail(&self) -> LedgerResult<Option<Block>> {
        let conn = self.lock()?;
        tail_block(&conn)
    }

    fn append_linked(&self, entry: NewBlock, timestamp: DateTime<Utc>) -> LedgerResult<Block> {
        let conn = self.lock()?;
        let previous_hash = match tail_block(&conn)? {
            Some(tail) => tail.hash_value,
            None => GENESIS_HASH.to_string(),
        };
        let block = entry.seal(previous_hash, timestamp);
        let id: i64 = conn.query_row(
            r#"
            INSERT INTO blocks (
                doctor_id, patient_id, content_ref, data_hash,
                previous_hash, hash_value, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
            params![
                block.doctor_id,
                block.patient_id,
                block.content_ref,
                block.data_hash,
                block.previous_hash,
                block.hash_value,
                format_timestamp(&block.timestamp),
            ],
            |row| row.get(0),
        )?;
        Ok(block.with_id(id))
    }

    fn list_ordered(&self) -> LedgerResult<Vec<Block>> {
        let sql = format!("{SELECT_BLOCKS} ORDER BY id");
        self.query_blocks(&sql, &[])
    }

    fn list_filtered(&self, filter: BlockFilter<'_>) -> LedgerResult<Vec<Block>> {
        let (column, value) = match filter {
            BlockFilter::Patient(v) => ("patient_id", v),
            BlockFilter::Doctor(v) => ("doctor_id", v),
            BlockFilter::ContentRef(v) => ("content_ref", v),
        };
        let sql = format!("{SELECT_BLOCKS} WHERE {column} = ? ORDER BY id");
        self.query_blocks(&sql, &[&value])
    }
}

struct RawBlock {
    id: i64,
    doctor_id: String,
    patient_id: String,
    content_ref: String,
    data_hash: String,
    previous_hash: String,
    hash_value: String,
    created_at: String,
}

impl RawBlock {
    fn into_block(self) -> LedgerResult<Block> {
        let timestamp = DateTime::parse_from_rfc3339(&self.created_at)
            .map_err(|e| LedgerError::Corrupt {
                id: self.id,
                reason: format!("unparseable timestamp {:?}: {e}", self.created_at),
            })?
            .with_timezone(&Utc);
        Ok(Block {
            id: self.id,
            doctor_id: self.doctor_id,
            patient_id: self.patient_id,
            content_ref: self.content_ref,
            data_hash: self.data_hash,
            previous_hash: self.previous_hash,
            hash_value: self.hash_value,
            timestamp,
        })
    }
}

fn row_to_raw(row: &duckdb::Row<'_>) -> duckdb::Result<RawBlock> {
    Ok(RawBlock {
        id: row.get(0)?,
        doctor_id: row.get(1)?,
        patient_id: row.get(2)?,
        content_ref: row.get(3)?,
        data_hash: row.get(4)?,
        previous_hash: row.get(5)?,
        hash_value: row.get(6)?,
        created_at: row.get(7)?,
    })
}

fn initialize_ledger_schema(conn: &Connection) -> LedgerResult<()> {
    conn.execute_batch(
        r#"
        CREATE SEQUENCE IF NOT EXISTS blocks_id_seq START 1;
        CREATE TABLE IF NOT EXISTS blocks (
            id BIGINT PRIMARY KEY DEFAULT nextval('blocks_id_seq'),
            doctor_id VARCHAR NOT NULL,
            patient_id VARCHAR NOT NULL,
            content_ref VARCHAR NOT NULL,
            data_hash VARCHAR NOT NULL,
            previous_hash VARCHAR NOT NULL,
            hash_value VARCHAR NOT NULL,
            created_at VARCHAR NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_blocks_patient ON blocks(patient_id);
        CREATE INDEX IF NOT EXISTS idx_blocks_doctor ON blocks(doctor_id);
        CREATE INDEX IF NOT EXISTS idx_blocks_content ON blocks(content_ref);
        "#,
    )?;
    Ok(())
}

/// Opens a DuckDB connection and caps memory and thread usage.
///
/// A failed open is returned as-is. A WAL next to the database may hold
/// committed blocks, so it is reported and left in place for the operator.
fn open_duckdb(path: &Path, memory_limit: &str, threads: u32) -> LedgerResult<Connection> {
    let conn = Connection::open(path).map_err(|err| {
        let wal_path = wal_path(path);
        if wal_path.exists() {
            error!(
                path = %path.display(),
                wal = %wal_path.display(),
                %err,
                "ledger open failed with a WAL present; leaving it untouched"
            );
        }
        LedgerError::from(err)
    })?;
    conn.execute_batch(&format!(
        "PRAGMA memory_limit='{memory_limit}'; PRAGMA threads={threads};"
    ))?;
    Ok(conn)
}

/// DuckDB keeps its WAL beside the database as `<file>.wal`.
fn wal_path(path: &Path) -> std::path::PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".wal");
    std::path::PathBuf::from(name)
}
