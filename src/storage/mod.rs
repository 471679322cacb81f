// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Persistent store adapter: schema creation plus typed CRUD over the six
//! tables, serialized through a single process-wide exclusive lock so that
//! every handler observes a consistent snapshot within its critical section.

pub mod accounts;
pub mod detections;
pub mod lines;

use std::path::Path;

use parking_lot::Mutex;
use rusqlite::Connection;

use crate::error::{NvrError, Result};

/// Process-wide handle to the sqlite-backed store. Cheap to clone: the
/// `Mutex<Connection>` is the single serialization point for every call.
pub struct Store {
    conn: Mutex<Connection>,
}

pub const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS detections (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    image BLOB NOT NULL,
    timestamp TEXT NOT NULL DEFAULT (datetime('now'))
);
CREATE TABLE IF NOT EXISTS lines (
    indexNum INTEGER PRIMARY KEY,
    x1 INTEGER NOT NULL,
    y1 INTEGER NOT NULL,
    x2 INTEGER NOT NULL,
    y2 INTEGER NOT NULL,
    name TEXT NOT NULL UNIQUE,
    mode TEXT
);
CREATE TABLE IF NOT EXISTS baseLines (
    indexNum INTEGER PRIMARY KEY,
    matrixNum1 INTEGER NOT NULL,
    x1 INTEGER NOT NULL,
    y1 INTEGER NOT NULL,
    matrixNum2 INTEGER NOT NULL,
    x2 INTEGER NOT NULL,
    y2 INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS verticalLineEquations (
    indexNum INTEGER PRIMARY KEY,
    a REAL NOT NULL,
    b REAL NOT NULL
);
CREATE TABLE IF NOT EXISTS accounts (
    id TEXT PRIMARY KEY,
    passwd TEXT NOT NULL,
    otp_secret TEXT,
    use_otp INTEGER
);
CREATE TABLE IF NOT EXISTS recovery_codes (
    id TEXT REFERENCES accounts(id),
    code TEXT,
    used INTEGER DEFAULT 0
);
";

impl Store {
    /// Open (or create) the sqlite file at `db_file` and ensure every table
    /// exists. Schema creation runs under the same lock discipline as
    /// ordinary operations so a concurrent open during startup cannot race
    /// a handler.
    pub fn open(db_file: &Path) -> Result<Self> {
        let conn = Connection::open(db_file)
            .map_err(|e| NvrError::Store(format!("cannot open store: {e}")))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| NvrError::Store(format!("schema creation failed: {e}")))?;
        Ok(Store { conn: Mutex::new(conn) })
    }

    /// In-memory store, used by tests and by any caller that does not need
    /// the data to survive the process.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| NvrError::Store(format!("cannot open in-memory store: {e}")))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| NvrError::Store(format!("schema creation failed: {e}")))?;
        Ok(Store { conn: Mutex::new(conn) })
    }
}

pub(crate) fn map_sqlite_err(e: rusqlite::Error) -> NvrError {
    if let rusqlite::Error::SqliteFailure(ref ffi_err, _) = e {
        if ffi_err.code == rusqlite::ErrorCode::ConstraintViolation {
            return NvrError::StoreUnique(e.to_string());
        }
    }
    NvrError::Store(e.to_string())
}
