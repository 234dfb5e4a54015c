//! SQLite-backed document store.
//!
//! One table per (database, collection) pair, named `database__collection`
//! after sanitizing. Rows are keyed by the document's datetime at
//! microsecond precision; upserts replace the whole row.
//!
//! Each instance owns its own connection. The engine opens one instance
//! for the write pipeline and a second one for hydration reads, so reads
//! never queue behind writes; WAL mode lets the two coexist on one file.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags};
use tracing::info;

use crate::storage::docs::{KlineDocument, TickDocument};
use crate::storage::DocumentStore;

const STORE_PRAGMAS: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA temp_store = MEMORY;
"#;

pub struct SqliteDocumentStore {
    conn: Mutex<Connection>,
    /// Tables already created on this connection, to skip the DDL.
    known_tables: Mutex<HashSet<String>>,
}

impl SqliteDocumentStore {
    /// Open or create a store file.
    pub fn open(db_path: &str) -> Result<Self> {
        let path = Path::new(db_path);
        if let Some(parent) = path.parent() {
            if !parent.exists() && !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(db_path, flags)
            .with_context(|| format!("Failed to open kline store: {}", db_path))?;
        conn.execute_batch(STORE_PRAGMAS)?;

        info!(path = %db_path, "kline document store opened");

        Ok(SqliteDocumentStore {
            conn: Mutex::new(conn),
            known_tables: Mutex::new(HashSet::new()),
        })
    }

    /// In-memory store (for testing).
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA temp_store = MEMORY;")?;
        Ok(SqliteDocumentStore {
            conn: Mutex::new(conn),
            known_tables: Mutex::new(HashSet::new()),
        })
    }

    fn ensure_tick_table(&self, conn: &Connection, table: &str) -> Result<()> {
        if self.known_tables.lock().contains(table) {
            return Ok(());
        }
        conn.execute_batch(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS "{table}" (
                datetime_us INTEGER PRIMARY KEY,
                symbol TEXT NOT NULL,
                exchange TEXT NOT NULL,
                vt_symbol TEXT NOT NULL,
                date TEXT NOT NULL,
                time TEXT NOT NULL,
                last_price REAL NOT NULL,
                volume INTEGER NOT NULL,
                last_volume INTEGER NOT NULL
            );
            "#
        ))?;
        self.known_tables.lock().insert(table.to_string());
        Ok(())
    }

    fn ensure_kline_table(&self, conn: &Connection, table: &str) -> Result<()> {
        if self.known_tables.lock().contains(table) {
            return Ok(());
        }
        conn.execute_batch(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS "{table}" (
                datetime_us INTEGER PRIMARY KEY,
                symbol TEXT NOT NULL,
                vt_symbol TEXT NOT NULL,
                date TEXT NOT NULL,
                time TEXT NOT NULL,
                open REAL NOT NULL,
                high REAL NOT NULL,
                low REAL NOT NULL,
                close REAL NOT NULL,
                volume INTEGER NOT NULL,
                open_datetime_us INTEGER,
                close_datetime_us INTEGER
            );
            CREATE INDEX IF NOT EXISTS "idx_{table}_date_time" ON "{table}"(date DESC, time DESC);
            "#
        ))?;
        self.known_tables.lock().insert(table.to_string());
        Ok(())
    }
}

impl DocumentStore for SqliteDocumentStore {
    fn upsert_tick(&self, database: &str, collection: &str, tick: &TickDocument) -> Result<()> {
        let table = table_name(database, collection);
        let conn = self.conn.lock();
        self.ensure_tick_table(&conn, &table)?;
        conn.execute(
            &format!(
                r#"
                INSERT INTO "{table}" (
                    datetime_us, symbol, exchange, vt_symbol, date, time,
                    last_price, volume, last_volume
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                ON CONFLICT(datetime_us) DO UPDATE SET
                    symbol = excluded.symbol,
                    exchange = excluded.exchange,
                    vt_symbol = excluded.vt_symbol,
                    date = excluded.date,
                    time = excluded.time,
                    last_price = excluded.last_price,
                    volume = excluded.volume,
                    last_volume = excluded.last_volume
                "#
            ),
            params![
                to_micros(tick.datetime)?,
                tick.symbol,
                tick.exchange,
                tick.vt_symbol,
                tick.date,
                tick.time,
                tick.last_price,
                tick.volume,
                tick.last_volume,
            ],
        )?;
        Ok(())
    }

    fn upsert_kline(&self, database: &str, collection: &str, kline: &KlineDocument) -> Result<()> {
        let table = table_name(database, collection);
        let conn = self.conn.lock();
        self.ensure_kline_table(&conn, &table)?;
        let open_us = kline.open_datetime.map(to_micros).transpose()?;
        let close_us = kline.close_datetime.map(to_micros).transpose()?;
        conn.execute(
            &format!(
                r#"
                INSERT INTO "{table}" (
                    datetime_us, symbol, vt_symbol, date, time,
                    open, high, low, close, volume,
                    open_datetime_us, close_datetime_us
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                ON CONFLICT(datetime_us) DO UPDATE SET
                    symbol = excluded.symbol,
                    vt_symbol = excluded.vt_symbol,
                    date = excluded.date,
                    time = excluded.time,
                    open = excluded.open,
                    high = excluded.high,
                    low = excluded.low,
                    close = excluded.close,
                    volume = excluded.volume,
                    open_datetime_us = excluded.open_datetime_us,
                    close_datetime_us = excluded.close_datetime_us
                "#
            ),
            params![
                to_micros(kline.datetime)?,
                kline.symbol,
                kline.vt_symbol,
                kline.date,
                kline.time,
                kline.open,
                kline.high,
                kline.low,
                kline.close,
                kline.volume,
                open_us,
                close_us,
            ],
        )?;
        Ok(())
    }

    fn find_last_klines(
        &self,
        database: &str,
        collection: &str,
        count: usize,
        before: NaiveDateTime,
    ) -> Result<Vec<KlineDocument>> {
        let table = table_name(database, collection);
        let conn = self.conn.lock();
        self.ensure_kline_table(&conn, &table)?;
        let mut stmt = conn.prepare(&format!(
            r#"
            SELECT datetime_us, symbol, vt_symbol, date, time,
                   open, high, low, close, volume,
                   open_datetime_us, close_datetime_us
            FROM "{table}"
            WHERE datetime_us < ?1
            ORDER BY date DESC, time DESC
            LIMIT ?2
            "#
        ))?;

        let docs = stmt
            .query_map(params![to_micros(before)?, count as i64], |row| {
                Ok(RawKlineRow {
                    datetime_us: row.get(0)?,
                    symbol: row.get(1)?,
                    vt_symbol: row.get(2)?,
                    date: row.get(3)?,
                    time: row.get(4)?,
                    open: row.get(5)?,
                    high: row.get(6)?,
                    low: row.get(7)?,
                    close: row.get(8)?,
                    volume: row.get(9)?,
                    open_datetime_us: row.get(10)?,
                    close_datetime_us: row.get(11)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        docs.into_iter().map(RawKlineRow::into_document).collect()
    }
}

struct RawKlineRow {
    datetime_us: i64,
    symbol: String,
    vt_symbol: String,
    date: String,
    time: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: i64,
    open_datetime_us: Option<i64>,
    close_datetime_us: Option<i64>,
}

impl RawKlineRow {
    fn into_document(self) -> Result<KlineDocument> {
        Ok(KlineDocument {
            datetime: from_micros(self.datetime_us)?,
            symbol: self.symbol,
            vt_symbol: self.vt_symbol,
            date: self.date,
            time: self.time,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
            open_datetime: self.open_datetime_us.map(from_micros).transpose()?,
            close_datetime: self.close_datetime_us.map(from_micros).transpose()?,
        })
    }
}

/// `database__collection`, with anything outside `[A-Za-z0-9_]` replaced.
fn table_name(database: &str, collection: &str) -> String {
    let sanitize = |s: &str| {
        s.chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
            .collect::<String>()
    };
    format!("{}__{}", sanitize(database), sanitize(collection))
}

fn to_micros(dt: NaiveDateTime) -> Result<i64> {
    // Reject timestamps the microsecond key cannot represent round-trip.
    let us = dt.and_utc().timestamp_micros();
    if from_micros(us).map(|back| back == dt).unwrap_or(false) {
        Ok(us)
    } else {
        Err(anyhow::anyhow!("timestamp {} out of range for storage", dt))
    }
}

fn from_micros(us: i64) -> Result<NaiveDateTime> {
    DateTime::from_timestamp_micros(us)
        .map(|dt| dt.naive_utc())
        .context("invalid stored timestamp")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn doc_at(h: u32, m: u32) -> KlineDocument {
        let datetime = NaiveDate::from_ymd_opt(2024, 5, 17)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap();
        KlineDocument {
            symbol: "RB1810".into(),
            vt_symbol: "RB1810".into(),
            datetime,
            date: datetime.format("%Y%m%d").to_string(),
            time: datetime.format("%H:%M:%S").to_string(),
            open: 3500.0,
            high: 3510.0,
            low: 3495.0,
            close: 3505.0,
            volume: 1200,
            open_datetime: Some(datetime - chrono::Duration::minutes(60)),
            close_datetime: Some(datetime - chrono::Duration::seconds(1)),
        }
    }

    #[test]
    fn upsert_then_read_round_trips() {
        let store = SqliteDocumentStore::open_memory().unwrap();
        let doc = doc_at(22, 0);
        store.upsert_kline("VnTrader_60Min_Db", "RB1810", &doc).unwrap();

        let found = store
            .find_last_klines("VnTrader_60Min_Db", "RB1810", 5, doc.datetime + chrono::Duration::seconds(1))
            .unwrap();
        assert_eq!(found, vec![doc]);
    }

    #[test]
    fn upsert_replaces_by_datetime_key() {
        let store = SqliteDocumentStore::open_memory().unwrap();
        let mut doc = doc_at(22, 0);
        store.upsert_kline("VnTrader_60Min_Db", "RB1810", &doc).unwrap();
        doc.close = 3999.0;
        doc.volume = 2400;
        store.upsert_kline("VnTrader_60Min_Db", "RB1810", &doc).unwrap();

        let found = store
            .find_last_klines("VnTrader_60Min_Db", "RB1810", 5, doc.datetime + chrono::Duration::seconds(1))
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].close, 3999.0);
        assert_eq!(found[0].volume, 2400);
    }

    #[test]
    fn find_returns_newest_first_and_respects_cutoff() {
        let store = SqliteDocumentStore::open_memory().unwrap();
        for h in [21, 22, 23] {
            store
                .upsert_kline("VnTrader_60Min_Db", "RB1810", &doc_at(h, 0))
                .unwrap();
        }

        let before = NaiveDate::from_ymd_opt(2024, 5, 17)
            .unwrap()
            .and_hms_opt(23, 0, 0)
            .unwrap();
        let found = store
            .find_last_klines("VnTrader_60Min_Db", "RB1810", 10, before)
            .unwrap();
        let hours: Vec<u32> = found
            .iter()
            .map(|d| chrono::Timelike::hour(&d.datetime))
            .collect();
        // The 23:00 bar is excluded: the cutoff is strict.
        assert_eq!(hours, vec![22, 21]);
    }

    #[test]
    fn collections_and_databases_are_isolated() {
        let store = SqliteDocumentStore::open_memory().unwrap();
        store.upsert_kline("VnTrader_60Min_Db", "RB1810", &doc_at(22, 0)).unwrap();
        store.upsert_kline("VnTrader_1Min_Db", "RB1810", &doc_at(21, 0)).unwrap();
        store.upsert_kline("VnTrader_60Min_Db", "CU1811", &doc_at(21, 0)).unwrap();

        let far = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
        assert_eq!(
            store.find_last_klines("VnTrader_60Min_Db", "RB1810", 10, far).unwrap().len(),
            1
        );
        assert_eq!(
            store.find_last_klines("VnTrader_1Min_Db", "RB1810", 10, far).unwrap().len(),
            1
        );
    }

    #[test]
    fn tick_upsert_is_keyed_by_datetime() {
        let store = SqliteDocumentStore::open_memory().unwrap();
        let datetime = NaiveDate::from_ymd_opt(2024, 5, 17)
            .unwrap()
            .and_hms_opt(21, 0, 0)
            .unwrap();
        let mut tick = TickDocument {
            symbol: "RB1810".into(),
            exchange: "SHFE".into(),
            vt_symbol: "RB1810".into(),
            datetime,
            date: "20240517".into(),
            time: "21:00:00.000000".into(),
            last_price: 3500.0,
            volume: 100,
            last_volume: 0,
        };
        store.upsert_tick("VnTrader_Tick_Db", "RB1810", &tick).unwrap();
        tick.last_price = 3501.0;
        store.upsert_tick("VnTrader_Tick_Db", "RB1810", &tick).unwrap();

        let count: i64 = store
            .conn
            .lock()
            .query_row(
                "SELECT COUNT(*) FROM \"VnTrader_Tick_Db__RB1810\"",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("klines.db");
        let path = path.to_str().unwrap();

        {
            let store = SqliteDocumentStore::open(path).unwrap();
            store.upsert_kline("VnTrader_60Min_Db", "RB1810", &doc_at(22, 0)).unwrap();
        }

        let reopened = SqliteDocumentStore::open(path).unwrap();
        let far = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
        let found = reopened
            .find_last_klines("VnTrader_60Min_Db", "RB1810", 10, far)
            .unwrap();
        assert_eq!(found.len(), 1);
    }
}
