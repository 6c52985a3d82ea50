use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, Row};
use tidepool_types::{
    chain::ChainId,
    observation::{ExchangeRateSample, PoolObservation},
    serde_utils::u256_dec::parse_u256
};

use crate::StorageError;

const MIGRATIONS: &[&str] = &[
    // v1: base schema
    "CREATE TABLE IF NOT EXISTS pool_prices (
        id                 INTEGER PRIMARY KEY AUTOINCREMENT,
        timestamp          TEXT NOT NULL,
        chain_id           INTEGER NOT NULL,
        pool_address       TEXT NOT NULL,
        sqrt_price_x96     TEXT NOT NULL DEFAULT '0',
        tick               INTEGER NOT NULL DEFAULT 0,
        liquidity          TEXT NOT NULL DEFAULT '0',
        fee_growth_global0 TEXT NOT NULL DEFAULT '0',
        fee_growth_global1 TEXT NOT NULL DEFAULT '0'
    );
    CREATE INDEX IF NOT EXISTS idx_pool_prices_chain_ts ON pool_prices(chain_id, timestamp);
    CREATE TABLE IF NOT EXISTS exchange_rates (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        timestamp   TEXT NOT NULL,
        chain_id    INTEGER NOT NULL,
        usdc_output TEXT NOT NULL DEFAULT '0'
    );
    CREATE INDEX IF NOT EXISTS idx_exchange_rates_chain_ts ON exchange_rates(chain_id, timestamp);",
    // v2: pool fee tier, additive; rows from before the column read back as 0
    "ALTER TABLE pool_prices ADD COLUMN fee INTEGER NOT NULL DEFAULT 0;"
];

/// Append-only pool observations and exchange-rate samples, one row per
/// chain per collector tick. Written by the stats loop only.
pub struct TimeSeriesStore {
    conn: Mutex<Connection>
}

impl TimeSeriesStore {
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        Ok(Self { conn: crate::open_database(path, MIGRATIONS)? })
    }

    pub fn in_memory() -> Result<Self, StorageError> {
        Ok(Self { conn: crate::open_in_memory(MIGRATIONS)? })
    }

    pub fn insert_pool_price(&self, row: &PoolObservation) -> Result<(), StorageError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO pool_prices (timestamp, chain_id, pool_address, sqrt_price_x96, tick, \
             liquidity, fee, fee_growth_global0, fee_growth_global1)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                encode_ts(row.timestamp),
                row.chain_id,
                row.pool_address.to_string(),
                row.sqrt_price_x96.to_string(),
                row.tick,
                row.liquidity.to_string(),
                row.fee,
                row.fee_growth_global0.to_string(),
                row.fee_growth_global1.to_string()
            ]
        )?;
        Ok(())
    }

    pub fn insert_exchange_rate(&self, row: &ExchangeRateSample) -> Result<(), StorageError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO exchange_rates (timestamp, chain_id, usdc_output) VALUES (?1, ?2, ?3)",
            params![encode_ts(row.timestamp), row.chain_id, row.usdc_output.to_string()]
        )?;
        Ok(())
    }

    /// Observations for one chain inside `[min_ts, max_ts]`, ascending by
    /// time, the order the metrics engine consumes.
    pub fn get_pool_prices_for_chain(
        &self,
        chain: ChainId,
        min_ts: DateTime<Utc>,
        max_ts: Option<DateTime<Utc>>
    ) -> Result<Vec<PoolObservation>, StorageError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT * FROM pool_prices WHERE chain_id = ?1 AND timestamp >= ?2 AND timestamp <= \
             ?3 ORDER BY timestamp ASC"
        )?;
        let max = max_ts.map(encode_ts).unwrap_or_else(|| "9999".to_string());
        let rows = stmt.query_map(params![chain, encode_ts(min_ts), max], observation_from_row)?;
        rows.map(|row| row?).collect()
    }

    pub fn get_recent_pool_prices(&self, limit: usize) -> Result<Vec<PoolObservation>, StorageError> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT * FROM pool_prices ORDER BY timestamp DESC LIMIT ?1")?;
        let rows = stmt.query_map(params![limit], observation_from_row)?;
        rows.map(|row| row?).collect()
    }

    pub fn get_recent_rates(
        &self,
        chain: Option<ChainId>,
        limit: usize
    ) -> Result<Vec<ExchangeRateSample>, StorageError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT * FROM exchange_rates WHERE (?1 IS NULL OR chain_id = ?1) \
             ORDER BY timestamp DESC LIMIT ?2"
        )?;
        let rows = stmt.query_map(params![chain, limit], rate_from_row)?;
        rows.map(|row| row?).collect()
    }

    /// Drops rows older than `cutoff`. The metrics engine needs 25 h of
    /// history; callers should keep a margin on top of that.
    pub fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StorageError> {
        let conn = self.conn.lock();
        let cutoff = encode_ts(cutoff);
        let pools = conn.execute("DELETE FROM pool_prices WHERE timestamp < ?1", [&cutoff])?;
        let rates = conn.execute("DELETE FROM exchange_rates WHERE timestamp < ?1", [&cutoff])?;
        Ok(pools + rates)
    }
}

/// Fixed-width UTC RFC-3339 with milliseconds, so string ordering matches
/// time ordering.
fn encode_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn decode_ts(raw: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::Corrupt(format!("bad timestamp {raw:?}: {e}")))
}

fn observation_from_row(
    row: &Row<'_>
) -> Result<Result<PoolObservation, StorageError>, rusqlite::Error> {
    let ts_raw: String = row.get("timestamp")?;
    let address_raw: String = row.get("pool_address")?;
    let sqrt_price_raw: String = row.get("sqrt_price_x96")?;
    let liquidity_raw: String = row.get("liquidity")?;
    let g0_raw: String = row.get("fee_growth_global0")?;
    let g1_raw: String = row.get("fee_growth_global1")?;
    let chain_id: ChainId = row.get("chain_id")?;
    let tick: i32 = row.get("tick")?;
    let fee: u32 = row.get("fee")?;

    Ok((|| {
        Ok(PoolObservation {
            timestamp: decode_ts(&ts_raw)?,
            chain_id,
            pool_address: address_raw
                .parse()
                .map_err(|e| StorageError::Corrupt(format!("bad address {address_raw:?}: {e}")))?,
            sqrt_price_x96: parse_u256(&sqrt_price_raw).map_err(StorageError::Corrupt)?,
            tick,
            liquidity: liquidity_raw
                .parse()
                .map_err(|e| StorageError::Corrupt(format!("bad liquidity {liquidity_raw:?}: {e}")))?,
            fee,
            fee_growth_global0: parse_u256(&g0_raw).map_err(StorageError::Corrupt)?,
            fee_growth_global1: parse_u256(&g1_raw).map_err(StorageError::Corrupt)?
        })
    })())
}

fn rate_from_row(
    row: &Row<'_>
) -> Result<Result<ExchangeRateSample, StorageError>, rusqlite::Error> {
    let ts_raw: String = row.get("timestamp")?;
    let output_raw: String = row.get("usdc_output")?;
    let chain_id: ChainId = row.get("chain_id")?;

    Ok((|| {
        Ok(ExchangeRateSample {
            timestamp: decode_ts(&ts_raw)?,
            chain_id,
            usdc_output: parse_u256(&output_raw).map_err(StorageError::Corrupt)?
        })
    })())
}
