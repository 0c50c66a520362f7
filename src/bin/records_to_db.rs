//! Records To DB - JSONL to SQLite record store loader
//!
//! ## Usage
//!
//! ```bash
//! cargo run --release --bin records_to_db -- passive data/passive.jsonl data/passive.db
//! cargo run --release --bin records_to_db -- active data/scans.jsonl data/scans.db
//! ```

use reconview::sources::{
    init_source_schema, insert_observation, insert_scan, JsonlObservationReader, JsonlScanReader,
};
use reconview::sqlite_pragma::apply_optimized_pragmas;
use rusqlite::Connection;
use std::env;

const PROGRESS_EVERY: u64 = 10_000;

fn usage() -> Box<dyn std::error::Error> {
    "usage: records_to_db passive|active <in.jsonl> <out.db>".into()
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() != 4 {
        return Err(usage());
    }
    let (kind, input, output) = (args[1].as_str(), &args[2], &args[3]);

    let mut conn = Connection::open(output)?;
    apply_optimized_pragmas(&conn)?;
    init_source_schema(&conn)?;

    log::info!("📥 Loading {} records from {} into {}", kind, input, output);

    let mut inserted: u64 = 0;
    let tx = conn.transaction()?;
    match kind {
        "passive" => {
            for obs in JsonlObservationReader::open(input)? {
                insert_observation(&tx, &obs)?;
                inserted += 1;
                if inserted % PROGRESS_EVERY == 0 {
                    log::info!("   {} records", inserted);
                }
            }
        }
        "active" => {
            for scan in JsonlScanReader::open(input)? {
                insert_scan(&tx, &scan)?;
                inserted += 1;
                if inserted % PROGRESS_EVERY == 0 {
                    log::info!("   {} records", inserted);
                }
            }
        }
        _ => return Err(usage()),
    }
    tx.commit()?;

    log::info!("✅ Inserted {} records", inserted);
    Ok(())
}
