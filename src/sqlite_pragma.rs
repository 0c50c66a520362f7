//! Shared SQLite connection tuning for source readers and the view writer

use rusqlite::Connection;

/// WAL journal, NORMAL sync, in-memory temp store, 256 MiB mmap,
/// 64 MiB page cache and a 1000-page autocheckpoint.
pub fn apply_optimized_pragmas(conn: &Connection) -> rusqlite::Result<()> {
    let journal_mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    if !journal_mode.eq_ignore_ascii_case("wal") {
        log::warn!("⚠️  SQLite journal_mode is {} (WAL unavailable)", journal_mode);
    }
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "temp_store", "MEMORY")?;
    conn.pragma_update_and_check(None, "mmap_size", 268_435_456i64, |row| row.get::<_, i64>(0))?;
    conn.pragma_update(None, "cache_size", -65_536i64)?;
    conn.pragma_update_and_check(None, "wal_autocheckpoint", 1000i64, |row| row.get::<_, i64>(0))?;
    Ok(())
}
