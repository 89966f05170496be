//! SQLite schemas for the write queue and the image cache
//!
//! Each store lives in its own database file so that capping the image
//! cache never starves the queue. The schema version is kept in
//! `PRAGMA user_version`.

use rusqlite::{Connection, Result};

/// Current schema version for migrations
pub const SCHEMA_VERSION: i32 = 1;

const QUEUE_SCHEMA: &str = r#"
    -- Pending remote operations, replayed in id order
    CREATE TABLE IF NOT EXISTS sync_queue (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        action TEXT NOT NULL,
        user_id TEXT NOT NULL,
        data TEXT,
        enqueued_at INTEGER NOT NULL
    );
"#;

const IMAGE_SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS images (
        key TEXT PRIMARY KEY,
        value BLOB NOT NULL,
        inserted_at INTEGER NOT NULL
    );

    -- Eviction walks entries oldest first
    CREATE INDEX IF NOT EXISTS idx_images_inserted_at ON images(inserted_at);
"#;

/// Initialize the write queue schema
pub fn init_queue_schema(conn: &Connection) -> Result<()> {
    apply(conn, QUEUE_SCHEMA)
}

/// Initialize the image cache schema
pub fn init_image_schema(conn: &Connection) -> Result<()> {
    apply(conn, IMAGE_SCHEMA)
}

fn apply(conn: &Connection, ddl: &str) -> Result<()> {
    conn.execute_batch(ddl)?;
    conn.pragma_update(None, "user_version", SCHEMA_VERSION)
}

/// Schema version stamped on the database; 0 for a fresh file
pub fn schema_version(conn: &Connection) -> Result<i32> {
    conn.pragma_query_value(None, "user_version", |row| row.get(0))
}

/// Whether the database predates [`SCHEMA_VERSION`]
pub fn needs_init(conn: &Connection) -> bool {
    schema_version(conn).map_or(true, |v| v < SCHEMA_VERSION)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(conn: &Connection, kind: &str) -> Vec<String> {
        conn.prepare("SELECT name FROM sqlite_master WHERE type = ?1 ORDER BY name")
            .unwrap()
            .query_map([kind], |row| row.get(0))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect()
    }

    #[test]
    fn test_fresh_database_needs_init() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(schema_version(&conn).unwrap(), 0);
        assert!(needs_init(&conn));
    }

    #[test]
    fn test_queue_schema() {
        let conn = Connection::open_in_memory().unwrap();
        init_queue_schema(&conn).unwrap();

        assert!(names(&conn, "table").contains(&"sync_queue".to_string()));
        assert_eq!(schema_version(&conn).unwrap(), SCHEMA_VERSION);
        assert!(!needs_init(&conn));
    }

    #[test]
    fn test_image_schema() {
        let conn = Connection::open_in_memory().unwrap();
        init_image_schema(&conn).unwrap();

        assert!(names(&conn, "table").contains(&"images".to_string()));
        assert!(names(&conn, "index").contains(&"idx_images_inserted_at".to_string()));
        assert!(!needs_init(&conn));
    }

    #[test]
    fn test_reinit_keeps_rows() {
        let conn = Connection::open_in_memory().unwrap();
        init_queue_schema(&conn).unwrap();
        conn.execute(
            "INSERT INTO sync_queue (action, user_id, data, enqueued_at) VALUES ('DELETE', 'u', NULL, 0)",
            [],
        )
        .unwrap();

        init_queue_schema(&conn).unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM sync_queue", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }
}
