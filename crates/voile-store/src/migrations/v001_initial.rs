use rusqlite::Connection;

const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS identity (
    id         INTEGER PRIMARY KEY CHECK (id = 1),
    secret_hex TEXT NOT NULL,                 -- hex-encoded 32-byte x25519 secret
    public_hex TEXT NOT NULL,                 -- hex-encoded 32-byte x25519 public key
    created_at TEXT NOT NULL                  -- RFC 3339
);

CREATE TABLE IF NOT EXISTS room_keys (
    room_id  TEXT PRIMARY KEY NOT NULL,       -- UUID v4
    key_data TEXT NOT NULL                    -- hex(nonce || sealed 32-byte room key)
);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
