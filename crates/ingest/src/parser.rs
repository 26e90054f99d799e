use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::Path;

use log::debug;
use rusqlite::{Connection, OpenFlags};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use usage_core::Event;

use crate::message::RawMessage;

/// Canonical output of one parsed source.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedSource {
    pub events: Vec<Event>,
    pub affected_session_ids: BTreeSet<String>,
}

impl ParsedSource {
    pub fn from_events(events: Vec<Event>) -> Self {
        let affected_session_ids = events.iter().map(|e| e.session_id.clone()).collect();
        Self {
            events,
            affected_session_ids,
        }
    }
}

#[derive(Debug)]
pub enum ParseError {
    Io(io::Error),
    Malformed(String),
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "io error: {}", err),
            Self::Malformed(message) => write!(f, "malformed source: {}", message),
        }
    }
}

impl std::error::Error for ParseError {}

impl From<io::Error> for ParseError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

/// Turns one source of a tool into canonical events. The pipeline never
/// looks at the wire format.
pub trait Parser: Send + Sync {
    fn parse(&self, path: &Path) -> Result<ParsedSource, ParseError>;

    /// Content fingerprint used for change detection; SHA-256 of the bytes
    /// unless a parser has something cheaper.
    fn fingerprint(&self, path: &Path) -> io::Result<String> {
        let bytes = fs::read(path)?;
        Ok(sha256_hex(&bytes))
    }
}

pub(crate) fn hex_digest(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(&mut out, "{:02x}", byte);
    }
    out
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex_digest(&Sha256::digest(bytes))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum MessageFile {
    Many(Vec<RawMessage>),
    One(Box<RawMessage>),
}

/// JSON file holding one message object or an array of them.
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageFileParser;

impl Parser for MessageFileParser {
    fn parse(&self, path: &Path) -> Result<ParsedSource, ParseError> {
        let bytes = fs::read(path)?;
        let file: MessageFile = serde_json::from_slice(&bytes)
            .map_err(|err| ParseError::Malformed(err.to_string()))?;
        let raw = match file {
            MessageFile::Many(messages) => messages,
            MessageFile::One(message) => vec![*message],
        };
        let total = raw.len();
        let events: Vec<Event> = raw.into_iter().filter_map(RawMessage::into_event).collect();
        if events.len() < total {
            debug!(
                "{}: dropped {} incomplete messages",
                path.display(),
                total - events.len()
            );
        }
        Ok(ParsedSource::from_events(events))
    }
}

/// Embedded SQLite store with a `message(id, session_id, time_created, data)`
/// table, one JSON message per row.
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageDbParser;

fn open_read_only(path: &Path) -> rusqlite::Result<Connection> {
    Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
}

fn malformed(err: rusqlite::Error) -> ParseError {
    ParseError::Malformed(err.to_string())
}

impl Parser for MessageDbParser {
    fn parse(&self, path: &Path) -> Result<ParsedSource, ParseError> {
        if !path.is_file() {
            return Err(ParseError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} not found", path.display()),
            )));
        }
        let conn = open_read_only(path).map_err(malformed)?;
        let mut stmt = conn
            .prepare("SELECT id, session_id, time_created, data FROM message ORDER BY time_created, id")
            .map_err(malformed)?;
        let mut rows = stmt.query([]).map_err(malformed)?;
        let mut events = Vec::new();
        let mut dropped = 0usize;
        while let Some(row) = rows.next().map_err(malformed)? {
            let id: Option<String> = row.get(0).map_err(malformed)?;
            let session_id: Option<String> = row.get(1).map_err(malformed)?;
            let created_at: Option<i64> = row.get(2).map_err(malformed)?;
            let data: Option<String> = row.get(3).map_err(malformed)?;
            let raw = data
                .as_deref()
                .and_then(|json| serde_json::from_str::<RawMessage>(json).ok())
                .unwrap_or_default();
            match raw
                .with_fallbacks(id.as_deref(), session_id.as_deref(), created_at)
                .into_event()
            {
                Some(event) => events.push(event),
                None => dropped += 1,
            }
        }
        if dropped > 0 {
            debug!("{}: dropped {} incomplete rows", path.display(), dropped);
        }
        Ok(ParsedSource::from_events(events))
    }

    /// Row count plus newest creation time; avoids hashing a large database.
    fn fingerprint(&self, path: &Path) -> io::Result<String> {
        if !path.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} not found", path.display()),
            ));
        }
        let watermark = open_read_only(path).and_then(|conn| {
            conn.query_row(
                "SELECT COUNT(*), COALESCE(MAX(time_created), 0) FROM message",
                [],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
            )
        });
        match watermark {
            Ok((rows, max_created)) => Ok(format!("rows:{}:max:{}", rows, max_created)),
            Err(err) => Err(io::Error::other(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_parser_accepts_object_or_array() {
        let dir = tempfile::tempdir().expect("temp dir");
        let single = dir.path().join("one.json");
        fs::write(
            &single,
            r#"{"id": "m1", "sessionID": "s1", "role": "user", "time": {"created": 10}}"#,
        )
        .expect("write");
        let many = dir.path().join("many.json");
        fs::write(
            &many,
            r#"[{"id": "m1", "sessionID": "s1", "role": "user", "time": {"created": 10}},
                {"id": "m2", "sessionID": "s2", "role": "assistant", "time": {"created": 11}},
                {"id": "m3"}]"#,
        )
        .expect("write");

        let parsed = MessageFileParser.parse(&single).expect("single");
        assert_eq!(parsed.events.len(), 1);
        let parsed = MessageFileParser.parse(&many).expect("many");
        assert_eq!(parsed.events.len(), 2);
        assert_eq!(parsed.affected_session_ids.len(), 2);
    }

    #[test]
    fn file_parser_rejects_non_json() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("bad.json");
        fs::write(&path, "{not json").expect("write");
        assert!(matches!(
            MessageFileParser.parse(&path),
            Err(ParseError::Malformed(_))
        ));
        assert!(matches!(
            MessageFileParser.parse(&dir.path().join("missing.json")),
            Err(ParseError::Io(_))
        ));
    }

    #[test]
    fn default_fingerprint_follows_content() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("a.json");
        fs::write(&path, "[]").expect("write");
        let first = MessageFileParser.fingerprint(&path).expect("hash");
        assert_eq!(first, sha256_hex(b"[]"));
        fs::write(&path, "[ ]").expect("rewrite");
        assert_ne!(MessageFileParser.fingerprint(&path).expect("hash"), first);
    }

    #[test]
    fn db_parser_reads_rows_and_watermark() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("store.db");
        let conn = Connection::open(&path).expect("open");
        conn.execute_batch(
            r#"
            CREATE TABLE message (id TEXT, session_id TEXT, time_created INTEGER, data TEXT);
            INSERT INTO message VALUES
              ('m1', 's1', 100, '{"role": "user"}'),
              ('m2', 's1', 200, '{"role": "assistant", "tokens": {"input": 5}}'),
              ('m3', 's1', 300, 'not json');
            "#,
        )
        .expect("seed");
        drop(conn);

        let parsed = MessageDbParser.parse(&path).expect("parse");
        assert_eq!(parsed.events.len(), 2);
        assert_eq!(parsed.events[1].created_at, 200);
        assert_eq!(parsed.events[1].tokens.input, Some(5));
        assert_eq!(
            MessageDbParser.fingerprint(&path).expect("fingerprint"),
            "rows:3:max:300"
        );
    }
}
