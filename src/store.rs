//! Durable SQLite store for requests, tokens, answers, and the event log.
//!
//! The store opens a single connection in WAL mode and serializes all
//! access behind a mutex. Every operation is short; contention is bounded
//! by the single-writer policy and is negligible next to waiter timeouts.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;

use crate::event::{Event, EventType};

/// Errors surfaced by store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Unique-constraint violation, e.g. a second answer for one request.
    #[error("row already exists")]
    Duplicate,

    /// An event row carries a type name this build does not know.
    #[error("unknown event type in log: {0}")]
    UnknownEventType(String),

    /// A request row carries a status label this build does not know.
    #[error("unknown request status: {0}")]
    UnknownStatus(String),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

impl StoreError {
    fn from_sqlite(err: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(e, _) = &err {
            if e.code == rusqlite::ErrorCode::ConstraintViolation {
                return Self::Duplicate;
            }
        }
        Self::Sqlite(err)
    }
}

/// Lifecycle status of a request.
///
/// Once a request reaches `Submitted`, `Expired`, or `NotifyFailed` its
/// status never changes again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    Created,
    Delivered,
    Submitted,
    Expired,
    NotifyFailed,
}

impl RequestStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Delivered => "delivered",
            Self::Submitted => "submitted",
            Self::Expired => "expired",
            Self::NotifyFailed => "notify_failed",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "created" => Some(Self::Created),
            "delivered" => Some(Self::Delivered),
            "submitted" => Some(Self::Submitted),
            "expired" => Some(Self::Expired),
            "notify_failed" => Some(Self::NotifyFailed),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Submitted | Self::Expired | Self::NotifyFailed)
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status and deadline of a request, as read back from the store.
#[derive(Debug, Clone, Copy)]
pub struct RequestState {
    pub status: RequestStatus,
    pub expires_at: DateTime<Utc>,
}

/// Fields the interaction page renders.
#[derive(Debug, Clone)]
pub struct DisplayFields {
    pub title: String,
    pub body: String,
    pub mcd: String,
}

/// SQLite-backed durable store.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Opens (or creates) the database at `path` and runs migrations.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<(), StoreError> {
        let conn = self.lock();
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS requests (
              request_id TEXT PRIMARY KEY,
              title TEXT NOT NULL,
              body TEXT NOT NULL,
              mcd TEXT NOT NULL,
              status TEXT NOT NULL,
              expires_at INTEGER NOT NULL,
              created_at INTEGER NOT NULL,
              updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS tokens (
              request_id TEXT NOT NULL,
              token_hash TEXT NOT NULL,
              expires_at INTEGER NOT NULL,
              created_at INTEGER NOT NULL,
              used_at INTEGER,
              PRIMARY KEY (request_id, token_hash)
            );

            CREATE TABLE IF NOT EXISTS answers (
              request_id TEXT PRIMARY KEY,
              action TEXT,
              text TEXT,
              created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS events (
              seq INTEGER PRIMARY KEY AUTOINCREMENT,
              request_id TEXT NOT NULL,
              event_id TEXT NOT NULL,
              type TEXT NOT NULL,
              payload_json TEXT NOT NULL,
              created_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_events_request_seq ON events(request_id, seq);
            "#,
        )?;
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        // A poisoned lock means a prior panic mid-statement; the connection
        // itself is still usable.
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn create_request(
        &self,
        request_id: &str,
        title: &str,
        body: &str,
        mcd: &str,
        status: RequestStatus,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let now = Utc::now().timestamp();
        self.lock()
            .execute(
                "INSERT INTO requests(request_id,title,body,mcd,status,expires_at,created_at,updated_at) \
                 VALUES(?1,?2,?3,?4,?5,?6,?7,?8)",
                params![
                    request_id,
                    title,
                    body,
                    mcd,
                    status.as_str(),
                    expires_at.timestamp(),
                    now,
                    now
                ],
            )
            .map_err(StoreError::from_sqlite)?;
        Ok(())
    }

    pub fn update_request_status(
        &self,
        request_id: &str,
        status: RequestStatus,
    ) -> Result<(), StoreError> {
        self.lock().execute(
            "UPDATE requests SET status=?1, updated_at=?2 WHERE request_id=?3",
            params![status.as_str(), Utc::now().timestamp(), request_id],
        )?;
        Ok(())
    }

    /// Returns the status and deadline of a request, or `None` if unknown.
    pub fn get_request_state(&self, request_id: &str) -> Result<Option<RequestState>, StoreError> {
        let row: Option<(String, i64)> = self
            .lock()
            .query_row(
                "SELECT status, expires_at FROM requests WHERE request_id=?1",
                params![request_id],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?;
        let Some((status, expires_at)) = row else {
            return Ok(None);
        };
        let status = RequestStatus::parse(&status).ok_or(StoreError::UnknownStatus(status))?;
        Ok(Some(RequestState {
            status,
            expires_at: DateTime::<Utc>::from_timestamp(expires_at, 0).unwrap_or_default(),
        }))
    }

    /// Title, body, and control description for the interaction page.
    pub fn read_request_display_fields(
        &self,
        request_id: &str,
    ) -> Result<Option<DisplayFields>, StoreError> {
        let row = self
            .lock()
            .query_row(
                "SELECT title, body, mcd FROM requests WHERE request_id=?1",
                params![request_id],
                |r| {
                    Ok(DisplayFields {
                        title: r.get(0)?,
                        body: r.get(1)?,
                        mcd: r.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    pub fn insert_token(
        &self,
        request_id: &str,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.lock()
            .execute(
                "INSERT INTO tokens(request_id,token_hash,expires_at,created_at) VALUES(?1,?2,?3,?4)",
                params![
                    request_id,
                    token_hash,
                    expires_at.timestamp(),
                    Utc::now().timestamp()
                ],
            )
            .map_err(StoreError::from_sqlite)?;
        Ok(())
    }

    pub fn mark_token_used(&self, request_id: &str, token_hash: &str) -> Result<(), StoreError> {
        self.lock().execute(
            "UPDATE tokens SET used_at=?1 WHERE request_id=?2 AND token_hash=?3",
            params![Utc::now().timestamp(), request_id, token_hash],
        )?;
        Ok(())
    }

    /// True when a matching token row exists and its deadline has not passed.
    ///
    /// The caller layers the request-status check on top; this only checks
    /// the row itself.
    pub fn verify_token(&self, request_id: &str, token_hash: &str) -> Result<bool, StoreError> {
        let expires_at: Option<i64> = self
            .lock()
            .query_row(
                "SELECT expires_at FROM tokens WHERE request_id=?1 AND token_hash=?2",
                params![request_id, token_hash],
                |r| r.get(0),
            )
            .optional()?;
        Ok(match expires_at {
            Some(expires_at) => Utc::now().timestamp() <= expires_at,
            None => false,
        })
    }

    /// Records the one permitted answer.
    ///
    /// Returns [`StoreError::Duplicate`] on the second attempt for the same
    /// request; callers treat that as "already submitted".
    pub fn insert_answer(
        &self,
        request_id: &str,
        action: &str,
        text: &str,
    ) -> Result<(), StoreError> {
        self.lock()
            .execute(
                "INSERT INTO answers(request_id,action,text,created_at) VALUES(?1,?2,?3,?4)",
                params![
                    request_id,
                    null_if_blank(action),
                    null_if_blank(text),
                    Utc::now().timestamp()
                ],
            )
            .map_err(StoreError::from_sqlite)?;
        Ok(())
    }

    pub fn has_answer(&self, request_id: &str) -> Result<bool, StoreError> {
        let found: Option<i64> = self
            .lock()
            .query_row(
                "SELECT 1 FROM answers WHERE request_id=?1",
                params![request_id],
                |r| r.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Appends an event to the log. Heartbeats are never persisted.
    pub fn insert_event(&self, event: &Event) -> Result<(), StoreError> {
        debug_assert_ne!(event.event_type, EventType::Heartbeat);
        let payload = serde_json::to_string(&event.data).unwrap_or_else(|_| "{}".to_string());
        self.lock().execute(
            "INSERT INTO events(request_id,event_id,type,payload_json,created_at) VALUES(?1,?2,?3,?4,?5)",
            params![
                event.request_id,
                event.id,
                event.event_type.as_str(),
                payload,
                Utc::now().timestamp()
            ],
        )?;
        Ok(())
    }

    /// Lists events for a request in `seq` order.
    ///
    /// With an empty cursor, all events are returned. With a cursor, only
    /// events strictly after the event whose id equals the cursor are
    /// returned; an unknown cursor yields an empty result.
    pub fn list_events_after(
        &self,
        request_id: &str,
        after_event_id: Option<&str>,
    ) -> Result<Vec<Event>, StoreError> {
        let conn = self.lock();
        let mut out = Vec::new();
        let mut push = |row: (String, String, String)| -> Result<(), StoreError> {
            let (event_id, type_name, payload) = row;
            let event_type = EventType::parse(&type_name)
                .ok_or_else(|| StoreError::UnknownEventType(type_name))?;
            out.push(Event {
                id: event_id,
                event_type,
                request_id: request_id.to_string(),
                data: serde_json::from_str(&payload).unwrap_or(serde_json::Value::Null),
            });
            Ok(())
        };

        match after_event_id.map(str::trim).filter(|c| !c.is_empty()) {
            None => {
                let mut stmt = conn.prepare(
                    "SELECT event_id, type, payload_json FROM events \
                     WHERE request_id=?1 ORDER BY seq ASC",
                )?;
                let rows = stmt.query_map(params![request_id], |r| {
                    Ok((r.get(0)?, r.get(1)?, r.get(2)?))
                })?;
                for row in rows {
                    push(row?)?;
                }
            }
            Some(cursor) => {
                let mut stmt = conn.prepare(
                    "SELECT e.event_id, e.type, e.payload_json FROM events e \
                     JOIN events a ON a.request_id=e.request_id AND a.event_id=?1 \
                     WHERE e.request_id=?2 AND e.seq > a.seq ORDER BY e.seq ASC",
                )?;
                let rows = stmt.query_map(params![cursor, request_id], |r| {
                    Ok((r.get(0)?, r.get(1)?, r.get(2)?))
                })?;
                for row in rows {
                    push(row?)?;
                }
            }
        }
        Ok(out)
    }

    /// The most recent event of any of the given types, if one exists.
    pub fn latest_event_of_types(
        &self,
        request_id: &str,
        types: &[EventType],
    ) -> Result<Option<Event>, StoreError> {
        if types.is_empty() {
            return Ok(None);
        }
        let placeholders = (0..types.len())
            .map(|i| format!("?{}", i + 2))
            .collect::<Vec<_>>()
            .join(",");
        let sql = format!(
            "SELECT event_id, type, payload_json FROM events \
             WHERE request_id=?1 AND type IN ({placeholders}) ORDER BY seq DESC LIMIT 1"
        );
        let conn = self.lock();
        let mut stmt = conn.prepare(&sql)?;
        let mut args: Vec<&dyn rusqlite::ToSql> = vec![&request_id];
        let names: Vec<&'static str> = types.iter().map(EventType::as_str).collect();
        for name in &names {
            args.push(name);
        }
        let row: Option<(String, String, String)> = stmt
            .query_row(args.as_slice(), |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))
            .optional()?;
        let Some((event_id, type_name, payload)) = row else {
            return Ok(None);
        };
        let event_type =
            EventType::parse(&type_name).ok_or(StoreError::UnknownEventType(type_name))?;
        Ok(Some(Event {
            id: event_id,
            event_type,
            request_id: request_id.to_string(),
            data: serde_json::from_str(&payload).unwrap_or(serde_json::Value::Null),
        }))
    }
}

fn null_if_blank(v: &str) -> Option<&str> {
    let v = v.trim();
    if v.is_empty() {
        None
    } else {
        Some(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::TERMINAL_EVENT_TYPES;
    use chrono::Duration;
    use serde_json::json;

    fn store() -> Store {
        Store::open_in_memory().unwrap()
    }

    fn seed_request(s: &Store, id: &str) {
        s.create_request(
            id,
            "T",
            "B",
            ":::buttons\n- [OK](ok)\n:::",
            RequestStatus::Created,
            Utc::now() + Duration::hours(1),
        )
        .unwrap();
    }

    #[test]
    fn request_round_trip() {
        let s = store();
        seed_request(&s, "req_a");
        let state = s.get_request_state("req_a").unwrap().unwrap();
        assert_eq!(state.status, RequestStatus::Created);
        assert!(state.expires_at > Utc::now());

        s.update_request_status("req_a", RequestStatus::Delivered)
            .unwrap();
        let state = s.get_request_state("req_a").unwrap().unwrap();
        assert_eq!(state.status, RequestStatus::Delivered);

        let fields = s.read_request_display_fields("req_a").unwrap().unwrap();
        assert_eq!(fields.title, "T");
        assert!(fields.mcd.contains(":::buttons"));

        assert!(s.get_request_state("req_missing").unwrap().is_none());
    }

    #[test]
    fn token_verification_honors_row_ttl() {
        let s = store();
        seed_request(&s, "req_a");
        s.insert_token("req_a", "hash1", Utc::now() + Duration::hours(1))
            .unwrap();
        s.insert_token("req_a", "hash2", Utc::now() - Duration::hours(1))
            .unwrap();

        assert!(s.verify_token("req_a", "hash1").unwrap());
        assert!(!s.verify_token("req_a", "hash2").unwrap());
        assert!(!s.verify_token("req_a", "other").unwrap());
        assert!(!s.verify_token("req_b", "hash1").unwrap());
    }

    #[test]
    fn second_answer_is_a_duplicate() {
        let s = store();
        seed_request(&s, "req_a");
        s.insert_answer("req_a", "ok", "").unwrap();
        let err = s.insert_answer("req_a", "ok", "").unwrap_err();
        assert!(matches!(err, StoreError::Duplicate));
        assert!(s.has_answer("req_a").unwrap());
        assert!(!s.has_answer("req_b").unwrap());
    }

    #[test]
    fn blank_answer_fields_store_as_null() {
        let s = store();
        seed_request(&s, "req_a");
        s.insert_answer("req_a", "  ", "hello").unwrap();
        // Uniqueness still keyed on request_id regardless of null fields.
        assert!(matches!(
            s.insert_answer("req_a", "x", "y").unwrap_err(),
            StoreError::Duplicate
        ));
    }

    #[test]
    fn event_log_is_ordered_and_cursorable() {
        let s = store();
        seed_request(&s, "req_a");
        let mut ids = Vec::new();
        for i in 0..4 {
            let ev = Event::new("req_a", EventType::UserPageLoaded, json!({ "i": i }));
            ids.push(ev.id.clone());
            s.insert_event(&ev).unwrap();
        }

        let all = s.list_events_after("req_a", None).unwrap();
        assert_eq!(all.len(), 4);
        assert_eq!(
            all.iter().map(|e| e.id.clone()).collect::<Vec<_>>(),
            ids,
            "events come back in seq order"
        );

        let tail = s.list_events_after("req_a", Some(&ids[1])).unwrap();
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].id, ids[2]);

        // Prefix + suffix equals the full list.
        let prefix = s.list_events_after("req_a", None).unwrap();
        let suffix = s
            .list_events_after("req_a", Some(&prefix.last().unwrap().id))
            .unwrap();
        assert!(suffix.is_empty());

        // Unknown cursor yields nothing.
        assert!(s
            .list_events_after("req_a", Some("evt_nope"))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn latest_event_of_types_picks_newest_matching() {
        let s = store();
        seed_request(&s, "req_a");
        s.insert_event(&Event::new("req_a", EventType::RequestCreated, json!({})))
            .unwrap();
        s.insert_event(&Event::new("req_a", EventType::NotifySent, json!({})))
            .unwrap();
        let terminal = Event::new("req_a", EventType::UserSubmitted, json!({"action":"ok"}));
        s.insert_event(&terminal).unwrap();

        let found = s
            .latest_event_of_types("req_a", &TERMINAL_EVENT_TYPES)
            .unwrap()
            .unwrap();
        assert_eq!(found.id, terminal.id);
        assert_eq!(found.event_type, EventType::UserSubmitted);
        assert_eq!(found.data["action"], "ok");

        assert!(s
            .latest_event_of_types("req_a", &[])
            .unwrap()
            .is_none());
        assert!(s
            .latest_event_of_types("req_b", &TERMINAL_EVENT_TYPES)
            .unwrap()
            .is_none());
    }
}
