//! SQLite-backed session store.
//!
//! `rusqlite::Connection` is not `Send`, so the connection lives on a
//! dedicated worker thread; callers talk to it over a channel. Commands
//! carry a `oneshot` reply sender so `async` handler code can `.await`
//! the result without the reactor or tokio runtime ever touching SQLite
//! directly.

use rand::RngCore;
use rusqlite::Connection;
use serde::Serialize;
use std::path::Path;
use std::sync::mpsc as std_mpsc;
use std::thread;
use tokio::sync::oneshot;

use crate::error::GatewayError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }

    pub fn parse(s: &str) -> Role {
        match s {
            "assistant" => Role::Assistant,
            "system" => Role::System,
            _ => Role::User,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub channel_id: String,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

enum Command {
    CreateSession {
        channel_id: String,
        reply: oneshot::Sender<Result<Session, GatewayError>>,
    },
    AppendMessage {
        session_id: String,
        role: Role,
        content: String,
        reply: oneshot::Sender<Result<(), GatewayError>>,
    },
    FetchHistory {
        session_id: String,
        limit: usize,
        reply: oneshot::Sender<Result<Vec<Message>, GatewayError>>,
    },
    CountSessions {
        reply: oneshot::Sender<Result<i64, GatewayError>>,
    },
    CountMessages {
        reply: oneshot::Sender<Result<i64, GatewayError>>,
    },
    CountMessagesInSession {
        session_id: String,
        reply: oneshot::Sender<Result<i64, GatewayError>>,
    },
}

#[derive(Clone)]
pub struct SessionStore {
    tx: std_mpsc::Sender<Command>,
}

impl SessionStore {
    pub const DEFAULT_HISTORY_LIMIT: usize = 50;

    pub fn open(path: &Path) -> Result<Self, GatewayError> {
        let (tx, rx) = std_mpsc::channel::<Command>();
        let path = path.to_path_buf();
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<(), String>>();

        thread::Builder::new()
            .name("session-store".into())
            .spawn(move || {
                let conn = match open_connection(&path) {
                    Ok(conn) => {
                        let _ = ready_tx.send(Ok(()));
                        conn
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e.to_string()));
                        return;
                    }
                };
                run_worker(conn, rx);
            })
            .map_err(GatewayError::Io)?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(SessionStore { tx }),
            Ok(Err(e)) => Err(GatewayError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                e,
            ))),
            Err(_) => Err(GatewayError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "session store worker exited before initializing",
            ))),
        }
    }

    pub async fn create_session(&self, channel_id: impl Into<String>) -> Result<Session, GatewayError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::CreateSession {
            channel_id: channel_id.into(),
            reply,
        })?;
        await_reply(rx).await
    }

    pub async fn append_message(
        &self,
        session_id: impl Into<String>,
        role: Role,
        content: impl Into<String>,
    ) -> Result<(), GatewayError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::AppendMessage {
            session_id: session_id.into(),
            role,
            content: content.into(),
            reply,
        })?;
        await_reply(rx).await
    }

    pub async fn fetch_history(
        &self,
        session_id: impl Into<String>,
        limit: usize,
    ) -> Result<Vec<Message>, GatewayError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::FetchHistory {
            session_id: session_id.into(),
            limit,
            reply,
        })?;
        await_reply(rx).await
    }

    pub async fn count_sessions(&self) -> Result<i64, GatewayError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::CountSessions { reply })?;
        await_reply(rx).await
    }

    pub async fn count_messages(&self) -> Result<i64, GatewayError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::CountMessages { reply })?;
        await_reply(rx).await
    }

    pub async fn count_messages_in_session(
        &self,
        session_id: impl Into<String>,
    ) -> Result<i64, GatewayError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::CountMessagesInSession { session_id: session_id.into(), reply })?;
        await_reply(rx).await
    }

    fn send(&self, cmd: Command) -> Result<(), GatewayError> {
        self.tx
            .send(cmd)
            .map_err(|_| GatewayError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "session store worker is gone",
            )))
    }
}

async fn await_reply<T>(rx: oneshot::Receiver<Result<T, GatewayError>>) -> Result<T, GatewayError> {
    rx.await.map_err(|_| {
        GatewayError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            "session store worker dropped the reply channel",
        ))
    })?
}

fn open_connection(path: &Path) -> rusqlite::Result<Connection> {
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let conn = Connection::open(path)?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS sessions (
            id TEXT PRIMARY KEY,
            channel_id TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        CREATE TABLE IF NOT EXISTS messages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id TEXT NOT NULL,
            role TEXT NOT NULL,
            content TEXT NOT NULL,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_messages_session ON messages(session_id);",
    )?;
    Ok(conn)
}

fn run_worker(conn: Connection, rx: std_mpsc::Receiver<Command>) {
    while let Ok(cmd) = rx.recv() {
        match cmd {
            Command::CreateSession { channel_id, reply } => {
                let _ = reply.send(create_session(&conn, &channel_id));
            }
            Command::AppendMessage { session_id, role, content, reply } => {
                let _ = reply.send(append_message(&conn, &session_id, role, &content));
            }
            Command::FetchHistory { session_id, limit, reply } => {
                let _ = reply.send(fetch_history(&conn, &session_id, limit));
            }
            Command::CountSessions { reply } => {
                let _ = reply.send(count(&conn, "SELECT COUNT(*) FROM sessions"));
            }
            Command::CountMessages { reply } => {
                let _ = reply.send(count(&conn, "SELECT COUNT(*) FROM messages"));
            }
            Command::CountMessagesInSession { session_id, reply } => {
                let _ = reply.send(count_messages_in_session(&conn, &session_id));
            }
        }
    }
}

fn new_session_id() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

fn create_session(conn: &Connection, channel_id: &str) -> Result<Session, GatewayError> {
    let id = new_session_id();
    let ts = now();
    conn.execute(
        "INSERT INTO sessions (id, channel_id, created_at, updated_at) VALUES (?1, ?2, ?3, ?3)",
        rusqlite::params![id, channel_id, ts],
    )
    .map_err(sqlite_err)?;
    Ok(Session { id, channel_id: channel_id.to_string(), created_at: ts, updated_at: ts })
}

fn append_message(conn: &Connection, session_id: &str, role: Role, content: &str) -> Result<(), GatewayError> {
    let ts = now();
    conn.execute(
        "INSERT INTO messages (session_id, role, content, created_at) VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![session_id, role.as_str(), content, ts],
    )
    .map_err(sqlite_err)?;
    conn.execute(
        "UPDATE sessions SET updated_at = ?1 WHERE id = ?2",
        rusqlite::params![ts, session_id],
    )
    .map_err(sqlite_err)?;
    Ok(())
}

/// Newest-first, bounded by `limit`. Content is carried as plain `String`
/// fields on `Message`, which `serde_json` JSON-encodes (escaping quotes,
/// control characters, etc.) when the caller serializes the response —
/// unlike a hand-assembled JSON string, this can't reproduce unescaped
/// output.
fn fetch_history(conn: &Connection, session_id: &str, limit: usize) -> Result<Vec<Message>, GatewayError> {
    let mut stmt = conn
        .prepare(
            "SELECT role, content FROM messages WHERE session_id = ?1
             ORDER BY created_at DESC, id DESC LIMIT ?2",
        )
        .map_err(sqlite_err)?;
    let rows = stmt
        .query_map(rusqlite::params![session_id, limit as i64], |row| {
            Ok(Message { role: row.get(0)?, content: row.get(1)? })
        })
        .map_err(sqlite_err)?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row.map_err(sqlite_err)?);
    }
    Ok(out)
}

fn count(conn: &Connection, sql: &str) -> Result<i64, GatewayError> {
    conn.query_row(sql, [], |row| row.get(0)).map_err(sqlite_err)
}

fn count_messages_in_session(conn: &Connection, session_id: &str) -> Result<i64, GatewayError> {
    conn.query_row(
        "SELECT COUNT(*) FROM messages WHERE session_id = ?1",
        rusqlite::params![session_id],
        |row| row.get(0),
    )
    .map_err(sqlite_err)
}

fn sqlite_err(e: rusqlite::Error) -> GatewayError {
    GatewayError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn append_then_fetch_history() {
        let dir = tempdir().unwrap();
        let store = SessionStore::open(&dir.path().join("sessions.db")).unwrap();
        let session = store.create_session("cli").await.unwrap();
        assert_eq!(session.id.len(), 32);

        store.append_message(&session.id, Role::User, "hello \"world\"").await.unwrap();
        store.append_message(&session.id, Role::Assistant, "hi there").await.unwrap();

        let history = store.fetch_history(&session.id, 50).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, "assistant");
        assert_eq!(history[1].content, "hello \"world\"");

        let encoded = serde_json::to_string(&history[1]).unwrap();
        assert!(encoded.contains("\\\"world\\\""));
    }

    #[tokio::test]
    async fn idempotent_append_yields_n_rows() {
        let dir = tempdir().unwrap();
        let store = SessionStore::open(&dir.path().join("sessions.db")).unwrap();
        let session = store.create_session("cli").await.unwrap();
        for _ in 0..5 {
            store.append_message(&session.id, Role::User, "ping").await.unwrap();
        }
        let history = store.fetch_history(&session.id, 50).await.unwrap();
        assert_eq!(history.len(), 5);
    }

    #[tokio::test]
    async fn counts_are_scoped_per_session() {
        let dir = tempdir().unwrap();
        let store = SessionStore::open(&dir.path().join("sessions.db")).unwrap();
        let a = store.create_session("cli").await.unwrap();
        let b = store.create_session("cli").await.unwrap();
        store.append_message(&a.id, Role::User, "one").await.unwrap();
        store.append_message(&a.id, Role::User, "two").await.unwrap();
        store.append_message(&b.id, Role::User, "three").await.unwrap();

        assert_eq!(store.count_messages_in_session(&a.id).await.unwrap(), 2);
        assert_eq!(store.count_messages_in_session(&b.id).await.unwrap(), 1);
        assert_eq!(store.count_messages().await.unwrap(), 3);
        assert_eq!(store.count_sessions().await.unwrap(), 2);
    }
}
