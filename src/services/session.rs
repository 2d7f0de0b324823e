use std::path::{Path, PathBuf};
use std::sync::RwLock;

use tokio::sync::broadcast;

use crate::error::ClientError;
use crate::models::session::{Session, SessionEvent};

const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Owner of the stored credential. The HTTP client reads it on every call
/// and asks for it to be cleared on eviction; nothing else writes it.
pub trait SessionStore: Send + Sync {
    fn load(&self) -> Option<Session>;
    fn save(&self, session: &Session) -> Result<(), ClientError>;
    fn clear(&self) -> Result<(), ClientError>;
}

/// Process-local store, used by tests and short-lived tools.
#[derive(Default)]
pub struct MemorySessionStore {
    current: RwLock<Option<Session>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session(session: Session) -> Self {
        Self {
            current: RwLock::new(Some(session)),
        }
    }
}

impl SessionStore for MemorySessionStore {
    fn load(&self) -> Option<Session> {
        self.current.read().ok().and_then(|guard| guard.clone())
    }

    fn save(&self, session: &Session) -> Result<(), ClientError> {
        let mut guard = self
            .current
            .write()
            .map_err(|_| ClientError::Session("session lock poisoned".to_string()))?;
        *guard = Some(session.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), ClientError> {
        let mut guard = self
            .current
            .write()
            .map_err(|_| ClientError::Session("session lock poisoned".to_string()))?;
        *guard = None;
        Ok(())
    }
}

/// JSON file on disk, cached in memory after the first read.
pub struct FileSessionStore {
    path: PathBuf,
    cache: RwLock<Option<Session>>,
}

impl FileSessionStore {
    /// Open the store, reading any session left by a previous run.
    /// An unreadable file is treated as "signed out".
    pub fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let cached = match std::fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<Session>(&bytes) {
                Ok(session) => Some(session),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Ignoring corrupt session file");
                    None
                }
            },
            Err(_) => None,
        };

        Self {
            path,
            cache: RwLock::new(cached),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SessionStore for FileSessionStore {
    fn load(&self) -> Option<Session> {
        self.cache.read().ok().and_then(|guard| guard.clone())
    }

    fn save(&self, session: &Session) -> Result<(), ClientError> {
        let payload =
            serde_json::to_vec_pretty(session).map_err(|e| ClientError::Session(e.to_string()))?;
        std::fs::write(&self.path, payload).map_err(|e| ClientError::Session(e.to_string()))?;

        let mut guard = self
            .cache
            .write()
            .map_err(|_| ClientError::Session("session lock poisoned".to_string()))?;
        *guard = Some(session.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), ClientError> {
        {
            let mut guard = self
                .cache
                .write()
                .map_err(|_| ClientError::Session("session lock poisoned".to_string()))?;
            *guard = None;
        }

        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ClientError::Session(e.to_string())),
        }
    }
}

/// Fan-out of session lifecycle events. Sending with no subscribers is fine.
#[derive(Clone)]
pub struct SessionEvents {
    sender: broadcast::Sender<SessionEvent>,
}

impl SessionEvents {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: SessionEvent) {
        let _ = self.sender.send(event);
    }
}

impl Default for SessionEvents {
    fn default() -> Self {
        Self::new()
    }
}
