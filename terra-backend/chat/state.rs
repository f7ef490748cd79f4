use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::Message;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    #[error("stale snapshot: built from version {expected}, session is at version {actual}")]
    StaleSnapshot { expected: u64, actual: u64 },

    #[error("turn {0} has already been committed")]
    TurnFinalized(String),
}

/// A point-in-time copy of a session's messages. Holding one never blocks writers.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub chat_id: String,
    pub version: u64,
    pub messages: Arc<Vec<Message>>,
}

struct ActiveTurn {
    id: String,
    cancel: CancellationToken,
}

struct SessionState {
    draft: Arc<Vec<Message>>,
    committed: Arc<Vec<Message>>,
    version: u64,
    active_turn: Option<ActiveTurn>,
}

struct Session {
    chat_id: String,
    state: Mutex<SessionState>,
}

impl Session {
    fn new(chat_id: &str) -> Self {
        Self {
            chat_id: chat_id.to_string(),
            state: Mutex::new(SessionState {
                draft: Arc::new(Vec::new()),
                committed: Arc::new(Vec::new()),
                version: 0,
                active_turn: None,
            }),
        }
    }

    async fn draft(&self) -> Snapshot {
        let state = self.state.lock().await;
        Snapshot {
            chat_id: self.chat_id.clone(),
            version: state.version,
            messages: state.draft.clone(),
        }
    }
}

/// Canonical message log for every chat session.
///
/// Writers replace the whole draft with a sequence derived from an earlier
/// [`Snapshot`]; the store never merges. A write built from a snapshot whose
/// version is no longer current is rejected with [`StateError::StaleSnapshot`].
pub struct ConversationStore {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    async fn session(&self, chat_id: &str) -> Arc<Session> {
        if let Some(session) = self.sessions.read().await.get(chat_id) {
            return session.clone();
        }
        self.sessions
            .write()
            .await
            .entry(chat_id.to_string())
            .or_insert_with(|| Arc::new(Session::new(chat_id)))
            .clone()
    }

    /// Current draft of a session. Unknown sessions start empty.
    pub async fn get(&self, chat_id: &str) -> Snapshot {
        self.session(chat_id).await.draft().await
    }

    /// The result of the last terminal commit.
    pub async fn committed(&self, chat_id: &str) -> Snapshot {
        let session = self.session(chat_id).await;
        let state = session.state.lock().await;
        Snapshot {
            chat_id: chat_id.to_string(),
            version: state.version,
            messages: state.committed.clone(),
        }
    }

    pub async fn chat_ids(&self) -> Vec<String> {
        self.sessions.read().await.keys().cloned().collect()
    }

    /// Open a new turn on a session, cancelling the previous one if it is
    /// still in flight.
    pub async fn begin_turn(&self, chat_id: &str) -> Turn {
        let session = self.session(chat_id).await;
        let id = Uuid::new_v4().to_string();
        let cancel = CancellationToken::new();

        {
            let mut state = session.state.lock().await;
            if let Some(previous) = state.active_turn.replace(ActiveTurn {
                id: id.clone(),
                cancel: cancel.clone(),
            }) {
                tracing::debug!(chat_id, turn_id = %previous.id, "Superseding in-flight turn");
                previous.cancel.cancel();
            }
        }

        Turn {
            id,
            session,
            cancel,
            finalized: false,
        }
    }
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Write handle for one turn. `commit` is terminal: afterwards every write
/// through this handle fails with [`StateError::TurnFinalized`].
pub struct Turn {
    id: String,
    session: Arc<Session>,
    cancel: CancellationToken,
    finalized: bool,
}

impl Turn {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn chat_id(&self) -> &str {
        &self.session.chat_id
    }

    /// Cancelled when a later turn supersedes this one.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub async fn get(&self) -> Snapshot {
        self.session.draft().await
    }

    pub async fn update(
        &mut self,
        base: &Snapshot,
        messages: Vec<Message>,
    ) -> Result<Snapshot, StateError> {
        self.replace(base, messages, false).await
    }

    pub async fn commit(
        &mut self,
        base: &Snapshot,
        messages: Vec<Message>,
    ) -> Result<Snapshot, StateError> {
        self.replace(base, messages, true).await
    }

    async fn replace(
        &mut self,
        base: &Snapshot,
        messages: Vec<Message>,
        terminal: bool,
    ) -> Result<Snapshot, StateError> {
        if self.finalized {
            return Err(StateError::TurnFinalized(self.id.clone()));
        }

        let mut state = self.session.state.lock().await;
        if state.version != base.version {
            return Err(StateError::StaleSnapshot {
                expected: base.version,
                actual: state.version,
            });
        }

        state.draft = Arc::new(messages);
        state.version += 1;
        if terminal {
            state.committed = state.draft.clone();
            if state.active_turn.as_ref().is_some_and(|t| t.id == self.id) {
                state.active_turn = None;
            }
            self.finalized = true;
        }

        Ok(Snapshot {
            chat_id: self.session.chat_id.clone(),
            version: state.version,
            messages: state.draft.clone(),
        })
    }
}
