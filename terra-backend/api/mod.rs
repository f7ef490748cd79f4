pub mod chats;
pub mod middleware;
mod routes;

use axum::Router;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::chat::pipeline::{ResolutionSearch, SubmitResponse};
use crate::chat::state::ConversationStore;

/// How long a finished turn stays available to late event-stream readers.
const TURN_RETENTION: Duration = Duration::from_secs(300);

/// Output handles of submitted turns, keyed by turn id.
pub type TurnRegistry = Arc<RwLock<HashMap<String, RegisteredTurn>>>;

#[derive(Clone)]
pub struct RegisteredTurn {
    pub chat_id: String,
    pub response: SubmitResponse,
    pub registered_at: Instant,
}

impl RegisteredTurn {
    fn is_expired(&self, retention: Duration) -> bool {
        self.response.phase.is_closed() && self.registered_at.elapsed() >= retention
    }
}

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<ConversationStore>,
    pub pipeline: ResolutionSearch,
    pub turns: TurnRegistry,
    pub turn_retention: Duration,
}

impl AppState {
    pub fn new(pipeline: ResolutionSearch) -> Self {
        Self {
            store: pipeline.store().clone(),
            pipeline,
            turns: Arc::new(RwLock::new(HashMap::new())),
            turn_retention: TURN_RETENTION,
        }
    }

    /// Remember a turn's handles for event streaming, evicting finished turns
    /// of every chat once they are older than `turn_retention`.
    pub async fn register_turn(&self, chat_id: &str, response: SubmitResponse) {
        let mut turns = self.turns.write().await;
        let before = turns.len();
        turns.retain(|_, t| !t.is_expired(self.turn_retention));
        if turns.len() < before {
            tracing::debug!(evicted = before - turns.len(), "Evicted finished turns");
        }

        turns.insert(
            response.turn_id.clone(),
            RegisteredTurn {
                chat_id: chat_id.to_string(),
                response,
                registered_at: Instant::now(),
            },
        );
    }
}

pub fn create_app(state: AppState) -> Router {
    routes::build_router(state)
}
