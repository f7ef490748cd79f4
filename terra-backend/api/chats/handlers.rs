use axum::Json;
use axum::extract::{Path, Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::{self, BoxStream, Stream, StreamExt};
use hyper::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::convert::Infallible;

use crate::api::AppState;
use crate::chat::input::ResolutionSearchInput;
use crate::chat::pipeline::PipelineError;
use crate::chat::stream::ValueReader;
use crate::chat::ui::ui_state_from_messages;

type ApiError = (StatusCode, Json<Value>);

fn pipeline_error(e: &PipelineError) -> ApiError {
    let status = match e {
        PipelineError::NoImageSource | PipelineError::InvalidImage { .. } => {
            StatusCode::BAD_REQUEST
        }
        PipelineError::State(_) => StatusCode::CONFLICT,
    };
    (status, Json(json!({ "error": e.to_string() })))
}

pub(crate) async fn submit_resolution_search(
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
    Json(input): Json<ResolutionSearchInput>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let response = state
        .pipeline
        .submit(&chat_id, input)
        .await
        .map_err(|e| {
            tracing::warn!(chat_id = %chat_id, error = %e, "Rejected resolution search");
            pipeline_error(&e)
        })?;

    let body = json!({ "id": response.id, "turn_id": response.turn_id });
    state.register_turn(&chat_id, response).await;

    Ok((StatusCode::CREATED, Json(body)))
}

fn channel_events<T>(name: &'static str, reader: ValueReader<T>) -> BoxStream<'static, Event>
where
    T: Serialize + Clone + Send + Sync + 'static,
{
    reader
        .into_stream()
        .map(move |item| {
            let data = json!({ "value": item.value(), "final": item.is_final() });
            Event::default().event(name).data(data.to_string())
        })
        .boxed()
}

/// Replays every channel of a turn from its first value, then sends `done`
/// with the terminal phase once all channels are closed.
pub(crate) async fn stream_turn_events(
    State(state): State<AppState>,
    Path((chat_id, turn_id)): Path<(String, String)>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let turn = state
        .turns
        .read()
        .await
        .get(&turn_id)
        .filter(|t| t.chat_id == chat_id)
        .map(|t| t.response.clone())
        .ok_or_else(|| {
            (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": "turn not found" })),
            )
        })?;

    let stream = async_stream::stream! {
        let mut events = stream::select_all(vec![
            channel_events("summary", turn.summary.clone()),
            channel_events("component", turn.component.clone()),
            channel_events("generating", turn.is_generating.clone()),
            channel_events("collapsed", turn.is_collapsed.clone()),
        ]);
        while let Some(event) = events.next().await {
            yield Ok(event);
        }

        let phase = turn.phase.clone().final_value().await;
        let data = json!({ "turn_id": turn.turn_id, "phase": phase });
        yield Ok(Event::default().event("done").data(data.to_string()));
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(std::time::Duration::from_secs(15))))
}

pub(crate) async fn get_messages(
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
) -> Json<Value> {
    let snapshot = state.store.get(&chat_id).await;
    Json(json!({
        "chat_id": snapshot.chat_id,
        "version": snapshot.version,
        "messages": snapshot.messages.as_ref(),
    }))
}

#[derive(Deserialize)]
pub struct UiQuery {
    #[serde(default)]
    pub share: bool,
}

pub(crate) async fn get_ui_state(
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
    Query(query): Query<UiQuery>,
) -> Json<Value> {
    let snapshot = state.store.get(&chat_id).await;
    let entries = ui_state_from_messages(&snapshot.messages, query.share);
    Json(json!({
        "chat_id": chat_id,
        "entries": entries,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{
        AnalysisAgent, AnalysisOutput, AnalysisRequest, AnalysisStream, PartialAnalysis,
        QuerySuggestor, RelatedQueries, RelatedQuery,
    };
    use crate::chat::Message;
    use crate::chat::input::ImageUpload;
    use crate::chat::pipeline::{PipelineSettings, ResolutionSearch, TurnPhase};
    use crate::chat::state::ConversationStore;
    use crate::chat::stream::ValueSender;
    use crate::chat::ui::UiComponent;
    use crate::prompts::library::PromptLibrary;
    use async_trait::async_trait;
    use axum::response::IntoResponse;
    use futures::FutureExt;
    use std::sync::Arc;
    use std::time::Duration;

    struct FixedAgent;

    #[async_trait]
    impl AnalysisAgent for FixedAgent {
        async fn analyze(&self, _request: AnalysisRequest) -> anyhow::Result<AnalysisStream> {
            Ok(AnalysisStream {
                partials: stream::iter(vec![Ok(PartialAnalysis {
                    summary: Some("River".into()),
                })])
                .boxed(),
                object: futures::future::ready(Ok(AnalysisOutput {
                    summary: "River delta".into(),
                    geo_json: None,
                }))
                .boxed(),
            })
        }
    }

    struct FixedSuggestor;

    #[async_trait]
    impl QuerySuggestor for FixedSuggestor {
        async fn suggest(
            &self,
            _ui: &ValueSender<UiComponent>,
            _messages: Vec<Message>,
        ) -> anyhow::Result<RelatedQueries> {
            Ok(RelatedQueries {
                items: vec![RelatedQuery {
                    query: "How old is the delta?".into(),
                }],
            })
        }
    }

    fn app_state() -> AppState {
        AppState::new(ResolutionSearch::new(
            Arc::new(ConversationStore::new()),
            Arc::new(FixedAgent),
            Arc::new(FixedSuggestor),
            Arc::new(PromptLibrary::default()),
            PipelineSettings {
                followup_delay: Duration::ZERO,
                commit_retries: 3,
            },
        ))
    }

    fn input_with_image() -> ResolutionSearchInput {
        ResolutionSearchInput {
            mapbox_file: Some(ImageUpload {
                mime_type: "image/png".into(),
                data: "QUFBQQ==".into(),
            }),
            ..Default::default()
        }
    }

    async fn submit(state: &AppState, chat_id: &str) -> String {
        let (status, Json(body)) = submit_resolution_search(
            State(state.clone()),
            Path(chat_id.to_string()),
            Json(input_with_image()),
        )
        .await
        .unwrap();
        assert_eq!(status, StatusCode::CREATED);
        assert!(body["id"].is_string());
        body["turn_id"].as_str().unwrap().to_string()
    }

    async fn wait_committed(state: &AppState, turn_id: &str) {
        let turns = state.turns.read().await;
        let phase = turns[turn_id].response.phase.clone();
        drop(turns);
        assert_eq!(phase.final_value().await, Some(TurnPhase::Committed));
    }

    #[tokio::test]
    async fn test_submit_without_image_is_bad_request() {
        let state = app_state();
        let (status, Json(body)) = submit_resolution_search(
            State(state.clone()),
            Path("c1".into()),
            Json(ResolutionSearchInput::default()),
        )
        .await
        .unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("no image"));
        assert!(state.turns.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_submit_with_bad_base64_is_bad_request() {
        let state = app_state();
        let mut input = input_with_image();
        if let Some(file) = input.mapbox_file.as_mut() {
            file.data = "not base64!".into();
        }
        let (status, _) =
            submit_resolution_search(State(state.clone()), Path("c1".into()), Json(input))
                .await
                .unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_submit_then_read_messages_and_ui() {
        let state = app_state();
        let turn_id = submit(&state, "c1").await;
        wait_committed(&state, &turn_id).await;

        let Json(messages) = get_messages(State(state.clone()), Path("c1".into())).await;
        assert_eq!(messages["messages"].as_array().unwrap().len(), 5);
        assert_eq!(messages["version"], 2);

        let Json(ui) = get_ui_state(
            State(state.clone()),
            Path("c1".into()),
            Query(UiQuery { share: false }),
        )
        .await;
        let entries = ui["entries"].as_array().unwrap();
        assert_eq!(entries.len(), 5);

        let Json(shared) = get_ui_state(
            State(state.clone()),
            Path("c1".into()),
            Query(UiQuery { share: true }),
        )
        .await;
        assert_eq!(shared["entries"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_event_stream_replays_turn_and_ends_with_done() {
        let state = app_state();
        let turn_id = submit(&state, "c1").await;
        wait_committed(&state, &turn_id).await;

        let sse = stream_turn_events(State(state.clone()), Path(("c1".into(), turn_id)))
            .await
            .map_err(|(status, _)| status)
            .unwrap();
        let body = axum::body::to_bytes(sse.into_response().into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();

        assert!(text.contains("event: summary"));
        assert!(text.contains("River delta"));
        assert!(text.contains("event: component"));
        assert!(text.contains("event: generating"));
        assert!(text.contains(r#""phase":"committed""#));
        assert!(text.rfind("event: done") > text.rfind("event: summary"));
    }

    #[tokio::test]
    async fn test_event_stream_for_unknown_turn_is_not_found() {
        let state = app_state();
        let turn_id = submit(&state, "c1").await;

        let Err((status, _)) =
            stream_turn_events(State(state.clone()), Path(("other-chat".into(), turn_id))).await
        else {
            panic!("expected not found");
        };
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_expired_turns_of_any_chat_are_evicted_on_submit() {
        let mut state = app_state();
        state.turn_retention = Duration::ZERO;
        let first = submit(&state, "c1").await;
        wait_committed(&state, &first).await;
        let second = submit(&state, "c2").await;

        let turns = state.turns.read().await;
        assert!(!turns.contains_key(&first));
        assert!(turns.contains_key(&second));
    }

    #[tokio::test]
    async fn test_recently_finished_turn_stays_streamable() {
        let state = app_state();
        let first = submit(&state, "c1").await;
        wait_committed(&state, &first).await;
        submit(&state, "c1").await;
        submit(&state, "c2").await;

        assert_eq!(state.turns.read().await.len(), 3);
        assert!(
            stream_turn_events(State(state.clone()), Path(("c1".into(), first)))
                .await
                .is_ok()
        );
    }
}
