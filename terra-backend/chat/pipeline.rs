//! The resolution-search turn: validate the submission, register the user's
//! message, stream the agent's analysis, and commit the result bundle.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use futures::StreamExt;
use serde::Serialize;
use tracing::Instrument;
use uuid::Uuid;

use super::input::{self, CollectedInput, ResolutionSearchInput};
use super::sanitize::{agent_history, sanitize, strip_images};
use super::state::{ConversationStore, Snapshot, StateError, Turn};
use super::stream::{self, ValueReader, ValueSender};
use super::ui::UiComponent;
use super::{AnalysisResult, ImageSource, Message, MessageType, ResultSources};
use crate::agents::{AnalysisAgent, AnalysisRequest, AnalysisStream, QuerySuggestor};
use crate::prompts::library::PromptLibrary;
use crate::prompts::resolution::resolution_prompt;

pub const INITIAL_SUMMARY: &str = "Analyzing map view...";
pub const DEFAULT_SUMMARY: &str = "Analysis complete.";
pub const ERROR_SUMMARY: &str = "An error occurred during analysis.";
const FOLLOWUP_MARKER: &str = "followup";

#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("no image source provided for resolution search")]
    NoImageSource,

    #[error("{provider:?} image could not be decoded: {reason}")]
    InvalidImage {
        provider: ImageSource,
        reason: String,
    },

    #[error(transparent)]
    State(#[from] StateError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnPhase {
    Idle,
    CollectingInput,
    InvokingAgent,
    StreamingPartial,
    Finalizing,
    Committed,
    Failed,
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub followup_delay: Duration,
    /// Extra commit attempts after a stale-snapshot rejection.
    pub commit_retries: u32,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            followup_delay: Duration::from_millis(500),
            commit_retries: 3,
        }
    }
}

/// What the caller gets back immediately. Every field is a live reader.
#[derive(Clone)]
pub struct SubmitResponse {
    pub id: String,
    pub turn_id: String,
    pub is_generating: ValueReader<bool>,
    pub component: ValueReader<UiComponent>,
    pub is_collapsed: ValueReader<bool>,
    pub summary: ValueReader<String>,
    pub phase: ValueReader<TurnPhase>,
}

#[derive(Clone)]
pub struct ResolutionSearch {
    store: Arc<ConversationStore>,
    agent: Arc<dyn AnalysisAgent>,
    suggestor: Arc<dyn QuerySuggestor>,
    prompts: Arc<PromptLibrary>,
    settings: PipelineSettings,
}

/// Inputs of the background stage, fixed before it starts.
struct Job {
    history: Vec<Message>,
    timezone: String,
    drawn_features: Vec<super::DrawnFeature>,
    sources: ResultSources,
}

/// Sender halves owned by the background task. Optional ones may already be
/// closed when a failure happens.
struct Channels {
    summary: Option<ValueSender<String>>,
    ui: Option<ValueSender<UiComponent>>,
    generating: ValueSender<bool>,
    collapsed: ValueSender<bool>,
    phase: ValueSender<TurnPhase>,
}

impl ResolutionSearch {
    pub fn new(
        store: Arc<ConversationStore>,
        agent: Arc<dyn AnalysisAgent>,
        suggestor: Arc<dyn QuerySuggestor>,
        prompts: Arc<PromptLibrary>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            store,
            agent,
            suggestor,
            prompts,
            settings,
        }
    }

    pub fn store(&self) -> &Arc<ConversationStore> {
        &self.store
    }

    /// Start a resolution search on `chat_id`.
    ///
    /// Validation errors are returned before the store is touched. Once this
    /// returns `Ok` the user's message is in the draft and all further outcomes
    /// are reported through the returned channels only.
    pub async fn submit(
        &self,
        chat_id: &str,
        input: ResolutionSearchInput,
    ) -> Result<SubmitResponse, PipelineError> {
        let CollectedInput {
            sources,
            timezone,
            drawn_features,
        } = input::collect(input)?;

        let mut turn = self.store.begin_turn(chat_id).await;
        let user_message = sources.user_message();
        let prior = self.append_user_message(&mut turn, &user_message).await?;

        let mut history = agent_history(&sanitize(&prior.messages));
        history.push(user_message);

        let result_sources = sources.result_sources();
        let (summary_tx, summary_rx) = stream::channel(INITIAL_SUMMARY.to_string());
        let (ui_tx, ui_rx) = stream::channel(UiComponent::section(
            "response",
            vec![
                UiComponent::resolution_image(&result_sources),
                UiComponent::BotMessage {
                    content: INITIAL_SUMMARY.to_string(),
                },
            ],
        ));
        let (generating_tx, generating_rx) = stream::channel(true);
        let (collapsed_tx, collapsed_rx) = stream::channel(false);
        let (phase_tx, phase_rx) = stream::channel(TurnPhase::CollectingInput);

        let response = SubmitResponse {
            id: Uuid::new_v4().to_string(),
            turn_id: turn.id().to_string(),
            is_generating: generating_rx,
            component: ui_rx,
            is_collapsed: collapsed_rx,
            summary: summary_rx,
            phase: phase_rx,
        };

        let job = Job {
            history,
            timezone,
            drawn_features,
            sources: result_sources,
        };
        let channels = Channels {
            summary: Some(summary_tx),
            ui: Some(ui_tx),
            generating: generating_tx,
            collapsed: collapsed_tx,
            phase: phase_tx,
        };

        let short_id = turn.id().chars().take(8).collect::<String>();
        let span = tracing::info_span!("resolution_search", chat = %chat_id, turn = %short_id);
        tracing::info!(parent: &span, images = job.history.last().map_or(0, |m| m.content.images().count()), "▶ Started");

        let pipeline = self.clone();
        tokio::spawn(pipeline.run(turn, job, channels).instrument(span));

        Ok(response)
    }

    async fn append_user_message(
        &self,
        turn: &mut Turn,
        user_message: &Message,
    ) -> Result<Snapshot, PipelineError> {
        let mut attempt = 0;
        loop {
            let base = turn.get().await;
            let mut messages = base.messages.as_ref().clone();
            messages.push(user_message.clone());
            match turn.update(&base, messages).await {
                Ok(_) => return Ok(base),
                Err(StateError::StaleSnapshot { .. }) if attempt < self.settings.commit_retries => {
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn run(self, mut turn: Turn, job: Job, mut channels: Channels) {
        let start = Instant::now();
        let cancel = turn.cancellation();

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(anyhow!("superseded by a newer turn")),
            result = self.analyze_and_commit(&mut turn, &job, &mut channels) => result,
        };
        let elapsed = format!("{:.1}s", start.elapsed().as_secs_f64());

        let phase = match outcome {
            Ok(()) => {
                tracing::info!(elapsed = %elapsed, "✓ Committed");
                TurnPhase::Committed
            }
            Err(e) => {
                tracing::error!(elapsed = %elapsed, error = %format!("{e:#}"), "✗ Failed");
                if let Some(summary) = channels.summary.take() {
                    summary.close(ERROR_SUMMARY.to_string());
                }
                if let Some(ui) = channels.ui.take() {
                    ui.close(UiComponent::ErrorNotice {
                        text: ERROR_SUMMARY.to_string(),
                    });
                }
                TurnPhase::Failed
            }
        };

        channels.generating.close(false);
        channels.collapsed.close(false);
        channels.phase.close(phase);
    }

    async fn analyze_and_commit(
        &self,
        turn: &mut Turn,
        job: &Job,
        channels: &mut Channels,
    ) -> Result<()> {
        channels.phase.send(TurnPhase::InvokingAgent);
        let system_prompt =
            resolution_prompt(&self.prompts, &job.timezone, &job.drawn_features, Utc::now())?;

        let AnalysisStream {
            mut partials,
            object,
        } = self
            .agent
            .analyze(AnalysisRequest {
                system_prompt,
                messages: job.history.clone(),
                timezone: job.timezone.clone(),
                drawn_features: job.drawn_features.clone(),
            })
            .await
            .context("agent rejected the analysis request")?;

        channels.phase.send(TurnPhase::StreamingPartial);
        while let Some(partial) = partials.next().await {
            let partial = partial.context("analysis stream failed")?;
            if let (Some(summary), Some(tx)) = (partial.summary, &channels.summary) {
                if !summary.is_empty() {
                    tx.send(summary);
                }
            }
        }
        let output = object.await.context("analysis did not complete")?;

        channels.phase.send(TurnPhase::Finalizing);
        let group_id = Uuid::new_v4().to_string();
        let summary = if output.summary.trim().is_empty() {
            DEFAULT_SUMMARY.to_string()
        } else {
            output.summary.clone()
        };
        if let Some(tx) = channels.summary.take() {
            tx.close(summary.clone());
        }

        let ui = channels
            .ui
            .as_ref()
            .ok_or_else(|| anyhow!("UI stream closed before finalization"))?;
        if let Some(geo_json) = &output.geo_json {
            ui.send(UiComponent::GeoJsonLayer {
                id: group_id.clone(),
                data: geo_json.clone(),
            });
        }

        let response = Message::grouped(&group_id, MessageType::Response, summary.clone());
        let mut working = job.history.clone();
        working.push(response.clone());
        let related = self
            .suggestor
            .suggest(ui, strip_images(&working))
            .await
            .context("related query suggestion failed")?;

        if let Some(ui) = channels.ui.take() {
            ui.close(UiComponent::followup_section());
        }
        if !self.settings.followup_delay.is_zero() {
            tokio::time::sleep(self.settings.followup_delay).await;
        }

        let result = AnalysisResult {
            summary,
            geo_json: output.geo_json,
            sources: job.sources.clone(),
        };
        let bundle = vec![
            response,
            Message::grouped(
                &group_id,
                MessageType::ResolutionSearchResult,
                result.to_message_content()?,
            ),
            Message::grouped(&group_id, MessageType::Related, serde_json::to_string(&related)?),
            Message::grouped(&group_id, MessageType::Followup, FOLLOWUP_MARKER),
        ];

        let committed = commit_bundle(turn, bundle, self.settings.commit_retries).await?;
        tracing::debug!(version = committed.version, messages = committed.messages.len(), "Bundle committed");
        Ok(())
    }
}

/// Commit `[...sanitize(live draft), ...bundle]`, re-reading the draft when a
/// concurrent write made the snapshot stale.
async fn commit_bundle(turn: &mut Turn, bundle: Vec<Message>, retries: u32) -> Result<Snapshot> {
    let mut attempt = 0;
    loop {
        let live = turn.get().await;
        let mut messages = sanitize(&live.messages);
        messages.extend(bundle.iter().cloned());

        match turn.commit(&live, messages).await {
            Ok(snapshot) => return Ok(snapshot),
            Err(StateError::StaleSnapshot { expected, actual }) if attempt < retries => {
                attempt += 1;
                tracing::warn!(expected, actual, attempt, "Draft moved during commit, retrying");
            }
            Err(e) => return Err(e.into()),
        }
    }
}
