use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::{FutureExt, Stream, StreamExt};
use serde_json::{Value, json};
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;

use super::partial_json::partial_summary;
use super::{
    AnalysisAgent, AnalysisOutput, AnalysisRequest, AnalysisStream, PartialAnalysis,
    QuerySuggestor, RelatedQueries,
};
use crate::chat::stream::ValueSender;
use crate::chat::ui::UiComponent;
use crate::chat::{ContentPart, Message, MessageContent, Role};

/// Thin client for an OpenAI-compatible `/chat/completions` endpoint.
#[derive(Clone)]
pub struct OpenAiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl OpenAiClient {
    pub fn new(http: reqwest::Client, base_url: &str, api_key: Option<String>, model: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model: model.to_string(),
        }
    }

    fn body(&self, system: &str, messages: &[Message], stream: bool) -> Value {
        let mut wire = vec![json!({ "role": "system", "content": system })];
        wire.extend(messages.iter().filter_map(message_to_wire));
        json!({
            "model": self.model,
            "stream": stream,
            "response_format": { "type": "json_object" },
            "messages": wire,
        })
    }

    async fn post(&self, body: &Value) -> Result<reqwest::Response> {
        let mut req = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .json(body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let response = req.send().await.context("agent request failed")?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            bail!("agent returned {status}: {text}");
        }
        Ok(response)
    }

    /// One non-streaming completion, returning the message content.
    async fn complete(&self, system: &str, messages: &[Message]) -> Result<String> {
        let body = self.body(system, messages, false);
        let response: Value = self
            .post(&body)
            .await?
            .json()
            .await
            .context("agent response was not JSON")?;
        response["choices"][0]["message"]["content"]
            .as_str()
            .map(String::from)
            .ok_or_else(|| anyhow!("agent response carried no message content"))
    }
}

fn message_to_wire(message: &Message) -> Option<Value> {
    let role = match message.role {
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => return None,
    };

    let content = match &message.content {
        MessageContent::Text(text) => json!(text),
        MessageContent::Parts(parts) => Value::Array(
            parts
                .iter()
                .map(|part| match part {
                    ContentPart::Text { text } => json!({ "type": "text", "text": text }),
                    ContentPart::Image(image) => json!({
                        "type": "image_url",
                        "image_url": { "url": image.image },
                    }),
                })
                .collect(),
        ),
    };

    Some(json!({ "role": role, "content": content }))
}

#[derive(Debug, PartialEq)]
enum Chunk {
    Delta(String),
    Done,
    Skip,
}

/// Interpret the `data` of one completion stream event.
fn parse_chunk(data: &str) -> Chunk {
    let data = data.trim();
    if data == "[DONE]" {
        return Chunk::Done;
    }
    match serde_json::from_str::<Value>(data) {
        Ok(chunk) => match chunk["choices"][0]["delta"]["content"].as_str() {
            Some(delta) if !delta.is_empty() => Chunk::Delta(delta.to_string()),
            _ => Chunk::Skip,
        },
        Err(e) => {
            tracing::debug!(error = %e, "Skipping unparseable stream chunk");
            Chunk::Skip
        }
    }
}

/// Accumulate the streamed JSON text, emitting the summary each time it grows.
async fn read_analysis<S, B, E>(
    bytes: S,
    partials: &mpsc::Sender<Result<PartialAnalysis>>,
) -> Result<AnalysisOutput>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let mut events = Box::pin(bytes.eventsource());
    let mut json_buf = String::new();
    let mut last_summary: Option<String> = None;

    while let Some(event) = events.next().await {
        let event = event.map_err(|e| anyhow!("agent stream interrupted: {e}"))?;
        match parse_chunk(&event.data) {
            Chunk::Delta(delta) => json_buf.push_str(&delta),
            Chunk::Done => break,
            Chunk::Skip => continue,
        }

        let summary = partial_summary(&json_buf);
        if summary.is_some() && summary != last_summary {
            last_summary = summary.clone();
            if partials.send(Ok(PartialAnalysis { summary })).await.is_err() {
                bail!("analysis consumer went away");
            }
        }
    }

    serde_json::from_str(&json_buf).context("agent produced malformed analysis JSON")
}

/// Reasoning agent backed by a streamed JSON-mode completion.
pub struct OpenAiAgent {
    client: OpenAiClient,
}

impl OpenAiAgent {
    pub fn new(client: OpenAiClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AnalysisAgent for OpenAiAgent {
    async fn analyze(&self, request: AnalysisRequest) -> Result<AnalysisStream> {
        let body = self
            .client
            .body(&request.system_prompt, &request.messages, true);
        let response = self.client.post(&body).await?;

        let (partial_tx, partial_rx) = mpsc::channel(32);
        let (object_tx, object_rx) = oneshot::channel();

        tokio::spawn(async move {
            match read_analysis(response.bytes_stream(), &partial_tx).await {
                Ok(output) => {
                    let _ = object_tx.send(Ok(output));
                }
                Err(e) => {
                    let _ = partial_tx.send(Err(anyhow!("{e:#}"))).await;
                    let _ = object_tx.send(Err(e));
                }
            }
        });

        Ok(AnalysisStream {
            partials: ReceiverStream::new(partial_rx).boxed(),
            object: async move {
                object_rx
                    .await
                    .unwrap_or_else(|_| Err(anyhow!("analysis stream ended without a result")))
            }
            .boxed(),
        })
    }
}

/// Related-queries collaborator using a single JSON-mode completion.
pub struct OpenAiSuggestor {
    client: OpenAiClient,
    system_prompt: String,
}

impl OpenAiSuggestor {
    pub fn new(client: OpenAiClient, system_prompt: String) -> Self {
        Self {
            client,
            system_prompt,
        }
    }
}

#[async_trait]
impl QuerySuggestor for OpenAiSuggestor {
    async fn suggest(
        &self,
        ui: &ValueSender<UiComponent>,
        messages: Vec<Message>,
    ) -> Result<RelatedQueries> {
        let content = self.client.complete(&self.system_prompt, &messages).await?;
        let mut related: RelatedQueries =
            serde_json::from_str(&content).context("related queries were not valid JSON")?;
        related.items.retain(|item| !item.query.trim().is_empty());

        ui.send(UiComponent::related_section(related.clone()));
        Ok(related)
    }
}
