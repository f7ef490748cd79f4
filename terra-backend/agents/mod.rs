pub mod openai;
pub mod partial_json;

use anyhow::Result;
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::chat::stream::ValueSender;
use crate::chat::ui::UiComponent;
use crate::chat::{DrawnFeature, Message};

/// Everything the reasoning agent receives for one analysis.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub system_prompt: String,
    pub messages: Vec<Message>,
    pub timezone: String,
    pub drawn_features: Vec<DrawnFeature>,
}

/// A partially generated analysis object. Fields appear as the agent produces them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartialAnalysis {
    pub summary: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisOutput {
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub geo_json: Option<Value>,
}

/// Handle returned by [`AnalysisAgent::analyze`]: drain `partials`, then await `object`.
pub struct AnalysisStream {
    pub partials: BoxStream<'static, Result<PartialAnalysis>>,
    pub object: BoxFuture<'static, Result<AnalysisOutput>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelatedQuery {
    pub query: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelatedQueries {
    #[serde(default)]
    pub items: Vec<RelatedQuery>,
}

#[async_trait]
pub trait AnalysisAgent: Send + Sync {
    async fn analyze(&self, request: AnalysisRequest) -> Result<AnalysisStream>;
}

/// Produces follow-up questions. Implementations append their own section to `ui`.
#[async_trait]
pub trait QuerySuggestor: Send + Sync {
    async fn suggest(
        &self,
        ui: &ValueSender<UiComponent>,
        messages: Vec<Message>,
    ) -> Result<RelatedQueries>;
}
