pub mod input;
pub mod pipeline;
pub mod sanitize;
pub mod state;
pub mod stream;
pub mod ui;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Input,
    Response,
    ResolutionSearchResult,
    Related,
    Followup,
    End,
}

/// Which map provider an image was captured from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageSource {
    Mapbox,
    Google,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImagePart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<ImageSource>,
    /// A `data:` URL, or the redaction placeholder once sanitized.
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    Image(ImagePart),
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        ContentPart::Text { text: text.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    /// Concatenated text of the content, ignoring image parts.
    pub fn as_text(&self) -> String {
        match self {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::Image(_) => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    pub fn images(&self) -> impl Iterator<Item = &ImagePart> {
        let parts: &[ContentPart] = match self {
            MessageContent::Text(_) => &[],
            MessageContent::Parts(parts) => parts,
        };
        parts.iter().filter_map(|p| match p {
            ContentPart::Image(image) => Some(image),
            ContentPart::Text { .. } => None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    pub role: Role,
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub content: MessageContent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Message {
    pub fn user_input(content: MessageContent) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            group_id: None,
            role: Role::User,
            kind: MessageType::Input,
            content,
            created_at: Some(Utc::now()),
        }
    }

    /// An assistant message belonging to the result bundle identified by `group_id`.
    pub fn grouped(group_id: &str, kind: MessageType, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            group_id: Some(group_id.to_string()),
            role: Role::Assistant,
            kind,
            content: MessageContent::Text(content.into()),
            created_at: Some(Utc::now()),
        }
    }
}

/// A user-authored map annotation, forwarded verbatim to the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrawnFeature {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub measurement: String,
    #[serde(default)]
    pub geometry: Value,
}

/// Image references echoed back in the analysis result. Missing sources are empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultSources {
    #[serde(default)]
    pub mapbox: String,
    #[serde(default)]
    pub google: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geo_json: Option<Value>,
    #[serde(skip)]
    pub sources: ResultSources,
}

impl AnalysisResult {
    /// Content of the `resolution_search_result` message: `image` holds the
    /// two-source pair as a JSON string so legacy readers see a plain string.
    pub fn to_message_content(&self) -> serde_json::Result<String> {
        let mut value = serde_json::to_value(self)?;
        value["image"] = Value::String(serde_json::to_string(&self.sources)?);
        serde_json::to_string(&value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_serializes_camel_case_fields() {
        let msg = Message::grouped("g1", MessageType::ResolutionSearchResult, "{}");
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["groupId"], "g1");
        assert_eq!(value["type"], "resolution_search_result");
        assert_eq!(value["role"], "assistant");
        assert!(value.get("createdAt").is_some());
    }

    #[test]
    fn test_content_parts_parse_from_tagged_json() {
        let content: MessageContent = serde_json::from_value(json!([
            { "type": "text", "text": "Analyze this map view." },
            { "type": "image", "image": "data:image/png;base64,AAAA", "mimeType": "image/png", "source": "google" }
        ]))
        .unwrap();

        let images: Vec<_> = content.images().collect();
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].source, Some(ImageSource::Google));
        assert_eq!(content.as_text(), "Analyze this map view.");
    }

    #[test]
    fn test_plain_text_content_is_untagged_string() {
        let content: MessageContent = serde_json::from_value(json!("hello")).unwrap();
        assert_eq!(content, MessageContent::Text("hello".into()));
        assert_eq!(content.images().count(), 0);
    }

    #[test]
    fn test_result_content_embeds_image_pair_as_string() {
        let result = AnalysisResult {
            summary: "Dense urban core".into(),
            geo_json: None,
            sources: ResultSources {
                mapbox: "data:a".into(),
                google: String::new(),
            },
        };
        let content: Value = serde_json::from_str(&result.to_message_content().unwrap()).unwrap();
        assert_eq!(content["summary"], "Dense urban core");
        assert!(content.get("geoJson").is_none());
        let image: Value = serde_json::from_str(content["image"].as_str().unwrap()).unwrap();
        assert_eq!(image, json!({ "mapbox": "data:a", "google": "" }));
    }

    #[test]
    fn test_drawn_feature_accepts_missing_id() {
        let feature: DrawnFeature = serde_json::from_value(json!({
            "type": "Polygon",
            "measurement": "1.2 km²",
            "geometry": { "type": "Polygon", "coordinates": [] }
        }))
        .unwrap();
        assert_eq!(feature.kind, "Polygon");
        assert!(feature.id.is_none());
    }
}
