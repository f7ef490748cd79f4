//! Renderable components and the rebuild of a chat's UI from its message log.

use serde::Serialize;
use serde_json::Value;

use super::{Message, MessageType, ResultSources, Role};
use crate::agents::RelatedQueries;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UiComponent {
    Section {
        title: String,
        children: Vec<UiComponent>,
    },
    UserMessage {
        content: String,
    },
    /// Live text is delivered on the summary channel; `content` is the value at render time.
    BotMessage {
        content: String,
    },
    ResolutionImage {
        #[serde(skip_serializing_if = "Option::is_none")]
        mapbox: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        google: Option<String>,
    },
    GeoJsonLayer {
        id: String,
        data: Value,
    },
    Related {
        queries: RelatedQueries,
    },
    FollowupPanel,
    ErrorNotice {
        text: String,
    },
}

impl UiComponent {
    pub fn section(title: &str, children: Vec<UiComponent>) -> Self {
        UiComponent::Section {
            title: title.to_string(),
            children,
        }
    }

    pub fn resolution_image(sources: &ResultSources) -> Self {
        let present = |s: &String| Some(s.clone()).filter(|s| !s.is_empty());
        UiComponent::ResolutionImage {
            mapbox: present(&sources.mapbox),
            google: present(&sources.google),
        }
    }

    pub fn response_section(content: &str) -> Self {
        Self::section(
            "response",
            vec![UiComponent::BotMessage {
                content: content.to_string(),
            }],
        )
    }

    pub fn related_section(queries: RelatedQueries) -> Self {
        Self::section("Related", vec![UiComponent::Related { queries }])
    }

    pub fn followup_section() -> Self {
        Self::section("Follow-up", vec![UiComponent::FollowupPanel])
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UiEntry {
    pub id: String,
    pub component: UiComponent,
}

/// Parse the `image` field of a stored result: the two-source JSON form, or
/// a bare legacy image string treated as the mapbox source.
pub fn parse_result_images(image: &str) -> ResultSources {
    serde_json::from_str::<ResultSources>(image).unwrap_or_else(|_| ResultSources {
        mapbox: image.to_string(),
        google: String::new(),
    })
}

/// Rebuild the component list for a stored chat. Each message yields at most
/// one entry; share pages omit interactive sections.
pub fn ui_state_from_messages(messages: &[Message], share_page: bool) -> Vec<UiEntry> {
    messages
        .iter()
        .filter_map(|message| {
            let component = component_for(message, share_page)?;
            Some(UiEntry {
                id: message.group_id.clone().unwrap_or_else(|| message.id.clone()),
                component,
            })
        })
        .collect()
}

fn component_for(message: &Message, share_page: bool) -> Option<UiComponent> {
    let text = message.content.as_text();
    match (message.role, message.kind) {
        (Role::User, MessageType::Input) => Some(UiComponent::UserMessage { content: text }),
        (Role::Assistant, MessageType::Response) => Some(UiComponent::response_section(&text)),
        (Role::Assistant, MessageType::Related) if !share_page => {
            match serde_json::from_str::<RelatedQueries>(&text) {
                Ok(queries) => Some(UiComponent::related_section(queries)),
                Err(e) => {
                    tracing::warn!(message_id = %message.id, error = %e, "Unparseable related queries");
                    None
                }
            }
        }
        (Role::Assistant, MessageType::Followup) if !share_page => {
            Some(UiComponent::followup_section())
        }
        (Role::Assistant, MessageType::ResolutionSearchResult) => {
            resolution_component(message, &text)
        }
        _ => None,
    }
}

fn resolution_component(message: &Message, content: &str) -> Option<UiComponent> {
    let result: Value = match serde_json::from_str(content) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(message_id = %message.id, error = %e, "Unparseable resolution result");
            return None;
        }
    };

    let mut children = Vec::new();
    if let Some(image) = result.get("image").and_then(Value::as_str) {
        children.push(UiComponent::resolution_image(&parse_result_images(image)));
    }
    if let Some(geo_json) = result.get("geoJson").filter(|g| !g.is_null()) {
        children.push(UiComponent::GeoJsonLayer {
            id: message.id.clone(),
            data: geo_json.clone(),
        });
    }
    Some(UiComponent::section("Resolution", children))
}
