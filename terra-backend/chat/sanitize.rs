//! Views of the message log handed to text-only consumers.
//!
//! None of these functions mutate their input; each returns a fresh sequence
//! of the same order.

use super::{ContentPart, Message, MessageContent, MessageType, Role};

/// Payload written in place of a user image once it has been consumed.
pub const IMAGE_PLACEHOLDER: &str = "IMAGE_PROCESSED";

/// Replace every image payload of a user message with [`IMAGE_PLACEHOLDER`].
///
/// Parts keep their position and source; non-user messages are copied as-is.
/// Applying this twice yields the same result as applying it once.
pub fn sanitize(messages: &[Message]) -> Vec<Message> {
    messages
        .iter()
        .map(|m| match (&m.role, &m.content) {
            (Role::User, MessageContent::Parts(parts)) => Message {
                content: MessageContent::Parts(parts.iter().map(redact_part).collect()),
                ..m.clone()
            },
            _ => m.clone(),
        })
        .collect()
}

fn redact_part(part: &ContentPart) -> ContentPart {
    match part {
        ContentPart::Image(image) => {
            let mut image = image.clone();
            image.image = IMAGE_PLACEHOLDER.to_string();
            ContentPart::Image(image)
        }
        other => other.clone(),
    }
}

/// Remove image parts entirely, for consumers that must never see them.
pub fn strip_images(messages: &[Message]) -> Vec<Message> {
    messages
        .iter()
        .map(|m| match &m.content {
            MessageContent::Parts(parts) => Message {
                content: MessageContent::Parts(
                    parts
                        .iter()
                        .filter(|p| !matches!(p, ContentPart::Image(_)))
                        .cloned()
                        .collect(),
                ),
                ..m.clone()
            },
            MessageContent::Text(_) => m.clone(),
        })
        .collect()
}

/// The slice of history the reasoning agent is allowed to see.
///
/// Tool output and UI bookkeeping messages are dropped, and so are image
/// parts already reduced to the placeholder since they carry no payload.
/// Run it over [`sanitize`]d messages so no raw image survives.
pub fn agent_history(messages: &[Message]) -> Vec<Message> {
    messages
        .iter()
        .filter(|m| {
            m.role != Role::Tool
                && !matches!(
                    m.kind,
                    MessageType::Followup
                        | MessageType::Related
                        | MessageType::End
                        | MessageType::ResolutionSearchResult
                )
        })
        .map(|m| match &m.content {
            MessageContent::Parts(parts) if parts.iter().any(is_placeholder) => Message {
                content: MessageContent::Parts(
                    parts.iter().filter(|p| !is_placeholder(p)).cloned().collect(),
                ),
                ..m.clone()
            },
            _ => m.clone(),
        })
        .collect()
}

fn is_placeholder(part: &ContentPart) -> bool {
    matches!(part, ContentPart::Image(image) if image.image == IMAGE_PLACEHOLDER)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::{ImagePart, ImageSource};

    fn image(source: ImageSource, data: &str) -> ContentPart {
        ContentPart::Image(ImagePart {
            source: Some(source),
            image: data.to_string(),
            mime_type: Some("image/png".into()),
        })
    }

    fn user_with_images() -> Message {
        Message::user_input(MessageContent::Parts(vec![
            ContentPart::text("Analyze this map view."),
            image(ImageSource::Mapbox, "data:image/png;base64,AAAA"),
            image(ImageSource::Google, "data:image/png;base64,BBBB"),
        ]))
    }

    fn assistant_with_image() -> Message {
        let mut msg = Message::grouped("g", MessageType::Response, "");
        msg.content = MessageContent::Parts(vec![
            ContentPart::text("see attached"),
            image(ImageSource::Mapbox, "data:image/png;base64,CCCC"),
        ]);
        msg
    }

    fn history() -> Vec<Message> {
        vec![
            Message::user_input(MessageContent::Text("where is the river?".into())),
            user_with_images(),
            assistant_with_image(),
            Message::grouped("g", MessageType::Related, r#"{"items":[]}"#),
        ]
    }

    #[test]
    fn test_sanitize_redacts_user_images_in_place() {
        let out = sanitize(&history());
        let MessageContent::Parts(parts) = &out[1].content else {
            panic!("expected parts");
        };
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], ContentPart::text("Analyze this map view."));
        for (part, source) in parts[1..].iter().zip([ImageSource::Mapbox, ImageSource::Google]) {
            let ContentPart::Image(img) = part else {
                panic!("expected image part");
            };
            assert_eq!(img.image, IMAGE_PLACEHOLDER);
            assert_eq!(img.source, Some(source));
        }
    }

    #[test]
    fn test_sanitize_leaves_non_user_messages_untouched() {
        let input = history();
        let out = sanitize(&input);
        assert_eq!(out[0], input[0]);
        assert_eq!(out[2], input[2]);
        assert_eq!(out[3], input[3]);
    }

    #[test]
    fn test_sanitize_is_idempotent_and_order_preserving() {
        let input = history();
        let once = sanitize(&input);
        let twice = sanitize(&once);
        assert_eq!(once, twice);
        assert_eq!(once.len(), input.len());
        let ids: Vec<_> = input.iter().map(|m| &m.id).collect();
        let out_ids: Vec<_> = once.iter().map(|m| &m.id).collect();
        assert_eq!(ids, out_ids);
    }

    #[test]
    fn test_sanitize_does_not_mutate_input() {
        let input = history();
        let before = input.clone();
        let _ = sanitize(&input);
        assert_eq!(input, before);
    }

    #[test]
    fn test_strip_images_removes_every_image_part() {
        let out = strip_images(&history());
        assert!(out.iter().all(|m| m.content.images().count() == 0));
        assert_eq!(out[1].content.as_text(), "Analyze this map view.");
        assert_eq!(out[2].content.as_text(), "see attached");
    }

    #[test]
    fn test_agent_history_drops_bookkeeping_and_placeholders() {
        let mut input = sanitize(&history());
        let mut tool = Message::grouped("g", MessageType::Response, "{}");
        tool.role = Role::Tool;
        input.push(tool);
        input.push(Message::grouped("g", MessageType::Followup, "followup"));
        input.push(Message::grouped("g", MessageType::ResolutionSearchResult, "{}"));
        input.push(Message::grouped("g", MessageType::End, "end"));

        let out = agent_history(&input);
        assert_eq!(out.len(), 3);
        assert_eq!(out[1].content.images().count(), 0);
        assert!(out.iter().all(|m| m.role != Role::Tool));
    }

    #[test]
    fn test_agent_history_keeps_live_images() {
        let out = agent_history(&[user_with_images()]);
        assert_eq!(out[0].content.images().count(), 2);
    }
}
