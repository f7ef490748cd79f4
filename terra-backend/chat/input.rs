use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use serde::Deserialize;

use super::pipeline::PipelineError;
use super::{
    ContentPart, DrawnFeature, ImagePart, ImageSource, Message, MessageContent, ResultSources,
};

/// Fixed prompt text of a resolution-search user message.
pub const USER_PROMPT: &str = "Analyze this map view.";

const DEFAULT_TIMEZONE: &str = "UTC";
const FALLBACK_MIME: &str = "application/octet-stream";

/// One uploaded image. `data` is base64, optionally already wrapped in a `data:` URL.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageUpload {
    #[serde(default)]
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolutionSearchInput {
    #[serde(default)]
    pub mapbox_file: Option<ImageUpload>,
    #[serde(default)]
    pub google_file: Option<ImageUpload>,
    /// Single-image field from older clients.
    #[serde(default, alias = "file")]
    pub legacy_file: Option<ImageUpload>,
    #[serde(default)]
    pub timezone: Option<String>,
    /// JSON-encoded array of drawn features.
    #[serde(default)]
    pub drawn_features: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    pub mime_type: String,
    pub data_url: String,
}

impl EncodedImage {
    fn decode(source: ImageSource, upload: ImageUpload) -> Result<Self, PipelineError> {
        let mime_type = if upload.mime_type.trim().is_empty() {
            FALLBACK_MIME.to_string()
        } else {
            upload.mime_type.trim().to_string()
        };

        let payload = match upload.data.split_once(";base64,") {
            Some((prefix, rest)) if prefix.starts_with("data:") => rest,
            _ => upload.data.as_str(),
        };
        let payload = payload.trim();

        let bytes = BASE64
            .decode(payload)
            .map_err(|e| PipelineError::InvalidImage {
                provider: source,
                reason: e.to_string(),
            })?;
        if bytes.is_empty() {
            return Err(PipelineError::InvalidImage {
                provider: source,
                reason: "image payload is empty".to_string(),
            });
        }

        Ok(Self {
            data_url: format!("data:{mime_type};base64,{payload}"),
            mime_type,
        })
    }

    fn part(&self, source: ImageSource) -> ContentPart {
        ContentPart::Image(ImagePart {
            source: Some(source),
            image: self.data_url.clone(),
            mime_type: Some(self.mime_type.clone()),
        })
    }
}

/// The image sources of one submission, already normalized to the
/// mapbox/google pair. A legacy single upload lands in `Mapbox`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSources {
    Mapbox(EncodedImage),
    Google(EncodedImage),
    Both {
        mapbox: EncodedImage,
        google: EncodedImage,
    },
}

impl ImageSources {
    /// Pick the variant from the raw uploads and decode each one.
    ///
    /// The legacy field is consulted only when neither named source is set.
    pub fn resolve(
        mapbox: Option<ImageUpload>,
        google: Option<ImageUpload>,
        legacy: Option<ImageUpload>,
    ) -> Result<Self, PipelineError> {
        let (mapbox, google) = match (mapbox, google) {
            (None, None) => (legacy, None),
            named => named,
        };

        let mapbox = mapbox
            .map(|u| EncodedImage::decode(ImageSource::Mapbox, u))
            .transpose()?;
        let google = google
            .map(|u| EncodedImage::decode(ImageSource::Google, u))
            .transpose()?;

        match (mapbox, google) {
            (Some(mapbox), Some(google)) => Ok(ImageSources::Both { mapbox, google }),
            (Some(mapbox), None) => Ok(ImageSources::Mapbox(mapbox)),
            (None, Some(google)) => Ok(ImageSources::Google(google)),
            (None, None) => Err(PipelineError::NoImageSource),
        }
    }

    pub fn mapbox(&self) -> Option<&EncodedImage> {
        match self {
            ImageSources::Mapbox(img) | ImageSources::Both { mapbox: img, .. } => Some(img),
            ImageSources::Google(_) => None,
        }
    }

    pub fn google(&self) -> Option<&EncodedImage> {
        match self {
            ImageSources::Google(img) | ImageSources::Both { google: img, .. } => Some(img),
            ImageSources::Mapbox(_) => None,
        }
    }

    /// Image parts in display order, mapbox first.
    pub fn parts(&self) -> Vec<ContentPart> {
        let mut parts = Vec::with_capacity(2);
        if let Some(img) = self.mapbox() {
            parts.push(img.part(ImageSource::Mapbox));
        }
        if let Some(img) = self.google() {
            parts.push(img.part(ImageSource::Google));
        }
        parts
    }

    pub fn result_sources(&self) -> ResultSources {
        ResultSources {
            mapbox: self.mapbox().map(|i| i.data_url.clone()).unwrap_or_default(),
            google: self.google().map(|i| i.data_url.clone()).unwrap_or_default(),
        }
    }

    /// The user message registered before analysis starts.
    pub fn user_message(&self) -> Message {
        let mut parts = vec![ContentPart::text(USER_PROMPT)];
        parts.extend(self.parts());
        Message::user_input(MessageContent::Parts(parts))
    }
}

/// A validated submission.
#[derive(Debug, Clone)]
pub struct CollectedInput {
    pub sources: ImageSources,
    pub timezone: String,
    pub drawn_features: Vec<DrawnFeature>,
}

/// Validate and normalize a submission. Fails without side effects when no
/// image is present or an image does not decode.
pub fn collect(input: ResolutionSearchInput) -> Result<CollectedInput, PipelineError> {
    let sources = ImageSources::resolve(input.mapbox_file, input.google_file, input.legacy_file)?;

    let timezone = input
        .timezone
        .map(|tz| tz.trim().to_string())
        .filter(|tz| !tz.is_empty())
        .unwrap_or_else(|| DEFAULT_TIMEZONE.to_string());

    Ok(CollectedInput {
        sources,
        timezone,
        drawn_features: parse_drawn_features(input.drawn_features.as_deref()),
    })
}

/// Best-effort parse; malformed input is logged and treated as no features.
pub fn parse_drawn_features(raw: Option<&str>) -> Vec<DrawnFeature> {
    let Some(raw) = raw.map(str::trim).filter(|r| !r.is_empty()) else {
        return Vec::new();
    };
    match serde_json::from_str(raw) {
        Ok(features) => features,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to parse drawn features, ignoring them");
            Vec::new()
        }
    }
}
