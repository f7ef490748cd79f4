use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use super::assembly::{PromptAssembler, PromptError};
use super::library::{
    DRAWN_FEATURES_TEMPLATE, PromptLibrary, RELATED_QUERIES, RESOLUTION_SEARCH, TEMPORAL_TEMPLATE,
};
use super::{Annotation, ContextBlock, ContextEntry, ContextKind};
use crate::chat::DrawnFeature;

const CLOCK_SOURCE: &str = "server clock";
const DRAWING_SOURCE: &str = "user drawing";

/// Resolve an IANA zone name, falling back to UTC for anything unknown.
pub fn resolve_timezone(name: &str) -> Tz {
    name.trim().parse::<Tz>().unwrap_or_else(|e| {
        tracing::warn!(timezone = name, error = %e, "Unknown timezone, using UTC");
        Tz::UTC
    })
}

/// e.g. `Monday, October 19, 2026, 03:04 PM`
pub fn format_local_time(now: DateTime<Utc>, tz: Tz) -> String {
    now.with_timezone(&tz)
        .format("%A, %B %-d, %Y, %I:%M %p")
        .to_string()
}

fn feature_lines(features: &[DrawnFeature]) -> String {
    features
        .iter()
        .map(|f| {
            let geometry = serde_json::to_string(&f.geometry).unwrap_or_else(|_| "null".into());
            format!("- {} ({}): {}", f.kind, f.measurement, geometry)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// System prompt for one resolution search.
pub fn resolution_prompt(
    library: &PromptLibrary,
    timezone: &str,
    drawn_features: &[DrawnFeature],
    now: DateTime<Utc>,
) -> Result<String, PromptError> {
    let tz = resolve_timezone(timezone);
    let stamp = Annotation::Timestamp(now.to_rfc3339());

    let temporal = ContextBlock::new(
        ContextKind::Temporal,
        library.context_template(TEMPORAL_TEMPLATE),
    )
    .entry(ContextEntry::new(
        "LOCAL_TIME",
        format_local_time(now, tz),
        CLOCK_SOURCE,
        stamp.clone(),
    ))
    .entry(ContextEntry::new(
        "TIMEZONE",
        tz.name(),
        CLOCK_SOURCE,
        stamp.clone(),
    ));

    let mut assembler = PromptAssembler::for_agent(library, RESOLUTION_SEARCH)?.context(temporal);

    if !drawn_features.is_empty() {
        let drawn = ContextBlock::new(
            ContextKind::Geographical,
            library.context_template(DRAWN_FEATURES_TEMPLATE),
        )
        .entry(ContextEntry::new(
            "DRAWN_FEATURES",
            feature_lines(drawn_features),
            DRAWING_SOURCE,
            stamp,
        ));
        assembler = assembler.context(drawn);
    }

    assembler.assemble()
}

/// System prompt for the related-queries collaborator.
pub fn related_queries_prompt(library: &PromptLibrary) -> Result<String, PromptError> {
    PromptAssembler::for_agent(library, RELATED_QUERIES)?.assemble()
}
