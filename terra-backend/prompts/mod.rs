pub mod assembly;
pub mod library;
pub mod resolution;
pub mod template;

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

/// Who the agent is. Always the first block of an assembled prompt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoreIdentity {
    pub role: String,
    pub mission: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

impl CoreIdentity {
    pub fn is_present(&self) -> bool {
        !self.role.trim().is_empty() && !self.mission.trim().is_empty()
    }

    pub fn render(&self) -> String {
        let mut out = format!("ROLE: {}\nMISSION: {}", self.role.trim(), self.mission.trim());
        if !self.capabilities.is_empty() {
            out.push_str("\nCAPABILITIES:");
            for capability in &self.capabilities {
                out.push_str("\n- ");
                out.push_str(capability.trim());
            }
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextKind {
    Geographical,
    Environmental,
    Mission,
    Temporal,
    Learning,
}

/// How fresh or how reliable a context value is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Annotation {
    Timestamp(String),
    Confidence(String),
}

impl Annotation {
    fn label(&self) -> (&'static str, &str) {
        match self {
            Annotation::Timestamp(ts) => ("Timestamp", ts),
            Annotation::Confidence(level) => ("Confidence", level),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextEntry {
    pub key: String,
    pub value: String,
    pub source: String,
    #[serde(default)]
    pub annotation: Option<Annotation>,
}

impl ContextEntry {
    pub fn new(key: &str, value: impl Into<String>, source: &str, annotation: Annotation) -> Self {
        Self {
            key: key.to_string(),
            value: value.into(),
            source: source.to_string(),
            annotation: Some(annotation),
        }
    }

    /// Source and annotation are both present and non-empty.
    pub fn is_attributed(&self) -> bool {
        !self.source.trim().is_empty()
            && self
                .annotation
                .as_ref()
                .is_some_and(|a| !a.label().1.trim().is_empty())
    }

    fn attribution(&self) -> String {
        match &self.annotation {
            Some(annotation) => {
                let (label, value) = annotation.label();
                format!("Source: {}, {label}: {value}", self.source)
            }
            None => format!("Source: {}", self.source),
        }
    }
}

/// A block of live facts injected into the prompt.
///
/// `template` may reference each entry as `{{KEY}}`, its provenance as
/// `{{KEY_SOURCE}}` and the attribution line as `{{KEY_ATTRIBUTION}}`. An empty
/// template renders one bullet per entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextBlock {
    pub kind: ContextKind,
    #[serde(default)]
    pub template: String,
    #[serde(default)]
    pub entries: Vec<ContextEntry>,
}

impl ContextBlock {
    pub fn new(kind: ContextKind, template: &str) -> Self {
        Self {
            kind,
            template: template.to_string(),
            entries: Vec::new(),
        }
    }

    pub fn entry(mut self, entry: ContextEntry) -> Self {
        self.entries.push(entry);
        self
    }

    pub fn vars(&self) -> HashMap<String, String> {
        let mut vars = HashMap::new();
        for entry in &self.entries {
            vars.insert(entry.key.clone(), entry.value.clone());
            vars.insert(format!("{}_SOURCE", entry.key), entry.source.clone());
            vars.insert(format!("{}_ATTRIBUTION", entry.key), entry.attribution());
        }
        vars
    }

    pub fn render(&self) -> String {
        if self.template.trim().is_empty() {
            return self
                .entries
                .iter()
                .map(|e| format!("- {}: {} ({})", e.key, e.value, e.attribution()))
                .collect::<Vec<_>>()
                .join("\n");
        }
        template::render(self.template.trim(), &self.vars())
    }
}

/// Extra instructions that apply only while one of `conditions` is active.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaptationDirective {
    /// Named trigger, e.g. `capability_scaling` or `severe_weather`.
    pub trigger: String,
    #[serde(default)]
    pub conditions: Vec<String>,
    pub template: String,
    #[serde(default)]
    pub values: HashMap<String, String>,
}

impl AdaptationDirective {
    pub fn applies(&self, active: &HashSet<String>) -> bool {
        active.contains(&self.trigger) || self.conditions.iter().any(|c| active.contains(c))
    }

    pub fn render(&self) -> String {
        template::render(self.template.trim(), &self.values)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuidingPrinciple {
    pub name: String,
    pub text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_time() -> ContextEntry {
        ContextEntry::new(
            "LOCAL_TIME",
            "Monday 09:00",
            "server clock",
            Annotation::Timestamp("2026-10-19T09:00:00Z".into()),
        )
    }

    #[test]
    fn test_identity_render_and_presence() {
        let identity = CoreIdentity {
            role: "Geospatial analyst".into(),
            mission: "Describe the map view".into(),
            capabilities: vec!["Land cover classification".into()],
        };
        assert!(identity.is_present());
        let text = identity.render();
        assert!(text.starts_with("ROLE: Geospatial analyst"));
        assert!(text.contains("- Land cover classification"));
        assert!(!CoreIdentity::default().is_present());
    }

    #[test]
    fn test_context_block_template_slots() {
        let block = ContextBlock::new(
            ContextKind::Temporal,
            "Local time is {{LOCAL_TIME}} ({{LOCAL_TIME_ATTRIBUTION}}).",
        )
        .entry(local_time());
        assert_eq!(
            block.render(),
            "Local time is Monday 09:00 (Source: server clock, Timestamp: 2026-10-19T09:00:00Z)."
        );
    }

    #[test]
    fn test_context_block_without_template_lists_entries() {
        let block = ContextBlock::new(ContextKind::Temporal, "").entry(local_time());
        assert_eq!(
            block.render(),
            "- LOCAL_TIME: Monday 09:00 (Source: server clock, Timestamp: 2026-10-19T09:00:00Z)"
        );
    }

    #[test]
    fn test_entry_attribution_requirements() {
        assert!(local_time().is_attributed());

        let mut unsourced = local_time();
        unsourced.source = " ".into();
        assert!(!unsourced.is_attributed());

        let mut unannotated = local_time();
        unannotated.annotation = None;
        assert!(!unannotated.is_attributed());

        let mut blank = local_time();
        blank.annotation = Some(Annotation::Confidence(String::new()));
        assert!(!blank.is_attributed());
    }

    #[test]
    fn test_directive_applies_on_trigger_or_condition() {
        let directive = AdaptationDirective {
            trigger: "capability_scaling".into(),
            conditions: vec!["software_update".into()],
            template: "New capabilities: {{ADDED}}".into(),
            values: HashMap::from([("ADDED".to_string(), "radar".to_string())]),
        };
        assert!(!directive.applies(&HashSet::new()));
        assert!(directive.applies(&HashSet::from(["software_update".to_string()])));
        assert!(directive.applies(&HashSet::from(["capability_scaling".to_string()])));
        assert_eq!(directive.render(), "New capabilities: radar");
    }

    #[test]
    fn test_annotation_yaml_shape() {
        let entry: ContextEntry = serde_yaml::from_str(
            "key: TERRAIN\nvalue: coastal plain\nsource: orbital imagery\nannotation:\n  confidence: high\n",
        )
        .unwrap();
        assert_eq!(entry.annotation, Some(Annotation::Confidence("high".into())));
    }
}
