use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::assembly::PromptError;
use super::{AdaptationDirective, CoreIdentity, GuidingPrinciple};

pub const RESOLUTION_SEARCH: &str = "resolution_search";
pub const RELATED_QUERIES: &str = "related_queries";

pub const TEMPORAL_TEMPLATE: &str = "temporal";
pub const DRAWN_FEATURES_TEMPLATE: &str = "drawn_features";

/// Identity and static instructions of one agent module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentPrompt {
    pub identity: CoreIdentity,
    pub core: String,
}

/// The prompt texts the assembler draws from. Loaded from YAML when a path is
/// configured; keys missing from the file keep their built-in values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptLibrary {
    pub principles: Vec<GuidingPrinciple>,
    pub agents: HashMap<String, AgentPrompt>,
    pub context_templates: HashMap<String, String>,
    pub directives: Vec<AdaptationDirective>,
    pub disclosure_clause: String,
}

impl PromptLibrary {
    pub fn from_yaml(yaml: &str) -> Result<Self, PromptError> {
        let mut library: PromptLibrary = serde_yaml::from_str(yaml)
            .map_err(|e| PromptError::Library(format!("invalid prompt library: {e}")))?;

        let defaults = PromptLibrary::default();
        for (name, agent) in defaults.agents {
            library.agents.entry(name).or_insert(agent);
        }
        for (name, template) in defaults.context_templates {
            library.context_templates.entry(name).or_insert(template);
        }
        Ok(library)
    }

    pub fn load(path: &Path) -> Result<Self, PromptError> {
        let yaml = std::fs::read_to_string(path).map_err(|e| {
            PromptError::Library(format!("failed to read {}: {e}", path.display()))
        })?;
        let library = Self::from_yaml(&yaml)?;
        tracing::info!(
            path = %path.display(),
            agents = library.agents.len(),
            directives = library.directives.len(),
            "Loaded prompt library"
        );
        Ok(library)
    }

    /// Load from `path` when given, otherwise use the built-in library.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, PromptError> {
        match path {
            Some(path) => Self::load(path),
            None => {
                tracing::info!("Using built-in prompt library");
                Ok(Self::default())
            }
        }
    }

    pub fn agent(&self, name: &str) -> Result<&AgentPrompt, PromptError> {
        self.agents
            .get(name)
            .ok_or_else(|| PromptError::Library(format!("no prompt defined for agent '{name}'")))
    }

    pub fn context_template(&self, name: &str) -> &str {
        self.context_templates.get(name).map_or("", String::as_str)
    }
}

impl Default for PromptLibrary {
    fn default() -> Self {
        let principles = [
            (
                "accuracy",
                "Ground every statement in the best available data and keep observed facts, inferences and predictions clearly apart.",
            ),
            (
                "data_driven",
                "Base conclusions on evidence visible in the inputs. State any assumption you make because data is incomplete.",
            ),
            (
                "transparent_uncertainty",
                "When data is ambiguous, incomplete or conflicting, say so and quantify your confidence where you can.",
            ),
            (
                "no_speculation",
                "Never present invented or unsupported claims as fact. If something cannot be determined, say that it cannot.",
            ),
            (
                "verification",
                "Cross-check findings against every available input before reporting them.",
            ),
        ]
        .into_iter()
        .map(|(name, text)| GuidingPrinciple {
            name: name.to_string(),
            text: text.to_string(),
        })
        .collect();

        let agents = HashMap::from([
            (
                RESOLUTION_SEARCH.to_string(),
                AgentPrompt {
                    identity: CoreIdentity {
                        role: "Geospatial analyst examining satellite and map imagery.".into(),
                        mission: "Explain what a map view shows so the user understands the location at a glance.".into(),
                        capabilities: vec![
                            "Land cover classification from imagery.".into(),
                            "Landmark and infrastructure recognition.".into(),
                            "GeoJSON encoding of findings.".into(),
                        ],
                    },
                    core: RESOLUTION_CORE.into(),
                },
            ),
            (
                RELATED_QUERIES.to_string(),
                AgentPrompt {
                    identity: CoreIdentity {
                        role: "Research assistant proposing follow-up questions.".into(),
                        mission: "Help the user dig deeper into the location they are looking at.".into(),
                        capabilities: Vec::new(),
                    },
                    core: RELATED_CORE.into(),
                },
            ),
        ]);

        let context_templates = HashMap::from([
            (
                TEMPORAL_TEMPLATE.to_string(),
                "The current local time at this location is {{LOCAL_TIME}} ({{LOCAL_TIME_ATTRIBUTION}}).".to_string(),
            ),
            (
                DRAWN_FEATURES_TEMPLATE.to_string(),
                "The user has drawn these features on the map ({{DRAWN_FEATURES_ATTRIBUTION}}):\n{{DRAWN_FEATURES}}\nTreat the drawn areas and lines as the primary areas of interest.".to_string(),
            ),
        ]);

        let directives = vec![
            AdaptationDirective {
                trigger: "capability_scaling".into(),
                conditions: vec!["software_update".into(), "model_change".into()],
                template: "CAPABILITY UPDATE: {{CHANGES}}. Confirm how this affects your analysis before relying on it.".into(),
                values: HashMap::from([(
                    "CHANGES".to_string(),
                    "your available tools or model have changed".to_string(),
                )]),
            },
            AdaptationDirective {
                trigger: "priority_restructuring".into(),
                conditions: vec!["mission_change".into()],
                template: "PRIORITY UPDATE: {{PRIORITIES}}. Flag any conclusion the new priorities would push you to make on weaker evidence.".into(),
                values: HashMap::from([(
                    "PRIORITIES".to_string(),
                    "the user's objectives have changed".to_string(),
                )]),
            },
            AdaptationDirective {
                trigger: "severe_weather".into(),
                conditions: vec!["severe_weather_warning".into()],
                template: "Severe weather has been reported for this area. Call out visible hazards first and note that imagery may predate current conditions.".into(),
                values: HashMap::new(),
            },
        ];

        PromptLibrary {
            principles,
            agents,
            context_templates,
            directives,
            disclosure_clause: DISCLOSURE_CLAUSE.into(),
        }
    }
}

const DISCLOSURE_CLAUSE: &str = "Cite the data source behind each finding, state a confidence level (high, medium or low) for every conclusion, and explicitly flag uncertainty or missing data instead of guessing.";

const RESOLUTION_CORE: &str = "\
Analyze the provided map imagery of a geographic location.

Your analysis must cover:
1. Land feature classification: the kinds of land cover visible (urban areas, forest, water bodies, farmland and so on).
2. Points of interest: significant landmarks, infrastructure such as bridges and major roads, and notable buildings.
3. Structured output: reply with a JSON object holding a `summary` string with your written analysis and a `geoJson` FeatureCollection with Point or Polygon features for the points of interest and land classes, each with a `name` and optional `description` property.

Work only from the imagery, the conversation and your general knowledge. Do not browse or search the web.";

const RELATED_CORE: &str = "\
Suggest three follow-up queries that explore the subject of the conversation more deeply, each building on what has been found so far.
Reply with a JSON object of the form {\"items\": [{\"query\": \"...\"}, {\"query\": \"...\"}, {\"query\": \"...\"}]}.
Write the queries in the language the user writes in.";

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_library_has_both_agents() {
        let library = PromptLibrary::default();
        assert!(library.agent(RESOLUTION_SEARCH).unwrap().identity.is_present());
        assert!(library.agent(RELATED_QUERIES).is_ok());
        assert!(!library.context_template(TEMPORAL_TEMPLATE).is_empty());
        assert_eq!(library.principles.len(), 5);
    }

    #[test]
    fn test_unknown_agent_is_a_library_error() {
        let err = PromptLibrary::default().agent("navigator").unwrap_err();
        assert!(matches!(err, PromptError::Library(_)));
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let library = PromptLibrary::from_yaml(
            "disclosure_clause: Always cite sources, give confidence, flag uncertainty.\n",
        )
        .unwrap();
        assert_eq!(
            library.disclosure_clause,
            "Always cite sources, give confidence, flag uncertainty."
        );
        assert!(library.agent(RESOLUTION_SEARCH).is_ok());
        assert_eq!(library.directives.len(), 3);
    }

    #[test]
    fn test_yaml_agent_overrides_one_and_keeps_other() {
        let library = PromptLibrary::from_yaml(
            r#"
agents:
  related_queries:
    identity:
      role: Tour guide
      mission: Suggest places to visit
    core: Suggest three places.
"#,
        )
        .unwrap();
        assert_eq!(library.agent(RELATED_QUERIES).unwrap().identity.role, "Tour guide");
        assert!(library.agent(RESOLUTION_SEARCH).is_ok());
    }

    #[test]
    fn test_malformed_yaml_is_rejected() {
        let err = PromptLibrary::from_yaml("principles: [unclosed").unwrap_err();
        assert!(matches!(err, PromptError::Library(_)));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "context_templates:\n  temporal: \"It is {{{{LOCAL_TIME}}}}.\"").unwrap();

        let library = PromptLibrary::load_or_default(Some(file.path())).unwrap();
        assert_eq!(library.context_template(TEMPORAL_TEMPLATE), "It is {{LOCAL_TIME}}.");
        assert!(!library.context_template(DRAWN_FEATURES_TEMPLATE).is_empty());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let err = PromptLibrary::load(Path::new("/nonexistent/terra-prompts.yaml")).unwrap_err();
        assert!(matches!(err, PromptError::Library(_)));
    }
}
