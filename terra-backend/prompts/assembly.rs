use std::collections::HashSet;
use std::fmt;

use super::library::PromptLibrary;
use super::{AdaptationDirective, ContextBlock, CoreIdentity, template};

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum PromptError {
    #[error("prompt failed validation: {}", join_items(.0))]
    Validation(Vec<ChecklistItem>),

    #[error("{0}")]
    Library(String),
}

fn join_items(items: &[ChecklistItem]) -> String {
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Checks every assembled prompt must pass before it is handed to an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecklistItem {
    IdentityPresent,
    ObjectiveStated,
    ContextAttributed,
    SlotsResolved,
    UncertaintyGuidance,
    SourceAttribution,
    ConfidenceLevels,
}

impl ChecklistItem {
    pub const ALL: [ChecklistItem; 7] = [
        ChecklistItem::IdentityPresent,
        ChecklistItem::ObjectiveStated,
        ChecklistItem::ContextAttributed,
        ChecklistItem::SlotsResolved,
        ChecklistItem::UncertaintyGuidance,
        ChecklistItem::SourceAttribution,
        ChecklistItem::ConfidenceLevels,
    ];
}

impl fmt::Display for ChecklistItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChecklistItem::IdentityPresent => "identity present",
            ChecklistItem::ObjectiveStated => "objective stated",
            ChecklistItem::ContextAttributed => "context entries carry source and annotation",
            ChecklistItem::SlotsResolved => "no unresolved template slots",
            ChecklistItem::UncertaintyGuidance => "uncertainty guidance",
            ChecklistItem::SourceAttribution => "source attribution instruction",
            ChecklistItem::ConfidenceLevels => "confidence level instruction",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationReport {
    pub results: Vec<(ChecklistItem, bool)>,
    /// Slot names left unresolved, for diagnostics.
    pub unresolved: Vec<String>,
}

impl ValidationReport {
    pub fn failures(&self) -> Vec<ChecklistItem> {
        self.results
            .iter()
            .filter(|(_, passed)| !passed)
            .map(|(item, _)| *item)
            .collect()
    }

    pub fn is_ready(&self) -> bool {
        self.results.iter().all(|(_, passed)| *passed)
    }
}

/// Builds one agent prompt: identity, guiding principles, static core,
/// context blocks, active directives, then the disclosure clause.
pub struct PromptAssembler<'a> {
    library: &'a PromptLibrary,
    identity: CoreIdentity,
    core: String,
    contexts: Vec<ContextBlock>,
    directives: Vec<AdaptationDirective>,
    active: HashSet<String>,
}

impl<'a> PromptAssembler<'a> {
    pub fn for_agent(library: &'a PromptLibrary, agent: &str) -> Result<Self, PromptError> {
        let prompt = library.agent(agent)?;
        Ok(Self {
            library,
            identity: prompt.identity.clone(),
            core: prompt.core.clone(),
            contexts: Vec::new(),
            directives: library.directives.clone(),
            active: HashSet::new(),
        })
    }

    pub fn context(mut self, block: ContextBlock) -> Self {
        self.contexts.push(block);
        self
    }

    pub fn directive(mut self, directive: AdaptationDirective) -> Self {
        self.directives.push(directive);
        self
    }

    /// Mark a trigger condition as active so matching directives are included.
    pub fn activate(mut self, condition: &str) -> Self {
        self.active.insert(condition.to_string());
        self
    }

    pub fn validate(&self) -> ValidationReport {
        let mut unresolved = template::missing_slots(&self.core, &Default::default());
        for block in &self.contexts {
            unresolved.extend(template::missing_slots(&block.template, &block.vars()));
        }
        for directive in self.active_directives() {
            unresolved.extend(template::missing_slots(&directive.template, &directive.values));
        }
        unresolved.extend(template::missing_slots(
            &self.library.disclosure_clause,
            &Default::default(),
        ));

        let clause = self.library.disclosure_clause.to_lowercase();
        let results = ChecklistItem::ALL
            .into_iter()
            .map(|item| {
                let passed = match item {
                    ChecklistItem::IdentityPresent => self.identity.is_present(),
                    ChecklistItem::ObjectiveStated => !self.core.trim().is_empty(),
                    ChecklistItem::ContextAttributed => self
                        .contexts
                        .iter()
                        .flat_map(|b| &b.entries)
                        .all(|e| e.is_attributed()),
                    ChecklistItem::SlotsResolved => unresolved.is_empty(),
                    ChecklistItem::UncertaintyGuidance => clause.contains("uncertain"),
                    ChecklistItem::SourceAttribution => clause.contains("source"),
                    ChecklistItem::ConfidenceLevels => clause.contains("confidence"),
                };
                (item, passed)
            })
            .collect();

        ValidationReport {
            results,
            unresolved,
        }
    }

    fn active_directives(&self) -> impl Iterator<Item = &AdaptationDirective> {
        self.directives.iter().filter(|d| d.applies(&self.active))
    }

    /// Render the prompt, or fail with every checklist item that did not pass.
    pub fn assemble(&self) -> Result<String, PromptError> {
        let report = self.validate();
        if !report.is_ready() {
            tracing::warn!(
                failures = ?report.failures(),
                unresolved = ?report.unresolved,
                "Prompt failed validation"
            );
            return Err(PromptError::Validation(report.failures()));
        }

        let mut sections = vec![self.identity.render()];

        if !self.library.principles.is_empty() {
            let principles = self
                .library
                .principles
                .iter()
                .map(|p| format!("- {}", p.text.trim()))
                .collect::<Vec<_>>()
                .join("\n");
            sections.push(format!("GUIDING PRINCIPLES:\n{principles}"));
        }

        sections.push(self.core.trim().to_string());
        sections.extend(
            self.contexts
                .iter()
                .map(ContextBlock::render)
                .filter(|s| !s.is_empty()),
        );
        sections.extend(self.active_directives().map(AdaptationDirective::render));
        sections.push(self.library.disclosure_clause.trim().to_string());

        Ok(sections.join("\n\n"))
    }
}
