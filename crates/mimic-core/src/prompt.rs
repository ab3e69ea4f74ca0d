use serde::{Deserialize, Serialize};

/// The complete, ordered prompt sent to a provider.
///
/// Sections keep their build order; the persona section, when present, is
/// always first and carries the persona text verbatim.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Prompt {
    pub sections: Vec<PromptSection>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PromptSection {
    pub label: SectionLabel,
    pub content: String,
}

/// What a prompt section holds (debugging, provider mapping).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionLabel {
    Persona,
    Situation,
    Transcript,
    Instruction,
}

impl Prompt {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn push(&mut self, label: SectionLabel, content: impl Into<String>) {
        self.sections.push(PromptSection {
            label,
            content: content.into(),
        });
    }

    pub fn section(&self, label: SectionLabel) -> Option<&str> {
        self.sections
            .iter()
            .find(|s| s.label == label)
            .map(|s| s.content.as_str())
    }

    /// System-role text: the persona section.
    pub fn system_text(&self) -> &str {
        self.section(SectionLabel::Persona).unwrap_or_default()
    }

    /// User-role text: every non-persona section in order, blank-line separated.
    pub fn user_text(&self) -> String {
        self.sections
            .iter()
            .filter(|s| s.label != SectionLabel::Persona)
            .map(|s| s.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}
