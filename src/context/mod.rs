//! Context block assembly.
//!
//! A [`ContextSelection`] describes which style guides, prior pieces and
//! free-text instructions accompany a request. A [`ContextBuilder`] turns it
//! into the text block sent upstream. Builders must be pure: the same
//! selection always yields the same block, so previews can be rebuilt freely.

use serde::{Deserialize, Serialize};

/// Characters kept per prior piece in summary mode.
const SUMMARY_CHARS: usize = 280;

/// A named style guide the user can toggle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StyleGuide {
    pub name: String,
    pub content: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// A previously generated piece referenced as context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentReference {
    /// Node the text came from, if it lives in the tree.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    pub title: String,
    pub content: String,
}

/// How much of the referenced prior content to include.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorContentMode {
    #[default]
    None,
    /// Titles only.
    Titles,
    /// Titles plus a truncated excerpt.
    Summary,
    /// Full text.
    Full,
}

/// The user's chosen context for a generation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextSelection {
    #[serde(default)]
    pub style_guides: Vec<StyleGuide>,
    #[serde(default)]
    pub prior_content_mode: PriorContentMode,
    #[serde(default)]
    pub prior_content: Vec<ContentReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

impl ContextSelection {
    /// Create an empty selection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an enabled style guide.
    pub fn with_style_guide(mut self, name: impl Into<String>, content: impl Into<String>) -> Self {
        self.style_guides.push(StyleGuide {
            name: name.into(),
            content: content.into(),
            enabled: true,
        });
        self
    }

    /// Add a prior-content reference.
    pub fn with_prior_content(mut self, reference: ContentReference) -> Self {
        self.prior_content.push(reference);
        self
    }

    /// Set the inclusion mode for prior content.
    pub fn with_prior_content_mode(mut self, mode: PriorContentMode) -> Self {
        self.prior_content_mode = mode;
        self
    }

    /// Set free-text instructions.
    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    /// Whether nothing would be emitted.
    pub fn is_empty(&self) -> bool {
        !self.style_guides.iter().any(|g| g.enabled)
            && (self.prior_content_mode == PriorContentMode::None || self.prior_content.is_empty())
            && self
                .instructions
                .as_deref()
                .map_or(true, |i| i.trim().is_empty())
    }
}

/// Serializes a selection into the context block sent with a request.
pub trait ContextBuilder: Send + Sync {
    /// Build the block. Must be deterministic for equal selections.
    fn build(&self, selection: &ContextSelection) -> String;
}

/// Markdown-sectioned context block.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkdownContextBuilder;

impl ContextBuilder for MarkdownContextBuilder {
    fn build(&self, selection: &ContextSelection) -> String {
        let mut sections = Vec::new();

        let guides: Vec<String> = selection
            .style_guides
            .iter()
            .filter(|g| g.enabled)
            .map(|g| format!("### {}\n{}", g.name.trim(), g.content.trim()))
            .collect();
        if !guides.is_empty() {
            sections.push(format!("## Style guides\n\n{}", guides.join("\n\n")));
        }

        let prior: Vec<String> = match selection.prior_content_mode {
            PriorContentMode::None => Vec::new(),
            PriorContentMode::Titles => selection
                .prior_content
                .iter()
                .map(|r| format!("- {}", r.title.trim()))
                .collect(),
            PriorContentMode::Summary => selection
                .prior_content
                .iter()
                .map(|r| format!("### {}\n{}", r.title.trim(), truncate(r.content.trim(), SUMMARY_CHARS)))
                .collect(),
            PriorContentMode::Full => selection
                .prior_content
                .iter()
                .map(|r| format!("### {}\n{}", r.title.trim(), r.content.trim()))
                .collect(),
        };
        if !prior.is_empty() {
            let separator = if selection.prior_content_mode == PriorContentMode::Titles {
                "\n"
            } else {
                "\n\n"
            };
            sections.push(format!("## Prior content\n\n{}", prior.join(separator)));
        }

        if let Some(instructions) = selection
            .instructions
            .as_deref()
            .map(str::trim)
            .filter(|i| !i.is_empty())
        {
            sections.push(format!("## Instructions\n\n{}", instructions));
        }

        sections.join("\n\n")
    }
}

/// Truncate to `max_chars` characters, marking the cut with an ellipsis.
fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}
