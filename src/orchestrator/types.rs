use serde::{Deserialize, Serialize};

use crate::context::ContextSelection;

/// How a regenerated branch receives its result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Delivery {
    /// One response applied atomically.
    #[default]
    SingleShot,
    /// Incremental chunks.
    Streaming,
}

/// Ask the provider to rework the forked text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Regeneration {
    #[serde(default)]
    pub delivery: Delivery,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<ContextSelection>,
}

/// Edits applied when forking a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchEdits {
    /// Content of the new node; usually the user's edit of the parent's text.
    pub seed_content: String,
    /// When set, the fork is sent back to the provider instead of staying pending.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regenerate: Option<Regeneration>,
}

impl BranchEdits {
    /// Text-only fork.
    pub fn seed(seed_content: impl Into<String>) -> Self {
        Self {
            seed_content: seed_content.into(),
            regenerate: None,
        }
    }

    /// Fork and regenerate with `prompt`.
    pub fn regenerate(mut self, delivery: Delivery, prompt: impl Into<String>) -> Self {
        self.regenerate = Some(Regeneration {
            delivery,
            prompt: prompt.into(),
            context: None,
        });
        self
    }

    /// Context used for the regeneration request; ignored for text-only forks.
    pub fn with_context(mut self, context: ContextSelection) -> Self {
        if let Some(regeneration) = self.regenerate.as_mut() {
            regeneration.context = Some(context);
        }
        self
    }
}
