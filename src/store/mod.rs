//! Generation tree storage.
//!
//! This module holds the data model for generated artifacts ([`GenerationNode`])
//! and the in-memory [`NodeStore`] that owns identity, soft-delete, parent/child
//! links and change notification for every node in a session.

mod node_store;


pub use node_store::{
    NodeStore, Observer, StoreSnapshot, SubscriptionId, SubscriptionKey, INTERRUPTED_MESSAGE,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of artifact a node holds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeType {
    /// A short content idea or angle.
    #[default]
    Idea,
    /// A headline.
    Title,
    /// A paragraph-length summary.
    Synopsis,
    /// A sectioned outline.
    Outline,
    /// The complete long-form piece.
    FullContent,
    /// A post sized for social networks.
    SocialPost,
    /// A prompt for an image model.
    ImagePrompt,
    /// Critique or analysis of other content.
    Analysis,
}

impl NodeType {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Idea => "idea",
            NodeType::Title => "title",
            NodeType::Synopsis => "synopsis",
            NodeType::Outline => "outline",
            NodeType::FullContent => "fullContent",
            NodeType::SocialPost => "socialPost",
            NodeType::ImagePrompt => "imagePrompt",
            NodeType::Analysis => "analysis",
        }
    }
}

impl std::fmt::Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for NodeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace(['_', '-'], "").as_str() {
            "idea" => Ok(NodeType::Idea),
            "title" => Ok(NodeType::Title),
            "synopsis" => Ok(NodeType::Synopsis),
            "outline" => Ok(NodeType::Outline),
            "fullcontent" => Ok(NodeType::FullContent),
            "socialpost" => Ok(NodeType::SocialPost),
            "imageprompt" => Ok(NodeType::ImagePrompt),
            "analysis" => Ok(NodeType::Analysis),
            _ => Err(format!("Unknown node type: {}", s)),
        }
    }
}

/// How a node's content was produced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GenerationMode {
    /// Step-by-step pipeline (idea, title, synopsis, ...).
    #[default]
    Structured,
    /// Free prompt straight to the model.
    Direct,
    /// One of several items generated together.
    Batch,
    /// Same brief rendered for several verticals.
    MultiVertical,
    /// Rewrite of existing content.
    EditExisting,
}

impl std::fmt::Display for GenerationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GenerationMode::Structured => write!(f, "structured"),
            GenerationMode::Direct => write!(f, "direct"),
            GenerationMode::Batch => write!(f, "batch"),
            GenerationMode::MultiVertical => write!(f, "multiVertical"),
            GenerationMode::EditExisting => write!(f, "editExisting"),
        }
    }
}

impl std::str::FromStr for GenerationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace(['_', '-'], "").as_str() {
            "structured" => Ok(GenerationMode::Structured),
            "direct" => Ok(GenerationMode::Direct),
            "batch" => Ok(GenerationMode::Batch),
            "multivertical" => Ok(GenerationMode::MultiVertical),
            "editexisting" => Ok(GenerationMode::EditExisting),
            _ => Err(format!("Unknown generation mode: {}", s)),
        }
    }
}

/// Lifecycle state of a node.
///
/// `Pending -> Processing -> {Completed | Failed | Cancelled}`. The three
/// terminal states are never left once entered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    /// Accepted, not yet dispatched.
    #[default]
    Pending,
    /// Request in flight.
    Processing,
    /// Sealed with the full result.
    Completed,
    /// Sealed after a provider or stream error.
    Failed,
    /// Sealed after the consumer cancelled.
    Cancelled,
}

impl NodeStatus {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Pending => "pending",
            NodeStatus::Processing => "processing",
            NodeStatus::Completed => "completed",
            NodeStatus::Failed => "failed",
            NodeStatus::Cancelled => "cancelled",
        }
    }

    /// Whether no further transition is allowed.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            NodeStatus::Completed | NodeStatus::Failed | NodeStatus::Cancelled
        )
    }

    /// Whether `self -> next` is a legal edge of the lifecycle.
    pub fn can_transition_to(&self, next: NodeStatus) -> bool {
        match (self, next) {
            (NodeStatus::Pending, NodeStatus::Processing) => true,
            (NodeStatus::Processing, NodeStatus::Completed)
            | (NodeStatus::Processing, NodeStatus::Failed)
            | (NodeStatus::Processing, NodeStatus::Cancelled) => true,
            (NodeStatus::Pending, _) | (NodeStatus::Processing, _) => false,
            (NodeStatus::Completed, _) | (NodeStatus::Failed, _) | (NodeStatus::Cancelled, _) => {
                false
            }
        }
    }
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for NodeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(NodeStatus::Pending),
            "processing" => Ok(NodeStatus::Processing),
            "completed" => Ok(NodeStatus::Completed),
            "failed" => Ok(NodeStatus::Failed),
            "cancelled" => Ok(NodeStatus::Cancelled),
            _ => Err(format!("Unknown node status: {}", s)),
        }
    }
}

/// One entry of an outline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutlineEntry {
    /// Section heading.
    pub heading: String,
    /// Optional short description of the section.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

/// Nested payload for nodes whose result is not flat text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuredContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synopsis: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outline: Vec<OutlineEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Free-form metadata; stream `metadata` chunks are merged in here.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_prompts: Vec<String>,
}

impl StructuredContent {
    /// Shallow-merge `fields` into `metadata`; later keys win.
    pub fn merge_metadata(&mut self, fields: serde_json::Map<String, serde_json::Value>) {
        for (key, value) in fields {
            self.metadata.insert(key, value);
        }
    }
}

/// One versioned artifact in the generation tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationNode {
    /// Unique node identifier.
    pub id: String,
    /// Artifact kind.
    #[serde(rename = "type")]
    pub node_type: NodeType,
    /// How the content was produced.
    pub mode: GenerationMode,
    /// Text payload; `None` until data arrives.
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<StructuredContent>,
    /// Node this was branched or derived from.
    pub parent_id: Option<String>,
    /// Top-most ancestor; equals `id` for roots.
    pub root_id: String,
    /// Child ids in creation order.
    pub children: Vec<String>,
    pub visible: bool,
    pub selected: bool,
    /// Soft-delete tombstone.
    pub deleted: bool,
    pub provider: String,
    pub model: String,
    pub tokens_input: u64,
    pub tokens_output: u64,
    pub cost: f64,
    pub status: NodeStatus,
    /// Set only when `status` is `failed`.
    pub error_message: Option<String>,
    /// Serialized context selection the request was built from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_data: Option<serde_json::Value>,
    /// Target vertical for multi-vertical generations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vertical: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl GenerationNode {
    /// Create a new pending root node.
    pub fn new(
        node_type: NodeType,
        mode: GenerationMode,
        provider: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        let id = Uuid::new_v4().to_string();
        Self {
            root_id: id.clone(),
            id,
            node_type,
            mode,
            content: None,
            structured_content: None,
            parent_id: None,
            children: Vec::new(),
            visible: true,
            selected: false,
            deleted: false,
            provider: provider.into(),
            model: model.into(),
            tokens_input: 0,
            tokens_output: 0,
            cost: 0.0,
            status: NodeStatus::Pending,
            error_message: None,
            context_data: None,
            vertical: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Link to a parent; `root_id` is resolved by the store on insert.
    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    /// Set the initial content.
    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    /// Set structured content.
    pub fn with_structured_content(mut self, structured: StructuredContent) -> Self {
        self.structured_content = Some(structured);
        self
    }

    /// Attach the serialized context selection.
    pub fn with_context_data(mut self, context_data: serde_json::Value) -> Self {
        self.context_data = Some(context_data);
        self
    }

    /// Set the target vertical.
    pub fn with_vertical(mut self, vertical: impl Into<String>) -> Self {
        self.vertical = Some(vertical.into());
        self
    }

    /// Whether this node has no parent.
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// Whether the node has reached a terminal status.
    pub fn is_sealed(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Partial update merged into a node by [`NodeStore::update`].
///
/// Every `Some` field overwrites the stored value; `None` leaves it alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodePatch {
    pub status: Option<NodeStatus>,
    pub content: Option<String>,
    pub structured_content: Option<StructuredContent>,
    pub model: Option<String>,
    pub tokens_input: Option<u64>,
    pub tokens_output: Option<u64>,
    pub cost: Option<f64>,
    pub error_message: Option<String>,
    pub visible: Option<bool>,
    pub selected: Option<bool>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl NodePatch {
    /// Create an empty patch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the status.
    pub fn status(mut self, status: NodeStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Set the text content.
    pub fn content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    /// Replace structured content.
    pub fn structured_content(mut self, structured: StructuredContent) -> Self {
        self.structured_content = Some(structured);
        self
    }

    /// Set the model that actually served the request.
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Set token counters.
    pub fn tokens(mut self, input: u64, output: u64) -> Self {
        self.tokens_input = Some(input);
        self.tokens_output = Some(output);
        self
    }

    /// Set output token counter only.
    pub fn tokens_output(mut self, output: u64) -> Self {
        self.tokens_output = Some(output);
        self
    }

    /// Set the cost.
    pub fn cost(mut self, cost: f64) -> Self {
        self.cost = Some(cost);
        self
    }

    /// Set the error message (requires a `failed` status).
    pub fn error_message(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    /// Set the visible flag.
    pub fn visible(mut self, visible: bool) -> Self {
        self.visible = Some(visible);
        self
    }

    /// Set the selected flag.
    pub fn selected(mut self, selected: bool) -> Self {
        self.selected = Some(selected);
        self
    }

    /// Name of the first field that may not change once a node is sealed.
    pub(crate) fn first_sealed_field(&self) -> Option<&'static str> {
        if self.content.is_some() {
            Some("content")
        } else if self.model.is_some() {
            Some("model")
        } else if self.tokens_input.is_some() {
            Some("tokensInput")
        } else if self.tokens_output.is_some() {
            Some("tokensOutput")
        } else if self.cost.is_some() {
            Some("cost")
        } else if self.error_message.is_some() {
            Some("errorMessage")
        } else if self.completed_at.is_some() {
            Some("completedAt")
        } else {
            None
        }
    }
}

/// What happened to a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreEventKind {
    Inserted,
    Updated,
    Deleted,
}

/// Change notification delivered to subscribers after a committed mutation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoreEvent {
    pub kind: StoreEventKind,
    /// Snapshot of the node after the mutation.
    pub node: GenerationNode,
}
