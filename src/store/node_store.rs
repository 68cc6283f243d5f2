use std::collections::{HashMap, HashSet};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{GenerationNode, NodePatch, NodeStatus, StoreEvent, StoreEventKind, StructuredContent};
use crate::error::{StoreError, StoreResult};

/// Error message given to nodes restored while still processing.
pub const INTERRUPTED_MESSAGE: &str = "Generation interrupted before completion";

/// Callback invoked synchronously after every committed mutation it matches.
pub type Observer = Box<dyn Fn(&StoreEvent) + Send + Sync>;

/// Handle returned by [`NodeStore::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Which events a subscriber wants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionKey {
    /// Events for one node id.
    Node(String),
    /// Events for nodes without a parent.
    Roots,
    /// Every event.
    All,
}

impl SubscriptionKey {
    fn matches(&self, node: &GenerationNode) -> bool {
        match self {
            SubscriptionKey::Node(id) => *id == node.id,
            SubscriptionKey::Roots => node.parent_id.is_none(),
            SubscriptionKey::All => true,
        }
    }
}

struct Subscription {
    id: SubscriptionId,
    key: SubscriptionKey,
    observer: Observer,
}

/// Serializable copy of every node, tombstones included, in creation order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub nodes: Vec<GenerationNode>,
}

/// Authoritative in-memory store of generation nodes.
///
/// All mutations are synchronous and all-or-nothing: every check runs before
/// the first field is written. Deleted nodes stay in the map as tombstones
/// and are filtered out by the query methods.
#[derive(Default)]
pub struct NodeStore {
    nodes: HashMap<String, GenerationNode>,
    /// Node ids in creation order.
    order: Vec<String>,
    subscriptions: Vec<Subscription>,
    next_subscription: u64,
}

impl NodeStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------

    /// Add a node, linking it under its parent when `parent_id` is set.
    ///
    /// The node's `root_id` is recomputed from the parent and its `children`
    /// must be empty: only new leaves are ever linked, which keeps the tree acyclic.
    /// New nodes start live and pending, with no outcome recorded.
    pub fn insert(&mut self, mut node: GenerationNode) -> StoreResult<GenerationNode> {
        if self.nodes.contains_key(&node.id) {
            return Err(StoreError::DuplicateId { node_id: node.id });
        }
        if !node.children.is_empty() {
            return Err(StoreError::Integrity {
                node_id: node.id,
                reason: "new nodes cannot carry children".to_string(),
            });
        }
        validate_fresh(&node)?;
        validate_cost(&node.id, node.cost)?;

        node.root_id = match &node.parent_id {
            Some(parent_id) => {
                let parent = self
                    .nodes
                    .get(parent_id)
                    .filter(|p| !p.deleted)
                    .ok_or_else(|| StoreError::DanglingParent {
                        parent_id: parent_id.clone(),
                    })?;
                parent.root_id.clone()
            }
            None => node.id.clone(),
        };

        let parent = match &node.parent_id {
            Some(parent_id) => self.nodes.get_mut(parent_id).map(|parent| {
                parent.children.push(node.id.clone());
                parent.clone()
            }),
            None => None,
        };

        debug!(
            node_id = %node.id,
            parent_id = ?node.parent_id,
            node_type = %node.node_type,
            "Node inserted"
        );

        self.order.push(node.id.clone());
        self.nodes.insert(node.id.clone(), node.clone());
        self.notify(StoreEventKind::Inserted, &node);
        if let Some(parent) = parent {
            self.notify(StoreEventKind::Updated, &parent);
        }
        Ok(node)
    }

    /// Merge `patch` into an existing node.
    ///
    /// Status changes must follow the lifecycle. Once sealed, only
    /// `visible`, `selected` and `structured_content` may change.
    pub fn update(&mut self, id: &str, patch: NodePatch) -> StoreResult<GenerationNode> {
        let node = self.nodes.get(id).ok_or_else(|| StoreError::NotFound {
            node_id: id.to_string(),
        })?;

        let next_status = match patch.status {
            Some(next) if next == node.status && !next.is_terminal() => node.status,
            Some(next) if node.status.can_transition_to(next) => next,
            Some(next) => {
                warn!(
                    node_id = %id,
                    from = %node.status,
                    to = %next,
                    "Rejected status transition"
                );
                return Err(StoreError::InvalidTransition {
                    node_id: id.to_string(),
                    from: node.status.to_string(),
                    to: next.to_string(),
                });
            }
            None => node.status,
        };

        if node.is_sealed() {
            if let Some(field) = patch.first_sealed_field() {
                return Err(StoreError::Sealed {
                    node_id: id.to_string(),
                    field: field.to_string(),
                });
            }
        }

        if let Some(cost) = patch.cost {
            validate_cost(id, cost)?;
        }

        if patch.error_message.is_some() && next_status != NodeStatus::Failed {
            return Err(StoreError::InvalidField {
                node_id: id.to_string(),
                field: "errorMessage".to_string(),
                reason: format!("only allowed on failed nodes, status is {}", next_status),
            });
        }

        let sealing = !node.is_sealed() && next_status.is_terminal();

        // Validation done; apply.
        let node = self.nodes.get_mut(id).ok_or_else(|| StoreError::NotFound {
            node_id: id.to_string(),
        })?;

        node.status = next_status;
        if let Some(content) = patch.content {
            node.content = Some(content);
        }
        if let Some(structured) = patch.structured_content {
            node.structured_content = Some(structured);
        }
        if let Some(model) = patch.model {
            node.model = model;
        }
        if let Some(tokens) = patch.tokens_input {
            node.tokens_input = tokens;
        }
        if let Some(tokens) = patch.tokens_output {
            node.tokens_output = tokens;
        }
        if let Some(cost) = patch.cost {
            node.cost = cost;
        }
        if let Some(message) = patch.error_message {
            node.error_message = Some(message);
        }
        if let Some(visible) = patch.visible {
            node.visible = visible;
        }
        if let Some(selected) = patch.selected {
            node.selected = selected;
        }
        if let Some(completed_at) = patch.completed_at {
            node.completed_at = Some(completed_at);
        }
        if sealing && node.completed_at.is_none() {
            node.completed_at = Some(Utc::now());
        }

        let snapshot = node.clone();
        self.notify(StoreEventKind::Updated, &snapshot);
        Ok(snapshot)
    }

    /// Mark a node deleted. Parent and child links are left untouched.
    pub fn soft_delete(&mut self, id: &str) -> StoreResult<()> {
        let node = self.nodes.get_mut(id).ok_or_else(|| StoreError::NotFound {
            node_id: id.to_string(),
        })?;

        if node.deleted {
            return Ok(());
        }

        node.deleted = true;
        let snapshot = node.clone();
        debug!(node_id = %id, children = snapshot.children.len(), "Node soft-deleted");
        self.notify(StoreEventKind::Deleted, &snapshot);
        Ok(())
    }

    /// Fork `parent_id` into a new pending child seeded with `seed_content`.
    ///
    /// The parent is never modified apart from gaining the child link.
    pub fn branch(
        &mut self,
        parent_id: &str,
        seed_content: impl Into<String>,
    ) -> StoreResult<GenerationNode> {
        self.fork(parent_id, seed_content.into(), None)
    }

    /// Like [`branch`](Self::branch), but records `context_data` on the child
    /// instead of inheriting the parent's.
    pub fn branch_with_context(
        &mut self,
        parent_id: &str,
        seed_content: impl Into<String>,
        context_data: serde_json::Value,
    ) -> StoreResult<GenerationNode> {
        self.fork(parent_id, seed_content.into(), Some(context_data))
    }

    fn fork(
        &mut self,
        parent_id: &str,
        seed_content: String,
        context_data: Option<serde_json::Value>,
    ) -> StoreResult<GenerationNode> {
        let parent = self
            .nodes
            .get(parent_id)
            .filter(|p| !p.deleted)
            .ok_or_else(|| StoreError::DanglingParent {
                parent_id: parent_id.to_string(),
            })?;

        let mut child = GenerationNode::new(
            parent.node_type,
            parent.mode,
            parent.provider.clone(),
            parent.model.clone(),
        )
        .with_parent(parent_id)
        .with_content(seed_content);
        child.context_data = context_data.or_else(|| parent.context_data.clone());
        child.vertical = parent.vertical.clone();

        self.insert(child)
    }

    /// Replace a node's structured content. Allowed after sealing.
    pub fn annotate(
        &mut self,
        id: &str,
        structured: StructuredContent,
    ) -> StoreResult<GenerationNode> {
        self.update(id, NodePatch::new().structured_content(structured))
    }

    /// Set the `visible` flag.
    pub fn set_visible(&mut self, id: &str, visible: bool) -> StoreResult<GenerationNode> {
        self.update(id, NodePatch::new().visible(visible))
    }

    /// Set the `selected` flag.
    pub fn set_selected(&mut self, id: &str, selected: bool) -> StoreResult<GenerationNode> {
        self.update(id, NodePatch::new().selected(selected))
    }

    /// Select `id` and deselect its live siblings (or other live roots).
    pub fn select_exclusive(&mut self, id: &str) -> StoreResult<GenerationNode> {
        let node = self.get(id).ok_or_else(|| StoreError::NotFound {
            node_id: id.to_string(),
        })?;

        let siblings: Vec<String> = match &node.parent_id {
            Some(parent_id) => self
                .children_of(parent_id)
                .into_iter()
                .filter(|n| n.id != id && n.selected)
                .map(|n| n.id.clone())
                .collect(),
            None => self
                .roots()
                .into_iter()
                .filter(|n| n.id != id && n.selected)
                .map(|n| n.id.clone())
                .collect(),
        };

        for sibling in siblings {
            self.set_selected(&sibling, false)?;
        }
        self.set_selected(id, true)
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Live node by id; tombstones are not returned.
    pub fn get(&self, id: &str) -> Option<&GenerationNode> {
        self.nodes.get(id).filter(|n| !n.deleted)
    }

    /// Node by id including tombstones, for resolving parent references.
    pub fn resolve(&self, id: &str) -> Option<&GenerationNode> {
        self.nodes.get(id)
    }

    /// Live root nodes in creation order.
    pub fn roots(&self) -> Vec<&GenerationNode> {
        self.order
            .iter()
            .filter_map(|id| self.get(id))
            .filter(|n| n.parent_id.is_none())
            .collect()
    }

    /// Live children of `id`, ordered by the parent's `children` list.
    ///
    /// Works on a deleted parent too, so orphaned children stay reachable.
    pub fn children_of(&self, id: &str) -> Vec<&GenerationNode> {
        match self.nodes.get(id) {
            Some(parent) => parent
                .children
                .iter()
                .filter_map(|child_id| self.get(child_id))
                .collect(),
            None => Vec::new(),
        }
    }

    /// Live ancestors of `id`, nearest first, ending at the root.
    pub fn ancestors(&self, id: &str) -> Vec<&GenerationNode> {
        let mut ancestors = Vec::new();
        let mut cursor = self.nodes.get(id).and_then(|n| n.parent_id.as_deref());

        while let Some(parent_id) = cursor {
            let Some(parent) = self.nodes.get(parent_id) else {
                break;
            };
            if !parent.deleted {
                ancestors.push(parent);
            }
            cursor = parent.parent_id.as_deref();
        }

        ancestors
    }

    /// Live descendants of `id`, depth-first in each parent's child order.
    ///
    /// Deleted nodes are skipped but their subtrees are still walked.
    pub fn descendants(&self, id: &str) -> Vec<&GenerationNode> {
        let mut out = Vec::new();
        let mut stack: Vec<&str> = match self.nodes.get(id) {
            Some(node) => node.children.iter().rev().map(String::as_str).collect(),
            None => return out,
        };

        while let Some(next) = stack.pop() {
            if let Some(node) = self.nodes.get(next) {
                if !node.deleted {
                    out.push(node);
                }
                stack.extend(node.children.iter().rev().map(String::as_str));
            }
        }

        out
    }

    /// Live nodes sharing `root_id`, in creation order.
    pub fn nodes_by_root(&self, root_id: &str) -> Vec<&GenerationNode> {
        self.order
            .iter()
            .filter_map(|id| self.get(id))
            .filter(|n| n.root_id == root_id)
            .collect()
    }

    /// Number of nodes, tombstones included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the store holds no nodes at all.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    // ------------------------------------------------------------------
    // Subscriptions
    // ------------------------------------------------------------------

    /// Register an observer. It runs synchronously after each matching mutation.
    pub fn subscribe<F>(&mut self, key: SubscriptionKey, observer: F) -> SubscriptionId
    where
        F: Fn(&StoreEvent) + Send + Sync + 'static,
    {
        self.next_subscription += 1;
        let id = SubscriptionId(self.next_subscription);
        self.subscriptions.push(Subscription {
            id,
            key,
            observer: Box::new(observer),
        });
        id
    }

    /// Remove an observer. Returns `false` if it was not registered.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscriptions.len();
        self.subscriptions.retain(|s| s.id != id);
        self.subscriptions.len() != before
    }

    fn notify(&self, kind: StoreEventKind, node: &GenerationNode) {
        let matching: Vec<&Subscription> = self
            .subscriptions
            .iter()
            .filter(|s| s.key.matches(node))
            .collect();
        if matching.is_empty() {
            return;
        }

        let event = StoreEvent {
            kind,
            node: node.clone(),
        };
        for subscription in matching {
            (subscription.observer)(&event);
        }
    }

    // ------------------------------------------------------------------
    // Snapshots
    // ------------------------------------------------------------------

    /// Copy every node, tombstones included, in creation order.
    pub fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            nodes: self
                .order
                .iter()
                .filter_map(|id| self.nodes.get(id).cloned())
                .collect(),
        }
    }

    /// Rebuild a store from a snapshot, re-checking every tree invariant.
    ///
    /// No generation survives a snapshot, so nodes captured mid-flight are
    /// sealed as failed with [`INTERRUPTED_MESSAGE`].
    pub fn restore(snapshot: StoreSnapshot) -> StoreResult<Self> {
        let mut store = NodeStore::new();

        for mut node in snapshot.nodes {
            if store.nodes.contains_key(&node.id) {
                return Err(StoreError::DuplicateId { node_id: node.id });
            }
            validate_cost(&node.id, node.cost)?;
            if node.status == NodeStatus::Processing {
                warn!(node_id = %node.id, "Sealing interrupted generation on restore");
                node.status = NodeStatus::Failed;
                node.error_message = Some(INTERRUPTED_MESSAGE.to_string());
                node.completed_at = Some(Utc::now());
            }
            store.order.push(node.id.clone());
            store.nodes.insert(node.id.clone(), node);
        }

        store.check_integrity()?;
        Ok(store)
    }

    /// Verify bidirectional links, root ids and acyclicity for every node.
    pub fn check_integrity(&self) -> StoreResult<()> {
        for node in self.nodes.values() {
            if let Some(parent_id) = &node.parent_id {
                let parent = self.nodes.get(parent_id).ok_or_else(|| StoreError::Integrity {
                    node_id: node.id.clone(),
                    reason: format!("parent {} does not exist", parent_id),
                })?;
                if !parent.children.contains(&node.id) {
                    return Err(StoreError::Integrity {
                        node_id: node.id.clone(),
                        reason: format!("parent {} does not list it as a child", parent_id),
                    });
                }
            }

            for child_id in &node.children {
                let linked = self
                    .nodes
                    .get(child_id)
                    .is_some_and(|c| c.parent_id.as_deref() == Some(node.id.as_str()));
                if !linked {
                    return Err(StoreError::Integrity {
                        node_id: node.id.clone(),
                        reason: format!("child {} does not point back", child_id),
                    });
                }
            }

            let root = self.walk_to_root(&node.id)?;
            if root != node.root_id {
                return Err(StoreError::Integrity {
                    node_id: node.id.clone(),
                    reason: format!("root_id {} but chain ends at {}", node.root_id, root),
                });
            }
        }

        Ok(())
    }

    fn walk_to_root(&self, id: &str) -> StoreResult<String> {
        let mut seen = HashSet::new();
        let mut current = id;

        loop {
            if !seen.insert(current) {
                return Err(StoreError::Integrity {
                    node_id: id.to_string(),
                    reason: "parent chain contains a cycle".to_string(),
                });
            }
            let node = self.nodes.get(current).ok_or_else(|| StoreError::Integrity {
                node_id: id.to_string(),
                reason: format!("chain references missing node {}", current),
            })?;
            match &node.parent_id {
                Some(parent_id) => current = parent_id,
                None => return Ok(node.id.clone()),
            }
        }
    }
}

impl std::fmt::Debug for NodeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeStore")
            .field("nodes", &self.nodes.len())
            .field("subscriptions", &self.subscriptions.len())
            .finish()
    }
}

fn validate_fresh(node: &GenerationNode) -> StoreResult<()> {
    if node.status != NodeStatus::Pending {
        return Err(StoreError::InvalidTransition {
            node_id: node.id.clone(),
            from: "new".to_string(),
            to: node.status.to_string(),
        });
    }
    let field = if node.deleted {
        Some("deleted")
    } else if node.completed_at.is_some() {
        Some("completedAt")
    } else if node.error_message.is_some() {
        Some("errorMessage")
    } else {
        None
    };
    match field {
        Some(field) => Err(StoreError::InvalidField {
            node_id: node.id.clone(),
            field: field.to_string(),
            reason: "must be unset on a new node".to_string(),
        }),
        None => Ok(()),
    }
}

fn validate_cost(node_id: &str, cost: f64) -> StoreResult<()> {
    if cost.is_finite() && cost >= 0.0 {
        Ok(())
    } else {
        Err(StoreError::InvalidField {
            node_id: node_id.to_string(),
            field: "cost".to_string(),
            reason: format!("must be a non-negative number, got {}", cost),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{GenerationMode, NodeType};
    use std::sync::{Arc, Mutex};

    fn root() -> GenerationNode {
        GenerationNode::new(NodeType::Idea, GenerationMode::Structured, "openai", "gpt-4o")
    }

    fn child_of(parent: &GenerationNode) -> GenerationNode {
        GenerationNode::new(NodeType::Title, GenerationMode::Structured, "openai", "gpt-4o")
            .with_parent(&parent.id)
    }

    #[test]
    fn test_insert_root_sets_root_id() {
        let mut store = NodeStore::new();
        let mut node = root();
        node.root_id = "bogus".to_string();
        let stored = store.insert(node).unwrap();
        assert_eq!(stored.root_id, stored.id);
        assert_eq!(store.roots().len(), 1);
    }

    #[test]
    fn test_insert_links_child_to_parent() {
        let mut store = NodeStore::new();
        let a = store.insert(root()).unwrap();
        let b = store.insert(child_of(&a)).unwrap();

        assert_eq!(b.root_id, a.id);
        assert_eq!(store.get(&a.id).unwrap().children, vec![b.id.clone()]);
    }

    #[test]
    fn test_insert_dangling_parent() {
        let mut store = NodeStore::new();
        let orphan = root().with_parent("missing");
        let err = store.insert(orphan).unwrap_err();
        assert!(matches!(err, StoreError::DanglingParent { .. }));
        assert!(store.is_empty());
    }

    #[test]
    fn test_insert_under_deleted_parent_fails() {
        let mut store = NodeStore::new();
        let a = store.insert(root()).unwrap();
        store.soft_delete(&a.id).unwrap();

        let err = store.insert(child_of(&a)).unwrap_err();
        assert!(matches!(err, StoreError::DanglingParent { .. }));
        assert!(store.resolve(&a.id).unwrap().children.is_empty());
    }

    #[test]
    fn test_insert_duplicate_id() {
        let mut store = NodeStore::new();
        let a = store.insert(root()).unwrap();
        let mut dup = root();
        dup.id = a.id.clone();
        assert!(matches!(
            store.insert(dup),
            Err(StoreError::DuplicateId { .. })
        ));
    }

    #[test]
    fn test_insert_requires_fresh_pending_node() {
        let mut store = NodeStore::new();

        for status in [
            NodeStatus::Processing,
            NodeStatus::Completed,
            NodeStatus::Failed,
            NodeStatus::Cancelled,
        ] {
            let mut node = root();
            node.status = status;
            assert!(matches!(
                store.insert(node),
                Err(StoreError::InvalidTransition { .. })
            ));
        }

        let mut deleted = root();
        deleted.deleted = true;
        let mut finished = root();
        finished.completed_at = Some(Utc::now());
        let mut errored = root();
        errored.error_message = Some("boom".to_string());
        for node in [deleted, finished, errored] {
            assert!(matches!(
                store.insert(node),
                Err(StoreError::InvalidField { .. })
            ));
        }

        assert!(store.is_empty());
    }

    #[test]
    fn test_update_not_found() {
        let mut store = NodeStore::new();
        let err = store.update("nope", NodePatch::new().visible(false)).unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[test]
    fn test_update_lifecycle() {
        let mut store = NodeStore::new();
        let a = store.insert(root()).unwrap();

        store
            .update(&a.id, NodePatch::new().status(NodeStatus::Processing))
            .unwrap();
        let done = store
            .update(
                &a.id,
                NodePatch::new()
                    .status(NodeStatus::Completed)
                    .content("done")
                    .cost(0.01),
            )
            .unwrap();

        assert_eq!(done.status, NodeStatus::Completed);
        assert!(done.completed_at.is_some());
    }

    #[test]
    fn test_update_rejects_skipping_processing() {
        let mut store = NodeStore::new();
        let a = store.insert(root()).unwrap();
        let err = store
            .update(&a.id, NodePatch::new().status(NodeStatus::Completed))
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));
    }

    #[test]
    fn test_update_rejects_resurrection() {
        let mut store = NodeStore::new();
        let a = store.insert(root()).unwrap();
        store
            .update(&a.id, NodePatch::new().status(NodeStatus::Processing))
            .unwrap();
        store
            .update(&a.id, NodePatch::new().status(NodeStatus::Cancelled))
            .unwrap();

        for status in [
            NodeStatus::Processing,
            NodeStatus::Completed,
            NodeStatus::Cancelled,
        ] {
            let err = store
                .update(&a.id, NodePatch::new().status(status))
                .unwrap_err();
            assert!(matches!(err, StoreError::InvalidTransition { .. }));
        }
        assert_eq!(store.get(&a.id).unwrap().status, NodeStatus::Cancelled);
    }

    #[test]
    fn test_update_is_atomic_on_failure() {
        let mut store = NodeStore::new();
        let a = store.insert(root()).unwrap();
        let err = store
            .update(
                &a.id,
                NodePatch::new()
                    .status(NodeStatus::Completed)
                    .content("should not land"),
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));
        assert!(store.get(&a.id).unwrap().content.is_none());
    }

    #[test]
    fn test_sealed_node_only_accepts_annotations() {
        let mut store = NodeStore::new();
        let a = store.insert(root()).unwrap();
        store
            .update(&a.id, NodePatch::new().status(NodeStatus::Processing))
            .unwrap();
        store
            .update(&a.id, NodePatch::new().status(NodeStatus::Completed).content("x"))
            .unwrap();

        let err = store.update(&a.id, NodePatch::new().content("y")).unwrap_err();
        assert!(matches!(err, StoreError::Sealed { .. }));

        let structured = StructuredContent {
            title: Some("Headline".to_string()),
            ..Default::default()
        };
        store.annotate(&a.id, structured).unwrap();
        store.set_visible(&a.id, false).unwrap();
        let node = store.resolve(&a.id).unwrap();
        assert!(!node.visible);
        assert_eq!(node.content.as_deref(), Some("x"));
    }

    #[test]
    fn test_error_message_requires_failed_status() {
        let mut store = NodeStore::new();
        let a = store.insert(root()).unwrap();
        store
            .update(&a.id, NodePatch::new().status(NodeStatus::Processing))
            .unwrap();
        let err = store
            .update(&a.id, NodePatch::new().error_message("nope"))
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidField { .. }));

        let failed = store
            .update(
                &a.id,
                NodePatch::new()
                    .status(NodeStatus::Failed)
                    .error_message("provider exploded"),
            )
            .unwrap();
        assert_eq!(failed.error_message.as_deref(), Some("provider exploded"));
    }

    #[test]
    fn test_negative_cost_rejected() {
        let mut store = NodeStore::new();
        let a = store.insert(root()).unwrap();
        let err = store.update(&a.id, NodePatch::new().cost(-1.0)).unwrap_err();
        assert!(matches!(err, StoreError::InvalidField { .. }));
    }

    #[test]
    fn test_soft_delete_is_idempotent() {
        let mut store = NodeStore::new();
        let a = store.insert(root()).unwrap();
        let events = Arc::new(Mutex::new(0));
        let counter = events.clone();
        store.subscribe(SubscriptionKey::All, move |_| {
            *counter.lock().unwrap() += 1;
        });

        store.soft_delete(&a.id).unwrap();
        store.soft_delete(&a.id).unwrap();

        assert_eq!(*events.lock().unwrap(), 1);
        assert!(store.get(&a.id).is_none());
        assert!(store.resolve(&a.id).unwrap().deleted);
    }

    #[test]
    fn test_soft_delete_missing_node() {
        let mut store = NodeStore::new();
        assert!(matches!(
            store.soft_delete("ghost"),
            Err(StoreError::NotFound { .. })
        ));
    }

    #[test]
    fn test_children_follow_parent_order() {
        let mut store = NodeStore::new();
        let a = store.insert(root()).unwrap();
        let b = store.insert(child_of(&a)).unwrap();
        let c = store.insert(child_of(&a)).unwrap();
        let d = store.insert(child_of(&a)).unwrap();
        store.soft_delete(&c.id).unwrap();

        let ids: Vec<&str> = store
            .children_of(&a.id)
            .iter()
            .map(|n| n.id.as_str())
            .collect();
        assert_eq!(ids, vec![b.id.as_str(), d.id.as_str()]);
    }

    #[test]
    fn test_branch_copies_lineage_fields() {
        let mut store = NodeStore::new();
        let parent = root()
            .with_vertical("fitness")
            .with_context_data(serde_json::json!({"styleGuides": ["brand"]}));
        let a = store.insert(parent).unwrap();

        let b = store.branch(&a.id, "seed").unwrap();
        assert_eq!(b.parent_id.as_deref(), Some(a.id.as_str()));
        assert_eq!(b.root_id, a.id);
        assert_eq!(b.node_type, a.node_type);
        assert_eq!(b.mode, a.mode);
        assert_eq!(b.provider, a.provider);
        assert_eq!(b.model, a.model);
        assert_eq!(b.vertical.as_deref(), Some("fitness"));
        assert_eq!(b.context_data, a.context_data);
        assert_eq!(b.content.as_deref(), Some("seed"));
        assert_eq!(b.status, NodeStatus::Pending);
    }

    #[test]
    fn test_branch_with_context_overrides_parent_context() {
        let mut store = NodeStore::new();
        let parent = root().with_context_data(serde_json::json!({"styleGuides": ["brand"]}));
        let a = store.insert(parent).unwrap();

        let b = store
            .branch_with_context(&a.id, "seed", serde_json::json!({"instructions": "shorter"}))
            .unwrap();
        assert_eq!(
            b.context_data,
            Some(serde_json::json!({"instructions": "shorter"}))
        );
        assert_eq!(
            store.get(&a.id).unwrap().context_data,
            Some(serde_json::json!({"styleGuides": ["brand"]}))
        );
    }

    #[test]
    fn test_branch_from_deleted_parent_fails() {
        let mut store = NodeStore::new();
        let a = store.insert(root()).unwrap();
        store.soft_delete(&a.id).unwrap();
        assert!(matches!(
            store.branch(&a.id, "x"),
            Err(StoreError::DanglingParent { .. })
        ));
    }

    #[test]
    fn test_ancestors_and_descendants() {
        let mut store = NodeStore::new();
        let a = store.insert(root()).unwrap();
        let b = store.insert(child_of(&a)).unwrap();
        let c = store.insert(child_of(&b)).unwrap();
        let d = store.insert(child_of(&a)).unwrap();

        let up: Vec<&str> = store.ancestors(&c.id).iter().map(|n| n.id.as_str()).collect();
        assert_eq!(up, vec![b.id.as_str(), a.id.as_str()]);

        let down: Vec<&str> = store
            .descendants(&a.id)
            .iter()
            .map(|n| n.id.as_str())
            .collect();
        assert_eq!(down, vec![b.id.as_str(), c.id.as_str(), d.id.as_str()]);

        store.soft_delete(&b.id).unwrap();
        let down: Vec<&str> = store
            .descendants(&a.id)
            .iter()
            .map(|n| n.id.as_str())
            .collect();
        assert_eq!(down, vec![c.id.as_str(), d.id.as_str()]);
        assert_eq!(store.nodes_by_root(&a.id).len(), 3);
    }

    #[test]
    fn test_select_exclusive_clears_siblings() {
        let mut store = NodeStore::new();
        let a = store.insert(root()).unwrap();
        let b = store.insert(child_of(&a)).unwrap();
        let c = store.insert(child_of(&a)).unwrap();

        store.select_exclusive(&b.id).unwrap();
        store.select_exclusive(&c.id).unwrap();

        assert!(!store.get(&b.id).unwrap().selected);
        assert!(store.get(&c.id).unwrap().selected);
    }

    #[test]
    fn test_subscription_keys() {
        let mut store = NodeStore::new();
        let a = store.insert(root()).unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let node_seen = seen.clone();
        let roots_seen = seen.clone();
        store.subscribe(SubscriptionKey::Node(a.id.clone()), move |e| {
            node_seen.lock().unwrap().push(format!("node:{:?}", e.kind));
        });
        let roots = store.subscribe(SubscriptionKey::Roots, move |e| {
            roots_seen.lock().unwrap().push(format!("roots:{:?}", e.kind));
        });

        let b = store.insert(child_of(&a)).unwrap();
        store.set_visible(&b.id, false).unwrap();
        store.set_selected(&a.id, true).unwrap();
        assert!(store.unsubscribe(roots));
        assert!(!store.unsubscribe(roots));
        store.set_selected(&a.id, false).unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(
            *seen,
            vec![
                // parent gained a child
                "node:Updated".to_string(),
                "roots:Updated".to_string(),
                // selected = true
                "node:Updated".to_string(),
                "roots:Updated".to_string(),
                // selected = false, roots observer gone
                "node:Updated".to_string(),
            ]
        );
    }

    #[test]
    fn test_observer_sees_committed_state() {
        let mut store = NodeStore::new();
        let a = store.insert(root()).unwrap();
        let last = Arc::new(Mutex::new(None));
        let sink = last.clone();
        store.subscribe(SubscriptionKey::Node(a.id.clone()), move |e| {
            *sink.lock().unwrap() = Some(e.node.status);
        });

        store
            .update(&a.id, NodePatch::new().status(NodeStatus::Processing))
            .unwrap();
        assert_eq!(*last.lock().unwrap(), Some(NodeStatus::Processing));
    }

    #[test]
    fn test_snapshot_restore_keeps_tombstones() {
        let mut store = NodeStore::new();
        let a = store.insert(root()).unwrap();
        let b = store.insert(child_of(&a)).unwrap();
        store.soft_delete(&a.id).unwrap();

        let restored = NodeStore::restore(store.snapshot()).unwrap();
        assert_eq!(restored.len(), 2);
        assert!(restored.get(&a.id).is_none());
        assert_eq!(restored.get(&b.id).unwrap().root_id, a.id);
        assert!(restored.roots().is_empty());
    }

    #[test]
    fn test_restore_rejects_one_sided_link() {
        let mut store = NodeStore::new();
        let a = store.insert(root()).unwrap();
        store.insert(child_of(&a)).unwrap();

        let mut snapshot = store.snapshot();
        snapshot.nodes[0].children.clear();
        assert!(matches!(
            NodeStore::restore(snapshot),
            Err(StoreError::Integrity { .. })
        ));
    }

    #[test]
    fn test_restore_seals_processing_nodes() {
        let mut store = NodeStore::new();
        let a = store.insert(root()).unwrap();
        let b = store.insert(child_of(&a)).unwrap();
        store
            .update(&a.id, NodePatch::new().status(NodeStatus::Processing))
            .unwrap();

        let restored = NodeStore::restore(store.snapshot()).unwrap();
        let interrupted = restored.get(&a.id).unwrap();
        assert_eq!(interrupted.status, NodeStatus::Failed);
        assert_eq!(interrupted.error_message.as_deref(), Some(INTERRUPTED_MESSAGE));
        assert!(interrupted.completed_at.is_some());
        assert_eq!(restored.get(&b.id).unwrap().status, NodeStatus::Pending);
    }

    #[test]
    fn test_restore_rejects_cycle() {
        let mut a = root();
        let mut b = root();
        a.parent_id = Some(b.id.clone());
        b.parent_id = Some(a.id.clone());
        a.children = vec![b.id.clone()];
        b.children = vec![a.id.clone()];
        a.root_id = a.id.clone();
        b.root_id = b.id.clone();

        let err = NodeStore::restore(StoreSnapshot { nodes: vec![a, b] }).unwrap_err();
        assert!(matches!(err, StoreError::Integrity { .. }));
    }
}
