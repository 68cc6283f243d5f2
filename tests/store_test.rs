//! Integration tests for the node store
//!
//! Covers tree integrity across mixed insert/branch/delete sequences, the
//! branch and soft-delete scenarios, subscriptions and snapshot restore.

use std::sync::{Arc, Mutex};

use generation_tree::error::StoreError;
use generation_tree::store::{
    GenerationMode, GenerationNode, NodePatch, NodeStatus, NodeStore, StoreEventKind,
    StoreSnapshot, SubscriptionKey,
};
use generation_tree::store::NodeType;

fn root(store: &mut NodeStore) -> GenerationNode {
    store
        .insert(GenerationNode::new(
            NodeType::FullContent,
            GenerationMode::Direct,
            "openai",
            "gpt-4o-mini",
        ))
        .expect("insert root")
}

fn complete(store: &mut NodeStore, id: &str, content: &str) {
    store
        .update(id, NodePatch::new().status(NodeStatus::Processing))
        .unwrap();
    store
        .update(
            id,
            NodePatch::new()
                .status(NodeStatus::Completed)
                .content(content)
                .tokens(10, 12)
                .cost(0.002),
        )
        .unwrap();
}

/// Every live node's parent lists it, and its parent chain ends at its root.
fn assert_tree_integrity(store: &NodeStore) {
    let snapshot = store.snapshot();
    for node in snapshot.nodes.iter().filter(|n| !n.deleted) {
        let mut current = node.clone();
        let mut hops = 0;
        while let Some(parent_id) = current.parent_id.clone() {
            let parent = store
                .resolve(&parent_id)
                .unwrap_or_else(|| panic!("parent {} of {} must resolve", parent_id, current.id));
            assert!(
                parent.children.contains(&current.id),
                "parent {} must list child {}",
                parent.id,
                current.id
            );
            current = parent.clone();
            hops += 1;
            assert!(hops <= snapshot.nodes.len(), "parent chain must be finite");
        }
        assert_eq!(current.id, node.root_id, "chain of {} must end at its root", node.id);
    }
    assert!(store.check_integrity().is_ok());
}

#[cfg(test)]
mod integrity_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    /// Small deterministic generator so the sequence is reproducible.
    struct Lcg(u64);

    impl Lcg {
        fn next(&mut self, bound: usize) -> usize {
            self.0 = self
                .0
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            ((self.0 >> 33) as usize) % bound
        }
    }

    #[test]
    fn test_integrity_holds_across_mixed_operations() {
        for seed in [1_u64, 7, 42, 1234] {
            let mut rng = Lcg(seed);
            let mut store = NodeStore::new();
            let mut ids: Vec<String> = Vec::new();

            for _ in 0..200 {
                match rng.next(4) {
                    0 => ids.push(root(&mut store).id),
                    1 if !ids.is_empty() => {
                        let parent = &ids[rng.next(ids.len())];
                        match store.branch(parent, "fork") {
                            Ok(child) => ids.push(child.id),
                            Err(StoreError::DanglingParent { .. }) => {
                                assert!(store.get(parent).is_none());
                            }
                            Err(e) => panic!("unexpected error: {}", e),
                        }
                    }
                    2 if !ids.is_empty() => {
                        let parent = ids[rng.next(ids.len())].clone();
                        let child = GenerationNode::new(
                            NodeType::Title,
                            GenerationMode::Structured,
                            "anthropic",
                            "claude",
                        )
                        .with_parent(parent.clone());
                        match store.insert(child) {
                            Ok(child) => ids.push(child.id),
                            Err(StoreError::DanglingParent { parent_id }) => {
                                assert_eq!(parent_id, parent);
                            }
                            Err(e) => panic!("unexpected error: {}", e),
                        }
                    }
                    3 if !ids.is_empty() => {
                        let id = &ids[rng.next(ids.len())];
                        store.soft_delete(id).unwrap();
                    }
                    _ => {}
                }
                assert_tree_integrity(&store);
            }
        }
    }

    #[test]
    fn test_branch_from_deleted_parent_is_rejected() {
        let mut store = NodeStore::new();
        let a = root(&mut store);
        store.soft_delete(&a.id).unwrap();

        let result = store.branch(&a.id, "text");
        assert!(matches!(result, Err(StoreError::DanglingParent { .. })));
        assert_eq!(store.resolve(&a.id).unwrap().children.len(), 0);
    }
}

#[cfg(test)]
mod scenario_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_branch_creates_pending_child_of_root() {
        let mut store = NodeStore::new();
        let a = root(&mut store);
        complete(&mut store, &a.id, "Hello");

        let b = store.branch(&a.id, "Hello world").unwrap();

        assert_eq!(b.parent_id.as_deref(), Some(a.id.as_str()));
        assert_eq!(b.root_id, a.id);
        assert_eq!(b.status, NodeStatus::Pending);
        assert_eq!(b.content.as_deref(), Some("Hello world"));
        assert_eq!(b.node_type, a.node_type);
        assert_eq!(b.provider, a.provider);

        let a_after = store.get(&a.id).unwrap();
        assert_eq!(a_after.children, vec![b.id.clone()]);
        assert_eq!(a_after.content.as_deref(), Some("Hello"));
        assert_eq!(a_after.status, NodeStatus::Completed);
    }

    #[test]
    fn test_soft_delete_keeps_children_reachable() {
        let mut store = NodeStore::new();
        let a = root(&mut store);
        let b = store.branch(&a.id, "one").unwrap();
        let c = store.branch(&a.id, "two").unwrap();

        store.soft_delete(&a.id).unwrap();

        assert!(store.roots().iter().all(|n| n.id != a.id));
        assert!(store.get(&a.id).is_none());

        // The parent's own ordering still drives children_of on a tombstone.
        let children: Vec<&str> = store
            .children_of(&a.id)
            .into_iter()
            .map(|n| n.id.as_str())
            .collect();
        assert_eq!(children, vec![b.id.as_str(), c.id.as_str()]);

        let b_after = store.get(&b.id).unwrap();
        let parent = store.resolve(b_after.parent_id.as_deref().unwrap()).unwrap();
        assert!(parent.deleted);
        assert_eq!(b_after.root_id, a.id);
        assert_tree_integrity(&store);
    }

    #[test]
    fn test_deleted_child_is_hidden_from_children_of() {
        let mut store = NodeStore::new();
        let a = root(&mut store);
        let b = store.branch(&a.id, "one").unwrap();
        let c = store.branch(&a.id, "two").unwrap();

        store.soft_delete(&b.id).unwrap();
        store.soft_delete(&b.id).unwrap();

        let children: Vec<String> = store.children_of(&a.id).into_iter().map(|n| n.id.clone()).collect();
        assert_eq!(children, vec![c.id]);
        assert_eq!(store.get(&a.id).unwrap().children.len(), 2);
    }

    #[test]
    fn test_no_resurrection_after_seal() {
        let mut store = NodeStore::new();
        let a = root(&mut store);
        complete(&mut store, &a.id, "done");

        for status in [
            NodeStatus::Pending,
            NodeStatus::Processing,
            NodeStatus::Failed,
            NodeStatus::Cancelled,
        ] {
            let result = store.update(&a.id, NodePatch::new().status(status));
            assert!(matches!(result, Err(StoreError::InvalidTransition { .. })));
        }
        let result = store.update(&a.id, NodePatch::new().content("changed"));
        assert!(matches!(result, Err(StoreError::Sealed { .. })));

        let a_after = store.get(&a.id).unwrap();
        assert_eq!(a_after.status, NodeStatus::Completed);
        assert_eq!(a_after.content.as_deref(), Some("done"));

        // Presentation flags stay editable.
        store.set_selected(&a.id, true).unwrap();
        store.set_visible(&a.id, false).unwrap();
        let a_after = store.get(&a.id).unwrap();
        assert!(a_after.selected);
        assert!(!a_after.visible);
    }
}

#[cfg(test)]
mod subscription_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_roots_subscription_sees_only_root_events() {
        let mut store = NodeStore::new();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        store.subscribe(SubscriptionKey::Roots, move |event| {
            sink.lock().unwrap().push((event.kind, event.node.id.clone()));
        });

        let a = root(&mut store);
        let b = store.branch(&a.id, "child").unwrap();
        store
            .update(&b.id, NodePatch::new().status(NodeStatus::Processing))
            .unwrap();

        let events = events.lock().unwrap();
        assert_eq!(
            *events,
            vec![
                (StoreEventKind::Inserted, a.id.clone()),
                (StoreEventKind::Updated, a.id.clone()),
            ]
        );
    }

    #[test]
    fn test_unsubscribed_observer_is_silent() {
        let mut store = NodeStore::new();
        let count = Arc::new(Mutex::new(0));
        let sink = Arc::clone(&count);
        let id = store.subscribe(SubscriptionKey::All, move |_| {
            *sink.lock().unwrap() += 1;
        });

        root(&mut store);
        assert!(store.unsubscribe(id));
        assert!(!store.unsubscribe(id));
        root(&mut store);

        assert_eq!(*count.lock().unwrap(), 1);
    }
}

#[cfg(test)]
mod snapshot_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_snapshot_survives_json_and_restores() {
        let mut store = NodeStore::new();
        let a = root(&mut store);
        complete(&mut store, &a.id, "Hello");
        let b = store.branch(&a.id, "Hello world").unwrap();
        store.branch(&b.id, "Hello there").unwrap();
        store.soft_delete(&b.id).unwrap();

        let json = serde_json::to_string(&store.snapshot()).unwrap();
        let snapshot: StoreSnapshot = serde_json::from_str(&json).unwrap();
        let restored = NodeStore::restore(snapshot).unwrap();

        assert_eq!(restored.snapshot(), store.snapshot());
        assert_eq!(restored.len(), 3);
        assert_tree_integrity(&restored);
    }

    #[test]
    fn test_restore_rejects_one_sided_links() {
        let mut store = NodeStore::new();
        let a = root(&mut store);
        store.branch(&a.id, "child").unwrap();

        let mut snapshot = store.snapshot();
        snapshot.nodes[0].children.clear();

        let result = NodeStore::restore(snapshot);
        assert!(matches!(result, Err(StoreError::Integrity { .. })));
    }
}
