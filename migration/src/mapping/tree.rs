//! Conversation tree construction.
//!
//! The legacy store kept messages as a linear log; the new schema links
//! each message to the one it answers (`parent_id`) and groups the
//! responses different models gave to the same question
//! (`siblings_group_id`). The link between a response and its question is
//! the legacy `ask_id`.

use std::collections::{HashMap, HashSet};

use crate::legacy::LegacyMessage;

/// Placement of one message within the rebuilt tree.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TreeNode {
    pub parent_id: Option<String>,
    /// `0` for single-model messages; a positive per-topic id shared by all
    /// members of a sibling group.
    pub siblings_group_id: u32,
}

/// Build the parent/sibling map for one topic's messages, in conversation
/// order.
///
/// Group ids are monotonic positive integers assigned per topic, in order
/// of each group's first appearance.
#[must_use]
pub fn build_message_tree(messages: &[LegacyMessage]) -> HashMap<String, TreeNode> {
    // First pass: every ask_id answered by two or more messages becomes a
    // sibling group.
    let mut ask_counts: HashMap<&str, u32> = HashMap::new();
    for message in messages {
        if let Some(ask_id) = message.ask_id.as_deref() {
            *ask_counts.entry(ask_id).or_insert(0) += 1;
        }
    }
    let mut group_ids: HashMap<&str, u32> = HashMap::new();
    let mut next_group_id = 1u32;
    for message in messages {
        if let Some(ask_id) = message.ask_id.as_deref()
            && ask_counts.get(ask_id).copied().unwrap_or(0) >= 2
            && !group_ids.contains_key(ask_id)
        {
            group_ids.insert(ask_id, next_group_id);
            next_group_id += 1;
        }
    }

    // Second pass: resolve parents.
    let mut tree: HashMap<String, TreeNode> = HashMap::with_capacity(messages.len());
    let mut previous_id: Option<String> = None;
    let mut last_non_group_id: Option<String> = None;

    for message in messages {
        let mut node = TreeNode::default();

        if let Some(ask_id) = message.ask_id.as_deref()
            && let Some(&group_id) = group_ids.get(ask_id)
        {
            node.parent_id = Some(ask_id.to_string());
            node.siblings_group_id = group_id;
            if message.fold_selected() {
                last_non_group_id = Some(message.id.clone());
            }
        } else if message.is_user() && last_non_group_id.is_some() {
            node.parent_id = last_non_group_id.take();
        } else {
            node.parent_id = previous_id.clone();
        }

        previous_id = Some(message.id.clone());
        if node.siblings_group_id == 0 {
            last_non_group_id = Some(message.id.clone());
        }
        tree.insert(message.id.clone(), node);
    }

    tree
}

/// Pick the topic's `active_node_id` among the migrated messages.
///
/// Priority: the original tip (the last message, or its fold-selected
/// sibling when the last message sits in a group), then any migrated
/// fold-selected message (latest wins), then the last migrated message.
#[must_use]
pub fn find_active_node_id(
    messages: &[LegacyMessage],
    tree: &HashMap<String, TreeNode>,
    migrated: &HashSet<String>,
) -> Option<String> {
    let last = messages.last()?;

    let original_tip = if tree
        .get(&last.id)
        .is_some_and(|node| node.siblings_group_id > 0)
    {
        let group_id = tree[&last.id].siblings_group_id;
        messages
            .iter()
            .filter(|m| {
                tree.get(&m.id)
                    .is_some_and(|node| node.siblings_group_id == group_id)
            })
            .find(|m| m.fold_selected())
            .map_or(last.id.clone(), |m| m.id.clone())
    } else {
        last.id.clone()
    };

    if migrated.contains(&original_tip) {
        return Some(original_tip);
    }

    if let Some(selected) = messages
        .iter()
        .rev()
        .find(|m| m.fold_selected() && migrated.contains(&m.id))
    {
        return Some(selected.id.clone());
    }

    messages
        .iter()
        .rev()
        .find(|m| migrated.contains(&m.id))
        .map(|m| m.id.clone())
}

/// Resolve a message's parent transitively through skipped messages.
///
/// Returns the nearest non-skipped ancestor, or `None` when the chain ends
/// (or loops, on malformed input) before reaching one.
#[must_use]
pub fn resolve_parent_through_skipped(
    id: &str,
    tree: &HashMap<String, TreeNode>,
    skipped: &HashSet<String>,
) -> Option<String> {
    let mut current = tree.get(id)?.parent_id.clone();
    let mut visited: HashSet<String> = HashSet::new();

    while let Some(parent) = current {
        if !skipped.contains(&parent) {
            return Some(parent);
        }
        if !visited.insert(parent.clone()) {
            return None;
        }
        current = tree.get(&parent).and_then(|node| node.parent_id.clone());
    }
    None
}
