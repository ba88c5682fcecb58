//! Automatic run-tags derived from session names.
//!
//! Session names are split on a separator and threaded through a prefix tree.
//! Every node that ends up with two or more children is a branch point, and
//! its prefix becomes a tag on every session whose name reaches or passes it.
//! For the names `a-x-1`, `a-x-2`, `a-y-1`, `a-y-2`, `b-x-1`, `b-x-2` the
//! tree is:
//!
//! ```text
//!       *
//!      / \
//!     a   b
//!    /\    \
//!   x  y    x
//!  /|  |\   |\
//! 1 2  1 2  1 2
//! ```
//!
//! which yields the tags `a`, `a-x`, `a-y` and `b-x`. `b` is not a tag since it
//! only ever has the one child `x`.

use std::collections::HashMap;

use tracing::{debug, warn};

pub const DEFAULT_SEPARATOR: &str = "-";

const ROOT: usize = 0;

/// Identifies one handle added to an [`AutoTag`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TagSlot(usize);

impl TagSlot {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Default)]
struct TagNode {
    tag: Option<String>,
    children: HashMap<String, usize>,
    // handles whose name ends here; tagged later if this node branches
    handles: Vec<usize>,
}

#[derive(Debug)]
struct Entry<H> {
    handle: H,
    tags: Vec<String>,
}

/// Incremental tag derivation over a stream of session names.
///
/// Tags are accumulated per handle inside the engine. Earlier handles gain
/// tags retroactively when a later name turns one of their prefixes into a
/// branch point, so read the tags only once every name has been added.
#[derive(Debug)]
pub struct AutoTag<H> {
    separator: String,
    nodes: Vec<TagNode>,
    entries: Vec<Entry<H>>,
}

impl<H> Default for AutoTag<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H> AutoTag<H> {
    pub fn new() -> Self {
        Self::with_separator(DEFAULT_SEPARATOR)
    }

    pub fn with_separator(separator: impl Into<String>) -> Self {
        Self {
            separator: separator.into(),
            nodes: vec![TagNode::default()],
            entries: Vec::new(),
        }
    }

    pub fn separator(&self) -> &str {
        &self.separator
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Threads `name` through the tree and records `handle` at its end.
    ///
    /// Must be called once per session, in declaration order.
    pub fn add(&mut self, name: &str, handle: H) -> TagSlot {
        let slot = self.entries.len();
        self.entries.push(Entry {
            handle,
            tags: Vec::new(),
        });

        let words: Vec<&str> = name.split(self.separator.as_str()).collect();
        let mut node = ROOT;
        for word in words {
            if self.nodes[node].children.len() > 1 {
                self.attach(node, slot);
            }

            if let Some(&child) = self.nodes[node].children.get(word) {
                node = child;
                continue;
            }

            if self.nodes[node].children.len() == 1 {
                // First sibling: earlier handles below this node never saw its tag.
                self.attach(node, slot);
                self.attach_retroactively(node);
            }
            node = self.add_child(node, word);
        }

        // A name that is itself a branching prefix carries that prefix too.
        if self.nodes[node].children.len() > 1 {
            self.attach(node, slot);
        }
        if !self.nodes[node].handles.is_empty() {
            warn!(session = %name, "session name registered more than once");
        }
        self.nodes[node].handles.push(slot);
        TagSlot(slot)
    }

    /// Tags of one handle, sorted and without duplicates.
    pub fn tags(&self, slot: TagSlot) -> &[String] {
        self.entries
            .get(slot.0)
            .map(|entry| entry.tags.as_slice())
            .unwrap_or(&[])
    }

    pub fn handle(&self, slot: TagSlot) -> Option<&H> {
        self.entries.get(slot.0).map(|entry| &entry.handle)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&H, &[String])> {
        self.entries
            .iter()
            .map(|entry| (&entry.handle, entry.tags.as_slice()))
    }

    /// Every handle with its sorted tags, in registration order.
    pub fn into_assignments(self) -> Vec<(H, Vec<String>)> {
        self.entries
            .into_iter()
            .map(|entry| (entry.handle, entry.tags))
            .collect()
    }

    /// Every tag currently produced by a branch point, sorted.
    pub fn branch_tags(&self) -> Vec<&str> {
        let mut tags: Vec<&str> = self
            .nodes
            .iter()
            .filter(|node| node.children.len() > 1)
            .filter_map(|node| node.tag.as_deref())
            .collect();
        tags.sort_unstable();
        tags
    }

    fn add_child(&mut self, parent: usize, word: &str) -> usize {
        let tag = match &self.nodes[parent].tag {
            Some(prefix) => format!("{prefix}{}{word}", self.separator),
            None => word.to_string(),
        };
        let child = self.nodes.len();
        self.nodes.push(TagNode {
            tag: Some(tag),
            ..TagNode::default()
        });
        self.nodes[parent].children.insert(word.to_string(), child);
        child
    }

    fn attach(&mut self, node: usize, slot: usize) {
        let Some(tag) = self.nodes[node].tag.as_ref() else {
            return;
        };
        insert_sorted(&mut self.entries[slot].tags, tag);
    }

    fn attach_retroactively(&mut self, from: usize) {
        let Some(tag) = self.nodes[from].tag.clone() else {
            return;
        };
        debug!(tag = %tag, "prefix became a branch point");

        let mut to_visit = vec![from];
        while let Some(idx) = to_visit.pop() {
            let node = &self.nodes[idx];
            for &slot in &node.handles {
                insert_sorted(&mut self.entries[slot].tags, &tag);
            }
            to_visit.extend(node.children.values().copied());
        }
    }
}

fn insert_sorted(tags: &mut Vec<String>, tag: &str) {
    if let Err(pos) = tags.binary_search_by(|existing| existing.as_str().cmp(tag)) {
        tags.insert(pos, tag.to_string());
    }
}

/// Fixed-depth tags: every leading prefix of `name` up to `depth` segments,
/// never the full name itself. Segments belonging to `prefix` are not tags
/// on their own.
///
/// With depth 3, `foo-bar-pew-zap` yields `foo`, `foo-bar` and `foo-bar-pew`.
pub fn depth_tags(name: &str, prefix: Option<&str>, depth: usize, separator: &str) -> Vec<String> {
    if depth == 0 {
        return Vec::new();
    }
    let prefix_len = match prefix {
        Some(prefix) if !prefix.is_empty() => prefix.split(separator).count(),
        _ => 0,
    };
    let parts: Vec<&str> = name
        .split(separator)
        .take(depth + prefix_len + 1)
        .collect();
    (1 + prefix_len..parts.len())
        .map(|end| parts[..end].join(separator))
        .collect()
}
