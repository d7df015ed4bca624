//! # btree-rs
//!
//! An in-memory B-tree mapping byte-string keys to byte-string values.
//!
//! Keys are ordered byte-lexicographically and are unique within a tree;
//! inserting an existing key overwrites its value. Lookup, insertion, and
//! deletion are logarithmic. Insertion splits full nodes top-down before
//! descending into them; deletion repairs underflowed nodes by borrowing
//! from or merging with a sibling on the way back up.
//!
//! ## Example
//!
//! ```rust
//! use btree_rs::BTree;
//!
//! let mut tree = BTree::new();
//! tree.insert(b"hello", b"world");
//! tree.insert(b"hot", b"cold");
//!
//! assert_eq!(tree.get(b"hello"), Some(&b"world"[..]));
//! assert!(tree.get(b"missing").is_none());
//! ```

#![forbid(unsafe_code)]

use std::cmp::Ordering;
use std::mem;

use smallvec::SmallVec;
use thiserror::Error;

// =============================================================================
// Configuration
// =============================================================================

/// Fan-out parameter (`t` in the B-tree literature).
const DEGREE: usize = 5;
const MAX_CHILDREN: usize = 2 * DEGREE;
const MAX_ITEMS: usize = MAX_CHILDREN - 1;
const MIN_ITEMS: usize = DEGREE - 1;

// =============================================================================
// Errors
// =============================================================================

/// Failures reported by tree operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TreeError {
    /// The key is not present in the tree.
    #[error("key not found")]
    NotFound,
    /// The tree holds no items at all.
    #[error("tree is empty")]
    EmptyTree,
    /// A structural invariant does not hold. Reported by [`BTree::validate`]
    /// only; describes the violated invariant and where it was found.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

// =============================================================================
// Items and nodes
// =============================================================================

/// An owned key/value pair. Keys compare byte-lexicographically.
#[derive(Debug, Clone)]
struct Item {
    key: Vec<u8>,
    value: Vec<u8>,
}

/// Inline node storage. A node never holds more than `MAX_ITEMS` items or
/// `MAX_CHILDREN` children, so both arrays fit inside the node allocation.
type ItemArray = SmallVec<[Item; MAX_ITEMS]>;
type ChildArray = SmallVec<[Box<Node>; MAX_CHILDREN]>;

#[derive(Debug, Clone)]
struct Node {
    items: ItemArray,
    children: ChildArray,
}

impl Node {
    fn new() -> Self {
        Self {
            items: SmallVec::new(),
            children: SmallVec::new(),
        }
    }

    #[inline]
    fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    #[inline]
    fn is_full(&self) -> bool {
        self.items.len() >= MAX_ITEMS
    }

    /// Binary search over the sorted items. Returns the first index whose
    /// key is `>= key` and whether an exact match sits at that index.
    fn search(&self, key: &[u8]) -> (usize, bool) {
        let mut low = 0;
        let mut high = self.items.len();

        while low < high {
            let mid = (low + high) / 2;
            match key.cmp(self.items[mid].key.as_slice()) {
                Ordering::Greater => low = mid + 1,
                Ordering::Less => high = mid,
                Ordering::Equal => return (mid, true),
            }
        }

        (low, false)
    }

    fn insert_item_at(&mut self, pos: usize, item: Item) {
        debug_assert!(self.items.len() < MAX_ITEMS);
        self.items.insert(pos, item);
    }

    fn insert_child_at(&mut self, pos: usize, child: Box<Node>) {
        debug_assert!(self.children.len() < MAX_CHILDREN);
        self.children.insert(pos, child);
    }

    fn remove_item_at(&mut self, pos: usize) -> Item {
        self.items.remove(pos)
    }

    fn remove_child_at(&mut self, pos: usize) -> Box<Node> {
        self.children.remove(pos)
    }

    /// Splits a full node at its median. The median item is extracted and
    /// returned together with a new right sibling holding everything after
    /// it; both halves are left with exactly `MIN_ITEMS` items.
    fn split(&mut self) -> (Item, Box<Node>) {
        debug_assert!(self.is_full());

        let mut sibling = Box::new(Node::new());
        sibling.items.extend(self.items.drain(MIN_ITEMS + 1..));
        let middle = self.items.pop().expect("full node has a median item");

        if !self.is_leaf() {
            sibling.children.extend(self.children.drain(MIN_ITEMS + 1..));
        }

        (middle, sibling)
    }

    /// Recursive insert. The caller guarantees this node is not full, so a
    /// leaf can always take the item directly. A full child is split here,
    /// before descent, which may shift where the key belongs.
    fn insert(&mut self, item: Item) -> Option<Vec<u8>> {
        let (mut pos, found) = self.search(&item.key);
        if found {
            return Some(mem::replace(&mut self.items[pos], item).value);
        }

        if self.is_leaf() {
            self.insert_item_at(pos, item);
            return None;
        }

        if self.children[pos].is_full() {
            let (middle, sibling) = self.children[pos].split();
            self.insert_item_at(pos, middle);
            self.insert_child_at(pos + 1, sibling);

            match item.key.cmp(&self.items[pos].key) {
                Ordering::Greater => pos += 1,
                Ordering::Equal => {
                    // The promoted median is the key being inserted.
                    return Some(mem::replace(&mut self.items[pos], item).value);
                }
                Ordering::Less => {}
            }
        }

        self.children[pos].insert(item)
    }

    /// Restores the minimum-item invariant of `children[pos]` after a
    /// deletion. Borrows from the left sibling if it has surplus items,
    /// else from the right sibling, else merges with a sibling and pulls
    /// the separating item down from this node.
    fn fill_child_at(&mut self, pos: usize) {
        if pos > 0 && self.children[pos - 1].items.len() > MIN_ITEMS {
            // Rotate the left sibling's last item through the separator.
            let (head, tail) = self.children.split_at_mut(pos);
            let left = &mut head[pos - 1];
            let right = &mut tail[0];

            let stolen = left.items.pop().expect("left sibling has surplus");
            let separator = mem::replace(&mut self.items[pos - 1], stolen);
            right.items.insert(0, separator);
            if !right.is_leaf() {
                let child = left.children.pop().expect("internal node has children");
                right.children.insert(0, child);
            }
        } else if pos + 1 < self.children.len() && self.children[pos + 1].items.len() > MIN_ITEMS {
            // Rotate the right sibling's first item through the separator.
            let (head, tail) = self.children.split_at_mut(pos + 1);
            let left = &mut head[pos];
            let right = &mut tail[0];

            let stolen = right.items.remove(0);
            let separator = mem::replace(&mut self.items[pos], stolen);
            left.items.push(separator);
            if !left.is_leaf() {
                left.children.push(right.children.remove(0));
            }
        } else {
            // Neither sibling can lend; merge with one. The rightmost child
            // merges leftward, every other child absorbs its right sibling.
            let pos = pos.min(self.items.len() - 1);
            let mut right = self.remove_child_at(pos + 1);
            let separator = self.remove_item_at(pos);

            let left = &mut self.children[pos];
            left.items.push(separator);
            left.items.extend(right.items.drain(..));
            if !left.is_leaf() {
                left.children.extend(right.children.drain(..));
            }
        }
    }

    /// Recursive delete. When the key matches in an internal node, descent
    /// switches to successor-seeking mode and the match is later overwritten
    /// with the in-order successor pulled out of the right subtree. Returns
    /// the item actually removed from the tree, or `None` if the key is
    /// absent.
    fn delete(&mut self, key: &[u8], mut seeking_successor: bool) -> Option<Item> {
        let (pos, found) = self.search(key);

        let next_pos = if found {
            if self.is_leaf() {
                return Some(self.remove_item_at(pos));
            }
            seeking_successor = true;
            pos + 1
        } else {
            if self.is_leaf() {
                // The successor of an internal match is the minimum of its
                // right subtree, which sits at the front of this leaf.
                return seeking_successor.then(|| self.remove_item_at(0));
            }
            pos
        };

        let mut removed = self.children[next_pos].delete(key, seeking_successor)?;

        if found {
            removed = mem::replace(&mut self.items[pos], removed);
        }

        if self.children[next_pos].items.len() < MIN_ITEMS {
            self.fill_child_at(next_pos);
        }

        Some(removed)
    }

    /// Recursive invariant check: item count bounds, child/item count
    /// relationship, and ascending key order.
    fn validate(&self, depth: usize, is_root: bool) -> Result<(), TreeError> {
        if self.items.len() > MAX_ITEMS {
            return Err(TreeError::InvariantViolation(format!(
                "node at depth {depth} holds {} items, max is {MAX_ITEMS}",
                self.items.len()
            )));
        }

        if !is_root && self.items.len() < MIN_ITEMS {
            return Err(TreeError::InvariantViolation(format!(
                "node at depth {depth} holds {} items, min is {MIN_ITEMS}",
                self.items.len()
            )));
        }

        if !self.is_leaf() && self.children.len() != self.items.len() + 1 {
            return Err(TreeError::InvariantViolation(format!(
                "node at depth {depth} has {} children for {} items",
                self.children.len(),
                self.items.len()
            )));
        }

        for (i, pair) in self.items.windows(2).enumerate() {
            if pair[0].key >= pair[1].key {
                return Err(TreeError::InvariantViolation(format!(
                    "keys out of order at depth {depth}, index {i}"
                )));
            }
        }

        for child in &self.children {
            child.validate(depth + 1, false)?;
        }

        Ok(())
    }
}

// =============================================================================
// BTree
// =============================================================================

/// An in-memory B-tree keyed by byte strings.
///
/// Nodes hold up to `2 * DEGREE - 1` items in sorted order; every non-root
/// node holds at least `DEGREE - 1`. All leaves sit at the same depth.
/// The tree owns its nodes through parent-to-child links only.
#[derive(Debug, Clone)]
pub struct BTree {
    root: Option<Box<Node>>,
    len: usize,
}

impl BTree {
    /// Creates an empty tree.
    pub fn new() -> Self {
        Self { root: None, len: 0 }
    }

    /// Number of live items.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of levels: 0 for an empty tree, 1 when the root is a leaf.
    pub fn height(&self) -> usize {
        let mut height = 0;
        let mut next = self.root.as_deref();
        while let Some(node) = next {
            height += 1;
            next = node.children.first().map(|child| child.as_ref());
        }
        height
    }

    /// Returns the value stored under `key`, if any.
    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        let mut node = self.root.as_deref()?;
        loop {
            let (pos, found) = node.search(key);
            if found {
                return Some(node.items[pos].value.as_slice());
            }
            node = match node.children.get(pos) {
                Some(child) => child,
                None => return None,
            };
        }
    }

    #[inline]
    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.get(key).is_some()
    }

    /// Like [`get`](Self::get), but failing with [`TreeError::NotFound`]
    /// when the key is absent.
    pub fn find(&self, key: &[u8]) -> Result<&[u8], TreeError> {
        self.get(key).ok_or(TreeError::NotFound)
    }

    /// Inserts `value` under `key`, returning the previous value if the key
    /// was already present. A full root is split before delegating, growing
    /// the tree by one level.
    pub fn insert(&mut self, key: &[u8], value: &[u8]) -> Option<Vec<u8>> {
        let item = Item {
            key: key.to_vec(),
            value: value.to_vec(),
        };

        let mut root = self.root.take().unwrap_or_else(|| Box::new(Node::new()));
        if root.is_full() {
            root = Self::split_root(root);
        }

        let previous = root.insert(item);
        self.root = Some(root);

        if previous.is_none() {
            self.len += 1;
        }
        previous
    }

    fn split_root(mut old_root: Box<Node>) -> Box<Node> {
        let (middle, sibling) = old_root.split();
        let mut root = Box::new(Node::new());
        root.insert_item_at(0, middle);
        root.insert_child_at(0, old_root);
        root.insert_child_at(1, sibling);
        root
    }

    /// Removes `key` and returns its value. Fails with
    /// [`TreeError::EmptyTree`] when the tree has no root and
    /// [`TreeError::NotFound`] when the key is absent. A root left without
    /// items collapses, shrinking the tree by one level.
    pub fn delete(&mut self, key: &[u8]) -> Result<Vec<u8>, TreeError> {
        let root = self.root.as_mut().ok_or(TreeError::EmptyTree)?;
        let removed = root.delete(key, false).ok_or(TreeError::NotFound)?;
        self.len -= 1;

        if root.items.is_empty() {
            if let Some(mut old_root) = self.root.take() {
                self.root = if old_root.is_leaf() {
                    None
                } else {
                    Some(old_root.children.remove(0))
                };
            }
        }

        Ok(removed.value)
    }

    /// Checks the structural invariants of the whole tree. Intended for
    /// tests and debugging; the mutating operations maintain the invariants
    /// on their own.
    pub fn validate(&self) -> Result<(), TreeError> {
        match &self.root {
            Some(root) => root.validate(0, true),
            None => Ok(()),
        }
    }
}

impl Default for BTree {
    fn default() -> Self {
        Self::new()
    }
}
