// SPDX-License-Identifier: CC0-1.0

//! Incrementally built merkle tree.
//!
//! A block template grows one transaction at a time. Rebuilding the merkle
//! tree from the full transaction list after every addition costs O(n) hashes
//! each time; [`MerkleTree`] instead keeps the tree shape that repeated
//! pairwise rebuilding would produce, memoizes the hash of every node, and
//! only forgets the memoized hashes on the path to the leaf that changed.
//!
//! The shape is kept balanced to the left: every left child is a perfect
//! subtree and any imbalance lives on the rightmost path. Where the textbook
//! algorithm duplicates the last hash of an odd level, the tree has a node with
//! a single child (or a leaf pair with a single item) whose hash is taken
//! twice.

use core::cell::Cell;
use core::{fmt, mem};

use hashes::Hash;
use log::trace;

use super::{node_hash, Hashable, MerkleBranch, PartialMerkleTree, PartialMerkleTreeBuilder};
use crate::hash_types::TxMerkleNode;

/// A merkle tree that supports appending and replacing leaves.
///
/// The merkle root is computed lazily and memoized per node, so interleaving
/// [`MerkleTree::push`] with [`MerkleTree::merkle_root`] costs O(log n) hashes
/// per added leaf.
///
/// The memoized hashes live in [`Cell`]s: the tree can be moved between
/// threads but not shared between them. A block template builder owns it for
/// the duration of one build.
///
/// # Examples
///
/// ```
/// use bitcoin_merkle::{merkle_tree, MerkleTree, TxMerkleNode};
/// use bitcoin_merkle::hashes::Hash;
///
/// let leaves: Vec<TxMerkleNode> = (0..7u8).map(|i| TxMerkleNode::from_byte_array([i; 32])).collect();
///
/// let mut tree = MerkleTree::new();
/// for leaf in &leaves {
///     tree.push(*leaf);
/// }
/// assert_eq!(tree.merkle_root(), merkle_tree::calculate_root(leaves.into_iter()));
/// ```
#[derive(Clone, Debug)]
pub struct MerkleTree<T> {
    root: Node<T>,
}

#[derive(Clone, Debug)]
struct Node<T> {
    shape: Shape<T>,
    /// Number of leaf items below this node.
    item_count: usize,
    /// Memoized hash, `None` when a mutation happened below this node.
    hash: Cell<Option<TxMerkleNode>>,
}

#[derive(Clone, Debug)]
enum Shape<T> {
    /// Bottom level: up to two items, `item0` filled first.
    Leaves { item0: Option<T>, item1: Option<T> },
    /// Interior node, `child1` absent on the right spine of a partially filled tree.
    Branch { child0: Box<Node<T>>, child1: Option<Box<Node<T>>> },
}

impl<T> Node<T> {
    fn empty() -> Self {
        Node {
            shape: Shape::Leaves { item0: None, item1: None },
            item_count: 0,
            hash: Cell::new(None),
        }
    }

    fn pair(item0: T, item1: Option<T>) -> Self {
        let item_count = if item1.is_some() { 2 } else { 1 };
        Node {
            shape: Shape::Leaves { item0: Some(item0), item1 },
            item_count,
            hash: Cell::new(None),
        }
    }

    /// A chain of `depth` single-child interior nodes ending in a leaf pair
    /// that holds only `item`.
    fn spine(depth: u32, item: T) -> Self {
        let mut node = Node::pair(item, None);
        for _ in 0..depth {
            node = Node {
                shape: Shape::Branch { child0: Box::new(node), child1: None },
                item_count: 1,
                hash: Cell::new(None),
            };
        }
        node
    }

    fn right_count(child1: &Option<Box<Node<T>>>) -> usize {
        child1.as_ref().map_or(0, |child| child.item_count)
    }

    /// A balanced node is a perfect subtree: nothing more can be added below
    /// it without growing its height.
    fn is_balanced(&self) -> bool {
        match self.shape {
            Shape::Leaves { ref item1, .. } => self.item_count == 0 || item1.is_some(),
            Shape::Branch { ref child0, ref child1 } =>
                child0.item_count == Self::right_count(child1),
        }
    }

    fn add_item(&mut self, item: T) {
        let shape = mem::replace(&mut self.shape, Shape::Leaves { item0: None, item1: None });
        self.shape = match shape {
            Shape::Leaves { item0: None, .. } => Shape::Leaves { item0: Some(item), item1: None },
            Shape::Leaves { item0: Some(item0), item1: None } =>
                Shape::Leaves { item0: Some(item0), item1: Some(item) },
            Shape::Leaves { item0: Some(item0), item1: Some(item1) } => Shape::Branch {
                child0: Box::new(Node::pair(item0, Some(item1))),
                child1: Some(Box::new(Node::pair(item, None))),
            },
            Shape::Branch { child0, child1 } if child0.item_count == Self::right_count(&child1) => {
                // Full subtree: it moves one level down, unchanged, as the left
                // child and keeps its memoized hash. The new right child has to
                // sit at the same height, so it starts as a spine.
                let depth = self.item_count.trailing_zeros().saturating_sub(1);
                let left = Node {
                    shape: Shape::Branch { child0, child1 },
                    item_count: self.item_count,
                    hash: Cell::new(self.hash.get()),
                };
                Shape::Branch {
                    child0: Box::new(left),
                    child1: Some(Box::new(Node::spine(depth, item))),
                }
            }
            Shape::Branch { child0, child1: None } if child0.is_balanced() => {
                let depth = child0.item_count.trailing_zeros().saturating_sub(1);
                Shape::Branch { child0, child1: Some(Box::new(Node::spine(depth, item))) }
            }
            Shape::Branch { child0, child1: Some(mut child1) } if child0.is_balanced() => {
                child1.add_item(item);
                Shape::Branch { child0, child1: Some(child1) }
            }
            Shape::Branch { mut child0, child1 } => {
                child0.add_item(item);
                Shape::Branch { child0, child1 }
            }
        };
        self.item_count += 1;
        self.hash.set(None);
    }

    fn get(&self, index: usize) -> Option<&T> {
        match self.shape {
            Shape::Leaves { ref item0, ref item1 } => match index {
                0 => item0.as_ref(),
                1 => item1.as_ref(),
                _ => None,
            },
            Shape::Branch { ref child0, ref child1 } =>
                if index < child0.item_count {
                    child0.get(index)
                } else {
                    child1.as_ref()?.get(index - child0.item_count)
                },
        }
    }

    fn replace_item(&mut self, index: usize, item: T) -> Option<T> {
        let old = match self.shape {
            Shape::Leaves { ref mut item0, ref mut item1 } => {
                let slot = match index {
                    0 => item0,
                    1 => item1,
                    _ => return None,
                };
                if slot.is_none() {
                    return None;
                }
                slot.replace(item)
            }
            Shape::Branch { ref mut child0, ref mut child1 } =>
                if index < child0.item_count {
                    child0.replace_item(index, item)
                } else {
                    child1.as_mut()?.replace_item(index - child0.item_count, item)
                },
        };
        if old.is_some() {
            self.hash.set(None);
        }
        old
    }
}

impl<T: Hashable> Node<T> {
    fn hash(&self) -> TxMerkleNode {
        if let Some(hash) = self.hash.get() {
            return hash;
        }
        let hash = match self.shape {
            Shape::Leaves { item0: Some(ref item0), ref item1 } => {
                let h0 = item0.merkle_hash();
                let h1 = item1.as_ref().map_or(h0, |item| item.merkle_hash());
                node_hash(h0, h1)
            }
            Shape::Leaves { item0: None, .. } => TxMerkleNode::all_zeros(),
            Shape::Branch { ref child0, ref child1 } => {
                let h0 = child0.hash();
                let h1 = match child1 {
                    Some(child1) if child1.item_count > 0 => child1.hash(),
                    _ => h0,
                };
                node_hash(h0, h1)
            }
        };
        self.hash.set(Some(hash));
        hash
    }

    /// Pushes the siblings of the leaf at `index`, bottom level first.
    ///
    /// A sibling that doesn't exist is left out: the verifier knows from the
    /// index and the item count that the node is paired with itself there.
    fn collect_branch(&self, index: usize, branch: &mut Vec<TxMerkleNode>) {
        match self.shape {
            Shape::Leaves { ref item0, ref item1 } => {
                let sibling = if index == 0 { item1.as_ref() } else { item0.as_ref() };
                if let Some(sibling) = sibling {
                    branch.push(sibling.merkle_hash());
                }
            }
            Shape::Branch { ref child0, ref child1 } => {
                let child1 = child1.as_deref().filter(|child| child.item_count > 0);
                if index < child0.item_count {
                    child0.collect_branch(index, branch);
                    if let Some(child1) = child1 {
                        branch.push(child1.hash());
                    }
                } else if let Some(child1) = child1 {
                    child1.collect_branch(index - child0.item_count, branch);
                    branch.push(child0.hash());
                }
            }
        }
    }

    /// Walks the subtree depth-first, emitting flags and hashes for a partial
    /// merkle tree. `matches` covers exactly the items of this subtree.
    fn build_partial(&self, matches: &[bool], builder: &mut PartialMerkleTreeBuilder) {
        if !matches.iter().any(|&m| m) {
            builder.exclude_node(self.hash());
            return;
        }
        builder.include_node();
        match self.shape {
            Shape::Leaves { ref item0, ref item1 } =>
                for (item, &matched) in item0.iter().chain(item1.iter()).zip(matches) {
                    if matched {
                        builder.include_leaf(item.merkle_hash());
                    } else {
                        builder.exclude_leaf(item.merkle_hash());
                    }
                },
            Shape::Branch { ref child0, ref child1 } => {
                let (left, right) = matches.split_at(child0.item_count);
                child0.build_partial(left, builder);
                if let Some(child1) = child1.as_deref().filter(|child| child.item_count > 0) {
                    child1.build_partial(right, builder);
                }
            }
        }
    }
}

impl<T> MerkleTree<T> {
    /// Creates an empty tree.
    pub fn new() -> Self { MerkleTree { root: Node::empty() } }

    /// Returns the number of leaf items in the tree.
    pub fn len(&self) -> usize { self.root.item_count }

    /// Returns `true` if the tree has no leaf items.
    pub fn is_empty(&self) -> bool { self.root.item_count == 0 }

    /// Appends a leaf item to the tree.
    ///
    /// Amortized O(log n), no hashing happens until a hash is asked for.
    pub fn push(&mut self, item: T) { self.root.add_item(item) }

    /// Returns the leaf item at `index`, if there is one.
    pub fn get(&self, index: usize) -> Option<&T> { self.root.get(index) }

    /// Replaces the leaf item at `index`, returning the previous one.
    ///
    /// Only the memoized hashes between the root and that leaf are dropped.
    ///
    /// # Errors
    ///
    /// [`MerkleTreeError::IndexOutOfRange`] if `index` is not below [`MerkleTree::len`].
    pub fn replace(&mut self, index: usize, item: T) -> Result<T, MerkleTreeError> {
        let len = self.len();
        if index >= len {
            return Err(MerkleTreeError::IndexOutOfRange { index, len });
        }
        self.root.replace_item(index, item).ok_or(MerkleTreeError::IndexOutOfRange { index, len })
    }

    /// Returns an iterator over the leaf items, in insertion order.
    pub fn iter(&self) -> Iter<'_, T> { Iter { stack: vec![&self.root], pending: None } }

    fn item_count_u32(&self) -> Result<u32, MerkleTreeError> {
        u32::try_from(self.len()).map_err(|_| MerkleTreeError::TooManyItems(self.len()))
    }
}

impl<T: Hashable> MerkleTree<T> {
    /// Returns the merkle root of the tree.
    ///
    /// # Returns
    ///
    /// - `None` if the tree is empty.
    /// - The hash of the item itself if the tree holds exactly one item.
    /// - The root node hash otherwise, recomputing only what changed since
    ///   the last call.
    pub fn merkle_root(&self) -> Option<TxMerkleNode> {
        match self.len() {
            0 => None,
            1 => self.get(0).map(|item| item.merkle_hash()),
            _ => Some(self.root.hash()),
        }
    }

    /// Builds the merkle branch proving inclusion of the leaf at `index`.
    ///
    /// # Errors
    ///
    /// [`MerkleTreeError::IndexOutOfRange`] if `index` is not below [`MerkleTree::len`].
    pub fn merkle_branch(&self, index: usize) -> Result<MerkleBranch, MerkleTreeError> {
        let item_count = self.item_count_u32()?;
        if index >= self.len() {
            return Err(MerkleTreeError::IndexOutOfRange { index, len: self.len() });
        }
        let mut hashes = Vec::new();
        self.root.collect_branch(index, &mut hashes);
        Ok(MerkleBranch::new(index as u32, item_count, hashes))
    }

    /// Builds a partial merkle tree proving inclusion of every leaf for which
    /// `filter` returns `true`.
    ///
    /// `filter` is called exactly once per leaf, in order.
    ///
    /// # Errors
    ///
    /// [`MerkleTreeError::EmptyTree`] if there are no leaves: a partial merkle
    /// tree always commits to at least one item.
    pub fn partial_tree<F>(&self, mut filter: F) -> Result<PartialMerkleTree, MerkleTreeError>
    where
        F: FnMut(&T) -> bool,
    {
        let item_count = self.item_count_u32()?;
        let matches: Vec<bool> = self.iter().map(&mut filter).collect();

        let mut builder = PartialMerkleTreeBuilder::new(item_count);
        match self.get(0) {
            None => return Err(MerkleTreeError::EmptyTree),
            // A lone item is the root itself, the tree has height zero.
            Some(item) if item_count == 1 =>
                if matches[0] {
                    builder.include_leaf(item.merkle_hash());
                } else {
                    builder.exclude_leaf(item.merkle_hash());
                },
            Some(_) => self.root.build_partial(&matches, &mut builder),
        }
        let tree = builder.build();
        trace!(
            "built partial merkle tree: {} items, {} matched, {} hashes, {} flags",
            item_count,
            matches.iter().filter(|&&m| m).count(),
            tree.hashes().len(),
            tree.flags().len(),
        );
        Ok(tree)
    }
}

impl<T> Default for MerkleTree<T> {
    fn default() -> Self { Self::new() }
}

impl<T> Extend<T> for MerkleTree<T> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        for item in iter {
            self.push(item);
        }
    }
}

impl<T> FromIterator<T> for MerkleTree<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut tree = MerkleTree::new();
        tree.extend(iter);
        tree
    }
}

impl<'a, T> IntoIterator for &'a MerkleTree<T> {
    type Item = &'a T;
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter { self.iter() }
}

/// Iterator over the leaf items of a [`MerkleTree`], in insertion order.
#[derive(Debug)]
pub struct Iter<'a, T> {
    stack: Vec<&'a Node<T>>,
    pending: Option<&'a T>,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<&'a T> {
        if let Some(item) = self.pending.take() {
            return Some(item);
        }
        while let Some(node) = self.stack.pop() {
            match node.shape {
                Shape::Leaves { ref item0, ref item1 } =>
                    if let Some(item0) = item0.as_ref() {
                        self.pending = item1.as_ref();
                        return Some(item0);
                    },
                Shape::Branch { ref child0, ref child1 } => {
                    if let Some(child1) = child1.as_deref() {
                        self.stack.push(child1);
                    }
                    self.stack.push(child0);
                }
            }
        }
        None
    }
}

/// An error when working with a [`MerkleTree`].
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[non_exhaustive]
pub enum MerkleTreeError {
    /// There is no leaf at the requested index.
    IndexOutOfRange {
        /// The requested index.
        index: usize,
        /// The number of leaves in the tree.
        len: usize,
    },
    /// The operation needs at least one leaf.
    EmptyTree,
    /// The tree holds more leaves than a proof can describe.
    TooManyItems(usize),
}

impl fmt::Display for MerkleTreeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use MerkleTreeError::*;

        match *self {
            IndexOutOfRange { index, len } =>
                write!(f, "leaf index {} out of range for a tree of {} items", index, len),
            EmptyTree => write!(f, "merkle tree has no items"),
            TooManyItems(n) => write!(f, "too many items for a merkle proof: {}", n),
        }
    }
}

impl std::error::Error for MerkleTreeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        use MerkleTreeError::*;

        match *self {
            IndexOutOfRange { .. } | EmptyTree | TooManyItems(_) => None,
        }
    }
}
