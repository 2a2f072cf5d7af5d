use std::sync::Arc;

use log::debug;
use parking_lot::{RwLock, RwLockWriteGuard};

use crate::buffer::{BufferPoolManager, WritePageGuard};
use crate::common::{PageId, RecordId, Result, HEADER_PAGE_ID, INVALID_PAGE_ID};

use super::btree_page::{self, BTreePageRef, IndexKey, INTERNAL_CAPACITY, LEAF_CAPACITY};
use super::btree_iterator::BTreeIterator;
use super::header_page::{HeaderPage, HeaderPageRef};
use super::internal_page::{InternalNode, InternalNodeRef};
use super::key_comparator::KeyComparator;
use super::leaf_page::{LeafNode, LeafNodeRef};

/// What a traversal intends to do at the leaf; decides latch kinds and which
/// ancestors stay latched on the way down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LatchMode {
    Insert,
    Remove,
}

/// Latches held by a structural traversal: the tree guard (while the root
/// may still change) and the write-latched path nodes that could still be
/// touched by a split or merge. Releasing happens front-to-back as soon as a
/// descendant proves safe.
struct WriteContext<'a> {
    tree_latch: Option<RwLockWriteGuard<'a, PageId>>,
    stack: Vec<WritePageGuard>,
}

impl WriteContext<'_> {
    fn release_ancestors(&mut self) {
        self.stack.clear();
        self.tree_latch = None;
    }
}

/// Concurrent B+Tree index over buffer-pool pages with unique keys.
///
/// Point reads descend with read-latch coupling; inserts and removes take
/// the tree guard, crab down with write latches, and drop everything above
/// the first node that cannot be structurally affected. Root changes are
/// mirrored into the header page so the tree can be reopened by name.
pub struct BPlusTree<C: KeyComparator> {
    index_name: String,
    /// Tree guard: protects `root` and the empty-tree state
    root: RwLock<PageId>,
    bpm: Arc<BufferPoolManager>,
    comparator: C,
    leaf_max_size: u32,
    internal_max_size: u32,
}

impl<C: KeyComparator> BPlusTree<C> {
    /// Creates an empty tree. Nothing is persisted until the first insert.
    pub fn new(
        index_name: impl Into<String>,
        bpm: Arc<BufferPoolManager>,
        comparator: C,
        leaf_max_size: u32,
        internal_max_size: u32,
    ) -> Self {
        assert!(
            (2..=LEAF_CAPACITY).contains(&leaf_max_size),
            "leaf max size must fit a page"
        );
        assert!(
            (2..INTERNAL_CAPACITY).contains(&internal_max_size),
            "internal max size must leave room for one-entry overflow"
        );
        Self {
            index_name: index_name.into(),
            root: RwLock::new(INVALID_PAGE_ID),
            bpm,
            comparator,
            leaf_max_size,
            internal_max_size,
        }
    }

    /// Reattaches to a tree previously registered in the header page. An
    /// unknown name yields an empty tree.
    pub fn open(
        index_name: impl Into<String>,
        bpm: Arc<BufferPoolManager>,
        comparator: C,
        leaf_max_size: u32,
        internal_max_size: u32,
    ) -> Result<Self> {
        let index_name = index_name.into();
        let root_id = {
            let guard = bpm.read_page(HEADER_PAGE_ID)?;
            HeaderPageRef::new(guard.data())
                .get_record(&index_name)
                .unwrap_or(INVALID_PAGE_ID)
        };

        let tree = Self::new(index_name, bpm, comparator, leaf_max_size, internal_max_size);
        *tree.root.write() = root_id;
        Ok(tree)
    }

    pub fn is_empty(&self) -> bool {
        *self.root.read() == INVALID_PAGE_ID
    }

    pub fn root_page_id(&self) -> PageId {
        *self.root.read()
    }

    /// Point lookup. Couples read latches down to the leaf.
    pub fn get_value(&self, key: &IndexKey) -> Result<Option<RecordId>> {
        let tree_latch = self.root.read();
        let root_id = *tree_latch;
        if root_id == INVALID_PAGE_ID {
            return Ok(None);
        }

        let mut guard = self.bpm.read_page(root_id)?;
        drop(tree_latch);

        loop {
            if BTreePageRef::new(guard.data()).is_leaf() {
                let leaf = LeafNodeRef::new(guard.data());
                return Ok(leaf.lookup(key, &self.comparator));
            }
            let child = InternalNodeRef::new(guard.data()).lookup(key, &self.comparator);
            let next = self.bpm.read_page(child)?;
            guard = next;
        }
    }

    /// Inserts a unique key. Returns false (without modification) when the
    /// key already exists.
    pub fn insert(&self, key: &IndexKey, rid: RecordId) -> Result<bool> {
        let mut tree_latch = self.root.write();

        if *tree_latch == INVALID_PAGE_ID {
            // First key: a single leaf becomes the root.
            let mut guard = self.bpm.new_page()?;
            let root_pid = guard.page_id();
            {
                let mut leaf = LeafNode::new(guard.data_mut());
                leaf.init(root_pid, None, self.leaf_max_size);
                leaf.insert(key, rid, &self.comparator);
            }
            drop(guard);
            *tree_latch = root_pid;
            self.sync_header_record(root_pid)?;
            debug!("index \"{}\": created root {}", self.index_name, root_pid);
            return Ok(true);
        }

        let mut ctx = self.find_leaf_write(tree_latch, key, LatchMode::Insert)?;
        let mut leaf_guard = ctx.stack.pop().expect("descent always ends at a leaf");
        let leaf_pid = leaf_guard.page_id();

        let inserted = {
            let mut leaf = LeafNode::new(leaf_guard.data_mut());
            leaf.insert(key, rid, &self.comparator)
        };
        if !inserted {
            return Ok(false);
        }
        if LeafNodeRef::new(leaf_guard.data()).size() < self.leaf_max_size {
            return Ok(true);
        }

        // Leaf overflow: split off a right sibling, then push the new
        // separator upward.
        let mut sibling_guard = self.bpm.new_page()?;
        let sibling_pid = sibling_guard.page_id();
        let (old_first, new_first) = {
            let mut leaf = LeafNode::new(leaf_guard.data_mut());
            let mut sibling = LeafNode::new(sibling_guard.data_mut());
            sibling.init(sibling_pid, leaf.parent_page_id(), self.leaf_max_size);
            sibling.set_next_page_id(leaf.next_page_id());
            leaf.set_next_page_id(Some(sibling_pid));
            while sibling.size() < sibling.min_size() {
                leaf.shift_tail_to_front(&mut sibling);
            }
            (leaf.key_at(0), sibling.key_at(0))
        };
        debug!(
            "index \"{}\": split leaf {} -> {}",
            self.index_name, leaf_pid, sibling_pid
        );
        drop(leaf_guard);
        drop(sibling_guard);

        self.insert_into_parent(&mut ctx, old_first, leaf_pid, new_first, sibling_pid)?;
        Ok(true)
    }

    /// Removes `key`. Returns false when the key is absent.
    pub fn remove(&self, key: &IndexKey) -> Result<bool> {
        let tree_latch = self.root.write();
        if *tree_latch == INVALID_PAGE_ID {
            return Ok(false);
        }

        let mut ctx = self.find_leaf_write(tree_latch, key, LatchMode::Remove)?;
        let mut leaf_guard = ctx.stack.pop().expect("descent always ends at a leaf");

        let removed = {
            let mut leaf = LeafNode::new(leaf_guard.data_mut());
            leaf.remove(key, &self.comparator)
        };
        if !removed {
            return Ok(false);
        }

        let needs_rebalance = {
            let view = BTreePageRef::new(leaf_guard.data());
            match view.parent_page_id() {
                // The root handles its own shrink-to-empty inside rebalance.
                None => true,
                Some(_) => view.size() < view.min_size(),
            }
        };

        let mut deleted_pages = Vec::new();
        if needs_rebalance {
            self.rebalance(leaf_guard, &mut ctx, &mut deleted_pages)?;
        } else {
            drop(leaf_guard);
        }
        drop(ctx);

        // Emptied pages go back to the pool only after every latch on the
        // path is gone.
        for pid in deleted_pages {
            self.bpm.delete_page(pid)?;
        }
        Ok(true)
    }

    /// Iterator positioned at the leftmost entry.
    pub fn iter(&self) -> Result<BTreeIterator> {
        let tree_latch = self.root.read();
        let root_id = *tree_latch;
        if root_id == INVALID_PAGE_ID {
            return Ok(BTreeIterator::end(Arc::clone(&self.bpm)));
        }

        let mut guard = self.bpm.read_page(root_id)?;
        drop(tree_latch);

        loop {
            if BTreePageRef::new(guard.data()).is_leaf() {
                return Ok(BTreeIterator::new(Arc::clone(&self.bpm), guard, 0));
            }
            let child = InternalNodeRef::new(guard.data()).child_at(0);
            let next = self.bpm.read_page(child)?;
            guard = next;
        }
    }

    /// Iterator positioned at the first entry with key >= `key`.
    pub fn iter_from(&self, key: &IndexKey) -> Result<BTreeIterator> {
        let tree_latch = self.root.read();
        let root_id = *tree_latch;
        if root_id == INVALID_PAGE_ID {
            return Ok(BTreeIterator::end(Arc::clone(&self.bpm)));
        }

        let mut guard = self.bpm.read_page(root_id)?;
        drop(tree_latch);

        loop {
            if BTreePageRef::new(guard.data()).is_leaf() {
                let index = LeafNodeRef::new(guard.data()).key_index(key, &self.comparator);
                return Ok(BTreeIterator::new(Arc::clone(&self.bpm), guard, index));
            }
            let child = InternalNodeRef::new(guard.data()).lookup(key, &self.comparator);
            let next = self.bpm.read_page(child)?;
            guard = next;
        }
    }

    /// Crabs from the root to the leaf covering `key`, write-latching the
    /// path. Ancestors (and the tree guard) are released as soon as the
    /// current node cannot propagate a structural change past itself.
    fn find_leaf_write<'a>(
        &self,
        tree_latch: RwLockWriteGuard<'a, PageId>,
        key: &IndexKey,
        mode: LatchMode,
    ) -> Result<WriteContext<'a>> {
        let mut page_id = *tree_latch;
        let mut ctx = WriteContext {
            tree_latch: Some(tree_latch),
            stack: Vec::new(),
        };
        let mut at_root = true;

        loop {
            let guard = self.bpm.write_page(page_id)?;
            let (is_leaf, safe, child) = {
                let header = BTreePageRef::new(guard.data());
                let is_leaf = header.is_leaf();
                let safe = match mode {
                    // Safe for insert: absorbing one more entry cannot split
                    // this node.
                    LatchMode::Insert => {
                        if is_leaf {
                            header.size() + 1 < header.max_size()
                        } else {
                            header.size() < header.max_size()
                        }
                    }
                    // Safe for remove: losing one entry cannot underflow (or,
                    // at the root, collapse) this node.
                    LatchMode::Remove => {
                        if at_root {
                            if is_leaf {
                                header.size() > 1
                            } else {
                                header.size() > 2
                            }
                        } else {
                            header.size() > header.min_size()
                        }
                    }
                };
                let child = if is_leaf {
                    None
                } else {
                    Some(InternalNodeRef::new(guard.data()).lookup(key, &self.comparator))
                };
                (is_leaf, safe, child)
            };

            if safe {
                ctx.release_ancestors();
            }
            ctx.stack.push(guard);
            if is_leaf {
                return Ok(ctx);
            }
            page_id = child.expect("internal node always yields a child");
            at_root = false;
        }
    }

    /// Publishes a split: `new_pid` (first key `new_first`) became the right
    /// sibling of `old_pid` (first key now `old_first`). Recurses while
    /// parents overflow; an empty stack means `old_pid` was the root.
    fn insert_into_parent(
        &self,
        ctx: &mut WriteContext<'_>,
        old_first: IndexKey,
        old_pid: PageId,
        new_first: IndexKey,
        new_pid: PageId,
    ) -> Result<()> {
        if ctx.stack.is_empty() {
            // The split node was the root: grow the tree by one level.
            let mut root_guard = self.bpm.new_page()?;
            let root_pid = root_guard.page_id();
            {
                let mut root = InternalNode::new(root_guard.data_mut());
                root.init(root_pid, None, self.internal_max_size);
                root.build_root(&old_first, old_pid, &new_first, new_pid);
            }
            drop(root_guard);
            self.set_parent(old_pid, Some(root_pid))?;
            self.set_parent(new_pid, Some(root_pid))?;

            let tree_latch = ctx
                .tree_latch
                .as_deref_mut()
                .expect("a splitting root is never released early");
            *tree_latch = root_pid;
            self.sync_header_record(root_pid)?;
            debug!("index \"{}\": new root {}", self.index_name, root_pid);
            return Ok(());
        }

        let mut parent_guard = ctx.stack.pop().expect("checked non-empty");
        let parent_pid = parent_guard.page_id();
        let overflow = {
            let mut parent = InternalNode::new(parent_guard.data_mut());
            let idx = parent
                .value_index(old_pid)
                .expect("split child must appear in its latched parent");
            parent.set_key_at(idx, &old_first);
            parent.insert(&new_first, new_pid, &self.comparator);
            parent.size() > parent.max_size()
        };
        if !overflow {
            return Ok(());
        }

        // Parent overflow: peel its tail entries into a new right sibling
        // and continue upward with the sibling's first key as separator.
        let mut sibling_guard = self.bpm.new_page()?;
        let sibling_pid = sibling_guard.page_id();
        let mut moved_children = Vec::new();
        let (parent_first, middle_key) = {
            let mut parent = InternalNode::new(parent_guard.data_mut());
            let mut sibling = InternalNode::new(sibling_guard.data_mut());
            sibling.init(sibling_pid, parent.parent_page_id(), self.internal_max_size);
            while sibling.size() < sibling.min_size() {
                moved_children.push(parent.shift_tail_to_front(&mut sibling));
            }
            (parent.key_at(0), sibling.key_at(0))
        };
        debug!(
            "index \"{}\": split internal {} -> {}",
            self.index_name, parent_pid, sibling_pid
        );
        drop(parent_guard);
        drop(sibling_guard);
        for child in moved_children {
            self.set_parent(child, Some(sibling_pid))?;
        }

        self.insert_into_parent(ctx, parent_first, parent_pid, middle_key, sibling_pid)
    }

    /// Restores occupancy after a removal left `cur_guard` underfull (or
    /// shrank the root). Borrows from a sibling when one can spare an entry,
    /// otherwise merges and recurses into the parent.
    fn rebalance(
        &self,
        mut cur_guard: WritePageGuard,
        ctx: &mut WriteContext<'_>,
        deleted: &mut Vec<PageId>,
    ) -> Result<()> {
        let cur_pid = cur_guard.page_id();
        let (is_leaf, size, min_size, is_root) = {
            let view = BTreePageRef::new(cur_guard.data());
            (
                view.is_leaf(),
                view.size(),
                view.min_size(),
                view.parent_page_id().is_none(),
            )
        };

        if is_root {
            return self.shrink_root(cur_guard, ctx, deleted, is_leaf, size);
        }
        if size >= min_size {
            return Ok(());
        }

        let mut parent_guard = ctx
            .stack
            .pop()
            .expect("an underflowing node keeps its parent latched");
        let parent_pid = parent_guard.page_id();
        let (index, parent_size) = {
            let parent = InternalNodeRef::new(parent_guard.data());
            let index = parent
                .value_index(cur_pid)
                .expect("node must appear in its latched parent");
            (index, parent.size() as usize)
        };

        // Borrow from the left sibling first.
        if index > 0 {
            let left_pid = InternalNodeRef::new(parent_guard.data()).child_at(index - 1);
            let mut left_guard = self.bpm.write_page(left_pid)?;
            let can_spare = {
                let view = BTreePageRef::new(left_guard.data());
                view.size() > view.min_size()
            };
            if can_spare {
                if is_leaf {
                    let mut left = LeafNode::new(left_guard.data_mut());
                    let mut cur = LeafNode::new(cur_guard.data_mut());
                    left.shift_tail_to_front(&mut cur);
                    let new_first = cur.key_at(0);
                    InternalNode::new(parent_guard.data_mut()).set_key_at(index, &new_first);
                } else {
                    let moved = {
                        let mut left = InternalNode::new(left_guard.data_mut());
                        let mut cur = InternalNode::new(cur_guard.data_mut());
                        left.shift_tail_to_front(&mut cur)
                    };
                    let new_first = InternalNodeRef::new(cur_guard.data()).key_at(0);
                    InternalNode::new(parent_guard.data_mut()).set_key_at(index, &new_first);
                    self.set_parent(moved, Some(cur_pid))?;
                }
                return Ok(());
            }
        }

        // Then the right sibling.
        if index + 1 < parent_size {
            let right_pid = InternalNodeRef::new(parent_guard.data()).child_at(index + 1);
            let mut right_guard = self.bpm.write_page(right_pid)?;
            let can_spare = {
                let view = BTreePageRef::new(right_guard.data());
                view.size() > view.min_size()
            };
            if can_spare {
                if is_leaf {
                    let mut right = LeafNode::new(right_guard.data_mut());
                    let mut cur = LeafNode::new(cur_guard.data_mut());
                    right.shift_head_to_back(&mut cur);
                    let new_first = right.key_at(0);
                    InternalNode::new(parent_guard.data_mut()).set_key_at(index + 1, &new_first);
                } else {
                    let moved = {
                        let mut right = InternalNode::new(right_guard.data_mut());
                        let mut cur = InternalNode::new(cur_guard.data_mut());
                        right.shift_head_to_back(&mut cur)
                    };
                    let new_first = InternalNodeRef::new(right_guard.data()).key_at(0);
                    InternalNode::new(parent_guard.data_mut()).set_key_at(index + 1, &new_first);
                    self.set_parent(moved, Some(cur_pid))?;
                }
                return Ok(());
            }
        }

        // No sibling can spare an entry: merge. Into the left sibling when
        // one exists, otherwise absorb the right sibling.
        if index > 0 {
            let left_pid = InternalNodeRef::new(parent_guard.data()).child_at(index - 1);
            let mut left_guard = self.bpm.write_page(left_pid)?;
            if is_leaf {
                let mut left = LeafNode::new(left_guard.data_mut());
                let mut cur = LeafNode::new(cur_guard.data_mut());
                let next = cur.next_page_id();
                cur.move_all_to(&mut left);
                left.set_next_page_id(next);
            } else {
                let moved = {
                    let mut left = InternalNode::new(left_guard.data_mut());
                    let mut cur = InternalNode::new(cur_guard.data_mut());
                    cur.move_all_to(&mut left)
                };
                for child in moved {
                    self.set_parent(child, Some(left_pid))?;
                }
            }
            InternalNode::new(parent_guard.data_mut()).remove_at(index);
            debug!(
                "index \"{}\": merged {} into {}",
                self.index_name, cur_pid, left_pid
            );
            drop(cur_guard);
            drop(left_guard);
            deleted.push(cur_pid);
        } else if index + 1 < parent_size {
            let right_pid = InternalNodeRef::new(parent_guard.data()).child_at(index + 1);
            let mut right_guard = self.bpm.write_page(right_pid)?;
            if is_leaf {
                let mut right = LeafNode::new(right_guard.data_mut());
                let mut cur = LeafNode::new(cur_guard.data_mut());
                let next = right.next_page_id();
                right.move_all_to(&mut cur);
                cur.set_next_page_id(next);
            } else {
                let moved = {
                    let mut right = InternalNode::new(right_guard.data_mut());
                    let mut cur = InternalNode::new(cur_guard.data_mut());
                    right.move_all_to(&mut cur)
                };
                for child in moved {
                    self.set_parent(child, Some(cur_pid))?;
                }
            }
            InternalNode::new(parent_guard.data_mut()).remove_at(index + 1);
            debug!(
                "index \"{}\": merged {} into {}",
                self.index_name, right_pid, cur_pid
            );
            drop(cur_guard);
            drop(right_guard);
            deleted.push(right_pid);
        } else {
            // Only child of a minimally-filled parent: nothing to pair with.
            drop(cur_guard);
            return Ok(());
        }

        // The parent lost a slot; it may now underflow or, as the root,
        // collapse a level.
        self.rebalance(parent_guard, ctx, deleted)
    }

    /// Root shrink rules: an empty leaf root empties the whole tree; an
    /// internal root left with a single child hands the root role to it.
    fn shrink_root(
        &self,
        cur_guard: WritePageGuard,
        ctx: &mut WriteContext<'_>,
        deleted: &mut Vec<PageId>,
        is_leaf: bool,
        size: u32,
    ) -> Result<()> {
        let cur_pid = cur_guard.page_id();

        if is_leaf {
            if size == 0 {
                drop(cur_guard);
                let tree_latch = ctx
                    .tree_latch
                    .as_deref_mut()
                    .expect("a collapsing root is never released early");
                *tree_latch = INVALID_PAGE_ID;
                deleted.push(cur_pid);
                self.sync_header_record(INVALID_PAGE_ID)?;
                debug!("index \"{}\": emptied", self.index_name);
            }
            return Ok(());
        }

        if size == 1 {
            let child_pid = InternalNodeRef::new(cur_guard.data()).child_at(0);
            drop(cur_guard);
            self.set_parent(child_pid, None)?;
            let tree_latch = ctx
                .tree_latch
                .as_deref_mut()
                .expect("a collapsing root is never released early");
            *tree_latch = child_pid;
            deleted.push(cur_pid);
            self.sync_header_record(child_pid)?;
            debug!(
                "index \"{}\": promoted {} to root",
                self.index_name, child_pid
            );
        }
        Ok(())
    }

    /// Repoints a node's parent link through the pool. The target must not
    /// be latched by this traversal.
    fn set_parent(&self, page_id: PageId, parent: Option<PageId>) -> Result<()> {
        let mut guard = self.bpm.write_page(page_id)?;
        btree_page::write_parent(guard.data_mut(), parent);
        Ok(())
    }

    /// Mirrors the current root id into the header page, creating the
    /// record on first use.
    fn sync_header_record(&self, root_id: PageId) -> Result<()> {
        let mut guard = self.bpm.write_page(HEADER_PAGE_ID)?;
        let mut header = HeaderPage::new(guard.data_mut());
        if !header.update_record(&self.index_name, root_id) {
            assert!(
                header.insert_record(&self.index_name, root_id),
                "header page cannot register index {:?}",
                self.index_name
            );
        }
        Ok(())
    }
}
