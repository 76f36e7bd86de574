use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

use crate::buffer::{BufferPoolManager, ReadPageGuard, WritePageGuard};
use crate::common::{
    OxbowError, PageId, RecordId, Result, HEADER_PAGE_ID, INVALID_PAGE_ID, PAGE_SIZE,
};
use crate::storage::page::{
    BTreePage, BTreePageRef, HeaderPage, HeaderPageRef, InternalPage, InternalPageRef, LeafPage,
    LeafPageRef, INTERNAL_ENTRY_SIZE, INTERNAL_HEADER_SIZE, INTERNAL_PAGE_CAPACITY,
    LEAF_PAGE_CAPACITY,
};

use super::index_iterator::IndexIterator;
use super::key_comparator::KeyComparator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Insert,
    Delete,
}

#[derive(Clone, Copy)]
enum SearchTarget {
    Key(u64),
    Leftmost,
}

/// Per-operation latch state for a crabbing descent.
///
/// The root latch write guard is the queue's sentinel: it is released first,
/// then the ancestor page latches in descent (FIFO) order. Pages emptied by
/// merges are collected and only deleted once every latch is gone.
struct Context<'a> {
    root_latch: Option<RwLockWriteGuard<'a, PageId>>,
    write_set: VecDeque<WritePageGuard>,
    deleted: Vec<PageId>,
}

impl<'a> Context<'a> {
    fn new(root_latch: RwLockWriteGuard<'a, PageId>) -> Self {
        Self {
            root_latch: Some(root_latch),
            write_set: VecDeque::new(),
            deleted: Vec::new(),
        }
    }

    fn current_root(&self) -> PageId {
        self.root_latch
            .as_deref()
            .copied()
            .unwrap_or(INVALID_PAGE_ID)
    }

    fn set_root(&mut self, root_id: PageId) {
        if let Some(guard) = self.root_latch.as_mut() {
            **guard = root_id;
        }
    }

    /// Releases the tree latch and every retained ancestor, oldest first.
    fn release_ancestors(&mut self) {
        self.root_latch.take();
        while let Some(guard) = self.write_set.pop_front() {
            drop(guard);
        }
    }
}

/// A disk-backed B+ tree index over the buffer pool.
///
/// Leaves hold (key, record id) entries and form a singly linked list in
/// ascending key order; internal nodes hold separator keys whose first
/// pointer carries no key. Keys are unique.
///
/// Concurrency follows the latch-crabbing protocol. A tree-level
/// reader/writer latch protects the root page id. Searches take it shared,
/// latch the root page, release it, and then hand-over-hand read-latch down
/// to the leaf. Writers take it exclusive and write-latch downward,
/// releasing the tree latch and all retained ancestors as soon as a child
/// proves safe (a node that cannot split or underflow). The tree latch is
/// never held across disk I/O beyond fetching the root page itself.
pub struct BPlusTree<C: KeyComparator> {
    index_name: String,
    root_page_id: RwLock<PageId>,
    bpm: Arc<BufferPoolManager>,
    comparator: C,
    leaf_max_size: usize,
    internal_max_size: usize,
}

impl<C: KeyComparator> BPlusTree<C> {
    /// Creates an empty tree. No pages are allocated until the first insert,
    /// which also registers the tree in the header page.
    pub fn new(
        index_name: impl Into<String>,
        bpm: Arc<BufferPoolManager>,
        comparator: C,
        leaf_max_size: usize,
        internal_max_size: usize,
    ) -> Self {
        assert!(
            (2..=LEAF_PAGE_CAPACITY).contains(&leaf_max_size),
            "leaf max size out of range"
        );
        assert!(
            (3..=INTERNAL_PAGE_CAPACITY).contains(&internal_max_size),
            "internal max size out of range"
        );
        Self {
            index_name: index_name.into(),
            root_page_id: RwLock::new(INVALID_PAGE_ID),
            bpm,
            comparator,
            leaf_max_size,
            internal_max_size,
        }
    }

    /// Reopens a persisted tree by looking up its root in the header page.
    pub fn open(
        index_name: impl Into<String>,
        bpm: Arc<BufferPoolManager>,
        comparator: C,
        leaf_max_size: usize,
        internal_max_size: usize,
    ) -> Result<Self> {
        let index_name = index_name.into();
        let root_id = {
            let guard = bpm.fetch_page_read(HEADER_PAGE_ID)?;
            HeaderPageRef::new(guard.data())
                .get_root_id(&index_name)
                .ok_or_else(|| OxbowError::IndexNotFound(index_name.clone()))?
        };

        let mut tree = Self::new(index_name, bpm, comparator, leaf_max_size, internal_max_size);
        tree.root_page_id = RwLock::new(root_id);
        Ok(tree)
    }

    pub fn is_empty(&self) -> bool {
        *self.root_page_id.read() == INVALID_PAGE_ID
    }

    /// Returns the current root page id, holding the tree latch for the
    /// duration of the read.
    pub fn root_page_id(&self) -> PageId {
        *self.root_page_id.read()
    }

    /// Point lookup. Returns the record id stored under `key`, if any.
    pub fn get_value(&self, key: u64) -> Result<Option<RecordId>> {
        let root_latch = self.root_page_id.read();
        if *root_latch == INVALID_PAGE_ID {
            return Ok(None);
        }

        let leaf = self.find_leaf_read(SearchTarget::Key(key), root_latch)?;
        Ok(LeafPageRef::new(leaf.data()).lookup(key, &self.comparator))
    }

    /// Inserts a key-value pair. Returns false (leaving the tree unchanged)
    /// if the key already exists.
    pub fn insert(&self, key: u64, value: RecordId) -> Result<bool> {
        let mut ctx = Context::new(self.root_page_id.write());

        if ctx.current_root() == INVALID_PAGE_ID {
            self.start_new_tree(&mut ctx, key, value)?;
            return Ok(true);
        }

        let mut leaf_guard = self.find_leaf_write(key, Operation::Insert, &mut ctx)?;

        if LeafPageRef::new(leaf_guard.data())
            .lookup(key, &self.comparator)
            .is_some()
        {
            ctx.release_ancestors();
            return Ok(false);
        }

        let new_size = LeafPage::new(leaf_guard.data_mut()).insert(key, value, &self.comparator);
        if new_size < self.leaf_max_size {
            ctx.release_ancestors();
            return Ok(true);
        }

        self.split_leaf(&mut ctx, leaf_guard)?;
        Ok(true)
    }

    /// Removes `key` from the tree. Removing an absent key is a no-op.
    pub fn remove(&self, key: u64) -> Result<()> {
        let mut ctx = Context::new(self.root_page_id.write());

        if ctx.current_root() == INVALID_PAGE_ID {
            return Ok(());
        }

        let mut leaf_guard = self.find_leaf_write(key, Operation::Delete, &mut ctx)?;

        if LeafPageRef::new(leaf_guard.data())
            .lookup(key, &self.comparator)
            .is_none()
        {
            ctx.release_ancestors();
            return Ok(());
        }

        LeafPage::new(leaf_guard.data_mut()).remove_record(key, &self.comparator);
        self.coalesce_or_redistribute(&mut ctx, leaf_guard)?;

        let deleted = std::mem::take(&mut ctx.deleted);
        drop(ctx);
        for page_id in deleted {
            self.bpm.delete_page(page_id)?;
        }
        Ok(())
    }

    /// Iterator positioned at the smallest key.
    pub fn begin(&self) -> Result<IndexIterator> {
        let root_latch = self.root_page_id.read();
        if *root_latch == INVALID_PAGE_ID {
            return Ok(IndexIterator::empty(Arc::clone(&self.bpm)));
        }

        let leaf = self.find_leaf_read(SearchTarget::Leftmost, root_latch)?;
        Ok(IndexIterator::new(Arc::clone(&self.bpm), leaf, 0))
    }

    /// Iterator positioned at the first key not less than `key`.
    pub fn begin_at(&self, key: u64) -> Result<IndexIterator> {
        let root_latch = self.root_page_id.read();
        if *root_latch == INVALID_PAGE_ID {
            return Ok(IndexIterator::empty(Arc::clone(&self.bpm)));
        }

        let leaf = self.find_leaf_read(SearchTarget::Key(key), root_latch)?;
        let index = LeafPageRef::new(leaf.data()).key_index(key, &self.comparator);
        Ok(IndexIterator::new(Arc::clone(&self.bpm), leaf, index))
    }

    /// The position one past the last key.
    pub fn end(&self) -> IndexIterator {
        IndexIterator::empty(Arc::clone(&self.bpm))
    }

    /// Read-latching descent. The tree latch is dropped as soon as the root
    /// page latch is held; each child is latched before its parent is
    /// released.
    fn find_leaf_read(
        &self,
        target: SearchTarget,
        root_latch: RwLockReadGuard<'_, PageId>,
    ) -> Result<ReadPageGuard> {
        let mut guard = self.bpm.fetch_page_read(*root_latch)?;
        drop(root_latch);

        loop {
            if BTreePageRef::new(guard.data()).is_leaf() {
                return Ok(guard);
            }
            let child_id = {
                let node = InternalPageRef::new(guard.data());
                match target {
                    SearchTarget::Key(key) => node.lookup(key, &self.comparator),
                    SearchTarget::Leftmost => node.value_at(0),
                }
            };
            let child_guard = self.bpm.fetch_page_read(child_id)?;
            guard = child_guard;
        }
    }

    /// Write-latching descent. Ancestors are queued in the context and
    /// released as a batch whenever the newly latched child is safe for the
    /// operation.
    fn find_leaf_write(
        &self,
        key: u64,
        operation: Operation,
        ctx: &mut Context<'_>,
    ) -> Result<WritePageGuard> {
        let mut guard = self.bpm.fetch_page_write(ctx.current_root())?;
        if self.is_safe(&guard, operation, true) {
            ctx.release_ancestors();
        }

        loop {
            if BTreePageRef::new(guard.data()).is_leaf() {
                return Ok(guard);
            }

            let child_id = InternalPageRef::new(guard.data()).lookup(key, &self.comparator);
            let child_guard = self.bpm.fetch_page_write(child_id)?;
            ctx.write_set.push_back(guard);
            guard = child_guard;

            if self.is_safe(&guard, operation, false) {
                ctx.release_ancestors();
            }
        }
    }

    /// A node is safe when the pending operation cannot propagate past it:
    /// an insert that cannot fill it, or a delete that cannot underflow it.
    fn is_safe(&self, guard: &WritePageGuard, operation: Operation, is_root: bool) -> bool {
        let hdr = BTreePageRef::new(guard.data());
        match operation {
            Operation::Insert => {
                if hdr.is_leaf() {
                    hdr.size() < hdr.max_size() - 1
                } else {
                    hdr.size() < hdr.max_size()
                }
            }
            Operation::Delete => {
                if is_root {
                    hdr.size() > 2
                } else {
                    hdr.size() > hdr.min_size()
                }
            }
        }
    }

    fn start_new_tree(&self, ctx: &mut Context<'_>, key: u64, value: RecordId) -> Result<()> {
        let mut guard = self.bpm.new_page()?;
        let page_id = guard.page_id();

        let mut leaf = LeafPage::new(guard.data_mut());
        leaf.init(page_id, INVALID_PAGE_ID, self.leaf_max_size);
        leaf.insert(key, value, &self.comparator);

        ctx.set_root(page_id);
        self.update_root_page_id(page_id, true)?;
        debug!(root_id = %page_id, index = %self.index_name, "started new tree");
        Ok(())
    }

    fn split_leaf(&self, ctx: &mut Context<'_>, mut leaf_guard: WritePageGuard) -> Result<()> {
        let mut new_leaf_guard = self.bpm.new_page()?;
        let new_leaf_id = new_leaf_guard.page_id();

        let risen_key = {
            let parent_id = BTreePageRef::new(leaf_guard.data()).parent_page_id();
            let mut old_leaf = LeafPage::new(leaf_guard.data_mut());
            let mut new_leaf = LeafPage::new(new_leaf_guard.data_mut());

            new_leaf.init(new_leaf_id, parent_id, self.leaf_max_size);
            old_leaf.move_half_to(&mut new_leaf);
            new_leaf.set_next_page_id(old_leaf.next_page_id());
            old_leaf.set_next_page_id(new_leaf_id);
            new_leaf.key_at(0)
        };

        debug!(page_id = %leaf_guard.page_id(), new_page_id = %new_leaf_id, "split leaf");
        self.insert_into_parent(ctx, leaf_guard, risen_key, new_leaf_guard)
    }

    /// Links a freshly split-off sibling into the tree: grow a new root if
    /// `old_guard` was the root, insert into the parent if it has room, or
    /// split the parent through an overflow scratch buffer and recurse.
    fn insert_into_parent(
        &self,
        ctx: &mut Context<'_>,
        mut old_guard: WritePageGuard,
        risen_key: u64,
        mut new_guard: WritePageGuard,
    ) -> Result<()> {
        if BTreePageRef::new(old_guard.data()).is_root() {
            let mut root_guard = self.bpm.new_page()?;
            let root_id = root_guard.page_id();

            let mut root = InternalPage::new(root_guard.data_mut());
            root.init(root_id, INVALID_PAGE_ID, self.internal_max_size);
            root.populate_new_root(old_guard.page_id(), risen_key, new_guard.page_id());

            BTreePage::new(old_guard.data_mut()).set_parent_page_id(root_id);
            BTreePage::new(new_guard.data_mut()).set_parent_page_id(root_id);

            ctx.set_root(root_id);
            self.update_root_page_id(root_id, false)?;
            debug!(root_id = %root_id, "grew tree through new root");

            ctx.release_ancestors();
            return Ok(());
        }

        let Some(mut parent_guard) = ctx.write_set.pop_back() else {
            return Err(OxbowError::IndexCorrupted(
                "split node has no latched parent".to_string(),
            ));
        };

        if InternalPageRef::new(parent_guard.data()).size() < self.internal_max_size {
            InternalPage::new(parent_guard.data_mut()).insert_node_after(
                old_guard.page_id(),
                risen_key,
                new_guard.page_id(),
            );
            ctx.release_ancestors();
            return Ok(());
        }

        // The parent is full. Its latches on the split children are no
        // longer needed (the subtree below the parent is fully consistent
        // and still fenced off by the parent's own latch), and they must be
        // released before the staged split re-parents moved children.
        let old_id = old_guard.page_id();
        let new_id = new_guard.page_id();
        drop(old_guard);
        drop(new_guard);

        // Stage the parent plus the new entry in a scratch buffer with room
        // for one extra entry, split the staged node, then copy the
        // surviving lower half back over the parent's bytes.
        let mut scratch = vec![0u8; PAGE_SIZE + INTERNAL_ENTRY_SIZE];
        scratch[..PAGE_SIZE].copy_from_slice(parent_guard.data());

        let mut new_internal_guard = self.bpm.new_page()?;
        let new_internal_id = new_internal_guard.page_id();
        let grandparent_id = BTreePageRef::new(parent_guard.data()).parent_page_id();

        let (new_risen_key, lower_len) = {
            let mut staged = InternalPage::new(&mut scratch);
            staged.insert_node_after(old_id, risen_key, new_id);

            let mut new_internal = InternalPage::new(new_internal_guard.data_mut());
            new_internal.init(new_internal_id, grandparent_id, self.internal_max_size);
            staged.move_half_to(&mut new_internal, &self.bpm)?;

            let lower_len = INTERNAL_HEADER_SIZE + staged.size() * INTERNAL_ENTRY_SIZE;
            (new_internal.key_at(0), lower_len)
        };

        parent_guard.data_mut()[..lower_len].copy_from_slice(&scratch[..lower_len]);
        debug!(page_id = %parent_guard.page_id(), new_page_id = %new_internal_id, "split internal node");

        self.insert_into_parent(ctx, parent_guard, new_risen_key, new_internal_guard)
    }

    /// Restores minimum occupancy of an underflowed node by borrowing from
    /// or merging with a sibling, preferring the left one, and recursing on
    /// the parent after a merge.
    fn coalesce_or_redistribute(
        &self,
        ctx: &mut Context<'_>,
        node_guard: WritePageGuard,
    ) -> Result<()> {
        let node_id = node_guard.page_id();

        if BTreePageRef::new(node_guard.data()).is_root() {
            self.adjust_root(ctx, node_guard)?;
            ctx.release_ancestors();
            return Ok(());
        }

        let min_size = BTreePageRef::new(node_guard.data()).min_size();
        if BTreePageRef::new(node_guard.data()).size() >= min_size {
            ctx.release_ancestors();
            return Ok(());
        }

        let Some(mut parent_guard) = ctx.write_set.pop_back() else {
            return Err(OxbowError::IndexCorrupted(
                "underflowed node has no latched parent".to_string(),
            ));
        };

        let parent = InternalPageRef::new(parent_guard.data());
        if parent.size() < 2 {
            return Err(OxbowError::IndexCorrupted(
                "non-root parent with a single child".to_string(),
            ));
        }
        let index = parent.value_index(node_id).ok_or_else(|| {
            OxbowError::IndexCorrupted("node missing from its parent".to_string())
        })?;

        let mut node_guard = node_guard;
        if index > 0 {
            let sibling_id = InternalPageRef::new(parent_guard.data()).value_at(index - 1);
            let mut sibling_guard = self.bpm.fetch_page_write(sibling_id)?;

            if BTreePageRef::new(sibling_guard.data()).size() > min_size {
                self.redistribute(&mut sibling_guard, &mut node_guard, &mut parent_guard, index, true)?;
                ctx.release_ancestors();
                return Ok(());
            }

            // Drain the node into its left sibling.
            self.coalesce(&mut sibling_guard, &mut node_guard, &mut parent_guard, index)?;
            ctx.deleted.push(node_id);
            debug!(page_id = %node_id, into = %sibling_id, "coalesced into left sibling");

            drop(node_guard);
            drop(sibling_guard);
            return self.coalesce_or_redistribute(ctx, parent_guard);
        }

        let sibling_id = InternalPageRef::new(parent_guard.data()).value_at(index + 1);
        let mut sibling_guard = self.bpm.fetch_page_write(sibling_id)?;

        if BTreePageRef::new(sibling_guard.data()).size() > min_size {
            self.redistribute(&mut sibling_guard, &mut node_guard, &mut parent_guard, index, false)?;
            ctx.release_ancestors();
            return Ok(());
        }

        // Leftmost child: drain the right sibling into the node instead.
        self.coalesce(&mut node_guard, &mut sibling_guard, &mut parent_guard, index + 1)?;
        ctx.deleted.push(sibling_id);
        debug!(page_id = %sibling_id, into = %node_id, "coalesced right sibling");

        drop(node_guard);
        drop(sibling_guard);
        self.coalesce_or_redistribute(ctx, parent_guard)
    }

    /// Merges `node` into its left `neighbor` and removes node's entry (at
    /// `index`) from the parent. For internal merges the parent separator is
    /// pulled down as the boundary key.
    fn coalesce(
        &self,
        neighbor: &mut WritePageGuard,
        node: &mut WritePageGuard,
        parent: &mut WritePageGuard,
        index: usize,
    ) -> Result<()> {
        let middle_key = InternalPageRef::new(parent.data()).key_at(index);

        if BTreePageRef::new(node.data()).is_leaf() {
            let mut drained = LeafPage::new(node.data_mut());
            let mut recipient = LeafPage::new(neighbor.data_mut());
            drained.move_all_to(&mut recipient);
        } else {
            let mut drained = InternalPage::new(node.data_mut());
            let mut recipient = InternalPage::new(neighbor.data_mut());
            drained.move_all_to(&mut recipient, middle_key, &self.bpm)?;
        }

        InternalPage::new(parent.data_mut()).remove(index);
        Ok(())
    }

    /// Moves a single entry from `neighbor` into `node` and refreshes the
    /// parent separator. `from_prev` is true when the neighbor is the left
    /// sibling (so its last entry moves), false when it is the right one.
    fn redistribute(
        &self,
        neighbor: &mut WritePageGuard,
        node: &mut WritePageGuard,
        parent: &mut WritePageGuard,
        index: usize,
        from_prev: bool,
    ) -> Result<()> {
        if BTreePageRef::new(node.data()).is_leaf() {
            let mut neighbor_leaf = LeafPage::new(neighbor.data_mut());
            let mut node_leaf = LeafPage::new(node.data_mut());

            if from_prev {
                neighbor_leaf.move_last_to_front_of(&mut node_leaf);
                let separator = node_leaf.key_at(0);
                InternalPage::new(parent.data_mut()).set_key_at(index, separator);
            } else {
                neighbor_leaf.move_first_to_end_of(&mut node_leaf);
                let separator = neighbor_leaf.key_at(0);
                InternalPage::new(parent.data_mut()).set_key_at(index + 1, separator);
            }
        } else {
            let separator_index = if from_prev { index } else { index + 1 };
            let middle_key = InternalPageRef::new(parent.data()).key_at(separator_index);

            let mut neighbor_node = InternalPage::new(neighbor.data_mut());
            let mut node_node = InternalPage::new(node.data_mut());

            if from_prev {
                neighbor_node.move_last_to_front_of(&mut node_node, middle_key, &self.bpm)?;
                let separator = node_node.key_at(0);
                InternalPage::new(parent.data_mut()).set_key_at(index, separator);
            } else {
                neighbor_node.move_first_to_end_of(&mut node_node, middle_key, &self.bpm)?;
                let separator = neighbor_node.key_at(0);
                InternalPage::new(parent.data_mut()).set_key_at(index + 1, separator);
            }
        }
        Ok(())
    }

    /// Handles underflow at the root: an internal root left with a single
    /// child promotes that child; an empty leaf root empties the tree.
    fn adjust_root(&self, ctx: &mut Context<'_>, root_guard: WritePageGuard) -> Result<()> {
        let root_id = root_guard.page_id();
        let is_leaf = BTreePageRef::new(root_guard.data()).is_leaf();
        let size = BTreePageRef::new(root_guard.data()).size();

        if !is_leaf && size == 1 {
            let child_id = InternalPageRef::new(root_guard.data()).value_at(0);
            let mut child_guard = self.bpm.fetch_page_write(child_id)?;
            BTreePage::new(child_guard.data_mut()).set_parent_page_id(INVALID_PAGE_ID);

            ctx.set_root(child_id);
            self.update_root_page_id(child_id, false)?;
            ctx.deleted.push(root_id);
            debug!(old_root = %root_id, new_root = %child_id, "promoted only child to root");
            return Ok(());
        }

        if is_leaf && size == 0 {
            ctx.set_root(INVALID_PAGE_ID);
            self.update_root_page_id(INVALID_PAGE_ID, false)?;
            ctx.deleted.push(root_id);
            debug!(old_root = %root_id, "tree emptied");
        }
        Ok(())
    }

    /// Writes the tree's root page id into the header page record. `create`
    /// registers the index on first use; later root changes update in place.
    fn update_root_page_id(&self, root_id: PageId, create: bool) -> Result<()> {
        let mut guard = self.bpm.fetch_page_write(HEADER_PAGE_ID)?;
        let mut header = HeaderPage::new(guard.data_mut());

        if create {
            if !header.insert_record(&self.index_name, root_id)? {
                header.update_record(&self.index_name, root_id);
            }
        } else if !header.update_record(&self.index_name, root_id) {
            return Err(OxbowError::IndexNotFound(self.index_name.clone()));
        }
        Ok(())
    }
}
