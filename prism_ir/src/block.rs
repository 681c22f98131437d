//! Basic blocks of the operation graph.
//!
//! A block does not own its operations: it records the half-open range
//! `[begin, end)` of operation indices emitted while it was the insertion
//! target. Blocks live in the graph's block pool and are addressed by
//! [`BlockId`]; binding a block into the graph additionally gives it a dense
//! [`BlockIndex`] in binding order.
//!
//! # Lifecycle
//!
//! `unbound -> bound (index, begin, deferred set) -> finalized (end set)`.
//! No transition goes backwards; the range of a finalized block is fixed.

use smallvec::SmallVec;

use crate::arena::{Id, OpIndex, SideTableKey};

// =============================================================================
// Identifiers
// =============================================================================

/// Handle of a block in the graph's block pool.
pub type BlockId = Id<Block>;

/// Position of a bound block in binding order.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockIndex(u32);

impl BlockIndex {
    pub const INVALID: Self = BlockIndex(u32::MAX);

    #[inline]
    pub const fn new(index: u32) -> Self {
        BlockIndex(index)
    }

    #[inline]
    pub const fn id(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }

    #[inline]
    pub const fn is_valid(self) -> bool {
        self.0 != u32::MAX
    }
}

impl Default for BlockIndex {
    fn default() -> Self {
        Self::INVALID
    }
}

impl SideTableKey for BlockIndex {
    #[inline]
    fn key(self) -> usize {
        self.as_usize()
    }
}

impl std::fmt::Debug for BlockIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_valid() {
            write!(f, "B{}", self.0)
        } else {
            write!(f, "B<unbound>")
        }
    }
}

impl std::fmt::Display for BlockIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

// =============================================================================
// Block
// =============================================================================

/// What kind of control-flow join a block is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BlockKind {
    /// Join of any number of forward edges.
    Merge = 0,
    /// Loop entry: one forward edge, plus the back edge added after the body.
    LoopHeader = 1,
    /// Target of a single branch edge.
    BranchTarget = 2,
}

impl BlockKind {
    /// Keyword used by the textual dump.
    pub const fn name(self) -> &'static str {
        match self {
            BlockKind::Merge => "MERGE",
            BlockKind::LoopHeader => "LOOP",
            BlockKind::BranchTarget => "BLOCK",
        }
    }
}

/// Inline capacity of a predecessor list. Most blocks have one or two.
const INLINE_PREDECESSORS: usize = 2;

/// A basic block.
#[derive(Debug, Clone)]
pub struct Block {
    kind: BlockKind,
    deferred: bool,
    begin: OpIndex,
    end: OpIndex,
    index: BlockIndex,
    /// Predecessors in the order they were added.
    predecessors: SmallVec<[BlockId; INLINE_PREDECESSORS]>,
}

impl Block {
    /// Create an unbound block.
    pub fn new(kind: BlockKind) -> Self {
        Block {
            kind,
            deferred: false,
            begin: OpIndex::INVALID,
            end: OpIndex::INVALID,
            index: BlockIndex::INVALID,
            predecessors: SmallVec::new(),
        }
    }

    /// Return a pooled block to the unbound state, keeping any spilled
    /// predecessor storage for reuse.
    pub(crate) fn reinit(&mut self, kind: BlockKind) {
        self.kind = kind;
        self.deferred = false;
        self.begin = OpIndex::INVALID;
        self.end = OpIndex::INVALID;
        self.index = BlockIndex::INVALID;
        self.predecessors.clear();
    }

    // =========================================================================
    // Kind
    // =========================================================================

    #[inline]
    pub fn kind(&self) -> BlockKind {
        self.kind
    }

    #[inline]
    pub fn is_loop(&self) -> bool {
        self.kind == BlockKind::LoopHeader
    }

    #[inline]
    pub fn is_merge(&self) -> bool {
        self.kind == BlockKind::Merge
    }

    #[inline]
    pub fn is_loop_or_merge(&self) -> bool {
        self.is_loop() || self.is_merge()
    }

    // =========================================================================
    // Binding State
    // =========================================================================

    /// Binding index. Invalid until the block is bound.
    #[inline]
    pub fn index(&self) -> BlockIndex {
        self.index
    }

    #[inline]
    pub fn is_bound(&self) -> bool {
        self.index.is_valid()
    }

    #[inline]
    pub fn is_finalized(&self) -> bool {
        self.end.is_valid()
    }

    /// Whether the block lies on a statically cold path.
    #[inline]
    pub fn is_deferred(&self) -> bool {
        self.deferred
    }

    /// Mark the block cold (or hot). Blocks bound afterwards whose
    /// predecessors are all deferred inherit the flag.
    #[inline]
    pub fn set_deferred(&mut self, deferred: bool) {
        self.deferred = deferred;
    }

    /// First operation of the block.
    #[inline]
    pub fn begin(&self) -> OpIndex {
        debug_assert!(self.begin.is_valid(), "begin of an unbound block");
        self.begin
    }

    /// One past the last operation of the block.
    #[inline]
    pub fn end(&self) -> OpIndex {
        debug_assert!(self.end.is_valid(), "end of an unfinalized block");
        self.end
    }

    /// Whether `op` was emitted into this block.
    #[inline]
    pub fn contains(&self, op: OpIndex) -> bool {
        self.begin <= op && op < self.end
    }

    pub(crate) fn bind(&mut self, index: BlockIndex, begin: OpIndex, deferred: bool) {
        debug_assert!(!self.is_bound(), "block bound twice");
        debug_assert!(!self.begin.is_valid(), "block begin set twice");
        self.index = index;
        self.begin = begin;
        self.deferred = deferred;
    }

    pub(crate) fn finalize(&mut self, end: OpIndex) {
        debug_assert!(self.is_bound(), "finalizing an unbound block");
        debug_assert!(!self.end.is_valid(), "block finalized twice");
        self.end = end;
    }

    // =========================================================================
    // Predecessors
    // =========================================================================

    /// Add an incoming edge from `predecessor`.
    ///
    /// Once bound, only a loop header may gain one more predecessor: its
    /// back edge.
    pub fn add_predecessor(&mut self, predecessor: BlockId) {
        debug_assert!(
            !self.is_bound() || (self.is_loop() && self.predecessors.len() == 1),
            "{:?} gained a predecessor after binding",
            self.index
        );
        self.predecessors.push(predecessor);
    }

    /// Predecessors, oldest edge first.
    #[inline]
    pub fn predecessors(&self) -> &[BlockId] {
        &self.predecessors
    }

    #[inline]
    pub fn predecessor_count(&self) -> usize {
        self.predecessors.len()
    }

    #[inline]
    pub fn has_predecessors(&self) -> bool {
        !self.predecessors.is_empty()
    }

    /// The first predecessor added.
    #[inline]
    pub fn first_predecessor(&self) -> BlockId {
        debug_assert!(self.has_predecessors(), "block has no predecessors");
        self.predecessors.first().copied().unwrap_or(BlockId::INVALID)
    }
}

// =============================================================================
// Tests
// =============================================================================
