//! The operation graph.
//!
//! A [`Graph`] owns one [`SlotArena`] of operation records, the list of
//! blocks bound so far (which defines the [`BlockIndex`] space) and a pool of
//! every [`Block`] handed out by [`Graph::new_block`]. All of it is reused
//! across compiler phases: [`Graph::reset`] rewinds without releasing memory,
//! and [`Graph::swap_with_companion`] hands the output of one phase to the
//! next by exchanging storage with a lazily created twin graph.

use std::fmt;

use tracing::{debug, trace};

use crate::arena::{BitSet, OpIndex, SlotArena};
use crate::block::{Block, BlockId, BlockIndex, BlockKind};
use crate::config::GraphConfig;
use crate::error::{ConfigError, VerifyError, VerifyResult};
use crate::iter::{BlockIter, OperationIter};
use crate::operations::{Operation, OperationView, encode};
use crate::zone::Zone;

/// Operation graph of one compilation unit.
pub struct Graph<'zone> {
    zone: &'zone Zone,
    /// Operation records.
    operations: SlotArena<'zone>,
    /// Bound blocks in binding order; position is the block's index.
    bound_blocks: Vec<BlockId>,
    /// Every block ever handed out, bound or not.
    all_blocks: Vec<Block>,
    /// Next pool entry `new_block` hands out.
    next_block: usize,
    /// Ids of runs rewritten by `replace`; only these may use later inputs.
    replaced: BitSet,
    config: GraphConfig,
    companion: Option<Box<Graph<'zone>>>,
}

impl<'zone> Graph<'zone> {
    /// Create a graph with the default configuration.
    pub fn new(zone: &'zone Zone) -> Self {
        Self::build(zone, GraphConfig::default())
    }

    /// Create a graph with room for `initial_capacity` slots.
    pub fn with_capacity(zone: &'zone Zone, initial_capacity: usize) -> Self {
        Self::build(
            zone,
            GraphConfig::default().with_initial_capacity(initial_capacity),
        )
    }

    /// Create a graph from an explicit configuration.
    pub fn with_config(zone: &'zone Zone, config: GraphConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::build(zone, config))
    }

    fn build(zone: &'zone Zone, config: GraphConfig) -> Self {
        Graph {
            zone,
            operations: SlotArena::new(zone, config.initial_capacity),
            bound_blocks: Vec::new(),
            all_blocks: Vec::new(),
            next_block: 0,
            replaced: BitSet::new(),
            config,
            companion: None,
        }
    }

    #[inline]
    pub fn zone(&self) -> &'zone Zone {
        self.zone
    }

    #[inline]
    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    /// Forget every operation and block. Arena capacity and the block pool
    /// are kept for the next phase.
    pub fn reset(&mut self) {
        debug!(
            slots = self.operations.len(),
            blocks = self.bound_blocks.len(),
            "reset graph"
        );
        self.operations.reset();
        self.bound_blocks.clear();
        self.next_block = 0;
        self.replaced.clear();
    }

    // =========================================================================
    // Operations
    // =========================================================================

    /// Look up an operation.
    #[inline]
    pub fn get(&self, op: OpIndex) -> OperationView<'_> {
        let view = OperationView::new(op, self.operations.get(op));
        debug_assert!(
            view.has_valid_opcode(),
            "{op} has invalid opcode tag {}",
            view.raw_opcode()
        );
        view
    }

    /// Look up an operation and decode it as `Op`, if it is one.
    #[inline]
    pub fn get_as<Op: Operation>(&self, op: OpIndex) -> Option<Op> {
        self.get(op).cast()
    }

    /// Append an operation and return its index.
    ///
    /// # Panics
    ///
    /// With `verify_inputs` enabled, if an input is not defined before the
    /// new operation.
    pub fn add<Op: Operation>(&mut self, op: Op) -> OpIndex {
        let result = self.next_operation_index();
        if self.config.verify_inputs {
            for &input in op.inputs() {
                assert!(input < result, "{result} uses {input} before it is defined");
            }
        }
        let allocated = self.operations.allocate(op.slot_count());
        debug_assert_eq!(allocated, result);
        encode(&op, self.operations.get_mut(result));
        result
    }

    /// Overwrite `replaced` with `op` in place.
    ///
    /// This is the one way to give an operation an input that is defined
    /// after it, as a loop phi's back-edge value is. The old record is
    /// dropped without inspection.
    ///
    /// # Panics
    ///
    /// In every build, if `op` needs more slots than the replaced run has.
    pub fn replace<Op: Operation>(&mut self, replaced: OpIndex, op: Op) {
        let slot_count = op.slot_count();
        self.operations.replace(replaced, |arena| {
            let written = arena.allocate(slot_count);
            encode(&op, arena.get_mut(written));
        });
        self.replaced.insert(replaced.id() as usize);
    }

    /// Whether `op` was rewritten by [`Graph::replace`].
    #[inline]
    pub fn is_replaced(&self, op: OpIndex) -> bool {
        self.replaced.contains(op.id() as usize)
    }

    /// Reserve a raw run of `slot_count` slots.
    ///
    /// The caller must write a valid record into it before anything reads
    /// it back.
    pub fn allocate(&mut self, slot_count: usize) -> OpIndex {
        self.operations.allocate(slot_count)
    }

    /// Drop the most recently added operation.
    pub fn remove_last(&mut self) {
        debug_assert!(
            self.bound_blocks.last().is_none_or(|&id| {
                let block = self.block(id);
                block.is_finalized() || block.begin() < self.next_operation_index()
            }),
            "removing an operation from before the current block"
        );
        let last = self.previous_index(self.next_operation_index());
        self.replaced.remove(last.id() as usize);
        self.operations.remove_last();
    }

    /// Slots occupied by the run at `op`.
    #[inline]
    pub fn slot_count(&self, op: OpIndex) -> usize {
        self.operations.slot_count(op) as usize
    }

    #[inline]
    pub fn next_index(&self, op: OpIndex) -> OpIndex {
        self.operations.next(op)
    }

    #[inline]
    pub fn previous_index(&self, op: OpIndex) -> OpIndex {
        self.operations.previous(op)
    }

    /// Index the next added operation will receive.
    #[inline]
    pub fn next_operation_index(&self) -> OpIndex {
        self.operations.end_index()
    }

    /// Whether `op` names a run of this graph.
    #[inline]
    pub fn is_valid(&self, op: OpIndex) -> bool {
        op.is_valid() && op < self.next_operation_index()
    }

    /// Upper bound on operation ids in use; sizes `OpIndex` side tables.
    #[inline]
    pub fn op_id_count(&self) -> usize {
        self.operations.len()
    }

    /// Operation ids available before the arena grows.
    #[inline]
    pub fn op_id_capacity(&self) -> usize {
        self.operations.capacity()
    }

    /// Iterate over every operation in creation order.
    pub fn all_operations(&self) -> OperationIter<'_, 'zone> {
        OperationIter::new(self, self.operations.begin_index(), self.next_operation_index())
    }

    /// Iterate over the operations of a finalized block.
    pub fn operations(&self, block: BlockId) -> OperationIter<'_, 'zone> {
        let block = self.block(block);
        OperationIter::new(self, block.begin(), block.end())
    }

    /// Iterate over the operations in `[begin, end)`.
    pub fn operations_in(&self, begin: OpIndex, end: OpIndex) -> OperationIter<'_, 'zone> {
        debug_assert!(begin <= end);
        OperationIter::new(self, begin, end)
    }

    // =========================================================================
    // Blocks
    // =========================================================================

    /// Hand out an unbound block of `kind` from the pool.
    pub fn new_block(&mut self, kind: BlockKind) -> BlockId {
        if self.next_block == self.all_blocks.len() {
            let batch = self.config.block_batch;
            self.all_blocks
                .extend(std::iter::repeat_with(|| Block::new(kind)).take(batch));
            debug!(pool_size = self.all_blocks.len(), "grew block pool");
        }
        let id = BlockId::new(self.next_block as u32);
        self.all_blocks[self.next_block].reinit(kind);
        self.next_block += 1;
        id
    }

    #[inline]
    pub fn block(&self, id: BlockId) -> &Block {
        debug_assert!(id.as_usize() < self.next_block, "{id:?} is not a live block");
        &self.all_blocks[id.as_usize()]
    }

    #[inline]
    pub fn block_mut(&mut self, id: BlockId) -> &mut Block {
        debug_assert!(id.as_usize() < self.next_block, "{id:?} is not a live block");
        &mut self.all_blocks[id.as_usize()]
    }

    /// Look up a bound block by its index.
    #[inline]
    pub fn block_at(&self, index: BlockIndex) -> &Block {
        self.block(self.block_id_at(index))
    }

    #[inline]
    pub fn block_id_at(&self, index: BlockIndex) -> BlockId {
        self.bound_blocks[index.as_usize()]
    }

    /// Record an edge `predecessor -> block`.
    pub fn add_predecessor(&mut self, block: BlockId, predecessor: BlockId) {
        self.block_mut(block).add_predecessor(predecessor);
    }

    pub fn set_deferred(&mut self, block: BlockId, deferred: bool) {
        self.block_mut(block).set_deferred(deferred);
    }

    /// Bind `id` as the next block; subsequent operations belong to it.
    ///
    /// Returns `false` and leaves the block unbound if it is not the first
    /// block and has no predecessors yet. Such a block is unreachable and
    /// must not be finalized.
    pub fn add_block(&mut self, id: BlockId) -> bool {
        let block = self.block(id);
        debug_assert!(!block.is_bound(), "{id:?} bound twice");
        if !self.bound_blocks.is_empty() && !block.has_predecessors() {
            trace!(block = ?id, "not binding block without predecessors");
            return false;
        }

        let deferred = block.has_predecessors()
            && block
                .predecessors()
                .iter()
                .all(|&pred| self.block(pred).is_deferred());
        let index = BlockIndex::new(self.bound_blocks.len() as u32);
        let begin = self.next_operation_index();
        self.all_blocks[id.as_usize()].bind(index, begin, deferred);
        self.bound_blocks.push(id);
        true
    }

    /// Close `id`: its range ends at the current write position.
    pub fn finalize_block(&mut self, id: BlockId) {
        let end = self.next_operation_index();
        self.block_mut(id).finalize(end);
    }

    /// Number of bound blocks.
    #[inline]
    pub fn block_count(&self) -> usize {
        self.bound_blocks.len()
    }

    /// The entry block.
    #[inline]
    pub fn start_block(&self) -> &Block {
        self.block_at(BlockIndex::new(0))
    }

    /// Bound blocks in binding order.
    #[inline]
    pub fn bound_block_ids(&self) -> &[BlockId] {
        &self.bound_blocks
    }

    /// Iterate over bound blocks in binding order.
    pub fn blocks(&self) -> BlockIter<'_, 'zone> {
        BlockIter::new(self, &self.bound_blocks)
    }

    // =========================================================================
    // Companion
    // =========================================================================

    fn new_companion(&self) -> Box<Graph<'zone>> {
        let config = self
            .config
            .clone()
            .with_initial_capacity(self.operations.len());
        debug!(capacity = config.initial_capacity, "created companion graph");
        Box::new(Graph::build(self.zone, config))
    }

    /// The companion graph, created on first use with room for this graph's
    /// current contents.
    pub fn get_or_create_companion(&mut self) -> &mut Graph<'zone> {
        let companion = match self.companion.take() {
            Some(companion) => companion,
            None => self.new_companion(),
        };
        self.companion.insert(companion)
    }

    pub fn companion(&self) -> Option<&Graph<'zone>> {
        self.companion.as_deref()
    }

    /// Run a phase that reads this graph and writes the companion.
    ///
    /// The companion is detached for the duration of `phase`, so the phase
    /// sees `self.companion()` as `None`.
    pub fn with_companion<R>(
        &mut self,
        phase: impl FnOnce(&Graph<'zone>, &mut Graph<'zone>) -> R,
    ) -> R {
        let mut companion = match self.companion.take() {
            Some(companion) => companion,
            None => self.new_companion(),
        };
        let result = phase(&*self, &mut *companion);
        self.companion = Some(companion);
        result
    }

    /// Exchange storage with the companion graph.
    ///
    /// A phase reads `self`, writes its output into the companion, and swaps;
    /// the output becomes current and the old storage becomes the companion
    /// for the phase after that.
    pub fn swap_with_companion(&mut self) {
        let mut companion = match self.companion.take() {
            Some(companion) => companion,
            None => self.new_companion(),
        };
        std::mem::swap(&mut self.operations, &mut companion.operations);
        std::mem::swap(&mut self.bound_blocks, &mut companion.bound_blocks);
        std::mem::swap(&mut self.all_blocks, &mut companion.all_blocks);
        std::mem::swap(&mut self.next_block, &mut companion.next_block);
        std::mem::swap(&mut self.replaced, &mut companion.replaced);
        self.companion = Some(companion);
        debug!(
            slots = self.operations.len(),
            blocks = self.bound_blocks.len(),
            "swapped graph with companion"
        );
    }

    // =========================================================================
    // Verification
    // =========================================================================

    /// Check the whole graph for consistency.
    ///
    /// Unlike the per-access assertions this runs in every build and reports
    /// the first problem found instead of panicking.
    pub fn verify(&self) -> VerifyResult<()> {
        let end = self.next_operation_index();
        let mut op = self.operations.begin_index();
        while op < end {
            let view = OperationView::new(op, self.operations.get(op));
            if !view.has_valid_opcode() {
                return Err(VerifyError::InvalidOpcode {
                    op,
                    raw: view.raw_opcode(),
                });
            }
            let allows_back_edges = self.is_replaced(op);
            for input in view.inputs() {
                if !self.is_valid(input) {
                    return Err(VerifyError::InputOutOfRange { op, input });
                }
                if input >= op && !allows_back_edges {
                    return Err(VerifyError::InputNotDefinedBeforeUse { op, input });
                }
            }
            op = self.operations.next(op);
        }

        let mut bound = BitSet::with_capacity(self.all_blocks.len());
        for &id in &self.bound_blocks {
            bound.insert(id.as_usize());
        }
        let mut previous: Option<&Block> = None;
        for (position, block) in self.blocks().enumerate() {
            let index = block.index();
            if !block.is_finalized() {
                return Err(VerifyError::BlockNotFinalized(index));
            }
            if block.end() < block.begin() {
                return Err(VerifyError::BlockRangeInverted(index));
            }
            if let Some(earlier) = previous.filter(|earlier| block.begin() < earlier.end()) {
                return Err(VerifyError::BlockRangesOverlap {
                    earlier: earlier.index(),
                    later: index,
                });
            }
            if position > 0 && !block.has_predecessors() {
                return Err(VerifyError::UnreachableBlock(index));
            }
            if block
                .predecessors()
                .iter()
                .any(|pred| !bound.contains(pred.as_usize()))
            {
                return Err(VerifyError::UnboundPredecessor(index));
            }
            previous = Some(block);
        }
        Ok(())
    }

    // =========================================================================
    // Printing
    // =========================================================================

    /// Printable header line of a bound block.
    pub fn block_header(&self, id: BlockId) -> BlockHeader<'_, 'zone> {
        BlockHeader {
            graph: self,
            block: self.block(id),
        }
    }
}

/// `LOOP B1 (deferred) <- B0, B3`
pub struct BlockHeader<'a, 'zone> {
    graph: &'a Graph<'zone>,
    block: &'a Block,
}

impl fmt::Display for BlockHeader<'_, '_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.block.kind().name(), self.block.index())?;
        if self.block.is_deferred() {
            f.write_str(" (deferred)")?;
        }
        for (i, &pred) in self.block.predecessors().iter().enumerate() {
            f.write_str(if i == 0 { " <- " } else { ", " })?;
            write!(f, "{}", self.graph.block(pred).index())?;
        }
        Ok(())
    }
}

impl fmt::Display for Graph<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &id in &self.bound_blocks {
            writeln!(f, "{}", self.block_header(id))?;
            let block = self.block(id);
            let end = if block.is_finalized() {
                block.end()
            } else {
                self.next_operation_index()
            };
            for op in self.operations_in(block.begin(), end) {
                writeln!(f, "  {}: {}", op.index(), op)?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Graph<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Graph")
            .field("operations", &self.operations)
            .field("blocks", &self.bound_blocks.len())
            .field("pool", &self.all_blocks.len())
            .field("has_companion", &self.companion.is_some())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operations::{
        Binop, BinopKind, Constant, Goto, Parameter, PendingLoopPhi, Phi, Return,
    };

    fn entry(graph: &mut Graph<'_>) -> BlockId {
        let block = graph.new_block(BlockKind::Merge);
        assert!(graph.add_block(block));
        block
    }

    #[test]
    fn test_add_and_step() {
        let zone = Zone::new();
        let mut graph = Graph::new(&zone);
        let a = graph.add(Constant::word32(1));
        let b = graph.add(Parameter::new(0));
        let c = graph.add(Binop::new(BinopKind::Add, a, b));

        assert!(a < b && b < c);
        assert_eq!(graph.next_index(a), b);
        assert_eq!(graph.next_index(b), c);
        assert_eq!(graph.previous_index(c), b);
        assert_eq!(graph.next_index(c), graph.next_operation_index());
        assert_eq!(graph.get_as::<Binop>(c).unwrap().right(), b);
        assert!(graph.get_as::<Constant>(c).is_none());
    }

    #[test]
    #[should_panic(expected = "before it is defined")]
    fn test_add_rejects_forward_input() {
        let zone = Zone::new();
        let config = GraphConfig::default().with_verify_inputs(true);
        let mut graph = Graph::with_config(&zone, config).unwrap();
        let a = graph.add(Parameter::new(0));
        graph.add(Return::new(OpIndex::from_slot(a.slot() + 10)));
    }

    #[test]
    fn test_replace_pending_phi() {
        let zone = Zone::new();
        let mut graph = Graph::new(&zone);
        let init = graph.add(Constant::word64(0));
        let pending = graph.add(PendingLoopPhi::new(init, 0));
        let one = graph.add(Constant::word64(1));
        let next = graph.add(Binop::new(BinopKind::Add, pending, one));
        let after = graph.add(Return::new(next));
        let before: Vec<_> = graph.all_operations().map(|op| op.index()).collect();

        graph.replace(pending, Phi::new(&[init, next]));

        let phi = graph.get_as::<Phi>(pending).unwrap();
        assert_eq!(phi.inputs.as_slice(), &[init, next]);
        assert_eq!(graph.slot_count(pending), 3);
        assert_eq!(graph.previous_index(one), pending);
        assert_eq!(graph.next_index(pending), one);
        let after_replace: Vec<_> = graph.all_operations().map(|op| op.index()).collect();
        assert_eq!(before, after_replace);
        assert_eq!(graph.next_index(after), graph.next_operation_index());
    }

    #[test]
    fn test_remove_last() {
        let zone = Zone::new();
        let mut graph = Graph::new(&zone);
        let a = graph.add(Constant::word32(1));
        graph.add(Constant::word32(2));
        graph.remove_last();
        assert_eq!(graph.next_index(a), graph.next_operation_index());
        assert_eq!(graph.all_operations().count(), 1);
    }

    #[test]
    fn test_add_block_rejects_unreachable() {
        let zone = Zone::new();
        let mut graph = Graph::new(&zone);
        let b0 = entry(&mut graph);
        graph.finalize_block(b0);

        let orphan = graph.new_block(BlockKind::BranchTarget);
        assert!(!graph.add_block(orphan));
        assert!(!graph.block(orphan).is_bound());

        graph.add_predecessor(orphan, b0);
        assert!(graph.add_block(orphan));
        assert_eq!(graph.block(orphan).index(), BlockIndex::new(1));
        assert_eq!(graph.block_count(), 2);
    }

    #[test]
    fn test_deferred_propagates_from_all_predecessors() {
        let zone = Zone::new();
        let mut graph = Graph::new(&zone);
        let b0 = entry(&mut graph);
        graph.finalize_block(b0);
        assert!(!graph.start_block().is_deferred());

        let cold = graph.new_block(BlockKind::BranchTarget);
        let hot = graph.new_block(BlockKind::BranchTarget);
        for block in [cold, hot] {
            graph.add_predecessor(block, b0);
            assert!(graph.add_block(block));
            graph.finalize_block(block);
        }
        graph.set_deferred(cold, true);

        let cold_only = graph.new_block(BlockKind::Merge);
        graph.add_predecessor(cold_only, cold);
        assert!(graph.add_block(cold_only));
        graph.finalize_block(cold_only);
        assert!(graph.block(cold_only).is_deferred());

        let mixed = graph.new_block(BlockKind::Merge);
        graph.add_predecessor(mixed, cold);
        graph.add_predecessor(mixed, hot);
        assert!(graph.add_block(mixed));
        assert!(!graph.block(mixed).is_deferred());
    }

    #[test]
    fn test_block_pool_grows_in_batches_and_is_reused() {
        let zone = Zone::new();
        let config = GraphConfig::default().with_block_batch(2);
        let mut graph = Graph::with_config(&zone, config).unwrap();
        let ids: Vec<_> = (0..5).map(|_| graph.new_block(BlockKind::Merge)).collect();
        assert_eq!(ids[4], BlockId::new(4));
        assert_eq!(graph.all_blocks.len(), 6);

        graph.reset();
        let reused = graph.new_block(BlockKind::LoopHeader);
        assert_eq!(reused, BlockId::new(0));
        assert!(graph.block(reused).is_loop());
        assert_eq!(graph.all_blocks.len(), 6);
        assert_eq!(graph.block_count(), 0);
        assert_eq!(graph.next_operation_index(), OpIndex::from_slot(0));
    }

    #[test]
    fn test_companion_swap_twice_is_identity() {
        let zone = Zone::new();
        let mut graph = Graph::new(&zone);
        let b0 = entry(&mut graph);
        let a = graph.add(Constant::word32(7));
        graph.add(Return::new(a));
        graph.finalize_block(b0);

        let dump = graph.to_string();
        let storage = graph.operations.get(a).as_ptr();
        let capacity = graph.op_id_capacity();

        graph.swap_with_companion();
        assert_eq!(graph.block_count(), 0);
        assert!(graph.all_operations().next().is_none());
        assert_eq!(graph.companion().unwrap().to_string(), dump);

        graph.swap_with_companion();
        assert_eq!(graph.to_string(), dump);
        assert_eq!(graph.operations.get(a).as_ptr(), storage);
        assert_eq!(graph.op_id_capacity(), capacity);
        assert_eq!(graph.bound_block_ids(), &[b0]);
    }

    #[test]
    fn test_companion_is_sized_to_occupancy() {
        let zone = Zone::new();
        let mut graph = Graph::with_capacity(&zone, 16);
        for i in 0..4 {
            graph.add(Parameter::new(i));
        }
        let companion = graph.get_or_create_companion();
        assert_eq!(companion.op_id_capacity(), 8);
        assert_eq!(companion.block_count(), 0);
    }

    #[test]
    fn test_with_companion_reads_current_and_writes_companion() {
        let zone = Zone::new();
        let mut graph = Graph::new(&zone);
        graph.add(Parameter::new(0));
        graph.add(Parameter::new(1));

        let copied = graph.with_companion(|current, next| {
            for op in current.all_operations() {
                let param = op.cast::<Parameter>().unwrap();
                next.add(Parameter::new(param.index + 10));
            }
            next.all_operations().count()
        });
        assert_eq!(copied, 2);

        graph.swap_with_companion();
        let indices: Vec<_> = graph
            .all_operations()
            .map(|op| op.cast::<Parameter>().unwrap().index)
            .collect();
        assert_eq!(indices, vec![10, 11]);
    }

    #[test]
    fn test_verify_accepts_well_formed_graph() {
        let zone = Zone::new();
        let mut graph = Graph::new(&zone);
        let b0 = entry(&mut graph);
        let exit = graph.new_block(BlockKind::BranchTarget);
        graph.add(Goto::new(exit));
        graph.add_predecessor(exit, b0);
        graph.finalize_block(b0);
        assert!(graph.add_block(exit));
        let p = graph.add(Parameter::new(0));
        graph.add(Return::new(p));
        graph.finalize_block(exit);

        assert_eq!(graph.verify(), Ok(()));
    }

    #[test]
    fn test_verify_reports_block_problems() {
        let zone = Zone::new();
        let mut graph = Graph::new(&zone);
        let b0 = entry(&mut graph);
        assert_eq!(
            graph.verify(),
            Err(VerifyError::BlockNotFinalized(BlockIndex::new(0)))
        );
        graph.finalize_block(b0);

        let never_bound = graph.new_block(BlockKind::BranchTarget);
        let merge = graph.new_block(BlockKind::Merge);
        graph.add_predecessor(merge, never_bound);
        assert!(graph.add_block(merge));
        graph.finalize_block(merge);
        assert_eq!(
            graph.verify(),
            Err(VerifyError::UnboundPredecessor(BlockIndex::new(1)))
        );
    }

    #[test]
    fn test_verify_reports_forward_input() {
        let zone = Zone::new();
        let config = GraphConfig::default().with_verify_inputs(false);
        let mut graph = Graph::with_config(&zone, config).unwrap();
        let ret = graph.add(Return::new(OpIndex::from_slot(2)));
        let value = graph.add(Constant::word32(0));
        assert_eq!(
            graph.verify(),
            Err(VerifyError::InputNotDefinedBeforeUse { op: ret, input: value })
        );
    }

    #[test]
    fn test_verify_rejects_appended_phi_with_later_input() {
        let zone = Zone::new();
        let config = GraphConfig::default().with_verify_inputs(false);
        let mut graph = Graph::with_config(&zone, config).unwrap();
        let phi = graph.add(Phi::new(&[OpIndex::from_slot(2)]));
        let value = graph.add(Constant::word32(0));
        assert!(!graph.is_replaced(phi));
        assert_eq!(
            graph.verify(),
            Err(VerifyError::InputNotDefinedBeforeUse { op: phi, input: value })
        );
    }

    #[test]
    fn test_replaced_runs_are_tracked_per_graph() {
        let zone = Zone::new();
        let mut graph = Graph::new(&zone);
        let init = graph.add(Constant::word64(0));
        let pending = graph.add(PendingLoopPhi::new(init, 0));
        let next = graph.add(Binop::new(BinopKind::Add, pending, init));
        graph.replace(pending, Phi::new(&[init, next]));
        assert!(graph.is_replaced(pending));
        assert!(!graph.is_replaced(next));
        assert_eq!(graph.verify(), Ok(()));

        graph.swap_with_companion();
        assert!(!graph.is_replaced(pending));
        assert!(graph.companion().unwrap().is_replaced(pending));

        graph.swap_with_companion();
        assert!(graph.is_replaced(pending));
        graph.reset();
        assert!(!graph.is_replaced(pending));
    }

    #[test]
    fn test_remove_last_forgets_replacement() {
        let zone = Zone::new();
        let config = GraphConfig::default().with_verify_inputs(false);
        let mut graph = Graph::with_config(&zone, config).unwrap();
        let a = graph.add(Constant::word32(1));
        let b = graph.add(Return::new(a));
        graph.replace(b, Return::new(a));
        graph.remove_last();

        let forward = graph.add(Return::new(OpIndex::from_slot(b.slot() + 2)));
        assert_eq!(forward, b);
        let value = graph.add(Constant::word32(2));
        assert_eq!(
            graph.verify(),
            Err(VerifyError::InputNotDefinedBeforeUse { op: b, input: value })
        );
    }

    #[test]
    fn test_wide_phi_round_trips() {
        let zone = Zone::new();
        let mut graph = Graph::new(&zone);
        let p = graph.add(Parameter::new(0));
        let q = graph.add(Parameter::new(1));
        let inputs: Vec<_> = (0..70_000).map(|i| if i % 3 == 0 { q } else { p }).collect();

        let phi = graph.add(Phi::new(&inputs));
        let after = graph.add(Return::new(phi));

        assert_eq!(graph.slot_count(phi), 35_001);
        assert_eq!(graph.next_index(phi), after);
        let view = graph.get(phi);
        assert_eq!(view.input_count(), 70_000);
        assert_eq!(view.input(69_999), q);
        let read = graph.get_as::<Phi>(phi).unwrap();
        assert_eq!(read.inputs.as_slice(), inputs.as_slice());
        assert_eq!(graph.verify(), Ok(()));
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_add_rejects_run_longer_than_size_table_entry() {
        let zone = Zone::new();
        let mut graph = Graph::new(&zone);
        let p = graph.add(Parameter::new(0));
        graph.add(Phi::new(&vec![p; 131_070]));
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "invalid opcode tag")]
    fn test_get_rejects_corrupted_opcode() {
        let zone = Zone::new();
        let mut graph = Graph::new(&zone);
        let op = graph.add(Parameter::new(0));
        graph.operations.get_mut(op)[0] = 0xFFFF;
        graph.get(op);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "past the arena end")]
    fn test_get_rejects_removed_index() {
        let zone = Zone::new();
        let mut graph = Graph::new(&zone);
        graph.add(Parameter::new(0));
        let removed = graph.add(Parameter::new(1));
        graph.remove_last();
        graph.get(removed);
    }

    #[test]
    fn test_dump() {
        let zone = Zone::new();
        let mut graph = Graph::new(&zone);
        let b0 = entry(&mut graph);
        let a = graph.add(Parameter::new(0));
        let header = graph.new_block(BlockKind::LoopHeader);
        graph.add(Goto::new(header));
        graph.add_predecessor(header, b0);
        graph.finalize_block(b0);
        graph.set_deferred(b0, true);
        assert!(graph.add_block(header));
        graph.add(Return::new(a));
        graph.finalize_block(header);

        let expected = "\
MERGE B0 (deferred)
  #0: Parameter()[0]
  #2: Goto()[-> @1]
LOOP B1 (deferred) <- B0
  #4: Return(#0)
";
        assert_eq!(graph.to_string(), expected);
    }
}
