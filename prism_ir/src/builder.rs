//! Structured emission on top of a [`Graph`].
//!
//! The builder tracks the block currently being generated, wires
//! predecessors when a block is closed by a jump, and resolves loop phis with
//! bounded replacement once the back edge is known.
//!
//! While no block is open (after a terminator, or after binding a block that
//! turned out to be unreachable) emission is a no-op: [`GraphBuilder::emit`]
//! returns [`OpIndex::INVALID`] and terminators do nothing. Front ends can
//! therefore lower dead code without checking reachability themselves.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use tracing::trace;

use crate::arena::OpIndex;
use crate::block::{BlockId, BlockKind};
use crate::graph::Graph;
use crate::operations::{Branch, Goto, Operation, PendingLoopPhi, Phi, Return};

/// Builder for emitting operations block by block.
pub struct GraphBuilder<'g, 'zone> {
    /// The graph being built.
    graph: &'g mut Graph<'zone>,

    /// Block receiving operations, if any.
    current: Option<BlockId>,

    /// Unresolved loop phis per loop header.
    pending_phis: FxHashMap<BlockId, SmallVec<[OpIndex; 4]>>,
}

impl<'g, 'zone> GraphBuilder<'g, 'zone> {
    /// Create a builder appending to `graph`.
    pub fn new(graph: &'g mut Graph<'zone>) -> Self {
        GraphBuilder {
            graph,
            current: None,
            pending_phis: FxHashMap::default(),
        }
    }

    /// Get a reference to the graph.
    pub fn graph(&self) -> &Graph<'zone> {
        &*self.graph
    }

    pub fn current_block(&self) -> Option<BlockId> {
        self.current
    }

    /// Whether a block is open for emission.
    pub fn is_generating(&self) -> bool {
        self.current.is_some()
    }

    pub fn new_block(&mut self, kind: BlockKind) -> BlockId {
        self.graph.new_block(kind)
    }

    /// Bind `block` and open it for emission.
    ///
    /// Returns `false` if the block is unreachable; emission stays disabled
    /// until the next successful bind.
    pub fn bind(&mut self, block: BlockId) -> bool {
        debug_assert!(
            self.current.is_none(),
            "binding {block:?} while {:?} is still open",
            self.current
        );
        if self.graph.add_block(block) {
            self.current = Some(block);
            true
        } else {
            false
        }
    }

    /// Append `op` to the current block.
    pub fn emit<Op: Operation>(&mut self, op: Op) -> OpIndex {
        if self.current.is_none() {
            return OpIndex::INVALID;
        }
        self.graph.add(op)
    }

    /// Finalize the current block and return it.
    fn close_block(&mut self) -> Option<BlockId> {
        let block = self.current.take()?;
        self.graph.finalize_block(block);
        Some(block)
    }

    // =========================================================================
    // Terminators
    // =========================================================================

    /// Jump to `destination`.
    pub fn goto(&mut self, destination: BlockId) {
        self.emit(Goto::new(destination));
        if let Some(source) = self.close_block() {
            self.graph.add_predecessor(destination, source);
        }
    }

    /// Jump to `if_true` or `if_false` on `condition`.
    pub fn branch(&mut self, condition: OpIndex, if_true: BlockId, if_false: BlockId) {
        debug_assert_ne!(if_true, if_false, "branch to the same block twice");
        self.emit(Branch::new(condition, if_true, if_false));
        if let Some(source) = self.close_block() {
            self.graph.add_predecessor(if_true, source);
            self.graph.add_predecessor(if_false, source);
        }
    }

    /// Return `value`.
    pub fn ret(&mut self, value: OpIndex) {
        self.emit(Return::new(value));
        self.close_block();
    }

    // =========================================================================
    // Phis
    // =========================================================================

    /// Merge `inputs`, one per predecessor of the current block in
    /// predecessor order.
    pub fn phi(&mut self, inputs: &[OpIndex]) -> OpIndex {
        if let Some(block) = self.current {
            debug_assert_eq!(
                inputs.len(),
                self.graph.block(block).predecessor_count(),
                "phi input count does not match predecessors"
            );
        }
        self.emit(Phi::new(inputs))
    }

    /// Start a loop phi in the current loop header.
    ///
    /// `first` flows in from the loop entry. The back-edge value for
    /// `variable` is supplied to [`GraphBuilder::close_loop`].
    pub fn pending_loop_phi(&mut self, first: OpIndex, variable: u32) -> OpIndex {
        let Some(header) = self.current else {
            return OpIndex::INVALID;
        };
        debug_assert!(
            self.graph.block(header).is_loop(),
            "loop phi outside a loop header"
        );
        let phi = self.graph.add(PendingLoopPhi::new(first, variable));
        self.pending_phis.entry(header).or_default().push(phi);
        phi
    }

    /// Jump back to `header` and turn its pending phis into two-input phis.
    ///
    /// `backedge_values[v]` is the value of loop variable `v` at the end of
    /// the current block.
    pub fn close_loop(&mut self, header: BlockId, backedge_values: &[OpIndex]) {
        debug_assert!(self.graph.block(header).is_loop(), "{header:?} is not a loop");
        // Without an open block there is no back edge; the phis keep only
        // their entry value.
        let has_back_edge = self.is_generating();
        self.goto(header);

        let pending = self.pending_phis.remove(&header).unwrap_or_default();
        for &phi in &pending {
            let Some(placeholder) = self.graph.get_as::<PendingLoopPhi>(phi) else {
                continue;
            };
            let phi_op = if has_back_edge {
                let backedge = backedge_values[placeholder.variable as usize];
                Phi::new(&[placeholder.first(), backedge])
            } else {
                Phi::new(&[placeholder.first()])
            };
            self.graph.replace(phi, phi_op);
        }
        trace!(header = ?header, phis = pending.len(), has_back_edge, "closed loop");
    }

    /// Finish building and hand the graph back.
    pub fn finish(self) -> &'g mut Graph<'zone> {
        debug_assert!(self.current.is_none(), "{:?} was never closed", self.current);
        debug_assert!(
            self.pending_phis.is_empty(),
            "loops left open: {:?}",
            self.pending_phis.keys().collect::<Vec<_>>()
        );
        self.graph
    }
}

// =============================================================================
// Tests
// =============================================================================
