//! Prism IR Graph
//!
//! Storage engine for the optimizing tier's intermediate representation:
//! an append-only sequence of variable-sized operation records, organized
//! into a control-flow graph of basic blocks.
//!
//! # Architecture
//!
//! - **Zone**: A bump allocator owned by the compilation unit. All operation
//!   storage comes from it and is released in bulk when it is dropped.
//!
//! - **Slot Arena**: Operations are contiguous runs of 8-byte slots. A
//!   parallel size table stores each run's length at its first and last slot,
//!   giving O(1) stepping in both directions. Identifiers ([`OpIndex`]) are
//!   byte offsets, so they stay valid when the arena grows.
//!
//! - **Blocks**: Each [`Block`] records the `[begin, end)` range of
//!   operations emitted into it plus its predecessors. Blocks come from a
//!   pool that is reused from one phase to the next.
//!
//! - **Companion**: Every graph can lazily create a twin. A phase reads the
//!   current graph, writes the companion, then swaps the two in O(1).
//!
//! # Usage
//!
//! ```
//! use prism_ir::{BlockKind, Constant, Graph, GraphBuilder, Zone};
//!
//! let zone = Zone::new();
//! let mut graph = Graph::new(&zone);
//! let mut builder = GraphBuilder::new(&mut graph);
//!
//! let entry = builder.new_block(BlockKind::Merge);
//! assert!(builder.bind(entry));
//! let value = builder.emit(Constant::word32(42));
//! builder.ret(value);
//! let graph = builder.finish();
//!
//! assert_eq!(graph.block_count(), 1);
//! assert!(graph.verify().is_ok());
//! ```
//!
//! # Checks
//!
//! Contract violations on the hot paths (stale identifiers, reading an unset
//! block range, binding a block twice) are `debug_assert!`s and cost nothing
//! in release builds. Overflowing a bounded replacement is fatal in every
//! build. [`Graph::verify`] performs a full consistency check and reports
//! problems as [`VerifyError`]s.

#![warn(clippy::all)]

pub mod arena;
pub mod block;
pub mod builder;
pub mod config;
pub mod error;
pub mod graph;
pub mod iter;
pub mod operations;
pub mod zone;

// Re-exports for convenient access
pub use arena::{BitSet, Id, OpIndex, SecondaryMap, SideTableKey, Slot, SlotArena};
pub use block::{Block, BlockId, BlockIndex, BlockKind};
pub use builder::GraphBuilder;
pub use config::GraphConfig;
pub use error::{ConfigError, IrError, VerifyError, VerifyResult};
pub use graph::{BlockHeader, Graph};
pub use iter::{BlockIter, OperationIter};
pub use operations::{
    Binop, BinopKind, Branch, Comparison, ComparisonKind, Constant, ConstantKind, Goto, Inputs,
    Opcode, Operation, OperationView, Parameter, PendingLoopPhi, Phi, Return,
};
pub use zone::Zone;
