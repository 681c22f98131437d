//! Error types for the IR graph.
//!
//! Hot paths (append, lookup, stepping) never return these: contract
//! violations there are assertions. The enums below cover the fallible
//! surfaces that run off the hot path.

use thiserror::Error;

use crate::arena::OpIndex;
use crate::block::BlockIndex;

/// Errors raised while decoding stored records.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IrError {
    /// A record header carries an opcode tag outside the known range.
    #[error("invalid opcode tag {0}")]
    InvalidOpcode(u16),
}

/// Errors raised by [`GraphConfig::validate`](crate::config::GraphConfig::validate).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("initial capacity {requested} exceeds the maximum of {max} slots")]
    CapacityTooLarge { requested: usize, max: usize },

    #[error("block batch size must be at least 1")]
    EmptyBlockBatch,

    #[error("invalid value {value:?} for {var}")]
    InvalidEnv { var: &'static str, value: String },
}

/// Inconsistencies found by [`Graph::verify`](crate::graph::Graph::verify).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifyError {
    #[error("{op} has invalid opcode tag {raw}")]
    InvalidOpcode { op: OpIndex, raw: u16 },

    #[error("{op} uses {input}, which is not a live operation")]
    InputOutOfRange { op: OpIndex, input: OpIndex },

    #[error("{op} uses {input} before it is defined")]
    InputNotDefinedBeforeUse { op: OpIndex, input: OpIndex },

    #[error("block {0} was bound but never finalized")]
    BlockNotFinalized(BlockIndex),

    #[error("block {0} ends before it begins")]
    BlockRangeInverted(BlockIndex),

    #[error("block {later} begins inside block {earlier}")]
    BlockRangesOverlap {
        earlier: BlockIndex,
        later: BlockIndex,
    },

    #[error("block {0} has no predecessors")]
    UnreachableBlock(BlockIndex),

    #[error("block {0} has a predecessor that was never bound")]
    UnboundPredecessor(BlockIndex),
}

/// Result type for graph verification.
pub type VerifyResult<T> = Result<T, VerifyError>;
