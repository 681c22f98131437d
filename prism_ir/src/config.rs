//! Graph configuration parameters.
//!
//! Defaults favour a large up-front arena: graph memory is recycled from one
//! phase to the next, so growth steps are paid once per compilation unit.

use crate::arena::MAX_CAPACITY;
use crate::error::ConfigError;

/// Environment variable overriding [`GraphConfig::initial_capacity`].
pub const ENV_INITIAL_CAPACITY: &str = "PRISM_IR_INITIAL_CAPACITY";

/// Environment variable overriding [`GraphConfig::block_batch`].
pub const ENV_BLOCK_BATCH: &str = "PRISM_IR_BLOCK_BATCH";

/// Configuration for an IR graph.
///
/// # Example
///
/// ```
/// use prism_ir::GraphConfig;
///
/// let config = GraphConfig {
///     initial_capacity: 64 * 1024,
///     ..Default::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphConfig {
    // =========================================================================
    // Operation Storage
    // =========================================================================
    /// Number of slots reserved for operations when the graph is created.
    ///
    /// The arena doubles when this is exhausted; the abandoned storage stays
    /// in the zone until the compilation unit ends.
    ///
    /// Default: 2048
    pub initial_capacity: usize,

    // =========================================================================
    // Block Pool
    // =========================================================================
    /// Number of blocks added to the block pool each time it runs dry.
    ///
    /// Default: 64
    pub block_batch: usize,

    // =========================================================================
    // Checks
    // =========================================================================
    /// Check that every input of a newly added operation is defined before it.
    ///
    /// Default: enabled in debug builds only.
    pub verify_inputs: bool,
}

impl Default for GraphConfig {
    fn default() -> Self {
        GraphConfig {
            initial_capacity: 2048,
            block_batch: 64,
            verify_inputs: cfg!(debug_assertions),
        }
    }
}

impl GraphConfig {
    /// Defaults with overrides from `PRISM_IR_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Defaults with overrides from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(value) = lookup(ENV_INITIAL_CAPACITY) {
            config.initial_capacity = parse_count(ENV_INITIAL_CAPACITY, &value)?;
        }
        if let Some(value) = lookup(ENV_BLOCK_BATCH) {
            config.block_batch = parse_count(ENV_BLOCK_BATCH, &value)?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Set the initial operation capacity in slots.
    pub fn with_initial_capacity(mut self, slots: usize) -> Self {
        self.initial_capacity = slots;
        self
    }

    /// Set the block pool batch size.
    pub fn with_block_batch(mut self, blocks: usize) -> Self {
        self.block_batch = blocks;
        self
    }

    /// Enable or disable def-before-use checks on `add`.
    pub fn with_verify_inputs(mut self, verify: bool) -> Self {
        self.verify_inputs = verify;
        self
    }

    /// Check the configuration for values the graph cannot honour.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.initial_capacity >= MAX_CAPACITY {
            return Err(ConfigError::CapacityTooLarge {
                requested: self.initial_capacity,
                max: MAX_CAPACITY - 1,
            });
        }
        if self.block_batch == 0 {
            return Err(ConfigError::EmptyBlockBatch);
        }
        Ok(())
    }
}

fn parse_count(var: &'static str, value: &str) -> Result<usize, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        var,
        value: value.to_string(),
    })
}
