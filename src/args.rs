//! Runtime block arguments
//!
//! Arguments are written one at a time and read back. Anything the block
//! did not take is dropped from the caller's list; everything it did take
//! stays applied.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::hardware::BlockControl;

/// One `{id, value}` block argument
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArgEntry {
    pub id: String,
    pub value: String,
}

impl ArgEntry {
    pub fn new(id: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            value: value.into(),
        }
    }
}

/// Applies argument sets to the bound block
#[derive(Default)]
pub struct ArgumentValidator {
    block: Option<Arc<dyn BlockControl>>,
}

impl ArgumentValidator {
    pub fn new(block: Option<Arc<dyn BlockControl>>) -> Self {
        Self { block }
    }

    pub fn is_bound(&self) -> bool {
        self.block.is_some()
    }

    /// Detach from the block; later `apply` calls fail fast
    pub fn unbind(&mut self) -> Option<Arc<dyn BlockControl>> {
        self.block.take()
    }

    /// Apply `args` to the block, removing rejected entries.
    ///
    /// Returns `false` only when no block is bound, in which case nothing is
    /// written and `args` is left untouched. Rejections are reported by
    /// shrinking `args`, not through the return value.
    pub fn apply(&self, args: &mut Vec<ArgEntry>) -> bool {
        let Some(block) = self.block.as_ref() else {
            tracing::error!("Unable to set new arguments, block is not set");
            return false;
        };

        let mut invalid = Vec::new();

        for (index, arg) in args.iter().enumerate() {
            tracing::debug!("{}: {}: {}", block.block_id(), arg.id, arg.value);

            if let Err(e) = block.set_arg(&arg.id, &arg.value) {
                tracing::warn!("{}: {}", block.block_id(), e);
                invalid.push(index);
                continue;
            }

            if block.get_arg(&arg.id).as_deref() != Some(arg.value.as_str()) {
                tracing::warn!("{}: Failed to set {} to {}", block.block_id(), arg.id, arg.value);
                invalid.push(index);
            }
        }

        // Back to front so earlier indices stay valid
        for index in invalid.into_iter().rev() {
            args.remove(index);
        }

        true
    }
}
