//! NodePool phase
//!
//! Derived once per reconcile from the `Provisioned` condition; the
//! reconciler dispatches on it and never inspects the condition directly.

use crds::{ConditionStatus, NodePool, ProvisionReason};

/// Where a live NodePool stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodePoolState {
    /// Never admitted, or failed admission and the spec changed since
    Uninitialized,
    /// Admitted; nodes are being allocated
    InProgress,
    /// Completed or failed; nothing left to do
    Terminal,
}

impl NodePoolState {
    /// Determines the phase of `pool` from its status
    pub fn determine(pool: &NodePool) -> Self {
        let Some(condition) = pool.provisioned_condition() else {
            return Self::Uninitialized;
        };

        if condition.status == ConditionStatus::True {
            return Self::Terminal;
        }

        if condition.has_reason(ProvisionReason::Failed) {
            let spec_changed = matches!(
                (pool.metadata.generation, condition.observed_generation),
                (Some(generation), Some(observed)) if generation > observed
            );
            return if spec_changed {
                Self::Uninitialized
            } else {
                Self::Terminal
            };
        }

        Self::InProgress
    }
}
