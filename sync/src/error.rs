//! Sync error types.

use crate::types::QueueId;

/// Result alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur while configuring or executing a sync policy.
///
/// None of these are transient: they report misconfiguration or a failed
/// device and are never retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    /// A queue was required but none was bound to the policy.
    #[error("no queue bound to the sync policy")]
    NoQueueBound,
    /// The queue handle does not exist in the backend's registry.
    #[error("unknown queue {0:?}")]
    UnknownQueue(QueueId),
    /// The policy was default-constructed and never configured by a factory.
    #[error("sync policy was never configured")]
    Unconfigured,
    /// The operation needs synchronization but the policy opted out of it.
    #[error("synchronization required by {operation} but the policy is {configured}")]
    SynchronizationRequired {
        /// Name of the operation which detected the requirement.
        operation: String,
        /// Description of the configured strategy.
        configured: String,
    },
    /// A subordinate policy was submitted after its master.
    #[error("master sync policy was already submitted")]
    MasterAlreadySubmitted,
    /// The command buffer was not in the expected recording state.
    #[error("invalid command buffer state: {0}")]
    InvalidCommandBufferState(String),
    /// Out of host or device memory.
    #[error("out of memory")]
    OutOfMemory,
    /// The device was lost.
    #[error("GPU device lost")]
    DeviceLost,
    /// Any other backend failure.
    #[error("backend error: {0}")]
    Backend(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            SyncError::NoQueueBound.to_string(),
            "no queue bound to the sync policy"
        );

        let err = SyncError::SynchronizationRequired {
            operation: "copy_image".to_string(),
            configured: "not required".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "synchronization required by copy_image but the policy is not required"
        );
    }
}
