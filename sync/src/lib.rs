//! # RedLilium Sync
//!
//! Submission synchronization policies for RedLilium's GPU backends.
//!
//! ## Overview
//!
//! Every GPU operation is recorded into a command buffer, submitted to a
//! queue, and then has to be synchronized with whatever runs after it. This
//! crate lets the caller of an operation decide how, with a [`SyncPolicy`]:
//!
//! - [`SyncPolicy::not_required`] - no synchronization is needed
//! - [`SyncPolicy::wait_idle`] - block the CPU until the queue is idle
//! - [`SyncPolicy::with_semaphores`] - signal a new semaphore, optionally
//!   waiting on earlier ones
//! - [`SyncPolicy::with_barriers`] - record global memory barriers around the
//!   operation
//! - [`SyncPolicy::auxiliary`] - hand the command buffer to a master policy
//!
//! The operation itself drives the policy through [`SyncedOperation`], or
//! directly through [`SyncPolicy::submit_and_sync`].
//!
//! ## Example
//!
//! ```ignore
//! use redlilium_sync::{SyncPolicy, SyncedOperation, PipelineStage};
//!
//! let backend = DummyBackend::new();
//! SyncedOperation::new("upload", PipelineStage::TRANSFER).execute(
//!     &backend,
//!     SyncPolicy::with_barriers_on_current_frame(None),
//!     |cmd| cmd.record_command("copy_buffer"),
//! )?;
//! ```

pub mod backend;
pub mod barrier;
pub mod error;
pub mod frame;
pub mod operation;
pub mod policy;
pub mod semaphore;
pub mod types;

// Re-export main types for convenience
pub use backend::dummy::DummyBackend;
pub use backend::{CommandBuffer, Submission, SyncBackend};
pub use barrier::{
    BarrierHook, default_after, default_before, default_handler_after_operation,
    default_handler_before_operation, is_after_handler_stolen, is_before_handler_stolen,
};
pub use error::{SyncError, SyncResult};
pub use frame::{FrameLifetime, FrameRetirement, MAX_FRAMES_IN_FLIGHT};
pub use operation::SyncedOperation;
pub use policy::{QueueBinding, SubordinateRegistry, SyncPolicy};
pub use semaphore::{DropCallback, Semaphore};
pub use types::{GlobalBarrier, MemoryAccess, PipelineStage, QueueId, SyncType};

#[cfg(feature = "vulkan-backend")]
pub use backend::vulkan::VulkanSyncBackend;

/// Sync library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the sync subsystem.
pub fn init() {
    log::info!("RedLilium Sync v{} initialized", VERSION);
}
