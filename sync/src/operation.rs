//! Recording driver for synchronized GPU operations.
//!
//! [`SyncedOperation`] is the piece of the submission pipeline that drives a
//! [`SyncPolicy`]: it allocates the command buffer on the policy's queue,
//! surrounds the recorded commands with the policy's barriers and hands the
//! finished buffer to [`SyncPolicy::submit_and_sync`].
//!
//! ```ignore
//! SyncedOperation::new("copy_image", PipelineStage::TRANSFER)
//!     .with_read_access(MemoryAccess::TRANSFER_READ)
//!     .with_write_access(MemoryAccess::TRANSFER_WRITE)
//!     .requiring_synchronization()
//!     .execute(&backend, sync, |cmd| cmd.copy_image(src, dst))?;
//! ```

use crate::backend::{CommandBuffer, SyncBackend};
use crate::error::{SyncError, SyncResult};
use crate::policy::SyncPolicy;
use crate::types::{MemoryAccess, PipelineStage};

/// Description of one GPU operation for the purpose of synchronization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncedOperation {
    /// Debug name, also reported in sync contract violations.
    pub name: String,
    /// Pipeline stage the operation executes in.
    pub stage: PipelineStage,
    /// Memory read by the operation, made visible by the "before" barrier.
    pub read_access: Option<MemoryAccess>,
    /// Memory written by the operation, made available by the "after" barrier.
    pub write_access: Option<MemoryAccess>,
    /// Whether the operation can't run without synchronization.
    pub requires_sync: bool,
}

impl SyncedOperation {
    /// Create an operation executing at `stage`.
    pub fn new(name: impl Into<String>, stage: PipelineStage) -> Self {
        Self {
            name: name.into(),
            stage,
            read_access: None,
            write_access: None,
            requires_sync: false,
        }
    }

    /// Set the memory read by the operation.
    pub fn with_read_access(mut self, access: MemoryAccess) -> Self {
        self.read_access = Some(access);
        self
    }

    /// Set the memory written by the operation.
    pub fn with_write_access(mut self, access: MemoryAccess) -> Self {
        self.write_access = Some(access);
        self
    }

    /// Mark the operation as needing synchronization.
    ///
    /// Executing it with a [`SyncPolicy::not_required`] policy then fails.
    pub fn requiring_synchronization(mut self) -> Self {
        self.requires_sync = true;
        self
    }

    /// Record the operation with `record` and submit it under `sync`.
    ///
    /// The backend's default queue is offered as a hint; an explicit binding
    /// on the policy takes precedence. If recording fails the policy is
    /// [abandoned](SyncPolicy::abandon), so subordinate work already submitted
    /// stays alive until the frame retires.
    pub fn execute<B, F>(&self, backend: &B, mut sync: SyncPolicy<B>, record: F) -> SyncResult<()>
    where
        B: SyncBackend,
        F: FnOnce(&mut B::CommandBuffer),
    {
        match self.record_command_buffer(backend, &mut sync, record) {
            Ok(command_buffer) => sync.submit_and_sync(backend, command_buffer),
            Err(e) => {
                log::debug!("Operation '{}' failed before submission: {e}", self.name);
                sync.abandon(backend);
                Err(e)
            }
        }
    }

    fn record_command_buffer<B, F>(
        &self,
        backend: &B,
        sync: &mut SyncPolicy<B>,
        record: F,
    ) -> SyncResult<B::CommandBuffer>
    where
        B: SyncBackend,
        F: FnOnce(&mut B::CommandBuffer),
    {
        if !sync.is_configured() {
            return Err(SyncError::Unconfigured);
        }
        if self.requires_sync {
            sync.require_synchronization(&self.name)?;
        }

        sync.set_queue_hint(backend.default_queue());
        let queue = sync.queue_to_use()?;
        log::debug!(
            "Executing '{}' on {:?} synchronized {}",
            self.name,
            queue,
            sync.get_sync_type()
        );

        let mut command_buffer = backend.allocate_command_buffer(queue)?;
        sync.establish_barrier_before_the_operation(
            &mut command_buffer,
            self.stage,
            self.read_access,
        );
        record(&mut command_buffer);
        sync.establish_barrier_after_the_operation(
            &mut command_buffer,
            self.stage,
            self.write_access,
        );
        command_buffer.finish()?;
        Ok(command_buffer)
    }
}
