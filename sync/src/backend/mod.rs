//! GPU backend abstraction for submission synchronization.
//!
//! The sync policies never talk to a graphics API directly. Everything they
//! need from the GPU side goes through [`SyncBackend`] and [`CommandBuffer`]:
//!
//! - Command buffer allocation and barrier recording
//! - Semaphore creation
//! - Queue submission and idle waits
//! - The process-wide frame lifetime tracker
//!
//! # Available Backends
//!
//! - `dummy` (always built): records every call, used for testing
//! - `vulkan-backend`: native Vulkan backend using ash

#[cfg(feature = "vulkan-backend")]
pub mod vulkan;

pub mod dummy;

use crate::error::SyncResult;
use crate::frame::FrameLifetime;
use crate::semaphore::Semaphore;
use crate::types::{GlobalBarrier, QueueId};

/// A command buffer being recorded by the surrounding submission pipeline.
pub trait CommandBuffer {
    /// Record a global memory barrier into the command buffer.
    fn establish_global_memory_barrier(&mut self, barrier: &GlobalBarrier);

    /// Finish recording. The buffer can be submitted afterwards.
    fn finish(&mut self) -> SyncResult<()>;
}

/// Everything a single queue submission needs.
pub struct Submission<'a, B: SyncBackend> {
    /// The finished command buffer to execute.
    pub command_buffer: &'a B::CommandBuffer,
    /// Semaphores to wait on, each at its own wait stage.
    pub wait: &'a [Semaphore<B>],
    /// Semaphore to signal once the command buffer completed.
    pub signal: Option<&'a B::RawSemaphore>,
}

impl<'a, B: SyncBackend> Submission<'a, B> {
    /// A submission without any wait or signal semaphores.
    pub fn new(command_buffer: &'a B::CommandBuffer) -> Self {
        Self {
            command_buffer,
            wait: &[],
            signal: None,
        }
    }

    /// Wait on the given semaphores before executing.
    pub fn waiting_on(mut self, wait: &'a [Semaphore<B>]) -> Self {
        self.wait = wait;
        self
    }

    /// Signal the given semaphore after executing.
    pub fn signalling(mut self, signal: &'a B::RawSemaphore) -> Self {
        self.signal = Some(signal);
        self
    }
}

/// GPU backend trait used by the sync policies.
pub trait SyncBackend: Sized + 'static {
    /// Backend command buffer type.
    type CommandBuffer: CommandBuffer + 'static;
    /// Backend semaphore handle. Destroyed when dropped.
    type RawSemaphore: std::fmt::Debug + 'static;

    /// Get the backend name.
    fn name(&self) -> &'static str;

    /// Queue suggested to policies which were not bound explicitly.
    fn default_queue(&self) -> QueueId {
        QueueId::new(0)
    }

    /// Allocate a command buffer for `queue`, ready for recording.
    fn allocate_command_buffer(&self, queue: QueueId) -> SyncResult<Self::CommandBuffer>;

    /// Create a new, unsignaled semaphore.
    fn create_semaphore(&self) -> SyncResult<Self::RawSemaphore>;

    /// Submit a finished command buffer to `queue`.
    fn submit(&self, queue: QueueId, submission: Submission<'_, Self>) -> SyncResult<()>;

    /// Block the calling thread until `queue` has no pending work.
    fn wait_idle(&self, queue: QueueId) -> SyncResult<()>;

    /// The process-wide frame lifetime tracker.
    ///
    /// Used by the `*_on_current_frame` policies when no window is given.
    fn frame_lifetime(&self) -> &dyn FrameLifetime<Self>;
}
