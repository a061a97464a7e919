//! Dummy GPU backend for testing and development.
//!
//! This backend doesn't perform actual GPU operations. It records every call
//! the sync policies make as a [`DummyEvent`], so tests can check exactly
//! which barriers, semaphores, submissions and idle waits happened, and in
//! which order. Command buffers and semaphores count their own destruction.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::error::{SyncError, SyncResult};
use crate::frame::{FrameLifetime, FrameRetirement};
use crate::types::{GlobalBarrier, PipelineStage, QueueId};

use super::{CommandBuffer, Submission, SyncBackend};

/// A call recorded by the [`DummyBackend`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DummyEvent {
    /// A command buffer was allocated.
    CommandBufferAllocated {
        /// Command buffer id.
        id: u64,
        /// Queue it was allocated for.
        queue: QueueId,
    },
    /// A semaphore was created.
    SemaphoreCreated {
        /// Semaphore id.
        id: u64,
    },
    /// A command buffer was submitted.
    Submitted {
        /// Target queue.
        queue: QueueId,
        /// Submitted command buffer id.
        command_buffer: u64,
        /// Barriers recorded in the command buffer.
        barriers: Vec<GlobalBarrier>,
        /// Waited semaphore ids with their wait stages.
        wait: Vec<(u64, PipelineStage)>,
        /// Signaled semaphore id.
        signal: Option<u64>,
    },
    /// The CPU blocked until a queue was idle.
    WaitIdle {
        /// The queue waited on.
        queue: QueueId,
    },
}

/// Destruction counters shared between the backend and its objects.
#[derive(Debug, Default)]
struct ReleaseCounters {
    command_buffers: AtomicUsize,
    semaphores: AtomicUsize,
}

/// Command buffer of the dummy backend.
///
/// Records barriers and named commands instead of GPU instructions.
#[derive(Debug)]
pub struct DummyCommandBuffer {
    id: u64,
    queue: QueueId,
    barriers: Vec<GlobalBarrier>,
    commands: Vec<String>,
    finished: bool,
    released: Arc<ReleaseCounters>,
}

impl DummyCommandBuffer {
    /// Get the command buffer's unique ID.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Queue the buffer was allocated for.
    pub fn queue(&self) -> QueueId {
        self.queue
    }

    /// Barriers recorded so far, in recording order.
    pub fn barriers(&self) -> &[GlobalBarrier] {
        &self.barriers
    }

    /// Record a named command.
    pub fn record_command(&mut self, name: impl Into<String>) {
        let name = name.into();
        log::trace!("DummyCommandBuffer {}: recording '{}'", self.id, name);
        self.commands.push(name);
    }

    /// Commands recorded so far.
    pub fn commands(&self) -> &[String] {
        &self.commands
    }

    /// Whether recording has finished.
    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

impl CommandBuffer for DummyCommandBuffer {
    fn establish_global_memory_barrier(&mut self, barrier: &GlobalBarrier) {
        if self.finished {
            log::error!(
                "DummyCommandBuffer {}: barrier {:?} ignored, command buffer already finished",
                self.id,
                barrier
            );
            return;
        }
        log::trace!("DummyCommandBuffer {}: barrier {:?}", self.id, barrier);
        self.barriers.push(*barrier);
    }

    fn finish(&mut self) -> SyncResult<()> {
        if self.finished {
            return Err(SyncError::InvalidCommandBufferState(format!(
                "command buffer {} already finished",
                self.id
            )));
        }
        self.finished = true;
        Ok(())
    }
}

impl Drop for DummyCommandBuffer {
    fn drop(&mut self) {
        self.released.command_buffers.fetch_add(1, Ordering::Relaxed);
    }
}

/// Semaphore of the dummy backend.
#[derive(Debug)]
pub struct DummySemaphore {
    id: u64,
    released: Arc<ReleaseCounters>,
}

impl DummySemaphore {
    /// Get the semaphore's unique ID.
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for DummySemaphore {
    fn drop(&mut self) {
        self.released.semaphores.fetch_add(1, Ordering::Relaxed);
    }
}

/// Dummy GPU backend.
pub struct DummyBackend {
    queue_count: u32,
    next_id: AtomicU64,
    events: Mutex<Vec<DummyEvent>>,
    released: Arc<ReleaseCounters>,
    frames: FrameRetirement<DummyBackend>,
}

impl std::fmt::Debug for DummyBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DummyBackend")
            .field("queue_count", &self.queue_count)
            .field("events", &self.events.lock().len())
            .field("frames", &self.frames)
            .finish_non_exhaustive()
    }
}

impl DummyBackend {
    /// Create a new dummy backend with a single queue.
    pub fn new() -> Self {
        Self::with_queue_count(1)
    }

    /// Create a dummy backend with `queue_count` queues in its registry.
    pub fn with_queue_count(queue_count: u32) -> Self {
        Self {
            queue_count,
            next_id: AtomicU64::new(1),
            events: Mutex::new(Vec::new()),
            released: Arc::new(ReleaseCounters::default()),
            frames: FrameRetirement::new(),
        }
    }

    /// Number of queues in the registry.
    pub fn queue_count(&self) -> u32 {
        self.queue_count
    }

    /// All recorded events, oldest first.
    pub fn events(&self) -> Vec<DummyEvent> {
        self.events.lock().clone()
    }

    /// Forget all recorded events.
    pub fn clear_events(&self) {
        self.events.lock().clear();
    }

    /// Number of submissions so far.
    pub fn submission_count(&self) -> usize {
        self.count_events(|e| matches!(e, DummyEvent::Submitted { .. }))
    }

    /// Number of idle waits so far.
    pub fn wait_idle_count(&self) -> usize {
        self.count_events(|e| matches!(e, DummyEvent::WaitIdle { .. }))
    }

    /// Number of semaphores created so far.
    pub fn semaphore_count(&self) -> usize {
        self.count_events(|e| matches!(e, DummyEvent::SemaphoreCreated { .. }))
    }

    /// Number of command buffers dropped so far.
    pub fn released_command_buffers(&self) -> usize {
        self.released.command_buffers.load(Ordering::Relaxed)
    }

    /// Number of semaphores dropped so far.
    pub fn released_semaphores(&self) -> usize {
        self.released.semaphores.load(Ordering::Relaxed)
    }

    /// The process-wide frame tracker of this backend.
    pub fn frames(&self) -> &FrameRetirement<DummyBackend> {
        &self.frames
    }

    fn count_events(&self, filter: impl Fn(&DummyEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|e| filter(e)).count()
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn check_queue(&self, queue: QueueId) -> SyncResult<()> {
        if queue.index() < self.queue_count as usize {
            Ok(())
        } else {
            Err(SyncError::UnknownQueue(queue))
        }
    }

    fn record(&self, event: DummyEvent) {
        self.events.lock().push(event);
    }
}

impl Default for DummyBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncBackend for DummyBackend {
    type CommandBuffer = DummyCommandBuffer;
    type RawSemaphore = DummySemaphore;

    fn name(&self) -> &'static str {
        "Dummy"
    }

    fn allocate_command_buffer(&self, queue: QueueId) -> SyncResult<DummyCommandBuffer> {
        self.check_queue(queue)?;
        let id = self.next_id();
        log::trace!("DummyBackend: allocating command buffer {} on {:?}", id, queue);
        self.record(DummyEvent::CommandBufferAllocated { id, queue });
        Ok(DummyCommandBuffer {
            id,
            queue,
            barriers: Vec::new(),
            commands: Vec::new(),
            finished: false,
            released: Arc::clone(&self.released),
        })
    }

    fn create_semaphore(&self) -> SyncResult<DummySemaphore> {
        let id = self.next_id();
        log::trace!("DummyBackend: creating semaphore {}", id);
        self.record(DummyEvent::SemaphoreCreated { id });
        Ok(DummySemaphore {
            id,
            released: Arc::clone(&self.released),
        })
    }

    fn submit(&self, queue: QueueId, submission: Submission<'_, Self>) -> SyncResult<()> {
        self.check_queue(queue)?;
        let command_buffer = submission.command_buffer;
        if !command_buffer.is_finished() {
            return Err(SyncError::InvalidCommandBufferState(format!(
                "command buffer {} submitted while still recording",
                command_buffer.id()
            )));
        }

        log::trace!(
            "DummyBackend: submitting command buffer {} to {:?} (waiting for {} semaphores)",
            command_buffer.id(),
            queue,
            submission.wait.len()
        );
        self.record(DummyEvent::Submitted {
            queue,
            command_buffer: command_buffer.id(),
            barriers: command_buffer.barriers().to_vec(),
            wait: submission
                .wait
                .iter()
                .map(|s| (s.raw().id(), s.wait_stage()))
                .collect(),
            signal: submission.signal.map(DummySemaphore::id),
        });
        Ok(())
    }

    fn wait_idle(&self, queue: QueueId) -> SyncResult<()> {
        self.check_queue(queue)?;
        log::trace!("DummyBackend: waiting for {:?} to become idle", queue);
        self.record(DummyEvent::WaitIdle { queue });
        Ok(())
    }

    fn frame_lifetime(&self) -> &dyn FrameLifetime<Self> {
        &self.frames
    }
}
