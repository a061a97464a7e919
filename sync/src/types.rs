//! Flag vocabulary and small value types shared by the sync policies.
//!
//! Pipeline stages and memory accesses are opaque bit sets from the point of
//! view of the policies: they are handed through to the backend unchanged.

use bitflags::bitflags;

bitflags! {
    /// Pipeline stages used to scope barriers and semaphore waits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PipelineStage: u32 {
        /// Start of the pipeline, before any command is processed.
        const TOP_OF_PIPE = 1 << 0;
        /// Indirect draw/dispatch argument consumption.
        const DRAW_INDIRECT = 1 << 1;
        /// Vertex and index buffer consumption.
        const VERTEX_INPUT = 1 << 2;
        /// Vertex shader execution.
        const VERTEX_SHADER = 1 << 3;
        /// Fragment shader execution.
        const FRAGMENT_SHADER = 1 << 4;
        /// Early depth/stencil tests.
        const EARLY_FRAGMENT_TESTS = 1 << 5;
        /// Late depth/stencil tests.
        const LATE_FRAGMENT_TESTS = 1 << 6;
        /// Color attachment writes and blending.
        const COLOR_ATTACHMENT_OUTPUT = 1 << 7;
        /// Compute shader execution.
        const COMPUTE_SHADER = 1 << 8;
        /// Copy, blit, resolve and clear commands.
        const TRANSFER = 1 << 9;
        /// End of the pipeline, after all commands completed.
        const BOTTOM_OF_PIPE = 1 << 10;
        /// Host reads and writes of device memory.
        const HOST = 1 << 11;
        /// All graphics stages.
        const ALL_GRAPHICS = 1 << 12;
        /// Every command on the queue.
        const ALL_COMMANDS = 1 << 13;
    }
}

impl Default for PipelineStage {
    fn default() -> Self {
        Self::empty()
    }
}

bitflags! {
    /// Memory access types made available or visible by a barrier.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MemoryAccess: u32 {
        /// Reading indirect command arguments.
        const INDIRECT_COMMAND_READ = 1 << 0;
        /// Reading index buffers.
        const INDEX_READ = 1 << 1;
        /// Reading vertex attributes.
        const VERTEX_ATTRIBUTE_READ = 1 << 2;
        /// Reading uniform buffers.
        const UNIFORM_READ = 1 << 3;
        /// Reading sampled images and storage resources in shaders.
        const SHADER_READ = 1 << 4;
        /// Writing storage resources in shaders.
        const SHADER_WRITE = 1 << 5;
        /// Reading color attachments (blending, logic ops).
        const COLOR_ATTACHMENT_READ = 1 << 6;
        /// Writing color attachments.
        const COLOR_ATTACHMENT_WRITE = 1 << 7;
        /// Reading depth/stencil attachments.
        const DEPTH_STENCIL_ATTACHMENT_READ = 1 << 8;
        /// Writing depth/stencil attachments.
        const DEPTH_STENCIL_ATTACHMENT_WRITE = 1 << 9;
        /// Source of transfer commands.
        const TRANSFER_READ = 1 << 10;
        /// Destination of transfer commands.
        const TRANSFER_WRITE = 1 << 11;
        /// Host reads.
        const HOST_READ = 1 << 12;
        /// Host writes.
        const HOST_WRITE = 1 << 13;
        /// Any read access.
        const MEMORY_READ = 1 << 14;
        /// Any write access.
        const MEMORY_WRITE = 1 << 15;

        /// Every read access type.
        const ANY_READ = Self::INDIRECT_COMMAND_READ.bits()
            | Self::INDEX_READ.bits()
            | Self::VERTEX_ATTRIBUTE_READ.bits()
            | Self::UNIFORM_READ.bits()
            | Self::SHADER_READ.bits()
            | Self::COLOR_ATTACHMENT_READ.bits()
            | Self::DEPTH_STENCIL_ATTACHMENT_READ.bits()
            | Self::TRANSFER_READ.bits()
            | Self::HOST_READ.bits()
            | Self::MEMORY_READ.bits();
        /// Every write access type.
        const ANY_WRITE = Self::SHADER_WRITE.bits()
            | Self::COLOR_ATTACHMENT_WRITE.bits()
            | Self::DEPTH_STENCIL_ATTACHMENT_WRITE.bits()
            | Self::TRANSFER_WRITE.bits()
            | Self::HOST_WRITE.bits()
            | Self::MEMORY_WRITE.bits();
    }
}

impl Default for MemoryAccess {
    fn default() -> Self {
        Self::empty()
    }
}

/// Handle to a queue in the backend's queue registry.
///
/// The registry is owned by the backend; a policy only stores the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueueId(u32);

impl QueueId {
    /// Create a queue handle from a registry index.
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// Registry index of this queue.
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// A global memory barrier: an execution dependency between two stage sets
/// plus the accesses made available and visible across it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GlobalBarrier {
    /// Stages that must complete before the barrier.
    pub src_stage: PipelineStage,
    /// Stages that wait on the barrier.
    pub dst_stage: PipelineStage,
    /// Writes made available. `None` means execution dependency only.
    pub src_access: Option<MemoryAccess>,
    /// Accesses the available writes are made visible to.
    pub dst_access: Option<MemoryAccess>,
}

impl GlobalBarrier {
    /// Create a barrier between two stage sets with the given accesses.
    pub fn new(
        src_stage: PipelineStage,
        dst_stage: PipelineStage,
        src_access: Option<MemoryAccess>,
        dst_access: Option<MemoryAccess>,
    ) -> Self {
        Self {
            src_stage,
            dst_stage,
            src_access,
            dst_access,
        }
    }
}

/// The fundamental synchronization approach configured in a policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncType {
    /// The caller asserts no synchronization is needed.
    NotRequired,
    /// Block the CPU until the queue is idle.
    ViaWaitIdle,
    /// Signal a semaphore after the submission, optionally waiting on others.
    ViaSemaphore,
    /// Barriers inside the command buffer, lifetime handled by a sink.
    ViaBarrier,
}

impl std::fmt::Display for SyncType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotRequired => write!(f, "not required"),
            Self::ViaWaitIdle => write!(f, "via wait idle"),
            Self::ViaSemaphore => write!(f, "via semaphore"),
            Self::ViaBarrier => write!(f, "via barrier"),
        }
    }
}
