//! Vulkan sync backend implementation.
//!
//! Wraps an existing `ash::Device` and a set of its queues. The device is
//! owned by the caller and must outlive the backend and every command buffer
//! or semaphore created through it.
//!
//! Each registered queue gets its own command pool. Command buffers keep
//! their pool alive, so a pool is destroyed only after its last buffer was
//! freed, even when the buffer outlives the backend inside a semaphore or a
//! frame retirement queue.

pub mod conversion;

use std::sync::Arc;

use ash::vk;
use parking_lot::Mutex;

use crate::backend::{CommandBuffer, Submission, SyncBackend};
use crate::error::{SyncError, SyncResult};
use crate::frame::{FrameLifetime, FrameRetirement};
use crate::types::{GlobalBarrier, PipelineStage, QueueId};

use conversion::{convert_global_barrier, convert_pipeline_stage, convert_vk_result};

/// A command pool shared by all command buffers allocated from it.
struct VulkanCommandPool {
    device: ash::Device,
    raw: vk::CommandPool,
    family_index: u32,
    // Pools are externally synchronized: allocation, recording and freeing.
    lock: Mutex<()>,
}

impl VulkanCommandPool {
    fn new(device: &ash::Device, family_index: u32) -> SyncResult<Self> {
        let pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(family_index)
            .flags(vk::CommandPoolCreateFlags::TRANSIENT);

        let raw = unsafe { device.create_command_pool(&pool_info, None) }.map_err(|e| {
            log::error!("Failed to create command pool for family {family_index}: {e:?}");
            convert_vk_result(e)
        })?;

        Ok(Self {
            device: device.clone(),
            raw,
            family_index,
            lock: Mutex::new(()),
        })
    }
}

impl Drop for VulkanCommandPool {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_command_pool(self.raw, None);
        }
    }
}

struct VulkanQueue {
    raw: vk::Queue,
    pool: Arc<VulkanCommandPool>,
    // vkQueueSubmit requires external synchronization of the queue.
    submit_lock: Mutex<()>,
}

/// A primary command buffer recorded for one-time submission.
pub struct VulkanCommandBuffer {
    pool: Arc<VulkanCommandPool>,
    raw: vk::CommandBuffer,
    queue: QueueId,
    executable: bool,
}

impl VulkanCommandBuffer {
    /// Get the raw Vulkan handle.
    ///
    /// Commands recorded through the handle must not race with allocations
    /// on the same queue.
    pub fn raw(&self) -> vk::CommandBuffer {
        self.raw
    }

    /// Queue the command buffer was allocated for.
    pub fn queue(&self) -> QueueId {
        self.queue
    }

    /// Whether recording has finished.
    pub fn is_executable(&self) -> bool {
        self.executable
    }
}

impl CommandBuffer for VulkanCommandBuffer {
    fn establish_global_memory_barrier(&mut self, barrier: &GlobalBarrier) {
        if self.executable {
            log::error!("Barrier {barrier:?} ignored: command buffer already finished");
            return;
        }

        let (src_stage, dst_stage, memory_barrier) = convert_global_barrier(barrier);
        let _guard = self.pool.lock.lock();
        unsafe {
            self.pool.device.cmd_pipeline_barrier(
                self.raw,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[memory_barrier],
                &[],
                &[],
            );
        }
    }

    fn finish(&mut self) -> SyncResult<()> {
        if self.executable {
            return Err(SyncError::InvalidCommandBufferState(
                "command buffer already finished".to_string(),
            ));
        }
        let _guard = self.pool.lock.lock();
        unsafe { self.pool.device.end_command_buffer(self.raw) }.map_err(convert_vk_result)?;
        self.executable = true;
        Ok(())
    }
}

impl Drop for VulkanCommandBuffer {
    fn drop(&mut self) {
        let _guard = self.pool.lock.lock();
        unsafe {
            self.pool
                .device
                .free_command_buffers(self.pool.raw, &[self.raw]);
        }
    }
}

impl std::fmt::Debug for VulkanCommandBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanCommandBuffer")
            .field("raw", &self.raw)
            .field("queue", &self.queue)
            .field("executable", &self.executable)
            .finish()
    }
}

/// A binary Vulkan semaphore, destroyed when dropped.
pub struct VulkanSemaphore {
    device: ash::Device,
    raw: vk::Semaphore,
}

impl VulkanSemaphore {
    /// Get the raw Vulkan handle.
    pub fn raw(&self) -> vk::Semaphore {
        self.raw
    }
}

impl Drop for VulkanSemaphore {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_semaphore(self.raw, None);
        }
    }
}

impl std::fmt::Debug for VulkanSemaphore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("VulkanSemaphore").field(&self.raw).finish()
    }
}

/// Vulkan implementation of [`SyncBackend`].
pub struct VulkanSyncBackend {
    device: ash::Device,
    queues: Vec<VulkanQueue>,
    retirement: FrameRetirement<VulkanSyncBackend>,
}

impl VulkanSyncBackend {
    /// Create a backend for the given `(queue, family index)` pairs.
    ///
    /// The position of a queue in `queues` becomes its [`QueueId`].
    pub fn new(device: ash::Device, queues: &[(vk::Queue, u32)]) -> SyncResult<Self> {
        let mut registered = Vec::with_capacity(queues.len());
        for &(raw, family_index) in queues {
            // Pools already created are destroyed by their Drop on error.
            let pool = VulkanCommandPool::new(&device, family_index)?;
            registered.push(VulkanQueue {
                raw,
                pool: Arc::new(pool),
                submit_lock: Mutex::new(()),
            });
        }

        log::info!("Vulkan sync backend created with {} queues", registered.len());

        Ok(Self {
            device,
            queues: registered,
            retirement: FrameRetirement::new(),
        })
    }

    /// Get the Vulkan device.
    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    /// Number of registered queues.
    pub fn queue_count(&self) -> usize {
        self.queues.len()
    }

    /// Raw handle of a registered queue.
    pub fn raw_queue(&self, queue: QueueId) -> SyncResult<vk::Queue> {
        Ok(self.queue(queue)?.raw)
    }

    /// The backend's frame retirement queues.
    ///
    /// The owner of the frame loop calls [`FrameRetirement::advance_frame`]
    /// after waiting for the oldest frame in flight.
    pub fn frames(&self) -> &FrameRetirement<VulkanSyncBackend> {
        &self.retirement
    }

    fn queue(&self, queue: QueueId) -> SyncResult<&VulkanQueue> {
        self.queues
            .get(queue.index())
            .ok_or(SyncError::UnknownQueue(queue))
    }
}

impl SyncBackend for VulkanSyncBackend {
    type CommandBuffer = VulkanCommandBuffer;
    type RawSemaphore = VulkanSemaphore;

    fn name(&self) -> &'static str {
        "Vulkan"
    }

    fn allocate_command_buffer(&self, queue: QueueId) -> SyncResult<VulkanCommandBuffer> {
        let pool = Arc::clone(&self.queue(queue)?.pool);

        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool.raw)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

        let raw = {
            let _guard = pool.lock.lock();
            let raw = unsafe { self.device.allocate_command_buffers(&alloc_info) }
                .map_err(convert_vk_result)?
                .into_iter()
                .next()
                .ok_or_else(|| SyncError::Backend("no command buffer allocated".to_string()))?;

            if let Err(e) = unsafe { self.device.begin_command_buffer(raw, &begin_info) } {
                unsafe { self.device.free_command_buffers(pool.raw, &[raw]) };
                return Err(convert_vk_result(e));
            }
            raw
        };

        log::trace!("Vulkan: allocated command buffer {raw:?} on {queue:?}");
        Ok(VulkanCommandBuffer {
            pool,
            raw,
            queue,
            executable: false,
        })
    }

    fn create_semaphore(&self) -> SyncResult<VulkanSemaphore> {
        let semaphore_info = vk::SemaphoreCreateInfo::default();
        let raw = unsafe { self.device.create_semaphore(&semaphore_info, None) }
            .map_err(convert_vk_result)?;

        Ok(VulkanSemaphore {
            device: self.device.clone(),
            raw,
        })
    }

    fn submit(&self, queue: QueueId, submission: Submission<'_, Self>) -> SyncResult<()> {
        let target = self.queue(queue)?;
        let command_buffer = submission.command_buffer;
        if !command_buffer.executable {
            return Err(SyncError::InvalidCommandBufferState(format!(
                "command buffer {:?} submitted while still recording",
                command_buffer.raw
            )));
        }
        if command_buffer.pool.family_index != target.pool.family_index {
            return Err(SyncError::InvalidCommandBufferState(format!(
                "command buffer allocated for {:?} submitted to {:?} of another family",
                command_buffer.queue, queue
            )));
        }

        let command_buffers = [command_buffer.raw];
        let wait_semaphores: Vec<vk::Semaphore> =
            submission.wait.iter().map(|s| s.raw().raw).collect();
        let wait_stage_masks: Vec<vk::PipelineStageFlags> = submission
            .wait
            .iter()
            .map(|s| {
                let stage = convert_pipeline_stage(s.wait_stage());
                if stage.is_empty() {
                    convert_pipeline_stage(PipelineStage::ALL_COMMANDS)
                } else {
                    stage
                }
            })
            .collect();
        let signal_semaphores: Vec<vk::Semaphore> =
            submission.signal.iter().map(|s| s.raw).collect();

        let mut submit_info = vk::SubmitInfo::default().command_buffers(&command_buffers);
        if !wait_semaphores.is_empty() {
            submit_info = submit_info
                .wait_semaphores(&wait_semaphores)
                .wait_dst_stage_mask(&wait_stage_masks);
        }
        if !signal_semaphores.is_empty() {
            submit_info = submit_info.signal_semaphores(&signal_semaphores);
        }

        let _guard = target.submit_lock.lock();
        unsafe {
            self.device
                .queue_submit(target.raw, &[submit_info], vk::Fence::null())
        }
        .map_err(|e| {
            log::error!("Failed to submit command buffer to {queue:?}: {e:?}");
            convert_vk_result(e)
        })
    }

    fn wait_idle(&self, queue: QueueId) -> SyncResult<()> {
        let target = self.queue(queue)?;
        let _guard = target.submit_lock.lock();
        unsafe { self.device.queue_wait_idle(target.raw) }.map_err(convert_vk_result)
    }

    fn frame_lifetime(&self) -> &dyn FrameLifetime<Self> {
        &self.retirement
    }
}

impl Drop for VulkanSyncBackend {
    fn drop(&mut self) {
        unsafe {
            // Wait for device to be idle before cleanup
            let _ = self.device.device_wait_idle();
        }
        // Nothing is in flight anymore, release everything held for frames
        self.retirement.flush_all();
    }
}

impl std::fmt::Debug for VulkanSyncBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanSyncBackend")
            .field("queue_count", &self.queues.len())
            .field("retirement", &self.retirement)
            .finish()
    }
}
