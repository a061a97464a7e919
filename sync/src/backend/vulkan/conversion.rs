//! Type conversions between RedLilium sync types and Vulkan types.

use ash::vk;

use crate::error::SyncError;
use crate::types::{GlobalBarrier, MemoryAccess, PipelineStage};

/// Convert PipelineStage flags to Vulkan pipeline stage flags.
pub fn convert_pipeline_stage(stage: PipelineStage) -> vk::PipelineStageFlags {
    const MAPPING: [(PipelineStage, vk::PipelineStageFlags); 14] = [
        (PipelineStage::TOP_OF_PIPE, vk::PipelineStageFlags::TOP_OF_PIPE),
        (PipelineStage::DRAW_INDIRECT, vk::PipelineStageFlags::DRAW_INDIRECT),
        (PipelineStage::VERTEX_INPUT, vk::PipelineStageFlags::VERTEX_INPUT),
        (PipelineStage::VERTEX_SHADER, vk::PipelineStageFlags::VERTEX_SHADER),
        (PipelineStage::FRAGMENT_SHADER, vk::PipelineStageFlags::FRAGMENT_SHADER),
        (
            PipelineStage::EARLY_FRAGMENT_TESTS,
            vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
        ),
        (
            PipelineStage::LATE_FRAGMENT_TESTS,
            vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
        ),
        (
            PipelineStage::COLOR_ATTACHMENT_OUTPUT,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        ),
        (PipelineStage::COMPUTE_SHADER, vk::PipelineStageFlags::COMPUTE_SHADER),
        (PipelineStage::TRANSFER, vk::PipelineStageFlags::TRANSFER),
        (PipelineStage::BOTTOM_OF_PIPE, vk::PipelineStageFlags::BOTTOM_OF_PIPE),
        (PipelineStage::HOST, vk::PipelineStageFlags::HOST),
        (PipelineStage::ALL_GRAPHICS, vk::PipelineStageFlags::ALL_GRAPHICS),
        (PipelineStage::ALL_COMMANDS, vk::PipelineStageFlags::ALL_COMMANDS),
    ];

    MAPPING
        .iter()
        .filter(|(ours, _)| stage.contains(*ours))
        .fold(vk::PipelineStageFlags::empty(), |acc, (_, vk_stage)| {
            acc | *vk_stage
        })
}

/// Convert MemoryAccess flags to Vulkan access flags.
pub fn convert_memory_access(access: MemoryAccess) -> vk::AccessFlags {
    const MAPPING: [(MemoryAccess, vk::AccessFlags); 16] = [
        (
            MemoryAccess::INDIRECT_COMMAND_READ,
            vk::AccessFlags::INDIRECT_COMMAND_READ,
        ),
        (MemoryAccess::INDEX_READ, vk::AccessFlags::INDEX_READ),
        (
            MemoryAccess::VERTEX_ATTRIBUTE_READ,
            vk::AccessFlags::VERTEX_ATTRIBUTE_READ,
        ),
        (MemoryAccess::UNIFORM_READ, vk::AccessFlags::UNIFORM_READ),
        (MemoryAccess::SHADER_READ, vk::AccessFlags::SHADER_READ),
        (MemoryAccess::SHADER_WRITE, vk::AccessFlags::SHADER_WRITE),
        (
            MemoryAccess::COLOR_ATTACHMENT_READ,
            vk::AccessFlags::COLOR_ATTACHMENT_READ,
        ),
        (
            MemoryAccess::COLOR_ATTACHMENT_WRITE,
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        ),
        (
            MemoryAccess::DEPTH_STENCIL_ATTACHMENT_READ,
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ,
        ),
        (
            MemoryAccess::DEPTH_STENCIL_ATTACHMENT_WRITE,
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        ),
        (MemoryAccess::TRANSFER_READ, vk::AccessFlags::TRANSFER_READ),
        (MemoryAccess::TRANSFER_WRITE, vk::AccessFlags::TRANSFER_WRITE),
        (MemoryAccess::HOST_READ, vk::AccessFlags::HOST_READ),
        (MemoryAccess::HOST_WRITE, vk::AccessFlags::HOST_WRITE),
        (MemoryAccess::MEMORY_READ, vk::AccessFlags::MEMORY_READ),
        (MemoryAccess::MEMORY_WRITE, vk::AccessFlags::MEMORY_WRITE),
    ];

    MAPPING
        .iter()
        .filter(|(ours, _)| access.contains(*ours))
        .fold(vk::AccessFlags::empty(), |acc, (_, vk_access)| acc | *vk_access)
}

/// Convert a global barrier into the arguments of `vkCmdPipelineBarrier`.
///
/// Vulkan rejects empty stage masks, so an empty source becomes
/// `TOP_OF_PIPE` and an empty destination `BOTTOM_OF_PIPE`.
pub fn convert_global_barrier(
    barrier: &GlobalBarrier,
) -> (
    vk::PipelineStageFlags,
    vk::PipelineStageFlags,
    vk::MemoryBarrier<'static>,
) {
    let mut src_stage = convert_pipeline_stage(barrier.src_stage);
    if src_stage.is_empty() {
        src_stage = vk::PipelineStageFlags::TOP_OF_PIPE;
    }
    let mut dst_stage = convert_pipeline_stage(barrier.dst_stage);
    if dst_stage.is_empty() {
        dst_stage = vk::PipelineStageFlags::BOTTOM_OF_PIPE;
    }

    let memory_barrier = vk::MemoryBarrier::default()
        .src_access_mask(
            barrier
                .src_access
                .map_or(vk::AccessFlags::empty(), convert_memory_access),
        )
        .dst_access_mask(
            barrier
                .dst_access
                .map_or(vk::AccessFlags::empty(), convert_memory_access),
        );

    (src_stage, dst_stage, memory_barrier)
}

/// Map a failed Vulkan call to a sync error.
pub fn convert_vk_result(result: vk::Result) -> SyncError {
    match result {
        vk::Result::ERROR_DEVICE_LOST => SyncError::DeviceLost,
        vk::Result::ERROR_OUT_OF_HOST_MEMORY | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => {
            SyncError::OutOfMemory
        }
        other => SyncError::Backend(format!("{other:?}")),
    }
}
