//! Barrier hooks and the default barrier policy.
//!
//! A barrier-based sync policy establishes one barrier before and one after
//! the operation it synchronizes. Each side is configured by a
//! [`BarrierHook`]:
//!
//! | Hook | Effect |
//! |------|--------|
//! | [`BarrierHook::Default`] | The conservative [`default_before`] / [`default_after`] barrier |
//! | [`BarrierHook::Delegated`] | Nothing, a master policy already covers this operation |
//! | [`BarrierHook::Custom`] | The caller's handler, with the operation's stage and access |

use crate::backend::CommandBuffer;
use crate::types::{GlobalBarrier, MemoryAccess, PipelineStage};

/// Signature of a custom barrier handler.
///
/// Arguments are the command buffer being recorded, the operation's pipeline
/// stage and its optional memory access.
pub type BarrierHandler<C> = dyn Fn(&mut C, PipelineStage, Option<MemoryAccess>);

/// How one side of an operation is protected by a barrier.
pub enum BarrierHook<C> {
    /// Use the default barrier policy.
    Default,
    /// A master policy establishes the barrier; do nothing here.
    Delegated,
    /// Run a caller-supplied handler.
    Custom(Box<BarrierHandler<C>>),
}

impl<C> BarrierHook<C> {
    /// Wrap a closure as a custom hook.
    pub fn custom(handler: impl Fn(&mut C, PipelineStage, Option<MemoryAccess>) + 'static) -> Self {
        Self::Custom(Box::new(handler))
    }

    /// Hook marking the "before" barrier as taken over by a master policy.
    pub fn steal_before() -> Self {
        Self::Delegated
    }

    /// Hook marking the "after" barrier as taken over by a master policy.
    pub fn steal_after() -> Self {
        Self::Delegated
    }

    /// Whether this hook falls back to the default barrier policy.
    pub fn is_default(&self) -> bool {
        matches!(self, Self::Default)
    }

    /// Whether this hook was delegated to a master policy.
    pub fn is_delegated(&self) -> bool {
        matches!(self, Self::Delegated)
    }
}

impl<C: CommandBuffer> BarrierHook<C> {
    /// Establish the barrier in front of an operation reading at `stage`.
    pub(crate) fn run_before(
        &self,
        command_buffer: &mut C,
        stage: PipelineStage,
        access: Option<MemoryAccess>,
    ) {
        match self {
            Self::Default => default_handler_before_operation(command_buffer, stage, access),
            Self::Delegated => {}
            Self::Custom(handler) => handler(command_buffer, stage, access),
        }
    }

    /// Establish the barrier behind an operation writing at `stage`.
    pub(crate) fn run_after(
        &self,
        command_buffer: &mut C,
        stage: PipelineStage,
        access: Option<MemoryAccess>,
    ) {
        match self {
            Self::Default => default_handler_after_operation(command_buffer, stage, access),
            Self::Delegated => {}
            Self::Custom(handler) => handler(command_buffer, stage, access),
        }
    }
}

impl<C> Default for BarrierHook<C> {
    fn default() -> Self {
        Self::Default
    }
}

impl<C> std::fmt::Debug for BarrierHook<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Default => write!(f, "BarrierHook::Default"),
            Self::Delegated => write!(f, "BarrierHook::Delegated"),
            Self::Custom(_) => write!(f, "BarrierHook::Custom(..)"),
        }
    }
}

/// Check whether a "before" hook was stolen by a master policy.
pub fn is_before_handler_stolen<C>(hook: &BarrierHook<C>) -> bool {
    hook.is_delegated()
}

/// Check whether an "after" hook was stolen by a master policy.
pub fn is_after_handler_stolen<C>(hook: &BarrierHook<C>) -> bool {
    hook.is_delegated()
}

/// The barrier established in front of an operation when nothing is known
/// about the work that came before it.
///
/// Waits for all previous commands and makes any write available before the
/// operation's `dst_access` becomes visible at `dst_stage`.
pub fn default_before(dst_stage: PipelineStage, dst_access: Option<MemoryAccess>) -> GlobalBarrier {
    GlobalBarrier::new(
        PipelineStage::ALL_COMMANDS,
        dst_stage,
        Some(MemoryAccess::ANY_WRITE),
        dst_access,
    )
}

/// The barrier established behind an operation when nothing is known about
/// the work that comes after it.
///
/// All subsequent commands wait for `src_stage`, and the operation's
/// `src_access` writes become visible to any read.
pub fn default_after(src_stage: PipelineStage, src_access: Option<MemoryAccess>) -> GlobalBarrier {
    GlobalBarrier::new(
        src_stage,
        PipelineStage::ALL_COMMANDS,
        src_access,
        Some(MemoryAccess::ANY_READ),
    )
}

/// Record [`default_before`] into `command_buffer`.
pub fn default_handler_before_operation<C: CommandBuffer>(
    command_buffer: &mut C,
    dst_stage: PipelineStage,
    dst_access: Option<MemoryAccess>,
) {
    command_buffer.establish_global_memory_barrier(&default_before(dst_stage, dst_access));
}

/// Record [`default_after`] into `command_buffer`.
pub fn default_handler_after_operation<C: CommandBuffer>(
    command_buffer: &mut C,
    src_stage: PipelineStage,
    src_access: Option<MemoryAccess>,
) {
    command_buffer.establish_global_memory_barrier(&default_after(src_stage, src_access));
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use rstest::rstest;

    use super::*;
    use crate::backend::SyncBackend;
    use crate::backend::dummy::{DummyBackend, DummyCommandBuffer};
    use crate::types::QueueId;

    #[rstest]
    #[case(PipelineStage::TRANSFER, Some(MemoryAccess::TRANSFER_READ))]
    #[case(PipelineStage::FRAGMENT_SHADER, Some(MemoryAccess::SHADER_READ))]
    #[case(PipelineStage::COMPUTE_SHADER, None)]
    fn test_default_before_is_conservative(
        #[case] stage: PipelineStage,
        #[case] access: Option<MemoryAccess>,
    ) {
        let barrier = default_before(stage, access);
        assert_eq!(barrier.src_stage, PipelineStage::ALL_COMMANDS);
        assert_eq!(barrier.src_access, Some(MemoryAccess::ANY_WRITE));
        assert_eq!(barrier.dst_stage, stage);
        assert_eq!(barrier.dst_access, access);
    }

    #[rstest]
    #[case(PipelineStage::TRANSFER, Some(MemoryAccess::TRANSFER_WRITE))]
    #[case(PipelineStage::COLOR_ATTACHMENT_OUTPUT, Some(MemoryAccess::COLOR_ATTACHMENT_WRITE))]
    #[case(PipelineStage::COMPUTE_SHADER, None)]
    fn test_default_after_is_conservative(
        #[case] stage: PipelineStage,
        #[case] access: Option<MemoryAccess>,
    ) {
        let barrier = default_after(stage, access);
        assert_eq!(barrier.src_stage, stage);
        assert_eq!(barrier.src_access, access);
        assert_eq!(barrier.dst_stage, PipelineStage::ALL_COMMANDS);
        assert_eq!(barrier.dst_access, Some(MemoryAccess::ANY_READ));
    }

    #[test]
    fn test_stolen_detection() {
        let before = BarrierHook::<DummyCommandBuffer>::steal_before();
        let after = BarrierHook::<DummyCommandBuffer>::steal_after();
        assert!(is_before_handler_stolen(&before));
        assert!(is_after_handler_stolen(&after));

        let default = BarrierHook::<DummyCommandBuffer>::default();
        let custom = BarrierHook::<DummyCommandBuffer>::custom(|_, _, _| {});
        assert!(default.is_default());
        assert!(!custom.is_default());
        assert!(!before.is_default());
        assert!(!is_before_handler_stolen(&default));
        assert!(!is_after_handler_stolen(&default));
        assert!(!is_before_handler_stolen(&custom));
        assert!(!is_after_handler_stolen(&custom));
    }

    #[test]
    fn test_delegated_hook_records_nothing() {
        let backend = DummyBackend::new();
        let mut cmd = backend.allocate_command_buffer(QueueId::new(0)).unwrap();
        let hook = BarrierHook::steal_before();

        hook.run_before(&mut cmd, PipelineStage::TRANSFER, None);
        hook.run_after(&mut cmd, PipelineStage::TRANSFER, None);
        assert!(cmd.barriers().is_empty());
    }

    #[test]
    fn test_custom_hook_receives_arguments() {
        let backend = DummyBackend::new();
        let mut cmd = backend.allocate_command_buffer(QueueId::new(0)).unwrap();
        let calls = Rc::new(RefCell::new(Vec::new()));
        let hook = {
            let calls = Rc::clone(&calls);
            BarrierHook::custom(move |_: &mut DummyCommandBuffer, stage, access| {
                calls.borrow_mut().push((stage, access));
            })
        };

        hook.run_before(
            &mut cmd,
            PipelineStage::VERTEX_INPUT,
            Some(MemoryAccess::VERTEX_ATTRIBUTE_READ),
        );
        assert_eq!(
            *calls.borrow(),
            vec![(
                PipelineStage::VERTEX_INPUT,
                Some(MemoryAccess::VERTEX_ATTRIBUTE_READ)
            )]
        );
        assert!(cmd.barriers().is_empty());
    }

    #[test]
    fn test_default_hook_records_default_barrier() {
        let backend = DummyBackend::new();
        let mut cmd = backend.allocate_command_buffer(QueueId::new(0)).unwrap();
        let hook = BarrierHook::default();

        hook.run_after(
            &mut cmd,
            PipelineStage::TRANSFER,
            Some(MemoryAccess::TRANSFER_WRITE),
        );
        assert_eq!(
            cmd.barriers(),
            [default_after(
                PipelineStage::TRANSFER,
                Some(MemoryAccess::TRANSFER_WRITE)
            )]
        );
    }
}
