//! Sync policies: how a single GPU submission is ordered against other work.
//!
//! A [`SyncPolicy`] is injected into any operation that submits GPU work. The
//! caller picks the strategy through a factory, the operation drives it:
//!
//! | Factory | Strategy |
//! |---------|----------|
//! | [`SyncPolicy::not_required`] | No synchronization |
//! | [`SyncPolicy::wait_idle`] | Block until the queue is idle |
//! | [`SyncPolicy::with_semaphores`] | Signal a semaphore, handled by a callback |
//! | [`SyncPolicy::with_semaphores_on_current_frame`] | Signal a semaphore, retired with the frame |
//! | [`SyncPolicy::with_barriers`] | Barriers, command buffer handled by a callback |
//! | [`SyncPolicy::with_barriers_on_current_frame`] | Barriers, command buffer retired with the frame |
//! | [`SyncPolicy::auxiliary`] | Barriers, command buffer handed to a master policy |
//!
//! # Example
//!
//! ```ignore
//! let sync = SyncPolicy::with_barriers_on_current_frame(None).on_queue(transfer_queue);
//!
//! SyncedOperation::new("upload", PipelineStage::TRANSFER)
//!     .with_write_access(MemoryAccess::TRANSFER_WRITE)
//!     .execute(&backend, sync, |cmd| record_upload(cmd))?;
//! ```

mod auxiliary;
mod submit;

pub use auxiliary::SubordinateRegistry;

use std::sync::Arc;

use crate::backend::SyncBackend;
use crate::barrier::BarrierHook;
use crate::error::{SyncError, SyncResult};
use crate::frame::FrameLifetime;
use crate::semaphore::Semaphore;
use crate::types::{MemoryAccess, PipelineStage, QueueId, SyncType};

use auxiliary::SubordinateLink;

/// Where a policy's submission goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueueBinding {
    /// Nothing bound yet.
    #[default]
    Unbound,
    /// Suggested by the framework; replaced by an explicit binding.
    Hinted(QueueId),
    /// Chosen by the caller through [`SyncPolicy::on_queue`].
    Explicit(QueueId),
}

impl QueueBinding {
    /// The bound queue, if any.
    pub fn queue(self) -> Option<QueueId> {
        match self {
            Self::Unbound => None,
            Self::Hinted(queue) | Self::Explicit(queue) => Some(queue),
        }
    }
}

/// Receives the semaphore signaled by a semaphore-based submission.
pub(crate) enum SemaphoreSink<B: SyncBackend> {
    Handler(Box<dyn FnOnce(Semaphore<B>)>),
    /// Retire with the window's current frame, or the backend's when `None`.
    CurrentFrame(Option<Arc<dyn FrameLifetime<B>>>),
}

/// Receives command buffers of a barrier-based submission.
pub(crate) enum CommandBufferSink<B: SyncBackend> {
    Handler(Box<dyn FnMut(B::CommandBuffer)>),
    /// Retire with the window's current frame, or the backend's when `None`.
    CurrentFrame(Option<Arc<dyn FrameLifetime<B>>>),
    Master(SubordinateLink<B>),
}

/// The active strategy and the state only that strategy needs.
pub(crate) enum Strategy<B: SyncBackend> {
    /// Default-constructed, no factory called.
    Unconfigured,
    NotRequired,
    WaitIdle,
    Semaphore {
        signal: SemaphoreSink<B>,
        wait_before: Vec<Semaphore<B>>,
    },
    Barrier {
        lifetime: CommandBufferSink<B>,
        before: BarrierHook<B::CommandBuffer>,
        after: BarrierHook<B::CommandBuffer>,
    },
}

/// A synchronization strategy for one GPU submission.
///
/// Policies are built by the factory functions, optionally bound to a queue,
/// handed to the operation that records the GPU work and consumed by
/// [`submit_and_sync`](Self::submit_and_sync). They can't be cloned.
///
/// Any policy can act as a master for [`auxiliary`](Self::auxiliary)
/// subordinates: it then also disposes of their command buffers, the way its
/// own strategy disposes of its own buffer.
pub struct SyncPolicy<B: SyncBackend> {
    strategy: Strategy<B>,
    queue: QueueBinding,
    subordinates: SubordinateRegistry<B>,
}

static_assertions::assert_not_impl_any!(
    SyncPolicy<crate::backend::dummy::DummyBackend>: Clone, Send
);

impl<B: SyncBackend> Default for SyncPolicy<B> {
    /// An unconfigured policy. Submitting it fails with
    /// [`SyncError::Unconfigured`].
    fn default() -> Self {
        Self::from_strategy(Strategy::Unconfigured)
    }
}

impl<B: SyncBackend> SyncPolicy<B> {
    fn from_strategy(strategy: Strategy<B>) -> Self {
        Self {
            strategy,
            queue: QueueBinding::Unbound,
            subordinates: SubordinateRegistry::new(),
        }
    }

    // ------------------------------------------------------------------------
    // Factories
    // ------------------------------------------------------------------------

    /// Indicate that no synchronization is required.
    ///
    /// Operations which find out that they do need synchronization reject this
    /// policy with [`SyncError::SynchronizationRequired`].
    pub fn not_required() -> Self {
        Self::from_strategy(Strategy::NotRequired)
    }

    /// Very coarse (and inefficient) synchronization: block until the queue is
    /// idle after submitting.
    pub fn wait_idle() -> Self {
        Self::from_strategy(Strategy::WaitIdle)
    }

    /// Semaphore-based synchronization with a custom semaphore lifetime
    /// handler.
    ///
    /// `signalled_after_operation` receives the semaphore signaled once the
    /// operation completes and decides when it may be destroyed.
    /// `wait_before_operation` are waited on before the operation executes.
    pub fn with_semaphores(
        signalled_after_operation: impl FnOnce(Semaphore<B>) + 'static,
        wait_before_operation: Vec<Semaphore<B>>,
    ) -> Self {
        Self::from_strategy(Strategy::Semaphore {
            signal: SemaphoreSink::Handler(Box::new(signalled_after_operation)),
            wait_before: wait_before_operation,
        })
    }

    /// Semaphore-based synchronization with the signaled semaphore retired
    /// along with the current frame of `window`.
    ///
    /// Without a window the backend's process-wide frame tracker is used.
    pub fn with_semaphores_on_current_frame(
        wait_before_operation: Vec<Semaphore<B>>,
        window: Option<Arc<dyn FrameLifetime<B>>>,
    ) -> Self {
        Self::from_strategy(Strategy::Semaphore {
            signal: SemaphoreSink::CurrentFrame(window),
            wait_before: wait_before_operation,
        })
    }

    /// Barrier-based synchronization with a custom command buffer lifetime
    /// handler and the default barriers on both sides.
    pub fn with_barriers(command_buffer_lifetime: impl FnMut(B::CommandBuffer) + 'static) -> Self {
        Self::with_custom_barriers(
            command_buffer_lifetime,
            BarrierHook::Default,
            BarrierHook::Default,
        )
    }

    /// Barrier-based synchronization with a custom command buffer lifetime
    /// handler and custom barrier hooks.
    pub fn with_custom_barriers(
        command_buffer_lifetime: impl FnMut(B::CommandBuffer) + 'static,
        before: BarrierHook<B::CommandBuffer>,
        after: BarrierHook<B::CommandBuffer>,
    ) -> Self {
        Self::from_strategy(Strategy::Barrier {
            lifetime: CommandBufferSink::Handler(Box::new(command_buffer_lifetime)),
            before,
            after,
        })
    }

    /// Barrier-based synchronization with the command buffer retired along
    /// with the current frame of `window` (or the backend's frame tracker).
    pub fn with_barriers_on_current_frame(window: Option<Arc<dyn FrameLifetime<B>>>) -> Self {
        Self::with_custom_barriers_on_current_frame(
            BarrierHook::Default,
            BarrierHook::Default,
            window,
        )
    }

    /// [`with_barriers_on_current_frame`](Self::with_barriers_on_current_frame)
    /// with custom barrier hooks.
    pub fn with_custom_barriers_on_current_frame(
        before: BarrierHook<B::CommandBuffer>,
        after: BarrierHook<B::CommandBuffer>,
        window: Option<Arc<dyn FrameLifetime<B>>>,
    ) -> Self {
        Self::from_strategy(Strategy::Barrier {
            lifetime: CommandBufferSink::CurrentFrame(window),
            before,
            after,
        })
    }

    /// Barrier-based synchronization for an operation subordinate to `master`.
    ///
    /// The hooks are installed as given; usually they are
    /// [`BarrierHook::steal_before`] and [`BarrierHook::steal_after`] because
    /// the master's barriers cover the subordinate operation. The subordinate
    /// is registered with `master`, which then also takes over the lifetime of
    /// the subordinate's command buffer.
    ///
    /// The subordinate must be submitted before its master.
    pub fn auxiliary(
        master: &mut SyncPolicy<B>,
        before: BarrierHook<B::CommandBuffer>,
        after: BarrierHook<B::CommandBuffer>,
    ) -> Self {
        let link = master.subordinates.register();
        log::debug!(
            "Registered subordinate #{} with {} master",
            master.subordinates.registered(),
            master.get_sync_type()
        );
        Self::from_strategy(Strategy::Barrier {
            lifetime: CommandBufferSink::Master(link),
            before,
            after,
        })
    }

    // ------------------------------------------------------------------------
    // Queue binding
    // ------------------------------------------------------------------------

    /// Set the queue the command is submitted to and where the sync happens.
    ///
    /// Overrides any earlier binding or hint.
    pub fn on_queue(mut self, queue: QueueId) -> Self {
        self.queue = QueueBinding::Explicit(queue);
        self
    }

    /// Suggest a queue. Ignored if the policy is already bound to one.
    pub fn set_queue_hint(&mut self, queue: QueueId) {
        if self.queue == QueueBinding::Unbound {
            self.queue = QueueBinding::Hinted(queue);
        }
    }

    /// Current queue binding.
    pub fn queue_binding(&self) -> QueueBinding {
        self.queue
    }

    /// Queue which the command and sync will be submitted to.
    pub fn queue_to_use(&self) -> SyncResult<QueueId> {
        self.queue.queue().ok_or(SyncError::NoQueueBound)
    }

    // ------------------------------------------------------------------------
    // Getters
    // ------------------------------------------------------------------------

    /// The fundamental sync approach configured in this policy.
    ///
    /// An unconfigured policy reports [`SyncType::NotRequired`]; use
    /// [`is_configured`](Self::is_configured) to tell the two apart.
    pub fn get_sync_type(&self) -> SyncType {
        match self.strategy {
            Strategy::Unconfigured | Strategy::NotRequired => SyncType::NotRequired,
            Strategy::WaitIdle => SyncType::ViaWaitIdle,
            Strategy::Semaphore { .. } => SyncType::ViaSemaphore,
            Strategy::Barrier { .. } => SyncType::ViaBarrier,
        }
    }

    /// Whether a factory configured this policy.
    pub fn is_configured(&self) -> bool {
        !matches!(self.strategy, Strategy::Unconfigured)
    }

    /// Whether the policy hands a signaled semaphore to a sink.
    pub fn has_semaphore_sink(&self) -> bool {
        matches!(self.strategy, Strategy::Semaphore { .. })
    }

    /// Whether the policy hands its command buffer to a lifetime sink.
    pub fn has_command_buffer_sink(&self) -> bool {
        matches!(self.strategy, Strategy::Barrier { .. })
    }

    /// Whether the command buffer goes to a master policy.
    pub fn is_subordinate(&self) -> bool {
        matches!(
            self.strategy,
            Strategy::Barrier {
                lifetime: CommandBufferSink::Master(_),
                ..
            }
        )
    }

    /// Semaphores waited on before the operation. Empty unless semaphore-based.
    pub fn wait_semaphores(&self) -> &[Semaphore<B>] {
        match &self.strategy {
            Strategy::Semaphore { wait_before, .. } => wait_before,
            _ => &[],
        }
    }

    /// The "before" barrier hook of a barrier-based policy.
    pub fn before_hook(&self) -> Option<&BarrierHook<B::CommandBuffer>> {
        match &self.strategy {
            Strategy::Barrier { before, .. } => Some(before),
            _ => None,
        }
    }

    /// The "after" barrier hook of a barrier-based policy.
    pub fn after_hook(&self) -> Option<&BarrierHook<B::CommandBuffer>> {
        match &self.strategy {
            Strategy::Barrier { after, .. } => Some(after),
            _ => None,
        }
    }

    /// Subordinates registered through [`auxiliary`](Self::auxiliary).
    pub fn subordinates(&self) -> &SubordinateRegistry<B> {
        &self.subordinates
    }

    /// Number of subordinates registered with this policy.
    pub fn subordinate_count(&self) -> usize {
        self.subordinates.registered()
    }

    /// Number of subordinate command buffers waiting for this policy's
    /// submission.
    pub fn adopted_command_buffer_count(&self) -> usize {
        self.subordinates.adopted_count()
    }

    /// Called by an operation which has determined that it needs
    /// synchronization. Fails if the policy opted out of it.
    pub fn require_synchronization(&self, operation: &str) -> SyncResult<()> {
        match self.strategy {
            Strategy::Unconfigured => Err(SyncError::SynchronizationRequired {
                operation: operation.to_string(),
                configured: "unconfigured".to_string(),
            }),
            Strategy::NotRequired => Err(SyncError::SynchronizationRequired {
                operation: operation.to_string(),
                configured: SyncType::NotRequired.to_string(),
            }),
            _ => Ok(()),
        }
    }

    // ------------------------------------------------------------------------
    // Barriers
    // ------------------------------------------------------------------------

    /// Establish the barrier in front of the operation.
    ///
    /// Called by the recording pipeline with the operation's first stage and
    /// read access. Does nothing unless the policy is barrier-based.
    pub fn establish_barrier_before_the_operation(
        &self,
        command_buffer: &mut B::CommandBuffer,
        dst_stage: PipelineStage,
        dst_access: Option<MemoryAccess>,
    ) {
        if let Strategy::Barrier { before, .. } = &self.strategy {
            log::trace!("Barrier before operation at {dst_stage:?} ({before:?})");
            before.run_before(command_buffer, dst_stage, dst_access);
        }
    }

    /// Establish the barrier behind the operation.
    ///
    /// Called by the recording pipeline with the operation's last stage and
    /// write access. Does nothing unless the policy is barrier-based.
    pub fn establish_barrier_after_the_operation(
        &self,
        command_buffer: &mut B::CommandBuffer,
        src_stage: PipelineStage,
        src_access: Option<MemoryAccess>,
    ) {
        if let Strategy::Barrier { after, .. } = &self.strategy {
            log::trace!("Barrier after operation at {src_stage:?} ({after:?})");
            after.run_after(command_buffer, src_stage, src_access);
        }
    }
}

impl<B: SyncBackend> std::fmt::Debug for SyncPolicy<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncPolicy")
            .field("sync_type", &self.get_sync_type())
            .field("configured", &self.is_configured())
            .field("queue", &self.queue)
            .field("subordinates", &self.subordinates)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use rstest::rstest;

    use super::*;
    use crate::backend::SyncBackend;
    use crate::backend::dummy::{DummyBackend, DummyCommandBuffer};
    use crate::barrier::{default_after, default_before, is_after_handler_stolen, is_before_handler_stolen};

    type Policy = SyncPolicy<DummyBackend>;

    fn command_buffer(backend: &DummyBackend) -> DummyCommandBuffer {
        backend.allocate_command_buffer(QueueId::new(0)).unwrap()
    }

    #[rstest]
    #[case::not_required(Policy::not_required(), SyncType::NotRequired, false, false)]
    #[case::wait_idle(Policy::wait_idle(), SyncType::ViaWaitIdle, false, false)]
    #[case::semaphores(Policy::with_semaphores(|_| {}, Vec::new()), SyncType::ViaSemaphore, true, false)]
    #[case::semaphores_on_frame(
        Policy::with_semaphores_on_current_frame(Vec::new(), None),
        SyncType::ViaSemaphore,
        true,
        false
    )]
    #[case::barriers(Policy::with_barriers(|_| {}), SyncType::ViaBarrier, false, true)]
    #[case::barriers_on_frame(Policy::with_barriers_on_current_frame(None), SyncType::ViaBarrier, false, true)]
    fn test_factory_strategy(
        #[case] policy: Policy,
        #[case] expected: SyncType,
        #[case] semaphore_sink: bool,
        #[case] command_buffer_sink: bool,
    ) {
        assert_eq!(policy.get_sync_type(), expected);
        assert!(policy.is_configured());
        assert_eq!(policy.has_semaphore_sink(), semaphore_sink);
        assert_eq!(policy.has_command_buffer_sink(), command_buffer_sink);
        assert_eq!(policy.before_hook().is_some(), command_buffer_sink);
        assert_eq!(policy.queue_binding(), QueueBinding::Unbound);
        assert!(!policy.is_subordinate());
    }

    #[test]
    fn test_auxiliary_factory() {
        let mut master = Policy::with_barriers(|_| {});
        let aux = Policy::auxiliary(
            &mut master,
            BarrierHook::steal_before(),
            BarrierHook::steal_after(),
        );

        assert_eq!(aux.get_sync_type(), SyncType::ViaBarrier);
        assert!(aux.is_subordinate());
        assert!(aux.has_command_buffer_sink());
        assert!(is_before_handler_stolen(aux.before_hook().unwrap()));
        assert!(is_after_handler_stolen(aux.after_hook().unwrap()));
        assert_eq!(master.subordinate_count(), 1);
        assert_eq!(master.adopted_command_buffer_count(), 0);
        assert_eq!(master.subordinates().registered(), 1);
        assert_eq!(master.subordinates().adopted_count(), 0);
    }

    #[test]
    fn test_default_is_unconfigured() {
        let policy = Policy::default();
        assert!(!policy.is_configured());
        assert_eq!(policy.get_sync_type(), SyncType::NotRequired);
        assert!(Policy::not_required().is_configured());
    }

    #[test]
    fn test_semaphore_wait_list_stored_verbatim() {
        let backend = DummyBackend::new();
        let waits: Vec<Semaphore<DummyBackend>> = (0..3)
            .map(|_| Semaphore::from_raw(backend.create_semaphore().unwrap()))
            .collect();
        let ids: Vec<u64> = waits.iter().map(|s| s.raw().id()).collect();

        let policy = Policy::with_semaphores(|_| {}, waits);
        let stored: Vec<u64> = policy.wait_semaphores().iter().map(|s| s.raw().id()).collect();
        assert_eq!(stored, ids);
    }

    #[test]
    fn test_queue_to_use_fails_when_unbound() {
        let policy = Policy::wait_idle();
        assert_eq!(policy.queue_to_use().unwrap_err(), SyncError::NoQueueBound);
    }

    #[test]
    fn test_explicit_queue_wins_over_hint() {
        let mut policy = Policy::wait_idle().on_queue(QueueId::new(2));
        policy.set_queue_hint(QueueId::new(0));
        assert_eq!(policy.queue_to_use().unwrap(), QueueId::new(2));
        assert_eq!(policy.queue_binding(), QueueBinding::Explicit(QueueId::new(2)));
    }

    #[test]
    fn test_hint_applies_when_unbound() {
        let mut policy = Policy::wait_idle();
        policy.set_queue_hint(QueueId::new(1));
        policy.set_queue_hint(QueueId::new(3));
        assert_eq!(policy.queue_binding(), QueueBinding::Hinted(QueueId::new(1)));

        let policy = policy.on_queue(QueueId::new(4));
        assert_eq!(policy.queue_to_use().unwrap(), QueueId::new(4));
    }

    #[test]
    fn test_require_synchronization() {
        assert!(Policy::wait_idle().require_synchronization("copy").is_ok());
        assert!(Policy::with_barriers(|_| {}).require_synchronization("copy").is_ok());

        let err = Policy::not_required()
            .require_synchronization("copy")
            .unwrap_err();
        assert!(matches!(err, SyncError::SynchronizationRequired { .. }));
        assert!(Policy::default().require_synchronization("copy").is_err());
    }

    #[test]
    fn test_default_hooks_record_default_barriers() {
        let backend = DummyBackend::new();
        let mut cmd = command_buffer(&backend);
        let policy = Policy::with_barriers(|_| {});

        policy.establish_barrier_before_the_operation(
            &mut cmd,
            PipelineStage::TRANSFER,
            Some(MemoryAccess::TRANSFER_READ),
        );
        policy.establish_barrier_after_the_operation(
            &mut cmd,
            PipelineStage::TRANSFER,
            Some(MemoryAccess::TRANSFER_WRITE),
        );

        assert_eq!(
            cmd.barriers(),
            [
                default_before(PipelineStage::TRANSFER, Some(MemoryAccess::TRANSFER_READ)),
                default_after(PipelineStage::TRANSFER, Some(MemoryAccess::TRANSFER_WRITE)),
            ]
        );
    }

    #[test]
    fn test_custom_hooks_intercept_barriers() {
        let backend = DummyBackend::new();
        let mut cmd = command_buffer(&backend);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let before = {
            let seen = Rc::clone(&seen);
            BarrierHook::custom(move |_: &mut DummyCommandBuffer, stage, access| {
                seen.borrow_mut().push(("before", stage, access));
            })
        };
        let after = {
            let seen = Rc::clone(&seen);
            BarrierHook::custom(move |_: &mut DummyCommandBuffer, stage, access| {
                seen.borrow_mut().push(("after", stage, access));
            })
        };
        let policy = Policy::with_custom_barriers(|_| {}, before, after);

        policy.establish_barrier_before_the_operation(&mut cmd, PipelineStage::COMPUTE_SHADER, None);
        policy.establish_barrier_after_the_operation(
            &mut cmd,
            PipelineStage::COMPUTE_SHADER,
            Some(MemoryAccess::SHADER_WRITE),
        );

        assert_eq!(
            *seen.borrow(),
            vec![
                ("before", PipelineStage::COMPUTE_SHADER, None),
                ("after", PipelineStage::COMPUTE_SHADER, Some(MemoryAccess::SHADER_WRITE)),
            ]
        );
        assert!(cmd.barriers().is_empty());
    }

    #[rstest]
    #[case::not_required(Policy::not_required())]
    #[case::wait_idle(Policy::wait_idle())]
    #[case::semaphores(Policy::with_semaphores(|_| {}, Vec::new()))]
    fn test_non_barrier_policies_record_no_barriers(#[case] policy: Policy) {
        let backend = DummyBackend::new();
        let mut cmd = command_buffer(&backend);
        policy.establish_barrier_before_the_operation(&mut cmd, PipelineStage::TRANSFER, None);
        policy.establish_barrier_after_the_operation(&mut cmd, PipelineStage::TRANSFER, None);
        assert!(cmd.barriers().is_empty());
    }
}
