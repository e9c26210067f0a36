use std::collections::VecDeque;

use tracing::trace;

use super::{
    damage::DamageRegion,
    resource::{BufferId, SurfaceId, TrackedResource},
    CallbackResource, Protocol,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SurfaceType {
    OnScreen,
    OffScreen,
}

/// Which pending queue a callback request lands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackKind {
    Frame,
    Render,
}

/// Position of a surface in its commit cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceState {
    Idle,
    Attaching,
    Damaged,
}

/// Per-surface serial of a callback request, in request order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallbackToken(u64);

#[derive(Debug)]
struct QueuedCallback<C> {
    token: CallbackToken,
    handle: C,
}

#[derive(Debug)]
struct PendingState<C> {
    damage: Option<DamageRegion>,
    buffer: Option<BufferId>,
    buffer_attached: bool,
    frame_callbacks: Vec<QueuedCallback<C>>,
    render_callbacks: Vec<QueuedCallback<C>>,
}

impl<C> Default for PendingState<C> {
    fn default() -> Self {
        Self {
            damage: None,
            buffer: None,
            buffer_attached: false,
            frame_callbacks: Vec::new(),
            render_callbacks: Vec::new(),
        }
    }
}

/// Snapshot of the pending state handed to the commit hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitState {
    /// An attach happened during this cycle, possibly of a null buffer.
    pub buffer_attached: bool,
    pub buffer: Option<BufferId>,
    pub damage: Option<DamageRegion>,
}

/// Double-buffered state of one displayable surface.
#[derive(Debug)]
pub struct Surface<P: Protocol> {
    id: SurfaceId,
    resource: TrackedResource<P::Surface>,
    ty: SurfaceType,
    pending: PendingState<P::Callback>,
    current: VecDeque<QueuedCallback<P::Callback>>,
    next_token: u64,
}

impl<P: Protocol> Surface<P> {
    pub fn new(id: SurfaceId, handle: P::Surface, ty: SurfaceType) -> Self {
        Self {
            id,
            resource: TrackedResource::new(handle),
            ty,
            pending: PendingState::default(),
            current: VecDeque::new(),
            next_token: 0,
        }
    }

    pub fn id(&self) -> SurfaceId {
        self.id
    }

    pub fn surface_type(&self) -> SurfaceType {
        self.ty
    }

    pub fn resource(&self) -> Option<&P::Surface> {
        self.resource.resource()
    }

    pub fn state(&self) -> SurfaceState {
        if self.pending.damage.is_some() {
            SurfaceState::Damaged
        } else if self.pending.buffer_attached {
            SurfaceState::Attaching
        } else {
            SurfaceState::Idle
        }
    }

    pub fn pending_buffer(&self) -> Option<BufferId> {
        self.pending.buffer
    }

    pub fn pending_damage(&self) -> Option<DamageRegion> {
        self.pending.damage
    }

    /// Callbacks owed to the client once the current content is shown.
    pub fn current_callbacks(&self) -> impl Iterator<Item = (CallbackToken, &P::Callback)> {
        self.current.iter().map(|c| (c.token, &c.handle))
    }

    pub fn pending_callbacks(&self) -> usize {
        self.pending.frame_callbacks.len() + self.pending.render_callbacks.len()
    }

    pub(crate) fn tracked_mut(&mut self) -> &mut TrackedResource<P::Surface> {
        &mut self.resource
    }

    /// Records a new pending buffer, or an explicit null, and returns the
    /// buffer it replaces.
    pub(crate) fn attach(&mut self, buffer: Option<BufferId>) -> Option<BufferId> {
        self.pending.buffer_attached = true;
        std::mem::replace(&mut self.pending.buffer, buffer)
    }

    /// Forgets the pending buffer without touching the attached flag, used
    /// when the client destroys the buffer before committing.
    pub(crate) fn drop_pending_buffer(&mut self, buffer: BufferId) -> bool {
        if self.pending.buffer == Some(buffer) {
            self.pending.buffer = None;
            true
        } else {
            false
        }
    }

    pub fn damage(&mut self, x: i32, y: i32, width: i32, height: i32) {
        match self.pending.damage.as_mut() {
            Some(damage) => damage.expand(x, y, width, height),
            None => self.pending.damage = Some(DamageRegion::new(x, y, width, height)),
        }
    }

    pub fn request_frame_callback(&mut self, handle: P::Callback, kind: CallbackKind) -> CallbackToken {
        let token = CallbackToken(self.next_token);
        self.next_token += 1;
        let queued = QueuedCallback { token, handle };
        match kind {
            CallbackKind::Frame => self.pending.frame_callbacks.push(queued),
            CallbackKind::Render => self.pending.render_callbacks.push(queued),
        }
        token
    }

    /// First half of a commit: pending frame callbacks, then pending render
    /// callbacks, move to the current queue and the rest of the pending
    /// state is captured for the commit hook.
    pub(crate) fn begin_commit(&mut self) -> CommitState {
        self.current.extend(self.pending.frame_callbacks.drain(..));
        self.current.extend(self.pending.render_callbacks.drain(..));
        CommitState {
            buffer_attached: self.pending.buffer_attached,
            buffer: self.pending.buffer,
            damage: self.pending.damage,
        }
    }

    /// Second half of a commit. Returns the buffer that was pending.
    pub(crate) fn clear_pending(&mut self) -> Option<BufferId> {
        let pending = std::mem::take(&mut self.pending);
        pending.buffer
    }

    /// Delivers every current callback in request order.
    pub fn frame_complete(&mut self, time: u32) {
        trace!(surface = ?self.id, count = self.current.len(), time, "frame complete");
        for callback in self.current.drain(..) {
            callback.handle.send_done(time);
        }
    }

    /// Drops a callback the client destroyed before delivery.
    pub fn forget_callback(&mut self, handle: &P::Callback) -> bool {
        let pending = &mut self.pending;
        for queue in [&mut pending.frame_callbacks, &mut pending.render_callbacks] {
            if let Some(pos) = queue.iter().position(|c| c.handle == *handle) {
                queue.remove(pos);
                return true;
            }
        }
        if let Some(pos) = self.current.iter().position(|c| c.handle == *handle) {
            self.current.remove(pos);
            return true;
        }
        false
    }

    /// Empties every callback queue without delivering anything.
    pub(crate) fn discard_callbacks(&mut self) {
        let pending = std::mem::take(&mut self.pending.frame_callbacks)
            .into_iter()
            .chain(std::mem::take(&mut self.pending.render_callbacks))
            .chain(self.current.drain(..));
        for callback in pending {
            callback.handle.discard();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::testing::{MockCallback, MockProtocol};

    fn surface() -> Surface<MockProtocol> {
        Surface::new(SurfaceId(0), 0, SurfaceType::OnScreen)
    }

    #[test]
    fn commit_orders_frame_before_render_callbacks() {
        let mut surface = surface();
        let (r1, r1_log) = MockCallback::new();
        let (f1, f1_log) = MockCallback::new();
        let (f2, f2_log) = MockCallback::new();
        let t_r1 = surface.request_frame_callback(r1, CallbackKind::Render);
        let t_f1 = surface.request_frame_callback(f1, CallbackKind::Frame);
        let t_f2 = surface.request_frame_callback(f2, CallbackKind::Frame);

        surface.begin_commit();
        surface.clear_pending();

        let order: Vec<_> = surface.current_callbacks().map(|(t, _)| t).collect();
        assert_eq!(order, vec![t_f1, t_f2, t_r1]);

        surface.frame_complete(42);
        assert_eq!(f1_log.done(), vec![42]);
        assert_eq!(f2_log.done(), vec![42]);
        assert_eq!(r1_log.done(), vec![42]);
        assert_eq!(surface.current_callbacks().count(), 0);

        surface.frame_complete(43);
        assert_eq!(f1_log.done(), vec![42]);
    }

    #[test]
    fn late_callback_waits_for_next_commit() {
        let mut surface = surface();
        let (early, early_log) = MockCallback::new();
        let (late, late_log) = MockCallback::new();
        surface.request_frame_callback(early, CallbackKind::Frame);
        surface.begin_commit();
        surface.clear_pending();
        surface.request_frame_callback(late, CallbackKind::Frame);

        surface.frame_complete(10);
        assert_eq!(early_log.done(), vec![10]);
        assert!(late_log.done().is_empty());
        assert_eq!(surface.pending_callbacks(), 1);

        surface.begin_commit();
        surface.clear_pending();
        surface.frame_complete(20);
        assert_eq!(early_log.done(), vec![10]);
        assert_eq!(late_log.done(), vec![20]);
    }

    #[test]
    fn empty_commit_only_flushes_callbacks() {
        let mut surface = surface();
        let (cb, _log) = MockCallback::new();
        surface.request_frame_callback(cb, CallbackKind::Frame);

        let state = surface.begin_commit();
        assert_eq!(
            state,
            CommitState {
                buffer_attached: false,
                buffer: None,
                damage: None
            }
        );
        assert_eq!(surface.clear_pending(), None);
        assert_eq!(surface.current_callbacks().count(), 1);
        assert_eq!(surface.state(), SurfaceState::Idle);
    }

    #[test]
    fn state_follows_pending_contents() {
        let mut surface = surface();
        assert_eq!(surface.state(), SurfaceState::Idle);
        surface.attach(None);
        assert_eq!(surface.state(), SurfaceState::Attaching);
        surface.damage(0, 0, 1, 1);
        assert_eq!(surface.state(), SurfaceState::Damaged);
        surface.begin_commit();
        surface.clear_pending();
        assert_eq!(surface.state(), SurfaceState::Idle);
    }

    #[test]
    fn damage_accumulates_until_commit() {
        let mut surface = surface();
        surface.damage(0, 0, 10, 10);
        surface.damage(20, 20, 10, 10);
        let state = surface.begin_commit();
        assert_eq!(state.damage, Some(DamageRegion::new(0, 0, 30, 30)));
        surface.clear_pending();
        assert_eq!(surface.pending_damage(), None);
    }

    #[test]
    fn forgotten_callback_is_never_delivered() {
        let mut surface = surface();
        let (a, a_log) = MockCallback::new();
        let (b, b_log) = MockCallback::new();
        let a_handle = a.clone();
        surface.request_frame_callback(a, CallbackKind::Frame);
        surface.request_frame_callback(b, CallbackKind::Render);

        assert!(surface.forget_callback(&a_handle));
        assert!(!surface.forget_callback(&a_handle));
        surface.begin_commit();
        surface.clear_pending();
        surface.frame_complete(7);

        assert!(a_log.done().is_empty());
        assert_eq!(b_log.done(), vec![7]);
    }

    #[test]
    fn discard_releases_without_done() {
        let mut surface = surface();
        let (a, a_log) = MockCallback::new();
        let (b, b_log) = MockCallback::new();
        surface.request_frame_callback(a, CallbackKind::Frame);
        surface.begin_commit();
        surface.clear_pending();
        surface.request_frame_callback(b, CallbackKind::Render);

        surface.discard_callbacks();

        assert!(a_log.done().is_empty() && a_log.discarded());
        assert!(b_log.done().is_empty() && b_log.discarded());
        assert_eq!(surface.pending_callbacks(), 0);
    }
}
