/// The buffer object on screen and the one a flip was requested for.
#[derive(Debug)]
pub struct PresentationState<B> {
    current: Option<B>,
    next: Option<B>,
}

impl<B> Default for PresentationState<B> {
    fn default() -> Self {
        Self {
            current: None,
            next: None,
        }
    }
}

impl<B: Copy + PartialEq> PresentationState<B> {
    pub fn current(&self) -> Option<B> {
        self.current
    }

    pub fn next(&self) -> Option<B> {
        self.next
    }

    pub fn is_flip_pending(&self) -> bool {
        self.next.is_some()
    }

    /// Only one flip may be in flight.
    ///
    /// # Panics
    ///
    /// If a flip is still pending.
    pub fn ensure_flip_allowed(&self) {
        if self.next.is_some() {
            panic!("page flip requested while another flip is pending");
        }
    }

    /// Records the buffer object shown by the initial modeset.
    pub(crate) fn set_initial(&mut self, bo: B) {
        self.current = Some(bo);
    }

    pub(crate) fn schedule(&mut self, bo: B) {
        self.ensure_flip_allowed();
        self.next = Some(bo);
    }

    /// Promotes `next` to `current` and returns the buffer object that left
    /// the screen. `None` when no flip was pending.
    pub(crate) fn complete(&mut self) -> Option<Option<B>> {
        let next = self.next.take()?;
        Some(self.current.replace(next))
    }

    /// Empties both slots, returning what they held.
    pub(crate) fn take_all(&mut self) -> impl Iterator<Item = B> {
        self.current.take().into_iter().chain(self.next.take())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_promotes_next() {
        let mut state = PresentationState::default();
        state.set_initial(1);
        state.schedule(2);
        assert_eq!(state.complete(), Some(Some(1)));
        assert_eq!((state.current(), state.next()), (Some(2), None));
    }

    #[test]
    fn spurious_completion_is_ignored() {
        let mut state = PresentationState::<u32>::default();
        state.set_initial(1);
        assert_eq!(state.complete(), None);
        assert_eq!(state.current(), Some(1));
    }

    #[test]
    #[should_panic(expected = "another flip is pending")]
    fn second_schedule_panics() {
        let mut state = PresentationState::default();
        state.schedule(1);
        state.schedule(2);
    }
}
