//! Page-flip completion events of a DRM device as a calloop source.
//!
//! calloop runs sources in readiness order, so there is no priority to set
//! on the registration. Flip completions are handled from the same dispatch
//! as client requests and never re-enter each other.

use std::{io, os::fd::AsFd, time::Duration};

use smithay::reexports::{
    calloop::{
        self, generic::Generic, EventSource, Interest, Mode, Poll, PostAction, Readiness, Token,
        TokenFactory,
    },
    drm::control::{Device as ControlDevice, Event},
};
use tracing::{error, trace, warn};

/// Completion of one page flip, stamped with the vblank time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlipEvent {
    pub frame: u32,
    pub seconds: u64,
    pub microseconds: u32,
}

impl FlipEvent {
    pub fn new(frame: u32, seconds: u64, microseconds: u32) -> Self {
        Self {
            frame,
            seconds,
            microseconds,
        }
    }

    pub fn from_duration(frame: u32, time: Duration) -> Self {
        Self::new(frame, time.as_secs(), time.subsec_micros())
    }

    /// Milliseconds, wrapping in 32 bits like the frame callback time.
    pub fn timestamp_ms(&self) -> u32 {
        (self.seconds as u32)
            .wrapping_mul(1000)
            .wrapping_add(self.microseconds / 1000)
    }
}

/// Level-triggered read source on the DRM fd.
///
/// Yields one [`FlipEvent`] per page-flip event, in kernel order. Errors on
/// the fd remove the source.
pub struct FlipEventSource<F: AsFd + ControlDevice + Clone> {
    device: F,
    source: Generic<F>,
}

impl<F: AsFd + ControlDevice + Clone> FlipEventSource<F> {
    pub fn new(device: F) -> Self {
        let source = Generic::new(device.clone(), Interest::READ, Mode::Level);
        Self { device, source }
    }
}

impl<F: AsFd + ControlDevice + Clone> EventSource for FlipEventSource<F> {
    type Event = FlipEvent;
    type Metadata = ();
    type Ret = ();
    type Error = io::Error;

    fn process_events<C>(
        &mut self,
        readiness: Readiness,
        token: Token,
        mut callback: C,
    ) -> Result<PostAction, Self::Error>
    where
        C: FnMut(Self::Event, &mut Self::Metadata) -> Self::Ret,
    {
        let device = &self.device;
        self.source.process_events(readiness, token, |readiness, _| {
            if readiness.error {
                warn!("DRM device reported an error, removing flip event source");
                return Ok(PostAction::Remove);
            }
            let events = match device.receive_events() {
                Ok(events) => events,
                Err(err) => {
                    error!("Failed to read DRM events: {err}");
                    return Ok(PostAction::Remove);
                }
            };
            for event in events {
                match event {
                    Event::PageFlip(flip) => {
                        let event = FlipEvent::from_duration(flip.frame, flip.duration);
                        trace!(?event, "page flip complete");
                        callback(event, &mut ());
                    }
                    _ => {}
                }
            }
            Ok(PostAction::Continue)
        })
    }

    fn register(&mut self, poll: &mut Poll, factory: &mut TokenFactory) -> calloop::Result<()> {
        self.source.register(poll, factory)
    }

    fn reregister(&mut self, poll: &mut Poll, factory: &mut TokenFactory) -> calloop::Result<()> {
        self.source.reregister(poll, factory)
    }

    fn unregister(&mut self, poll: &mut Poll) -> calloop::Result<()> {
        self.source.unregister(poll)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_combines_seconds_and_microseconds() {
        assert_eq!(FlipEvent::new(0, 12, 345_678).timestamp_ms(), 12_345);
        assert_eq!(
            FlipEvent::from_duration(3, Duration::from_micros(1_500_999)).timestamp_ms(),
            1_500
        );
    }

    #[test]
    fn timestamp_wraps_in_32_bits() {
        let seconds = u64::from(u32::MAX / 1000 + 1);
        let expected = (seconds as u32).wrapping_mul(1000);
        assert_eq!(FlipEvent::new(0, seconds, 0).timestamp_ms(), expected);
        assert!(expected < 1000);
    }
}
