//! Scriptable stand-in for the scanout hardware.

use std::{cell::RefCell, io, rc::Rc};

use super::device::{FrameError, PresentationDevice};
use crate::display::testing::MockBuffer;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceCall {
    PresentInitial(u32),
    Import(u32),
    Render,
    Lock(u32),
    PageFlip(u32),
}

#[derive(Debug, Default)]
struct DeviceLog {
    calls: Vec<DeviceCall>,
    released: Vec<u32>,
    next_bo: u32,
    fail_import: bool,
    fail_page_flip: bool,
}

/// Clones share one log, so tests keep a handle after moving the device
/// into the backend.
#[derive(Debug, Clone)]
pub struct MockDevice {
    size: (u32, u32),
    log: Rc<RefCell<DeviceLog>>,
}

impl MockDevice {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            size: (width, height),
            log: Rc::default(),
        }
    }

    pub fn calls(&self) -> Vec<DeviceCall> {
        self.log.borrow().calls.clone()
    }

    pub fn released(&self) -> Vec<u32> {
        self.log.borrow().released.clone()
    }

    pub fn fail_import(&self, fail: bool) {
        self.log.borrow_mut().fail_import = fail;
    }

    pub fn fail_page_flip(&self, fail: bool) {
        self.log.borrow_mut().fail_page_flip = fail;
    }

    fn allocate(&self) -> u32 {
        let mut log = self.log.borrow_mut();
        let bo = log.next_bo;
        log.next_bo += 1;
        bo
    }

    fn record(&self, call: DeviceCall) {
        self.log.borrow_mut().calls.push(call);
    }
}

impl PresentationDevice for MockDevice {
    type ClientBuffer = MockBuffer;
    type BufferObject = u32;

    fn size(&self) -> (u32, u32) {
        self.size
    }

    fn present_initial(&mut self) -> Result<u32, FrameError> {
        let bo = self.allocate();
        self.record(DeviceCall::PresentInitial(bo));
        Ok(bo)
    }

    fn import_buffer(&mut self, buffer: &MockBuffer) -> Result<(), FrameError> {
        self.record(DeviceCall::Import(buffer.id()));
        if self.log.borrow().fail_import {
            return Err(FrameError::Import("unsupported buffer".into()));
        }
        Ok(())
    }

    fn render_imported(&mut self) -> Result<(), FrameError> {
        self.record(DeviceCall::Render);
        Ok(())
    }

    fn lock_front_buffer(&mut self) -> Result<u32, FrameError> {
        let bo = self.allocate();
        self.record(DeviceCall::Lock(bo));
        Ok(bo)
    }

    fn page_flip(&mut self, bo: u32) -> Result<(), FrameError> {
        self.record(DeviceCall::PageFlip(bo));
        if self.log.borrow().fail_page_flip {
            return Err(FrameError::PageFlip(io::Error::from(io::ErrorKind::Other)));
        }
        Ok(())
    }

    fn release_buffer_object(&mut self, bo: u32) {
        self.log.borrow_mut().released.push(bo);
    }
}
