//! Transport-free protocol objects for unit tests.

use std::{
    cell::{Cell, RefCell},
    rc::Rc,
};

use super::{BufferResource, CallbackResource, Protocol};

#[derive(Debug)]
pub enum MockProtocol {}

impl Protocol for MockProtocol {
    type Surface = u32;
    type Buffer = MockBuffer;
    type Callback = MockCallback;
}

#[derive(Debug, Clone)]
pub struct MockBuffer {
    id: u32,
    releases: Rc<Cell<u32>>,
}

impl MockBuffer {
    pub fn new(id: u32) -> Self {
        Self {
            id,
            releases: Rc::new(Cell::new(0)),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn releases(&self) -> u32 {
        self.releases.get()
    }
}

impl PartialEq for MockBuffer {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl BufferResource for MockBuffer {
    fn send_release(&self) {
        self.releases.set(self.releases.get() + 1);
    }
}

#[derive(Debug, Default)]
struct CallbackRecord {
    done: Vec<u32>,
    discarded: bool,
}

#[derive(Debug, Clone)]
pub struct CallbackLog(Rc<RefCell<CallbackRecord>>);

impl CallbackLog {
    pub fn done(&self) -> Vec<u32> {
        self.0.borrow().done.clone()
    }

    pub fn discarded(&self) -> bool {
        self.0.borrow().discarded
    }
}

#[derive(Debug, Clone)]
pub struct MockCallback(Rc<RefCell<CallbackRecord>>);

impl MockCallback {
    pub fn new() -> (Self, CallbackLog) {
        let record = Rc::new(RefCell::new(CallbackRecord::default()));
        (Self(record.clone()), CallbackLog(record))
    }
}

impl PartialEq for MockCallback {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl CallbackResource for MockCallback {
    fn send_done(self, time: u32) {
        self.0.borrow_mut().done.push(time);
    }

    fn discard(self) {
        self.0.borrow_mut().discarded = true;
    }
}
