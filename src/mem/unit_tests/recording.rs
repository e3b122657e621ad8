use std::cell::RefCell;
use std::rc::Rc;

use crate::mem::backend::{DramBackend, DramCompletion, DramConfig, FixedLatencyDram};

pub(crate) type AcceptLog = Rc<RefCell<Vec<DramCompletion>>>;

/// Fixed-latency DRAM that also records every access it accepted.
pub(crate) struct RecordingDram {
    inner: FixedLatencyDram,
    log: AcceptLog,
}

impl RecordingDram {
    pub(crate) fn new(cfg: &DramConfig) -> (Box<Self>, AcceptLog) {
        let log = AcceptLog::default();
        let dram = Box::new(Self {
            inner: FixedLatencyDram::new(cfg),
            log: Rc::clone(&log),
        });
        (dram, log)
    }
}

impl DramBackend for RecordingDram {
    fn will_accept(&self, addr: u64, is_write: bool) -> bool {
        self.inner.will_accept(addr, is_write)
    }

    fn submit(&mut self, addr: u64, is_write: bool) -> bool {
        let accepted = self.inner.submit(addr, is_write);
        if accepted {
            self.log.borrow_mut().push(DramCompletion { addr, is_write });
        }
        accepted
    }

    fn tick(&mut self) {
        self.inner.tick();
    }

    fn pop_completion(&mut self) -> Option<DramCompletion> {
        self.inner.pop_completion()
    }

    fn outstanding(&self) -> usize {
        self.inner.outstanding()
    }
}
