use std::collections::VecDeque;

use crate::mem::backend::{DramCompletion, DramConfig};
use crate::mem::mxp::{FixedLatencyMxp, MxpConfig, MxpPort, MxpTarget};
use crate::mem::port::{CallbackPort, MemPort};
use crate::mem::router::{CxlTarget, McRouter, RouterConfig};
use crate::mem::unit_tests::recording::{AcceptLog, RecordingDram};
use crate::sim::network::{Network, NodeId, QueueNetwork};
use crate::sim::request::{MemRequest, ReqState, RequestAllocator, RequestLedger};

/// CXL target that records hand-offs and answers reads only when told to.
#[derive(Default)]
struct StubTarget {
    accepted: Vec<u64>,
    refuse: bool,
    answer: bool,
    held: VecDeque<MemRequest>,
}

impl CxlTarget for StubTarget {
    fn insert_request(&mut self, req: MemRequest) -> Result<(), MemRequest> {
        if self.refuse {
            return Err(req);
        }
        self.accepted.push(req.id);
        if !req.is_write() {
            self.held.push_back(req);
        }
        Ok(())
    }

    fn pop_request(&mut self) -> Option<MemRequest> {
        if !self.answer {
            return None;
        }
        self.held.pop_front()
    }

    fn advance_one_cycle(&mut self, _alloc: &mut dyn RequestAllocator) {}

    fn is_idle(&self) -> bool {
        self.held.is_empty()
    }
}

struct Bench {
    router: McRouter,
    net: QueueNetwork,
    ledger: RequestLedger,
    dram_log: AcceptLog,
}

impl Bench {
    fn new(cfg: &RouterConfig, net_capacity: usize) -> Self {
        let (dram, dram_log) = RecordingDram::new(&DramConfig::default());
        Self {
            router: McRouter::new(cfg, MemPort::Callback(CallbackPort::new(dram))).unwrap(),
            net: QueueNetwork::new(net_capacity),
            ledger: RequestLedger::default(),
            dram_log,
        }
    }

    fn inject(&mut self, req: MemRequest) {
        self.net
            .send(req, NodeId::llc(0), self.router.node())
            .unwrap();
    }

    fn cycle(&mut self, cxl: &mut dyn CxlTarget) {
        self.router.run_a_cycle(&mut self.net, cxl, &mut self.ledger);
    }

    fn responses(&mut self) -> Vec<MemRequest> {
        let mut out = Vec::new();
        while let Some(req) = self.net.receive_pop(NodeId::llc(0)) {
            out.push(req);
        }
        out
    }
}

#[test]
fn range_boundary_is_inclusive() {
    let cfg = RouterConfig {
        cxl_range_start: 0x8000,
        ..RouterConfig::default()
    };
    assert!(cfg.is_cxl(0x8000));
    assert!(!cfg.is_cxl(0x7fc0));
    let disabled = RouterConfig {
        cxl_enable: false,
        ..cfg
    };
    assert!(!disabled.is_cxl(0x9000));
}

#[test]
fn requests_split_by_address() {
    let cfg = RouterConfig {
        cxl_range_start: 0x8000,
        receive_width: 2,
        ..RouterConfig::default()
    };
    let mut bench = Bench::new(&cfg, 16);
    let mut stub = StubTarget::default();
    bench.inject(MemRequest::read(1, 0x4000));
    bench.inject(MemRequest::read(2, 0x9000));

    bench.cycle(&mut stub);
    assert_eq!(
        vec![DramCompletion {
            addr: 0x4000,
            is_write: false
        }],
        *bench.dram_log.borrow()
    );
    // CXL requests reach the target on the next cycle's hand-off
    assert!(stub.accepted.is_empty());
    assert_eq!(cfg.cme_slots - 1, bench.router.free_cme_slots());

    bench.cycle(&mut stub);
    assert_eq!(vec![2], stub.accepted);
    assert_eq!(1, bench.dram_log.borrow().len());
    assert_eq!(cfg.cme_slots, bench.router.free_cme_slots());
    assert_eq!(1, bench.router.cxl_inflight());
    assert_eq!((1, 1), (bench.router.stats.dimm_reads, bench.router.stats.cme_reads));
    assert_eq!(Some(0x4000), bench.router.stats.min_addr);
    assert_eq!(Some(0x9000), bench.router.stats.max_addr);

    stub.answer = true;
    let mut returned = Vec::new();
    for _ in 0..200 {
        bench.cycle(&mut stub);
        returned.extend(bench.responses());
    }
    let mut ids: Vec<u64> = returned.iter().map(|req| req.id).collect();
    ids.sort();
    assert_eq!(vec![1, 2], ids);
    assert!(returned.iter().all(|req| req.state == ReqState::NocFill));
    assert_eq!(0, bench.router.cxl_inflight());
    assert!(bench.router.is_idle());
}

#[test]
fn cxl_request_waits_on_network_without_a_slot() {
    let cfg = RouterConfig {
        cxl_range_start: 0x8000,
        cme_slots: 3,
        receive_width: 8,
        ..RouterConfig::default()
    };
    let mut bench = Bench::new(&cfg, 16);
    let mut stub = StubTarget::default();
    for id in 1..=4 {
        bench.inject(MemRequest::write(id, 0x8000 + 0x40 * id));
    }

    bench.cycle(&mut stub);
    assert_eq!(0, bench.router.free_cme_slots());
    assert_eq!(1, bench.router.stats.cme_slot_refused);
    assert_eq!(1, bench.net.pending(bench.router.node()));

    bench.cycle(&mut stub);
    assert_eq!(vec![1, 2, 3], stub.accepted);
    assert_eq!(0, bench.net.pending(bench.router.node()));
    assert_eq!(2, bench.router.free_cme_slots());

    bench.cycle(&mut stub);
    assert_eq!(vec![1, 2, 3, 4], stub.accepted);
    assert_eq!(3, bench.router.free_cme_slots());
    // writes never count as in flight on the CXL side
    assert_eq!(0, bench.router.cxl_inflight());
}

#[test]
fn refused_hand_off_keeps_slot_and_order() {
    let cfg = RouterConfig {
        cxl_range_start: 0x8000,
        cme_slots: 2,
        receive_width: 2,
        ..RouterConfig::default()
    };
    let mut bench = Bench::new(&cfg, 16);
    let mut stub = StubTarget {
        refuse: true,
        ..StubTarget::default()
    };
    bench.inject(MemRequest::read(1, 0x8000));
    bench.inject(MemRequest::read(2, 0x8040));

    bench.cycle(&mut stub);
    bench.cycle(&mut stub);
    assert_eq!(0, bench.router.free_cme_slots());
    assert_eq!(1, bench.router.stats.cme_target_refused);
    assert!(stub.accepted.is_empty());

    stub.refuse = false;
    bench.cycle(&mut stub);
    assert_eq!(vec![1, 2], stub.accepted);
    assert_eq!(2, bench.router.free_cme_slots());

    assert_eq!(2, bench.router.cxl_inflight());

    // answers are collected on one cycle and sent on the next
    stub.answer = true;
    bench.cycle(&mut stub);
    assert_eq!(0, bench.router.cxl_inflight());
    assert!(bench.responses().is_empty());
    bench.cycle(&mut stub);
    let ids: Vec<u64> = bench.responses().iter().map(|req| req.id).collect();
    assert_eq!(vec![1, 2], ids);
}

#[test]
fn refused_response_stays_queued() {
    let cfg = RouterConfig {
        receive_width: 2,
        ..RouterConfig::default()
    };
    let mut bench = Bench::new(&cfg, 2);
    let mut stub = StubTarget::default();
    bench.inject(MemRequest::read(1, 0x0));
    bench.inject(MemRequest::read(2, 0x40));
    bench.cycle(&mut stub);
    bench.inject(MemRequest::read(3, 0x80));

    for _ in 0..200 {
        bench.cycle(&mut stub);
    }
    // two fit in the requester's queue, the third is held back
    assert_eq!(2, bench.net.pending(NodeId::llc(0)));
    assert!(bench.router.stats.send_refused > 0);
    assert!(!bench.router.is_idle());

    let first: Vec<u64> = bench.responses().iter().map(|req| req.id).collect();
    assert_eq!(vec![1, 2], first);
    bench.cycle(&mut stub);
    let second: Vec<u64> = bench.responses().iter().map(|req| req.id).collect();
    assert_eq!(vec![3], second);
    assert!(bench.router.is_idle());
}

#[test]
fn local_write_retires_through_allocator() {
    let mut bench = Bench::new(&RouterConfig::default(), 4);
    let mut stub = StubTarget::default();
    bench.inject(MemRequest::write(5, 0x100));

    bench.cycle(&mut stub);
    assert_eq!(1, bench.router.dimm_port().outstanding());
    for _ in 0..100 {
        bench.cycle(&mut stub);
    }
    assert_eq!(1, bench.ledger.freed_count());
    assert_eq!(5, bench.ledger.freed()[0].id);
    assert_eq!(1, bench.router.stats.dimm_writes_retired);
    assert_eq!(0, bench.router.dimm_port().outstanding());
    assert!(bench.responses().is_empty());
    assert!(stub.accepted.is_empty());
}

#[test]
fn mxp_engine_serves_cxl_range() {
    let cfg = RouterConfig {
        cxl_range_start: 0x8000,
        receive_width: 2,
        ..RouterConfig::default()
    };
    let mut bench = Bench::new(&cfg, 8);
    let mut mxp = MxpTarget::new(MxpPort::new(Box::new(FixedLatencyMxp::new(
        &MxpConfig::default(),
    ))));
    bench.inject(MemRequest::read(1, 0x8000));
    bench.inject(MemRequest::write(2, 0x8040));

    let mut returned = Vec::new();
    for _ in 0..300 {
        bench.cycle(&mut mxp);
        mxp.advance_one_cycle(&mut bench.ledger);
        returned.extend(bench.responses().into_iter().map(|req| req.id));
    }
    assert_eq!(vec![1], returned);
    assert_eq!(1, bench.ledger.freed_count());
    assert_eq!(2, bench.ledger.freed()[0].id);
    assert_eq!(1, mxp.writes_retired);
    assert!(mxp.is_idle());
    assert!(bench.dram_log.borrow().is_empty());
}
