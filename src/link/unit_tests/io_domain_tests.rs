use std::collections::HashSet;

use crate::link::config::LinkConfig;
use crate::link::expander::ExpanderConfig;
use crate::link::io_domain::IoDomain;
use crate::link::message::VcId;
use crate::mem::backend::{DramCompletion, DramConfig, FixedLatencyDram};
use crate::mem::port::{CallbackPort, MemPort, TransactionPort};
use crate::mem::unit_tests::recording::{AcceptLog, RecordingDram};
use crate::sim::request::{MemRequest, ReqState, RequestLedger};
use crate::timeq::Cycle;

fn recording_domain(link_cfg: &LinkConfig) -> (IoDomain, AcceptLog) {
    let (dram, log) = RecordingDram::new(&DramConfig::default());
    let io = IoDomain::new(
        link_cfg,
        &ExpanderConfig::default(),
        MemPort::Callback(CallbackPort::new(dram)),
    )
    .unwrap();
    (io, log)
}

#[test]
fn write_retires_without_a_response() {
    let (mut io, log) = recording_domain(&LinkConfig::default());
    let mut ledger = RequestLedger::default();
    io.insert_request(MemRequest::write(1, 0x1000));

    for _ in 0..500 {
        io.advance_one_cycle(&mut ledger);
        assert!(io.pop_request().is_none());
        if ledger.freed_count() > 0 {
            break;
        }
    }
    assert_eq!(
        vec![DramCompletion {
            addr: 0x1000,
            is_write: true
        }],
        *log.borrow()
    );
    assert_eq!(1, ledger.freed_count());
    assert_eq!(1, ledger.freed()[0].id);
    assert_eq!(ReqState::Retired, ledger.freed()[0].state);
    // nothing travels back over the link for a write
    assert_eq!([0, 0], io.cme.link.stats.pushed);

    for _ in 0..50 {
        io.advance_one_cycle(&mut ledger);
    }
    assert_eq!(1, ledger.freed_count());
    assert!(io.is_idle());
}

#[test]
fn read_comes_back_through_root_complex() {
    let (mut io, log) = recording_domain(&LinkConfig::default());
    let mut ledger = RequestLedger::default();
    io.insert_request(MemRequest::read(2, 0x2000));
    assert_eq!(1, io.rc.pending_len());

    let mut returned = None;
    for _ in 0..500 {
        io.advance_one_cycle(&mut ledger);
        assert_eq!(0, io.rc.pending_len());
        if io.rc.done_len() > 0 {
            assert_eq!(1, io.rc.done_len());
            returned = io.pop_request();
            break;
        }
    }
    let req = returned.expect("read never returned");
    assert_eq!((2, 0x2000), (req.id, req.addr));
    assert_eq!(ReqState::LinkReturned, req.state);
    assert_eq!(Some(0), req.link_entry_cycle);
    assert!(req.device_done_cycle.is_some());
    assert_eq!(1, log.borrow().len());
    assert_eq!(0, ledger.freed_count());
    assert_eq!(1, io.cme.link.stats.pushed[VcId::WithData.index()]);
    assert_eq!(1, io.cme.stats.reads_done);

    for _ in 0..10 {
        io.advance_one_cycle(&mut ledger);
    }
    assert!(io.pop_request().is_none());
    assert!(io.is_idle());
}

#[test]
fn same_address_writes_retire_in_order() {
    let (mut io, _log) = recording_domain(&LinkConfig::default());
    let mut ledger = RequestLedger::default();
    io.insert_request(MemRequest::write(1, 0x40));
    io.insert_request(MemRequest::write(2, 0x40));

    let mut peak = 0;
    for _ in 0..500 {
        io.advance_one_cycle(&mut ledger);
        peak = peak.max(io.cme.inflight());
        if ledger.freed_count() == 2 {
            break;
        }
    }
    let ids: Vec<u64> = ledger.freed().iter().map(|req| req.id).collect();
    assert_eq!(vec![1, 2], ids);
    assert!(peak >= 1);
    assert_eq!(0, io.cme.inflight());
}

fn read_round_trip(port: MemPort) -> Cycle {
    let mut io = IoDomain::new(&LinkConfig::default(), &ExpanderConfig::default(), port).unwrap();
    let mut ledger = RequestLedger::default();
    io.insert_request(MemRequest::read(1, 0x80));
    for cycle in 0..1000 {
        io.advance_one_cycle(&mut ledger);
        if io.pop_request().is_some() {
            return cycle;
        }
    }
    panic!("read never returned");
}

#[test]
fn transaction_shape_adds_read_latency() {
    let cfg = DramConfig::default();
    let fast = read_round_trip(MemPort::Transaction(TransactionPort::new(
        Box::new(FixedLatencyDram::new(&cfg)),
        0,
    )));
    let slow = read_round_trip(MemPort::Transaction(TransactionPort::new(
        Box::new(FixedLatencyDram::new(&cfg)),
        20,
    )));
    assert!(slow >= fast + 20, "fast {} slow {}", fast, slow);
}

#[test]
fn backend_runs_at_internal_clock() {
    let exp_cfg = ExpanderConfig {
        internal_freq_mhz: 3200,
        link_freq_mhz: 1600,
        debug_dump: true,
    };
    let mut io = IoDomain::new(
        &LinkConfig::default(),
        &exp_cfg,
        MemPort::from_config(&DramConfig::default()),
    )
    .unwrap();
    let mut ledger = RequestLedger::default();
    for _ in 0..10 {
        io.advance_one_cycle(&mut ledger);
    }
    assert_eq!(20, io.cme.stats.backend_ticks);
    assert_eq!(10, io.cycle());
    // the domain dump is the only one, and it covers each end once
    let dump = io.dump();
    assert_eq!(1, dump.matches("=== memory expander @").count());
    assert_eq!(1, dump.matches("=== root complex @").count());
}

#[test]
fn mixed_traffic_completes_exactly_once() {
    let link_cfg = LinkConfig {
        rxvc_capacity: 2,
        txvc_capacity: 4,
        ..LinkConfig::default()
    };
    let (mut io, log) = recording_domain(&link_cfg);
    let mut ledger = RequestLedger::default();

    let mut reads = HashSet::new();
    let mut writes = HashSet::new();
    for id in 1..=200u64 {
        let addr = 0x40 * (id % 8);
        if id % 4 == 0 {
            writes.insert(id);
            io.insert_request(MemRequest::write(id, addr));
        } else {
            reads.insert(id);
            io.insert_request(MemRequest::read(id, addr));
        }
    }

    let mut returned = Vec::new();
    for _ in 0..20_000 {
        io.advance_one_cycle(&mut ledger);
        while let Some(req) = io.pop_request() {
            returned.push(req.id);
        }
        if io.is_idle() {
            break;
        }
    }
    assert!(io.is_idle(), "{}", io.dump());
    assert_eq!(reads.len(), returned.len());
    assert_eq!(reads, returned.into_iter().collect::<HashSet<_>>());
    let freed: HashSet<u64> = ledger.freed().iter().map(|req| req.id).collect();
    assert_eq!(writes.len(), ledger.freed_count());
    assert_eq!(writes, freed);
    assert_eq!(200, log.borrow().len());
    assert_eq!(0, io.pool().msgs.live());
    assert_eq!(0, io.cme.inflight());
    assert_eq!(0, io.cme.port().outstanding());
}
