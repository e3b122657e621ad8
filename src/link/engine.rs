use std::cmp::Reverse;
use std::collections::VecDeque;
use std::fmt::Write;

use log::debug;
use serde::Serialize;
use smallvec::SmallVec;

use crate::link::config::{Framing, LinkConfig, VC_COUNT};
use crate::link::message::{Flit, FlitId, LinkPool, Message, MsgId, MsgStage, VcId};
use crate::link::vc::VcBuffer;
use crate::sim::request::MemRequest;
use crate::timeq::{Cycle, SerialChannel};

/// Which end of the link an engine sits on.  Decides which request kinds carry data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkSide {
    Host,
    Device,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct LinkStats {
    pub pushed: [u64; VC_COUNT],
    pub push_refused: u64,
    pub credit_stalls: u64,
    pub txdll_stalls: u64,
    pub replay_stalls: u64,
    pub data_msgs_spawned: u64,
    pub units_sent: u64,
    pub bytes_sent: u64,
    pub units_received: u64,
    pub delivered: [u64; VC_COUNT],
    pub peak_rxvc: [u32; VC_COUNT],
    pub phys_busy_until: Cycle,
}

/// The hooks a device role plugs into the shared pipeline.
pub trait LinkRole {
    fn link_mut(&mut self) -> &mut LinkEngine;

    /// Feed newly eligible requests into the transmit path.
    fn start_transaction(&mut self, pool: &mut LinkPool);

    /// Take fully received requests out of the receive path.
    fn end_transaction(&mut self, pool: &mut LinkPool);

    /// Receive side first so a request completed this cycle can be sent in the same cycle.
    fn advance_one_cycle(&mut self, peer: &mut LinkEngine, pool: &mut LinkPool) {
        self.link_mut().receive(pool);
        self.end_transaction(pool);
        self.link_mut().transmit(peer, pool);
        self.start_transaction(pool);
        self.link_mut().tick();
    }
}

/// One end of a CXL link: transaction, data-link and physical layers for both directions.
#[derive(Debug)]
pub struct LinkEngine {
    name: &'static str,
    side: LinkSide,
    cfg: LinkConfig,
    cycle: Cycle,

    txvc: [VcBuffer; VC_COUNT],
    rxvc: [VcBuffer; VC_COUNT],
    // messages past the transaction layer, waiting to be framed
    txdll_q: VecDeque<MsgId>,
    // framed units, in flight until the peer's physical layer takes them
    replay: VecDeque<FlitId>,
    rxphys_q: VecDeque<FlitId>,
    rxdll_q: VecDeque<FlitId>,
    phys: SerialChannel,
    rr: usize,
    last_tx_vc: Option<VcId>,
    last_rx_phys_end: Cycle,

    // flit framing: messages sent to / released from the peer per VC
    sent: [u64; VC_COUNT],
    released: [u64; VC_COUNT],
    // packet framing: byte credits granted by the peer, and credits owed to it
    credit_bytes: [u32; VC_COUNT],
    pending_fc: [u32; VC_COUNT],

    pub stats: LinkStats,
}

impl LinkEngine {
    pub fn new(name: &'static str, side: LinkSide, cfg: &LinkConfig) -> Self {
        let (tx_cap, rx_cap) = match cfg.framing {
            Framing::Flit => (cfg.txvc_capacity, cfg.rxvc_capacity),
            Framing::Packet => (cfg.vc_capacity_bytes, cfg.vc_capacity_bytes),
        };
        Self {
            name,
            side,
            cfg: cfg.clone(),
            cycle: 0,
            txvc: [VcBuffer::new(tx_cap), VcBuffer::new(tx_cap)],
            rxvc: [VcBuffer::new(rx_cap), VcBuffer::new(rx_cap)],
            txdll_q: VecDeque::new(),
            replay: VecDeque::new(),
            rxphys_q: VecDeque::new(),
            rxdll_q: VecDeque::new(),
            phys: SerialChannel::new(cfg.bytes_per_cycle()),
            rr: 0,
            last_tx_vc: None,
            last_rx_phys_end: 0,
            sent: [0; VC_COUNT],
            released: [0; VC_COUNT],
            credit_bytes: [cfg.vc_capacity_bytes; VC_COUNT],
            pending_fc: [0; VC_COUNT],
            stats: LinkStats::default(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn cycle(&self) -> Cycle {
        self.cycle
    }

    pub fn tick(&mut self) {
        self.cycle += 1;
    }

    pub fn txvc(&self, vc: VcId) -> &VcBuffer {
        &self.txvc[vc.index()]
    }

    pub fn rxvc(&self, vc: VcId) -> &VcBuffer {
        &self.rxvc[vc.index()]
    }

    pub fn credit_bytes(&self, vc: VcId) -> u32 {
        self.credit_bytes[vc.index()]
    }

    /// Messages on `vc` this end sent that the peer has not yet released.
    pub fn unreleased(&self, vc: VcId, peer: &LinkEngine) -> u64 {
        self.sent[vc.index()] - peer.released[vc.index()]
    }

    /// VC picked by the most recent transaction-layer transfer, if one happened this cycle.
    pub fn last_tx_vc(&self) -> Option<VcId> {
        self.last_tx_vc
    }

    pub fn is_idle(&self) -> bool {
        self.txvc.iter().all(VcBuffer::is_empty)
            && self.rxvc.iter().all(VcBuffer::is_empty)
            && self.txdll_q.is_empty()
            && self.replay.is_empty()
            && self.rxphys_q.is_empty()
            && self.rxdll_q.is_empty()
    }

    fn carries_data(&self, req: &MemRequest) -> bool {
        match self.side {
            LinkSide::Host => req.is_write(),
            LinkSide::Device => !req.is_write(),
        }
    }

    fn message_bytes(&self, carries_data: bool) -> u32 {
        match self.cfg.framing {
            Framing::Flit => self.cfg.header_bytes,
            Framing::Packet if carries_data => self.cfg.header_bytes + self.cfg.data_bytes,
            Framing::Packet => self.cfg.header_bytes,
        }
    }

    // VC occupancy cost of a message: one slot per message, or its size under byte credits
    fn vc_cost(&self, msg: &Message) -> u32 {
        match self.cfg.framing {
            Framing::Flit => 1,
            Framing::Packet => msg.bytes,
        }
    }

    fn choose_vc(&self, carries_data: bool) -> VcId {
        match self.cfg.framing {
            Framing::Flit if carries_data => VcId::WithData,
            Framing::Flit => VcId::WithoutData,
            Framing::Packet => {
                // most spare capacity, ties to the lowest index
                VcId::ALL
                    .into_iter()
                    .max_by_key(|vc| (self.txvc[vc.index()].remaining(), Reverse(vc.index())))
                    .unwrap_or(VcId::WithoutData)
            }
        }
    }

    /// Enqueue a request for transmission.  A full TX VC hands the request back untouched.
    pub fn push_outbound(
        &mut self,
        req: MemRequest,
        pool: &mut LinkPool,
    ) -> Result<(), MemRequest> {
        let carries_data = self.carries_data(&req);
        let bytes = self.message_bytes(carries_data);
        let cost = match self.cfg.framing {
            Framing::Flit => 1,
            Framing::Packet => bytes,
        };
        let vc = self.choose_vc(carries_data);
        if !self.txvc[vc.index()].has_room(cost) {
            self.stats.push_refused += 1;
            return Err(req);
        }

        let uid = pool.msgs.next_uid();
        debug!(
            "{} cycle {}: {} -> {:?} as <MSG {}>",
            self.name, self.cycle, req, vc, uid
        );
        let id = pool
            .msgs
            .acquire(Message::new(uid, vc, bytes, req))
            .expect("message pool is unbounded");
        self.txvc[vc.index()].push(id, cost);
        self.stats.pushed[vc.index()] += 1;
        Ok(())
    }

    /// Next fully received request.  Fuller VCs are looked at first; a VC whose head is not ready
    /// is skipped rather than blocking the other.
    pub fn pull_inbound(&mut self, pool: &mut LinkPool) -> Option<MemRequest> {
        let mut order = VcId::ALL;
        order.sort_by_key(|vc| Reverse(self.rxvc[vc.index()].used()));

        for vc in order {
            let Some(head) = self.rxvc[vc.index()].front() else {
                continue;
            };
            let msg = pool.msg(head);
            if msg.rxtrans_end > self.cycle || !msg.all_children_arrived() {
                continue;
            }

            self.rxvc[vc.index()].pop();
            let mut msg = pool.msgs.release(head);
            match self.cfg.framing {
                Framing::Flit => self.released[vc.index()] += 1,
                Framing::Packet => self.pending_fc[vc.index()] += msg.bytes,
            }
            self.stats.delivered[vc.index()] += 1;
            let req = msg
                .req
                .take()
                .unwrap_or_else(|| panic!("{}: data message <MSG {}> in RX VC", self.name, msg.uid));
            debug!("{} cycle {}: delivered {}", self.name, self.cycle, req);
            return Some(req);
        }
        None
    }

    /// Receive half of a cycle: physical arrivals into the DLL, DLL into the RX VCs.
    pub fn receive(&mut self, pool: &mut LinkPool) {
        self.rxphys(pool);
        self.rxdll(pool);
    }

    /// Transmit half of a cycle: wire, framing, transaction layer, then owed credits.
    pub fn transmit(&mut self, peer: &mut LinkEngine, pool: &mut LinkPool) {
        self.txphys(peer, pool);
        self.txdll(pool);
        self.txtrans(peer, pool);
        self.flush_credits(peer);
    }

    fn has_peer_credit(&self, vc: VcId, cost: u32, peer: &LinkEngine) -> bool {
        match self.cfg.framing {
            Framing::Flit => self.unreleased(vc, peer) < peer.cfg.rxvc_capacity as u64,
            Framing::Packet => self.credit_bytes[vc.index()] >= cost,
        }
    }

    fn txtrans(&mut self, peer: &LinkEngine, pool: &mut LinkPool) {
        self.last_tx_vc = None;
        for k in 0..VC_COUNT {
            let vc = VcId::from_index((self.rr + k) % VC_COUNT);
            let Some(head) = self.txvc[vc.index()].front() else {
                continue;
            };
            let cost = self.vc_cost(pool.msg(head));
            let children = match (self.cfg.framing, vc) {
                (Framing::Flit, VcId::WithData) => self.cfg.data_msgs_per_req as usize,
                _ => 0,
            };
            if !self.has_peer_credit(vc, cost, peer) {
                self.stats.credit_stalls += 1;
                continue;
            }
            if self.txdll_q.len() + 1 + children > self.cfg.txdll_capacity {
                self.stats.txdll_stalls += 1;
                continue;
            }

            self.txvc[vc.index()].pop();
            let ready = self.cycle + self.cfg.trans_latency;
            let msg = pool.msg_mut(head);
            msg.txtrans_end = ready;
            msg.stage = MsgStage::TxDll;
            self.txdll_q.push_back(head);
            match self.cfg.framing {
                Framing::Flit => self.sent[vc.index()] += 1,
                Framing::Packet => self.credit_bytes[vc.index()] -= cost,
            }

            let data_bytes = self.cfg.data_msg_bytes();
            for _ in 0..children {
                let uid = pool.msgs.next_uid();
                let child = pool
                    .msgs
                    .acquire(Message::data_child(uid, vc, data_bytes, head, ready))
                    .expect("message pool is unbounded");
                pool.msg_mut(head).children.push(child);
                self.txdll_q.push_back(child);
            }
            self.stats.data_msgs_spawned += children as u64;
            self.last_tx_vc = Some(vc);
            break;
        }
        self.rr = (self.rr + 1) % VC_COUNT;
    }

    // Form at most one transfer unit per cycle out of messages whose transaction stage is done.
    fn txdll(&mut self, pool: &mut LinkPool) {
        if self.replay.len() >= self.cfg.replay_capacity {
            if !self.txdll_q.is_empty() {
                self.stats.replay_stalls += 1;
            }
            return;
        }

        let mut msgs: SmallVec<[MsgId; 4]> = SmallVec::new();
        let bytes = match self.cfg.framing {
            Framing::Flit => {
                let mut data_slots = 0;
                while msgs.len() < self.cfg.max_msgs_per_flit {
                    let Some(&front) = self.txdll_q.front() else {
                        break;
                    };
                    let msg = pool.msg(front);
                    if msg.txtrans_end > self.cycle {
                        break;
                    }
                    if msg.is_data() {
                        if data_slots == self.cfg.data_slots_per_flit {
                            break;
                        }
                        data_slots += 1;
                    }
                    self.txdll_q.pop_front();
                    msgs.push(front);
                }
                self.cfg.flit_bytes
            }
            Framing::Packet => match self.txdll_q.front() {
                Some(&front) if pool.msg(front).txtrans_end <= self.cycle => {
                    self.txdll_q.pop_front();
                    msgs.push(front);
                    pool.msg(front).bytes
                }
                _ => 0,
            },
        };
        if msgs.is_empty() {
            return;
        }

        for &msg in &msgs {
            pool.msg_mut(msg).stage = MsgStage::Replay;
        }
        let uid = pool.flits.next_uid();
        let unit = pool
            .flits
            .acquire(Flit::new(uid, bytes, msgs, self.cycle + self.cfg.dll_latency))
            .expect("flit pool is unbounded");
        self.replay.push_back(unit);
    }

    fn txphys(&mut self, peer: &mut LinkEngine, pool: &mut LinkPool) {
        // hand finished units to the peer, oldest first
        while let Some(&front) = self.replay.front() {
            let done = pool
                .flit(front)
                .phys_end
                .is_some_and(|end| end <= self.cycle);
            if !done || !peer.has_phys_room() {
                break;
            }
            self.replay.pop_front();
            let bytes = pool.flit(front).bytes;
            self.stats.units_sent += 1;
            self.stats.bytes_sent += bytes as u64;
            peer.insert_phys(front, self.cycle, pool);
        }

        // put framed units on the wire in order; each starts after the previous one finished
        for &unit in &self.replay {
            let flit = pool.flit_mut(unit);
            if flit.phys_end.is_some() {
                continue;
            }
            if flit.txdll_end > self.cycle {
                break;
            }
            flit.phys_end = Some(self.phys.schedule(self.cycle, flit.bytes));
        }
        self.stats.phys_busy_until = self.phys.watermark();
    }

    fn flush_credits(&mut self, peer: &mut LinkEngine) {
        for vc in VcId::ALL {
            let bytes = std::mem::take(&mut self.pending_fc[vc.index()]);
            if bytes > 0 {
                peer.update_credit(vc, bytes);
            }
        }
    }

    /// Byte credits returned by the peer after it released `bytes` from its RX VC.
    pub fn update_credit(&mut self, vc: VcId, bytes: u32) {
        let credit = &mut self.credit_bytes[vc.index()];
        *credit += bytes;
        assert!(
            *credit <= self.cfg.vc_capacity_bytes,
            "{}: credit on {:?} exceeds advertised capacity ({} > {})",
            self.name,
            vc,
            credit,
            self.cfg.vc_capacity_bytes
        );
    }

    pub fn has_phys_room(&self) -> bool {
        self.rxphys_q.len() < self.cfg.phys_capacity
    }

    /// Physical arrival of a unit sent by the peer at cycle `sent_at`.
    pub fn insert_phys(&mut self, unit: FlitId, sent_at: Cycle, pool: &mut LinkPool) {
        assert!(self.has_phys_room(), "{}: RX physical queue overflow", self.name);
        let flit = pool.flit_mut(unit);
        let phys_end = flit.phys_end.unwrap_or(sent_at);
        assert!(
            phys_end >= self.last_rx_phys_end,
            "{}: <FLIT {}> overtook an earlier unit on the wire",
            self.name,
            flit.uid
        );
        self.last_rx_phys_end = phys_end;
        flit.phys_arrival = sent_at + self.cfg.phys_latency;
        let msgs = flit.msgs.clone();
        for msg in msgs {
            pool.msg_mut(msg).stage = MsgStage::RxPhys;
        }
        self.rxphys_q.push_back(unit);
        self.stats.units_received += 1;
    }

    fn rxphys(&mut self, pool: &mut LinkPool) {
        while let Some(&front) = self.rxphys_q.front() {
            if pool.flit(front).phys_arrival > self.cycle {
                break;
            }
            self.rxphys_q.pop_front();
            let flit = pool.flit_mut(front);
            flit.rxdll_end = self.cycle + self.cfg.dll_latency;
            let msgs = flit.msgs.clone();
            for msg in msgs {
                pool.msg_mut(msg).stage = MsgStage::RxDll;
            }
            self.rxdll_q.push_back(front);
        }
    }

    fn rxdll(&mut self, pool: &mut LinkPool) {
        while let Some(&front) = self.rxdll_q.front() {
            if pool.flit(front).rxdll_end > self.cycle {
                break;
            }
            self.rxdll_q.pop_front();
            let flit = pool.flits.release(front);
            let ready = self.cycle + self.cfg.trans_latency;
            for id in flit.msgs {
                let parent = pool.msg(id).parent;
                if let Some(parent) = parent {
                    let parent = pool.msg_mut(parent);
                    parent.children_arrived += 1;
                    parent.rxtrans_end = parent.rxtrans_end.max(ready);
                    pool.msgs.release(id);
                    continue;
                }

                let msg = pool.msg_mut(id);
                msg.rxtrans_end = ready;
                msg.stage = MsgStage::RxVc;
                let vc = msg.vc;
                let cost = self.vc_cost(pool.msg(id));
                if !self.rxvc[vc.index()].has_room(cost) {
                    panic!(
                        "{}: RX VC {:?} overflow receiving {}\n{}",
                        self.name,
                        vc,
                        pool.msg(id),
                        self.dump(pool)
                    );
                }
                self.rxvc[vc.index()].push(id, cost);
                let peak = &mut self.stats.peak_rxvc[vc.index()];
                *peak = (*peak).max(self.rxvc[vc.index()].used());
            }
        }
    }

    pub fn dump(&self, pool: &LinkPool) -> String {
        let mut out = format!("=== {} @ cycle {} ===\n", self.name, self.cycle);
        for vc in VcId::ALL {
            for (dir, buf) in [("TX", &self.txvc[vc.index()]), ("RX", &self.rxvc[vc.index()])] {
                let _ = writeln!(
                    out,
                    "{} VC {:?}: {}/{}",
                    dir,
                    vc,
                    buf.used(),
                    buf.capacity()
                );
                for id in buf.iter() {
                    let _ = writeln!(out, "  {}", pool.msg(id));
                }
            }
        }
        let _ = writeln!(out, "TX DLL ({})", self.txdll_q.len());
        for &id in &self.txdll_q {
            let _ = writeln!(out, "  {}", pool.msg(id));
        }
        for (label, queue) in [
            ("replay", &self.replay),
            ("RX phys", &self.rxphys_q),
            ("RX DLL", &self.rxdll_q),
        ] {
            let _ = writeln!(out, "{} ({})", label, queue.len());
            for &unit in queue {
                out.push_str(&pool.dump_flit(unit));
            }
        }
        out
    }
}
