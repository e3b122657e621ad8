use std::fmt::{self, Write};

use smallvec::SmallVec;

use crate::base::{SlotId, SlotPool};
use crate::sim::request::MemRequest;
use crate::timeq::Cycle;

pub type MsgId = SlotId;
pub type FlitId = SlotId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum VcId {
    /// command / read channel
    WithoutData = 0,
    /// write / data channel
    WithData = 1,
}

impl VcId {
    pub const ALL: [VcId; 2] = [VcId::WithoutData, VcId::WithData];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Self {
        Self::ALL[index]
    }
}

/// Which structure a message currently sits in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgStage {
    TxVc,
    TxDll,
    Replay,
    RxPhys,
    RxDll,
    RxVc,
}

/// Link-layer envelope of one request, or a data child carrying part of a parent's payload.
#[derive(Debug)]
pub struct Message {
    pub uid: u64,
    pub vc: VcId,
    pub bytes: u32,
    pub req: Option<MemRequest>,
    pub stage: MsgStage,
    pub txtrans_end: Cycle,
    pub rxtrans_end: Cycle,
    pub parent: Option<MsgId>,
    pub children: SmallVec<[MsgId; 4]>,
    pub children_arrived: u32,
}

impl Message {
    pub fn new(uid: u64, vc: VcId, bytes: u32, req: MemRequest) -> Self {
        Self {
            uid,
            vc,
            bytes,
            req: Some(req),
            stage: MsgStage::TxVc,
            txtrans_end: 0,
            rxtrans_end: 0,
            parent: None,
            children: SmallVec::new(),
            children_arrived: 0,
        }
    }

    pub fn data_child(uid: u64, vc: VcId, bytes: u32, parent: MsgId, txtrans_end: Cycle) -> Self {
        Self {
            uid,
            vc,
            bytes,
            req: None,
            stage: MsgStage::TxDll,
            txtrans_end,
            rxtrans_end: 0,
            parent: Some(parent),
            children: SmallVec::new(),
            children_arrived: 0,
        }
    }

    pub fn is_data(&self) -> bool {
        self.parent.is_some()
    }

    pub fn all_children_arrived(&self) -> bool {
        self.children_arrived as usize == self.children.len()
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let addr = self.req.as_ref().map_or(0, |req| req.addr);
        write!(
            f,
            "<MSG {}> addr: {:#x} channel: {:?} stage: {:?}",
            self.uid, addr, self.vc, self.stage
        )?;
        if self.is_data() {
            write!(f, " (data)")?;
        }
        Ok(())
    }
}

/// Physical-layer transfer unit.  In packet framing it carries exactly one message.
#[derive(Debug)]
pub struct Flit {
    pub uid: u64,
    pub bytes: u32,
    pub msgs: SmallVec<[MsgId; 4]>,
    pub txdll_end: Cycle,
    pub phys_end: Option<Cycle>,
    pub phys_arrival: Cycle,
    pub rxdll_end: Cycle,
}

impl Flit {
    pub fn new(uid: u64, bytes: u32, msgs: SmallVec<[MsgId; 4]>, txdll_end: Cycle) -> Self {
        Self {
            uid,
            bytes,
            msgs,
            txdll_end,
            phys_end: None,
            phys_arrival: 0,
            rxdll_end: 0,
        }
    }
}

/// Message and flit pools shared by both ends of a link.
#[derive(Debug)]
pub struct LinkPool {
    pub msgs: SlotPool<Message>,
    pub flits: SlotPool<Flit>,
}

impl Default for LinkPool {
    fn default() -> Self {
        Self {
            msgs: SlotPool::unbounded("message pool"),
            flits: SlotPool::unbounded("flit pool"),
        }
    }
}

impl LinkPool {
    pub fn msg(&self, id: MsgId) -> &Message {
        self.msgs.get(id)
    }

    pub fn msg_mut(&mut self, id: MsgId) -> &mut Message {
        self.msgs.get_mut(id)
    }

    pub fn flit(&self, id: FlitId) -> &Flit {
        self.flits.get(id)
    }

    pub fn flit_mut(&mut self, id: FlitId) -> &mut Flit {
        self.flits.get_mut(id)
    }

    pub fn dump_flit(&self, id: FlitId) -> String {
        let flit = self.flit(id);
        let mut out = format!("====== <FLIT {}> {}B\n", flit.uid, flit.bytes);
        for &msg in &flit.msgs {
            let _ = writeln!(out, "= {}", self.msg(msg));
        }
        out
    }
}
