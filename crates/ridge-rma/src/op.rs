//! Queued one-sided operations.
//!
//! An `Operation` is built by the window layer, handed to the engine one or
//! more times, and holds the requests the engine produced until the caller
//! has seen them complete.

use bytes::Bytes;
use zerocopy::{AsBytes, FromZeroes};

use ridge_core::layout::Datatype;
use ridge_core::wire::{
    AccOp, AccumPkt, CasPkt, ControlPkt, FopPkt, GetPkt, PacketHeader, PacketType, PktFlags,
    PutPkt, WireError, IMMED_BYTES,
};

use crate::error::IssueError;
use crate::immed;
use crate::request::{Request, ResultBuffer};

/// Fixed header of a queued operation, one variant per header shape.
#[derive(Debug, Clone, Copy)]
pub enum Packet {
    Put(PutPkt),
    Get(GetPkt),
    Accumulate(AccumPkt),
    GetAccumulate(AccumPkt),
    Cas(CasPkt),
    FetchOp(FopPkt),
    /// Synchronization packets share the queue but are not issued here.
    Control(ControlPkt),
}

impl Packet {
    pub fn type_tag(&self) -> u8 {
        match self {
            Packet::Put(p) => p.type_tag(),
            Packet::Get(p) => p.type_tag(),
            Packet::Accumulate(p) | Packet::GetAccumulate(p) => p.type_tag(),
            Packet::Cas(p) => p.type_tag(),
            Packet::FetchOp(p) => p.type_tag(),
            Packet::Control(p) => p.type_tag(),
        }
    }

    pub fn packet_type(&self) -> Result<PacketType, WireError> {
        PacketType::try_from(self.type_tag())
    }

    pub fn flags(&self) -> PktFlags {
        match self {
            Packet::Put(p) => p.flags(),
            Packet::Get(p) => p.flags(),
            Packet::Accumulate(p) | Packet::GetAccumulate(p) => p.flags(),
            Packet::Cas(p) => p.flags(),
            Packet::FetchOp(p) => p.flags(),
            Packet::Control(p) => p.flags(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Packet::Put(p) => p.as_bytes(),
            Packet::Get(p) => p.as_bytes(),
            Packet::Accumulate(p) | Packet::GetAccumulate(p) => p.as_bytes(),
            Packet::Cas(p) => p.as_bytes(),
            Packet::FetchOp(p) => p.as_bytes(),
            Packet::Control(p) => p.as_bytes(),
        }
    }
}

/// Local data an operation sends.
#[derive(Debug, Clone)]
pub struct Origin {
    pub data: Bytes,
    pub count: usize,
    pub datatype: Datatype,
}

impl Origin {
    pub fn new(data: impl Into<Bytes>, count: usize, datatype: impl Into<Datatype>) -> Self {
        Self {
            data: data.into(),
            count,
            datatype: datatype.into(),
        }
    }

    /// No data, for fetch-only operations.
    pub fn empty(datatype: impl Into<Datatype>) -> Self {
        Self::new(Bytes::new(), 0, datatype)
    }

    pub fn byte_len(&self) -> usize {
        self.count * self.datatype.size()
    }
}

/// Where in the peer's window the operation lands.
#[derive(Debug, Clone)]
pub struct Target {
    pub rank: u32,
    pub win: u32,
    /// Byte displacement into the window.
    pub disp: u64,
    pub count: usize,
    pub datatype: Datatype,
}

impl Target {
    pub fn new(rank: u32, disp: u64, count: usize, datatype: impl Into<Datatype>) -> Self {
        Self {
            rank,
            win: 0,
            disp,
            count,
            datatype: datatype.into(),
        }
    }

    pub fn with_win(mut self, win: u32) -> Self {
        self.win = win;
        self
    }

    pub fn byte_len(&self) -> usize {
        self.count * self.datatype.size()
    }
}

/// How far issuance of an operation has got.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StreamCursor {
    #[default]
    NotStarted,
    /// This many units are on the wire.
    InProgress(usize),
    AllIssued,
}

impl StreamCursor {
    /// Index of the next unit to issue, or `None` when nothing is left.
    pub fn next_unit(self) -> Option<usize> {
        match self {
            StreamCursor::NotStarted => Some(0),
            StreamCursor::InProgress(n) => Some(n),
            StreamCursor::AllIssued => None,
        }
    }

    pub(crate) fn advance(&mut self, issued: usize, unit_count: usize) {
        *self = if issued >= unit_count {
            StreamCursor::AllIssued
        } else {
            StreamCursor::InProgress(issued)
        };
    }
}

/// Requests an operation holds.
#[derive(Debug, Default)]
pub enum OpRequests {
    #[default]
    None,
    Single(Request),
    /// One slot per streaming unit.
    Multi(Vec<Option<Request>>),
}

impl OpRequests {
    /// Size the slots for `unit_count` units if nothing is held yet.
    pub(crate) fn reserve(&mut self, unit_count: usize) -> Result<(), IssueError> {
        if unit_count > 1 && matches!(self, OpRequests::None) {
            let mut slots = Vec::new();
            slots
                .try_reserve_exact(unit_count)
                .map_err(|_| IssueError::NoMem("request slots"))?;
            slots.resize(unit_count, None);
            *self = OpRequests::Multi(slots);
        }
        Ok(())
    }

    pub(crate) fn store(&mut self, index: usize, req: Request) {
        match self {
            OpRequests::Multi(slots) if index < slots.len() => slots[index] = Some(req),
            _ => *self = OpRequests::Single(req),
        }
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &Request> {
        let (single, multi) = match self {
            OpRequests::None => (None, &[][..]),
            OpRequests::Single(r) => (Some(r), &[][..]),
            OpRequests::Multi(slots) => (None, &slots[..]),
        };
        single.into_iter().chain(multi.iter().flatten())
    }
}

#[derive(Debug)]
pub struct Operation {
    pub packet: Packet,
    pub origin: Origin,
    pub target: Target,
    pub result: Option<ResultBuffer>,
    pub(crate) cursor: StreamCursor,
    pub(crate) requests: OpRequests,
}

// ── Constructors ──────────────────────────────────────────────────────────────

fn fits_inline(bytes: usize, layouts: &[&Datatype]) -> bool {
    bytes <= IMMED_BYTES && layouts.iter().all(|dt| dt.is_predefined())
}

fn inline_payload(origin: &Origin, len: usize) -> Result<[u8; IMMED_BYTES], IssueError> {
    let mut immed = [0u8; IMMED_BYTES];
    immed::copy(&origin.data, &mut immed, len)?;
    Ok(immed)
}

impl Operation {
    fn new(packet: Packet, origin: Origin, target: Target, result: Option<ResultBuffer>) -> Self {
        Self {
            packet,
            origin,
            target,
            result,
            cursor: StreamCursor::NotStarted,
            requests: OpRequests::None,
        }
    }

    pub fn put(origin: Origin, target: Target) -> Result<Self, IssueError> {
        let len = origin.byte_len();
        let mut pkt = PutPkt::new_zeroed();
        pkt.target_rank = target.rank;
        pkt.target_win = target.win;
        pkt.target_disp = target.disp;
        pkt.count = target.count as u64;
        pkt.datatype = target.datatype.wire_id();
        if fits_inline(len, &[&origin.datatype, &target.datatype]) {
            pkt.pkt_type = PacketType::PutImmed.into();
            pkt.immed_len = len as u8;
            pkt.immed = inline_payload(&origin, len)?;
        } else {
            pkt.pkt_type = PacketType::Put.into();
        }
        Ok(Self::new(Packet::Put(pkt), origin, target, None))
    }

    /// Read `target` into `dest`.
    pub fn get(dest: ResultBuffer, target: Target) -> Self {
        let mut pkt = GetPkt::new_zeroed();
        pkt.pkt_type = PacketType::Get.into();
        pkt.target_rank = target.rank;
        pkt.target_win = target.win;
        pkt.target_disp = target.disp;
        pkt.count = target.count as u64;
        pkt.datatype = target.datatype.wire_id();
        let origin = Origin::empty(dest.datatype.clone());
        Self::new(Packet::Get(pkt), origin, target, Some(dest))
    }

    pub fn accumulate(origin: Origin, target: Target, op: AccOp) -> Result<Self, IssueError> {
        let len = origin.byte_len();
        let mut pkt = accum_header(&target, op);
        if fits_inline(len, &[&origin.datatype, &target.datatype]) {
            pkt.pkt_type = PacketType::AccumulateImmed.into();
            pkt.immed_len = len as u8;
            pkt.immed = inline_payload(&origin, len)?;
        } else {
            pkt.pkt_type = PacketType::Accumulate.into();
        }
        Ok(Self::new(Packet::Accumulate(pkt), origin, target, None))
    }

    /// With `AccOp::NoOp` the origin is ignored and may be `Origin::empty`.
    pub fn get_accumulate(
        origin: Origin,
        target: Target,
        result: ResultBuffer,
        op: AccOp,
    ) -> Result<Self, IssueError> {
        let origin = if op == AccOp::NoOp {
            Origin::empty(origin.datatype)
        } else {
            origin
        };
        let len = target.byte_len();
        let mut pkt = accum_header(&target, op);
        if fits_inline(len, &[&origin.datatype, &target.datatype, &result.datatype]) {
            pkt.pkt_type = PacketType::GetAccumImmed.into();
            pkt.immed_len = origin.byte_len() as u8;
            pkt.immed = inline_payload(&origin, origin.byte_len())?;
        } else {
            pkt.pkt_type = PacketType::GetAccum.into();
        }
        Ok(Self::new(Packet::GetAccumulate(pkt), origin, target, Some(result)))
    }

    /// Swap in `origin` if the target element equals `compare`.
    pub fn compare_and_swap(
        origin: Origin,
        compare: &[u8],
        target: Target,
        result: ResultBuffer,
    ) -> Result<Self, IssueError> {
        if !target.datatype.is_predefined() {
            return Err(IssueError::InvalidLayout("compare-and-swap needs a predefined type"));
        }
        let len = target.datatype.size();
        if len > IMMED_BYTES {
            return Err(WireError::ImmedTooLarge(len).into());
        }
        let mut pkt = CasPkt::new_zeroed();
        pkt.pkt_type = PacketType::CasImmed.into();
        pkt.immed_len = len as u8;
        pkt.target_rank = target.rank;
        pkt.target_win = target.win;
        pkt.target_disp = target.disp;
        pkt.datatype = target.datatype.wire_id();
        pkt.origin = inline_payload(&origin, len)?;
        let mut cmp = [0u8; IMMED_BYTES];
        immed::copy(compare, &mut cmp, len)?;
        pkt.compare = cmp;
        Ok(Self::new(Packet::Cas(pkt), origin, target, Some(result)))
    }

    /// Apply `op` to a single target element and fetch its old value.
    pub fn fetch_and_op(
        origin: Origin,
        target: Target,
        result: ResultBuffer,
        op: AccOp,
    ) -> Result<Self, IssueError> {
        if !target.datatype.is_predefined() {
            return Err(IssueError::InvalidLayout("fetch-and-op needs a predefined type"));
        }
        let origin = if op == AccOp::NoOp {
            Origin::empty(origin.datatype)
        } else {
            origin
        };
        let len = target.datatype.size();
        let mut pkt = FopPkt::new_zeroed();
        pkt.target_rank = target.rank;
        pkt.target_win = target.win;
        pkt.target_disp = target.disp;
        pkt.datatype = target.datatype.wire_id();
        pkt.op = op as u8;
        if len <= IMMED_BYTES {
            pkt.pkt_type = PacketType::FopImmed.into();
            pkt.immed_len = origin.byte_len().min(len) as u8;
            pkt.immed = inline_payload(&origin, pkt.immed_len as usize)?;
        } else {
            pkt.pkt_type = PacketType::Fop.into();
        }
        Ok(Self::new(Packet::FetchOp(pkt), origin, target, Some(result)))
    }

    /// A synchronization packet. Handing one to the engine is an error.
    pub fn control(kind: PacketType, target: Target) -> Self {
        let mut pkt = ControlPkt::new_zeroed();
        pkt.pkt_type = kind.into();
        pkt.target_rank = target.rank;
        pkt.target_win = target.win;
        let origin = Origin::empty(target.datatype.clone());
        Self::new(Packet::Control(pkt), origin, target, None)
    }

    // ── State ─────────────────────────────────────────────────────────────────

    pub fn cursor(&self) -> StreamCursor {
        self.cursor
    }

    pub fn is_fully_issued(&self) -> bool {
        self.cursor == StreamCursor::AllIssued
    }

    pub fn requests(&self) -> &OpRequests {
        &self.requests
    }

    /// Drop every request this operation holds, slot by slot.
    /// Returns how many were released.
    pub fn release_requests(&mut self) -> usize {
        match std::mem::take(&mut self.requests) {
            OpRequests::None => 0,
            OpRequests::Single(_) => 1,
            OpRequests::Multi(mut slots) => {
                let mut released = 0;
                for slot in slots.iter_mut() {
                    if slot.take().is_some() {
                        released += 1;
                    }
                }
                released
            }
        }
    }

    /// True when every held request has completed.
    pub fn is_complete(&self) -> bool {
        self.is_fully_issued() && self.requests.iter().all(Request::is_complete)
    }
}

fn accum_header(target: &Target, op: AccOp) -> AccumPkt {
    let mut pkt = AccumPkt::new_zeroed();
    pkt.target_rank = target.rank;
    pkt.target_win = target.win;
    pkt.target_disp = target.disp;
    pkt.count = target.count as u64;
    pkt.datatype = target.datatype.wire_id();
    pkt.op = op as u8;
    pkt
}
