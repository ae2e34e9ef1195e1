//! Ridge wire format: on-wire types for one-sided (RMA) traffic.
//!
//! Every RMA message starts with a fixed packet header whose first byte is
//! the packet type tag. When the target layout is derived, or the operation
//! is split into streaming units, an extended header follows the fixed
//! header. Payload bytes come last. Receivers decode strictly in that order.
//!
//! All types are #[repr(C, packed)] for deterministic layout and use
//! zerocopy derives for allocation-free serialization. Header sizes are
//! fixed per packet kind and never grow; anything variable travels in the
//! extended header.

use std::mem::size_of;

use bitflags::bitflags;
use static_assertions::assert_eq_size;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

// ── Constants ─────────────────────────────────────────────────────────────────

/// Bytes of origin data that fit directly inside a packet header.
/// Operations whose whole payload fits here are sent header-only.
pub const IMMED_BYTES: usize = 8;

// ── Packet Types ──────────────────────────────────────────────────────────────

/// Type tag carried in the first byte of every packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    Put = 0x01,
    PutImmed = 0x02,
    Get = 0x03,
    GetResp = 0x04,
    Accumulate = 0x05,
    AccumulateImmed = 0x06,
    GetAccum = 0x07,
    GetAccumImmed = 0x08,
    GetAccumResp = 0x09,
    /// Compare-and-swap always carries both values inline.
    CasImmed = 0x0a,
    CasResp = 0x0b,
    Fop = 0x0c,
    FopImmed = 0x0d,
    FopResp = 0x0e,
    Lock = 0x10,
    Unlock = 0x11,
    Flush = 0x12,
    Ack = 0x13,
    /// Rendezvous forms, chosen by the issuer when a header plus payload
    /// exceeds the connection's eager threshold.
    PutRndv = 0x14,
    AccumulateRndv = 0x15,
    GetAccumRndv = 0x16,
}

impl PacketType {
    /// True for the header-only forms whose payload lives in the header.
    pub fn is_immed(self) -> bool {
        matches!(
            self,
            PacketType::PutImmed
                | PacketType::AccumulateImmed
                | PacketType::GetAccumImmed
                | PacketType::CasImmed
                | PacketType::FopImmed
        )
    }

    /// True for packet types an operation can be queued as. Responses and
    /// synchronization packets travel through other paths, and rendezvous
    /// forms only appear once a unit is on its way out.
    pub fn is_issuable(self) -> bool {
        matches!(
            self,
            PacketType::Put
                | PacketType::PutImmed
                | PacketType::Get
                | PacketType::Accumulate
                | PacketType::AccumulateImmed
                | PacketType::GetAccum
                | PacketType::GetAccumImmed
                | PacketType::CasImmed
                | PacketType::Fop
                | PacketType::FopImmed
        )
    }

    /// The rendezvous form of an eager data-carrying packet, if it has one.
    pub fn rndv_form(self) -> Option<PacketType> {
        match self {
            PacketType::Put => Some(PacketType::PutRndv),
            PacketType::Accumulate => Some(PacketType::AccumulateRndv),
            PacketType::GetAccum => Some(PacketType::GetAccumRndv),
            _ => None,
        }
    }
}

impl TryFrom<u8> for PacketType {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(PacketType::Put),
            0x02 => Ok(PacketType::PutImmed),
            0x03 => Ok(PacketType::Get),
            0x04 => Ok(PacketType::GetResp),
            0x05 => Ok(PacketType::Accumulate),
            0x06 => Ok(PacketType::AccumulateImmed),
            0x07 => Ok(PacketType::GetAccum),
            0x08 => Ok(PacketType::GetAccumImmed),
            0x09 => Ok(PacketType::GetAccumResp),
            0x0a => Ok(PacketType::CasImmed),
            0x0b => Ok(PacketType::CasResp),
            0x0c => Ok(PacketType::Fop),
            0x0d => Ok(PacketType::FopImmed),
            0x0e => Ok(PacketType::FopResp),
            0x10 => Ok(PacketType::Lock),
            0x11 => Ok(PacketType::Unlock),
            0x12 => Ok(PacketType::Flush),
            0x13 => Ok(PacketType::Ack),
            0x14 => Ok(PacketType::PutRndv),
            0x15 => Ok(PacketType::AccumulateRndv),
            0x16 => Ok(PacketType::GetAccumRndv),
            other => Err(WireError::UnknownPacketType(other)),
        }
    }
}

impl From<PacketType> for u8 {
    fn from(t: PacketType) -> u8 {
        t as u8
    }
}

/// Read the type tag of an encoded message. The tag is always byte 0.
pub fn decode_type_tag(bytes: &[u8]) -> Result<PacketType, WireError> {
    let tag = *bytes.first().ok_or(WireError::Truncated { need: 1, have: 0 })?;
    PacketType::try_from(tag)
}

// ── Accumulate Operators ──────────────────────────────────────────────────────

/// Reduction operator applied at the target by accumulate-family packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AccOp {
    Sum = 0x01,
    Prod = 0x02,
    Max = 0x03,
    Min = 0x04,
    Land = 0x05,
    Band = 0x06,
    Lor = 0x07,
    Bor = 0x08,
    Lxor = 0x09,
    Bxor = 0x0a,
    MaxLoc = 0x0b,
    MinLoc = 0x0c,
    /// Not commutative: units must land in offset order.
    Replace = 0x0d,
    /// Fetch only. The origin carries no data.
    NoOp = 0x0e,
}

impl TryFrom<u8> for AccOp {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(AccOp::Sum),
            0x02 => Ok(AccOp::Prod),
            0x03 => Ok(AccOp::Max),
            0x04 => Ok(AccOp::Min),
            0x05 => Ok(AccOp::Land),
            0x06 => Ok(AccOp::Band),
            0x07 => Ok(AccOp::Lor),
            0x08 => Ok(AccOp::Bor),
            0x09 => Ok(AccOp::Lxor),
            0x0a => Ok(AccOp::Bxor),
            0x0b => Ok(AccOp::MaxLoc),
            0x0c => Ok(AccOp::MinLoc),
            0x0d => Ok(AccOp::Replace),
            0x0e => Ok(AccOp::NoOp),
            other => Err(WireError::UnknownOp(other)),
        }
    }
}

// ── Flags ─────────────────────────────────────────────────────────────────────

bitflags! {
    /// Synchronization and framing flags piggybacked on RMA packets.
    ///
    /// Lock bits may only ride on the first streaming unit of an operation,
    /// end bits (unlock, flush, decrement-at-counter) only on the last one.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct PktFlags: u16 {
        const LOCK_SHARED = 1 << 0;
        const LOCK_EXCLUSIVE = 1 << 1;
        const LOCK_NO_CHECK = 1 << 2;
        const UNLOCK = 1 << 3;
        const FLUSH = 1 << 4;
        const DECR_AT_COUNTER = 1 << 5;
        const REQ_ACK = 1 << 6;
        /// The packet is one unit of a streamed operation.
        const STREAM = 1 << 7;
        const IMMED_RESP = 1 << 8;

        /// Bits that begin a lock epoch.
        const LOCK_MASK = Self::LOCK_SHARED.bits()
            | Self::LOCK_EXCLUSIVE.bits()
            | Self::LOCK_NO_CHECK.bits();
        /// Bits that close an epoch or release a counter.
        const END_MASK = Self::UNLOCK.bits()
            | Self::FLUSH.bits()
            | Self::DECR_AT_COUNTER.bits();
    }
}

impl PktFlags {
    pub const NONE: Self = Self::empty();

    pub const fn has_lock(self) -> bool {
        self.intersects(Self::LOCK_MASK)
    }

    pub const fn has_end(self) -> bool {
        self.intersects(Self::END_MASK)
    }
}

// ── Packet Headers ────────────────────────────────────────────────────────────

/// Put header. Immediate puts carry up to IMMED_BYTES of payload inline.
///
/// Wire size: 48 bytes.
#[derive(Debug, Clone, Copy, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct PutPkt {
    pub pkt_type: u8,
    /// Valid bytes in `immed`. Zero for non-immediate puts.
    pub immed_len: u8,
    pub flags: u16,
    pub target_rank: u32,
    pub target_win: u32,
    /// Byte length of the target layout program carried in the extended
    /// header. Zero when the target layout is predefined.
    pub program_size: u32,
    /// Displacement into the target window, in bytes.
    pub target_disp: u64,
    /// Element count in units of the target layout.
    pub count: u64,
    /// Target layout identifier.
    pub datatype: u64,
    pub immed: [u8; IMMED_BYTES],
}

assert_eq_size!(PutPkt, [u8; 48]);

/// Get header. The response carries `request_handle` back so the origin
/// can find the destination buffer.
///
/// Wire size: 48 bytes.
#[derive(Debug, Clone, Copy, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct GetPkt {
    pub pkt_type: u8,
    /// 1 when the response exceeds the eager threshold of the connection.
    pub rndv_mode: u8,
    pub flags: u16,
    pub target_rank: u32,
    pub target_win: u32,
    pub program_size: u32,
    pub target_disp: u64,
    pub count: u64,
    pub datatype: u64,
    pub request_handle: u64,
}

assert_eq_size!(GetPkt, [u8; 48]);

/// Accumulate header, shared by accumulate and get-accumulate.
/// `request_handle` is only meaningful for get-accumulate.
///
/// Wire size: 64 bytes.
#[derive(Debug, Clone, Copy, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct AccumPkt {
    pub pkt_type: u8,
    pub immed_len: u8,
    pub flags: u16,
    pub target_rank: u32,
    pub target_win: u32,
    pub program_size: u32,
    pub target_disp: u64,
    pub count: u64,
    pub datatype: u64,
    pub request_handle: u64,
    /// `AccOp` discriminant.
    pub op: u8,
    pub _reserved: [u8; 7],
    pub immed: [u8; IMMED_BYTES],
}

assert_eq_size!(AccumPkt, [u8; 64]);

/// Compare-and-swap header. Both operands are always inline.
///
/// Wire size: 56 bytes.
#[derive(Debug, Clone, Copy, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct CasPkt {
    pub pkt_type: u8,
    pub immed_len: u8,
    pub flags: u16,
    pub target_rank: u32,
    pub target_win: u32,
    pub _reserved: u32,
    pub target_disp: u64,
    pub datatype: u64,
    pub request_handle: u64,
    pub origin: [u8; IMMED_BYTES],
    pub compare: [u8; IMMED_BYTES],
}

assert_eq_size!(CasPkt, [u8; 56]);

/// Fetch-and-op header. A single predefined element, inline when it fits.
///
/// Wire size: 48 bytes.
#[derive(Debug, Clone, Copy, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct FopPkt {
    pub pkt_type: u8,
    pub immed_len: u8,
    pub flags: u16,
    pub target_rank: u32,
    pub target_win: u32,
    pub op: u8,
    pub _reserved: [u8; 3],
    pub target_disp: u64,
    pub datatype: u64,
    pub request_handle: u64,
    pub immed: [u8; IMMED_BYTES],
}

assert_eq_size!(FopPkt, [u8; 48]);

/// Header of a get response. Only its size matters to the issuer, which
/// uses it to judge whether a get response fits the eager threshold.
///
/// Wire size: 16 bytes.
#[derive(Debug, Clone, Copy, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct GetRespPkt {
    pub pkt_type: u8,
    pub _reserved: u8,
    pub flags: u16,
    pub length: u32,
    pub request_handle: u64,
}

assert_eq_size!(GetRespPkt, [u8; 16]);

/// Lock, unlock, flush and ack packets. Queued next to RMA operations by
/// the synchronization layer but never issued by the RMA engine.
///
/// Wire size: 16 bytes.
#[derive(Debug, Clone, Copy, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct ControlPkt {
    pub pkt_type: u8,
    pub _pad: u8,
    pub flags: u16,
    pub target_rank: u32,
    pub target_win: u32,
    pub _reserved: u32,
}

assert_eq_size!(ControlPkt, [u8; 16]);

/// Rendezvous put: the put header with its tag switched, followed by the
/// number of payload bytes the target should expect.
///
/// Wire size: 56 bytes.
#[derive(Debug, Clone, Copy, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct PutRndvPkt {
    pub put: PutPkt,
    pub data_sz: u64,
}

assert_eq_size!(PutRndvPkt, [u8; 56]);

/// Rendezvous accumulate or get-accumulate.
///
/// Wire size: 72 bytes.
#[derive(Debug, Clone, Copy, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct AccumRndvPkt {
    pub accum: AccumPkt,
    pub data_sz: u64,
}

assert_eq_size!(AccumRndvPkt, [u8; 72]);

/// Rewrite an encoded eager header into its rendezvous form carrying
/// `data_sz` payload bytes. `Ok(None)` when the packet kind has no
/// rendezvous form.
pub fn rndv_header(header: &[u8], data_sz: u64) -> Result<Option<Vec<u8>>, WireError> {
    let kind = decode_type_tag(header)?;
    let Some(rndv) = kind.rndv_form() else {
        return Ok(None);
    };
    let truncated = |need: usize| WireError::Truncated {
        need,
        have: header.len(),
    };

    let bytes = match kind {
        PacketType::Put => {
            let mut put = PutPkt::read_from(header).ok_or_else(|| truncated(size_of::<PutPkt>()))?;
            put.pkt_type = rndv.into();
            PutRndvPkt { put, data_sz }.as_bytes().to_vec()
        }
        _ => {
            let mut accum =
                AccumPkt::read_from(header).ok_or_else(|| truncated(size_of::<AccumPkt>()))?;
            accum.pkt_type = rndv.into();
            AccumRndvPkt { accum, data_sz }.as_bytes().to_vec()
        }
    };
    Ok(Some(bytes))
}

/// Header fields every packet kind shares. Implemented for each header.
pub trait PacketHeader: AsBytes + FromBytes + Copy {
    fn type_tag(&self) -> u8;
    fn flags(&self) -> PktFlags;
    fn set_flags(&mut self, flags: PktFlags);

    fn packet_type(&self) -> Result<PacketType, WireError> {
        PacketType::try_from(self.type_tag())
    }
}

macro_rules! impl_packet_header {
    ($($t:ty),* $(,)?) => {
        $(
            impl PacketHeader for $t {
                fn type_tag(&self) -> u8 {
                    self.pkt_type
                }

                fn flags(&self) -> PktFlags {
                    PktFlags::from_bits_truncate(self.flags)
                }

                fn set_flags(&mut self, flags: PktFlags) {
                    self.flags = flags.bits();
                }
            }
        )*
    };
}

impl_packet_header!(PutPkt, GetPkt, AccumPkt, CasPkt, FopPkt, GetRespPkt, ControlPkt);

// ── Extended Headers ──────────────────────────────────────────────────────────

/// Target layout metadata copied into a derived extended header.
/// The serialized layout program follows the extended header directly.
///
/// Wire size: 72 bytes.
#[derive(Debug, Clone, Copy, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct LayoutInfo {
    pub is_contig: u8,
    pub has_sticky_lb: u8,
    pub has_sticky_ub: u8,
    /// `BasicType` discriminant of the underlying predefined element.
    pub basic_type: u8,
    pub program_depth: u32,
    pub program_size: u64,
    pub max_contig_blocks: u64,
    pub size: u64,
    pub extent: i64,
    pub lb: i64,
    pub ub: i64,
    pub true_lb: i64,
    pub true_ub: i64,
}

assert_eq_size!(LayoutInfo, [u8; 72]);

#[derive(Debug, Clone, Copy, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct PutDerivedExt {
    pub info: LayoutInfo,
}

#[derive(Debug, Clone, Copy, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct GetDerivedExt {
    pub info: LayoutInfo,
}

/// Streamed accumulate with a predefined target: only the unit offset.
#[derive(Debug, Clone, Copy, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct AccumStreamExt {
    pub stream_offset: u64,
}

#[derive(Debug, Clone, Copy, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct AccumDerivedExt {
    pub info: LayoutInfo,
}

#[derive(Debug, Clone, Copy, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct AccumStreamDerivedExt {
    pub stream_offset: u64,
    pub info: LayoutInfo,
}

#[derive(Debug, Clone, Copy, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct GetAccumStreamExt {
    pub stream_offset: u64,
}

#[derive(Debug, Clone, Copy, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct GetAccumDerivedExt {
    pub info: LayoutInfo,
}

#[derive(Debug, Clone, Copy, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct GetAccumStreamDerivedExt {
    pub stream_offset: u64,
    pub info: LayoutInfo,
}

assert_eq_size!(PutDerivedExt, [u8; 72]);
assert_eq_size!(GetDerivedExt, [u8; 72]);
assert_eq_size!(AccumStreamExt, [u8; 8]);
assert_eq_size!(AccumDerivedExt, [u8; 72]);
assert_eq_size!(AccumStreamDerivedExt, [u8; 80]);

// Get-accumulate reuses the accumulate extended headers byte for byte.
assert_eq_size!(GetAccumStreamExt, AccumStreamExt);
assert_eq_size!(GetAccumDerivedExt, AccumDerivedExt);
assert_eq_size!(GetAccumStreamDerivedExt, AccumStreamDerivedExt);

/// Whether a packet needs an extended header after its fixed header: a
/// derived target layout, or more than one streaming unit.
pub fn needs_ext_header(derived_target: bool, unit_count: usize) -> bool {
    derived_target || unit_count > 1
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors that can arise when interpreting wire-format data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("unknown packet type: 0x{0:02x}")]
    UnknownPacketType(u8),

    #[error("unknown accumulate operator: 0x{0:02x}")]
    UnknownOp(u8),

    #[error("immediate payload of {0} bytes exceeds {}", IMMED_BYTES)]
    ImmedTooLarge(usize),

    #[error("message truncated: need {need} bytes, have {have}")]
    Truncated { need: usize, have: usize },
}

// ── Tests ─────────────────────────────────────────────────────────────────────
