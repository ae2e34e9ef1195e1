//! Element layouts ("datatypes") as the RMA engine sees them.
//!
//! The layout engine that builds, packs and unpacks derived layouts lives
//! elsewhere. What the issuance engine consumes is the already-computed
//! metadata below plus the serialized layout program, which it copies into
//! extended headers without interpreting. Derived layouts are shared through
//! `Arc`; a clone is a reference taken, a drop is a reference released.
//!
//! The constructors here cover the flat shapes (contiguous, vector, indexed,
//! resized) the layout engine hands over after flattening.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

// ── Predefined Types ──────────────────────────────────────────────────────────

/// Predefined element types. Every derived layout decomposes into exactly
/// one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BasicType {
    Byte = 0x01,
    Int8 = 0x02,
    UInt8 = 0x03,
    Int16 = 0x04,
    UInt16 = 0x05,
    Int32 = 0x06,
    UInt32 = 0x07,
    Int64 = 0x08,
    UInt64 = 0x09,
    Float32 = 0x0a,
    Float64 = 0x0b,
    Complex64 = 0x0c,
    Complex128 = 0x0d,
}

impl BasicType {
    /// Size in bytes. For predefined types size and extent are equal.
    pub const fn size(self) -> usize {
        match self {
            BasicType::Byte | BasicType::Int8 | BasicType::UInt8 => 1,
            BasicType::Int16 | BasicType::UInt16 => 2,
            BasicType::Int32 | BasicType::UInt32 | BasicType::Float32 => 4,
            BasicType::Int64 | BasicType::UInt64 | BasicType::Float64 | BasicType::Complex64 => 8,
            BasicType::Complex128 => 16,
        }
    }
}

impl TryFrom<u8> for BasicType {
    type Error = LayoutError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(BasicType::Byte),
            0x02 => Ok(BasicType::Int8),
            0x03 => Ok(BasicType::UInt8),
            0x04 => Ok(BasicType::Int16),
            0x05 => Ok(BasicType::UInt16),
            0x06 => Ok(BasicType::Int32),
            0x07 => Ok(BasicType::UInt32),
            0x08 => Ok(BasicType::Int64),
            0x09 => Ok(BasicType::UInt64),
            0x0a => Ok(BasicType::Float32),
            0x0b => Ok(BasicType::Float64),
            0x0c => Ok(BasicType::Complex64),
            0x0d => Ok(BasicType::Complex128),
            other => Err(LayoutError::UnknownBasicType(other)),
        }
    }
}

impl FromStr for BasicType {
    type Err = LayoutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "byte" => Ok(BasicType::Byte),
            "i8" => Ok(BasicType::Int8),
            "u8" => Ok(BasicType::UInt8),
            "i16" => Ok(BasicType::Int16),
            "u16" => Ok(BasicType::UInt16),
            "i32" => Ok(BasicType::Int32),
            "u32" => Ok(BasicType::UInt32),
            "i64" => Ok(BasicType::Int64),
            "u64" => Ok(BasicType::UInt64),
            "f32" => Ok(BasicType::Float32),
            "f64" => Ok(BasicType::Float64),
            "c64" => Ok(BasicType::Complex64),
            "c128" => Ok(BasicType::Complex128),
            other => Err(LayoutError::UnknownBasicName(other.to_string())),
        }
    }
}

// ── Derived Layouts ───────────────────────────────────────────────────────────

/// One contiguous run of basic elements inside a layout instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    /// Byte displacement from the start of the instance.
    pub disp: i64,
    /// Length in basic elements.
    pub len: usize,
}

/// Serialized form of a flattened layout program, as shipped to targets.
#[derive(Debug, Clone, Copy, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
struct ProgramHead {
    basic_type: u8,
    _reserved: [u8; 3],
    block_count: u32,
    extent: i64,
}

#[derive(Debug, Clone, Copy, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
struct ProgramBlock {
    disp: i64,
    bytes: u64,
}

// Handles below this value are predefined types.
static NEXT_LAYOUT_ID: AtomicU64 = AtomicU64::new(0x1000);

/// A committed derived layout.
#[derive(Debug)]
pub struct DerivedLayout {
    id: u64,
    basic: BasicType,
    blocks: Vec<Block>,
    size: usize,
    extent: i64,
    lb: i64,
    ub: i64,
    true_lb: i64,
    true_ub: i64,
    has_sticky_lb: bool,
    has_sticky_ub: bool,
    is_contig: bool,
    max_contig_blocks: usize,
    program: Bytes,
    program_depth: u32,
}

impl DerivedLayout {
    /// `count` consecutive basic elements.
    pub fn contiguous(count: usize, basic: BasicType) -> Result<Arc<Self>, LayoutError> {
        Self::from_blocks(basic, vec![Block { disp: 0, len: count }], 1)
    }

    /// `count` blocks of `blocklen` elements, block starts `stride` elements apart.
    pub fn vector(
        count: usize,
        blocklen: usize,
        stride: i64,
        basic: BasicType,
    ) -> Result<Arc<Self>, LayoutError> {
        let esize = basic.size() as i64;
        let blocks = (0..count)
            .map(|i| Block {
                disp: i as i64 * stride * esize,
                len: blocklen,
            })
            .collect();
        Self::from_blocks(basic, blocks, 1)
    }

    /// Blocks given as (displacement in elements, length in elements).
    pub fn indexed(blocks: &[(i64, usize)], basic: BasicType) -> Result<Arc<Self>, LayoutError> {
        let esize = basic.size() as i64;
        let blocks = blocks
            .iter()
            .map(|&(disp, len)| Block {
                disp: disp * esize,
                len,
            })
            .collect();
        Self::from_blocks(basic, blocks, 1)
    }

    /// Same data as `inner` with explicit lower bound and extent.
    /// Both bounds become sticky.
    pub fn resized(inner: &DerivedLayout, lb: i64, extent: i64) -> Result<Arc<Self>, LayoutError> {
        if extent <= 0 {
            return Err(LayoutError::BadExtent(extent));
        }
        let mut layout = Self::build(inner.basic, inner.blocks.clone(), inner.program_depth + 1)?;
        layout.lb = lb;
        layout.ub = lb + extent;
        layout.extent = extent;
        layout.has_sticky_lb = true;
        layout.has_sticky_ub = true;
        layout.is_contig = layout.max_contig_blocks == 1
            && layout.true_lb == lb
            && extent == layout.size as i64;
        layout.program = encode_program(layout.basic, &layout.blocks, extent);
        Ok(Arc::new(layout))
    }

    fn from_blocks(
        basic: BasicType,
        blocks: Vec<Block>,
        depth: u32,
    ) -> Result<Arc<Self>, LayoutError> {
        Self::build(basic, blocks, depth).map(Arc::new)
    }

    fn build(basic: BasicType, blocks: Vec<Block>, depth: u32) -> Result<Self, LayoutError> {
        if blocks.is_empty() {
            return Err(LayoutError::Empty);
        }
        if blocks.iter().any(|b| b.len == 0) {
            return Err(LayoutError::ZeroLengthBlock);
        }
        let esize = basic.size();
        let size = blocks.iter().map(|b| b.len * esize).sum::<usize>();
        let true_lb = blocks.iter().map(|b| b.disp).min().unwrap_or(0);
        let true_ub = blocks
            .iter()
            .map(|b| b.disp + (b.len * esize) as i64)
            .max()
            .unwrap_or(0);
        let extent = true_ub - true_lb;
        let max_contig_blocks = count_runs(&blocks, esize);
        let is_contig = max_contig_blocks == 1 && extent == size as i64;
        let program = encode_program(basic, &blocks, extent);

        Ok(Self {
            id: NEXT_LAYOUT_ID.fetch_add(1, Ordering::Relaxed),
            basic,
            blocks,
            size,
            extent,
            lb: true_lb,
            ub: true_ub,
            true_lb,
            true_ub,
            has_sticky_lb: false,
            has_sticky_ub: false,
            is_contig,
            max_contig_blocks,
            program,
            program_depth: depth,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn basic_type(&self) -> BasicType {
        self.basic
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Bytes of actual data in one instance.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Span of one instance, including holes.
    pub fn extent(&self) -> i64 {
        self.extent
    }

    pub fn lb(&self) -> i64 {
        self.lb
    }

    pub fn ub(&self) -> i64 {
        self.ub
    }

    pub fn true_lb(&self) -> i64 {
        self.true_lb
    }

    pub fn true_ub(&self) -> i64 {
        self.true_ub
    }

    pub fn has_sticky_lb(&self) -> bool {
        self.has_sticky_lb
    }

    pub fn has_sticky_ub(&self) -> bool {
        self.has_sticky_ub
    }

    pub fn is_contig(&self) -> bool {
        self.is_contig
    }

    pub fn max_contig_blocks(&self) -> usize {
        self.max_contig_blocks
    }

    /// Serialized layout program. Opaque to the RMA engine.
    pub fn program(&self) -> &Bytes {
        &self.program
    }

    pub fn program_depth(&self) -> u32 {
        self.program_depth
    }
}

/// Number of runs after merging blocks that touch end to start.
fn count_runs(blocks: &[Block], esize: usize) -> usize {
    let mut runs = 1;
    for pair in blocks.windows(2) {
        let end = pair[0].disp + (pair[0].len * esize) as i64;
        if pair[1].disp != end {
            runs += 1;
        }
    }
    runs
}

fn encode_program(basic: BasicType, blocks: &[Block], extent: i64) -> Bytes {
    let head = ProgramHead {
        basic_type: basic as u8,
        _reserved: [0; 3],
        block_count: blocks.len() as u32,
        extent,
    };
    let esize = basic.size() as u64;
    let mut out = Vec::with_capacity(
        std::mem::size_of::<ProgramHead>() + blocks.len() * std::mem::size_of::<ProgramBlock>(),
    );
    out.extend_from_slice(head.as_bytes());
    for b in blocks {
        let block = ProgramBlock {
            disp: b.disp,
            bytes: b.len as u64 * esize,
        };
        out.extend_from_slice(block.as_bytes());
    }
    Bytes::from(out)
}

// ── Datatype Handle ───────────────────────────────────────────────────────────

/// A layout handle: predefined, or a shared reference to a derived layout.
#[derive(Debug, Clone)]
pub enum Datatype {
    Basic(BasicType),
    Derived(Arc<DerivedLayout>),
}

impl Datatype {
    pub fn is_predefined(&self) -> bool {
        matches!(self, Datatype::Basic(_))
    }

    pub fn derived(&self) -> Option<&Arc<DerivedLayout>> {
        match self {
            Datatype::Basic(_) => None,
            Datatype::Derived(d) => Some(d),
        }
    }

    /// Identifier carried in packet headers.
    pub fn wire_id(&self) -> u64 {
        match self {
            Datatype::Basic(b) => *b as u64,
            Datatype::Derived(d) => d.id(),
        }
    }

    pub fn basic_type(&self) -> BasicType {
        match self {
            Datatype::Basic(b) => *b,
            Datatype::Derived(d) => d.basic_type(),
        }
    }

    pub fn size(&self) -> usize {
        match self {
            Datatype::Basic(b) => b.size(),
            Datatype::Derived(d) => d.size(),
        }
    }

    pub fn extent(&self) -> i64 {
        match self {
            Datatype::Basic(b) => b.size() as i64,
            Datatype::Derived(d) => d.extent(),
        }
    }

    pub fn true_lb(&self) -> i64 {
        match self {
            Datatype::Basic(_) => 0,
            Datatype::Derived(d) => d.true_lb(),
        }
    }

    pub fn is_contig(&self) -> bool {
        match self {
            Datatype::Basic(_) => true,
            Datatype::Derived(d) => d.is_contig(),
        }
    }
}

impl From<BasicType> for Datatype {
    fn from(b: BasicType) -> Self {
        Datatype::Basic(b)
    }
}

impl From<Arc<DerivedLayout>> for Datatype {
    fn from(d: Arc<DerivedLayout>) -> Self {
        Datatype::Derived(d)
    }
}

impl PartialEq for Datatype {
    fn eq(&self, other: &Self) -> bool {
        self.wire_id() == other.wire_id()
    }
}

impl Eq for Datatype {}

impl fmt::Display for Datatype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Datatype::Basic(b) => write!(f, "{b:?}"),
            Datatype::Derived(d) => write!(f, "derived#{:x}<{:?}>", d.id(), d.basic_type()),
        }
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LayoutError {
    #[error("layout has no blocks")]
    Empty,

    #[error("layout contains a zero-length block")]
    ZeroLengthBlock,

    #[error("extent must be positive, got {0}")]
    BadExtent(i64),

    #[error("unknown basic type: 0x{0:02x}")]
    UnknownBasicType(u8),

    #[error("unknown basic type name: {0}")]
    UnknownBasicName(String),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
