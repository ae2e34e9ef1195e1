//! Extended headers: derived-layout metadata and stream offsets that ride
//! between a fixed packet header and its payload.
//!
//! An extended header is one owned byte buffer. The prefix is one of the
//! packed structs from `ridge_core::wire`, the layout program (if any)
//! follows it directly. The buffer is immutable once built, so a request
//! and a transfer list can share it without copying.

use bytes::Bytes;
use zerocopy::{AsBytes, FromBytes};

use ridge_core::layout::{Datatype, DerivedLayout};
use ridge_core::wire::{
    AccumDerivedExt, AccumStreamDerivedExt, AccumStreamExt, GetAccumDerivedExt,
    GetAccumStreamDerivedExt, GetAccumStreamExt, GetDerivedExt, LayoutInfo, PktFlags,
    PutDerivedExt,
};

use crate::error::IssueError;

/// Which struct sits at the front of the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtKind {
    PutDerived,
    GetDerived,
    AccumStream,
    AccumDerived,
    AccumStreamDerived,
    GetAccumStream,
    GetAccumDerived,
    GetAccumStreamDerived,
}

impl ExtKind {
    /// Size of the fixed prefix.
    pub fn struct_size(self) -> usize {
        match self {
            ExtKind::PutDerived => std::mem::size_of::<PutDerivedExt>(),
            ExtKind::GetDerived => std::mem::size_of::<GetDerivedExt>(),
            ExtKind::AccumStream => std::mem::size_of::<AccumStreamExt>(),
            ExtKind::AccumDerived => std::mem::size_of::<AccumDerivedExt>(),
            ExtKind::AccumStreamDerived => std::mem::size_of::<AccumStreamDerivedExt>(),
            ExtKind::GetAccumStream => std::mem::size_of::<GetAccumStreamExt>(),
            ExtKind::GetAccumDerived => std::mem::size_of::<GetAccumDerivedExt>(),
            ExtKind::GetAccumStreamDerived => std::mem::size_of::<GetAccumStreamDerivedExt>(),
        }
    }

    fn has_offset(self) -> bool {
        matches!(
            self,
            ExtKind::AccumStream
                | ExtKind::AccumStreamDerived
                | ExtKind::GetAccumStream
                | ExtKind::GetAccumStreamDerived
        )
    }

    fn has_layout(self) -> bool {
        !matches!(self, ExtKind::AccumStream | ExtKind::GetAccumStream)
    }
}

#[derive(Debug, Clone)]
pub struct ExtHeader {
    kind: ExtKind,
    bytes: Bytes,
}

impl ExtHeader {
    pub fn kind(&self) -> ExtKind {
        self.kind
    }

    /// Total size: prefix plus trailing layout program.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    /// Byte offset of the streaming unit this header describes.
    pub fn stream_offset(&self) -> Option<u64> {
        if !self.kind.has_offset() {
            return None;
        }
        u64::read_from_prefix(&self.bytes[..])
    }

    /// Copied target layout metadata, for the derived shapes.
    pub fn layout_info(&self) -> Option<LayoutInfo> {
        if !self.kind.has_layout() {
            return None;
        }
        let start = if self.kind.has_offset() { 8 } else { 0 };
        LayoutInfo::read_from_prefix(&self.bytes[start..])
    }

    /// Layout program bytes trailing the prefix. Empty for offset-only shapes.
    pub fn program(&self) -> &[u8] {
        &self.bytes[self.kind.struct_size()..]
    }
}

// ── Builders ──────────────────────────────────────────────────────────────────

/// Metadata block for a derived layout, as carried on the wire.
pub fn layout_info(layout: &DerivedLayout) -> LayoutInfo {
    LayoutInfo {
        is_contig: layout.is_contig() as u8,
        has_sticky_lb: layout.has_sticky_lb() as u8,
        has_sticky_ub: layout.has_sticky_ub() as u8,
        basic_type: layout.basic_type() as u8,
        program_depth: layout.program_depth(),
        program_size: layout.program().len() as u64,
        max_contig_blocks: layout.max_contig_blocks() as u64,
        size: layout.size() as u64,
        extent: layout.extent(),
        lb: layout.lb(),
        ub: layout.ub(),
        true_lb: layout.true_lb(),
        true_ub: layout.true_ub(),
    }
}

fn alloc(len: usize, what: &'static str) -> Result<Vec<u8>, IssueError> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len).map_err(|_| IssueError::NoMem(what))?;
    Ok(buf)
}

fn with_program(
    kind: ExtKind,
    prefix: &[u8],
    layout: &DerivedLayout,
    what: &'static str,
) -> Result<ExtHeader, IssueError> {
    let program = layout.program();
    let mut buf = alloc(prefix.len() + program.len(), what)?;
    buf.extend_from_slice(prefix);
    buf.extend_from_slice(program);
    Ok(ExtHeader {
        kind,
        bytes: Bytes::from(buf),
    })
}

fn offset_only(kind: ExtKind, stream_offset: u64, what: &'static str) -> Result<ExtHeader, IssueError> {
    let prefix = AccumStreamExt { stream_offset };
    let mut buf = alloc(prefix.as_bytes().len(), what)?;
    buf.extend_from_slice(prefix.as_bytes());
    Ok(ExtHeader {
        kind,
        bytes: Bytes::from(buf),
    })
}

/// Put to a derived target. `None` when the target is predefined.
pub fn put_derived(target: &Datatype) -> Result<Option<ExtHeader>, IssueError> {
    let Some(layout) = target.derived() else {
        return Ok(None);
    };
    let prefix = PutDerivedExt {
        info: layout_info(layout),
    };
    with_program(ExtKind::PutDerived, prefix.as_bytes(), layout, "put extended header").map(Some)
}

/// Get from a derived target. `None` when the target is predefined.
pub fn get_derived(target: &Datatype) -> Result<Option<ExtHeader>, IssueError> {
    let Some(layout) = target.derived() else {
        return Ok(None);
    };
    let prefix = GetDerivedExt {
        info: layout_info(layout),
    };
    with_program(ExtKind::GetDerived, prefix.as_bytes(), layout, "get extended header").map(Some)
}

/// Accumulate unit header. The four shapes follow from whether `flags`
/// carries STREAM and whether the target layout is derived.
pub fn accum(
    flags: PktFlags,
    target: Option<&DerivedLayout>,
    stream_offset: u64,
) -> Result<Option<ExtHeader>, IssueError> {
    let streamed = flags.contains(PktFlags::STREAM);
    match (streamed, target) {
        (true, Some(layout)) => {
            let prefix = AccumStreamDerivedExt {
                stream_offset,
                info: layout_info(layout),
            };
            with_program(
                ExtKind::AccumStreamDerived,
                prefix.as_bytes(),
                layout,
                "accumulate extended header",
            )
            .map(Some)
        }
        (true, None) => {
            offset_only(ExtKind::AccumStream, stream_offset, "accumulate extended header").map(Some)
        }
        (false, Some(layout)) => {
            let prefix = AccumDerivedExt {
                info: layout_info(layout),
            };
            with_program(
                ExtKind::AccumDerived,
                prefix.as_bytes(),
                layout,
                "accumulate extended header",
            )
            .map(Some)
        }
        (false, None) => Ok(None),
    }
}

/// Get-accumulate unit header. Same bytes as `accum`, tagged with the
/// get-accumulate kinds.
pub fn get_accum(
    flags: PktFlags,
    target: Option<&DerivedLayout>,
    stream_offset: u64,
) -> Result<Option<ExtHeader>, IssueError> {
    let Some(ext) = accum(flags, target, stream_offset)? else {
        return Ok(None);
    };
    let kind = match ext.kind {
        ExtKind::AccumStream => ExtKind::GetAccumStream,
        ExtKind::AccumDerived => ExtKind::GetAccumDerived,
        _ => ExtKind::GetAccumStreamDerived,
    };
    Ok(Some(ExtHeader {
        kind,
        bytes: ext.bytes,
    }))
}
