//! Transfer lists and the choice of send path for origin data.
//!
//! Every list goes out as fixed header, then extended header (if any),
//! then payload. The fields below hold those parts separately, so a list
//! cannot be assembled in any other order.

use bytes::Bytes;

use ridge_core::wire::{self, needs_ext_header, PktFlags};

use crate::connection::{Connection, Transport};
use crate::error::IssueError;
use crate::ext::ExtHeader;
use crate::op::Origin;
use crate::request::{Request, RequestKind, RequestPool};
use crate::segment::Segment;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferList {
    header: Bytes,
    ext: Option<Bytes>,
    payload: Vec<Bytes>,
}

impl TransferList {
    pub fn new(header: Bytes, ext: Option<&ExtHeader>) -> Self {
        Self {
            header,
            ext: ext.map(|e| e.bytes().clone()),
            payload: Vec::new(),
        }
    }

    pub fn header_only(header: Bytes) -> Self {
        Self::new(header, None)
    }

    /// Swap the fixed header, keeping extended header and payload.
    pub fn replace_header(&mut self, header: Bytes) {
        self.header = header;
    }

    pub fn push_payload(&mut self, bytes: Bytes) {
        self.payload.push(bytes);
    }

    pub fn header(&self) -> &Bytes {
        &self.header
    }

    pub fn ext(&self) -> Option<&Bytes> {
        self.ext.as_ref()
    }

    pub fn payload(&self) -> &[Bytes] {
        &self.payload
    }

    /// Entries in wire order.
    pub fn entries(&self) -> impl Iterator<Item = &Bytes> {
        std::iter::once(&self.header)
            .chain(self.ext.iter())
            .chain(self.payload.iter())
    }

    pub fn entry_count(&self) -> usize {
        1 + self.ext.is_some() as usize + self.payload.len()
    }

    pub fn total_len(&self) -> usize {
        self.entries().map(Bytes::len).sum()
    }

    pub fn payload_len(&self) -> usize {
        self.payload.iter().map(Bytes::len).sum()
    }

    /// Concatenate the entries as they would appear on the wire.
    pub fn to_wire(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.total_len());
        for entry in self.entries() {
            out.extend_from_slice(entry);
        }
        out
    }
}

// ── Path Selection ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendPath {
    /// Header plus raw payload, no request needed. Switches to a
    /// rendezvous start when the list exceeds the eager threshold.
    Fast,
    /// Request-tracked list with contiguous payload.
    Contiguous,
    /// Request-tracked send of a packed segment.
    NonContiguous,
}

/// Non-contiguous origins always need packing. Otherwise anything with an
/// extended header goes out under a request.
pub fn select_path(needs_ext: bool, origin_contig: bool) -> SendPath {
    if !origin_contig {
        SendPath::NonContiguous
    } else if needs_ext {
        SendPath::Contiguous
    } else {
        SendPath::Fast
    }
}

/// One unit of origin data to send.
#[derive(Debug, Clone, Copy)]
pub(crate) struct UnitSpec {
    pub offset: usize,
    pub size: usize,
    /// Units the operation was cut into; 1 when not streamed.
    pub unit_count: usize,
    pub derived_target: bool,
    /// Fetch-only operations have no origin data at all.
    pub empty_origin: bool,
    pub flags: PktFlags,
}

/// Send `header`, `ext` and the unit's slice of origin data.
///
/// Returns the request tracking the send, if any. On failure everything
/// acquired here (request, extended header, layout reference) is dropped
/// before returning.
pub(crate) fn issue_from_origin<T: Transport>(
    conn: &Connection<T>,
    pool: &RequestPool,
    header: Bytes,
    ext: Option<ExtHeader>,
    origin: &Origin,
    unit: UnitSpec,
) -> Result<Option<Request>, IssueError> {
    let (contig, true_lb) = if unit.empty_origin {
        (true, 0)
    } else {
        (origin.datatype.is_contig(), origin.datatype.true_lb())
    };

    let path = select_path(needs_ext_header(unit.derived_target, unit.unit_count), contig);
    tracing::trace!(
        rank = conn.rank(),
        ?path,
        offset = unit.offset,
        size = unit.size,
        header = hex::encode(&header[..header.len().min(16)]),
        "issuing from origin buffer"
    );

    match path {
        SendPath::Fast => {
            let mut list = TransferList::header_only(header);
            if !unit.empty_origin {
                list.push_payload(origin_slice(origin, true_lb, unit.offset, unit.size)?);
            }
            if list.total_len() > conn.capabilities().eager_max_msg_size {
                if let Some(rndv) = wire::rndv_header(list.header(), unit.size as u64)? {
                    list.replace_header(Bytes::from(rndv));
                    return start_rndv(conn, pool, list, origin, unit);
                }
            }
            let req = conn.send_immediate_list(pool, &list)?;
            if let Some(req) = &req {
                if !origin.datatype.is_predefined() {
                    req.retain_datatype(origin.datatype.clone());
                }
            }
            Ok(req)
        }
        SendPath::Contiguous => {
            let builder = pool.create(RequestKind::Send)?;
            let mut list = TransferList::new(header, ext.as_ref());
            if !unit.empty_origin {
                list.push_payload(origin_slice(origin, true_lb, unit.offset, unit.size)?);
            }
            let req = builder
                .flags(unit.flags)
                .datatype(&origin.datatype)
                .ext_header(ext)
                .transfer(list.clone())
                .build();
            conn.send_with_request(&req, &list).map_err(|e| rollback(&req, e))?;
            Ok(Some(req))
        }
        SendPath::NonContiguous => {
            let builder = pool.create(RequestKind::Send)?;
            let segment = Segment::new(
                origin.data.clone(),
                origin.datatype.clone(),
                origin.count,
                unit.offset,
                unit.offset + unit.size,
            )?;
            let mut list = TransferList::new(header, ext.as_ref());
            let native = conn.capabilities().non_contiguous;
            if !native {
                list.push_payload(Bytes::from(segment.pack()?));
            }
            let req = builder
                .flags(unit.flags)
                .datatype(&origin.datatype)
                .ext_header(ext)
                .segment(segment)
                .transfer(list.clone())
                .build();
            let sent = if native {
                conn.send_non_contiguous(&req, &list)
            } else {
                conn.send_with_request(&req, &list)
            };
            sent.map_err(|e| rollback(&req, e))?;
            Ok(Some(req))
        }
    }
}

fn start_rndv<T: Transport>(
    conn: &Connection<T>,
    pool: &RequestPool,
    list: TransferList,
    origin: &Origin,
    unit: UnitSpec,
) -> Result<Option<Request>, IssueError> {
    let req = pool
        .create(RequestKind::Send)?
        .flags(unit.flags)
        .datatype(&origin.datatype)
        .transfer(list.clone())
        .build();
    tracing::debug!(
        rank = conn.rank(),
        handle = req.handle(),
        data_sz = unit.size,
        total = list.total_len(),
        "payload above eager threshold, starting rendezvous"
    );
    conn.start_rndv(&req, &list).map_err(|e| rollback(&req, e))?;
    Ok(Some(req))
}

fn rollback(req: &Request, err: crate::error::TransportError) -> IssueError {
    tracing::warn!(
        handle = req.handle(),
        error = %err,
        "send failed, releasing request"
    );
    IssueError::Transport(err)
}

fn origin_slice(origin: &Origin, true_lb: i64, offset: usize, size: usize) -> Result<Bytes, IssueError> {
    let start = true_lb + offset as i64;
    let end = start + size as i64;
    if start < 0 || end as usize > origin.data.len() {
        return Err(IssueError::OutOfBounds {
            offset: start,
            end,
            have: origin.data.len(),
        });
    }
    Ok(origin.data.slice(start as usize..end as usize))
}
