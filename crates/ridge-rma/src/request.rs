//! Completion-tracking requests.
//!
//! A `Request` is a shared handle. Every logical holder (the operation's
//! request slots, the transport while a send is in flight, the request
//! table while a response is outstanding) owns one clone, and dropping the
//! clone is the release. Whatever a request owns (layout reference,
//! extended header, segment state) goes away with the last clone, so a
//! request can neither be released twice nor used after release.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use dashmap::DashMap;

use ridge_core::layout::Datatype;
use ridge_core::wire::PktFlags;

use crate::error::IssueError;
use crate::ext::ExtHeader;
use crate::segment::Segment;
use crate::transfer::TransferList;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// Tracks local completion of an outgoing transfer.
    Send,
    /// Waits for the peer's reply and knows where to put it.
    Response,
}

/// Caller memory that a response is written into.
#[derive(Debug, Clone)]
pub struct ResultBuffer {
    pub buf: Arc<Mutex<Vec<u8>>>,
    pub count: usize,
    pub datatype: Datatype,
}

impl ResultBuffer {
    /// A zeroed buffer spanning `count` elements of `datatype`.
    pub fn new(count: usize, datatype: Datatype) -> Self {
        let span = if count == 0 {
            0
        } else {
            let extent = datatype.extent().max(0) as usize;
            (count - 1) * extent + datatype.size().max(extent)
        };
        Self {
            buf: Arc::new(Mutex::new(vec![0; span])),
            count,
            datatype,
        }
    }

    /// Bytes of data the response carries.
    pub fn byte_len(&self) -> usize {
        self.count * self.datatype.size()
    }
}

// ── Request ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Request(Arc<RequestInner>);

#[derive(Debug)]
struct RequestInner {
    handle: u64,
    kind: RequestKind,
    flags: PktFlags,
    datatype: OnceLock<Datatype>,
    ext: Option<ExtHeader>,
    segment: Option<Segment>,
    transfer: Option<TransferList>,
    response: Option<ResultBuffer>,
    complete: AtomicBool,
    _ticket: Ticket,
}

impl Request {
    /// Identifier carried in packet headers and echoed in responses.
    pub fn handle(&self) -> u64 {
        self.0.handle
    }

    pub fn kind(&self) -> RequestKind {
        self.0.kind
    }

    pub fn flags(&self) -> PktFlags {
        self.0.flags
    }

    /// Derived layout kept alive until the request goes away.
    pub fn datatype(&self) -> Option<&Datatype> {
        self.0.datatype.get()
    }

    /// Attach a layout reference after the fact. Used for requests the
    /// transport created on its own. A second attach is ignored.
    pub fn retain_datatype(&self, datatype: Datatype) {
        let _ = self.0.datatype.set(datatype);
    }

    pub fn ext_header(&self) -> Option<&ExtHeader> {
        self.0.ext.as_ref()
    }

    /// Offset of the streaming unit a response belongs to.
    pub fn stream_offset(&self) -> Option<u64> {
        self.0.ext.as_ref().and_then(ExtHeader::stream_offset)
    }

    pub fn segment(&self) -> Option<&Segment> {
        self.0.segment.as_ref()
    }

    pub fn transfer(&self) -> Option<&TransferList> {
        self.0.transfer.as_ref()
    }

    pub fn response(&self) -> Option<&ResultBuffer> {
        self.0.response.as_ref()
    }

    /// Mark locally complete. Called by the progress engine.
    pub fn complete(&self) {
        self.0.complete.store(true, Ordering::Release);
    }

    pub fn is_complete(&self) -> bool {
        self.0.complete.load(Ordering::Acquire)
    }

    /// Number of live references.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }
}

/// Fills in a request before it is shared. Dropping an unbuilt builder
/// returns its pool slot and drops whatever was attached.
#[derive(Debug)]
pub struct RequestBuilder {
    handle: u64,
    kind: RequestKind,
    flags: PktFlags,
    datatype: Option<Datatype>,
    ext: Option<ExtHeader>,
    segment: Option<Segment>,
    transfer: Option<TransferList>,
    response: Option<ResultBuffer>,
    ticket: Ticket,
}

impl RequestBuilder {
    pub fn handle(&self) -> u64 {
        self.handle
    }

    pub fn flags(mut self, flags: PktFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Keep a derived layout alive. Predefined layouts need no reference.
    pub fn datatype(mut self, datatype: &Datatype) -> Self {
        if !datatype.is_predefined() {
            self.datatype = Some(datatype.clone());
        }
        self
    }

    pub fn ext_header(mut self, ext: Option<ExtHeader>) -> Self {
        self.ext = ext;
        self
    }

    pub fn segment(mut self, segment: Segment) -> Self {
        self.segment = Some(segment);
        self
    }

    pub fn transfer(mut self, list: TransferList) -> Self {
        self.transfer = Some(list);
        self
    }

    pub fn response(mut self, target: ResultBuffer) -> Self {
        self.response = Some(target);
        self
    }

    pub fn build(self) -> Request {
        let datatype = OnceLock::new();
        if let Some(dt) = self.datatype {
            let _ = datatype.set(dt);
        }
        Request(Arc::new(RequestInner {
            handle: self.handle,
            kind: self.kind,
            flags: self.flags,
            datatype,
            ext: self.ext,
            segment: self.segment,
            transfer: self.transfer,
            response: self.response,
            complete: AtomicBool::new(false),
            _ticket: self.ticket,
        }))
    }
}

// ── Pool ──────────────────────────────────────────────────────────────────────

/// Counts one live request; the count drops with the request.
#[derive(Debug)]
struct Ticket(Arc<AtomicUsize>);

impl Drop for Ticket {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Hands out request handles and caps the number of live requests.
#[derive(Debug)]
pub struct RequestPool {
    next_handle: AtomicU64,
    live: Arc<AtomicUsize>,
    /// 0 = unlimited.
    limit: usize,
}

impl RequestPool {
    pub fn new(limit: usize) -> Self {
        Self {
            next_handle: AtomicU64::new(1),
            live: Arc::new(AtomicUsize::new(0)),
            limit,
        }
    }

    /// Reserve a slot for a new request. Fails with `NoMem` at the limit.
    pub fn create(&self, kind: RequestKind) -> Result<RequestBuilder, IssueError> {
        let prev = self.live.fetch_add(1, Ordering::AcqRel);
        if self.limit != 0 && prev >= self.limit {
            self.live.fetch_sub(1, Ordering::AcqRel);
            return Err(IssueError::NoMem("request"));
        }
        Ok(RequestBuilder {
            handle: self.next_handle.fetch_add(1, Ordering::Relaxed),
            kind,
            flags: PktFlags::NONE,
            datatype: None,
            ext: None,
            segment: None,
            transfer: None,
            response: None,
            ticket: Ticket(self.live.clone()),
        })
    }

    /// Requests (and unbuilt builders) currently alive.
    pub fn live(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    pub fn limit(&self) -> usize {
        self.limit
    }
}

impl Default for RequestPool {
    fn default() -> Self {
        Self::new(0)
    }
}

// ── Table ─────────────────────────────────────────────────────────────────────

/// Outstanding response requests by handle. This is the progress
/// engine's reference: a response that arrives looks itself up here.
#[derive(Debug, Default)]
pub struct RequestTable {
    pending: DashMap<u64, Request>,
}

impl RequestTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, req: &Request) {
        self.pending.insert(req.handle(), req.clone());
    }

    /// Remove and hand back the table's reference.
    pub fn take(&self, handle: u64) -> Option<Request> {
        self.pending.remove(&handle).map(|(_, req)| req)
    }

    /// Drop the table's reference without looking at it.
    pub fn deregister(&self, handle: u64) {
        self.pending.remove(&handle);
    }

    pub fn contains(&self, handle: u64) -> bool {
        self.pending.contains_key(&handle)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
