//! A transport that records instead of sending.
//!
//! Used by the plan tool and the tests. Every accepted send is kept as a
//! `SentMessage` with its fully assembled wire bytes. Requests handed to the
//! transport stay in flight until `progress` completes them.

use bytes::Bytes;

use ridge_core::config::TransportConfig;

use crate::connection::{Capabilities, Transport};
use crate::error::TransportError;
use crate::request::{Request, RequestKind, RequestPool};
use crate::transfer::TransferList;

/// Which transport primitive carried a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Primitive {
    Immediate,
    WithRequest,
    NonContiguous,
    Rendezvous,
}

#[derive(Debug, Clone)]
pub struct SentMessage {
    pub primitive: Primitive,
    pub list: TransferList,
    /// Handle of the request tracking the send, if any.
    pub request: Option<u64>,
    /// Header, extended header and payload as they left the transport.
    pub wire: Bytes,
}

#[derive(Debug)]
pub struct RecordingTransport {
    caps: Capabilities,
    sent: Vec<SentMessage>,
    in_flight: Vec<Request>,
    hold_immediate: bool,
    never_complete: bool,
    fail_after: Option<usize>,
    attempts: usize,
}

impl RecordingTransport {
    pub fn new(caps: Capabilities) -> Self {
        Self {
            caps,
            sent: Vec::new(),
            in_flight: Vec::new(),
            hold_immediate: false,
            never_complete: false,
            fail_after: None,
            attempts: 0,
        }
    }

    pub fn from_config(config: &TransportConfig) -> Self {
        Self::new(Capabilities::from(config))
    }

    /// Make immediate sends return a request of their own, as a busy
    /// transport would.
    pub fn hold_immediate(mut self) -> Self {
        self.hold_immediate = true;
        self
    }

    /// Accept sends but never complete them, as a wedged peer would.
    pub fn never_complete(mut self) -> Self {
        self.never_complete = true;
        self
    }

    /// Accept the first `n` send attempts and fail every one after.
    pub fn fail_after(mut self, n: usize) -> Self {
        self.fail_after = Some(n);
        self
    }

    pub fn sent(&self) -> &[SentMessage] {
        &self.sent
    }

    pub fn in_flight(&self) -> &[Request] {
        &self.in_flight
    }

    /// Forget everything recorded so far.
    pub fn clear(&mut self) {
        self.sent.clear();
    }

    fn attempt(&mut self) -> Result<(), TransportError> {
        self.attempts += 1;
        match self.fail_after {
            Some(n) if self.attempts > n => Err(TransportError::SendFailed(format!(
                "send attempt {} refused",
                self.attempts
            ))),
            _ => Ok(()),
        }
    }

    fn record(&mut self, primitive: Primitive, list: &TransferList, request: Option<u64>, wire: Vec<u8>) {
        tracing::trace!(
            ?primitive,
            request,
            entries = list.entry_count(),
            bytes = wire.len(),
            "loopback send"
        );
        self.sent.push(SentMessage {
            primitive,
            list: list.clone(),
            request,
            wire: Bytes::from(wire),
        });
    }
}

impl Transport for RecordingTransport {
    fn capabilities(&self) -> Capabilities {
        self.caps
    }

    fn send_immediate_list(
        &mut self,
        pool: &RequestPool,
        list: &TransferList,
    ) -> Result<Option<Request>, TransportError> {
        self.attempt()?;
        let req = if self.hold_immediate {
            let req = pool
                .create(RequestKind::Send)
                .map_err(|e| TransportError::SendFailed(e.to_string()))?
                .transfer(list.clone())
                .build();
            self.in_flight.push(req.clone());
            Some(req)
        } else {
            None
        };
        self.record(Primitive::Immediate, list, req.as_ref().map(Request::handle), list.to_wire());
        Ok(req)
    }

    fn send_with_request(&mut self, req: &Request, list: &TransferList) -> Result<(), TransportError> {
        self.attempt()?;
        self.in_flight.push(req.clone());
        self.record(Primitive::WithRequest, list, Some(req.handle()), list.to_wire());
        Ok(())
    }

    fn send_non_contiguous(&mut self, req: &Request, list: &TransferList) -> Result<(), TransportError> {
        if !self.caps.non_contiguous {
            return Err(TransportError::Unsupported("send_non_contiguous"));
        }
        self.attempt()?;
        let segment = req
            .segment()
            .ok_or_else(|| TransportError::SendFailed("request carries no segment".into()))?;
        let mut wire = list.to_wire();
        segment
            .pack_into(&mut wire)
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;
        self.in_flight.push(req.clone());
        self.record(Primitive::NonContiguous, list, Some(req.handle()), wire);
        Ok(())
    }

    fn start_rndv(&mut self, req: &Request, list: &TransferList) -> Result<(), TransportError> {
        self.attempt()?;
        self.in_flight.push(req.clone());
        self.record(Primitive::Rendezvous, list, Some(req.handle()), list.to_wire());
        Ok(())
    }

    fn progress(&mut self) -> Result<usize, TransportError> {
        if self.never_complete {
            return Ok(0);
        }
        let done = self.in_flight.len();
        for req in self.in_flight.drain(..) {
            req.complete();
        }
        Ok(done)
    }
}
