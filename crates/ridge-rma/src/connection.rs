//! The per-peer connection seam.
//!
//! The engine never talks to a transport directly. It goes through a
//! `Connection`, which takes the per-connection lock for exactly one
//! transport call at a time. Header building and decomposition happen
//! outside the lock.

use std::sync::{Mutex, MutexGuard};

use ridge_core::config::TransportConfig;

use crate::error::TransportError;
use crate::request::{Request, RequestPool};
use crate::transfer::TransferList;

/// What a transport can do, queried once when the connection is made.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Largest message the transport sends eagerly.
    pub eager_max_msg_size: usize,
    /// Whether `send_non_contiguous` packs segments natively.
    pub non_contiguous: bool,
}

impl From<&TransportConfig> for Capabilities {
    fn from(config: &TransportConfig) -> Self {
        Self {
            eager_max_msg_size: config.eager_max_msg_size,
            non_contiguous: config.non_contiguous,
        }
    }
}

/// Send primitives offered by a virtual connection.
pub trait Transport {
    fn capabilities(&self) -> Capabilities;

    /// Send a short list without a caller request. The transport may
    /// return a request of its own when the send does not finish at once.
    fn send_immediate_list(
        &mut self,
        pool: &RequestPool,
        list: &TransferList,
    ) -> Result<Option<Request>, TransportError>;

    /// Send a list tracked by `req`. The transport keeps its own clone of
    /// `req` until the send completes locally.
    fn send_with_request(&mut self, req: &Request, list: &TransferList) -> Result<(), TransportError>;

    /// Send header entries from `list`, then pack the payload from the
    /// segment attached to `req`.
    fn send_non_contiguous(
        &mut self,
        _req: &Request,
        _list: &TransferList,
    ) -> Result<(), TransportError> {
        Err(TransportError::Unsupported("send_non_contiguous"))
    }

    /// Start a rendezvous transfer tracked by `req`. The header in `list`
    /// already carries its rendezvous tag and payload size; the payload
    /// follows once the peer is ready for it.
    fn start_rndv(&mut self, req: &Request, list: &TransferList) -> Result<(), TransportError> {
        self.send_with_request(req, list)
    }

    /// Drive local completions. Returns how many requests completed.
    fn progress(&mut self) -> Result<usize, TransportError>;
}

pub struct Connection<T> {
    rank: u32,
    caps: Capabilities,
    inner: Mutex<T>,
}

impl<T: Transport> Connection<T> {
    pub fn new(rank: u32, transport: T) -> Self {
        Self {
            rank,
            caps: transport.capabilities(),
            inner: Mutex::new(transport),
        }
    }

    pub fn rank(&self) -> u32 {
        self.rank
    }

    pub fn capabilities(&self) -> Capabilities {
        self.caps
    }

    pub fn send_immediate_list(
        &self,
        pool: &RequestPool,
        list: &TransferList,
    ) -> Result<Option<Request>, TransportError> {
        self.lock()?.send_immediate_list(pool, list)
    }

    pub fn send_with_request(&self, req: &Request, list: &TransferList) -> Result<(), TransportError> {
        self.lock()?.send_with_request(req, list)
    }

    pub fn send_non_contiguous(&self, req: &Request, list: &TransferList) -> Result<(), TransportError> {
        self.lock()?.send_non_contiguous(req, list)
    }

    pub fn start_rndv(&self, req: &Request, list: &TransferList) -> Result<(), TransportError> {
        self.lock()?.start_rndv(req, list)
    }

    /// One progress pass.
    pub fn poll(&self) -> Result<usize, TransportError> {
        self.lock()?.progress()
    }

    /// Run `f` against the transport under the connection lock.
    pub fn with_transport<R>(&self, f: impl FnOnce(&mut T) -> R) -> Result<R, TransportError> {
        let mut guard = self.lock()?;
        Ok(f(&mut guard))
    }

    fn lock(&self) -> Result<MutexGuard<'_, T>, TransportError> {
        self.inner.lock().map_err(|_| TransportError::Poisoned)
    }
}
