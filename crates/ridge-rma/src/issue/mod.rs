//! Per-kind issuers. Each takes an operation, the peer connection and the
//! synchronization flags the window layer decided on, and leaves the
//! resulting requests in the operation.

use bytes::Bytes;
use zerocopy::AsBytes;

use ridge_core::config::RmaConfig;
use ridge_core::layout::DerivedLayout;

use crate::connection::{Connection, Transport};
use crate::error::IssueError;
use crate::request::{Request, RequestPool, RequestTable};

pub(crate) mod acc;
pub(crate) mod cas;
pub(crate) mod fop;
pub(crate) mod get;
pub(crate) mod get_acc;
pub(crate) mod put;

/// Everything an issuer needs besides the operation.
pub(crate) struct IssueCtx<'a, T> {
    pub conn: &'a Connection<T>,
    pub pool: &'a RequestPool,
    pub table: &'a RequestTable,
    pub config: &'a RmaConfig,
}

impl<T: Transport> IssueCtx<'_, T> {
    /// Poll until `req` completes locally. Replace-op units must land in
    /// order, so the next unit waits for this one.
    pub fn await_local_completion(&self, req: &Request) -> Result<(), IssueError> {
        let limit = self.config.completion_spin_limit;
        let mut polls = 0u64;
        while !req.is_complete() {
            if limit != 0 && polls >= limit {
                return Err(IssueError::Stalled(polls));
            }
            self.conn.poll()?;
            polls += 1;
        }
        tracing::trace!(handle = req.handle(), polls, "local completion observed");
        Ok(())
    }
}

/// Length of a target layout program, as carried in the fixed header.
pub(crate) fn program_size(layout: &DerivedLayout) -> Result<u32, IssueError> {
    u32::try_from(layout.program().len())
        .map_err(|_| IssueError::InvalidLayout("layout program too large for header"))
}

/// Serialize a header for a transfer list.
pub(crate) fn header_bytes<H: AsBytes>(header: &H) -> Bytes {
    Bytes::copy_from_slice(header.as_bytes())
}
