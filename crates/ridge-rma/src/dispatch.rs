//! Routes queued operations to the per-kind issuers by packet type.

use ridge_core::config::RmaConfig;
use ridge_core::wire::{PacketType, PktFlags};

use crate::connection::{Connection, Transport};
use crate::error::IssueError;
use crate::issue::{self, IssueCtx};
use crate::op::Operation;
use crate::request::{RequestPool, RequestTable};

/// Owns the request pool and the table of outstanding responses, and
/// issues operations against any connection.
#[derive(Debug)]
pub struct Engine {
    config: RmaConfig,
    pool: RequestPool,
    table: RequestTable,
}

impl Engine {
    pub fn new(config: RmaConfig) -> Self {
        let pool = RequestPool::new(config.max_live_requests);
        Self {
            config,
            pool,
            table: RequestTable::new(),
        }
    }

    pub fn config(&self) -> &RmaConfig {
        &self.config
    }

    pub fn pool(&self) -> &RequestPool {
        &self.pool
    }

    /// Responses awaiting their reply. The progress engine takes them out
    /// by handle.
    pub fn table(&self) -> &RequestTable {
        &self.table
    }

    /// Issue `op` to the peer behind `conn`, with `flags` merged into every
    /// packet. An operation that is already fully issued is left alone; one
    /// that stopped part way resumes from its cursor.
    pub fn issue<T: Transport>(
        &self,
        op: &mut Operation,
        conn: &Connection<T>,
        flags: PktFlags,
    ) -> Result<(), IssueError> {
        let tag = op.packet.type_tag();
        let kind = PacketType::try_from(tag).map_err(|_| IssueError::InvalidOperation(tag))?;
        if op.is_fully_issued() {
            return Ok(());
        }

        let ctx = IssueCtx {
            conn,
            pool: &self.pool,
            table: &self.table,
            config: &self.config,
        };
        let res = match kind {
            PacketType::Put | PacketType::PutImmed => issue::put::issue(&ctx, op, flags),
            PacketType::Get => issue::get::issue(&ctx, op, flags),
            PacketType::Accumulate | PacketType::AccumulateImmed => issue::acc::issue(&ctx, op, flags),
            PacketType::GetAccum | PacketType::GetAccumImmed => issue::get_acc::issue(&ctx, op, flags),
            PacketType::CasImmed => issue::cas::issue(&ctx, op, flags),
            PacketType::Fop | PacketType::FopImmed => issue::fop::issue(&ctx, op, flags),
            _ => Err(IssueError::InvalidOperation(tag)),
        };

        if let Err(e) = &res {
            tracing::warn!(
                rank = conn.rank(),
                kind = ?kind,
                cursor = ?op.cursor(),
                error = %e,
                "operation issue failed"
            );
        }
        res
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(RmaConfig::default())
    }
}
