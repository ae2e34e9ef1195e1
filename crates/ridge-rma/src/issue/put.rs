use ridge_core::wire::{PacketHeader, PacketType, PktFlags};

use crate::connection::Transport;
use crate::error::IssueError;
use crate::ext;
use crate::op::{Operation, Packet, StreamCursor};
use crate::transfer::{self, TransferList, UnitSpec};

use super::{header_bytes, program_size, IssueCtx};

pub(crate) fn issue<T: Transport>(
    ctx: &IssueCtx<'_, T>,
    op: &mut Operation,
    flags: PktFlags,
) -> Result<(), IssueError> {
    let Packet::Put(mut pkt) = op.packet else {
        return Err(IssueError::InvalidOperation(op.packet.type_tag()));
    };
    pkt.set_flags(pkt.flags() | flags);

    let req = if pkt.pkt_type == PacketType::PutImmed as u8 {
        let list = TransferList::header_only(header_bytes(&pkt));
        ctx.conn.send_immediate_list(ctx.pool, &list)?
    } else {
        let ext = ext::put_derived(&op.target.datatype)?;
        if let Some(layout) = op.target.datatype.derived() {
            pkt.program_size = program_size(layout)?;
        }
        let unit = UnitSpec {
            offset: 0,
            size: op.origin.byte_len(),
            unit_count: 1,
            derived_target: ext.is_some(),
            empty_origin: false,
            flags: pkt.flags(),
        };
        transfer::issue_from_origin(ctx.conn, ctx.pool, header_bytes(&pkt), ext, &op.origin, unit)?
    };

    if let Some(req) = req {
        op.requests.store(0, req);
    }
    op.cursor = StreamCursor::AllIssued;
    tracing::debug!(
        rank = ctx.conn.rank(),
        bytes = op.origin.byte_len(),
        immed = pkt.pkt_type == PacketType::PutImmed as u8,
        "put issued"
    );
    Ok(())
}
