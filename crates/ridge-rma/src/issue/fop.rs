use ridge_core::wire::{AccOp, PacketHeader, PacketType, PktFlags};

use crate::connection::Transport;
use crate::error::IssueError;
use crate::op::{Operation, Packet, StreamCursor};
use crate::request::RequestKind;
use crate::transfer::{self, TransferList, UnitSpec};

use super::{header_bytes, IssueCtx};

/// Issue a fetch-and-op. Operands that fit the header go out inline;
/// wider ones are sent from the origin buffer.
pub(crate) fn issue<T: Transport>(
    ctx: &IssueCtx<'_, T>,
    op: &mut Operation,
    flags: PktFlags,
) -> Result<(), IssueError> {
    let Packet::FetchOp(mut pkt) = op.packet else {
        return Err(IssueError::InvalidOperation(op.packet.type_tag()));
    };
    let result = op.result.clone().ok_or(IssueError::MissingResult)?;
    pkt.set_flags(pkt.flags() | flags);

    let resp = ctx
        .pool
        .create(RequestKind::Response)?
        .flags(pkt.flags())
        .datatype(&result.datatype)
        .response(result)
        .build();
    pkt.request_handle = resp.handle();
    ctx.table.register(&resp);

    let immed = pkt.pkt_type == PacketType::FopImmed as u8;
    let sent = if immed {
        let list = TransferList::header_only(header_bytes(&pkt));
        ctx.conn.send_immediate_list(ctx.pool, &list).map_err(IssueError::from)
    } else {
        let unit = UnitSpec {
            offset: 0,
            size: op.target.datatype.size(),
            unit_count: 1,
            derived_target: false,
            empty_origin: pkt.op == AccOp::NoOp as u8,
            flags: pkt.flags(),
        };
        transfer::issue_from_origin(ctx.conn, ctx.pool, header_bytes(&pkt), None, &op.origin, unit)
    };

    // Only the response matters to the caller.
    if let Err(e) = sent {
        ctx.table.deregister(resp.handle());
        tracing::warn!(
            rank = ctx.conn.rank(),
            handle = resp.handle(),
            error = %e,
            "fetch-and-op failed, response released"
        );
        return Err(e);
    }

    tracing::debug!(rank = ctx.conn.rank(), handle = resp.handle(), immed, "fetch-and-op issued");
    op.requests.store(0, resp);
    op.cursor = StreamCursor::AllIssued;
    Ok(())
}
