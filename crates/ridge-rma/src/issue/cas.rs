use ridge_core::wire::{PacketHeader, PktFlags};

use crate::connection::Transport;
use crate::error::IssueError;
use crate::op::{Operation, Packet, StreamCursor};
use crate::request::RequestKind;
use crate::transfer::TransferList;

use super::{header_bytes, IssueCtx};

pub(crate) fn issue<T: Transport>(
    ctx: &IssueCtx<'_, T>,
    op: &mut Operation,
    flags: PktFlags,
) -> Result<(), IssueError> {
    let Packet::Cas(mut pkt) = op.packet else {
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

    let list = TransferList::header_only(header_bytes(&pkt));
    if let Err(e) = ctx.conn.send_immediate_list(ctx.pool, &list) {
        ctx.table.deregister(resp.handle());
        return Err(e.into());
    }

    tracing::debug!(rank = ctx.conn.rank(), handle = resp.handle(), "compare-and-swap issued");
    op.requests.store(0, resp);
    op.cursor = StreamCursor::AllIssued;
    Ok(())
}
