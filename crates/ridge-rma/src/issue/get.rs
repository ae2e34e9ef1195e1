use ridge_core::wire::{GetRespPkt, PacketHeader, PktFlags};

use crate::connection::Transport;
use crate::error::IssueError;
use crate::ext;
use crate::op::{Operation, Packet, StreamCursor};
use crate::request::RequestKind;
use crate::transfer::TransferList;

use super::{header_bytes, program_size, IssueCtx};

/// Issue a get. The reply is awaited by a response request registered in
/// the table; anything the transport hands back for the request packet
/// itself is dropped.
pub(crate) fn issue<T: Transport>(
    ctx: &IssueCtx<'_, T>,
    op: &mut Operation,
    flags: PktFlags,
) -> Result<(), IssueError> {
    let Packet::Get(mut pkt) = op.packet else {
        return Err(IssueError::InvalidOperation(op.packet.type_tag()));
    };
    let result = op.result.clone().ok_or(IssueError::MissingResult)?;
    pkt.set_flags(pkt.flags() | flags);

    let reply_len = result.byte_len() + std::mem::size_of::<GetRespPkt>();
    if reply_len > ctx.conn.capabilities().eager_max_msg_size {
        pkt.rndv_mode = 1;
    }

    let ext = ext::get_derived(&op.target.datatype)?;
    if let Some(layout) = op.target.datatype.derived() {
        pkt.program_size = program_size(layout)?;
    }

    let resp = ctx
        .pool
        .create(RequestKind::Response)?
        .flags(pkt.flags())
        .datatype(&result.datatype)
        .ext_header(ext)
        .response(result)
        .build();
    pkt.request_handle = resp.handle();
    ctx.table.register(&resp);

    let rndv = pkt.rndv_mode != 0;
    let list = TransferList::new(header_bytes(&pkt), resp.ext_header());
    if let Err(e) = ctx.conn.send_immediate_list(ctx.pool, &list) {
        ctx.table.deregister(resp.handle());
        tracing::warn!(
            rank = ctx.conn.rank(),
            handle = resp.handle(),
            error = %e,
            "get request failed, response released"
        );
        return Err(e.into());
    }

    tracing::debug!(
        rank = ctx.conn.rank(),
        handle = resp.handle(),
        rndv,
        ext_len = list.ext().map_or(0, |e| e.len()),
        "get issued"
    );
    op.requests.store(0, resp);
    op.cursor = StreamCursor::AllIssued;
    Ok(())
}
