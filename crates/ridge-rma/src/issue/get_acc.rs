use ridge_core::wire::{AccOp, AccumPkt, PacketHeader, PacketType, PktFlags};

use crate::connection::Transport;
use crate::error::IssueError;
use crate::ext;
use crate::op::{Operation, Packet, StreamCursor};
use crate::request::{Request, RequestKind, ResultBuffer};
use crate::stream::{unit_flags, StreamPlan, StreamUnit};
use crate::transfer::{self, TransferList, UnitSpec};

use super::{header_bytes, program_size, IssueCtx};

/// Issue a get-accumulate. Every unit gets its own response request
/// carrying the unit's offset, so the reply can be placed correctly.
pub(crate) fn issue<T: Transport>(
    ctx: &IssueCtx<'_, T>,
    op: &mut Operation,
    flags: PktFlags,
) -> Result<(), IssueError> {
    let Packet::GetAccumulate(pkt) = op.packet else {
        return Err(IssueError::InvalidOperation(op.packet.type_tag()));
    };
    let result = op.result.clone().ok_or(IssueError::MissingResult)?;
    if result.byte_len() != op.target.byte_len() {
        return Err(IssueError::ResultMismatch {
            result: result.byte_len(),
            target: op.target.byte_len(),
        });
    }

    if pkt.pkt_type == PacketType::GetAccumImmed as u8 {
        let uflags = pkt.flags() | flags;
        let resp = response_request(ctx, &result, uflags, None)?;
        let mut hdr = pkt;
        hdr.set_flags(uflags);
        hdr.request_handle = resp.handle();
        let list = TransferList::header_only(header_bytes(&hdr));
        match ctx.conn.send_immediate_list(ctx.pool, &list) {
            // the transport's own request is of no further use
            Ok(_) => {}
            Err(e) => {
                ctx.table.deregister(resp.handle());
                return Err(e.into());
            }
        }
        op.requests.store(0, resp);
        op.cursor = StreamCursor::AllIssued;
        return Ok(());
    }

    let Some(start) = op.cursor.next_unit() else {
        return Ok(());
    };

    let plan = StreamPlan::new(op.target.count, &op.target.datatype, ctx.config.stream_unit_bytes)?;
    let mut base = pkt.flags() | flags;
    if plan.is_streamed() {
        base |= PktFlags::STREAM;
    }
    let replace = pkt.op == AccOp::Replace as u8 && ctx.config.replace_ordering;

    op.requests.reserve(plan.unit_count())?;

    for unit in plan.units_from(start) {
        let uflags = unit_flags(base, unit.index, plan.unit_count());

        // The response keeps an offset-only header so the reply handler
        // knows which unit it belongs to.
        let resp_ext = ext::get_accum(uflags, None, unit.offset as u64)?;
        let resp = response_request(ctx, &result, uflags, resp_ext)?;

        let sent = match send_unit(ctx, op, &pkt, &plan, unit, uflags, &resp) {
            Ok(sent) => sent,
            Err(e) => {
                ctx.table.deregister(resp.handle());
                tracing::warn!(
                    rank = ctx.conn.rank(),
                    unit = unit.index,
                    error = %e,
                    "get-accumulate unit failed, response released"
                );
                return Err(e);
            }
        };

        op.requests.store(unit.index, resp);
        op.cursor.advance(unit.index + 1, plan.unit_count());

        tracing::debug!(
            rank = ctx.conn.rank(),
            unit = unit.index,
            units = plan.unit_count(),
            offset = unit.offset,
            size = unit.size,
            "get-accumulate unit issued"
        );

        // The unit is on the wire and owned by the operation; a stall from
        // here leaves the cursor past it.
        if replace {
            if let Some(req) = &sent {
                ctx.await_local_completion(req)?;
            }
        }

        if uflags.has_lock() {
            break;
        }
    }
    Ok(())
}

/// Create a response request and give the progress engine its reference.
fn response_request<T: Transport>(
    ctx: &IssueCtx<'_, T>,
    result: &ResultBuffer,
    flags: PktFlags,
    ext: Option<ext::ExtHeader>,
) -> Result<Request, IssueError> {
    let resp = ctx
        .pool
        .create(RequestKind::Response)?
        .flags(flags)
        .datatype(&result.datatype)
        .ext_header(ext)
        .response(result.clone())
        .build();
    ctx.table.register(&resp);
    Ok(resp)
}

/// Build and send one unit. Returns the transport-side request, if any;
/// the response request is the one the operation keeps.
fn send_unit<T: Transport>(
    ctx: &IssueCtx<'_, T>,
    op: &Operation,
    pkt: &AccumPkt,
    plan: &StreamPlan,
    unit: StreamUnit,
    uflags: PktFlags,
    resp: &Request,
) -> Result<Option<Request>, IssueError> {
    let target = op.target.datatype.derived();
    let mut hdr = *pkt;
    hdr.set_flags(uflags);
    hdr.request_handle = resp.handle();
    if let Some(layout) = target {
        hdr.program_size = program_size(layout)?;
    }

    let ext = ext::get_accum(uflags, target.map(|l| &**l), unit.offset as u64)?;
    let piece = UnitSpec {
        offset: unit.offset,
        size: unit.size,
        unit_count: plan.unit_count(),
        derived_target: target.is_some(),
        empty_origin: hdr.op == AccOp::NoOp as u8,
        flags: uflags,
    };
    transfer::issue_from_origin(ctx.conn, ctx.pool, header_bytes(&hdr), ext, &op.origin, piece)
}
