use ridge_core::wire::{AccOp, PacketHeader, PacketType, PktFlags};

use crate::connection::Transport;
use crate::error::IssueError;
use crate::ext;
use crate::op::{Operation, Packet, StreamCursor};
use crate::stream::{unit_flags, StreamPlan};
use crate::transfer::{self, TransferList, UnitSpec};

use super::{header_bytes, program_size, IssueCtx};

/// Issue an accumulate, resuming from the operation's cursor.
///
/// With a lock flag only the first unit goes out; the rest wait for a
/// later pass. A failure at unit k leaves units before k held by the
/// operation and the cursor at k.
pub(crate) fn issue<T: Transport>(
    ctx: &IssueCtx<'_, T>,
    op: &mut Operation,
    flags: PktFlags,
) -> Result<(), IssueError> {
    let Packet::Accumulate(pkt) = op.packet else {
        return Err(IssueError::InvalidOperation(op.packet.type_tag()));
    };

    if pkt.pkt_type == PacketType::AccumulateImmed as u8 {
        let mut hdr = pkt;
        hdr.set_flags(pkt.flags() | flags);
        let list = TransferList::header_only(header_bytes(&hdr));
        if let Some(req) = ctx.conn.send_immediate_list(ctx.pool, &list)? {
            op.requests.store(0, req);
        }
        op.cursor = StreamCursor::AllIssued;
        return Ok(());
    }

    let Some(start) = op.cursor.next_unit() else {
        return Ok(());
    };

    let plan = StreamPlan::new(op.origin.count, &op.origin.datatype, ctx.config.stream_unit_bytes)?;
    let mut base = pkt.flags() | flags;
    if plan.is_streamed() {
        base |= PktFlags::STREAM;
    }
    let target = op.target.datatype.derived().cloned();
    let replace = pkt.op == AccOp::Replace as u8 && ctx.config.replace_ordering;

    op.requests.reserve(plan.unit_count())?;

    for unit in plan.units_from(start) {
        let uflags = unit_flags(base, unit.index, plan.unit_count());
        let mut hdr = pkt;
        hdr.set_flags(uflags);
        if let Some(layout) = &target {
            hdr.program_size = program_size(layout)?;
        }

        let ext = ext::accum(uflags, target.as_deref(), unit.offset as u64)?;
        let piece = UnitSpec {
            offset: unit.offset,
            size: unit.size,
            unit_count: plan.unit_count(),
            derived_target: target.is_some(),
            empty_origin: false,
            flags: uflags,
        };
        let req = transfer::issue_from_origin(
            ctx.conn,
            ctx.pool,
            header_bytes(&hdr),
            ext,
            &op.origin,
            piece,
        )?;

        let tracked = req.clone();
        if let Some(req) = req {
            op.requests.store(unit.index, req);
        }
        op.cursor.advance(unit.index + 1, plan.unit_count());

        tracing::debug!(
            rank = ctx.conn.rank(),
            unit = unit.index,
            units = plan.unit_count(),
            offset = unit.offset,
            size = unit.size,
            flags = uflags.bits(),
            "accumulate unit issued"
        );

        if replace {
            if let Some(req) = &tracked {
                ctx.await_local_completion(req)?;
            }
        }

        if uflags.has_lock() {
            break;
        }
    }
    Ok(())
}
