use ridge_core::layout::{BasicType, DerivedLayout};
use ridge_core::wire::{AccOp, AccumPkt, PktFlags};
use ridge_rma::loopback::Primitive;
use ridge_rma::{Engine, Operation, Origin, RequestKind, ResultBuffer, StreamCursor, Target};
use zerocopy::FromBytes;

use crate::*;

// ══════════════════════════════════════════════════════════════════════════════
//  Streaming Decomposition
// ══════════════════════════════════════════════════════════════════════════════

fn accumulate(n: usize, op: AccOp) -> Operation {
    let origin = Origin::new(ramp(n), n, BasicType::Float64);
    Operation::accumulate(origin, Target::new(PEER, 0, n, BasicType::Float64), op).unwrap()
}

/// 100 doubles under a 64-byte budget: 13 units of 8 doubles, the last
/// one holding 4. Payloads concatenate back to the origin buffer.
#[test]
fn test_units_partition_origin() {
    let engine = engine_with_unit(64);
    let conn = loopback();
    let mut op = accumulate(100, AccOp::Sum);

    engine.issue(&mut op, &conn, PktFlags::NONE).unwrap();

    let msgs = sent(&conn);
    assert_eq!(msgs.len(), 13);
    let mut joined = Vec::new();
    for (j, msg) in msgs.iter().enumerate() {
        assert_eq!(msg.primitive, Primitive::WithRequest);
        assert!(header_flags(msg).contains(PktFlags::STREAM));
        assert_eq!(stream_offset(msg), Some(j as u64 * 64));
        let expected = if j == 12 { 32 } else { 64 };
        assert_eq!(payload(msg).len(), expected);
        joined.extend_from_slice(payload(msg));
    }
    assert_eq!(joined, ramp(100).to_vec());

    assert_eq!(op.cursor(), StreamCursor::AllIssued);
    assert_eq!(op.requests().len(), 13);
    assert_eq!(engine.pool().live(), 13);

    conn.poll().unwrap();
    assert!(op.is_complete());
    assert_eq!(op.release_requests(), 13);
    assert_eq!(engine.pool().live(), 0);
}

/// Lock bits ride on unit 0 only and stop the pass there; end bits ride
/// on the last unit only. The second pass resumes without re-sending.
#[test]
fn test_lock_first_unlock_last_and_resume() {
    let engine = engine_with_unit(64);
    let conn = loopback();
    let mut op = accumulate(100, AccOp::Sum);
    let flags = PktFlags::LOCK_SHARED | PktFlags::UNLOCK;

    engine.issue(&mut op, &conn, flags).unwrap();
    assert_eq!(sent(&conn).len(), 1);
    assert_eq!(op.cursor(), StreamCursor::InProgress(1));

    engine.issue(&mut op, &conn, flags).unwrap();
    assert_eq!(op.cursor(), StreamCursor::AllIssued);

    let msgs = sent(&conn);
    assert_eq!(msgs.len(), 13);
    for (j, msg) in msgs.iter().enumerate() {
        let f = header_flags(msg);
        assert_eq!(f.contains(PktFlags::LOCK_SHARED), j == 0, "unit {j}");
        assert_eq!(f.contains(PktFlags::UNLOCK), j == 12, "unit {j}");
        assert_eq!(stream_offset(msg), Some(j as u64 * 64));
    }
    assert_eq!(op.requests().len(), 13);
}

/// One unit: no STREAM, no extended header, every flag kept, fast path.
#[test]
fn test_single_unit_keeps_all_flags() {
    let engine = Engine::default();
    let conn = loopback();
    let mut op = accumulate(4, AccOp::Max);
    let flags = PktFlags::LOCK_EXCLUSIVE | PktFlags::FLUSH;

    engine.issue(&mut op, &conn, flags).unwrap();

    let msgs = sent(&conn);
    assert_eq!(msgs.len(), 1);
    assert_eq!(msgs[0].primitive, Primitive::Immediate);
    assert!(msgs[0].list.ext().is_none());
    let f = header_flags(&msgs[0]);
    assert!(f.contains(flags));
    assert!(!f.contains(PktFlags::STREAM));
    assert_eq!(payload(&msgs[0]), &ramp(4)[..]);
    assert_eq!(engine.pool().live(), 0);
    assert!(op.is_fully_issued());
}

/// A million doubles under the default 64 KiB budget.
#[test]
fn test_million_element_accumulate() {
    let engine = Engine::default();
    let conn = loopback();
    let n = 1_000_000;
    let origin = Origin::new(vec![0u8; n * 8], n, BasicType::Float64);
    let mut op =
        Operation::accumulate(origin, Target::new(PEER, 0, n, BasicType::Float64), AccOp::Sum).unwrap();

    engine.issue(&mut op, &conn, PktFlags::NONE).unwrap();

    let msgs = sent(&conn);
    assert_eq!(msgs.len(), 123);
    let last = &msgs[122];
    assert_eq!(stream_offset(last), Some(122 * 8192 * 8));
    assert_eq!(payload(last).len(), (n - 122 * 8192) * 8);
    assert!(msgs[..122].iter().all(|m| payload(m).len() == 65_536));
}

/// Streamed units to a derived target carry offset, layout metadata and
/// the layout program.
#[test]
fn test_derived_target_units_carry_layout() {
    let engine = engine_with_unit(64);
    let conn = loopback();
    let layout = DerivedLayout::vector(4, 1, 2, BasicType::Float64).unwrap();
    let origin = Origin::new(ramp(16), 16, BasicType::Float64);
    let target = Target::new(PEER, 0, 4, layout.clone());
    let mut op = Operation::accumulate(origin, target, AccOp::Sum).unwrap();

    engine.issue(&mut op, &conn, PktFlags::NONE).unwrap();

    let msgs = sent(&conn);
    assert_eq!(msgs.len(), 2);
    for (j, msg) in msgs.iter().enumerate() {
        let ext = msg.list.ext().unwrap();
        assert_eq!(ext.len(), 80 + layout.program().len());
        assert_eq!(&ext[ext.len() - layout.program().len()..], &layout.program()[..]);
        assert_eq!(stream_offset(msg), Some(j as u64 * 64));

        let hdr = AccumPkt::read_from_prefix(&msg.wire[..]).unwrap();
        let program_size = hdr.program_size;
        assert_eq!(program_size as usize, layout.program().len());
    }
}

/// Replace units wait for local completion one by one, so nothing is left
/// in flight when the call returns.
#[test]
fn test_replace_units_complete_in_order() {
    let engine = engine_with_unit(64);
    let conn = loopback();
    let mut op = accumulate(24, AccOp::Replace);

    engine.issue(&mut op, &conn, PktFlags::NONE).unwrap();

    assert_eq!(sent(&conn).len(), 3);
    assert!(conn.with_transport(|t| t.in_flight().is_empty()).unwrap());
    assert!(op.is_complete());
}

/// Every get-accumulate unit gets its own response, tagged with the
/// unit's offset and named in the unit's header.
#[test]
fn test_get_accumulate_response_per_unit() {
    let engine = engine_with_unit(64);
    let conn = loopback();
    let result = ResultBuffer::new(24, BasicType::Float64.into());
    let mut op = Operation::get_accumulate(
        Origin::new(ramp(24), 24, BasicType::Float64),
        Target::new(PEER, 0, 24, BasicType::Float64),
        result,
        AccOp::Sum,
    )
    .unwrap();

    engine.issue(&mut op, &conn, PktFlags::NONE).unwrap();

    let msgs = sent(&conn);
    assert_eq!(msgs.len(), 3);
    assert_eq!(engine.table().len(), 3);
    let responses: Vec<_> = op.requests().iter().cloned().collect();
    assert_eq!(responses.len(), 3);
    for (j, (msg, resp)) in msgs.iter().zip(&responses).enumerate() {
        let hdr = AccumPkt::read_from_prefix(&msg.wire[..]).unwrap();
        let handle = hdr.request_handle;
        assert_eq!(resp.handle(), handle);
        assert_eq!(resp.kind(), RequestKind::Response);
        assert_eq!(resp.stream_offset(), Some(j as u64 * 64));
        assert!(resp.response().is_some());
        assert!(engine.table().contains(handle));
    }
}

#[test]
fn test_fetch_only_units_carry_no_payload() {
    let engine = engine_with_unit(64);
    let conn = loopback();
    let result = ResultBuffer::new(24, BasicType::Float64.into());
    let mut op = Operation::get_accumulate(
        Origin::empty(BasicType::Float64),
        Target::new(PEER, 0, 24, BasicType::Float64),
        result,
        AccOp::NoOp,
    )
    .unwrap();

    engine.issue(&mut op, &conn, PktFlags::NONE).unwrap();

    let msgs = sent(&conn);
    assert_eq!(msgs.len(), 3);
    assert!(msgs.iter().all(|m| payload(m).is_empty()));
    assert!(msgs.iter().all(|m| m.list.payload().is_empty()));
}
