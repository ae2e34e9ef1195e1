use ridge_core::layout::BasicType;
use ridge_core::wire::{decode_type_tag, AccOp, AccumRndvPkt, PacketType, PktFlags, PutRndvPkt};
use ridge_rma::loopback::Primitive;
use ridge_rma::{Engine, Operation, Origin, ResultBuffer, StreamCursor, Target};
use zerocopy::FromBytes;

use crate::*;

// ══════════════════════════════════════════════════════════════════════════════
//  Rendezvous Above the Eager Threshold
// ══════════════════════════════════════════════════════════════════════════════

/// 4096 doubles is 32 KiB, twice the loopback's eager threshold.
const LARGE: usize = 4096;

#[test]
fn test_large_put_starts_rendezvous() {
    let engine = Engine::default();
    let conn = loopback();
    let origin = Origin::new(ramp(LARGE), LARGE, BasicType::Float64);
    let mut op = Operation::put(origin, Target::new(PEER, 0, LARGE, BasicType::Float64)).unwrap();

    engine.issue(&mut op, &conn, PktFlags::UNLOCK).unwrap();

    let msgs = sent(&conn);
    assert_eq!(msgs.len(), 1);
    let msg = &msgs[0];
    assert_eq!(msg.primitive, Primitive::Rendezvous);
    assert_eq!(msg.list.header().len(), std::mem::size_of::<PutRndvPkt>());
    assert_eq!(decode_type_tag(msg.list.header()).unwrap(), PacketType::PutRndv);

    let hdr = PutRndvPkt::read_from(&msg.list.header()[..]).unwrap();
    let (data_sz, count) = (hdr.data_sz, hdr.put.count);
    assert_eq!(data_sz, (LARGE * 8) as u64);
    assert_eq!(count, LARGE as u64);
    assert!(header_flags(msg).contains(PktFlags::UNLOCK));
    assert_eq!(payload(msg), &ramp(LARGE)[..]);

    // Tracked by a request until the transport finishes it.
    assert_eq!(op.requests().len(), 1);
    assert_eq!(engine.pool().live(), 1);
    conn.poll().unwrap();
    assert!(op.is_complete());
}

#[test]
fn test_put_at_threshold_stays_eager() {
    let engine = Engine::default();
    let conn = loopback();
    // 48-byte header plus 2042 doubles is 16 384 bytes exactly.
    let n = 2042;
    let origin = Origin::new(ramp(n), n, BasicType::Float64);
    let mut op = Operation::put(origin, Target::new(PEER, 0, n, BasicType::Float64)).unwrap();

    engine.issue(&mut op, &conn, PktFlags::NONE).unwrap();

    let msgs = sent(&conn);
    assert_eq!(msgs[0].primitive, Primitive::Immediate);
    assert_eq!(msgs[0].wire.len(), 16_384);
    assert_eq!(decode_type_tag(msgs[0].list.header()).unwrap(), PacketType::Put);
}

#[test]
fn test_large_accumulate_starts_rendezvous() {
    let engine = Engine::default();
    let conn = loopback();
    let origin = Origin::new(ramp(LARGE), LARGE, BasicType::Float64);
    let mut op =
        Operation::accumulate(origin, Target::new(PEER, 0, LARGE, BasicType::Float64), AccOp::Sum)
            .unwrap();

    engine.issue(&mut op, &conn, PktFlags::NONE).unwrap();

    let msgs = sent(&conn);
    assert_eq!(msgs.len(), 1);
    assert_eq!(msgs[0].primitive, Primitive::Rendezvous);
    assert_eq!(decode_type_tag(msgs[0].list.header()).unwrap(), PacketType::AccumulateRndv);
    let hdr = AccumRndvPkt::read_from(&msgs[0].list.header()[..]).unwrap();
    let (data_sz, op_code) = (hdr.data_sz, hdr.accum.op);
    assert_eq!(data_sz, (LARGE * 8) as u64);
    assert_eq!(op_code, AccOp::Sum as u8);
    assert!(msgs[0].list.ext().is_none());
    assert_eq!(op.cursor(), StreamCursor::AllIssued);
}

/// The rendezvous header keeps the response handle, so the reply still
/// finds its registered response.
#[test]
fn test_large_get_accumulate_keeps_response() {
    let engine = Engine::default();
    let conn = loopback();
    let mut op = Operation::get_accumulate(
        Origin::new(ramp(LARGE), LARGE, BasicType::Float64),
        Target::new(PEER, 0, LARGE, BasicType::Float64),
        ResultBuffer::new(LARGE, BasicType::Float64.into()),
        AccOp::Sum,
    )
    .unwrap();

    engine.issue(&mut op, &conn, PktFlags::NONE).unwrap();

    let msgs = sent(&conn);
    assert_eq!(msgs[0].primitive, Primitive::Rendezvous);
    assert_eq!(decode_type_tag(msgs[0].list.header()).unwrap(), PacketType::GetAccumRndv);
    let hdr = AccumRndvPkt::read_from(&msgs[0].list.header()[..]).unwrap();
    let handle = hdr.accum.request_handle;
    assert!(engine.table().contains(handle));
    assert_eq!(op.requests().iter().next().unwrap().handle(), handle);
}

/// Streamed units go out under a request already; the threshold applies
/// to the header-plus-payload path only.
#[test]
fn test_streamed_units_are_not_rewritten() {
    let engine = engine_with_unit(32_768);
    let conn = loopback();
    let n = 2 * LARGE;
    let origin = Origin::new(ramp(n), n, BasicType::Float64);
    let mut op =
        Operation::accumulate(origin, Target::new(PEER, 0, n, BasicType::Float64), AccOp::Sum)
            .unwrap();

    engine.issue(&mut op, &conn, PktFlags::NONE).unwrap();

    let msgs = sent(&conn);
    assert_eq!(msgs.len(), 2);
    for msg in &msgs {
        assert_eq!(msg.primitive, Primitive::WithRequest);
        assert_eq!(decode_type_tag(msg.list.header()).unwrap(), PacketType::Accumulate);
    }
}
