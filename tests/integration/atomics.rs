use ridge_core::layout::BasicType;
use ridge_core::wire::{AccOp, CasPkt, FopPkt, PacketType, PktFlags};
use ridge_rma::{Engine, Operation, Origin, ResultBuffer, Target};
use zerocopy::FromBytes;

use crate::*;

// ══════════════════════════════════════════════════════════════════════════════
//  Compare-and-swap and Fetch-and-op
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_cas_sends_both_values_inline() {
    let engine = Engine::default();
    let conn = loopback();
    let origin = Origin::new(5i64.to_ne_bytes().to_vec(), 1, BasicType::Int64);
    let result = ResultBuffer::new(1, BasicType::Int64.into());
    let mut op = Operation::compare_and_swap(
        origin,
        &3i64.to_ne_bytes(),
        Target::new(PEER, 24, 1, BasicType::Int64),
        result,
    )
    .unwrap();

    engine.issue(&mut op, &conn, PktFlags::REQ_ACK).unwrap();

    let msgs = sent(&conn);
    assert_eq!(msgs.len(), 1);
    assert_eq!(msgs[0].wire.len(), std::mem::size_of::<CasPkt>());
    let hdr = CasPkt::read_from_prefix(&msgs[0].wire[..]).unwrap();
    let (kind, origin, compare, handle) = (hdr.pkt_type, hdr.origin, hdr.compare, hdr.request_handle);
    assert_eq!(kind, PacketType::CasImmed as u8);
    assert_eq!(origin, 5i64.to_ne_bytes());
    assert_eq!(compare, 3i64.to_ne_bytes());
    assert!(header_flags(&msgs[0]).contains(PktFlags::REQ_ACK));
    assert!(engine.table().contains(handle));
    assert_eq!(engine.pool().live(), 1);
}

#[test]
fn test_fetch_and_op_inline() {
    let engine = Engine::default();
    let conn = loopback();
    let origin = Origin::new(7i32.to_ne_bytes().to_vec(), 1, BasicType::Int32);
    let result = ResultBuffer::new(1, BasicType::Int32.into());
    let mut op =
        Operation::fetch_and_op(origin, Target::new(PEER, 0, 1, BasicType::Int32), result, AccOp::Sum)
            .unwrap();

    engine.issue(&mut op, &conn, PktFlags::NONE).unwrap();

    let msgs = sent(&conn);
    assert_eq!(msgs.len(), 1);
    assert_eq!(msgs[0].wire.len(), std::mem::size_of::<FopPkt>());
    let hdr = FopPkt::read_from_prefix(&msgs[0].wire[..]).unwrap();
    let (kind, len, immed) = (hdr.pkt_type, hdr.immed_len, hdr.immed);
    assert_eq!(kind, PacketType::FopImmed as u8);
    assert_eq!(len, 4);
    assert_eq!(&immed[..4], &7i32.to_ne_bytes());
    assert_eq!(engine.table().len(), 1);
}

/// Operands wider than the inline area follow the header as payload.
#[test]
fn test_wide_fetch_and_op_sends_payload() {
    let engine = Engine::default();
    let conn = loopback();
    let operand: Vec<u8> = (1..=16).collect();
    let origin = Origin::new(operand.clone(), 1, BasicType::Complex128);
    let result = ResultBuffer::new(1, BasicType::Complex128.into());
    let mut op = Operation::fetch_and_op(
        origin,
        Target::new(PEER, 0, 1, BasicType::Complex128),
        result,
        AccOp::Sum,
    )
    .unwrap();

    engine.issue(&mut op, &conn, PktFlags::NONE).unwrap();

    let msgs = sent(&conn);
    assert_eq!(msgs.len(), 1);
    let hdr = FopPkt::read_from_prefix(&msgs[0].wire[..]).unwrap();
    let kind = hdr.pkt_type;
    assert_eq!(kind, PacketType::Fop as u8);
    assert_eq!(payload(&msgs[0]), &operand[..]);
    // only the response survives; the send needed no request
    assert_eq!(engine.pool().live(), 1);
    assert!(op.is_fully_issued());
}

#[test]
fn test_fetch_only_wide_fop_has_no_payload() {
    let engine = Engine::default();
    let conn = loopback();
    let result = ResultBuffer::new(1, BasicType::Complex128.into());
    let mut op = Operation::fetch_and_op(
        Origin::empty(BasicType::Complex128),
        Target::new(PEER, 0, 1, BasicType::Complex128),
        result,
        AccOp::NoOp,
    )
    .unwrap();

    engine.issue(&mut op, &conn, PktFlags::NONE).unwrap();

    let msgs = sent(&conn);
    assert_eq!(msgs.len(), 1);
    assert!(payload(&msgs[0]).is_empty());
}
