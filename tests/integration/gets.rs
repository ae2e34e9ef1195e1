use ridge_core::layout::{BasicType, DerivedLayout};
use ridge_core::wire::{GetDerivedExt, GetPkt, PktFlags};
use ridge_rma::loopback::Primitive;
use ridge_rma::{Capabilities, Engine, Operation, ResultBuffer, Target};
use zerocopy::FromBytes;

use crate::*;

// ══════════════════════════════════════════════════════════════════════════════
//  Get
// ══════════════════════════════════════════════════════════════════════════════

fn get(n: usize, target: Target) -> Operation {
    Operation::get(ResultBuffer::new(n, BasicType::Float64.into()), target)
}

#[test]
fn test_get_predefined_target_is_header_only() {
    let engine = Engine::default();
    let conn = loopback();
    let mut op = get(16, Target::new(PEER, 64, 16, BasicType::Float64));

    engine.issue(&mut op, &conn, PktFlags::NONE).unwrap();

    let msgs = sent(&conn);
    assert_eq!(msgs.len(), 1);
    assert_eq!(msgs[0].primitive, Primitive::Immediate);
    assert_eq!(msgs[0].wire.len(), std::mem::size_of::<GetPkt>());

    let hdr = GetPkt::read_from_prefix(&msgs[0].wire[..]).unwrap();
    let (handle, rndv, disp) = (hdr.request_handle, hdr.rndv_mode, hdr.target_disp);
    assert_eq!(rndv, 0);
    assert_eq!(disp, 64);
    assert!(engine.table().contains(handle));
    assert_eq!(op.requests().iter().next().unwrap().handle(), handle);
    assert!(op.is_fully_issued());
}

/// A derived target sends header plus layout header; the response keeps
/// that layout header, and it is the only request alive.
#[test]
fn test_get_derived_target_carries_layout() {
    let engine = Engine::default();
    let conn = loopback();
    let layout = DerivedLayout::vector(4, 1, 2, BasicType::Float64).unwrap();
    let mut op = get(8, Target::new(PEER, 0, 2, layout.clone()));

    engine.issue(&mut op, &conn, PktFlags::NONE).unwrap();

    let expected = std::mem::size_of::<GetDerivedExt>() + layout.program().len();
    let msgs = sent(&conn);
    assert_eq!(msgs.len(), 1);
    assert_eq!(msgs[0].list.entry_count(), 2);
    assert_eq!(msgs[0].list.ext().unwrap().len(), expected);

    let hdr = GetPkt::read_from_prefix(&msgs[0].wire[..]).unwrap();
    let program_size = hdr.program_size;
    assert_eq!(program_size as usize, layout.program().len());

    let resp = op.requests().iter().next().unwrap();
    assert_eq!(resp.ext_header().unwrap().len(), expected);
    assert_eq!(engine.pool().live(), 1);
    // one clone with the operation, one with the table
    assert_eq!(resp.ref_count(), 2);
}

/// Replies larger than the eager limit ask for rendezvous.
#[test]
fn test_large_get_requests_rendezvous() {
    let engine = Engine::default();
    let conn = connection(Capabilities {
        eager_max_msg_size: 1024,
        non_contiguous: true,
    });

    let mut small = get(64, Target::new(PEER, 0, 64, BasicType::Float64));
    let mut large = get(256, Target::new(PEER, 0, 256, BasicType::Float64));
    engine.issue(&mut small, &conn, PktFlags::NONE).unwrap();
    engine.issue(&mut large, &conn, PktFlags::NONE).unwrap();

    let msgs = sent(&conn);
    let rndv: Vec<u8> = msgs
        .iter()
        .map(|m| GetPkt::read_from_prefix(&m.wire[..]).unwrap().rndv_mode)
        .collect();
    assert_eq!(rndv, vec![0, 1]);
}

/// The progress engine takes the response out of the table and completes
/// it; the operation sees the completion.
#[test]
fn test_response_completion_reaches_operation() {
    let engine = Engine::default();
    let conn = loopback();
    let mut op = get(4, Target::new(PEER, 0, 4, BasicType::Float64));
    engine.issue(&mut op, &conn, PktFlags::NONE).unwrap();

    let handle = op.requests().iter().next().unwrap().handle();
    let resp = engine.table().take(handle).unwrap();
    resp.response().unwrap().buf.lock().unwrap()[..8].copy_from_slice(&1.5f64.to_ne_bytes());
    resp.complete();
    drop(resp);

    assert!(op.is_complete());
    assert!(engine.table().is_empty());
    assert_eq!(op.release_requests(), 1);
    assert_eq!(engine.pool().live(), 0);
}
