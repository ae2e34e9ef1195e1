use bytes::Bytes;

use ridge_core::layout::{BasicType, DerivedLayout};
use ridge_core::wire::{AccOp, PktFlags, PutPkt};
use ridge_rma::loopback::Primitive;
use ridge_rma::{Capabilities, Engine, Operation, Origin, Target};

use crate::*;

// ══════════════════════════════════════════════════════════════════════════════
//  Non-contiguous Origins
// ══════════════════════════════════════════════════════════════════════════════

/// Two instances of three 2-byte blocks, stride 4: 12 packed bytes out of 20.
fn strided_put() -> Operation {
    let layout = DerivedLayout::vector(3, 2, 4, BasicType::Byte).unwrap();
    let data: Vec<u8> = (0..20).collect();
    let origin = Origin::new(data, 2, layout);
    Operation::put(origin, Target::new(PEER, 0, 12, BasicType::Byte)).unwrap()
}

const PACKED: [u8; 12] = [0, 1, 4, 5, 8, 9, 10, 11, 14, 15, 18, 19];

#[test]
fn test_native_non_contiguous_put() {
    let engine = Engine::default();
    let conn = loopback();
    let mut op = strided_put();

    engine.issue(&mut op, &conn, PktFlags::NONE).unwrap();

    let msgs = sent(&conn);
    assert_eq!(msgs.len(), 1);
    assert_eq!(msgs[0].primitive, Primitive::NonContiguous);
    // the transport packed it; the list itself carries no payload
    assert!(msgs[0].list.payload().is_empty());
    assert_eq!(&msgs[0].wire[..std::mem::size_of::<PutPkt>()], &msgs[0].list.header()[..]);
    assert_eq!(payload(&msgs[0]), &PACKED);

    let req = op.requests().iter().next().unwrap();
    assert_eq!(req.segment().unwrap().len(), 12);
    assert!(req.datatype().is_some());
}

#[test]
fn test_staged_non_contiguous_put() {
    let engine = Engine::default();
    let conn = connection(Capabilities {
        eager_max_msg_size: 16_384,
        non_contiguous: false,
    });
    let mut op = strided_put();

    engine.issue(&mut op, &conn, PktFlags::NONE).unwrap();

    let msgs = sent(&conn);
    assert_eq!(msgs.len(), 1);
    assert_eq!(msgs[0].primitive, Primitive::WithRequest);
    assert_eq!(msgs[0].list.payload(), &[Bytes::copy_from_slice(&PACKED)]);
    assert_eq!(payload(&msgs[0]), &PACKED);
}

/// Each streaming unit of a strided origin packs its own window.
#[test]
fn test_streamed_strided_accumulate_packs_each_window() {
    let engine = engine_with_unit(64);
    let conn = loopback();
    // two doubles per instance, 16 bytes apart; extent 24
    let layout = DerivedLayout::vector(2, 1, 2, BasicType::Float64).unwrap();
    let mut data = vec![0u8; 8 * 24];
    for k in 0..16usize {
        let at = (k / 2) * 24 + (k % 2) * 16;
        data[at..at + 8].copy_from_slice(&(k as f64).to_ne_bytes());
    }
    let origin = Origin::new(data, 8, layout);
    let mut op =
        Operation::accumulate(origin, Target::new(PEER, 0, 16, BasicType::Float64), AccOp::Sum).unwrap();

    engine.issue(&mut op, &conn, PktFlags::NONE).unwrap();

    let msgs = sent(&conn);
    assert_eq!(msgs.len(), 2);
    assert!(msgs.iter().all(|m| m.primitive == Primitive::NonContiguous));
    let joined: Vec<u8> = msgs.iter().flat_map(|m| payload(m).to_vec()).collect();
    assert_eq!(joined, ramp(16).to_vec());
}
