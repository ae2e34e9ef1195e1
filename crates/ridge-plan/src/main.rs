//! ridge-plan: issue one RMA operation against the loopback transport and
//! print every transfer list the engine produced, one JSON object per line.

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use serde::Serialize;

use ridge_core::config::RidgeConfig;
use ridge_core::layout::{BasicType, Datatype, DerivedLayout};
use ridge_core::wire::{decode_type_tag, AccOp, PktFlags};
use ridge_rma::loopback::{RecordingTransport, SentMessage};
use ridge_rma::{Connection, Engine, Operation, Origin, ResultBuffer, Target};

/// Rank the loopback peer pretends to be.
const PEER_RANK: u32 = 1;

/// Passes before giving up on an operation that will not finish issuing.
const MAX_PASSES: usize = 1024;

// ── Arguments ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Put,
    Get,
    Acc,
    GetAcc,
    Cas,
    Fop,
}

#[derive(Debug)]
struct PlanArgs {
    kind: Kind,
    basic: BasicType,
    count: usize,
    op: AccOp,
    flags: PktFlags,
    origin_vector: Option<(usize, usize, i64)>,
    target_vector: Option<(usize, usize, i64)>,
    unit_bytes: Option<usize>,
    staged: bool,
    hold: bool,
}

fn parse_kind(s: &str) -> Result<Kind> {
    Ok(match s {
        "put" => Kind::Put,
        "get" => Kind::Get,
        "acc" => Kind::Acc,
        "get-acc" => Kind::GetAcc,
        "cas" => Kind::Cas,
        "fop" => Kind::Fop,
        other => bail!("unknown operation: {other}"),
    })
}

fn parse_op(s: &str) -> Result<AccOp> {
    Ok(match s {
        "sum" => AccOp::Sum,
        "prod" => AccOp::Prod,
        "max" => AccOp::Max,
        "min" => AccOp::Min,
        "land" => AccOp::Land,
        "band" => AccOp::Band,
        "lor" => AccOp::Lor,
        "bor" => AccOp::Bor,
        "lxor" => AccOp::Lxor,
        "bxor" => AccOp::Bxor,
        "replace" => AccOp::Replace,
        "no-op" => AccOp::NoOp,
        other => bail!("unknown operator: {other}"),
    })
}

fn parse_flags(s: &str) -> Result<PktFlags> {
    let mut flags = PktFlags::NONE;
    for name in s.split(',').filter(|n| !n.is_empty()) {
        flags |= match name {
            "lock-shared" => PktFlags::LOCK_SHARED,
            "lock-exclusive" => PktFlags::LOCK_EXCLUSIVE,
            "no-check" => PktFlags::LOCK_NO_CHECK,
            "unlock" => PktFlags::UNLOCK,
            "flush" => PktFlags::FLUSH,
            "decr" => PktFlags::DECR_AT_COUNTER,
            "ack" => PktFlags::REQ_ACK,
            other => bail!("unknown flag: {other}"),
        };
    }
    Ok(flags)
}

/// `N,B,S`: N blocks of B elements, block starts S elements apart.
fn parse_vector(s: &str) -> Result<(usize, usize, i64)> {
    let parts: Vec<&str> = s.split(',').collect();
    let [n, b, st] = parts.as_slice() else {
        bail!("vector layout must be N,B,S (got {s})");
    };
    Ok((
        n.parse().context("vector block count")?,
        b.parse().context("vector block length")?,
        st.parse().context("vector stride")?,
    ))
}

/// The value following the option at `*i`.
fn value<'a>(args: &'a [String], i: &mut usize) -> Result<&'a str> {
    let flag = &args[*i];
    *i += 1;
    args.get(*i)
        .map(String::as_str)
        .with_context(|| format!("{flag} requires a value"))
}

fn parse_args(args: &[String]) -> Result<PlanArgs> {
    let mut positional: Vec<&str> = Vec::new();
    let mut op = AccOp::Sum;
    let mut flags = PktFlags::NONE;
    let mut origin_vector = None;
    let mut target_vector = None;
    let mut unit_bytes = None;
    let mut staged = false;
    let mut hold = false;

    let mut i = 0;
    while i < args.len() {
        let arg = args[i].as_str();
        match arg {
            "--op" => op = parse_op(value(args, &mut i)?)?,
            "--flags" => flags = parse_flags(value(args, &mut i)?)?,
            "--origin-vector" => origin_vector = Some(parse_vector(value(args, &mut i)?)?),
            "--target-vector" => target_vector = Some(parse_vector(value(args, &mut i)?)?),
            "--unit" => {
                unit_bytes = Some(value(args, &mut i)?.parse().context("--unit must be a number")?)
            }
            "--staged" => staged = true,
            "--hold" => hold = true,
            _ => positional.push(arg),
        }
        i += 1;
    }

    let (kind, basic, count) = match positional.as_slice() {
        [kind, basic] => (parse_kind(kind)?, basic.parse::<BasicType>()?, 1),
        [kind, basic, count] => (
            parse_kind(kind)?,
            basic.parse::<BasicType>()?,
            count.parse().context("count must be a number")?,
        ),
        _ => bail!("expected <operation> <type> [count]"),
    };

    Ok(PlanArgs {
        kind,
        basic,
        count,
        op,
        flags,
        origin_vector,
        target_vector,
        unit_bytes,
        staged,
        hold,
    })
}

fn print_usage() {
    println!("ridge-plan: show the transfer lists an RMA operation turns into");
    println!();
    println!("USAGE:");
    println!("  ridge-plan <put|get|acc|get-acc|cas|fop> <type> [count] [options]");
    println!("  ridge-plan config [init]");
    println!();
    println!("TYPES: byte i8 u8 i16 u16 i32 u32 i64 u64 f32 f64 c64 c128");
    println!();
    println!("OPTIONS:");
    println!("  --op NAME            accumulate operator (sum, prod, max, min, replace, no-op, ...)");
    println!("  --flags A,B          lock-shared, lock-exclusive, no-check, unlock, flush, decr, ack");
    println!("  --origin-vector N,B,S  origin layout: N blocks of B elements every S elements");
    println!("  --target-vector N,B,S  same for the target");
    println!("  --unit BYTES         streaming unit budget");
    println!("  --staged             transport cannot pack non-contiguous buffers");
    println!("  --hold               immediate sends return a request");
}

// ── Operation Setup ───────────────────────────────────────────────────────────

fn layout(basic: BasicType, vector: Option<(usize, usize, i64)>) -> Result<Datatype> {
    Ok(match vector {
        Some((n, b, s)) => DerivedLayout::vector(n, b, s, basic)?.into(),
        None => basic.into(),
    })
}

/// Origin bytes spanning `count` instances, filled with a byte ramp.
fn origin_bytes(count: usize, datatype: &Datatype) -> Bytes {
    let span = count * datatype.size().max(datatype.extent().max(0) as usize);
    (0..span).map(|i| (i % 251) as u8).collect::<Vec<u8>>().into()
}

/// Compare-and-swap and fetch-and-op work on a single predefined element.
fn atomic_operation(args: &PlanArgs) -> Result<Operation> {
    let origin = Origin::new(origin_bytes(1, &args.basic.into()), 1, args.basic);
    let target = Target::new(PEER_RANK, 0, 1, args.basic);
    let result = ResultBuffer::new(1, args.basic.into());
    Ok(if args.kind == Kind::Cas {
        let compare = vec![0u8; args.basic.size()];
        Operation::compare_and_swap(origin, &compare, target, result)?
    } else {
        Operation::fetch_and_op(origin, target, result, args.op)?
    })
}

fn build_operation(args: &PlanArgs) -> Result<Operation> {
    if matches!(args.kind, Kind::Cas | Kind::Fop) {
        return atomic_operation(args);
    }

    let origin_dt = layout(args.basic, args.origin_vector)?;
    let target_dt = layout(args.basic, args.target_vector)?;
    let bytes = args.count * origin_dt.size();
    if bytes % target_dt.size() != 0 {
        bail!(
            "origin holds {bytes} bytes, not a whole number of target instances ({} bytes each)",
            target_dt.size()
        );
    }
    let target = Target::new(PEER_RANK, 0, bytes / target_dt.size(), target_dt);
    let origin = Origin::new(origin_bytes(args.count, &origin_dt), args.count, origin_dt.clone());
    let result = ResultBuffer::new(args.count, origin_dt);

    Ok(match args.kind {
        Kind::Put => Operation::put(origin, target)?,
        Kind::Get => Operation::get(result, target),
        Kind::Acc => Operation::accumulate(origin, target, args.op)?,
        _ => Operation::get_accumulate(origin, target, result, args.op)?,
    })
}

// ── Output ────────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct MessageLine {
    pass: usize,
    seq: usize,
    primitive: String,
    packet: String,
    flags: u16,
    request: Option<u64>,
    header: String,
    ext_len: usize,
    stream_offset: Option<u64>,
    payload_len: usize,
    wire_len: usize,
}

#[derive(Serialize)]
struct SummaryLine {
    passes: usize,
    cursor: String,
    requests: usize,
    responses_pending: usize,
    live_requests: usize,
}

fn message_line(pass: usize, seq: usize, msg: &SentMessage) -> MessageLine {
    let header = msg.list.header();
    let packet = decode_type_tag(header)
        .map(|t| format!("{t:?}"))
        .unwrap_or_else(|e| e.to_string());
    // Every header keeps its flags at bytes 2..4.
    let flags = header
        .get(2..4)
        .map(|b| u16::from_ne_bytes([b[0], b[1]]))
        .unwrap_or(0);
    let ext = msg.list.ext();
    let stream_offset = if PktFlags::from_bits_truncate(flags).contains(PktFlags::STREAM) {
        ext.and_then(|e| e.get(..8))
            .and_then(|b| b.try_into().ok())
            .map(u64::from_ne_bytes)
    } else {
        None
    };
    MessageLine {
        pass,
        seq,
        primitive: format!("{:?}", msg.primitive),
        packet,
        flags,
        request: msg.request,
        header: hex::encode(header),
        ext_len: ext.map_or(0, Bytes::len),
        stream_offset,
        payload_len: msg.wire.len() - header.len() - ext.map_or(0, Bytes::len),
        wire_len: msg.wire.len(),
    }
}

// ── Commands ──────────────────────────────────────────────────────────────────

fn cmd_plan(config: RidgeConfig, args: PlanArgs) -> Result<()> {
    let mut rma = config.rma;
    if let Some(unit) = args.unit_bytes {
        rma.stream_unit_bytes = unit;
    }
    let mut transport_config = config.transport;
    if args.staged {
        transport_config.non_contiguous = false;
    }

    let mut transport = RecordingTransport::from_config(&transport_config);
    if args.hold {
        transport = transport.hold_immediate();
    }
    let conn = Connection::new(PEER_RANK, transport);
    let engine = Engine::new(rma);
    let mut op = build_operation(&args)?;

    tracing::info!(kind = ?args.kind, basic = ?args.basic, count = args.count, "planning operation");

    let mut passes = 0;
    let mut printed = 0;
    while !op.is_fully_issued() {
        if passes == MAX_PASSES {
            bail!("operation still not issued after {MAX_PASSES} passes");
        }
        passes += 1;
        engine.issue(&mut op, &conn, args.flags)?;

        let lines = conn.with_transport(|t| {
            t.sent()[printed..]
                .iter()
                .enumerate()
                .map(|(i, msg)| message_line(passes, printed + i, msg))
                .collect::<Vec<_>>()
        })?;
        printed += lines.len();
        for line in lines {
            println!("{}", serde_json::to_string(&line)?);
        }
        conn.poll()?;
    }

    let summary = SummaryLine {
        passes,
        cursor: format!("{:?}", op.cursor()),
        requests: op.requests().len(),
        responses_pending: engine.table().len(),
        live_requests: engine.pool().live(),
    };
    println!("{}", serde_json::to_string(&summary)?);
    Ok(())
}

fn cmd_config(config: &RidgeConfig) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}

fn cmd_config_init() -> Result<()> {
    let path = RidgeConfig::write_default_if_missing().context("failed to write default config")?;
    println!("{}", path.display());
    Ok(())
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let config = RidgeConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        RidgeConfig::default()
    });

    match args.iter().map(String::as_str).collect::<Vec<_>>().as_slice() {
        ["config"] => cmd_config(&config),
        ["config", "init"] => cmd_config_init(),
        [] | ["help"] | ["--help"] | ["-h"] => {
            print_usage();
            Ok(())
        }
        _ => cmd_plan(config, parse_args(&args)?),
    }
}
