use ridge_core::config::{ConfigError, RidgeConfig};
use ridge_core::layout::BasicType;
use ridge_core::wire::{AccOp, PktFlags};
use ridge_rma::loopback::RecordingTransport;
use ridge_rma::{Connection, Engine, Operation, Origin, Target};

use crate::*;

// ══════════════════════════════════════════════════════════════════════════════
//  Configuration
// ══════════════════════════════════════════════════════════════════════════════

/// Loads a file through RIDGE_CONFIG and drives an engine with it. Kept
/// as one test since it sets process-wide environment variables.
#[test]
fn test_config_file_drives_engine() -> anyhow::Result<()> {
    let dir = std::env::temp_dir().join(format!("ridge-it-{}", std::process::id()));
    std::fs::create_dir_all(&dir)?;
    let path = dir.join("config.toml");
    std::env::set_var("RIDGE_CONFIG", &path);

    // missing file: defaults, then written out
    let _ = std::fs::remove_file(&path);
    let config = RidgeConfig::load()?;
    assert_eq!(config.rma.stream_unit_bytes, 65_536);
    assert_eq!(RidgeConfig::write_default_if_missing()?, path);
    assert!(path.exists());

    std::fs::write(
        &path,
        "[rma]\nstream_unit_bytes = 128\n\n[transport]\nnon_contiguous = false\n",
    )?;
    let config = RidgeConfig::load()?;
    assert_eq!(config.rma.stream_unit_bytes, 128);
    assert!(config.rma.replace_ordering);
    assert!(!config.transport.non_contiguous);

    let engine = Engine::new(config.rma.clone());
    let conn = Connection::new(PEER, RecordingTransport::from_config(&config.transport));
    let origin = Origin::new(ramp(64), 64, BasicType::Float64);
    let mut op =
        Operation::accumulate(origin, Target::new(PEER, 0, 64, BasicType::Float64), AccOp::Sum)?;
    engine.issue(&mut op, &conn, PktFlags::NONE)?;
    assert_eq!(sent(&conn).len(), 4);

    std::fs::write(&path, "[rma]\nstream_unit_bytes = 0\n")?;
    assert!(matches!(
        RidgeConfig::load(),
        Err(ConfigError::InvalidValue("rma.stream_unit_bytes", _))
    ));

    std::fs::write(&path, "[rma\n")?;
    assert!(matches!(RidgeConfig::load(), Err(ConfigError::ParseFailed(..))));

    std::env::remove_var("RIDGE_CONFIG");
    std::fs::remove_dir_all(&dir)?;
    Ok(())
}
