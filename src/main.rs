//! memstore demo entry point.
//!
//! Runs a storage round trip on the selected engine kind:
//! - write a pattern through the host bridge and read it back
//! - map a sub-storage and check it sees the right slice
//! - clone the storage and check writes are shared
//!
//! ## Usage
//!
//! - `memstore-demo` - host engine (default)
//! - `memstore-demo host|cpu` - host-unified engine
//! - `memstore-demo device|gpu` - discrete-device engine

use std::process::ExitCode;

use memstore::telemetry::{init_logging, LogConfig, LogFormat};
use memstore::{
    read_from_storage, write_to_storage, Engine, EngineConfig, EngineKind, MemoryStorage, Status,
    StorageError,
};

const PATTERN_LEN: usize = 256;

/// Failure of the demo: either the library reported an error or the data
/// did not come back as written.
enum DemoError {
    Storage(StorageError),
    Mismatch(String),
}

impl From<StorageError> for DemoError {
    fn from(e: StorageError) -> Self {
        DemoError::Storage(e)
    }
}

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();

    let mut config = EngineConfig::from_env();
    match args.len() {
        1 => {}
        2 => match args[1].as_str() {
            "help" | "--help" | "-h" => {
                print_usage();
                return ExitCode::SUCCESS;
            }
            "version" | "--version" | "-V" => {
                println!("memstore-demo {}", env!("CARGO_PKG_VERSION"));
                return ExitCode::SUCCESS;
            }
            kind => match kind.parse::<EngineKind>() {
                Ok(kind) => config.kind = kind,
                Err(_) => {
                    eprintln!("Inappropriate engine kind '{}'", kind);
                    print_usage();
                    return ExitCode::FAILURE;
                }
            },
        },
        _ => {
            print_usage();
            return ExitCode::FAILURE;
        }
    }

    let mut log_config = LogConfig::from_env();
    if std::env::var_os("MEMSTORE_LOG_FORMAT").is_none() {
        log_config.format = LogFormat::Pretty;
    }
    if std::env::var_os("MEMSTORE_LOG").is_none() && std::env::var_os("RUST_LOG").is_none() {
        log_config.level = "warn".to_string();
    }
    if let Err(e) = init_logging(&log_config) {
        eprintln!("Logging disabled: {}", e);
    }

    if config.kind == EngineKind::DiscreteDevice && config.device_count == 0 {
        println!("No discrete device found, please run with the host engine instead.");
        return ExitCode::SUCCESS;
    }

    let code = match run_demo(&config) {
        Ok(()) => 0,
        Err(DemoError::Storage(e)) if e.status() == Status::Unimplemented => {
            println!("{}", e);
            0
        }
        Err(DemoError::Storage(e)) => {
            println!("Storage error caught:");
            println!("\tStatus: {}", e.status());
            println!("\tMessage: {}", e);
            1
        }
        Err(DemoError::Mismatch(msg)) => {
            println!("Error in the demo: {}", msg);
            2
        }
    };

    println!("Demo {}", if code == 0 { "passed" } else { "failed" });
    ExitCode::from(code)
}

fn run_demo(config: &EngineConfig) -> Result<(), DemoError> {
    let engine = Engine::new(config)?;
    let storage = MemoryStorage::allocate(engine, PATTERN_LEN)?;

    let pattern: Vec<u8> = (0..PATTERN_LEN).map(|i| (i * 7 % 251) as u8).collect();
    write_to_storage(&pattern, &storage)?;

    let mut readback = vec![0u8; PATTERN_LEN];
    read_from_storage(&mut readback, &storage)?;
    if readback != pattern {
        return Err(DemoError::Mismatch("round trip returned different bytes".into()));
    }

    let (offset, len) = (64, 32);
    let sub = storage.get_sub_storage(offset, len)?;
    let mapped = sub.map_data()?;
    // Safety: the mapping is open and covers `len` bytes.
    let window = unsafe { mapped.as_slice(len) }.to_vec();
    sub.unmap_data(mapped)?;
    if window != pattern[offset..offset + len] {
        return Err(DemoError::Mismatch(format!(
            "sub-storage [{offset}, +{len}) does not match parent"
        )));
    }

    let alias = storage.clone();
    write_to_storage(&vec![0xFF; PATTERN_LEN], &alias)?;
    read_from_storage(&mut readback, &storage)?;
    if readback.iter().any(|b| *b != 0xFF) {
        return Err(DemoError::Mismatch("clone does not share the buffer".into()));
    }

    println!(
        "{} engine: {} bytes round-tripped, sub-storage and clone verified",
        config.kind, PATTERN_LEN
    );
    Ok(())
}

fn print_usage() {
    let version = env!("CARGO_PKG_VERSION");
    eprintln!(
        "memstore-demo v{}

USAGE:
    memstore-demo [ENGINE]

ENGINE:
    host, cpu      Host-unified engine (default)
    device, gpu    Discrete-device engine

ENVIRONMENT:
    MEMSTORE_ENGINE_KIND      Engine kind when no argument is given
    MEMSTORE_DEVICE_INDEX     Device index (default: 0)
    MEMSTORE_DEVICE_COUNT     Discrete devices present (default: 1)
    MEMSTORE_MEMORY_CAPACITY  Allocator capacity in bytes (default: 1 GiB)
    MEMSTORE_QUEUE_NAME       Command queue thread name
    MEMSTORE_LOG, RUST_LOG    Log filter (default: warn)
    MEMSTORE_LOG_FORMAT       Log format, json or pretty (default: pretty)
    MEMSTORE_LOG_FILE         Write logs to a file instead of stderr

EXIT CODES:
    0  Demo passed, or feature unavailable on this system
    1  Storage error or bad usage
    2  Demo data mismatch",
        version
    );
}
