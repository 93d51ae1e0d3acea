//! PC host for the ledgrid controller.
//!
//! Runs the full controller (protocol server, render loop, console)
//! against simulated hardware: an in-memory strip driver, a file-backed
//! key/value store, and a file-backed firmware sink. Useful for driving
//! the panel protocol from host tooling without a board attached.

use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use ledgrid_core::server::KV_NAMESPACE;
use ledgrid_core::{Layout, ServerConfig};

mod ota;
mod shaders;
mod storage;
mod strip;

fn main() {
    env_logger::init();
    log::info!("ledgrid-pc: hosted LED controller starting");

    let data_dir = std::env::var_os("LEDGRID_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("ledgrid-data"));

    let kv = match storage::FileKvStore::open(&data_dir, KV_NAMESPACE) {
        Ok(kv) => kv,
        Err(err) => {
            log::error!("ledgrid-pc: cannot open data dir {}: {err}", data_dir.display());
            std::process::exit(1);
        }
    };
    let ota = ota::FileOtaUpdater::new(data_dir.join("firmware"));
    let driver = strip::SimStripDriver::new();

    let mut config = ServerConfig {
        native_shaders: &shaders::NATIVE_SHADERS,
        ..ServerConfig::default()
    };
    if let Some(port) = env_port("LEDGRID_PORT") {
        config.port = port;
    }
    if let Some(port) = env_port("LEDGRID_CONSOLE_PORT") {
        config.console_port = Some(port);
    }

    match ledgrid_core::start(Layout::default(), driver, kv, ota, config) {
        Ok(handle) => {
            log::info!(
                "ledgrid-pc: protocol on port {}, console on port {:?}",
                handle.port(),
                handle.console_port()
            );
            loop {
                thread::sleep(Duration::from_secs(3600));
            }
        }
        Err(err) => {
            log::error!("ledgrid-pc: controller start failed: {err:?}");
            std::process::exit(1);
        }
    }
}

fn env_port(name: &str) -> Option<u16> {
    let value = std::env::var(name).ok()?;
    match value.parse() {
        Ok(port) => Some(port),
        Err(_) => {
            log::warn!("ignoring invalid {name}={value}");
            None
        }
    }
}
