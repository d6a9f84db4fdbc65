//! Parley chat relay server
//!
//! A stateful TCP relay: authenticated sessions, room broadcast, private
//! and group messages with offline delivery, chat history replay, and
//! in-band file sharing.
//!
//! Usage:
//!   cargo run                              # defaults (127.0.0.1:9400, ./data)
//!   cargo run -- --port 7000               # override the listen port
//!   cargo run -- --config parley.json      # load settings from a file

use std::env;
use std::path::Path;

use parley::{RelayConfig, RelayServer};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let args: Vec<String> = env::args().collect();
    if args.iter().any(|a| a == "help" || a == "--help" || a == "-h") {
        print_usage();
        return Ok(());
    }

    let mut config = match flag_value(&args, "--config") {
        Some(path) => RelayConfig::from_file(Path::new(&path))?,
        None => RelayConfig::default(),
    };
    config = config.apply_env();

    if let Some(port) = flag_value(&args, "--port") {
        let port: u16 = port.parse().map_err(|_| {
            anyhow::anyhow!("invalid --port value: {}", port)
        })?;
        config.bind_addr.set_port(port);
    }
    if let Some(dir) = flag_value(&args, "--data-dir") {
        config.data_dir = dir.into();
    }

    info!(
        "Starting relay on {} with data dir {}",
        config.bind_addr,
        config.data_dir.display()
    );
    let server = RelayServer::bind(config).await?;
    server.run().await?;
    Ok(())
}

fn print_usage() {
    println!("Parley - TCP Chat Relay Server");
    println!();
    println!("USAGE:");
    println!("    cargo run -- [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    --port <PORT>        Port to listen on (default: 9400)");
    println!("    --data-dir <DIR>     State directory (default: ./data)");
    println!("    --config <FILE>      JSON config file");
    println!("    help                 Show this help message");
    println!();
    println!("ENVIRONMENT:");
    println!("    PARLEY_BIND_ADDR            Listen address, e.g. 0.0.0.0:9400");
    println!("    PARLEY_DATA_DIR             State directory");
    println!("    PARLEY_IDLE_TIMEOUT_SECS    Per-connection idle deadline");
    println!();
    println!("EXAMPLES:");
    println!("    cargo run");
    println!("    cargo run -- --port 7000 --data-dir /srv/parley");
    println!("    RUST_LOG=debug cargo run");
}

fn flag_value(args: &[String], flag: &str) -> Option<String> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}
