//! Shared-state sync server
//!
//! Run with: cargo run --example room_server [BIND_ADDR]
//!
//! Examples:
//!   cargo run --example room_server                  # binds to 0.0.0.0:8080
//!   cargo run --example room_server 127.0.0.1:9000   # binds to 127.0.0.1:9000
//!
//! Clients connect to ws://<addr>/ws. Press Ctrl+C to stop; the final
//! counters are printed on exit.

use std::net::SocketAddr;
use std::time::Duration;

use statesync::{ServerConfig, SyncServer};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let bind_addr: SocketAddr = match std::env::args().nth(1) {
        Some(addr) => addr.parse()?,
        None => SocketAddr::from(([0, 0, 0, 0], 8080)),
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("statesync=debug".parse()?)
                .add_directive("room_server=debug".parse()?),
        )
        .init();

    let config = ServerConfig::with_addr(bind_addr).ping_interval(Duration::from_secs(15));
    println!("Starting sync server on ws://{}{}", config.bind_addr, config.path);

    let server = SyncServer::new(config);
    server
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    let stats = server.context().stats().snapshot();
    println!();
    println!("=== Final Stats ===");
    println!("Connections accepted: {}", stats.connections_accepted);
    println!("Connections evicted:  {}", stats.connections_evicted);
    println!("Messages received:    {}", stats.messages_received);
    println!("Malformed messages:   {}", stats.malformed_messages);
    println!("Updates applied:      {}", stats.updates_applied);
    println!("Messages delivered:   {}", stats.messages_delivered);

    Ok(())
}
