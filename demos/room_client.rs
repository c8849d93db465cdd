//! Shared counter client
//!
//! Run with: cargo run --example room_client [URL]
//!
//! Binds to `room1/score`, bumps it once a second and prints every value the
//! server pushes back. Start two clients against the same server to watch
//! them share the counter.

use std::time::Duration;

use serde_json::json;
use statesync::client::LifecycleHooks;
use statesync::{ClientConfig, Key, SyncClient};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "ws://127.0.0.1:8080/ws".to_string());

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("statesync=info".parse()?)
                .add_directive("room_client=debug".parse()?),
        )
        .init();

    let client = SyncClient::new(ClientConfig::new(url))?;
    let runtime = client.runtime().clone();

    let key = Key::from(["room1", "score"]);
    let mut score = runtime.bind_state(key.clone(), json!(0))?;
    let _status = runtime.bind_lifecycle(
        key.clone(),
        LifecycleHooks::new()
            .on_connect(|| tracing::info!("Connected"))
            .on_disconnect(|| tracing::warn!("Disconnected, updates will be queued")),
    )?;

    let task = client.spawn();
    let mut ticker = tokio::time::interval(Duration::from_secs(1));

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                runtime.update_with(&key, &json!(0), |v| json!(v.as_i64().unwrap_or(0) + 1));
            }
            value = score.changed() => {
                println!("score = {}", value?);
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    task.abort();
    Ok(())
}
