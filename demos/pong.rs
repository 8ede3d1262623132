//! Hosts a `pong` actor that echoes back whatever content it receives.
//! Pair with `ping.rs`: `cargo run --example pong`, then `cargo run
//! --example ping` in another shell.

use actor_mesh::{Container, StartParams};
use serde_json::json;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let handle = tokio::runtime::Handle::current();
    let container = Container::builder().spawn(&handle);
    container
        .start(StartParams {
            discovery_port: Some(5555),
            ..Default::default()
        })
        .await?;

    container
        .add_actor("pong", |ctx, msg| {
            tracing::info!(from = %msg.from, content = %msg.content, "pong received");
            msg.reply(None, json!({ "echo": msg.content, "from": ctx.id.to_string() }));
        })
        .await?;

    tracing::info!("pong listening, press ctrl-c to exit");
    tokio::signal::ctrl_c().await?;
    container.stop().await;
    Ok(())
}
