//! Sends periodic pings to whatever `pong` actor discovery turns up,
//! in-process or over the network. Pair with `pong.rs`.

use std::time::Duration;

use actor_mesh::{Container, SendOptions, StartParams};
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

    container.add_actor("ping", |_ctx, _msg| {}).await?;

    let mut tick = tokio::time::interval(Duration::from_secs(1));
    loop {
        tick.tick().await;
        container.send(
            "ping",
            "pong",
            json!("ping"),
            SendOptions::new().timeout(2_000).callback(|err, res| {
                match err {
                    Some(e) => tracing::warn!(?e, "ping failed"),
                    None => tracing::info!(content = %res.content, "pong replied"),
                }
            }),
        );
    }
}
