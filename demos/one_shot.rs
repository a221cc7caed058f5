//! # Example: one_shot
//!
//! Awaiting a single event, with and without a deadline.
//!
//! ## Flow
//! ```text
//! listen().key("ready").once() ──► publish(..."booting") ──► ignored
//!                               ──► publish(..."ready")   ──► Ok(event)
//! listen().key("never").timeout(100ms).once() ──► Err(BusError::Timeout)
//! get() ──► close() ──► Err(BusError::Closed)
//! ```
//!
//! ## Run
//! ```bash
//! cargo run --example one_shot
//! ```

use std::time::Duration;

use flowbus::{Bus, BusError, Config};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_max_level(tracing::Level::DEBUG).init();

    let status: Bus<String> = Bus::builder("status").with_config(Config::direct()).build();

    let ready = status.listen().key("ready").once();
    status.publish_with(Some("booting"), None, "warming caches".into());
    status.publish_with(Some("ready"), None, "listening on :8080".into());

    let ev = ready.await?;
    println!("[one_shot] #{} {:?}: {:?}", ev.sequence(), ev.key(), ev.data());

    let never = status.listen().key("never").timeout(Duration::from_millis(100)).once();
    match never.await {
        Err(err @ BusError::Timeout { .. }) => println!("[one_shot] {err} ({})", err.as_label()),
        other => anyhow::bail!("unexpected outcome: {other:?}"),
    }

    let next = status.get();
    status.close();
    match next.await {
        Err(BusError::Closed) => println!("[one_shot] bus closed before any payload"),
        other => anyhow::bail!("unexpected outcome: {other:?}"),
    }
    Ok(())
}
