//! The in-process transport (spec §4.2): dispatch to a PROCESS actor's
//! handler, deferred to the next scheduling tick so a handler never runs
//! synchronously inside the caller's `send`. Never drops.

use crate::registry::{ActorContext, Handler, IncomingMessage};

pub fn dispatch(handler: Handler, ctx: ActorContext, msg: IncomingMessage) {
    tokio::spawn(async move {
        tokio::task::yield_now().await;
        if std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| handler(ctx, msg))).is_err() {
            tracing::warn!("actor handler panicked");
        }
    });
}
