//! The public façade: container lifecycle, `addActor`/`removeActor`,
//! middleware registration, tunables, and `send` (spec §4.4).
//!
//! The router actor (`router` submodule) owns all mutable state; this
//! module is a thin, chainable handle around an [`acto::ActoRef`] plus the
//! glue needed to present a synchronous-feeling, Rust-idiomatic API over an
//! asynchronous actor.

pub mod router;

use std::net::IpAddr;
use std::sync::Arc;

use acto::{AcTokio, ActoRuntime, SupervisionRef};
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::oneshot;

use crate::aid::Aid;
use crate::error::{ErrorCode, MeshError, ResponseError};
use crate::message::{Headers, Response};
use crate::middleware::MiddlewareFn;
use crate::registry::{ActorContext, Handler, IncomingMessage, StartParams};
use router::RouterMsg;

/// Invoked once with the final outcome of a `send` that registered interest
/// in a response (spec §3 `Request.cb`).
pub type ResponseCb = Box<dyn FnOnce(Option<ResponseError>, Response) + Send + 'static>;

/// `actor added`/`actor removed` notifications (spec §6).
#[derive(Clone, Debug)]
pub enum ContainerEvent {
    ActorAdded(String, crate::registry::Scope),
    ActorRemoved(String),
}

/// Accepted shapes for `send`'s trailing arguments, mirroring the original
/// dynamically-typed overloads (`timeout` as number, function, or object) —
/// collapsed here into one options bundle per spec §9's redesign note.
#[derive(Default)]
pub struct SendOptions {
    pub timeout: Option<u64>,
    pub headers: Option<Headers>,
    pub cb: Option<ResponseCb>,
}

impl SendOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn timeout(mut self, ms: u64) -> Self {
        self.timeout = Some(ms);
        self
    }

    pub fn headers(mut self, headers: Headers) -> Self {
        self.headers = Some(headers);
        self
    }

    pub fn callback(mut self, cb: impl FnOnce(Option<ResponseError>, Response) + Send + 'static) -> Self {
        self.cb = Some(Box::new(cb));
        self
    }
}

/// A chain of `with_*` setters culminating in a call that spawns the
/// underlying actors.
pub struct ContainerBuilder {
    retry_delay_ms: u64,
    research_timeout_ms: u64,
    default_send_timeout_ms: u64,
    max_send_timeout_ms: u64,
}

impl Default for ContainerBuilder {
    fn default() -> Self {
        Self {
            retry_delay_ms: 10,
            research_timeout_ms: 5_000,
            default_send_timeout_ms: 30_000,
            max_send_timeout_ms: 120_000,
        }
    }
}

impl ContainerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay before re-resolving a request whose transport reported a drop
    /// (spec §4.4 `onDrop`). Default 10ms.
    pub fn with_retry_delay(mut self, ms: u64) -> Self {
        self.retry_delay_ms = ms;
        self
    }

    /// Safeguard cap on how long `searchActor` waits for discovery before
    /// giving up with `NOTFOUND` (spec §4.3, §9 open question). Default 5s.
    pub fn with_research_timeout(mut self, ms: u64) -> Self {
        self.research_timeout_ms = ms;
        self
    }

    /// Default `send` timeout when a callback is given but no timeout.
    /// Default 30000ms per spec §4.4.
    pub fn with_default_send_timeout(mut self, ms: u64) -> Self {
        self.default_send_timeout_ms = ms;
        self
    }

    /// Timeout applied to fire-and-forget sends with no explicit timeout.
    pub fn with_max_send_timeout(mut self, ms: u64) -> Self {
        self.max_send_timeout_ms = ms;
        self
    }

    /// Spawns the router actor and returns a [`Container`] handle. The
    /// container is not started yet — call [`Container::start`].
    pub fn spawn(self, handle: &Handle) -> Container {
        let _entered = handle.enter();
        let container_id = uuid::Uuid::new_v4();
        let rt = AcTokio::from_handle("actor-mesh", handle.clone());
        let tunables = router::Tunables {
            retry_delay_ms: self.retry_delay_ms,
            research_timeout_ms: self.research_timeout_ms,
            default_send_timeout_ms: self.default_send_timeout_ms,
            max_send_timeout_ms: self.max_send_timeout_ms,
        };
        let SupervisionRef { me, handle: task } =
            rt.spawn_actor("router", move |ctx| router::router(ctx, container_id, tunables));
        Container {
            container_id,
            aref: me,
            _rt: Arc::new(rt),
            _task: Arc::new(task),
        }
    }
}

/// A running (or not-yet-started) actor container. Cloning shares the same
/// underlying router actor.
#[derive(Clone)]
pub struct Container {
    container_id: uuid::Uuid,
    aref: acto::ActoRef<RouterMsg>,
    _rt: Arc<AcTokio>,
    _task: Arc<acto::TokioJoinHandle<()>>,
}

impl Container {
    pub fn builder() -> ContainerBuilder {
        ContainerBuilder::new()
    }

    pub fn id(&self) -> uuid::Uuid {
        self.container_id
    }

    /// Starts the remote transport and discovery, then drains the starting
    /// queue in insertion order (spec §4.4 `start`).
    pub async fn start(&self, params: StartParams) -> Result<(), MeshError> {
        let (tx, rx) = oneshot::channel();
        self.aref.send(RouterMsg::Start { params, reply: tx });
        rx.await.map_err(|_| MeshError::TransitionInFlight)?
    }

    /// Stops discovery then the remote transport (spec §4.4 `stop`).
    pub async fn stop(&self) {
        let (tx, rx) = oneshot::channel();
        self.aref.send(RouterMsg::Stop { reply: tx });
        let _ = rx.await;
    }

    /// Registers a handler under `aid` (bare or already-resourced), scope
    /// PROCESS. Bare ids get a fresh `/`-separated resource.
    pub async fn add_actor(
        &self,
        aid: &str,
        handler: impl Fn(ActorContext, IncomingMessage) + Send + Sync + 'static,
    ) -> Result<Aid, MeshError> {
        let (tx, rx) = oneshot::channel();
        self.aref.send(RouterMsg::AddActor {
            aid: aid.to_owned(),
            handler: Arc::new(handler) as Handler,
            reply: tx,
        });
        rx.await.map_err(|_| MeshError::TransitionInFlight)?
    }

    pub async fn remove_actor(&self, aid: &str) -> Result<(), MeshError> {
        let (tx, rx) = oneshot::channel();
        self.aref.send(RouterMsg::RemoveActor {
            aid: aid.to_owned(),
            reply: tx,
        });
        rx.await.map_err(|_| MeshError::TransitionInFlight)?
    }

    /// Appends a middleware to the chain (spec §4.5). Runs in registration
    /// order at every station for every message.
    pub fn use_middleware(&self, f: MiddlewareFn) {
        self.aref.send(RouterMsg::Use(f));
    }

    /// Updates a tunable. `"discovery_addrs"` delegates to discovery; any
    /// other key updates the local properties map (spec §4.4, §9: this must
    /// be a comparison against the key, never an assignment to it).
    pub fn set(&self, key: &str, value: Value) {
        self.aref.send(RouterMsg::Set(key.to_owned(), value));
    }

    /// Sends `content` from `from` to `to`. If the container has not yet
    /// started, the call is captured on the starting queue and replayed
    /// once `start` completes, in original order (spec §3).
    pub fn send(&self, from: &str, to: &str, content: Value, opts: SendOptions) {
        self.aref.send(RouterMsg::Send {
            from: from.to_owned(),
            to: to.to_owned(),
            content,
            timeout: opts.timeout,
            headers: opts.headers,
            cb: opts.cb,
        });
    }

    /// Subscribes to `actor added`/`actor removed` events (spec §6, unlimited
    /// listeners).
    pub fn subscribe(&self) -> tokio::sync::mpsc::UnboundedReceiver<ContainerEvent> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        self.aref.send(RouterMsg::Subscribe(tx));
        rx
    }
}

pub(crate) fn local_ip(override_ip: Option<IpAddr>) -> IpAddr {
    if let Some(ip) = override_ip {
        return ip;
    }
    if_addrs::get_if_addrs()
        .ok()
        .into_iter()
        .flatten()
        .find(|i| !i.is_loopback())
        .map(|i| i.ip())
        .unwrap_or(IpAddr::V4(std::net::Ipv4Addr::LOCALHOST))
}

pub(crate) fn tech_err(cause: impl Into<Value>) -> ResponseError {
    ResponseError::with_cause(ErrorCode::TechErr, cause)
}
