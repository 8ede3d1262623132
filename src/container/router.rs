//! The router actor: the 40% of the system that binds registry, transports
//! and discovery together and implements `send`'s correlation/timeout/retry
//! pipeline (spec §4.4). Owns all mutable state for its container; nothing
//! outside this module ever mutates the registry or correlation table,
//! satisfying the single-ownership-domain requirement of spec §5.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use acto::{ActoCell, ActoInput, ActoRef, ActoRuntime, AcTokioRuntime};
use serde_json::Value;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::aid::Aid;
use crate::discovery::{self, DiscoveryEvent, DiscoveryMsg};
use crate::error::{ErrorCode, MeshError, ResponseError};
use crate::message::{Headers, Request, Response};
use crate::middleware::{Chain, MiddlewareFn, Outcome};
use crate::registry::{
    Actor, ActorContext, ContainerInfo, Handler, IncomingMessage, NetInfo, Registry, Scope,
    StartParams,
};
use crate::transport::remote::{self, RemoteMsg};
use crate::transport::TransportEvent;

use super::{local_ip, tech_err, ContainerEvent, ResponseCb};

pub type ReplySink = Box<dyn FnOnce(Response) + Send>;

#[derive(Clone, Copy, Debug)]
pub struct Tunables {
    pub retry_delay_ms: u64,
    pub research_timeout_ms: u64,
    pub default_send_timeout_ms: u64,
    pub max_send_timeout_ms: u64,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Lifecycle {
    Idle,
    Locking,
    Started,
}

struct PendingSend {
    original: Request,
    cb: Option<ResponseCb>,
    deadline_task: Option<tokio::task::JoinHandle<()>>,
    research_task: Option<tokio::task::JoinHandle<()>>,
    ever_dispatched: bool,
    completed: bool,
}

pub enum RouterMsg {
    Start {
        params: StartParams,
        reply: oneshot::Sender<Result<(), MeshError>>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
    AddActor {
        aid: String,
        handler: Handler,
        reply: oneshot::Sender<Result<Aid, MeshError>>,
    },
    RemoveActor {
        aid: String,
        reply: oneshot::Sender<Result<(), MeshError>>,
    },
    Use(MiddlewareFn),
    Set(String, Value),
    Send {
        from: String,
        to: String,
        content: Value,
        timeout: Option<u64>,
        headers: Option<Headers>,
        cb: Option<ResponseCb>,
    },
    Subscribe(tokio::sync::mpsc::UnboundedSender<ContainerEvent>),
    /// A transport produced an event (incoming response, or outgoing drop).
    FromTransport(TransportEvent),
    /// An actor hosted here finished handling a request and (maybe) replied.
    HandlerReplied {
        req: Request,
        err: Option<ResponseError>,
        content: Value,
    },
    FromDiscovery(DiscoveryEvent),
    TimerTimeout(String),
    TimerRetry(String),
    TimerResearch(String),
}

pub async fn router(mut ctx: ActoCell<RouterMsg, AcTokioRuntime>, container_id: Uuid, tunables: Tunables) {
    let me = ctx.me();
    let mut state = RouterState::new(container_id, tunables, me);
    loop {
        match ctx.recv().await {
            ActoInput::NoMoreSenders => {}
            ActoInput::Supervision { id, name, result } => {
                tracing::warn!(?id, name, ?result, "supervised actor exited");
                match name.as_str() {
                    "remote" => state.remote_ref = None,
                    "discovery" => state.discovery_ref = None,
                    _ => {}
                }
            }
            ActoInput::Message(msg) => state.handle(msg, &mut ctx).await,
        }
    }
}

struct RouterState {
    container_id: Uuid,
    net_info: NetInfo,
    tunables: Tunables,
    self_ref: ActoRef<RouterMsg>,
    lifecycle: Lifecycle,
    registry: Registry,
    middleware: Chain,
    properties: HashMap<String, Value>,
    starting_queue: Vec<(String, String, Value, Option<u64>, Option<Headers>, Option<ResponseCb>)>,
    pending: HashMap<String, PendingSend>,
    pending_replies: HashMap<String, ReplySink>,
    hosted_ids: Vec<String>,
    event_listeners: Vec<tokio::sync::mpsc::UnboundedSender<ContainerEvent>>,
    remote_ref: Option<ActoRef<RemoteMsg>>,
    discovery_ref: Option<ActoRef<DiscoveryMsg>>,
    /// Last `set("discovery_addrs", …)` value, applied as the bind address
    /// on the next `start()` if discovery isn't running yet.
    discovery_addr_override: Option<String>,
}

/// An absent timeout or an explicit 0 both fall back to a default that
/// depends on whether a callback is registered (spec §4.4 "timeout || max
/// send timeout").
fn resolve_send_timeout(timeout: Option<u64>, has_cb: bool, default_ms: u64, max_ms: u64) -> u64 {
    let fallback = if has_cb { default_ms } else { max_ms };
    match timeout {
        Some(t) if t != 0 => t,
        _ => fallback,
    }
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

impl RouterState {
    fn new(container_id: Uuid, tunables: Tunables, self_ref: ActoRef<RouterMsg>) -> Self {
        Self {
            container_id,
            net_info: NetInfo {
                ip: IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED),
                pid: std::process::id(),
                port: 0,
            },
            tunables,
            self_ref,
            lifecycle: Lifecycle::Idle,
            registry: Registry::new(),
            middleware: Chain::new(),
            properties: HashMap::new(),
            starting_queue: Vec::new(),
            pending: HashMap::new(),
            pending_replies: HashMap::new(),
            hosted_ids: Vec::new(),
            event_listeners: Vec::new(),
            remote_ref: None,
            discovery_ref: None,
            discovery_addr_override: None,
        }
    }

    async fn handle(&mut self, msg: RouterMsg, ctx: &mut ActoCell<RouterMsg, AcTokioRuntime>) {
        match msg {
            RouterMsg::Start { params, reply } => self.on_start(params, reply, ctx).await,
            RouterMsg::Stop { reply } => self.on_stop(reply, ctx).await,
            RouterMsg::AddActor { aid, handler, reply } => self.on_add_actor(aid, handler, reply),
            RouterMsg::RemoveActor { aid, reply } => self.on_remove_actor(aid, reply),
            RouterMsg::Use(f) => self.middleware.push(f),
            RouterMsg::Set(key, value) => self.on_set(key, value),
            RouterMsg::Send { from, to, content, timeout, headers, cb } => {
                self.on_send(from, to, content, timeout, headers, cb)
            }
            RouterMsg::Subscribe(tx) => self.event_listeners.push(tx),
            RouterMsg::FromTransport(TransportEvent::Res(res)) => self.handle_response(res),
            RouterMsg::FromTransport(TransportEvent::Drop(req)) => self.on_drop(&req.id),
            RouterMsg::FromTransport(TransportEvent::Req(req, sink)) => {
                self.on_inbound_req(req, Some(sink))
            }
            RouterMsg::HandlerReplied { req, err, content } => self.on_handler_replied(req, err, content),
            RouterMsg::FromDiscovery(ev) => self.on_discovery_event(ev),
            RouterMsg::TimerTimeout(id) => self.on_timeout(&id),
            RouterMsg::TimerRetry(id) => self.on_retry(&id),
            RouterMsg::TimerResearch(id) => self.on_research_timeout(&id),
        }
    }

    async fn on_start(
        &mut self,
        params: StartParams,
        reply: oneshot::Sender<Result<(), MeshError>>,
        ctx: &mut ActoCell<RouterMsg, AcTokioRuntime>,
    ) {
        match self.lifecycle {
            Lifecycle::Started => {
                tracing::warn!("start() called while already started");
                let _ = reply.send(Err(MeshError::AlreadyStarted));
                return;
            }
            Lifecycle::Locking => {
                tracing::warn!("start() called while a lifecycle transition is in flight");
                let _ = reply.send(Err(MeshError::TransitionInFlight));
                return;
            }
            Lifecycle::Idle => {}
        }
        self.lifecycle = Lifecycle::Locking;

        self.net_info.ip = local_ip(params.ip);
        self.properties.insert("stats".into(), Value::Bool(params.stats));

        let remote_ref = remote::spawn(ctx, self.self_ref.clone());
        let (tx, rx) = oneshot::channel();
        remote_ref.send(RemoteMsg::Start {
            bind_ip: self.net_info.ip,
            reply: tx,
        });
        let port = match rx.await {
            Ok(Ok(port)) => port,
            Ok(Err(e)) => {
                self.lifecycle = Lifecycle::Idle;
                tracing::warn!(error = %e, "remote transport failed to start");
                let _ = reply.send(Err(e));
                return;
            }
            Err(_) => {
                self.lifecycle = Lifecycle::Idle;
                let _ = reply.send(Err(MeshError::TransitionInFlight));
                return;
            }
        };
        self.net_info.port = port;
        self.remote_ref = Some(remote_ref);

        let addr = self
            .discovery_addr_override
            .clone()
            .or(params.discovery_addr)
            .unwrap_or_else(|| "224.0.0.1".to_owned());
        let port = params.discovery_port.unwrap_or(5555);

        let discovery_ref = discovery::spawn(ctx, self.self_ref.clone());
        let (tx, rx) = oneshot::channel();
        discovery_ref.send(DiscoveryMsg::Start {
            addr,
            port,
            container: self.container_info(),
            hosted: self.hosted_ids.clone(),
            reply: tx,
        });
        match rx.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                self.lifecycle = Lifecycle::Idle;
                let _ = reply.send(Err(e));
                return;
            }
            Err(_) => {
                self.lifecycle = Lifecycle::Idle;
                let _ = reply.send(Err(MeshError::TransitionInFlight));
                return;
            }
        }
        self.discovery_ref = Some(discovery_ref);

        self.lifecycle = Lifecycle::Started;
        tracing::info!(container = %self.container_id, %port, "container started");

        let queued = std::mem::take(&mut self.starting_queue);
        for (from, to, content, timeout, headers, cb) in queued {
            self.on_send(from, to, content, timeout, headers, cb);
        }

        let _ = reply.send(Ok(()));
    }

    async fn on_stop(&mut self, reply: oneshot::Sender<()>, _ctx: &mut ActoCell<RouterMsg, AcTokioRuntime>) {
        if self.lifecycle != Lifecycle::Started {
            tracing::warn!("stop() called while not started");
            let _ = reply.send(());
            return;
        }
        self.lifecycle = Lifecycle::Locking;

        if let Some(d) = self.discovery_ref.take() {
            let (tx, rx) = oneshot::channel();
            d.send(DiscoveryMsg::Stop { reply: tx });
            let _ = rx.await;
        }
        if let Some(r) = self.remote_ref.take() {
            let (tx, rx) = oneshot::channel();
            r.send(RemoteMsg::Stop { reply: tx });
            let _ = rx.await;
        }

        self.lifecycle = Lifecycle::Idle;
        tracing::info!(container = %self.container_id, "container stopped");
        let _ = reply.send(());
    }

    fn container_info(&self) -> ContainerInfo {
        ContainerInfo {
            id: self.container_id,
            net_info: self.net_info.clone(),
        }
    }

    fn on_add_actor(&mut self, aid: String, handler: Handler, reply: oneshot::Sender<Result<Aid, MeshError>>) {
        let result = (|| -> Result<Aid, MeshError> {
            let parsed = Aid::parse(&aid)?;
            let full = if parsed.is_bare() {
                Aid::with_fresh_resource(parsed.bare())?
            } else {
                parsed
            };
            let actor = Actor {
                id: full.clone(),
                container: self.container_info(),
                scope: Scope::Process,
                handler: Some(handler),
            };
            self.registry.add(actor);
            self.hosted_ids.push(full.to_string());
            self.broadcast(ContainerEvent::ActorAdded(full.to_string(), Scope::Process));
            self.sync_hosted_actors();
            let bare = full.bare().to_string();
            self.resume_pending_for_bare(&bare);
            Ok(full)
        })();
        let _ = reply.send(result);
    }

    fn on_remove_actor(&mut self, aid: String, reply: oneshot::Sender<Result<(), MeshError>>) {
        let result = (|| -> Result<(), MeshError> {
            let parsed = Aid::parse(&aid)?;
            if parsed.is_bare() {
                let to_remove: Vec<Aid> = self
                    .hosted_ids
                    .iter()
                    .filter_map(|id| Aid::parse(id).ok())
                    .filter(|a| a.bare_eq(&parsed))
                    .collect();
                for a in to_remove {
                    self.registry.remove(&a, Scope::Process);
                    self.hosted_ids.retain(|id| id != &a.to_string());
                    self.broadcast(ContainerEvent::ActorRemoved(a.to_string()));
                }
            } else if self.registry.remove(&parsed, Scope::Process).is_some() {
                self.hosted_ids.retain(|id| id != &parsed.to_string());
                self.broadcast(ContainerEvent::ActorRemoved(parsed.to_string()));
            }
            self.sync_hosted_actors();
            Ok(())
        })();
        let _ = reply.send(result);
    }

    fn sync_hosted_actors(&self) {
        if let Some(d) = &self.discovery_ref {
            d.send(DiscoveryMsg::UpdateLocalActors(self.hosted_ids.clone()));
        }
    }

    fn broadcast(&mut self, ev: ContainerEvent) {
        self.event_listeners.retain(|tx| tx.send(ev.clone()).is_ok());
    }

    fn on_set(&mut self, key: String, value: Value) {
        // NB: compare the key, never assign it (spec §9 open question).
        if key == "discovery_addrs" {
            let Value::Array(raw) = &value else {
                tracing::warn!("discovery_addrs must be set to an array of strings");
                return;
            };
            let addrs: Vec<String> = raw.iter().filter_map(|v| v.as_str().map(str::to_owned)).collect();
            if let Some(first) = addrs.first() {
                self.discovery_addr_override = Some(first.clone());
            }
            if let Some(d) = &self.discovery_ref {
                // Already running: rebind live to the new address.
                d.send(DiscoveryMsg::SetDiscoveryAddrs(addrs));
            }
            return;
        }
        if key == "retry_delay" {
            if let Some(ms) = value.as_u64() {
                self.tunables.retry_delay_ms = ms;
            }
            return;
        }
        if key == "research_timeout" {
            if let Some(ms) = value.as_u64() {
                self.tunables.research_timeout_ms = ms;
            }
            return;
        }
        if key == "default_send_timeout" {
            if let Some(ms) = value.as_u64() {
                self.tunables.default_send_timeout_ms = ms;
            }
            return;
        }
        if key == "max_send_timeout" {
            if let Some(ms) = value.as_u64() {
                self.tunables.max_send_timeout_ms = ms;
            }
            return;
        }
        self.properties.insert(key, value);
    }

    fn on_send(
        &mut self,
        from: String,
        to: String,
        content: Value,
        timeout: Option<u64>,
        headers: Option<Headers>,
        cb: Option<ResponseCb>,
    ) {
        if self.lifecycle != Lifecycle::Started {
            self.starting_queue.push((from, to, content, timeout, headers, cb));
            return;
        }

        let has_cb = cb.is_some();
        let effective_timeout = resolve_send_timeout(
            timeout,
            has_cb,
            self.tunables.default_send_timeout_ms,
            self.tunables.max_send_timeout_ms,
        );

        let mut req = Request {
            id: Uuid::new_v4().to_string(),
            from,
            to,
            content,
            date: now_ms(),
            timeout: effective_timeout,
            headers: headers.unwrap_or_default(),
            cb: has_cb,
        };

        if let Err(e) = req.validate() {
            if let Some(cb) = cb {
                let resp = Response {
                    id: req.id,
                    from: req.to,
                    to: req.from,
                    err: Some(tech_err(e.to_string())),
                    content: Value::Null,
                    date: req.date,
                    headers: Headers::new(),
                };
                cb(Some(tech_err(e.to_string())), resp);
            } else {
                tracing::warn!(error = %e, "invalid send() dropped");
            }
            return;
        }

        if !self.middleware.run_req_out(&mut req) {
            tracing::debug!(id = %req.id, "REQ_OUT middleware dropped message");
            return;
        }

        if has_cb {
            let id = req.id.clone();
            let me = self.self_ref.clone();
            let deadline = Duration::from_millis(req.timeout);
            let deadline_task = tokio::spawn(async move {
                tokio::time::sleep(deadline).await;
                me.send(RouterMsg::TimerTimeout(id));
            });
            self.pending.insert(
                req.id.clone(),
                PendingSend {
                    original: req.clone(),
                    cb,
                    deadline_task: Some(deadline_task),
                    research_task: None,
                    ever_dispatched: false,
                    completed: false,
                },
            );
        }

        self.internal_send(req);
    }

    fn internal_send(&mut self, mut req: Request) {
        let now = now_ms();
        if req.is_expired(now) {
            // The deadline timer (if any) already owns completing this request.
            return;
        }

        let target = match Aid::parse(&req.to) {
            Ok(a) => a,
            Err(_) => return,
        };

        match self.registry.pick(&target) {
            Some((full, scope)) => {
                let mut had_no_cb = false;
                if let Some(p) = self.pending.get_mut(&req.id) {
                    p.ever_dispatched = true;
                    had_no_cb = p.cb.is_none();
                    if let Some(t) = p.research_task.take() {
                        t.abort();
                    }
                }
                // Fire-and-forget entries exist only to let discovery
                // resolve them before first dispatch; once dispatched there
                // is nothing left to retry or time out, so drop the
                // bookkeeping now rather than leaking it for the
                // container's lifetime.
                if had_no_cb {
                    self.pending.remove(&req.id);
                }
                req.to = full.to_string();
                let actor = self.registry.get(&full, Some(scope)).cloned();
                match actor {
                    Some(actor) if scope == Scope::Process => {
                        self.dispatch_to_process(actor, req, None);
                    }
                    Some(actor) => {
                        if let Some(remote_ref) = &self.remote_ref {
                            remote_ref.send(RemoteMsg::Deliver {
                                container: actor.container.clone(),
                                req,
                            });
                        } else {
                            self.on_drop(&req.id.clone());
                        }
                    }
                    None => self.on_drop_req(req),
                }
            }
            None => {
                let bare = target.bare().to_string();
                if !self.pending.contains_key(&req.id) {
                    self.pending.insert(
                        req.id.clone(),
                        PendingSend {
                            original: req.clone(),
                            cb: None,
                            deadline_task: None,
                            research_task: None,
                            ever_dispatched: false,
                            completed: false,
                        },
                    );
                }
                let needs_research_timer = self
                    .pending
                    .get(&req.id)
                    .map(|p| p.research_task.is_none())
                    .unwrap_or(false);
                if needs_research_timer {
                    let id = req.id.clone();
                    let me = self.self_ref.clone();
                    let research = Duration::from_millis(self.tunables.research_timeout_ms);
                    let task = tokio::spawn(async move {
                        tokio::time::sleep(research).await;
                        me.send(RouterMsg::TimerResearch(id));
                    });
                    if let Some(p) = self.pending.get_mut(&req.id) {
                        p.research_task = Some(task);
                    }
                }
                if let Some(d) = &self.discovery_ref {
                    d.send(DiscoveryMsg::NotifySearched(bare));
                }
            }
        }
    }

    /// The registry said the actor exists but it vanished between `pick`
    /// and lookup (e.g. concurrently removed); treat like a transport drop.
    fn on_drop_req(&mut self, req: Request) {
        self.on_drop(&req.id);
    }

    fn on_drop(&mut self, id: &str) {
        let Some(p) = self.pending.get(id) else { return };
        if p.completed {
            return;
        }
        if p.cb.is_none() {
            // Fire-and-forget: no listener to retry for, discard rather
            // than leaving a stale entry behind.
            self.pending.remove(id);
            return;
        }
        if p.original.is_expired(now_ms()) {
            return;
        }
        let id = id.to_owned();
        let me = self.self_ref.clone();
        let delay = Duration::from_millis(self.tunables.retry_delay_ms);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            me.send(RouterMsg::TimerRetry(id));
        });
    }

    fn on_retry(&mut self, id: &str) {
        let Some(p) = self.pending.get(id) else { return };
        if p.completed {
            return;
        }
        if p.original.is_expired(now_ms()) {
            return;
        }
        // Reuse the original (bare) target, not whatever it last resolved to.
        let req = p.original.clone();
        self.internal_send(req);
    }

    fn on_timeout(&mut self, id: &str) {
        let Some(p) = self.pending.get(id) else { return };
        if p.completed {
            return;
        }
        let original = p.original.clone();
        let response = Response {
            id: original.id.clone(),
            from: original.to.clone(),
            to: original.from.clone(),
            err: Some(ResponseError::new(ErrorCode::Timeout)),
            content: Value::Null,
            date: original.date,
            headers: Headers::new(),
        };
        self.complete(id, Some(ResponseError::new(ErrorCode::Timeout)), response);
    }

    fn on_research_timeout(&mut self, id: &str) {
        let Some(p) = self.pending.get(id) else { return };
        if p.completed || p.ever_dispatched {
            return;
        }
        if p.cb.is_none() {
            tracing::debug!(id, "discovery exhausted for fire-and-forget send, dropping silently");
            self.pending.remove(id);
            return;
        }
        let original = p.original.clone();
        let response = Response {
            id: original.id.clone(),
            from: original.to.clone(),
            to: original.from.clone(),
            err: Some(ResponseError::new(ErrorCode::NotFound)),
            content: Value::Null,
            date: original.date,
            headers: Headers::new(),
        };
        self.complete(id, Some(ResponseError::new(ErrorCode::NotFound)), response);
    }

    fn complete(&mut self, id: &str, err: Option<ResponseError>, response: Response) {
        let Some(mut p) = self.pending.remove(id) else { return };
        if p.completed {
            return;
        }
        p.completed = true;
        if let Some(t) = p.deadline_task.take() {
            t.abort();
        }
        if let Some(t) = p.research_task.take() {
            t.abort();
        }
        if let Some(cb) = p.cb.take() {
            cb(err, response);
        }
    }

    fn resume_pending_for_bare(&mut self, bare: &str) {
        let ids: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, p)| {
                !p.ever_dispatched
                    && !p.completed
                    && Aid::parse(&p.original.to)
                        .map(|a| a.bare() == bare)
                        .unwrap_or(false)
            })
            .map(|(k, _)| k.clone())
            .collect();
        for id in ids {
            if let Some(p) = self.pending.get(&id) {
                let req = p.original.clone();
                self.internal_send(req);
            }
        }
    }

    fn dispatch_to_process(&mut self, actor: Actor, mut req: Request, reply_sink: Option<ReplySink>) {
        match self.middleware.run_req_in(&mut req) {
            Outcome::Dropped => {
                tracing::debug!(id = %req.id, "REQ_IN middleware dropped message");
            }
            Outcome::Replied(err, content) => {
                let response = match &err {
                    Some(e) => Response::error(&req, e.clone()),
                    None => Response::ok(&req, content),
                };
                self.deliver_response(response, reply_sink);
            }
            Outcome::Continue => {
                let (reply_tx, reply_rx) = oneshot::channel();
                let ctx = ActorContext {
                    id: Aid::parse(&req.to).unwrap_or_else(|_| actor.id.clone()),
                    container: actor.container.clone(),
                };
                let incoming = IncomingMessage {
                    from: Aid::parse(&req.from).unwrap_or_else(|_| ctx.id.clone()),
                    to: ctx.id.clone(),
                    content: req.content.clone(),
                    headers: req.headers.clone(),
                    reply_tx,
                };
                let handler = actor.handler.clone().expect("PROCESS actor always has a handler");
                crate::transport::inproc::dispatch(handler, ctx, incoming);
                let me = self.self_ref.clone();
                let req_clone = req.clone();
                tokio::spawn(async move {
                    if let Ok((err, content)) = reply_rx.await {
                        me.send(RouterMsg::HandlerReplied {
                            req: req_clone,
                            err,
                            content,
                        });
                    }
                });
                if let Some(sink) = reply_sink {
                    self.pending_replies.insert(req.id.clone(), sink);
                }
            }
        }
    }

    fn on_inbound_req(&mut self, req: Request, reply_sink: Option<ReplySink>) {
        let target = match Aid::parse(&req.to) {
            Ok(a) => a,
            Err(_) => return,
        };
        match self.registry.get(&target, Some(Scope::Process)).cloned() {
            Some(actor) => self.dispatch_to_process(actor, req, reply_sink),
            None => tracing::warn!(to = %req.to, "inbound request for unknown local actor"),
        }
    }

    fn on_handler_replied(&mut self, req: Request, err: Option<ResponseError>, content: Value) {
        let mut response = match &err {
            Some(e) => Response::error(&req, e.clone()),
            None => Response::ok(&req, content),
        };
        let reply_sink = self.pending_replies.remove(&req.id);
        match self.middleware.run_res_out(&mut response) {
            Outcome::Continue => self.deliver_response(response, reply_sink),
            Outcome::Replied(err2, content2) => {
                let response2 = match &err2 {
                    Some(e) => Response::error(&req, e.clone()),
                    None => Response::ok(&req, content2),
                };
                self.deliver_response(response2, reply_sink);
            }
            Outcome::Dropped => {
                tracing::debug!(id = %req.id, "RES_OUT middleware dropped response");
            }
        }
    }

    fn deliver_response(&mut self, response: Response, reply_sink: Option<ReplySink>) {
        match reply_sink {
            Some(sink) => sink(response),
            None => self.handle_response(response),
        }
    }

    fn handle_response(&mut self, mut res: Response) {
        if !self.middleware.run_res_in(&mut res) {
            tracing::debug!(id = %res.id, "RES_IN middleware dropped response");
            return;
        }
        let id = res.id.clone();
        let err = res.err.clone();
        self.complete(&id, err, res);
    }

    fn on_discovery_event(&mut self, ev: DiscoveryEvent) {
        match ev {
            DiscoveryEvent::PeerAnnounced { container, full_aids } => {
                self.sync_peer_actors(container, full_aids);
            }
            DiscoveryEvent::PeerLeft(container_id) => self.remove_peer(container_id),
            DiscoveryEvent::SearchAnswer { aid, container } => {
                if let Ok(parsed) = Aid::parse(&aid) {
                    let scope = if container.net_info.ip == self.net_info.ip {
                        Scope::Local
                    } else {
                        Scope::Remote
                    };
                    let actor = Actor {
                        id: parsed.clone(),
                        container,
                        scope,
                        handler: None,
                    };
                    self.registry.add(actor);
                    self.resume_pending_for_bare(parsed.bare());
                }
            }
        }
    }

    fn sync_peer_actors(&mut self, container: ContainerInfo, full_aids: Vec<String>) {
        if container.id == self.container_id {
            return; // never cache ourselves as a peer
        }
        let scope = if container.net_info.ip == self.net_info.ip {
            Scope::Local
        } else {
            Scope::Remote
        };
        let mut resumed_bare = Vec::new();
        for full in full_aids {
            if let Ok(aid) = Aid::parse(&full) {
                let bare = aid.bare().to_string();
                self.registry.add(Actor {
                    id: aid,
                    container: container.clone(),
                    scope,
                    handler: None,
                });
                resumed_bare.push(bare);
            }
        }
        for bare in resumed_bare {
            self.resume_pending_for_bare(&bare);
        }
    }

    fn remove_peer(&mut self, container_id: Uuid) {
        for scope in [Scope::Local, Scope::Remote] {
            let stale = self.registry.ids_for_container(scope, container_id);
            for aid in stale {
                self.registry.remove(&aid, scope);
                self.broadcast(ContainerEvent::ActorRemoved(aid.to_string()));
            }
        }
    }
}
