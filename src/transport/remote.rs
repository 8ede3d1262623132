//! The networked transport (spec §4.2): one TCP connection per peer
//! container, framed with a 4-byte length prefix and JSON bodies. Runs as
//! its own supervised actor so a wedged listener or dead peer surfaces to
//! the router through ordinary supervision, the way `receiver`/`sender`
//! report back to `guardian` in the discovery tree this was grounded on.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};

use acto::{ActoCell, ActoInput, ActoRef, AcTokioRuntime};
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use uuid::Uuid;

use crate::error::MeshError;
use crate::message::{Request, Response};
use crate::registry::ContainerInfo;

use super::TransportEvent;
use crate::container::router::{ReplySink, RouterMsg};

#[derive(Serialize, Deserialize)]
enum Frame {
    Req(Request),
    Res(Response),
}

pub enum RemoteMsg {
    Start {
        bind_ip: IpAddr,
        reply: oneshot::Sender<Result<u16, MeshError>>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
    Deliver {
        container: ContainerInfo,
        req: Request,
    },
}

pub fn spawn(ctx: &mut ActoCell<RouterMsg, AcTokioRuntime>, router: ActoRef<RouterMsg>) -> ActoRef<RemoteMsg> {
    ctx.spawn_supervised("remote", move |ctx| remote_actor(ctx, router))
}

async fn remote_actor(mut ctx: ActoCell<RemoteMsg, AcTokioRuntime>, router: ActoRef<RouterMsg>) {
    let mut state = RemoteState {
        router,
        peers: HashMap::new(),
        listener_task: None,
    };
    loop {
        match ctx.recv().await {
            ActoInput::NoMoreSenders => {}
            ActoInput::Supervision { .. } => {}
            ActoInput::Message(msg) => state.handle(msg).await,
        }
    }
}

struct RemoteState {
    router: ActoRef<RouterMsg>,
    peers: HashMap<Uuid, mpsc::UnboundedSender<Frame>>,
    listener_task: Option<tokio::task::JoinHandle<()>>,
}

impl RemoteState {
    async fn handle(&mut self, msg: RemoteMsg) {
        match msg {
            RemoteMsg::Start { bind_ip, reply } => {
                let outcome = TcpListener::bind(SocketAddr::new(bind_ip, 0)).await;
                match outcome {
                    Ok(listener) => {
                        let port = listener.local_addr().map(|a| a.port()).unwrap_or(0);
                        let router = self.router.clone();
                        self.listener_task = Some(tokio::spawn(accept_loop(listener, router)));
                        let _ = reply.send(Ok(port));
                    }
                    Err(e) => {
                        let _ = reply.send(Err(MeshError::Socket(e)));
                    }
                }
            }
            RemoteMsg::Stop { reply } => {
                // Stop accepting new connections first, then drop every
                // peer sender: that ends each connection's writer task and
                // its reader notices on the next failed recv and exits too.
                if let Some(task) = self.listener_task.take() {
                    task.abort();
                }
                self.peers.clear();
                let _ = reply.send(());
            }
            RemoteMsg::Deliver { container, req } => {
                if let Some(tx) = self.peers.get(&container.id) {
                    if tx.send(Frame::Req(req.clone())).is_ok() {
                        return;
                    }
                    self.peers.remove(&container.id);
                }
                match connect(container.net_info.ip, container.net_info.port, self.router.clone()).await {
                    Ok(tx) => {
                        let _ = tx.send(Frame::Req(req));
                        self.peers.insert(container.id, tx);
                    }
                    Err(e) => {
                        tracing::debug!(error = %e, container = %container.id, "could not reach peer");
                        self.router.send(RouterMsg::FromTransport(TransportEvent::Drop(req)));
                    }
                }
            }
        }
    }
}

async fn accept_loop(listener: TcpListener, router: ActoRef<RouterMsg>) {
    loop {
        match listener.accept().await {
            Ok((stream, _addr)) => {
                spin_connection(stream, router.clone());
            }
            Err(e) => {
                tracing::warn!(error = %e, "accept failed");
                break;
            }
        }
    }
}

async fn connect(
    ip: IpAddr,
    port: u16,
    router: ActoRef<RouterMsg>,
) -> Result<mpsc::UnboundedSender<Frame>, MeshError> {
    let stream = TcpStream::connect(SocketAddr::new(ip, port)).await?;
    Ok(spin_connection(stream, router))
}

/// Wires a TCP stream for bidirectional traffic: a writer task drains an
/// mpsc channel onto the socket, a reader task demultiplexes inbound
/// frames back to the router, dispatching `Frame::Req` with a reply sink
/// bound to the same writer channel so responses go back over this same
/// connection (spec §4.2 "one connection per peer container").
fn spin_connection(stream: TcpStream, router: ActoRef<RouterMsg>) -> mpsc::UnboundedSender<Frame> {
    let framed = Framed::new(stream, LengthDelimitedCodec::new());
    let (mut sink, mut stream) = framed.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Frame>();

    tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let bytes = match serde_json::to_vec(&frame) {
                Ok(b) => b,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to encode frame");
                    continue;
                }
            };
            if sink.send(Bytes::from(bytes)).await.is_err() {
                break;
            }
        }
    });

    let reply_tx = tx.clone();
    tokio::spawn(async move {
        while let Some(Ok(bytes)) = stream.next().await {
            match serde_json::from_slice::<Frame>(&bytes) {
                Ok(Frame::Req(req)) => {
                    let sink_tx = reply_tx.clone();
                    let sink: ReplySink = Box::new(move |resp| {
                        let _ = sink_tx.send(Frame::Res(resp));
                    });
                    router.send(RouterMsg::FromTransport(TransportEvent::Req(req, sink)));
                }
                Ok(Frame::Res(res)) => {
                    router.send(RouterMsg::FromTransport(TransportEvent::Res(res)));
                }
                Err(e) => tracing::warn!(error = %e, "malformed frame, dropping connection"),
            }
        }
    });

    tx
}
