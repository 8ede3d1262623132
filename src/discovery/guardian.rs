//! Supervises the rendezvous socket, the periodic announce cadence, and
//! inbound envelope handling. Plays the role the original `guardian` actor
//! played for the mDNS sender/receiver pair, minus the v4/v6 split — one
//! multicast group is enough for this protocol.

use std::time::Duration;

use acto::{ActoCell, ActoInput, ActoRef, AcTokioRuntime};

use crate::container::router::RouterMsg;
use crate::registry::ContainerInfo;

use super::receiver::receive_loop;
use super::sender::{jitter, schedule_tick};
use super::socket::{bind_multicast, MulticastSocket};
use super::{DiscoveryEvent, DiscoveryMsg, Envelope};

const ANNOUNCE_CADENCE: Duration = Duration::from_secs(5);
const ANSWER_DELAY: Duration = Duration::from_millis(50);

pub enum GuardianMsg {
    External(DiscoveryMsg),
    Inbound(Envelope),
    AnnounceTick(u64),
}

struct Running {
    socket: MulticastSocket,
    addr: String,
    port: u16,
    container: ContainerInfo,
    hosted: Vec<String>,
    receiver_task: tokio::task::JoinHandle<()>,
}

impl Running {
    fn stop_receiver(&mut self) {
        self.receiver_task.abort();
    }
}

pub async fn guardian(mut ctx: ActoCell<GuardianMsg, AcTokioRuntime>, router: ActoRef<RouterMsg>) {
    let mut state: Option<Running> = None;
    let mut generation: u64 = 0;

    loop {
        match ctx.recv().await {
            ActoInput::NoMoreSenders => {}
            ActoInput::Supervision { id, name, result } => {
                tracing::warn!(?id, name, ?result, "discovery sub-task ended");
            }
            ActoInput::Message(GuardianMsg::External(msg)) => {
                handle_external(&mut ctx, &mut state, &mut generation, msg).await;
            }
            ActoInput::Message(GuardianMsg::Inbound(envelope)) => {
                if let Some(running) = &state {
                    handle_envelope(running, envelope, &router);
                }
            }
            ActoInput::Message(GuardianMsg::AnnounceTick(gen)) => {
                if gen != generation {
                    continue;
                }
                if let Some(running) = &state {
                    send_envelope(
                        &running.socket,
                        &Envelope::Announce {
                            container: running.container.clone(),
                            hosted: running.hosted.clone(),
                        },
                    )
                    .await;
                    schedule_tick(ctx.me(), generation, jitter(ANNOUNCE_CADENCE));
                }
            }
        }
    }
}

async fn handle_external(
    ctx: &mut ActoCell<GuardianMsg, AcTokioRuntime>,
    state: &mut Option<Running>,
    generation: &mut u64,
    msg: DiscoveryMsg,
) {
    match msg {
        DiscoveryMsg::Start {
            addr,
            port,
            container,
            hosted,
            reply,
        } => {
            if state.is_some() {
                let _ = reply.send(Ok(()));
                return;
            }
            match bind(&addr, port, ctx.me()) {
                Ok((socket, receiver_task)) => {
                    *generation += 1;
                    schedule_tick(ctx.me(), *generation, jitter(ANNOUNCE_CADENCE));
                    send_envelope(
                        &socket,
                        &Envelope::Announce {
                            container: container.clone(),
                            hosted: hosted.clone(),
                        },
                    )
                    .await;
                    *state = Some(Running {
                        socket,
                        addr,
                        port,
                        container,
                        hosted,
                        receiver_task,
                    });
                    let _ = reply.send(Ok(()));
                }
                Err(e) => {
                    let _ = reply.send(Err(e));
                }
            }
        }
        DiscoveryMsg::Stop { reply } => {
            if let Some(mut running) = state.take() {
                send_envelope(
                    &running.socket,
                    &Envelope::Leave {
                        container_id: running.container.id,
                    },
                )
                .await;
                running.stop_receiver();
            }
            *generation += 1;
            let _ = reply.send(());
        }
        DiscoveryMsg::UpdateLocalActors(hosted) => {
            if let Some(running) = state {
                running.hosted = hosted;
                send_envelope(
                    &running.socket,
                    &Envelope::Announce {
                        container: running.container.clone(),
                        hosted: running.hosted.clone(),
                    },
                )
                .await;
            }
        }
        DiscoveryMsg::NotifySearched(aid) => {
            if let Some(running) = state {
                send_envelope(
                    &running.socket,
                    &Envelope::Search {
                        from: running.container.clone(),
                        aid,
                    },
                )
                .await;
            }
        }
        DiscoveryMsg::SetDiscoveryAddrs(addrs) => {
            let Some(new_addr) = addrs.into_iter().next() else {
                tracing::warn!("setDiscoveryAddrs called with an empty address list, ignoring");
                return;
            };
            match state {
                None => {
                    tracing::warn!("setDiscoveryAddrs called before start(), ignoring");
                }
                Some(running) if running.addr == new_addr => {}
                Some(running) => match bind(&new_addr, running.port, ctx.me()) {
                    Ok((socket, receiver_task)) => {
                        send_envelope(
                            &running.socket,
                            &Envelope::Leave {
                                container_id: running.container.id,
                            },
                        )
                        .await;
                        running.stop_receiver();
                        running.socket = socket;
                        running.addr = new_addr;
                        running.receiver_task = receiver_task;
                        send_envelope(
                            &running.socket,
                            &Envelope::Announce {
                                container: running.container.clone(),
                                hosted: running.hosted.clone(),
                            },
                        )
                        .await;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, addr = %new_addr, "failed to rebind to new discovery address");
                    }
                },
            }
        }
    }
}

/// Binds the rendezvous socket and spawns its reader, tied to the returned
/// handle so a caller can tear it down on `Stop` or rebind.
fn bind(
    addr: &str,
    port: u16,
    me: ActoRef<GuardianMsg>,
) -> Result<(MulticastSocket, tokio::task::JoinHandle<()>), crate::error::MeshError> {
    let socket = bind_multicast(addr, port)?;
    let receiver_task = tokio::spawn(receive_loop(socket.clone(), me));
    Ok((socket, receiver_task))
}

fn handle_envelope(running: &Running, envelope: Envelope, router: &ActoRef<RouterMsg>) {
    match envelope {
        Envelope::Announce { container, hosted } => {
            if container.id == running.container.id {
                return;
            }
            router.send(RouterMsg::FromDiscovery(DiscoveryEvent::PeerAnnounced {
                container,
                full_aids: hosted,
            }));
        }
        Envelope::Search { from, aid } => {
            if from.id == running.container.id {
                return;
            }
            let matched = running.hosted.iter().find(|full| {
                full.as_str() == aid || full.starts_with(&format!("{aid}/"))
            });
            if let Some(full) = matched {
                let socket = running.socket.clone();
                let answer = Envelope::Answer {
                    from: running.container.clone(),
                    aid: full.clone(),
                };
                tokio::spawn(async move {
                    tokio::time::sleep(jitter(ANSWER_DELAY)).await;
                    send_envelope(&socket, &answer).await;
                });
            }
        }
        Envelope::Answer { from, aid } => {
            if from.id == running.container.id {
                return;
            }
            router.send(RouterMsg::FromDiscovery(DiscoveryEvent::SearchAnswer {
                aid,
                container: from,
            }));
        }
        Envelope::Leave { container_id } => {
            if container_id == running.container.id {
                return;
            }
            router.send(RouterMsg::FromDiscovery(DiscoveryEvent::PeerLeft(container_id)));
        }
    }
}

async fn send_envelope(socket: &MulticastSocket, envelope: &Envelope) {
    match serde_json::to_vec(envelope) {
        Ok(bytes) => socket.send_to_group(&bytes).await,
        Err(e) => tracing::warn!(error = %e, "failed to encode discovery envelope"),
    }
}
