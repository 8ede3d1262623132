//! Peer discovery over a shared multicast rendezvous (spec §4.3). Populates
//! the registry's LOCAL/REMOTE scopes; never touches PROCESS.
//!
//! Grounded on the mDNS discovery tree this crate started from — same
//! guardian/sender/receiver/socket split, same jittered-cadence idea to
//! avoid announce storms — but the wire format is a small `serde_json`
//! envelope enum instead of DNS resource records, since this protocol needs
//! structured container/actor fields a PTR/SRV/TXT triad doesn't carry
//! naturally.

pub mod guardian;
pub mod receiver;
pub mod sender;
pub mod socket;

use acto::{ActoCell, ActoRef, ActoRuntime, AcTokioRuntime};
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::container::router::RouterMsg;
use crate::error::MeshError;
use crate::registry::ContainerInfo;

/// The contract discovery exposes to the router (spec §4.3).
pub enum DiscoveryMsg {
    Start {
        addr: String,
        port: u16,
        container: ContainerInfo,
        hosted: Vec<String>,
        reply: oneshot::Sender<Result<(), MeshError>>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
    /// Re-announce with a fresh hosted-AID snapshot (called after
    /// `addActor`/`removeActor`).
    UpdateLocalActors(Vec<String>),
    NotifySearched(String),
    SetDiscoveryAddrs(Vec<String>),
}

/// What discovery reports back to the router as the registry needs updating.
pub enum DiscoveryEvent {
    PeerAnnounced {
        container: ContainerInfo,
        full_aids: Vec<String>,
    },
    PeerLeft(Uuid),
    SearchAnswer {
        aid: String,
        container: ContainerInfo,
    },
}

/// Wire envelope exchanged over the rendezvous multicast group.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub enum Envelope {
    Announce {
        container: ContainerInfo,
        hosted: Vec<String>,
    },
    Search {
        from: ContainerInfo,
        aid: String,
    },
    Answer {
        from: ContainerInfo,
        aid: String,
    },
    Leave {
        container_id: Uuid,
    },
}

pub fn spawn(ctx: &mut ActoCell<RouterMsg, AcTokioRuntime>, router: ActoRef<RouterMsg>) -> ActoRef<DiscoveryMsg> {
    let aref = ctx.spawn_supervised("discovery", move |ctx| guardian::guardian(ctx, router));
    aref.contramap(guardian::GuardianMsg::External)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn container() -> ContainerInfo {
        ContainerInfo {
            id: Uuid::new_v4(),
            net_info: crate::registry::NetInfo {
                ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
                pid: 1,
                port: 4000,
            },
        }
    }

    #[test]
    fn envelope_variants_round_trip_through_json() {
        let variants = vec![
            Envelope::Announce {
                container: container(),
                hosted: vec!["pong/1".into()],
            },
            Envelope::Search {
                from: container(),
                aid: "pong".into(),
            },
            Envelope::Answer {
                from: container(),
                aid: "pong/1".into(),
            },
            Envelope::Leave {
                container_id: Uuid::new_v4(),
            },
        ];
        for envelope in variants {
            let bytes = serde_json::to_vec(&envelope).unwrap();
            let back: Envelope = serde_json::from_slice(&bytes).unwrap();
            match (&envelope, &back) {
                (Envelope::Announce { container: c1, .. }, Envelope::Announce { container: c2, .. }) => {
                    assert_eq!(c1.id, c2.id)
                }
                (Envelope::Search { aid: a1, .. }, Envelope::Search { aid: a2, .. }) => assert_eq!(a1, a2),
                (Envelope::Answer { aid: a1, .. }, Envelope::Answer { aid: a2, .. }) => assert_eq!(a1, a2),
                (Envelope::Leave { container_id: i1 }, Envelope::Leave { container_id: i2 }) => assert_eq!(i1, i2),
                _ => panic!("round trip changed variant"),
            }
        }
    }
}
