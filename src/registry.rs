//! The three-scope actor table: PROCESS (hosted here), LOCAL (same host,
//! another container), REMOTE (another host). Owned exclusively by the
//! router actor's event loop — see `container::router` — so it never needs
//! internal locking, unlike the `Arc<RwLock<_>>`-guarded registries used by
//! multi-threaded actor runtimes.

use std::collections::BTreeMap;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::aid::Aid;
use crate::message::Headers;

/// Where a container's netInfo points so remote/local transports can
/// address it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetInfo {
    pub ip: IpAddr,
    pub pid: u32,
    pub port: u16,
}

/// Identifies the container hosting an actor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerInfo {
    pub id: Uuid,
    pub net_info: NetInfo,
}

/// Where an actor lives relative to this container.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Scope {
    /// Hosted in this container.
    Process,
    /// Hosted in another container on this host.
    Local,
    /// Hosted in another container on another host.
    Remote,
}

impl Scope {
    /// Lookup preference order used by [`Registry::get`] when no scope is given.
    pub const PREFERENCE: [Scope; 3] = [Scope::Process, Scope::Local, Scope::Remote];
}

/// Carried to an actor's handler: its own id, its container, and a `send`
/// shortcut that injects this actor's id as `from`.
#[derive(Clone)]
pub struct ActorContext {
    pub id: Aid,
    pub container: ContainerInfo,
}

/// A one-shot incoming message handed to an actor's handler. Call
/// [`IncomingMessage::reply`] to send a response; dropping without replying
/// means no response is ever sent (spec §4.4 `onReq`).
pub struct IncomingMessage {
    pub from: Aid,
    pub to: Aid,
    pub content: serde_json::Value,
    pub headers: Headers,
    pub(crate) reply_tx: tokio::sync::oneshot::Sender<(
        Option<crate::error::ResponseError>,
        serde_json::Value,
    )>,
}

impl IncomingMessage {
    pub fn reply(self, err: Option<crate::error::ResponseError>, content: serde_json::Value) {
        let _ = self.reply_tx.send((err, content));
    }
}

/// A process-local handler. Shared (`Arc`) rather than `FnMut` because
/// concurrent dispatches are possible (handler invocation is deferred to the
/// next tick per message, and several messages may be in flight for the same
/// actor); handlers needing mutable state reach for interior mutability.
pub type Handler = std::sync::Arc<dyn Fn(ActorContext, IncomingMessage) + Send + Sync>;

/// An entry in the registry. `handler` is only populated for PROCESS-scope
/// entries; LOCAL/REMOTE entries exist purely for routing.
#[derive(Clone)]
pub struct Actor {
    pub id: Aid,
    pub container: ContainerInfo,
    pub scope: Scope,
    pub handler: Option<Handler>,
}

#[derive(Default)]
struct ScopeTable {
    by_full_id: BTreeMap<String, Actor>,
    /// bare -> full ids, insertion order, for `pick`'s round-robin.
    by_bare: BTreeMap<String, Vec<String>>,
    /// round-robin cursor per bare group.
    cursor: BTreeMap<String, usize>,
}

impl ScopeTable {
    fn insert(&mut self, actor: Actor) -> Option<Actor> {
        let full = actor.id.to_string();
        let bare = actor.id.bare().to_string();
        let group = self.by_bare.entry(bare).or_default();
        if !group.contains(&full) {
            group.push(full.clone());
        }
        self.by_full_id.insert(full, actor)
    }

    fn remove(&mut self, aid: &Aid) -> Option<Actor> {
        let full = aid.to_string();
        let removed = self.by_full_id.remove(&full);
        if removed.is_some() {
            if let Some(group) = self.by_bare.get_mut(aid.bare()) {
                group.retain(|x| x != &full);
                if group.is_empty() {
                    self.by_bare.remove(aid.bare());
                    self.cursor.remove(aid.bare());
                }
            }
        }
        removed
    }

    fn pick(&mut self, aid: &Aid) -> Option<String> {
        if !aid.is_bare() {
            return self.by_full_id.contains_key(&aid.to_string()).then(|| aid.to_string());
        }
        let group = self.by_bare.get(aid.bare())?;
        if group.is_empty() {
            return None;
        }
        let cursor = self.cursor.entry(aid.bare().to_string()).or_insert(0);
        let pick = group[*cursor % group.len()].clone();
        *cursor = (*cursor + 1) % group.len();
        Some(pick)
    }
}

/// Events the registry emits on mutation, per spec §6.
#[derive(Clone, Debug)]
pub enum RegistryEvent {
    ActorAdded(Aid, Scope),
    ActorRemoved(Aid),
}

#[derive(Default)]
pub struct Registry {
    process: ScopeTable,
    local: ScopeTable,
    remote: ScopeTable,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self, scope: Scope) -> &ScopeTable {
        match scope {
            Scope::Process => &self.process,
            Scope::Local => &self.local,
            Scope::Remote => &self.remote,
        }
    }

    fn table_mut(&mut self, scope: Scope) -> &mut ScopeTable {
        match scope {
            Scope::Process => &mut self.process,
            Scope::Local => &mut self.local,
            Scope::Remote => &mut self.remote,
        }
    }

    /// Inserts `actor`, replacing any existing entry with an identical full
    /// AID in the same scope. Always emits `ActorAdded`.
    pub fn add(&mut self, actor: Actor) -> RegistryEvent {
        let id = actor.id.clone();
        let scope = actor.scope;
        self.table_mut(scope).insert(actor);
        RegistryEvent::ActorAdded(id, scope)
    }

    /// Idempotent removal; returns the removed entry if one existed.
    pub fn remove(&mut self, aid: &Aid, scope: Scope) -> Option<Actor> {
        self.table_mut(scope).remove(aid)
    }

    /// Looks up a fully-qualified AID. When `scope` is omitted, prefers
    /// PROCESS, then LOCAL, then REMOTE.
    pub fn get(&self, aid: &Aid, scope: Option<Scope>) -> Option<&Actor> {
        match scope {
            Some(s) => self.table(s).by_full_id.get(&aid.to_string()),
            None => Scope::PREFERENCE
                .iter()
                .find_map(|s| self.table(*s).by_full_id.get(&aid.to_string())),
        }
    }

    /// Resolves `aid` (bare or full) to a concrete, currently-known full AID.
    /// Bare ids round-robin within their bare group, scanning PROCESS, then
    /// LOCAL, then REMOTE.
    pub fn pick(&mut self, aid: &Aid) -> Option<(Aid, Scope)> {
        for scope in Scope::PREFERENCE {
            if let Some(full) = self.table_mut(scope).pick(aid) {
                return Some((Aid::parse(&full).expect("stored AIDs are valid"), scope));
            }
        }
        None
    }

    pub fn contains(&self, aid: &Aid, scope: Scope) -> bool {
        self.table(scope).by_full_id.contains_key(&aid.to_string())
    }

    /// All AIDs in `scope` hosted by `container_id` — used when a peer
    /// leaves to evict every entry it contributed.
    pub fn ids_for_container(&self, scope: Scope, container_id: Uuid) -> Vec<Aid> {
        self.table(scope)
            .by_full_id
            .values()
            .filter(|a| a.container.id == container_id)
            .map(|a| a.id.clone())
            .collect()
    }
}

/// Validated start-up parameters (spec §6 "Start parameters schema").
#[derive(Clone, Debug, Default)]
pub struct StartParams {
    pub ip: Option<IpAddr>,
    pub discovery_addr: Option<String>,
    pub discovery_port: Option<u16>,
    pub stats: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn actor(id: &str, scope: Scope) -> Actor {
        Actor {
            id: Aid::parse(id).unwrap(),
            container: ContainerInfo {
                id: Uuid::nil(),
                net_info: NetInfo {
                    ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
                    pid: 1,
                    port: 0,
                },
            },
            scope,
            handler: None,
        }
    }

    #[test]
    fn add_replaces_same_scope_duplicate() {
        let mut reg = Registry::new();
        reg.add(actor("pong/1", Scope::Process));
        reg.add(actor("pong/1", Scope::Process));
        assert!(reg.contains(&Aid::parse("pong/1").unwrap(), Scope::Process));
    }

    #[test]
    fn bare_equal_entries_coexist_across_scopes() {
        let mut reg = Registry::new();
        reg.add(actor("pong/1", Scope::Process));
        reg.add(actor("pong/2", Scope::Local));
        assert!(reg.contains(&Aid::parse("pong/1").unwrap(), Scope::Process));
        assert!(reg.contains(&Aid::parse("pong/2").unwrap(), Scope::Local));
    }

    #[test]
    fn get_prefers_process_then_local_then_remote() {
        let mut reg = Registry::new();
        reg.add(actor("pong/1", Scope::Remote));
        reg.add(actor("pong/2", Scope::Local));
        reg.add(actor("pong/3", Scope::Process));
        let hit = reg.get(&Aid::parse("pong/3").unwrap(), None).unwrap();
        assert_eq!(hit.scope, Scope::Process);
    }

    #[test]
    fn pick_round_robins_within_bare_group() {
        let mut reg = Registry::new();
        reg.add(actor("pong/1", Scope::Process));
        reg.add(actor("pong/2", Scope::Process));
        let bare = Aid::parse("pong").unwrap();
        let first = reg.pick(&bare).unwrap().0.to_string();
        let second = reg.pick(&bare).unwrap().0.to_string();
        assert_ne!(first, second);
        let third = reg.pick(&bare).unwrap().0.to_string();
        assert_eq!(third, first);
    }

    #[test]
    fn remove_is_idempotent() {
        let mut reg = Registry::new();
        reg.add(actor("pong/1", Scope::Process));
        let aid = Aid::parse("pong/1").unwrap();
        assert!(reg.remove(&aid, Scope::Process).is_some());
        assert!(reg.remove(&aid, Scope::Process).is_none());
    }

    #[test]
    fn pick_returns_none_for_unknown() {
        let mut reg = Registry::new();
        assert!(reg.pick(&Aid::parse("ghost").unwrap()).is_none());
    }
}
