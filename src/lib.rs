//! A distributed actor container: in-process, local-host and networked
//! message routing between named actors, with peer discovery over a shared
//! multicast rendezvous.
//!
//! An [`aid::Aid`] (`bare[/resource]`) names an actor. [`container::Container`]
//! hosts actors ([`container::Container::add_actor`]), routes `send` calls
//! through a [`middleware::Chain`] and a three-scope [`registry::Registry`]
//! (PROCESS/LOCAL/REMOTE), and retries through [`transport`] on delivery
//! failure until the request's deadline passes.
//!
//! ```no_run
//! use actor_mesh::{Container, SendOptions, StartParams};
//! use serde_json::json;
//!
//! # async fn run() -> Result<(), actor_mesh::MeshError> {
//! let rt = tokio::runtime::Handle::current();
//! let container = Container::builder().spawn(&rt);
//! container.start(StartParams::default()).await?;
//!
//! container
//!     .add_actor("pong", |ctx, msg| {
//!         msg.reply(None, json!("pong"));
//!     })
//!     .await?;
//!
//! container.send(
//!     "ping",
//!     "pong",
//!     json!("ping"),
//!     SendOptions::new().callback(|err, res| {
//!         println!("{:?} {:?}", err, res.content);
//!     }),
//! );
//! # Ok(())
//! # }
//! ```

pub mod aid;
pub mod container;
pub mod discovery;
pub mod error;
pub mod message;
pub mod middleware;
pub mod registry;
pub mod transport;

pub use aid::Aid;
pub use container::{Container, ContainerBuilder, ContainerEvent, SendOptions};
pub use error::{ErrorCode, MeshError, ResponseError};
pub use message::{Headers, Request, Response};
pub use middleware::{Chain, MiddlewareFn, Outcome, Station};
pub use registry::{ActorContext, IncomingMessage, Scope, StartParams};
