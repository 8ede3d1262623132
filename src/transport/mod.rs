//! Transport abstraction: `inproc` (direct in-process dispatch) and
//! `remote` (networked request/response between containers), unified
//! behind one event surface so the router doesn't care which scope a
//! request resolved to (spec §4.2).

pub mod inproc;
pub mod remote;

use crate::container::router::ReplySink;
use crate::message::{Request, Response};

/// Events a transport reports back to the router. Both transports emit the
/// same three cases; only how they're produced differs.
pub enum TransportEvent {
    /// An incoming request arrived for a PROCESS actor hosted here. The
    /// sink delivers the eventual response back over whatever channel the
    /// request arrived on.
    Req(Request, ReplySink),
    /// A response for a previously-sent request arrived.
    Res(Response),
    /// An outgoing request could not be delivered.
    Drop(Request),
}
