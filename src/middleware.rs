//! The four-station middleware chain (spec §4.5).
//!
//! A middleware runs at `REQ_OUT`, `REQ_IN`, `RES_OUT` or `RES_IN` and may
//! either call `next` to continue the chain or not call it at all, silently
//! dropping the message — this is deliberate (policy enforcement), not an
//! error path. For `REQ_IN` and `RES_OUT` a [`Reply`] handle is additionally
//! available so a middleware can short-circuit by replying directly, without
//! reaching the target actor or transport.

use std::sync::Arc;

use crate::error::ResponseError;
use crate::message::{Kind, Request, Response};

/// What a middleware sees. `reply` is `Some` only at `REQ_IN`/`RES_OUT`.
pub struct Station<'a> {
    pub kind: Kind,
    pub request: Option<&'a mut Request>,
    pub response: Option<&'a mut Response>,
    pub reply: Option<&'a mut Option<(Option<ResponseError>, serde_json::Value)>>,
}

/// A middleware function. `next` must be called to continue the chain;
/// not calling it drops the message silently (by design).
pub type MiddlewareFn = Arc<dyn Fn(Station<'_>, &mut dyn FnMut()) + Send + Sync + 'static>;

/// Outcome of running the chain at a station with a reply slot.
pub enum Outcome {
    /// Every middleware called `next`; proceed to actor/transport.
    Continue,
    /// A middleware short-circuited with this reply.
    Replied(Option<ResponseError>, serde_json::Value),
    /// A middleware silently dropped the message.
    Dropped,
}

/// An ordered list of middleware, invoked in registration order at every
/// station (spec §5 ordering guarantee).
#[derive(Clone, Default)]
pub struct Chain {
    middleware: Vec<MiddlewareFn>,
}

impl Chain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, f: MiddlewareFn) {
        self.middleware.push(f);
    }

    pub fn len(&self) -> usize {
        self.middleware.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middleware.is_empty()
    }

    /// Runs the chain over REQ_OUT/RES_IN, where no short-circuit is
    /// possible. Returns `true` if the message should proceed.
    pub fn run_req_out(&self, req: &mut Request) -> bool {
        self.run_no_reply(Kind::ReqOut, Some(req), None)
    }

    pub fn run_res_in(&self, res: &mut Response) -> bool {
        self.run_no_reply(Kind::ResIn, None, Some(res))
    }

    fn run_no_reply(
        &self,
        kind: Kind,
        mut req: Option<&mut Request>,
        mut res: Option<&mut Response>,
    ) -> bool {
        for mw in &self.middleware {
            let mut continued = false;
            let station = Station {
                kind,
                request: req.as_deref_mut(),
                response: res.as_deref_mut(),
                reply: None,
            };
            let mut next = || continued = true;
            mw(station, &mut next);
            if !continued {
                return false;
            }
        }
        true
    }

    /// Runs the chain over REQ_IN/RES_OUT, where a middleware may
    /// short-circuit by replying.
    pub fn run_req_in(&self, req: &mut Request) -> Outcome {
        self.run_with_reply(Kind::ReqIn, Some(req), None)
    }

    pub fn run_res_out(&self, res: &mut Response) -> Outcome {
        self.run_with_reply(Kind::ResOut, None, Some(res))
    }

    fn run_with_reply(
        &self,
        kind: Kind,
        mut req: Option<&mut Request>,
        mut res: Option<&mut Response>,
    ) -> Outcome {
        for mw in &self.middleware {
            let mut continued = false;
            let mut replied = None;
            let station = Station {
                kind,
                request: req.as_deref_mut(),
                response: res.as_deref_mut(),
                reply: Some(&mut replied),
            };
            let mut next = || continued = true;
            mw(station, &mut next);
            if let Some((err, content)) = replied {
                return Outcome::Replied(err, content);
            }
            if !continued {
                return Outcome::Dropped;
            }
        }
        Outcome::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn sample_req() -> Request {
        Request {
            id: "1".into(),
            from: "a".into(),
            to: "b".into(),
            content: serde_json::Value::Null,
            date: 0,
            timeout: 10,
            headers: Default::default(),
            cb: false,
        }
    }

    #[test]
    fn runs_in_registration_order() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut chain = Chain::new();
        for i in 0..3 {
            let order = order.clone();
            chain.push(Arc::new(move |_s: Station<'_>, next: &mut dyn FnMut()| {
                order.lock().unwrap().push(i);
                next();
            }));
        }
        let mut req = sample_req();
        assert!(chain.run_req_out(&mut req));
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn not_calling_next_drops_silently() {
        let called = Arc::new(AtomicUsize::new(0));
        let mut chain = Chain::new();
        chain.push(Arc::new(|_s: Station<'_>, _next: &mut dyn FnMut()| {
            // never calls next
        }));
        let c2 = called.clone();
        chain.push(Arc::new(move |_s: Station<'_>, next: &mut dyn FnMut()| {
            c2.fetch_add(1, Ordering::SeqCst);
            next();
        }));
        let mut req = sample_req();
        assert!(!chain.run_req_out(&mut req));
        assert_eq!(called.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn short_circuit_reply_skips_remaining_middleware() {
        let called = Arc::new(AtomicUsize::new(0));
        let mut chain = Chain::new();
        chain.push(Arc::new(|s: Station<'_>, next: &mut dyn FnMut()| {
            if let Some(slot) = s.reply {
                *slot = Some((
                    Some(ResponseError::new(crate::error::ErrorCode::Forbidden)),
                    serde_json::Value::Null,
                ));
            } else {
                next();
            }
        }));
        let c2 = called.clone();
        chain.push(Arc::new(move |_s: Station<'_>, next: &mut dyn FnMut()| {
            c2.fetch_add(1, Ordering::SeqCst);
            next();
        }));
        let mut req = sample_req();
        let outcome = chain.run_req_in(&mut req);
        assert!(matches!(outcome, Outcome::Replied(..)));
        assert_eq!(called.load(Ordering::SeqCst), 0);
    }
}
