//! Jittered announce cadence, adapted from the swarm-size-scaled random
//! delay in the original mDNS `sender` — the goal is the same (keep a
//! broadcast rendezvous from turning into a synchronized storm), the wire
//! format is not.

use std::time::Duration;

use acto::ActoRef;
use rand::{thread_rng, Rng};

use super::guardian::GuardianMsg;

/// Adds a random fraction of `base` on top of it so peers don't all
/// announce in lockstep.
pub fn jitter(base: Duration) -> Duration {
    let quarter = (base.as_millis() as u64 / 4).max(1);
    let extra = thread_rng().gen_range(0..quarter);
    base + Duration::from_millis(extra)
}

/// Arms a one-shot timer that fires `AnnounceTick(generation)`. `generation`
/// lets the guardian ignore ticks left over from a previous `start`/`stop`
/// cycle.
pub fn schedule_tick(me: ActoRef<GuardianMsg>, generation: u64, delay: Duration) {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        me.send(GuardianMsg::AnnounceTick(generation));
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jitter_never_shrinks_and_stays_within_a_quarter() {
        let base = Duration::from_secs(5);
        for _ in 0..100 {
            let jittered = jitter(base);
            assert!(jittered >= base);
            assert!(jittered <= base + base / 4);
        }
    }
}
