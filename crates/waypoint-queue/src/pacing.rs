//! Poll-loop pacing (spec.md §4.1 "Polling pacing").
//!
//! A consumer that always sleeps between polls drains a bursty queue too
//! slowly; one that never sleeps busy-loops the broker when it's empty.
//! The rule: an empty batch backs off, a full batch means there's more
//! work waiting so poll again immediately, and a partial batch gets a
//! short breather so the broker isn't hammered while still draining
//! promptly.
//!
//! spec.md §4.1 describes a long-poll driver where an empty batch needs
//! no extra sleep (the poll call itself already blocked). `MemoryQueue`
//! isn't a long-poll driver — its `poll` returns immediately regardless
//! of whether anything was waiting — so an empty result here still gets
//! a real backoff, or the loop would busy-spin. A broker-backed
//! long-poll driver can pass `received > 0` through unchanged and simply
//! never see the empty case hit this backoff in practice.

use std::time::Duration;

const PARTIAL_BATCH_BACKOFF: Duration = Duration::from_millis(100);
const EMPTY_BATCH_BACKOFF: Duration = Duration::from_millis(250);

/// What the poll loop should do before its next iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollOutcome {
    pub sleep: Option<Duration>,
}

/// Decide the pacing for the next poll given how many messages came back
/// out of `requested`.
///
/// - `received == 0`: back off (nothing to drain right now).
/// - `0 < received < requested`: short backoff (queue is thinning out).
/// - `received >= requested`: no backoff (queue likely has more ready).
pub fn poll_pace(received: usize, requested: u32) -> PollOutcome {
    let requested = requested as usize;
    if received == 0 {
        PollOutcome {
            sleep: Some(EMPTY_BATCH_BACKOFF),
        }
    } else if received < requested {
        PollOutcome {
            sleep: Some(PARTIAL_BATCH_BACKOFF),
        }
    } else {
        PollOutcome { sleep: None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_batch_backs_off() {
        assert_eq!(poll_pace(0, 10).sleep, Some(EMPTY_BATCH_BACKOFF));
    }

    #[test]
    fn partial_batch_short_backoff() {
        assert_eq!(poll_pace(3, 10).sleep, Some(PARTIAL_BATCH_BACKOFF));
    }

    #[test]
    fn full_batch_no_backoff() {
        assert_eq!(poll_pace(10, 10).sleep, None);
    }

    #[test]
    fn over_full_batch_no_backoff() {
        assert_eq!(poll_pace(12, 10).sleep, None);
    }

    #[test]
    fn zero_requested_treated_as_empty() {
        assert_eq!(poll_pace(0, 0).sleep, Some(EMPTY_BATCH_BACKOFF));
    }
}
