//! Voice scheduler interface
//!
//! The mixing cadence is driven by an external voice scheduler that owns
//! the per-tick serialization. This core only needs one guarantee from it:
//! a voice can be removed from the active rotation at any time relative to
//! a pending mix of that voice, so teardown never races a mixing pass over
//! freed state.

use std::sync::Arc;

use crate::voice::Voice;

/// Consumed interface to the external voice scheduler.
pub trait VoiceScheduler: Send + Sync {
    /// Removes a voice from the active mixing rotation.
    ///
    /// Implementations must synchronize with the mixing pass: after this
    /// returns, no mix of `voice` is in flight or will start.
    fn deque_voice(&self, voice: &Arc<Voice>);
}

/// Scheduler stub for systems that drive mixing by hand.
#[derive(Debug, Default)]
pub struct NullScheduler;

impl VoiceScheduler for NullScheduler {
    fn deque_voice(&self, _voice: &Arc<Voice>) {}
}
