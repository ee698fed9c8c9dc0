//! Systems: top-level engine instances
//!
//! A system fixes the global timing configuration (granularity, sample
//! rate, voice budget) for its lifetime and owns an ordered set of racks.
//! Racks are allocated in caller-supplied regions of their own; the
//! system's region only holds the system record itself.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::mempool::{Addr, MemBlock, MemPool};
use crate::rack::Rack;
use crate::scheduler::VoiceScheduler;
use crate::{NgsError, Result};

/// Global configuration fixed at system creation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SystemInitParameters {
    /// Upper bound on racks in the system
    pub max_racks: u32,
    /// Upper bound on voices across all racks
    pub max_voices: u32,
    /// Sample frames processed per mixing tick
    pub granularity: u32,
    /// Output sample rate in Hz
    pub sample_rate: u32,
}

/// Top-level audio engine instance.
pub struct System {
    addr: Addr,
    pool: Mutex<MemPool>,
    max_racks: u32,
    max_voices: u32,
    granularity: u32,
    sample_rate: u32,
    racks: Mutex<Vec<Arc<Rack>>>,
    scheduler: Arc<dyn VoiceScheduler>,
}

impl System {
    /// Guest memory required for a system: its own record only, since
    /// racks live in separate caller-supplied regions.
    pub fn required_memspace_size(_parameters: &SystemInitParameters) -> u32 {
        std::mem::size_of::<System>() as u32
    }

    /// Placement-constructs a system inside `memspace`.
    pub fn init(
        parameters: &SystemInitParameters,
        memspace: MemBlock,
        scheduler: Arc<dyn VoiceScheduler>,
    ) -> Result<Arc<System>> {
        let mut pool = MemPool::new(memspace);

        // Reserve the first block for the system record
        pool.alloc::<System>().ok_or(NgsError::PoolExhausted {
            requested: std::mem::size_of::<System>() as u32,
            remaining: memspace.size,
        })?;

        Ok(Arc::new(System {
            addr: memspace.base,
            pool: Mutex::new(pool),
            max_racks: parameters.max_racks,
            max_voices: parameters.max_voices,
            granularity: parameters.granularity,
            sample_rate: parameters.sample_rate,
            racks: Mutex::new(Vec::with_capacity(parameters.max_racks as usize)),
            scheduler,
        }))
    }

    /// Guest address of the system record
    pub fn addr(&self) -> Addr {
        self.addr
    }

    /// Upper bound on racks
    pub fn max_racks(&self) -> u32 {
        self.max_racks
    }

    /// Upper bound on voices
    pub fn max_voices(&self) -> u32 {
        self.max_voices
    }

    /// Sample frames per mixing tick, immutable for the system's lifetime
    pub fn granularity(&self) -> u32 {
        self.granularity
    }

    /// Output sample rate in Hz, immutable for the system's lifetime
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// The external voice scheduler driving this system's mixing
    pub fn scheduler(&self) -> &Arc<dyn VoiceScheduler> {
        &self.scheduler
    }

    /// Bytes left unclaimed in the system's own region
    pub fn memspace_remaining(&self) -> u32 {
        self.pool.lock().remaining()
    }

    /// Snapshot of the racks currently registered
    pub fn racks(&self) -> Vec<Arc<Rack>> {
        self.racks.lock().clone()
    }

    pub(crate) fn add_rack(&self, rack: Arc<Rack>) {
        self.racks.lock().push(rack);
    }

    /// Tears a rack down and removes it from this system.
    ///
    /// Caller contract: must run outside the mixing tick and with the voice
    /// scheduler's lock held (except during full system teardown, where
    /// ordering is otherwise guaranteed). Every voice is dequeued from the
    /// scheduler before destruction so no concurrent mix touches a
    /// half-destroyed voice; this discipline is not defended internally.
    pub fn release_rack(&self, rack: &Arc<Rack>) {
        for voice in rack.voices() {
            self.scheduler.deque_voice(voice);
        }

        // Backing guest memory stays with the caller; only the engine-side
        // registration goes away.
        self.racks.lock().retain(|candidate| !Arc::ptr_eq(candidate, rack));
    }
}

impl std::fmt::Debug for System {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("System")
            .field("addr", &self.addr)
            .field("granularity", &self.granularity)
            .field("sample_rate", &self.sample_rate)
            .finish_non_exhaustive()
    }
}
