//! Session state: system list and the voice-definition registry
//!
//! One `State` exists per emulation session, with explicit initialization
//! and teardown; nothing here is ambient global state. It owns the global
//! definition memspace that voice-definition singletons are allocated
//! from, the list of live systems, and the registry mapping buss types to
//! their cached chain factories.

use std::collections::HashMap;
use std::sync::Arc;

use log::warn;

use crate::definitions::passthrough::PassthroughVoiceDefinition;
use crate::definitions::{BussType, VoiceDefinition};
use crate::mempool::{MemBlock, MemPool};
use crate::rack::Rack;
use crate::scheduler::VoiceScheduler;
use crate::system::{System, SystemInitParameters};
use crate::voice::Voice;
use crate::{NgsError, Result};

/// Definition-singleton slots the global memspace is sized for
pub const DEFINITION_SLOTS: u32 = 50;

/// Nominal per-definition record footprint used for default sizing;
/// external definitions vary but stay small
const DEFINITION_RECORD_SIZE: u32 = 64;

/// Factory registered by an external module crate for one buss type.
pub type DefinitionFactory = Box<dyn Fn() -> Arc<dyn VoiceDefinition> + Send + Sync>;

/// Per-session engine state.
pub struct State {
    pool: MemPool,
    systems: Vec<Arc<System>>,
    definitions: HashMap<BussType, Arc<dyn VoiceDefinition>>,
    factories: HashMap<BussType, DefinitionFactory>,
}

impl State {
    /// Binds the session to its global definition memspace.
    pub fn new(memspace: MemBlock) -> Self {
        Self {
            pool: MemPool::new(memspace),
            systems: Vec::new(),
            definitions: HashMap::new(),
            factories: HashMap::new(),
        }
    }

    /// Default size for the global definition memspace
    pub fn default_memspace_size() -> u32 {
        DEFINITION_SLOTS * DEFINITION_RECORD_SIZE
    }

    /// Registers the chain factory an external module crate provides for
    /// `buss_type`. Replaces any previous factory for the type; already
    /// cached singletons are unaffected.
    pub fn register_definition(&mut self, buss_type: BussType, factory: DefinitionFactory) {
        self.factories.insert(buss_type, factory);
    }

    /// Returns the cached definition singleton for `buss_type`,
    /// constructing it inside the definition memspace on first use.
    ///
    /// Unknown or unregistered types fall back to the passthrough chain
    /// with a warning rather than failing, so guests built against newer
    /// chain catalogs keep running.
    pub fn get_voice_definition(
        &mut self,
        buss_type: BussType,
    ) -> Result<Arc<dyn VoiceDefinition>> {
        if let Some(definition) = self.definitions.get(&buss_type) {
            return Ok(definition.clone());
        }

        let definition = self.create_voice_definition(buss_type);
        self.pool
            .alloc_raw(definition.record_size() as u32)
            .ok_or(NgsError::PoolExhausted {
                requested: definition.record_size() as u32,
                remaining: self.pool.remaining(),
            })?;

        self.definitions.insert(buss_type, definition.clone());
        Ok(definition)
    }

    fn create_voice_definition(&self, buss_type: BussType) -> Arc<dyn VoiceDefinition> {
        if let Some(factory) = self.factories.get(&buss_type) {
            return factory();
        }

        if buss_type != BussType::Passthrough {
            warn!(
                "Missing voice definition for buss type {:?}, using passthrough",
                buss_type
            );
        }
        Arc::new(PassthroughVoiceDefinition)
    }

    /// Creates a system and registers it with the session.
    pub fn init_system(
        &mut self,
        parameters: &SystemInitParameters,
        memspace: MemBlock,
        scheduler: Arc<dyn VoiceScheduler>,
    ) -> Result<Arc<System>> {
        let system = System::init(parameters, memspace, scheduler)?;
        self.systems.push(system.clone());
        Ok(system)
    }

    /// Creates a rack in `system` with the chain for `buss_type`.
    ///
    /// Convenience wrapper tying the registry to rack construction; callers
    /// holding a definition already can use [`Rack::init`] directly.
    pub fn init_rack(
        &mut self,
        system: &Arc<System>,
        memspace: MemBlock,
        description: &crate::rack::RackDescription,
        buss_type: BussType,
    ) -> Result<Arc<Rack>> {
        let definition = self.get_voice_definition(buss_type)?;
        Rack::init(system, memspace, description, Some(definition))
    }

    /// Tears down a system: releases all of its racks first, then removes
    /// the system from the session.
    ///
    /// Assumes no engine mutex is held by the caller.
    pub fn release_system(&mut self, system: &Arc<System>) {
        for rack in system.racks() {
            system.release_rack(&rack);
        }

        self.systems
            .retain(|candidate| !Arc::ptr_eq(candidate, system));
    }

    /// Live systems in creation order
    pub fn systems(&self) -> &[Arc<System>] {
        &self.systems
    }

    /// Total voices currently held by live racks, across all systems
    pub fn voice_count(&self) -> usize {
        self.systems
            .iter()
            .flat_map(|system| system.racks())
            .map(|rack| rack.voices().len())
            .sum()
    }

    /// Looks a voice up by its guest handle
    pub fn voice_by_addr(&self, addr: crate::mempool::Addr) -> Option<Arc<Voice>> {
        self.systems
            .iter()
            .flat_map(|system| system.racks())
            .flat_map(|rack| rack.voices().to_vec())
            .find(|voice| voice.addr() == addr)
    }
}

impl std::fmt::Debug for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("State")
            .field("systems", &self.systems.len())
            .field("definitions", &self.definitions.len())
            .finish_non_exhaustive()
    }
}
