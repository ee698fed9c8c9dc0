//! Racks: fixed pools of voices sharing one module-chain definition
//!
//! A rack is created inside a caller-supplied guest memory region sized by
//! [`Rack::required_memspace_size`]. Construction placement-allocates the
//! rack record, every voice record and every parameter buffer from that
//! region up front; only patch records are allocated lazily, and nothing
//! is ever freed back.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::definitions::VoiceDefinition;
use crate::mempool::{Addr, MemBlock, MemPool};
use crate::module::{Module, ModuleData, ModuleList, DEFAULT_PARAMETER_SIZE};
use crate::patch::Patch;
use crate::system::System;
use crate::voice::Voice;
use crate::{NgsError, Result, MAX_OUTPUT_PORT};

/// Number of input slots per voice input manager
const VOICE_INPUT_COUNT: u16 = 1;

/// Uniform sizing parameters for a rack, fixed at creation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RackDescription {
    /// Number of voices in the rack
    pub voice_count: u32,
    /// Output channels per voice
    pub channels_per_voice: u32,
    /// Upper bound on patches delivering into one input slot
    pub max_patches_per_input: u32,
    /// Patch slots per output port
    pub patches_per_output: u32,
}

/// A pool of voices sharing one module-chain definition.
pub struct Rack {
    addr: Addr,
    system: Weak<System>,
    pub(crate) pool: Mutex<MemPool>,
    pub(crate) modules: ModuleList,
    definition: Option<Arc<dyn VoiceDefinition>>,
    voices: Vec<Arc<Voice>>,
    /// Output channels per voice
    pub channels_per_voice: u32,
    /// Upper bound on patches delivering into one input slot
    pub max_patches_per_input: u32,
    /// Patch slots per output port
    pub patches_per_output: u32,
}

impl Rack {
    /// Guest memory required for a rack with the given sizing, in bytes.
    ///
    /// Covers the rack record, all voice records, every per-(voice, chain
    /// slot) parameter buffer and the full patch table:
    /// `sizeof(Rack) + voices*sizeof(Voice) + voices*total_param_size +
    /// voices*patches_per_output*MAX_OUTPUT_PORT*sizeof(Patch)`.
    pub fn required_memspace_size(
        description: &RackDescription,
        definition: Option<&dyn VoiceDefinition>,
    ) -> u32 {
        let buffer_size = definition.map_or(0, |d| {
            d.get_total_buffer_parameter_size() as u32 * description.voice_count
        });

        std::mem::size_of::<Rack>() as u32
            + description.voice_count * std::mem::size_of::<Voice>() as u32
            + buffer_size
            + description.patches_per_output
                * MAX_OUTPUT_PORT as u32
                * description.voice_count
                * std::mem::size_of::<Patch>() as u32
    }

    /// Constructs a rack inside `memspace` and registers it with `system`.
    ///
    /// Instantiates the module chain from `definition` (an empty chain when
    /// absent), placement-constructs every voice and allocates each
    /// (voice, chain slot) parameter buffer at the module's declared size,
    /// or [`DEFAULT_PARAMETER_SIZE`] for unpopulated slots. Fails with
    /// [`NgsError::PoolExhausted`] when `memspace` was sized too small.
    pub fn init(
        system: &Arc<System>,
        memspace: MemBlock,
        description: &RackDescription,
        definition: Option<Arc<dyn VoiceDefinition>>,
    ) -> Result<Arc<Rack>> {
        let mut pool = MemPool::new(memspace);

        // The rack record itself claims the first block of the region
        alloc_record::<Rack>(&mut pool)?;

        let modules = definition
            .as_ref()
            .map(|d| d.new_modules())
            .unwrap_or_default();

        let granularity = system.granularity();
        let mut voices = Vec::with_capacity(description.voice_count as usize);

        for _ in 0..description.voice_count {
            let record = alloc_record::<Voice>(&mut pool)?;

            let mut datas = Vec::with_capacity(modules.len());
            for (i, slot) in modules.iter().enumerate() {
                let size = slot
                    .as_ref()
                    .map_or(DEFAULT_PARAMETER_SIZE, |m| m.get_buffer_parameter_size());
                let buffer = pool
                    .alloc_raw(size as u32)
                    .ok_or(NgsError::PoolExhausted {
                        requested: size as u32,
                        remaining: pool.remaining(),
                    })?;
                datas.push(ModuleData::new(i, buffer, size));
            }

            voices.push(Arc::new(Voice::new(
                record.addr(),
                datas,
                granularity,
                description.patches_per_output as usize,
                VOICE_INPUT_COUNT,
            )));
        }

        let rack = Arc::new(Rack {
            addr: memspace.base,
            system: Arc::downgrade(system),
            pool: Mutex::new(pool),
            modules,
            definition,
            voices,
            channels_per_voice: description.channels_per_voice,
            max_patches_per_input: description.max_patches_per_input,
            patches_per_output: description.patches_per_output,
        });

        for voice in &rack.voices {
            voice.bind(Arc::downgrade(&rack), Arc::downgrade(voice));
        }

        system.add_rack(rack.clone());
        Ok(rack)
    }

    /// Guest address of the rack record
    pub fn addr(&self) -> Addr {
        self.addr
    }

    /// The system owning this rack
    pub fn system(&self) -> Option<Arc<System>> {
        self.system.upgrade()
    }

    /// The rack's voices, fixed for the rack's lifetime
    pub fn voices(&self) -> &[Arc<Voice>] {
        &self.voices
    }

    /// Number of slots in the module chain
    pub fn module_count(&self) -> usize {
        self.modules.len()
    }

    /// The module in one chain slot, `None` for unpopulated slots
    pub fn module(&self, index: usize) -> Option<&dyn Module> {
        self.modules.get(index).and_then(|slot| slot.as_deref())
    }

    /// The definition this rack was built from
    pub fn definition(&self) -> Option<&Arc<dyn VoiceDefinition>> {
        self.definition.as_ref()
    }
}

impl std::fmt::Debug for Rack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rack")
            .field("addr", &self.addr)
            .field("voices", &self.voices.len())
            .field("modules", &self.modules.len())
            .finish_non_exhaustive()
    }
}

fn alloc_record<T>(pool: &mut MemPool) -> Result<crate::mempool::Handle<T>> {
    pool.alloc::<T>().ok_or(NgsError::PoolExhausted {
        requested: std::mem::size_of::<T>() as u32,
        remaining: pool.remaining(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definitions::passthrough::PassthroughVoiceDefinition;
    use crate::module::DEFAULT_PARAMETER_SIZE;
    use crate::test_support::make_system;

    fn description() -> RackDescription {
        RackDescription {
            voice_count: 4,
            channels_per_voice: 2,
            max_patches_per_input: 4,
            patches_per_output: 2,
        }
    }

    #[test]
    fn sizing_formula() {
        let definition = PassthroughVoiceDefinition;
        let per_voice_params = definition.get_total_buffer_parameter_size() as u32;

        let size = Rack::required_memspace_size(&description(), Some(&definition));
        let expected = std::mem::size_of::<Rack>() as u32
            + 4 * std::mem::size_of::<Voice>() as u32
            + 4 * per_voice_params
            + 4 * 2 * MAX_OUTPUT_PORT as u32 * std::mem::size_of::<Patch>() as u32;
        assert_eq!(size, expected);

        // Without a definition only the records and patch table count
        let bare = Rack::required_memspace_size(&description(), None);
        assert_eq!(bare, expected - 4 * per_voice_params);
    }

    #[test]
    fn init_fits_exactly_in_computed_size() {
        let system = make_system(4);
        let definition: Arc<dyn VoiceDefinition> = Arc::new(PassthroughVoiceDefinition);
        let size = Rack::required_memspace_size(&description(), Some(definition.as_ref()));

        let rack = Rack::init(
            &system,
            MemBlock::new(Addr(0x8100_0000), size),
            &description(),
            Some(definition),
        )
        .unwrap();

        assert_eq!(rack.voices().len(), 4);
        assert_eq!(system.racks().len(), 1);
        // Everything but the lazily allocated patch records is claimed
        assert_eq!(
            rack.pool.lock().remaining(),
            4 * 2 * MAX_OUTPUT_PORT as u32 * std::mem::size_of::<Patch>() as u32
        );
    }

    #[test]
    fn init_fails_on_undersized_region() {
        let system = make_system(4);
        let definition: Arc<dyn VoiceDefinition> = Arc::new(PassthroughVoiceDefinition);
        let size = Rack::required_memspace_size(&description(), Some(definition.as_ref()));
        // One parameter buffer short of the patch table
        let short = size
            - 4 * 2 * MAX_OUTPUT_PORT as u32 * std::mem::size_of::<Patch>() as u32
            - 1;

        let result = Rack::init(
            &system,
            MemBlock::new(Addr(0x8100_0000), short),
            &description(),
            Some(definition),
        );
        assert!(matches!(result, Err(NgsError::PoolExhausted { .. })));
        assert!(system.racks().is_empty());
    }

    #[test]
    fn parameter_buffers_sized_per_module() {
        let system = make_system(4);
        let definition: Arc<dyn VoiceDefinition> = Arc::new(PassthroughVoiceDefinition);
        let size = Rack::required_memspace_size(&description(), Some(definition.as_ref()));
        let rack = Rack::init(
            &system,
            MemBlock::new(Addr(0x8100_0000), size),
            &description(),
            Some(definition),
        )
        .unwrap();

        for voice in rack.voices() {
            assert_eq!(voice.module_count(), 1);
            let capacity = voice
                .with_module_storage(0, |data| data.capacity())
                .unwrap();
            assert_eq!(capacity, DEFAULT_PARAMETER_SIZE);
            // Buffers live inside the rack's region
            let addr = voice
                .with_module_storage(0, |data| data.descriptor().data)
                .unwrap();
            assert!(addr.0 >= 0x8100_0000);
        }
    }
}
