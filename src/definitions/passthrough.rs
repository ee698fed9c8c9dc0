//! Passthrough chain: a single module that leaves its input untouched
//!
//! Doubles as the forward-compatibility fallback: racks created with a
//! buss type nothing is registered for get this chain instead of failing.

use super::{BussType, VoiceDefinition};
use crate::module::{Module, ModuleData, ModuleList, DEFAULT_PARAMETER_SIZE};

/// Module id reported by the passthrough module
pub const PASSTHROUGH_MODULE_ID: u32 = 0x100;

/// The no-op processing module
#[derive(Debug, Default)]
pub struct PassthroughModule;

impl Module for PassthroughModule {
    fn module_id(&self) -> u32 {
        PASSTHROUGH_MODULE_ID
    }

    fn get_buffer_parameter_size(&self) -> usize {
        DEFAULT_PARAMETER_SIZE
    }

    fn on_param_change(&self, _data: &mut ModuleData) {
        // Nothing to react to; parameters are opaque to a passthrough
    }
}

/// Chain factory producing one passthrough module
#[derive(Debug, Default)]
pub struct PassthroughVoiceDefinition;

impl VoiceDefinition for PassthroughVoiceDefinition {
    fn buss_type(&self) -> BussType {
        BussType::Passthrough
    }

    fn new_modules(&self) -> ModuleList {
        vec![Some(Box::new(PassthroughModule))]
    }

    fn record_size(&self) -> usize {
        std::mem::size_of::<Self>()
    }
}
