//! Voice definitions: named, cacheable module-chain factories
//!
//! A voice definition describes the module chain instantiated for every
//! voice of a rack. Concrete decoder/player/mixer chains live in external
//! module crates and register themselves with the
//! [`State`](crate::state::State) registry per [`BussType`]; this crate
//! ships only the passthrough chain used as the lenient fallback for
//! unknown types.

pub mod passthrough;

use num_derive::FromPrimitive;

use crate::module::{ModuleList, DEFAULT_PARAMETER_SIZE};

/// Processing-chain type requested by the guest when creating a rack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive)]
#[repr(u32)]
pub enum BussType {
    /// Final output mixer chain
    Master = 0,
    /// Generic sub-mix buss
    MixerBuss,
    /// Compressed-audio decoder chain
    Atrac9,
    /// Raw PCM player chain
    NormalPlayer,
    /// Simplified player preset chain
    Simple,
    /// Simplified decoder preset chain
    SimpleAtrac9,
    /// Scream player preset chain
    Scream,
    /// Scream decoder preset chain
    ScreamAtrac9,
    /// Reverb effect buss
    Reverb,
    /// Equalizer buss
    Eq,
    /// No-op chain, also the fallback for unknown types
    Passthrough,
}

/// Factory describing one module chain.
///
/// Definitions are constructed once per [`BussType`] inside the session's
/// definition memspace and cached for the rest of the session; every rack
/// created for that type instantiates its chain from the same singleton.
pub trait VoiceDefinition: Send + Sync {
    /// The chain type this definition implements
    fn buss_type(&self) -> BussType;

    /// Instantiates a fresh module chain for one rack
    fn new_modules(&self) -> ModuleList;

    /// Per-voice parameter-buffer bytes the chain requires, used by rack
    /// sizing. Empty chain slots count at the default size.
    fn get_total_buffer_parameter_size(&self) -> usize {
        self.new_modules()
            .iter()
            .map(|slot| {
                slot.as_ref()
                    .map_or(DEFAULT_PARAMETER_SIZE, |m| m.get_buffer_parameter_size())
            })
            .sum()
    }

    /// Size of the definition record inside the definition memspace
    fn record_size(&self) -> usize;
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_traits::FromPrimitive;

    #[test]
    fn buss_type_from_raw_word() {
        assert_eq!(BussType::from_u32(0), Some(BussType::Master));
        assert_eq!(BussType::from_u32(3), Some(BussType::NormalPlayer));
        assert_eq!(BussType::from_u32(0xDEAD), None);
    }
}
