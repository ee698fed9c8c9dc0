//! NGS audio rack/voice graph engine
//!
//! A real-time audio synthesis/mixing graph engine emulating the PS Vita's
//! NGS hardware audio subsystem. Guest code creates a hierarchy of
//! processing contexts — systems own racks, racks own fixed pools of
//! voices, voices run module chains — and wires voices together with
//! patches, each carrying a 2x2 gain matrix. Every mixing tick, upstream
//! voices push one block of `granularity` sample frames through their
//! patches into downstream input buffers.
//!
//! All engine objects are placement-allocated inside externally supplied,
//! address-visible guest memory regions via fixed-capacity bump pools, so
//! guest code keeps stable handles for the whole session; the engine never
//! grows its arenas at runtime.
//!
//! # Quick start
//! ```
//! use std::sync::Arc;
//! use ngs_emu::definitions::BussType;
//! use ngs_emu::mempool::{Addr, MemBlock};
//! use ngs_emu::rack::{Rack, RackDescription};
//! use ngs_emu::scheduler::NullScheduler;
//! use ngs_emu::state::State;
//! use ngs_emu::system::SystemInitParameters;
//!
//! let mut state = State::new(MemBlock::new(Addr(0x9000_0000), State::default_memspace_size()));
//!
//! let params = SystemInitParameters {
//!     max_racks: 2,
//!     max_voices: 8,
//!     granularity: 256,
//!     sample_rate: 48_000,
//! };
//! let sys_size = ngs_emu::system::System::required_memspace_size(&params);
//! let system = state
//!     .init_system(&params, MemBlock::new(Addr(0x8000_0000), sys_size), Arc::new(NullScheduler))
//!     .unwrap();
//!
//! let description = RackDescription {
//!     voice_count: 2,
//!     channels_per_voice: 2,
//!     max_patches_per_input: 4,
//!     patches_per_output: 2,
//! };
//! let definition = state.get_voice_definition(BussType::Passthrough).unwrap();
//! let rack_size = Rack::required_memspace_size(&description, Some(definition.as_ref()));
//! let rack = state
//!     .init_rack(&system, MemBlock::new(Addr(0x8100_0000), rack_size), &description, BussType::Passthrough)
//!     .unwrap();
//!
//! // Route voice 0 into voice 1 and deliver one block
//! let source = rack.voices()[0].clone();
//! let dest = rack.voices()[1].clone();
//! let patch = source.patch(0, -1, 0, &dest).unwrap();
//! let block = vec![0.5f32; 256 * 2];
//! dest.inputs().receive(&patch.lock(), &block).unwrap();
//! ```
//!
//! Concrete decoder/player/mixer DSP lives in external module crates that
//! implement [`module::Module`] and register chain factories with
//! [`state::State::register_definition`]; this crate only depends on the
//! capability interface.

#![warn(missing_docs)]

pub mod callback;
pub mod definitions;
pub mod mempool;
pub mod module;
pub mod patch;
pub mod preset;
pub mod rack;
pub mod scheduler;
pub mod state;
pub mod system;
pub mod voice;

#[cfg(test)]
mod test_support;

/// Number of output ports on every voice
pub const MAX_OUTPUT_PORT: usize = 2;

/// Error types for engine operations.
///
/// Capacity and contention errors are reported to the caller and are never
/// fatal to the engine; structural misuse (releasing a rack while mixing)
/// is a caller-contract violation this crate does not defend against.
#[derive(thiserror::Error, Debug)]
pub enum NgsError {
    /// A fixed-capacity memory pool could not back an allocation; the
    /// owning region was sized too small
    #[error("memory pool exhausted: requested {requested} bytes, {remaining} remaining")]
    PoolExhausted {
        /// Bytes requested
        requested: u32,
        /// Bytes left in the pool
        remaining: u32,
    },

    /// An index exceeded a fixed capacity
    #[error("index {index} out of range (limit {limit})")]
    OutOfRange {
        /// Offending index
        index: usize,
        /// Exclusive upper bound
        limit: usize,
    },

    /// The patch handle does not belong to this voice
    #[error("patch not found on this voice")]
    PatchNotFound,

    /// A preset had failing parameter records; earlier records in the same
    /// block remain applied
    #[error("preset rejected: {failed} parameter record(s) failed")]
    PresetFailed {
        /// Number of records that failed to apply
        failed: usize,
    },

    /// Malformed preset blob
    #[error("malformed preset: {0}")]
    PresetFormat(String),

    /// The voice has outlived its rack
    #[error("voice is detached from its rack")]
    Detached,

    /// Error reported by the guest kernel bridge
    #[error("guest kernel error: {0}")]
    Kernel(String),
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, NgsError>;

pub use mempool::{Addr, MemBlock, MemPool};
pub use module::{Module, ModuleData};
pub use patch::{Patch, PatchHandle};
pub use rack::{Rack, RackDescription};
pub use state::State;
pub use system::{System, SystemInitParameters};
pub use voice::{Voice, VoiceInputManager, VoiceState};
