//! Patch routing edges
//!
//! A patch connects one output port of a source voice to one input slot of
//! a destination voice and carries the 2x2 gain matrix applied while the
//! source's output is mixed into the destination's input buffer. Patches
//! are pool-allocated lazily by the source voice and their backing memory
//! is never reclaimed; removal only marks the slot logically free for the
//! next `patch()` call.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::mempool::Addr;
use crate::voice::Voice;

/// Stereo gain matrix: `matrix[src_channel][dest_channel]`
pub type VolumeMatrix = [[f32; 2]; 2];

/// Identity routing: left to left, right to right, no cross-channel leakage
pub const IDENTITY_MATRIX: VolumeMatrix = [[1.0, 0.0], [0.0, 1.0]];

/// Shared handle to a routing edge.
///
/// The handle returned by [`Voice::patch`](crate::voice::Voice::patch) is
/// what guest-facing layers keep to adjust the gain matrix or remove the
/// route later.
pub type PatchHandle = Arc<Mutex<Patch>>;

/// A routed, gain-weighted connection between two voices.
#[derive(Debug)]
pub struct Patch {
    addr: Addr,
    /// Output port on the source voice
    pub output_index: usize,
    /// Slot within the output port; `-1` marks the patch logically free
    pub output_sub_index: i32,
    /// Input slot on the destination voice's input manager
    pub dest_index: usize,
    /// Source voice, weak to keep the voice graph cycle-free
    pub source: Weak<Voice>,
    /// Destination voice
    pub dest: Weak<Voice>,
    /// Gain matrix applied when delivering into the destination
    pub volume_matrix: VolumeMatrix,
}

impl Patch {
    /// Creates a free patch record backed by guest address `addr`
    pub(crate) fn new(addr: Addr) -> Self {
        Self {
            addr,
            output_index: 0,
            output_sub_index: -1,
            dest_index: 0,
            source: Weak::new(),
            dest: Weak::new(),
            volume_matrix: IDENTITY_MATRIX,
        }
    }

    /// Guest address of the patch record
    pub fn addr(&self) -> Addr {
        self.addr
    }

    /// A free patch occupies a slot but routes nothing
    pub fn is_free(&self) -> bool {
        self.output_sub_index == -1
    }

    /// Rewires the patch for a new route and resets the gain matrix to
    /// identity, exactly as if the record had just been created.
    pub(crate) fn connect(
        &mut self,
        output_index: usize,
        output_sub_index: i32,
        dest_index: usize,
        source: Weak<Voice>,
        dest: Weak<Voice>,
    ) {
        self.output_index = output_index;
        self.output_sub_index = output_sub_index;
        self.dest_index = dest_index;
        self.source = source;
        self.dest = dest;
        self.volume_matrix = IDENTITY_MATRIX;
    }

    /// Marks the patch logically free; the backing memory is retained
    pub(crate) fn unroute(&mut self) {
        self.output_sub_index = -1;
    }
}
