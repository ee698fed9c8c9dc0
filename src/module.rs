//! Processing-module capability interface and per-voice module storage
//!
//! A voice runs a fixed chain of processing modules (decoder, player,
//! mixer, ...). The concrete DSP lives outside this crate; the engine only
//! depends on the [`Module`] capability trait. Per (voice, chain slot) the
//! engine keeps a [`ModuleData`] record: the guest-writable parameter
//! buffer, a backup of the last committed contents, lock/bypass flags and
//! an optional guest callback.

use std::sync::Arc;

use bitflags::bitflags;
use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};

use crate::mempool::Addr;
use crate::voice::VoiceState;

/// Parameter-buffer size used for unpopulated chain slots
pub const DEFAULT_PARAMETER_SIZE: usize = 0x60;

bitflags! {
    /// Per-module state bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ModuleDataFlags: u32 {
        /// Parameter buffer is exclusively locked by a writer
        const PARAMS_LOCK = 1 << 0;
    }
}

/// Guest-visible descriptor of a parameter buffer: its address inside the
/// rack's memory region and its fixed capacity in bytes.
#[derive(Debug, Clone, Copy)]
pub struct BufferParamsInfo {
    /// Guest address of the buffer
    pub data: Addr,
    /// Buffer capacity in bytes, fixed at rack creation
    pub size: u32,
}

/// Capability interface implemented by every concrete processing-module
/// type. The engine never inspects module internals; it sizes buffers from
/// [`get_buffer_parameter_size`](Module::get_buffer_parameter_size) and
/// drives the two lifecycle hooks.
pub trait Module: Send + Sync {
    /// Stable identifier of the module type, reported to guest callbacks
    fn module_id(&self) -> u32;

    /// Required parameter-buffer capacity in bytes
    fn get_buffer_parameter_size(&self) -> usize;

    /// Called after a voice state transition, with the state being left
    fn on_state_change(&self, data: &mut ModuleData, previous: VoiceState) {
        let _ = (data, previous);
    }

    /// Called when a parameter write is committed via `unlock_params`
    fn on_param_change(&self, data: &mut ModuleData) {
        let _ = data;
    }
}

/// A voice's module chain: one optional module per slot, in processing
/// order. Empty slots still get a default-sized parameter buffer.
pub type ModuleList = Vec<Option<Box<dyn Module>>>;

/// Per-(voice, chain slot) parameter storage.
///
/// The `info` buffer is the live, guest-visible parameter area; `last_info`
/// holds the previously committed contents, snapshotted when a writer takes
/// the params lock. Capacity is fixed once at rack creation and the buffer
/// is never resized afterwards.
///
/// The live buffer sits behind its own mutex, separate from the voice
/// mutex: a parameter writer keeps it across the whole write while the
/// `PARAMS_LOCK` flag marks the slot taken, and everything else on the
/// voice proceeds unserialized. Accessors taking that mutex are transient;
/// holding one across a call that takes it again deadlocks.
#[derive(Debug)]
pub struct ModuleData {
    index: usize,
    info_addr: Addr,
    size: usize,
    info: Arc<Mutex<Vec<u8>>>,
    last_info: Vec<u8>,
    flags: ModuleDataFlags,
    /// Module is bypassed during mixing
    pub is_bypassed: bool,
    /// Guest callback function, null when unset
    pub callback: Addr,
    /// Opaque guest word passed back through the callback
    pub user_data: Addr,
    extra_storage: Vec<u8>,
}

impl ModuleData {
    /// Creates storage for chain slot `index` with a buffer of `size` bytes
    /// at guest address `info_addr`.
    pub(crate) fn new(index: usize, info_addr: Addr, size: usize) -> Self {
        Self {
            index,
            info_addr,
            size,
            info: Arc::new(Mutex::new(vec![0; size])),
            last_info: vec![0; size],
            flags: ModuleDataFlags::empty(),
            is_bypassed: false,
            callback: Addr::NULL,
            user_data: Addr::NULL,
            extra_storage: Vec::new(),
        }
    }

    /// Chain slot this storage belongs to
    pub fn index(&self) -> usize {
        self.index
    }

    /// Guest-visible descriptor of the live parameter buffer
    pub fn descriptor(&self) -> BufferParamsInfo {
        BufferParamsInfo {
            data: self.info_addr,
            size: self.size as u32,
        }
    }

    /// Live parameter bytes, locked for the caller.
    ///
    /// Transient read access; a writer holding the slot's write guard keeps
    /// this mutex, so do not call while holding one on the same slot.
    pub fn params(&self) -> MappedMutexGuard<'_, [u8]> {
        MutexGuard::map(self.info.lock(), Vec::as_mut_slice)
    }

    pub(crate) fn params_mut(&self) -> MappedMutexGuard<'_, [u8]> {
        MutexGuard::map(self.info.lock(), Vec::as_mut_slice)
    }

    /// Shared handle to the live buffer, for the params write guard
    pub(crate) fn buffer_handle(&self) -> Arc<Mutex<Vec<u8>>> {
        self.info.clone()
    }

    /// Parameter bytes as of the last lock, the writer's rollback copy
    pub fn last_params(&self) -> &[u8] {
        &self.last_info
    }

    /// Fixed buffer capacity in bytes
    pub fn capacity(&self) -> usize {
        self.size
    }

    /// Whether a parameter writer currently holds the lock
    pub fn is_locked(&self) -> bool {
        self.flags.contains(ModuleDataFlags::PARAMS_LOCK)
    }

    pub(crate) fn set_locked(&mut self, locked: bool) {
        self.flags.set(ModuleDataFlags::PARAMS_LOCK, locked);
    }

    /// Copies the live buffer into the backup copy
    pub(crate) fn snapshot(&mut self) {
        let info = self.info.lock();
        self.last_info.copy_from_slice(&info);
    }

    /// Grows the scratch area with zeros until it covers one full stereo
    /// block of `granularity` frames. Already-large storage is untouched.
    pub fn fill_to_fit_granularity(&mut self, granularity: u32) {
        let target = granularity as usize * 2 * std::mem::size_of::<f32>();
        if self.extra_storage.len() < target {
            self.extra_storage.resize(target, 0);
        }
    }

    /// Module-private scratch bytes
    pub fn extra_storage(&self) -> &[u8] {
        &self.extra_storage
    }

    /// Mutable module-private scratch bytes
    pub fn extra_storage_mut(&mut self) -> &mut Vec<u8> {
        &mut self.extra_storage
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_preserves_previous_contents() {
        let mut data = ModuleData::new(0, Addr(0x100), 4);

        data.params_mut().copy_from_slice(&[1, 2, 3, 4]);
        data.snapshot();
        data.params_mut().copy_from_slice(&[9, 9, 9, 9]);

        assert_eq!(data.last_params(), &[1, 2, 3, 4]);
        assert_eq!(&*data.params(), &[9, 9, 9, 9]);
    }

    #[test]
    fn lock_flag_round_trip() {
        let mut data = ModuleData::new(0, Addr(0x100), 8);

        assert!(!data.is_locked());
        data.set_locked(true);
        assert!(data.is_locked());
        data.set_locked(false);
        assert!(!data.is_locked());
    }

    #[test]
    fn fill_to_fit_granularity_is_idempotent() {
        let mut data = ModuleData::new(0, Addr(0x100), 8);

        data.fill_to_fit_granularity(256);
        assert_eq!(data.extra_storage().len(), 256 * 2 * 4);

        data.extra_storage_mut()[0] = 0xAB;
        data.fill_to_fit_granularity(256);
        // No shrink, no re-zeroing of existing bytes
        assert_eq!(data.extra_storage().len(), 256 * 2 * 4);
        assert_eq!(data.extra_storage()[0], 0xAB);
    }
}
