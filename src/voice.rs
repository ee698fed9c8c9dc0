//! Voices: processing-chain instances, routing and input mixing
//!
//! A voice is one instance of its rack's module chain and the unit of
//! routing: upstream voices deliver mixed sample blocks through patches
//! into the voice's input manager once per tick. The voice's mutex guards
//! its patch table and the module-data lock flags; it is held only for the
//! duration of a single mutating operation, never across a mixing pass
//! (which runs under the voice scheduler's own serialization).

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Weak};

use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Mutex, MutexGuard, RawMutex};

use crate::mempool::Addr;
use crate::module::ModuleData;
use crate::patch::{Patch, PatchHandle};
use crate::rack::Rack;
use crate::{NgsError, Result, MAX_OUTPUT_PORT};

/// Lifecycle state of a voice.
///
/// `Available` is the idle state; the others are entered and left by
/// explicit transition requests from playback-control entry points. No
/// transition table is enforced here: any state may follow any other, and
/// modules are responsible for ignoring edges they do not care about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
#[repr(u8)]
pub enum VoiceState {
    /// Idle, unattached to active playback
    Available = 0,
    /// Queued for activation
    Pending,
    /// Actively producing output
    Playing,
    /// Suspended, retains its routing and parameters
    Paused,
    /// Released by the player, ringing out
    KeyOff,
    /// Final cleanup before returning to `Available`
    Finalizing,
    /// Being torn down with its rack
    Unloading,
}

/// Exclusive write access to a module's live parameter buffer.
///
/// Returned by [`Voice::lock_params`]. Holds only the slot's buffer mutex;
/// the voice itself stays fully usable while the guard is alive, and a
/// contending `lock_params` on the same slot fails fast on the lock flag.
/// Drop the guard before committing via [`Voice::unlock_params`], whose
/// change hook reads the buffer.
pub struct ParamsWriteGuard {
    buffer: ArcMutexGuard<RawMutex, Vec<u8>>,
}

impl std::ops::Deref for ParamsWriteGuard {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.buffer
    }
}

impl std::ops::DerefMut for ParamsWriteGuard {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.buffer
    }
}

/// Per-voice accumulation buffers, one per input slot.
///
/// Buffer contents persist across patch deliveries within a tick; the
/// mixing driver must call [`reset_inputs`](VoiceInputManager::reset_inputs)
/// once per tick before any patch delivers, otherwise stale samples from
/// the previous tick corrupt the mix.
#[derive(Debug)]
pub struct VoiceInputManager {
    granularity: u32,
    inputs: Vec<Vec<f32>>,
}

impl VoiceInputManager {
    pub(crate) fn new(granularity: u32, total_input: u16) -> Self {
        let mut manager = Self {
            granularity,
            inputs: Vec::new(),
        };
        manager.init(total_input);
        manager
    }

    fn init(&mut self, total_input: u16) {
        // Stereo FLTP per input slot
        self.inputs = (0..total_input)
            .map(|_| vec![0.0; self.granularity as usize * 2])
            .collect();
    }

    /// Zeroes every input buffer; called once per tick by the mix driver
    pub fn reset_inputs(&mut self) {
        for input in &mut self.inputs {
            input.fill(0.0);
        }
    }

    /// Number of input slots
    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    /// Accumulated samples for one input slot
    pub fn get_input_buffer(&self, index: usize) -> Option<&[f32]> {
        self.inputs.get(index).map(Vec::as_slice)
    }

    /// Mixes one block of interleaved stereo samples through `patch` into
    /// the destination slot named by the patch.
    ///
    /// The mix is additive and saturating: each frame is summed onto the
    /// existing buffer contents through the patch's gain matrix, then
    /// clamped to `[-1, 1]`. Multiple patches delivering into the same slot
    /// within one tick therefore sum their contributions.
    pub fn receive(&mut self, patch: &Patch, product: &[f32]) -> Result<()> {
        let frames = self.granularity as usize;
        if product.len() < frames * 2 {
            return Err(NgsError::OutOfRange {
                index: product.len(),
                limit: frames * 2,
            });
        }

        let matrix = patch.volume_matrix;
        let limit = self.inputs.len();
        let dest = self
            .inputs
            .get_mut(patch.dest_index)
            .ok_or(NgsError::OutOfRange {
                index: patch.dest_index,
                limit,
            })?;

        for k in 0..frames {
            let (l, r) = (product[k * 2], product[k * 2 + 1]);
            dest[k * 2] =
                (dest[k * 2] + l * matrix[0][0] + r * matrix[1][0]).clamp(-1.0, 1.0);
            dest[k * 2 + 1] =
                (dest[k * 2 + 1] + l * matrix[0][1] + r * matrix[1][1]).clamp(-1.0, 1.0);
        }

        Ok(())
    }
}

pub(crate) struct VoiceInner {
    pub(crate) rack: Weak<Rack>,
    pub(crate) this: Weak<Voice>,
    pub(crate) datas: Vec<ModuleData>,
    pub(crate) patches: Vec<Vec<Option<PatchHandle>>>,
}

/// One instance of a rack's module chain.
pub struct Voice {
    addr: Addr,
    state: AtomicU8,
    pending: AtomicBool,
    paused: AtomicBool,
    keyed_off: AtomicBool,
    pub(crate) inner: Mutex<VoiceInner>,
    inputs: Mutex<VoiceInputManager>,
}

impl Voice {
    pub(crate) fn new(
        addr: Addr,
        datas: Vec<ModuleData>,
        granularity: u32,
        patches_per_output: usize,
        input_count: u16,
    ) -> Self {
        Self {
            addr,
            state: AtomicU8::new(VoiceState::Available as u8),
            pending: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            keyed_off: AtomicBool::new(false),
            inner: Mutex::new(VoiceInner {
                rack: Weak::new(),
                this: Weak::new(),
                datas,
                patches: (0..MAX_OUTPUT_PORT)
                    .map(|_| (0..patches_per_output).map(|_| None).collect())
                    .collect(),
            }),
            inputs: Mutex::new(VoiceInputManager::new(granularity, input_count)),
        }
    }

    /// Wires the back-references once the owning rack exists.
    pub(crate) fn bind(&self, rack: Weak<Rack>, this: Weak<Voice>) {
        let mut inner = self.inner.lock();
        inner.rack = rack;
        inner.this = this;
    }

    /// Guest address of the voice record
    pub fn addr(&self) -> Addr {
        self.addr
    }

    /// The rack this voice belongs to, for its whole lifetime
    pub fn rack(&self) -> Option<Arc<Rack>> {
        self.inner.lock().rack.upgrade()
    }

    /// Current lifecycle state
    pub fn state(&self) -> VoiceState {
        VoiceState::from_u8(self.state.load(Ordering::Acquire)).unwrap_or(VoiceState::Available)
    }

    /// Whether the voice is queued for activation
    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    /// Marks the voice as queued for activation
    pub fn set_pending(&self, pending: bool) {
        self.pending.store(pending, Ordering::Release);
    }

    /// Whether playback is suspended
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// Suspends or resumes playback bookkeeping
    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Release);
    }

    /// Whether the voice has been released by the player
    pub fn is_keyed_off(&self) -> bool {
        self.keyed_off.load(Ordering::Acquire)
    }

    /// Marks the voice as released by the player
    pub fn set_keyed_off(&self, keyed_off: bool) {
        self.keyed_off.store(keyed_off, Ordering::Release);
    }

    /// Atomically swaps the lifecycle state and notifies every populated
    /// module in the chain with the state being left.
    ///
    /// Transitions never fail and are not validated against a transition
    /// table; modules ignore edges that do not concern them.
    pub fn transition(&self, new_state: VoiceState) {
        let previous = VoiceState::from_u8(self.state.swap(new_state as u8, Ordering::AcqRel))
            .unwrap_or(VoiceState::Available);

        let mut inner = self.inner.lock();
        let Some(rack) = inner.rack.upgrade() else {
            return;
        };
        for (i, data) in inner.datas.iter_mut().enumerate() {
            if let Some(module) = rack.modules.get(i).and_then(Option::as_ref) {
                module.on_state_change(data, previous);
            }
        }
    }

    /// Number of slots in the module chain
    pub fn module_count(&self) -> usize {
        self.inner.lock().datas.len()
    }

    /// Runs `f` against the module storage for one chain slot.
    ///
    /// Returns `None` when the slot index is out of range.
    pub fn with_module_storage<R>(
        &self,
        index: usize,
        f: impl FnOnce(&mut ModuleData) -> R,
    ) -> Option<R> {
        let mut inner = self.inner.lock();
        inner.datas.get_mut(index).map(f)
    }

    /// The voice's input manager, locked for the caller.
    ///
    /// The mixing driver takes this guard while delivering patches and
    /// while resetting buffers between ticks.
    pub fn inputs(&self) -> MutexGuard<'_, VoiceInputManager> {
        self.inputs.lock()
    }

    /// Routes this voice's output port to an input slot of `dest`.
    ///
    /// With `subindex == -1` the first free slot on the port is used (a
    /// slot is free when it was never created or a previous patch was
    /// removed from it). Fails with `None` when the port index exceeds
    /// [`MAX_OUTPUT_PORT`], the resolved subindex exceeds the per-port
    /// capacity, an explicit subindex is occupied by a live patch, or the
    /// rack's pool cannot back a first-time slot.
    ///
    /// On success the patch record is (re)wired and its gain matrix reset
    /// to identity.
    pub fn patch(
        &self,
        output_index: usize,
        subindex: i32,
        dest_index: usize,
        dest: &Arc<Voice>,
    ) -> Option<PatchHandle> {
        let mut inner = self.inner.lock();

        if output_index >= MAX_OUTPUT_PORT {
            // We don't have enough ports for you
            return None;
        }

        let rack = inner.rack.upgrade()?;
        let this = inner.this.clone();
        let slots = &mut inner.patches[output_index];

        // Reuse a slot another patch has vacated
        let mut subindex = subindex;
        if subindex == -1 {
            for (i, slot) in slots.iter().enumerate() {
                if slot.as_ref().map_or(true, |p| p.lock().is_free()) {
                    subindex = i as i32;
                    break;
                }
            }
        }

        if subindex < 0 || subindex as usize >= slots.len() {
            return None;
        }
        let subindex = subindex as usize;

        if let Some(existing) = &slots[subindex] {
            if !existing.lock().is_free() {
                // Occupied live patch; existing routing stays untouched
                return None;
            }
        }

        if slots[subindex].is_none() {
            // First use of this slot: back it with pool memory for good
            let record = rack.pool.lock().alloc::<Patch>()?;
            slots[subindex] = Some(Arc::new(Mutex::new(Patch::new(record.addr()))));
        }

        let handle = slots[subindex].clone()?;
        handle.lock().connect(
            output_index,
            subindex as i32,
            dest_index,
            this,
            Arc::downgrade(dest),
        );

        Some(handle)
    }

    /// Unroutes a patch previously created on this voice.
    ///
    /// The patch is located by handle identity among this voice's slots and
    /// marked logically free; its backing memory is retained for reuse.
    pub fn remove_patch(&self, patch: &PatchHandle) -> Result<()> {
        let inner = self.inner.lock();

        let found = inner
            .patches
            .iter()
            .flatten()
            .flatten()
            .any(|candidate| Arc::ptr_eq(candidate, patch));
        if !found {
            return Err(NgsError::PatchNotFound);
        }

        patch.lock().unroute();
        Ok(())
    }

    /// Takes the exclusive parameter write lock for one chain slot.
    ///
    /// Snapshots the current parameter bytes into the backup buffer, sets
    /// the lock flag and returns a guard over the live buffer for the
    /// caller to overwrite in place. Strictly non-blocking: returns `None`
    /// immediately when the slot is already locked (or out of range), so a
    /// concurrent second writer must retry rather than wait. The voice
    /// mutex is released before the guard is handed back; no other voice
    /// operation serializes behind the write.
    pub fn lock_params(&self, module_index: usize) -> Option<ParamsWriteGuard> {
        let buffer = {
            let mut inner = self.inner.lock();

            let data = inner.datas.get_mut(module_index)?;
            if data.is_locked() {
                return None;
            }

            // Keep a copy of the previous committed contents
            data.snapshot();
            data.set_locked(true);
            data.buffer_handle()
        };

        // The lock flag is the exclusivity protocol: it was clear a moment
        // ago, every other taker of the buffer mutex is transient, and no
        // second guard can exist until unlock_params clears the flag.
        Some(ParamsWriteGuard {
            buffer: buffer.lock_arc(),
        })
    }

    /// Commits a parameter write and releases the lock.
    ///
    /// Invokes the owning module's `on_param_change` hook with the (possibly
    /// just-written) buffer when the chain slot is populated, then clears
    /// the lock flag. The writer must drop its [`ParamsWriteGuard`] first;
    /// the hook takes the buffer mutex to read the committed bytes. Returns
    /// whether a lock was actually held; `false` means the caller unlocked
    /// without locking, which is a caller error but not fatal.
    pub fn unlock_params(&self, module_index: usize) -> Result<bool> {
        let mut inner = self.inner.lock();

        if module_index >= inner.datas.len() {
            return Err(NgsError::OutOfRange {
                index: module_index,
                limit: inner.datas.len(),
            });
        }

        if let Some(rack) = inner.rack.upgrade() {
            if let Some(module) = rack.modules.get(module_index).and_then(Option::as_ref) {
                module.on_param_change(&mut inner.datas[module_index]);
            }
        }

        let held = inner.datas[module_index].is_locked();
        inner.datas[module_index].set_locked(false);
        Ok(held)
    }
}

impl std::fmt::Debug for Voice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Voice")
            .field("addr", &self.addr)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
