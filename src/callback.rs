//! Synchronous guest callback bridge
//!
//! The engine can invoke back into emulated guest code, e.g. to report
//! decoder buffer exhaustion. A fixed-layout info record is marshalled
//! onto the target guest thread's stack, the guest function runs to
//! completion, and the stack allocation is released on return. The bridge
//! is fire-and-wait: there is no failure channel back into the engine
//! beyond what the guest code itself produces.

use crate::mempool::Addr;
use crate::voice::Voice;
use crate::{NgsError, Result};

/// Guest thread identifier
pub type ThreadId = u32;

/// Byte size of the marshalled [`CallbackInfo`] record
pub const CALLBACK_INFO_SIZE: u32 = 28;

/// Consumed interface to the guest-CPU kernel: thread stacks, guest memory
/// writes and synchronous guest function invocation.
pub trait GuestKernel: Send + Sync {
    /// Reserves `size` bytes on the guest thread's stack
    fn stack_alloc(&self, thread_id: ThreadId, size: u32) -> Result<Addr>;

    /// Releases the most recent stack reservation of `size` bytes
    fn stack_free(&self, thread_id: ThreadId, size: u32) -> Result<()>;

    /// Writes raw bytes into guest memory
    fn write(&self, addr: Addr, bytes: &[u8]) -> Result<()>;

    /// Runs a guest function with one argument and waits for it to return
    fn run_guest_function(&self, thread_id: ThreadId, entry: Addr, arg: Addr) -> Result<()>;
}

/// Info record passed to guest callbacks.
///
/// Marshalled little-endian in field order, 28 bytes total. The layout is
/// guest-visible and must stay bit-compatible.
#[derive(Debug, Clone, Copy)]
pub struct CallbackInfo {
    /// Guest handle of the owning rack
    pub rack_handle: Addr,
    /// Guest handle of the owning voice
    pub voice_handle: Addr,
    /// Id of the module raising the callback
    pub module_id: u32,
    /// Primary reason code
    pub callback_reason: u32,
    /// Secondary reason code
    pub callback_reason_2: u32,
    /// Reason-specific guest pointer
    pub callback_ptr: Addr,
    /// Opaque word registered alongside the callback
    pub userdata: Addr,
}

impl CallbackInfo {
    /// Serializes the record to its guest wire layout
    pub fn to_bytes(&self) -> [u8; CALLBACK_INFO_SIZE as usize] {
        let mut bytes = [0u8; CALLBACK_INFO_SIZE as usize];
        let words = [
            self.rack_handle.0,
            self.voice_handle.0,
            self.module_id,
            self.callback_reason,
            self.callback_reason_2,
            self.callback_ptr.0,
            self.userdata.0,
        ];
        for (chunk, word) in bytes.chunks_exact_mut(4).zip(words) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        bytes
    }
}

impl Voice {
    /// Synchronously invokes a guest callback on behalf of this voice.
    ///
    /// A null `callback` is a silent no-op. Otherwise the [`CallbackInfo`]
    /// record is stack-allocated on the target thread, written, passed to
    /// the guest function, and freed once the guest returns.
    ///
    /// Reentrancy hazard: the guest code may call back into the engine, so
    /// callers must not hold this voice's locks (in particular a
    /// [`ParamsWriteGuard`](crate::voice::ParamsWriteGuard)) across this
    /// call.
    #[allow(clippy::too_many_arguments)]
    pub fn invoke_callback(
        &self,
        kernel: &dyn GuestKernel,
        thread_id: ThreadId,
        callback: Addr,
        user_data: Addr,
        module_id: u32,
        reason1: u32,
        reason2: u32,
        reason_ptr: Addr,
    ) -> Result<()> {
        if callback.is_null() {
            return Ok(());
        }

        let rack_handle = self.rack().map(|rack| rack.addr()).unwrap_or(Addr::NULL);
        let info = CallbackInfo {
            rack_handle,
            voice_handle: self.addr(),
            module_id,
            callback_reason: reason1,
            callback_reason_2: reason2,
            callback_ptr: reason_ptr,
            userdata: user_data,
        };

        let info_addr = kernel.stack_alloc(thread_id, CALLBACK_INFO_SIZE)?;
        kernel.write(info_addr, &info.to_bytes())?;
        kernel.run_guest_function(thread_id, callback, info_addr)?;
        kernel.stack_free(thread_id, CALLBACK_INFO_SIZE)
    }

    /// Invokes the callback registered on one chain slot's module storage,
    /// reporting the owning module's id.
    pub fn invoke_module_callback(
        &self,
        kernel: &dyn GuestKernel,
        thread_id: ThreadId,
        module_index: usize,
        reason1: u32,
        reason2: u32,
        reason_ptr: Addr,
    ) -> Result<()> {
        let (callback, user_data) = self
            .with_module_storage(module_index, |data| (data.callback, data.user_data))
            .ok_or(NgsError::OutOfRange {
                index: module_index,
                limit: self.module_count(),
            })?;

        let module_id = self
            .rack()
            .ok_or(NgsError::Detached)?
            .module(module_index)
            .map_or(0, |module| module.module_id());

        self.invoke_callback(
            kernel, thread_id, callback, user_data, module_id, reason1, reason2, reason_ptr,
        )
    }
}
