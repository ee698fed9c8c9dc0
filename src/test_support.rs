//! Shared fixtures for unit tests

use std::sync::Arc;

use parking_lot::Mutex;

use crate::callback::{GuestKernel, ThreadId};
use crate::definitions::passthrough::PassthroughVoiceDefinition;
use crate::definitions::VoiceDefinition;
use crate::mempool::{Addr, MemBlock};
use crate::rack::{Rack, RackDescription};
use crate::scheduler::NullScheduler;
use crate::system::{System, SystemInitParameters};
use crate::Result;

pub(crate) fn make_system(granularity: u32) -> Arc<System> {
    let parameters = SystemInitParameters {
        max_racks: 4,
        max_voices: 16,
        granularity,
        sample_rate: 48_000,
    };
    System::init(
        &parameters,
        MemBlock::new(
            Addr(0x8000_0000),
            System::required_memspace_size(&parameters),
        ),
        Arc::new(NullScheduler),
    )
    .expect("system init")
}

/// Passthrough rack with `patches_per_output = 2` and stereo voices
pub(crate) fn make_rack(voice_count: u32, granularity: u32) -> (Arc<System>, Arc<Rack>) {
    let system = make_system(granularity);
    let definition: Arc<dyn VoiceDefinition> = Arc::new(PassthroughVoiceDefinition);
    let description = RackDescription {
        voice_count,
        channels_per_voice: 2,
        max_patches_per_input: 4,
        patches_per_output: 2,
    };
    let size = Rack::required_memspace_size(&description, Some(definition.as_ref()));
    let rack = Rack::init(
        &system,
        MemBlock::new(Addr(0x8100_0000), size),
        &description,
        Some(definition),
    )
    .expect("rack init");
    (system, rack)
}

#[derive(Debug, Default)]
pub(crate) struct KernelCalls {
    pub allocs: Vec<(ThreadId, u32)>,
    pub frees: Vec<(ThreadId, u32)>,
    pub writes: Vec<(Addr, Vec<u8>)>,
    pub invocations: Vec<(ThreadId, Addr)>,
}

/// Records every bridge call; stack allocations land at a fixed address.
#[derive(Debug, Default)]
pub(crate) struct MockKernel {
    pub calls: Mutex<KernelCalls>,
}

impl GuestKernel for MockKernel {
    fn stack_alloc(&self, thread_id: ThreadId, size: u32) -> Result<Addr> {
        self.calls.lock().allocs.push((thread_id, size));
        Ok(Addr(0xF000_0000))
    }

    fn stack_free(&self, thread_id: ThreadId, size: u32) -> Result<()> {
        self.calls.lock().frees.push((thread_id, size));
        Ok(())
    }

    fn write(&self, addr: Addr, bytes: &[u8]) -> Result<()> {
        self.calls.lock().writes.push((addr, bytes.to_vec()));
        Ok(())
    }

    fn run_guest_function(&self, thread_id: ThreadId, entry: Addr, _arg: Addr) -> Result<()> {
        self.calls.lock().invocations.push((thread_id, entry));
        Ok(())
    }
}
