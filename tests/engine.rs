//! End-to-end lifecycle tests against the public API

use std::sync::Arc;

use parking_lot::Mutex;

use ngs_emu::definitions::{BussType, VoiceDefinition};
use ngs_emu::mempool::{Addr, MemBlock};
use ngs_emu::module::{Module, ModuleData, ModuleList};
use ngs_emu::rack::{Rack, RackDescription};
use ngs_emu::scheduler::VoiceScheduler;
use ngs_emu::state::State;
use ngs_emu::system::{System, SystemInitParameters};
use ngs_emu::voice::{Voice, VoiceState};

#[derive(Debug, Default)]
struct RecordingScheduler {
    dequeued: Mutex<Vec<Addr>>,
}

impl VoiceScheduler for RecordingScheduler {
    fn deque_voice(&self, voice: &Arc<Voice>) {
        self.dequeued.lock().push(voice.addr());
    }
}

/// One module that records every lifecycle hook it sees
struct ProbeModule {
    state_changes: Arc<Mutex<Vec<VoiceState>>>,
    param_commits: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl Module for ProbeModule {
    fn module_id(&self) -> u32 {
        0x77
    }

    fn get_buffer_parameter_size(&self) -> usize {
        16
    }

    fn on_state_change(&self, _data: &mut ModuleData, previous: VoiceState) {
        self.state_changes.lock().push(previous);
    }

    fn on_param_change(&self, data: &mut ModuleData) {
        self.param_commits.lock().push(data.params().to_vec());
    }
}

struct ProbeDefinition {
    state_changes: Arc<Mutex<Vec<VoiceState>>>,
    param_commits: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl VoiceDefinition for ProbeDefinition {
    fn buss_type(&self) -> BussType {
        BussType::NormalPlayer
    }

    fn new_modules(&self) -> ModuleList {
        vec![
            Some(Box::new(ProbeModule {
                state_changes: self.state_changes.clone(),
                param_commits: self.param_commits.clone(),
            })),
            // Unpopulated slot, still gets a default-sized buffer
            None,
        ]
    }

    fn record_size(&self) -> usize {
        std::mem::size_of::<Self>()
    }
}

fn system_params(granularity: u32) -> SystemInitParameters {
    SystemInitParameters {
        max_racks: 4,
        max_voices: 16,
        granularity,
        sample_rate: 48_000,
    }
}

fn rack_description(voice_count: u32) -> RackDescription {
    RackDescription {
        voice_count,
        channels_per_voice: 2,
        max_patches_per_input: 4,
        patches_per_output: 2,
    }
}

#[test]
fn release_rack_deques_every_voice_exactly_once() {
    let scheduler = Arc::new(RecordingScheduler::default());
    let params = system_params(64);
    let system = System::init(
        &params,
        MemBlock::new(Addr(0x8000_0000), System::required_memspace_size(&params)),
        scheduler.clone(),
    )
    .unwrap();

    let mut state = State::new(MemBlock::new(Addr(0x9000_0000), State::default_memspace_size()));
    let description = rack_description(3);
    let definition = state.get_voice_definition(BussType::Passthrough).unwrap();
    let size = Rack::required_memspace_size(&description, Some(definition.as_ref()));
    let rack = state
        .init_rack(
            &system,
            MemBlock::new(Addr(0x8100_0000), size),
            &description,
            BussType::Passthrough,
        )
        .unwrap();

    let voice_addrs: Vec<Addr> = rack.voices().iter().map(|v| v.addr()).collect();
    system.release_rack(&rack);

    let mut dequeued = scheduler.dequeued.lock().clone();
    dequeued.sort();
    let mut expected = voice_addrs.clone();
    expected.sort();
    assert_eq!(dequeued, expected);
    assert!(system.racks().is_empty());
}

#[test]
fn release_system_tears_down_all_racks_first() {
    let scheduler = Arc::new(RecordingScheduler::default());
    let params = system_params(64);
    let mut state = State::new(MemBlock::new(Addr(0x9000_0000), State::default_memspace_size()));
    let system = state
        .init_system(
            &params,
            MemBlock::new(Addr(0x8000_0000), System::required_memspace_size(&params)),
            scheduler.clone(),
        )
        .unwrap();

    let description = rack_description(2);
    let definition = state.get_voice_definition(BussType::Passthrough).unwrap();
    let size = Rack::required_memspace_size(&description, Some(definition.as_ref()));
    for i in 0..3u32 {
        state
            .init_rack(
                &system,
                MemBlock::new(Addr(0x8100_0000 + i * 0x10_0000), size),
                &description,
                BussType::Passthrough,
            )
            .unwrap();
    }
    assert_eq!(system.racks().len(), 3);
    assert_eq!(state.voice_count(), 6);

    state.release_system(&system);

    assert!(state.systems().is_empty());
    assert!(system.racks().is_empty());
    // Every voice of every rack was dequeued once
    assert_eq!(scheduler.dequeued.lock().len(), 6);
}

#[test]
fn guest_voice_handles_resolve_through_the_session() {
    let params = system_params(64);
    let mut state = State::new(MemBlock::new(Addr(0x9000_0000), State::default_memspace_size()));
    let system = state
        .init_system(
            &params,
            MemBlock::new(Addr(0x8000_0000), System::required_memspace_size(&params)),
            Arc::new(RecordingScheduler::default()),
        )
        .unwrap();

    let description = rack_description(2);
    let definition = state.get_voice_definition(BussType::Passthrough).unwrap();
    let size = Rack::required_memspace_size(&description, Some(definition.as_ref()));
    let rack = state
        .init_rack(
            &system,
            MemBlock::new(Addr(0x8100_0000), size),
            &description,
            BussType::Passthrough,
        )
        .unwrap();

    let wanted = rack.voices()[1].clone();
    let found = state.voice_by_addr(wanted.addr()).unwrap();
    assert!(Arc::ptr_eq(&found, &wanted));

    // Addresses outside any rack region resolve to nothing
    assert!(state.voice_by_addr(Addr(0xDEAD_0000)).is_none());

    // A released rack's handles stop resolving
    system.release_rack(&rack);
    assert!(state.voice_by_addr(wanted.addr()).is_none());
}

#[test]
fn transition_and_param_commit_reach_chain_modules() {
    let state_changes = Arc::new(Mutex::new(Vec::new()));
    let param_commits = Arc::new(Mutex::new(Vec::new()));

    let params = system_params(64);
    let system = System::init(
        &params,
        MemBlock::new(Addr(0x8000_0000), System::required_memspace_size(&params)),
        Arc::new(RecordingScheduler::default()),
    )
    .unwrap();

    let definition: Arc<dyn VoiceDefinition> = Arc::new(ProbeDefinition {
        state_changes: state_changes.clone(),
        param_commits: param_commits.clone(),
    });
    let description = rack_description(1);
    let size = Rack::required_memspace_size(&description, Some(definition.as_ref()));
    let rack = Rack::init(
        &system,
        MemBlock::new(Addr(0x8100_0000), size),
        &description,
        Some(definition),
    )
    .unwrap();

    let voice = rack.voices()[0].clone();
    assert_eq!(voice.module_count(), 2);

    voice.transition(VoiceState::Playing);
    voice.transition(VoiceState::KeyOff);
    assert_eq!(
        state_changes.lock().as_slice(),
        &[VoiceState::Available, VoiceState::Playing]
    );

    {
        let mut guard = voice.lock_params(0).unwrap();
        guard[0] = 0xA5;
    }
    assert!(voice.unlock_params(0).unwrap());

    let commits = param_commits.lock();
    assert_eq!(commits.len(), 1);
    assert_eq!(commits[0][0], 0xA5);
    assert_eq!(commits[0].len(), 16);
}

#[test]
fn cross_rack_routing_mixes_into_destination() {
    let params = system_params(8);
    let system = System::init(
        &params,
        MemBlock::new(Addr(0x8000_0000), System::required_memspace_size(&params)),
        Arc::new(RecordingScheduler::default()),
    )
    .unwrap();

    let mut state = State::new(MemBlock::new(Addr(0x9000_0000), State::default_memspace_size()));
    let description = rack_description(1);
    let definition = state.get_voice_definition(BussType::Passthrough).unwrap();
    let size = Rack::required_memspace_size(&description, Some(definition.as_ref()));

    let player = state
        .init_rack(
            &system,
            MemBlock::new(Addr(0x8100_0000), size),
            &description,
            BussType::NormalPlayer,
        )
        .unwrap();
    let master = state
        .init_rack(
            &system,
            MemBlock::new(Addr(0x8200_0000), size),
            &description,
            BussType::Master,
        )
        .unwrap();

    let source = player.voices()[0].clone();
    let dest = master.voices()[0].clone();
    let patch = source.patch(0, -1, 0, &dest).unwrap();

    // Two ticks with a reset in between: no stale carry-over
    let block = vec![0.25f32; 8 * 2];
    for _ in 0..2 {
        let mut inputs = dest.inputs();
        inputs.reset_inputs();
        inputs.receive(&patch.lock(), &block).unwrap();
    }

    let inputs = dest.inputs();
    let mixed = inputs.get_input_buffer(0).unwrap();
    assert!(mixed.iter().all(|&s| (s - 0.25).abs() < 1e-6));
}
