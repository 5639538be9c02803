//! End-to-end routing scenarios against the mock hardware.
//!
//! Each test boots a coordinator on a small topology, drives hot-plug and
//! stream requests through it, and checks the resulting streams, patches,
//! mute commands and waits. A failed device connect must leave the routing
//! state exactly as it found it.

use patchbay_config::{PolicyConfig, TopologyConfig, reference_topology};
use patchbay_core::{
    AudioAttributes, AudioConfig, AudioFormat, AudioProfile, ChannelMask, CompatibilityScore,
    DeviceId, DeviceKey, DeviceType, HalOp, IoFlags, IoRole, OutputFlags, PolicyError,
    ProfileCatalog, ScoreRequest, SessionId, StreamId, Uid, Usage, score,
};
use patchbay_policy::{
    Bridge, DeviceAvailability, DeviceConnectedState, HalCall, LegacyStrategy, MockHal,
    OutputRequest, PatchSpec, PortSpec, PriorityEngine, RecordingPacer, RoutingCoordinator,
};

type Core = RoutingCoordinator<MockHal, PriorityEngine>;

/// Routing logs for a failing test: `RUST_LOG=patchbay_policy=debug cargo test`.
fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with_test_writer()
        .try_init();
}

fn catalog(toml: &str) -> ProfileCatalog {
    TopologyConfig::from_toml(toml)
        .expect("topology parses")
        .into_catalog()
        .expect("topology builds")
}

fn reference() -> ProfileCatalog {
    reference_topology().unwrap().into_catalog().unwrap()
}

fn boot(catalog: ProfileCatalog, hal: MockHal) -> (Core, RecordingPacer) {
    boot_with(catalog, hal, PolicyConfig::default())
}

fn boot_with(catalog: ProfileCatalog, hal: MockHal, config: PolicyConfig) -> (Core, RecordingPacer) {
    init_tracing();
    let pacer = RecordingPacer::new();
    let core = RoutingCoordinator::new(catalog, PriorityEngine::new(), hal, config)
        .expect("routing core boots")
        .with_pacer(pacer.clone());
    (core, pacer)
}

fn connect(core: &mut Core, device_type: DeviceType) -> DeviceId {
    core.set_device_connection_state(device_type, "", "", DeviceAvailability::Available)
        .expect("device connects")
}

fn disconnect(core: &mut Core, device_type: DeviceType) -> DeviceId {
    core.set_device_connection_state(device_type, "", "", DeviceAvailability::Unavailable)
        .expect("device disconnects")
}

fn media() -> OutputRequest {
    OutputRequest::new(
        AudioAttributes::for_usage(Usage::Media),
        AudioConfig::default_output(),
    )
}

fn profile_name(core: &Core, stream: StreamId) -> String {
    let profile = core.pool().output(stream).unwrap().profile.unwrap();
    core.platform().catalog().profile(profile).unwrap().name.clone()
}

fn streams_on(core: &Core, profile: &str) -> Vec<StreamId> {
    core.pool()
        .outputs()
        .filter(|o| {
            o.profile
                .and_then(|p| core.platform().catalog().profile(p))
                .is_some_and(|p| p.name == profile)
        })
        .map(|o| o.id)
        .collect()
}

// ============================================================================
// 1. A device with its own mixer profile
// ============================================================================

const DOCK_TOPOLOGY: &str = r#"
[[modules]]
name = "primary"
version = "3.0"

[[modules.devices]]
name = "Speaker"
type = "out_speaker"
attached = true

[[modules.outputs]]
name = "primary output"
flags = "primary"

[[modules.outputs.profiles]]
format = "pcm_16_bit"
rates = [48000]
masks = ["out_stereo"]

[[modules.routes]]
sink = "Speaker"
sources = ["primary output"]

[[modules]]
name = "dock"
version = "3.0"

[[modules.devices]]
name = "Line Out"
type = "out_line_digital"

[[modules.outputs]]
name = "line output"

[[modules.outputs.profiles]]
format = "pcm_16_bit"
rates = [48000]
masks = ["out_stereo"]

[[modules.routes]]
sink = "Line Out"
sources = ["line output"]
"#;

#[test]
fn connected_device_gets_its_own_mixer_stream() {
    let (mut core, _) = boot(catalog(DOCK_TOPOLOGY), MockHal::new());
    let line = connect(&mut core, DeviceType::OutLineDigital);

    let opened: Vec<_> = core
        .hal()
        .journal()
        .iter()
        .filter_map(|call| match call {
            HalCall::OpenOutput { profile, io, .. } if profile == "line output" => *io,
            _ => None,
        })
        .collect();
    assert_eq!(opened.len(), 1, "the line profile is opened once, at connect");

    let request = media().with_preferred_device(line);
    let first = core.get_output_for_attr(&request).unwrap();
    let second = core.get_output_for_attr(&request).unwrap();
    assert_eq!(first.stream, second.stream);
    assert_eq!(first.io, opened[0]);
    assert_eq!(first.devices, vec![line]);
    assert_eq!(profile_name(&core, first.stream), "line output");

    let key = DeviceKey::of_type(DeviceType::OutLineDigital);
    let (_, profile) = core
        .platform()
        .catalog()
        .profiles_for_device(IoRole::Output, &key)
        .next()
        .unwrap();
    let outcome = score(
        profile,
        &ScoreRequest {
            devices: std::slice::from_ref(&key),
            config: AudioConfig::default_output(),
            flags: IoFlags::Output(OutputFlags::empty()),
            exact_device_query: false,
        },
    );
    assert_eq!(outcome.score, CompatibilityScore::ExactMatch);
}

#[test]
fn secondary_module_stream_is_mirrored_with_primary() {
    let (mut core, _) = boot(catalog(DOCK_TOPOLOGY), MockHal::new());
    let speaker = core.registry().find_id(DeviceType::OutSpeaker, "").unwrap();
    let line = connect(&mut core, DeviceType::OutLineDigital);

    let primary = core.primary_output().unwrap();
    let line_stream = streams_on(&core, "line output")[0];
    let duplicate = core
        .pool()
        .outputs()
        .find(|o| o.is_duplicated())
        .expect("a duplicate is opened for the dock");
    assert_eq!(duplicate.mirrors, Some((primary, line_stream)));
    assert!(duplicate.devices.contains(&speaker));
    assert!(duplicate.devices.contains(&line));

    disconnect(&mut core, DeviceType::OutLineDigital);
    assert!(streams_on(&core, "line output").is_empty());
    assert!(core.pool().outputs().all(|o| !o.is_duplicated()));
    assert!(core.pool().output(primary).is_some());
}

// ============================================================================
// 2. Direct profiles with equal scores
// ============================================================================

const DIRECT_TOPOLOGY: &str = r#"
[[modules]]
name = "primary"
version = "3.0"

[[modules.devices]]
name = "Speaker"
type = "out_speaker"
attached = true

[[modules.outputs]]
name = "primary output"
flags = "primary"

[[modules.outputs.profiles]]
format = "pcm_16_bit"
rates = [48000]
masks = ["out_stereo"]

[[modules.outputs]]
name = "direct output"
flags = "direct"

[[modules.outputs.profiles]]
format = "mp3"
rates = [44100, 48000]
masks = ["out_stereo"]

[[modules.outputs]]
name = "offload output"
flags = "direct|compress_offload"

[[modules.outputs.profiles]]
format = "mp3"
rates = [44100, 48000]
masks = ["out_stereo"]

[[modules.routes]]
sink = "Speaker"
sources = ["primary output", "direct output", "offload output"]
"#;

#[test]
fn offload_profile_wins_a_tie_between_direct_profiles() {
    let (mut core, _) = boot(catalog(DIRECT_TOPOLOGY), MockHal::new());
    let request = OutputRequest::new(
        AudioAttributes::for_usage(Usage::Media),
        AudioConfig::new(44100, AudioFormat::Mp3, ChannelMask::OUT_STEREO),
    )
    .with_flags(OutputFlags::DIRECT);

    let grant = core.get_output_for_attr(&request).unwrap();
    assert_eq!(profile_name(&core, grant.stream), "offload output");
    assert_eq!(grant.config.format, AudioFormat::Mp3);
    assert_eq!(grant.config.sample_rate, 44100);
    assert!(core.pool().output(grant.stream).unwrap().patch.is_some());
}

#[test]
fn released_direct_stream_is_closed() {
    let (mut core, _) = boot(catalog(DIRECT_TOPOLOGY), MockHal::new());
    let request = OutputRequest::new(
        AudioAttributes::for_usage(Usage::Media),
        AudioConfig::new(48000, AudioFormat::Mp3, ChannelMask::OUT_STEREO),
    );
    let grant = core.get_output_for_attr(&request).unwrap();
    assert!(core.pool().output(grant.stream).unwrap().is_direct());

    core.release_output(grant.client).unwrap();
    assert!(core.pool().output(grant.stream).is_none());
    assert!(core.hal().journal().contains(&HalCall::CloseOutput(grant.io)));
}

#[test]
fn exclusive_request_without_profile_carries_a_hint() {
    let (mut core, _) = boot(reference(), MockHal::new());
    let err = core
        .get_output_for_attr(&media().with_flags(OutputFlags::HW_AV_SYNC))
        .unwrap_err();
    match err {
        PolicyError::NoCompatibleStream { requested, hint } => {
            assert_eq!(requested, AudioConfig::default_output());
            assert_eq!(hint, Some(AudioConfig::default_output()));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn second_offload_session_evicts_the_first() {
    let (mut core, _) = boot(reference(), MockHal::new());
    let mp3 = AudioConfig::new(48000, AudioFormat::Mp3, ChannelMask::OUT_STEREO);
    let first = core
        .get_output_for_attr(
            &OutputRequest::new(AudioAttributes::for_usage(Usage::Media), mp3)
                .with_session(SessionId::new(1)),
        )
        .unwrap();
    let second = core
        .get_output_for_attr(
            &OutputRequest::new(AudioAttributes::for_usage(Usage::Media), mp3)
                .with_session(SessionId::new(2)),
        )
        .unwrap();

    assert_ne!(first.stream, second.stream);
    assert!(core.pool().output(first.stream).is_none());
    assert!(core.pool().client(first.client).is_none());
    assert!(core.hal().invalidated().contains(&first.client));
    assert_eq!(streams_on(&core, "compressed offload"), vec![second.stream]);
}

// ============================================================================
// 3. Software bridges follow their sink
// ============================================================================

#[test]
fn software_bridge_is_torn_down_with_its_sink() {
    let (mut core, _) = boot(reference(), MockHal::new());
    let a2dp = connect(&mut core, DeviceType::OutBluetoothA2dp);
    let tuner = connect(&mut core, DeviceType::InFmTuner);
    let outputs_before = core.pool().outputs().count();

    // No route joins the tuner to A2DP, so a mixer stream carries it.
    let handle = core
        .create_audio_patch(
            PatchSpec::new(PortSpec::Device(tuner), vec![PortSpec::Device(a2dp)]),
            None,
            Uid::new(10_100),
        )
        .unwrap();
    let record = core.patches().get(handle).unwrap().clone();
    let Bridge::Software {
        stream: bridge,
        opened_for_bridge: true,
    } = record.bridge
    else {
        panic!("expected a bridge stream opened for the patch, got {:?}", record.bridge);
    };
    assert_eq!(profile_name(&core, bridge), "deep buffer");
    assert_eq!(core.pool().outputs().count(), outputs_before + 1);
    let bridge_io = core.pool().output(bridge).unwrap().io;

    let grant = core.get_output_for_attr(&media()).unwrap();
    assert_ne!(grant.stream, bridge, "a bridge stream is never shared");

    disconnect(&mut core, DeviceType::OutBluetoothA2dp);
    assert!(core.patches().get(handle).is_none());
    assert!(core.pool().output(bridge).is_none());
    assert!(core.hal().journal().contains(&HalCall::CloseOutput(bridge_io)));
    assert!(
        core.hal()
            .installed_patches()
            .all(|(hw, _)| *hw != record.hw_handle)
    );
}

#[test]
fn failed_bridge_patch_closes_the_stream_it_opened() {
    let (mut core, _) = boot(reference(), MockHal::new());
    let a2dp = connect(&mut core, DeviceType::OutBluetoothA2dp);
    let tuner = connect(&mut core, DeviceType::InFmTuner);
    let outputs_before = core.pool().outputs().count();
    let patches_before = core.patches().len();

    core.hal_mut().fail_next(HalOp::CreatePatch, -19);
    let err = core
        .create_audio_patch(
            PatchSpec::new(PortSpec::Device(tuner), vec![PortSpec::Device(a2dp)]),
            None,
            Uid::new(10_100),
        )
        .unwrap_err();
    assert!(matches!(err, PolicyError::Hal(_)));
    assert_eq!(core.pool().outputs().count(), outputs_before);
    assert_eq!(core.patches().len(), patches_before);
}

// ============================================================================
// 4. Mute waits around a device switch
// ============================================================================

#[test]
fn switching_an_active_stream_waits_four_latencies() {
    let (mut core, pacer) = boot(reference(), MockHal::new().with_latency(20));
    let grant = core.get_output_for_attr(&media()).unwrap();
    assert_eq!(Some(grant.stream), core.primary_output());
    core.start_output(grant.client).unwrap();
    assert!(pacer.waits().is_empty(), "starting on the current device needs no wait");

    let headset = connect(&mut core, DeviceType::OutWiredHeadset);
    assert_eq!(pacer.waits(), vec![80]);

    let primary = core.pool().output(grant.stream).unwrap();
    assert_eq!(primary.devices, vec![headset]);
    let strategy = LegacyStrategy::Media.id();
    let commands = core.hal().mute_commands();
    assert!(commands.contains(&(primary.io, strategy, true, 0)));
    assert!(commands.contains(&(primary.io, strategy, false, 80)));
}

#[test]
fn only_active_streams_wait_on_a_switch() {
    let (mut core, pacer) = boot(reference(), MockHal::new());
    let grant = core.get_output_for_attr(&media()).unwrap();
    connect(&mut core, DeviceType::OutWiredHeadset);
    core.start_output(grant.client).unwrap();

    // The move happens at start, with the stream already active.
    assert_eq!(pacer.waits(), vec![80]);
    core.stop_output(grant.client).unwrap();
    disconnect(&mut core, DeviceType::OutWiredHeadset);
    assert_eq!(pacer.waits(), vec![80]);
}

#[test]
fn recommended_mute_duration_overrides_latency() {
    const TOPOLOGY: &str = r#"
[[modules]]
name = "primary"
version = "3.0"

[[modules.devices]]
name = "Speaker"
type = "out_speaker"
attached = true

[[modules.devices]]
name = "Wired Headphones"
type = "out_wired_headphone"

[[modules.outputs]]
name = "primary output"
flags = "primary"
recommended_mute_duration_ms = 150

[[modules.outputs.profiles]]
format = "pcm_16_bit"
rates = [48000]
masks = ["out_stereo"]

[[modules.routes]]
sink = "Speaker"
sources = ["primary output"]

[[modules.routes]]
sink = "Wired Headphones"
sources = ["primary output"]
"#;
    let (mut core, pacer) = boot(catalog(TOPOLOGY), MockHal::new().with_latency(20));
    let grant = core.get_output_for_attr(&media()).unwrap();
    core.start_output(grant.client).unwrap();
    connect(&mut core, DeviceType::OutWiredHeadphone);
    assert_eq!(pacer.waits(), vec![150]);
}

// ============================================================================
// 5. Failed connects leave nothing behind
// ============================================================================

struct Before {
    devices: usize,
    outputs: Vec<StreamId>,
    open_streams: usize,
}

fn before(core: &Core) -> Before {
    Before {
        devices: core.registry().len(),
        outputs: core.pool().outputs().map(|o| o.id).collect(),
        open_streams: core.hal().open_stream_count(),
    }
}

fn assert_unchanged(core: &Core, was: &Before, device_type: DeviceType) {
    assert_eq!(core.registry().len(), was.devices);
    assert!(core.registry().find_id(device_type, "").is_none());
    let outputs: Vec<_> = core.pool().outputs().map(|o| o.id).collect();
    assert_eq!(outputs, was.outputs);
    assert_eq!(core.hal().open_stream_count(), was.open_streams);
}

fn usb_capabilities(hal: &mut MockHal) {
    usb_capabilities_for(hal, DeviceType::OutUsbHeadset);
}

fn usb_capabilities_for(hal: &mut MockHal, device_type: DeviceType) {
    hal.set_capabilities(
        &DeviceKey::of_type(device_type),
        vec![AudioProfile::new(
            AudioFormat::Pcm16Bit,
            vec![48000],
            vec![ChannelMask::OUT_STEREO],
        )],
    );
}

fn usb_output_config(core: &Core) -> Option<AudioConfig> {
    core.platform()
        .catalog()
        .profiles(IoRole::Output)
        .find(|(_, p)| p.name == "usb output")
        .and_then(|(_, p)| p.first_config())
}

#[test]
fn rejected_device_connect_is_undone() {
    let (mut core, _) = boot(reference(), MockHal::new());
    let was = before(&core);
    let generation = core.generation();

    core.hal_mut().fail_next(HalOp::DeviceConnect, -19);
    let err = core
        .set_device_connection_state(
            DeviceType::OutWiredHeadset,
            "",
            "",
            DeviceAvailability::Available,
        )
        .unwrap_err();
    assert!(matches!(err, PolicyError::Hal(_)));
    assert_unchanged(&core, &was, DeviceType::OutWiredHeadset);
    assert_eq!(core.generation(), generation);

    connect(&mut core, DeviceType::OutWiredHeadset);
}

#[test]
fn failed_capability_query_is_undone() {
    let mut hal = MockHal::new();
    usb_capabilities(&mut hal);
    let (mut core, _) = boot(reference(), hal);
    let was = before(&core);

    core.hal_mut().fail_next(HalOp::QueryCapabilities, -5);
    let err = core
        .set_device_connection_state(
            DeviceType::OutUsbHeadset,
            "",
            "",
            DeviceAvailability::Available,
        )
        .unwrap_err();
    assert!(matches!(err, PolicyError::Hal(_)));
    assert_unchanged(&core, &was, DeviceType::OutUsbHeadset);
    assert!(core.hal().journal().contains(&HalCall::SetConnectedState {
        device: DeviceKey::of_type(DeviceType::OutUsbHeadset),
        state: DeviceConnectedState::Disconnected,
    }));
}

#[test]
fn failed_stream_open_at_connect_is_undone() {
    let mut hal = MockHal::new();
    usb_capabilities(&mut hal);
    let (mut core, _) = boot(reference(), hal);
    let was = before(&core);

    core.hal_mut().fail_next(HalOp::OpenOutput, -12);
    let err = core
        .set_device_connection_state(
            DeviceType::OutUsbHeadset,
            "",
            "",
            DeviceAvailability::Available,
        )
        .unwrap_err();
    assert!(matches!(err, PolicyError::Hal(_)));
    assert_unchanged(&core, &was, DeviceType::OutUsbHeadset);
    assert_eq!(usb_output_config(&core), None, "imported capabilities are dropped");
}

#[test]
fn failed_duplicate_at_connect_closes_the_new_stream() {
    let mut hal = MockHal::new();
    usb_capabilities(&mut hal);
    let (mut core, _) = boot(reference(), hal);
    let was = before(&core);

    core.hal_mut().fail_next(HalOp::OpenDuplicateOutput, -12);
    let err = core
        .set_device_connection_state(
            DeviceType::OutUsbHeadset,
            "",
            "",
            DeviceAvailability::Available,
        )
        .unwrap_err();
    assert!(matches!(err, PolicyError::Hal(_)));
    assert_unchanged(&core, &was, DeviceType::OutUsbHeadset);
    let closed = core
        .hal()
        .journal()
        .iter()
        .filter(|call| matches!(call, HalCall::CloseOutput(_)))
        .count();
    assert_eq!(closed, 1);

    let usb = connect(&mut core, DeviceType::OutUsbHeadset);
    assert_eq!(streams_on(&core, "usb output").len(), 1);
    assert!(core.registry().contains(usb));
}

#[test]
fn usb_headset_lifecycle() {
    let mut hal = MockHal::new();
    usb_capabilities(&mut hal);
    let (mut core, _) = boot(reference(), hal);

    let usb = connect(&mut core, DeviceType::OutUsbHeadset);
    assert_eq!(usb_output_config(&core), Some(AudioConfig::default_output()));
    let usb_stream = streams_on(&core, "usb output")[0];

    let grant = core.get_output_for_attr(&media()).unwrap();
    assert_eq!(grant.stream, usb_stream);
    assert_eq!(grant.devices, vec![usb]);
    core.start_output(grant.client).unwrap();

    disconnect(&mut core, DeviceType::OutUsbHeadset);
    assert!(streams_on(&core, "usb output").is_empty());
    assert!(core.pool().outputs().all(|o| !o.is_duplicated()));
    assert!(core.hal().invalidated().contains(&grant.client));
    assert_eq!(usb_output_config(&core), None);

    let again = core.get_output_for_attr(&media()).unwrap();
    assert_eq!(Some(again.stream), core.primary_output());
}

#[test]
fn shared_usb_profile_keeps_capabilities_for_the_remaining_device() {
    let mut hal = MockHal::new();
    usb_capabilities_for(&mut hal, DeviceType::OutUsbHeadset);
    usb_capabilities_for(&mut hal, DeviceType::OutUsbDevice);
    let (mut core, _) = boot(reference(), hal);

    let headset = connect(&mut core, DeviceType::OutUsbHeadset);
    connect(&mut core, DeviceType::OutUsbDevice);
    let usb_stream = streams_on(&core, "usb output");
    assert_eq!(usb_stream.len(), 1);

    disconnect(&mut core, DeviceType::OutUsbDevice);
    assert_eq!(streams_on(&core, "usb output"), usb_stream);
    assert_eq!(usb_output_config(&core), Some(AudioConfig::default_output()));
    assert!(core.registry().contains(headset));

    disconnect(&mut core, DeviceType::OutUsbHeadset);
    assert_eq!(usb_output_config(&core), None);
}

#[test]
fn rolled_back_usb_connect_keeps_capabilities_in_use() {
    let mut hal = MockHal::new();
    usb_capabilities_for(&mut hal, DeviceType::OutUsbHeadset);
    usb_capabilities_for(&mut hal, DeviceType::OutUsbDevice);
    let (mut core, _) = boot(reference(), hal);
    connect(&mut core, DeviceType::OutUsbHeadset);

    core.hal_mut().fail_next(HalOp::QueryCapabilities, -5);
    let err = core
        .set_device_connection_state(DeviceType::OutUsbDevice, "", "", DeviceAvailability::Available)
        .unwrap_err();
    assert!(matches!(err, PolicyError::Hal(_)));
    assert!(core.registry().find_id(DeviceType::OutUsbDevice, "").is_none());
    assert_eq!(usb_output_config(&core), Some(AudioConfig::default_output()));
    assert_eq!(streams_on(&core, "usb output").len(), 1);
}

#[test]
fn connect_into_a_full_registry_is_refused() {
    let config = PolicyConfig {
        registry_capacity: 7,
        ..PolicyConfig::default()
    };
    let (mut core, _) = boot_with(reference(), MockHal::new(), config);
    connect(&mut core, DeviceType::OutWiredHeadset);
    assert_eq!(core.registry().len(), core.registry().capacity());

    let was = before(&core);
    let journal = core.hal().journal().len();
    let generation = core.generation();
    let err = core
        .set_device_connection_state(DeviceType::OutWiredHeadphone, "", "", DeviceAvailability::Available)
        .unwrap_err();
    assert!(matches!(err, PolicyError::ResourceExhausted(_)));
    assert_unchanged(&core, &was, DeviceType::OutWiredHeadphone);
    assert_eq!(core.hal().journal().len(), journal);
    assert_eq!(core.generation(), generation);

    disconnect(&mut core, DeviceType::OutWiredHeadset);
    connect(&mut core, DeviceType::OutWiredHeadphone);
}

#[test]
fn undeclared_device_is_rejected() {
    let (mut core, _) = boot(reference(), MockHal::new());
    let err = core
        .set_device_connection_state(DeviceType::OutHdmiArc, "", "", DeviceAvailability::Available)
        .unwrap_err();
    assert!(matches!(err, PolicyError::InvalidArgument(_)));
}

#[test]
fn repeated_transitions_are_already_in_state() {
    let (mut core, _) = boot(reference(), MockHal::new());
    connect(&mut core, DeviceType::OutWiredHeadset);
    let again = core.set_device_connection_state(
        DeviceType::OutWiredHeadset,
        "",
        "",
        DeviceAvailability::Available,
    );
    assert!(matches!(again, Err(PolicyError::AlreadyInState(_))));

    disconnect(&mut core, DeviceType::OutWiredHeadset);
    let again = core.set_device_connection_state(
        DeviceType::OutWiredHeadset,
        "",
        "",
        DeviceAvailability::Unavailable,
    );
    assert!(matches!(again, Err(PolicyError::AlreadyInState(_))));
}
