//! Criterion benchmarks for output selection and routing hot paths
//!
//! Run with: cargo bench -p patchbay-policy
#![allow(missing_docs)]

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use patchbay_config::{PolicyConfig, reference_topology};
use patchbay_core::{
    AudioAttributes, AudioConfig, AudioFormat, ChannelMask, DeviceType, IoHandle, OutputFlags,
    StreamId, Usage,
};
use patchbay_policy::{
    DeviceAvailability, HapticAttachment, MockHal, OutputDescriptor, OutputRequest,
    OutputSelector, PriorityEngine, RecordingPacer, RoutingCoordinator, SelectionRequest,
};

const CANDIDATE_COUNTS: &[u32] = &[2, 4, 8, 16, 32];

const FLAG_MIX: [OutputFlags; 4] = [
    OutputFlags::PRIMARY.union(OutputFlags::FAST),
    OutputFlags::DEEP_BUFFER,
    OutputFlags::FAST,
    OutputFlags::RAW,
];

fn candidates(count: u32) -> Vec<OutputDescriptor> {
    (0..count)
        .map(|i| {
            let config = if i % 3 == 0 {
                AudioConfig::new(96000, AudioFormat::Pcm24BitPacked, ChannelMask::OUT_5POINT1)
            } else {
                AudioConfig::default_output()
            };
            OutputDescriptor::new(
                StreamId::new(i),
                IoHandle::new(i),
                config,
                FLAG_MIX[i as usize % FLAG_MIX.len()],
            )
        })
        .collect()
}

fn bench_selector(c: &mut Criterion) {
    let mut group = c.benchmark_group("OutputSelector");
    let selector = OutputSelector::new(48000);
    let request = SelectionRequest {
        flags: OutputFlags::FAST,
        config: AudioConfig::new(96000, AudioFormat::PcmFloat, ChannelMask::OUT_5POINT1),
        haptic: HapticAttachment::None,
    };

    for &count in CANDIDATE_COUNTS {
        let outputs = candidates(count);
        group.bench_with_input(BenchmarkId::new("select", count), &count, |b, _| {
            b.iter(|| black_box(selector.select(black_box(&outputs), black_box(&request))));
        });
    }

    let outputs = candidates(1);
    group.bench_function("criteria", |b| {
        b.iter(|| black_box(selector.criteria(black_box(&outputs[0]), black_box(&request))));
    });

    group.finish();
}

fn boot() -> RoutingCoordinator<MockHal, PriorityEngine> {
    let catalog = reference_topology()
        .and_then(|t| t.into_catalog())
        .expect("reference topology builds");
    RoutingCoordinator::new(catalog, PriorityEngine::new(), MockHal::new(), PolicyConfig::default())
        .expect("routing core boots")
        .with_pacer(RecordingPacer::new())
}

fn bench_coordinator(c: &mut Criterion) {
    let mut group = c.benchmark_group("RoutingCoordinator");

    group.bench_function("output_request_release", |b| {
        let mut core = boot();
        let request = OutputRequest::new(
            AudioAttributes::for_usage(Usage::Media),
            AudioConfig::default_output(),
        );
        b.iter(|| {
            let grant = core.get_output_for_attr(black_box(&request)).expect("granted");
            core.release_output(grant.client).expect("released");
        });
    });

    group.bench_function("headset_plug_cycle", |b| {
        let mut core = boot();
        b.iter(|| {
            for availability in [DeviceAvailability::Available, DeviceAvailability::Unavailable] {
                core.set_device_connection_state(DeviceType::OutWiredHeadset, "", "", availability)
                    .expect("transition applies");
            }
        });
    });

    group.finish();
}

criterion_group!(benches, bench_selector, bench_coordinator);
criterion_main!(benches);
