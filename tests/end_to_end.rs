//! End-to-end tests: shared-memory frame transport between independent
//! handles, and the tracking pipeline driven by the synthetic camera.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use approx::assert_abs_diff_eq;
use vr_runtime_core::beacons::{LedIdentifier, PatternTable};
use vr_runtime_core::config::FilterConfig;
use vr_runtime_core::device_token::ReportKind;
use vr_runtime_core::ipc::{
    publish_frame, resolve_frame, FrameMetadata, FrameTransport, IpcRingBuffer, RingBufferOptions,
};
use vr_runtime_core::registry::PluginRegistry;
use vr_runtime_core::simulation::{SyntheticCameraPlugin, SyntheticScene};
use vr_runtime_core::tracking::{TrackingPipeline, WeakPerspectiveSolver};
use vr_runtime_core::RingBufferError;

static COUNTER: AtomicUsize = AtomicUsize::new(0);

fn unique_options(tag: &str) -> RingBufferOptions {
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    RingBufferOptions::new(&format!("e2e_{}_{}_{}", tag, std::process::id(), n))
}

fn metadata(timestamp_us: i64) -> FrameMetadata {
    FrameMetadata {
        width: 8,
        height: 4,
        channels: 1,
        depth: 1,
        timestamp_us,
    }
}

// ---------------------------------------------------------------------------
// Shared memory
// ---------------------------------------------------------------------------

#[test]
fn test_reader_handle_follows_writer() {
    let options = unique_options("follow").with_entries(4).with_entry_size(64);
    let server = IpcRingBuffer::create(&options).unwrap();
    let client = IpcRingBuffer::find(&options).unwrap();
    assert!(server.is_creator());
    assert!(!client.is_creator());
    assert_eq!(client.capacity(), 4);
    assert_eq!(client.abi_level(), server.abi_level());
    assert!(client.get_latest().is_none());

    let mut sequences = Vec::new();
    for i in 0..10u8 {
        sequences.push(server.put_bytes(&[i; 16]).unwrap());
        let latest = client.get_latest().unwrap();
        assert_eq!(latest.sequence_number(), *sequences.last().unwrap());
        assert_eq!(&latest[..], &[i; 16]);
    }

    // Only the last `capacity` entries are still reachable
    for (i, seq) in sequences.iter().enumerate() {
        assert_eq!(client.get(*seq).is_some(), i >= 6, "sequence {}", seq);
    }
}

#[test]
fn test_segment_removed_with_creator() {
    let options = unique_options("gone").with_entries(2).with_entry_size(32);
    {
        let _server = IpcRingBuffer::create(&options).unwrap();
        assert!(IpcRingBuffer::find(&options).is_ok());
    }
    assert!(matches!(
        IpcRingBuffer::find(&options),
        Err(RingBufferError::NotFound(_))
    ));
}

#[test]
fn test_frames_cross_the_wire() {
    let options = unique_options("wire").with_entries(4).with_entry_size(64);
    let server = IpcRingBuffer::create(&options).unwrap();
    let mut client: Option<Arc<IpcRingBuffer>> = None;

    let image: Vec<u8> = (0..32).collect();
    let small = publish_frame(Some(&server), metadata(1_000), 7, &image);
    assert!(small.is_shared());

    let large = vec![0xAB; 128];
    let inline = publish_frame(Some(&server), metadata(2_000), 7, &large);
    assert!(!inline.is_shared());

    for (transport, expected) in [(small, image), (inline, large)] {
        let wire = transport.to_bytes();
        let received = FrameTransport::from_bytes(&wire).unwrap();
        assert_eq!(received, transport);
        assert_eq!(received.sensor(), 7);

        let data = resolve_frame(&received, |opts| {
            if client.is_none() {
                client = IpcRingBuffer::find(opts).ok();
            }
            client.clone()
        })
        .unwrap();
        assert_eq!(data, expected);
    }
    assert!(client.is_some());
}

#[test]
fn test_stale_descriptor_resolves_to_none() {
    let options = unique_options("stale").with_entries(2).with_entry_size(16);
    let server = IpcRingBuffer::create(&options).unwrap();
    let first = publish_frame(Some(&server), metadata(0), 0, &[1, 2, 3]);
    for _ in 0..2 {
        server.put_bytes(&[9]).unwrap();
    }
    let client = IpcRingBuffer::find(&options).unwrap();
    assert!(resolve_frame(&first, |_| Some(Arc::clone(&client))).is_none());
}

#[test]
fn test_reader_thread_never_sees_torn_frames() {
    let options = unique_options("threads").with_entries(4).with_entry_size(256);
    let server = IpcRingBuffer::create(&options).unwrap();
    let client = IpcRingBuffer::find(&options).unwrap();

    let reader = thread::spawn(move || {
        let mut seen = 0;
        let deadline = Instant::now() + Duration::from_secs(5);
        while seen < 200 && Instant::now() < deadline {
            if let Some(entry) = client.get_latest() {
                let first = entry[0];
                assert!(entry.iter().all(|b| *b == first));
                seen += 1;
            }
        }
        seen
    });

    for i in 0..2_000u32 {
        let mut proxy = server.put().unwrap();
        proxy.set_len(256);
        proxy.as_mut_slice().fill((i % 251) as u8);
    }
    assert!(reader.join().unwrap() > 0);
}

// ---------------------------------------------------------------------------
// Tracking
// ---------------------------------------------------------------------------

#[test]
fn test_pipeline_tracks_synthetic_target() {
    let fps = 60.0;
    let scene = SyntheticScene::hdk_back_plate();
    let identifier: Arc<dyn LedIdentifier> = Arc::new(PatternTable::HdkSensor1Original.identifier());
    let solver = WeakPerspectiveSolver {
        focal_length_px: scene.focal_length_px,
        ..WeakPerspectiveSolver::default()
    };
    let mut pipeline =
        TrackingPipeline::new(identifier, scene.layout.clone(), FilterConfig::default(), true);

    let mut first_correction = None;
    for index in 0..180u64 {
        let t = index as f64 / fps;
        let outcome = pipeline.process_frame(t, &scene.blobs(index, fps), &solver);
        assert_eq!(outcome.blobs, 6);
        if outcome.corrected && first_correction.is_none() {
            first_correction = Some(index);
        }
    }

    // One full blink cycle is needed before beacons are named
    let first = first_correction.unwrap();
    assert!(first >= 15 && first < 40, "first correction at {}", first);

    let ids: Vec<i32> = pipeline.leds().iter().map(|l| l.id().0).collect();
    let mut sorted = ids.clone();
    sorted.sort_unstable();
    assert_eq!(sorted, vec![0, 1, 2, 3, 4, 5]);

    let truth = scene.position_at(179.0 / fps);
    let pose = pipeline.body().pose();
    assert_abs_diff_eq!(pose.position.0, truth.x, epsilon = 0.01);
    assert_abs_diff_eq!(pose.position.1, truth.y, epsilon = 0.01);
    assert_abs_diff_eq!(pose.position.2, truth.z, epsilon = 0.02);
    assert_eq!(pipeline.body().resets(), 0);
}

#[test]
fn test_registry_streams_into_pipeline() {
    let fps = 500.0;
    let scene = SyntheticScene::hdk_back_plate();
    let solver = WeakPerspectiveSolver {
        focal_length_px: scene.focal_length_px,
        ..WeakPerspectiveSolver::default()
    };
    let mut pipeline = TrackingPipeline::new(
        Arc::new(PatternTable::HdkSensor1Original.identifier()),
        scene.layout.clone(),
        FilterConfig::default(),
        true,
    );

    let plugin = SyntheticCameraPlugin::new(scene, fps, 8).with_frame_limit(40);
    let stats = plugin.stats_handle();
    let mut registry = PluginRegistry::new();
    registry.register(Box::new(plugin)).unwrap();
    let mut tokens = registry.detect_all();
    assert_eq!(tokens.len(), 1);
    assert!(registry.detect_all().is_empty());

    let (mut frames, mut corrections, mut gyro) = (0, 0, 0);
    let deadline = Instant::now() + Duration::from_secs(10);
    while frames < 40 && Instant::now() < deadline {
        for report in tokens[0].poll() {
            match report.kind {
                ReportKind::Camera(frame) => {
                    let outcome = pipeline.process_frame(report.timestamp, &frame.blobs, &solver);
                    frames += 1;
                    if outcome.corrected {
                        corrections += 1;
                    }
                }
                ReportKind::AngularVelocity { value, variance } => {
                    assert!(pipeline.body_mut().observe_angular_velocity(value, variance));
                    gyro += 1;
                }
            }
        }
        assert!(registry.update_all().is_empty());
        thread::sleep(Duration::from_millis(1));
    }

    assert_eq!(frames, 40);
    assert!(gyro > 0);
    assert!(corrections > 0);
    assert_eq!(stats.lock().frames_generated, 40);

    tokens[0].shutdown().unwrap();
    assert!(!tokens[0].is_running());
    registry.teardown();
    assert_eq!(registry.status_report(), "synthetic_camera: OK");
}
