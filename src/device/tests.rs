use super::*;
use crate::error::DeviceError;
use crate::stream_mode::{Modality, StreamMode};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn vga() -> OutputMode {
    OutputMode::new(640, 480, 30)
}

#[test]
fn test_resolution_presets() {
    assert_eq!(Resolution::Qvga.dimensions(), (320, 240));
    assert_eq!(Resolution::Xga.dimensions(), (1024, 768));
    assert_eq!(
        OutputMode::from_resolution(Resolution::Sxga, 30),
        OutputMode::new(1280, 1024, 15)
    );
    assert_eq!(
        OutputMode::from_resolution(Resolution::Sxga, 10),
        OutputMode::new(1280, 1024, 10)
    );
    assert_eq!(OutputMode::from_resolution(Resolution::Vga, 60).fps, 60);
    assert_eq!(vga().to_string(), "640 x 480 @ 30");
}

#[test]
fn test_probe_reports_every_exposed_stream() {
    let device = MockDevice::builder().registration_supported(true).build();
    let report = probe_device(device.as_ref(), vga(), true).unwrap();

    assert_eq!(report.available, StreamMode::RGB | StreamMode::IR | StreamMode::DEPTH);
    assert!(report.registration_enabled);
    assert!(device.is_registration_enabled());
}

#[test]
fn test_probe_skips_absent_optional_streams() {
    let device = MockDevice::builder().streams(StreamMode::DEPTH).build();
    let report = probe_device(device.as_ref(), vga(), true).unwrap();

    assert_eq!(report.available, StreamMode::DEPTH);
    assert!(!report.registration_enabled);
}

#[test]
fn test_probe_rejects_unsupported_optional_stream() {
    let device = MockDevice::builder().reject_mode(Modality::Ir, vga()).build();
    assert_eq!(
        probe_device(device.as_ref(), vga(), false),
        Err(DeviceError::UnsupportedMode {
            modality: Modality::Ir,
            width: 640,
            height: 480,
            fps: 30
        })
    );
}

#[test]
fn test_probe_requires_depth() {
    let device = MockDevice::builder().streams(StreamMode::RGB | StreamMode::IR).build();
    assert_eq!(
        probe_device(device.as_ref(), vga(), false),
        Err(DeviceError::MissingModality {
            modality: Modality::Depth
        })
    );

    let device = MockDevice::builder()
        .supported_mode(Modality::Depth, OutputMode::new(320, 240, 30))
        .build();
    assert!(!is_supported(device.as_ref(), Modality::Depth, vga()));
    assert!(matches!(
        probe_device(device.as_ref(), vga(), false),
        Err(DeviceError::UnsupportedMode { .. })
    ));
}

#[test]
fn test_probe_never_fails_on_registration() {
    let device = MockDevice::builder().registration_supported(false).build();
    let report = probe_device(device.as_ref(), vga(), true).unwrap();
    assert!(!report.registration_enabled);
}

#[test]
fn test_mock_records_commands_and_gates_frames() {
    let device = MockDevice::builder().build();
    let received = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&received);
    device
        .register_callback(
            Modality::Depth,
            Box::new(move |frame| {
                counter.store(frame.frame_id, Ordering::SeqCst);
            }),
        )
        .unwrap();

    assert!(!device.emit(Modality::Depth));
    device.start_stream(Modality::Depth).unwrap();
    assert!(device.emit(Modality::Depth));
    assert_eq!(received.load(Ordering::SeqCst), 2);

    device.stop_stream(Modality::Depth).unwrap();
    assert_eq!(
        device.commands(),
        vec![
            StreamCommand::Start(Modality::Depth),
            StreamCommand::Stop(Modality::Depth)
        ]
    );
    assert_eq!(device.streaming(), StreamMode::NONE);

    device.clear_callbacks();
    device.deliver(synthetic_frame(Modality::Depth, 42, 8, 6));
    assert_eq!(received.load(Ordering::SeqCst), 2);
}

#[test]
fn test_mock_disconnect_fails_stream_control() {
    let device = MockDevice::builder().connection_string("mock://7").build();
    device.start_stream(Modality::Rgb).unwrap();
    device.disconnect();

    assert!(!device.is_connected());
    assert_eq!(
        device.start_stream(Modality::Rgb),
        Err(DeviceError::DeviceLost {
            connection: "mock://7".to_string()
        })
    );
    assert!(!device.emit(Modality::Rgb));
    assert_eq!(device.info().serial_number, "7");
}

#[test]
fn test_mock_registration_requires_support() {
    let device = MockDevice::builder().registration_supported(false).build();
    assert!(device.set_registration(true).is_err());
    assert!(device.set_registration(false).is_ok());
}

#[test]
fn test_wait_for_update_returns_latest_running_frames() {
    let device = MockDevice::builder().build();
    device.start_stream(Modality::Rgb).unwrap();

    assert!(device
        .wait_for_update(Duration::from_millis(10))
        .unwrap()
        .is_empty());

    std::thread::scope(|s| {
        s.spawn(|| {
            std::thread::sleep(Duration::from_millis(20));
            device.emit(Modality::Rgb);
        });
        let frames = device.wait_for_update(Duration::from_secs(2)).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].modality(), Modality::Rgb);
    });
}

#[test]
fn test_mock_driver_enumerates_devices() {
    let driver = MockDriver::new(vec![
        MockDevice::builder().connection_string("mock://0").build(),
        MockDevice::builder().connection_string("mock://1").build(),
    ]);
    assert_eq!(driver.device_count(), 2);
    assert_eq!(driver.open_device(1).unwrap().connection_string(), "mock://1");
    assert!(matches!(
        driver.open_device(2),
        Err(DeviceError::IndexOutOfRange {
            index: 2,
            available: 2
        })
    ));
}

#[test]
fn test_synthetic_frames_are_distinguishable() {
    let frame = synthetic_frame(Modality::Ir, 3, 4, 2);
    assert_eq!(frame.modality(), Modality::Ir);
    assert_eq!(frame.timestamp, Duration::from_millis(99));
    match frame.payload {
        FramePayload::Ir16(data) => assert!(data.iter().all(|v| *v == 3)),
        other => panic!("unexpected payload {:?}", other),
    }
}

#[cfg(feature = "simulator")]
mod simulator {
    use super::*;
    use crate::config::SimulatorConfig;

    fn config(drop_every_nth: u32) -> SimulatorConfig {
        SimulatorConfig {
            device_count: 2,
            has_ir: false,
            registration_supported: false,
            drop_every_nth,
        }
    }

    #[test]
    fn test_driver_builds_configured_devices() {
        let driver = SimulatedDriver::from_config(&config(0), OutputMode::new(8, 6, 100));
        assert_eq!(driver.device_count(), 2);

        let device = driver.open_device(1).unwrap();
        assert_eq!(device.connection_string(), "sim://1");
        assert!(!device.has_stream(Modality::Ir));
        assert!(device.has_stream(Modality::Depth));
        assert!(!device.is_registration_supported());
    }

    #[test]
    fn test_producer_feeds_callback_until_stopped() {
        let driver = SimulatedDriver::from_config(&config(0), OutputMode::new(8, 6, 200));
        let device = driver.open_device(0).unwrap();

        let received = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&received);
        device
            .register_callback(
                Modality::Depth,
                Box::new(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();

        device.start_stream(Modality::Depth).unwrap();
        let frames = device.wait_for_update(Duration::from_secs(2)).unwrap();
        assert!(!frames.is_empty());

        device.stop_stream(Modality::Depth).unwrap();
        let after_stop = received.load(Ordering::SeqCst);
        assert!(after_stop >= 1);
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(received.load(Ordering::SeqCst), after_stop);
    }

    #[test]
    fn test_every_nth_frame_is_truncated() {
        let driver = SimulatedDriver::from_config(&config(2), OutputMode::new(8, 6, 200));
        let device = driver.open_device(0).unwrap();

        let (tx, rx) = crossbeam::channel::unbounded();
        device
            .register_callback(
                Modality::Rgb,
                Box::new(move |frame: DriverFrame| {
                    let _ = tx.send(frame);
                }),
            )
            .unwrap();
        device.start_stream(Modality::Rgb).unwrap();

        let first = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        let second = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        device.stop_stream(Modality::Rgb).unwrap();

        let len = |frame: &DriverFrame| match &frame.payload {
            FramePayload::Rgb24(data) => data.len(),
            _ => 0,
        };
        assert_eq!(len(&first), 8 * 6 * 3);
        assert_eq!(len(&second), 8 * 6 * 3 / 2);
    }
}
