use crate::camera::FrameSource;
use crate::monitor::alert::{DrowsinessMonitor, Notifier};
use crate::monitor::detector::DrowsinessModel;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

const MAX_CONSECUTIVE_READ_FAILURES: u32 = 30;

/// Reads frames until `running` clears or the camera gives up, feeding each
/// assessment into the alert state machine. Returns the number of frames seen.
pub fn watch(
    source: &mut dyn FrameSource,
    model: &dyn DrowsinessModel,
    monitor: &mut DrowsinessMonitor,
    notifier: &mut dyn Notifier,
    running: &AtomicBool,
    frame_interval: Duration,
) -> u64 {
    let mut frames = 0u64;
    let mut failures = 0u32;

    while running.load(Ordering::SeqCst) {
        let frame = match source.read_frame() {
            Ok(frame) => {
                failures = 0;
                frame
            }
            Err(e) => {
                failures += 1;
                tracing::warn!("Frame read failed: {}", e);
                if failures >= MAX_CONSECUTIVE_READ_FAILURES {
                    break;
                }
                thread::sleep(frame_interval);
                continue;
            }
        };
        frames += 1;

        let assessment = model.assess(&frame);
        tracing::trace!(
            "Frame {}: {} detection(s), drowsy={}",
            frames,
            assessment.detections.len(),
            assessment.drowsy
        );
        if let Some(event) = monitor.observe(assessment.drowsy, Instant::now()) {
            notifier.notify(&event);
        }

        thread::sleep(frame_interval);
    }

    frames
}
