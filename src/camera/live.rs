//! Threaded live capture session.
//!
//! Four threads per session:
//! - capture: owns the frame source, mirrors frames and feeds the others;
//! - presence: runs the face-in-oval check on a down-scaled copy whenever it
//!   is free, so a slow detector lowers the check rate instead of the frame rate;
//! - display: drains a bounded drop-oldest queue into `on_frame`;
//! - worker: receives auto-captured frames and runs `on_auto_capture`, so
//!   heavy inference never blocks the preview.

use crate::camera::guide::{CaptureGuide, GuideState};
use crate::camera::overlay::{self, OvalGuide};
use crate::camera::v4l2::FrameSource;
use crate::common::{CaptureGuideConfig, FaceAuthError, Result};
use crate::core::detector::largest_face;
use crate::core::service::FaceService;
use image::{imageops, imageops::FilterType, RgbImage};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, TrySendError};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const STOP_JOIN_TIMEOUT: Duration = Duration::from_secs(2);
const MAX_CONSECUTIVE_READ_FAILURES: u32 = 30;
const DISPLAY_POLL: Duration = Duration::from_millis(100);

/// Check run on the down-scaled frame: is a face inside the oval?
/// `source_width` is the width of the captured frame it was scaled from.
pub trait PresenceCheck: Send {
    fn face_in_guide(&mut self, frame: &RgbImage, source_width: u32) -> bool;
}

impl<F> PresenceCheck for F
where
    F: FnMut(&RgbImage) -> bool + Send,
{
    fn face_in_guide(&mut self, frame: &RgbImage, _source_width: u32) -> bool {
        self(frame)
    }
}

/// Presence check backed by the face service: the largest face passing the
/// live thresholds must have its centre within the oval, widened by `margin`.
pub struct DetectorPresence {
    service: Arc<FaceService>,
    margin: f32,
}

impl DetectorPresence {
    pub fn new(service: Arc<FaceService>, margin: f32) -> Self {
        Self { service, margin }
    }
}

impl PresenceCheck for DetectorPresence {
    fn face_in_guide(&mut self, frame: &RgbImage, source_width: u32) -> bool {
        let scale = frame.width() as f32 / source_width.max(1) as f32;
        let faces = self.service.detect_presence(frame, scale);
        let Some(face) = largest_face(&faces) else {
            return false;
        };
        let (cx, cy) = face.bbox.center();
        OvalGuide::for_frame(frame.width(), frame.height()).contains(cx, cy, self.margin)
    }
}

pub enum Pop<T> {
    Item(T),
    Empty,
    Closed,
}

/// Bounded queue that evicts the oldest item when full.
pub struct FrameQueue<T> {
    inner: Mutex<QueueInner<T>>,
    ready: Condvar,
    capacity: usize,
}

struct QueueInner<T> {
    items: VecDeque<T>,
    closed: bool,
    dropped: u64,
}

impl<T> FrameQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                items: VecDeque::with_capacity(capacity.max(1)),
                closed: false,
                dropped: 0,
            }),
            ready: Condvar::new(),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner<T>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Returns `true` when an older item had to be dropped.
    pub fn push(&self, item: T) -> bool {
        let mut inner = self.lock();
        if inner.closed {
            return false;
        }
        let mut evicted = false;
        while inner.items.len() >= self.capacity {
            inner.items.pop_front();
            inner.dropped += 1;
            evicted = true;
        }
        inner.items.push_back(item);
        drop(inner);
        self.ready.notify_one();
        evicted
    }

    pub fn pop_timeout(&self, timeout: Duration) -> Pop<T> {
        let mut inner = self.lock();
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(item) = inner.items.pop_front() {
                return Pop::Item(item);
            }
            if inner.closed {
                return Pop::Closed;
            }
            let now = Instant::now();
            if now >= deadline {
                return Pop::Empty;
            }
            inner = match self.ready.wait_timeout(inner, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    /// Wakes waiters; remaining items are discarded.
    pub fn close(&self) {
        let mut inner = self.lock();
        inner.closed = true;
        inner.items.clear();
        drop(inner);
        self.ready.notify_all();
    }

    pub fn dropped(&self) -> u64 {
        self.lock().dropped
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct Shared {
    running: AtomicBool,
    processing: AtomicBool,
    guide: Mutex<CaptureGuide>,
    frames: FrameQueue<String>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl Shared {
    fn guide(&self) -> MutexGuard<'_, CaptureGuide> {
        self.guide.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn track(&self, handle: JoinHandle<()>) {
        self.threads.lock().unwrap_or_else(|e| e.into_inner()).push(handle);
    }
}

/// Cloneable control surface of a running session, safe to use from any
/// thread including the session's own callbacks.
#[derive(Clone)]
pub struct CaptureHandle {
    shared: Arc<Shared>,
}

impl CaptureHandle {
    /// Re-arms auto-capture after a failed attempt; the camera keeps running.
    pub fn reset_capture(&self) {
        self.shared.guide().reset();
        self.shared.processing.store(false, Ordering::SeqCst);
        tracing::debug!("Capture guide re-armed");
    }

    /// Marks the in-flight capture as handled without re-arming.
    pub fn finish_processing(&self) {
        self.shared.processing.store(false, Ordering::SeqCst);
    }

    pub fn is_processing(&self) -> bool {
        self.shared.processing.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    pub fn state(&self) -> GuideState {
        self.shared.guide().state()
    }

    pub fn face_detected(&self) -> bool {
        self.shared.guide().face_detected()
    }

    pub fn dropped_frames(&self) -> u64 {
        self.shared.frames.dropped()
    }

    /// Stops the session. Callable from any thread, including the session's
    /// own; threads other than the caller are joined with a timeout.
    pub fn stop(&self) {
        let was_running = self.shared.running.swap(false, Ordering::SeqCst);
        self.shared.guide().close();
        self.shared.frames.close();

        let handles: Vec<JoinHandle<()>> = {
            let mut threads = self.shared.threads.lock().unwrap_or_else(|e| e.into_inner());
            threads.drain(..).collect()
        };
        let me = thread::current().id();
        for handle in handles {
            if handle.thread().id() == me {
                continue;
            }
            join_with_timeout(handle, STOP_JOIN_TIMEOUT);
        }

        if was_running {
            tracing::info!("Camera session stopped");
        }
    }
}

fn join_with_timeout(handle: JoinHandle<()>, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            let name = handle.thread().name().unwrap_or("unnamed").to_string();
            tracing::warn!("Thread {} did not stop within {:?}; detaching", name, timeout);
            return;
        }
        thread::sleep(Duration::from_millis(5));
    }
    if handle.join().is_err() {
        tracing::warn!("Camera session thread panicked");
    }
}

/// A running camera session. Dropping it stops the camera.
pub struct LiveCapture {
    handle: CaptureHandle,
}

impl LiveCapture {
    /// Opens the source on a fresh capture thread and starts previewing.
    /// Fails with `DeviceUnavailable` when the source cannot be opened.
    pub fn start<O, P, F, C>(
        open: O,
        presence: P,
        config: &CaptureGuideConfig,
        mut on_frame: F,
        mut on_auto_capture: C,
    ) -> Result<Self>
    where
        O: FnOnce() -> Result<Box<dyn FrameSource>> + Send + 'static,
        P: PresenceCheck + 'static,
        F: FnMut(String) + Send + 'static,
        C: FnMut(RgbImage, CaptureHandle) + Send + 'static,
    {
        let mut guide = CaptureGuide::new(Duration::from_millis(config.dwell_ms));
        guide.start();
        let shared = Arc::new(Shared {
            running: AtomicBool::new(true),
            processing: AtomicBool::new(false),
            guide: Mutex::new(guide),
            frames: FrameQueue::new(config.frame_queue_capacity),
            threads: Mutex::new(Vec::new()),
        });
        let handle = CaptureHandle {
            shared: Arc::clone(&shared),
        };

        let (capture_tx, capture_rx) = mpsc::channel::<RgbImage>();
        let (presence_tx, presence_rx) = mpsc::sync_channel::<RgbImage>(1);
        let (opened_tx, opened_rx) = mpsc::sync_channel::<Result<()>>(1);

        let loop_shared = Arc::clone(&shared);
        let loop_config = config.clone();
        let capture_thread = thread::Builder::new()
            .name("camera-capture".into())
            .spawn(move || {
                let source = match open() {
                    Ok(source) => {
                        let _ = opened_tx.send(Ok(()));
                        source
                    }
                    Err(e) => {
                        let _ = opened_tx.send(Err(e));
                        return;
                    }
                };
                capture_loop(source, &loop_config, &loop_shared, presence_tx);
                loop_shared.running.store(false, Ordering::SeqCst);
                loop_shared.guide().close();
                loop_shared.frames.close();
            })?;

        match opened_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                shared.running.store(false, Ordering::SeqCst);
                let _ = capture_thread.join();
                tracing::error!("Camera unavailable: {}", e);
                return Err(match e {
                    FaceAuthError::DeviceUnavailable(_) => e,
                    other => FaceAuthError::DeviceUnavailable(other.to_string()),
                });
            }
            Err(_) => {
                shared.running.store(false, Ordering::SeqCst);
                let _ = capture_thread.join();
                return Err(FaceAuthError::DeviceUnavailable(
                    "capture thread exited before opening the camera".into(),
                ));
            }
        }
        shared.track(capture_thread);

        let presence_shared = Arc::clone(&shared);
        let presence_config = config.clone();
        let presence_thread = thread::Builder::new()
            .name("camera-presence".into())
            .spawn(move || {
                presence_loop(presence, &presence_config, &presence_shared, presence_rx, capture_tx)
            })
            .map_err(|e| {
                handle.stop();
                e
            })?;
        shared.track(presence_thread);

        let display_shared = Arc::clone(&shared);
        let display_thread = thread::Builder::new()
            .name("camera-display".into())
            .spawn(move || loop {
                match display_shared.frames.pop_timeout(DISPLAY_POLL) {
                    Pop::Item(frame) => {
                        if display_shared.is_running() {
                            on_frame(frame);
                        }
                    }
                    Pop::Empty => {}
                    Pop::Closed => break,
                }
            })
            .map_err(|e| {
                handle.stop();
                e
            })?;
        shared.track(display_thread);

        let worker_handle = handle.clone();
        let worker_thread = thread::Builder::new()
            .name("capture-worker".into())
            .spawn(move || {
                for frame in capture_rx {
                    if !worker_handle.is_running() {
                        break;
                    }
                    on_auto_capture(frame, worker_handle.clone());
                }
            })
            .map_err(|e| {
                handle.stop();
                e
            })?;
        shared.track(worker_thread);

        tracing::info!("Camera session started");
        Ok(Self { handle })
    }

    pub fn handle(&self) -> CaptureHandle {
        self.handle.clone()
    }

    pub fn reset_capture(&self) {
        self.handle.reset_capture();
    }

    pub fn state(&self) -> GuideState {
        self.handle.state()
    }

    pub fn face_detected(&self) -> bool {
        self.handle.face_detected()
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_running()
    }

    pub fn stop(&self) {
        self.handle.stop();
    }
}

impl Drop for LiveCapture {
    fn drop(&mut self) {
        self.handle.stop();
    }
}

fn capture_loop(
    mut source: Box<dyn FrameSource>,
    config: &CaptureGuideConfig,
    shared: &Shared,
    presence_tx: mpsc::SyncSender<RgbImage>,
) {
    let detection_interval = Duration::from_millis(config.detection_interval_ms);
    let frame_interval = Duration::from_millis(config.frame_interval_ms);
    let mut last_detection: Option<Instant> = None;
    let mut failures = 0u32;

    while shared.is_running() {
        let mut frame = match source.read_frame() {
            Ok(frame) => {
                failures = 0;
                frame
            }
            Err(e) => {
                failures += 1;
                tracing::warn!("Frame read failed ({} in a row): {}", failures, e);
                if failures >= MAX_CONSECUTIVE_READ_FAILURES {
                    tracing::error!("Camera stopped delivering frames");
                    break;
                }
                thread::sleep(frame_interval);
                continue;
            }
        };

        imageops::flip_horizontal_in_place(&mut frame);

        let now = Instant::now();
        let due = last_detection.map_or(true, |t| now.duration_since(t) >= detection_interval);
        if due {
            // A busy presence thread keeps the check due for the next frame.
            match presence_tx.try_send(frame.clone()) {
                Ok(()) => last_detection = Some(now),
                Err(TrySendError::Full(_)) => {}
                Err(TrySendError::Disconnected(_)) => {
                    tracing::warn!("Presence check exited; auto-capture disabled");
                    last_detection = Some(now);
                }
            }
        }

        let face_detected = shared.guide().face_detected();
        let mut display = imageops::resize(
            &frame,
            config.display_width,
            config.display_height,
            FilterType::Triangle,
        );
        overlay::draw_guide(&mut display, face_detected);
        match overlay::encode_data_uri(&display, config.jpeg_quality) {
            Ok(uri) => {
                if shared.frames.push(uri) {
                    tracing::trace!("Display queue full, dropped oldest frame");
                }
            }
            Err(e) => tracing::warn!("Failed to encode preview frame: {}", e),
        }

        thread::sleep(frame_interval);
    }
}

fn presence_loop<P: PresenceCheck>(
    mut presence: P,
    config: &CaptureGuideConfig,
    shared: &Shared,
    frames: mpsc::Receiver<RgbImage>,
    capture_tx: mpsc::Sender<RgbImage>,
) {
    for frame in frames {
        if !shared.is_running() {
            break;
        }
        let small = imageops::resize(
            &frame,
            config.presence_width,
            config.presence_height,
            FilterType::Nearest,
        );
        let in_guide = presence.face_in_guide(&small, frame.width());
        let fire = shared.guide().on_presence(in_guide, Instant::now());
        tracing::trace!("Presence check: in_guide={} fire={}", in_guide, fire);

        if fire && !shared.processing.swap(true, Ordering::SeqCst) {
            tracing::info!("Face in guide, auto-capturing");
            if capture_tx.send(frame).is_err() {
                shared.processing.store(false, Ordering::SeqCst);
            }
        }
    }
}
