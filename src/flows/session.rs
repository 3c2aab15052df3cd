//! Runs a flow against a live camera session: every auto-captured frame is
//! handed to the flow on the worker thread, recoverable failures re-arm the
//! guide, and the first final outcome ends the session.

use crate::camera::{CaptureHandle, FrameSource, LiveCapture, PresenceCheck};
use crate::common::{CaptureGuideConfig, FaceAuthError, Result};
use image::RgbImage;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;

/// What a flow made of one captured frame.
pub enum Attempt<T> {
    Done(T),
    /// Nothing usable (e.g. no account matched); capture again.
    Retry,
}

pub struct CaptureSession {
    config: CaptureGuideConfig,
    timeout: Duration,
}

impl CaptureSession {
    pub fn new(config: CaptureGuideConfig, timeout: Duration) -> Self {
        Self { config, timeout }
    }

    /// Blocks until the handler finishes, fails for good, or the timeout
    /// elapses (`Ok(None)`). The camera is stopped on every path, and an
    /// attempt that completes while stopping is returned rather than dropped.
    pub fn run<T, O, P, F, H>(&self, open: O, presence: P, on_frame: F, mut handler: H) -> Result<Option<T>>
    where
        T: Send + 'static,
        O: FnOnce() -> Result<Box<dyn FrameSource>> + Send + 'static,
        P: PresenceCheck + 'static,
        F: FnMut(String) + Send + 'static,
        H: FnMut(&RgbImage) -> Result<Attempt<T>> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel::<Result<T>>();

        let capture = LiveCapture::start(
            open,
            presence,
            &self.config,
            on_frame,
            move |frame: RgbImage, handle: CaptureHandle| match handler(&frame) {
                Ok(Attempt::Done(value)) => {
                    handle.finish_processing();
                    let _ = tx.send(Ok(value));
                }
                Ok(Attempt::Retry) => handle.reset_capture(),
                Err(e) if e.kind().auto_rearm() => {
                    tracing::info!("{}; re-arming capture", e);
                    handle.reset_capture();
                }
                Err(e) => {
                    tracing::warn!("Capture attempt failed: {}", e);
                    handle.finish_processing();
                    let _ = tx.send(Err(e));
                }
            },
        )?;

        let outcome = match rx.recv_timeout(self.timeout) {
            Ok(result) => result.map(Some),
            Err(RecvTimeoutError::Timeout) => {
                tracing::info!("Capture session timed out after {:?}", self.timeout);
                Ok(None)
            }
            Err(RecvTimeoutError::Disconnected) => Err(FaceAuthError::DeviceUnavailable(
                "camera session ended unexpectedly".into(),
            )),
        };

        capture.stop();
        match outcome {
            Ok(None) => match rx.try_recv() {
                Ok(late) => {
                    tracing::info!("Capture attempt finished while the session was stopping");
                    late.map(Some)
                }
                Err(_) => Ok(None),
            },
            other => other,
        }
    }
}
