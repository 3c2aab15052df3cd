use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuideState {
    Idle,
    Previewing,
    /// Face is in the oval; waiting for the dwell time to elapse.
    FaceDetectedPending,
    /// Fired. Stays here until `reset` re-arms.
    AutoCaptured,
    Closed,
}

/// Decides, from periodic presence checks, when a capture should fire.
///
/// With a zero dwell the first positive check fires; otherwise the face has
/// to stay inside the guide for the whole dwell, and losing it starts over.
#[derive(Debug, Clone)]
pub struct CaptureGuide {
    state: GuideState,
    dwell: Duration,
    pending_since: Option<Instant>,
    face_detected: bool,
}

impl CaptureGuide {
    pub fn new(dwell: Duration) -> Self {
        Self {
            state: GuideState::Idle,
            dwell,
            pending_since: None,
            face_detected: false,
        }
    }

    pub fn state(&self) -> GuideState {
        self.state
    }

    pub fn face_detected(&self) -> bool {
        self.face_detected
    }

    pub fn start(&mut self) {
        if self.state == GuideState::Idle {
            self.state = GuideState::Previewing;
        }
    }

    /// Feeds one presence result. Returns `true` exactly when a capture fires.
    pub fn on_presence(&mut self, in_guide: bool, now: Instant) -> bool {
        if matches!(self.state, GuideState::Idle | GuideState::Closed) {
            return false;
        }
        self.face_detected = in_guide;

        match self.state {
            GuideState::Previewing if in_guide => {
                self.state = GuideState::FaceDetectedPending;
                self.pending_since = Some(now);
                self.try_fire(now)
            }
            GuideState::FaceDetectedPending if in_guide => self.try_fire(now),
            GuideState::FaceDetectedPending => {
                self.state = GuideState::Previewing;
                self.pending_since = None;
                false
            }
            _ => false,
        }
    }

    fn try_fire(&mut self, now: Instant) -> bool {
        let since = self.pending_since.unwrap_or(now);
        if now.saturating_duration_since(since) >= self.dwell {
            self.state = GuideState::AutoCaptured;
            self.pending_since = None;
            true
        } else {
            false
        }
    }

    /// Re-arms after a failed attempt without touching the camera.
    pub fn reset(&mut self) {
        if matches!(
            self.state,
            GuideState::AutoCaptured | GuideState::FaceDetectedPending
        ) {
            self.state = GuideState::Previewing;
        }
        self.pending_since = None;
    }

    pub fn close(&mut self) {
        self.state = GuideState::Closed;
        self.pending_since = None;
        self.face_detected = false;
    }
}
