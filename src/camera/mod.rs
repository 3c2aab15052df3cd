pub mod guide;
pub mod live;
pub mod overlay;
pub mod v4l2;

pub use guide::{CaptureGuide, GuideState};
pub use live::{CaptureHandle, DetectorPresence, FrameQueue, LiveCapture, PresenceCheck};
pub use overlay::{draw_guide, encode_data_uri, OvalGuide};
pub use v4l2::{FrameSource, V4lCamera};
