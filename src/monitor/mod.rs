//! Drowsiness monitoring while driving.

pub mod alert;
pub mod detector;
pub mod watch;

pub use alert::{AlertEvent, DrowsinessMonitor, LogNotifier, Notifier};
pub use detector::{is_drowsy_label, DrowsinessAssessment, DrowsinessDetector, DrowsinessModel, LabeledDetection};
pub use watch::watch;
