use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AlertEvent {
    /// Eyes closed for longer than the alert delay. Once per episode.
    Alert,
    /// First alert-free frame after an alert; `duration` covers the whole episode.
    Recovered { duration: Duration },
}

/// Receives drowsiness events, e.g. a chat bot or the dashboard.
pub trait Notifier: Send {
    fn notify(&mut self, event: &AlertEvent);
}

#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&mut self, event: &AlertEvent) {
        match event {
            AlertEvent::Alert => tracing::warn!("Driver appears to be falling asleep"),
            AlertEvent::Recovered { duration } => {
                tracing::info!("Driver awake again after {:.1}s", duration.as_secs_f32())
            }
        }
    }
}

/// Turns per-frame drowsy flags into alert episodes.
#[derive(Debug, Clone)]
pub struct DrowsinessMonitor {
    alert_after: Duration,
    closed_since: Option<Instant>,
    alerted: bool,
}

impl DrowsinessMonitor {
    pub fn new(alert_after: Duration) -> Self {
        Self {
            alert_after,
            closed_since: None,
            alerted: false,
        }
    }

    pub fn is_alerting(&self) -> bool {
        self.alerted
    }

    pub fn observe(&mut self, drowsy: bool, now: Instant) -> Option<AlertEvent> {
        if drowsy {
            let since = *self.closed_since.get_or_insert(now);
            if !self.alerted && now.saturating_duration_since(since) >= self.alert_after {
                self.alerted = true;
                return Some(AlertEvent::Alert);
            }
            return None;
        }

        let episode = self.closed_since.take();
        if std::mem::take(&mut self.alerted) {
            let duration = episode.map_or(Duration::ZERO, |since| now.saturating_duration_since(since));
            return Some(AlertEvent::Recovered { duration });
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn alerts_once_after_delay_then_recovers() {
        let mut monitor = DrowsinessMonitor::new(ms(1500));
        let t0 = Instant::now();

        assert_eq!(monitor.observe(true, t0), None);
        assert_eq!(monitor.observe(true, t0 + ms(1000)), None);
        assert_eq!(monitor.observe(true, t0 + ms(1500)), Some(AlertEvent::Alert));
        assert_eq!(monitor.observe(true, t0 + ms(3000)), None);
        assert!(monitor.is_alerting());

        assert_eq!(
            monitor.observe(false, t0 + ms(4200)),
            Some(AlertEvent::Recovered { duration: ms(4200) })
        );
        assert!(!monitor.is_alerting());
        assert_eq!(monitor.observe(false, t0 + ms(4300)), None);
    }

    #[test]
    fn short_blinks_never_alert() {
        let mut monitor = DrowsinessMonitor::new(ms(1500));
        let t0 = Instant::now();
        for i in 0..10u64 {
            let base = t0 + ms(i * 1000);
            assert_eq!(monitor.observe(true, base), None);
            assert_eq!(monitor.observe(false, base + ms(400)), None);
        }
    }
}
