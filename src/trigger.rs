//! Session start triggers.
//!
//! A capture session starts when a trigger source fires. The hardware
//! source is a push button wired active-low with a pull-up: pressing pulls
//! the line LOW, releasing lets it go HIGH, and the release starts the
//! session.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::config::{PipelineConfig, DEFAULT_DEBOUNCE, DEFAULT_TRIGGER_POLL_INTERVAL};
use crate::error::{Error, Result};

/// The moment a trigger fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerEvent {
    /// Monotonic instant, used for the first-packet gap.
    pub at: Instant,
    /// Wall-clock time, published as the button release time.
    pub wall_clock: DateTime<Utc>,
}

impl TriggerEvent {
    /// A trigger firing now.
    pub fn now() -> Self {
        Self {
            at: Instant::now(),
            wall_clock: Utc::now(),
        }
    }
}

/// Something that starts a capture session.
#[async_trait]
pub trait TriggerSource: Send {
    /// Wait until the trigger fires.
    async fn wait_for_release(&mut self) -> Result<TriggerEvent>;
}

/// Fires as soon as it is awaited.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImmediateTrigger;

#[async_trait]
impl TriggerSource for ImmediateTrigger {
    async fn wait_for_release(&mut self) -> Result<TriggerEvent> {
        Ok(TriggerEvent::now())
    }
}

/// A digital input line.
pub trait InputLine: Send {
    /// Sample the line level.
    fn is_high(&mut self) -> Result<bool>;
}

/// Release-edge detector with a minimum spacing between accepted edges.
#[derive(Debug, Clone)]
pub struct Debouncer {
    min_interval: Duration,
    level: Option<bool>,
    last_accepted: Option<Instant>,
}

impl Debouncer {
    /// Create a debouncer accepting edges at least `min_interval` apart.
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            level: None,
            last_accepted: None,
        }
    }

    /// Feed one sample. Returns `true` for an accepted LOW to HIGH edge.
    ///
    /// The first sample only establishes the level.
    pub fn observe(&mut self, high: bool, at: Instant) -> bool {
        let previous = self.level.replace(high);
        if previous != Some(false) || !high {
            return false;
        }

        let spaced = self
            .last_accepted
            .map_or(true, |last| at.saturating_duration_since(last) >= self.min_interval);
        if spaced {
            self.last_accepted = Some(at);
        } else {
            debug!("Release edge ignored (bounce)");
        }
        spaced
    }

    /// Time of the last accepted edge.
    pub fn last_accepted(&self) -> Option<Instant> {
        self.last_accepted
    }
}

/// Polls an [`InputLine`] and fires once on a debounced button release.
pub struct ButtonMonitor<L> {
    line: L,
    debouncer: Debouncer,
    poll_interval: Duration,
    fired: bool,
}

impl<L: InputLine> ButtonMonitor<L> {
    /// Create a monitor with the default 10 ms poll and 200 ms debounce.
    pub fn new(line: L) -> Self {
        Self::with_timing(line, DEFAULT_TRIGGER_POLL_INTERVAL, DEFAULT_DEBOUNCE)
    }

    /// Create a monitor with the timing of `config`.
    pub fn from_config(line: L, config: &PipelineConfig) -> Self {
        Self::with_timing(line, config.trigger_poll_interval, config.debounce)
    }

    /// Create a monitor with explicit timing. The poll interval is at
    /// least 1 ms.
    pub fn with_timing(line: L, poll_interval: Duration, debounce: Duration) -> Self {
        Self {
            line,
            debouncer: Debouncer::new(debounce),
            poll_interval: poll_interval.max(Duration::from_millis(1)),
            fired: false,
        }
    }

    /// Check if the monitor already fired.
    pub fn has_fired(&self) -> bool {
        self.fired
    }

    /// Allow the monitor to fire again for the next session.
    pub fn rearm(&mut self) {
        self.fired = false;
    }
}

#[async_trait]
impl<L: InputLine> TriggerSource for ButtonMonitor<L> {
    async fn wait_for_release(&mut self) -> Result<TriggerEvent> {
        if self.fired {
            return Err(Error::Trigger {
                reason: "button monitor already fired for this session".to_string(),
            });
        }

        let mut ticker = tokio::time::interval(self.poll_interval);
        loop {
            ticker.tick().await;
            let high = self.line.is_high()?;
            if self.debouncer.observe(high, Instant::now()) {
                self.fired = true;
                let event = TriggerEvent::now();
                info!("Button released at {}", event.wall_clock);
                return Ok(event);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Replays a fixed level sequence, then holds the last level.
    struct ScriptedLine {
        levels: VecDeque<bool>,
        last: bool,
    }

    impl ScriptedLine {
        fn new(levels: &[bool]) -> Self {
            Self {
                levels: levels.iter().copied().collect(),
                last: true,
            }
        }
    }

    impl InputLine for ScriptedLine {
        fn is_high(&mut self) -> Result<bool> {
            if let Some(level) = self.levels.pop_front() {
                self.last = level;
            }
            Ok(self.last)
        }
    }

    struct BrokenLine;

    impl InputLine for BrokenLine {
        fn is_high(&mut self) -> Result<bool> {
            Err(Error::Trigger {
                reason: "line unavailable".to_string(),
            })
        }
    }

    #[test]
    fn test_debouncer_edges() {
        let t0 = Instant::now();
        let ms = |n| t0 + Duration::from_millis(n);
        let mut d = Debouncer::new(Duration::from_millis(200));

        assert!(!d.observe(true, ms(0)));
        assert!(!d.observe(false, ms(10)));
        assert!(d.observe(true, ms(20)));
        // bounce
        assert!(!d.observe(false, ms(30)));
        assert!(!d.observe(true, ms(40)));
        // next press well after the window
        assert!(!d.observe(false, ms(300)));
        assert!(d.observe(true, ms(320)));
        assert_eq!(d.last_accepted(), Some(ms(320)));
    }

    #[test]
    fn test_debouncer_first_sample_is_not_an_edge() {
        let mut d = Debouncer::new(Duration::from_millis(200));
        assert!(!d.observe(true, Instant::now()));
        assert!(!d.observe(true, Instant::now()));
    }

    #[tokio::test]
    async fn test_button_fires_once() {
        let line = ScriptedLine::new(&[true, false, false, true]);
        let mut monitor =
            ButtonMonitor::with_timing(line, Duration::from_millis(1), Duration::from_millis(200));

        let before = Instant::now();
        let event = monitor.wait_for_release().await.unwrap();
        assert!(event.at >= before);
        assert!(monitor.has_fired());
        assert!(matches!(
            monitor.wait_for_release().await,
            Err(Error::Trigger { .. })
        ));
    }

    #[tokio::test]
    async fn test_button_timing_from_config() {
        let config = PipelineConfig::new(
            crate::config::DeviceIdentity::parse("120d0082421e0127").unwrap(),
            crate::config::SecretKey::new(vec![1]),
        )
        .with_trigger_timing(Duration::ZERO, Duration::from_millis(500));

        let line = ScriptedLine::new(&[true, false, true]);
        let mut monitor = ButtonMonitor::from_config(line, &config);
        assert_eq!(monitor.poll_interval, Duration::from_millis(1));
        assert_eq!(monitor.debouncer.min_interval, Duration::from_millis(500));

        monitor.wait_for_release().await.unwrap();
        assert!(monitor.has_fired());
    }

    #[tokio::test]
    async fn test_button_line_error() {
        let mut monitor = ButtonMonitor::new(BrokenLine);
        assert!(monitor.wait_for_release().await.is_err());
        assert!(!monitor.has_fired());
    }

    #[tokio::test]
    async fn test_immediate_trigger() {
        let before = Instant::now();
        let event = ImmediateTrigger.wait_for_release().await.unwrap();
        assert!(event.at >= before);
    }
}
