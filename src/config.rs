use clap::ValueEnum;
use std::time::Duration;

/// Artificial latency between producer phases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamTiming {
    /// Before the first frame.
    pub initial: Duration,
    /// Between the tool call announcement and its result.
    pub tool: Duration,
    /// Between phases (tool block, artifact block, text block, finish).
    pub phase: Duration,
    /// Between consecutive text deltas.
    pub word: Duration,
    /// Between consecutive artifact lines.
    pub line: Duration,
}

impl StreamTiming {
    pub fn realistic() -> Self {
        Self {
            initial: Duration::from_millis(100),
            tool: Duration::from_millis(400),
            phase: Duration::from_millis(150),
            word: Duration::from_millis(40),
            line: Duration::from_millis(25),
        }
    }

    pub fn instant() -> Self {
        Self {
            initial: Duration::ZERO,
            tool: Duration::ZERO,
            phase: Duration::ZERO,
            word: Duration::ZERO,
            line: Duration::ZERO,
        }
    }
}

impl Default for StreamTiming {
    fn default() -> Self {
        Self::realistic()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TimingPreset {
    Realistic,
    Instant,
}

impl From<TimingPreset> for StreamTiming {
    fn from(preset: TimingPreset) -> Self {
        match preset {
            TimingPreset::Realistic => StreamTiming::realistic(),
            TimingPreset::Instant => StreamTiming::instant(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Longest gap between two reads before the turn fails with a timeout.
    pub max_silence: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            max_silence: Duration::from_secs(30),
        }
    }
}

pub(crate) async fn pause(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}
