//! Parse metrics

use std::time::Duration;

use iroh_metrics::{Counter, Histogram, MetricsGroup};

/// Outcomes and durations of document parses
#[derive(Debug, MetricsGroup)]
#[metrics(name = "parse")]
pub struct ParseMetrics {
    /// Payloads parsed into a document
    pub parses: Counter,
    /// Payloads the parser rejected
    pub parse_failures: Counter,
    /// Time spent in successful parses, in microseconds
    pub parse_micros: Counter,
    /// Duration of successful parses, in milliseconds
    pub parse_duration_ms: Histogram,
}

impl Default for ParseMetrics {
    fn default() -> Self {
        Self {
            parses: Counter::default(),
            parse_failures: Counter::default(),
            parse_micros: Counter::default(),
            parse_duration_ms: parse_duration_buckets(),
        }
    }
}

fn parse_duration_buckets() -> Histogram {
    Histogram::new(vec![0.0, 0.1, 0.5, 1.0, 5.0, 10.0, 50.0, 100.0, 500.0])
}

/// Point-in-time copy of [`ParseMetrics`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseStats {
    pub count: u64,
    pub failures: u64,
    pub total: Duration,
}

impl ParseStats {
    /// Mean duration of a successful parse
    pub fn mean(&self) -> Option<Duration> {
        let micros = u64::try_from(self.total.as_micros()).unwrap_or(u64::MAX);
        micros.checked_div(self.count).map(Duration::from_micros)
    }
}

impl ParseMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful parse
    pub fn record(&self, duration: Duration) {
        let micros = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);
        self.parses.inc();
        self.parse_micros.inc_by(micros);
        self.parse_duration_ms.observe(duration.as_secs_f64() * 1_000.0);
    }

    /// Record a rejected payload
    pub fn record_failure(&self) {
        self.parse_failures.inc();
    }

    pub fn snapshot(&self) -> ParseStats {
        ParseStats {
            count: self.parses.get(),
            failures: self.parse_failures.get(),
            total: Duration::from_micros(self.parse_micros.get()),
        }
    }
}
