//! Rolling steps-per-second meter for the headless runner

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Tracks how long recent batches of steps took
pub struct ThroughputMeter {
    /// Rolling window of (steps, elapsed) samples
    samples: VecDeque<(u64, Duration)>,
    /// Maximum samples to keep
    max_samples: usize,
    batch_start: Option<Instant>,
    total_steps: u64,
    total_time: Duration,
}

impl ThroughputMeter {
    pub fn new(max_samples: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(max_samples),
            max_samples: max_samples.max(1),
            batch_start: None,
            total_steps: 0,
            total_time: Duration::ZERO,
        }
    }

    /// Start timing a batch
    pub fn batch_start(&mut self) {
        self.batch_start = Some(Instant::now());
    }

    /// End timing a batch of `steps` agent-steps
    pub fn batch_end(&mut self, steps: u64) {
        if let Some(start) = self.batch_start.take() {
            self.record(steps, start.elapsed());
        }
    }

    /// Record a measured batch
    pub fn record(&mut self, steps: u64, elapsed: Duration) {
        self.samples.push_back((steps, elapsed));
        while self.samples.len() > self.max_samples {
            self.samples.pop_front();
        }
        self.total_steps += steps;
        self.total_time += elapsed;
    }

    /// Steps per second over the rolling window
    pub fn recent_rate(&self) -> f64 {
        let (steps, time) = self
            .samples
            .iter()
            .fold((0u64, Duration::ZERO), |(s, t), &(steps, elapsed)| (s + steps, t + elapsed));
        rate(steps, time)
    }

    /// Steps per second since creation
    pub fn overall_rate(&self) -> f64 {
        rate(self.total_steps, self.total_time)
    }

    pub fn total_steps(&self) -> u64 {
        self.total_steps
    }
}

fn rate(steps: u64, time: Duration) -> f64 {
    let secs = time.as_secs_f64();
    if secs > 0.0 {
        steps as f64 / secs
    } else {
        0.0
    }
}
