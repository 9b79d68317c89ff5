//! Shared counters and the 1 Hz progress reporter.
//!
//! Workers increment the atomic counters; only the reporter thread reads
//! them. Progress lines go to stderr and never interleave with record
//! output on stdout. The clock starts at the first counted record so idle
//! startup time does not dilute the rates.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
pub struct Stats {
    input: AtomicU64,
    output: AtomicU64,
    merged: AtomicU64,
    invalid: AtomicU64,
}

impl Stats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_input(&self, n: u64) {
        self.input.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_output(&self, n: u64) {
        self.output.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_merged(&self, n: u64) {
        self.merged.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_invalid(&self, n: u64) {
        self.invalid.fetch_add(n, Ordering::Relaxed);
    }

    pub fn input(&self) -> u64 {
        self.input.load(Ordering::Relaxed)
    }

    pub fn output(&self) -> u64 {
        self.output.load(Ordering::Relaxed)
    }

    pub fn merged(&self) -> u64 {
        self.merged.load(Ordering::Relaxed)
    }

    pub fn invalid(&self) -> u64 {
        self.invalid.load(Ordering::Relaxed)
    }
}

/// A background thread that prints one progress line per second.
pub struct Progress {
    stop: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

impl Progress {
    pub fn spawn(tag: &'static str, stats: Arc<Stats>) -> Self {
        let (stop, rx) = mpsc::channel();
        let handle = std::thread::spawn(move || {
            let mut start = Instant::now();
            loop {
                match rx.recv_timeout(Duration::from_secs(1)) {
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                        eprintln!("[*] Complete");
                        return;
                    }
                    Err(RecvTimeoutError::Timeout) => {
                        let input = stats.input();
                        let output = stats.output();
                        if input == 0 && output == 0 {
                            // Nothing has moved yet; keep the clock at zero.
                            start = Instant::now();
                            continue;
                        }
                        let elapsed = start.elapsed().as_secs_f64();
                        if elapsed > 1.0 {
                            eprintln!(
                                "[*] [{}] Read {} and wrote {} records in {} seconds ({}/s in, {}/s out) (merged: {}, invalid: {})",
                                tag,
                                input,
                                output,
                                elapsed as u64,
                                (input as f64 / elapsed) as u64,
                                (output as f64 / elapsed) as u64,
                                stats.merged(),
                                stats.invalid(),
                            );
                        }
                    }
                }
            }
        });
        Self { stop, handle }
    }

    /// Stops the reporter and prints the completion line.
    pub fn finish(self) {
        let _ = self.stop.send(());
        let _ = self.handle.join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let stats = Stats::new();
        stats.add_input(3);
        stats.add_input(2);
        stats.add_output(4);
        stats.add_merged(1);
        stats.add_invalid(7);
        assert_eq!(stats.input(), 5);
        assert_eq!(stats.output(), 4);
        assert_eq!(stats.merged(), 1);
        assert_eq!(stats.invalid(), 7);
    }

    #[test]
    fn test_reporter_stops_cleanly() {
        let stats = Stats::new();
        let progress = Progress::spawn("test", Arc::clone(&stats));
        stats.add_input(1);
        progress.finish();
    }
}
