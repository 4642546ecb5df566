use std::time::{Duration, Instant};

/// Rolling throughput sampler.
///
/// Bytes accumulate until at least `window` has passed since the previous
/// sample; then a rate is produced and the window restarts.
#[derive(Debug, Clone)]
pub struct ThroughputMeter {
    window: Duration,
    last_sample_at: Instant,
    bytes_since_last: u64,
    last_rate: Option<f64>,
}

impl ThroughputMeter {
    pub fn new(started_at: Instant, window: Duration) -> Self {
        Self {
            window,
            last_sample_at: started_at,
            bytes_since_last: 0,
            last_rate: None,
        }
    }

    /// Account for `bytes` that arrived at `now`; returns a fresh rate in bytes/s
    /// when a window boundary was crossed.
    pub fn record(&mut self, bytes: u64, now: Instant) -> Option<f64> {
        self.bytes_since_last += bytes;
        let elapsed = now.saturating_duration_since(self.last_sample_at);
        if elapsed < self.window {
            return None;
        }

        let rate = self.bytes_since_last as f64 / elapsed.as_secs_f64();
        self.last_sample_at = now;
        self.bytes_since_last = 0;
        self.last_rate = Some(rate);
        Some(rate)
    }

    pub fn last_rate(&self) -> Option<f64> {
        self.last_rate
    }
}

/// Snapshot published to progress subscribers.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferProgress {
    pub filename: String,
    pub total_bytes: Option<u64>,
    pub received_bytes: u64,
    /// 0.0..=1.0; a zero-byte file counts as complete.
    pub fraction: f64,
    /// Bytes per second from the most recent sample window.
    pub rate_bytes_per_sec: Option<f64>,
}

/// State of one in-flight fetch. Lives exactly as long as its connection.
#[derive(Debug, Clone)]
pub struct TransferSession {
    filename: String,
    total_bytes: Option<u64>,
    received: u64,
    started_at: Instant,
    meter: ThroughputMeter,
}

impl TransferSession {
    pub fn new(filename: impl Into<String>, started_at: Instant) -> Self {
        Self {
            filename: filename.into(),
            total_bytes: None,
            received: 0,
            started_at,
            meter: ThroughputMeter::new(started_at, Duration::from_secs(1)),
        }
    }

    pub fn set_total(&mut self, total: u64) {
        self.total_bytes = Some(total);
    }

    pub fn total_bytes(&self) -> Option<u64> {
        self.total_bytes
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    pub fn record_chunk(&mut self, len: usize, now: Instant) -> Option<f64> {
        self.received += len as u64;
        self.meter.record(len as u64, now)
    }

    pub fn fraction(&self) -> f64 {
        match self.total_bytes {
            None => 0.0,
            Some(0) => 1.0,
            Some(total) => (self.received as f64 / total as f64).min(1.0),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.total_bytes == Some(self.received)
    }

    pub fn elapsed(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.started_at)
    }

    pub fn average_rate(&self, now: Instant) -> f64 {
        let secs = self.elapsed(now).as_secs_f64();
        if secs > 0.0 {
            self.received as f64 / secs
        } else {
            0.0
        }
    }

    pub fn progress(&self) -> TransferProgress {
        TransferProgress {
            filename: self.filename.clone(),
            total_bytes: self.total_bytes,
            received_bytes: self.received,
            fraction: self.fraction(),
            rate_bytes_per_sec: self.meter.last_rate(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_at_first_sample_boundary() {
        // 1 MiB spread evenly over 2 seconds in 16 chunks.
        let start = Instant::now();
        let mut session = TransferSession::new("big.bin", start);
        session.set_total(1_048_576);

        let chunk = 65_536usize;
        let step = Duration::from_millis(125);
        let mut samples = Vec::new();
        for k in 1..=16u32 {
            if let Some(rate) = session.record_chunk(chunk, start + step * k) {
                samples.push((k, rate));
            }
        }

        let (first_at, first_rate) = samples[0];
        assert_eq!(first_at, 8);
        let kib_per_sec = first_rate / 1024.0;
        assert!((kib_per_sec - 512.0).abs() < 1.0, "got {} KiB/s", kib_per_sec);

        assert_eq!(samples.len(), 2);
        let published = session.progress().rate_bytes_per_sec.unwrap();
        assert_eq!(published, samples[1].1);
        assert!((published - 524_288.0).abs() < 1024.0);
        assert!(session.is_complete());
        assert_eq!(session.fraction(), 1.0);
    }

    #[test]
    fn test_no_sample_inside_window() {
        let start = Instant::now();
        let mut meter = ThroughputMeter::new(start, Duration::from_secs(1));
        assert_eq!(meter.record(10, start + Duration::from_millis(300)), None);
        assert_eq!(meter.record(10, start + Duration::from_millis(900)), None);
        let rate = meter.record(10, start + Duration::from_millis(1500)).unwrap();
        assert!((rate - 20.0).abs() < 1e-9);
        assert_eq!(meter.last_rate(), Some(rate));
    }

    #[test]
    fn test_fraction_edges() {
        let start = Instant::now();
        let mut session = TransferSession::new("f", start);
        assert_eq!(session.fraction(), 0.0);

        session.set_total(0);
        assert_eq!(session.fraction(), 1.0);
        assert!(session.is_complete());

        let mut half = TransferSession::new("g", start);
        half.set_total(200);
        half.record_chunk(100, start);
        assert_eq!(half.fraction(), 0.5);
        assert!(!half.is_complete());
        assert_eq!(half.progress().received_bytes, 100);
    }
}
