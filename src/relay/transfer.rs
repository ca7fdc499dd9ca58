//! Chunked transfer relay: the streaming copy loop with progress reporting.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

/// Fixed chunk size for the relay loop.
pub const CHUNK_SIZE: usize = 1024 * 1024;

/// Transfers with a known size above this are rejected before streaming.
pub const MAX_TRANSFER_BYTES: u64 = 2 * 1024 * 1024 * 1024;

/// Progress is re-emitted once percent has advanced this many points...
pub const REPORT_PERCENT_STEP: f64 = 5.0;

/// ...or once this much wall-clock time has passed, whichever comes first.
/// Bounds the edit rate against Telegram's own limits.
pub const REPORT_INTERVAL: Duration = Duration::from_secs(10);

/// True when a known total exceeds the ceiling. Unknown totals pass; the
/// loop itself enforces nothing further.
pub fn exceeds_ceiling(total: Option<u64>, ceiling: u64) -> bool {
    matches!(total, Some(t) if t > ceiling)
}

/// Mutable state of one transfer, owned by the task driving the loop.
/// bytes_transferred only ever grows.
#[derive(Debug)]
pub struct TransferState {
    bytes_transferred: u64,
    total_bytes: Option<u64>,
    started_at: Instant,
    last_report_at: Instant,
    last_report_percent: f64,
    last_report_bytes: Option<u64>,
}

impl TransferState {
    pub fn new(total_bytes: Option<u64>) -> Self {
        let now = Instant::now();
        Self {
            bytes_transferred: 0,
            total_bytes,
            started_at: now,
            last_report_at: now,
            last_report_percent: 0.0,
            last_report_bytes: None,
        }
    }

    pub fn record_chunk(&mut self, len: usize) {
        self.bytes_transferred += len as u64;
    }

    pub fn bytes_transferred(&self) -> u64 {
        self.bytes_transferred
    }

    pub fn total_bytes(&self) -> Option<u64> {
        self.total_bytes
    }

    /// Percent complete, clamped to [0, 100]. None when the total is
    /// unknown, which suppresses percent-based reporting entirely.
    pub fn percent(&self) -> Option<f64> {
        match self.total_bytes {
            Some(total) if total > 0 => {
                Some((self.bytes_transferred as f64 / total as f64 * 100.0).min(100.0))
            }
            _ => None,
        }
    }

    /// Average speed since the start, bytes per second.
    pub fn speed_bps(&self) -> f64 {
        let elapsed = self.started_at.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.bytes_transferred as f64 / elapsed
        } else {
            0.0
        }
    }

    /// Estimated time remaining. None when the total or the speed is
    /// unknown; rendered as "unknown" downstream.
    pub fn eta(&self) -> Option<Duration> {
        let total = self.total_bytes?;
        let speed = self.speed_bps();
        if speed <= 0.0 {
            return None;
        }
        let remaining = total.saturating_sub(self.bytes_transferred);
        Some(Duration::from_secs_f64(remaining as f64 / speed))
    }

    fn should_report(&self) -> bool {
        if self.last_report_at.elapsed() >= REPORT_INTERVAL {
            return true;
        }
        match self.percent() {
            Some(percent) => percent - self.last_report_percent >= REPORT_PERCENT_STEP,
            None => false,
        }
    }

    fn mark_reported(&mut self) {
        self.last_report_at = Instant::now();
        self.last_report_bytes = Some(self.bytes_transferred);
        if let Some(percent) = self.percent() {
            self.last_report_percent = percent;
        }
    }

    pub fn snapshot(&self) -> TransferSnapshot {
        TransferSnapshot {
            bytes_transferred: self.bytes_transferred,
            total_bytes: self.total_bytes,
            percent: self.percent(),
            speed_bps: self.speed_bps(),
            eta: self.eta(),
        }
    }
}

/// Immutable view of transfer progress handed to reporters.
#[derive(Debug, Clone, Copy)]
pub struct TransferSnapshot {
    pub bytes_transferred: u64,
    pub total_bytes: Option<u64>,
    pub percent: Option<f64>,
    pub speed_bps: f64,
    pub eta: Option<Duration>,
}

/// Source of fixed-size chunks.
#[async_trait]
pub trait ChunkSource: Send {
    /// Total size, if the origin reported one.
    fn total_bytes(&self) -> Option<u64>;
    /// The next chunk, or None at end of stream.
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, String>;
}

/// Destination for chunks. Writes are synchronous in sequence with reads,
/// so the sink's write speed throttles the source's read rate.
pub trait ChunkSink: Send {
    fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), String>;
}

/// Consumer of progress updates. Implementations own their failures: a
/// report that cannot be delivered is logged and dropped, never surfaced,
/// so the transfer cannot abort on a failed status edit.
#[async_trait]
pub trait ProgressReporter: Send {
    async fn report(&mut self, snapshot: &TransferSnapshot);
}

/// Shared cancel flag, flipped from the callback handler and checked at
/// every chunk boundary.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// How a relay loop ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    Completed(u64),
    Cancelled,
}

/// Drive the copy loop: read chunks, append each to the sink, emit progress
/// per the report policy, and honour the cancel flag between chunks.
///
/// A final report is emitted if the last in-loop report did not already
/// cover the full byte count, so a finished transfer always shows 100%.
pub async fn run(
    source: &mut dyn ChunkSource,
    sink: &mut dyn ChunkSink,
    reporter: &mut dyn ProgressReporter,
    cancel: &CancelFlag,
) -> Result<TransferOutcome, String> {
    let mut state = TransferState::new(source.total_bytes());

    loop {
        if cancel.is_cancelled() {
            return Ok(TransferOutcome::Cancelled);
        }

        let chunk = match source.next_chunk().await? {
            Some(chunk) => chunk,
            None => break,
        };
        if chunk.is_empty() {
            continue;
        }

        sink.write_chunk(&chunk)?;
        state.record_chunk(chunk.len());

        if state.should_report() {
            reporter.report(&state.snapshot()).await;
            state.mark_reported();
        }
    }

    if state.last_report_bytes != Some(state.bytes_transferred) {
        reporter.report(&state.snapshot()).await;
    }

    Ok(TransferOutcome::Completed(state.bytes_transferred))
}

/// Streaming GET body rebuffered into fixed-size chunks. Network reads
/// arrive in arbitrary sizes; the relay loop sees CHUNK_SIZE blocks with a
/// partial tail.
pub struct HttpSource {
    response: reqwest::Response,
    total: Option<u64>,
    buf: Vec<u8>,
    done: bool,
}

impl HttpSource {
    /// Open a streaming GET against a direct link. Fails on a non-success
    /// status before any body bytes are consumed.
    pub async fn open(client: &reqwest::Client, url: &str) -> Result<Self, String> {
        let response = client
            .get(url)
            .send()
            .await
            .map_err(|e| format!("HTTP error: {e}"))?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("origin returned {status}"));
        }

        let total = response.content_length();
        Ok(Self {
            response,
            total,
            buf: Vec::with_capacity(CHUNK_SIZE),
            done: false,
        })
    }
}

#[async_trait]
impl ChunkSource for HttpSource {
    fn total_bytes(&self) -> Option<u64> {
        self.total
    }

    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, String> {
        while !self.done && self.buf.len() < CHUNK_SIZE {
            match self
                .response
                .chunk()
                .await
                .map_err(|e| format!("read failed: {e}"))?
            {
                Some(bytes) => self.buf.extend_from_slice(&bytes),
                None => self.done = true,
            }
        }

        if self.buf.is_empty() {
            return Ok(None);
        }
        if self.buf.len() <= CHUNK_SIZE {
            return Ok(Some(std::mem::take(&mut self.buf)));
        }

        let rest = self.buf.split_off(CHUNK_SIZE);
        let chunk = std::mem::replace(&mut self.buf, rest);
        Ok(Some(chunk))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Source feeding a fixed number of same-sized chunks.
    struct FixedSource {
        chunks: Vec<Vec<u8>>,
        total: Option<u64>,
        reads: usize,
    }

    impl FixedSource {
        fn new(chunk_count: usize, chunk_len: usize) -> Self {
            let chunks = (0..chunk_count).map(|_| vec![0xAB; chunk_len]).collect();
            Self {
                chunks,
                total: Some((chunk_count * chunk_len) as u64),
                reads: 0,
            }
        }

        fn without_total(mut self) -> Self {
            self.total = None;
            self
        }
    }

    #[async_trait]
    impl ChunkSource for FixedSource {
        fn total_bytes(&self) -> Option<u64> {
            self.total
        }

        async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, String> {
            if self.chunks.is_empty() {
                return Ok(None);
            }
            self.reads += 1;
            Ok(Some(self.chunks.remove(0)))
        }
    }

    #[derive(Default)]
    struct VecSink {
        bytes: Vec<u8>,
        writes: Vec<usize>,
    }

    impl ChunkSink for VecSink {
        fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), String> {
            self.bytes.extend_from_slice(chunk);
            self.writes.push(chunk.len());
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingReporter {
        percents: Vec<Option<f64>>,
        bytes: Vec<u64>,
    }

    #[async_trait]
    impl ProgressReporter for RecordingReporter {
        async fn report(&mut self, snapshot: &TransferSnapshot) {
            self.percents.push(snapshot.percent);
            self.bytes.push(snapshot.bytes_transferred);
        }
    }

    #[tokio::test]
    async fn test_no_byte_loss_across_chunk_loop() {
        let mut source = FixedSource::new(7, 64 * 1024);
        let mut sink = VecSink::default();
        let mut reporter = RecordingReporter::default();

        let outcome = run(&mut source, &mut sink, &mut reporter, &CancelFlag::new())
            .await
            .unwrap();

        assert_eq!(outcome, TransferOutcome::Completed(7 * 64 * 1024));
        assert_eq!(sink.bytes.len(), 7 * 64 * 1024);
        assert_eq!(sink.writes.len(), 7);
    }

    #[tokio::test]
    async fn test_zero_length_source() {
        let mut source = FixedSource::new(0, 1024);
        let mut sink = VecSink::default();
        let mut reporter = RecordingReporter::default();

        let outcome = run(&mut source, &mut sink, &mut reporter, &CancelFlag::new())
            .await
            .unwrap();

        assert_eq!(outcome, TransferOutcome::Completed(0));
        assert!(sink.bytes.is_empty());
        // Still one terminal report so the status message resolves.
        assert_eq!(reporter.bytes, vec![0]);
    }

    #[tokio::test]
    async fn test_percent_monotonically_non_decreasing() {
        let mut source = FixedSource::new(20, 128 * 1024);
        let mut sink = VecSink::default();
        let mut reporter = RecordingReporter::default();

        run(&mut source, &mut sink, &mut reporter, &CancelFlag::new())
            .await
            .unwrap();

        let percents: Vec<f64> = reporter.percents.iter().map(|p| p.unwrap()).collect();
        assert!(!percents.is_empty());
        assert!(percents.windows(2).all(|w| w[1] >= w[0]));
        assert_eq!(*percents.last().unwrap(), 100.0);
    }

    #[tokio::test]
    async fn test_unknown_total_suppresses_percent() {
        let mut source = FixedSource::new(4, 256 * 1024).without_total();
        let mut sink = VecSink::default();
        let mut reporter = RecordingReporter::default();

        run(&mut source, &mut sink, &mut reporter, &CancelFlag::new())
            .await
            .unwrap();

        // Only the terminal report fires (no percent math, no interval
        // elapsed), and it carries no percentage.
        assert_eq!(reporter.bytes, vec![4 * 256 * 1024]);
        assert_eq!(reporter.percents, vec![None]);
    }

    #[tokio::test]
    async fn test_cancel_stops_before_next_chunk() {
        let cancel = CancelFlag::new();
        cancel.cancel();

        let mut source = FixedSource::new(10, 1024);
        let mut sink = VecSink::default();
        let mut reporter = RecordingReporter::default();

        let outcome = run(&mut source, &mut sink, &mut reporter, &cancel)
            .await
            .unwrap();

        assert_eq!(outcome, TransferOutcome::Cancelled);
        assert_eq!(source.reads, 0);
        assert!(sink.bytes.is_empty());
    }

    #[tokio::test]
    async fn test_sink_error_propagates() {
        struct FailingSink;
        impl ChunkSink for FailingSink {
            fn write_chunk(&mut self, _chunk: &[u8]) -> Result<(), String> {
                Err("disk full".to_string())
            }
        }

        let mut source = FixedSource::new(3, 1024);
        let mut reporter = RecordingReporter::default();
        let err = run(&mut source, &mut FailingSink, &mut reporter, &CancelFlag::new())
            .await
            .unwrap_err();
        assert_eq!(err, "disk full");
    }

    #[test]
    fn test_percent_clamped_when_source_overruns() {
        let mut state = TransferState::new(Some(1000));
        state.record_chunk(1500);
        assert_eq!(state.percent(), Some(100.0));
    }

    #[test]
    fn test_percent_none_for_zero_total() {
        let state = TransferState::new(Some(0));
        assert_eq!(state.percent(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_forces_report_without_percent_progress() {
        let mut state = TransferState::new(None);
        state.record_chunk(100);
        assert!(!state.should_report());

        tokio::time::advance(REPORT_INTERVAL).await;
        assert!(state.should_report());

        state.mark_reported();
        assert!(!state.should_report());
    }

    #[tokio::test(start_paused = true)]
    async fn test_eta_from_elapsed_and_remaining() {
        let mut state = TransferState::new(Some(10_000));
        tokio::time::advance(Duration::from_secs(10)).await;
        state.record_chunk(5_000);

        // 500 B/s measured, 5000 bytes left.
        let eta = state.eta().unwrap();
        assert_eq!(eta.as_secs(), 10);
    }

    #[test]
    fn test_eta_unknown_at_zero_speed() {
        let state = TransferState::new(Some(10_000));
        assert!(state.eta().is_none() || state.eta().unwrap().as_secs() == 0);
    }

    #[test]
    fn test_exceeds_ceiling() {
        assert!(exceeds_ceiling(Some(MAX_TRANSFER_BYTES + 1), MAX_TRANSFER_BYTES));
        assert!(!exceeds_ceiling(Some(MAX_TRANSFER_BYTES), MAX_TRANSFER_BYTES));
        assert!(!exceeds_ceiling(None, MAX_TRANSFER_BYTES));
    }

    #[tokio::test]
    async fn test_five_percent_policy_on_ten_chunks() {
        // 10 chunks of 1/10th each: every chunk advances 10 >= 5 points, so
        // each one reports and the loop ends with exactly ten reports, the
        // last at 100%.
        let mut source = FixedSource::new(10, 64 * 1024);
        let mut sink = VecSink::default();
        let mut reporter = RecordingReporter::default();

        run(&mut source, &mut sink, &mut reporter, &CancelFlag::new())
            .await
            .unwrap();

        assert_eq!(sink.writes.len(), 10);
        assert!(!reporter.percents.is_empty() && reporter.percents.len() <= 10);
        assert_eq!(reporter.percents.last().unwrap().unwrap(), 100.0);
    }
}
