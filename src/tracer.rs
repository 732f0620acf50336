//! Delay tracers.
//!
//! | Tracer | Output |
//! |--------|--------|
//! | [`DelayLog`] | Shared in-memory list, cloneable handle for inspection |
//! | [`DelayTraceWriter`] | Tab-separated app-delay trace, one `LastDelay` and one `FullDelay` row per sample |

use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::warn;

use crate::protocols::DelayTracer;
use crate::tracker::{DelaySample, RequestKey};

pub const TRACE_HEADER: &str = "Time\tNode\tAppId\tSeqNo\tType\tDelayS\tDelayUS\tRetxCount\tHopCount";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TracedDelay {
    pub at: Instant,
    pub sample: DelaySample,
}

/// In-memory tracer. Clones share the same list.
#[derive(Clone, Debug, Default)]
pub struct DelayLog {
    entries: Arc<Mutex<Vec<TracedDelay>>>,
}

impl DelayLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<TracedDelay> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Samples for content requests only, in retire order.
    pub fn content_samples(&self) -> Vec<DelaySample> {
        self.entries()
            .into_iter()
            .map(|e| e.sample)
            .filter(|s| matches!(s.key, RequestKey::Content(_)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DelayTracer for DelayLog {
    fn record(&mut self, at: Instant, sample: &DelaySample) {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(TracedDelay { at, sample: *sample });
    }
}

/// Writes the app-delay trace table. The time column counts seconds from
/// `epoch`.
pub struct DelayTraceWriter<W: Write + Send> {
    out: W,
    epoch: Instant,
    node: String,
    app_id: u32,
    header_written: bool,
    failed: bool,
}

impl<W: Write + Send> DelayTraceWriter<W> {
    pub fn new(out: W, epoch: Instant, node: impl Into<String>, app_id: u32) -> Self {
        Self {
            out,
            epoch,
            node: node.into(),
            app_id,
            header_written: false,
            failed: false,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_sample(&mut self, at: Instant, sample: &DelaySample) -> std::io::Result<()> {
        if !self.header_written {
            writeln!(self.out, "{TRACE_HEADER}")?;
            self.header_written = true;
        }
        let time = at.saturating_duration_since(self.epoch).as_secs_f64();
        self.write_row(time, sample, "LastDelay", sample.last_delay, 1)?;
        self.write_row(time, sample, "FullDelay", sample.full_delay, sample.retx_count)?;
        self.out.flush()
    }

    fn write_row(
        &mut self,
        time: f64,
        sample: &DelaySample,
        kind: &str,
        delay: Duration,
        retx_count: u32,
    ) -> std::io::Result<()> {
        writeln!(
            self.out,
            "{time:.6}\t{}\t{}\t{}\t{kind}\t{:.6}\t{}\t{retx_count}\t{}",
            self.node,
            self.app_id,
            sample.key,
            delay.as_secs_f64(),
            delay.as_micros(),
            sample.hop_count,
        )
    }
}

impl<W: Write + Send> DelayTracer for DelayTraceWriter<W> {
    fn record(&mut self, at: Instant, sample: &DelaySample) {
        if self.failed {
            return;
        }
        if let Err(e) = self.write_sample(at, sample) {
            warn!(error = %e, "delay trace write failed, tracing disabled");
            self.failed = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(key: RequestKey) -> DelaySample {
        DelaySample {
            key,
            last_delay: Duration::from_millis(40),
            full_delay: Duration::from_millis(1540),
            retx_count: 2,
            hop_count: 3,
        }
    }

    #[test]
    fn log_clones_share_entries() {
        let log = DelayLog::new();
        let mut writer_side = log.clone();
        let at = Instant::now();
        writer_side.record(at, &sample(RequestKey::Verification));
        writer_side.record(at, &sample(RequestKey::Content(7)));

        assert_eq!(log.len(), 2);
        let content = log.content_samples();
        assert_eq!(content.len(), 1);
        assert_eq!(content[0].key, RequestKey::Content(7));
    }

    #[test]
    fn writer_emits_header_once_and_two_rows_per_sample() {
        let epoch = Instant::now();
        let mut writer = DelayTraceWriter::new(Vec::new(), epoch, "consumer1", 0);
        writer.record(epoch + Duration::from_secs(2), &sample(RequestKey::Content(7)));
        writer.record(epoch + Duration::from_secs(3), &sample(RequestKey::Verification));

        let text = String::from_utf8(writer.into_inner()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[0], TRACE_HEADER);
        assert_eq!(
            lines[1],
            "2.000000\tconsumer1\t0\t7\tLastDelay\t0.040000\t40000\t1\t3"
        );
        assert_eq!(
            lines[2],
            "2.000000\tconsumer1\t0\t7\tFullDelay\t1.540000\t1540000\t2\t3"
        );
        assert!(lines[3].contains("\tkey\tLastDelay\t"));
    }
}
