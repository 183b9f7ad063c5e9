//! # Performance Accounting
//!
//! Two counter families track the gateway's data plane:
//!
//! - **Port units**, keyed by (role, slot): successful frame count, byte
//!   count (full wire length) and a drop counter derived from the protocol
//!   sequence field. Sources update on each parsed frame, sinks on each
//!   successful route. Every counter keeps a snapshot from the last query;
//!   `sample` returns the delta and advances the snapshot.
//! - **The execution unit**: total pump count and `load_us`, the
//!   microseconds spent in pumps that dispatched at least one frame, plus an
//!   HDR histogram of working-pump durations for percentile reporting.
//!
//! All counters are written from the dispatch thread only. The periodic
//! [`PerfReporter`] samples a configured unit set at a cadence of at least
//! two seconds and emits a one-line human summary; the same snapshot
//! serializes to JSON for offline analysis.

use std::time::{Duration, Instant};

use hdrhistogram::Histogram;
use serde::Serialize;
use tracing::{info, warn};

use crate::codec::MavFrame;
use crate::transport::{SinkId, SourceId, MAX_SINKS, MAX_SOURCES};

/// Minimum reporting cadence.
pub const MIN_REPORT_INTERVAL: Duration = Duration::from_secs(2);

/// One sampled performance unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PerfUnit {
    Source(SourceId),
    Sink(SinkId),
    Exec,
}

/// Counters for one port unit.
#[derive(Debug, Default)]
pub struct PortCounter {
    succ_count: u64,
    succ_bytes: u64,
    drop_count: u64,
    last_succ_count: u64,
    last_succ_bytes: u64,
    last_drop_count: u64,
    prev_seq: Option<u8>,
}

/// Port unit delta since the previous query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PortSample {
    pub succ_count: u64,
    pub succ_bytes: u64,
    pub drop_count: u64,
}

impl PortCounter {
    /// Account one successfully handled frame. The byte count is the full
    /// wire length (payload plus header/trailer overhead); the drop delta is
    /// the gap the sequence field reports, modulo its eight-bit space.
    pub fn record_frame(&mut self, frame: &MavFrame) {
        self.succ_count += 1;
        self.succ_bytes += frame.wire_len() as u64;
        if let Some(prev) = self.prev_seq {
            self.drop_count += u64::from(frame.seq.wrapping_sub(prev).wrapping_sub(1));
        }
        self.prev_seq = Some(frame.seq);
    }

    /// Delta since the last `sample` call; advances the snapshot.
    pub fn sample(&mut self) -> PortSample {
        let delta = PortSample {
            succ_count: self.succ_count - self.last_succ_count,
            succ_bytes: self.succ_bytes - self.last_succ_bytes,
            drop_count: self.drop_count - self.last_drop_count,
        };
        self.last_succ_count = self.succ_count;
        self.last_succ_bytes = self.succ_bytes;
        self.last_drop_count = self.drop_count;
        delta
    }

    /// Lifetime totals, without touching the snapshot.
    pub fn totals(&self) -> PortSample {
        PortSample {
            succ_count: self.succ_count,
            succ_bytes: self.succ_bytes,
            drop_count: self.drop_count,
        }
    }
}

/// Counters for the spin loop itself.
#[derive(Debug)]
pub struct ExecCounter {
    total: u64,
    load_us: u64,
    last_total: u64,
    last_load_us: u64,
    hist: Histogram<u64>,
}

impl Default for ExecCounter {
    fn default() -> Self {
        Self {
            total: 0,
            load_us: 0,
            last_total: 0,
            last_load_us: 0,
            hist: Histogram::new(3).expect("three significant digits is a valid histogram config"),
        }
    }
}

/// Execution unit delta since the previous query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExecSample {
    /// Pumps since the last query.
    pub total: u64,
    /// Microseconds spent in pumps that did useful work since the last query.
    pub load_us: u64,
    /// Lifetime median working-pump duration, microseconds.
    pub p50_us: u64,
    /// Lifetime tail working-pump duration, microseconds.
    pub p99_us: u64,
}

impl ExecCounter {
    /// Account one `spin` return.
    pub fn record_pump(&mut self, worked: bool, elapsed: Duration) {
        self.total += 1;
        if worked {
            let us = elapsed.as_micros() as u64;
            self.load_us += us;
            self.hist.saturating_record(us.max(1));
        }
    }

    pub fn sample(&mut self) -> ExecSample {
        let delta = ExecSample {
            total: self.total - self.last_total,
            load_us: self.load_us - self.last_load_us,
            p50_us: self.hist.value_at_quantile(0.50),
            p99_us: self.hist.value_at_quantile(0.99),
        };
        self.last_total = self.total;
        self.last_load_us = self.load_us;
        delta
    }

    pub fn totals(&self) -> (u64, u64) {
        (self.total, self.load_us)
    }
}

/// Report row for one sampled port unit.
#[derive(Debug, Clone, Serialize)]
pub struct PortReport {
    pub unit: String,
    #[serde(flatten)]
    pub delta: PortSample,
}

/// One sampled snapshot of the configured units.
#[derive(Debug, Clone, Serialize)]
pub struct PerfReport {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub ports: Vec<PortReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exec: Option<ExecSample>,
}

impl PerfReport {
    /// The one-line human summary the reporter logs.
    pub fn summary(&self) -> String {
        let mut parts: Vec<String> = self
            .ports
            .iter()
            .map(|p| {
                format!(
                    "{}: {} msg {} B {} drop",
                    p.unit, p.delta.succ_count, p.delta.succ_bytes, p.delta.drop_count
                )
            })
            .collect();
        if let Some(exec) = &self.exec {
            parts.push(format!(
                "exec: {} pumps {} us busy (p50 {} us, p99 {} us)",
                exec.total, exec.load_us, exec.p50_us, exec.p99_us
            ));
        }
        parts.join(" | ")
    }
}

/// All counters of one pipeline, keyed by (role, slot id).
pub struct PerfRegistry {
    sources: [PortCounter; MAX_SOURCES],
    sinks: [PortCounter; MAX_SINKS],
    exec: ExecCounter,
}

impl Default for PerfRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PerfRegistry {
    pub fn new() -> Self {
        Self {
            sources: Default::default(),
            sinks: Default::default(),
            exec: ExecCounter::default(),
        }
    }

    pub fn source_mut(&mut self, id: SourceId) -> &mut PortCounter {
        &mut self.sources[id.index()]
    }

    pub fn source(&self, id: SourceId) -> &PortCounter {
        &self.sources[id.index()]
    }

    pub fn sink_mut(&mut self, id: SinkId) -> &mut PortCounter {
        &mut self.sinks[id.index()]
    }

    pub fn sink(&self, id: SinkId) -> &PortCounter {
        &self.sinks[id.index()]
    }

    pub fn exec_mut(&mut self) -> &mut ExecCounter {
        &mut self.exec
    }

    pub fn exec(&self) -> &ExecCounter {
        &self.exec
    }

    /// Sample the given units, advancing their snapshots.
    pub fn sample_report(&mut self, units: &[PerfUnit]) -> PerfReport {
        let mut ports = Vec::new();
        let mut exec = None;
        for unit in units {
            match unit {
                PerfUnit::Source(id) => ports.push(PortReport {
                    unit: format!("{}/src", id),
                    delta: self.source_mut(*id).sample(),
                }),
                PerfUnit::Sink(id) => ports.push(PortReport {
                    unit: format!("{}/sink", id),
                    delta: self.sink_mut(*id).sample(),
                }),
                PerfUnit::Exec => exec = Some(self.exec.sample()),
            }
        }
        PerfReport {
            timestamp: chrono::Utc::now(),
            ports,
            exec,
        }
    }
}

/// Periodic printer: samples the configured unit set and logs one summary
/// line per interval.
pub struct PerfReporter {
    interval: Duration,
    units: Vec<PerfUnit>,
    last: Instant,
}

impl PerfReporter {
    /// The interval is clamped up to [`MIN_REPORT_INTERVAL`].
    pub fn new(interval: Duration, units: Vec<PerfUnit>) -> Self {
        let interval = if interval < MIN_REPORT_INTERVAL {
            warn!(
                "perf interval {:?} below minimum, clamping to {:?}",
                interval, MIN_REPORT_INTERVAL
            );
            MIN_REPORT_INTERVAL
        } else {
            interval
        };
        Self {
            interval,
            units,
            last: Instant::now(),
        }
    }

    pub fn units(&self) -> &[PerfUnit] {
        &self.units
    }

    /// Emit a report when the interval has elapsed.
    pub fn tick(&mut self, perf: &mut PerfRegistry) -> Option<PerfReport> {
        if self.last.elapsed() < self.interval {
            return None;
        }
        self.last = Instant::now();
        let report = perf.sample_report(&self.units);
        info!("perf | {}", report.summary());
        Some(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::MavFrame;

    fn frame_with_seq(seq: u8) -> MavFrame {
        MavFrame::new_v1(1, 1, seq, 0, &[0; 9])
    }

    /// drop = (seq - prev_seq - 1) mod 256, including wraparound.
    #[test]
    fn drop_count_follows_sequence_gaps() {
        let mut counter = PortCounter::default();
        counter.record_frame(&frame_with_seq(10));
        assert_eq!(counter.totals().drop_count, 0);

        counter.record_frame(&frame_with_seq(11));
        assert_eq!(counter.totals().drop_count, 0);

        counter.record_frame(&frame_with_seq(14)); // 12, 13 lost
        assert_eq!(counter.totals().drop_count, 2);

        counter.record_frame(&frame_with_seq(255));
        counter.record_frame(&frame_with_seq(1)); // 0 lost across the wrap
        assert_eq!(counter.totals().drop_count, 2 + 240 + 1);
    }

    #[test]
    fn bytes_use_full_wire_length() {
        let mut counter = PortCounter::default();
        let frame = frame_with_seq(0);
        counter.record_frame(&frame);
        assert_eq!(counter.totals().succ_bytes, frame.wire_len() as u64);
        assert_eq!(counter.totals().succ_bytes, 9 + 8);
    }

    /// sample() returns deltas and advances the snapshot.
    #[test]
    fn sample_is_delta_since_last_query() {
        let mut counter = PortCounter::default();
        counter.record_frame(&frame_with_seq(0));
        counter.record_frame(&frame_with_seq(1));

        let first = counter.sample();
        assert_eq!(first.succ_count, 2);

        let quiet = counter.sample();
        assert_eq!(quiet, PortSample::default());

        counter.record_frame(&frame_with_seq(2));
        assert_eq!(counter.sample().succ_count, 1);
    }

    #[test]
    fn exec_counter_tracks_working_pumps_only() {
        let mut exec = ExecCounter::default();
        exec.record_pump(false, Duration::from_micros(500));
        exec.record_pump(true, Duration::from_micros(120));
        exec.record_pump(true, Duration::from_micros(80));

        let s = exec.sample();
        assert_eq!(s.total, 3);
        assert_eq!(s.load_us, 200);
        assert!(s.p50_us >= 80);

        assert_eq!(exec.sample().total, 0);
    }

    #[test]
    fn report_serializes_and_summarizes() {
        let mut perf = PerfRegistry::new();
        perf.source_mut(SourceId::Vmc).record_frame(&frame_with_seq(0));
        perf.exec_mut().record_pump(true, Duration::from_micros(10));

        let report = perf.sample_report(&[
            PerfUnit::Source(SourceId::Vmc),
            PerfUnit::Sink(SinkId::Legacy),
            PerfUnit::Exec,
        ]);
        let line = report.summary();
        assert!(line.contains("vmc/src: 1 msg"));
        assert!(line.contains("legacy/sink: 0 msg"));
        assert!(line.contains("exec: 1 pumps"));

        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"succ_count\":1"));
        assert!(json.contains("\"load_us\":10"));
    }
}
