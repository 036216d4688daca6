//! Per-node profiling sessions
//!
//! A session samples process counters from `/proc/self` at a fixed rate until
//! its report is taken. Reports from every node are bundled into one zip
//! archive by [`bundle_reports`].

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::io::{Cursor, Write};
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use zip::write::SimpleFileOptions;

const SAMPLE_INTERVAL: Duration = Duration::from_millis(250);

/// One hour of samples; older ones are dropped
const MAX_SAMPLES: usize = 4 * 60 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfilerKind {
    Cpu,
    Mem,
    Block,
    Mutex,
    Trace,
}

impl fmt::Display for ProfilerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProfilerKind::Cpu => "cpu",
            ProfilerKind::Mem => "mem",
            ProfilerKind::Block => "block",
            ProfilerKind::Mutex => "mutex",
            ProfilerKind::Trace => "trace",
        };
        f.write_str(s)
    }
}

impl FromStr for ProfilerKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "cpu" => Ok(ProfilerKind::Cpu),
            "mem" => Ok(ProfilerKind::Mem),
            "block" => Ok(ProfilerKind::Block),
            "mutex" => Ok(ProfilerKind::Mutex),
            "trace" => Ok(ProfilerKind::Trace),
            other => anyhow::bail!("unknown profiler type: {other}"),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct Sample {
    elapsed_ms: u128,
    rss_kb: Option<u64>,
    threads: Option<u64>,
    cpu_ticks: Option<u64>,
}

/// Ring of the most recent samples
#[derive(Debug)]
struct SampleBuffer {
    samples: VecDeque<Sample>,
    capacity: usize,
    dropped: u64,
}

impl SampleBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::new(),
            capacity,
            dropped: 0,
        }
    }

    fn push(&mut self, sample: Sample) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
            self.dropped += 1;
        }
        self.samples.push_back(sample);
    }
}

struct Session {
    kind: ProfilerKind,
    started_at: DateTime<Utc>,
    samples: Arc<Mutex<SampleBuffer>>,
    sampler: JoinHandle<()>,
}

/// The profiling state of this node
#[derive(Default)]
pub struct Profiler {
    session: Mutex<Option<Session>>,
}

impl Profiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a session, replacing any running one
    pub fn start(&self, kind: ProfilerKind) {
        let samples = Arc::new(Mutex::new(SampleBuffer::new(MAX_SAMPLES)));
        let sampler = tokio::spawn(sample_loop(samples.clone()));
        let previous = self.session.lock().replace(Session {
            kind,
            started_at: Utc::now(),
            samples,
            sampler,
        });
        if let Some(previous) = previous {
            previous.sampler.abort();
        }
        tracing::info!(profiler = %kind, "profiling started");
    }

    pub fn is_running(&self) -> bool {
        self.session.lock().is_some()
    }

    /// End the session and render its report; `None` when not profiling
    pub fn take_report(&self) -> Option<Vec<u8>> {
        let session = self.session.lock().take()?;
        session.sampler.abort();
        let buffer = session.samples.lock();
        Some(render_report(session.kind, session.started_at, &buffer))
    }
}

async fn sample_loop(samples: Arc<Mutex<SampleBuffer>>) {
    let start = Instant::now();
    let mut ticker = tokio::time::interval(SAMPLE_INTERVAL);
    loop {
        ticker.tick().await;
        let mut sample = read_self_status();
        sample.elapsed_ms = start.elapsed().as_millis();
        samples.lock().push(sample);
    }
}

fn read_self_status() -> Sample {
    let mut sample = Sample::default();
    if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
        for line in status.lines() {
            let value = |prefix: &str| {
                line.strip_prefix(prefix)
                    .and_then(|rest| rest.split_whitespace().next())
                    .and_then(|v| v.parse::<u64>().ok())
            };
            if let Some(rss) = value("VmRSS:") {
                sample.rss_kb = Some(rss);
            } else if let Some(threads) = value("Threads:") {
                sample.threads = Some(threads);
            }
        }
    }
    if let Ok(stat) = std::fs::read_to_string("/proc/self/stat") {
        // utime and stime follow the parenthesised command name
        if let Some((_, rest)) = stat.rsplit_once(')') {
            let fields: Vec<&str> = rest.split_whitespace().collect();
            let ticks = |i: usize| fields.get(i).and_then(|v| v.parse::<u64>().ok());
            if let (Some(utime), Some(stime)) = (ticks(11), ticks(12)) {
                sample.cpu_ticks = Some(utime + stime);
            }
        }
    }
    sample
}

fn render_report(kind: ProfilerKind, started_at: DateTime<Utc>, buffer: &SampleBuffer) -> Vec<u8> {
    let opt = |v: Option<u64>| v.map(|v| v.to_string()).unwrap_or_default();
    let mut out = format!(
        "# profiler: {kind}\n# started: {}\n# samples: {}\n# dropped: {}\nelapsed_ms,rss_kb,threads,cpu_ticks\n",
        started_at.to_rfc3339(),
        buffer.samples.len(),
        buffer.dropped
    );
    for s in &buffer.samples {
        out.push_str(&format!(
            "{},{},{},{}\n",
            s.elapsed_ms,
            opt(s.rss_kb),
            opt(s.threads),
            opt(s.cpu_ticks)
        ));
    }
    out.into_bytes()
}

/// Zip one report per host into a single archive
pub fn bundle_reports<'a>(reports: impl IntoIterator<Item = (&'a str, &'a [u8])>) -> Result<Vec<u8>> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    for (host, data) in reports {
        let name = format!("profiling-{}.txt", host.replace(':', "_"));
        writer
            .start_file(name.as_str(), options)
            .with_context(|| format!("Failed to add {name} to archive"))?;
        writer.write_all(data)?;
    }

    let cursor = writer.finish().context("Failed to finish profiling archive")?;
    Ok(cursor.into_inner())
}
