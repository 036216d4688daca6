//! Node statistics: HTTP accounting plus CPU and memory readings
//!
//! CPU and memory figures come from `/proc`; on platforms without it the
//! readers return an error, which peers report like any other failure.

use anyhow::{bail, Context, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodStats {
    pub total: u64,
    pub success: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnStats {
    pub total_input_bytes: u64,
    pub total_output_bytes: u64,
}

/// Per-method request counters and connection byte totals
#[derive(Debug, Default)]
pub struct HttpStats {
    methods: Mutex<BTreeMap<String, MethodStats>>,
    input_bytes: AtomicU64,
    output_bytes: AtomicU64,
}

impl HttpStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, method: &str, success: bool, input_bytes: u64, output_bytes: u64) {
        {
            let mut methods = self.methods.lock();
            let entry = methods.entry(method.to_string()).or_default();
            entry.total += 1;
            if success {
                entry.success += 1;
            }
        }
        self.input_bytes.fetch_add(input_bytes, Ordering::Relaxed);
        self.output_bytes.fetch_add(output_bytes, Ordering::Relaxed);
    }

    pub fn methods(&self) -> BTreeMap<String, MethodStats> {
        self.methods.lock().clone()
    }

    pub fn conn_stats(&self) -> ConnStats {
        ConnStats {
            total_input_bytes: self.input_bytes.load(Ordering::Relaxed),
            total_output_bytes: self.output_bytes.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CpuLoad {
    pub avg1: f64,
    pub avg5: f64,
    pub avg15: f64,
    pub cpus: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemUsage {
    pub total: u64,
    pub available: u64,
    pub used: u64,
}

pub fn cpu_load() -> Result<CpuLoad> {
    let content = std::fs::read_to_string("/proc/loadavg").context("Failed to read /proc/loadavg")?;
    parse_loadavg(&content, num_cpus::get())
}

pub fn mem_usage() -> Result<MemUsage> {
    let content = std::fs::read_to_string("/proc/meminfo").context("Failed to read /proc/meminfo")?;
    parse_meminfo(&content)
}

fn parse_loadavg(content: &str, cpus: usize) -> Result<CpuLoad> {
    let fields: Vec<f64> = content
        .split_whitespace()
        .take(3)
        .map(|f| f.parse::<f64>())
        .collect::<Result<_, _>>()
        .context("Malformed load average")?;
    if fields.len() != 3 {
        bail!("Malformed load average: {content:?}");
    }
    Ok(CpuLoad {
        avg1: fields[0],
        avg5: fields[1],
        avg15: fields[2],
        cpus,
    })
}

fn parse_meminfo(content: &str) -> Result<MemUsage> {
    let field = |name: &str| -> Option<u64> {
        content
            .lines()
            .find_map(|line| line.strip_prefix(name))
            .and_then(|rest| rest.trim_start_matches(':').split_whitespace().next())
            .and_then(|kb| kb.parse::<u64>().ok())
            .map(|kb| kb * 1024)
    };

    let total = field("MemTotal").context("MemTotal missing from meminfo")?;
    let available = field("MemAvailable")
        .or_else(|| field("MemFree"))
        .context("MemAvailable missing from meminfo")?;
    Ok(MemUsage {
        total,
        available,
        used: total.saturating_sub(available),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_stats() {
        let stats = HttpStats::new();
        stats.record("GET", true, 10, 200);
        stats.record("GET", false, 5, 50);
        stats.record("POST", true, 100, 0);

        let methods = stats.methods();
        assert_eq!(methods["GET"], MethodStats { total: 2, success: 1 });
        assert_eq!(methods["POST"].total, 1);
        assert_eq!(stats.conn_stats().total_input_bytes, 115);
        assert_eq!(stats.conn_stats().total_output_bytes, 250);
    }

    #[test]
    fn test_parse_loadavg() {
        let load = parse_loadavg("0.52 0.58 0.59 1/467 12345\n", 8).unwrap();
        assert_eq!(load.avg1, 0.52);
        assert_eq!(load.avg15, 0.59);
        assert_eq!(load.cpus, 8);
        assert!(parse_loadavg("garbage", 1).is_err());
    }

    #[test]
    fn test_parse_meminfo() {
        let content = "MemTotal:       16000000 kB\nMemFree:         2000000 kB\nMemAvailable:    8000000 kB\n";
        let mem = parse_meminfo(content).unwrap();
        assert_eq!(mem.total, 16_000_000 * 1024);
        assert_eq!(mem.used, 8_000_000 * 1024);
        assert!(parse_meminfo("nothing here").is_err());
    }
}
