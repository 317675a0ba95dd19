//! Service metrics.
//!
//! One counter and one histogram per request, labeled by
//! `{op, transport, status}` and `{op, transport}` respectively, plus
//! resource gauges fed by a background sampler. No label ever carries
//! token, key or ciphertext bytes; labels come from a fixed
//! vocabulary only.

use prometheus::{
    Encoder, Gauge, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts,
    Registry, TextEncoder,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct Metrics {
    registry: Registry,
    requests: IntCounterVec,
    latency: HistogramVec,
    clamped: IntCounter,
    keys_loaded: IntGauge,
    cpu_percent: Gauge,
    rss_bytes: IntGauge,
    uptime_seconds: IntGauge,
    started: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let requests = IntCounterVec::new(
            Opts::new("vault_requests_total", "Requests by operation, transport and status"),
            &["op", "transport", "status"],
        )
        .expect("static metric definition");
        let latency = HistogramVec::new(
            HistogramOpts::new("vault_request_duration_seconds", "Request wall-clock duration")
                .buckets(vec![
                    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
                ]),
            &["op", "transport"],
        )
        .expect("static metric definition");
        let clamped = IntCounter::new(
            "vault_topk_clamped_total",
            "Requests whose top_k was silently clamped to k_max",
        )
        .expect("static metric definition");
        let keys_loaded = IntGauge::new(
            "vault_keys_loaded",
            "1 once the key bundle is resident and self-tested",
        )
        .expect("static metric definition");
        let cpu_percent = Gauge::new("vault_process_cpu_percent", "Process CPU utilization")
            .expect("static metric definition");
        let rss_bytes = IntGauge::new("vault_process_rss_bytes", "Resident set size")
            .expect("static metric definition");
        let uptime_seconds = IntGauge::new("vault_uptime_seconds", "Seconds since process start")
            .expect("static metric definition");

        for collector in [
            Box::new(requests.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(latency.clone()),
            Box::new(clamped.clone()),
            Box::new(keys_loaded.clone()),
            Box::new(cpu_percent.clone()),
            Box::new(rss_bytes.clone()),
            Box::new(uptime_seconds.clone()),
        ] {
            registry.register(collector).expect("static metric registration");
        }

        Self {
            registry,
            requests,
            latency,
            clamped,
            keys_loaded,
            cpu_percent,
            rss_bytes,
            uptime_seconds,
            started: Instant::now(),
        }
    }

    pub fn observe_request(&self, op: &str, transport: &str, status: &str, seconds: f64) {
        self.requests.with_label_values(&[op, transport, status]).inc();
        self.latency.with_label_values(&[op, transport]).observe(seconds);
    }

    pub fn record_clamp(&self) {
        self.clamped.inc();
    }

    pub fn set_keys_loaded(&self, loaded: bool) {
        self.keys_loaded.set(if loaded { 1 } else { 0 });
    }

    pub fn keys_loaded(&self) -> bool {
        self.keys_loaded.get() == 1
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started.elapsed().as_secs()
    }

    /// Plain-text exposition for scraping.
    pub fn render(&self) -> String {
        self.uptime_seconds.set(self.started.elapsed().as_secs() as i64);
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        if encoder.encode(&self.registry.gather(), &mut buf).is_err() {
            return String::new();
        }
        String::from_utf8(buf).unwrap_or_default()
    }

    #[cfg(test)]
    fn request_count(&self, op: &str, transport: &str, status: &str) -> u64 {
        self.requests.with_label_values(&[op, transport, status]).get()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Resource sampler
// ---------------------------------------------------------------------------

/// Periodically refresh the CPU/RSS/uptime gauges. On non-Linux hosts
/// only uptime is maintained.
pub fn spawn_resource_sampler(metrics: Arc<Metrics>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(10));
        let mut last: Option<(Instant, f64)> = None;
        loop {
            interval.tick().await;
            metrics
                .uptime_seconds
                .set(metrics.started.elapsed().as_secs() as i64);
            if let Some(rss) = read_rss_bytes() {
                metrics.rss_bytes.set(rss);
            }
            if let Some(cpu) = read_cpu_seconds() {
                let now = Instant::now();
                if let Some((prev_at, prev_cpu)) = last {
                    let wall = now.duration_since(prev_at).as_secs_f64();
                    if wall > 0.0 {
                        metrics.cpu_percent.set(100.0 * (cpu - prev_cpu) / wall);
                    }
                }
                last = Some((now, cpu));
            }
        }
    })
}

#[cfg(target_os = "linux")]
fn read_rss_bytes() -> Option<i64> {
    let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
    let pages: i64 = statm.split_whitespace().nth(1)?.parse().ok()?;
    Some(pages * 4096)
}

#[cfg(not(target_os = "linux"))]
fn read_rss_bytes() -> Option<i64> {
    None
}

#[cfg(target_os = "linux")]
fn read_cpu_seconds() -> Option<f64> {
    let stat = std::fs::read_to_string("/proc/self/stat").ok()?;
    // Fields 14 and 15 (utime, stime) count in clock ticks; the comm
    // field may contain spaces, so skip past the closing paren first.
    let after_comm = stat.rsplit_once(')')?.1;
    let mut fields = after_comm.split_whitespace();
    let utime: f64 = fields.nth(11)?.parse().ok()?;
    let stime: f64 = fields.next()?.parse().ok()?;
    Some((utime + stime) / 100.0)
}

#[cfg(not(target_os = "linux"))]
fn read_cpu_seconds() -> Option<f64> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_counter_and_histogram_record() {
        let metrics = Metrics::new();
        metrics.observe_request("decrypt_scores", "rpc", "ok", 0.012);
        metrics.observe_request("decrypt_scores", "rpc", "ok", 0.020);
        metrics.observe_request("decrypt_scores", "tool", "unauthorized", 0.001);
        assert_eq!(metrics.request_count("decrypt_scores", "rpc", "ok"), 2);
        assert_eq!(metrics.request_count("decrypt_scores", "tool", "unauthorized"), 1);
    }

    #[test]
    fn exposition_contains_the_registered_families() {
        let metrics = Metrics::new();
        metrics.observe_request("get_public_key", "rpc", "ok", 0.002);
        metrics.set_keys_loaded(true);
        let text = metrics.render();
        assert!(text.contains("vault_requests_total"));
        assert!(text.contains("vault_request_duration_seconds"));
        assert!(text.contains("vault_keys_loaded 1"));
        assert!(text.contains("vault_uptime_seconds"));
    }

    #[test]
    fn clamp_counter_increments() {
        let metrics = Metrics::new();
        metrics.record_clamp();
        metrics.record_clamp();
        assert!(metrics.render().contains("vault_topk_clamped_total 2"));
    }
}
