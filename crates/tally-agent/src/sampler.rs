//! Gauge sampling.
//!
//! The runtime gauge names follow the historical memory-statistics layout
//! the server's dashboards expect. Heap figures come from [`crate::alloc`];
//! process and system figures from `sysinfo`. Fields with no counterpart in
//! a runtime without a garbage collector are reported as 0.

use rand::Rng;
use sysinfo::{Pid, ProcessesToUpdate, System};

use tally_core::Metric;

use crate::alloc;

/// Runtime gauges with no meaningful value outside a GC runtime.
const ZERO_GAUGES: &[&str] = &[
    "BuckHashSys",
    "GCCPUFraction",
    "GCSys",
    "HeapReleased",
    "LastGC",
    "Lookups",
    "MCacheInuse",
    "MCacheSys",
    "MSpanInuse",
    "MSpanSys",
    "NextGC",
    "NumForcedGC",
    "NumGC",
    "PauseTotalNs",
    "StackInuse",
    "StackSys",
];

pub const POLL_COUNT: &str = "PollCount";
pub const RANDOM_VALUE: &str = "RandomValue";

pub struct Sampler {
    sys: System,
    pid: Pid,
}

impl Default for Sampler {
    fn default() -> Self {
        Self::new()
    }
}

impl Sampler {
    pub fn new() -> Self {
        let pid = Pid::from_u32(std::process::id());
        let mut sys = System::new();
        sys.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        // CPU usage is a delta between two refreshes; prime the first one.
        sys.refresh_cpu_usage();
        Self { sys, pid }
    }

    /// One full poll: runtime gauges, `RandomValue`, system gauges, and a
    /// `PollCount` increment of 1.
    pub fn sample(&mut self) -> Vec<Metric> {
        let mut batch = self.runtime();
        batch.push(Metric::gauge(
            RANDOM_VALUE,
            rand::thread_rng().gen_range(0.0..100.0),
        ));
        batch.extend(self.system());
        batch.push(Metric::counter(POLL_COUNT, 1));
        batch
    }

    /// Heap and process memory gauges.
    pub fn runtime(&mut self) -> Vec<Metric> {
        self.sys
            .refresh_processes(ProcessesToUpdate::Some(&[self.pid]), true);
        let (resident, virtual_size) = self
            .sys
            .process(self.pid)
            .map(|p| (p.memory(), p.virtual_memory()))
            .unwrap_or_default();
        let heap = alloc::stats();

        let mut gauges = vec![
            Metric::gauge("Alloc", heap.live_bytes as f64),
            Metric::gauge("HeapAlloc", heap.live_bytes as f64),
            Metric::gauge("HeapInuse", heap.live_bytes as f64),
            Metric::gauge("TotalAlloc", heap.total_bytes as f64),
            Metric::gauge("Mallocs", heap.mallocs as f64),
            Metric::gauge("Frees", heap.frees as f64),
            Metric::gauge("HeapObjects", heap.live_objects() as f64),
            Metric::gauge("Sys", virtual_size as f64),
            Metric::gauge("HeapSys", resident as f64),
            Metric::gauge(
                "HeapIdle",
                resident.saturating_sub(heap.live_bytes) as f64,
            ),
            Metric::gauge("OtherSys", virtual_size.saturating_sub(resident) as f64),
        ];
        gauges.extend(ZERO_GAUGES.iter().map(|name| Metric::gauge(*name, 0.0)));
        gauges
    }

    /// `TotalMemory`, `FreeMemory`, and `CPUutilization<N>` per logical CPU.
    pub fn system(&mut self) -> Vec<Metric> {
        self.sys.refresh_memory();
        self.sys.refresh_cpu_usage();

        let mut gauges = vec![
            Metric::gauge("TotalMemory", self.sys.total_memory() as f64),
            Metric::gauge("FreeMemory", self.sys.free_memory() as f64),
        ];
        gauges.extend(self.sys.cpus().iter().enumerate().map(|(i, cpu)| {
            Metric::gauge(format!("CPUutilization{}", i + 1), finite(cpu.cpu_usage()))
        }));
        gauges
    }
}

/// The server rejects non-finite gauges; the first CPU reading can be NaN.
fn finite(v: f32) -> f64 {
    let v = f64::from(v);
    if v.is_finite() { v } else { 0.0 }
}
