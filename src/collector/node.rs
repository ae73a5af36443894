//! Host collectors.
//!
//! Sources operational statistics from kernel pseudo-files (`/proc`) and,
//! for filesystems, from sysinfo. Dispatched by descriptor name; each
//! collector follows the same contract as the SQL ones: emit points in
//! iteration order, skip unparsable values with a debug log, never sleep.

use std::sync::OnceLock;

use regex::Regex;
use sysinfo::Disks;

use super::CollectError;
use crate::metrics::{DescHandle, MetricKind, Sink};
use crate::registry::Descriptor;

/// Kernel clock ticks per second; /proc/stat counters are expressed in these.
const USER_HZ: f64 = 100.0;

/// CPU modes in /proc/stat column order.
const CPU_MODES: [&str; 10] = [
    "user", "nice", "system", "idle", "iowait", "irq", "softirq", "steal", "guest", "guest_nice",
];

/// Raw block devices, including device-mapper and mdraid, excluding partitions.
fn block_device_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(((s|xv|v)d[a-z]+)|(nvme[0-9]+n[0-9]+)|(dm-[0-9]+)|(md[0-9]+))$")
            .expect("block device regex must compile")
    })
}

/// Kernel tunables exposed by the `node_settings` descriptor.
///
/// Entries missing on a given kernel (e.g. `sched_migration_cost_ns` on
/// newer kernels, `numa_balancing` on single-node machines) are skipped
/// with a debug log.
const SYSCTLS: [&str; 12] = [
    "kernel.sched_migration_cost_ns",
    "kernel.sched_autogroup_enabled",
    "kernel.numa_balancing",
    "vm.dirty_background_bytes",
    "vm.dirty_bytes",
    "vm.overcommit_memory",
    "vm.overcommit_ratio",
    "vm.swappiness",
    "vm.min_free_kbytes",
    "vm.zone_reclaim_mode",
    "vm.nr_hugepages",
    "vm.nr_overcommit_hugepages",
];

/// Run the host collector matching `desc.name`.
pub async fn collect(desc: &Descriptor, sink: &Sink) -> Result<(), CollectError> {
    match desc.name {
        "node_cpu" => collect_cpu(desc, sink).await,
        "node_memory" => collect_memory(desc, sink).await,
        "node_disk" => collect_disk(desc, sink).await,
        "node_network" => collect_network(desc, sink).await,
        "node_filesystem" => collect_filesystem(desc, sink).await,
        "node_uptime_seconds" => collect_uptime(desc, sink).await,
        "node_settings" => collect_sysctl(desc, sink).await,
        "node_hardware_cores" => collect_cpu_cores(desc, sink).await,
        "node_hardware_scaling_governors" => collect_scaling_governors(desc, sink).await,
        "node_hardware_numa" => collect_numa_nodes(desc, sink).await,
        "node_hardware_storage_rotational" => collect_storage_rotational(desc, sink).await,
        other => Err(CollectError::Probe(format!("no host probe named {other}"))),
    }
}

fn read_proc(path: &str) -> Result<String, CollectError> {
    std::fs::read_to_string(path).map_err(|e| CollectError::Probe(format!("read {path}: {e}")))
}

fn allowed(desc: &Descriptor, label_values: &[String]) -> bool {
    match &desc.filters {
        Some(f) => f.allows(desc.label_columns, label_values),
        None => true,
    }
}

async fn collect_cpu(desc: &Descriptor, sink: &Sink) -> Result<(), CollectError> {
    let content = read_proc("/proc/stat")?;
    for (mode, ticks) in parse_cpu_totals(&content) {
        let labels = vec![mode.to_string()];
        if !allowed(desc, &labels) {
            continue;
        }
        sink.send(&desc.handles[0], labels, ticks / USER_HZ).await?;
    }
    Ok(())
}

/// `(mode, ticks)` pairs from the aggregate `cpu` line of /proc/stat.
fn parse_cpu_totals(content: &str) -> Vec<(&'static str, f64)> {
    let Some(line) = content.lines().find(|l| l.starts_with("cpu ")) else {
        return Vec::new();
    };
    line.split_whitespace()
        .skip(1)
        .zip(CPU_MODES)
        .filter_map(|(raw, mode)| raw.parse::<f64>().ok().map(|v| (mode, v)))
        .collect()
}

async fn collect_memory(desc: &Descriptor, sink: &Sink) -> Result<(), CollectError> {
    let content = read_proc("/proc/meminfo")?;
    for (field, value, in_bytes) in parse_meminfo(&content) {
        // Field names become part of the metric name, so handles are built
        // per collection here instead of at registry time.
        let metric_name = if in_bytes {
            format!("{}_{}_bytes", desc.name, field)
        } else {
            format!("{}_{}", desc.name, field)
        };
        let handle = DescHandle::new(
            &metric_name,
            format!("Memory information field {field}."),
            MetricKind::Gauge,
            &[],
        );
        sink.send(&handle, vec![], value).await?;
    }
    Ok(())
}

/// `(field, value, scaled_to_bytes)` triples from /proc/meminfo content.
///
/// `kB` quantities are scaled to bytes; unit-less fields (HugePages counts)
/// are passed through. Parenthesized suffixes fold into the field name.
fn parse_meminfo(content: &str) -> Vec<(String, f64, bool)> {
    let mut stats = Vec::new();
    for line in content.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 2 || parts.len() > 3 {
            continue;
        }
        let field = parts[0]
            .trim_end_matches(':')
            .replace('(', "_")
            .replace(')', "");
        let Ok(mut value) = parts[1].parse::<f64>() else {
            tracing::debug!(line, "unparsable meminfo value");
            continue;
        };
        let in_bytes = parts.len() == 3 && parts[2] == "kB";
        if in_bytes {
            value *= 1024.0;
        }
        stats.push((field, value, in_bytes));
    }
    stats
}

async fn collect_disk(desc: &Descriptor, sink: &Sink) -> Result<(), CollectError> {
    let content = read_proc("/proc/diskstats")?;
    for (device, values) in parse_diskstats(&content) {
        let labels = vec![device];
        if !allowed(desc, &labels) {
            continue;
        }
        for (i, value) in values.into_iter().enumerate() {
            sink.send(&desc.handles[i], labels.clone(), value).await?;
        }
    }
    Ok(())
}

/// Per-device counters from /proc/diskstats, aligned with the registry's
/// value columns: reads/writes completed and merged, bytes, time, io time.
///
/// Devices that never completed an IO are skipped, as are partitions.
fn parse_diskstats(content: &str) -> Vec<(String, [f64; 9])> {
    let mut out = Vec::new();
    for line in content.lines() {
        let f: Vec<&str> = line.split_whitespace().collect();
        if f.len() < 14 {
            continue;
        }
        let device = f[2];
        if !block_device_regex().is_match(device) {
            continue;
        }
        let num = |i: usize| f[i].parse::<f64>().unwrap_or(0.0);
        let (reads, writes) = (num(3), num(7));
        if reads == 0.0 && writes == 0.0 {
            continue;
        }
        out.push((
            device.to_string(),
            [
                reads,
                num(4),
                num(5) * 512.0,
                num(6) / 1000.0,
                writes,
                num(8),
                num(9) * 512.0,
                num(10) / 1000.0,
                num(12) / 1000.0,
            ],
        ));
    }
    out
}

async fn collect_network(desc: &Descriptor, sink: &Sink) -> Result<(), CollectError> {
    let content = read_proc("/proc/net/dev")?;
    for (device, values) in parse_netdev(&content) {
        let labels = vec![device];
        if !allowed(desc, &labels) {
            continue;
        }
        for (i, value) in values.into_iter().enumerate() {
            sink.send(&desc.handles[i], labels.clone(), value).await?;
        }
    }
    Ok(())
}

/// Per-interface counters from /proc/net/dev: receive and transmit bytes,
/// packets, errors, drops. Interfaces that never saw a packet are skipped.
fn parse_netdev(content: &str) -> Vec<(String, [f64; 8])> {
    let mut out = Vec::new();
    for line in content.lines().skip(2) {
        let Some((iface, counters)) = line.split_once(':') else {
            continue;
        };
        let f: Vec<f64> = counters
            .split_whitespace()
            .map(|v| v.parse().unwrap_or(0.0))
            .collect();
        if f.len() < 12 {
            continue;
        }
        if f[1] == 0.0 && f[9] == 0.0 {
            continue;
        }
        out.push((
            iface.trim().to_string(),
            [f[0], f[1], f[2], f[3], f[8], f[9], f[10], f[11]],
        ));
    }
    out
}

async fn collect_filesystem(desc: &Descriptor, sink: &Sink) -> Result<(), CollectError> {
    let disks = Disks::new_with_refreshed_list();
    for disk in disks.list() {
        let labels = vec![
            disk.name().to_string_lossy().into_owned(),
            disk.mount_point().to_string_lossy().into_owned(),
            disk.file_system().to_string_lossy().into_owned(),
        ];
        if !allowed(desc, &labels) {
            continue;
        }
        let size = disk.total_space() as f64;
        let avail = disk.available_space() as f64;
        sink.send(&desc.handles[0], labels.clone(), size).await?;
        sink.send(&desc.handles[1], labels, avail).await?;
    }
    Ok(())
}

async fn collect_uptime(desc: &Descriptor, sink: &Sink) -> Result<(), CollectError> {
    let content = read_proc("/proc/uptime")?;
    let uptime = content
        .split_whitespace()
        .next()
        .and_then(|v| v.parse::<f64>().ok())
        .ok_or_else(|| CollectError::Probe("unparsable /proc/uptime".into()))?;
    sink.send(&desc.handles[0], vec![], uptime).await?;
    Ok(())
}

async fn collect_sysctl(desc: &Descriptor, sink: &Sink) -> Result<(), CollectError> {
    for name in SYSCTLS {
        let path = format!("/proc/sys/{}", name.replace('.', "/"));
        let Ok(content) = std::fs::read_to_string(&path) else {
            tracing::debug!(sysctl = name, "sysctl not readable");
            continue;
        };
        let Some(value) = content.split_whitespace().next().and_then(|v| v.parse::<f64>().ok())
        else {
            tracing::debug!(sysctl = name, "non-numeric sysctl");
            continue;
        };
        sink.send(&desc.handles[0], vec![name.to_string()], value)
            .await?;
    }
    Ok(())
}

async fn collect_cpu_cores(desc: &Descriptor, sink: &Sink) -> Result<(), CollectError> {
    let online = count_cpu_list("/sys/devices/system/cpu/online");
    let offline = count_cpu_list("/sys/devices/system/cpu/offline");
    for (state, count) in [
        ("all", online + offline),
        ("online", online),
        ("offline", offline),
    ] {
        sink.send(&desc.handles[0], vec![state.to_string()], count as f64)
            .await?;
    }
    Ok(())
}

fn count_cpu_list(path: &str) -> usize {
    std::fs::read_to_string(path)
        .map(|content| parse_range_list(content.trim()))
        .unwrap_or(0)
}

/// Number of CPUs in a kernel range list such as `0-3,5,7-8`.
fn parse_range_list(list: &str) -> usize {
    if list.is_empty() {
        return 0;
    }
    list.split(',')
        .filter_map(|part| {
            let part = part.trim();
            match part.split_once('-') {
                Some((lo, hi)) => {
                    let lo: usize = lo.parse().ok()?;
                    let hi: usize = hi.parse().ok()?;
                    (hi >= lo).then_some(hi - lo + 1)
                }
                None => part.parse::<usize>().ok().map(|_| 1),
            }
        })
        .sum()
}

async fn collect_scaling_governors(desc: &Descriptor, sink: &Sink) -> Result<(), CollectError> {
    let mut counts: std::collections::BTreeMap<String, usize> = std::collections::BTreeMap::new();
    let entries = std::fs::read_dir("/sys/devices/system/cpu")
        .map_err(|e| CollectError::Probe(format!("read cpu sysfs: {e}")))?;

    for entry in entries.flatten() {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if !name.starts_with("cpu") || !name[3..].chars().all(|c| c.is_ascii_digit()) {
            continue;
        }
        let governor_path = entry.path().join("cpufreq/scaling_governor");
        if let Ok(governor) = std::fs::read_to_string(governor_path) {
            *counts.entry(governor.trim().to_string()).or_insert(0) += 1;
        }
    }

    if counts.is_empty() {
        sink.send(&desc.handles[0], vec!["disabled".to_string()], 0.0)
            .await?;
        return Ok(());
    }
    for (governor, count) in counts {
        sink.send(&desc.handles[0], vec![governor], count as f64)
            .await?;
    }
    Ok(())
}

async fn collect_numa_nodes(desc: &Descriptor, sink: &Sink) -> Result<(), CollectError> {
    let entries = std::fs::read_dir("/sys/devices/system/node")
        .map_err(|e| CollectError::Probe(format!("read node sysfs: {e}")))?;
    let nodes = entries
        .flatten()
        .filter(|entry| {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            name.starts_with("node") && name[4..].chars().all(|c| c.is_ascii_digit())
        })
        .count();
    sink.send(&desc.handles[0], vec![], nodes as f64).await?;
    Ok(())
}

async fn collect_storage_rotational(desc: &Descriptor, sink: &Sink) -> Result<(), CollectError> {
    let entries = std::fs::read_dir("/sys/block")
        .map_err(|e| CollectError::Probe(format!("read block sysfs: {e}")))?;

    for entry in entries.flatten() {
        let device = entry.file_name().to_string_lossy().into_owned();
        if !block_device_regex().is_match(&device) {
            continue;
        }
        let Ok(rotational) = std::fs::read_to_string(entry.path().join("queue/rotational"))
        else {
            tracing::debug!(device, "rotational flag not readable");
            continue;
        };
        let Some(rotational) = rotational.split_whitespace().next().and_then(|v| v.parse::<f64>().ok())
        else {
            continue;
        };
        let scheduler = std::fs::read_to_string(entry.path().join("queue/scheduler"))
            .map(|content| current_scheduler(&content))
            .unwrap_or_default();

        let labels = vec![device, scheduler];
        if !allowed(desc, &labels) {
            continue;
        }
        sink.send(&desc.handles[0], labels, rotational).await?;
    }
    Ok(())
}

/// The active entry of a queue/scheduler listing, e.g.
/// `noop [mq-deadline] kyber` yields `mq-deadline`.
fn current_scheduler(content: &str) -> String {
    content
        .split_whitespace()
        .find_map(|entry| {
            entry
                .strip_prefix('[')
                .and_then(|entry| entry.strip_suffix(']'))
        })
        .unwrap_or_else(|| content.split_whitespace().next().unwrap_or(""))
        .to_string()
}
