//! Prometheus text exposition format.
//!
//! Metric names are unprefixed and every metric is a gauge; existing
//! scrapers and dashboards depend on both.

use crate::sampler::DeviceMetrics;

fn gauge(out: &mut String, name: &str, help: &str, value: impl std::fmt::Display) {
    out.push_str(&format!("# HELP {name} {help}\n"));
    out.push_str(&format!("# TYPE {name} gauge\n"));
    out.push_str(&format!("{name} {value}\n\n"));
}

/// Render one metrics sample into Prometheus text format.
pub fn render_prometheus(m: &DeviceMetrics) -> String {
    let mut out = String::new();

    gauge(&mut out, "cpu_usage", "CPU load reported by dumpsys cpuinfo", m.cpu_usage);
    gauge(&mut out, "mem_total", "Total memory", m.mem.total);
    gauge(&mut out, "mem_used", "Used memory", m.mem.used);
    gauge(&mut out, "mem_free", "Free memory", m.mem.free);
    gauge(&mut out, "disk_used", "Used blocks on the target volume", m.disk.used);
    gauge(
        &mut out,
        "disk_available",
        "Available blocks on the target volume",
        m.disk.available,
    );
    gauge(
        &mut out,
        "disk_usage_percent",
        "Target volume occupancy in percent",
        m.disk_usage_percent,
    );
    gauge(&mut out, "pending_count", "Pending rows in the media database", m.pending_count);
    gauge(
        &mut out,
        "externaldb_image_count",
        "Image rows in the media database",
        m.externaldb_image_count,
    );
    gauge(
        &mut out,
        "external_db_size",
        "Media database size in bytes",
        m.external_db_size,
    );
    gauge(
        &mut out,
        "external_db_fragmentation",
        "Extents backing the media database file",
        m.external_db_fragmentation,
    );
    gauge(
        &mut out,
        "fs_image_count",
        "Images copied into DCIM batch directories",
        m.fs_image_count,
    );

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sampler::MemoryUsage;
    use fragbench_core::StorageUsage;

    fn sample() -> DeviceMetrics {
        DeviceMetrics {
            cpu_usage: 7.06,
            mem: MemoryUsage {
                total: 5_869_150_208,
                used: 5_518_721_024,
                free: 350_429_184,
                shared: 0,
                buffers: 0,
            },
            disk: StorageUsage {
                used: 57_624_618,
                available: 57_624_618,
            },
            disk_usage_percent: 50.0,
            pending_count: 3,
            externaldb_image_count: 1200,
            external_db_size: 4_194_304,
            external_db_fragmentation: 57,
            fs_image_count: 1200,
        }
    }

    #[test]
    fn every_metric_is_a_gauge_triple() {
        let output = render_prometheus(&sample());
        for name in [
            "cpu_usage",
            "mem_total",
            "mem_used",
            "mem_free",
            "disk_used",
            "disk_available",
            "disk_usage_percent",
            "pending_count",
            "externaldb_image_count",
            "external_db_size",
            "external_db_fragmentation",
            "fs_image_count",
        ] {
            assert!(output.contains(&format!("# HELP {name} ")), "help for {name}");
            assert!(output.contains(&format!("# TYPE {name} gauge\n")), "type for {name}");
            assert!(
                output.lines().any(|l| l.starts_with(&format!("{name} "))),
                "value for {name}"
            );
        }
    }

    #[test]
    fn values_render_plainly() {
        let output = render_prometheus(&sample());
        assert!(output.contains("cpu_usage 7.06\n"));
        assert!(output.contains("mem_total 5869150208\n"));
        assert!(output.contains("disk_usage_percent 50\n"));
        assert!(output.contains("external_db_fragmentation 57\n"));
    }

    #[test]
    fn sample_lines_have_no_labels() {
        let output = render_prometheus(&sample());
        for line in output.lines() {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            assert!(!line.contains('{'), "unexpected labels: {line}");
            assert_eq!(line.split(' ').count(), 2, "malformed sample: {line}");
        }
    }
}
