//! NVR-level metrics: identity, uptime, device counts and storage.

use std::sync::Arc;

use async_trait::async_trait;
use prometheus::GaugeVec;

use crate::metrics::names::{self, label_or_unknown, labels};
use crate::metrics::{InfoVec, MetricRegistry, MetricSpec, MetricsError};
use crate::upstream::UpstreamGate;
use crate::upstream::types::{Nvr, StorageDevice};

use super::error::CollectorError;
use super::traits::{Collector, CollectorContext, CollectorDescriptor, CollectorFactory, Tier};

pub const DESCRIPTOR: CollectorDescriptor = CollectorDescriptor {
    name: "system",
    description: "Collects system-level metrics from the UniFi Protect NVR",
    tier: Tier::Slow,
};

/// Storage path label used when a device reports none.
const ROOT_PATH: &str = "/";

const NVR_LABELS: &[&str] = &[labels::NVR_ID, labels::NVR_NAME];
const STORAGE_LABELS: &[&str] = &[
    labels::NVR_ID,
    labels::NVR_NAME,
    labels::STORAGE_TYPE,
    labels::STORAGE_PATH,
];

pub fn factory() -> CollectorFactory {
    CollectorFactory::new(DESCRIPTOR, |ctx: &CollectorContext| {
        let collector: Arc<dyn Collector> =
            Arc::new(SystemCollector::new(Arc::clone(&ctx.gate), &ctx.metrics)?);
        Ok(collector)
    })
}

/// System collector.
pub struct SystemCollector {
    gate: Arc<UpstreamGate>,
    system_info: InfoVec,
    nvr_uptime: GaugeVec,
    camera_count: GaugeVec,
    sensor_count: GaugeVec,
    storage_used: GaugeVec,
    storage_total: GaugeVec,
    storage_percentage: GaugeVec,
}

impl SystemCollector {
    pub fn new(gate: Arc<UpstreamGate>, metrics: &MetricRegistry) -> Result<Self, MetricsError> {
        Ok(Self {
            gate,
            system_info: metrics.info(
                MetricSpec::new(names::SYSTEM_INFO, "UniFi Protect system information").labels(&[
                    labels::NVR_ID,
                    labels::NVR_NAME,
                    labels::NVR_VERSION,
                    labels::HOST,
                    labels::PLATFORM,
                    labels::FIRMWARE_VERSION,
                ]),
            )?,
            nvr_uptime: metrics.gauge(
                MetricSpec::new(names::NVR_UPTIME_SECONDS, "NVR uptime in seconds")
                    .labels(NVR_LABELS)
                    .unit("seconds"),
            )?,
            camera_count: metrics.gauge(
                MetricSpec::new(names::CAMERA_COUNT, "Total number of cameras in the system")
                    .labels(NVR_LABELS)
                    .unit("cameras"),
            )?,
            sensor_count: metrics.gauge(
                MetricSpec::new(names::SENSOR_COUNT, "Total number of sensors in the system")
                    .labels(NVR_LABELS)
                    .unit("sensors"),
            )?,
            storage_used: metrics.gauge(
                MetricSpec::new(names::STORAGE_USED_BYTES, "Storage space used in bytes")
                    .labels(STORAGE_LABELS)
                    .unit("bytes"),
            )?,
            storage_total: metrics.gauge(
                MetricSpec::new(names::STORAGE_TOTAL_BYTES, "Total storage space in bytes")
                    .labels(STORAGE_LABELS)
                    .unit("bytes"),
            )?,
            storage_percentage: metrics.gauge(
                MetricSpec::new(
                    names::STORAGE_USED_PERCENTAGE,
                    "Storage space used as a percentage",
                )
                .labels(STORAGE_LABELS)
                .unit("percent"),
            )?,
        })
    }

    fn record_storage(&self, nvr_id: &str, nvr_name: &str, device: &StorageDevice) {
        let storage_labels = [
            nvr_id,
            nvr_name,
            label_or_unknown(device.kind.as_deref()),
            device
                .path
                .as_deref()
                .filter(|p| !p.is_empty())
                .unwrap_or(ROOT_PATH),
        ];

        if let Some(used) = device.used {
            self.storage_used
                .with_label_values(&storage_labels)
                .set(used as f64);
        }
        if let Some(size) = device.size {
            self.storage_total
                .with_label_values(&storage_labels)
                .set(size as f64);
        }
        match (device.used, device.size) {
            (Some(used), Some(size)) if size > 0 => {
                self.storage_percentage
                    .with_label_values(&storage_labels)
                    .set(used as f64 / size as f64 * 100.0);
            }
            _ => {}
        }
    }

    fn record_info(&self, nvr: &Nvr, nvr_id: &str, nvr_name: &str) {
        self.system_info.set(&[
            nvr_id,
            nvr_name,
            label_or_unknown(nvr.version.as_deref()),
            label_or_unknown(nvr.host.as_deref()),
            label_or_unknown(nvr.platform.as_deref()),
            label_or_unknown(nvr.firmware_version.as_deref()),
        ]);
    }
}

#[async_trait]
impl Collector for SystemCollector {
    fn descriptor(&self) -> &CollectorDescriptor {
        &DESCRIPTOR
    }

    async fn collect(&self) -> Result<(), CollectorError> {
        tracing::debug!("Collecting system metrics");

        let snapshot = self.gate.get_snapshot().await?;
        let nvr = self.gate.get_root_info().await?;

        let nvr_id = label_or_unknown(Some(nvr.id.as_str()));
        let nvr_name = label_or_unknown(Some(nvr.name.as_str()));
        let nvr_labels = [nvr_id, nvr_name];

        self.record_info(&nvr, nvr_id, nvr_name);

        if let Some(uptime) = nvr.uptime {
            self.nvr_uptime.with_label_values(&nvr_labels).set(uptime);
        }

        let camera_count = snapshot.cameras.len();
        let sensor_count = snapshot.sensors.len();
        self.camera_count
            .with_label_values(&nvr_labels)
            .set(camera_count as f64);
        self.sensor_count
            .with_label_values(&nvr_labels)
            .set(sensor_count as f64);

        if let Some(stats) = &nvr.storage_stats {
            for device in &stats.devices {
                self.record_storage(nvr_id, nvr_name, device);
            }
        }

        tracing::debug!(
            nvr_name,
            camera_count,
            sensor_count,
            "Collected system metrics"
        );
        Ok(())
    }
}
