//! Per-camera state, activity and traffic.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use prometheus::GaugeVec;

use crate::metrics::names::{self, label_or_unknown, labels};
use crate::metrics::{InfoVec, MetricRegistry, MetricSpec, MetricsError};
use crate::upstream::UpstreamGate;
use crate::upstream::types::{Camera, Entity};

use super::error::CollectorError;
use super::traits::{Collector, CollectorContext, CollectorDescriptor, CollectorFactory, Tier};

pub const DESCRIPTOR: CollectorDescriptor = CollectorDescriptor {
    name: "camera",
    description: "Collects per-camera status and activity metrics",
    tier: Tier::Medium,
};

/// Upstream `state` of a camera that is up.
pub(crate) const STATE_CONNECTED: &str = "CONNECTED";

const CAMERA_LABELS: &[&str] = &[labels::CAMERA_ID, labels::CAMERA_NAME];

pub fn factory() -> CollectorFactory {
    CollectorFactory::new(DESCRIPTOR, |ctx: &CollectorContext| {
        let collector: Arc<dyn Collector> = Arc::new(CameraCollector::new(
            Arc::clone(&ctx.gate),
            &ctx.metrics,
            CameraOptions {
                max_cameras: ctx.settings.cameras.max_cameras,
                collect_recording_stats: ctx.settings.cameras.collect_recording_stats,
            },
        )?);
        Ok(collector)
    })
}

#[derive(Debug, Clone)]
pub struct CameraOptions {
    /// Cameras past this many are ignored.
    pub max_cameras: usize,
    pub collect_recording_stats: bool,
}

impl Default for CameraOptions {
    fn default() -> Self {
        Self {
            max_cameras: 1000,
            collect_recording_stats: true,
        }
    }
}

pub struct CameraCollector {
    gate: Arc<UpstreamGate>,
    options: CameraOptions,
    info: InfoVec,
    online: GaugeVec,
    connected: GaugeVec,
    recording: GaugeVec,
    motion_detected: GaugeVec,
    uptime: GaugeVec,
    last_seen: GaugeVec,
    last_motion: GaugeVec,
    rx_bytes: GaugeVec,
    tx_bytes: GaugeVec,
}

fn gauge(metrics: &MetricRegistry, name: &str, help: &str, unit: &str) -> Result<GaugeVec, MetricsError> {
    metrics.gauge(MetricSpec::new(name, help).labels(CAMERA_LABELS).unit(unit))
}

fn flag(value: bool) -> f64 {
    if value { 1.0 } else { 0.0 }
}

impl CameraCollector {
    pub fn new(
        gate: Arc<UpstreamGate>,
        metrics: &MetricRegistry,
        options: CameraOptions,
    ) -> Result<Self, MetricsError> {
        Ok(Self {
            gate,
            options,
            info: metrics.info(MetricSpec::new(names::CAMERA_INFO, "Camera information").labels(&[
                labels::CAMERA_ID,
                labels::CAMERA_NAME,
                labels::CAMERA_TYPE,
                labels::CAMERA_MODEL,
                labels::CAMERA_FIRMWARE,
                labels::CAMERA_MAC,
                labels::CAMERA_IP,
            ]))?,
            online: gauge(metrics, names::CAMERA_ONLINE, "Whether the camera is online", "bool")?,
            connected: gauge(
                metrics,
                names::CAMERA_CONNECTED,
                "Whether the camera is connected to the NVR",
                "bool",
            )?,
            recording: gauge(
                metrics,
                names::CAMERA_RECORDING,
                "Whether the camera is recording",
                "bool",
            )?,
            motion_detected: gauge(
                metrics,
                names::CAMERA_MOTION_DETECTED,
                "Whether the camera currently detects motion",
                "bool",
            )?,
            uptime: gauge(
                metrics,
                names::CAMERA_UPTIME_SECONDS,
                "Camera uptime in seconds",
                "seconds",
            )?,
            last_seen: gauge(
                metrics,
                names::CAMERA_LAST_SEEN_SECONDS,
                "Unix timestamp the camera was last seen",
                "seconds",
            )?,
            last_motion: gauge(
                metrics,
                names::CAMERA_LAST_MOTION_SECONDS,
                "Unix timestamp of the camera's last motion",
                "seconds",
            )?,
            rx_bytes: gauge(
                metrics,
                names::CAMERA_RX_BYTES_TOTAL,
                "Bytes received by the camera",
                "bytes",
            )?,
            tx_bytes: gauge(
                metrics,
                names::CAMERA_TX_BYTES_TOTAL,
                "Bytes sent by the camera",
                "bytes",
            )?,
        })
    }

    fn record(&self, camera: &Camera, id: &str, now_ms: i64) {
        let name = label_or_unknown(camera.name.as_deref());
        let camera_labels = [id, name];

        self.info.set(&[
            id,
            name,
            label_or_unknown(camera.kind.as_deref()),
            label_or_unknown(camera.market_name.as_deref()),
            label_or_unknown(camera.firmware_version.as_deref()),
            label_or_unknown(camera.mac.as_deref()),
            label_or_unknown(camera.host.as_deref()),
        ]);

        let set = |gauge: &GaugeVec, value: Option<f64>| {
            if let Some(value) = value {
                gauge.with_label_values(&camera_labels).set(value);
            }
        };

        set(
            &self.online,
            camera.state.as_deref().map(|s| flag(s.eq_ignore_ascii_case(STATE_CONNECTED))),
        );
        set(&self.connected, camera.is_connected.map(flag));
        if self.options.collect_recording_stats {
            set(&self.recording, camera.is_recording.map(flag));
        }
        set(&self.motion_detected, camera.is_motion_detected.map(flag));
        set(
            &self.uptime,
            camera
                .up_since
                .map(|since| (now_ms - since).max(0) as f64 / 1000.0),
        );
        set(&self.last_seen, camera.last_seen.map(|ms| ms as f64 / 1000.0));
        set(&self.last_motion, camera.last_motion.map(|ms| ms as f64 / 1000.0));

        if let Some(stats) = &camera.stats {
            set(&self.rx_bytes, stats.rx_bytes.map(|b| b as f64));
            set(&self.tx_bytes, stats.tx_bytes.map(|b| b as f64));
        }
    }
}

#[async_trait]
impl Collector for CameraCollector {
    fn descriptor(&self) -> &CollectorDescriptor {
        &DESCRIPTOR
    }

    async fn collect(&self) -> Result<(), CollectorError> {
        let snapshot = self.gate.get_snapshot().await?;
        let cameras = Camera::select(&snapshot);
        let max_cameras = self.options.max_cameras;
        if cameras.len() > max_cameras {
            tracing::warn!(
                camera_count = cameras.len(),
                max_cameras,
                "Camera count exceeds limit; extra cameras are ignored"
            );
        }

        let now_ms = Utc::now().timestamp_millis();
        let mut recorded = 0usize;
        for camera in cameras.iter().take(max_cameras) {
            let Some(id) = camera.id.as_deref().filter(|id| !id.is_empty()) else {
                tracing::debug!(name = ?camera.name, "Skipping camera without id");
                continue;
            };
            self.record(camera, id, now_ms);
            recorded += 1;
        }

        tracing::debug!(camera_count = recorded, "Collected camera metrics");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::types::{Bootstrap, CameraStats};
    use crate::upstream::MemoryConnector;

    fn camera(id: Option<&str>, name: &str) -> Camera {
        Camera {
            id: id.map(str::to_string),
            name: Some(name.to_string()),
            ..Default::default()
        }
    }

    fn setup(options: CameraOptions) -> (CameraCollector, MemoryConnector, MetricRegistry) {
        let registry = MetricRegistry::default();
        let connector = MemoryConnector::new(Bootstrap::default());
        let gate = Arc::new(UpstreamGate::new(Arc::new(connector.clone()), 5));
        let collector = CameraCollector::new(gate, &registry, options).unwrap();
        (collector, connector, registry)
    }

    fn with_cameras(cameras: Vec<Camera>) -> Bootstrap {
        Bootstrap {
            cameras,
            ..Default::default()
        }
    }

    async fn collect(cameras: Vec<Camera>, max_cameras: usize) -> MetricRegistry {
        let (collector, connector, registry) = setup(CameraOptions {
            max_cameras,
            ..Default::default()
        });
        connector.set_bootstrap(with_cameras(cameras));
        collector.collect().await.unwrap();
        registry
    }

    #[tokio::test]
    async fn test_camera_state() {
        let porch = Camera {
            kind: Some("UVC G4 Pro".to_string()),
            state: Some("CONNECTED".to_string()),
            is_connected: Some(true),
            is_recording: Some(false),
            last_seen: Some(1_700_000_000_000),
            stats: Some(CameraStats {
                rx_bytes: Some(1024),
                tx_bytes: None,
            }),
            ..camera(Some("cam1"), "Porch")
        };
        let registry = collect(vec![porch], 10).await;
        let labels = &[("camera_id", "cam1"), ("camera_name", "Porch")];

        assert_eq!(registry.sample(names::CAMERA_ONLINE, labels), Some(1.0));
        assert_eq!(registry.sample(names::CAMERA_CONNECTED, labels), Some(1.0));
        assert_eq!(registry.sample(names::CAMERA_RECORDING, labels), Some(0.0));
        assert_eq!(
            registry.sample(names::CAMERA_LAST_SEEN_SECONDS, labels),
            Some(1_700_000_000.0)
        );
        assert_eq!(registry.sample(names::CAMERA_RX_BYTES_TOTAL, labels), Some(1024.0));
        assert_eq!(
            registry.sample(
                names::CAMERA_INFO,
                &[
                    ("camera_id", "cam1"),
                    ("camera_name", "Porch"),
                    ("camera_type", "UVC G4 Pro"),
                    ("camera_model", "unknown"),
                    ("camera_firmware", "unknown"),
                    ("camera_mac", "unknown"),
                    ("camera_ip", "unknown"),
                ]
            ),
            Some(1.0)
        );
    }

    #[tokio::test]
    async fn test_absent_fields_are_not_written() {
        let registry = collect(vec![camera(Some("cam1"), "Porch")], 10).await;
        let labels = &[("camera_id", "cam1"), ("camera_name", "Porch")];

        assert_eq!(registry.sample(names::CAMERA_ONLINE, labels), None);
        assert_eq!(registry.sample(names::CAMERA_MOTION_DETECTED, labels), None);
        assert_eq!(registry.sample(names::CAMERA_UPTIME_SECONDS, labels), None);
        assert_eq!(registry.sample(names::CAMERA_TX_BYTES_TOTAL, labels), None);
    }

    fn info_labels<'a>(id: &'a str, name: &'a str) -> Vec<(&'a str, &'a str)> {
        vec![
            ("camera_id", id),
            ("camera_name", name),
            ("camera_type", "unknown"),
            ("camera_model", "unknown"),
            ("camera_firmware", "unknown"),
            ("camera_mac", "unknown"),
            ("camera_ip", "unknown"),
        ]
    }

    #[tokio::test]
    async fn test_cameras_without_id_are_skipped() {
        let cameras = vec![camera(None, "Ghost"), camera(Some("cam2"), "Garage")];
        let registry = collect(cameras, 10).await;

        assert_eq!(
            registry.sample(names::CAMERA_INFO, &info_labels("cam2", "Garage")),
            Some(1.0)
        );
        assert_eq!(
            registry.sample(names::CAMERA_INFO, &info_labels("unknown", "Ghost")),
            None
        );
    }

    #[tokio::test]
    async fn test_max_cameras_limit() {
        let cameras = (0..5)
            .map(|i| camera(Some(&format!("cam{i}")), "Cam"))
            .collect();
        let registry = collect(cameras, 2).await;

        let recorded = |id: &str| registry.sample(names::CAMERA_INFO, &info_labels(id, "Cam"));
        assert_eq!(recorded("cam0"), Some(1.0));
        assert_eq!(recorded("cam1"), Some(1.0));
        assert_eq!(recorded("cam2"), None);
    }

    #[tokio::test]
    async fn test_state_changes_are_picked_up() {
        let (collector, connector, registry) = setup(CameraOptions::default());
        let labels = &[("camera_id", "cam1"), ("camera_name", "Porch")];
        let porch = |connected: bool| Camera {
            is_connected: Some(connected),
            ..camera(Some("cam1"), "Porch")
        };

        connector.set_bootstrap(with_cameras(vec![porch(true)]));
        collector.collect().await.unwrap();
        assert_eq!(registry.sample(names::CAMERA_CONNECTED, labels), Some(1.0));

        connector.set_bootstrap(with_cameras(vec![porch(false)]));
        collector.collect().await.unwrap();
        assert_eq!(registry.sample(names::CAMERA_CONNECTED, labels), Some(0.0));
        assert_eq!(connector.refresh_count(), 2);
    }

    #[tokio::test]
    async fn test_recording_stats_can_be_disabled() {
        let (collector, connector, registry) = setup(CameraOptions {
            collect_recording_stats: false,
            ..Default::default()
        });
        connector.set_bootstrap(with_cameras(vec![Camera {
            is_recording: Some(true),
            is_connected: Some(true),
            ..camera(Some("cam1"), "Porch")
        }]));
        collector.collect().await.unwrap();

        let labels = &[("camera_id", "cam1"), ("camera_name", "Porch")];
        assert_eq!(registry.sample(names::CAMERA_RECORDING, labels), None);
        assert_eq!(registry.sample(names::CAMERA_CONNECTED, labels), Some(1.0));
    }
}
