//! Per-sensor readings: battery, environment, contact, motion, leaks.

use std::sync::Arc;

use async_trait::async_trait;
use prometheus::GaugeVec;

use crate::metrics::names::{self, label_or_unknown, labels};
use crate::metrics::{InfoVec, MetricRegistry, MetricSpec, MetricsError};
use crate::upstream::UpstreamGate;
use crate::upstream::types::{Entity, Sensor, SensorReading};

use super::camera::STATE_CONNECTED;
use super::error::CollectorError;
use super::traits::{Collector, CollectorContext, CollectorDescriptor, CollectorFactory, Tier};

pub const DESCRIPTOR: CollectorDescriptor = CollectorDescriptor {
    name: "sensor",
    description: "Collects readings from UniFi Protect sensors",
    tier: Tier::Medium,
};

const SENSOR_LABELS: &[&str] = &[labels::SENSOR_ID, labels::SENSOR_NAME];

pub fn factory() -> CollectorFactory {
    CollectorFactory::new(DESCRIPTOR, |ctx: &CollectorContext| {
        let collector: Arc<dyn Collector> =
            Arc::new(SensorCollector::new(Arc::clone(&ctx.gate), &ctx.metrics)?);
        Ok(collector)
    })
}

pub struct SensorCollector {
    gate: Arc<UpstreamGate>,
    info: InfoVec,
    online: GaugeVec,
    battery: GaugeVec,
    temperature: GaugeVec,
    humidity: GaugeVec,
    light: GaugeVec,
    motion: GaugeVec,
    door_open: GaugeVec,
    water: GaugeVec,
    last_seen: GaugeVec,
}

impl SensorCollector {
    pub fn new(gate: Arc<UpstreamGate>, metrics: &MetricRegistry) -> Result<Self, MetricsError> {
        let gauge = |name: &str, help: &str, unit: &str| {
            metrics.gauge(MetricSpec::new(name, help).labels(SENSOR_LABELS).unit(unit))
        };

        Ok(Self {
            gate,
            info: metrics.info(MetricSpec::new(names::SENSOR_INFO, "Sensor information").labels(&[
                labels::SENSOR_ID,
                labels::SENSOR_NAME,
                labels::SENSOR_TYPE,
                labels::SENSOR_MODEL,
                labels::SENSOR_FIRMWARE,
                labels::SENSOR_MAC,
            ]))?,
            online: gauge(names::SENSOR_ONLINE, "Whether the sensor is online", "bool")?,
            battery: gauge(
                names::SENSOR_BATTERY_PERCENTAGE,
                "Sensor battery level",
                "percent",
            )?,
            temperature: gauge(
                names::SENSOR_TEMPERATURE_CELSIUS,
                "Temperature reported by the sensor",
                "celsius",
            )?,
            humidity: gauge(
                names::SENSOR_HUMIDITY_PERCENTAGE,
                "Relative humidity reported by the sensor",
                "percent",
            )?,
            light: gauge(names::SENSOR_LIGHT_LEVEL, "Ambient light level", "lux")?,
            motion: gauge(
                names::SENSOR_MOTION_DETECTED,
                "Whether the sensor currently detects motion",
                "bool",
            )?,
            door_open: gauge(
                names::SENSOR_DOOR_OPEN,
                "Whether the contact sensor reports open",
                "bool",
            )?,
            water: gauge(
                names::SENSOR_WATER_DETECTED,
                "Whether the sensor has detected a leak",
                "bool",
            )?,
            last_seen: gauge(
                names::SENSOR_LAST_SEEN_SECONDS,
                "Unix timestamp the sensor was last seen",
                "seconds",
            )?,
        })
    }

    fn record(&self, sensor: &Sensor, id: &str) {
        let name = label_or_unknown(sensor.name.as_deref());
        let sensor_labels = [id, name];

        self.info.set(&[
            id,
            name,
            label_or_unknown(sensor.kind.as_deref()),
            label_or_unknown(sensor.market_name.as_deref()),
            label_or_unknown(sensor.firmware_version.as_deref()),
            label_or_unknown(sensor.mac.as_deref()),
        ]);

        let set = |gauge: &GaugeVec, value: Option<f64>| {
            if let Some(value) = value {
                gauge.with_label_values(&sensor_labels).set(value);
            }
        };
        let flag = |value: bool| if value { 1.0 } else { 0.0 };
        let reading = |r: &Option<SensorReading>| r.as_ref().and_then(|r| r.value);

        set(
            &self.online,
            sensor
                .state
                .as_deref()
                .map(|s| flag(s.eq_ignore_ascii_case(STATE_CONNECTED))),
        );
        set(
            &self.battery,
            sensor.battery_status.as_ref().and_then(|b| b.percentage),
        );
        if let Some(stats) = &sensor.stats {
            set(&self.temperature, reading(&stats.temperature));
            set(&self.humidity, reading(&stats.humidity));
            set(&self.light, reading(&stats.light));
        }
        set(&self.motion, sensor.is_motion_detected.map(flag));
        set(&self.door_open, sensor.is_opened.map(flag));
        // Upstream only reports a timestamp once a leak has been seen.
        set(&self.water, Some(flag(sensor.leak_detected_at.is_some())));
        set(&self.last_seen, sensor.last_seen.map(|ms| ms as f64 / 1000.0));
    }
}

#[async_trait]
impl Collector for SensorCollector {
    fn descriptor(&self) -> &CollectorDescriptor {
        &DESCRIPTOR
    }

    async fn collect(&self) -> Result<(), CollectorError> {
        let snapshot = self.gate.get_snapshot().await?;
        let sensors = Sensor::select(&snapshot);

        let mut recorded = 0usize;
        for sensor in &sensors {
            let Some(id) = sensor.id.as_deref().filter(|id| !id.is_empty()) else {
                tracing::debug!(name = ?sensor.name, "Skipping sensor without id");
                continue;
            };
            self.record(sensor, id);
            recorded += 1;
        }

        tracing::debug!(sensor_count = recorded, "Collected sensor metrics");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::MemoryConnector;
    use crate::upstream::types::{BatteryStatus, Bootstrap, SensorStats};

    const LABELS: &[(&str, &str)] = &[("sensor_id", "s1"), ("sensor_name", "Front Door")];

    async fn collect(sensors: Vec<Sensor>) -> MetricRegistry {
        let registry = MetricRegistry::default();
        let connector = MemoryConnector::new(Bootstrap {
            sensors,
            ..Default::default()
        });
        let gate = Arc::new(UpstreamGate::new(Arc::new(connector), 5));
        SensorCollector::new(gate, &registry)
            .unwrap()
            .collect()
            .await
            .unwrap();
        registry
    }

    fn sensor() -> Sensor {
        Sensor {
            id: Some("s1".to_string()),
            name: Some("Front Door".to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_sensor_readings() {
        let registry = collect(vec![Sensor {
            state: Some("CONNECTED".to_string()),
            is_opened: Some(true),
            battery_status: Some(BatteryStatus {
                percentage: Some(87.0),
                is_low: Some(false),
            }),
            stats: Some(SensorStats {
                temperature: Some(SensorReading { value: Some(21.5) }),
                humidity: Some(SensorReading { value: None }),
                light: None,
            }),
            ..sensor()
        }])
        .await;

        assert_eq!(registry.sample(names::SENSOR_ONLINE, LABELS), Some(1.0));
        assert_eq!(registry.sample(names::SENSOR_DOOR_OPEN, LABELS), Some(1.0));
        assert_eq!(registry.sample(names::SENSOR_BATTERY_PERCENTAGE, LABELS), Some(87.0));
        assert_eq!(registry.sample(names::SENSOR_TEMPERATURE_CELSIUS, LABELS), Some(21.5));
        assert_eq!(registry.sample(names::SENSOR_HUMIDITY_PERCENTAGE, LABELS), None);
        assert_eq!(registry.sample(names::SENSOR_LIGHT_LEVEL, LABELS), None);
        assert_eq!(registry.sample(names::SENSOR_WATER_DETECTED, LABELS), Some(0.0));
    }

    #[tokio::test]
    async fn test_leak_and_absent_fields() {
        let registry = collect(vec![Sensor {
            leak_detected_at: Some(1_700_000_000_000),
            ..sensor()
        }])
        .await;

        assert_eq!(registry.sample(names::SENSOR_WATER_DETECTED, LABELS), Some(1.0));
        assert_eq!(registry.sample(names::SENSOR_ONLINE, LABELS), None);
        assert_eq!(registry.sample(names::SENSOR_BATTERY_PERCENTAGE, LABELS), None);
        assert_eq!(registry.sample(names::SENSOR_MOTION_DETECTED, LABELS), None);
    }

    #[tokio::test]
    async fn test_sensor_without_id_is_skipped() {
        let registry = collect(vec![Sensor {
            id: None,
            is_opened: Some(false),
            ..sensor()
        }])
        .await;

        assert_eq!(
            registry.sample(
                names::SENSOR_DOOR_OPEN,
                &[("sensor_id", "unknown"), ("sensor_name", "Front Door")]
            ),
            None
        );
    }

    #[tokio::test]
    async fn test_readings_follow_upstream() {
        let registry = MetricRegistry::default();
        let connector = MemoryConnector::new(Bootstrap::default());
        let gate = Arc::new(UpstreamGate::new(Arc::new(connector.clone()), 5));
        let collector = SensorCollector::new(gate, &registry).unwrap();
        let door = |opened: bool| Bootstrap {
            sensors: vec![Sensor {
                is_opened: Some(opened),
                ..sensor()
            }],
            ..Default::default()
        };

        connector.set_bootstrap(door(true));
        collector.collect().await.unwrap();
        assert_eq!(registry.sample(names::SENSOR_DOOR_OPEN, LABELS), Some(1.0));

        connector.set_bootstrap(door(false));
        collector.collect().await.unwrap();
        assert_eq!(registry.sample(names::SENSOR_DOOR_OPEN, LABELS), Some(0.0));
    }
}
