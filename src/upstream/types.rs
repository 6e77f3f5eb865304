//! Upstream data model.
//!
//! Mirrors the subset of the UniFi Protect bootstrap document the collectors
//! read. Every field the NVR may omit is an `Option`, so absence survives
//! deserialization instead of turning into zero.

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, IntoStaticStr};

/// Full point-in-time state returned by the NVR.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bootstrap {
    pub nvr: Nvr,
    #[serde(default)]
    pub cameras: Vec<Camera>,
    #[serde(default)]
    pub sensors: Vec<Sensor>,
    /// Recent events; filled by a separate query on refresh.
    #[serde(default)]
    pub events: Vec<ProtectEvent>,
}

/// The NVR itself (root info).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Nvr {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default, alias = "hardwarePlatform")]
    pub platform: Option<String>,
    #[serde(default)]
    pub firmware_version: Option<String>,
    /// Seconds since boot.
    #[serde(default)]
    pub uptime: Option<f64>,
    #[serde(default)]
    pub storage_stats: Option<StorageStats>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageStats {
    #[serde(default)]
    pub devices: Vec<StorageDevice>,
}

/// One storage volume attached to the NVR.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageDevice {
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    /// Bytes in use.
    #[serde(default)]
    pub used: Option<u64>,
    /// Capacity in bytes.
    #[serde(default)]
    pub size: Option<u64>,
}

/// A camera adopted by the NVR.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Camera {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub market_name: Option<String>,
    #[serde(default)]
    pub firmware_version: Option<String>,
    #[serde(default)]
    pub mac: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
    /// `CONNECTED`, `DISCONNECTED`, `CONNECTING`, ...
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub is_connected: Option<bool>,
    #[serde(default)]
    pub is_recording: Option<bool>,
    #[serde(default)]
    pub is_motion_detected: Option<bool>,
    /// Epoch milliseconds.
    #[serde(default)]
    pub up_since: Option<i64>,
    /// Epoch milliseconds.
    #[serde(default)]
    pub last_seen: Option<i64>,
    /// Epoch milliseconds.
    #[serde(default)]
    pub last_motion: Option<i64>,
    #[serde(default)]
    pub stats: Option<CameraStats>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraStats {
    #[serde(default)]
    pub rx_bytes: Option<u64>,
    #[serde(default)]
    pub tx_bytes: Option<u64>,
}

/// A sensor (door, motion, environment, leak) adopted by the NVR.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sensor {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub market_name: Option<String>,
    #[serde(default)]
    pub firmware_version: Option<String>,
    #[serde(default)]
    pub mac: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub is_opened: Option<bool>,
    #[serde(default)]
    pub is_motion_detected: Option<bool>,
    /// Epoch milliseconds of the last leak detection, if any.
    #[serde(default)]
    pub leak_detected_at: Option<i64>,
    #[serde(default)]
    pub battery_status: Option<BatteryStatus>,
    #[serde(default)]
    pub stats: Option<SensorStats>,
    /// Epoch milliseconds.
    #[serde(default)]
    pub last_seen: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatteryStatus {
    #[serde(default)]
    pub percentage: Option<f64>,
    #[serde(default)]
    pub is_low: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SensorStats {
    #[serde(default)]
    pub light: Option<SensorReading>,
    #[serde(default)]
    pub humidity: Option<SensorReading>,
    #[serde(default)]
    pub temperature: Option<SensorReading>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SensorReading {
    #[serde(default)]
    pub value: Option<f64>,
}

/// A detection or recording event.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtectEvent {
    pub id: String,
    /// `motion`, `smartDetectZone`, `ring`, ...
    #[serde(rename = "type")]
    pub kind: String,
    /// Epoch milliseconds.
    pub start: i64,
    /// Epoch milliseconds; `None` while the event is ongoing.
    #[serde(default)]
    pub end: Option<i64>,
    /// Camera id.
    #[serde(default)]
    pub camera: Option<String>,
    #[serde(default)]
    pub score: Option<f64>,
}

/// Kinds of entity that can be listed from the bootstrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum EntityKind {
    Camera,
    Sensor,
    Event,
}

/// An entity type listed by [`UpstreamGate::get_entities`](super::UpstreamGate::get_entities).
pub trait Entity: Clone + Send + Sync + 'static {
    const KIND: EntityKind;

    /// Pick this entity's items out of a bootstrap.
    fn select(bootstrap: &Bootstrap) -> Vec<Self>;
}

impl Entity for Camera {
    const KIND: EntityKind = EntityKind::Camera;

    fn select(bootstrap: &Bootstrap) -> Vec<Self> {
        bootstrap.cameras.clone()
    }
}

impl Entity for Sensor {
    const KIND: EntityKind = EntityKind::Sensor;

    fn select(bootstrap: &Bootstrap) -> Vec<Self> {
        bootstrap.sensors.clone()
    }
}

impl Entity for ProtectEvent {
    const KIND: EntityKind = EntityKind::Event;

    fn select(bootstrap: &Bootstrap) -> Vec<Self> {
        bootstrap.events.clone()
    }
}
