//! Metric and label names, without the namespace prefix.

// System
pub const SYSTEM_INFO: &str = "system_info";
pub const NVR_UPTIME_SECONDS: &str = "nvr_uptime_seconds";
pub const CAMERA_COUNT: &str = "camera_count";
pub const SENSOR_COUNT: &str = "sensor_count";

// Storage
pub const STORAGE_USED_BYTES: &str = "storage_used_bytes";
pub const STORAGE_TOTAL_BYTES: &str = "storage_total_bytes";
pub const STORAGE_USED_PERCENTAGE: &str = "storage_used_percentage";

// Cameras
pub const CAMERA_INFO: &str = "camera_info";
pub const CAMERA_ONLINE: &str = "camera_online";
pub const CAMERA_CONNECTED: &str = "camera_connected";
pub const CAMERA_RECORDING: &str = "camera_recording";
pub const CAMERA_MOTION_DETECTED: &str = "camera_motion_detected";
pub const CAMERA_UPTIME_SECONDS: &str = "camera_uptime_seconds";
pub const CAMERA_LAST_SEEN_SECONDS: &str = "camera_last_seen_seconds";
pub const CAMERA_LAST_MOTION_SECONDS: &str = "camera_last_motion_seconds";
pub const CAMERA_RX_BYTES_TOTAL: &str = "camera_rx_bytes_total";
pub const CAMERA_TX_BYTES_TOTAL: &str = "camera_tx_bytes_total";

// Sensors
pub const SENSOR_INFO: &str = "sensor_info";
pub const SENSOR_ONLINE: &str = "sensor_online";
pub const SENSOR_BATTERY_PERCENTAGE: &str = "sensor_battery_percentage";
pub const SENSOR_TEMPERATURE_CELSIUS: &str = "sensor_temperature_celsius";
pub const SENSOR_HUMIDITY_PERCENTAGE: &str = "sensor_humidity_percentage";
pub const SENSOR_LIGHT_LEVEL: &str = "sensor_light_level";
pub const SENSOR_MOTION_DETECTED: &str = "sensor_motion_detected";
pub const SENSOR_DOOR_OPEN: &str = "sensor_door_open";
pub const SENSOR_WATER_DETECTED: &str = "sensor_water_detected";
pub const SENSOR_LAST_SEEN_SECONDS: &str = "sensor_last_seen_seconds";

// Events
pub const EVENT_COUNT_TOTAL: &str = "event_count_total";
pub const EVENT_DURATION_SECONDS: &str = "event_duration_seconds";

// Collector self-monitoring
pub const COLLECTOR_DURATION_SECONDS: &str = "collector_duration_seconds";
pub const COLLECTOR_ERRORS_TOTAL: &str = "collector_errors_total";
pub const COLLECTOR_LAST_UPDATE_SECONDS: &str = "collector_last_update_seconds";

// Upstream API
pub const API_REQUESTS_TOTAL: &str = "api_requests_total";
pub const API_REQUEST_DURATION_SECONDS: &str = "api_request_duration_seconds";

// Exporter
pub const EXPORTER_BUILD_INFO: &str = "exporter_build_info";
pub const EXPORTER_UP: &str = "exporter_up";

/// Label names.
pub mod labels {
    pub const NVR_ID: &str = "nvr_id";
    pub const NVR_NAME: &str = "nvr_name";
    pub const NVR_VERSION: &str = "nvr_version";
    pub const HOST: &str = "host";
    pub const PLATFORM: &str = "platform";
    pub const FIRMWARE_VERSION: &str = "firmware_version";

    pub const CAMERA_ID: &str = "camera_id";
    pub const CAMERA_NAME: &str = "camera_name";
    pub const CAMERA_TYPE: &str = "camera_type";
    pub const CAMERA_MODEL: &str = "camera_model";
    pub const CAMERA_FIRMWARE: &str = "camera_firmware";
    pub const CAMERA_MAC: &str = "camera_mac";
    pub const CAMERA_IP: &str = "camera_ip";

    pub const SENSOR_ID: &str = "sensor_id";
    pub const SENSOR_NAME: &str = "sensor_name";
    pub const SENSOR_TYPE: &str = "sensor_type";
    pub const SENSOR_MODEL: &str = "sensor_model";
    pub const SENSOR_FIRMWARE: &str = "sensor_firmware";
    pub const SENSOR_MAC: &str = "sensor_mac";

    pub const EVENT_TYPE: &str = "event_type";

    pub const STORAGE_TYPE: &str = "storage_type";
    pub const STORAGE_PATH: &str = "storage_path";

    pub const COLLECTOR: &str = "collector";
    pub const ERROR_CATEGORY: &str = "error_category";

    pub const ENDPOINT: &str = "endpoint";
    pub const STATUS: &str = "status";

    pub const VERSION: &str = "version";
}

/// Label value used when upstream leaves an identifying field empty.
pub const UNKNOWN: &str = "unknown";

/// Substitute [`UNKNOWN`] for a missing or blank label value.
pub fn label_or_unknown(value: Option<&str>) -> &str {
    match value {
        Some(v) if !v.trim().is_empty() => v,
        _ => UNKNOWN,
    }
}
