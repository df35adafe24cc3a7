use serde::{Deserialize, Serialize};

/// one published telemetry record
///
/// written verbatim to `/devices/{id}/latest` and
/// `/devices/{id}/history/{timestamp}`, so the serde names are the wire names.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    /// wall-clock epoch seconds
    pub timestamp: u64,
    /// temperature in celsius (0.0 when the dht22 read failed)
    pub temperature: f64,
    /// relative humidity (0.0 when the dht22 read failed)
    pub humidity: f64,
    pub gas_ppm: f64,
    /// occupancy as reported, i.e. including the motion hold window
    pub motion_detected: bool,
    #[serde(rename = "avg_temp_1h")]
    pub avg_temp: f64,
    #[serde(rename = "avg_hum_1h")]
    pub avg_hum: f64,
    pub device_id: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    /// motion onset
    SecurityAlert,
    /// the node switched the AC off on its own
    AutoAction,
    /// manual override through the local api
    Action,
    CriticalAlert,
}

/// an entry pushed to `/events/{id}`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    pub timestamp: u64,
}

impl NodeEvent {
    pub fn motion_detected(timestamp: u64) -> Self {
        Self {
            kind: EventKind::SecurityAlert,
            message: "Motion Detected in Lab".to_string(),
            source: Some("PIR_SENSOR".to_string()),
            details: None,
            timestamp,
        }
    }

    pub fn auto_off(idle_secs: u64, timestamp: u64) -> Self {
        Self {
            kind: EventKind::AutoAction,
            message: "AC turned OFF due to inactivity".to_string(),
            source: None,
            details: Some(format!("{}s without motion", idle_secs)),
            timestamp,
        }
    }

    pub fn manual_override(on: bool, source: &str, timestamp: u64) -> Self {
        Self {
            kind: EventKind::Action,
            message: format!("AC turned {}", if on { "ON" } else { "OFF" }),
            source: Some(source.to_string()),
            details: None,
            timestamp,
        }
    }

    pub fn critical_temperature(temperature: f64, timestamp: u64) -> Self {
        Self {
            kind: EventKind::CriticalAlert,
            message: format!("Critical Temperature: {:.1}°C", temperature),
            source: None,
            details: None,
            timestamp,
        }
    }
}

/// snapshot served by the local api
///
/// the control task is the only writer.
#[derive(Clone, Debug, Default, Serialize)]
pub struct NodeStatus {
    pub device_id: String,
    pub ac_on: bool,
    pub occupied: bool,
    pub simulating_motion: bool,
    /// time since motion last refreshed the inactivity timer
    pub seconds_since_motion: u64,
    pub store_ready: bool,
    pub last_reading: Option<SensorReading>,
    /// epoch seconds of the last completed sampling cycle
    pub last_update: u64,
}
