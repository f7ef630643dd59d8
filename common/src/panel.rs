use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use crate::{
    config::{DeviceContext, WifiCredentials},
    types::{ConnectionState, SensorReading, UpdateState},
};

const MAX_SSID_BYTES: usize = 32;
const WPA_PASSWORD_LEN: std::ops::RangeInclusive<usize> = 8..=64;

/// Snapshot served by the on-device control panel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeStatus {
    #[serde(rename = "deviceId")]
    pub device_id: String,
    #[serde(rename = "modelType")]
    pub model_type: String,
    #[serde(rename = "firmwareVersion")]
    pub firmware_version: String,
    pub link: &'static str,
    #[serde(rename = "ipAddress")]
    pub ip_address: Option<Ipv4Addr>,
    #[serde(rename = "updateState")]
    pub update_state: &'static str,
    #[serde(rename = "lastReading")]
    pub last_reading: Option<ReadingView>,
}

impl NodeStatus {
    pub fn new(
        context: &DeviceContext,
        link: ConnectionState,
        ip_address: Option<Ipv4Addr>,
        update_state: UpdateState,
    ) -> Self {
        Self {
            device_id: context.device_id.clone(),
            model_type: context.model_type.clone(),
            firmware_version: context.firmware_version.clone(),
            link: link.as_str(),
            ip_address,
            update_state: update_state.as_str(),
            last_reading: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReadingView {
    pub temperature: Option<f32>,
    pub humidity: Option<f32>,
    #[serde(rename = "batteryVoltage")]
    pub battery_voltage: Option<f32>,
    #[serde(rename = "batteryPercentage")]
    pub battery_percentage: Option<u8>,
    #[serde(rename = "batteryLow")]
    pub battery_low: bool,
    pub timestamp: i64,
}

impl ReadingView {
    pub fn new(reading: &SensorReading, timestamp: i64, low_battery_pct: u8) -> Self {
        Self {
            temperature: reading.temperature_c,
            humidity: reading.humidity,
            battery_voltage: reading.battery.map(|battery| battery.voltage),
            battery_percentage: reading.battery.map(|battery| battery.percentage),
            battery_low: reading
                .battery
                .is_some_and(|battery| battery.is_low(low_battery_pct)),
            timestamp,
        }
    }
}

/// Body of the panel's WiFi settings form. A missing or empty password keeps
/// the stored one as long as the SSID is unchanged.
#[derive(Debug, Clone, Deserialize)]
pub struct WifiSettingsUpdate {
    pub ssid: String,
    #[serde(default)]
    pub password: Option<String>,
}

impl WifiSettingsUpdate {
    pub fn resolve(
        self,
        current: Option<&WifiCredentials>,
    ) -> Result<WifiCredentials, &'static str> {
        let ssid = self.ssid.trim();
        if ssid.is_empty() {
            return Err("ssid cannot be empty");
        }
        if ssid.len() > MAX_SSID_BYTES {
            return Err("ssid must be at most 32 bytes");
        }

        let password = match self.password.filter(|password| !password.is_empty()) {
            Some(password) => password,
            None => current
                .filter(|current| current.ssid == ssid)
                .map(|current| current.password.clone())
                .unwrap_or_default(),
        };
        if !password.is_empty() && !WPA_PASSWORD_LEN.contains(&password.len()) {
            return Err("password must be 8 to 64 characters");
        }

        Ok(WifiCredentials {
            ssid: ssid.to_string(),
            password,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WifiSettingsView {
    pub ssid: String,
    #[serde(rename = "passwordSet")]
    pub password_set: bool,
    #[serde(rename = "restartRequired")]
    pub restart_required: bool,
}

impl WifiSettingsView {
    pub fn new(saved: &WifiCredentials, previous: Option<&WifiCredentials>) -> Self {
        Self {
            ssid: saved.ssid.clone(),
            password_set: !saved.password.is_empty(),
            restart_required: previous != Some(saved),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::types::BatteryStatus;

    fn stored() -> WifiCredentials {
        WifiCredentials {
            ssid: "home".to_string(),
            password: "old-secret".to_string(),
        }
    }

    fn update(ssid: &str, password: Option<&str>) -> WifiSettingsUpdate {
        WifiSettingsUpdate {
            ssid: ssid.to_string(),
            password: password.map(str::to_string),
        }
    }

    #[test]
    fn blank_password_keeps_stored_one_for_same_network() {
        let resolved = update(" home ", Some("")).resolve(Some(&stored())).unwrap();

        assert_eq!(resolved, stored());
        assert!(!WifiSettingsView::new(&resolved, Some(&stored())).restart_required);
    }

    #[test]
    fn new_network_does_not_inherit_password() {
        let resolved = update("cabin", None).resolve(Some(&stored())).unwrap();

        assert_eq!(resolved.password, "");
        let view = WifiSettingsView::new(&resolved, Some(&stored()));
        assert!(view.restart_required);
        assert!(!view.password_set);
    }

    #[test]
    fn invalid_settings_are_rejected() {
        assert_eq!(update("  ", None).resolve(None), Err("ssid cannot be empty"));
        assert_eq!(
            update(&"x".repeat(33), None).resolve(None),
            Err("ssid must be at most 32 bytes")
        );
        assert_eq!(
            update("home", Some("short")).resolve(None),
            Err("password must be 8 to 64 characters")
        );
    }

    #[test]
    fn status_serializes_with_panel_field_names() {
        let mut status = NodeStatus::new(
            &DeviceContext::new("a1b2c3d4e5f6"),
            ConnectionState::Connected,
            Some(Ipv4Addr::new(192, 168, 1, 40)),
            UpdateState::Idle,
        );
        let reading = SensorReading {
            temperature_c: Some(21.5),
            humidity: None,
            battery: Some(BatteryStatus {
                voltage: 0.52,
                percentage: 10,
                minutes_remaining: 48,
            }),
        };
        status.last_reading = Some(ReadingView::new(&reading, 1_700_000_000, 20));

        let json = serde_json::to_value(&status).unwrap();

        assert_eq!(json["deviceId"], "a1b2c3d4e5f6");
        assert_eq!(json["link"], "CONNECTED");
        assert_eq!(json["ipAddress"], "192.168.1.40");
        assert_eq!(json["updateState"], "IDLE");
        assert_eq!(json["lastReading"]["temperature"], 21.5);
        assert!(json["lastReading"]["humidity"].is_null());
        assert_eq!(json["lastReading"]["batteryLow"], true);
    }
}
