use serde::{Deserialize, Serialize};

use crate::routes::{
    API_DATA_ROUTE, API_FIRMWARE_CHECK_ROUTE, API_FIRMWARE_DOWNLOAD_ROUTE, API_REGISTER_ROUTE,
};

pub const MODEL_TYPE: &str = "ESP32_C3_DHT22";
pub const FIRMWARE_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "192.168.1.100".to_string(),
            port: 3000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiRoutes {
    pub register: String,
    pub readings: String,
    #[serde(rename = "firmwareCheck")]
    pub firmware_check: String,
    #[serde(rename = "firmwareDownload")]
    pub firmware_download: String,
}

impl Default for ApiRoutes {
    fn default() -> Self {
        Self {
            register: API_REGISTER_ROUTE.to_string(),
            readings: API_DATA_ROUTE.to_string(),
            firmware_check: API_FIRMWARE_CHECK_ROUTE.to_string(),
            firmware_download: API_FIRMWARE_DOWNLOAD_ROUTE.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WifiConfig {
    pub connect_timeout_ms: u64,
    pub status_poll_ms: u64,
    pub address_poll_ms: u64,
    /// Consecutive failed status polls before the radio is disassociated and
    /// the connect is re-issued.
    pub radio_reset_after_polls: u32,
    pub radio_reset_settle_ms: u64,
    pub disconnect_settle_ms: u64,
}

impl Default for WifiConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 20_000,
            status_poll_ms: 1_000,
            address_poll_ms: 500,
            radio_reset_after_polls: 6,
            radio_reset_settle_ms: 500,
            disconnect_settle_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpConfig {
    pub response_timeout_ms: u64,
    pub idle_poll_ms: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            response_timeout_ms: 10_000,
            idle_poll_ms: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay_ms: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtaConfig {
    /// Download ceiling as a multiple of the HTTP response timeout.
    pub download_timeout_factor: u32,
    pub stall_timeout_ms: u64,
    pub progress_step_pct: u8,
    pub chunk_size: usize,
    pub announce_delay_ms: u64,
    pub apply_delay_ms: u64,
}

impl Default for OtaConfig {
    fn default() -> Self {
        Self {
            download_timeout_factor: 3,
            stall_timeout_ms: 10_000,
            progress_step_pct: 5,
            chunk_size: 128,
            announce_delay_ms: 2_000,
            apply_delay_ms: 3_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    pub reading_interval_ms: u64,
    pub update_check_interval_ms: u64,
    pub battery_log_interval_ms: u64,
    pub wifi_restart_grace_ms: u64,
    #[serde(default = "default_low_battery_pct")]
    pub low_battery_pct: u8,
}

fn default_low_battery_pct() -> u8 {
    20
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            reading_interval_ms: 10_000,
            update_check_interval_ms: 3_600_000,
            battery_log_interval_ms: 10_000,
            wifi_restart_grace_ms: 300_000,
            low_battery_pct: default_low_battery_pct(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    pub server: ServerConfig,
    #[serde(default)]
    pub routes: ApiRoutes,
    #[serde(default)]
    pub wifi: WifiConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub ota: OtaConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
}

impl NodeConfig {
    pub fn sanitize(&mut self) {
        if self.server.port == 0 {
            self.server.port = ServerConfig::default().port;
        }

        self.wifi.connect_timeout_ms = self.wifi.connect_timeout_ms.max(1_000);
        self.wifi.status_poll_ms = self.wifi.status_poll_ms.clamp(10, 10_000);
        self.wifi.address_poll_ms = self.wifi.address_poll_ms.clamp(10, 10_000);
        self.wifi.radio_reset_after_polls = self.wifi.radio_reset_after_polls.max(1);

        self.http.response_timeout_ms = self.http.response_timeout_ms.max(100);
        self.http.idle_poll_ms = self.http.idle_poll_ms.clamp(1, 1_000);

        self.retry.max_attempts = self.retry.max_attempts.clamp(1, 10);

        self.ota.download_timeout_factor = self.ota.download_timeout_factor.max(1);
        self.ota.stall_timeout_ms = self.ota.stall_timeout_ms.max(100);
        self.ota.progress_step_pct = self.ota.progress_step_pct.clamp(1, 50);
        self.ota.chunk_size = self.ota.chunk_size.clamp(16, 4_096);

        self.schedule.reading_interval_ms = self.schedule.reading_interval_ms.max(1_000);
        self.schedule.update_check_interval_ms =
            self.schedule.update_check_interval_ms.max(60_000);
        self.schedule.low_battery_pct = self.schedule.low_battery_pct.min(100);
    }

    pub fn download_ceiling_ms(&self) -> u64 {
        self.http
            .response_timeout_ms
            .saturating_mul(u64::from(self.ota.download_timeout_factor))
    }
}

/// Identity of the running node, built once at boot and handed to every
/// component that talks to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceContext {
    #[serde(rename = "deviceId")]
    pub device_id: String,
    #[serde(rename = "modelType")]
    pub model_type: String,
    #[serde(rename = "firmwareVersion")]
    pub firmware_version: String,
}

impl DeviceContext {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            model_type: MODEL_TYPE.to_string(),
            firmware_version: FIRMWARE_VERSION.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WifiCredentials {
    pub ssid: String,
    pub password: String,
}

impl WifiCredentials {
    pub fn is_configured(&self) -> bool {
        let ssid = self.ssid.trim();
        !ssid.is_empty() && ssid != "CHANGE_ME"
    }
}
