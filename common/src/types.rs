use serde::{Deserialize, Serialize};

use crate::config::DeviceContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "DISCONNECTED",
            Self::Connecting => "CONNECTING",
            Self::Connected => "CONNECTED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateState {
    Idle,
    CheckingManifest,
    Downloading,
    Finalizing,
    Applying,
    Failed,
}

impl UpdateState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::CheckingManifest => "CHECKING_MANIFEST",
            Self::Downloading => "DOWNLOADING",
            Self::Finalizing => "FINALIZING",
            Self::Applying => "APPLYING",
            Self::Failed => "FAILED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Closed,
    Open,
    Committed,
    Aborted,
}

/// Semantic states understood by the display collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayState {
    Neutral,
    Connecting,
    Happy,
    Sad,
    Retry,
    UpdateAvailable,
    UpdateInitializing,
    UpdateProgress(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadProgress {
    pub bytes_written: u32,
    pub total_bytes: u32,
    pub last_progress_at: u64,
}

impl DownloadProgress {
    pub fn new(total_bytes: u32, now_ms: u64) -> Self {
        Self {
            bytes_written: 0,
            total_bytes,
            last_progress_at: now_ms,
        }
    }

    pub fn remaining(&self) -> u32 {
        self.total_bytes.saturating_sub(self.bytes_written)
    }

    pub fn is_complete(&self) -> bool {
        self.bytes_written >= self.total_bytes
    }

    pub fn advance(&mut self, bytes: u32, now_ms: u64) {
        self.bytes_written = self.bytes_written.saturating_add(bytes).min(self.total_bytes);
        self.last_progress_at = now_ms;
    }

    pub fn percent(&self) -> u8 {
        if self.total_bytes == 0 {
            return 100;
        }
        let pct = u64::from(self.bytes_written) * 100 / u64::from(self.total_bytes);
        pct.min(100) as u8
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatteryStatus {
    pub voltage: f32,
    pub percentage: u8,
    pub minutes_remaining: u32,
}

/// Calibration of the battery divider as seen by the ADC.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatteryCurve {
    pub empty_volts: f32,
    pub full_volts: f32,
    pub full_life_minutes: u32,
}

impl Default for BatteryCurve {
    fn default() -> Self {
        Self {
            empty_volts: 0.5,
            full_volts: 0.7,
            full_life_minutes: 480,
        }
    }
}

impl BatteryStatus {
    /// Linear charge estimate between the calibrated empty and full voltages.
    pub fn from_voltage(voltage: f32, curve: &BatteryCurve) -> Self {
        let span = curve.full_volts - curve.empty_volts;
        let ratio = if span > 0.0 {
            ((voltage - curve.empty_volts) / span).clamp(0.0, 1.0)
        } else {
            0.0
        };
        let percentage = (ratio * 100.0) as u8;

        Self {
            voltage,
            percentage,
            minutes_remaining: u32::from(percentage) * curve.full_life_minutes / 100,
        }
    }

    pub fn is_low(&self, threshold_pct: u8) -> bool {
        self.percentage < threshold_pct
    }
}

/// One acquisition cycle. `None` marks a reading the sensor could not deliver.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorReading {
    pub temperature_c: Option<f32>,
    pub humidity: Option<f32>,
    pub battery: Option<BatteryStatus>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterPayload {
    #[serde(rename = "deviceId")]
    pub device_id: String,
    #[serde(rename = "modelType")]
    pub model_type: String,
    #[serde(rename = "firmwareVersion")]
    pub firmware_version: String,
}

impl RegisterPayload {
    pub fn from_context(ctx: &DeviceContext) -> Self {
        Self {
            device_id: ctx.device_id.clone(),
            model_type: ctx.model_type.clone(),
            firmware_version: ctx.firmware_version.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadingPayload {
    #[serde(rename = "deviceId")]
    pub device_id: String,
    #[serde(rename = "modelType")]
    pub model_type: String,
    #[serde(rename = "firmwareVersion")]
    pub firmware_version: String,
    pub temperature: f32,
    pub humidity: f32,
    #[serde(rename = "batteryVoltage", skip_serializing_if = "Option::is_none", default)]
    pub battery_voltage: Option<f32>,
    #[serde(rename = "batteryPercentage", skip_serializing_if = "Option::is_none", default)]
    pub battery_percentage: Option<u8>,
    #[serde(rename = "batteryTimeRemaining", skip_serializing_if = "Option::is_none", default)]
    pub battery_time_remaining: Option<u32>,
    pub timestamp: i64,
}

impl ReadingPayload {
    /// Returns `None` when temperature or humidity is unavailable.
    pub fn build(ctx: &DeviceContext, reading: &SensorReading, timestamp: i64) -> Option<Self> {
        let temperature = reading.temperature_c.filter(|value| value.is_finite())?;
        let humidity = reading.humidity.filter(|value| value.is_finite())?;

        Some(Self {
            device_id: ctx.device_id.clone(),
            model_type: ctx.model_type.clone(),
            firmware_version: ctx.firmware_version.clone(),
            temperature,
            humidity,
            battery_voltage: reading.battery.map(|battery| battery.voltage),
            battery_percentage: reading.battery.map(|battery| battery.percentage),
            battery_time_remaining: reading.battery.map(|battery| battery.minutes_remaining),
            timestamp,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateStatusPayload {
    #[serde(rename = "deviceId")]
    pub device_id: String,
    #[serde(rename = "modelType")]
    pub model_type: String,
    #[serde(rename = "firmwareVersion")]
    pub firmware_version: String,
    #[serde(rename = "targetVersion")]
    pub target_version: String,
    pub status: String,
}
