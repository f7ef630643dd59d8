use std::{
    io,
    net::Ipv4Addr,
    thread,
    time::{Duration, Instant},
};

use log::info;

use crate::{
    config::WifiCredentials,
    error::{RadioError, StorageError},
    types::{BatteryStatus, DisplayState},
};

pub trait Clock {
    fn now_ms(&self) -> u64;
    fn sleep_ms(&self, ms: u64);

    fn elapsed_since(&self, start_ms: u64) -> u64 {
        self.now_ms().saturating_sub(start_ms)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    start: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.start
            .elapsed()
            .as_millis()
            .try_into()
            .unwrap_or(u64::MAX)
    }

    fn sleep_ms(&self, ms: u64) {
        thread::sleep(Duration::from_millis(ms));
    }
}

/// Byte-stream socket. `read_available` never blocks for longer than a
/// platform tick and returns 0 when nothing is pending.
pub trait Transport {
    fn connect(&mut self, host: &str, port: u16) -> io::Result<()>;
    fn write(&mut self, bytes: &[u8]) -> io::Result<()>;
    fn read_available(&mut self, buf: &mut [u8]) -> usize;
    fn is_connected(&self) -> bool;
    fn close(&mut self);
}

pub trait WifiRadio {
    fn begin(&mut self, credentials: &WifiCredentials) -> Result<(), RadioError>;
    fn disconnect(&mut self);
    fn is_associated(&self) -> bool;
    fn local_ip(&self) -> Option<Ipv4Addr>;
    fn rssi(&self) -> Option<i8>;
}

pub trait LinkStatus {
    fn is_connected(&self) -> bool;
}

pub trait Display {
    fn show(&self, state: DisplayState);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LogDisplay;

impl Display for LogDisplay {
    fn show(&self, state: DisplayState) {
        info!("[display] {state:?}");
    }
}

pub trait UpdateStorage {
    fn open(&mut self, size: u32) -> Result<(), StorageError>;
    /// Returns how many bytes were accepted.
    fn write(&mut self, bytes: &[u8]) -> usize;
    fn commit(&mut self) -> Result<(), StorageError>;
    fn abort(&mut self);
    /// Boots into the committed image. Does not return on hardware.
    fn apply(&mut self);
}

pub trait CredentialStore {
    fn get(&self) -> Option<WifiCredentials>;
    fn set(&mut self, credentials: &WifiCredentials) -> Result<(), StorageError>;
}

pub trait SensorSource {
    fn temperature_c(&mut self) -> Option<f32>;
    fn humidity(&mut self) -> Option<f32>;
    fn battery(&mut self) -> Option<BatteryStatus>;
}
