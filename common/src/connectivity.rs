use std::net::Ipv4Addr;

use log::{error, info, warn};

use crate::{
    config::{WifiConfig, WifiCredentials},
    platform::{Clock, Display, LinkStatus, WifiRadio},
    types::{ConnectionState, DisplayState},
};

pub struct ConnectivityManager<R, C, D> {
    radio: R,
    clock: C,
    display: D,
    config: WifiConfig,
    state: ConnectionState,
    credentials: Option<WifiCredentials>,
}

impl<R: WifiRadio, C: Clock, D: Display> ConnectivityManager<R, C, D> {
    pub fn new(radio: R, clock: C, display: D, config: WifiConfig) -> Self {
        Self {
            radio,
            clock,
            display,
            config,
            state: ConnectionState::Disconnected,
            credentials: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn display(&self) -> &D {
        &self.display
    }

    pub fn radio(&self) -> &R {
        &self.radio
    }

    pub fn radio_mut(&mut self) -> &mut R {
        &mut self.radio
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected && self.radio.is_associated()
    }

    /// Associates and waits for an address, bounded by the connect timeout.
    /// The only recovery inside the attempt is the periodic radio reset.
    pub fn connect(&mut self, ssid: &str, password: &str) -> bool {
        let credentials = WifiCredentials {
            ssid: ssid.to_string(),
            password: password.to_string(),
        };
        if !credentials.is_configured() {
            return self.fail("no WiFi credentials configured");
        }

        self.state = ConnectionState::Connecting;
        self.display.show(DisplayState::Connecting);
        info!("Connecting to WiFi SSID '{ssid}'");
        self.credentials = Some(credentials.clone());

        if self.radio.is_associated() {
            self.radio.disconnect();
            self.clock.sleep_ms(self.config.disconnect_settle_ms);
        }

        let started = self.clock.now_ms();
        if let Err(err) = self.radio.begin(&credentials) {
            return self.fail(&format!("radio rejected connect: {err}"));
        }

        let mut failed_polls = 0;
        while !self.radio.is_associated() {
            if self.clock.elapsed_since(started) >= self.config.connect_timeout_ms {
                return self.fail("association timed out");
            }
            self.clock.sleep_ms(self.config.status_poll_ms);

            failed_polls += 1;
            if failed_polls >= self.config.radio_reset_after_polls {
                warn!("WiFi still unassociated after {failed_polls} polls, resetting radio");
                self.radio.disconnect();
                self.clock.sleep_ms(self.config.radio_reset_settle_ms);
                if let Err(err) = self.radio.begin(&credentials) {
                    return self.fail(&format!("radio rejected reconnect: {err}"));
                }
                failed_polls = 0;
            }
        }

        let ip = loop {
            if let Some(ip) = self.radio.local_ip().filter(|ip| !ip.is_unspecified()) {
                break ip;
            }
            if self.clock.elapsed_since(started) >= self.config.connect_timeout_ms {
                return self.fail("associated but no address assigned");
            }
            self.clock.sleep_ms(self.config.address_poll_ms);
        };

        self.mark_connected(ip);
        true
    }

    pub fn reconnect(&mut self) -> bool {
        match self.credentials.clone() {
            Some(credentials) => self.connect(&credentials.ssid, &credentials.password),
            None => self.fail("reconnect requested before any connect"),
        }
    }

    pub fn poll(&mut self) -> ConnectionState {
        match self.state {
            ConnectionState::Connected => {
                if !self.radio.is_associated() || self.radio.local_ip().is_none() {
                    warn!("WiFi link lost");
                    self.state = ConnectionState::Disconnected;
                    self.display.show(DisplayState::Sad);
                }
            }
            ConnectionState::Disconnected if self.credentials.is_some() => {
                if self.radio.is_associated() {
                    if let Some(ip) = self.radio.local_ip() {
                        self.mark_connected(ip);
                    }
                }
            }
            _ => {}
        }
        self.state
    }

    fn mark_connected(&mut self, ip: Ipv4Addr) {
        self.state = ConnectionState::Connected;
        self.display.show(DisplayState::Happy);
        match self.radio.rssi() {
            Some(rssi) => info!("WiFi connected: ip={ip} rssi={rssi} dBm"),
            None => info!("WiFi connected: ip={ip}"),
        }
    }

    fn fail(&mut self, reason: &str) -> bool {
        error!("WiFi connect failed: {reason}");
        self.radio.disconnect();
        self.state = ConnectionState::Disconnected;
        self.display.show(DisplayState::Sad);
        false
    }
}

impl<R: WifiRadio, C: Clock, D: Display> LinkStatus for ConnectivityManager<R, C, D> {
    fn is_connected(&self) -> bool {
        ConnectivityManager::is_connected(self)
    }
}
