use log::{debug, info, warn};

use crate::{
    config::{DeviceContext, NodeConfig, WifiCredentials},
    connectivity::ConnectivityManager,
    http::HttpClient,
    ota::{UpdateOrchestrator, UpdateOutcome},
    panel::{NodeStatus, ReadingView},
    platform::{Clock, Display, SensorSource, Transport, UpdateStorage, WifiRadio},
    reporter::Reporter,
    retry::RetryPolicy,
    scheduler::{NodeAction, NodeScheduler},
    types::{ConnectionState, DisplayState, SensorReading},
    uplink::Uplink,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeControl {
    Continue,
    /// The platform should reboot: the link never came back or a new image
    /// was applied.
    Restart,
}

/// The sensor node's main loop, platform-independent.
pub struct Node<R, T, C, D, S, X> {
    uplink: Uplink<R, T, C, D>,
    reporter: Reporter,
    updater: UpdateOrchestrator<S, D, C>,
    scheduler: NodeScheduler,
    reconnect: RetryPolicy,
    sensors: X,
    clock: C,
    low_battery_pct: u8,
    last_reading: Option<ReadingView>,
}

impl<R, T, C, D, S, X> Node<R, T, C, D, S, X>
where
    R: WifiRadio,
    T: Transport,
    C: Clock + Clone + 'static,
    D: Display + Clone,
    S: UpdateStorage,
    X: SensorSource,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        radio: R,
        transport: T,
        storage: S,
        sensors: X,
        display: D,
        clock: C,
        context: DeviceContext,
        config: &NodeConfig,
    ) -> Self {
        let wifi = ConnectivityManager::new(
            radio,
            clock.clone(),
            display.clone(),
            config.wifi.clone(),
        );
        let http = HttpClient::new(transport, clock.clone(), config.http.clone());

        Self {
            uplink: Uplink::new(wifi, http, config.server.clone()),
            reporter: Reporter::new(
                RetryPolicy::from_config(&config.retry, clock.clone()),
                context.clone(),
                config.routes.clone(),
            ),
            updater: UpdateOrchestrator::new(storage, display, clock.clone(), context, config),
            scheduler: NodeScheduler::new(config.schedule.clone()),
            reconnect: RetryPolicy::from_config(&config.retry, clock.clone()),
            sensors,
            clock,
            low_battery_pct: config.schedule.low_battery_pct,
            last_reading: None,
        }
    }

    pub fn uplink(&self) -> &Uplink<R, T, C, D> {
        &self.uplink
    }

    pub fn updater(&self) -> &UpdateOrchestrator<S, D, C> {
        &self.updater
    }

    /// Joins the network, registers and runs the first update check.
    pub fn boot(&mut self, credentials: &WifiCredentials) -> NodeControl {
        self.uplink.display().show(DisplayState::Neutral);
        info!(
            "Booting {} firmware {} as {}",
            self.reporter.context().model_type,
            self.reporter.context().firmware_version,
            self.reporter.context().device_id
        );

        if !self
            .uplink
            .wifi_mut()
            .connect(&credentials.ssid, &credentials.password)
        {
            warn!("Starting without WiFi, will keep retrying");
            return NodeControl::Continue;
        }

        self.reporter.register(&mut self.uplink);
        let control = self.check_for_update();
        self.scheduler.mark_update_checked(self.clock.now_ms());
        control
    }

    /// One pass of the main loop. `timestamp` stamps any reading sent.
    pub fn step(&mut self, timestamp: i64) -> NodeControl {
        let link = self.uplink.poll();
        let actions = self.scheduler.tick(self.clock.now_ms(), link);

        for action in actions {
            let control = match action {
                NodeAction::Reconnect => {
                    self.reconnect_wifi();
                    NodeControl::Continue
                }
                NodeAction::SendReading => {
                    self.send_reading(timestamp);
                    NodeControl::Continue
                }
                NodeAction::LogBattery => {
                    self.log_battery();
                    NodeControl::Continue
                }
                NodeAction::CheckForUpdate => self.check_for_update(),
                NodeAction::Restart => {
                    warn!("WiFi down past restart grace period");
                    NodeControl::Restart
                }
            };
            if control == NodeControl::Restart {
                return control;
            }
        }

        NodeControl::Continue
    }

    fn reconnect_wifi(&mut self) {
        warn!("WiFi disconnected, reconnecting");
        self.uplink.display().show(DisplayState::Sad);

        let max = self.reconnect.max_attempts();
        let connected = self.reconnect.execute(
            &mut self.uplink,
            |uplink, _| uplink.reconnect(),
            |_, attempt| {
                info!("WiFi reconnect attempt {} of {max}", attempt + 1);
                true
            },
        );
        if !connected {
            warn!("WiFi still down after {max} attempts");
        }
    }

    fn send_reading(&mut self, timestamp: i64) {
        let reading = SensorReading {
            temperature_c: self.sensors.temperature_c(),
            humidity: self.sensors.humidity(),
            battery: self.sensors.battery(),
        };
        self.last_reading = Some(ReadingView::new(&reading, timestamp, self.low_battery_pct));
        self.reporter.send_reading(&mut self.uplink, &reading, timestamp);
    }

    fn log_battery(&mut self) {
        match self.sensors.battery() {
            Some(battery) if battery.is_low(self.low_battery_pct) => warn!(
                "Battery low: {:.2} V, {}%, ~{} min remaining",
                battery.voltage, battery.percentage, battery.minutes_remaining
            ),
            Some(battery) => info!(
                "Battery: {:.2} V, {}%, ~{} min remaining",
                battery.voltage, battery.percentage, battery.minutes_remaining
            ),
            None => warn!("Battery status unavailable"),
        }
    }

    fn check_for_update(&mut self) -> NodeControl {
        match self.updater.check_for_update(&mut self.uplink) {
            Ok(UpdateOutcome::Applied { version, .. }) => {
                info!("Firmware {version} applied, restart required");
                NodeControl::Restart
            }
            Ok(UpdateOutcome::UpToDate { .. }) => NodeControl::Continue,
            Err(err) => {
                debug!("Update check ended without update: {err}");
                NodeControl::Continue
            }
        }
    }

    pub fn link_state(&self) -> ConnectionState {
        self.uplink.wifi().state()
    }

    pub fn status(&self) -> NodeStatus {
        let link = self.link_state();
        let ip_address = match link {
            ConnectionState::Connected => self.uplink.wifi().radio().local_ip(),
            _ => None,
        };
        let mut status = NodeStatus::new(
            self.reporter.context(),
            link,
            ip_address,
            self.updater.state(),
        );
        status.last_reading = self.last_reading.clone();
        status
    }
}
