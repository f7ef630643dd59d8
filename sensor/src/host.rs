use std::{
    fs::{self, File},
    io::Write as _,
    net::Ipv4Addr,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::Context;
use tracing::{info, warn};

use climate_common::{
    identity::device_id_from_mac, BatteryCurve, BatteryStatus, Clock, DeviceContext, LogDisplay,
    Node, NodeConfig, NodeControl, RadioError, SensorSource, StorageError, SystemClock,
    TcpTransport, UpdateStorage, WifiCredentials, WifiRadio,
};

const HOST_MAC: [u8; 6] = [0x02, 0x00, 0x00, 0xc1, 0x1a, 0x7e];
const STEP_INTERVAL: Duration = Duration::from_secs(1);

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = load_config()?;
    let device_id =
        std::env::var("DEVICE_ID").unwrap_or_else(|_| device_id_from_mac(HOST_MAC));
    let credentials = WifiCredentials {
        ssid: std::env::var("WIFI_SSID").unwrap_or_else(|_| "host-sim".to_string()),
        password: std::env::var("WIFI_PASS").unwrap_or_default(),
    };
    let image_dir = PathBuf::from(
        std::env::var("OTA_DIR").unwrap_or_else(|_| ".climate".to_string()),
    );
    fs::create_dir_all(&image_dir)
        .with_context(|| format!("failed to create {}", image_dir.display()))?;

    info!(
        "sensor simulation for {} reporting to {}:{}",
        device_id, config.server.host, config.server.port
    );

    let stop = Arc::new(AtomicBool::new(false));
    let worker_stop = stop.clone();
    let worker = tokio::task::spawn_blocking(move || {
        let clock = SystemClock::new();
        let mut node = Node::new(
            SimulatedRadio::default(),
            TcpTransport::default(),
            FileStorage::new(image_dir),
            SimulatedSensors::new(clock),
            LogDisplay,
            clock,
            DeviceContext::new(device_id),
            &config,
        );

        if node.boot(&credentials) == NodeControl::Restart {
            return NodeControl::Restart;
        }

        while !worker_stop.load(Ordering::Relaxed) {
            if node.step(chrono::Utc::now().timestamp()) == NodeControl::Restart {
                return NodeControl::Restart;
            }
            std::thread::sleep(STEP_INTERVAL);
        }
        NodeControl::Continue
    });

    tokio::select! {
        outcome = worker => {
            if outcome.context("node loop panicked")? == NodeControl::Restart {
                warn!("node requested a restart; exiting so the supervisor can relaunch");
            }
        }
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for ctrl-c")?;
            info!("shutting down sensor simulation");
            stop.store(true, Ordering::Relaxed);
        }
    }

    Ok(())
}

fn load_config() -> anyhow::Result<NodeConfig> {
    let mut config = match std::env::var("NODE_CONFIG") {
        Ok(path) => {
            let raw = fs::read_to_string(&path)
                .with_context(|| format!("failed to read node config {path}"))?;
            serde_json::from_str::<NodeConfig>(&raw)
                .with_context(|| format!("failed to parse node config {path}"))?
        }
        Err(_) => NodeConfig::default(),
    };

    if let Ok(host) = std::env::var("SERVER_HOST") {
        config.server.host = host;
    } else if std::env::var("NODE_CONFIG").is_err() {
        config.server.host = "127.0.0.1".to_string();
    }
    if let Some(port) = std::env::var("SERVER_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
    {
        config.server.port = port;
    }

    config.sanitize();
    Ok(config)
}

/// The host is always on the network; association completes immediately.
#[derive(Debug, Default)]
struct SimulatedRadio {
    associated: bool,
}

impl WifiRadio for SimulatedRadio {
    fn begin(&mut self, credentials: &WifiCredentials) -> Result<(), RadioError> {
        info!("simulated radio joining `{}`", credentials.ssid);
        self.associated = true;
        Ok(())
    }

    fn disconnect(&mut self) {
        self.associated = false;
    }

    fn is_associated(&self) -> bool {
        self.associated
    }

    fn local_ip(&self) -> Option<Ipv4Addr> {
        self.associated.then_some(Ipv4Addr::LOCALHOST)
    }

    fn rssi(&self) -> Option<i8> {
        None
    }
}

/// Writes the received image to `<dir>/ota.bin.part` and renames it on
/// commit.
struct FileStorage {
    dir: PathBuf,
    file: Option<File>,
}

impl FileStorage {
    fn new(dir: PathBuf) -> Self {
        Self { dir, file: None }
    }

    fn partial_path(&self) -> PathBuf {
        self.dir.join("ota.bin.part")
    }

    fn image_path(&self) -> PathBuf {
        self.dir.join("ota.bin")
    }
}

impl UpdateStorage for FileStorage {
    fn open(&mut self, size: u32) -> Result<(), StorageError> {
        let file = File::create(self.partial_path())
            .map_err(|err| StorageError(format!("create partial image: {err}")))?;
        file.set_len(0)
            .map_err(|err| StorageError(format!("truncate partial image: {err}")))?;
        info!("receiving {size} byte image into {}", self.partial_path().display());
        self.file = Some(file);
        Ok(())
    }

    fn write(&mut self, bytes: &[u8]) -> usize {
        match self.file.as_mut().map(|file| file.write_all(bytes)) {
            Some(Ok(())) => bytes.len(),
            Some(Err(err)) => {
                warn!("image write failed: {err}");
                0
            }
            None => 0,
        }
    }

    fn commit(&mut self) -> Result<(), StorageError> {
        let file = self
            .file
            .take()
            .ok_or_else(|| StorageError("no open image".to_string()))?;
        file.sync_all()
            .map_err(|err| StorageError(format!("sync image: {err}")))?;
        fs::rename(self.partial_path(), self.image_path())
            .map_err(|err| StorageError(format!("rename image: {err}")))
    }

    fn abort(&mut self) {
        self.file = None;
        if let Err(err) = fs::remove_file(self.partial_path()) {
            warn!("failed to remove partial image: {err}");
        }
    }

    fn apply(&mut self) {
        info!("image staged at {}", self.image_path().display());
    }
}

/// Slowly drifting readings and a battery that drains over the run.
struct SimulatedSensors {
    clock: SystemClock,
    curve: BatteryCurve,
}

impl SimulatedSensors {
    fn new(clock: SystemClock) -> Self {
        Self {
            clock,
            curve: BatteryCurve::default(),
        }
    }

    fn phase(&self) -> f32 {
        (self.clock.now_ms() / 10_000 % 12) as f32
    }
}

impl SensorSource for SimulatedSensors {
    fn temperature_c(&mut self) -> Option<f32> {
        Some(21.0 + self.phase() * 0.1)
    }

    fn humidity(&mut self) -> Option<f32> {
        Some(42.0 + self.phase() * 0.5)
    }

    fn battery(&mut self) -> Option<BatteryStatus> {
        let drained_hours = self.clock.now_ms() as f32 / 3_600_000.0;
        let voltage = (self.curve.full_volts - drained_hours * 0.01).max(self.curve.empty_volts);
        Some(BatteryStatus::from_voltage(voltage, &self.curve))
    }
}
