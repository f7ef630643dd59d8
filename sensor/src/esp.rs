use core::{convert::TryInto, ptr};
use std::{
    net::Ipv4Addr,
    sync::{mpsc, Arc, Mutex, PoisonError},
    thread,
    time::{Duration, Instant},
};

use anyhow::{anyhow, Context};
use dht_sensor::dht22;
use embedded_svc::{
    http::{Headers, Method},
    io::{Read, Write},
    wifi::{AuthMethod, ClientConfiguration, Configuration},
};
use esp_idf_hal::{
    adc::{
        attenuation::DB_11,
        oneshot::{config::AdcChannelConfig, AdcChannelDriver, AdcDriver},
        ADC1,
    },
    delay::Ets,
    gpio::{AnyIOPin, Gpio3, IOPin, InputOutput, PinDriver, Pull},
};
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    hal::prelude::Peripherals,
    http::server::{Configuration as HttpServerConfiguration, EspHttpServer},
    log::EspLogger,
    nvs::{EspDefaultNvsPartition, EspNvs, NvsDefault},
    ota::EspOta,
    sntp::EspSntp,
    sys::{self, EspError},
    wifi::EspWifi,
};
use log::{error, info, warn};
use serde::Serialize;

use climate_common::{
    identity::device_id_from_mac, BatteryCurve, BatteryStatus, Clock, CredentialStore,
    DeviceContext, LogDisplay, Node, NodeConfig, NodeControl, NodeStatus, RadioError,
    SensorSource, StorageError, TcpTransport, UpdateStorage, WifiCredentials, WifiRadio,
    WifiSettingsUpdate, WifiSettingsView,
};

const NVS_NAMESPACE: &str = "climate";
const NVS_CONFIG_KEY: &str = "node_json";
const NVS_SSID_KEY: &str = "wifi_ssid";
const NVS_PASS_KEY: &str = "wifi_pass";

const DHT22_PIN: i32 = 4;
const WATCHDOG_TIMEOUT_SEC: u32 = 90;
const STEP_INTERVAL_MS: u64 = 1_000;
const OTA_WRITER_STACK_SIZE: usize = 8 * 1024;
const MAX_HTTP_BODY: usize = 1024;
/// DHT22 needs two seconds between conversions.
const DHT22_MIN_INTERVAL_MS: u64 = 2_000;
/// 12-bit ADC, 11 dB attenuation, ~3.3 V full scale.
const ADC_FULL_SCALE_VOLTS: f32 = 3.3;
const ADC_MAX: f32 = 4095.0;

type BatteryChannel = AdcChannelDriver<'static, Gpio3, AdcDriver<'static, ADC1>>;

const PANEL_HTML: &str = r#"<!doctype html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <meta name="viewport" content="width=device-width, initial-scale=1">
  <title>Climate Sensor</title>
  <style>
    body{font-family:Arial,sans-serif;max-width:640px;margin:2rem auto;padding:0 1rem;color:#111}
    .card{border:1px solid #ddd;border-radius:10px;padding:1rem;margin-bottom:1rem}
    label{display:block;margin:.5rem 0 .2rem}
    input{width:100%;padding:.5rem;box-sizing:border-box}
    button{padding:.55rem .9rem;margin-top:.8rem}
    .muted{color:#555}.ok{color:#106010}.err{color:#a00000}
    p{margin:.35rem 0}
  </style>
</head>
<body>
  <h1>Climate Sensor</h1>

  <div class="card">
    <h2>Status</h2>
    <p>Device: <span id="deviceId">--</span> (<span id="modelType">--</span>)</p>
    <p>Firmware: <span id="firmwareVersion">--</span></p>
    <p>WiFi: <span id="link">--</span> <span id="ipAddress" class="muted"></span></p>
    <p>Update: <span id="updateState">--</span></p>
    <p>Temperature: <span id="temperature">--</span></p>
    <p>Humidity: <span id="humidity">--</span></p>
    <p>Battery: <span id="battery">--</span></p>
  </div>

  <div class="card">
    <h2>WiFi Settings</h2>
    <label>SSID</label><input id="ssid" type="text">
    <label>Password (leave blank to keep current)</label><input id="password" type="password">
    <button id="save">Save</button>
    <button id="restart">Restart Device</button>
  </div>

  <p id="message" class="muted"></p>

  <script>
    const q=(id)=>document.getElementById(id);
    const fmt=(v,unit)=>v===null||v===undefined?'--':v.toFixed(1)+unit;

    async function api(path,opt){
      const r=await fetch(path,opt);let b={};
      try{b=await r.json();}catch(_){}
      if(!r.ok)throw new Error(b.error||('Request failed: '+r.status));
      return b;
    }

    async function loadStatus(){
      const s=await api('/api/status');
      for(const k of ['deviceId','modelType','firmwareVersion','link','updateState'])q(k).textContent=s[k];
      q('ipAddress').textContent=s.ipAddress||'';
      const r=s.lastReading;
      q('temperature').textContent=r?fmt(r.temperature,' °C'):'--';
      q('humidity').textContent=r?fmt(r.humidity,' %'):'--';
      q('battery').textContent=r&&r.batteryPercentage!==null
        ?r.batteryPercentage+'%'+(r.batteryLow?' (low)':''):'--';
    }

    async function loadSettings(){
      const s=await api('/api/settings');
      q('ssid').value=s.ssid;
    }

    q('save').addEventListener('click', async ()=>{
      const body={ssid:q('ssid').value,password:q('password').value||null};
      try{
        const res=await api('/api/settings',{method:'POST',headers:{'Content-Type':'application/json'},body:JSON.stringify(body)});
        q('message').className='ok';
        q('message').textContent='Saved. restartRequired='+String(!!res.restartRequired);
        q('password').value='';
      }catch(e){q('message').className='err';q('message').textContent=e.message;}
    });

    q('restart').addEventListener('click', async ()=>{
      try{await api('/api/restart',{method:'POST'});q('message').className='ok';q('message').textContent='Restart requested.';}
      catch(e){q('message').className='err';q('message').textContent=e.message;}
    });

    loadStatus().catch(e=>{q('message').className='err';q('message').textContent=e.message;});
    loadSettings().catch(()=>{});
    setInterval(()=>loadStatus().catch(()=>{}),5000);
  </script>
</body>
</html>
"#;

pub fn run() -> anyhow::Result<()> {
    sys::link_patches();
    EspLogger::initialize_default();

    let sys_loop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;
    let mut nvs = NvsStore::new(nvs_partition.clone());

    let mut config = nvs.load_config().unwrap_or_else(|err| {
        warn!("failed to load node config from NVS: {err:#}");
        NodeConfig::default()
    });
    config.sanitize();

    let credentials = match nvs.get() {
        Some(credentials) => credentials,
        None => {
            let credentials = compiled_credentials();
            if credentials.is_configured() {
                if let Err(err) = nvs.set(&credentials) {
                    warn!("failed to persist compiled-in credentials: {err}");
                }
            }
            credentials
        }
    };

    let ota = OtaPartition::spawn()?;

    let Peripherals {
        modem, pins, adc1, ..
    } = Peripherals::take()?;

    let wifi = EspWifi::new(modem, sys_loop, Some(nvs_partition))?;
    let mac = wifi
        .sta_netif()
        .get_mac()
        .context("failed to read station MAC")?;
    let context = DeviceContext::new(device_id_from_mac(mac));

    let sensors = Dht22Sensors::new(pins.gpio4.downgrade(), adc1, pins.gpio3)
        .context("failed to initialize sensors")?;

    init_watchdog(WATCHDOG_TIMEOUT_SEC)?;
    add_current_task_to_watchdog()?;

    let clock = EspClock::new();
    let mut node = Node::new(
        EspRadio::new(wifi),
        TcpTransport::default(),
        ota,
        sensors,
        LogDisplay,
        clock,
        context,
        &config,
    );

    if node.boot(&credentials) == NodeControl::Restart {
        restart();
    }
    disable_wifi_power_save();

    let status = Arc::new(Mutex::new(node.status()));
    let _server = match create_http_server(nvs.clone(), status.clone()) {
        Ok(server) => Some(server),
        Err(err) => {
            warn!("failed to start control panel: {err:#}");
            None
        }
    };

    // Readings are stamped with wall-clock time once SNTP has synced.
    let _sntp = match EspSntp::new_default() {
        Ok(sntp) => Some(sntp),
        Err(err) => {
            warn!("failed to start SNTP: {err:?}");
            None
        }
    };

    loop {
        if node.step(unix_time()) == NodeControl::Restart {
            restart();
        }
        publish_status(&status, node.status());
        clock.sleep_ms(STEP_INTERVAL_MS);
    }
}

fn compiled_credentials() -> WifiCredentials {
    WifiCredentials {
        ssid: option_env!("WIFI_SSID").unwrap_or("CHANGE_ME").to_string(),
        password: option_env!("WIFI_PASS").unwrap_or_default().to_string(),
    }
}

fn unix_time() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as i64)
        .unwrap_or(0)
}

fn restart() -> ! {
    warn!("restarting device");
    thread::sleep(Duration::from_millis(100));
    unsafe { sys::esp_restart() }
}

/// Wall clock for the core. Every wait in the core goes through
/// `sleep_ms`, so that is where the task watchdog is fed.
#[derive(Debug, Clone, Copy)]
struct EspClock {
    start: Instant,
}

impl EspClock {
    fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Clock for EspClock {
    fn now_ms(&self) -> u64 {
        self.start
            .elapsed()
            .as_millis()
            .try_into()
            .unwrap_or(u64::MAX)
    }

    fn sleep_ms(&self, ms: u64) {
        feed_watchdog();
        thread::sleep(Duration::from_millis(ms));
    }
}

struct EspRadio {
    wifi: EspWifi<'static>,
}

impl EspRadio {
    fn new(wifi: EspWifi<'static>) -> Self {
        Self { wifi }
    }
}

impl WifiRadio for EspRadio {
    fn begin(&mut self, credentials: &WifiCredentials) -> Result<(), RadioError> {
        let auth_method = if credentials.password.is_empty() {
            AuthMethod::None
        } else {
            AuthMethod::WPAWPA2Personal
        };

        let configuration = Configuration::Client(ClientConfiguration {
            ssid: credentials
                .ssid
                .as_str()
                .try_into()
                .map_err(|_| RadioError("wifi ssid too long".to_string()))?,
            password: credentials
                .password
                .as_str()
                .try_into()
                .map_err(|_| RadioError("wifi password too long".to_string()))?,
            auth_method,
            ..Default::default()
        });

        self.wifi
            .set_configuration(&configuration)
            .map_err(|err| RadioError(format!("set configuration: {err:?}")))?;
        if !self.wifi.is_started().unwrap_or(false) {
            self.wifi
                .start()
                .map_err(|err| RadioError(format!("start: {err:?}")))?;
        }
        self.wifi
            .connect()
            .map_err(|err| RadioError(format!("connect: {err:?}")))
    }

    fn disconnect(&mut self) {
        if let Err(err) = self.wifi.disconnect() {
            warn!("wifi disconnect failed: {err:?}");
        }
    }

    fn is_associated(&self) -> bool {
        self.wifi.is_connected().unwrap_or(false)
    }

    fn local_ip(&self) -> Option<Ipv4Addr> {
        self.wifi
            .sta_netif()
            .get_ip_info()
            .ok()
            .map(|info| info.ip)
            .filter(|ip| !ip.is_unspecified())
    }

    fn rssi(&self) -> Option<i8> {
        let mut ap_info = sys::wifi_ap_record_t::default();
        let rc = unsafe { sys::esp_wifi_sta_get_ap_info(&mut ap_info) };
        (rc == sys::ESP_OK).then_some(ap_info.rssi)
    }
}

enum OtaCommand {
    Begin(u32),
    Write(Vec<u8>),
    Commit,
    Abort,
}

type OtaReply = Result<(), String>;

/// The inactive OTA slot. `EspOtaUpdate` borrows `EspOta`, so both live on a
/// writer thread and the node talks to it over channels.
struct OtaPartition {
    commands: mpsc::Sender<OtaCommand>,
    replies: mpsc::Receiver<OtaReply>,
    open: bool,
}

impl OtaPartition {
    fn spawn() -> anyhow::Result<Self> {
        let (command_tx, command_rx) = mpsc::channel();
        let (reply_tx, reply_rx) = mpsc::channel();
        thread::Builder::new()
            .name("ota-writer".into())
            .stack_size(OTA_WRITER_STACK_SIZE)
            .spawn(move || run_ota_writer(command_rx, reply_tx))
            .context("failed to spawn OTA writer")?;

        let partition = Self {
            commands: command_tx,
            replies: reply_rx,
            open: false,
        };
        partition
            .await_reply()
            .map_err(|err| anyhow!("OTA unavailable: {err}"))?;
        Ok(partition)
    }

    fn request(&self, command: OtaCommand) -> OtaReply {
        self.commands
            .send(command)
            .map_err(|_| "OTA writer stopped".to_string())?;
        self.await_reply()
    }

    fn await_reply(&self) -> OtaReply {
        self.replies
            .recv()
            .unwrap_or_else(|_| Err("OTA writer stopped".to_string()))
    }
}

impl UpdateStorage for OtaPartition {
    fn open(&mut self, size: u32) -> Result<(), StorageError> {
        self.request(OtaCommand::Begin(size)).map_err(StorageError)?;
        self.open = true;
        Ok(())
    }

    fn write(&mut self, bytes: &[u8]) -> usize {
        match self.request(OtaCommand::Write(bytes.to_vec())) {
            Ok(()) => bytes.len(),
            Err(err) => {
                warn!("OTA write failed: {err}");
                0
            }
        }
    }

    fn commit(&mut self) -> Result<(), StorageError> {
        self.open = false;
        self.request(OtaCommand::Commit).map_err(StorageError)
    }

    fn abort(&mut self) {
        if self.open {
            self.open = false;
            if let Err(err) = self.request(OtaCommand::Abort) {
                warn!("OTA abort failed: {err}");
            }
        }
    }

    fn apply(&mut self) {
        info!("new image selected for boot");
        restart();
    }
}

fn run_ota_writer(commands: mpsc::Receiver<OtaCommand>, replies: mpsc::Sender<OtaReply>) {
    let mut ota = match EspOta::new() {
        Ok(ota) => ota,
        Err(err) => {
            let _ = replies.send(Err(format!("failed to acquire OTA: {err:?}")));
            return;
        }
    };
    if let Err(err) = ota.mark_running_slot_valid() {
        warn!("failed to mark running OTA slot valid: {err:?}");
    }
    let _ = replies.send(Ok(()));

    while let Ok(command) = commands.recv() {
        let OtaCommand::Begin(size) = command else {
            let _ = replies.send(Err("no OTA session open".to_string()));
            continue;
        };

        let mut update = match ota.initiate_update() {
            Ok(update) => update,
            Err(err) => {
                let _ = replies.send(Err(format!("failed to initiate OTA update: {err:?}")));
                continue;
            }
        };
        info!("OTA session open for {size} bytes");
        let _ = replies.send(Ok(()));

        loop {
            let reply = match commands.recv() {
                Ok(OtaCommand::Write(bytes)) => update
                    .write(&bytes)
                    .map(|_| ())
                    .map_err(|err| format!("failed writing OTA data: {err:?}")),
                Ok(OtaCommand::Begin(_)) => Err("OTA session already open".to_string()),
                Ok(OtaCommand::Commit) => {
                    let reply = update
                        .complete()
                        .map(|_| ())
                        .map_err(|err| format!("failed finalizing OTA image: {err:?}"));
                    let _ = replies.send(reply);
                    break;
                }
                Ok(OtaCommand::Abort) => {
                    let reply = update
                        .abort()
                        .map(|_| ())
                        .map_err(|err| format!("failed aborting OTA update: {err:?}"));
                    let _ = replies.send(reply);
                    break;
                }
                Err(_) => {
                    if let Err(err) = update.abort() {
                        warn!("failed aborting orphaned OTA update: {err:?}");
                    }
                    return;
                }
            };
            let _ = replies.send(reply);
        }
    }
}

struct Dht22Sensors {
    dht_pin: PinDriver<'static, AnyIOPin, InputOutput>,
    delay: Ets,
    battery: BatteryChannel,
    curve: BatteryCurve,
    last: Option<(Instant, DhtReading)>,
}

/// Last DHT22 conversion, shared by the temperature and humidity reads.
#[derive(Debug, Clone, Copy)]
struct DhtReading {
    temperature_c: f32,
    humidity: f32,
}

impl Dht22Sensors {
    fn new(dht_pin: AnyIOPin, adc1: ADC1, battery_pin: Gpio3) -> anyhow::Result<Self> {
        let mut dht_pin = PinDriver::input_output_od(dht_pin)?;
        dht_pin.set_pull(Pull::Up)?;
        dht_pin.set_high()?;

        let adc = AdcDriver::new(adc1)?;
        let channel_config = AdcChannelConfig {
            attenuation: DB_11,
            ..Default::default()
        };
        let battery = AdcChannelDriver::new(adc, battery_pin, &channel_config)
            .map_err(|err| anyhow!("failed to configure battery ADC: {err:?}"))?;

        Ok(Self {
            dht_pin,
            delay: Ets,
            battery,
            curve: BatteryCurve::default(),
            last: None,
        })
    }

    fn sample(&mut self) -> Option<DhtReading> {
        if let Some((at, reading)) = self.last {
            if at.elapsed() < Duration::from_millis(DHT22_MIN_INTERVAL_MS) {
                return Some(reading);
            }
        }

        if let Err(err) = self.dht_pin.set_high() {
            warn!("failed to set DHT22 line high before read: {err:?}");
            return None;
        }

        match dht22::blocking::read(&mut self.delay, &mut self.dht_pin) {
            Ok(raw) => {
                let reading = DhtReading {
                    temperature_c: raw.temperature,
                    humidity: raw.relative_humidity,
                };
                info!(
                    "[DHT22] {:.1}°C, {:.1}%",
                    reading.temperature_c, reading.humidity
                );
                self.last = Some((Instant::now(), reading));
                Some(reading)
            }
            Err(err) => {
                warn!("failed to read DHT22 on GPIO{DHT22_PIN}: {err:?}");
                self.last = None;
                None
            }
        }
    }
}

impl SensorSource for Dht22Sensors {
    fn temperature_c(&mut self) -> Option<f32> {
        self.sample().map(|reading| reading.temperature_c)
    }

    fn humidity(&mut self) -> Option<f32> {
        self.sample().map(|reading| reading.humidity)
    }

    fn battery(&mut self) -> Option<BatteryStatus> {
        let mut total = 0_u32;
        for _ in 0..8 {
            match self.battery.read_raw() {
                Ok(raw) => total += u32::from(raw),
                Err(err) => {
                    warn!("battery ADC read failed: {err:?}");
                    return None;
                }
            }
        }
        let voltage = (total / 8) as f32 * ADC_FULL_SCALE_VOLTS / ADC_MAX;
        Some(BatteryStatus::from_voltage(voltage, &self.curve))
    }
}

#[derive(Clone)]
struct NvsStore {
    partition: EspDefaultNvsPartition,
    lock: Arc<Mutex<()>>,
}

impl NvsStore {
    fn new(partition: EspDefaultNvsPartition) -> Self {
        Self {
            partition,
            lock: Arc::new(Mutex::new(())),
        }
    }

    fn open(&self) -> Result<EspNvs<NvsDefault>, EspError> {
        EspNvs::new(self.partition.clone(), NVS_NAMESPACE, true)
    }

    fn load_config(&self) -> anyhow::Result<NodeConfig> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let nvs = self.open().context("failed to open NVS namespace")?;
        let mut buffer = vec![0_u8; 2048];
        match nvs.get_str(NVS_CONFIG_KEY, &mut buffer)? {
            Some(value) => Ok(serde_json::from_str::<NodeConfig>(value)?),
            None => Ok(NodeConfig::default()),
        }
    }
}

fn read_str(nvs: &EspNvs<NvsDefault>, key: &str) -> Option<String> {
    let mut buffer = [0_u8; 96];
    match nvs.get_str(key, &mut buffer) {
        Ok(value) => value.map(str::to_string),
        Err(err) => {
            warn!("failed to read NVS key `{key}`: {err:?}");
            None
        }
    }
}

impl CredentialStore for NvsStore {
    fn get(&self) -> Option<WifiCredentials> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let nvs = match self.open() {
            Ok(nvs) => nvs,
            Err(err) => {
                warn!("failed to open NVS namespace: {err:?}");
                return None;
            }
        };
        let credentials = WifiCredentials {
            ssid: read_str(&nvs, NVS_SSID_KEY)?,
            password: read_str(&nvs, NVS_PASS_KEY).unwrap_or_default(),
        };
        credentials.is_configured().then_some(credentials)
    }

    fn set(&mut self, credentials: &WifiCredentials) -> Result<(), StorageError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut nvs = self
            .open()
            .map_err(|err| StorageError(format!("NVS open failed: {err:?}")))?;
        nvs.set_str(NVS_SSID_KEY, &credentials.ssid)
            .and_then(|_| nvs.set_str(NVS_PASS_KEY, &credentials.password))
            .map_err(|err| StorageError(format!("NVS write failed: {err:?}")))
    }
}

fn create_http_server(
    nvs_store: NvsStore,
    status: Arc<Mutex<NodeStatus>>,
) -> anyhow::Result<EspHttpServer<'static>> {
    let conf = HttpServerConfiguration {
        stack_size: 10 * 1024,
        ..Default::default()
    };

    let mut server = EspHttpServer::new(&conf)?;

    server.fn_handler::<anyhow::Error, _>("/", Method::Get, |req| {
        req.into_response(200, Some("OK"), &[("Content-Type", "text/html; charset=utf-8")])?
            .write_all(PANEL_HTML.as_bytes())?;
        Ok(())
    })?;

    server.fn_handler("/api/status", Method::Get, move |req| {
        let snapshot = status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        write_json(req, &snapshot)
    })?;

    {
        let nvs_store = nvs_store.clone();
        server.fn_handler("/api/settings", Method::Get, move |req| {
            let current = nvs_store.get().unwrap_or_default();
            write_json(req, &WifiSettingsView::new(&current, Some(&current)))
        })?;
    }

    server.fn_handler::<anyhow::Error, _>("/api/settings", Method::Post, move |mut req| {
        let body = read_request_body(&mut req)?;
        let Ok(update) = serde_json::from_slice::<WifiSettingsUpdate>(&body) else {
            return write_error(req, 400, "invalid settings payload");
        };

        let previous = nvs_store.get();
        let credentials = match update.resolve(previous.as_ref()) {
            Ok(credentials) => credentials,
            Err(message) => return write_error(req, 400, message),
        };

        let mut store = nvs_store.clone();
        if let Err(err) = store.set(&credentials) {
            error!("failed to save WiFi settings: {err}");
            return write_error(req, 500, "Failed to save settings");
        }
        info!("WiFi settings saved for `{}`", credentials.ssid);
        write_json(req, &WifiSettingsView::new(&credentials, previous.as_ref()))
    })?;

    server.fn_handler::<anyhow::Error, _>("/api/restart", Method::Post, |req| {
        thread::Builder::new()
            .name("restart-request".into())
            .spawn(|| {
                thread::sleep(Duration::from_millis(500));
                restart();
            })
            .context("failed to spawn restart thread")?;

        write_json(req, &serde_json::json!({ "restarting": true }))
    })?;

    Ok(server)
}

fn read_request_body(
    req: &mut esp_idf_svc::http::server::Request<
        &mut esp_idf_svc::http::server::EspHttpConnection<'_>,
    >,
) -> anyhow::Result<Vec<u8>> {
    let len = req.content_len().unwrap_or(0) as usize;
    if len > MAX_HTTP_BODY {
        return Err(anyhow!("request body too large"));
    }

    let mut body = vec![0_u8; len];
    if len > 0 {
        req.read_exact(&mut body)?;
    }
    Ok(body)
}

fn write_json<T: Serialize>(
    req: esp_idf_svc::http::server::Request<
        &mut esp_idf_svc::http::server::EspHttpConnection<'_>,
    >,
    payload: &T,
) -> anyhow::Result<()> {
    let body = serde_json::to_vec(payload)?;
    req.into_response(
        200,
        Some("OK"),
        &[("Content-Type", "application/json; charset=utf-8")],
    )?
    .write_all(&body)?;
    Ok(())
}

fn write_error(
    req: esp_idf_svc::http::server::Request<
        &mut esp_idf_svc::http::server::EspHttpConnection<'_>,
    >,
    status_code: u16,
    message: &str,
) -> anyhow::Result<()> {
    let body = serde_json::to_vec(&serde_json::json!({ "error": message }))?;
    req.into_response(
        status_code,
        None,
        &[("Content-Type", "application/json; charset=utf-8")],
    )?
    .write_all(&body)?;
    Ok(())
}

fn publish_status(status: &Mutex<NodeStatus>, snapshot: NodeStatus) {
    *status.lock().unwrap_or_else(PoisonError::into_inner) = snapshot;
}

fn init_watchdog(timeout_sec: u32) -> anyhow::Result<()> {
    let config = sys::esp_task_wdt_config_t {
        timeout_ms: timeout_sec.saturating_mul(1000),
        idle_core_mask: 0,
        trigger_panic: true,
    };
    let rc = unsafe { sys::esp_task_wdt_init(&config) };
    if rc == sys::ESP_OK || rc == sys::ESP_ERR_INVALID_STATE {
        return Ok(());
    }
    Err(anyhow!("esp_task_wdt_init failed with code {}", rc))
}

fn add_current_task_to_watchdog() -> anyhow::Result<()> {
    let rc = unsafe { sys::esp_task_wdt_add(ptr::null_mut()) };
    if rc == sys::ESP_OK || rc == sys::ESP_ERR_INVALID_STATE {
        return Ok(());
    }
    Err(anyhow!("esp_task_wdt_add failed with code {}", rc))
}

fn feed_watchdog() {
    let _ = unsafe { sys::esp_task_wdt_reset() };
}

fn disable_wifi_power_save() {
    let rc = unsafe { sys::esp_wifi_set_ps(sys::wifi_ps_type_t_WIFI_PS_NONE) };
    if rc == sys::ESP_OK {
        info!("wifi power save disabled");
    } else {
        warn!("failed to disable wifi power save: esp_err_t={rc}");
    }
}
