use std::{
    cell::{Cell, RefCell},
    collections::VecDeque,
    io,
    net::Ipv4Addr,
    rc::Rc,
};

use crate::{
    config::WifiCredentials,
    error::{RadioError, StorageError},
    platform::{Clock, Display, LinkStatus, SensorSource, Transport, UpdateStorage, WifiRadio},
    types::{BatteryStatus, DisplayState, SensorReading},
};

/// Virtual clock; `sleep_ms` advances time instead of blocking.
#[derive(Debug, Clone, Default)]
pub struct FakeClock {
    now: Rc<Cell<u64>>,
}

impl FakeClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> u64 {
        self.now.get()
    }

    pub fn advance(&self, ms: u64) {
        self.now.set(self.now.get() + ms);
    }
}

impl Clock for FakeClock {
    fn now_ms(&self) -> u64 {
        self.now.get()
    }

    fn sleep_ms(&self, ms: u64) {
        self.advance(ms.max(1));
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Link(pub bool);

impl Link {
    pub const UP: Self = Self(true);
    pub const DOWN: Self = Self(false);
}

impl LinkStatus for Link {
    fn is_connected(&self) -> bool {
        self.0
    }
}

#[derive(Debug, Default)]
struct Exchange {
    refuse: bool,
    stay_open: bool,
    chunks: VecDeque<(u64, Vec<u8>)>,
}

#[derive(Debug, Default)]
struct TransportState {
    exchanges: VecDeque<Exchange>,
    active: Option<(u64, Exchange)>,
    requests: Vec<Vec<u8>>,
    connects: Vec<(String, u16)>,
    closes: usize,
}

/// Transport that replays one scripted exchange per `connect`. Each chunk is
/// released once the virtual clock reaches its offset from connect time. The
/// peer closes after the last chunk unless the exchange is held open.
#[derive(Debug, Clone)]
pub struct ScriptedTransport {
    clock: FakeClock,
    state: Rc<RefCell<TransportState>>,
}

impl ScriptedTransport {
    pub fn new(clock: &FakeClock) -> Self {
        let mut state = TransportState::default();
        state.exchanges.push_back(Exchange::default());
        Self {
            clock: clock.clone(),
            state: Rc::new(RefCell::new(state)),
        }
    }

    pub fn then(self) -> Self {
        self.state
            .borrow_mut()
            .exchanges
            .push_back(Exchange::default());
        self
    }

    pub fn respond_at(self, offset_ms: u64, bytes: &[u8]) -> Self {
        self.with_last(|exchange| exchange.chunks.push_back((offset_ms, bytes.to_vec())));
        self
    }

    /// Response head at offset 0 followed by `body` split into `chunk` byte
    /// pieces, one every `interval_ms`.
    pub fn respond_chunked(
        self,
        head: &[u8],
        body: &[u8],
        chunk: usize,
        interval_ms: u64,
    ) -> Self {
        let mut script = self.respond_at(0, head);
        for (index, piece) in body.chunks(chunk).enumerate() {
            script = script.respond_at(interval_ms * (index as u64 + 1), piece);
        }
        script
    }

    pub fn stay_open(self) -> Self {
        self.with_last(|exchange| exchange.stay_open = true);
        self
    }

    pub fn refuse_connect(self) -> Self {
        self.with_last(|exchange| exchange.refuse = true);
        self
    }

    pub fn log(&self) -> TransportLog {
        TransportLog {
            state: Rc::clone(&self.state),
        }
    }

    fn with_last(&self, apply: impl FnOnce(&mut Exchange)) {
        if let Some(exchange) = self.state.borrow_mut().exchanges.back_mut() {
            apply(exchange);
        }
    }
}

impl Transport for ScriptedTransport {
    fn connect(&mut self, host: &str, port: u16) -> io::Result<()> {
        let mut state = self.state.borrow_mut();
        state.connects.push((host.to_string(), port));

        let exchange = state.exchanges.pop_front().unwrap_or(Exchange {
            refuse: true,
            ..Exchange::default()
        });
        if exchange.refuse {
            return Err(io::Error::from(io::ErrorKind::ConnectionRefused));
        }

        state.requests.push(Vec::new());
        state.active = Some((self.clock.now(), exchange));
        Ok(())
    }

    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        let mut state = self.state.borrow_mut();
        if state.active.is_none() {
            return Err(io::Error::from(io::ErrorKind::NotConnected));
        }
        if let Some(request) = state.requests.last_mut() {
            request.extend_from_slice(bytes);
        }
        Ok(())
    }

    fn read_available(&mut self, buf: &mut [u8]) -> usize {
        let now = self.clock.now();
        let mut state = self.state.borrow_mut();
        let Some((opened_at, exchange)) = state.active.as_mut() else {
            return 0;
        };

        let Some((offset, chunk)) = exchange.chunks.front_mut() else {
            return 0;
        };
        if *opened_at + *offset > now {
            return 0;
        }

        let count = chunk.len().min(buf.len());
        buf[..count].copy_from_slice(&chunk[..count]);
        chunk.drain(..count);
        if chunk.is_empty() {
            exchange.chunks.pop_front();
        }
        count
    }

    fn is_connected(&self) -> bool {
        self.state
            .borrow()
            .active
            .as_ref()
            .is_some_and(|(_, exchange)| exchange.stay_open || !exchange.chunks.is_empty())
    }

    fn close(&mut self) {
        let mut state = self.state.borrow_mut();
        state.active = None;
        state.closes += 1;
    }
}

#[derive(Debug, Clone)]
pub struct TransportLog {
    state: Rc<RefCell<TransportState>>,
}

impl TransportLog {
    pub fn requests(&self) -> Vec<String> {
        self.state
            .borrow()
            .requests
            .iter()
            .map(|request| String::from_utf8_lossy(request).into_owned())
            .collect()
    }

    pub fn written_text(&self) -> String {
        self.requests().concat()
    }

    pub fn connected_to(&self) -> Vec<(String, u16)> {
        self.state.borrow().connects.clone()
    }

    pub fn close_count(&self) -> usize {
        self.state.borrow().closes
    }

    pub fn is_open(&self) -> bool {
        self.state.borrow().active.is_some()
    }
}

#[derive(Debug)]
pub struct RadioState {
    /// Begin calls that fail to ever associate before one succeeds.
    pub dead_begins: usize,
    pub associate_after_polls: u32,
    pub address_after_polls: u32,
    pub begin_error: bool,
    pub begins: Vec<WifiCredentials>,
    pub disconnects: u32,
    associated: bool,
    assoc_polls: u32,
    addr_polls: u32,
    active: bool,
}

impl Default for RadioState {
    fn default() -> Self {
        Self {
            dead_begins: 0,
            associate_after_polls: 2,
            address_after_polls: 1,
            begin_error: false,
            begins: Vec::new(),
            disconnects: 0,
            associated: false,
            assoc_polls: 0,
            addr_polls: 0,
            active: false,
        }
    }
}

/// Radio that associates after a number of status polls and receives an
/// address after a further number of address polls.
#[derive(Debug, Clone, Default)]
pub struct FakeRadio {
    state: Rc<RefCell<RadioState>>,
}

impl FakeRadio {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn never_associates() -> Self {
        let radio = Self::new();
        radio.state.borrow_mut().dead_begins = usize::MAX;
        radio
    }

    pub fn configure(&self, apply: impl FnOnce(&mut RadioState)) {
        apply(&mut self.state.borrow_mut());
    }

    pub fn state(&self) -> std::cell::Ref<'_, RadioState> {
        self.state.borrow()
    }

    pub fn force_up(&self) {
        let mut state = self.state.borrow_mut();
        state.active = true;
        state.associated = true;
        state.addr_polls = state.address_after_polls;
    }

    pub fn drop_link(&self) {
        let mut state = self.state.borrow_mut();
        state.associated = false;
        state.active = false;
    }

    pub fn begin_count(&self) -> usize {
        self.state.borrow().begins.len()
    }

    pub fn disconnect_count(&self) -> u32 {
        self.state.borrow().disconnects
    }
}

impl WifiRadio for FakeRadio {
    fn begin(&mut self, credentials: &WifiCredentials) -> Result<(), RadioError> {
        let mut state = self.state.borrow_mut();
        if state.begin_error {
            return Err(RadioError("driver rejected credentials".to_string()));
        }
        state.begins.push(credentials.clone());
        state.active = state.begins.len() > state.dead_begins;
        state.associated = false;
        state.assoc_polls = 0;
        state.addr_polls = 0;
        Ok(())
    }

    fn disconnect(&mut self) {
        let mut state = self.state.borrow_mut();
        state.disconnects += 1;
        state.associated = false;
        state.active = false;
    }

    fn is_associated(&self) -> bool {
        let mut state = self.state.borrow_mut();
        if state.active && !state.associated {
            state.assoc_polls += 1;
            state.associated = state.assoc_polls >= state.associate_after_polls;
        }
        state.associated
    }

    fn local_ip(&self) -> Option<Ipv4Addr> {
        let mut state = self.state.borrow_mut();
        if !state.associated {
            return None;
        }
        if state.addr_polls < state.address_after_polls {
            state.addr_polls += 1;
            return None;
        }
        Some(Ipv4Addr::new(192, 168, 1, 50))
    }

    fn rssi(&self) -> Option<i8> {
        self.state.borrow().associated.then_some(-58)
    }
}

#[derive(Debug, Clone, Default)]
pub struct RecordingDisplay {
    states: Rc<RefCell<Vec<DisplayState>>>,
}

impl RecordingDisplay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn states(&self) -> Vec<DisplayState> {
        self.states.borrow().clone()
    }

    pub fn last(&self) -> Option<DisplayState> {
        self.states.borrow().last().copied()
    }

    pub fn progress(&self) -> Vec<u8> {
        self.states
            .borrow()
            .iter()
            .filter_map(|state| match state {
                DisplayState::UpdateProgress(pct) => Some(*pct),
                _ => None,
            })
            .collect()
    }
}

impl Display for RecordingDisplay {
    fn show(&self, state: DisplayState) {
        self.states.borrow_mut().push(state);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageEvent {
    Open(u32),
    Write(usize),
    Commit,
    Abort,
    Apply,
}

#[derive(Debug, Default)]
struct StorageState {
    events: Vec<StorageEvent>,
    data: Vec<u8>,
    accept_limit: Option<usize>,
    fail_open: bool,
    fail_commit: bool,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    state: Rc<RefCell<StorageState>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_open() -> Self {
        let storage = Self::new();
        storage.state.borrow_mut().fail_open = true;
        storage
    }

    pub fn failing_commit() -> Self {
        let storage = Self::new();
        storage.state.borrow_mut().fail_commit = true;
        storage
    }

    /// Every write accepts at most `limit` bytes.
    pub fn short_writes(limit: usize) -> Self {
        let storage = Self::new();
        storage.state.borrow_mut().accept_limit = Some(limit);
        storage
    }

    pub fn events(&self) -> Vec<StorageEvent> {
        self.state.borrow().events.clone()
    }

    pub fn data(&self) -> Vec<u8> {
        self.state.borrow().data.clone()
    }

    pub fn count(&self, event: &StorageEvent) -> usize {
        self.state
            .borrow()
            .events
            .iter()
            .filter(|recorded| *recorded == event)
            .count()
    }

    pub fn opened(&self) -> bool {
        self.state
            .borrow()
            .events
            .iter()
            .any(|event| matches!(event, StorageEvent::Open(_)))
    }
}

impl UpdateStorage for MemoryStorage {
    fn open(&mut self, size: u32) -> Result<(), StorageError> {
        let mut state = self.state.borrow_mut();
        state.events.push(StorageEvent::Open(size));
        if state.fail_open {
            return Err(StorageError("no update partition".to_string()));
        }
        state.data.clear();
        Ok(())
    }

    fn write(&mut self, bytes: &[u8]) -> usize {
        let mut state = self.state.borrow_mut();
        let accepted = state.accept_limit.map_or(bytes.len(), |limit| limit.min(bytes.len()));
        state.data.extend_from_slice(&bytes[..accepted]);
        state.events.push(StorageEvent::Write(accepted));
        accepted
    }

    fn commit(&mut self) -> Result<(), StorageError> {
        let mut state = self.state.borrow_mut();
        state.events.push(StorageEvent::Commit);
        if state.fail_commit {
            return Err(StorageError("image validation failed".to_string()));
        }
        Ok(())
    }

    fn abort(&mut self) {
        self.state.borrow_mut().events.push(StorageEvent::Abort);
    }

    fn apply(&mut self) {
        self.state.borrow_mut().events.push(StorageEvent::Apply);
    }
}

#[derive(Debug, Clone)]
pub struct FixedSensors {
    reading: SensorReading,
}

impl FixedSensors {
    pub fn new(reading: SensorReading) -> Self {
        Self { reading }
    }
}

impl SensorSource for FixedSensors {
    fn temperature_c(&mut self) -> Option<f32> {
        self.reading.temperature_c
    }

    fn humidity(&mut self) -> Option<f32> {
        self.reading.humidity
    }

    fn battery(&mut self) -> Option<BatteryStatus> {
        self.reading.battery
    }
}
