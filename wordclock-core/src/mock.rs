//! In-memory collaborators for host tests.
//!
//! Every mock is a cheap handle around shared state: clone it, hand one clone
//! to the code under test and keep the other to script and inspect.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::io::{self, Write};
use std::net::Ipv4Addr;
use std::rc::Rc;

use chrono::{Duration, NaiveDateTime};

use crate::clock::Clock;
use crate::heartbeat::{Telemetry, TelemetrySource};
use crate::http::{HttpClient, HttpError, Method, Request, Response, ResponseStream};
use crate::identity::IdentityStore;
use crate::led_events::{Rgb, StatusLeds};
use crate::network::{CaptivePortal, WifiDriver, WifiError, WifiStatus};
use crate::ota::flash::{FlashError, FlashTarget, FlashWriter, Partition};
use crate::ota::ui_sync::UiFileStore;
use crate::persistence::{MarkerKind, MarkerStore, StorageError};
use crate::provisioning::{BleError, BleEvent, BleTransport, Characteristic, PasskeyDisplay};
use crate::runtime::{ClockFace, OnlineServices, ServiceError};
use crate::settings::{DeviceSettings, SettingsBackend};
use crate::system::{SystemControl, SystemStats};

fn write_error(key: &str) -> StorageError {
    StorageError::Write {
        key: key.to_string(),
        reason: "injected failure".to_string(),
    }
}

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

#[derive(Default)]
struct ClockState {
    now: Cell<u64>,
    /// Wall time at the given uptime
    wall: Cell<Option<(NaiveDateTime, u64)>>,
}

/// Time only moves when told to; `delay_ms` advances it
#[derive(Clone, Default)]
pub struct ManualClock(Rc<ClockState>);

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, ms: u64) {
        self.0.now.set(self.0.now.get() + ms);
    }

    pub fn set_now(&self, ms: u64) {
        self.0.now.set(ms);
    }

    /// Wall clock reads `time` now and runs along with uptime afterwards
    pub fn set_local_time(&self, time: Option<NaiveDateTime>) {
        self.0.wall.set(time.map(|t| (t, self.0.now.get())));
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.0.now.get()
    }

    fn local_time(&self) -> Option<NaiveDateTime> {
        let (base, at) = self.0.wall.get()?;
        let elapsed = self.0.now.get().saturating_sub(at);
        Some(base + Duration::milliseconds(elapsed as i64))
    }

    fn delay_ms(&self, ms: u32) {
        self.advance(u64::from(ms));
    }
}

// ---------------------------------------------------------------------------
// HTTP
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ScriptedResponse {
    status: u16,
    body: Vec<u8>,
    content_length: Option<Option<u64>>,
    fail_after: Option<(usize, HttpError)>,
    transport_error: Option<HttpError>,
}

impl ScriptedResponse {
    pub fn bytes(status: u16, body: &[u8]) -> Self {
        Self {
            status,
            body: body.to_vec(),
            content_length: None,
            fail_after: None,
            transport_error: None,
        }
    }

    pub fn json(status: u16, body: &str) -> Self {
        Self::bytes(status, body.as_bytes())
    }

    /// Request fails before any response arrives
    pub fn error(error: HttpError) -> Self {
        Self {
            transport_error: Some(error),
            ..Self::bytes(0, b"")
        }
    }

    /// Overrides the declared `Content-Length` (`None` = chunked)
    pub fn with_content_length(mut self, length: Option<u64>) -> Self {
        self.content_length = Some(length);
        self
    }

    /// Body reads fail once `offset` bytes were delivered
    pub fn failing_after(mut self, offset: usize, error: HttpError) -> Self {
        self.fail_after = Some((offset, error));
        self
    }

    fn declared_length(&self) -> Option<u64> {
        self.content_length.unwrap_or(Some(self.body.len() as u64))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Default)]
struct Route {
    sticky: Option<ScriptedResponse>,
    queue: VecDeque<ScriptedResponse>,
}

#[derive(Default)]
struct HttpScript {
    routes: HashMap<(Method, String), Route>,
    requests: Vec<RecordedRequest>,
}

/// Routes by method and exact URL. One-shot responses are served before the
/// sticky one; unknown routes fail to connect.
#[derive(Clone, Default)]
pub struct ScriptedHttp(Rc<RefCell<HttpScript>>);

impl ScriptedHttp {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the sticky response for the route
    pub fn on(&self, method: Method, url: &str, response: ScriptedResponse) {
        let mut script = self.0.borrow_mut();
        script.routes.entry((method, url.to_string())).or_default().sticky = Some(response);
    }

    pub fn enqueue(&self, method: Method, url: &str, response: ScriptedResponse) {
        let mut script = self.0.borrow_mut();
        script
            .routes
            .entry((method, url.to_string()))
            .or_default()
            .queue
            .push_back(response);
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.0.borrow().requests.clone()
    }

    pub fn count(&self, method: Method, url: &str) -> usize {
        self.0
            .borrow()
            .requests
            .iter()
            .filter(|r| r.method == method && r.url == url)
            .count()
    }

    fn respond(&self, request: &Request<'_>) -> Result<ScriptedResponse, HttpError> {
        let mut script = self.0.borrow_mut();
        script.requests.push(RecordedRequest {
            method: request.method,
            url: request.url.to_string(),
            headers: request
                .headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            body: request.body.map(<[u8]>::to_vec).unwrap_or_default(),
        });

        let route = script
            .routes
            .get_mut(&(request.method, request.url.to_string()))
            .ok_or_else(|| HttpError::Connect(format!("no route to {}", request.url)))?;
        let response = match route.queue.pop_front() {
            Some(r) => r,
            None => route
                .sticky
                .clone()
                .ok_or_else(|| HttpError::Connect(format!("no route to {}", request.url)))?,
        };
        match &response.transport_error {
            Some(e) => Err(e.clone()),
            None => Ok(response),
        }
    }
}

impl HttpClient for ScriptedHttp {
    fn send(&mut self, request: &Request<'_>) -> Result<Response, HttpError> {
        let r = self.respond(request)?;
        Ok(Response {
            status: r.status,
            body: r.body,
        })
    }

    fn open<'s>(&'s mut self, request: &Request<'_>) -> Result<Box<dyn ResponseStream + 's>, HttpError> {
        let r = self.respond(request)?;
        Ok(Box::new(ScriptedStream {
            status: r.status,
            length: r.declared_length(),
            fail_after: r.fail_after,
            body: r.body,
            pos: 0,
        }))
    }
}

struct ScriptedStream {
    status: u16,
    length: Option<u64>,
    fail_after: Option<(usize, HttpError)>,
    body: Vec<u8>,
    pos: usize,
}

impl ResponseStream for ScriptedStream {
    fn status(&self) -> u16 {
        self.status
    }

    fn content_length(&self) -> Option<u64> {
        self.length
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, HttpError> {
        let mut limit = self.body.len();
        if let Some((offset, error)) = &self.fail_after {
            if self.pos >= *offset {
                return Err(error.clone());
            }
            limit = limit.min(*offset);
        }
        let n = buf.len().min(limit.saturating_sub(self.pos));
        buf[..n].copy_from_slice(&self.body[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

#[derive(Default)]
struct IdentityData {
    hardware_id: String,
    device_id: Option<String>,
    device_token: Option<String>,
    blocked: bool,
    fail_writes: bool,
    failing_keys: HashSet<String>,
}

#[derive(Clone, Default)]
pub struct MemoryIdentity(Rc<RefCell<IdentityData>>);

impl MemoryIdentity {
    pub fn new(hardware_id: &str) -> Self {
        Self(Rc::new(RefCell::new(IdentityData {
            hardware_id: hardware_id.to_string(),
            ..IdentityData::default()
        })))
    }

    pub fn fail_writes(&self, fail: bool) {
        self.0.borrow_mut().fail_writes = fail;
    }

    /// Fails writes to one key only (`device_id`, `device_token`, `reg_blocked`)
    pub fn fail_key(&self, key: &str, fail: bool) {
        let mut data = self.0.borrow_mut();
        if fail {
            data.failing_keys.insert(key.to_string());
        } else {
            data.failing_keys.remove(key);
        }
    }

    fn store(&self, key: &str, apply: impl FnOnce(&mut IdentityData)) -> Result<(), StorageError> {
        let mut data = self.0.borrow_mut();
        if data.fail_writes || data.failing_keys.contains(key) {
            return Err(write_error(key));
        }
        apply(&mut data);
        Ok(())
    }
}

impl IdentityStore for MemoryIdentity {
    fn hardware_id(&self) -> String {
        self.0.borrow().hardware_id.clone()
    }

    fn device_id(&self) -> Option<String> {
        self.0.borrow().device_id.clone()
    }

    fn set_device_id(&mut self, id: &str) -> Result<(), StorageError> {
        self.store("device_id", |d| d.device_id = Some(id.to_string()))
    }

    fn device_token(&self) -> Option<String> {
        self.0.borrow().device_token.clone()
    }

    fn set_device_token(&mut self, token: &str) -> Result<(), StorageError> {
        self.store("device_token", |d| d.device_token = Some(token.to_string()))
    }

    fn registration_blocked(&self) -> bool {
        self.0.borrow().blocked
    }

    fn set_registration_blocked(&mut self, blocked: bool) -> Result<(), StorageError> {
        self.store("reg_blocked", |d| d.blocked = blocked)
    }
}

#[derive(Default)]
struct MarkerData {
    values: HashMap<MarkerKind, String>,
    fail_writes: bool,
}

#[derive(Clone, Default)]
pub struct MemoryMarkers(Rc<RefCell<MarkerData>>);

impl MemoryMarkers {
    pub fn fail_writes(&self, fail: bool) {
        self.0.borrow_mut().fail_writes = fail;
    }
}

impl MarkerStore for MemoryMarkers {
    fn read(&self, kind: MarkerKind) -> Option<String> {
        self.0.borrow().values.get(&kind).cloned()
    }

    fn write(&mut self, kind: MarkerKind, version: &str) -> Result<(), StorageError> {
        let mut data = self.0.borrow_mut();
        if data.fail_writes {
            return Err(write_error(kind.key()));
        }
        data.values.insert(kind, version.to_string());
        Ok(())
    }
}

#[derive(Default)]
struct SettingsData {
    blob: Option<Vec<u8>>,
    schema: Option<u32>,
    saves: usize,
}

#[derive(Clone, Default)]
pub struct MemorySettings(Rc<RefCell<SettingsData>>);

impl MemorySettings {
    pub fn blob(&self) -> Option<Vec<u8>> {
        self.0.borrow().blob.clone()
    }

    pub fn set_blob(&self, blob: &[u8]) {
        self.0.borrow_mut().blob = Some(blob.to_vec());
    }

    pub fn schema(&self) -> Option<u32> {
        self.0.borrow().schema
    }

    pub fn set_schema(&self, version: u32) {
        self.0.borrow_mut().schema = Some(version);
    }

    pub fn saves(&self) -> usize {
        self.0.borrow().saves
    }

    /// Decoded current blob
    pub fn settings(&self) -> Option<DeviceSettings> {
        self.blob().and_then(|b| serde_json::from_slice(&b).ok())
    }
}

impl SettingsBackend for MemorySettings {
    fn load(&mut self) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.blob())
    }

    fn save(&mut self, blob: &[u8]) -> Result<(), StorageError> {
        let mut data = self.0.borrow_mut();
        data.blob = Some(blob.to_vec());
        data.saves += 1;
        Ok(())
    }

    fn schema_version(&mut self) -> Result<Option<u32>, StorageError> {
        Ok(self.schema())
    }

    fn set_schema_version(&mut self, version: u32) -> Result<(), StorageError> {
        self.set_schema(version);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Flash and UI files
// ---------------------------------------------------------------------------

#[derive(Default)]
struct FlashLog {
    begins: usize,
    aborts: usize,
    commits: Vec<(Partition, Vec<u8>)>,
    live: HashMap<Partition, Vec<u8>>,
    erase_in_place: bool,
    fail_begin: bool,
}

/// Flash double. By default writes are staged and only reach the partition on
/// `finish`; with `erase_in_place` the partition is erased on `begin`, written
/// directly and wiped again on `abort`, as the filesystem partition is.
#[derive(Clone, Default)]
pub struct RecordingFlash(Rc<RefCell<FlashLog>>);

impl RecordingFlash {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_begin(&self, fail: bool) {
        self.0.borrow_mut().fail_begin = fail;
    }

    pub fn erase_in_place(&self, enabled: bool) {
        self.0.borrow_mut().erase_in_place = enabled;
    }

    pub fn preload(&self, partition: Partition, data: &[u8]) {
        self.0.borrow_mut().live.insert(partition, data.to_vec());
    }

    /// Current partition contents as the next boot would see them
    pub fn contents(&self, partition: Partition) -> Option<Vec<u8>> {
        self.0.borrow().live.get(&partition).cloned()
    }

    pub fn begins(&self) -> usize {
        self.0.borrow().begins
    }

    pub fn aborts(&self) -> usize {
        self.0.borrow().aborts
    }

    pub fn commits(&self) -> Vec<(Partition, Vec<u8>)> {
        self.0.borrow().commits.clone()
    }
}

impl FlashTarget for RecordingFlash {
    fn begin(&mut self, partition: Partition, size: u64) -> Result<Box<dyn FlashWriter + '_>, FlashError> {
        let mut log = self.0.borrow_mut();
        if log.fail_begin {
            return Err(FlashError::Begin(format!("cannot erase {size} bytes")));
        }
        log.begins += 1;
        if log.erase_in_place {
            log.live.insert(partition, Vec::new());
        }
        Ok(Box::new(RecordingWriter {
            log: Rc::clone(&self.0),
            partition,
            data: Vec::new(),
        }))
    }
}

struct RecordingWriter {
    log: Rc<RefCell<FlashLog>>,
    partition: Partition,
    data: Vec<u8>,
}

impl FlashWriter for RecordingWriter {
    fn write(&mut self, data: &[u8]) -> Result<(), FlashError> {
        self.data.extend_from_slice(data);
        let mut log = self.log.borrow_mut();
        if log.erase_in_place {
            log.live.entry(self.partition).or_default().extend_from_slice(data);
        }
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<(), FlashError> {
        let Self { log, partition, data } = *self;
        let mut log = log.borrow_mut();
        log.live.insert(partition, data.clone());
        log.commits.push((partition, data));
        Ok(())
    }

    fn abort(self: Box<Self>) {
        let mut log = self.log.borrow_mut();
        log.aborts += 1;
        if log.erase_in_place {
            log.live.insert(self.partition, Vec::new());
        }
    }
}

#[derive(Default)]
struct UiFsData {
    files: BTreeMap<String, Vec<u8>>,
    mounted: bool,
    fail_mount: bool,
    fail_remove_existing: bool,
}

#[derive(Clone, Default)]
pub struct MemoryUiFiles(Rc<RefCell<UiFsData>>);

impl MemoryUiFiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, path: &str, content: &[u8]) {
        self.0.borrow_mut().files.insert(path.to_string(), content.to_vec());
    }

    pub fn get(&self, path: &str) -> Option<Vec<u8>> {
        self.0.borrow().files.get(path).cloned()
    }

    pub fn files(&self) -> Vec<String> {
        self.0.borrow().files.keys().cloned().collect()
    }

    pub fn fail_mount(&self, fail: bool) {
        self.0.borrow_mut().fail_mount = fail;
    }

    /// Removing a file that exists fails; missing paths still succeed
    pub fn fail_remove_existing(&self, fail: bool) {
        self.0.borrow_mut().fail_remove_existing = fail;
    }

    pub fn is_mounted(&self) -> bool {
        self.0.borrow().mounted
    }
}

struct MemoryFile {
    fs: Rc<RefCell<UiFsData>>,
    path: String,
}

impl Write for MemoryFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.fs
            .borrow_mut()
            .files
            .entry(self.path.clone())
            .or_default()
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl UiFileStore for MemoryUiFiles {
    fn mount(&mut self) -> Result<(), StorageError> {
        let mut fs = self.0.borrow_mut();
        if fs.fail_mount {
            return Err(StorageError::Unavailable("mount failed".to_string()));
        }
        fs.mounted = true;
        Ok(())
    }

    fn create(&mut self, path: &str) -> Result<Box<dyn Write + '_>, StorageError> {
        self.0.borrow_mut().files.insert(path.to_string(), Vec::new());
        Ok(Box::new(MemoryFile {
            fs: Rc::clone(&self.0),
            path: path.to_string(),
        }))
    }

    fn remove(&mut self, path: &str) -> Result<(), StorageError> {
        let mut fs = self.0.borrow_mut();
        if fs.fail_remove_existing && fs.files.contains_key(path) {
            return Err(StorageError::Write {
                key: path.to_string(),
                reason: "remove failed".to_string(),
            });
        }
        fs.files.remove(path);
        Ok(())
    }

    fn rename(&mut self, from: &str, to: &str) -> Result<(), StorageError> {
        let mut fs = self.0.borrow_mut();
        let content = fs.files.remove(from).ok_or_else(|| StorageError::Write {
            key: to.to_string(),
            reason: format!("{from} does not exist"),
        })?;
        fs.files.insert(to.to_string(), content);
        Ok(())
    }

    fn size(&self, path: &str) -> Option<u64> {
        self.0.borrow().files.get(path).map(|f| f.len() as u64)
    }

    fn read_range(&self, path: &str, offset: u64, len: usize) -> Result<Vec<u8>, StorageError> {
        let fs = self.0.borrow();
        let file = fs.files.get(path).ok_or_else(|| StorageError::Read {
            key: path.to_string(),
            reason: "not found".to_string(),
        })?;
        let start = (offset as usize).min(file.len());
        let end = (start + len).min(file.len());
        Ok(file[start..end].to_vec())
    }
}

// ---------------------------------------------------------------------------
// WiFi
// ---------------------------------------------------------------------------

pub const SIM_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 50);

#[derive(Default)]
struct WifiState {
    stored: Option<(String, String)>,
    network: Option<(String, String)>,
    status: Option<WifiStatus>,
    connected_ssid: Option<String>,
    reconnects: usize,
    disconnects: usize,
    access_point: bool,
    fail_begin: bool,
}

impl WifiState {
    fn attempt(&mut self, ssid: &str, password: &str) {
        let status = match &self.network {
            Some((s, p)) if s == ssid && p == password => WifiStatus::Connected,
            Some((s, _)) if s == ssid => WifiStatus::WrongPassword,
            _ => WifiStatus::NoSsidAvailable,
        };
        self.connected_ssid = (status == WifiStatus::Connected).then(|| ssid.to_string());
        self.status = Some(status);
    }

    fn retry_stored(&mut self) {
        if let Some((ssid, password)) = self.stored.clone() {
            self.attempt(&ssid, &password);
        }
    }
}

/// Station that connects instantly when credentials match the simulated AP
#[derive(Clone, Default)]
pub struct WifiSim(Rc<RefCell<WifiState>>);

impl WifiSim {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store_credentials(&self, ssid: &str, password: &str) {
        self.0.borrow_mut().stored = Some((ssid.to_string(), password.to_string()));
    }

    pub fn stored_credentials(&self) -> Option<(String, String)> {
        self.0.borrow().stored.clone()
    }

    /// The access point in range
    pub fn set_network(&self, ssid: &str, password: &str) {
        self.0.borrow_mut().network = Some((ssid.to_string(), password.to_string()));
    }

    pub fn clear_network(&self) {
        self.0.borrow_mut().network = None;
    }

    pub fn drop_link(&self) {
        let mut state = self.0.borrow_mut();
        state.status = Some(WifiStatus::ConnectionLost);
        state.connected_ssid = None;
    }

    pub fn fail_begin(&self, fail: bool) {
        self.0.borrow_mut().fail_begin = fail;
    }

    pub fn reconnects(&self) -> usize {
        self.0.borrow().reconnects
    }

    pub fn disconnects(&self) -> usize {
        self.0.borrow().disconnects
    }

    pub fn access_point_active(&self) -> bool {
        self.0.borrow().access_point
    }
}

impl WifiDriver for WifiSim {
    fn has_stored_credentials(&self) -> bool {
        self.0.borrow().stored.is_some()
    }

    fn begin_stored(&mut self) -> Result<(), WifiError> {
        let mut state = self.0.borrow_mut();
        if state.fail_begin {
            return Err(WifiError::Driver("begin failed".to_string()));
        }
        state.retry_stored();
        Ok(())
    }

    fn begin(&mut self, ssid: &str, password: &str) -> Result<(), WifiError> {
        let mut state = self.0.borrow_mut();
        if state.fail_begin {
            return Err(WifiError::Driver("begin failed".to_string()));
        }
        state.stored = Some((ssid.to_string(), password.to_string()));
        state.attempt(ssid, password);
        Ok(())
    }

    fn status(&self) -> WifiStatus {
        self.0.borrow().status.unwrap_or(WifiStatus::Idle)
    }

    fn reconnect(&mut self) -> Result<(), WifiError> {
        let mut state = self.0.borrow_mut();
        state.reconnects += 1;
        state.retry_stored();
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), WifiError> {
        let mut state = self.0.borrow_mut();
        state.disconnects += 1;
        state.status = Some(WifiStatus::Disconnected);
        state.connected_ssid = None;
        Ok(())
    }

    fn erase_credentials(&mut self) -> Result<(), WifiError> {
        self.0.borrow_mut().stored = None;
        Ok(())
    }

    fn rssi(&self) -> Option<i32> {
        (self.status() == WifiStatus::Connected).then_some(-58)
    }

    fn local_ip(&self) -> Option<Ipv4Addr> {
        (self.status() == WifiStatus::Connected).then_some(SIM_IP)
    }

    fn ssid(&self) -> Option<String> {
        self.0.borrow().connected_ssid.clone()
    }

    fn start_access_point(&mut self, _name: &str, _password: &str) -> Result<(), WifiError> {
        self.0.borrow_mut().access_point = true;
        Ok(())
    }

    fn stop_access_point(&mut self) -> Result<(), WifiError> {
        self.0.borrow_mut().access_point = false;
        Ok(())
    }
}

#[derive(Default)]
struct PortalState {
    active: bool,
    starts: usize,
    submitted: VecDeque<(String, String)>,
}

/// Portal whose form submissions are scripted by the test
#[derive(Clone, Default)]
pub struct RecordingPortal(Rc<RefCell<PortalState>>);

impl RecordingPortal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn submit(&self, ssid: &str, password: &str) {
        self.0
            .borrow_mut()
            .submitted
            .push_back((ssid.to_string(), password.to_string()));
    }

    pub fn is_active(&self) -> bool {
        self.0.borrow().active
    }

    pub fn starts(&self) -> usize {
        self.0.borrow().starts
    }
}

impl CaptivePortal for RecordingPortal {
    fn start(&mut self) -> Result<(), WifiError> {
        let mut state = self.0.borrow_mut();
        state.active = true;
        state.starts += 1;
        Ok(())
    }

    fn stop(&mut self) {
        self.0.borrow_mut().active = false;
    }

    fn is_active(&self) -> bool {
        self.0.borrow().active
    }

    fn process(&mut self, wifi: &mut dyn WifiDriver) {
        let next = self.0.borrow_mut().submitted.pop_front();
        if let Some((ssid, password)) = next {
            let _ = wifi.begin(&ssid, &password);
        }
    }
}

// ---------------------------------------------------------------------------
// BLE
// ---------------------------------------------------------------------------

#[derive(Default)]
struct BleState {
    device_name: Option<String>,
    advertising: bool,
    status: String,
    statuses: Vec<String>,
    notifications: usize,
    events: VecDeque<BleEvent>,
    fail_start: bool,
}

#[derive(Clone, Default)]
pub struct RecordingBle(Rc<RefCell<BleState>>);

impl RecordingBle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_event(&self, event: BleEvent) {
        self.0.borrow_mut().events.push_back(event);
    }

    pub fn push_write(&self, characteristic: Characteristic, value: &str) {
        self.push_event(BleEvent::Write {
            characteristic,
            value: value.as_bytes().to_vec(),
        });
    }

    /// Every status value set, in order
    pub fn statuses(&self) -> Vec<String> {
        self.0.borrow().statuses.clone()
    }

    pub fn notifications(&self) -> usize {
        self.0.borrow().notifications
    }

    pub fn advertising(&self) -> bool {
        self.0.borrow().advertising
    }

    pub fn set_advertising(&self, on: bool) {
        self.0.borrow_mut().advertising = on;
    }

    pub fn device_name(&self) -> Option<String> {
        self.0.borrow().device_name.clone()
    }

    pub fn fail_start(&self, fail: bool) {
        self.0.borrow_mut().fail_start = fail;
    }
}

impl BleTransport for RecordingBle {
    fn start(&mut self, device_name: &str) -> Result<(), BleError> {
        let mut state = self.0.borrow_mut();
        if state.fail_start {
            return Err(BleError::Stack("init failed".to_string()));
        }
        state.device_name = Some(device_name.to_string());
        Ok(())
    }

    fn start_advertising(&mut self) -> Result<(), BleError> {
        self.0.borrow_mut().advertising = true;
        Ok(())
    }

    fn stop_advertising(&mut self) -> Result<(), BleError> {
        self.0.borrow_mut().advertising = false;
        Ok(())
    }

    fn set_status(&mut self, value: &str) {
        let mut state = self.0.borrow_mut();
        state.status = value.to_string();
        state.statuses.push(value.to_string());
    }

    fn notify_status(&mut self) {
        self.0.borrow_mut().notifications += 1;
    }

    fn poll_event(&mut self) -> Option<BleEvent> {
        self.0.borrow_mut().events.pop_front()
    }
}

#[derive(Default)]
struct DisplayLog {
    frames: Vec<(u8, bool)>,
    clears: usize,
}

#[derive(Clone, Default)]
pub struct RecordingDisplay(Rc<RefCell<DisplayLog>>);

impl RecordingDisplay {
    pub fn frames(&self) -> Vec<(u8, bool)> {
        self.0.borrow().frames.clone()
    }

    pub fn clears(&self) -> usize {
        self.0.borrow().clears
    }
}

impl PasskeyDisplay for RecordingDisplay {
    fn show_digit(&mut self, digit: u8, first: bool) {
        self.0.borrow_mut().frames.push((digit, first));
    }

    fn clear(&mut self) {
        self.0.borrow_mut().clears += 1;
    }
}

// ---------------------------------------------------------------------------
// LEDs, system, services
// ---------------------------------------------------------------------------

#[derive(Default)]
struct LedLog {
    shown: Vec<Rgb>,
    clears: usize,
}

#[derive(Clone, Default)]
pub struct RecordingLeds(Rc<RefCell<LedLog>>);

impl RecordingLeds {
    pub fn shown(&self) -> Vec<Rgb> {
        self.0.borrow().shown.clone()
    }

    pub fn clears(&self) -> usize {
        self.0.borrow().clears
    }
}

impl StatusLeds for RecordingLeds {
    fn show(&mut self, color: Rgb) {
        self.0.borrow_mut().shown.push(color);
    }

    fn clear(&mut self) {
        self.0.borrow_mut().clears += 1;
    }
}

#[derive(Default)]
struct SystemState {
    stats: SystemStats,
    restarts: usize,
}

#[derive(Clone, Default)]
pub struct RecordingSystem(Rc<RefCell<SystemState>>);

impl RecordingSystem {
    pub fn restarts(&self) -> usize {
        self.0.borrow().restarts
    }

    pub fn set_stats(&self, stats: SystemStats) {
        self.0.borrow_mut().stats = stats;
    }
}

impl SystemControl for RecordingSystem {
    fn stats(&self) -> SystemStats {
        self.0.borrow().stats
    }

    fn restart(&mut self) {
        log::info!("restart requested");
        self.0.borrow_mut().restarts += 1;
    }
}

#[derive(Debug, Clone, Default)]
pub struct FixedTelemetry(pub Telemetry);

impl TelemetrySource for FixedTelemetry {
    fn telemetry(&self) -> Telemetry {
        self.0.clone()
    }
}

#[derive(Default)]
struct ServiceLog {
    web_starts: usize,
    mqtt_starts: usize,
    mqtt_brokers: Vec<String>,
    polls: usize,
    fail_web: bool,
}

#[derive(Clone, Default)]
pub struct RecordingServices(Rc<RefCell<ServiceLog>>);

impl RecordingServices {
    pub fn web_starts(&self) -> usize {
        self.0.borrow().web_starts
    }

    pub fn mqtt_starts(&self) -> usize {
        self.0.borrow().mqtt_starts
    }

    pub fn mqtt_brokers(&self) -> Vec<String> {
        self.0.borrow().mqtt_brokers.clone()
    }

    pub fn polls(&self) -> usize {
        self.0.borrow().polls
    }

    pub fn fail_web(&self, fail: bool) {
        self.0.borrow_mut().fail_web = fail;
    }
}

impl OnlineServices for RecordingServices {
    fn start_web_server(&mut self) -> Result<(), ServiceError> {
        let mut log = self.0.borrow_mut();
        log.web_starts += 1;
        if log.fail_web {
            return Err(ServiceError::WebServer("bind failed".to_string()));
        }
        Ok(())
    }

    fn start_mqtt(&mut self, settings: &DeviceSettings) -> Result<(), ServiceError> {
        let mut log = self.0.borrow_mut();
        log.mqtt_starts += 1;
        log.mqtt_brokers.push(settings.mqtt_broker.clone());
        Ok(())
    }

    fn poll(&mut self, _now_ms: u64) {
        self.0.borrow_mut().polls += 1;
    }
}

#[derive(Default)]
struct FaceLog {
    renders: Vec<Option<NaiveDateTime>>,
    startup_until_ms: u64,
}

#[derive(Clone, Default)]
pub struct RecordingFace(Rc<RefCell<FaceLog>>);

impl RecordingFace {
    /// Startup animation plays until uptime reaches `ms`
    pub fn set_startup_until(&self, ms: u64) {
        self.0.borrow_mut().startup_until_ms = ms;
    }

    pub fn renders(&self) -> usize {
        self.0.borrow().renders.len()
    }

    pub fn last_render(&self) -> Option<Option<NaiveDateTime>> {
        self.0.borrow().renders.last().copied()
    }
}

impl ClockFace for RecordingFace {
    fn startup_running(&mut self, now_ms: u64) -> bool {
        now_ms < self.0.borrow().startup_until_ms
    }

    fn render(&mut self, time: Option<NaiveDateTime>, _settings: &DeviceSettings) {
        self.0.borrow_mut().renders.push(time);
    }
}
