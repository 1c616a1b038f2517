//! Services started once the clock is online: admin web server, MQTT and mDNS.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use embedded_svc::http::Method;
use embedded_svc::io::{Read, Write};
use esp_idf_svc::http::server::{Configuration, EspHttpServer};
use esp_idf_svc::mdns::EspMdns;
use esp_idf_svc::mqtt::client::{EspMqttClient, EventPayload, MqttClientConfiguration, QoS};
use heapless::Deque;
use serde::{Deserialize, Serialize};
use wordclock_core::runtime::{OnlineServices, ServiceError};
use wordclock_core::settings::DeviceSettings;
use wordclock_core::UpdateChannel;

use crate::config::MDNS_HOSTNAME;
use crate::ota::UI_MOUNT_POINT;

const MAX_BODY_LEN: usize = 1024;
const MAX_UI_FILE_LEN: usize = 64 * 1024;
const COMMAND_QUEUE_LEN: usize = 8;

/// Requests from web handlers, applied by the main loop
#[derive(Debug, Clone, PartialEq)]
pub enum AdminCommand {
    CheckForUpdate,
    SyncUi,
    StartProvisioning,
    ResetWifi,
    Restart,
    UpdateSettings(SettingsPatch),
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SettingsPatch {
    pub brightness: Option<u8>,
    pub auto_update: Option<bool>,
    pub update_channel: Option<String>,
    pub grid_variant: Option<String>,
    pub mqtt_broker: Option<String>,
    pub log_level: Option<String>,
}

impl SettingsPatch {
    pub fn apply(&self, settings: &mut DeviceSettings) {
        if let Some(brightness) = self.brightness {
            settings.brightness = brightness;
        }
        if let Some(auto_update) = self.auto_update {
            settings.auto_update = auto_update;
        }
        if let Some(channel) = &self.update_channel {
            settings.update_channel = UpdateChannel::normalize(channel);
        }
        if let Some(grid) = &self.grid_variant {
            settings.grid_variant = grid.clone();
            settings.setup_complete = true;
        }
        if let Some(broker) = &self.mqtt_broker {
            settings.mqtt_broker = broker.clone();
        }
    }
}

/// What the admin page shows, refreshed by the main loop
#[derive(Debug, Clone, Default, Serialize)]
pub struct StatusSnapshot {
    pub hardware_id: String,
    pub firmware: String,
    pub ui: String,
    pub ssid: Option<String>,
    pub rssi: Option<i32>,
    pub ip: Option<String>,
    pub settings: DeviceSettings,
    pub heartbeat_status: Option<u16>,
    pub provisioning: Option<&'static str>,
}

/// Shared between the httpd task and the main loop
#[derive(Clone, Default)]
pub struct AdminBridge {
    commands: Arc<Mutex<Deque<AdminCommand, COMMAND_QUEUE_LEN>>>,
    snapshot: Arc<Mutex<StatusSnapshot>>,
}

impl AdminBridge {
    pub fn push(&self, command: AdminCommand) {
        if let Ok(mut queue) = self.commands.lock() {
            if let Err(dropped) = queue.push_back(command) {
                log::warn!("Admin queue full, dropping {:?}", dropped);
            }
        }
    }

    pub fn next_command(&self) -> Option<AdminCommand> {
        self.commands.lock().ok()?.pop_front()
    }

    pub fn publish(&self, snapshot: StatusSnapshot) {
        if let Ok(mut current) = self.snapshot.lock() {
            *current = snapshot;
        }
    }

    fn snapshot_json(&self) -> Result<String> {
        let snapshot = self
            .snapshot
            .lock()
            .map_err(|_| anyhow::anyhow!("status lock poisoned"))?;
        Ok(serde_json::to_string(&*snapshot)?)
    }
}

fn content_type(path: &str) -> &'static str {
    match path.rsplit('.').next() {
        Some("html") => "text/html; charset=utf-8",
        Some("css") => "text/css",
        Some("js") => "application/javascript",
        Some("json") => "application/json",
        Some("svg") => "image/svg+xml",
        _ => "application/octet-stream",
    }
}

/// Maps a request URI onto the UI filesystem, rejecting traversal
fn ui_path(uri: &str) -> Option<String> {
    let path = uri.split('?').next().unwrap_or("/");
    if path.contains("..") {
        return None;
    }
    let path = if path == "/" { "/dashboard.html" } else { path };
    Some(format!("{}{}", UI_MOUNT_POINT, path))
}

pub struct EspOnlineServices {
    bridge: AdminBridge,
    hardware_id: String,
    server: Option<EspHttpServer<'static>>,
    mqtt: Option<EspMqttClient<'static>>,
    mqtt_connected: Arc<AtomicBool>,
    announced: bool,
    _mdns: Option<EspMdns>,
}

impl EspOnlineServices {
    pub fn new(bridge: AdminBridge, hardware_id: String) -> Self {
        Self {
            bridge,
            hardware_id,
            server: None,
            mqtt: None,
            mqtt_connected: Arc::new(AtomicBool::new(false)),
            announced: false,
            _mdns: None,
        }
    }

    fn start_mdns(&mut self) -> Result<()> {
        let mut mdns = EspMdns::take()?;
        mdns.set_hostname(MDNS_HOSTNAME)?;
        mdns.add_service(None, "_http", "_tcp", 80, &[("path", "/")])?;
        self._mdns = Some(mdns);
        log::info!("mDNS active at http://{}.local", MDNS_HOSTNAME);
        Ok(())
    }

    fn serve(&self) -> Result<EspHttpServer<'static>> {
        let mut server = EspHttpServer::new(&Configuration {
            uri_match_wildcard: true,
            ..Default::default()
        })?;

        let bridge = self.bridge.clone();
        server.fn_handler("/api/status", Method::Get, move |req| {
            let json = bridge.snapshot_json()?;
            let mut response = req.into_response(200, None, &[("Content-Type", "application/json")])?;
            response.write_all(json.as_bytes())?;
            Ok::<(), anyhow::Error>(())
        })?;

        let bridge = self.bridge.clone();
        server.fn_handler("/api/settings", Method::Post, move |mut req| {
            let mut buf = vec![0u8; MAX_BODY_LEN];
            let len = req.read(&mut buf)?;
            buf.truncate(len);

            let patch: SettingsPatch = match serde_json::from_slice(&buf) {
                Ok(patch) => patch,
                Err(e) => {
                    req.into_status_response(400)?.write_all(e.to_string().as_bytes())?;
                    return Ok(());
                }
            };
            if let Some(level) = &patch.log_level {
                if !crate::logging::set_max_level_from_str(level) {
                    log::warn!("Unknown log level '{}'", level);
                }
            }
            bridge.push(AdminCommand::UpdateSettings(patch));
            req.into_ok_response()?;
            Ok::<(), anyhow::Error>(())
        })?;

        let actions = [
            ("/api/update/check", AdminCommand::CheckForUpdate),
            ("/api/update/ui", AdminCommand::SyncUi),
            ("/api/ble/start", AdminCommand::StartProvisioning),
            ("/api/wifi/reset", AdminCommand::ResetWifi),
            ("/api/restart", AdminCommand::Restart),
        ];
        for (path, command) in actions {
            let bridge = self.bridge.clone();
            server.fn_handler(path, Method::Post, move |req| {
                bridge.push(command.clone());
                req.into_response(202, Some("Accepted"), &[])?;
                Ok::<(), anyhow::Error>(())
            })?;
        }

        server.fn_handler("/*", Method::Get, |req| {
            let Some(path) = ui_path(req.uri()) else {
                req.into_status_response(400)?.write_all(b"Invalid path")?;
                return Ok(());
            };
            match std::fs::read(&path) {
                Ok(data) if data.len() <= MAX_UI_FILE_LEN => {
                    let mut response = req.into_response(200, None, &[("Content-Type", content_type(&path))])?;
                    response.write_all(&data)?;
                }
                Ok(_) => {
                    req.into_status_response(413)?.write_all(b"File too large")?;
                }
                Err(_) => {
                    req.into_status_response(404)?.write_all(b"Not found")?;
                }
            }
            Ok::<(), anyhow::Error>(())
        })?;

        Ok(server)
    }

    fn status_topic(&self) -> String {
        format!("wordclock/{}/status", self.hardware_id)
    }
}

impl OnlineServices for EspOnlineServices {
    fn start_web_server(&mut self) -> Result<(), ServiceError> {
        let server = self.serve().map_err(|e| ServiceError::WebServer(e.to_string()))?;
        self.server = Some(server);
        log::info!("Web server started on port 80");

        if let Err(e) = self.start_mdns() {
            log::warn!("Failed to start mDNS: {:?}", e);
        }
        Ok(())
    }

    fn start_mqtt(&mut self, settings: &DeviceSettings) -> Result<(), ServiceError> {
        if settings.mqtt_broker.is_empty() {
            log::info!("MQTT disabled (no broker configured)");
            return Ok(());
        }

        let client_id = format!("wordclock-{}", self.hardware_id);
        let conf = MqttClientConfiguration {
            client_id: Some(&client_id),
            ..Default::default()
        };
        let connected = self.mqtt_connected.clone();
        let client = EspMqttClient::new_cb(&settings.mqtt_broker, &conf, move |event| match event.payload() {
            EventPayload::Connected(_) => {
                log::info!("MQTT connected");
                connected.store(true, Ordering::Relaxed);
            }
            EventPayload::Disconnected => {
                log::warn!("MQTT disconnected");
                connected.store(false, Ordering::Relaxed);
            }
            EventPayload::Error(e) => log::warn!("MQTT error: {:?}", e),
            _ => {}
        })
        .map_err(|e| ServiceError::Mqtt(e.to_string()))?;

        self.mqtt = Some(client);
        log::info!("MQTT client started for {}", settings.mqtt_broker);
        Ok(())
    }

    fn poll(&mut self, _now_ms: u64) {
        let connected = self.mqtt_connected.load(Ordering::Relaxed);
        if !connected {
            self.announced = false;
            return;
        }
        if self.announced {
            return;
        }

        let topic = self.status_topic();
        if let Some(client) = self.mqtt.as_mut() {
            match client.enqueue(&topic, QoS::AtLeastOnce, true, b"online") {
                Ok(_) => self.announced = true,
                Err(e) => log::warn!("MQTT publish failed: {:?}", e),
            }
        }
    }
}
