//! NimBLE GATT server for WiFi provisioning
//!
//! Callbacks run on the NimBLE host task and only queue [`BleEvent`]s; the
//! provisioning session drains them from the main loop via `poll_event`.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use esp32_nimble::utilities::mutex::Mutex as NimbleMutex;
use esp32_nimble::utilities::BleUuid;
use esp32_nimble::{BLEAdvertisementData, BLECharacteristic, BLEDevice, NimbleProperties};
use log::*;
use wordclock_core::provisioning::{
    BleError, BleEvent, BleTransport, Characteristic, COMMAND_UUID, PASSWORD_UUID, SERVICE_UUID,
    SSID_UUID, STATUS_UUID,
};

type EventQueue = Arc<Mutex<VecDeque<BleEvent>>>;

fn uuid(value: &str) -> Result<BleUuid, BleError> {
    BleUuid::from_uuid128_string(value).map_err(|e| BleError::Stack(format!("bad uuid {}: {:?}", value, e)))
}

fn stack_err(context: &str, e: impl core::fmt::Debug) -> BleError {
    BleError::Stack(format!("{}: {:?}", context, e))
}

fn push(queue: &EventQueue, event: BleEvent) {
    if let Ok(mut q) = queue.lock() {
        q.push_back(event);
    }
}

#[derive(Default)]
pub struct NimbleTransport {
    events: EventQueue,
    status: Option<Arc<NimbleMutex<BLECharacteristic>>>,
    service_uuid: Option<BleUuid>,
    device_name: String,
}

impl NimbleTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn write_characteristic(
        &self,
        service: &Arc<NimbleMutex<esp32_nimble::BLEService>>,
        id: &str,
        characteristic: Characteristic,
    ) -> Result<(), BleError> {
        let queue = self.events.clone();
        let chr = service.lock().create_characteristic(uuid(id)?, NimbleProperties::WRITE);
        chr.lock().on_write(move |args| {
            push(
                &queue,
                BleEvent::Write {
                    characteristic,
                    value: args.recv_data().to_vec(),
                },
            );
        });
        Ok(())
    }
}

impl BleTransport for NimbleTransport {
    fn start(&mut self, device_name: &str) -> Result<(), BleError> {
        if self.status.is_some() {
            return Ok(());
        }

        let ble_device = BLEDevice::take();
        BLEDevice::set_device_name(device_name).map_err(|e| stack_err("set_device_name", e))?;

        let server = ble_device.get_server();
        // Re-advertising is driven by the session so it stops once provisioning ends
        server.advertise_on_disconnect(false);

        let connect_queue = self.events.clone();
        server.on_connect(move |server, desc| {
            info!("BLE client connected");
            if let Err(e) = server.update_conn_params(desc.conn_handle(), 24, 48, 0, 60) {
                debug!("BLE connection parameter update rejected: {:?}", e);
            }
            push(&connect_queue, BleEvent::ClientConnected);
        });

        let disconnect_queue = self.events.clone();
        server.on_disconnect(move |_desc, reason| {
            info!("BLE client disconnected ({:?})", reason);
            push(&disconnect_queue, BleEvent::ClientDisconnected);
        });

        let service_uuid = uuid(SERVICE_UUID)?;
        let service = server.create_service(service_uuid);

        self.write_characteristic(&service, SSID_UUID, Characteristic::Ssid)?;
        self.write_characteristic(&service, PASSWORD_UUID, Characteristic::Password)?;
        self.write_characteristic(&service, COMMAND_UUID, Characteristic::Command)?;

        let status = service
            .lock()
            .create_characteristic(uuid(STATUS_UUID)?, NimbleProperties::READ | NimbleProperties::NOTIFY);
        status.lock().set_value(b"{}");

        self.status = Some(status);
        self.service_uuid = Some(service_uuid);
        self.device_name = device_name.to_string();
        info!("BLE GATT server ready as '{}'", device_name);
        Ok(())
    }

    fn start_advertising(&mut self) -> Result<(), BleError> {
        let service_uuid = self
            .service_uuid
            .ok_or_else(|| BleError::Stack("server not started".to_string()))?;

        let advertising = BLEDevice::take().get_advertising();
        let mut advertising = advertising.lock();
        advertising
            .set_data(
                BLEAdvertisementData::new()
                    .name(&self.device_name)
                    .add_service_uuid(service_uuid),
            )
            .map_err(|e| stack_err("set advertising data", e))?;
        advertising.start().map_err(|e| stack_err("start advertising", e))?;
        info!("BLE advertising started");
        Ok(())
    }

    fn stop_advertising(&mut self) -> Result<(), BleError> {
        if self.service_uuid.is_none() {
            return Ok(());
        }
        BLEDevice::take()
            .get_advertising()
            .lock()
            .stop()
            .map_err(|e| stack_err("stop advertising", e))?;
        info!("BLE advertising stopped");
        Ok(())
    }

    fn set_status(&mut self, value: &str) {
        if let Some(status) = &self.status {
            status.lock().set_value(value.as_bytes());
        }
    }

    fn notify_status(&mut self) {
        if let Some(status) = &self.status {
            status.lock().notify();
        }
    }

    fn poll_event(&mut self) -> Option<BleEvent> {
        self.events.lock().ok()?.pop_front()
    }
}
