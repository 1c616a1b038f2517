use rand::rngs::StdRng;
use rand::SeedableRng;
use wordclock_core::config::Endpoints;
use wordclock_core::mock::{
    ManualClock, MemoryIdentity, MemoryMarkers, MemorySettings, MemoryUiFiles, RecordingBle, RecordingDisplay,
    RecordingFace, RecordingFlash, RecordingLeds, RecordingPortal, RecordingServices, RecordingSystem, ScriptedHttp,
    WifiSim,
};
use wordclock_core::{Board, ProductConfig, Runtime};

pub const API: &str = "https://api.test";
pub const OTA: &str = "https://ota.test";
pub const LEGACY_MANIFEST: &str = "https://ota.test/legacy/manifest.json";
pub const UI_BASE: &str = "https://ui.test";
pub const HARDWARE_ID: &str = "A1B2C3D4E5F6";

pub const REGISTER_URL: &str = "https://api.test/api/v1/devices/register";
pub const HEARTBEAT_URL: &str = "https://api.test/api/v1/devices/heartbeat";

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn product(base: ProductConfig) -> ProductConfig {
    base.with_endpoints(Endpoints {
        api_base: API.to_string(),
        ota_base: OTA.to_string(),
        legacy_manifest_url: LEGACY_MANIFEST.to_string(),
        ui_release_base: UI_BASE.to_string(),
        provisioning_secret: "prov-secret".to_string(),
        ..Endpoints::default()
    })
}

pub fn channel_url(product_id: &str, channel: &str) -> String {
    format!("{OTA}/{product_id}/channels/{channel}.json")
}

/// A runtime plus a handle on every collaborator it owns
pub struct Rig {
    pub clock: ManualClock,
    pub wifi: WifiSim,
    pub portal: RecordingPortal,
    pub ble: RecordingBle,
    pub http: ScriptedHttp,
    pub identity: MemoryIdentity,
    pub markers: MemoryMarkers,
    pub settings: MemorySettings,
    pub system: RecordingSystem,
    pub flash: RecordingFlash,
    pub ui_files: MemoryUiFiles,
    pub services: RecordingServices,
    pub face: RecordingFace,
    pub leds: RecordingLeds,
    pub display: RecordingDisplay,
    pub runtime: Runtime<WifiSim, RecordingBle>,
}

impl Rig {
    pub fn new(config: ProductConfig) -> Self {
        Self::with_settings(config, MemorySettings::default())
    }

    /// Starts from an already persisted settings store
    pub fn with_settings(config: ProductConfig, settings: MemorySettings) -> Self {
        init_logging();
        let clock = ManualClock::new();
        let wifi = WifiSim::new();
        let portal = RecordingPortal::new();
        let ble = RecordingBle::new();
        let http = ScriptedHttp::new();
        let identity = MemoryIdentity::new(HARDWARE_ID);
        let markers = MemoryMarkers::default();
        let system = RecordingSystem::default();
        let flash = RecordingFlash::new();
        let ui_files = MemoryUiFiles::new();
        let services = RecordingServices::default();
        let face = RecordingFace::default();
        let leds = RecordingLeds::default();
        let display = RecordingDisplay::default();

        let board = Board {
            wifi: wifi.clone(),
            portal: Some(Box::new(portal.clone())),
            ble: Some(ble.clone()),
            clock: Box::new(clock.clone()),
            http: Box::new(http.clone()),
            identity: Box::new(identity.clone()),
            markers: Box::new(markers.clone()),
            settings: Box::new(settings.clone()),
            system: Box::new(system.clone()),
            flash: Box::new(flash.clone()),
            ui_files: Some(Box::new(ui_files.clone())),
            services: Box::new(services.clone()),
            face: Box::new(face.clone()),
            status_leds: Box::new(leds.clone()),
            passkey_display: Box::new(display.clone()),
            rng: Box::new(StdRng::seed_from_u64(42)),
        };

        Self {
            runtime: Runtime::new(config, board),
            clock,
            wifi,
            portal,
            ble,
            http,
            identity,
            markers,
            settings,
            system,
            flash,
            ui_files,
            services,
            face,
            leds,
            display,
        }
    }

    /// Station credentials stored and the matching network in range
    pub fn with_home_network(self) -> Self {
        self.wifi.store_credentials("home", "secret");
        self.wifi.set_network("home", "secret");
        self
    }

    pub fn registered(self, device_id: &str, token: &str) -> Self {
        use wordclock_core::identity::IdentityStore;
        let mut identity = self.identity.clone();
        identity.set_device_id(device_id).unwrap();
        identity.set_device_token(token).unwrap();
        self
    }

    pub fn tick_after(&mut self, ms: u64) {
        self.clock.advance(ms);
        self.runtime.tick();
    }

    /// Ticks every `step` ms until `total` ms have passed
    pub fn run_for(&mut self, total: u64, step: u64) {
        let mut elapsed = 0;
        while elapsed < total {
            self.tick_after(step);
            elapsed += step;
        }
    }
}
