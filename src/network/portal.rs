//! Setup page served from the soft AP while the clock has no network.

use std::sync::{Arc, Mutex};

use anyhow::Result;
use embedded_svc::http::Method;
use embedded_svc::io::{Read, Write};
use esp_idf_svc::http::server::{Configuration, EspHttpServer};
use serde::Deserialize;
use wordclock_core::network::{CaptivePortal, WifiDriver, WifiError};

const MAX_FORM_LEN: usize = 512;

const SETUP_PAGE: &str = r#"<!DOCTYPE html><html><head><meta name="viewport" content="width=device-width"><title>Wordclock setup</title></head>
<body><h1>Wordclock</h1><form id="f"><input name="ssid" placeholder="Network"><input name="password" type="password" placeholder="Password"><button>Connect</button></form>
<script>f.onsubmit=e=>{e.preventDefault();fetch('/save',{method:'POST',body:JSON.stringify({ssid:f.ssid.value,password:f.password.value})}).then(()=>document.body.innerHTML='<h1>Connecting...</h1>')}</script></body></html>"#;

/// Paths probed by phones to detect a captive network
const PROBE_PATHS: &[&str] = &["/generate_204", "/hotspot-detect.html", "/ncsi.txt", "/connecttest.txt"];

#[derive(Deserialize)]
struct PortalForm {
    ssid: String,
    #[serde(default)]
    password: String,
}

type Submission = Arc<Mutex<Option<PortalForm>>>;

pub struct SetupPortal {
    server: Option<EspHttpServer<'static>>,
    submission: Submission,
}

impl SetupPortal {
    pub fn new() -> Self {
        Self {
            server: None,
            submission: Arc::new(Mutex::new(None)),
        }
    }

    fn serve(&self) -> Result<EspHttpServer<'static>> {
        let mut server = EspHttpServer::new(&Configuration::default())?;

        server.fn_handler("/", Method::Get, |req| {
            let mut response = req.into_response(200, None, &[("Content-Type", "text/html; charset=utf-8")])?;
            response.write_all(SETUP_PAGE.as_bytes())?;
            Ok::<(), anyhow::Error>(())
        })?;

        for path in PROBE_PATHS {
            server.fn_handler(path, Method::Get, |req| {
                req.into_response(302, None, &[("Location", "http://192.168.71.1/")])?;
                Ok::<(), anyhow::Error>(())
            })?;
        }

        let submission = self.submission.clone();
        server.fn_handler("/save", Method::Post, move |mut req| {
            let mut buf = vec![0u8; MAX_FORM_LEN];
            let mut len = 0;
            while len < buf.len() {
                let n = req.read(&mut buf[len..])?;
                if n == 0 {
                    break;
                }
                len += n;
            }
            buf.truncate(len);

            let form: PortalForm = match serde_json::from_slice(&buf) {
                Ok(form) => form,
                Err(e) => {
                    log::warn!("Portal: invalid form: {}", e);
                    req.into_status_response(400)?.write_all(b"invalid form")?;
                    return Ok(());
                }
            };
            log::info!("Portal: credentials received for '{}'", form.ssid);
            if let Ok(mut slot) = submission.lock() {
                *slot = Some(form);
            }
            req.into_ok_response()?.write_all(b"ok")?;
            Ok::<(), anyhow::Error>(())
        })?;

        Ok(server)
    }
}

impl CaptivePortal for SetupPortal {
    fn start(&mut self) -> Result<(), WifiError> {
        if self.server.is_some() {
            return Ok(());
        }
        let server = self.serve().map_err(|e| WifiError::Portal(e.to_string()))?;
        self.server = Some(server);
        log::info!("Setup portal listening on port 80");
        Ok(())
    }

    fn stop(&mut self) {
        if self.server.take().is_some() {
            log::info!("Setup portal stopped");
        }
    }

    fn is_active(&self) -> bool {
        self.server.is_some()
    }

    fn process(&mut self, wifi: &mut dyn WifiDriver) {
        let form = match self.submission.lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => None,
        };
        if let Some(form) = form {
            if let Err(e) = wifi.begin(&form.ssid, &form.password) {
                log::error!("Portal: connect to '{}' failed: {}", form.ssid, e);
            }
        }
    }
}
