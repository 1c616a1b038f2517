//! HTTP(S) client over `EspHttpConnection` with the certificate bundle.

use std::time::Duration;

use embedded_svc::http::Method as EspMethod;
use esp_idf_svc::http::client::{Configuration, EspHttpConnection};
use esp_idf_svc::sys::{self, EspError};
use wordclock_core::http::{HttpClient, HttpError, Method, Request, Response, ResponseStream};

const READ_CHUNK: usize = 1024;
const BUFFER_SIZE: usize = 2048;

fn map_err(e: EspError) -> HttpError {
    let code = e.code();
    if code == sys::ESP_ERR_TIMEOUT as i32 || code == sys::ESP_ERR_HTTP_EAGAIN as i32 {
        HttpError::Timeout
    } else if code == sys::ESP_ERR_HTTP_CONNECT as i32 {
        HttpError::Connect(e.to_string())
    } else {
        HttpError::Io(e.to_string())
    }
}

pub struct EspHttpClient;

impl EspHttpClient {
    pub fn new() -> Self {
        Self
    }

    fn connect(request: &Request<'_>) -> Result<EspHttpConnection, HttpError> {
        let config = Configuration {
            timeout: Some(Duration::from_millis(u64::from(request.timeout_ms))),
            buffer_size: Some(BUFFER_SIZE),
            buffer_size_tx: Some(1024),
            crt_bundle_attach: Some(sys::esp_crt_bundle_attach),
            ..Default::default()
        };

        let mut conn = EspHttpConnection::new(&config).map_err(|e| HttpError::Connect(e.to_string()))?;

        let method = match request.method {
            Method::Get => EspMethod::Get,
            Method::Post => EspMethod::Post,
        };
        let length = request.body.map(|b| b.len().to_string());
        let mut headers = request.headers.clone();
        if let Some(length) = length.as_deref() {
            headers.push(("Content-Length", length));
        }

        conn.initiate_request(method, request.url, &headers).map_err(map_err)?;
        if let Some(body) = request.body {
            let mut sent = 0;
            while sent < body.len() {
                match conn.write(&body[sent..]).map_err(map_err)? {
                    0 => return Err(HttpError::Io("request body write stalled".to_string())),
                    n => sent += n,
                }
            }
        }
        conn.initiate_response().map_err(map_err)?;
        Ok(conn)
    }
}

impl HttpClient for EspHttpClient {
    fn send(&mut self, request: &Request<'_>) -> Result<Response, HttpError> {
        let mut stream = self.open(request)?;
        let status = stream.status();

        let mut body = Vec::new();
        let mut buf = [0u8; READ_CHUNK];
        loop {
            let n = stream.read(&mut buf)?;
            if n == 0 {
                break;
            }
            body.extend_from_slice(&buf[..n]);
        }
        Ok(Response { status, body })
    }

    fn open<'s>(&'s mut self, request: &Request<'_>) -> Result<Box<dyn ResponseStream + 's>, HttpError> {
        let conn = Self::connect(request)?;
        log::debug!("{:?} {} -> {}", request.method, request.url, conn.status());
        Ok(Box::new(EspResponse { conn }))
    }
}

struct EspResponse {
    conn: EspHttpConnection,
}

impl ResponseStream for EspResponse {
    fn status(&self) -> u16 {
        self.conn.status()
    }

    fn content_length(&self) -> Option<u64> {
        self.conn.header("Content-Length").and_then(|v| v.trim().parse().ok())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, HttpError> {
        self.conn.read(buf).map_err(map_err)
    }
}
