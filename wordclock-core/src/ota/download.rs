//! Streaming artifact download straight into flash.

use sha2::{Digest, Sha256};

use super::flash::{FlashTarget, Partition};
use super::OtaError;
use crate::http::{HttpClient, Request};

pub const CHUNK_SIZE: usize = 2048;

#[derive(Debug, Clone, Copy)]
pub struct DownloadSpec<'a> {
    pub url: &'a str,
    pub partition: Partition,
    /// Size announced by the artifact manifest; must match `Content-Length`
    pub expected_size: Option<u64>,
    /// Hex digest; checked before the image is committed
    pub sha256: Option<&'a str>,
    pub no_cache: bool,
}

/// Downloads `spec.url` into `spec.partition`, returning the bytes written.
///
/// Every failure after the flash writer opened aborts it, so a partial or
/// corrupt image is never committed.
pub fn stream_to_flash(
    http: &mut dyn HttpClient,
    flash: &mut dyn FlashTarget,
    spec: &DownloadSpec<'_>,
) -> Result<u64, OtaError> {
    let mut request = Request::get(spec.url);
    if spec.no_cache {
        request = request.no_cache();
    }

    let mut stream = http.open(&request)?;
    let status = stream.status();
    if status != 200 {
        log::error!("Download of {} failed: HTTP {}", spec.partition, status);
        return Err(OtaError::HttpStatus(status));
    }

    let length = match stream.content_length() {
        Some(n) if n > 0 => n,
        _ => {
            log::error!("Invalid {} image size", spec.partition);
            return Err(OtaError::InvalidSize);
        }
    };
    if let Some(expected) = spec.expected_size.filter(|n| *n > 0) {
        if expected != length {
            log::error!("{} size mismatch: manifest {} vs server {}", spec.partition, expected, length);
            return Err(OtaError::SizeMismatch {
                expected,
                actual: length,
            });
        }
    }

    let expected_digest = spec
        .sha256
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_ascii_lowercase);

    let mut writer = flash.begin(spec.partition, length)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; CHUNK_SIZE];
    let mut written: u64 = 0;

    let copied = loop {
        let n = match stream.read(&mut buf) {
            Ok(0) => break Ok(()),
            Ok(n) => n,
            Err(e) => break Err(OtaError::Http(e)),
        };
        if written + n as u64 > length {
            break Err(OtaError::SizeMismatch {
                expected: length,
                actual: written + n as u64,
            });
        }
        if let Err(e) = writer.write(&buf[..n]) {
            break Err(e.into());
        }
        hasher.update(&buf[..n]);
        written += n as u64;
    };

    if let Err(e) = copied {
        log::error!("{} download aborted after {} bytes: {}", spec.partition, written, e);
        writer.abort();
        return Err(e);
    }
    if written != length {
        log::error!("Incomplete write: {}/{}", written, length);
        writer.abort();
        return Err(OtaError::Incomplete {
            written,
            expected: length,
        });
    }
    if let Some(expected) = expected_digest {
        let actual = format!("{:x}", hasher.finalize());
        if actual != expected {
            log::error!("{} SHA-256 mismatch", spec.partition);
            writer.abort();
            return Err(OtaError::ChecksumMismatch);
        }
        log::debug!("{} SHA-256 verified", spec.partition);
    }

    writer.finish()?;
    log::info!("{} image written ({} bytes)", spec.partition, written);
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{HttpError, Method};
    use crate::mock::{RecordingFlash, ScriptedHttp, ScriptedResponse};

    const URL: &str = "http://ota.test/fw.bin";

    fn image(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    fn spec(sha256: Option<&str>) -> DownloadSpec<'_> {
        DownloadSpec {
            url: URL,
            partition: Partition::App,
            expected_size: None,
            sha256,
            no_cache: false,
        }
    }

    fn hex_digest(data: &[u8]) -> String {
        format!("{:x}", Sha256::digest(data))
    }

    #[test]
    fn writes_and_commits_whole_image() {
        let data = image(5_000);
        let mut http = ScriptedHttp::new();
        http.on(Method::Get, URL, ScriptedResponse::bytes(200, &data));
        let mut flash = RecordingFlash::new();

        assert_eq!(stream_to_flash(&mut http, &mut flash, &spec(None)), Ok(5_000));
        let commits = flash.commits();
        assert_eq!(commits.len(), 1);
        assert_eq!(commits[0].0, Partition::App);
        assert_eq!(commits[0].1, data);
        assert_eq!(flash.aborts(), 0);
    }

    #[test]
    fn non_200_and_empty_bodies_never_touch_flash() {
        let mut http = ScriptedHttp::new();
        let mut flash = RecordingFlash::new();

        http.on(Method::Get, URL, ScriptedResponse::bytes(404, b"missing"));
        assert_eq!(stream_to_flash(&mut http, &mut flash, &spec(None)), Err(OtaError::HttpStatus(404)));

        http.on(Method::Get, URL, ScriptedResponse::bytes(200, b""));
        assert_eq!(stream_to_flash(&mut http, &mut flash, &spec(None)), Err(OtaError::InvalidSize));

        http.on(Method::Get, URL, ScriptedResponse::bytes(200, b"abc").with_content_length(None));
        assert_eq!(stream_to_flash(&mut http, &mut flash, &spec(None)), Err(OtaError::InvalidSize));

        assert_eq!(flash.begins(), 0);
    }

    #[test]
    fn manifest_size_must_match_content_length() {
        let mut http = ScriptedHttp::new();
        http.on(Method::Get, URL, ScriptedResponse::bytes(200, &image(100)));
        let mut flash = RecordingFlash::new();
        let mut s = spec(None);
        s.expected_size = Some(99);
        assert_eq!(
            stream_to_flash(&mut http, &mut flash, &s),
            Err(OtaError::SizeMismatch { expected: 99, actual: 100 })
        );
        assert_eq!(flash.begins(), 0);
    }

    #[test]
    fn short_body_aborts() {
        let mut http = ScriptedHttp::new();
        http.on(Method::Get, URL, ScriptedResponse::bytes(200, &image(3_000)).with_content_length(Some(4_096)));
        let mut flash = RecordingFlash::new();
        assert_eq!(
            stream_to_flash(&mut http, &mut flash, &spec(None)),
            Err(OtaError::Incomplete { written: 3_000, expected: 4_096 })
        );
        assert_eq!(flash.aborts(), 1);
        assert!(flash.commits().is_empty());
    }

    #[test]
    fn overlong_body_aborts() {
        let mut http = ScriptedHttp::new();
        http.on(Method::Get, URL, ScriptedResponse::bytes(200, &image(3_000)).with_content_length(Some(1_000)));
        let mut flash = RecordingFlash::new();
        assert!(matches!(
            stream_to_flash(&mut http, &mut flash, &spec(None)),
            Err(OtaError::SizeMismatch { expected: 1_000, .. })
        ));
        assert_eq!(flash.aborts(), 1);
    }

    #[test]
    fn read_error_aborts() {
        let mut http = ScriptedHttp::new();
        http.on(Method::Get, URL, ScriptedResponse::bytes(200, &image(4_000)).failing_after(2_048, HttpError::Timeout));
        let mut flash = RecordingFlash::new();
        assert_eq!(
            stream_to_flash(&mut http, &mut flash, &spec(None)),
            Err(OtaError::Http(HttpError::Timeout))
        );
        assert_eq!(flash.aborts(), 1);
    }

    #[test]
    fn checksum_is_verified_before_commit() {
        let data = image(4_321);
        let good = hex_digest(&data).to_uppercase();
        let mut http = ScriptedHttp::new();
        http.on(Method::Get, URL, ScriptedResponse::bytes(200, &data));
        let mut flash = RecordingFlash::new();

        assert_eq!(stream_to_flash(&mut http, &mut flash, &spec(Some(&good))), Ok(4_321));

        let bad = hex_digest(b"something else");
        assert_eq!(
            stream_to_flash(&mut http, &mut flash, &spec(Some(&bad))),
            Err(OtaError::ChecksumMismatch)
        );
        assert_eq!(flash.commits().len(), 1);
        assert_eq!(flash.aborts(), 1);
    }

    #[test]
    fn begin_failure_is_reported() {
        let mut http = ScriptedHttp::new();
        http.on(Method::Get, URL, ScriptedResponse::bytes(200, &image(10)));
        let mut flash = RecordingFlash::new();
        flash.fail_begin(true);
        assert!(matches!(stream_to_flash(&mut http, &mut flash, &spec(None)), Err(OtaError::Flash(_))));
    }

    #[test]
    fn no_cache_headers_when_requested() {
        let mut http = ScriptedHttp::new();
        http.on(Method::Get, URL, ScriptedResponse::bytes(200, &image(10)));
        let mut flash = RecordingFlash::new();
        let mut s = spec(None);
        s.no_cache = true;
        stream_to_flash(&mut http, &mut flash, &s).unwrap();
        assert_eq!(http.requests()[0].header("Pragma"), Some("no-cache"));
    }
}
