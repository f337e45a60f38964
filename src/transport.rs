use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use reqwest::blocking::{Client as HttpClient, Response};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde_json::Value;

use crate::config::ClientConfig;
use crate::error::{Error, Result, format_http_error};
use crate::util::retriable_status;

/// The network seam of the client.
///
/// All API traffic goes through [`Transport::post_json`]; archive, image and
/// observation files go through [`Transport::download`]. The production
/// implementation is [`HttpTransport`]; tests substitute an in-memory fake.
pub trait Transport {
    /// POSTs `body` as JSON to `url` and returns the decoded JSON reply.
    fn post_json(&self, url: &str, body: &Value) -> Result<Value>;

    /// Downloads `url` into `target` and returns the number of bytes written.
    fn download(&self, url: &str, target: &Path, progress: bool) -> Result<u64>;
}

#[derive(Debug, Clone)]
pub struct HttpTransport {
    http: HttpClient,
    retry_max: usize,
    sleep_max: Duration,
}

impl HttpTransport {
    pub fn new(cfg: &ClientConfig) -> Result<Self> {
        let mut default_headers = HeaderMap::new();
        default_headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("swift-grb/{}", env!("CARGO_PKG_VERSION")))
                .unwrap_or(HeaderValue::from_static("swift-grb")),
        );

        let mut builder = HttpClient::builder()
            .default_headers(default_headers)
            .timeout(cfg.timeout);

        if !cfg.verify {
            builder = builder.danger_accept_invalid_certs(true);
        }

        let http = builder.build().map_err(|source| Error::Transport {
            url: cfg.url.clone(),
            source,
        })?;

        Ok(Self {
            http,
            retry_max: 1,
            sleep_max: Duration::from_secs(10),
        })
    }

    /// Maximum number of attempts per request. The default of 1 disables
    /// retrying entirely.
    pub fn with_retry_max(mut self, retry_max: usize) -> Self {
        self.retry_max = retry_max.max(1);
        self
    }

    /// Pause between retried attempts.
    pub fn with_sleep_max(mut self, sleep_max: Duration) -> Self {
        self.sleep_max = sleep_max;
        self
    }

    fn robust_request<F>(&self, url: &str, mut f: F) -> Result<Response>
    where
        F: FnMut() -> std::result::Result<Response, reqwest::Error>,
    {
        let mut tries = 0usize;
        loop {
            tries += 1;
            match f() {
                Ok(resp) => {
                    if retriable_status(resp.status().as_u16()) && tries < self.retry_max {
                        log::warn!(
                            "HTTP {} from {}; retrying ({}/{})",
                            resp.status(),
                            url,
                            tries,
                            self.retry_max
                        );
                        thread::sleep(self.sleep_max);
                        continue;
                    }
                    return Ok(resp);
                }
                Err(source) => {
                    if tries >= self.retry_max {
                        return Err(Error::Transport {
                            url: url.to_string(),
                            source,
                        });
                    }
                    log::warn!("could not connect to {url}: {source}; retrying");
                    thread::sleep(self.sleep_max);
                }
            }
        }
    }
}

impl Transport for HttpTransport {
    fn post_json(&self, url: &str, body: &Value) -> Result<Value> {
        let resp = self.robust_request(url, || self.http.post(url).json(body).send())?;

        let status = resp.status();
        let text = resp.text().map_err(|source| Error::Transport {
            url: url.to_string(),
            source,
        })?;
        if !status.is_success() {
            return Err(format_http_error(status, url, &text));
        }

        serde_json::from_str(&text).map_err(|e| {
            Error::malformed(
                format!("reply from {url} (HTTP {status})"),
                format!("invalid JSON: {e}"),
            )
        })
    }

    fn download(&self, url: &str, target: &Path, progress: bool) -> Result<u64> {
        if let Some(parent) = target.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
            }
        }

        let mut resp = self.robust_request(url, || self.http.get(url).send())?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().unwrap_or_default();
            return Err(format_http_error(status, url, &text));
        }

        let pb = if progress {
            let pb = match resp.content_length() {
                Some(len) => ProgressBar::new(len),
                None => ProgressBar::new_spinner(),
            };
            if let Ok(style) = ProgressStyle::with_template(
                "{spinner:.green} {bytes}/{total_bytes} ({bytes_per_sec}) {wide_bar} {eta}",
            ) {
                pb.set_style(style.progress_chars("=>-"));
            }
            Some(pb)
        } else {
            None
        };

        // Stream into a sibling file so an interrupted download never
        // leaves a truncated file under the final name.
        let partial = partial_path(target);
        let mut out = File::create(&partial).map_err(|e| Error::io(&partial, e))?;

        let mut written: u64 = 0;
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = match resp.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    drop(out);
                    let _ = std::fs::remove_file(&partial);
                    return Err(Error::io(target, e));
                }
            };
            out.write_all(&buf[..n]).map_err(|e| Error::io(&partial, e))?;
            written += n as u64;
            if let Some(pb) = &pb {
                pb.inc(n as u64);
            }
        }
        out.flush().map_err(|e| Error::io(&partial, e))?;
        drop(out);

        std::fs::rename(&partial, target).map_err(|e| Error::io(target, e))?;
        if let Some(pb) = &pb {
            pb.finish_and_clear();
        }
        Ok(written)
    }
}

fn partial_path(target: &Path) -> PathBuf {
    let mut name = target.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    target.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_path_is_a_sibling() {
        assert_eq!(
            partial_path(Path::new("out/GRB 060729/interval0.tar.gz")),
            PathBuf::from("out/GRB 060729/interval0.tar.gz.part")
        );
    }

    #[test]
    fn retry_max_never_drops_below_one() {
        let t = HttpTransport::new(&ClientConfig::default())
            .unwrap()
            .with_retry_max(0);
        assert_eq!(t.retry_max, 1);
    }
}
