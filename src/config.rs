use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Default API endpoint of the UK Swift Science Data Centre.
pub const DEFAULT_URL: &str = "https://www.swift.ac.uk/API/main.php";

/// Default HTTP timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

const RC_NAME: &str = ".swiftgrbrc";

#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// API endpoint every request is POSTed to.
    pub url: String,
    /// Whether to verify TLS certificates.
    pub verify: bool,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            verify: true,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

#[derive(Debug, Default, PartialEq)]
struct RcConfig {
    url: Option<String>,
    verify: Option<bool>,
    timeout: Option<Duration>,
}

/// Resolves the configuration, in order of precedence:
/// - explicit arguments
/// - environment variables `SWIFTGRB_URL` / `SWIFTGRB_VERIFY`
/// - config file from `SWIFTGRB_RC` or `.swiftgrbrc` (cwd, then home)
/// - built-in defaults
pub(crate) fn load_config(url: Option<String>, verify: Option<bool>) -> Result<ClientConfig> {
    let mut url = url.or_else(|| std::env::var("SWIFTGRB_URL").ok());
    let mut verify = verify.or_else(|| {
        std::env::var("SWIFTGRB_VERIFY")
            .ok()
            .map(|v| parse_flag(&v))
    });
    let mut timeout = None;

    for rc_path in rc_candidates() {
        if rc_path.exists() {
            let cfg = read_rc(&rc_path)?;
            url = url.or(cfg.url);
            verify = verify.or(cfg.verify);
            timeout = cfg.timeout;
            break;
        }
    }

    let url = url.unwrap_or_else(|| DEFAULT_URL.to_string());
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(Error::Config(format!(
            "url must be an http(s) URL, got {url:?}"
        )));
    }

    Ok(ClientConfig {
        url,
        verify: verify.unwrap_or(true),
        timeout: timeout.unwrap_or(DEFAULT_TIMEOUT),
    })
}

fn read_rc(path: &Path) -> Result<RcConfig> {
    let text = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    parse_rc(&text).map_err(|msg| {
        Error::Config(format!(
            "failed to read configuration file {}: {msg}",
            path.display()
        ))
    })
}

fn parse_rc(text: &str) -> std::result::Result<RcConfig, String> {
    let mut cfg = RcConfig::default();

    for raw in text.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once(':') else {
            return Err(format!("expected `key: value`, got {line:?}"));
        };
        let v = strip_quotes(v.trim());
        match k.trim() {
            "url" => cfg.url = Some(v.to_string()),
            "verify" => cfg.verify = Some(parse_flag(v)),
            "timeout" => {
                let secs: u64 = v
                    .parse()
                    .map_err(|_| format!("timeout must be whole seconds, got {v:?}"))?;
                cfg.timeout = Some(Duration::from_secs(secs));
            }
            other => return Err(format!("unknown key {other:?}")),
        }
    }

    Ok(cfg)
}

fn parse_flag(v: &str) -> bool {
    !matches!(v.trim().to_ascii_lowercase().as_str(), "0" | "false" | "no")
}

fn strip_quotes(s: &str) -> &str {
    let s = s.trim();
    if (s.starts_with('"') && s.ends_with('"') && s.len() >= 2)
        || (s.starts_with('\'') && s.ends_with('\'') && s.len() >= 2)
    {
        &s[1..s.len() - 1]
    } else {
        s
    }
}

fn rc_candidates() -> Vec<PathBuf> {
    if let Ok(p) = std::env::var("SWIFTGRB_RC") {
        return vec![PathBuf::from(p)];
    }

    let mut v = Vec::new();
    if let Ok(cwd) = std::env::current_dir() {
        v.push(cwd.join(RC_NAME));
    }
    if let Some(home) = dirs::home_dir() {
        v.push(home.join(RC_NAME));
    }
    v
}
