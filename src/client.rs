use std::time::Duration;

use serde_json::{Map, Value};

use crate::config::{ClientConfig, load_config};
use crate::error::Result;
use crate::ident::GrbId;
use crate::reply::check_envelope;
use crate::transport::{HttpTransport, Transport};

/// Version of the API contract this client speaks.
pub const API_VERSION: &str = "1.0";

/// Client for the GRB products API.
///
/// Every operation is a single blocking POST to one endpoint; multi-object
/// requests are issued strictly one object after another.
#[derive(Debug, Clone)]
pub struct Client<T = HttpTransport> {
    url: String,
    transport: T,
}

impl Client<HttpTransport> {
    /// Creates a client using environment variables and/or `.swiftgrbrc`.
    ///
    /// This is equivalent to `Client::new(None, None)`.
    pub fn from_env() -> Result<Self> {
        Self::new(None, None)
    }

    /// Creates a client using (in order of precedence):
    /// - explicit `url`/`verify` arguments
    /// - environment variables `SWIFTGRB_URL` / `SWIFTGRB_VERIFY`
    /// - config file from `SWIFTGRB_RC` or `.swiftgrbrc`
    /// - the public UKSSDC endpoint
    pub fn new(url: Option<String>, verify: Option<bool>) -> Result<Self> {
        let cfg = load_config(url, verify)?;
        Self::with_config(cfg)
    }

    pub fn with_config(cfg: ClientConfig) -> Result<Self> {
        let transport = HttpTransport::new(&cfg)?;
        Ok(Self {
            url: cfg.url,
            transport,
        })
    }

    /// Maximum attempts per HTTP request on connection failures and
    /// retriable status codes. Defaults to 1 (no retries).
    pub fn with_retry_max(mut self, retry_max: usize) -> Self {
        self.transport = self.transport.with_retry_max(retry_max);
        self
    }

    pub fn with_sleep_max(mut self, sleep_max: Duration) -> Self {
        self.transport = self.transport.with_sleep_max(sleep_max);
        self
    }
}

impl<T: Transport> Client<T> {
    /// Creates a client over a custom transport.
    pub fn with_transport(url: impl Into<String>, transport: T) -> Self {
        Self {
            url: url.into(),
            transport,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub(crate) fn request_body(api: &str, params: Map<String, Value>) -> Value {
        let mut body = Map::new();
        body.insert("api_name".into(), Value::from(api));
        body.insert("api_version".into(), Value::from(API_VERSION));
        body.extend(params);
        Value::Object(body)
    }

    /// POSTs one API call and returns the reply without envelope checks.
    pub(crate) fn call_raw(&self, api: &str, params: Map<String, Value>) -> Result<Value> {
        log::debug!("POST {} api_name={api}", self.url);
        self.transport
            .post_json(&self.url, &Self::request_body(api, params))
    }

    /// POSTs one API call; `subject` names the object or job in errors.
    pub(crate) fn call(
        &self,
        api: &str,
        subject: &str,
        params: Map<String, Value>,
    ) -> Result<Map<String, Value>> {
        let reply = self.call_raw(api, params)?;
        check_envelope(api, subject, reply)
    }

    /// POSTs a per-object API call.
    pub(crate) fn call_for(
        &self,
        api: &str,
        id: &GrbId,
        mut params: Map<String, Value>,
    ) -> Result<Map<String, Value>> {
        id.add_to(&mut params);
        self.call(api, &id.to_string(), params)
    }

    pub(crate) fn download(
        &self,
        url: &str,
        target: &std::path::Path,
        progress: bool,
    ) -> Result<u64> {
        self.transport.download(url, target, progress)
    }
}
