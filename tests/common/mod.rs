#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::io::Write;
use std::path::Path;

use flate2::Compression;
use flate2::write::GzEncoder;
use serde_json::{Value, json};
use swift_grb::{Client, DEFAULT_URL, Error, Result, Transport};

/// In-memory transport: replies are served in order, every call is recorded.
#[derive(Default)]
pub struct MockTransport {
    replies: RefCell<VecDeque<Value>>,
    pub calls: RefCell<Vec<Value>>,
    pub downloads: RefCell<Vec<String>>,
    files: HashMap<String, Vec<u8>>,
}

impl MockTransport {
    pub fn new(replies: impl IntoIterator<Item = Value>) -> Self {
        Self {
            replies: RefCell::new(replies.into_iter().collect()),
            ..Default::default()
        }
    }

    pub fn with_file(mut self, url: &str, bytes: Vec<u8>) -> Self {
        self.files.insert(url.to_string(), bytes);
        self
    }

    pub fn api_names(&self) -> Vec<String> {
        self.calls
            .borrow()
            .iter()
            .map(|c| c["api_name"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    pub fn call_count(&self) -> usize {
        self.calls.borrow().len() + self.downloads.borrow().len()
    }
}

impl Transport for MockTransport {
    fn post_json(&self, url: &str, body: &Value) -> Result<Value> {
        assert_eq!(url, DEFAULT_URL);
        self.calls.borrow_mut().push(body.clone());
        self.replies.borrow_mut().pop_front().ok_or_else(|| Error::Http {
            status: 500,
            url: url.to_string(),
            message: "no reply queued".into(),
        })
    }

    fn download(&self, url: &str, target: &Path, _progress: bool) -> Result<u64> {
        self.downloads.borrow_mut().push(url.to_string());
        let bytes = self
            .files
            .get(url)
            .cloned()
            .unwrap_or_else(|| format!("contents of {url}").into_bytes());
        std::fs::write(target, &bytes).map_err(|e| Error::Io {
            path: target.to_path_buf(),
            source: e,
        })?;
        Ok(bytes.len() as u64)
    }
}

pub fn client(transport: MockTransport) -> Client<MockTransport> {
    Client::with_transport(DEFAULT_URL, transport)
}

pub fn tar_gz(files: &[(&str, &str)]) -> Vec<u8> {
    let enc = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(enc);
    for (name, contents) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, name, contents.as_bytes())
            .unwrap();
    }
    let mut enc = builder.into_inner().unwrap();
    enc.flush().unwrap();
    enc.finish().unwrap()
}

pub fn light_curve_reply(rate: f64) -> Value {
    let columns = json!(["Time", "TimePos", "TimeNeg", "Rate", "RatePos", "RateNeg"]);
    json!({
        "OK": 1,
        "Datasets": ["WT", "PC"],
        "Binning": "Counts",
        "TimeFormat": "MET",
        "T0": 175892888.0,
        "WT": {"columns": columns, "data": [[100.0, 5.0, -5.0, rate, 4.0, -4.0]]},
        "PC": {"columns": columns, "data": [
            [5000.0, 200.0, -200.0, rate / 10.0, 0.1, -0.1],
            [9000.0, 300.0, -300.0, null, 0.1, -0.1]
        ]}
    })
}

pub fn positions_reply() -> Value {
    json!({
        "OK": 1,
        "Enhanced_RA": 95.3784, "Enhanced_Decl": -62.3702, "Enhanced_Err90": 1.4,
        "Standard_RA": 95.3781, "Standard_Decl": -62.3700, "Standard_Err90": 3.5,
        "SPER_RA": null, "SPER_Decl": null, "SPER_Err90": null,
        "Onboard_RA": 95.38, "Onboard_Decl": -62.37, "Onboard_Err90": 4.6
    })
}

pub fn not_found(name: &str) -> Value {
    json!({"OK": 0, "NOTFOUND": 1, "ERROR": format!("Cannot resolve {name}")})
}

/// Every regular file under `dir`, relative and sorted.
pub fn files_under(dir: &Path) -> Vec<String> {
    fn walk(base: &Path, dir: &Path, out: &mut Vec<String>) {
        for entry in std::fs::read_dir(dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                walk(base, &path, out);
            } else {
                let rel = path.strip_prefix(base).unwrap();
                out.push(rel.to_string_lossy().replace('\\', "/"));
            }
        }
    }
    let mut out = Vec::new();
    walk(dir, dir, &mut out);
    out.sort();
    out
}
