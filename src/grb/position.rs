use std::fmt::Write as _;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Map;

use crate::client::Client;
use crate::error::Result;
use crate::ident::{Fetched, GrbId, Objects};
use crate::options::{PositionOptions, SaveFormat};
use crate::reply::Fields;
use crate::save::Layout;
use crate::transport::Transport;

/// Position estimates in the order the server reports them.
pub const POSITION_KINDS: [&str; 4] = ["Enhanced", "Standard", "SPER", "Onboard"];

const POSITION_FILE: &str = "positions.dat";

/// One position estimate. An estimate that does not exist for the object
/// has every field `None`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PositionEstimate {
    #[serde(rename = "RA")]
    pub ra: Option<f64>,
    #[serde(rename = "Decl")]
    pub decl: Option<f64>,
    /// 90% confidence radius, arcsec.
    #[serde(rename = "Err90")]
    pub err90: Option<f64>,
}

impl PositionEstimate {
    pub fn is_available(&self) -> bool {
        self.ra.is_some() && self.decl.is_some()
    }

    fn from_reply(f: &Fields<'_>, kind: &str) -> Result<Self> {
        Ok(Self {
            ra: f.opt_f64(&format!("{kind}_RA"))?,
            decl: f.opt_f64(&format!("{kind}_Decl"))?,
            err90: f.opt_f64(&format!("{kind}_Err90"))?,
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Positions {
    #[serde(rename = "Enhanced")]
    pub enhanced: PositionEstimate,
    #[serde(rename = "Standard")]
    pub standard: PositionEstimate,
    #[serde(rename = "SPER")]
    pub sper: PositionEstimate,
    #[serde(rename = "Onboard")]
    pub onboard: PositionEstimate,
}

impl Positions {
    /// Every estimate key must be present; an unavailable estimate is sent
    /// as nulls.
    pub(crate) fn from_reply(f: Fields<'_>) -> Result<Self> {
        let keys: Vec<String> = POSITION_KINDS
            .iter()
            .flat_map(|kind| ["RA", "Decl", "Err90"].map(|field| format!("{kind}_{field}")))
            .collect();
        f.require(&keys)?;
        Ok(Self {
            enhanced: PositionEstimate::from_reply(&f, "Enhanced")?,
            standard: PositionEstimate::from_reply(&f, "Standard")?,
            sper: PositionEstimate::from_reply(&f, "SPER")?,
            onboard: PositionEstimate::from_reply(&f, "Onboard")?,
        })
    }

    pub fn get(&self, kind: &str) -> Option<&PositionEstimate> {
        match kind {
            "Enhanced" => Some(&self.enhanced),
            "Standard" => Some(&self.standard),
            "SPER" => Some(&self.sper),
            "Onboard" => Some(&self.onboard),
            _ => None,
        }
    }

    /// All four estimates, available or not, in [`POSITION_KINDS`] order.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &PositionEstimate)> {
        [&self.enhanced, &self.standard, &self.sper, &self.onboard]
            .into_iter()
            .enumerate()
            .map(|(i, p)| (POSITION_KINDS[i], p))
    }

    /// The most precise estimate available.
    pub fn best(&self) -> Option<(&'static str, &PositionEstimate)> {
        self.iter().find(|(_, p)| p.is_available())
    }
}

fn render_positions(p: &Positions, format: &SaveFormat) -> String {
    let sep = &format.sep;
    let mut out = String::new();
    if format.header {
        let _ = writeln!(out, "Estimate{sep}RA{sep}Decl{sep}Err90");
    }
    for (kind, est) in p.iter() {
        out.push_str(kind);
        for v in [est.ra, est.decl, est.err90] {
            out.push_str(sep);
            match v {
                Some(x) => {
                    let _ = write!(out, "{x}");
                }
                None => out.push_str("NaN"),
            }
        }
        out.push('\n');
    }
    out
}

/// Writes positions held in memory to `positions.dat`, exactly as
/// `get_positions` with `saveData` would have.
pub fn save_positions(data: &Fetched<Positions>, opts: &PositionOptions) -> Result<Vec<PathBuf>> {
    opts.format.validate()?;
    let mut written = Vec::new();
    for (key, p) in data.entries() {
        let layout = Layout::new(&opts.output, key);
        written.push(layout.write(POSITION_FILE, &render_positions(p, &opts.format))?);
    }
    Ok(written)
}

impl<T: Transport> Client<T> {
    fn positions_for(&self, id: &GrbId) -> Result<Positions> {
        let reply = self.call_for("getPositions", id, Map::new())?;
        let context = format!("positions of {id}");
        Positions::from_reply(Fields::new(&reply, &context))
    }

    /// Fetches the position estimates of one or more GRBs.
    pub fn get_positions(
        &self,
        objects: &Objects,
        opts: &PositionOptions,
    ) -> Result<Option<Fetched<Positions>>> {
        opts.validate()?;
        let selection = objects.resolve()?;

        let fetched = selection.fan_out(opts.output.skip_errors, |id, key| {
            opts.output.note(format_args!("getting positions of {id}"));
            let p = self.positions_for(id)?;
            if opts.output.save_data {
                Layout::new(&opts.output, key)
                    .write(POSITION_FILE, &render_positions(&p, &opts.format))?;
            }
            Ok(p)
        })?;

        Ok(opts.output.return_data.then_some(fetched))
    }
}
