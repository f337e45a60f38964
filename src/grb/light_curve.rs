use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{GRB_BIN_METHOD, GRB_TIME_FORMAT, filtered_index};
use crate::client::Client;
use crate::error::{Error, Result};
use crate::ident::{Fetched, GrbId, Objects, Selection};
use crate::jobs::{JobHandle, JobKind, JobStatus, handle_from_reply};
use crate::options::{LightCurveOptions, SaveFormat};
use crate::reply::Fields;
use crate::save::{Layout, qdp_view, render_table};
use crate::table::Table;
use crate::transport::Transport;

/// Light curves of one object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LightCurve {
    /// Names of the tables in `tables`, in server order.
    #[serde(rename = "Datasets")]
    pub datasets: Vec<String>,
    #[serde(rename = "Binning")]
    pub binning: String,
    #[serde(rename = "TimeFormat")]
    pub time_format: String,
    #[serde(rename = "T0")]
    pub t0: f64,
    pub tables: BTreeMap<String, Table>,
}

impl LightCurve {
    pub(crate) fn from_reply(f: Fields<'_>, filter: Option<&[String]>) -> Result<Self> {
        f.require(&["Datasets", "Binning", "TimeFormat", "T0"])?;
        let datasets = filtered_index(f.str_list("Datasets")?, filter);
        f.require(&datasets)?;

        let mut tables = BTreeMap::new();
        for name in &datasets {
            tables.insert(name.clone(), f.table(name)?);
        }

        Ok(Self {
            datasets,
            binning: f.str("Binning")?.to_string(),
            time_format: f.str("TimeFormat")?.to_string(),
            t0: f.f64("T0")?,
            tables,
        })
    }

    pub fn get(&self, dataset: &str) -> Option<&Table> {
        self.tables.get(dataset)
    }

    /// Tables in index order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Table)> {
        self.datasets
            .iter()
            .filter_map(|name| self.tables.get(name).map(|t| (name.as_str(), t)))
    }
}

fn write_light_curve(
    lc: &LightCurve,
    layout: &Layout,
    format: &SaveFormat,
    filter: Option<&[String]>,
) -> Result<Vec<PathBuf>> {
    let mut written = Vec::new();
    for (name, table) in lc.iter() {
        if !crate::options::keep(filter, name) {
            continue;
        }
        let text = if format.as_qdp {
            render_table(&table.project(&qdp_view(table)), format)
        } else {
            render_table(table, format)
        };
        let file = format!("{}.{}", crate::util::path_component(name), format.extension());
        written.push(layout.write(&file, &text)?);
    }
    Ok(written)
}

/// Writes light curves held in memory, exactly as `get_light_curves` with
/// `saveData` would have written them.
pub fn save_light_curves(
    data: &Fetched<LightCurve>,
    opts: &LightCurveOptions,
) -> Result<Vec<PathBuf>> {
    opts.format.validate()?;
    let mut written = Vec::new();
    for (key, lc) in data.entries() {
        let layout = Layout::new(&opts.output, key);
        written.extend(write_light_curve(
            lc,
            &layout,
            &opts.format,
            opts.datasets.as_deref(),
        )?);
    }
    Ok(written)
}

/// Rebinning method of a light-curve rebin job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "binMeth", rename_all = "lowercase", deny_unknown_fields)]
pub enum BinMethod {
    /// Bins of a fixed number of counts per mode.
    Counts {
        #[serde(rename = "pcCounts")]
        pc_counts: u32,
        #[serde(rename = "wtCounts")]
        wt_counts: u32,
        /// Let the server grow the counts per bin as the source fades.
        dynamic: bool,
    },
    /// Fixed-duration bins, in seconds.
    Time {
        #[serde(rename = "binTime")]
        bin_time: f64,
    },
    /// One bin per spacecraft snapshot.
    Snapshot,
    /// One bin per observation.
    Obsid,
}

impl Default for BinMethod {
    fn default() -> Self {
        BinMethod::Counts {
            pc_counts: 20,
            wt_counts: 30,
            dynamic: true,
        }
    }
}

impl BinMethod {
    fn name(&self) -> &'static str {
        match self {
            BinMethod::Counts { .. } => GRB_BIN_METHOD,
            BinMethod::Time { .. } => "time",
            BinMethod::Snapshot => "snapshot",
            BinMethod::Obsid => "obsid",
        }
    }
}

/// Parameters of a light-curve rebin job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "camelCase")]
pub struct RebinRequest {
    pub bin_method: BinMethod,
    /// Energy band in keV; defaults to the full 0.3-10 keV band.
    pub min_energy: Option<f64>,
    pub max_energy: Option<f64>,
    /// Time range in seconds relative to T0.
    pub min_time: Option<f64>,
    pub max_time: Option<f64>,
}

impl RebinRequest {
    pub fn validate(&self) -> Result<()> {
        match &self.bin_method {
            BinMethod::Counts {
                pc_counts,
                wt_counts,
                ..
            } if *pc_counts == 0 || *wt_counts == 0 => {
                return Err(Error::InvalidRequest(
                    "pcCounts and wtCounts must be positive".into(),
                ));
            }
            BinMethod::Time { bin_time } if !(bin_time.is_finite() && *bin_time > 0.0) => {
                return Err(Error::InvalidRequest("binTime must be positive".into()));
            }
            _ => {}
        }

        let lo = self.min_energy.unwrap_or(0.3);
        let hi = self.max_energy.unwrap_or(10.0);
        if !(0.3..=10.0).contains(&lo) || !(0.3..=10.0).contains(&hi) || lo >= hi {
            return Err(Error::InvalidRequest(format!(
                "energy band {lo}-{hi} keV must lie within 0.3-10 keV with min < max"
            )));
        }

        if let (Some(lo), Some(hi)) = (self.min_time, self.max_time) {
            if lo >= hi {
                return Err(Error::InvalidRequest(format!(
                    "minTime ({lo}) must be below maxTime ({hi})"
                )));
            }
        }
        Ok(())
    }

    fn to_params(&self) -> Map<String, Value> {
        let mut p = Map::new();
        p.insert("binMeth".into(), Value::from(self.bin_method.name()));
        p.insert("timeFormat".into(), Value::from(GRB_TIME_FORMAT));
        match &self.bin_method {
            BinMethod::Counts {
                pc_counts,
                wt_counts,
                dynamic,
            } => {
                p.insert("pcCounts".into(), Value::from(*pc_counts));
                p.insert("wtCounts".into(), Value::from(*wt_counts));
                p.insert("dynamic".into(), Value::from(*dynamic));
            }
            BinMethod::Time { bin_time } => {
                p.insert("binTime".into(), Value::from(*bin_time));
            }
            BinMethod::Snapshot | BinMethod::Obsid => {}
        }
        for (key, value) in [
            ("minEnergy", self.min_energy),
            ("maxEnergy", self.max_energy),
            ("minTime", self.min_time),
            ("maxTime", self.max_time),
        ] {
            if let Some(v) = value {
                p.insert(key.into(), Value::from(v));
            }
        }
        p
    }
}

impl<T: Transport> Client<T> {
    fn light_curve_for(&self, id: &GrbId, opts: &LightCurveOptions) -> Result<LightCurve> {
        let mut params = Map::new();
        params.insert("binMeth".into(), Value::from(GRB_BIN_METHOD));
        params.insert("timeFormat".into(), Value::from(GRB_TIME_FORMAT));
        params.insert("incbad".into(), Value::from(opts.incbad.as_str()));
        params.insert("nosys".into(), Value::from(opts.nosys.as_str()));

        let reply = self.call_for("getLightCurve", id, params)?;
        let context = format!("light curve of {id}");
        LightCurve::from_reply(Fields::new(&reply, &context), opts.datasets.as_deref())
    }

    /// Fetches the standard light curves of one or more GRBs.
    ///
    /// Returns `None` unless `returnData` is set.
    pub fn get_light_curves(
        &self,
        objects: &Objects,
        opts: &LightCurveOptions,
    ) -> Result<Option<Fetched<LightCurve>>> {
        opts.validate()?;
        let selection = objects.resolve()?;

        let fetched = selection.fan_out(opts.output.skip_errors, |id, key| {
            opts.output.note(format_args!("getting light curve of {id}"));
            let lc = self.light_curve_for(id, opts)?;
            if opts.output.save_data {
                let layout = Layout::new(&opts.output, key);
                write_light_curve(&lc, &layout, &opts.format, opts.datasets.as_deref())?;
            }
            Ok(lc)
        })?;

        Ok(opts.output.return_data.then_some(fetched))
    }

    /// Submits a rebin job for a single GRB.
    pub fn rebin_light_curve(&self, object: &Objects, request: &RebinRequest) -> Result<JobHandle> {
        let id = single(object.resolve()?, "rebinLightCurve")?;
        request.validate()?;

        let reply = self.call_for("rebinLightCurve", &id, request.to_params())?;
        let handle = handle_from_reply(JobKind::Rebin, &reply, &format!("rebin of {id}"))?;
        log::info!("submitted {handle} for {id}");
        Ok(handle)
    }

    pub fn check_rebin_status(&self, job: &JobHandle) -> Result<JobStatus> {
        job.expect_kind(JobKind::Rebin)?;
        self.job_status(job)
    }

    pub fn rebin_complete(&self, job: &JobHandle) -> Result<bool> {
        job.expect_kind(JobKind::Rebin)?;
        self.job_complete(job)
    }

    pub fn cancel_rebin(&self, job: &JobHandle) -> Result<bool> {
        job.expect_kind(JobKind::Rebin)?;
        self.cancel_job(job)
    }

    /// Fetches the result of a completed rebin job. Files are written
    /// directly under `destDir`.
    pub fn get_rebinned_light_curve(
        &self,
        job: &JobHandle,
        opts: &LightCurveOptions,
    ) -> Result<Option<LightCurve>> {
        job.expect_kind(JobKind::Rebin)?;
        opts.validate()?;

        let reply = self.job_result(job, "getRebinnedLightCurve")?;
        let context = job.to_string();
        let lc = LightCurve::from_reply(Fields::new(&reply, &context), opts.datasets.as_deref())?;
        if opts.output.save_data {
            let layout = Layout::new(&opts.output, None);
            write_light_curve(&lc, &layout, &opts.format, opts.datasets.as_deref())?;
        }
        Ok(opts.output.return_data.then_some(lc))
    }
}

/// Unwraps a scalar selection for operations that take exactly one object.
pub(crate) fn single(selection: Selection, api: &str) -> Result<GrbId> {
    match selection {
        Selection::Single(id) => Ok(id),
        Selection::Many(_) => Err(Error::InvalidRequest(format!(
            "{api} takes a single GRBName or targetID, not a collection"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn reply() -> Map<String, Value> {
        json!({
            "OK": 1,
            "Datasets": ["WT", "PC", "PC_incbad"],
            "Binning": "Counts",
            "TimeFormat": "MET",
            "T0": 175892888.0,
            "WT": {"columns": ["Time", "TimePos", "TimeNeg", "Rate", "RatePos", "RateNeg"],
                   "data": [[100.0, 5.0, -5.0, 40.0, 4.0, -4.0]]},
            "PC": {"columns": ["Time", "TimePos", "TimeNeg", "Rate", "RatePos", "RateNeg"],
                   "data": [[5000.0, 200.0, -200.0, 1.0, 0.1, -0.1]]},
            "PC_incbad": {"columns": ["Time", "TimePos", "TimeNeg", "Rate", "RatePos", "RateNeg"],
                   "data": [[5000.0, 200.0, -200.0, 1.1, 0.1, -0.1]]}
        })
        .as_object()
        .cloned()
        .unwrap()
    }

    #[test]
    fn parses_index_and_tables() {
        let r = reply();
        let lc = LightCurve::from_reply(Fields::new(&r, "lc"), None).unwrap();
        assert_eq!(lc.datasets, ["WT", "PC", "PC_incbad"]);
        assert_eq!(lc.time_format, "MET");
        let names: Vec<&str> = lc.iter().map(|(n, _)| n).collect();
        assert_eq!(names, ["WT", "PC", "PC_incbad"]);
        assert_eq!(lc.get("PC").unwrap().value(0, "Rate"), Some(1.0));
    }

    #[test]
    fn dataset_filter_is_applied_before_key_checks() {
        let mut r = reply();
        r.remove("PC");
        let filter = vec!["WT".to_string()];
        let lc = LightCurve::from_reply(Fields::new(&r, "lc"), Some(filter.as_slice())).unwrap();
        assert_eq!(lc.datasets, ["WT"]);

        let err = LightCurve::from_reply(Fields::new(&r, "lc of GRB 1"), None).unwrap_err();
        match err {
            Error::MissingKeys { context, keys } => {
                assert_eq!(context, "lc of GRB 1");
                assert_eq!(keys, ["PC"]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn rebin_validation() {
        assert!(RebinRequest::default().validate().is_ok());
        let zero = RebinRequest {
            bin_method: BinMethod::Counts {
                pc_counts: 0,
                wt_counts: 30,
                dynamic: false,
            },
            ..Default::default()
        };
        assert!(zero.validate().is_err());
        let band = RebinRequest {
            min_energy: Some(2.0),
            max_energy: Some(1.0),
            ..Default::default()
        };
        assert!(band.validate().is_err());
        let time = RebinRequest {
            bin_method: BinMethod::Time { bin_time: -1.0 },
            ..Default::default()
        };
        assert!(time.validate().is_err());
    }

    #[test]
    fn rebin_params_use_grb_time_format() {
        let req = RebinRequest {
            bin_method: BinMethod::Time { bin_time: 100.0 },
            min_time: Some(0.0),
            ..Default::default()
        };
        let p = req.to_params();
        assert_eq!(p["binMeth"], "time");
        assert_eq!(p["timeFormat"], GRB_TIME_FORMAT);
        assert_eq!(p["binTime"], 100.0);
        assert_eq!(p["minTime"], 0.0);
        assert!(!p.contains_key("maxTime"));
    }

    #[test]
    fn rebin_request_from_json() {
        let text = r#"{
            "binMethod": {"binMeth": "counts", "pcCounts": 10, "wtCounts": 20, "dynamic": false},
            "maxEnergy": 2.0
        }"#;
        let req: RebinRequest = serde_json::from_str(text).unwrap();
        assert_eq!(
            req.bin_method,
            BinMethod::Counts {
                pc_counts: 10,
                wt_counts: 20,
                dynamic: false
            }
        );
        assert_eq!(req.max_energy, Some(2.0));

        let snap: RebinRequest =
            serde_json::from_str(r#"{"binMethod": {"binMeth": "snapshot"}}"#).unwrap();
        assert_eq!(snap.bin_method, BinMethod::Snapshot);
        assert!(serde_json::from_str::<RebinRequest>(r#"{"binMeth": "snapshot"}"#).is_err());
    }
}
