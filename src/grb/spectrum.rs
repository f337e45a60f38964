use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::filtered_index;
use super::light_curve::single;
use crate::archive::fetch_archive;
use crate::client::Client;
use crate::error::{Error, Result};
use crate::ident::{Fetched, GrbId, Objects};
use crate::jobs::{JobHandle, JobKind, JobStatus, handle_from_reply};
use crate::options::SpectrumOptions;
use crate::reply::Fields;
use crate::save::Layout;
use crate::transport::Transport;
use crate::util::path_component;

/// A fitted value with its asymmetric 90% bounds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub value: f64,
    pub pos: f64,
    pub neg: f64,
}

impl Measurement {
    fn read(f: &Fields<'_>, name: &str) -> Result<Self> {
        Ok(Self {
            value: f.f64(name)?,
            pos: f.f64(&format!("{name}Pos"))?,
            neg: f.f64(&format!("{name}Neg"))?,
        })
    }
}

/// Result of fitting one spectral model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitResult {
    /// Intrinsic absorbing column, cm^-2.
    pub nh: Measurement,
    /// Photon index.
    pub gamma: Measurement,
    /// Observed 0.3-10 keV flux, erg cm^-2 s^-1.
    pub obs_flux: Measurement,
    /// Unabsorbed 0.3-10 keV flux, erg cm^-2 s^-1.
    pub unabs_flux: Measurement,
    pub cstat: f64,
    pub dof: i64,
    pub fit_chi: Option<f64>,
    /// URL of the plot of the fit.
    pub image: Option<String>,
}

const FIT_KEYS: [&str; 14] = [
    "NH",
    "NHPos",
    "NHNeg",
    "Gamma",
    "GammaPos",
    "GammaNeg",
    "ObsFlux",
    "ObsFluxPos",
    "ObsFluxNeg",
    "UnabsFlux",
    "UnabsFluxPos",
    "UnabsFluxNeg",
    "Cstat",
    "Dof",
];

impl FitResult {
    fn from_reply(f: Fields<'_>) -> Result<Self> {
        f.require(&FIT_KEYS)?;
        Ok(Self {
            nh: Measurement::read(&f, "NH")?,
            gamma: Measurement::read(&f, "Gamma")?,
            obs_flux: Measurement::read(&f, "ObsFlux")?,
            unabs_flux: Measurement::read(&f, "UnabsFlux")?,
            cstat: f.f64("Cstat")?,
            dof: f.i64("Dof")?,
            fit_chi: f.opt_f64("FitChi")?,
            image: f.opt_str("Image")?.map(str::to_string),
        })
    }
}

/// Fits of one instrument mode (WT or PC).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeFit {
    /// Names of the fitted models, index of `results`.
    pub models: Vec<String>,
    pub exposure: Option<f64>,
    pub mean_time: Option<f64>,
    pub results: BTreeMap<String, FitResult>,
}

impl ModeFit {
    fn from_reply(f: Fields<'_>) -> Result<Self> {
        f.require(&["Models"])?;
        let models = f.str_list("Models")?;
        f.require(&models)?;

        let mut results = BTreeMap::new();
        for model in &models {
            let context = format!("{} / {model}", f.context());
            let fit = FitResult::from_reply(Fields::new(f.object(model)?, &context))?;
            results.insert(model.clone(), fit);
        }
        Ok(Self {
            models,
            exposure: f.opt_f64("Exposure")?,
            mean_time: f.opt_f64("MeanTime")?,
            results,
        })
    }
}

/// One named time interval of a spectrum set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interval {
    /// Archive with the spectral files of this interval.
    pub data_file: Option<String>,
    /// Start and stop, seconds since T0.
    pub start: f64,
    pub stop: f64,
    /// Instrument modes, index of `fits`.
    pub modes: Vec<String>,
    pub fits: BTreeMap<String, ModeFit>,
}

impl Interval {
    fn from_reply(f: Fields<'_>) -> Result<Self> {
        f.require(&["Start", "Stop", "Modes"])?;
        let modes = f.str_list("Modes")?;
        f.require(&modes)?;

        let mut fits = BTreeMap::new();
        for mode in &modes {
            let context = format!("{} / {mode}", f.context());
            let fit = ModeFit::from_reply(Fields::new(f.object(mode)?, &context))?;
            fits.insert(mode.clone(), fit);
        }
        Ok(Self {
            data_file: f.opt_str("DataFile")?.map(str::to_string),
            start: f.f64("Start")?,
            stop: f.f64("Stop")?,
            modes,
            fits,
        })
    }
}

/// Automatic or time-sliced spectral fits of one object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpectrumSet {
    #[serde(rename = "T0")]
    pub t0: f64,
    /// Fit-statistic change defining the quoted errors.
    pub delta_fit_stat: Option<f64>,
    /// Interval names, index of `data`.
    pub intervals: Vec<String>,
    pub data: BTreeMap<String, Interval>,
}

impl SpectrumSet {
    pub(crate) fn from_reply(f: Fields<'_>, filter: Option<&[String]>) -> Result<Self> {
        f.require(&["T0", "rnames"])?;
        let intervals = filtered_index(f.str_list("rnames")?, filter);
        f.require(&intervals)?;

        let mut data = BTreeMap::new();
        for name in &intervals {
            let context = format!("{} / {name}", f.context());
            let interval = Interval::from_reply(Fields::new(f.object(name)?, &context))?;
            data.insert(name.clone(), interval);
        }
        Ok(Self {
            t0: f.f64("T0")?,
            delta_fit_stat: f.opt_f64("DeltaFitStat")?,
            intervals,
            data,
        })
    }

    /// Intervals in index order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Interval)> {
        self.intervals
            .iter()
            .filter_map(|name| self.data.get(name).map(|i| (name.as_str(), i)))
    }

    pub fn fit(&self, interval: &str, mode: &str, model: &str) -> Option<&FitResult> {
        self.data.get(interval)?.fits.get(mode)?.results.get(model)
    }
}

/// Event grades used for time-sliced spectra.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Grades {
    #[default]
    All,
    Pc0,
    Wt0,
}

impl Grades {
    fn as_str(self) -> &'static str {
        match self {
            Grades::All => "all",
            Grades::Pc0 => "pc0",
            Grades::Wt0 => "wt0",
        }
    }
}

/// Parameters of a time-sliced spectrum job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "camelCase")]
pub struct TimesliceRequest {
    /// Named slices, each `"start-stop[,start-stop...]"` in seconds since T0.
    pub slices: Vec<(String, String)>,
    pub grades: Grades,
    pub redshift: Option<f64>,
    /// Override of the trigger time, in MET.
    #[serde(rename = "T0")]
    pub t0: Option<f64>,
}

impl TimesliceRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn slice(mut self, name: impl Into<String>, times: impl Into<String>) -> Self {
        self.slices.push((name.into(), times.into()));
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.slices.is_empty() {
            return Err(Error::InvalidRequest("at least one slice is required".into()));
        }
        for (i, (name, times)) in self.slices.iter().enumerate() {
            if name.is_empty()
                || !name
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_')
            {
                return Err(Error::InvalidRequest(format!(
                    "slice name {name:?} must be non-empty and alphanumeric"
                )));
            }
            if self.slices[..i].iter().any(|(n, _)| n == name) {
                return Err(Error::InvalidRequest(format!(
                    "slice name {name:?} is used twice"
                )));
            }
            parse_spans(times).map_err(|detail| {
                Error::InvalidRequest(format!("slice {name:?}: {detail}"))
            })?;
        }
        if let Some(z) = self.redshift {
            if !(z.is_finite() && z > 0.0) {
                return Err(Error::InvalidRequest("redshift must be positive".into()));
            }
        }
        Ok(())
    }

    fn to_params(&self) -> Map<String, Value> {
        let mut p = Map::new();
        let slices: Vec<Value> = self
            .slices
            .iter()
            .map(|(name, times)| Value::from(vec![name.as_str(), times.as_str()]))
            .collect();
        p.insert("slices".into(), Value::from(slices));
        p.insert("grades".into(), Value::from(self.grades.as_str()));
        if let Some(z) = self.redshift {
            p.insert("redshift".into(), Value::from(z));
        }
        if let Some(t0) = self.t0 {
            p.insert("T0".into(), Value::from(t0));
        }
        p
    }
}

/// Parses `"a-b[,c-d...]"`; times may be negative (before T0).
fn parse_spans(spec: &str) -> std::result::Result<Vec<(f64, f64)>, String> {
    let mut spans = Vec::new();
    for part in spec.split(',') {
        let part = part.trim();
        let sep = part
            .char_indices()
            .skip(1)
            .find(|&(i, c)| {
                c == '-'
                    && part[..i]
                        .chars()
                        .last()
                        .is_some_and(|p| p.is_ascii_digit() || p == '.')
            })
            .map(|(i, _)| i)
            .ok_or_else(|| format!("{part:?} is not of the form start-stop"))?;
        let start: f64 = part[..sep]
            .trim()
            .parse()
            .map_err(|_| format!("bad start time in {part:?}"))?;
        let stop: f64 = part[sep + 1..]
            .trim()
            .parse()
            .map_err(|_| format!("bad stop time in {part:?}"))?;
        if start >= stop {
            return Err(format!("{part:?} does not have start < stop"));
        }
        spans.push((start, stop));
    }
    Ok(spans)
}

impl<T: Transport> Client<T> {
    fn write_spectrum_set(
        &self,
        set: &SpectrumSet,
        layout: &Layout,
        opts: &SpectrumOptions,
    ) -> Result<Vec<PathBuf>> {
        let progress = opts.output.progress();
        let mut written = Vec::new();
        for (name, interval) in set.iter() {
            let stem = path_component(name);
            match &interval.data_file {
                Some(url) => {
                    let extract_into = opts.extract.then(|| layout.dir().join(&stem));
                    let outcome = fetch_archive(
                        self.transport(),
                        url,
                        layout,
                        &format!("{stem}.tar.gz"),
                        extract_into.as_deref(),
                        opts.remove_tar,
                        progress,
                    )?;
                    written.extend(outcome.archive);
                    written.extend(outcome.extracted);
                }
                None => log::warn!("interval {name} has no data file"),
            }

            if opts.save_images {
                for mode in &interval.modes {
                    let Some(fit) = interval.fits.get(mode) else {
                        continue;
                    };
                    for model in &fit.models {
                        let Some(url) = fit.results.get(model).and_then(|r| r.image.as_deref())
                        else {
                            continue;
                        };
                        let file = format!(
                            "{stem}_{}_{}.png",
                            path_component(mode),
                            path_component(model)
                        );
                        let target = layout.prepare(&file)?;
                        self.download(url, &target, false)?;
                        written.push(target);
                    }
                }
            }
        }
        Ok(written)
    }

    fn spectra_for(&self, id: &GrbId, opts: &SpectrumOptions) -> Result<SpectrumSet> {
        let reply = self.call_for("getSpectrum", id, Map::new())?;
        let context = format!("spectrum of {id}");
        SpectrumSet::from_reply(Fields::new(&reply, &context), opts.intervals.as_deref())
    }

    /// Fetches the automatic spectral fits of one or more GRBs; saving pulls
    /// each interval's archive and the fit images.
    pub fn get_spectra(
        &self,
        objects: &Objects,
        opts: &SpectrumOptions,
    ) -> Result<Option<Fetched<SpectrumSet>>> {
        opts.validate()?;
        let selection = objects.resolve()?;

        let fetched = selection.fan_out(opts.output.skip_errors, |id, key| {
            opts.output.note(format_args!("getting spectra of {id}"));
            let set = self.spectra_for(id, opts)?;
            if opts.output.save_data {
                self.write_spectrum_set(&set, &Layout::new(&opts.output, key), opts)?;
            }
            Ok(set)
        })?;

        Ok(opts.output.return_data.then_some(fetched))
    }

    /// Downloads the files referenced by spectra held in memory.
    pub fn save_spectra(
        &self,
        data: &Fetched<SpectrumSet>,
        opts: &SpectrumOptions,
    ) -> Result<Vec<PathBuf>> {
        let opts = SpectrumOptions {
            output: crate::options::OutputOptions {
                save_data: true,
                ..opts.output.clone()
            },
            ..opts.clone()
        };
        opts.validate()?;
        let mut written = Vec::new();
        for (key, set) in data.entries() {
            let layout = Layout::new(&opts.output, key);
            written.extend(self.write_spectrum_set(set, &layout, &opts)?);
        }
        Ok(written)
    }

    /// Submits a time-sliced spectrum job for a single GRB.
    pub fn start_timeslice(
        &self,
        object: &Objects,
        request: &TimesliceRequest,
    ) -> Result<JobHandle> {
        let id = single(object.resolve()?, "startTimeslice")?;
        request.validate()?;

        let reply = self.call_for("startTimeslice", &id, request.to_params())?;
        let handle = handle_from_reply(JobKind::Timeslice, &reply, &format!("timeslice of {id}"))?;
        log::info!("submitted {handle} for {id}");
        Ok(handle)
    }

    pub fn check_timeslice_status(&self, job: &JobHandle) -> Result<JobStatus> {
        job.expect_kind(JobKind::Timeslice)?;
        self.job_status(job)
    }

    pub fn timeslice_complete(&self, job: &JobHandle) -> Result<bool> {
        job.expect_kind(JobKind::Timeslice)?;
        self.job_complete(job)
    }

    pub fn cancel_timeslice(&self, job: &JobHandle) -> Result<bool> {
        job.expect_kind(JobKind::Timeslice)?;
        self.cancel_job(job)
    }

    /// Fetches the result of a completed time-slice job. Files are written
    /// directly under `destDir`.
    pub fn get_timesliced_spectra(
        &self,
        job: &JobHandle,
        opts: &SpectrumOptions,
    ) -> Result<Option<SpectrumSet>> {
        job.expect_kind(JobKind::Timeslice)?;
        opts.validate()?;

        let reply = self.job_result(job, "getTimeslicedSpectrum")?;
        let context = job.to_string();
        let set =
            SpectrumSet::from_reply(Fields::new(&reply, &context), opts.intervals.as_deref())?;
        if opts.output.save_data {
            self.write_spectrum_set(&set, &Layout::new(&opts.output, None), opts)?;
        }
        Ok(opts.output.return_data.then_some(set))
    }
}
