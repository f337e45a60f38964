//! Per-product options.
//!
//! Every struct deserialises from JSON with the API's camelCase option
//! names and rejects keys it does not know.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// What to do with fetched data and where files go.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "camelCase")]
pub struct OutputOptions {
    /// Return the data as an in-memory structure.
    pub return_data: bool,
    /// Write files under `dest_dir`.
    pub save_data: bool,
    pub dest_dir: PathBuf,
    /// For collections: one directory per object (`true`) or a shared
    /// directory with the identifier prefixed to every filename.
    pub sub_dirs: bool,
    /// Overwrite existing files.
    pub clobber: bool,
    /// In a collection, log and skip objects that fail instead of aborting.
    pub skip_errors: bool,
    pub silent: bool,
    pub verbose: bool,
}

impl Default for OutputOptions {
    fn default() -> Self {
        Self {
            return_data: false,
            save_data: true,
            dest_dir: PathBuf::from("."),
            sub_dirs: true,
            clobber: false,
            skip_errors: false,
            silent: false,
            verbose: false,
        }
    }
}

impl OutputOptions {
    pub(crate) fn validate(&self) -> Result<()> {
        if !self.return_data && !self.save_data {
            return Err(Error::InvalidRequest(
                "neither returnData nor saveData is set; nothing to do".into(),
            ));
        }
        if self.save_data && self.dest_dir.as_os_str().is_empty() {
            return Err(Error::InvalidRequest("destDir must not be empty".into()));
        }
        Ok(())
    }

    /// Whether download progress bars are shown.
    pub(crate) fn progress(&self) -> bool {
        !self.silent || self.verbose
    }

    /// Emits a progress message. `verbose` raises it to info level;
    /// `silent` drops it.
    pub(crate) fn note(&self, args: fmt::Arguments<'_>) {
        if self.verbose {
            log::info!("{args}");
        } else if !self.silent {
            log::debug!("{args}");
        }
    }
}

/// Text format of written tables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SaveFormat {
    /// Column separator for delimited output. Ignored for QDP.
    pub sep: String,
    /// Write plot-ready QDP files instead of delimited tables.
    #[serde(rename = "asQDP")]
    pub as_qdp: bool,
    /// Emit a header row (a `!` comment in QDP).
    pub header: bool,
}

impl Default for SaveFormat {
    fn default() -> Self {
        Self {
            sep: "\t".to_string(),
            as_qdp: false,
            header: true,
        }
    }
}

impl SaveFormat {
    pub(crate) fn validate(&self) -> Result<()> {
        if !self.as_qdp && self.sep.is_empty() {
            return Err(Error::InvalidRequest("sep must not be empty".into()));
        }
        if self.sep.contains('\n') {
            return Err(Error::InvalidRequest("sep must not contain a newline".into()));
        }
        Ok(())
    }

    pub(crate) fn extension(&self) -> &'static str {
        if self.as_qdp { "qdp" } else { "dat" }
    }
}

/// Selection of a server-side data variant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    Yes,
    No,
    #[default]
    Both,
}

impl Variant {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Variant::Yes => "yes",
            Variant::No => "no",
            Variant::Both => "both",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LightCurveOptions {
    pub output: OutputOptions,
    pub format: SaveFormat,
    /// Only keep these datasets (e.g. `["WT", "PC_incbad"]`).
    pub datasets: Option<Vec<String>>,
    /// Include data from bad CCD columns.
    pub incbad: Variant,
    /// Include the variant without systematic errors.
    pub nosys: Variant,
}

impl LightCurveOptions {
    pub(crate) fn validate(&self) -> Result<()> {
        self.output.validate()?;
        self.format.validate()?;
        validate_filter("datasets", self.datasets.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "camelCase")]
pub struct SpectrumOptions {
    pub output: OutputOptions,
    /// Download the fit image of every mode and model.
    pub save_images: bool,
    /// Extract each interval's archive into `<dest>/<interval>/`.
    pub extract: bool,
    /// Delete archives after extraction.
    pub remove_tar: bool,
    /// Only keep these intervals (e.g. `["interval0"]`).
    pub intervals: Option<Vec<String>>,
}

impl Default for SpectrumOptions {
    fn default() -> Self {
        Self {
            output: OutputOptions::default(),
            save_images: true,
            extract: false,
            remove_tar: false,
            intervals: None,
        }
    }
}

impl SpectrumOptions {
    pub(crate) fn validate(&self) -> Result<()> {
        self.output.validate()?;
        validate_filter("intervals", self.intervals.as_deref())?;
        if self.output.save_data && self.extract && !self.output.sub_dirs {
            return Err(Error::InvalidRequest(
                "extract requires subDirs: archives of different objects hold like-named files"
                    .into(),
            ));
        }
        if self.remove_tar && !self.extract {
            return Err(Error::InvalidRequest("removeTar requires extract".into()));
        }
        Ok(())
    }
}

pub const BURST_ANALYSER_INSTRUMENTS: [&str; 3] = ["BAT", "XRT", "UVOT"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "camelCase")]
pub struct BurstAnalyserOptions {
    pub output: OutputOptions,
    pub format: SaveFormat,
    /// Also fetch the packaged burst-analyser archive.
    pub download_tar: bool,
    pub extract: bool,
    pub remove_tar: bool,
    pub instruments: Vec<String>,
    /// Energy bands to return (e.g. `["ObservedFlux", "Density"]`).
    pub bands: Option<Vec<String>>,
    /// BAT binning methods to return (e.g. `["SNR4", "TimeBins_4ms"]`).
    #[serde(rename = "BATbinning")]
    pub bat_binning: Option<Vec<String>>,
    /// In QDP output, use flux errors that include the ECF uncertainty.
    pub use_propagated_errors: bool,
    /// Write BAT bins flagged as unreliable.
    #[serde(rename = "badBATBins")]
    pub bad_bat_bins: bool,
    /// Only write these datasets.
    pub datasets: Option<Vec<String>>,
}

impl Default for BurstAnalyserOptions {
    fn default() -> Self {
        Self {
            output: OutputOptions::default(),
            format: SaveFormat::default(),
            download_tar: false,
            extract: false,
            remove_tar: false,
            instruments: BURST_ANALYSER_INSTRUMENTS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            bands: None,
            bat_binning: None,
            use_propagated_errors: false,
            bad_bat_bins: false,
            datasets: None,
        }
    }
}

impl BurstAnalyserOptions {
    pub(crate) fn validate(&self) -> Result<()> {
        self.output.validate()?;
        self.format.validate()?;
        if self.instruments.is_empty() {
            return Err(Error::InvalidRequest("instruments must not be empty".into()));
        }
        if let Some(bad) = self
            .instruments
            .iter()
            .find(|i| !BURST_ANALYSER_INSTRUMENTS.contains(&i.as_str()))
        {
            return Err(Error::InvalidRequest(format!(
                "unknown instrument {bad:?} (expected one of {})",
                BURST_ANALYSER_INSTRUMENTS.join(", ")
            )));
        }
        validate_filter("bands", self.bands.as_deref())?;
        validate_filter("BATbinning", self.bat_binning.as_deref())?;
        validate_filter("datasets", self.datasets.as_deref())?;
        if (self.extract || self.remove_tar) && !self.download_tar {
            return Err(Error::InvalidRequest(
                "extract and removeTar require downloadTar".into(),
            ));
        }
        if self.remove_tar && !self.extract {
            return Err(Error::InvalidRequest("removeTar requires extract".into()));
        }
        if self.download_tar && self.extract && !self.output.sub_dirs {
            return Err(Error::InvalidRequest(
                "extract requires subDirs: archives of different objects hold like-named files"
                    .into(),
            ));
        }
        if self.download_tar && !self.output.save_data {
            return Err(Error::InvalidRequest("downloadTar requires saveData".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PositionOptions {
    pub output: OutputOptions,
    pub format: SaveFormat,
}

impl PositionOptions {
    pub(crate) fn validate(&self) -> Result<()> {
        self.output.validate()?;
        self.format.validate()?;
        if self.format.as_qdp {
            return Err(Error::InvalidRequest(
                "positions are not a plottable table; asQDP is not supported".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ObsDataOptions {
    pub output: OutputOptions,
    /// Only fetch files under these top-level directories
    /// (`xrt`, `bat`, `uvot`, `auxil`, `log`).
    pub instruments: Option<Vec<String>>,
}

impl ObsDataOptions {
    pub(crate) fn validate(&self) -> Result<()> {
        self.output.validate()?;
        validate_filter("instruments", self.instruments.as_deref())
    }
}

fn validate_filter(name: &str, filter: Option<&[String]>) -> Result<()> {
    match filter {
        Some([]) => Err(Error::InvalidRequest(format!(
            "{name} filter is empty; omit it to keep everything"
        ))),
        _ => Ok(()),
    }
}

pub(crate) fn keep(filter: Option<&[String]>, name: &str) -> bool {
    filter.is_none_or(|f| f.iter().any(|x| x == name))
}
