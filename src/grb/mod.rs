//! GRB data products.
//!
//! Each product is fetched per object with the identifier fan-out of
//! [`crate::Objects`], optionally written to disk, and optionally returned.

mod burst_analyser;
mod light_curve;
mod obs_data;
mod position;
mod spectrum;

pub use burst_analyser::{BandSet, BaTable, BurstAnalyser, InstrumentData, save_burst_analyser};
pub use light_curve::{BinMethod, LightCurve, RebinRequest, save_light_curves};
pub use obs_data::{ObsData, ObsFile, Observation};
pub use position::{POSITION_KINDS, PositionEstimate, Positions, save_positions};
pub use spectrum::{
    FitResult, Grades, Interval, Measurement, ModeFit, SpectrumSet, TimesliceRequest,
};

/// Time system of every GRB light curve and rebin request.
pub const GRB_TIME_FORMAT: &str = "MET";

/// Binning method of the standard GRB light curves.
pub const GRB_BIN_METHOD: &str = "counts";

/// Sub-directory receiving extracted burst-analyser archives, keeping them
/// apart from the table files written next to them.
pub const BURST_ANALYSER_ARCHIVE_DIR: &str = "archive";

/// Keeps `index` entries that pass `filter`, preserving order.
pub(crate) fn filtered_index(index: Vec<String>, filter: Option<&[String]>) -> Vec<String> {
    index
        .into_iter()
        .filter(|name| crate::options::keep(filter, name))
        .collect()
}
