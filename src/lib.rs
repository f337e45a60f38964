//! A small Rust client for the UK Swift Science Data Centre GRB products API.
//!
//! Every product (light curves, spectra, burst-analyser data, positions,
//! observation files) follows the same flow: pick one or more GRBs by name or
//! target ID, fetch the product, optionally write it to disk, and optionally
//! return it. Light-curve rebinning and time-sliced spectra run as server-side
//! jobs that are submitted, polled and fetched separately.
//!
//! ## Quick start
//! - The endpoint defaults to the public service; override it with
//!   `SWIFTGRB_URL` or a `.swiftgrbrc` file (current directory, then home).
//! - Build [`Objects`] from one name or a list of names, then call a product
//!   method on [`Client`].
//!
//! ```no_run
//! use anyhow::Result;
//! use swift_grb::{Client, LightCurveOptions, Objects, OutputOptions};
//!
//! fn main() -> Result<()> {
//!     let client = Client::from_env()?;
//!     let opts = LightCurveOptions {
//!         output: OutputOptions {
//!             return_data: true,
//!             dest_dir: "lcs".into(),
//!             ..Default::default()
//!         },
//!         ..Default::default()
//!     };
//!     let curves = client.get_light_curves(&Objects::names(["GRB 060729", "GRB 070616"]), &opts)?;
//!     if let Some(curves) = curves {
//!         for (grb, lc) in curves.entries() {
//!             println!("{:?}: {:?}", grb.map(|g| g.to_string()), lc.datasets);
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! For the command-line tool and configuration details, see the crate README.

#![forbid(unsafe_code)]

mod archive;
mod client;
mod config;
mod error;
mod grb;
mod ident;
mod jobs;
mod options;
mod reply;
mod save;
mod table;
mod transport;
mod util;

pub use client::{API_VERSION, Client};
pub use config::{ClientConfig, DEFAULT_TIMEOUT, DEFAULT_URL};
pub use error::{Error, Result};
pub use grb::{
    BURST_ANALYSER_ARCHIVE_DIR, BandSet, BaTable, BinMethod, BurstAnalyser, FitResult,
    GRB_BIN_METHOD, GRB_TIME_FORMAT, Grades, InstrumentData, Interval, LightCurve, Measurement,
    ModeFit, ObsData, ObsFile, Observation, POSITION_KINDS, PositionEstimate, Positions,
    RebinRequest, SpectrumSet, TimesliceRequest, save_burst_analyser, save_light_curves,
    save_positions,
};
pub use ident::{Fetched, GrbId, Keyed, Objects, OneOrMany, Selection};
pub use jobs::{DEFAULT_POLL_INTERVAL, JobHandle, JobKind, JobState, JobStatus};
pub use options::{
    BURST_ANALYSER_INSTRUMENTS, BurstAnalyserOptions, LightCurveOptions, ObsDataOptions,
    OutputOptions, PositionOptions, SaveFormat, SpectrumOptions, Variant,
};
pub use table::Table;
pub use transport::{HttpTransport, Transport};
