use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{BURST_ANALYSER_ARCHIVE_DIR, filtered_index};
use crate::archive::fetch_archive;
use crate::client::Client;
use crate::error::{Error, Result};
use crate::ident::{Fetched, GrbId, Objects};
use crate::options::BurstAnalyserOptions;
use crate::reply::Fields;
use crate::save::{Layout, render_table};
use crate::table::Table;
use crate::transport::Transport;
use crate::util::path_component;

/// Columns of a merged burst-analyser table.
pub const MERGED_COLUMNS: [&str; 14] = [
    "Time",
    "TimePos",
    "TimeNeg",
    "Flux",
    "FluxPos",
    "FluxNeg",
    "FluxPosWithECF",
    "FluxNegWithECF",
    "Gamma",
    "GammaPos",
    "GammaNeg",
    "ECF",
    "ECFPos",
    "ECFNeg",
];

const FLUX_COLUMNS: [&str; 6] = ["Time", "TimePos", "TimeNeg", "Flux", "FluxPos", "FluxNeg"];
const GAMMA_COLUMNS: [&str; 4] = ["Time", "Gamma", "GammaPos", "GammaNeg"];
const ECF_COLUMNS: [&str; 4] = ["Time", "ECF", "ECFPos", "ECFNeg"];

/// Flux, photon index and ECF on the flux time axis, plus a per-row flag
/// marking unreliable bins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawBaTable")]
pub struct BaTable {
    #[serde(flatten)]
    table: Table,
    #[serde(rename = "BadBin")]
    bad_bin: Vec<bool>,
}

#[derive(Deserialize)]
struct RawBaTable {
    #[serde(flatten)]
    table: Table,
    #[serde(rename = "BadBin")]
    bad_bin: Vec<bool>,
}

impl TryFrom<RawBaTable> for BaTable {
    type Error = Error;

    fn try_from(raw: RawBaTable) -> Result<Self> {
        BaTable::new(raw.table, raw.bad_bin)
    }
}

impl BaTable {
    /// Pairs a table with its bad-bin flags; there must be one flag per row.
    pub fn new(table: Table, bad_bin: Vec<bool>) -> Result<Self> {
        if bad_bin.len() != table.len() {
            return Err(Error::malformed(
                "burst analyser table",
                format!("{} BadBin flag(s) for {} row(s)", bad_bin.len(), table.len()),
            ));
        }
        Ok(Self { table, bad_bin })
    }

    pub fn table(&self) -> &Table {
        &self.table
    }

    pub fn bad_bin(&self) -> &[bool] {
        &self.bad_bin
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

fn column_indices(table: &Table, wanted: &[&str], context: &str) -> Result<Vec<usize>> {
    let missing: Vec<String> = wanted
        .iter()
        .filter(|c| table.column_index(c).is_none())
        .map(|c| c.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(Error::MissingKeys {
            context: format!("{context} columns"),
            keys: missing,
        });
    }
    Ok(wanted
        .iter()
        .filter_map(|c| table.column_index(c))
        .collect())
}

/// Adds the relative ECF error to a flux error in quadrature, keeping the
/// sign convention of `err`.
fn with_ecf_error(err: f64, flux: f64, ecf: f64, ecf_err: f64) -> f64 {
    let rel = ecf_err / ecf;
    let mag = (err * err + (flux * rel) * (flux * rel)).sqrt();
    if err < 0.0 { -mag } else { mag }
}

/// Joins the three per-dataset tables on exactly matching times.
fn merge(flux: &Table, gamma: &Table, ecf: &Table, context: &str) -> Result<BaTable> {
    let fi = column_indices(flux, &FLUX_COLUMNS, &format!("{context} / Flux"))?;
    let gi = column_indices(gamma, &GAMMA_COLUMNS, &format!("{context} / Gamma"))?;
    let ei = column_indices(ecf, &ECF_COLUMNS, &format!("{context} / ECF"))?;
    let bad_col = flux.column_index("BadBin");

    let by_time = |t: &Table, time_col: usize| -> HashMap<u64, usize> {
        t.rows()
            .iter()
            .enumerate()
            .map(|(i, r)| (r[time_col].to_bits(), i))
            .collect()
    };
    let gamma_rows = by_time(gamma, gi[0]);
    let ecf_rows = by_time(ecf, ei[0]);

    let mut rows = Vec::with_capacity(flux.len());
    let mut bad_bin = Vec::with_capacity(flux.len());
    for row in flux.rows() {
        let time = row[fi[0]];
        let g = gamma_rows.get(&time.to_bits()).map(|&i| &gamma.rows()[i]);
        let e = ecf_rows.get(&time.to_bits()).map(|&i| &ecf.rows()[i]);
        let pick = |r: Option<&Vec<f64>>, col: usize| r.map_or(f64::NAN, |r| r[col]);

        let (f, fp, fneg) = (row[fi[3]], row[fi[4]], row[fi[5]]);
        let (ecf_v, ecf_p, ecf_n) = (pick(e, ei[1]), pick(e, ei[2]), pick(e, ei[3]));

        rows.push(vec![
            time,
            row[fi[1]],
            row[fi[2]],
            f,
            fp,
            fneg,
            with_ecf_error(fp, f, ecf_v, ecf_p),
            with_ecf_error(fneg, f, ecf_v, ecf_n.abs()),
            pick(g, gi[1]),
            pick(g, gi[2]),
            pick(g, gi[3]),
            ecf_v,
            ecf_p,
            ecf_n,
        ]);
        bad_bin.push(bad_col.is_some_and(|c| row[c] != 0.0 && !row[c].is_nan()));
    }

    let table = Table::new(MERGED_COLUMNS.iter().map(|c| c.to_string()).collect(), rows)?;
    BaTable::new(table, bad_bin)
}

/// Datasets of one instrument (and, for BAT, one binning method).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandSet {
    #[serde(rename = "Datasets")]
    pub datasets: Vec<String>,
    pub tables: BTreeMap<String, BaTable>,
}

impl BandSet {
    fn from_reply(f: Fields<'_>, filter: Option<&[String]>) -> Result<Self> {
        f.require(&["Datasets"])?;
        let datasets = filtered_index(f.str_list("Datasets")?, filter);
        f.require(&datasets)?;

        let mut tables = BTreeMap::new();
        for name in &datasets {
            let context = format!("{} / {name}", f.context());
            let parts = Fields::new(f.object(name)?, &context);
            parts.require(&["Flux", "Gamma", "ECF"])?;
            let merged = merge(
                &parts.table("Flux")?,
                &parts.table("Gamma")?,
                &parts.table("ECF")?,
                &context,
            )?;
            tables.insert(name.clone(), merged);
        }
        Ok(Self { datasets, tables })
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &BaTable)> {
        self.datasets
            .iter()
            .filter_map(|n| self.tables.get(n).map(|t| (n.as_str(), t)))
    }
}

/// BAT data is split by binning method; XRT and UVOT data is not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InstrumentData {
    Binned {
        #[serde(rename = "Binning")]
        binning: Vec<String>,
        data: BTreeMap<String, BandSet>,
    },
    Unbinned(BandSet),
}

/// Burst-analyser data of one object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BurstAnalyser {
    #[serde(rename = "Instruments")]
    pub instruments: Vec<String>,
    pub data: BTreeMap<String, InstrumentData>,
    /// The packaged archive of all burst-analyser products.
    #[serde(rename = "TarFile")]
    pub tar_file: Option<String>,
}

impl BurstAnalyser {
    pub(crate) fn from_reply(f: Fields<'_>, opts: &BurstAnalyserOptions) -> Result<Self> {
        f.require(&["Instruments"])?;
        let wanted = Some(opts.instruments.as_slice());
        let instruments = filtered_index(f.str_list("Instruments")?, wanted);
        f.require(&instruments)?;

        let datasets = opts.datasets.as_deref();
        let mut data = BTreeMap::new();
        for inst in &instruments {
            let context = format!("{} / {inst}", f.context());
            let inner = Fields::new(f.object(inst)?, &context);
            let parsed = if inner.contains("Binning") {
                let binning =
                    filtered_index(inner.str_list("Binning")?, opts.bat_binning.as_deref());
                inner.require(&binning)?;
                let mut per_bin = BTreeMap::new();
                for bin in &binning {
                    let bin_context = format!("{context} / {bin}");
                    let bin_fields = Fields::new(inner.object(bin)?, &bin_context);
                    let set = BandSet::from_reply(bin_fields, datasets)?;
                    per_bin.insert(bin.clone(), set);
                }
                InstrumentData::Binned {
                    binning,
                    data: per_bin,
                }
            } else {
                InstrumentData::Unbinned(BandSet::from_reply(inner, datasets)?)
            };
            data.insert(inst.clone(), parsed);
        }

        Ok(Self {
            instruments,
            data,
            tar_file: f.opt_str("TarFile")?.map(str::to_string),
        })
    }

    /// Every table with its file stem (`<instrument>[_<binning>]_<dataset>`),
    /// in index order.
    pub fn tables(&self) -> Vec<(String, &BaTable)> {
        let mut out = Vec::new();
        for inst in &self.instruments {
            match self.data.get(inst) {
                Some(InstrumentData::Binned { binning, data }) => {
                    for bin in binning {
                        if let Some(set) = data.get(bin) {
                            for (name, t) in set.iter() {
                                out.push((format!("{inst}_{bin}_{name}"), t));
                            }
                        }
                    }
                }
                Some(InstrumentData::Unbinned(set)) => {
                    for (name, t) in set.iter() {
                        out.push((format!("{inst}_{name}"), t));
                    }
                }
                None => {}
            }
        }
        out
    }
}

fn render_ba_table(t: &BaTable, opts: &BurstAnalyserOptions) -> Result<String> {
    let keep: Vec<usize> = (0..t.len())
        .filter(|&i| opts.bad_bat_bins || !t.bad_bin[i])
        .collect();
    let rows = t.table.rows();

    let table = if opts.format.as_qdp {
        let (pos, neg) = if opts.use_propagated_errors {
            ("FluxPosWithECF", "FluxNegWithECF")
        } else {
            ("FluxPos", "FluxNeg")
        };
        let wanted = ["Time", "TimePos", "TimeNeg", "Flux", pos, neg];
        let indices = column_indices(&t.table, &wanted, "burst analyser table")?;
        Table::new(
            FLUX_COLUMNS.iter().map(|c| c.to_string()).collect(),
            keep.iter()
                .map(|&i| indices.iter().map(|&c| rows[i][c]).collect())
                .collect(),
        )?
    } else {
        let mut columns = t.table.columns().to_vec();
        columns.push("BadBin".to_string());
        Table::new(
            columns,
            keep.iter()
                .map(|&i| {
                    let mut r = rows[i].clone();
                    r.push(if t.bad_bin[i] { 1.0 } else { 0.0 });
                    r
                })
                .collect(),
        )?
    };
    Ok(render_table(&table, &opts.format))
}

fn write_burst_analyser(
    ba: &BurstAnalyser,
    layout: &Layout,
    opts: &BurstAnalyserOptions,
) -> Result<Vec<PathBuf>> {
    let mut written = Vec::new();
    for (stem, t) in ba.tables() {
        let file = format!("{}.{}", path_component(&stem), opts.format.extension());
        written.push(layout.write(&file, &render_ba_table(t, opts)?)?);
    }
    Ok(written)
}

/// Writes burst-analyser data held in memory, exactly as
/// `get_burst_analyser` with `saveData` would have written the tables.
pub fn save_burst_analyser(
    data: &Fetched<BurstAnalyser>,
    opts: &BurstAnalyserOptions,
) -> Result<Vec<PathBuf>> {
    opts.format.validate()?;
    let mut written = Vec::new();
    for (key, ba) in data.entries() {
        written.extend(write_burst_analyser(ba, &Layout::new(&opts.output, key), opts)?);
    }
    Ok(written)
}

impl<T: Transport> Client<T> {
    fn burst_analyser_for(&self, id: &GrbId, opts: &BurstAnalyserOptions) -> Result<BurstAnalyser> {
        let mut params = Map::new();
        params.insert("instruments".into(), Value::from(opts.instruments.clone()));
        if let Some(bands) = &opts.bands {
            params.insert("bands".into(), Value::from(bands.clone()));
        }
        if let Some(binning) = &opts.bat_binning {
            params.insert("BATbinning".into(), Value::from(binning.clone()));
        }

        let reply = self.call_for("getBurstAnalyser", id, params)?;
        let context = format!("burst analyser of {id}");
        BurstAnalyser::from_reply(Fields::new(&reply, &context), opts)
    }

    /// Fetches burst-analyser light curves of one or more GRBs.
    pub fn get_burst_analyser(
        &self,
        objects: &Objects,
        opts: &BurstAnalyserOptions,
    ) -> Result<Option<Fetched<BurstAnalyser>>> {
        opts.validate()?;
        let selection = objects.resolve()?;

        let fetched = selection.fan_out(opts.output.skip_errors, |id, key| {
            opts.output.note(format_args!("getting burst analyser data of {id}"));
            let ba = self.burst_analyser_for(id, opts)?;
            if opts.output.save_data {
                let layout = Layout::new(&opts.output, key);
                write_burst_analyser(&ba, &layout, opts)?;
                if opts.download_tar {
                    let url = ba.tar_file.as_deref().ok_or_else(|| Error::MissingKeys {
                        context: format!("burst analyser of {id}"),
                        keys: vec!["TarFile".into()],
                    })?;
                    let extract_into = opts
                        .extract
                        .then(|| layout.dir().join(BURST_ANALYSER_ARCHIVE_DIR));
                    fetch_archive(
                        self.transport(),
                        url,
                        &layout,
                        "burst_analyser.tar.gz",
                        extract_into.as_deref(),
                        opts.remove_tar,
                        opts.output.progress(),
                    )?;
                }
            }
            Ok(ba)
        })?;

        Ok(opts.output.return_data.then_some(fetched))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn dataset(times: &[f64], bad: &[u8]) -> Value {
        let flux: Vec<Value> = times
            .iter()
            .zip(bad)
            .map(|(t, b)| json!([t, 1.0, -1.0, 2e-9, 2e-10, -2e-10, b]))
            .collect();
        let gamma: Vec<Value> = times.iter().map(|t| json!([t, 1.5, 0.2, -0.2])).collect();
        let ecf: Vec<Value> = times.iter().map(|t| json!([t, 4e-7, 1e-7, -1e-7])).collect();
        json!({
            "Flux": {
                "columns": ["Time", "TimePos", "TimeNeg", "Flux", "FluxPos", "FluxNeg", "BadBin"],
                "data": flux
            },
            "Gamma": {"columns": ["Time", "Gamma", "GammaPos", "GammaNeg"], "data": gamma},
            "ECF": {"columns": ["Time", "ECF", "ECFPos", "ECFNeg"], "data": ecf}
        })
    }

    fn reply() -> Value {
        json!({
            "OK": 1,
            "Instruments": ["BAT", "XRT"],
            "BAT": {
                "Binning": ["SNR4", "TimeBins_4ms"],
                "SNR4": {
                    "Datasets": ["ObservedFlux"],
                    "ObservedFlux": dataset(&[-1.0, 0.5, 2.0], &[0, 1, 0])
                },
                "TimeBins_4ms": {
                    "Datasets": ["ObservedFlux"],
                    "ObservedFlux": dataset(&[0.004], &[0])
                }
            },
            "XRT": {
                "Datasets": ["ObservedFlux", "Density"],
                "ObservedFlux": dataset(&[100.0, 200.0], &[0, 0]),
                "Density": dataset(&[100.0], &[0])
            },
            "TarFile": "https://www.swift.ac.uk/burst_analyser/00221755/00221755.tar.gz"
        })
    }

    #[test]
    fn merges_and_flags() {
        let r = reply();
        let ba = BurstAnalyser::from_reply(
            Fields::new(r.as_object().unwrap(), "ba"),
            &BurstAnalyserOptions::default(),
        )
        .unwrap();
        let stems: Vec<String> = ba.tables().into_iter().map(|(s, _)| s).collect();
        assert_eq!(
            stems,
            [
                "BAT_SNR4_ObservedFlux",
                "BAT_TimeBins_4ms_ObservedFlux",
                "XRT_ObservedFlux",
                "XRT_Density"
            ]
        );

        let tables = ba.tables();
        let snr4 = tables[0].1;
        assert_eq!(snr4.bad_bin, [false, true, false]);
        assert_eq!(snr4.table.columns().len(), MERGED_COLUMNS.len());
        assert_eq!(snr4.table.value(0, "Gamma"), Some(1.5));
        // 10% flux error and 25% ECF error in quadrature.
        let with = snr4.table.value(0, "FluxPosWithECF").unwrap();
        assert!((with - 2e-9 * (0.1f64.powi(2) + 0.25f64.powi(2)).sqrt()).abs() < 1e-20);
        assert!(snr4.table.value(0, "FluxNegWithECF").unwrap() < 0.0);
        assert_eq!(ba.tar_file.as_deref().map(|u| u.ends_with(".tar.gz")), Some(true));
    }

    #[test]
    fn unmatched_times_are_nan() {
        let flux = Table::new(
            FLUX_COLUMNS.iter().map(|c| c.to_string()).collect(),
            vec![vec![5.0, 1.0, -1.0, 1.0, 0.1, -0.1]],
        )
        .unwrap();
        let gamma = Table::new(
            GAMMA_COLUMNS.iter().map(|c| c.to_string()).collect(),
            vec![vec![6.0, 2.0, 0.1, -0.1]],
        )
        .unwrap();
        let ecf = Table::new(
            ECF_COLUMNS.iter().map(|c| c.to_string()).collect(),
            vec![vec![5.0, 1.0, 0.0, 0.0]],
        )
        .unwrap();
        let m = merge(&flux, &gamma, &ecf, "x").unwrap();
        assert!(m.table.value(0, "Gamma").unwrap().is_nan());
        assert_eq!(m.table.value(0, "FluxPosWithECF"), Some(0.1));
        assert_eq!(m.bad_bin, [false]);
    }

    #[test]
    fn missing_columns_are_named() {
        let flux = Table::new(vec!["Time".into()], vec![]).unwrap();
        let err = merge(&flux, &flux, &flux, "BAT / SNR4 / ObservedFlux").unwrap_err();
        match err {
            Error::MissingKeys { context, keys } => {
                assert_eq!(context, "BAT / SNR4 / ObservedFlux / Flux columns");
                assert_eq!(keys, ["TimePos", "TimeNeg", "Flux", "FluxPos", "FluxNeg"]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn server_filters_are_mirrored_locally() {
        let r = reply();
        let opts = BurstAnalyserOptions {
            instruments: vec!["BAT".into()],
            bat_binning: Some(vec!["SNR4".into()]),
            ..Default::default()
        };
        let fields = Fields::new(r.as_object().unwrap(), "ba");
        let ba = BurstAnalyser::from_reply(fields, &opts).unwrap();
        assert_eq!(ba.instruments, ["BAT"]);
        assert_eq!(ba.tables().len(), 1);
    }

    #[test]
    fn rendering_switches() {
        let r = reply();
        let ba = BurstAnalyser::from_reply(
            Fields::new(r.as_object().unwrap(), "ba"),
            &BurstAnalyserOptions::default(),
        )
        .unwrap();
        let tables = ba.tables();
        let snr4 = tables[0].1;

        let mut opts = BurstAnalyserOptions::default();
        let text = render_ba_table(snr4, &opts).unwrap();
        assert_eq!(text.lines().count(), 1 + 2);
        assert!(text.lines().next().unwrap().ends_with("\tBadBin"));

        opts.bad_bat_bins = true;
        assert_eq!(render_ba_table(snr4, &opts).unwrap().lines().count(), 1 + 3);

        opts.format.as_qdp = true;
        let plain = render_ba_table(snr4, &opts).unwrap();
        assert!(plain.starts_with("READ TERR 1 2\n! Time"));
        assert!(plain.lines().nth(2).unwrap().ends_with("\t0.0000000002\t-0.0000000002"));

        opts.use_propagated_errors = true;
        let propagated = render_ba_table(snr4, &opts).unwrap();
        assert_ne!(plain, propagated);
    }

    #[test]
    fn deserialised_tables_are_checked() {
        let short_flags = json!({
            "columns": ["Time", "Flux"],
            "data": [[1.0, 2.0], [3.0, 4.0]],
            "BadBin": [false]
        });
        let err = serde_json::from_value::<BaTable>(short_flags).unwrap_err();
        assert!(err.to_string().contains("1 BadBin flag(s) for 2 row(s)"));

        let ragged = json!({"columns": ["Time"], "data": [[1.0, 2.0]], "BadBin": [false]});
        assert!(serde_json::from_value::<BaTable>(ragged).is_err());

        let time_only = json!({"columns": ["Time"], "data": [[1.0]], "BadBin": [false]});
        let time_only: BaTable = serde_json::from_value(time_only).unwrap();
        let mut opts = BurstAnalyserOptions::default();
        opts.format.as_qdp = true;
        match render_ba_table(&time_only, &opts).unwrap_err() {
            Error::MissingKeys { context, keys } => {
                assert_eq!(context, "burst analyser table columns");
                assert_eq!(keys, ["TimePos", "TimeNeg", "Flux", "FluxPos", "FluxNeg"]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
