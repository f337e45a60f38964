use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::ident::GrbId;
use crate::options::{OutputOptions, SaveFormat};
use crate::table::Table;

/// Where one object's files go.
///
/// - scalar request: `<dest>/<file>`
/// - collection with `sub_dirs`: `<dest>/<id>/<file>`
/// - collection without: `<dest>/<id>_<file>`
#[derive(Debug, Clone)]
pub(crate) struct Layout {
    dest: PathBuf,
    prefix: Option<String>,
    sub_dirs: bool,
    clobber: bool,
}

impl Layout {
    pub(crate) fn new(out: &OutputOptions, key: Option<&GrbId>) -> Self {
        Self {
            dest: out.dest_dir.clone(),
            prefix: key.map(GrbId::path_component),
            sub_dirs: out.sub_dirs,
            clobber: out.clobber,
        }
    }

    /// The directory holding this object's files.
    pub(crate) fn dir(&self) -> PathBuf {
        match (&self.prefix, self.sub_dirs) {
            (Some(p), true) => self.dest.join(p),
            _ => self.dest.clone(),
        }
    }

    pub(crate) fn clobber(&self) -> bool {
        self.clobber
    }

    pub(crate) fn path(&self, file: &str) -> PathBuf {
        match (&self.prefix, self.sub_dirs) {
            (Some(p), false) => self.dest.join(format!("{p}_{file}")),
            _ => self.dir().join(file),
        }
    }

    /// Resolves `file`, refusing to overwrite unless clobbering, and creates
    /// its parent directory.
    pub(crate) fn prepare(&self, file: &str) -> Result<PathBuf> {
        let path = self.path(file);
        prepare_path(&path, self.clobber)?;
        Ok(path)
    }

    pub(crate) fn write(&self, file: &str, contents: &str) -> Result<PathBuf> {
        let path = self.prepare(file)?;
        std::fs::write(&path, contents).map_err(|e| Error::io(&path, e))?;
        log::debug!("wrote {}", path.display());
        Ok(path)
    }
}

pub(crate) fn prepare_path(path: &Path, clobber: bool) -> Result<()> {
    if path.exists() && !clobber {
        return Err(Error::FileExists(path.to_path_buf()));
    }
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }
    }
    Ok(())
}

/// Renders a table as delimited text or, with `as_qdp`, as a QDP file.
pub(crate) fn render_table(table: &Table, format: &SaveFormat) -> String {
    if format.as_qdp {
        render_qdp(table, format.header)
    } else {
        render_delimited(table, &format.sep, format.header)
    }
}

fn render_delimited(table: &Table, sep: &str, header: bool) -> String {
    let mut out = String::new();
    if header {
        out.push_str(&table.columns().join(sep));
        out.push('\n');
    }
    for row in table.rows() {
        push_row(&mut out, row, sep, "NaN");
    }
    out
}

/// QDP output: a `READ TERR` line naming every vector that is followed by
/// its `Pos`/`Neg` columns, an optional `!` header, then whitespace-separated
/// rows with `NO` for missing values.
fn render_qdp(table: &Table, header: bool) -> String {
    let cols = table.columns();
    let mut terr = Vec::new();
    let mut vector = 0usize;
    let mut i = 0usize;
    while i < cols.len() {
        vector += 1;
        let name = &cols[i];
        let has_errors = cols.get(i + 1) == Some(&format!("{name}Pos"))
            && cols.get(i + 2) == Some(&format!("{name}Neg"));
        if has_errors {
            terr.push(vector.to_string());
            i += 3;
        } else {
            i += 1;
        }
    }

    let mut out = String::new();
    if !terr.is_empty() {
        let _ = writeln!(out, "READ TERR {}", terr.join(" "));
    }
    if header {
        let _ = writeln!(out, "! {}", cols.join("\t"));
    }
    for row in table.rows() {
        push_row(&mut out, row, "\t", "NO");
    }
    out
}

fn push_row(out: &mut String, row: &[f64], sep: &str, missing: &str) {
    for (i, v) in row.iter().enumerate() {
        if i > 0 {
            out.push_str(sep);
        }
        if v.is_nan() {
            out.push_str(missing);
        } else {
            let _ = write!(out, "{v}");
        }
    }
    out.push('\n');
}

/// Column indices of the plot-ready QDP view of a light-curve style table:
/// the time triple followed by the first value column and its errors.
pub(crate) fn qdp_view(table: &Table) -> Vec<usize> {
    let cols = table.columns();
    let mut picked: Vec<usize> = ["Time", "TimePos", "TimeNeg"]
        .iter()
        .filter_map(|c| table.column_index(c))
        .collect();

    let value = cols.iter().enumerate().find(|(i, c)| {
        !picked.contains(i) && !c.ends_with("Pos") && !c.ends_with("Neg") && *c != "BadBin"
    });
    if let Some((i, name)) = value {
        picked.push(i);
        for suffix in ["Pos", "Neg"] {
            if let Some(j) = table.column_index(&format!("{name}{suffix}")) {
                picked.push(j);
            }
        }
    }
    picked
}
