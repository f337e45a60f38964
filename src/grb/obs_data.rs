use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::client::Client;
use crate::error::{Error, Result};
use crate::ident::{Fetched, GrbId, Objects};
use crate::options::{ObsDataOptions, keep};
use crate::reply::Fields;
use crate::save::Layout;
use crate::transport::Transport;
use crate::util::{guess_filename_from_url, is_contained, path_component};

/// One archived file of an observation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObsFile {
    pub url: String,
    /// Path relative to the observation directory, e.g. `xrt/event/sw...evt.gz`.
    pub path: String,
    /// Where the file was written, if it was downloaded.
    pub local: Option<PathBuf>,
}

impl ObsFile {
    /// The top-level directory of the file, which names the instrument.
    pub fn instrument(&self) -> &str {
        self.path.split('/').next().unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    #[serde(rename = "ObsID")]
    pub obs_id: String,
    #[serde(rename = "Files")]
    pub files: Vec<ObsFile>,
}

/// The observations of one object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObsData {
    #[serde(rename = "ObsData")]
    pub observations: Vec<Observation>,
}

impl ObsData {
    pub fn files(&self) -> impl Iterator<Item = (&str, &ObsFile)> {
        self.observations
            .iter()
            .flat_map(|o| o.files.iter().map(move |f| (o.obs_id.as_str(), f)))
    }

    pub(crate) fn from_reply(f: Fields<'_>, instruments: Option<&[String]>) -> Result<Self> {
        f.require(&["ObsData"])?;
        let mut observations = Vec::new();
        for (i, entry) in f.list("ObsData")?.iter().enumerate() {
            let context = format!("{} / ObsData[{i}]", f.context());
            let Value::Object(map) = entry else {
                return Err(Error::malformed(context, "expected an object"));
            };
            let obs = Fields::new(map, &context);
            obs.require(&["ObsID", "Files"])?;
            let obs_id = match &map["ObsID"] {
                Value::Number(n) => n.to_string(),
                _ => obs.str("ObsID")?.to_string(),
            };

            let mut files = Vec::new();
            for (j, file) in obs.list("Files")?.iter().enumerate() {
                let file_context = format!("{context} / Files[{j}]");
                let Value::Object(fmap) = file else {
                    return Err(Error::malformed(file_context, "expected an object"));
                };
                let ff = Fields::new(fmap, &file_context);
                ff.require(&["url"])?;
                let url = ff.str("url")?.to_string();
                let path = match ff.opt_str("path")? {
                    Some(p) => p.trim_start_matches("./").to_string(),
                    None => guess_filename_from_url(&url).ok_or_else(|| {
                        Error::malformed(&file_context, "no path and no file name in url")
                    })?,
                };
                if !is_contained(&path) {
                    return Err(Error::malformed(
                        &file_context,
                        format!("path {path:?} leaves the observation directory"),
                    ));
                }
                let file = ObsFile {
                    url,
                    path,
                    local: None,
                };
                if keep(instruments, file.instrument()) {
                    files.push(file);
                }
            }
            observations.push(Observation { obs_id, files });
        }
        Ok(Self { observations })
    }
}

impl<T: Transport> Client<T> {
    fn obs_data_for(&self, id: &GrbId, opts: &ObsDataOptions) -> Result<ObsData> {
        let reply = self.call_for("getObsData", id, Map::new())?;
        let context = format!("observation data of {id}");
        ObsData::from_reply(Fields::new(&reply, &context), opts.instruments.as_deref())
    }

    /// Lists and downloads the archived observation files of one or more
    /// GRBs into `<dest>/<obsid>/<path>`.
    ///
    /// The returned data records where each file was written.
    pub fn get_obs_data(
        &self,
        objects: &Objects,
        opts: &ObsDataOptions,
    ) -> Result<Option<Fetched<ObsData>>> {
        opts.validate()?;
        let selection = objects.resolve()?;

        let fetched = selection.fan_out(opts.output.skip_errors, |id, key| {
            opts.output.note(format_args!("getting observation data of {id}"));
            let mut data = self.obs_data_for(id, opts)?;
            if opts.output.save_data {
                let layout = Layout::new(&opts.output, key);
                for obs in &mut data.observations {
                    let dir = path_component(&obs.obs_id);
                    for file in &mut obs.files {
                        let target = layout.prepare(&format!("{dir}/{}", file.path))?;
                        self.download(&file.url, &target, opts.output.progress())?;
                        file.local = Some(target);
                    }
                }
            }
            Ok(data)
        })?;

        Ok(opts.output.return_data.then_some(fetched))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn reply() -> Value {
        json!({
            "OK": 1,
            "ObsData": [
                {"ObsID": "00221755000", "Files": [
                    {"url": "https://x/00221755000/xrt/event/a.evt.gz",
                     "path": "xrt/event/a.evt.gz"},
                    {"url": "https://x/00221755000/bat/rate/b.lc.gz", "path": "bat/rate/b.lc.gz"},
                    {"url": "https://x/00221755000/auxil/c.att.gz", "path": "./auxil/c.att.gz"}
                ]},
                {"ObsID": 221755001, "Files": [
                    {"url": "https://x/00221755001/xrt/d.evt.gz"}
                ]}
            ]
        })
    }

    #[test]
    fn parses_and_filters_by_instrument() {
        let r = reply();
        let filter = vec!["xrt".to_string(), "auxil".to_string()];
        let d = ObsData::from_reply(
            Fields::new(r.as_object().unwrap(), "obs"),
            Some(filter.as_slice()),
        )
        .unwrap();
        let paths: Vec<&str> = d.files().map(|(_, f)| f.path.as_str()).collect();
        assert_eq!(paths, ["xrt/event/a.evt.gz", "auxil/c.att.gz"]);
        assert_eq!(d.observations[1].obs_id, "221755001");
        assert!(d.observations[1].files.is_empty());
    }

    #[test]
    fn file_name_falls_back_to_url() {
        let r = reply();
        let d = ObsData::from_reply(Fields::new(r.as_object().unwrap(), "obs"), None).unwrap();
        assert_eq!(d.observations[1].files[0].path, "d.evt.gz");
        assert_eq!(d.files().count(), 4);
    }

    #[test]
    fn escaping_paths_are_rejected() {
        let r = json!({"OK": 1, "ObsData": [
            {"ObsID": "1", "Files": [{"url": "https://x/a", "path": "../../etc/passwd"}]}
        ]});
        let err =
            ObsData::from_reply(Fields::new(r.as_object().unwrap(), "obs"), None).unwrap_err();
        assert!(matches!(err, Error::Malformed { .. }));
    }
}
