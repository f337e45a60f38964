//! Object identifiers and the scalar/collection result shape.
//!
//! Callers name GRBs either by name or by Swift target ID, singly or as an
//! ordered collection. A scalar request yields [`Fetched::Single`]; any
//! collection, including a one-element one, yields [`Fetched::Keyed`] with
//! keys exactly as supplied and in the same order.

use std::fmt;

use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::util::path_component;

/// A single GRB identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GrbId {
    Name(String),
    TargetId(u64),
}

impl GrbId {
    /// Adds the identifier to an API request body.
    pub(crate) fn add_to(&self, params: &mut Map<String, Value>) {
        match self {
            GrbId::Name(name) => params.insert("GRBName".into(), Value::from(name.as_str())),
            GrbId::TargetId(id) => params.insert("targetID".into(), Value::from(*id)),
        };
    }

    /// Form used for per-object directories and filename prefixes.
    pub fn path_component(&self) -> String {
        path_component(&self.to_string())
    }
}

impl fmt::Display for GrbId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GrbId::Name(name) => f.write_str(name),
            GrbId::TargetId(id) => write!(f, "{id}"),
        }
    }
}

/// A scalar value or an ordered collection of values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

/// The objects a request is about: GRB name(s) or target ID(s), never both.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Objects {
    #[serde(default, rename = "GRBName", skip_serializing_if = "Option::is_none")]
    pub grb_name: Option<OneOrMany<String>>,
    #[serde(default, rename = "targetID", skip_serializing_if = "Option::is_none")]
    pub target_id: Option<OneOrMany<u64>>,
}

impl Objects {
    pub fn name(name: impl Into<String>) -> Self {
        Self {
            grb_name: Some(OneOrMany::One(name.into())),
            target_id: None,
        }
    }

    pub fn names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            grb_name: Some(OneOrMany::Many(names.into_iter().map(Into::into).collect())),
            target_id: None,
        }
    }

    pub fn target_id(id: u64) -> Self {
        Self {
            grb_name: None,
            target_id: Some(OneOrMany::One(id)),
        }
    }

    pub fn target_ids(ids: impl IntoIterator<Item = u64>) -> Self {
        Self {
            grb_name: None,
            target_id: Some(OneOrMany::Many(ids.into_iter().collect())),
        }
    }

    /// Validates the name-XOR-ID contract and fixes the result shape.
    pub fn resolve(&self) -> Result<Selection> {
        let selection = match (&self.grb_name, &self.target_id) {
            (Some(_), Some(_)) => {
                return Err(Error::InvalidRequest(
                    "supply GRBName or targetID, not both".into(),
                ));
            }
            (None, None) => {
                return Err(Error::InvalidRequest(
                    "one of GRBName or targetID is required".into(),
                ));
            }
            (Some(OneOrMany::One(name)), None) => Selection::Single(GrbId::Name(name.clone())),
            (Some(OneOrMany::Many(names)), None) => {
                Selection::Many(names.iter().cloned().map(GrbId::Name).collect())
            }
            (None, Some(OneOrMany::One(id))) => Selection::Single(GrbId::TargetId(*id)),
            (None, Some(OneOrMany::Many(ids))) => {
                Selection::Many(ids.iter().copied().map(GrbId::TargetId).collect())
            }
        };

        match &selection {
            Selection::Single(GrbId::Name(name)) if name.trim().is_empty() => {
                Err(Error::InvalidRequest("GRBName must not be empty".into()))
            }
            Selection::Many(ids) if ids.is_empty() => Err(Error::InvalidRequest(
                "the identifier collection is empty".into(),
            )),
            Selection::Many(ids) => {
                for (i, id) in ids.iter().enumerate() {
                    if matches!(id, GrbId::Name(n) if n.trim().is_empty()) {
                        return Err(Error::InvalidRequest("GRBName must not be empty".into()));
                    }
                    if ids[..i].contains(id) {
                        return Err(Error::InvalidRequest(format!(
                            "identifier {id} supplied more than once"
                        )));
                    }
                }
                Ok(selection)
            }
            Selection::Single(_) => Ok(selection),
        }
    }
}

/// A validated request target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    Single(GrbId),
    Many(Vec<GrbId>),
}

impl Selection {
    pub fn is_collection(&self) -> bool {
        matches!(self, Selection::Many(_))
    }

    pub fn ids(&self) -> &[GrbId] {
        match self {
            Selection::Single(id) => std::slice::from_ref(id),
            Selection::Many(ids) => ids,
        }
    }

    /// Runs `f` once per object, strictly in order.
    ///
    /// `f` receives the identifier and, for collections only, the same
    /// identifier again as the output-layout key. In a collection a failure
    /// either aborts the batch or, with `skip_errors`, is logged and the object
    /// left out of the result.
    pub(crate) fn fan_out<T, F>(&self, skip_errors: bool, mut f: F) -> Result<Fetched<T>>
    where
        F: FnMut(&GrbId, Option<&GrbId>) -> Result<T>,
    {
        match self {
            Selection::Single(id) => f(id, None).map(Fetched::Single),
            Selection::Many(ids) => {
                let mut keyed = Keyed::with_capacity(ids.len());
                for id in ids {
                    match f(id, Some(id)) {
                        Ok(v) => keyed.push(id.clone(), v),
                        Err(e) if skip_errors => {
                            log::warn!("skipping {id}: {e}");
                        }
                        Err(e) => {
                            return Err(Error::ForObject {
                                id: id.to_string(),
                                source: Box::new(e),
                            });
                        }
                    }
                }
                Ok(Fetched::Keyed(keyed))
            }
        }
    }
}

/// Results keyed by identifier, in request order.
#[derive(Debug, Clone, PartialEq)]
pub struct Keyed<T> {
    entries: Vec<(GrbId, T)>,
}

impl<T> Default for Keyed<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<T> Keyed<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(n: usize) -> Self {
        Self {
            entries: Vec::with_capacity(n),
        }
    }

    /// Appends an entry, replacing any existing value under the same key in place.
    pub fn push(&mut self, id: GrbId, value: T) {
        match self.entries.iter_mut().find(|(k, _)| *k == id) {
            Some(slot) => slot.1 = value,
            None => self.entries.push((id, value)),
        }
    }

    pub fn get(&self, id: &GrbId) -> Option<&T> {
        self.entries.iter().find(|(k, _)| k == id).map(|(_, v)| v)
    }

    /// Looks an entry up by its display form, e.g. `"GRB 060729"` or `"221755"`.
    pub fn get_str(&self, key: &str) -> Option<&T> {
        self.entries
            .iter()
            .find(|(k, _)| k.to_string() == key)
            .map(|(_, v)| v)
    }

    pub fn keys(&self) -> impl Iterator<Item = &GrbId> {
        self.entries.iter().map(|(k, _)| k)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&GrbId, &T)> {
        self.entries.iter().map(|(k, v)| (k, v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T> IntoIterator for Keyed<T> {
    type Item = (GrbId, T);
    type IntoIter = std::vec::IntoIter<(GrbId, T)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl<T> FromIterator<(GrbId, T)> for Keyed<T> {
    fn from_iter<I: IntoIterator<Item = (GrbId, T)>>(iter: I) -> Self {
        let mut keyed = Keyed::new();
        for (k, v) in iter {
            keyed.push(k, v);
        }
        keyed
    }
}

impl<T: Serialize> Serialize for Keyed<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(&k.to_string(), v)?;
        }
        map.end()
    }
}

/// The result of a per-object operation: unwrapped for a scalar identifier,
/// keyed for a collection.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Fetched<T> {
    Single(T),
    Keyed(Keyed<T>),
}

impl<T> Fetched<T> {
    pub fn as_single(&self) -> Option<&T> {
        match self {
            Fetched::Single(v) => Some(v),
            Fetched::Keyed(_) => None,
        }
    }

    pub fn into_single(self) -> Option<T> {
        match self {
            Fetched::Single(v) => Some(v),
            Fetched::Keyed(_) => None,
        }
    }

    pub fn as_keyed(&self) -> Option<&Keyed<T>> {
        match self {
            Fetched::Single(_) => None,
            Fetched::Keyed(k) => Some(k),
        }
    }

    /// Every value with its layout key (`None` for a scalar result).
    pub fn entries(&self) -> Vec<(Option<&GrbId>, &T)> {
        match self {
            Fetched::Single(v) => vec![(None, v)],
            Fetched::Keyed(k) => k.iter().map(|(id, v)| (Some(id), v)).collect(),
        }
    }

    pub fn map<U, F: FnMut(T) -> U>(self, mut f: F) -> Fetched<U> {
        match self {
            Fetched::Single(v) => Fetched::Single(f(v)),
            Fetched::Keyed(k) => Fetched::Keyed(k.into_iter().map(|(id, v)| (id, f(v))).collect()),
        }
    }
}
