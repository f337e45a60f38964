use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::table::Table;

/// Validates the reply envelope shared by every API call.
///
/// `OK: 1` is success; `OK: 0` carries `ERROR`, and `NOTFOUND: 1` marks an
/// identifier the server could not resolve.
pub(crate) fn check_envelope(api: &str, subject: &str, reply: Value) -> Result<Map<String, Value>> {
    let Value::Object(map) = reply else {
        return Err(Error::malformed(
            format!("{api} reply"),
            "expected a JSON object",
        ));
    };

    if truthy(map.get("OK")) {
        return Ok(map);
    }

    let message = map
        .get("ERROR")
        .and_then(Value::as_str)
        .unwrap_or("reply carries neither OK nor ERROR")
        .to_string();

    if truthy(map.get("NOTFOUND")) {
        return Err(Error::UnknownObject(format!("{subject} ({message})")));
    }

    Err(Error::Api {
        api: api.to_string(),
        message,
    })
}

fn truthy(v: Option<&Value>) -> bool {
    match v {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|x| x != 0.0),
        Some(Value::String(s)) => matches!(s.as_str(), "1" | "true" | "True"),
        _ => false,
    }
}

/// Typed, key-checked view of one JSON object in a reply.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Fields<'a> {
    map: &'a Map<String, Value>,
    context: &'a str,
}

impl<'a> Fields<'a> {
    pub(crate) fn new(map: &'a Map<String, Value>, context: &'a str) -> Self {
        Self { map, context }
    }

    pub(crate) fn context(&self) -> &'a str {
        self.context
    }

    pub(crate) fn contains(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }

    /// Fails with every key in `keys` that is absent.
    pub(crate) fn require<S: AsRef<str>>(&self, keys: &[S]) -> Result<()> {
        let missing: Vec<String> = keys
            .iter()
            .map(|k| k.as_ref())
            .filter(|k| !self.map.contains_key(*k))
            .map(str::to_string)
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::MissingKeys {
                context: self.context.to_string(),
                keys: missing,
            })
        }
    }

    fn get(&self, key: &str) -> Result<&'a Value> {
        self.map.get(key).ok_or_else(|| Error::MissingKeys {
            context: self.context.to_string(),
            keys: vec![key.to_string()],
        })
    }

    pub(crate) fn str(&self, key: &str) -> Result<&'a str> {
        self.get(key)?
            .as_str()
            .ok_or_else(|| self.wrong_type(key, "a string"))
    }

    pub(crate) fn opt_str(&self, key: &str) -> Result<Option<&'a str>> {
        match self.map.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) if s.is_empty() => Ok(None),
            Some(Value::String(s)) => Ok(Some(s)),
            Some(_) => Err(self.wrong_type(key, "a string")),
        }
    }

    pub(crate) fn f64(&self, key: &str) -> Result<f64> {
        number(self.get(key)?).ok_or_else(|| self.wrong_type(key, "a number"))
    }

    /// Absent, `null` and empty-string values all read as `None`.
    pub(crate) fn opt_f64(&self, key: &str) -> Result<Option<f64>> {
        match self.map.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
            Some(v) => number(v)
                .map(Some)
                .ok_or_else(|| self.wrong_type(key, "a number")),
        }
    }

    pub(crate) fn i64(&self, key: &str) -> Result<i64> {
        let v = self.get(key)?;
        v.as_i64()
            .or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
            .ok_or_else(|| self.wrong_type(key, "an integer"))
    }

    pub(crate) fn str_list(&self, key: &str) -> Result<Vec<String>> {
        let Value::Array(items) = self.get(key)? else {
            return Err(self.wrong_type(key, "a list of strings"));
        };
        items
            .iter()
            .map(|v| {
                v.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| self.wrong_type(key, "a list of strings"))
            })
            .collect()
    }

    pub(crate) fn list(&self, key: &str) -> Result<&'a Vec<Value>> {
        match self.get(key)? {
            Value::Array(items) => Ok(items),
            _ => Err(self.wrong_type(key, "a list")),
        }
    }

    pub(crate) fn object(&self, key: &str) -> Result<&'a Map<String, Value>> {
        match self.get(key)? {
            Value::Object(map) => Ok(map),
            _ => Err(self.wrong_type(key, "an object")),
        }
    }

    pub(crate) fn table(&self, key: &str) -> Result<Table> {
        let context = format!("{} / {}", self.context, key);
        Table::from_wire(self.get(key)?, &context)
    }

    fn wrong_type(&self, key: &str, expected: &str) -> Error {
        Error::malformed(self.context, format!("{key} is not {expected}"))
    }
}

pub(crate) fn number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Null => Some(f64::NAN),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ok_envelope_passes() {
        let map = check_envelope("getPositions", "GRB 1", json!({"OK": 1, "x": 2})).unwrap();
        assert_eq!(map["x"], 2);
    }

    #[test]
    fn not_found_names_the_subject() {
        let err = check_envelope(
            "getLightCurve",
            "GRB 991231Z",
            json!({"OK": 0, "ERROR": "Unknown GRB", "NOTFOUND": 1}),
        )
        .unwrap_err();
        match err {
            Error::UnknownObject(m) => assert!(m.starts_with("GRB 991231Z")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn server_error_is_reported() {
        let err = check_envelope("cancelJob", "job", json!({"OK": 0, "ERROR": "bad"})).unwrap_err();
        assert!(matches!(err, Error::Api { ref message, .. } if message == "bad"));
        assert!(check_envelope("x", "y", json!([1, 2])).is_err());
    }

    #[test]
    fn require_reports_all_missing() {
        let map = json!({"T0": 1.0}).as_object().cloned().unwrap();
        let f = Fields::new(&map, "light curve");
        let err = f.require(&["T0", "Binning", "Datasets"]).unwrap_err();
        match err {
            Error::MissingKeys { keys, .. } => assert_eq!(keys, ["Binning", "Datasets"]),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn optional_numbers() {
        let map = json!({"a": null, "b": "", "c": "1.5", "d": 2, "e": [1]})
            .as_object()
            .cloned()
            .unwrap();
        let f = Fields::new(&map, "positions");
        assert_eq!(f.opt_f64("a").unwrap(), None);
        assert_eq!(f.opt_f64("b").unwrap(), None);
        assert_eq!(f.opt_f64("c").unwrap(), Some(1.5));
        assert_eq!(f.opt_f64("d").unwrap(), Some(2.0));
        assert_eq!(f.opt_f64("missing").unwrap(), None);
        assert!(f.opt_f64("e").is_err());
    }
}
