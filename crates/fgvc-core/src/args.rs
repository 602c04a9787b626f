use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::collections::BTreeMap;

use crate::error::{FgvcError, Result};

/// Flat keyword arguments for a component constructor.
///
/// Config files write `ARGS` either as a list of single-key maps
/// (`[{pretrained: true}, {depth: 50}]`) or as a plain map. Both shapes end
/// up as one mapping; on duplicate keys the later entry wins.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawArgs", into = "BTreeMap<String, Value>")]
pub struct Args(BTreeMap<String, Value>);

#[derive(Deserialize)]
#[serde(untagged)]
enum RawArgs {
    Empty,
    Map(BTreeMap<String, Value>),
    List(Vec<BTreeMap<String, Value>>),
}

impl From<RawArgs> for Args {
    fn from(raw: RawArgs) -> Self {
        match raw {
            RawArgs::Empty => Args::default(),
            RawArgs::Map(map) => Args(map),
            RawArgs::List(items) => Args(items.into_iter().flatten().collect()),
        }
    }
}

impl From<Args> for BTreeMap<String, Value> {
    fn from(args: Args) -> Self {
        args.0
    }
}

impl From<BTreeMap<String, Value>> for Args {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Args(map)
    }
}

impl Args {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.get(key).map_or(false, |v| !v.is_null())
    }

    pub fn raw(&self, key: &str) -> Option<&Value> {
        self.0.get(key).filter(|v| !v.is_null())
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn f64(&self, component: &str, key: &str) -> Result<Option<f64>> {
        match self.raw(key) {
            None => Ok(None),
            Some(v) => v
                .as_f64()
                .map(Some)
                .ok_or_else(|| invalid(component, key, "expected a number")),
        }
    }

    pub fn i64(&self, component: &str, key: &str) -> Result<Option<i64>> {
        match self.raw(key) {
            None => Ok(None),
            Some(v) => v
                .as_i64()
                .map(Some)
                .ok_or_else(|| invalid(component, key, "expected an integer")),
        }
    }

    pub fn bool(&self, component: &str, key: &str) -> Result<Option<bool>> {
        match self.raw(key) {
            None => Ok(None),
            Some(v) => v
                .as_bool()
                .map(Some)
                .ok_or_else(|| invalid(component, key, "expected true or false")),
        }
    }

    pub fn str(&self, component: &str, key: &str) -> Result<Option<&str>> {
        match self.raw(key) {
            None => Ok(None),
            Some(v) => v
                .as_str()
                .map(Some)
                .ok_or_else(|| invalid(component, key, "expected a string")),
        }
    }

    pub fn f64_list(&self, component: &str, key: &str) -> Result<Option<Vec<f64>>> {
        match self.raw(key) {
            None => Ok(None),
            Some(Value::Sequence(items)) => items
                .iter()
                .map(|v| v.as_f64().ok_or_else(|| invalid(component, key, "expected a list of numbers")))
                .collect::<Result<Vec<_>>>()
                .map(Some),
            Some(_) => Err(invalid(component, key, "expected a list of numbers")),
        }
    }

    /// Reads an image size given either as `n` or `[height, width]`.
    pub fn size(&self, component: &str, key: &str) -> Result<Option<(u32, u32)>> {
        let to_u32 = |v: &Value| {
            v.as_u64()
                .filter(|&n| n > 0 && n <= u32::MAX as u64)
                .map(|n| n as u32)
                .ok_or_else(|| invalid(component, key, "expected a positive integer size"))
        };
        match self.raw(key) {
            None => Ok(None),
            Some(Value::Sequence(items)) if items.len() == 2 => {
                Ok(Some((to_u32(&items[0])?, to_u32(&items[1])?)))
            }
            Some(Value::Sequence(_)) => Err(invalid(component, key, "expected [height, width]")),
            Some(v) => {
                let n = to_u32(v)?;
                Ok(Some((n, n)))
            }
        }
    }

    pub fn require_f64(&self, component: &str, key: &str) -> Result<f64> {
        self.f64(component, key)?.ok_or_else(|| missing(component, key))
    }

    pub fn require_i64(&self, component: &str, key: &str) -> Result<i64> {
        self.i64(component, key)?.ok_or_else(|| missing(component, key))
    }

    pub fn require_size(&self, component: &str, key: &str) -> Result<(u32, u32)> {
        self.size(component, key)?.ok_or_else(|| missing(component, key))
    }

    pub fn require_f64_list(&self, component: &str, key: &str) -> Result<Vec<f64>> {
        self.f64_list(component, key)?.ok_or_else(|| missing(component, key))
    }
}

fn missing(component: &str, key: &str) -> FgvcError {
    FgvcError::MissingArg {
        component: component.to_string(),
        key: key.to_string(),
    }
}

fn invalid(component: &str, key: &str, reason: &str) -> FgvcError {
    FgvcError::InvalidArg {
        component: component.to_string(),
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_of_maps_is_flattened() {
        let args: Args = serde_yaml::from_str("[{depth: 50}, {pretrained: true}]").unwrap();
        assert_eq!(args.i64("backbone", "depth").unwrap(), Some(50));
        assert_eq!(args.bool("backbone", "pretrained").unwrap(), Some(true));
    }

    #[test]
    fn plain_map_and_null_are_accepted() {
        let args: Args = serde_yaml::from_str("smoothing: 0.1").unwrap();
        assert_eq!(args.f64("criterion", "smoothing").unwrap(), Some(0.1));

        let empty: Args = serde_yaml::from_str("~").unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn size_accepts_scalar_and_pair() {
        let args = Args::new()
            .with("a", 224)
            .with("b", Value::Sequence(vec![Value::from(448), Value::from(512)]));
        assert_eq!(args.size("resize", "a").unwrap(), Some((224, 224)));
        assert_eq!(args.size("resize", "b").unwrap(), Some((448, 512)));
        assert!(args.require_size("resize", "c").is_err());
    }

    #[test]
    fn wrong_type_is_reported() {
        let args = Args::new().with("momentum", "fast");
        let err = args.f64("sgd", "momentum").unwrap_err();
        assert!(matches!(err, FgvcError::InvalidArg { .. }));
    }
}
