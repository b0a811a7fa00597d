// Serde deserializers for the benchmark YAML
// Durations may be written as plain seconds (fio's unit) or humantime strings,
// and the workload table must keep the order it was declared in.

use serde::de::{Error as _, MapAccess, Visitor};
use serde::{Deserialize, Deserializer};
use std::fmt;
use std::marker::PhantomData;
use std::time::Duration;

#[derive(Deserialize)]
#[serde(untagged)]
enum SecsValue {
    Number(u64),
    Text(String),
}

impl SecsValue {
    fn into_secs(self) -> Result<u64, String> {
        match self {
            SecsValue::Number(n) => Ok(n),
            SecsValue::Text(s) => match s.trim().parse::<u64>() {
                Ok(n) => Ok(n),
                Err(_) => humantime::parse_duration(s.trim())
                    .map(|d| d.as_secs())
                    .map_err(|e| format!("Invalid duration '{}': {}", s, e)),
            },
        }
    }
}

/// Deserialize an optional whole-second value
/// Examples: 300, "300", "5m", "1h 30s"
pub fn deserialize_opt_secs<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<SecsValue>::deserialize(deserializer)? {
        None => Ok(None),
        Some(v) => v.into_secs().map(Some).map_err(D::Error::custom),
    }
}

/// Deserialize a [`Duration`] from seconds or a humantime string
pub fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    SecsValue::deserialize(deserializer)?
        .into_secs()
        .map(Duration::from_secs)
        .map_err(D::Error::custom)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(u32),
    Many(Vec<u32>),
}

/// Deserialize a sweep array, accepting a bare scalar as a one-element list
pub fn deserialize_opt_sweep<'de, D>(deserializer: D) -> Result<Option<Vec<u32>>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<OneOrMany>::deserialize(deserializer)?.map(|v| match v {
        OneOrMany::One(n) => vec![n],
        OneOrMany::Many(list) => list,
    }))
}

struct OrderedMapVisitor<V>(PhantomData<V>);

impl<'de, V> Visitor<'de> for OrderedMapVisitor<V>
where
    V: Deserialize<'de>,
{
    type Value = Vec<(String, V)>;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a mapping of names to entries")
    }

    fn visit_unit<E>(self) -> Result<Self::Value, E> {
        Ok(Vec::new())
    }

    fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
    where
        A: MapAccess<'de>,
    {
        let mut entries: Vec<(String, V)> = Vec::with_capacity(map.size_hint().unwrap_or(0));
        while let Some((name, value)) = map.next_entry::<String, V>()? {
            if entries.iter().any(|(existing, _)| existing == &name) {
                return Err(A::Error::custom(format!("duplicate entry '{}'", name)));
            }
            entries.push((name, value));
        }
        Ok(entries)
    }
}

/// Deserialize a YAML mapping into a Vec that keeps declaration order
pub fn deserialize_ordered_map<'de, D, V>(deserializer: D) -> Result<Vec<(String, V)>, D::Error>
where
    D: Deserializer<'de>,
    V: Deserialize<'de>,
{
    deserializer.deserialize_map(OrderedMapVisitor(PhantomData))
}
