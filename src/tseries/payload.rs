use std::{
    collections::BTreeMap,
    fmt,
    ops::{Deref, DerefMut},
};

use serde::{Deserialize, Serialize};

use super::error::SeriesError;

/// Measurement values of one reading, keyed by short field name (`t`, `h`, `p`, ...).
///
/// There is no fixed field set. Stored as a JSON object so readings with
/// different keys can share the table without any migration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(BTreeMap<String, f64>);

impl Payload {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: f64) -> Self {
        self.0.insert(key.into(), value);
        self
    }

    /// Adds every field of `other`, replacing fields already present.
    pub fn merge(&mut self, other: Payload) {
        self.0.extend(other.0);
    }

    pub fn into_inner(self) -> BTreeMap<String, f64> {
        self.0
    }

    pub fn encode(&self) -> Result<String, SeriesError> {
        // JSON has no representation for NaN or infinity
        if let Some((key, _)) = self.0.iter().find(|(_, v)| !v.is_finite()) {
            return Err(SeriesError::NonFiniteValue(key.clone()));
        }
        serde_json::to_string(&self.0).map_err(SeriesError::Encode)
    }

    pub fn decode(timestamp: f64, raw: impl AsRef<[u8]>) -> Result<Self, SeriesError> {
        serde_json::from_slice(raw.as_ref())
            .map_err(|source| SeriesError::CorruptRecord { timestamp, source })
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (key, value) in &self.0 {
            if !first {
                f.write_str(" ")?;
            }
            write!(f, "{key}={value}")?;
            first = false;
        }
        Ok(())
    }
}

impl Deref for Payload {
    type Target = BTreeMap<String, f64>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for Payload {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl From<BTreeMap<String, f64>> for Payload {
    fn from(value: BTreeMap<String, f64>) -> Self {
        Self(value)
    }
}

impl<K: Into<String>> FromIterator<(K, f64)> for Payload {
    fn from_iter<I: IntoIterator<Item = (K, f64)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}
