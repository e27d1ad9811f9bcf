use crate::error::{OrchestratorError, Result};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;
use std::marker::PhantomData;

/// A typed key into a [`FlightMap`].
///
/// The type parameter fixes what a key can hold, so steps never cast values by hand.
pub struct FlightKey<T> {
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> FlightKey<T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> Clone for FlightKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for FlightKey<T> {}

impl<T> std::fmt::Debug for FlightKey<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "FlightKey({})", self.name)
    }
}

/// Ordered key/value scratch space persisted with a flight.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlightMap {
    entries: BTreeMap<String, serde_json::Value>,
}

impl FlightMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put<T: Serialize>(&mut self, key: &FlightKey<T>, value: &T) -> Result<()> {
        self.entries
            .insert(key.name.to_string(), serde_json::to_value(value)?);
        Ok(())
    }

    /// Builder form of [`FlightMap::put`].
    pub fn with<T: Serialize>(mut self, key: &FlightKey<T>, value: &T) -> Result<Self> {
        self.put(key, value)?;
        Ok(self)
    }

    pub fn get<T: DeserializeOwned>(&self, key: &FlightKey<T>) -> Result<Option<T>> {
        match self.entries.get(key.name) {
            None | Some(serde_json::Value::Null) => Ok(None),
            Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
        }
    }

    /// Fetch a value the flight cannot run without.
    pub fn require<T: DeserializeOwned>(&self, key: &FlightKey<T>) -> Result<T> {
        self.get(key)?.ok_or_else(|| {
            OrchestratorError::InternalLogic(format!("Missing required flight map key {}", key.name))
        })
    }

    pub fn contains<T>(&self, key: &FlightKey<T>) -> bool {
        self.entries.contains_key(key.name)
    }

    pub fn remove<T>(&mut self, key: &FlightKey<T>) {
        self.entries.remove(key.name);
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.entries)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(Self {
            entries: serde_json::from_str(json)?,
        })
    }
}
