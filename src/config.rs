//! Persistence manager configuration.
//!
//! Managers are configured as whitespace-separated `name:unit` tokens, e.g.
//! `"main:orders_db reporting:replica_db"`. Without configuration a single
//! manager named [`DEFAULT_NAME`] is bound to the unit of the same name.

use std::str::FromStr;

use crate::manager::DEFAULT_NAME;
use crate::{PersistenceError, Result};

/// Ordered manager-name to persistence-unit pairs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerConfig {
    entries: Vec<(String, String)>,
}

impl ManagerConfig {
    /// Parses an optional configuration value. `None` or a blank value yields
    /// the default configuration.
    pub fn parse(value: Option<&str>) -> Result<Self> {
        match value {
            Some(value) if !value.trim().is_empty() => value.parse(),
            _ => Ok(Self::default()),
        }
    }

    /// Manager name and persistence unit pairs, in configuration order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(name, unit)| (name.as_str(), unit.as_str()))
    }

    pub fn unit_for(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, unit)| unit.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn insert(&mut self, name: &str, unit: &str) {
        // A repeated manager name keeps its position and takes the later unit.
        match self.entries.iter_mut().find(|(n, _)| n == name) {
            Some(entry) => entry.1 = unit.to_string(),
            None => self.entries.push((name.to_string(), unit.to_string())),
        }
    }
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            entries: vec![(DEFAULT_NAME.to_string(), DEFAULT_NAME.to_string())],
        }
    }
}

impl FromStr for ManagerConfig {
    type Err = PersistenceError;

    fn from_str(value: &str) -> Result<Self> {
        let mut config = Self { entries: Vec::new() };
        for token in value.split_whitespace() {
            let parts: Vec<&str> = token.split(':').collect();
            match parts.as_slice() {
                [name, unit] if !name.is_empty() && !unit.is_empty() => config.insert(name, unit),
                _ => {
                    return Err(PersistenceError::Config {
                        token: token.to_string(),
                    })
                }
            }
        }
        if config.is_empty() {
            return Ok(Self::default());
        }
        Ok(config)
    }
}
