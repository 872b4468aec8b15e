use std::collections::BTreeMap;

use crate::error::ConfigurationError;

/// Selected members, their destination names and the members kept out of updates.
///
/// Everything is keyed by member (source) name. A member without a custom mapping lands in
/// the destination column of the same name, nested paths are flattened with `_`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnSet {
    selected: Vec<String>,
    mappings: BTreeMap<String, String>,
    excluded_from_update: Vec<String>,
}

impl ColumnSet {
    pub fn new() -> Self {
        ColumnSet::default()
    }

    /// Adding a member twice keeps its first position. A member whose destination is already
    /// fed by another member is rejected.
    pub fn add(&mut self, source: &str) -> Result<(), ConfigurationError> {
        if self.contains(source) {
            return Ok(());
        }
        self.ensure_destination_free(&self.actual_name(source), source)?;
        self.selected.push(source.to_string());
        Ok(())
    }

    pub fn add_as(&mut self, source: &str, destination: &str) -> Result<(), ConfigurationError> {
        self.map_custom(source, destination)?;
        self.add(source)
    }

    pub fn remove(&mut self, source: &str) -> Result<(), ConfigurationError> {
        let position = self
            .selected
            .iter()
            .position(|s| s == source)
            .ok_or_else(|| ConfigurationError::ColumnNotAdded(source.to_string()))?;
        self.selected.remove(position);
        Ok(())
    }

    /// A member maps to at most one destination and a destination is fed by at most one
    /// member, mapped or not. Both conflicts fail instead of overwriting.
    pub fn map_custom(&mut self, source: &str, destination: &str) -> Result<(), ConfigurationError> {
        if self.mappings.contains_key(source) {
            return Err(ConfigurationError::DuplicateMapping(source.to_string()));
        }
        self.ensure_destination_free(destination, source)?;

        self.mappings.insert(source.to_string(), destination.to_string());
        Ok(())
    }

    /// Destination names compare case insensitively, as the engine's catalog does.
    fn ensure_destination_free(
        &self,
        destination: &str,
        source: &str,
    ) -> Result<(), ConfigurationError> {
        let existing = self
            .selected
            .iter()
            .chain(self.mappings.keys())
            .filter(|member| member.as_str() != source)
            .find(|member| self.actual_name(member).to_lowercase() == destination.to_lowercase());

        match existing {
            Some(existing) => Err(ConfigurationError::DuplicateDestination {
                destination: destination.to_string(),
                existing: existing.clone(),
            }),
            None => Ok(()),
        }
    }

    pub fn exclude_from_update(&mut self, source: &str) {
        if !self.excluded_from_update.iter().any(|s| s == source) {
            self.excluded_from_update.push(source.to_string());
        }
    }

    pub fn contains(&self, source: &str) -> bool {
        self.selected.iter().any(|s| s == source)
    }

    pub fn selected(&self) -> &[String] {
        &self.selected
    }

    pub fn is_empty(&self) -> bool {
        self.selected.is_empty()
    }

    pub fn actual_name(&self, source: &str) -> String {
        match self.mappings.get(source) {
            Some(destination) => destination.clone(),
            None => source.replace('.', "_"),
        }
    }

    /// Destination names of the selected members, in selection order.
    pub fn actual_names(&self) -> Vec<String> {
        self.selected.iter().map(|s| self.actual_name(s)).collect()
    }

    pub fn excluded_actual_names(&self) -> Vec<String> {
        self.excluded_from_update.iter().map(|s| self.actual_name(s)).collect()
    }
}
