// ABOUTME: Endpoint registry owned by the coordinator.
// ABOUTME: Keeps endpoints by id plus a unique identifier index, checked on every bind.

use std::collections::{BTreeMap, HashMap};

use switchboard_core::{
    normalize_identifier, select_one, EndpointId, EndpointInfo, Selector, Snapshot,
    SwitchboardError,
};

/// Registered endpoints and the `identifier -> id` index.
///
/// Every non-empty identifier maps to exactly one endpoint and every
/// endpoint's identifier is present in the index.
#[derive(Debug, Default)]
pub struct Registry {
    endpoints: BTreeMap<EndpointId, EndpointInfo>,
    identifiers: HashMap<String, EndpointId>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: EndpointId) -> Option<&EndpointInfo> {
        self.endpoints.get(&id)
    }

    pub fn contains(&self, id: EndpointId) -> bool {
        self.endpoints.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = EndpointId> + '_ {
        self.endpoints.keys().copied()
    }

    pub fn lookup_identifier(&self, identifier: &str) -> Option<EndpointId> {
        self.identifiers.get(identifier).copied()
    }

    /// Fail if `identifier` is bound to an endpoint other than `id`.
    pub fn check_identifier(
        &self,
        id: EndpointId,
        identifier: Option<&str>,
    ) -> Result<(), SwitchboardError> {
        let Some(identifier) = identifier else {
            return Ok(());
        };
        match self.identifiers.get(identifier) {
            Some(owner) if *owner != id => Err(SwitchboardError::Conflict {
                identifier: identifier.to_string(),
                owner: *owner,
            }),
            _ => Ok(()),
        }
    }

    /// Insert or replace an endpoint, rebinding its identifier.
    ///
    /// Returns the previous entry for the same id, if any.
    pub fn insert(&mut self, info: EndpointInfo) -> Result<Option<EndpointInfo>, SwitchboardError> {
        let info = EndpointInfo {
            identifier: normalize_identifier(info.identifier),
            ..info
        };
        self.check_identifier(info.id, info.identifier.as_deref())?;

        let previous = self.endpoints.remove(&info.id);
        if let Some(old) = previous.as_ref().and_then(|p| p.identifier.as_ref()) {
            self.identifiers.remove(old);
        }
        if let Some(identifier) = &info.identifier {
            self.identifiers.insert(identifier.clone(), info.id);
        }
        self.endpoints.insert(info.id, info);
        Ok(previous)
    }

    /// Rebind (or clear) the identifier of a registered endpoint.
    pub fn set_identifier(
        &mut self,
        id: EndpointId,
        identifier: Option<String>,
    ) -> Result<(), SwitchboardError> {
        let current = self
            .endpoints
            .get(&id)
            .cloned()
            .ok_or(SwitchboardError::NotRegistered(id))?;
        self.insert(current.with_identifier(identifier)).map(|_| ())
    }

    pub fn remove(&mut self, id: EndpointId) -> Option<EndpointInfo> {
        let removed = self.endpoints.remove(&id)?;
        if let Some(identifier) = &removed.identifier {
            self.identifiers.remove(identifier);
        }
        Some(removed)
    }

    /// Resolve a selector to exactly one endpoint other than `exclude`.
    pub fn resolve(
        &self,
        selector: &Selector,
        exclude: EndpointId,
    ) -> Result<&EndpointInfo, SwitchboardError> {
        select_one(selector, self.endpoints.values().filter(|e| e.id != exclude))
    }

    pub fn snapshot(&self, version: u64) -> Snapshot {
        Snapshot::new(version, self.endpoints.values().cloned().collect())
    }

    /// Whether the identifier index and the endpoint map agree.
    pub fn is_consistent(&self) -> bool {
        let indexed = self
            .identifiers
            .iter()
            .all(|(identifier, id)| {
                self.endpoints
                    .get(id)
                    .is_some_and(|e| e.identifier.as_deref() == Some(identifier.as_str()))
            });
        let bound = self
            .endpoints
            .values()
            .filter(|e| e.identifier.is_some())
            .count();
        indexed && bound == self.identifiers.len()
    }
}
