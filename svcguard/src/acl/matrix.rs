//! Permission matrix: service code → granted permission codes.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::types::{PermissionCode, ServiceCode};

/// Mapping from service code to the permission codes granted for that service.
///
/// The per-service lists are treated as sets: neither order nor uniqueness is
/// relied upon by any query. Serialized as a JSON object keyed by the
/// stringified service code, e.g. `{"5": [10, 20]}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionMatrix(HashMap<ServiceCode, Vec<PermissionCode>>);

impl PermissionMatrix {
    pub fn new() -> Self {
        Self::default()
    }

    /// Grant `codes` in `service`, appending to anything already granted there.
    pub fn grant(&mut self, service: ServiceCode, codes: impl IntoIterator<Item = PermissionCode>) -> &mut Self {
        self.0.entry(service).or_default().extend(codes);
        self
    }

    /// True iff `permission` appears anywhere in the entry for `service`.
    pub fn contains(&self, service: ServiceCode, permission: PermissionCode) -> bool {
        self.0.get(&service).is_some_and(|codes| codes.contains(&permission))
    }

    /// Permission codes granted in `service`, empty if the service has no entry.
    pub fn service_permissions(&self, service: ServiceCode) -> &[PermissionCode] {
        self.0.get(&service).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn services(&self) -> impl Iterator<Item = ServiceCode> + '_ {
        self.0.keys().copied()
    }

    /// Whether every service present in both matrices grants the same set of codes.
    ///
    /// Services present in only one side are ignored. Duplicates and ordering inside a
    /// service entry do not matter.
    pub fn agrees_with(&self, other: &PermissionMatrix) -> bool {
        self.0.iter().all(|(service, ours)| match other.0.get(service) {
            Some(theirs) => ours.iter().collect::<HashSet<_>>() == theirs.iter().collect::<HashSet<_>>(),
            None => true,
        })
    }
}

impl From<HashMap<ServiceCode, Vec<PermissionCode>>> for PermissionMatrix {
    fn from(map: HashMap<ServiceCode, Vec<PermissionCode>>) -> Self {
        Self(map)
    }
}

impl<const N: usize> From<[(ServiceCode, Vec<PermissionCode>); N]> for PermissionMatrix {
    fn from(entries: [(ServiceCode, Vec<PermissionCode>); N]) -> Self {
        Self(HashMap::from(entries))
    }
}

impl FromIterator<(ServiceCode, Vec<PermissionCode>)> for PermissionMatrix {
    fn from_iter<I: IntoIterator<Item = (ServiceCode, Vec<PermissionCode>)>>(iter: I) -> Self {
        let mut matrix = Self::new();
        for (service, codes) in iter {
            matrix.grant(service, codes);
        }
        matrix
    }
}
