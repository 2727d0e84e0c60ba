//! Group resolution: mapping reference identifiers onto each group.
//!
//! The first group is the reference group. Every other group may carry a
//! remap table from reference identifier to its own local identifier; an
//! identifier without a remap entry maps to itself. The inverse table folds
//! a group's local identifiers back into reference identifiers when the
//! driving set is the union of all groups.
//!
//! A local identifier can fail to fold: when it is itself a remap key of
//! its group, resolving it as a reference identifier lands on another
//! record. Such identifiers drive a build pinned to their own group.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::differ::rows::column_label;
use crate::error::{CoreError, Result};
use crate::sink::RecordSource;
use crate::types::Record;

/// Which identifiers drive a build.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentifierPolicy {
    /// Every identifier of every group, folded into reference identifiers.
    #[default]
    Union,
    /// Only identifiers of the reference group.
    ///
    /// Records that exist only in other groups never show up.
    ReferenceOnly,
}

impl IdentifierPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentifierPolicy::Union => "union",
            IdentifierPolicy::ReferenceOnly => "reference_only",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "union" => Some(IdentifierPolicy::Union),
            "reference_only" | "reference" => Some(IdentifierPolicy::ReferenceOnly),
            _ => None,
        }
    }
}

/// How batch workers obtain their records.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchStrategy {
    /// Load each group once up front; workers receive their batch's slice.
    Preload,
    /// Each worker fetches its batch's records from the source.
    #[default]
    PerBatch,
}

impl FetchStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchStrategy::Preload => "preload",
            FetchStrategy::PerBatch => "per_batch",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "preload" => Some(FetchStrategy::Preload),
            "per_batch" | "batch" => Some(FetchStrategy::PerBatch),
            _ => None,
        }
    }
}

/// One identifier a build iterates over.
///
/// Unpinned keys are reference identifiers, resolved in every group through
/// its remap table. A pinned key is a local identifier of one group that no
/// reference identifier reaches; it resolves in that group only.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DrivingId {
    pub identifier: String,
    pub pinned: Option<usize>,
}

impl DrivingId {
    pub fn reference(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            pinned: None,
        }
    }

    pub fn pinned(identifier: impl Into<String>, group: usize) -> Self {
        Self {
            identifier: identifier.into(),
            pinned: Some(group),
        }
    }

    pub fn is_pinned(&self) -> bool {
        self.pinned.is_some()
    }
}

/// A group as requested by the caller.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GroupSpec {
    pub label: String,
    /// Reference identifier -> local identifier.
    pub remap: HashMap<String, String>,
}

impl GroupSpec {
    pub fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            remap: HashMap::new(),
        }
    }

    pub fn with_remap(mut self, remap: HashMap<String, String>) -> Self {
        self.remap = remap;
        self
    }
}

#[derive(Debug)]
struct ResolvedGroup {
    label: String,
    remap: HashMap<String, String>,
    inverse: HashMap<String, String>,
}

impl ResolvedGroup {
    fn new(spec: GroupSpec) -> Self {
        // Sort so that conflicting entries resolve the same way every run.
        let mut pairs: Vec<(&String, &String)> = spec.remap.iter().collect();
        pairs.sort();

        let mut inverse = HashMap::with_capacity(pairs.len());
        for (reference, local) in pairs {
            if let Some(kept) = inverse.get(local) {
                tracing::warn!(
                    "Group {}: local identifier {} is remapped from both {} and {}, folding to {}",
                    spec.label,
                    local,
                    kept,
                    reference,
                    kept
                );
                continue;
            }
            inverse.insert(local.clone(), reference.clone());
        }

        Self {
            label: spec.label,
            remap: spec.remap,
            inverse,
        }
    }
}

/// Validated, ordered set of groups with their remap tables.
///
/// Fixed for the duration of one build.
#[derive(Debug)]
pub struct GroupResolver {
    groups: Vec<ResolvedGroup>,
}

impl GroupResolver {
    /// Validate the group list: at least one group, unique non-empty labels.
    pub fn new(specs: Vec<GroupSpec>) -> Result<Self> {
        if specs.is_empty() {
            return Err(CoreError::NoGroups);
        }

        let mut seen = HashSet::new();
        for spec in &specs {
            let column = column_label(&spec.label);
            if column.is_empty() {
                return Err(CoreError::config("group label must not be empty"));
            }
            if !seen.insert(column) {
                return Err(CoreError::DuplicateGroup {
                    label: spec.label.clone(),
                });
            }
        }

        if !specs[0].remap.is_empty() {
            tracing::warn!(
                "Ignoring remap table on reference group {}",
                specs[0].label
            );
        }

        let groups = specs
            .into_iter()
            .enumerate()
            .map(|(i, mut spec)| {
                if i == 0 {
                    spec.remap.clear();
                }
                ResolvedGroup::new(spec)
            })
            .collect();

        Ok(Self { groups })
    }

    /// Fail if the source does not know the reference group.
    pub fn check_source(&self, source: &dyn RecordSource) -> Result<()> {
        let reference = self.reference();
        if source.has_group(reference)? {
            Ok(())
        } else {
            Err(CoreError::UnknownReferenceGroup {
                label: reference.to_string(),
            })
        }
    }

    pub fn reference(&self) -> &str {
        &self.groups[0].label
    }

    pub fn labels(&self) -> Vec<&str> {
        self.groups.iter().map(|g| g.label.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Identifier of `reference_id` inside group `group`.
    pub fn local_identifier<'a>(&'a self, group: usize, reference_id: &'a str) -> &'a str {
        self.groups
            .get(group)
            .and_then(|g| g.remap.get(reference_id))
            .map(String::as_str)
            .unwrap_or(reference_id)
    }

    /// Reference identifier that a local identifier of `group` folds into.
    pub fn reference_identifier<'a>(&'a self, group: usize, local_id: &'a str) -> &'a str {
        self.groups
            .get(group)
            .and_then(|g| g.inverse.get(local_id))
            .map(String::as_str)
            .unwrap_or(local_id)
    }

    /// Identifier a driving key resolves to inside `group`, if any.
    pub fn resolve_identifier<'a>(&'a self, group: usize, id: &'a DrivingId) -> Option<&'a str> {
        match id.pinned {
            Some(pinned) if pinned == group => Some(id.identifier.as_str()),
            Some(_) => None,
            None => Some(self.local_identifier(group, &id.identifier)),
        }
    }

    /// Driving key of a local identifier of `group`.
    fn fold_local(&self, group: usize, local_id: &str) -> DrivingId {
        let reference = self.reference_identifier(group, local_id);
        if self.local_identifier(group, reference) == local_id {
            DrivingId::reference(reference)
        } else {
            DrivingId::pinned(local_id, group)
        }
    }

    /// Sorted keys that drive a build under `policy`.
    pub fn driving_identifiers(
        &self,
        source: &dyn RecordSource,
        policy: IdentifierPolicy,
    ) -> Result<BTreeSet<DrivingId>> {
        let mut identifiers: BTreeSet<DrivingId> = source
            .identifiers(self.reference())?
            .into_iter()
            .map(DrivingId::reference)
            .collect();

        if policy == IdentifierPolicy::Union {
            for (index, group) in self.groups.iter().enumerate().skip(1) {
                let local = source.identifiers(&group.label)?;
                if local.is_empty() {
                    tracing::warn!("Group {} has no records", group.label);
                }

                let mut pinned = 0usize;
                for id in &local {
                    let key = self.fold_local(index, id);
                    if key.is_pinned() {
                        pinned += 1;
                    }
                    identifiers.insert(key);
                }
                if pinned > 0 {
                    tracing::warn!(
                        "Group {}: {} identifiers are also remap keys; they get rows of their own",
                        group.label,
                        pinned
                    );
                }
            }
        }

        tracing::debug!(
            "{} driving identifiers ({} policy)",
            identifiers.len(),
            policy.as_str()
        );
        Ok(identifiers)
    }

    /// Local identifiers of `group` for a batch of driving keys.
    pub fn local_identifiers(&self, group: usize, ids: &[DrivingId]) -> Vec<String> {
        ids.iter()
            .filter_map(|id| self.resolve_identifier(group, id))
            .map(str::to_string)
            .collect()
    }

    /// Load every group's collection once, keyed by local identifier.
    pub fn preload(&self, source: &dyn RecordSource) -> Result<Vec<HashMap<String, Arc<Record>>>> {
        self.groups
            .iter()
            .map(|g| {
                let records = source.fetch_all(&g.label)?;
                tracing::debug!("Preloaded {} records of group {}", records.len(), g.label);
                Ok(records
                    .into_iter()
                    .map(|(id, record)| (id, Arc::new(record)))
                    .collect())
            })
            .collect()
    }
}

/// Records of every group for one batch, keyed by local identifier.
#[derive(Debug, Default)]
pub struct BatchRecords {
    groups: Vec<HashMap<String, Arc<Record>>>,
}

impl BatchRecords {
    /// Fetch the batch's records from the source with one filtered select per group.
    pub fn fetch(resolver: &GroupResolver, source: &dyn RecordSource, ids: &[DrivingId]) -> Result<Self> {
        let mut groups = Vec::with_capacity(resolver.len());
        for (index, label) in resolver.labels().into_iter().enumerate() {
            let local = resolver.local_identifiers(index, ids);
            let records = source.fetch(label, &local)?;
            groups.push(
                records
                    .into_iter()
                    .map(|(id, record)| (id, Arc::new(record)))
                    .collect(),
            );
        }
        Ok(Self { groups })
    }

    /// Take the batch's slice out of preloaded collections.
    pub fn slice(
        resolver: &GroupResolver,
        preloaded: &[HashMap<String, Arc<Record>>],
        ids: &[DrivingId],
    ) -> Self {
        let groups = preloaded
            .iter()
            .enumerate()
            .map(|(index, records)| {
                ids.iter()
                    .filter_map(|id| {
                        let local = resolver.resolve_identifier(index, id)?;
                        records
                            .get(local)
                            .map(|r| (local.to_string(), Arc::clone(r)))
                    })
                    .collect()
            })
            .collect();
        Self { groups }
    }

    /// Record of each group for one driving key, in group order.
    pub fn resolve<'r>(&'r self, resolver: &GroupResolver, id: &DrivingId) -> Vec<Option<&'r Record>> {
        self.groups
            .iter()
            .enumerate()
            .map(|(index, records)| {
                resolver
                    .resolve_identifier(index, id)
                    .and_then(|local| records.get(local))
                    .map(Arc::as_ref)
            })
            .collect()
    }

    /// Number of records held across all groups.
    pub fn record_count(&self) -> usize {
        self.groups.iter().map(HashMap::len).sum()
    }
}
