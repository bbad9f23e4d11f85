pub mod canonical;
pub mod sanitize;

pub use canonical::CanonicalSet;
pub use sanitize::{sanitize_segment, SanitizeOptions};

use crate::storage::models::{FileRecord, RecordId};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::path::PathBuf;
use tracing::{debug, warn};

/// Highest numeric suffix tried when disambiguating same-named siblings.
pub const DEFAULT_COLLISION_BUDGET: usize = 10_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolverOptions {
    pub sanitize: SanitizeOptions,
    /// Root record that contributes no segment (the device's account folder).
    pub transparent_root: Option<RecordId>,
    pub collision_budget: usize,
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self {
            sanitize: SanitizeOptions::default(),
            transparent_root: None,
            collision_budget: DEFAULT_COLLISION_BUDGET,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "kebab-case")]
pub enum UnresolvedReason {
    /// The record sits on a parent chain that loops back on itself.
    Cycle,
    /// `parent_id` names a record that is not in the store.
    DanglingParent { parent: RecordId },
    /// Some ancestor failed to resolve for one of the other reasons.
    AncestorUnresolved { ancestor: RecordId },
    /// Another record with the same id was kept instead.
    DuplicateId,
    /// Every suffix up to the collision budget is taken.
    CollisionUnresolved { segment: String },
}

impl UnresolvedReason {
    pub fn label(&self) -> &'static str {
        match self {
            UnresolvedReason::Cycle => "cycle",
            UnresolvedReason::DanglingParent { .. } => "dangling-parent",
            UnresolvedReason::AncestorUnresolved { .. } => "ancestor-unresolved",
            UnresolvedReason::DuplicateId => "duplicate-id",
            UnresolvedReason::CollisionUnresolved { .. } => "collision-unresolved",
        }
    }
}

impl fmt::Display for UnresolvedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnresolvedReason::DanglingParent { parent } => {
                write!(f, "dangling-parent (missing {})", parent)
            }
            UnresolvedReason::AncestorUnresolved { ancestor } => {
                write!(f, "ancestor-unresolved (via {})", ancestor)
            }
            UnresolvedReason::CollisionUnresolved { segment } => {
                write!(f, "collision-unresolved ('{}')", segment)
            }
            other => f.write_str(other.label()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Unresolved {
    pub record_id: RecordId,
    pub name: String,
    #[serde(flatten)]
    pub reason: UnresolvedReason,
}

/// Sanitized, disambiguated segments from the top of the tree to a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedPath {
    pub record_id: RecordId,
    pub segments: Vec<String>,
}

impl ResolvedPath {
    /// `/`-joined form used for canonical-set membership.
    pub fn relative(&self) -> String {
        self.segments.join("/")
    }

    pub fn to_path_buf(&self) -> PathBuf {
        self.segments.iter().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

/// Memoized result for one resolved record: its own segment and the record
/// it hangs under. Full paths are rebuilt from these on demand.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Link {
    parent: Option<RecordId>,
    /// `None` for the transparent account root.
    segment: Option<String>,
}

/// Segments from the top of the tree down to `id`, following parent links.
fn collect_segments(links: &HashMap<RecordId, Link>, id: &RecordId) -> Option<Vec<String>> {
    let mut segments = Vec::new();
    let mut link = links.get(id)?;
    loop {
        if let Some(segment) = &link.segment {
            segments.push(segment.clone());
        }
        match &link.parent {
            Some(parent) => link = links.get(parent)?,
            None => break,
        }
    }
    segments.reverse();
    Some(segments)
}

/// Sibling scope: records sharing a resolved parent.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Scope {
    Top,
    Under(RecordId),
}

/// Lazily resolves parent-linked records into unique relative paths.
///
/// Records are ingested first (from a streaming cursor); resolution then
/// walks each parent chain iteratively and memoizes every path it completes.
pub struct PathResolver {
    options: ResolverOptions,
    records: HashMap<RecordId, FileRecord>,
    duplicates: Vec<FileRecord>,
    children: HashMap<Scope, Vec<RecordId>>,
    indexed: bool,
    segments: HashMap<RecordId, Result<String, UnresolvedReason>>,
    assigned_scopes: HashSet<Scope>,
    links: HashMap<RecordId, Link>,
    failed: HashMap<RecordId, UnresolvedReason>,
}

impl PathResolver {
    pub fn new(options: ResolverOptions) -> Self {
        Self {
            options,
            records: HashMap::new(),
            duplicates: Vec::new(),
            children: HashMap::new(),
            indexed: false,
            segments: HashMap::new(),
            assigned_scopes: HashSet::new(),
            links: HashMap::new(),
            failed: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Add one record. Of several records sharing an id, the one sorting
    /// lowest by `(name, content_id, parent_id)` is kept, whatever the
    /// arrival order.
    pub fn ingest(&mut self, record: FileRecord) {
        if self.indexed {
            self.reset_derived();
        }

        match self.records.get_mut(&record.id) {
            None => {
                self.records.insert(record.id.clone(), record);
            }
            Some(existing) => {
                warn!("Duplicate record id {} in metadata store", record.id);
                if duplicate_key(&record) < duplicate_key(existing) {
                    let loser = std::mem::replace(existing, record);
                    self.duplicates.push(loser);
                } else {
                    self.duplicates.push(record);
                }
            }
        }
    }

    pub fn ingest_all<I: IntoIterator<Item = FileRecord>>(&mut self, records: I) {
        for record in records {
            self.ingest(record);
        }
    }

    fn reset_derived(&mut self) {
        self.children.clear();
        self.segments.clear();
        self.assigned_scopes.clear();
        self.links.clear();
        self.failed.clear();
        self.indexed = false;
    }

    /// Resolve a single record, reusing any ancestor paths already cached.
    /// Returns `None` for ids that were never ingested.
    pub fn resolve(&mut self, id: &RecordId) -> Option<Result<ResolvedPath, UnresolvedReason>> {
        if !self.records.contains_key(id) {
            return None;
        }
        self.ensure_indexed();
        self.resolve_chain(id);

        if let Some(segments) = collect_segments(&self.links, id) {
            return Some(Ok(ResolvedPath {
                record_id: id.clone(),
                segments,
            }));
        }
        let reason = self
            .failed
            .get(id)
            .cloned()
            .unwrap_or(UnresolvedReason::Cycle);
        Some(Err(reason))
    }

    /// Resolve every ingested record and hand back the results.
    pub fn finish(mut self) -> Resolution {
        self.ensure_indexed();

        let mut ids: Vec<RecordId> = self.records.keys().cloned().collect();
        ids.sort();
        for id in &ids {
            self.resolve_chain(id);
        }

        let mut order = Vec::with_capacity(self.links.len());
        let mut unresolved = Vec::new();
        for id in ids {
            if self.links.contains_key(&id) {
                order.push(id);
            } else {
                let reason = self
                    .failed
                    .remove(&id)
                    .unwrap_or(UnresolvedReason::Cycle);
                unresolved.push(Unresolved {
                    name: self.records[&id].name.clone(),
                    record_id: id,
                    reason,
                });
            }
        }

        self.duplicates
            .sort_by(|a, b| a.id.cmp(&b.id).then_with(|| duplicate_key(a).cmp(&duplicate_key(b))));
        for dup in &self.duplicates {
            unresolved.push(Unresolved {
                record_id: dup.id.clone(),
                name: dup.name.clone(),
                reason: UnresolvedReason::DuplicateId,
            });
        }

        debug!(
            "Resolution finished: {} resolved, {} unresolved",
            order.len(),
            unresolved.len()
        );

        Resolution {
            order,
            unresolved,
            links: self.links,
            records: self.records,
        }
    }

    fn is_transparent(&self, record: &FileRecord) -> bool {
        record.parent_id.is_none() && self.options.transparent_root.as_ref() == Some(&record.id)
    }

    fn scope_of(&self, record: &FileRecord) -> Scope {
        match &record.parent_id {
            None => Scope::Top,
            Some(parent) if self.options.transparent_root.as_ref() == Some(parent) => {
                match self.records.get(parent) {
                    Some(root) if root.parent_id.is_none() => Scope::Top,
                    _ => Scope::Under(parent.clone()),
                }
            }
            Some(parent) => Scope::Under(parent.clone()),
        }
    }

    fn ensure_indexed(&mut self) {
        if self.indexed {
            return;
        }
        let mut children: HashMap<Scope, Vec<RecordId>> = HashMap::new();
        for record in self.records.values() {
            if self.is_transparent(record) {
                continue;
            }
            children
                .entry(self.scope_of(record))
                .or_default()
                .push(record.id.clone());
        }
        self.children = children;
        self.indexed = true;
    }

    /// Walk up from `start` until a root or an already-resolved ancestor,
    /// then link each record to its parent on the way back down.
    fn resolve_chain(&mut self, start: &RecordId) {
        if self.links.contains_key(start) || self.failed.contains_key(start) {
            return;
        }

        let mut chain: Vec<RecordId> = Vec::new();
        let mut in_progress: HashSet<RecordId> = HashSet::new();
        let mut cursor = start.clone();

        loop {
            if self.links.contains_key(&cursor) {
                break;
            }
            if self.failed.contains_key(&cursor) {
                let reason = UnresolvedReason::AncestorUnresolved { ancestor: cursor };
                self.fail_all(&chain, &reason);
                return;
            }
            if !in_progress.insert(cursor.clone()) {
                let start_of_loop = chain.iter().position(|id| *id == cursor).unwrap_or(0);
                warn!(
                    "Parent cycle through {} record(s) starting at {}",
                    chain.len() - start_of_loop,
                    cursor
                );
                self.fail_all(&chain[start_of_loop..], &UnresolvedReason::Cycle);
                let reason = UnresolvedReason::AncestorUnresolved { ancestor: cursor };
                self.fail_all(&chain[..start_of_loop], &reason);
                return;
            }
            chain.push(cursor.clone());

            let parent = self.records[&cursor].parent_id.clone();
            match parent {
                None => break,
                Some(parent) if self.records.contains_key(&parent) => cursor = parent,
                Some(parent) => {
                    debug!("Record {} references missing parent {}", cursor, parent);
                    self.failed
                        .insert(cursor.clone(), UnresolvedReason::DanglingParent { parent });
                    let reason = UnresolvedReason::AncestorUnresolved { ancestor: cursor };
                    self.fail_all(&chain[..chain.len() - 1], &reason);
                    return;
                }
            }
        }

        for (idx, id) in chain.iter().enumerate().rev() {
            if self.is_transparent(&self.records[id]) {
                let link = Link {
                    parent: None,
                    segment: None,
                };
                self.links.insert(id.clone(), link);
                continue;
            }
            match self.segment_for(id) {
                Ok(segment) => {
                    let link = Link {
                        parent: self.records[id].parent_id.clone(),
                        segment: Some(segment),
                    };
                    self.links.insert(id.clone(), link);
                }
                Err(reason) => {
                    self.failed.insert(id.clone(), reason);
                    let reason = UnresolvedReason::AncestorUnresolved {
                        ancestor: id.clone(),
                    };
                    self.fail_all(&chain[..idx], &reason);
                    return;
                }
            }
        }
    }

    fn fail_all(&mut self, ids: &[RecordId], reason: &UnresolvedReason) {
        for id in ids {
            self.failed.insert(id.clone(), reason.clone());
        }
    }

    fn segment_for(&mut self, id: &RecordId) -> Result<String, UnresolvedReason> {
        let scope = self.scope_of(&self.records[id]);
        if !self.assigned_scopes.contains(&scope) {
            self.assign_scope(&scope);
        }
        match self.segments.get(id) {
            Some(assigned) => assigned.clone(),
            None => Ok(sanitize_segment(&self.records[id].name, &self.options.sanitize)),
        }
    }

    /// Give every member of a sibling scope its final segment. Members are
    /// visited in id order: the first holder of a name keeps it, later ones
    /// take the lowest free `name (n)` suffix.
    fn assign_scope(&mut self, scope: &Scope) {
        let mut members = self.children.get(scope).cloned().unwrap_or_default();
        members.sort();

        let named: Vec<(RecordId, String)> = members
            .into_iter()
            .map(|id| {
                let segment = sanitize_segment(&self.records[&id].name, &self.options.sanitize);
                (id, segment)
            })
            .collect();

        let mut taken: HashSet<String> = named.iter().map(|(_, s)| s.clone()).collect();
        let mut holders: HashSet<&str> = HashSet::new();
        let mut next_suffix: HashMap<&str, usize> = HashMap::new();
        let mut assignments = Vec::with_capacity(named.len());

        for (id, segment) in &named {
            if holders.insert(segment.as_str()) {
                assignments.push((id.clone(), Ok(segment.clone())));
                continue;
            }

            let counter = next_suffix.entry(segment.as_str()).or_insert(2);
            let mut assigned = None;
            while *counter <= self.options.collision_budget {
                let candidate = format!("{} ({})", segment, counter);
                *counter += 1;
                if taken.insert(candidate.clone()) {
                    assigned = Some(candidate);
                    break;
                }
            }

            let result = match assigned {
                Some(candidate) => Ok(candidate),
                None => {
                    warn!("Collision budget exhausted for '{}' (record {})", segment, id);
                    Err(UnresolvedReason::CollisionUnresolved {
                        segment: segment.clone(),
                    })
                }
            };
            assignments.push((id.clone(), result));
        }

        self.segments.extend(assignments);
        self.assigned_scopes.insert(scope.clone());
    }
}

fn duplicate_key(record: &FileRecord) -> (&str, Option<&str>, Option<&RecordId>) {
    (
        record.name.as_str(),
        record.content_id.as_deref(),
        record.parent_id.as_ref(),
    )
}

/// Outcome of a resolution pass over the whole store.
///
/// Holds one parent link per resolved record; paths are rebuilt when asked
/// for, so memory stays linear in the number of records however deep the
/// tree is.
pub struct Resolution {
    /// Resolved ids in ascending order.
    order: Vec<RecordId>,
    pub unresolved: Vec<Unresolved>,
    links: HashMap<RecordId, Link>,
    records: HashMap<RecordId, FileRecord>,
}

impl Resolution {
    pub fn record(&self, id: &RecordId) -> Option<&FileRecord> {
        self.records.get(id)
    }

    pub fn resolved_count(&self) -> usize {
        self.order.len()
    }

    pub fn is_resolved(&self, id: &RecordId) -> bool {
        self.links.contains_key(id)
    }

    pub fn path_of(&self, id: &RecordId) -> Option<ResolvedPath> {
        collect_segments(&self.links, id).map(|segments| ResolvedPath {
            record_id: id.clone(),
            segments,
        })
    }

    /// Resolved records paired with their paths, in id order.
    pub fn iter(&self) -> impl Iterator<Item = (&FileRecord, ResolvedPath)> + '_ {
        self.order.iter().filter_map(|id| {
            let record = self.records.get(id)?;
            self.path_of(id).map(|path| (record, path))
        })
    }

    /// Canonical files (non-directory records with content) plus every
    /// resolved directory. A directory record never counts as a file, even
    /// when the store gave it a content id.
    pub fn canonical_set(&self) -> CanonicalSet {
        let mut set = CanonicalSet::new();
        for (record, path) in self.iter() {
            if path.is_empty() {
                continue;
            }
            if record.is_directory {
                set.insert_dir(path.relative());
            } else if record.content().is_some() {
                set.insert_file(path.relative());
            }
        }
        set
    }

    pub fn unresolved_counts(&self) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        for entry in &self.unresolved {
            *counts.entry(entry.reason.label()).or_insert(0) += 1;
        }
        counts
    }
}
