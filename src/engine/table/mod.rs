// Copyright © 2025 Flowbench

use std::collections::{HashMap, HashSet};
use std::fmt::{self, Display};
use std::fs::File;
use std::io::BufReader;
use std::ops::Range;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use arcstr::ArcStr;
use itertools::{EitherOrBoth, Itertools};
use once_cell::sync::OnceCell;
use smallvec::SmallVec;
use tempfile::NamedTempFile;
use xxhash_rust::xxh3::Xxh3Builder;

use super::error::{Error, Result};
use super::node::NodeId;
use super::spec::TableSpec;
use super::value::{Row, RowKey, Value};

pub mod backend;
pub mod container;

pub use backend::{
    ConcatenateOptions, MemoryBackend, RearrangeColumn, RearrangePlan, TableBackend,
};
pub use container::{
    ContainerEnv, ContainerSettings, MemoryLimit, MemoryPolicy, TableContainer,
};

/// Identifies a table uniquely within one workflow.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
pub struct TableId(u64);

impl Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Hands out sequential table ids. Shared by every context of a workflow so
/// that ids stay unique across local repositories and their promotion into
/// the workflow repository.
#[derive(Debug, Clone, Default)]
pub struct TableIdGen(Arc<AtomicU64>);

impl TableIdGen {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> TableId {
        TableId(self.0.fetch_add(1, Ordering::Relaxed))
    }
}

/// Physical row storage of a container-backed table.
#[derive(Debug)]
enum Storage {
    InMemory(Vec<Row>),
    Spilled { file: NamedTempFile, rows: u64 },
}

/// The physical part of a table created through a container. Disposal drops
/// the storage; the handle itself stays resolvable and reports the disposal.
#[derive(Debug)]
pub struct ContainerTable {
    rows: u64,
    storage: Mutex<Option<Arc<Storage>>>,
}

impl ContainerTable {
    fn in_memory(rows: Vec<Row>) -> Self {
        Self {
            rows: rows.len() as u64,
            storage: Mutex::new(Some(Arc::new(Storage::InMemory(rows)))),
        }
    }

    fn spilled(file: NamedTempFile, rows: u64) -> Self {
        Self {
            rows,
            storage: Mutex::new(Some(Arc::new(Storage::Spilled { file, rows }))),
        }
    }

    fn snapshot(&self) -> Result<Arc<Storage>> {
        self.storage
            .lock()
            .unwrap()
            .clone()
            .ok_or(Error::AlreadyDisposed)
    }

    fn drop_storage(&self) {
        *self.storage.lock().unwrap() = None;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RearrangeEntry {
    /// Cell taken from the source table at this column index.
    Source(usize),
    /// Cell taken from the materialized appended table at this column index.
    Appended(usize),
}

#[derive(Debug, Clone)]
pub struct RearrangeLayout {
    pub entries: Vec<RearrangeEntry>,
}

#[derive(Debug, Clone, Default)]
pub struct Selection {
    pub row_range: Option<Range<u64>>,
    pub column_indices: Option<Vec<usize>>,
}

#[derive(Debug)]
enum TableDelegate {
    Container(ContainerTable),
    Rearranged {
        source: TableHandle,
        appended: TableHandle,
        layout: RearrangeLayout,
    },
    SpecReplaced {
        source: TableHandle,
    },
    Wrapped {
        source: TableHandle,
    },
    Concatenated {
        parts: Vec<TableHandle>,
        duplicate_suffix: Option<ArcStr>,
    },
    Joined {
        left: TableHandle,
        right: TableHandle,
    },
    Sliced {
        source: TableHandle,
        selection: Selection,
    },
    Void,
}

#[derive(Debug)]
struct TableInner {
    id: TableId,
    spec: TableSpec,
    owner: OnceCell<NodeId>,
    cleared: AtomicBool,
    delegate: TableDelegate,
}

/// A reference-counted view of a table. Cloning is cheap and never copies
/// rows. Identity is the table id.
#[derive(Debug, Clone)]
pub struct TableHandle {
    inner: Arc<TableInner>,
}

impl PartialEq for TableHandle {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for TableHandle {}

impl TableHandle {
    fn new(id: TableId, spec: TableSpec, delegate: TableDelegate) -> Self {
        Self {
            inner: Arc::new(TableInner {
                id,
                spec,
                owner: OnceCell::new(),
                cleared: AtomicBool::new(false),
                delegate,
            }),
        }
    }

    pub(crate) fn new_in_memory(id: TableId, spec: TableSpec, rows: Vec<Row>) -> Self {
        Self::new(
            id,
            spec,
            TableDelegate::Container(ContainerTable::in_memory(rows)),
        )
    }

    pub(crate) fn new_spilled(
        id: TableId,
        spec: TableSpec,
        file: NamedTempFile,
        rows: u64,
    ) -> Self {
        Self::new(
            id,
            spec,
            TableDelegate::Container(ContainerTable::spilled(file, rows)),
        )
    }

    pub(crate) fn new_rearranged(
        id: TableId,
        spec: TableSpec,
        source: TableHandle,
        appended: TableHandle,
        layout: RearrangeLayout,
    ) -> Self {
        Self::new(
            id,
            spec,
            TableDelegate::Rearranged {
                source,
                appended,
                layout,
            },
        )
    }

    pub(crate) fn new_spec_replaced(id: TableId, spec: TableSpec, source: TableHandle) -> Self {
        Self::new(id, spec, TableDelegate::SpecReplaced { source })
    }

    pub(crate) fn new_wrapped(id: TableId, source: TableHandle) -> Self {
        let spec = source.spec().clone();
        Self::new(id, spec, TableDelegate::Wrapped { source })
    }

    pub(crate) fn new_concatenated(
        id: TableId,
        spec: TableSpec,
        parts: Vec<TableHandle>,
        duplicate_suffix: Option<ArcStr>,
    ) -> Self {
        Self::new(
            id,
            spec,
            TableDelegate::Concatenated {
                parts,
                duplicate_suffix,
            },
        )
    }

    pub(crate) fn new_joined(
        id: TableId,
        spec: TableSpec,
        left: TableHandle,
        right: TableHandle,
    ) -> Self {
        Self::new(id, spec, TableDelegate::Joined { left, right })
    }

    pub(crate) fn new_sliced(
        id: TableId,
        spec: TableSpec,
        source: TableHandle,
        selection: Selection,
    ) -> Self {
        Self::new(id, spec, TableDelegate::Sliced { source, selection })
    }

    pub(crate) fn new_void(id: TableId, spec: TableSpec) -> Self {
        Self::new(id, spec, TableDelegate::Void)
    }

    pub fn id(&self) -> TableId {
        self.inner.id
    }

    pub fn spec(&self) -> &TableSpec {
        &self.inner.spec
    }

    pub fn owner(&self) -> Option<NodeId> {
        self.inner.owner.get().copied()
    }

    pub fn is_cleared(&self) -> bool {
        self.inner.cleared.load(Ordering::Relaxed)
    }

    pub fn is_container_backed(&self) -> bool {
        matches!(self.inner.delegate, TableDelegate::Container(_))
    }

    /// Number of rows, if known. Void tables report `None`.
    pub fn row_count(&self) -> Option<u64> {
        match &self.inner.delegate {
            TableDelegate::Container(container) => Some(container.rows),
            TableDelegate::Rearranged { source, .. }
            | TableDelegate::SpecReplaced { source }
            | TableDelegate::Wrapped { source } => source.row_count(),
            TableDelegate::Concatenated { parts, .. } => {
                parts.iter().map(TableHandle::row_count).sum()
            }
            TableDelegate::Joined { left, .. } => left.row_count(),
            TableDelegate::Sliced { source, selection } => {
                let total = source.row_count()?;
                match &selection.row_range {
                    Some(range) => Some(range.end.min(total).saturating_sub(range.start)),
                    None => Some(total),
                }
            }
            TableDelegate::Void => None,
        }
    }

    pub fn summary(&self) -> String {
        let columns = self.spec().num_columns();
        match self.row_count() {
            Some(rows) => format!("{rows} rows, {columns} columns"),
            None => format!("unknown number of rows, {columns} columns"),
        }
    }

    /// The tables this view reads from. Empty for container-backed and void
    /// tables.
    pub fn reference_tables(&self) -> SmallVec<[&TableHandle; 2]> {
        match &self.inner.delegate {
            TableDelegate::Container(_) | TableDelegate::Void => SmallVec::new(),
            TableDelegate::Rearranged {
                source, appended, ..
            } => SmallVec::from_buf([source, appended]),
            TableDelegate::SpecReplaced { source }
            | TableDelegate::Wrapped { source }
            | TableDelegate::Sliced { source, .. } => {
                let mut refs = SmallVec::new();
                refs.push(source);
                refs
            }
            TableDelegate::Concatenated { parts, .. } => parts.iter().collect(),
            TableDelegate::Joined { left, right } => SmallVec::from_buf([left, right]),
        }
    }

    /// Stamps `owner` on this table and everything it reads from. The first
    /// stamp wins; tables already owned elsewhere are left untouched.
    pub fn set_owner_recursively(&self, owner: NodeId) {
        let _ = self.inner.owner.set(owner);
        for reference in self.reference_tables() {
            reference.set_owner_recursively(owner);
        }
    }

    /// Drops the physical storage of this table only. References stay
    /// untouched. Calling again after a successful disposal is a no-op.
    pub fn clear_single(&self, owner: NodeId) -> Result<()> {
        if self.owner() != Some(owner) {
            return Err(Error::NotOwner);
        }
        if self.inner.cleared.swap(true, Ordering::Relaxed) {
            return Ok(());
        }
        if let TableDelegate::Container(container) = &self.inner.delegate {
            container.drop_storage();
        }
        Ok(())
    }

    /// Collects this table and its transitive references that are owned by
    /// `owner`. Traversal stops at tables owned elsewhere; their references
    /// belong to that other node.
    pub fn collect_owned_by(&self, owner: NodeId, out: &mut Vec<TableHandle>) {
        let mut seen = HashSet::new();
        self.collect_owned_by_inner(owner, out, &mut seen);
    }

    fn collect_owned_by_inner(
        &self,
        owner: NodeId,
        out: &mut Vec<TableHandle>,
        seen: &mut HashSet<TableId>,
    ) {
        if !seen.insert(self.id()) {
            return;
        }
        if self.owner() != Some(owner) {
            return;
        }
        out.push(self.clone());
        for reference in self.reference_tables() {
            reference.collect_owned_by_inner(owner, out, seen);
        }
    }

    /// Iterates the rows of this table. Views resolve through their
    /// references lazily; the returned iterator holds a snapshot of the
    /// physical storage, so a concurrent disposal does not tear it down.
    pub fn iter_rows(&self) -> Result<Box<dyn Iterator<Item = Result<Row>> + Send>> {
        if self.is_cleared() {
            return Err(Error::AlreadyDisposed);
        }
        match &self.inner.delegate {
            TableDelegate::Container(container) => {
                let storage = container.snapshot()?;
                match &*storage {
                    Storage::InMemory(_) => {
                        let mut index = 0;
                        Ok(Box::new(std::iter::from_fn(move || {
                            let Storage::InMemory(rows) = &*storage else {
                                unreachable!()
                            };
                            let row = rows.get(index)?.clone();
                            index += 1;
                            Some(Ok(row))
                        })))
                    }
                    Storage::Spilled { file, rows } => {
                        let reader = File::open(file.path()).map_err(Error::Io)?;
                        let mut reader = BufReader::new(reader);
                        let mut remaining = *rows;
                        Ok(Box::new(std::iter::from_fn(move || {
                            if remaining == 0 {
                                return None;
                            }
                            remaining -= 1;
                            Some(
                                bincode::deserialize_from(&mut reader)
                                    .map_err(Error::RowSerialization),
                            )
                        })))
                    }
                }
            }
            TableDelegate::Rearranged {
                source,
                appended,
                layout,
            } => {
                let layout = layout.clone();
                let zipped = source.iter_rows()?.zip(appended.iter_rows()?);
                Ok(Box::new(zipped.map(move |(source_row, appended_row)| {
                    let source_row = source_row?;
                    let appended_row = appended_row?;
                    let cells = layout
                        .entries
                        .iter()
                        .map(|entry| match entry {
                            RearrangeEntry::Source(i) => source_row.cells[*i].clone(),
                            RearrangeEntry::Appended(i) => appended_row.cells[*i].clone(),
                        })
                        .collect();
                    Ok(Row {
                        key: source_row.key,
                        cells,
                    })
                })))
            }
            TableDelegate::SpecReplaced { source } | TableDelegate::Wrapped { source } => {
                source.iter_rows()
            }
            TableDelegate::Concatenated {
                parts,
                duplicate_suffix,
            } => {
                let spec = self.spec().clone();
                let mut iters = Vec::with_capacity(parts.len());
                for part in parts {
                    let mapping: Vec<Option<usize>> = spec
                        .columns()
                        .iter()
                        .map(|column| part.spec().column_index(&column.name))
                        .collect();
                    iters.push((part.iter_rows()?, mapping));
                }
                let suffix = duplicate_suffix.clone();
                let mut seen: HashSet<RowKey, Xxh3Builder> =
                    HashSet::with_hasher(Xxh3Builder::new());
                let mut iters = iters.into_iter();
                let mut current: Option<(
                    Box<dyn Iterator<Item = Result<Row>> + Send>,
                    Vec<Option<usize>>,
                )> = iters.next();
                Ok(Box::new(std::iter::from_fn(move || {
                    loop {
                        let (iter, mapping) = current.as_mut()?;
                        match iter.next() {
                            Some(Ok(row)) => {
                                let mut key = row.key.clone();
                                if !seen.insert(key.clone()) {
                                    let Some(suffix) = &suffix else {
                                        return Some(Err(Error::DuplicateRowKey(key)));
                                    };
                                    loop {
                                        key = key.with_suffix(suffix);
                                        if seen.insert(key.clone()) {
                                            break;
                                        }
                                    }
                                }
                                let cells = mapping
                                    .iter()
                                    .map(|slot| match slot {
                                        Some(i) => row.cells[*i].clone(),
                                        None => Value::Missing,
                                    })
                                    .collect();
                                return Some(Ok(Row { key, cells }));
                            }
                            Some(Err(error)) => return Some(Err(error)),
                            None => current = iters.next(),
                        }
                    }
                })))
            }
            TableDelegate::Joined { left, right } => {
                let zipped = left.iter_rows()?.zip_longest(right.iter_rows()?);
                Ok(Box::new(zipped.map(|pair| match pair {
                    EitherOrBoth::Both(left_row, right_row) => {
                        let mut left_row = left_row?;
                        let right_row = right_row?;
                        if left_row.key != right_row.key {
                            return Err(Error::RowOrderMismatch {
                                expected: left_row.key,
                                actual: right_row.key,
                            });
                        }
                        left_row.cells.extend(right_row.cells);
                        Ok(left_row)
                    }
                    EitherOrBoth::Left(row) | EitherOrBoth::Right(row) => {
                        row?;
                        Err(Error::RowCountMismatch)
                    }
                })))
            }
            TableDelegate::Sliced { source, selection } => {
                let mut iter = source.iter_rows()?;
                if let Some(range) = &selection.row_range {
                    let skip = usize::try_from(range.start).unwrap_or(usize::MAX);
                    let take = usize::try_from(range.end.saturating_sub(range.start))
                        .unwrap_or(usize::MAX);
                    iter = Box::new(iter.skip(skip).take(take));
                }
                match &selection.column_indices {
                    Some(indices) => {
                        let indices = indices.clone();
                        Ok(Box::new(iter.map(move |row| {
                            let row = row?;
                            let cells = indices.iter().map(|&i| row.cells[i].clone()).collect();
                            Ok(Row {
                                key: row.key,
                                cells,
                            })
                        })))
                    }
                    None => Ok(iter),
                }
            }
            TableDelegate::Void => Ok(Box::new(std::iter::empty())),
        }
    }
}

/// Maps table ids to handles. One instance lives per execution (the local
/// repository) and one per workflow (the global repository).
#[derive(Debug, Default)]
pub struct TableRepository {
    tables: HashMap<TableId, TableHandle>,
}

impl TableRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: TableId) -> Option<&TableHandle> {
        self.tables.get(&id)
    }

    pub fn contains(&self, id: TableId) -> bool {
        self.tables.contains_key(&id)
    }

    pub fn insert(&mut self, handle: TableHandle) {
        self.tables.insert(handle.id(), handle);
    }

    pub fn remove(&mut self, id: TableId) -> Option<TableHandle> {
        self.tables.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn handles(&self) -> impl Iterator<Item = &TableHandle> {
        self.tables.values()
    }

    /// Registers the physical tables reachable from `handle`. Views resolve
    /// through their handles and are not registered themselves. Returns how
    /// many tables were newly added.
    pub fn put_recursively(&mut self, handle: &TableHandle) -> usize {
        let mut added = 0;
        if handle.is_container_backed() && !self.contains(handle.id()) {
            self.insert(handle.clone());
            added += 1;
        }
        for reference in handle.reference_tables() {
            added += self.put_recursively(reference);
        }
        added
    }

    /// Removes the physical tables reachable from `handle` that are owned by
    /// `owner`. Returns how many tables were removed.
    pub fn remove_recursively(&mut self, handle: &TableHandle, owner: NodeId) -> usize {
        let mut removed = 0;
        if handle.owner() == Some(owner) && self.remove(handle.id()).is_some() {
            removed += 1;
        }
        if handle.owner() == Some(owner) {
            for reference in handle.reference_tables() {
                removed += self.remove_recursively(reference, owner);
            }
        }
        removed
    }
}
