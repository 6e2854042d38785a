// Copyright © 2025 Flowbench

use std::collections::HashSet;

use arcstr::ArcStr;
use xxhash_rust::xxh3::Xxh3Builder;

use super::super::error::{DynResult, Error, Result};
use super::super::monitor::ExecutionMonitor;
use super::super::spec::{ColumnSpec, TableSpec};
use super::super::value::{Row, RowKey, Value};
use super::container::{ContainerEnv, ContainerSettings, TableContainer};
use super::{RearrangeEntry, RearrangeLayout, Selection, TableHandle, TableIdGen};

/// One output column of a rearrange operation.
pub enum RearrangeColumn {
    /// Pass the source column at this index through unchanged.
    Keep(usize),
    /// Materialize a new column, one generated cell per source row.
    Append {
        spec: ColumnSpec,
        generator: Box<dyn Fn(&Row) -> DynResult<Value> + Send>,
    },
}

/// Describes how to derive a column-rearranged table from a source table.
/// Consumed by the backend; generated columns are materialized eagerly,
/// kept columns stay references into the source.
pub struct RearrangePlan {
    pub columns: Vec<RearrangeColumn>,
}

#[derive(Debug, Clone)]
pub struct ConcatenateOptions {
    /// Appended to a row key as often as needed to make it unique. Without
    /// a suffix, duplicate keys across the inputs are an error.
    pub duplicate_suffix: Option<ArcStr>,
    /// Verify key uniqueness up front instead of failing lazily during
    /// iteration. Only meaningful without a suffix.
    pub precheck_duplicates: bool,
}

impl Default for ConcatenateOptions {
    fn default() -> Self {
        Self {
            duplicate_suffix: None,
            precheck_duplicates: true,
        }
    }
}

/// Creates and derives tables. The execution context delegates every
/// table-producing operation here, so an alternative storage engine can be
/// swapped in underneath the whole node machinery.
pub trait TableBackend: Send + Sync {
    fn create_container(
        &self,
        spec: TableSpec,
        settings: &ContainerSettings,
        env: ContainerEnv,
    ) -> TableContainer;

    fn rearrange(
        &self,
        source: &TableHandle,
        plan: RearrangePlan,
        env: ContainerEnv,
        monitor: &ExecutionMonitor,
    ) -> Result<TableHandle>;

    fn replace_spec(
        &self,
        source: &TableHandle,
        spec: TableSpec,
        ids: &TableIdGen,
    ) -> Result<TableHandle>;

    fn concatenate(
        &self,
        parts: &[TableHandle],
        options: &ConcatenateOptions,
        ids: &TableIdGen,
        monitor: &ExecutionMonitor,
    ) -> Result<TableHandle>;

    fn append_columns(
        &self,
        left: &TableHandle,
        right: &TableHandle,
        ids: &TableIdGen,
        monitor: &ExecutionMonitor,
    ) -> Result<TableHandle>;

    fn slice(
        &self,
        source: &TableHandle,
        selection: Selection,
        ids: &TableIdGen,
    ) -> Result<TableHandle>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryBackend;

impl TableBackend for MemoryBackend {
    fn create_container(
        &self,
        spec: TableSpec,
        settings: &ContainerSettings,
        env: ContainerEnv,
    ) -> TableContainer {
        TableContainer::new(spec, settings, env)
    }

    fn rearrange(
        &self,
        source: &TableHandle,
        plan: RearrangePlan,
        env: ContainerEnv,
        monitor: &ExecutionMonitor,
    ) -> Result<TableHandle> {
        let mut entries = Vec::with_capacity(plan.columns.len());
        let mut output_columns = Vec::with_capacity(plan.columns.len());
        let mut appended_specs = Vec::new();
        let mut generators = Vec::new();
        for column in plan.columns {
            match column {
                RearrangeColumn::Keep(index) => {
                    let column = source
                        .spec()
                        .columns()
                        .get(index)
                        .ok_or(Error::ColumnCountMismatch {
                            expected: source.spec().num_columns(),
                            actual: index + 1,
                        })?
                        .clone();
                    entries.push(RearrangeEntry::Source(index));
                    output_columns.push(column);
                }
                RearrangeColumn::Append { spec, generator } => {
                    entries.push(RearrangeEntry::Appended(appended_specs.len()));
                    output_columns.push(spec.clone());
                    appended_specs.push(spec);
                    generators.push(generator);
                }
            }
        }
        let output_spec = TableSpec::new(output_columns)?;
        let appended_spec = TableSpec::new(appended_specs)?;
        let ids = env.ids.clone();

        let container = TableContainer::new(appended_spec, &ContainerSettings::default(), env);
        let mut container = scopeguard::guard(container, TableContainer::discard);
        let total = source.row_count();
        for (index, row) in source.iter_rows()?.enumerate() {
            monitor.check_canceled()?;
            let row = row?;
            let cells = generators
                .iter()
                .map(|generator| generator(&row).map_err(Error::from))
                .collect::<Result<Vec<_>>>()?;
            container.push_row(Row::new(row.key, cells))?;
            if let Some(total) = total {
                #[allow(clippy::cast_precision_loss)]
                monitor.set_progress((index + 1) as f64 / total.max(1) as f64);
            }
        }
        let appended = scopeguard::ScopeGuard::into_inner(container).close()?;
        Ok(TableHandle::new_rearranged(
            ids.next_id(),
            output_spec,
            source.clone(),
            appended,
            RearrangeLayout { entries },
        ))
    }

    fn replace_spec(
        &self,
        source: &TableHandle,
        spec: TableSpec,
        ids: &TableIdGen,
    ) -> Result<TableHandle> {
        let current = source.spec();
        if spec.num_columns() != current.num_columns() {
            return Err(Error::ColumnCountMismatch {
                expected: current.num_columns(),
                actual: spec.num_columns(),
            });
        }
        for (old, new) in current.columns().iter().zip(spec.columns()) {
            if old.dtype != new.dtype {
                return Err(Error::ColumnTypeMismatch {
                    column: new.name.clone(),
                    expected: old.dtype,
                    actual: new.dtype,
                });
            }
        }
        Ok(TableHandle::new_spec_replaced(
            ids.next_id(),
            spec,
            source.clone(),
        ))
    }

    fn concatenate(
        &self,
        parts: &[TableHandle],
        options: &ConcatenateOptions,
        ids: &TableIdGen,
        monitor: &ExecutionMonitor,
    ) -> Result<TableHandle> {
        let Some((first, rest)) = parts.split_first() else {
            return Err(Error::EmptyTableList);
        };
        let mut spec = first.spec().clone();
        for part in rest {
            spec = spec.union(part.spec())?;
        }
        if options.duplicate_suffix.is_none() && options.precheck_duplicates {
            let mut seen: HashSet<RowKey, Xxh3Builder> = HashSet::with_hasher(Xxh3Builder::new());
            for part in parts {
                for row in part.iter_rows()? {
                    monitor.check_canceled()?;
                    let row = row?;
                    if !seen.insert(row.key.clone()) {
                        return Err(Error::DuplicateRowKey(row.key));
                    }
                }
            }
        }
        Ok(TableHandle::new_concatenated(
            ids.next_id(),
            spec,
            parts.to_vec(),
            options.duplicate_suffix.clone(),
        ))
    }

    fn append_columns(
        &self,
        left: &TableHandle,
        right: &TableHandle,
        ids: &TableIdGen,
        monitor: &ExecutionMonitor,
    ) -> Result<TableHandle> {
        use itertools::{EitherOrBoth, Itertools};

        let spec = left.spec().append(right.spec())?;
        for pair in left.iter_rows()?.zip_longest(right.iter_rows()?) {
            monitor.check_canceled()?;
            match pair {
                EitherOrBoth::Both(left_row, right_row) => {
                    let left_row = left_row?;
                    let right_row = right_row?;
                    if left_row.key != right_row.key {
                        return Err(Error::RowOrderMismatch {
                            expected: left_row.key,
                            actual: right_row.key,
                        });
                    }
                }
                EitherOrBoth::Left(row) | EitherOrBoth::Right(row) => {
                    row?;
                    return Err(Error::RowCountMismatch);
                }
            }
        }
        Ok(TableHandle::new_joined(
            ids.next_id(),
            spec,
            left.clone(),
            right.clone(),
        ))
    }

    fn slice(
        &self,
        source: &TableHandle,
        selection: Selection,
        ids: &TableIdGen,
    ) -> Result<TableHandle> {
        let spec = match &selection.column_indices {
            Some(indices) => source.spec().project(indices)?,
            None => source.spec().clone(),
        };
        Ok(TableHandle::new_sliced(
            ids.next_id(),
            spec,
            source.clone(),
            selection,
        ))
    }
}
