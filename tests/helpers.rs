#![allow(dead_code)]

use std::sync::Arc;

use flowbench_engine::engine::error::DynResult;
use flowbench_engine::engine::{
    ColumnSpec, ContainerSettings, Error, ExecutionContext, ExecutionMonitor, LoopStatus, Node,
    NodeId, NodeModel, PortObject, PortObjectSpec, PortType, Result, Row, RowSequence, ScopeKind,
    TableHandle, TableSpec, Type, Value, WorkflowEnv,
};

pub fn make_env() -> WorkflowEnv {
    WorkflowEnv::new().expect("workflow env creation failed")
}

pub fn make_context(env: &WorkflowEnv) -> ExecutionContext {
    make_context_for(env, env.next_node_id())
}

pub fn make_context_for(env: &WorkflowEnv, node: NodeId) -> ExecutionContext {
    make_context_with_monitor(env, node, ExecutionMonitor::new())
}

pub fn make_context_with_monitor(
    env: &WorkflowEnv,
    node: NodeId,
    monitor: ExecutionMonitor,
) -> ExecutionContext {
    let file_store = Arc::new(env.new_file_store_handler(node));
    ExecutionContext::new(env, node, "test node".into(), monitor, file_store, false)
}

pub fn spec_of(columns: &[(&str, Type)]) -> TableSpec {
    TableSpec::new(
        columns
            .iter()
            .map(|(name, dtype)| ColumnSpec::new(*name, *dtype))
            .collect(),
    )
    .expect("column names in a test spec must be unique")
}

pub fn int_spec(names: &[&str]) -> TableSpec {
    TableSpec::new(names.iter().map(|name| ColumnSpec::new(*name, Type::Int)).collect())
        .expect("column names in a test spec must be unique")
}

pub fn int_row(key: &str, values: &[i64]) -> Row {
    Row::new(key, values.iter().map(|&value| Value::Int(value)).collect())
}

pub fn build_table(
    exec: &ExecutionContext,
    spec: &TableSpec,
    rows: Vec<Row>,
) -> Result<TableHandle> {
    let mut container = exec.create_container(spec.clone(), &ContainerSettings::default());
    for row in rows {
        container.push_row(row)?;
    }
    container.close()
}

pub fn collect_rows(table: &TableHandle) -> Result<Vec<Row>> {
    table.iter_rows()?.collect()
}

/// An in-memory row source that is not itself a table.
pub struct RowsSource {
    spec: TableSpec,
    rows: Vec<Row>,
}

impl RowsSource {
    pub fn new(spec: TableSpec, rows: Vec<Row>) -> Self {
        Self { spec, rows }
    }
}

impl RowSequence for RowsSource {
    fn spec(&self) -> &TableSpec {
        &self.spec
    }

    fn row_count_hint(&self) -> Option<u64> {
        Some(self.rows.len() as u64)
    }

    fn iter(&self) -> Result<Box<dyn Iterator<Item = Result<Row>> + Send>> {
        Ok(Box::new(self.rows.clone().into_iter().map(Ok)))
    }
}

/// Produces a fixed table on its single output port.
pub struct TableSourceModel {
    pub spec: TableSpec,
    pub rows: Vec<Row>,
}

impl NodeModel for TableSourceModel {
    fn configure(&mut self, _inputs: &[Option<PortObjectSpec>]) -> Result<Vec<PortObjectSpec>> {
        Ok(vec![PortObjectSpec::Table(self.spec.clone())])
    }

    fn execute(
        &mut self,
        _inputs: &[Option<PortObject>],
        context: &ExecutionContext,
    ) -> DynResult<Vec<Option<PortObject>>> {
        let table = context.cache(&RowsSource::new(self.spec.clone(), self.rows.clone()))?;
        Ok(vec![Some(PortObject::Table(table))])
    }
}

pub fn table_source_node(env: &WorkflowEnv, spec: TableSpec, rows: Vec<Row>) -> Node {
    Node::new(
        env.next_node_id(),
        "source",
        Box::new(TableSourceModel { spec, rows }),
        Vec::new(),
        vec![PortType::table()],
    )
}

/// Hands its table input through to the output.
pub struct PassThroughModel;

impl NodeModel for PassThroughModel {
    fn configure(&mut self, inputs: &[Option<PortObjectSpec>]) -> Result<Vec<PortObjectSpec>> {
        match &inputs[0] {
            Some(spec) => Ok(vec![spec.clone()]),
            None => Err(Error::InvalidSettings("input is not connected".to_owned())),
        }
    }

    fn execute(
        &mut self,
        inputs: &[Option<PortObject>],
        context: &ExecutionContext,
    ) -> DynResult<Vec<Option<PortObject>>> {
        match &inputs[0] {
            Some(PortObject::Table(table)) => Ok(vec![Some(PortObject::Table(context.wrap(table)))]),
            Some(other) => Ok(vec![Some(other.clone())]),
            None => Err("missing input".into()),
        }
    }
}

/// Fails every execution. Configuration succeeds with no output ports.
#[derive(Default)]
pub struct FailingModel {
    pub resets: Arc<std::sync::atomic::AtomicUsize>,
}

impl NodeModel for FailingModel {
    fn configure(&mut self, _inputs: &[Option<PortObjectSpec>]) -> Result<Vec<PortObjectSpec>> {
        Ok(Vec::new())
    }

    fn execute(
        &mut self,
        _inputs: &[Option<PortObject>],
        _context: &ExecutionContext,
    ) -> DynResult<Vec<Option<PortObject>>> {
        Err("deliberate failure".into())
    }

    fn reset(&mut self) {
        self.resets
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    }
}

pub struct ScopeStartModel {
    pub kind: ScopeKind,
}

impl NodeModel for ScopeStartModel {
    fn configure(&mut self, _inputs: &[Option<PortObjectSpec>]) -> Result<Vec<PortObjectSpec>> {
        Ok(Vec::new())
    }

    fn execute(
        &mut self,
        _inputs: &[Option<PortObject>],
        _context: &ExecutionContext,
    ) -> DynResult<Vec<Option<PortObject>>> {
        Ok(Vec::new())
    }

    fn scope_start_kind(&self) -> Option<ScopeKind> {
        Some(self.kind)
    }
}

/// A loop end that requests `iterations` passes through the loop body.
pub struct LoopEndModel {
    pub remaining: u64,
}

impl NodeModel for LoopEndModel {
    fn configure(&mut self, _inputs: &[Option<PortObjectSpec>]) -> Result<Vec<PortObjectSpec>> {
        Ok(Vec::new())
    }

    fn execute(
        &mut self,
        _inputs: &[Option<PortObject>],
        _context: &ExecutionContext,
    ) -> DynResult<Vec<Option<PortObject>>> {
        self.remaining = self.remaining.saturating_sub(1);
        Ok(Vec::new())
    }

    fn scope_end_kind(&self) -> Option<ScopeKind> {
        Some(ScopeKind::Loop)
    }

    fn loop_status(&self) -> LoopStatus {
        if self.remaining > 0 {
            LoopStatus::Continue
        } else {
            LoopStatus::Finished
        }
    }
}
