// Copyright © 2025 Flowbench

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use arcstr::ArcStr;
use log::debug;
use scopeguard::ScopeGuard;
use tempfile::TempDir;

use super::error::Result;
use super::filestore::{FileStore, FileStoreHandler};
use super::monitor::ExecutionMonitor;
use super::node::NodeId;
use super::spec::TableSpec;
use super::table::{
    ConcatenateOptions, ContainerEnv, ContainerSettings, MemoryPolicy, RearrangePlan, Selection,
    TableBackend, TableContainer, TableHandle, TableIdGen, TableRepository,
};
use super::value::Row;

/// Anything the context can cache into a new physical table.
///
/// The blanket table implementation short-circuits: caching a table that
/// already lives in a repository returns the same handle without copying.
pub trait RowSequence {
    fn spec(&self) -> &TableSpec;

    fn as_table(&self) -> Option<&TableHandle> {
        None
    }

    fn row_count_hint(&self) -> Option<u64> {
        None
    }

    fn iter(&self) -> Result<Box<dyn Iterator<Item = Result<Row>> + Send>>;
}

impl RowSequence for TableHandle {
    fn spec(&self) -> &TableSpec {
        TableHandle::spec(self)
    }

    fn as_table(&self) -> Option<&TableHandle> {
        Some(self)
    }

    fn row_count_hint(&self) -> Option<u64> {
        self.row_count()
    }

    fn iter(&self) -> Result<Box<dyn Iterator<Item = Result<Row>> + Send>> {
        self.iter_rows()
    }
}

/// Workflow-wide shared state: the global table repository, the id
/// generators and the storage backend. One instance per workflow.
#[derive(Clone)]
pub struct WorkflowEnv {
    global_repo: Arc<Mutex<TableRepository>>,
    ids: TableIdGen,
    node_ids: Arc<AtomicU64>,
    handler_seq: Arc<AtomicU64>,
    backend: Arc<dyn TableBackend>,
    memory_policy: MemoryPolicy,
    temp_root: Arc<TempDir>,
}

impl WorkflowEnv {
    pub fn new() -> Result<Self> {
        Self::with_backend(Arc::new(super::table::MemoryBackend))
    }

    pub fn with_backend(backend: Arc<dyn TableBackend>) -> Result<Self> {
        Ok(Self {
            global_repo: Arc::new(Mutex::new(TableRepository::new())),
            ids: TableIdGen::new(),
            node_ids: Arc::new(AtomicU64::new(0)),
            handler_seq: Arc::new(AtomicU64::new(0)),
            backend,
            memory_policy: MemoryPolicy::default(),
            temp_root: Arc::new(TempDir::new()?),
        })
    }

    pub fn set_memory_policy(&mut self, policy: MemoryPolicy) {
        self.memory_policy = policy;
    }

    pub fn memory_policy(&self) -> MemoryPolicy {
        self.memory_policy
    }

    pub fn next_node_id(&self) -> NodeId {
        NodeId::new(self.node_ids.fetch_add(1, Ordering::Relaxed))
    }

    pub fn table_ids(&self) -> &TableIdGen {
        &self.ids
    }

    pub fn global_repository(&self) -> &Arc<Mutex<TableRepository>> {
        &self.global_repo
    }

    pub fn backend(&self) -> &Arc<dyn TableBackend> {
        &self.backend
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.temp_root.path().to_path_buf()
    }

    /// A fresh file store handler for one node execution. Each execution
    /// gets its own directory so disposing the previous handler can never
    /// touch the new one.
    pub fn new_file_store_handler(&self, node: NodeId) -> FileStoreHandler {
        let seq = self.handler_seq.fetch_add(1, Ordering::Relaxed);
        let base = self
            .temp_root
            .path()
            .join(format!("filestore-{node}-{seq}"));
        FileStoreHandler::new(base)
    }
}

/// Handed to a node model for the duration of one execution. All
/// table-producing operations go through here so the engine can track
/// ownership, register results in the local repository and route progress
/// and cancellation.
pub struct ExecutionContext {
    monitor: ExecutionMonitor,
    node: NodeId,
    node_name: ArcStr,
    global_repo: Arc<Mutex<TableRepository>>,
    local_repo: Arc<Mutex<TableRepository>>,
    ids: TableIdGen,
    backend: Arc<dyn TableBackend>,
    memory_policy: MemoryPolicy,
    file_store: Arc<FileStoreHandler>,
    temp_dir: PathBuf,
    force_sync: bool,
}

impl ExecutionContext {
    pub fn new(
        env: &WorkflowEnv,
        node: NodeId,
        node_name: ArcStr,
        monitor: ExecutionMonitor,
        file_store: Arc<FileStoreHandler>,
        force_sync: bool,
    ) -> Self {
        Self {
            monitor,
            node,
            node_name,
            global_repo: env.global_repo.clone(),
            local_repo: Arc::new(Mutex::new(TableRepository::new())),
            ids: env.ids.clone(),
            backend: env.backend.clone(),
            memory_policy: env.memory_policy,
            file_store,
            temp_dir: env.temp_dir(),
            force_sync,
        }
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn node_name(&self) -> &ArcStr {
        &self.node_name
    }

    pub fn monitor(&self) -> &ExecutionMonitor {
        &self.monitor
    }

    pub fn check_canceled(&self) -> Result<()> {
        self.monitor.check_canceled()
    }

    pub fn set_progress(&self, progress: f64) {
        self.monitor.set_progress(progress);
    }

    pub fn set_progress_with_message(&self, progress: f64, message: impl Into<String>) {
        self.monitor.set_progress_with_message(progress, message);
    }

    pub fn set_message(&self, message: impl Into<String>) {
        self.monitor.set_message(Some(message.into()));
    }

    pub fn local_repository(&self) -> &Arc<Mutex<TableRepository>> {
        &self.local_repo
    }

    pub fn global_repository(&self) -> &Arc<Mutex<TableRepository>> {
        &self.global_repo
    }

    fn container_env(&self) -> ContainerEnv {
        ContainerEnv {
            owner: self.node,
            ids: self.ids.clone(),
            local_repo: self.local_repo.clone(),
            cancel: self.monitor.cancel_token(),
            memory_policy: self.memory_policy,
            file_store: self.file_store.clone(),
            temp_dir: self.temp_dir.clone(),
            force_sync: self.force_sync,
        }
    }

    pub fn create_container(
        &self,
        spec: TableSpec,
        settings: &ContainerSettings,
    ) -> TableContainer {
        self.backend
            .create_container(spec, settings, self.container_env())
    }

    /// Copies `data` into a new physical table. If `data` already is a
    /// table, the same handle is returned without copying any rows.
    pub fn cache(&self, data: &dyn RowSequence) -> Result<TableHandle> {
        if let Some(table) = data.as_table() {
            debug!(
                "node {}: caching table {} resolves to the table itself",
                self.node,
                table.id()
            );
            return Ok(table.clone());
        }
        let container = self.create_container(data.spec().clone(), &ContainerSettings::default());
        let mut container = scopeguard::guard(container, TableContainer::discard);
        let total = data.row_count_hint();
        for (index, row) in data.iter()?.enumerate() {
            self.check_canceled()?;
            container.push_row(row?)?;
            match total {
                #[allow(clippy::cast_precision_loss)]
                Some(total) => self.set_progress_with_message(
                    (index + 1) as f64 / total.max(1) as f64,
                    format!("caching row {} of {total}", index + 1),
                ),
                None => self.set_message(format!("caching row {}", index + 1)),
            }
        }
        ScopeGuard::into_inner(container).close()
    }

    /// Caches several sequences, splitting the progress evenly among them.
    pub fn cache_many(&self, data: &[&dyn RowSequence]) -> Result<Vec<TableHandle>> {
        #[allow(clippy::cast_precision_loss)]
        let fraction = 1.0 / data.len().max(1) as f64;
        data.iter()
            .map(|sequence| self.create_sub_context(fraction).cache(*sequence))
            .collect()
    }

    /// Stamps a freshly derived table with the executing node. The first
    /// stamp wins, so references created by upstream nodes keep their owner.
    fn adopt(&self, handle: TableHandle) -> TableHandle {
        handle.set_owner_recursively(self.node);
        handle
    }

    pub fn rearrange_columns(
        &self,
        source: &TableHandle,
        plan: RearrangePlan,
    ) -> Result<TableHandle> {
        self.backend
            .rearrange(source, plan, self.container_env(), &self.monitor)
            .map(|handle| self.adopt(handle))
    }

    pub fn replace_spec(&self, source: &TableHandle, spec: TableSpec) -> Result<TableHandle> {
        self.backend
            .replace_spec(source, spec, &self.ids)
            .map(|handle| self.adopt(handle))
    }

    pub fn concatenate(
        &self,
        parts: &[TableHandle],
        options: &ConcatenateOptions,
    ) -> Result<TableHandle> {
        self.backend
            .concatenate(parts, options, &self.ids, &self.monitor)
            .map(|handle| self.adopt(handle))
    }

    pub fn join(&self, left: &TableHandle, right: &TableHandle) -> Result<TableHandle> {
        self.backend
            .append_columns(left, right, &self.ids, &self.monitor)
            .map(|handle| self.adopt(handle))
    }

    pub fn slice(&self, source: &TableHandle, selection: Selection) -> Result<TableHandle> {
        self.backend
            .slice(source, selection, &self.ids)
            .map(|handle| self.adopt(handle))
    }

    /// A zero-copy view with a fresh id. Used to hand an input table through
    /// to an output without claiming ownership of the original.
    pub fn wrap(&self, source: &TableHandle) -> TableHandle {
        self.adopt(TableHandle::new_wrapped(self.ids.next_id(), source.clone()))
    }

    /// A table with a spec but no rows to iterate; its row count is unknown.
    pub fn void_table(&self, spec: TableSpec) -> TableHandle {
        self.adopt(TableHandle::new_void(self.ids.next_id(), spec))
    }

    /// Disposes a scratch table created during this execution. Tables that
    /// were published to the workflow repository or that belong to another
    /// node are refused.
    pub fn clear(&self, table: &TableHandle) -> Result<()> {
        if table.owner() != Some(self.node) {
            return Err(super::error::Error::NotOwner);
        }
        if self.global_repo.lock().unwrap().contains(table.id()) {
            return Err(super::error::Error::AlreadyPublished);
        }
        table.clear_single(self.node)?;
        self.local_repo.lock().unwrap().remove(table.id());
        Ok(())
    }

    pub fn create_sub_context(&self, fraction: f64) -> Self {
        self.sub_context(self.monitor.create_sub_progress(fraction))
    }

    pub fn create_silent_sub_context(&self, fraction: f64) -> Self {
        self.sub_context(self.monitor.create_silent_sub_progress(fraction))
    }

    fn sub_context(&self, monitor: ExecutionMonitor) -> Self {
        Self {
            monitor,
            node: self.node,
            node_name: self.node_name.clone(),
            global_repo: self.global_repo.clone(),
            local_repo: self.local_repo.clone(),
            ids: self.ids.clone(),
            backend: self.backend.clone(),
            memory_policy: self.memory_policy,
            file_store: self.file_store.clone(),
            temp_dir: self.temp_dir.clone(),
            force_sync: self.force_sync,
        }
    }

    pub fn create_file_store(&self, name: &str) -> Result<FileStore> {
        self.file_store.create_file_store(name)
    }
}
