// Copyright © 2025 Flowbench

use std::collections::HashSet;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread;

use crossbeam_channel::{Receiver, Sender};
use tempfile::NamedTempFile;
use xxhash_rust::xxh3::Xxh3Builder;

use super::super::error::{Error, Result};
use super::super::filestore::{FileStore, FileStoreHandler};
use super::super::monitor::CancelToken;
use super::super::node::NodeId;
use super::super::spec::{ColumnSpec, Domain, TableSpec};
use super::super::value::{Row, RowKey};
use super::{TableHandle, TableIdGen, TableRepository};

/// Workflow-wide default for how many cells a container keeps in memory
/// before spilling to disk.
#[derive(Debug, Clone, Copy)]
pub struct MemoryPolicy {
    pub max_cells_in_memory: usize,
}

impl Default for MemoryPolicy {
    fn default() -> Self {
        Self {
            max_cells_in_memory: 100_000,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MemoryLimit {
    /// Use the workflow-wide [`MemoryPolicy`].
    #[default]
    NodePolicy,
    /// Keep at most this many cells in memory. Zero spills immediately.
    Cells(usize),
}

#[derive(Debug, Clone, Default)]
pub struct ContainerSettings {
    /// Seed the output domains from the declared spec instead of computing
    /// them from observed values only.
    pub init_domains: bool,
    pub memory_limit: MemoryLimit,
    /// Handler for file stores allocated through this container. Preview
    /// containers supply their own so they stay off the executing node's
    /// file-store lifecycle; `None` uses the node's handler.
    pub file_store: Option<Arc<FileStoreHandler>>,
}

/// Everything a container needs from its surrounding execution.
#[derive(Clone)]
pub struct ContainerEnv {
    pub owner: NodeId,
    pub ids: TableIdGen,
    pub local_repo: Arc<Mutex<TableRepository>>,
    pub cancel: CancelToken,
    pub memory_policy: MemoryPolicy,
    pub file_store: Arc<FileStoreHandler>,
    pub temp_dir: PathBuf,
    pub force_sync: bool,
}

struct BufferState {
    rows: Vec<Row>,
    cells_in_memory: usize,
    max_cells: usize,
    spill: Option<BufWriter<NamedTempFile>>,
    temp_dir: PathBuf,
    total_rows: u64,
}

enum FinishedStorage {
    InMemory(Vec<Row>),
    Spilled { file: NamedTempFile, rows: u64 },
}

impl BufferState {
    fn new(max_cells: usize, temp_dir: PathBuf) -> Self {
        Self {
            rows: Vec::new(),
            cells_in_memory: 0,
            max_cells,
            spill: None,
            temp_dir,
            total_rows: 0,
        }
    }

    fn push(&mut self, row: Row) -> Result<()> {
        self.total_rows += 1;
        if let Some(writer) = &mut self.spill {
            bincode::serialize_into(writer, &row)?;
            return Ok(());
        }
        self.cells_in_memory += row.cells.len().max(1);
        self.rows.push(row);
        if self.cells_in_memory > self.max_cells {
            let file = NamedTempFile::new_in(&self.temp_dir)?;
            let mut writer = BufWriter::new(file);
            for row in self.rows.drain(..) {
                bincode::serialize_into(&mut writer, &row)?;
            }
            self.cells_in_memory = 0;
            self.spill = Some(writer);
        }
        Ok(())
    }

    fn finish(self) -> Result<FinishedStorage> {
        match self.spill {
            Some(mut writer) => {
                writer.flush()?;
                let file = writer
                    .into_inner()
                    .map_err(|e| Error::Io(e.into_error()))?;
                Ok(FinishedStorage::Spilled {
                    file,
                    rows: self.total_rows,
                })
            }
            None => Ok(FinishedStorage::InMemory(self.rows)),
        }
    }
}

fn run_writer(receiver: &Receiver<Row>, cancel: &CancelToken, mut state: BufferState) -> Result<BufferState> {
    for row in receiver {
        cancel.check()?;
        state.push(row)?;
    }
    Ok(state)
}

enum Writer {
    Sync(BufferState),
    Async {
        sender: Sender<Row>,
        handle: Option<thread::JoinHandle<Result<BufferState>>>,
    },
}

/// Append-only sink producing a new physical table.
///
/// Rows are validated and domain-tracked synchronously; serialization and
/// disk spill run on a dedicated writer thread unless the container is
/// forced synchronous. A canceled execution tears the writer down between
/// rows and surfaces as [`Error::Canceled`] on the next push or on close.
pub struct TableContainer {
    spec: TableSpec,
    env: ContainerEnv,
    file_store: Arc<FileStoreHandler>,
    seen_keys: HashSet<RowKey, Xxh3Builder>,
    domains: Vec<Domain>,
    writer: Writer,
}

impl TableContainer {
    pub fn new(spec: TableSpec, settings: &ContainerSettings, env: ContainerEnv) -> Self {
        let max_cells = match settings.memory_limit {
            MemoryLimit::NodePolicy => env.memory_policy.max_cells_in_memory,
            MemoryLimit::Cells(cells) => cells,
        };
        let file_store = settings
            .file_store
            .clone()
            .unwrap_or_else(|| env.file_store.clone());
        let domains = spec
            .columns()
            .iter()
            .map(|column| {
                if settings.init_domains {
                    column.domain.clone()
                } else {
                    Domain::default()
                }
            })
            .collect();
        let state = BufferState::new(max_cells, env.temp_dir.clone());
        let writer = if env.force_sync {
            Writer::Sync(state)
        } else {
            let (sender, receiver) = crossbeam_channel::unbounded();
            let cancel = env.cancel.clone();
            let handle = thread::Builder::new()
                .name("flowbench:table_writer".to_owned())
                .spawn(move || run_writer(&receiver, &cancel, state))
                .expect("table writer thread creation failed");
            Writer::Async {
                sender,
                handle: Some(handle),
            }
        };
        Self {
            spec,
            env,
            file_store,
            seen_keys: HashSet::with_hasher(Xxh3Builder::new()),
            domains,
            writer,
        }
    }

    pub fn spec(&self) -> &TableSpec {
        &self.spec
    }

    /// Allocates a file store through the container's handler.
    pub fn create_file_store(&self, name: &str) -> Result<FileStore> {
        self.file_store.create_file_store(name)
    }

    pub fn row_count(&self) -> u64 {
        self.seen_keys.len() as u64
    }

    pub fn push_row(&mut self, row: Row) -> Result<()> {
        self.spec.validate_row(&row)?;
        if !self.seen_keys.insert(row.key.clone()) {
            return Err(Error::DuplicateRowKey(row.key));
        }
        for (domain, cell) in self.domains.iter_mut().zip(&row.cells) {
            domain.expand(cell);
        }
        match &mut self.writer {
            Writer::Sync(state) => state.push(row),
            Writer::Async { sender, handle } => {
                if sender.send(row).is_ok() {
                    return Ok(());
                }
                // the writer thread bailed out; surface its error here
                match handle.take() {
                    Some(handle) => {
                        let result = handle.join().map_err(Error::from_panic_payload)?;
                        Err(result.err().unwrap_or(Error::Canceled))
                    }
                    None => Err(Error::Canceled),
                }
            }
        }
    }

    /// Finishes the table: joins the writer, registers the new physical
    /// table in the local repository and returns its handle.
    pub fn close(self) -> Result<TableHandle> {
        let state = match self.writer {
            Writer::Sync(state) => state,
            Writer::Async { sender, handle } => {
                drop(sender);
                match handle {
                    Some(handle) => handle.join().map_err(Error::from_panic_payload)??,
                    None => return Err(Error::Canceled),
                }
            }
        };
        let columns = self
            .spec
            .columns()
            .iter()
            .zip(self.domains)
            .map(|(column, domain)| ColumnSpec::new(column.name.clone(), column.dtype).with_domain(domain))
            .collect();
        let spec = TableSpec::new(columns)?;
        let id = self.env.ids.next_id();
        let handle = match state.finish()? {
            FinishedStorage::InMemory(rows) => TableHandle::new_in_memory(id, spec, rows),
            FinishedStorage::Spilled { file, rows } => {
                TableHandle::new_spilled(id, spec, file, rows)
            }
        };
        handle.set_owner_recursively(self.env.owner);
        self.env.local_repo.lock().unwrap().insert(handle.clone());
        Ok(handle)
    }

    /// Abandons the table without producing a handle. Buffered rows and any
    /// spill file are dropped.
    pub fn discard(self) {
        if let Writer::Async { sender, handle } = self.writer {
            drop(sender);
            if let Some(handle) = handle {
                let _ = handle.join();
            }
        }
    }
}
