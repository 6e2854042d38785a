// too sensitive for `Box<dyn Fn(...)>`
#![allow(clippy::type_complexity)]

pub mod error;
pub use self::error::{Error, Result};

pub mod value;
pub use self::value::{Row, RowKey, Type, Value};

pub mod spec;
pub use spec::{ColumnSpec, Domain, TableSpec};

pub mod monitor;
pub use monitor::{CancelToken, ExecutionMonitor};

pub mod table;
pub use table::{
    ConcatenateOptions, ContainerEnv, ContainerSettings, MemoryBackend, MemoryLimit, MemoryPolicy,
    RearrangeColumn, RearrangePlan, Selection, TableBackend, TableContainer, TableHandle, TableId,
    TableIdGen, TableRepository,
};

pub mod context;
pub use context::{ExecutionContext, RowSequence, WorkflowEnv};

pub mod filestore;
pub use filestore::{FileStore, FileStoreHandler};

pub mod node;
pub use node::{
    copy_port_object, FlowObjectStack, FlowValue, FlowVariable, GenericObject, GenericSpec,
    LoopStatus, Node, NodeId, NodeMessage, NodeModel, PortKind, PortObject, PortObjectSpec,
    PortType, ScopeContext, ScopeKind, Severity,
};
