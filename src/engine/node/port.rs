// Copyright © 2025 Flowbench

use arcstr::ArcStr;
use serde::{Deserialize, Serialize};

use super::super::error::{Error, Result};
use super::super::monitor::ExecutionMonitor;
use super::super::spec::TableSpec;
use super::super::table::TableHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortKind {
    FlowVariable,
    Table,
    Generic,
}

/// Declares what a port carries and whether a connection is required.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortType {
    pub kind: PortKind,
    pub optional: bool,
}

impl PortType {
    pub fn table() -> Self {
        Self {
            kind: PortKind::Table,
            optional: false,
        }
    }

    pub fn generic() -> Self {
        Self {
            kind: PortKind::Generic,
            optional: false,
        }
    }

    pub fn flow_variable() -> Self {
        Self {
            kind: PortKind::FlowVariable,
            optional: false,
        }
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }
}

/// Type tag of a generic (non-table) port payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenericSpec {
    pub type_name: ArcStr,
}

/// A non-table port payload. The payload travels as JSON so that a
/// defensive copy is a serialization round trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenericObject {
    pub spec: GenericSpec,
    pub payload: serde_json::Value,
}

/// What a port will carry once the node executes. `Inactive` marks a port
/// on a branch that is switched off; it is compatible with every port type.
#[derive(Debug, Clone, PartialEq)]
pub enum PortObjectSpec {
    FlowVariable,
    Table(TableSpec),
    Generic(GenericSpec),
    Inactive,
}

impl PortObjectSpec {
    pub fn is_inactive(&self) -> bool {
        matches!(self, Self::Inactive)
    }

    pub fn is_instance_of(&self, ty: PortType) -> bool {
        match self {
            Self::Inactive => true,
            Self::FlowVariable => ty.kind == PortKind::FlowVariable,
            Self::Table(_) => ty.kind == PortKind::Table,
            Self::Generic(_) => ty.kind == PortKind::Generic,
        }
    }
}

#[derive(Debug, Clone)]
pub enum PortObject {
    FlowVariable,
    Table(TableHandle),
    Generic(GenericObject),
    Inactive,
}

impl PortObject {
    pub fn is_inactive(&self) -> bool {
        matches!(self, Self::Inactive)
    }

    pub fn is_instance_of(&self, ty: PortType) -> bool {
        self.spec().is_instance_of(ty)
    }

    pub fn spec(&self) -> PortObjectSpec {
        match self {
            Self::FlowVariable => PortObjectSpec::FlowVariable,
            Self::Table(table) => PortObjectSpec::Table(table.spec().clone()),
            Self::Generic(object) => PortObjectSpec::Generic(object.spec.clone()),
            Self::Inactive => PortObjectSpec::Inactive,
        }
    }

    pub fn summary(&self) -> String {
        match self {
            Self::FlowVariable => "flow variables".to_owned(),
            Self::Table(table) => table.summary(),
            Self::Generic(object) => object.spec.type_name.to_string(),
            Self::Inactive => "inactive".to_owned(),
        }
    }

    pub fn as_table(&self) -> Option<&TableHandle> {
        match self {
            Self::Table(table) => Some(table),
            _ => None,
        }
    }
}

/// Deep-copies a port object so the receiver can mutate it freely.
///
/// Tables are excluded: they are immutable, shared by handle, and copying
/// one here would bypass the repository bookkeeping.
pub fn copy_port_object(object: &PortObject, monitor: &ExecutionMonitor) -> Result<PortObject> {
    monitor.check_canceled()?;
    match object {
        PortObject::FlowVariable => Ok(PortObject::FlowVariable),
        PortObject::Inactive => Ok(PortObject::Inactive),
        PortObject::Table(_) => Err(Error::TableCopyNotSupported),
        PortObject::Generic(generic) => {
            let bytes = serde_json::to_vec(generic)
                .map_err(|e| Error::Other(Box::new(e)))?;
            monitor.check_canceled()?;
            let copy: GenericObject =
                serde_json::from_slice(&bytes).map_err(|e| Error::Other(Box::new(e)))?;
            Ok(PortObject::Generic(copy))
        }
    }
}
