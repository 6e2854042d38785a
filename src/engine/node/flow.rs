// Copyright © 2025 Flowbench

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use arcstr::ArcStr;
use serde::{Deserialize, Serialize};

use super::NodeId;

/// Pushed onto the flow object stack by a failed node inside an active
/// try scope, alongside the three detail variables below.
pub const FAILURE_FLAG_VARIABLE: &str = "failure";
pub const FAILURE_NODE_VARIABLE: &str = "failure_node";
pub const FAILURE_MESSAGE_VARIABLE: &str = "failure_message";
pub const FAILURE_DETAILS_VARIABLE: &str = "failure_details";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FlowValue {
    String(ArcStr),
    Int(i64),
    Float(f64),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowVariable {
    pub name: ArcStr,
    pub value: FlowValue,
}

impl FlowVariable {
    pub fn string(name: impl Into<ArcStr>, value: impl Into<ArcStr>) -> Self {
        Self {
            name: name.into(),
            value: FlowValue::String(value.into()),
        }
    }

    pub fn int(name: impl Into<ArcStr>, value: i64) -> Self {
        Self {
            name: name.into(),
            value: FlowValue::Int(value),
        }
    }

    pub fn float(name: impl Into<ArcStr>, value: f64) -> Self {
        Self {
            name: name.into(),
            value: FlowValue::Float(value),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopeKind {
    Loop,
    TryCatch,
    Capture,
}

/// Shared between the node that opens a scope and every node inside it.
/// The start node pushes it, downstream nodes observe and mutate it.
#[derive(Debug)]
pub struct ScopeContext {
    kind: ScopeKind,
    owner: NodeId,
    inactive: AtomicBool,
    iteration: AtomicU64,
}

impl ScopeContext {
    pub fn new(kind: ScopeKind, owner: NodeId) -> Arc<Self> {
        Arc::new(Self {
            kind,
            owner,
            inactive: AtomicBool::new(false),
            iteration: AtomicU64::new(0),
        })
    }

    pub fn kind(&self) -> ScopeKind {
        self.kind
    }

    pub fn owner(&self) -> NodeId {
        self.owner
    }

    pub fn mark_inactive(&self) {
        self.inactive.store(true, Ordering::Relaxed);
    }

    pub fn is_inactive(&self) -> bool {
        self.inactive.load(Ordering::Relaxed)
    }

    pub fn iteration(&self) -> u64 {
        self.iteration.load(Ordering::Relaxed)
    }

    pub fn advance_iteration(&self) {
        self.iteration.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone)]
pub enum FlowObject {
    Variable(FlowVariable),
    Scope(Arc<ScopeContext>),
}

/// The stack of flow variables and open scopes visible at one port.
/// Later pushes shadow earlier variables of the same name.
#[derive(Debug, Clone, Default)]
pub struct FlowObjectStack {
    objects: Vec<FlowObject>,
}

impl FlowObjectStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn push_variable(&mut self, variable: FlowVariable) {
        self.objects.push(FlowObject::Variable(variable));
    }

    pub fn push_scope(&mut self, scope: Arc<ScopeContext>) {
        self.objects.push(FlowObject::Scope(scope));
    }

    /// The innermost open scope, if any.
    pub fn peek_scope(&self) -> Option<&Arc<ScopeContext>> {
        self.objects.iter().rev().find_map(|object| match object {
            FlowObject::Scope(scope) => Some(scope),
            FlowObject::Variable(_) => None,
        })
    }

    /// The innermost open scope of the given kind.
    pub fn peek_scope_of(&self, kind: ScopeKind) -> Option<&Arc<ScopeContext>> {
        self.objects.iter().rev().find_map(|object| match object {
            FlowObject::Scope(scope) if scope.kind() == kind => Some(scope),
            _ => None,
        })
    }

    /// Removes the innermost scope and every variable pushed above it.
    pub fn pop_scope(&mut self) -> Option<Arc<ScopeContext>> {
        let position = self
            .objects
            .iter()
            .rposition(|object| matches!(object, FlowObject::Scope(_)))?;
        let scope = match self.objects.drain(position..).next() {
            Some(FlowObject::Scope(scope)) => scope,
            _ => unreachable!("rposition found a scope at this index"),
        };
        Some(scope)
    }

    /// The visible value of a variable, honoring shadowing.
    pub fn get_variable(&self, name: &str) -> Option<&FlowVariable> {
        self.objects.iter().rev().find_map(|object| match object {
            FlowObject::Variable(variable) if variable.name == name => Some(variable),
            _ => None,
        })
    }

    pub fn variables(&self) -> impl Iterator<Item = &FlowVariable> {
        self.objects.iter().filter_map(|object| match object {
            FlowObject::Variable(variable) => Some(variable),
            FlowObject::Scope(_) => None,
        })
    }
}
