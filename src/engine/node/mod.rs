// Copyright © 2025 Flowbench

use std::collections::HashSet;
use std::fmt::{self, Display};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use arcstr::ArcStr;
use log::{debug, error};

use super::context::{ExecutionContext, WorkflowEnv};
use super::error::{DynError, DynResult, Error, Result};
use super::monitor::ExecutionMonitor;
use super::table::{TableHandle, TableId};

pub mod flow;
pub use flow::{
    FlowObject, FlowObjectStack, FlowValue, FlowVariable, ScopeContext, ScopeKind,
    FAILURE_DETAILS_VARIABLE, FAILURE_FLAG_VARIABLE, FAILURE_MESSAGE_VARIABLE,
    FAILURE_NODE_VARIABLE,
};

pub mod port;
pub use port::{
    copy_port_object, GenericObject, GenericSpec, PortKind, PortObject, PortObjectSpec, PortType,
};

/// Identifies a node uniquely within one workflow.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
pub struct NodeId(u64);

impl NodeId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
    /// A broken model contract, not a user problem.
    CodingProblem,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeMessage {
    pub severity: Severity,
    pub text: String,
}

impl NodeMessage {
    pub fn warning(text: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            text: text.into(),
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            text: text.into(),
        }
    }

    pub fn coding(text: impl Into<String>) -> Self {
        Self {
            severity: Severity::CodingProblem,
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoopStatus {
    #[default]
    Finished,
    /// The loop end requests another iteration of the loop body.
    Continue,
}

/// The algorithm half of a node. Implementations stay oblivious to the
/// state machine around them; they turn input specs into output specs and
/// input objects into output objects, and may keep tables between
/// executions through the internal-table hooks.
pub trait NodeModel: Send {
    /// Port index 0 (the flow-variable port) is not included in `inputs`.
    fn configure(&mut self, inputs: &[Option<PortObjectSpec>]) -> Result<Vec<PortObjectSpec>>;

    /// `None` outputs are only tolerated while a loop keeps iterating.
    fn execute(
        &mut self,
        inputs: &[Option<PortObject>],
        context: &ExecutionContext,
    ) -> DynResult<Vec<Option<PortObject>>>;

    fn reset(&mut self) {}

    /// Variables published to the outgoing stack after a successful
    /// configure or execute.
    fn flow_variables(&self) -> Vec<FlowVariable> {
        Vec::new()
    }

    fn scope_start_kind(&self) -> Option<ScopeKind> {
        None
    }

    fn scope_end_kind(&self) -> Option<ScopeKind> {
        None
    }

    fn is_loop_start(&self) -> bool {
        self.scope_start_kind() == Some(ScopeKind::Loop)
    }

    fn is_loop_end(&self) -> bool {
        self.scope_end_kind() == Some(ScopeKind::Loop)
    }

    /// Consumers process inactive inputs instead of going inactive
    /// themselves (the catch side of a try/catch, loop ends collecting
    /// switched-off branches).
    fn is_inactive_branch_consumer(&self) -> bool {
        false
    }

    /// Tables the model holds on to between executions.
    fn internal_tables(&self) -> Vec<TableHandle> {
        Vec::new()
    }

    /// Called back with the reconciled held tables (input tables the model
    /// kept come back wrapped).
    fn set_internal_tables(&mut self, _tables: Vec<TableHandle>) {}

    /// Polled after a successful execute of a loop end.
    fn loop_status(&self) -> LoopStatus {
        LoopStatus::Finished
    }
}

struct Output {
    ty: PortType,
    spec: Option<PortObjectSpec>,
    object: Option<PortObject>,
    summary: Option<String>,
}

impl Output {
    fn new(ty: PortType) -> Self {
        Self {
            ty,
            spec: None,
            object: None,
            summary: None,
        }
    }
}

type MessageListener = Box<dyn Fn(Option<&NodeMessage>) + Send>;

/// One node of a workflow: a model plus the state machine driving it
/// through configure, execute and reset, with all table-lifecycle
/// bookkeeping attached.
pub struct Node {
    id: NodeId,
    name: ArcStr,
    in_types: Vec<PortType>,
    outputs: Vec<Output>,
    model: Box<dyn NodeModel>,
    message: Option<NodeMessage>,
    listeners: Vec<MessageListener>,
    flow_stack: FlowObjectStack,
    outgoing_stack: FlowObjectStack,
    internal_held: Vec<TableHandle>,
    local_temp_tables: Vec<TableHandle>,
    file_store: Option<Arc<super::filestore::FileStoreHandler>>,
    loop_context: Option<Arc<ScopeContext>>,
    loop_paused: bool,
    force_sync_io: bool,
}

impl Node {
    /// The implicit flow-variable port is prepended to both sides; callers
    /// declare model ports only but address full port indices afterwards.
    pub fn new(
        id: NodeId,
        name: impl Into<ArcStr>,
        model: Box<dyn NodeModel>,
        in_types: Vec<PortType>,
        out_types: Vec<PortType>,
    ) -> Self {
        let mut full_in = Vec::with_capacity(in_types.len() + 1);
        full_in.push(PortType::flow_variable());
        full_in.extend(in_types);
        let mut outputs = Vec::with_capacity(out_types.len() + 1);
        outputs.push(Output::new(PortType::flow_variable()));
        outputs.extend(out_types.into_iter().map(Output::new));
        Self {
            id,
            name: name.into(),
            in_types: full_in,
            outputs,
            model,
            message: None,
            listeners: Vec::new(),
            flow_stack: FlowObjectStack::new(),
            outgoing_stack: FlowObjectStack::new(),
            internal_held: Vec::new(),
            local_temp_tables: Vec::new(),
            file_store: None,
            loop_context: None,
            loop_paused: false,
            force_sync_io: false,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn name(&self) -> &ArcStr {
        &self.name
    }

    pub fn num_in_ports(&self) -> usize {
        self.in_types.len()
    }

    pub fn num_out_ports(&self) -> usize {
        self.outputs.len()
    }

    pub fn in_port_type(&self, port: usize) -> PortType {
        self.in_types[port]
    }

    pub fn out_port_type(&self, port: usize) -> PortType {
        self.outputs[port].ty
    }

    pub fn output_spec(&self, port: usize) -> Option<&PortObjectSpec> {
        self.outputs[port].spec.as_ref()
    }

    pub fn output_object(&self, port: usize) -> Option<&PortObject> {
        self.outputs[port].object.as_ref()
    }

    pub fn output_summary(&self, port: usize) -> Option<&str> {
        self.outputs[port].summary.as_deref()
    }

    pub fn message(&self) -> Option<&NodeMessage> {
        self.message.as_ref()
    }

    pub fn is_configured(&self) -> bool {
        self.outputs[0].spec.is_some()
    }

    pub fn is_executed(&self) -> bool {
        self.outputs[0].object.is_some()
    }

    pub fn is_inactive(&self) -> bool {
        matches!(self.outputs[0].spec, Some(PortObjectSpec::Inactive))
    }

    pub fn set_flow_object_stack(&mut self, stack: FlowObjectStack) {
        self.flow_stack = stack;
    }

    pub fn flow_object_stack(&self) -> &FlowObjectStack {
        &self.flow_stack
    }

    pub fn outgoing_flow_object_stack(&self) -> &FlowObjectStack {
        &self.outgoing_stack
    }

    pub fn loop_context(&self) -> Option<&Arc<ScopeContext>> {
        self.loop_context.as_ref()
    }

    pub fn is_loop_paused(&self) -> bool {
        self.loop_paused
    }

    pub fn pause_loop_execution(&mut self) {
        self.loop_paused = true;
    }

    pub fn resume_loop_execution(&mut self) {
        self.loop_paused = false;
    }

    pub fn continues_loop(&self) -> bool {
        self.model.loop_status() == LoopStatus::Continue
    }

    pub fn internal_held_tables(&self) -> &[TableHandle] {
        &self.internal_held
    }

    pub fn set_force_synchronous_io(&mut self, force: bool) {
        self.force_sync_io = force;
    }

    /// Scratch tables the node wants disposed together with its outputs.
    pub fn add_temporary_tables(&mut self, tables: impl IntoIterator<Item = TableHandle>) {
        self.local_temp_tables.extend(tables);
    }

    pub fn add_message_listener(&mut self, listener: MessageListener) {
        self.listeners.push(listener);
    }

    /// Replaces the node message and notifies every listener. A panicking
    /// listener is logged and skipped; the others still run.
    pub fn set_message(&mut self, message: Option<NodeMessage>) {
        if let Some(NodeMessage {
            severity: Severity::CodingProblem,
            text,
        }) = &message
        {
            error!("node {} ({}): {text}", self.id, self.name);
        }
        self.message = message;
        let message = self.message.as_ref();
        for listener in &self.listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(message))).is_err() {
                error!("node {}: message listener panicked", self.id);
            }
        }
    }

    /// A context for one execution of this node. The file store handler of
    /// the previous execution is disposed and a fresh one installed.
    pub fn create_execution_context(
        &mut self,
        env: &WorkflowEnv,
        monitor: ExecutionMonitor,
    ) -> ExecutionContext {
        if let Some(handler) = self.file_store.take() {
            handler.dispose();
        }
        let handler = Arc::new(env.new_file_store_handler(self.id));
        self.file_store = Some(handler.clone());
        let force_sync = self.force_sync_io || self.model.is_loop_end();
        ExecutionContext::new(env, self.id, self.name.clone(), monitor, handler, force_sync)
    }

    fn fill_outputs_inactive(&mut self) {
        for output in &mut self.outputs {
            output.spec = Some(PortObjectSpec::Inactive);
            output.object = Some(PortObject::Inactive);
            output.summary = Some("inactive".to_owned());
        }
    }

    fn determine_inactive_by_specs(&self, raw_in_specs: &[Option<PortObjectSpec>]) -> bool {
        if self.model.is_inactive_branch_consumer() {
            self.flow_stack
                .peek_scope_of(ScopeKind::Loop)
                .is_some_and(|scope| scope.is_inactive())
        } else {
            raw_in_specs
                .iter()
                .flatten()
                .any(PortObjectSpec::is_inactive)
        }
    }

    fn determine_inactive_by_objects(&self, raw_inputs: &[Option<PortObject>]) -> bool {
        if self.model.is_inactive_branch_consumer() {
            self.flow_stack
                .peek_scope_of(ScopeKind::Loop)
                .is_some_and(|scope| scope.is_inactive())
        } else {
            raw_inputs.iter().flatten().any(PortObject::is_inactive)
        }
    }

    /// Configures the node against the given input specs (port 0 included).
    /// Returns whether the node is configured afterwards. An inactive node
    /// counts as configured; its specs all carry the inactive marker.
    pub fn configure(&mut self, raw_in_specs: &[Option<PortObjectSpec>]) -> bool {
        self.set_message(None);
        for output in &mut self.outputs {
            output.spec = None;
        }
        if raw_in_specs.len() != self.in_types.len() {
            self.set_message(Some(NodeMessage::coding(format!(
                "configure called with {} input specs, node has {} input ports",
                raw_in_specs.len(),
                self.in_types.len()
            ))));
            return false;
        }
        // not an error: upstream simply is not configured yet
        for (ty, spec) in self.in_types.iter().zip(raw_in_specs).skip(1) {
            if !ty.optional && spec.is_none() {
                return false;
            }
        }
        if self.determine_inactive_by_specs(raw_in_specs) {
            for output in &mut self.outputs {
                output.spec = Some(PortObjectSpec::Inactive);
            }
            self.outgoing_stack = self.flow_stack.clone();
            return true;
        }
        let result = catch_unwind(AssertUnwindSafe(|| {
            self.model.configure(&raw_in_specs[1..])
        }));
        let mut specs = match result {
            Ok(Ok(specs)) => specs,
            Ok(Err(Error::InvalidSettings(text))) => {
                self.set_message(Some(NodeMessage::warning(text)));
                return false;
            }
            Ok(Err(error)) => {
                self.set_message(Some(NodeMessage::coding(format!(
                    "configure failed: {error}"
                ))));
                return false;
            }
            Err(payload) => {
                let error = Error::from_panic_payload(payload);
                self.set_message(Some(NodeMessage::coding(format!(
                    "configure panicked: {error}"
                ))));
                return false;
            }
        };
        if specs.len() != self.outputs.len() - 1 {
            self.set_message(Some(NodeMessage::coding(
                Error::WrongOutputCount {
                    expected: self.outputs.len() - 1,
                    actual: specs.len(),
                }
                .to_string(),
            )));
            return false;
        }
        for (port, (spec, output)) in specs.iter().zip(&self.outputs[1..]).enumerate() {
            if !spec.is_instance_of(output.ty) {
                self.set_message(Some(NodeMessage::coding(
                    Error::OutputTypeMismatch(port + 1).to_string(),
                )));
                return false;
            }
        }
        // later iterations see domains only once the loop has finished
        if self.model.is_loop_end() {
            let mid_iteration = self
                .flow_stack
                .peek_scope_of(ScopeKind::Loop)
                .is_some_and(|scope| scope.iteration() > 0);
            if mid_iteration {
                for spec in &mut specs {
                    if let PortObjectSpec::Table(table_spec) = spec {
                        *table_spec = table_spec.without_domains();
                    }
                }
            }
        }
        self.outputs[0].spec = Some(PortObjectSpec::FlowVariable);
        for (output, spec) in self.outputs[1..].iter_mut().zip(specs) {
            output.spec = Some(spec);
        }
        self.outgoing_stack = self.flow_stack.clone();
        for variable in self.model.flow_variables() {
            self.outgoing_stack.push_variable(variable);
        }
        true
    }

    /// Executes the node. Returns whether the node counts as executed
    /// afterwards; a failure downgraded by an active try/catch scope counts
    /// as executed with inactive outputs.
    pub fn execute(&mut self, raw_inputs: &[Option<PortObject>], exec: &ExecutionContext) -> bool {
        self.set_message(None);
        if raw_inputs.len() != self.in_types.len() {
            self.set_message(Some(NodeMessage::coding(format!(
                "execute called with {} inputs, node has {} input ports",
                raw_inputs.len(),
                self.in_types.len()
            ))));
            return false;
        }
        self.outgoing_stack = self.flow_stack.clone();
        let started_scope = self.model.scope_start_kind().map(|kind| {
            let scope = ScopeContext::new(kind, self.id);
            self.outgoing_stack.push_scope(scope.clone());
            if kind == ScopeKind::Loop {
                self.loop_context = Some(scope.clone());
            }
            scope
        });
        if self.determine_inactive_by_objects(raw_inputs) {
            if let Some(scope) = &started_scope {
                scope.mark_inactive();
            }
            if let Some(kind) = self.model.scope_end_kind() {
                let scope = self.flow_stack.peek_scope_of(kind).cloned();
                match scope {
                    None => {
                        self.set_message(Some(NodeMessage::coding(
                            Error::MissingScopeStart.to_string(),
                        )));
                        return false;
                    }
                    Some(scope) if !scope.is_inactive() => {
                        self.set_message(Some(NodeMessage::coding(
                            "scope end is inactive although its scope start executed active"
                                .to_owned(),
                        )));
                        return false;
                    }
                    Some(_) => {
                        self.outgoing_stack.pop_scope();
                    }
                }
            }
            self.fill_outputs_inactive();
            return true;
        }
        let end_scope = match self.model.scope_end_kind() {
            Some(kind) => match self.flow_stack.peek_scope_of(kind) {
                Some(scope) if scope.is_inactive() => {
                    self.set_message(Some(NodeMessage::coding(
                        "scope end executes active although its scope start was inactive"
                            .to_owned(),
                    )));
                    return false;
                }
                Some(scope) => Some(scope.clone()),
                None => {
                    self.set_message(Some(NodeMessage::coding(
                        Error::MissingScopeStart.to_string(),
                    )));
                    return false;
                }
            },
            None => None,
        };
        for (port, (ty, object)) in self.in_types.iter().zip(raw_inputs).enumerate().skip(1) {
            if !ty.optional && object.is_none() {
                self.set_message(Some(NodeMessage::coding(format!(
                    "missing input at port {port}"
                ))));
                return false;
            }
        }
        // models may mutate non-table inputs, so they get their own copy
        let mut model_inputs: Vec<Option<PortObject>> = Vec::with_capacity(raw_inputs.len() - 1);
        for object in &raw_inputs[1..] {
            let copied = match object {
                Some(object @ PortObject::Generic(_)) => {
                    match copy_port_object(object, exec.monitor()) {
                        Ok(copy) => Some(copy),
                        Err(error) if error.is_cancellation() => {
                            self.set_message(Some(NodeMessage::warning("execution canceled")));
                            return false;
                        }
                        Err(error) => {
                            self.set_message(Some(NodeMessage::error(format!(
                                "unable to copy input object: {error}"
                            ))));
                            return false;
                        }
                    }
                }
                other => other.clone(),
            };
            model_inputs.push(copied);
        }
        let result = catch_unwind(AssertUnwindSafe(|| {
            self.model.execute(&model_inputs, exec)
        }))
        .unwrap_or_else(|payload| Err(Box::new(Error::from_panic_payload(payload)) as DynError));
        let outputs = match result {
            Ok(outputs) => outputs,
            Err(dyn_error) => return self.handle_execute_error(Error::from(dyn_error)),
        };
        let continues_loop = self.continues_loop();
        if outputs.len() != self.outputs.len() - 1 {
            self.set_message(Some(NodeMessage::coding(
                Error::WrongOutputCount {
                    expected: self.outputs.len() - 1,
                    actual: outputs.len(),
                }
                .to_string(),
            )));
            return false;
        }
        for (port, (slot, output)) in outputs.iter().zip(&self.outputs[1..]).enumerate() {
            match slot {
                None if !continues_loop => {
                    self.set_message(Some(NodeMessage::coding(
                        Error::MissingOutput(port + 1).to_string(),
                    )));
                    return false;
                }
                Some(object) if !object.is_instance_of(output.ty) => {
                    self.set_message(Some(NodeMessage::coding(
                        Error::OutputTypeMismatch(port + 1).to_string(),
                    )));
                    return false;
                }
                _ => {}
            }
        }
        if !continues_loop {
            // the execute-time spec wins, but a disagreement with configure
            // means downstream nodes were configured against the wrong spec
            let mut mismatched_port = None;
            for (port, (slot, output)) in outputs.iter().zip(&self.outputs[1..]).enumerate() {
                if let (Some(object), Some(PortObjectSpec::Table(configured))) =
                    (slot, &output.spec)
                {
                    if let PortObjectSpec::Table(actual) = object.spec() {
                        if !configured.equal_structure(&actual) {
                            mismatched_port = Some(port);
                        }
                    }
                }
            }
            if let Some(port) = mismatched_port {
                self.set_message(Some(NodeMessage::coding(format!(
                    "output {}: table structure differs from the configured spec",
                    port + 1
                ))));
            }
        }
        self.outputs[0].spec = Some(PortObjectSpec::FlowVariable);
        self.outputs[0].object = Some(PortObject::FlowVariable);
        self.outputs[0].summary = Some("flow variables".to_owned());
        for (slot, output) in outputs.into_iter().zip(self.outputs[1..].iter_mut()) {
            match slot {
                Some(object) => {
                    if let Some(table) = object.as_table() {
                        table.set_owner_recursively(self.id);
                    }
                    output.spec = Some(object.spec());
                    output.summary = Some(object.summary());
                    output.object = Some(object);
                }
                None => output.object = None,
            }
        }
        self.reconcile_held_tables(&model_inputs, exec);
        for variable in self.model.flow_variables() {
            self.outgoing_stack.push_variable(variable);
        }
        if let Some(scope) = &end_scope {
            if continues_loop {
                scope.advance_iteration();
            } else {
                self.outgoing_stack.pop_scope();
            }
        }
        true
    }

    fn handle_execute_error(&mut self, error: Error) -> bool {
        if error.is_cancellation() {
            self.reset_model();
            self.set_message(Some(NodeMessage::warning("execution canceled")));
            return false;
        }
        let caught = self
            .flow_stack
            .peek_scope_of(ScopeKind::TryCatch)
            .is_some_and(|scope| !scope.is_inactive());
        if caught {
            self.reset_model();
            self.fill_outputs_inactive();
            self.outgoing_stack
                .push_variable(FlowVariable::int(FAILURE_FLAG_VARIABLE, 1));
            self.outgoing_stack.push_variable(FlowVariable::string(
                FAILURE_NODE_VARIABLE,
                self.name.clone(),
            ));
            self.outgoing_stack.push_variable(FlowVariable::string(
                FAILURE_MESSAGE_VARIABLE,
                error.to_string(),
            ));
            self.outgoing_stack.push_variable(FlowVariable::string(
                FAILURE_DETAILS_VARIABLE,
                format!("{error:?}"),
            ));
            self.set_message(Some(NodeMessage::error(format!(
                "execution failed: {error}"
            ))));
            return true;
        }
        self.reset_model();
        self.set_message(Some(NodeMessage::error(format!("execute failed: {error}"))));
        false
    }

    /// Tables the model kept from its inputs are wrapped so that disposing
    /// them later never touches an upstream node's table. Previously held
    /// tables that survive neither in the new held set nor in the outputs
    /// are disposed.
    fn reconcile_held_tables(
        &mut self,
        model_inputs: &[Option<PortObject>],
        exec: &ExecutionContext,
    ) {
        let previous_held = std::mem::take(&mut self.internal_held);
        let mut new_held = self.model.internal_tables();
        let mut rewrapped = false;
        for held in &mut new_held {
            let is_input = model_inputs
                .iter()
                .flatten()
                .filter_map(PortObject::as_table)
                .any(|table| table == held);
            if is_input {
                *held = exec.wrap(held);
                rewrapped = true;
            }
        }
        for table in &new_held {
            table.set_owner_recursively(self.id);
        }
        if rewrapped {
            self.model.set_internal_tables(new_held.clone());
        }
        let keep: HashSet<TableId> = new_held
            .iter()
            .map(TableHandle::id)
            .chain(
                self.outputs
                    .iter()
                    .filter_map(|output| output.object.as_ref())
                    .filter_map(PortObject::as_table)
                    .map(TableHandle::id),
            )
            .collect();
        for table in previous_held {
            if !keep.contains(&table.id()) {
                if let Err(error) = table.clear_single(self.id) {
                    error!(
                        "node {}: disposal of a previously held table failed: {error}",
                        self.id
                    );
                }
            }
        }
        self.internal_held = new_held;
    }

    fn reset_model(&mut self) {
        if catch_unwind(AssertUnwindSafe(|| self.model.reset())).is_err() {
            error!("node {} ({}): reset panicked", self.id, self.name);
        }
    }

    /// Forgets the execution state of the model. Output tables are NOT
    /// released here; the driver calls [`Node::clean_outputs`] for that.
    pub fn reset(&mut self) {
        debug!("resetting node {} ({})", self.id, self.name);
        self.loop_context = None;
        self.loop_paused = false;
        self.reset_model();
        self.set_message(None);
    }

    /// Releases every table this node owns that is reachable from its
    /// output slots, held tables and scratch tables. On a loop restart the
    /// held tables survive so the next iteration can build on them.
    pub fn clean_outputs(&mut self, is_loop_restart: bool) {
        if is_loop_restart && !self.model.is_loop_start() {
            error!(
                "node {}: loop-restart cleanup on a node that does not start a loop",
                self.id
            );
        }
        let mut owned = Vec::new();
        for output in &self.outputs {
            if let Some(PortObject::Table(table)) = &output.object {
                table.collect_owned_by(self.id, &mut owned);
            }
        }
        if !is_loop_restart {
            for table in &self.internal_held {
                table.collect_owned_by(self.id, &mut owned);
            }
        }
        for output in &mut self.outputs {
            output.spec = None;
            output.object = None;
            output.summary = None;
        }
        let retained: HashSet<TableId> = if is_loop_restart {
            self.internal_held.iter().map(TableHandle::id).collect()
        } else {
            self.internal_held = Vec::new();
            HashSet::new()
        };
        let mut disposed = HashSet::new();
        for table in owned {
            if retained.contains(&table.id()) || !disposed.insert(table.id()) {
                continue;
            }
            if let Err(error) = table.clear_single(self.id) {
                error!("node {}: output table disposal failed: {error}", self.id);
            }
        }
        for table in std::mem::take(&mut self.local_temp_tables) {
            if let Err(error) = table.clear_single(self.id) {
                error!("node {}: temp table disposal failed: {error}", self.id);
            }
        }
    }

    /// Publishes the physical tables behind this node's outputs and held
    /// tables into the workflow repository, making them resolvable after
    /// the execution context is gone. Local tables that were not promoted
    /// become scratch tables, disposed on the next cleanup.
    pub fn put_output_tables_into_global_repository(&mut self, exec: &ExecutionContext) -> usize {
        let mut added = 0;
        {
            let mut global = exec.global_repository().lock().unwrap();
            for output in &self.outputs {
                if let Some(PortObject::Table(table)) = &output.object {
                    added += global.put_recursively(table);
                }
            }
            for table in &self.internal_held {
                added += global.put_recursively(table);
            }
        }
        let leftovers: Vec<TableHandle> = {
            let local = exec.local_repository().lock().unwrap();
            local.handles().cloned().collect()
        };
        let global = exec.global_repository().lock().unwrap();
        for handle in leftovers {
            if !global.contains(handle.id()) {
                self.local_temp_tables.push(handle);
            }
        }
        added
    }

    /// Withdraws this node's tables from the workflow repository again.
    /// Returns how many tables were removed.
    pub fn remove_output_tables_from_global_repository(&self, env: &WorkflowEnv) -> usize {
        let mut global = env.global_repository().lock().unwrap();
        let mut removed = 0;
        for output in &self.outputs {
            if let Some(PortObject::Table(table)) = &output.object {
                removed += global.remove_recursively(table, self.id);
            }
        }
        for table in &self.internal_held {
            removed += global.remove_recursively(table, self.id);
        }
        removed
    }
}
