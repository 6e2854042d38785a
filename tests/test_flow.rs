use flowbench_engine::engine::{
    FlowObjectStack, FlowValue, FlowVariable, NodeId, ScopeContext, ScopeKind,
};

#[test]
fn test_variable_shadowing() -> eyre::Result<()> {
    let mut stack = FlowObjectStack::new();
    stack.push_variable(FlowVariable::int("count", 1));
    stack.push_variable(FlowVariable::string("name", "first"));
    stack.push_variable(FlowVariable::int("count", 2));
    let variable = stack.get_variable("count").expect("count must be visible");
    assert_eq!(variable.value, FlowValue::Int(2));
    assert!(stack.get_variable("missing").is_none());
    Ok(())
}

#[test]
fn test_pop_scope_removes_variables_above_it() -> eyre::Result<()> {
    let mut stack = FlowObjectStack::new();
    stack.push_variable(FlowVariable::int("outer", 1));
    let scope = ScopeContext::new(ScopeKind::Loop, NodeId::new(1));
    stack.push_scope(scope);
    stack.push_variable(FlowVariable::int("inner", 2));
    let popped = stack.pop_scope().expect("a scope is open");
    assert_eq!(popped.kind(), ScopeKind::Loop);
    assert!(stack.get_variable("inner").is_none());
    assert!(stack.get_variable("outer").is_some());
    assert!(stack.pop_scope().is_none());
    Ok(())
}

#[test]
fn test_peek_scope_of_kind() -> eyre::Result<()> {
    let mut stack = FlowObjectStack::new();
    stack.push_scope(ScopeContext::new(ScopeKind::TryCatch, NodeId::new(1)));
    stack.push_scope(ScopeContext::new(ScopeKind::Loop, NodeId::new(2)));
    let innermost = stack.peek_scope().expect("two scopes are open");
    assert_eq!(innermost.kind(), ScopeKind::Loop);
    let try_scope = stack
        .peek_scope_of(ScopeKind::TryCatch)
        .expect("try scope is open");
    assert_eq!(try_scope.owner(), NodeId::new(1));
    assert!(stack.peek_scope_of(ScopeKind::Capture).is_none());
    Ok(())
}

#[test]
fn test_scope_context_state() -> eyre::Result<()> {
    let scope = ScopeContext::new(ScopeKind::Loop, NodeId::new(7));
    assert!(!scope.is_inactive());
    assert_eq!(scope.iteration(), 0);
    scope.advance_iteration();
    scope.advance_iteration();
    assert_eq!(scope.iteration(), 2);
    scope.mark_inactive();
    assert!(scope.is_inactive());
    Ok(())
}
