mod helpers;

use assert_matches::assert_matches;
use flowbench_engine::engine::Error;

use helpers::{build_table, collect_rows, int_row, int_spec, make_context, make_context_for, make_env};

#[test]
fn test_clear_scratch_table() -> eyre::Result<()> {
    let env = make_env();
    let exec = make_context(&env);
    let table = build_table(&exec, &int_spec(&["a"]), vec![int_row("r0", &[1])])?;
    exec.clear(&table)?;
    assert!(table.is_cleared());
    assert_matches!(table.iter_rows(), Err(Error::AlreadyDisposed));
    assert!(!exec.local_repository().lock().unwrap().contains(table.id()));
    Ok(())
}

#[test]
fn test_clear_refuses_foreign_table() -> eyre::Result<()> {
    let env = make_env();
    let owner_exec = make_context(&env);
    let table = build_table(&owner_exec, &int_spec(&["a"]), vec![int_row("r0", &[1])])?;
    let other_exec = make_context(&env);
    assert_matches!(other_exec.clear(&table), Err(Error::NotOwner));
    assert!(!table.is_cleared());
    Ok(())
}

#[test]
fn test_clear_refuses_published_table() -> eyre::Result<()> {
    let env = make_env();
    let exec = make_context(&env);
    let table = build_table(&exec, &int_spec(&["a"]), vec![int_row("r0", &[1])])?;
    env.global_repository().lock().unwrap().insert(table.clone());
    assert_matches!(exec.clear(&table), Err(Error::AlreadyPublished));
    assert!(!table.is_cleared());
    Ok(())
}

#[test]
fn test_clear_single_is_idempotent() -> eyre::Result<()> {
    let env = make_env();
    let node = env.next_node_id();
    let exec = make_context_for(&env, node);
    let table = build_table(&exec, &int_spec(&["a"]), vec![int_row("r0", &[1])])?;
    table.clear_single(node)?;
    table.clear_single(node)?;
    assert!(table.is_cleared());
    Ok(())
}

#[test]
fn test_view_survives_source_snapshot() -> eyre::Result<()> {
    let env = make_env();
    let node = env.next_node_id();
    let exec = make_context_for(&env, node);
    let source = build_table(
        &exec,
        &int_spec(&["a"]),
        vec![int_row("r0", &[1]), int_row("r1", &[2])],
    )?;
    // a running iteration keeps its snapshot even if the table is cleared
    let mut iter = source.iter_rows()?;
    source.clear_single(node)?;
    assert_eq!(iter.next().transpose()?, Some(int_row("r0", &[1])));
    assert_eq!(iter.next().transpose()?, Some(int_row("r1", &[2])));
    // a fresh iteration is refused
    assert_matches!(source.iter_rows(), Err(Error::AlreadyDisposed));
    Ok(())
}

#[test]
fn test_disposing_one_view_leaves_its_siblings_intact() -> eyre::Result<()> {
    let env = make_env();
    let node = env.next_node_id();
    let exec = make_context_for(&env, node);
    let rows = vec![int_row("r0", &[1]), int_row("r1", &[2])];
    let source = build_table(&exec, &int_spec(&["a"]), rows.clone())?;
    let first = exec.wrap(&source);
    let second = exec.wrap(&source);
    first.clear_single(node)?;
    assert_matches!(first.iter_rows(), Err(Error::AlreadyDisposed));
    assert!(!source.is_cleared());
    assert!(!second.is_cleared());
    assert_eq!(collect_rows(&second)?, rows);
    assert_eq!(collect_rows(&source)?, rows);
    Ok(())
}

#[test]
fn test_repository_put_recursively_registers_physical_tables() -> eyre::Result<()> {
    let env = make_env();
    let exec = make_context(&env);
    let source = build_table(&exec, &int_spec(&["a"]), vec![int_row("r0", &[1])])?;
    let wrapped = exec.wrap(&source);
    let mut repository = flowbench_engine::engine::TableRepository::new();
    let added = repository.put_recursively(&wrapped);
    assert_eq!(added, 1);
    assert!(repository.contains(source.id()));
    assert!(!repository.contains(wrapped.id()));
    // putting again adds nothing
    assert_eq!(repository.put_recursively(&wrapped), 0);
    Ok(())
}

#[test]
fn test_repository_remove_recursively_checks_owner() -> eyre::Result<()> {
    let env = make_env();
    let node = env.next_node_id();
    let exec = make_context_for(&env, node);
    let source = build_table(&exec, &int_spec(&["a"]), vec![int_row("r0", &[1])])?;
    let mut repository = flowbench_engine::engine::TableRepository::new();
    repository.put_recursively(&source);
    let stranger = env.next_node_id();
    assert_eq!(repository.remove_recursively(&source, stranger), 0);
    assert!(repository.contains(source.id()));
    assert_eq!(repository.remove_recursively(&source, node), 1);
    assert!(repository.is_empty());
    Ok(())
}

#[test]
fn test_collect_owned_stops_at_foreign_tables() -> eyre::Result<()> {
    let env = make_env();
    let upstream = make_context(&env);
    let source = build_table(&upstream, &int_spec(&["a"]), vec![int_row("r0", &[1])])?;
    let downstream = make_context(&env);
    let wrapped = downstream.wrap(&source);
    let mut owned = Vec::new();
    wrapped.collect_owned_by(downstream.node(), &mut owned);
    assert_eq!(owned.len(), 1);
    assert_eq!(owned[0].id(), wrapped.id());
    Ok(())
}
