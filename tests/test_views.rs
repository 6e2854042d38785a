mod helpers;

use assert_matches::assert_matches;
use flowbench_engine::engine::{
    ColumnSpec, Error, RearrangeColumn, RearrangePlan, Row, Selection, TableSpec, Type, Value,
};

use helpers::{build_table, collect_rows, int_row, int_spec, make_context, make_env, spec_of};

#[test]
fn test_rearrange_keep_and_append() -> eyre::Result<()> {
    let env = make_env();
    let exec = make_context(&env);
    let source = build_table(
        &exec,
        &int_spec(&["a", "b"]),
        vec![int_row("r0", &[1, 10]), int_row("r1", &[2, 20])],
    )?;
    let plan = RearrangePlan {
        columns: vec![
            RearrangeColumn::Keep(1),
            RearrangeColumn::Append {
                spec: ColumnSpec::new("sum", Type::Int),
                generator: Box::new(|row| {
                    let total = row
                        .cells
                        .iter()
                        .map(|cell| match cell {
                            Value::Int(i) => *i,
                            _ => 0,
                        })
                        .sum();
                    Ok(Value::Int(total))
                }),
            },
        ],
    };
    let result = exec.rearrange_columns(&source, plan)?;
    let names: Vec<&str> = result
        .spec()
        .columns()
        .iter()
        .map(|column| column.name.as_str())
        .collect();
    assert_eq!(names, vec!["b", "sum"]);
    let rows = collect_rows(&result)?;
    assert_eq!(rows[0].cells, vec![Value::Int(10), Value::Int(11)]);
    assert_eq!(rows[1].cells, vec![Value::Int(20), Value::Int(22)]);
    assert_eq!(result.owner(), Some(exec.node()));
    Ok(())
}

#[test]
fn test_rearrange_keep_out_of_range() -> eyre::Result<()> {
    let env = make_env();
    let exec = make_context(&env);
    let source = build_table(&exec, &int_spec(&["a"]), vec![int_row("r0", &[1])])?;
    let plan = RearrangePlan {
        columns: vec![RearrangeColumn::Keep(3)],
    };
    assert_matches!(
        exec.rearrange_columns(&source, plan),
        Err(Error::ColumnCountMismatch { .. })
    );
    Ok(())
}

#[test]
fn test_replace_spec_renames_columns() -> eyre::Result<()> {
    let env = make_env();
    let exec = make_context(&env);
    let source = build_table(&exec, &int_spec(&["a"]), vec![int_row("r0", &[1])])?;
    let renamed = exec.replace_spec(&source, int_spec(&["renamed"]))?;
    assert_eq!(renamed.spec().columns()[0].name, "renamed");
    assert_eq!(collect_rows(&renamed)?, collect_rows(&source)?);
    assert_ne!(renamed.id(), source.id());
    Ok(())
}

#[test]
fn test_replace_spec_rejects_type_change() -> eyre::Result<()> {
    let env = make_env();
    let exec = make_context(&env);
    let source = build_table(&exec, &int_spec(&["a"]), vec![int_row("r0", &[1])])?;
    assert_matches!(
        exec.replace_spec(&source, spec_of(&[("a", Type::String)])),
        Err(Error::ColumnTypeMismatch { .. })
    );
    assert_matches!(
        exec.replace_spec(&source, int_spec(&["a", "b"])),
        Err(Error::ColumnCountMismatch { .. })
    );
    Ok(())
}

#[test]
fn test_slice_rows() -> eyre::Result<()> {
    let env = make_env();
    let exec = make_context(&env);
    let rows: Vec<Row> = (0..4).map(|i| int_row(&format!("r{i}"), &[i])).collect();
    let source = build_table(&exec, &int_spec(&["a"]), rows)?;
    let selection = Selection {
        row_range: Some(1..3),
        column_indices: None,
    };
    let sliced = exec.slice(&source, selection)?;
    assert_eq!(sliced.row_count(), Some(2));
    assert_eq!(
        collect_rows(&sliced)?,
        vec![int_row("r1", &[1]), int_row("r2", &[2])]
    );
    // ranges past the end are clamped
    let overhang = exec.slice(
        &source,
        Selection {
            row_range: Some(2..10),
            column_indices: None,
        },
    )?;
    assert_eq!(overhang.row_count(), Some(2));
    Ok(())
}

#[test]
fn test_slice_columns() -> eyre::Result<()> {
    let env = make_env();
    let exec = make_context(&env);
    let source = build_table(
        &exec,
        &int_spec(&["a", "b", "c"]),
        vec![int_row("r0", &[1, 2, 3])],
    )?;
    let selection = Selection {
        row_range: None,
        column_indices: Some(vec![2, 0]),
    };
    let sliced = exec.slice(&source, selection)?;
    let names: Vec<&str> = sliced
        .spec()
        .columns()
        .iter()
        .map(|column| column.name.as_str())
        .collect();
    assert_eq!(names, vec!["c", "a"]);
    assert_eq!(
        collect_rows(&sliced)?[0].cells,
        vec![Value::Int(3), Value::Int(1)]
    );
    Ok(())
}

#[test]
fn test_wrap_is_zero_copy_with_fresh_id() -> eyre::Result<()> {
    let env = make_env();
    let exec = make_context(&env);
    let source = build_table(&exec, &int_spec(&["a"]), vec![int_row("r0", &[1])])?;
    let wrapped = exec.wrap(&source);
    assert_ne!(wrapped.id(), source.id());
    assert_eq!(wrapped.row_count(), source.row_count());
    assert_eq!(collect_rows(&wrapped)?, collect_rows(&source)?);
    assert!(!wrapped.is_container_backed());
    Ok(())
}

#[test]
fn test_void_table() -> eyre::Result<()> {
    let env = make_env();
    let exec = make_context(&env);
    let void = exec.void_table(int_spec(&["a", "b"]));
    assert_eq!(void.row_count(), None);
    assert_eq!(void.summary(), "unknown number of rows, 2 columns");
    assert_eq!(collect_rows(&void)?.len(), 0);
    Ok(())
}

#[test]
fn test_summary_reports_counts() -> eyre::Result<()> {
    let env = make_env();
    let exec = make_context(&env);
    let table = build_table(
        &exec,
        &int_spec(&["a", "b"]),
        vec![int_row("r0", &[1, 2]), int_row("r1", &[3, 4])],
    )?;
    assert_eq!(table.summary(), "2 rows, 2 columns");
    Ok(())
}

#[test]
fn test_spec_replaced_table_spec() -> eyre::Result<()> {
    let env = make_env();
    let exec = make_context(&env);
    let source = build_table(&exec, &int_spec(&["a"]), vec![int_row("r0", &[1])])?;
    let spec = TableSpec::new(vec![ColumnSpec::new("z", Type::Int)])?;
    let replaced = exec.replace_spec(&source, spec.clone())?;
    assert!(replaced.spec().equal_structure(&spec));
    Ok(())
}
