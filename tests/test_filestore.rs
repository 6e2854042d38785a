mod helpers;

use assert_matches::assert_matches;
use flowbench_engine::engine::Error;

use helpers::make_env;

#[test]
fn test_create_file_store() -> eyre::Result<()> {
    let env = make_env();
    let handler = env.new_file_store_handler(env.next_node_id());
    let store = handler.create_file_store("model")?;
    assert_eq!(store.name(), "model");
    assert_eq!(store.path(), handler.base().join("model"));
    assert!(handler.base().is_dir());
    Ok(())
}

#[test]
fn test_invalid_names_are_rejected() -> eyre::Result<()> {
    let env = make_env();
    let handler = env.new_file_store_handler(env.next_node_id());
    assert_matches!(
        handler.create_file_store(""),
        Err(Error::InvalidFileStoreName(_))
    );
    assert_matches!(
        handler.create_file_store(".hidden"),
        Err(Error::InvalidFileStoreName(_))
    );
    assert_matches!(
        handler.create_file_store("a/b"),
        Err(Error::InvalidFileStoreName(_))
    );
    assert_matches!(
        handler.create_file_store("a\\b"),
        Err(Error::InvalidFileStoreName(_))
    );
    Ok(())
}

#[test]
fn test_duplicate_names_are_rejected() -> eyre::Result<()> {
    let env = make_env();
    let handler = env.new_file_store_handler(env.next_node_id());
    handler.create_file_store("model")?;
    assert_matches!(
        handler.create_file_store("model"),
        Err(Error::DuplicateFileStoreName(name)) if name == "model"
    );
    Ok(())
}

#[test]
fn test_dispose_removes_everything() -> eyre::Result<()> {
    let env = make_env();
    let handler = env.new_file_store_handler(env.next_node_id());
    let store = handler.create_file_store("model")?;
    std::fs::create_dir_all(store.path())?;
    std::fs::write(store.path().join("weights.bin"), b"abc")?;
    handler.dispose();
    assert!(!handler.base().exists());
    // the name is free again after disposal
    handler.create_file_store("model")?;
    Ok(())
}

#[test]
fn test_handlers_get_distinct_directories() -> eyre::Result<()> {
    let env = make_env();
    let node = env.next_node_id();
    let first = env.new_file_store_handler(node);
    let second = env.new_file_store_handler(node);
    assert_ne!(first.base(), second.base());
    Ok(())
}
