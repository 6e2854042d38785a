use assert_matches::assert_matches;
use flowbench_engine::engine::{Error, ExecutionMonitor};

#[test]
fn test_progress_is_clamped() -> eyre::Result<()> {
    let monitor = ExecutionMonitor::new();
    monitor.set_progress(1.5);
    assert!((monitor.progress() - 1.0).abs() < 1e-12);
    monitor.set_progress(-0.5);
    assert!(monitor.progress().abs() < 1e-12);
    Ok(())
}

#[test]
fn test_sub_progress_scales_into_parent() -> eyre::Result<()> {
    let parent = ExecutionMonitor::new();
    let sub = parent.create_sub_progress(0.5);
    sub.set_progress(0.5);
    assert!((parent.progress() - 0.25).abs() < 1e-12);
    sub.set_progress(1.0);
    assert!((parent.progress() - 0.5).abs() < 1e-12);
    Ok(())
}

#[test]
fn test_two_subs_accumulate() -> eyre::Result<()> {
    let parent = ExecutionMonitor::new();
    let first = parent.create_sub_progress(0.5);
    let second = parent.create_sub_progress(0.5);
    first.set_progress(1.0);
    second.set_progress(1.0);
    assert!((parent.progress() - 1.0).abs() < 1e-12);
    Ok(())
}

#[test]
fn test_nested_sub_progress() -> eyre::Result<()> {
    let parent = ExecutionMonitor::new();
    let sub = parent.create_sub_progress(0.5);
    let subsub = sub.create_sub_progress(0.5);
    subsub.set_progress(1.0);
    assert!((parent.progress() - 0.25).abs() < 1e-12);
    Ok(())
}

#[test]
fn test_messages_propagate_to_the_root() -> eyre::Result<()> {
    let parent = ExecutionMonitor::new();
    let sub = parent.create_sub_progress(0.5);
    sub.set_message(Some("working".to_owned()));
    assert_eq!(parent.message().as_deref(), Some("working"));
    Ok(())
}

#[test]
fn test_silent_sub_swallows_messages() -> eyre::Result<()> {
    let parent = ExecutionMonitor::new();
    let silent = parent.create_silent_sub_progress(0.5);
    silent.set_progress_with_message(1.0, "hidden");
    assert_eq!(parent.message(), None);
    assert!((parent.progress() - 0.5).abs() < 1e-12);
    Ok(())
}

#[test]
fn test_cancellation_is_shared() -> eyre::Result<()> {
    let parent = ExecutionMonitor::new();
    let sub = parent.create_sub_progress(0.5);
    parent.cancel();
    assert!(sub.is_canceled());
    assert_matches!(sub.check_canceled(), Err(Error::Canceled));
    let token = sub.cancel_token();
    assert_matches!(token.check(), Err(error) if error.is_cancellation());
    Ok(())
}
