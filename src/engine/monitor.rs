// Copyright © 2025 Flowbench

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use super::error::{Error, Result};

/// Shared cancellation flag, cheap to hand to worker threads.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn check(&self) -> Result<()> {
        if self.is_canceled() {
            Err(Error::Canceled)
        } else {
            Ok(())
        }
    }
}

struct ParentLink {
    parent: Arc<Inner>,
    scale: f64,
    silent: bool,
}

struct Inner {
    cancel: CancelToken,
    progress: Mutex<f64>,
    message: Mutex<Option<String>>,
    parent: Option<ParentLink>,
}

impl Inner {
    fn advance(&self, delta: f64) {
        let mut progress = self.progress.lock().unwrap();
        *progress = (*progress + delta).clamp(0.0, 1.0);
        drop(progress);
        if let Some(link) = &self.parent {
            link.parent.advance(delta * link.scale);
        }
    }

    fn set_message(&self, message: Option<String>) {
        match &self.parent {
            Some(link) if link.silent => {}
            Some(link) => link.parent.set_message(message),
            None => *self.message.lock().unwrap() = message,
        }
    }
}

/// Tracks progress and cancellation for one unit of work.
///
/// Sub-monitors report into a fraction of the parent's progress range and
/// share the parent's cancellation flag. A silent sub-monitor contributes
/// progress but swallows messages.
#[derive(Clone)]
pub struct ExecutionMonitor {
    inner: Arc<Inner>,
}

impl Default for ExecutionMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionMonitor {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                cancel: CancelToken::default(),
                progress: Mutex::new(0.0),
                message: Mutex::new(None),
                parent: None,
            }),
        }
    }

    pub fn cancel(&self) {
        self.inner.cancel.cancel();
    }

    pub fn is_canceled(&self) -> bool {
        self.inner.cancel.is_canceled()
    }

    pub fn check_canceled(&self) -> Result<()> {
        self.inner.cancel.check()
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.inner.cancel.clone()
    }

    pub fn set_progress(&self, progress: f64) {
        let current = *self.inner.progress.lock().unwrap();
        self.inner.advance(progress.clamp(0.0, 1.0) - current);
    }

    pub fn set_progress_with_message(&self, progress: f64, message: impl Into<String>) {
        self.set_progress(progress);
        self.set_message(Some(message.into()));
    }

    pub fn progress(&self) -> f64 {
        *self.inner.progress.lock().unwrap()
    }

    pub fn set_message(&self, message: Option<String>) {
        self.inner.set_message(message);
    }

    pub fn message(&self) -> Option<String> {
        self.inner.message.lock().unwrap().clone()
    }

    pub fn create_sub_progress(&self, fraction: f64) -> Self {
        self.sub_monitor(fraction, false)
    }

    pub fn create_silent_sub_progress(&self, fraction: f64) -> Self {
        self.sub_monitor(fraction, true)
    }

    fn sub_monitor(&self, fraction: f64, silent: bool) -> Self {
        Self {
            inner: Arc::new(Inner {
                cancel: self.inner.cancel.clone(),
                progress: Mutex::new(0.0),
                message: Mutex::new(None),
                parent: Some(ParentLink {
                    parent: self.inner.clone(),
                    scale: fraction.clamp(0.0, 1.0),
                    silent,
                }),
            }),
        }
    }
}
