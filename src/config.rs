//! Engine configuration supplied at initialization.

/// Caller hooks consulted by the backend.
///
/// `call_context` lets an application marshal refill work onto an execution
/// context of its choosing (a job system, a dedicated decode thread). The
/// implementation must invoke `task` exactly once before returning; the
/// backend relies on that to keep the one-refill-per-buffer-start invariant.
pub trait Configure: Send + Sync {
    /// Preferred output device name, consulted once at backend init.
    /// `None` selects the platform default.
    fn pick_device(&self) -> Option<String> {
        None
    }

    /// Run one decode/refill task.
    fn call_context(&self, task: &mut dyn FnMut()) {
        task();
    }
}

/// Default device, refills inline on the backend thread.
#[derive(Debug, Default)]
pub struct DefaultConfigure;

impl Configure for DefaultConfigure {}
