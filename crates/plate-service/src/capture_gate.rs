//! One-shot stop signal for live capture.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub type StopCallback = Arc<dyn Fn() + Send + Sync>;

/// Fires the stop callback at most once until re-armed with [`reset`](CaptureGate::reset).
pub struct CaptureGate {
    fired: AtomicBool,
    on_stop: StopCallback,
}

impl CaptureGate {
    pub fn new(on_stop: StopCallback) -> Self {
        Self {
            fired: AtomicBool::new(false),
            on_stop,
        }
    }

    /// Invoke the callback if this is the first stop since the last reset.
    /// Returns true when the callback ran.
    pub fn signal(&self) -> bool {
        if self
            .fired
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("capture already stopped, ignoring repeated stop signal");
            return false;
        }

        (self.on_stop)();
        true
    }

    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }

    pub fn reset(&self) {
        self.fired.store(false, Ordering::Release);
    }
}

impl std::fmt::Debug for CaptureGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureGate")
            .field("fired", &self.has_fired())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting_gate() -> (CaptureGate, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let gate = CaptureGate::new(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        (gate, calls)
    }

    #[test]
    fn test_fires_once() {
        let (gate, calls) = counting_gate();
        assert!(!gate.has_fired());

        assert!(gate.signal());
        assert!(!gate.signal());
        assert!(!gate.signal());

        assert!(gate.has_fired());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_reset_rearms() {
        let (gate, calls) = counting_gate();
        gate.signal();
        gate.reset();
        assert!(!gate.has_fired());

        assert!(gate.signal());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_concurrent_signals_fire_once() {
        let (gate, calls) = counting_gate();
        let gate = Arc::new(gate);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let gate = Arc::clone(&gate);
                std::thread::spawn(move || gate.signal())
            })
            .collect();
        let fired = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|fired| *fired)
            .count();

        assert_eq!(fired, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
