use std::panic;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

/// Run `f` on its own thread and fail if it has not returned after `millis` milliseconds. A panic
/// inside `f` is re-raised with its original payload.
pub fn panic_after<T, F>(millis: u64, f: F) -> T
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let (result_tx, result_rx) = mpsc::channel();
    let worker = thread::spawn(move || {
        // Nobody is listening any more if we already timed out.
        let _ = result_tx.send(f());
    });

    match result_rx.recv_timeout(Duration::from_millis(millis)) {
        Ok(val) => {
            let _ = worker.join();
            val
        }
        Err(RecvTimeoutError::Timeout) => panic!("did not finish within {} ms", millis),
        Err(RecvTimeoutError::Disconnected) => match worker.join() {
            Err(payload) => panic::resume_unwind(payload),
            Ok(()) => unreachable!("worker exited without sending a result"),
        },
    }
}

static SERIAL_TEST_LOCK: Mutex<()> = Mutex::new(());

/// Tests that touch process-wide state, such as `GENHEAP_*` environment variables, run one at a
/// time under this lock.
pub fn serial_test<F>(f: F)
where
    F: FnOnce(),
{
    // A test that panicked while holding the lock must not fail the others.
    let _lock = SERIAL_TEST_LOCK
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    f();
}

/// Runs `cleanup` when dropped.
struct Cleanup<C: FnOnce()>(Option<C>);

impl<C: FnOnce()> Drop for Cleanup<C> {
    fn drop(&mut self) {
        if let Some(cleanup) = self.0.take() {
            cleanup();
        }
    }
}

/// Run `test`, then `cleanup`, also when `test` panics.
pub fn with_cleanup<T, C>(test: T, cleanup: C)
where
    T: FnOnce(),
    C: FnOnce(),
{
    let _cleanup = Cleanup(Some(cleanup));
    test();
}
