//! Bounded worker pool with a join barrier.
//!
//! Work items are pulled from a shared queue by at most `threads` scoped workers;
//! the call returns only after every item has been processed. A panicking item is
//! reported through `on_panic` and does not stop its siblings.

use std::sync::Mutex;

use tracing::error;

/// Apply `f` to every item using up to `threads` workers and collect the results.
///
/// Result order is unspecified. Items whose closure panicked produce no result.
pub fn run_parallel<T, R, F>(items: Vec<T>, threads: usize, f: F) -> Vec<R>
where
    T: Send,
    R: Send,
    F: Fn(T) -> R + Sync,
{
    if items.is_empty() {
        return Vec::new();
    }
    let workers = threads.max(1).min(items.len());
    if workers == 1 {
        return items.into_iter().map(&f).collect();
    }

    let queue = Mutex::new(items.into_iter());
    let f = &f;
    let queue = &queue;

    std::thread::scope(|s| {
        let handles: Vec<_> = (0..workers)
            .map(|_| {
                s.spawn(move || {
                    let mut local = Vec::new();
                    loop {
                        let next = {
                            let mut q = queue.lock().unwrap_or_else(|e| e.into_inner());
                            q.next()
                        };
                        let Some(item) = next else { break };
                        match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| f(item))) {
                            Ok(r) => local.push(r),
                            Err(_) => error!("worker task panicked"),
                        }
                    }
                    local
                })
            })
            .collect();

        let mut results = Vec::new();
        for h in handles {
            match h.join() {
                Ok(mut local) => results.append(&mut local),
                Err(_) => error!("worker thread panicked"),
            }
        }
        results
    })
}
