//! Bounded worker pool
//!
//! Runs independent units with at most `workers` in flight. Workers pull the
//! next index from a shared cursor, so a slow unit never holds up the others;
//! results come back in input order regardless of completion order.

use futures::future::join_all;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Run `f(index, item)` for every item with at most `workers` concurrently
pub async fn run_bounded<T, R, F, Fut>(items: &[T], workers: usize, f: F) -> Vec<R>
where
    F: Fn(usize, &T) -> Fut,
    Fut: Future<Output = R>,
{
    if items.is_empty() {
        return Vec::new();
    }
    let workers = workers.clamp(1, items.len());
    let cursor = AtomicUsize::new(0);

    let runs = join_all((0..workers).map(|_| async {
        let mut done = Vec::new();
        loop {
            let index = cursor.fetch_add(1, Ordering::SeqCst);
            if index >= items.len() {
                break;
            }
            done.push((index, f(index, &items[index]).await));
        }
        done
    }))
    .await;

    let mut results: Vec<(usize, R)> = runs.into_iter().flatten().collect();
    results.sort_by_key(|(index, _)| *index);
    results.into_iter().map(|(_, r)| r).collect()
}
