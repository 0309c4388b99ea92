//! Task-spawner primitive (spec §9's dispatch-table-over-inheritance design
//! note: "a task-spawner primitive that takes a closure and returns a
//! future"). Every new task's lifecycle driver goes through this single
//! entry point rather than callers reaching for `tokio::spawn` directly.

use tokio::task::JoinHandle;

/// Spawn `f()`'s future onto the runtime, returning a handle to its result.
pub fn spawn_task<F, Fut>(f: F) -> JoinHandle<Fut::Output>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future + Send + 'static,
    Fut::Output: Send + 'static,
{
    tokio::spawn(f())
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn spawn_task_runs_the_closures_future_to_completion() {
        let handle = spawn_task(|| async { 1 + 1 });
        assert_eq!(handle.await.unwrap(), 2);
    }
}
