use std::sync::Arc;

/// Map a worker function over a set of independent tasks on a bounded pool
/// and gather every result. Results arrive in completion order, so callers
/// must reduce commutatively or keep per-task payloads self-contained.
/// The first worker error aborts the gather and fails the whole run.
pub fn map_chunks<T, R, F>(tasks: Vec<T>, num_threads: usize, worker: F) -> anyhow::Result<Vec<R>>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(T) -> anyhow::Result<R> + Send + Sync + 'static,
{
    let num_tasks = tasks.len();
    if num_tasks == 0 {
        return Ok(Vec::new());
    }

    let pool = threadpool::ThreadPool::new(num_threads.max(1));
    let (tx, rx) = crossbeam::channel::unbounded::<anyhow::Result<R>>();
    let worker = Arc::new(worker);

    for task in tasks {
        let tx = tx.clone();
        let worker = Arc::clone(&worker);
        pool.execute(move || {
            // the receiver hangs up on the first error; ignore send failures
            let _ = tx.send(worker(task));
        });
    }
    drop(tx);

    let mut out = Vec::with_capacity(num_tasks);
    for result in rx.iter() {
        out.push(result?);
    }
    pool.join();
    Ok(out)
}
