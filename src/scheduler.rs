use std::collections::BTreeMap;
use std::fmt::Display;
use std::sync::atomic::{AtomicBool, Ordering};

use flume::Sender;

use crate::error::{Error, Result};

/// A bounded pool of worker threads.
///
/// Every call to [`WorkerPool::execute`] is a barrier: it returns only after all the threads have
/// completed. Threads never wait on each other, the only shared state is the work queue.
#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    num_workers: usize,
}

impl WorkerPool {
    pub fn new(num_workers: usize) -> Result<Self> {
        if num_workers == 0 {
            return Err(Error::InvalidWorkerCount);
        }
        Ok(Self { num_workers })
    }

    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    /// Run `job` on every item, with at most `num_workers` items processed at the same time.
    ///
    /// The outputs are returned in the order of the items, regardless of which thread completed
    /// first. When a job fails (or its thread panics) the items still in the queue are skipped,
    /// the jobs already running complete and their outputs are discarded, and the error of the
    /// earliest failed item is returned.
    pub fn execute<T, R, F>(&self, name: &str, items: Vec<T>, job: F) -> Result<Vec<R>>
    where
        T: Display + Send,
        R: Send,
        F: Fn(T) -> Result<R> + Sync,
    {
        let num_items = items.len();
        if num_items == 0 {
            return Ok(Vec::new());
        }

        let (job_tx, job_rx) = flume::unbounded();
        for item in items.into_iter().enumerate() {
            // the receiver is alive until the end of the function
            let _ = job_tx.send(item);
        }
        drop(job_tx);

        let (result_tx, result_rx) = flume::unbounded::<(usize, Result<R>)>();
        let aborted = AtomicBool::new(false);
        let num_threads = self.num_workers.min(num_items);
        debug!("starting {num_threads} {name} workers for {num_items} items");

        std::thread::scope(|scope| {
            let handles: Vec<_> = (0..num_threads)
                .map(|worker| {
                    let job_rx = job_rx.clone();
                    let result_tx = result_tx.clone();
                    let (job, aborted) = (&job, &aborted);
                    std::thread::Builder::new()
                        .name(format!("{name}-{worker}"))
                        .spawn_scoped(scope, move || {
                            while let Ok((idx, item)) = job_rx.recv() {
                                if aborted.load(Ordering::Acquire) {
                                    continue;
                                }
                                let start = coarsetime::Instant::now();
                                let guard = JobGuard {
                                    worker,
                                    idx,
                                    description: item.to_string(),
                                    results: &result_tx,
                                    aborted,
                                    completed: false,
                                };
                                let result = job(item);
                                debug!(
                                    "worker {worker} completed {} in {:.3}s",
                                    guard.description,
                                    start.elapsed().as_f64()
                                );
                                guard.complete(result);
                            }
                        })
                        .expect("failed to spawn worker thread")
                })
                .collect();
            for handle in handles {
                // a panic has already been reported by the worker's guard
                let _ = handle.join();
            }
        });
        drop(result_tx);

        let mut outputs: Vec<Option<R>> = std::iter::repeat_with(|| None).take(num_items).collect();
        let mut errors = BTreeMap::new();
        for (idx, result) in result_rx.drain() {
            match result {
                Ok(output) => outputs[idx] = Some(output),
                Err(e) => {
                    errors.entry(idx).or_insert(e);
                }
            }
        }
        if let Some((_, error)) = errors.into_iter().next() {
            return Err(error);
        }
        Ok(outputs.into_iter().flatten().collect())
    }
}

/// Reports the outcome of a job: its result when [`JobGuard::complete`] is called, or
/// [`Error::WorkerCrashed`] when the guard is dropped by the unwinding of a panicking job.
/// A failed job stops the pool from starting the items still in the queue.
struct JobGuard<'a, R> {
    worker: usize,
    idx: usize,
    description: String,
    results: &'a Sender<(usize, Result<R>)>,
    aborted: &'a AtomicBool,
    completed: bool,
}

impl<R> JobGuard<'_, R> {
    fn complete(mut self, result: Result<R>) {
        if result.is_err() {
            self.aborted.store(true, Ordering::Release);
        }
        // the receiver is alive until all the workers are joined
        let _ = self.results.send((self.idx, result));
        self.completed = true;
    }
}

impl<R> Drop for JobGuard<'_, R> {
    fn drop(&mut self) {
        if self.completed {
            return;
        }
        error!(
            "worker {} crashed while processing {}",
            self.worker, self.description
        );
        self.aborted.store(true, Ordering::Release);
        let _ = self.results.send((
            self.idx,
            Err(Error::WorkerCrashed {
                worker: self.worker,
                partition: std::mem::take(&mut self.description),
            }),
        ));
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use super::*;

    #[test]
    fn outputs_follow_item_order() {
        let pool = WorkerPool::new(4).unwrap();
        let res = pool
            .execute("test", (0..100u64).collect(), |i| {
                if i % 7 == 0 {
                    std::thread::sleep(Duration::from_millis(1));
                }
                Ok(i * 2)
            })
            .unwrap();
        assert_eq!(res, (0..100u64).map(|i| i * 2).collect::<Vec<_>>());
    }

    #[test]
    fn zero_workers_is_invalid() {
        assert!(matches!(WorkerPool::new(0), Err(Error::InvalidWorkerCount)));
    }

    #[test]
    fn at_most_num_workers_run_together() {
        let pool = WorkerPool::new(3).unwrap();
        let running = AtomicUsize::new(0);
        let max_running = AtomicUsize::new(0);
        pool.execute("test", (0..30).collect(), |_: i32| {
            let now = running.fetch_add(1, Ordering::SeqCst) + 1;
            max_running.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(2));
            running.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();
        assert!(max_running.load(Ordering::SeqCst) <= 3);
    }

    #[test]
    fn first_error_in_item_order_wins() {
        let pool = WorkerPool::new(2).unwrap();
        let res = pool.execute("test", (0..10).collect(), |i: usize| {
            if i == 3 || i == 8 {
                Err(Error::InvalidDimension(i.to_string()))
            } else {
                std::thread::sleep(Duration::from_millis(1));
                Ok(i)
            }
        });
        match res {
            Err(Error::InvalidDimension(d)) => assert_eq!(d, "3"),
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn earlier_failure_wins_over_later_one() {
        // item 1 fails only after item 4 has already failed on the other thread
        let pool = WorkerPool::new(2).unwrap();
        let res = pool.execute("test", (0..6).collect(), |i: usize| {
            match i {
                1 => {
                    std::thread::sleep(Duration::from_millis(50));
                    Err(Error::InvalidDimension("1".into()))
                }
                4 => {
                    std::thread::sleep(Duration::from_millis(10));
                    Err(Error::InvalidDimension("4".into()))
                }
                _ => Ok(i),
            }
        });
        match res {
            Err(Error::InvalidDimension(d)) => assert_eq!(d, "1"),
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn failure_skips_queued_items() {
        let pool = WorkerPool::new(1).unwrap();
        let started = AtomicUsize::new(0);
        let res = pool.execute("test", (0..10).collect(), |i: usize| {
            started.fetch_add(1, Ordering::SeqCst);
            if i == 0 {
                Err(Error::InvalidDimension("0".into()))
            } else {
                Ok(i)
            }
        });
        assert!(matches!(res, Err(Error::InvalidDimension(d)) if d == "0"));
        assert_eq!(started.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn crash_skips_queued_items() {
        let pool = WorkerPool::new(1).unwrap();
        let started = AtomicUsize::new(0);
        let res = pool.execute("test", (0..10).collect(), |i: usize| {
            started.fetch_add(1, Ordering::SeqCst);
            if i == 2 {
                panic!("boom");
            }
            Ok(i)
        });
        assert!(matches!(res, Err(Error::WorkerCrashed { worker: 0, .. })));
        assert_eq!(started.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn panicking_job_is_an_error() {
        let pool = WorkerPool::new(2).unwrap();
        let res = pool.execute("test", (0..4).collect(), |i: usize| {
            if i == 2 {
                panic!("boom");
            }
            Ok(i)
        });
        match res {
            Err(Error::WorkerCrashed { partition, .. }) => assert_eq!(partition, "2"),
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn empty_input() {
        let pool = WorkerPool::new(2).unwrap();
        let res: Vec<u8> = pool.execute("test", Vec::<u8>::new(), Ok).unwrap();
        assert!(res.is_empty());
    }
}
