// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Serialized execution contexts for producer and network work.

use std::{
    collections::VecDeque,
    sync::atomic::{AtomicBool, Ordering},
};

use futures::future::BoxFuture;
use parking_lot::Mutex;
use snafu::ensure;
use tokio::{runtime::Handle, sync::mpsc};
use tracing::debug;

use crate::error::{IllegalStateSnafu, Result};

pub type Job = BoxFuture<'static, ()>;

/// Runs submitted jobs one at a time, in submission order.
pub trait Executor: Send + Sync {
    /// Queues `job`. Fails once the executor has been shut down.
    fn execute(&self, job: Job) -> Result<()>;

    fn is_shutdown(&self) -> bool;

    /// Stops accepting jobs. Already queued jobs still run.
    fn shutdown(&self);
}

/// Single consumer task on a tokio runtime fed by an unbounded channel.
#[derive(Debug)]
pub struct SerialExecutor {
    name: &'static str,
    tx:   Mutex<Option<mpsc::UnboundedSender<Job>>>,
}

impl SerialExecutor {
    pub fn new(name: &'static str, handle: &Handle) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        handle.spawn(async move {
            while let Some(job) = rx.recv().await {
                job.await;
            }
            debug!(executor = name, "executor drained");
        });
        Self {
            name,
            tx: Mutex::new(Some(tx)),
        }
    }

    pub const fn name(&self) -> &'static str { self.name }
}

impl Executor for SerialExecutor {
    fn execute(&self, job: Job) -> Result<()> {
        let sent = self.tx.lock().as_ref().is_some_and(|tx| tx.send(job).is_ok());
        ensure!(
            sent,
            IllegalStateSnafu {
                message: format!("{} executor is shut down", self.name),
            }
        );
        Ok(())
    }

    fn is_shutdown(&self) -> bool { self.tx.lock().as_ref().is_none_or(mpsc::UnboundedSender::is_closed) }

    fn shutdown(&self) { self.tx.lock().take(); }
}

#[derive(Default)]
struct InlineState {
    pending:  VecDeque<Job>,
    draining: bool,
}

/// Runs jobs on the calling thread before `execute` returns.
///
/// A job submitted from inside a running job is queued and run after it,
/// so nested submissions keep their order instead of recursing.
#[derive(Default)]
pub struct InlineExecutor {
    state:    Mutex<InlineState>,
    shutdown: AtomicBool,
}

impl std::fmt::Debug for InlineExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InlineExecutor")
            .field("shutdown", &self.is_shutdown())
            .finish_non_exhaustive()
    }
}

impl InlineExecutor {
    pub fn new() -> Self { Self::default() }
}

impl Executor for InlineExecutor {
    fn execute(&self, job: Job) -> Result<()> {
        ensure!(
            !self.is_shutdown(),
            IllegalStateSnafu {
                message: "inline executor is shut down",
            }
        );
        {
            let mut state = self.state.lock();
            state.pending.push_back(job);
            if state.draining {
                return Ok(());
            }
            state.draining = true;
        }
        loop {
            let next = {
                let mut state = self.state.lock();
                let Some(job) = state.pending.pop_front() else {
                    state.draining = false;
                    break;
                };
                job
            };
            futures::executor::block_on(next);
        }
        Ok(())
    }

    fn is_shutdown(&self) -> bool { self.shutdown.load(Ordering::Acquire) }

    fn shutdown(&self) { self.shutdown.store(true, Ordering::Release); }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_inline_runs_nested_jobs_in_order() {
        let executor = Arc::new(InlineExecutor::new());
        let log = Arc::new(Mutex::new(Vec::new()));

        let inner_executor = Arc::clone(&executor);
        let inner_log = Arc::clone(&log);
        executor
            .execute(Box::pin(async move {
                inner_log.lock().push("outer-start");
                let nested_log = Arc::clone(&inner_log);
                inner_executor
                    .execute(Box::pin(async move { nested_log.lock().push("nested") }))
                    .unwrap();
                inner_log.lock().push("outer-end");
            }))
            .unwrap();

        assert_eq!(*log.lock(), vec!["outer-start", "outer-end", "nested"]);
    }

    #[test]
    fn test_inline_rejects_after_shutdown() {
        let executor = InlineExecutor::new();
        executor.shutdown();
        assert!(executor.is_shutdown());
        assert!(executor.execute(Box::pin(async {})).is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_serial_executor_preserves_order() {
        let executor = SerialExecutor::new("test", &Handle::current());
        let (tx, mut rx) = mpsc::unbounded_channel();
        for i in 0..16 {
            let tx = tx.clone();
            executor
                .execute(Box::pin(async move {
                    tx.send(i).unwrap();
                }))
                .unwrap();
        }
        drop(tx);
        executor.shutdown();
        assert!(executor.is_shutdown());
        assert!(executor.execute(Box::pin(async {})).is_err());

        let mut seen = Vec::new();
        while let Some(i) = rx.recv().await {
            seen.push(i);
        }
        assert_eq!(seen, (0..16).collect::<Vec<_>>());
    }
}
