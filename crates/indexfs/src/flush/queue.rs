use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::thread;
use tokio::sync::{mpsc, oneshot};

use super::{Dumpable, FileFlushOperation, FlushOperation, MkdirFlushOperation};
use crate::error::{FsError, FsResult};

#[derive(Debug, Default)]
struct QueueState {
    mkdirs: Vec<MkdirFlushOperation>,
    files: Vec<FileFlushOperation>,
    flush_memory_use: u64,
}

/// Pending mkdir and file-flush operations, dumped as one pass.
#[derive(Debug, Default)]
pub struct FlushOperationQueue {
    state: Mutex<QueueState>,
}

impl FlushOperationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_back(&self, op: impl Into<FlushOperation>) {
        let mut state = self.state.lock();
        match op.into() {
            FlushOperation::Mkdir(op) => state.mkdirs.push(op),
            FlushOperation::File(op) => {
                state.flush_memory_use += op.flush_memory_use();
                state.files.push(op);
            }
        }
    }

    pub fn len(&self) -> usize {
        let state = self.state.lock();
        state.mkdirs.len() + state.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes held by queued file operations.
    pub fn flush_memory_use(&self) -> u64 {
        self.state.lock().flush_memory_use
    }

    /// Move every queued operation into a new queue, leaving this one empty.
    pub fn take(&self) -> FlushOperationQueue {
        let taken = std::mem::take(&mut *self.state.lock());
        FlushOperationQueue {
            state: Mutex::new(taken),
        }
    }

    /// Run all mkdirs, then all file flushes, in push order.
    ///
    /// The first failure aborts the pass.
    pub fn dump(&self) -> FsResult<()> {
        let state = self.state.lock();
        let ops = state
            .mkdirs
            .iter()
            .map(|op| op as &dyn Dumpable)
            .chain(state.files.iter().map(|op| op as &dyn Dumpable));
        for op in ops {
            if let Err(e) = op.dump() {
                tracing::error!(operation = ?op, error = %e, "flush pass aborted");
                return Err(e);
            }
        }
        tracing::debug!(
            mkdirs = state.mkdirs.len(),
            files = state.files.len(),
            bytes = state.flush_memory_use,
            "flush pass complete"
        );
        Ok(())
    }
}

/// Completion of one flush pass.
///
/// Await it from async code, or [`wait`](FlushHandle::wait) from a plain
/// thread.
#[derive(Debug)]
pub struct FlushHandle {
    rx: oneshot::Receiver<FsResult<()>>,
}

impl FlushHandle {
    /// A handle that is already complete.
    pub fn ready(result: FsResult<()>) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(result);
        Self { rx }
    }

    /// Block the current thread until the pass finishes.
    ///
    /// A pass that already finished is returned without blocking. An
    /// unfinished pass fails with `Unsupported` on a runtime thread; await
    /// the handle there instead.
    pub fn wait(mut self) -> FsResult<()> {
        match self.rx.try_recv() {
            Ok(result) => result,
            Err(oneshot::error::TryRecvError::Empty) => {
                if tokio::runtime::Handle::try_current().is_ok() {
                    return Err(FsError::unsupported(
                        "blocking wait on a pending flush inside an async runtime",
                    ));
                }
                self.rx.blocking_recv().map_err(|_| dump_worker_gone())?
            }
            Err(oneshot::error::TryRecvError::Closed) => Err(dump_worker_gone()),
        }
    }
}

fn dump_worker_gone() -> FsError {
    FsError::other("dump worker stopped before finishing the flush")
}

impl Future for FlushHandle {
    type Output = FsResult<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|r| r.unwrap_or_else(|_| Err(dump_worker_gone())))
    }
}

struct DumpTask {
    queue: FlushOperationQueue,
    done: oneshot::Sender<FsResult<()>>,
}

/// Runs flush passes inline or on a dedicated worker thread.
///
/// The worker serves passes strictly in submission order.
#[derive(Debug)]
pub struct DumpScheduler {
    sender: Option<mpsc::UnboundedSender<DumpTask>>,
    worker: Option<thread::JoinHandle<()>>,
}

impl DumpScheduler {
    /// Dump on the caller's thread.
    pub fn inline() -> Self {
        Self {
            sender: None,
            worker: None,
        }
    }

    /// Dump on a background thread.
    pub fn background() -> FsResult<Self> {
        let (sender, mut receiver) = mpsc::unbounded_channel::<DumpTask>();
        let worker = thread::Builder::new()
            .name("indexfs-dump".to_string())
            .spawn(move || {
                while let Some(task) = receiver.blocking_recv() {
                    let result = task.queue.dump();
                    let _ = task.done.send(result);
                }
                tracing::debug!("dump worker stopped");
            })?;
        Ok(Self {
            sender: Some(sender),
            worker: Some(worker),
        })
    }

    pub fn is_background(&self) -> bool {
        self.sender.is_some()
    }

    pub fn submit(&self, queue: FlushOperationQueue) -> FlushHandle {
        let Some(sender) = &self.sender else {
            return FlushHandle::ready(queue.dump());
        };
        let (done, rx) = oneshot::channel();
        if let Err(rejected) = sender.send(DumpTask { queue, done }) {
            let task = rejected.0;
            let _ = task.done.send(task.queue.dump());
        }
        FlushHandle { rx }
    }
}

impl Drop for DumpScheduler {
    fn drop(&mut self) {
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!("dump worker panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::{FileNodeHandle, InMemFileNode};
    use crate::flush::PathMetaContainer;
    use crate::raw::{MemoryFs, RawFs};
    use std::sync::Arc;

    fn file_op(raw: &Arc<MemoryFs>, path: &str) -> FileFlushOperation {
        let node = FileNodeHandle::from_node(InMemFileNode::new(path, b"data".to_vec(), true));
        FileFlushOperation::new(
            raw.clone(),
            node,
            path,
            Arc::new(PathMetaContainer::new()),
            None,
        )
    }

    #[test]
    fn test_mkdirs_run_before_files() {
        let raw = Arc::new(MemoryFs::new());
        let queue = FlushOperationQueue::new();
        queue.push_back(file_op(&raw, "/a/b/f"));
        queue.push_back(MkdirFlushOperation::new(raw.clone(), "/a/b"));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.flush_memory_use(), 4);

        queue.dump().unwrap();
        assert_eq!(raw.read_all("/a/b/f").unwrap(), b"data");
    }

    #[test]
    fn test_first_failure_aborts_pass() {
        let raw = Arc::new(MemoryFs::new());
        let queue = FlushOperationQueue::new();
        queue.push_back(file_op(&raw, "/missing/f"));
        queue.push_back(file_op(&raw, "/g"));

        assert!(queue.dump().unwrap_err().is_not_found());
        assert!(!raw.exists("/g").unwrap());
    }

    #[test]
    fn test_take_empties_queue() {
        let raw = Arc::new(MemoryFs::new());
        let queue = FlushOperationQueue::new();
        queue.push_back(file_op(&raw, "/f"));
        let taken = queue.take();
        assert!(queue.is_empty());
        assert_eq!(taken.len(), 1);
    }

    #[test]
    fn test_background_scheduler_wait() {
        let raw = Arc::new(MemoryFs::new());
        let scheduler = DumpScheduler::background().unwrap();
        let queue = FlushOperationQueue::new();
        queue.push_back(file_op(&raw, "/f"));

        scheduler.submit(queue).wait().unwrap();
        assert!(raw.exists("/f").unwrap());
    }

    #[tokio::test]
    async fn test_pending_wait_inside_runtime_is_unsupported() {
        assert!(FlushHandle::ready(Ok(())).wait().is_ok());

        let (tx, rx) = oneshot::channel();
        let err = FlushHandle { rx }.wait().unwrap_err();
        assert!(matches!(err, FsError::Unsupported(_)), "{err}");

        let (tx2, rx) = oneshot::channel();
        tx2.send(Ok(())).unwrap();
        FlushHandle { rx }.wait().unwrap();
        drop(tx);
    }

    #[tokio::test]
    async fn test_background_scheduler_await() {
        let raw = Arc::new(MemoryFs::new());
        let scheduler = DumpScheduler::background().unwrap();
        let first = FlushOperationQueue::new();
        first.push_back(MkdirFlushOperation::new(raw.clone(), "/d"));
        let second = FlushOperationQueue::new();
        second.push_back(file_op(&raw, "/d/f"));

        let h1 = scheduler.submit(first);
        let h2 = scheduler.submit(second);
        h1.await.unwrap();
        h2.await.unwrap();
        assert!(raw.exists("/d/f").unwrap());
    }

    #[test]
    fn test_inline_scheduler_is_complete() {
        let scheduler = DumpScheduler::inline();
        assert!(!scheduler.is_background());
        scheduler
            .submit(FlushOperationQueue::new())
            .wait()
            .unwrap();
    }
}
