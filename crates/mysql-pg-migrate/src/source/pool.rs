//! Bounded pool of blocking connections, each pinned to a worker thread.
//!
//! Every connection lives on its own OS thread for its whole life. A caller
//! holding a [`PooledConnection`] ships closures to that thread and awaits
//! their results, so the async runtime never blocks on source I/O. Workers
//! are started lazily, up to the pool capacity, and reused once released.

use super::cursor::{PageRequest, RowCursor};
use super::{BlockingConnection, BlockingCursor, BlockingDriver, Column};
use crate::error::{MigrateError, Result};
use crate::lifecycle::{self, Initializer};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, oneshot, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

type Job<C> = Box<dyn FnOnce(&mut C) + Send>;

/// Pool of blocking source connections.
pub struct BlockingPool<C: BlockingConnection> {
    inner: Arc<PoolInner<C>>,
}

struct PoolInner<C: BlockingConnection> {
    name: String,
    capacity: usize,
    page_size: usize,
    slots: Arc<Semaphore>,
    idle: Mutex<Vec<Worker<C>>>,
    retired: Mutex<Vec<oneshot::Receiver<()>>>,
    initializer: Initializer<C>,
    next_id: AtomicUsize,
}

struct Worker<C> {
    id: usize,
    jobs: mpsc::UnboundedSender<Job<C>>,
    exited: oneshot::Receiver<()>,
}

impl<C: BlockingConnection> BlockingPool<C> {
    /// Create a pool of at most `capacity` connections opened by `driver`.
    ///
    /// No connection is opened until the first [`acquire`](Self::acquire).
    pub fn new<D>(driver: D, capacity: usize, page_size: usize) -> Self
    where
        D: BlockingDriver<Connection = C>,
    {
        let name = driver.name().to_string();
        let driver = Arc::new(driver);
        let initializer = lifecycle::initializer(
            &name,
            move || {
                let driver = driver.clone();
                async move { driver.connect() }
            },
            |conn: C| async move { conn.close() },
        );

        Self {
            inner: Arc::new(PoolInner {
                name,
                capacity,
                page_size,
                slots: Arc::new(Semaphore::new(capacity)),
                idle: Mutex::new(Vec::new()),
                retired: Mutex::new(Vec::new()),
                initializer,
                next_id: AtomicUsize::new(0),
            }),
        }
    }

    /// Connections currently checked out.
    pub fn in_use(&self) -> usize {
        self.inner.capacity - self.inner.slots.available_permits()
    }

    /// Check out a connection, waiting while all are in use.
    pub async fn acquire(&self) -> Result<PooledConnection<C>> {
        let permit = self
            .inner
            .slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| MigrateError::pool("pool is closed", format!("acquiring {} connection", self.inner.name)))?;

        let worker = match self.inner.take_idle() {
            Some(worker) => worker,
            None => self.inner.start_worker().await?,
        };

        Ok(PooledConnection {
            worker: Some(worker),
            permit: Some(permit),
            pool: self.inner.clone(),
            broken: false,
        })
    }

    /// Stop accepting acquisitions and shut down every idle worker, waiting
    /// for each to close its connection.
    ///
    /// Call after all connections have been released.
    pub async fn close(&self) {
        let busy = self.in_use();
        if busy > 0 {
            warn!("{}: closing with {} connections still checked out", self.inner.name, busy);
        }
        self.inner.slots.close();
        let idle: Vec<Worker<C>> = std::mem::take(&mut *lock(&self.inner.idle));
        let retired: Vec<oneshot::Receiver<()>> = std::mem::take(&mut *lock(&self.inner.retired));
        let count = idle.len();

        for worker in idle {
            drop(worker.jobs);
            let _ = worker.exited.await;
        }
        for exited in retired {
            let _ = exited.await;
        }
        debug!("{}: pool closed ({} workers stopped)", self.inner.name, count);
    }
}

impl<C: BlockingConnection> PoolInner<C> {
    fn take_idle(&self) -> Option<Worker<C>> {
        let mut idle = lock(&self.idle);
        while let Some(worker) = idle.pop() {
            if !worker.jobs.is_closed() {
                return Some(worker);
            }
            debug!("{}: dropping dead worker {}", self.name, worker.id);
        }
        None
    }

    async fn start_worker(&self) -> Result<Worker<C>> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (jobs_tx, jobs_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();
        let (exit_tx, exit_rx) = oneshot::channel();
        let initializer = self.initializer.clone();

        std::thread::Builder::new()
            .name(format!("{}-{}", self.name, id))
            .spawn(move || run_worker(initializer, jobs_rx, ready_tx, exit_tx))
            .map_err(|e| MigrateError::pool(e, format!("spawning {} worker", self.name)))?;

        match ready_rx.await {
            Ok(Ok(())) => {
                debug!("{}: started worker {}", self.name, id);
                Ok(Worker {
                    id,
                    jobs: jobs_tx,
                    exited: exit_rx,
                })
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(MigrateError::pool(
                "worker exited during setup",
                format!("connecting to {}", self.name),
            )),
        }
    }

    fn give_back(&self, worker: Worker<C>, broken: bool) {
        if broken || worker.jobs.is_closed() {
            warn!("{}: retiring worker {}", self.name, worker.id);
            let Worker { jobs, exited, .. } = worker;
            drop(jobs);
            lock(&self.retired).push(exited);
        } else {
            lock(&self.idle).push(worker);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Worker thread body: open the connection, serve jobs until the pool drops
/// the job channel, then close the connection.
fn run_worker<C: BlockingConnection>(
    initializer: Initializer<C>,
    mut jobs: mpsc::UnboundedReceiver<Job<C>>,
    ready: oneshot::Sender<Result<()>>,
    exited: oneshot::Sender<()>,
) {
    let mut scope = match initializer.init() {
        Ok(scope) => scope,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    if ready.send(Ok(())).is_err() {
        return;
    }

    while let Some(job) = jobs.blocking_recv() {
        let conn = scope.value_mut();
        if catch_unwind(AssertUnwindSafe(|| job(conn))).is_err() {
            warn!("{}: work item panicked, closing connection", initializer.name());
            break;
        }
    }

    drop(scope);
    let _ = exited.send(());
}

/// A checked-out source connection.
///
/// Returned to the pool by [`release`](Self::release) or on drop.
pub struct PooledConnection<C: BlockingConnection> {
    worker: Option<Worker<C>>,
    permit: Option<OwnedSemaphorePermit>,
    pool: Arc<PoolInner<C>>,
    broken: bool,
}

impl<C: BlockingConnection> PooledConnection<C> {
    /// Run `f` against the connection on its worker thread.
    pub async fn call<T, F>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&mut C) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.dispatch(Box::new(move |conn: &mut C| {
            let _ = tx.send(f(conn));
        }))?;
        match rx.await {
            Ok(result) => result,
            Err(_) => {
                self.broken = true;
                Err(MigrateError::pool("worker exited before replying", "blocking call"))
            }
        }
    }

    /// Names of all tables in the source database.
    pub async fn list_tables(&mut self) -> Result<Vec<String>> {
        self.call(|conn| conn.list_tables()).await
    }

    /// Columns of `table` in physical order.
    pub async fn describe_columns(&mut self, table: &str) -> Result<Vec<Column>> {
        let table = table.to_string();
        self.call(move |conn| conn.describe_columns(&table)).await
    }

    /// Open a cursor over `columns` of `table`.
    ///
    /// The cursor holds this connection until it is dropped. Page fetches
    /// stop at the first one issued after `cancel` fires, and a cursor
    /// dropped before the end has its statement aborted through
    /// [`BlockingCursor::abort`].
    pub async fn cursor(
        &mut self,
        table: &str,
        columns: &[String],
        cancel: CancellationToken,
    ) -> Result<RowCursor<'_>> {
        let (open_tx, open_rx) = oneshot::channel::<Result<()>>();
        let (page_tx, mut page_rx) = mpsc::unbounded_channel::<PageRequest>();
        let table = table.to_string();
        let columns = columns.to_vec();

        self.dispatch(Box::new(move |conn: &mut C| {
            let mut cursor = match conn.open_cursor(&table, &columns) {
                Ok(cursor) => cursor,
                Err(e) => {
                    let _ = open_tx.send(Err(e));
                    return;
                }
            };
            let mut finished = false;
            if open_tx.send(Ok(())).is_ok() {
                while let Some(request) = page_rx.blocking_recv() {
                    let page = cursor.fetch_page(request.size);
                    finished = page.as_ref().map_or(true, |rows| rows.is_empty());
                    let _ = request.reply.send(page);
                    if finished {
                        break;
                    }
                }
            }
            if !finished {
                debug!("abandoning cursor over {} before the end", table);
                if let Err(e) = cursor.abort() {
                    warn!("Failed to stop source query on {}: {}", table, e);
                }
            }
        }))?;

        match open_rx.await {
            Ok(Ok(())) => Ok(RowCursor::new(page_tx, self.pool.page_size, cancel)),
            Ok(Err(e)) => Err(e),
            Err(_) => {
                self.broken = true;
                Err(MigrateError::pool("worker exited while opening cursor", "source cursor"))
            }
        }
    }

    /// Return the connection to the pool.
    pub fn release(mut self) {
        self.give_back();
    }

    fn dispatch(&mut self, job: Job<C>) -> Result<()> {
        let sent = match &self.worker {
            Some(worker) => worker.jobs.send(job).is_ok(),
            None => false,
        };
        if !sent {
            self.broken = true;
            return Err(MigrateError::pool("connection is no longer usable", "dispatching source call"));
        }
        Ok(())
    }

    fn give_back(&mut self) {
        if let Some(worker) = self.worker.take() {
            self.pool.give_back(worker, self.broken);
        }
        // Worker goes back before the slot so the next acquirer finds it idle.
        self.permit.take();
    }
}

impl<C: BlockingConnection> Drop for PooledConnection<C> {
    fn drop(&mut self) {
        self.give_back();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{Row, SqlValue};
    use std::sync::atomic::AtomicBool;

    struct CountingDriver {
        opened: Arc<AtomicUsize>,
        closed: Arc<AtomicUsize>,
        fail_connect: Arc<AtomicBool>,
    }

    struct CountingConnection {
        id: usize,
        closed: Arc<AtomicUsize>,
        aborts: Arc<AtomicUsize>,
    }

    struct RangeCursor {
        next: i64,
        end: i64,
        aborts: Arc<AtomicUsize>,
    }

    impl BlockingDriver for CountingDriver {
        type Connection = CountingConnection;

        fn connect(&self) -> Result<CountingConnection> {
            if self.fail_connect.load(Ordering::SeqCst) {
                return Err(MigrateError::SourceQuery("access denied".into()));
            }
            Ok(CountingConnection {
                id: self.opened.fetch_add(1, Ordering::SeqCst),
                closed: self.closed.clone(),
                aborts: Arc::new(AtomicUsize::new(0)),
            })
        }

        fn name(&self) -> &str {
            "counting"
        }
    }

    impl BlockingConnection for CountingConnection {
        type Cursor<'c> = RangeCursor;

        fn list_tables(&mut self) -> Result<Vec<String>> {
            Ok(vec![format!("conn_{}", self.id)])
        }

        fn describe_columns(&mut self, _table: &str) -> Result<Vec<Column>> {
            Ok(vec![Column { name: "id".into(), ordinal: 1 }])
        }

        fn open_cursor(&mut self, table: &str, _columns: &[String]) -> Result<RangeCursor> {
            if table == "missing" {
                return Err(MigrateError::SourceQuery("no such table".into()));
            }
            let end = if table == "long" { 10_000 } else { 7 };
            Ok(RangeCursor {
                next: 0,
                end,
                aborts: self.aborts.clone(),
            })
        }

        fn close(self) -> Result<()> {
            self.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    impl BlockingCursor for RangeCursor {
        fn fetch_page(&mut self, size: usize) -> Result<Vec<Row>> {
            let mut page = Vec::new();
            while page.len() < size && self.next < self.end {
                page.push(vec![SqlValue::Int(self.next)]);
                self.next += 1;
            }
            Ok(page)
        }

        fn abort(&mut self) -> Result<()> {
            self.aborts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn pool(capacity: usize) -> (BlockingPool<CountingConnection>, Arc<AtomicUsize>, Arc<AtomicUsize>, Arc<AtomicBool>) {
        let opened = Arc::new(AtomicUsize::new(0));
        let closed = Arc::new(AtomicUsize::new(0));
        let fail_connect = Arc::new(AtomicBool::new(false));
        let driver = CountingDriver {
            opened: opened.clone(),
            closed: closed.clone(),
            fail_connect: fail_connect.clone(),
        };
        (BlockingPool::new(driver, capacity, 3), opened, closed, fail_connect)
    }

    #[tokio::test]
    async fn test_workers_are_reused() {
        let (pool, opened, closed, _) = pool(2);

        let mut conn = pool.acquire().await.unwrap();
        assert_eq!(conn.list_tables().await.unwrap(), vec!["conn_0"]);
        conn.release();

        let mut conn = pool.acquire().await.unwrap();
        assert_eq!(conn.list_tables().await.unwrap(), vec!["conn_0"]);
        drop(conn);

        pool.close().await;
        assert_eq!(opened.load(Ordering::SeqCst), 1);
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_capacity_bounds_connections() {
        let (pool, opened, closed, _) = pool(2);

        let a = pool.acquire().await.unwrap();
        let b = pool.acquire().await.unwrap();
        assert_eq!(pool.in_use(), 2);

        let waiting = tokio::time::timeout(std::time::Duration::from_millis(50), pool.acquire()).await;
        assert!(waiting.is_err(), "third acquire should wait");

        a.release();
        let c = pool.acquire().await.unwrap();
        drop(b);
        drop(c);

        pool.close().await;
        assert_eq!(opened.load(Ordering::SeqCst), 2);
        assert_eq!(closed.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_connect_failure_frees_slot() {
        let (pool, _, _, fail_connect) = pool(1);
        fail_connect.store(true, Ordering::SeqCst);
        assert!(pool.acquire().await.is_err());
        assert_eq!(pool.in_use(), 0);

        fail_connect.store(false, Ordering::SeqCst);
        let conn = pool.acquire().await.unwrap();
        conn.release();
        pool.close().await;
    }

    #[tokio::test]
    async fn test_cursor_pages_until_exhausted() {
        let (pool, _, _, _) = pool(1);
        let mut conn = pool.acquire().await.unwrap();
        let mut cursor = conn
            .cursor("numbers", &["id".to_string()], CancellationToken::new())
            .await
            .unwrap();

        let mut seen = Vec::new();
        while let Some(row) = cursor.next_row().await.unwrap() {
            seen.push(row[0].clone());
        }
        drop(cursor);
        assert_eq!(seen.len(), 7);
        assert_eq!(seen[6], SqlValue::Int(6));

        // Connection is still usable after the cursor is done.
        assert_eq!(conn.describe_columns("numbers").await.unwrap().len(), 1);
        conn.release();
        pool.close().await;
    }

    #[tokio::test]
    async fn test_abandoned_cursor_is_aborted() {
        let (pool, _, _, _) = pool(1);
        let mut conn = pool.acquire().await.unwrap();
        let columns = ["id".to_string()];

        let mut cursor = conn.cursor("numbers", &columns, CancellationToken::new()).await.unwrap();
        while cursor.next_row().await.unwrap().is_some() {}
        drop(cursor);
        let aborts = conn.call(|c| Ok(c.aborts.load(Ordering::SeqCst))).await.unwrap();
        assert_eq!(aborts, 0, "exhausted cursor needs no abort");

        let mut cursor = conn.cursor("long", &columns, CancellationToken::new()).await.unwrap();
        assert_eq!(cursor.next_row().await.unwrap(), Some(vec![SqlValue::Int(0)]));
        drop(cursor);
        let aborts = conn.call(|c| Ok(c.aborts.load(Ordering::SeqCst))).await.unwrap();
        assert_eq!(aborts, 1);

        conn.release();
        pool.close().await;
    }

    #[tokio::test]
    async fn test_cursor_open_error_is_returned() {
        let (pool, _, _, _) = pool(1);
        let mut conn = pool.acquire().await.unwrap();
        let result = conn.cursor("missing", &[], CancellationToken::new()).await;
        assert!(matches!(result, Err(MigrateError::SourceQuery(_))));
        conn.release();
        pool.close().await;
    }

    #[tokio::test]
    async fn test_panicking_call_retires_worker() {
        let (pool, opened, closed, _) = pool(1);
        let mut conn = pool.acquire().await.unwrap();
        let result: Result<()> = conn
            .call(|_| {
                if true {
                    panic!("driver bug");
                }
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(MigrateError::Pool { .. })));
        conn.release();

        let mut conn = pool.acquire().await.unwrap();
        assert_eq!(conn.list_tables().await.unwrap(), vec!["conn_1"]);
        conn.release();

        pool.close().await;
        assert_eq!(opened.load(Ordering::SeqCst), 2);
        assert_eq!(closed.load(Ordering::SeqCst), 2);
    }
}
