//! The explicit transaction handle that replaces the original
//! `runInteraction(name, closure)` callback style: a value passed to helper
//! methods, carrying its own post-commit callback list.

use std::sync::Arc;

use sqlx::{Sqlite, SqlitePool};

use crate::{cache::CacheCoordinator, error::Result};

/// A single database transaction, plus the callbacks scheduled to run after
/// it commits.
///
/// Owns its connection outright (acquired from the pool via
/// [`sqlx::Pool::begin`], which hands back a connection-owning, `'static`
/// transaction) rather than borrowing it — this is what lets
/// [`crate::Store::with_transaction`] move a `Transaction` into a detached
/// `tokio::spawn`ed task.
///
/// Dropping a `Transaction` without calling [`Transaction::commit`] rolls
/// back via `sqlx`'s own `Drop` impl on the inner transaction; no callback
/// registered with [`Transaction::call_after`] runs in that case.
pub struct Transaction {
    inner: sqlx::Transaction<'static, Sqlite>,
    after_commit: Vec<Box<dyn FnOnce() + Send>>,
    cache: Arc<CacheCoordinator>,
}

impl Transaction {
    pub(crate) async fn begin(pool: &SqlitePool, cache: Arc<CacheCoordinator>) -> Result<Self> {
        let inner = pool.begin().await?;
        Ok(Self { inner, after_commit: Vec::new(), cache })
    }

    /// Mutable access to the underlying connection, for issuing statements.
    pub(crate) fn connection(&mut self) -> &mut sqlx::SqliteConnection {
        &mut self.inner
    }

    /// A handle to the cache coordinator this transaction's commit will
    /// invalidate through, for use inside `call_after` closures.
    pub(crate) fn cache(&self) -> Arc<CacheCoordinator> {
        Arc::clone(&self.cache)
    }

    /// Registers a callback to run once this transaction's commit has
    /// durably succeeded. Never invoked if the transaction aborts.
    pub fn call_after(&mut self, callback: impl FnOnce() + Send + 'static) {
        self.after_commit.push(Box::new(callback));
    }

    /// Commits the transaction, then drains and runs every registered
    /// callback in registration order. The write operation this
    /// transaction backs is not considered complete until this returns.
    pub(crate) async fn commit(self) -> Result<()> {
        let Transaction { inner, after_commit, cache: _ } = self;
        inner.commit().await?;
        for callback in after_commit {
            callback();
        }
        Ok(())
    }
}
