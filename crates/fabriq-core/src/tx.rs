//! Transaction boundary used by [`Ctx::tx`](crate::Ctx::tx).
//!
//! Fabriq does not ship a database layer. Services plug their own store in by
//! implementing [`TransactionManager`]; handlers reach the concrete
//! transaction through [`Ctx::transaction_as`](crate::Ctx::transaction_as).
//!
//! Implementations must roll back a transaction that is dropped without
//! `commit` or `rollback` having been called, since a request timeout drops
//! the whole unit of work.

use std::any::Any;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::MicroError;

/// Boxed future returned by transaction operations.
pub type TxFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, MicroError>> + Send + 'a>>;

/// An open unit of work.
pub trait Transaction: Send + Sync + 'static {
    /// Makes the work durable.
    fn commit(&self) -> TxFuture<'_, ()>;

    /// Discards the work.
    fn rollback(&self) -> TxFuture<'_, ()>;

    /// Returns `self` for downcasting to the concrete type.
    fn as_any(&self) -> &dyn Any;
}

/// Opens transactions.
pub trait TransactionManager: Send + Sync + 'static {
    /// Begins a new transaction.
    fn begin(&self) -> TxFuture<'_, Arc<dyn Transaction>>;
}

/// Transaction manager for services without a transactional store.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTransactions;

#[derive(Debug)]
struct NoopTransaction;

impl Transaction for NoopTransaction {
    fn commit(&self) -> TxFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }

    fn rollback(&self) -> TxFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl TransactionManager for NoopTransactions {
    fn begin(&self) -> TxFuture<'_, Arc<dyn Transaction>> {
        Box::pin(async { Ok(Arc::new(NoopTransaction) as Arc<dyn Transaction>) })
    }
}
