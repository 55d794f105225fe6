//! Request context types.
//!
//! [`Ctx`] is what every handler, filter and scheduled job receives. It
//! carries the caller's [`Authentication`] and the transactional scope the
//! work runs in.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::auth::Authentication;
use crate::error::MicroError;
use crate::tx::{NoopTransactions, Transaction, TransactionManager};

/// A request identifier.
///
/// Generated ids are UUID v7, which is time-ordered and keeps log lines of
/// one request adjacent. Ids received from a client or proxy are kept as
/// sent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    /// Creates a new unique request ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Accepts a request ID received from a client or upstream proxy.
    ///
    /// Any non-empty value made of visible ASCII characters is accepted.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        let visible = value.bytes().all(|b| b.is_ascii_graphic());
        (!value.is_empty() && visible).then(|| Self(value.to_string()))
    }

    /// Returns the ID as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<Uuid> for RequestId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid.to_string())
    }
}

/// Per-request context.
///
/// Cloning is cheap; the authentication snapshot and transaction handles
/// are shared.
///
/// # Example
///
/// ```
/// use fabriq_core::{Ctx, DEFAULT_TENANT_ID};
///
/// let ctx = Ctx::new(DEFAULT_TENANT_ID);
/// assert!(!ctx.is_authenticated());
/// assert_eq!(ctx.tenant_id(), "default");
/// ```
#[derive(Clone)]
pub struct Ctx {
    request_id: RequestId,
    auth: Arc<Authentication>,
    transactions: Arc<dyn TransactionManager>,
    transaction: Option<Arc<dyn Transaction>>,
    started_at: Instant,
}

impl Ctx {
    /// Creates an unauthenticated context for a tenant.
    #[must_use]
    pub fn new(tenant_id: &str) -> Self {
        Self::from_auth(Authentication::anonymous(Some(tenant_id)))
    }

    /// Creates a context for an authentication snapshot.
    #[must_use]
    pub fn from_auth(auth: impl Into<Arc<Authentication>>) -> Self {
        Self {
            request_id: RequestId::new(),
            auth: auth.into(),
            transactions: Arc::new(NoopTransactions),
            transaction: None,
            started_at: Instant::now(),
        }
    }

    /// Sets the request ID.
    #[must_use]
    pub fn with_request_id(mut self, request_id: RequestId) -> Self {
        self.request_id = request_id;
        self
    }

    /// Sets the transaction manager used by [`Ctx::tx`].
    #[must_use]
    pub fn with_transactions(mut self, transactions: Arc<dyn TransactionManager>) -> Self {
        self.transactions = transactions;
        self
    }

    /// Returns the request ID.
    #[must_use]
    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    /// Returns the caller's authentication snapshot.
    #[must_use]
    pub fn auth(&self) -> &Authentication {
        &self.auth
    }

    /// Returns the active tenant.
    #[must_use]
    pub fn tenant_id(&self) -> &str {
        self.auth.tenant_id()
    }

    /// Returns the caller's user ID, empty when anonymous.
    #[must_use]
    pub fn user_id(&self) -> &str {
        self.auth.user_id()
    }

    /// Returns `true` if the caller presented a valid token.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.auth.is_authenticated()
    }

    /// Returns the transaction this context is running in, if any.
    #[must_use]
    pub fn transaction(&self) -> Option<&Arc<dyn Transaction>> {
        self.transaction.as_ref()
    }

    /// Returns the current transaction as its concrete type.
    #[must_use]
    pub fn transaction_as<T: Any>(&self) -> Option<&T> {
        self.transaction
            .as_ref()
            .and_then(|tx| tx.as_any().downcast_ref::<T>())
    }

    /// Returns the time since the context was created.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Runs `work` inside a transaction.
    ///
    /// If this context already has a transaction, `work` joins it and the
    /// outer scope decides the outcome. Otherwise a new transaction is begun,
    /// committed when `work` returns `Ok`, and rolled back when it returns
    /// `Err` or panics. A panic is resumed after the rollback.
    pub async fn tx<F, Fut, T, E>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce(Ctx) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<MicroError>,
    {
        if self.transaction.is_some() {
            return work(self.clone()).await;
        }

        let tx = self.transactions.begin().await?;
        let scoped = Self {
            transaction: Some(tx.clone()),
            ..self.clone()
        };

        match AssertUnwindSafe(async move { work(scoped).await })
            .catch_unwind()
            .await
        {
            Ok(Ok(value)) => {
                tx.commit().await?;
                Ok(value)
            }
            Ok(Err(err)) => {
                if let Err(rb) = tx.rollback().await {
                    warn!(request_id = %self.request_id, error = %rb, "rollback failed");
                }
                Err(err)
            }
            Err(panic) => {
                if let Err(rb) = tx.rollback().await {
                    warn!(request_id = %self.request_id, error = %rb, "rollback after panic failed");
                }
                std::panic::resume_unwind(panic)
            }
        }
    }
}

impl std::fmt::Debug for Ctx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ctx")
            .field("request_id", &self.request_id)
            .field("tenant_id", &self.auth.tenant_id())
            .field("authenticated", &self.auth.is_authenticated())
            .field("in_transaction", &self.transaction.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tx::TxFuture;
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    struct Journal(Mutex<Vec<&'static str>>);

    impl Journal {
        fn push(&self, event: &'static str) {
            self.0.lock().unwrap().push(event);
        }

        fn events(&self) -> Vec<&'static str> {
            self.0.lock().unwrap().clone()
        }
    }

    struct RecordingTx(Arc<Journal>);

    impl Transaction for RecordingTx {
        fn commit(&self) -> TxFuture<'_, ()> {
            self.0.push("commit");
            Box::pin(async { Ok(()) })
        }

        fn rollback(&self) -> TxFuture<'_, ()> {
            self.0.push("rollback");
            Box::pin(async { Ok(()) })
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    struct RecordingManager(Arc<Journal>);

    impl TransactionManager for RecordingManager {
        fn begin(&self) -> TxFuture<'_, Arc<dyn Transaction>> {
            self.0.push("begin");
            let tx: Arc<dyn Transaction> = Arc::new(RecordingTx(self.0.clone()));
            Box::pin(async move { Ok(tx) })
        }
    }

    fn recording_ctx() -> (Ctx, Arc<Journal>) {
        let journal = Arc::new(Journal::default());
        let ctx = Ctx::new("acme").with_transactions(Arc::new(RecordingManager(journal.clone())));
        (ctx, journal)
    }

    #[test]
    fn test_request_id_unique() {
        assert_ne!(RequestId::new(), RequestId::new());
    }

    #[test]
    fn test_request_id_parse() {
        let id = RequestId::new();
        assert_eq!(RequestId::parse(&id.to_string()), Some(id));
        assert_eq!(
            RequestId::parse(" edge-7f3a:42 ").map(|id| id.to_string()),
            Some("edge-7f3a:42".to_string())
        );
        assert_eq!(RequestId::parse(""), None);
        assert_eq!(RequestId::parse("two words"), None);
        assert_eq!(RequestId::parse("caf\u{e9}"), None);
    }

    #[test]
    fn test_ctx_accessors() {
        let ctx = Ctx::new("acme");
        assert_eq!(ctx.tenant_id(), "acme");
        assert!(ctx.user_id().is_empty());
        assert!(!ctx.is_authenticated());
        assert!(ctx.transaction().is_none());
    }

    #[tokio::test]
    async fn test_tx_commits_on_ok() {
        let (ctx, journal) = recording_ctx();

        let value: Result<u32, MicroError> = ctx
            .tx(|inner| async move {
                assert!(inner.transaction_as::<RecordingTx>().is_some());
                Ok(7)
            })
            .await;

        assert_eq!(value.unwrap(), 7);
        assert_eq!(journal.events(), ["begin", "commit"]);
    }

    #[tokio::test]
    async fn test_tx_rolls_back_on_err() {
        let (ctx, journal) = recording_ctx();

        let result: Result<(), MicroError> = ctx
            .tx(|_| async { Err(MicroError::conflict("dup", "duplicate")) })
            .await;

        assert!(result.is_err());
        assert_eq!(journal.events(), ["begin", "rollback"]);
    }

    #[tokio::test]
    async fn test_tx_rolls_back_on_panic() {
        let (ctx, journal) = recording_ctx();

        let outcome = AssertUnwindSafe(ctx.tx(|_| async {
            if std::hint::black_box(true) {
                panic!("handler exploded");
            }
            Ok::<(), MicroError>(())
        }))
        .catch_unwind()
        .await;

        assert!(outcome.is_err());
        assert_eq!(journal.events(), ["begin", "rollback"]);
    }

    #[tokio::test]
    async fn test_nested_tx_joins_outer() {
        let (ctx, journal) = recording_ctx();

        let result: Result<(), MicroError> = ctx
            .tx(|outer| async move { outer.tx(|_| async { Ok(()) }).await })
            .await;

        assert!(result.is_ok());
        assert_eq!(journal.events(), ["begin", "commit"]);
    }
}
