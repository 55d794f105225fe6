//! Typed handler dispatch.
//!
//! Handlers are plain async functions taking a [`Ctx`] and, optionally, one
//! [`Input`]. Their shape is checked by the compiler through
//! [`IntoEndpoint`]; registration erases them into an [`Endpoint`] that
//! binds the input, calls the handler and serializes the [`Reply`].
//!
//! ```rust,ignore
//! async fn ping(ctx: Ctx) -> Result<&'static str, HandlerError> { Ok("pong") }
//! async fn create(ctx: Ctx, input: NewOrder) -> Result<Order, HandlerError> { .. }
//!
//! router.get("/ping", ping);
//! router.post("/orders", create);
//! ```
//!
//! A function with no parameters, more than two, or a first parameter other
//! than `Ctx` does not implement `IntoEndpoint` and fails to compile.

use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use tracing::warn;

use fabriq_core::{Ctx, HandlerError, MicroError};

use crate::bind::{bind, Exchange, Input};
use crate::validation::Validator;

/// Boxed future produced by an [`Endpoint`].
pub type EndpointFuture = Pin<Box<dyn Future<Output = Result<Bytes, HandlerError>> + Send>>;

/// A type-erased handler: binds, invokes and serializes.
pub type Endpoint = Arc<dyn Fn(Ctx, Exchange, Arc<Validator>) -> EndpointFuture + Send + Sync>;

/// What a handler may return.
pub trait Reply: Send + 'static {
    /// Converts the return value into a serialized payload or a failure.
    fn into_outcome(self) -> Result<Bytes, HandlerError>;
}

impl<T, E> Reply for Result<T, E>
where
    T: Serialize + Send + 'static,
    E: Into<HandlerError> + Send + 'static,
{
    fn into_outcome(self) -> Result<Bytes, HandlerError> {
        match self {
            Ok(payload) => serialize(&payload),
            Err(err) => Err(err.into()),
        }
    }
}

/// A successful payload from a handler that cannot fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Json<T>(pub T);

impl<T: Serialize + Send + 'static> Reply for Json<T> {
    fn into_outcome(self) -> Result<Bytes, HandlerError> {
        serialize(&self.0)
    }
}

fn serialize<T: Serialize>(payload: &T) -> Result<Bytes, HandlerError> {
    serde_json::to_vec(payload).map(Bytes::from).map_err(|e| {
        MicroError::technical("serialization", "failed to serialize response")
            .with_details(e.to_string())
            .into()
    })
}

/// Marker for handlers taking only a [`Ctx`].
#[derive(Debug)]
pub struct CtxOnly;

/// Marker for handlers taking a [`Ctx`] and an input `I`.
#[derive(Debug)]
pub struct WithInput<I>(PhantomData<fn() -> I>);

/// Handler functions accepted by the router.
///
/// Two shapes are accepted: `Fn(Ctx) -> impl Future<Output = impl Reply>`
/// and `Fn(Ctx, I) -> impl Future<Output = impl Reply>` where `I: Input`.
///
/// ```rust
/// use fabriq_core::{Ctx, HandlerError};
/// use fabriq_server::dispatch::Json;
/// use fabriq_server::{Input, IntoEndpoint, Validate};
/// use serde::Deserialize;
///
/// #[derive(Deserialize)]
/// struct Page {
///     cursor: Option<String>,
/// }
/// impl Validate for Page {}
/// impl Input for Page {}
///
/// fn assert_endpoint<M, H: IntoEndpoint<M>>(_: H) {}
///
/// async fn status(_ctx: Ctx) -> Json<&'static str> {
///     Json("up")
/// }
/// async fn list(_ctx: Ctx, page: Page) -> Result<Option<String>, HandlerError> {
///     Ok(page.cursor)
/// }
///
/// assert_endpoint(status);
/// assert_endpoint(list);
/// ```
///
/// A handler without a context does not compile:
///
/// ```rust,compile_fail
/// use fabriq_core::HandlerError;
/// use fabriq_server::IntoEndpoint;
///
/// fn assert_endpoint<M, H: IntoEndpoint<M>>(_: H) {}
///
/// async fn orphan() -> Result<(), HandlerError> {
///     Ok(())
/// }
///
/// assert_endpoint(orphan);
/// ```
///
/// Neither does one with more than one input:
///
/// ```rust,compile_fail
/// use fabriq_core::{Ctx, HandlerError};
/// use fabriq_server::{Input, IntoEndpoint, Validate};
/// use serde::Deserialize;
///
/// #[derive(Deserialize)]
/// struct Page {
///     cursor: Option<String>,
/// }
/// impl Validate for Page {}
/// impl Input for Page {}
///
/// fn assert_endpoint<M, H: IntoEndpoint<M>>(_: H) {}
///
/// async fn twice(_ctx: Ctx, _a: Page, _b: Page) -> Result<(), HandlerError> {
///     Ok(())
/// }
///
/// assert_endpoint(twice);
/// ```
///
/// Nor one whose first parameter is not the context:
///
/// ```rust,compile_fail
/// use fabriq_core::{Ctx, HandlerError};
/// use fabriq_server::{Input, IntoEndpoint, Validate};
/// use serde::Deserialize;
///
/// #[derive(Deserialize)]
/// struct Page {
///     cursor: Option<String>,
/// }
/// impl Validate for Page {}
/// impl Input for Page {}
///
/// fn assert_endpoint<M, H: IntoEndpoint<M>>(_: H) {}
///
/// async fn swapped(_page: Page, _ctx: Ctx) -> Result<(), HandlerError> {
///     Ok(())
/// }
///
/// assert_endpoint(swapped);
/// ```
///
/// Nor one returning something that is not a [`Reply`]:
///
/// ```rust,compile_fail
/// use fabriq_core::Ctx;
/// use fabriq_server::IntoEndpoint;
///
/// fn assert_endpoint<M, H: IntoEndpoint<M>>(_: H) {}
///
/// async fn count(_ctx: Ctx) -> u32 {
///     7
/// }
///
/// assert_endpoint(count);
/// ```
pub trait IntoEndpoint<M>: Send + Sync + 'static {
    /// Erases the handler.
    fn into_endpoint(self) -> Endpoint;
}

impl<F, Fut, R> IntoEndpoint<CtxOnly> for F
where
    F: Fn(Ctx) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: Reply,
{
    fn into_endpoint(self) -> Endpoint {
        let handler = Arc::new(self);
        Arc::new(
            move |ctx: Ctx, _exchange: Exchange, _validator: Arc<Validator>| -> EndpointFuture {
                let handler = Arc::clone(&handler);
                Box::pin(async move { handler(ctx).await.into_outcome() })
            },
        )
    }
}

impl<F, Fut, R, I> IntoEndpoint<WithInput<I>> for F
where
    F: Fn(Ctx, I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: Reply,
    I: Input,
{
    fn into_endpoint(self) -> Endpoint {
        let handler = Arc::new(self);
        Arc::new(
            move |ctx: Ctx, exchange: Exchange, validator: Arc<Validator>| -> EndpointFuture {
                let handler = Arc::clone(&handler);
                Box::pin(async move {
                    let input = bind::<I>(&exchange, &validator)?;
                    handler(ctx, input).await.into_outcome()
                })
            },
        )
    }
}

/// Runs endpoints inside the request's transaction scope.
#[derive(Debug, Clone, Default)]
pub struct Dispatcher {
    validator: Arc<Validator>,
}

impl Dispatcher {
    /// Creates a dispatcher using the given validator.
    #[must_use]
    pub fn new(validator: Arc<Validator>) -> Self {
        Self { validator }
    }

    /// Returns the validator.
    #[must_use]
    pub fn validator(&self) -> &Validator {
        &self.validator
    }

    /// Binds, invokes and serializes as one transactional unit of work.
    ///
    /// Any error rolls the transaction back and is returned unchanged.
    pub async fn dispatch(
        &self,
        endpoint: &Endpoint,
        ctx: Ctx,
        exchange: Exchange,
    ) -> Result<Bytes, HandlerError> {
        let endpoint = Arc::clone(endpoint);
        let validator = Arc::clone(&self.validator);
        let request_id = ctx.request_id();

        let outcome = ctx
            .tx(move |scoped| endpoint(scoped, exchange, validator))
            .await;

        if let Err(err) = &outcome {
            match err {
                HandlerError::Micro(e) => warn!(
                    request_id = %request_id,
                    category = %e.category(),
                    kind = e.kind(),
                    error = %e,
                    "handler failed"
                ),
                HandlerError::Other(e) => warn!(
                    request_id = %request_id,
                    error = %e,
                    "handler failed with unmapped error"
                ),
            }
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::{Validate, Violations};
    use fabriq_core::ErrorCategory;
    use http::Method;
    use serde::Deserialize;

    #[derive(Deserialize)]
    struct Greet {
        name: String,
    }

    impl Validate for Greet {
        fn validate(&self, v: &mut Violations) {
            v.required("name", &self.name);
        }
    }

    impl Input for Greet {}

    async fn hello(_ctx: Ctx) -> Result<&'static str, HandlerError> {
        Ok("hello")
    }

    async fn greet(ctx: Ctx, input: Greet) -> Result<String, HandlerError> {
        Ok(format!("{} from {}", input.name, ctx.tenant_id()))
    }

    async fn infallible(_ctx: Ctx) -> Json<u32> {
        Json(7)
    }

    async fn refuse(_ctx: Ctx) -> Result<(), MicroError> {
        Err(MicroError::forbidden("acl", "nope"))
    }

    fn post(body: &str) -> Exchange {
        Exchange {
            method: Method::POST,
            body: Bytes::from(body.to_string()),
            ..Exchange::default()
        }
    }

    async fn run<M>(
        handler: impl IntoEndpoint<M>,
        exchange: Exchange,
    ) -> Result<Bytes, HandlerError> {
        Dispatcher::default()
            .dispatch(&handler.into_endpoint(), Ctx::new("acme"), exchange)
            .await
    }

    fn assert_endpoint<M, H: IntoEndpoint<M>>(_: H) {}

    #[test]
    fn test_accepted_handler_shapes() {
        assert_endpoint(hello);
        assert_endpoint(greet);
        assert_endpoint(infallible);
        assert_endpoint(refuse);
        assert_endpoint(|_ctx: Ctx| async { Ok::<_, MicroError>(()) });
        assert_endpoint(|_ctx: Ctx, input: Greet| async move { Json(input.name) });
    }

    #[tokio::test]
    async fn test_ctx_only_handler() {
        let body = run(hello, Exchange::default()).await.unwrap();
        assert_eq!(&body[..], br#""hello""#);
    }

    #[tokio::test]
    async fn test_handler_with_input() {
        let body = run(greet, post(r#"{"name":"ada"}"#)).await.unwrap();
        assert_eq!(&body[..], br#""ada from acme""#);
    }

    #[tokio::test]
    async fn test_single_value_reply() {
        let body = run(infallible, Exchange::default()).await.unwrap();
        assert_eq!(&body[..], b"7");
    }

    #[tokio::test]
    async fn test_error_passes_through() {
        let err = run(refuse, Exchange::default()).await.unwrap_err();
        assert_eq!(err.as_micro().unwrap().category(), ErrorCategory::Forbidden);
    }

    #[tokio::test]
    async fn test_invalid_input_skips_handler() {
        let called = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = Arc::clone(&called);
        let handler = move |_ctx: Ctx, _input: Greet| {
            let flag = Arc::clone(&flag);
            async move {
                flag.store(true, std::sync::atomic::Ordering::SeqCst);
                Ok::<_, HandlerError>(())
            }
        };

        let err = run(handler, post(r#"{"name":""}"#)).await.unwrap_err();
        assert_eq!(err.as_micro().unwrap().kind(), "validation");
        assert!(!called.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_closure_handler() {
        let prefix = String::from(">");
        let handler = move |ctx: Ctx| {
            let prefix = prefix.clone();
            async move { Ok::<_, anyhow::Error>(format!("{prefix}{}", ctx.tenant_id())) }
        };
        let body = run(handler, Exchange::default()).await.unwrap();
        assert_eq!(&body[..], br#"">acme""#);
    }
}
