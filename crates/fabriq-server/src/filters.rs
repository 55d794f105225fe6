//! Per-route filters.
//!
//! A filter inspects the request context before the handler runs and may
//! short-circuit the request with an error. Filters of enclosing groups run
//! first, then the route's own, in registration order.

use std::sync::Arc;

use fabriq_core::{Ctx, HandlerError, MicroError};

/// A route filter.
#[derive(Clone)]
pub struct Filter {
    name: String,
    check: Arc<dyn Fn(&Ctx) -> Result<(), HandlerError> + Send + Sync>,
}

impl Filter {
    /// Creates a filter from a check function.
    ///
    /// # Example
    ///
    /// ```rust
    /// use fabriq_core::MicroError;
    /// use fabriq_server::Filter;
    ///
    /// let acme_only = Filter::new("acme-only", |ctx| {
    ///     if ctx.tenant_id() == "acme" {
    ///         Ok(())
    ///     } else {
    ///         Err(MicroError::forbidden("tenant", "acme only").into())
    ///     }
    /// });
    /// assert_eq!(acme_only.name(), "acme-only");
    /// ```
    pub fn new<F>(name: impl Into<String>, check: F) -> Self
    where
        F: Fn(&Ctx) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            check: Arc::new(check),
        }
    }

    /// Returns the filter name used in logs.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Runs the filter.
    pub fn apply(&self, ctx: &Ctx) -> Result<(), HandlerError> {
        (self.check)(ctx)
    }
}

impl std::fmt::Debug for Filter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Filter").field("name", &self.name).finish()
    }
}

/// Rejects unauthenticated callers with 401.
#[must_use]
pub fn authenticated() -> Filter {
    Filter::new("authenticated", |ctx| {
        if ctx.is_authenticated() {
            Ok(())
        } else {
            Err(MicroError::unauthorized("unauthorized", "authentication required").into())
        }
    })
}

/// Requires a role: 401 when unauthenticated, 403 when the role is missing.
#[must_use]
pub fn has_role(role: impl Into<String>) -> Filter {
    let role = role.into();
    Filter::new(format!("has_role:{role}"), move |ctx| {
        require(ctx, ctx.auth().has_role(&role), "role", &role)
    })
}

/// Requires a permission: 401 when unauthenticated, 403 when it is missing.
#[must_use]
pub fn has_permission(permission: impl Into<String>) -> Filter {
    let permission = permission.into();
    Filter::new(format!("has_permission:{permission}"), move |ctx| {
        require(ctx, ctx.auth().has_permission(&permission), "permission", &permission)
    })
}

fn require(ctx: &Ctx, granted: bool, what: &str, name: &str) -> Result<(), HandlerError> {
    if !ctx.is_authenticated() {
        return Err(MicroError::unauthorized("unauthorized", "authentication required").into());
    }
    if granted {
        Ok(())
    } else {
        Err(MicroError::forbidden("forbidden", format!("missing {what} {name}"))
            .with_details(serde_json::json!({ what: name }))
            .into())
    }
}
