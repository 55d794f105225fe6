//! Router facade.
//!
//! Routes are registered per HTTP verb with a path template using
//! `{param}` segments. Each registration returns the [`Route`] so filters
//! can be chained onto it. Groups share a path prefix and a filter chain,
//! and nest.
//!
//! # Example
//!
//! ```rust
//! use fabriq_core::{Ctx, HandlerError};
//! use fabriq_server::{filters, Router};
//! use fabriq_server::router::RouteLookup;
//! use http::Method;
//!
//! async fn list(_ctx: Ctx) -> Result<Vec<String>, HandlerError> {
//!     Ok(vec![])
//! }
//!
//! let mut router = Router::new();
//! router.get("/orders", list);
//!
//! let mut admin = router.group("/admin");
//! admin.filter(filters::has_role("admin"));
//! admin.delete("/orders/{id}", list).filter(filters::has_permission("orders:delete"));
//!
//! match router.match_route(&Method::DELETE, "/admin/orders/42") {
//!     RouteLookup::Found(route, params) => {
//!         assert_eq!(params.get("id").map(String::as_str), Some("42"));
//!         assert_eq!(route.filters().len(), 2);
//!     }
//!     _ => unreachable!(),
//! }
//! ```

use std::collections::HashMap;

use http::Method;

use crate::dispatch::{Endpoint, IntoEndpoint};
use crate::filters::Filter;

/// A segment of a path template.
#[derive(Debug, Clone, PartialEq, Eq)]
enum PathSegment {
    Literal(String),
    Param(String),
}

fn parse_segments(pattern: &str) -> Vec<PathSegment> {
    pattern
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|s| match s.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
            Some(name) => PathSegment::Param(name.to_string()),
            None => PathSegment::Literal(s.to_string()),
        })
        .collect()
}

fn join_paths(prefix: &str, path: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    if path.is_empty() {
        if prefix.is_empty() {
            "/".to_string()
        } else {
            prefix.to_string()
        }
    } else {
        format!("{prefix}/{path}")
    }
}

/// A registered route.
#[derive(Clone)]
pub struct Route {
    method: Method,
    pattern: String,
    segments: Vec<PathSegment>,
    filters: Vec<Filter>,
    endpoint: Endpoint,
}

impl Route {
    /// Appends a filter to this route's chain.
    pub fn filter(&mut self, filter: Filter) -> &mut Self {
        self.filters.push(filter);
        self
    }

    /// Returns the HTTP method.
    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the path template.
    #[must_use]
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Returns the filter chain in execution order.
    #[must_use]
    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    /// Returns the erased handler.
    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn match_path(&self, path: &str) -> Option<HashMap<String, String>> {
        if path.len() > 1 && path.ends_with('/') {
            return None;
        }
        let actual: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        if actual.len() != self.segments.len() {
            return None;
        }

        let mut params = HashMap::new();
        for (segment, value) in self.segments.iter().zip(actual) {
            match segment {
                PathSegment::Literal(expected) if expected == value => {}
                PathSegment::Literal(_) => return None,
                PathSegment::Param(name) => {
                    let decoded = urlencoding::decode(value)
                        .map(std::borrow::Cow::into_owned)
                        .unwrap_or_else(|_| value.to_string());
                    params.insert(name.clone(), decoded);
                }
            }
        }
        Some(params)
    }
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("method", &self.method)
            .field("pattern", &self.pattern)
            .field("filters", &self.filters)
            .finish_non_exhaustive()
    }
}

/// Result of looking up a request in the router.
#[derive(Debug)]
pub enum RouteLookup<'a> {
    /// A route matched; path parameters are decoded.
    Found(&'a Route, HashMap<String, String>),
    /// The path exists but not for this method.
    MethodNotAllowed(Vec<Method>),
    /// Nothing matches the path.
    NotFound,
}

/// HTTP request router.
///
/// The first registered route that matches wins. Matching is strict about
/// a trailing slash; the server strips it beforehand when configured to.
#[derive(Debug, Clone, Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    /// Creates an empty router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for a method and path.
    pub fn route<M>(
        &mut self,
        method: Method,
        path: &str,
        handler: impl IntoEndpoint<M>,
    ) -> &mut Route {
        self.push(method, path.to_string(), Vec::new(), handler.into_endpoint())
    }

    /// Registers a `GET` handler.
    pub fn get<M>(&mut self, path: &str, handler: impl IntoEndpoint<M>) -> &mut Route {
        self.route(Method::GET, path, handler)
    }

    /// Registers a `POST` handler.
    pub fn post<M>(&mut self, path: &str, handler: impl IntoEndpoint<M>) -> &mut Route {
        self.route(Method::POST, path, handler)
    }

    /// Registers a `PUT` handler.
    pub fn put<M>(&mut self, path: &str, handler: impl IntoEndpoint<M>) -> &mut Route {
        self.route(Method::PUT, path, handler)
    }

    /// Registers a `PATCH` handler.
    pub fn patch<M>(&mut self, path: &str, handler: impl IntoEndpoint<M>) -> &mut Route {
        self.route(Method::PATCH, path, handler)
    }

    /// Registers a `DELETE` handler.
    pub fn delete<M>(&mut self, path: &str, handler: impl IntoEndpoint<M>) -> &mut Route {
        self.route(Method::DELETE, path, handler)
    }

    /// Opens a group of routes sharing `prefix`. Add filters with
    /// [`RouteGroup::filter`].
    pub fn group(&mut self, prefix: &str) -> RouteGroup<'_> {
        RouteGroup {
            router: self,
            prefix: join_paths("", prefix),
            filters: Vec::new(),
        }
    }

    /// Returns the number of registered routes.
    #[must_use]
    pub fn route_count(&self) -> usize {
        self.routes.len()
    }

    /// Returns all registered routes in registration order.
    #[must_use]
    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    /// Looks up the route for a request.
    #[must_use]
    pub fn match_route(&self, method: &Method, path: &str) -> RouteLookup<'_> {
        let mut allowed = Vec::new();

        for route in &self.routes {
            if let Some(params) = route.match_path(path) {
                if route.method == *method {
                    return RouteLookup::Found(route, params);
                }
                if !allowed.contains(&route.method) {
                    allowed.push(route.method.clone());
                }
            }
        }

        if allowed.is_empty() {
            RouteLookup::NotFound
        } else {
            RouteLookup::MethodNotAllowed(allowed)
        }
    }

    fn push(
        &mut self,
        method: Method,
        pattern: String,
        filters: Vec<Filter>,
        endpoint: Endpoint,
    ) -> &mut Route {
        let index = self.routes.len();
        self.routes.push(Route {
            method,
            segments: parse_segments(&pattern),
            pattern,
            filters,
            endpoint,
        });
        &mut self.routes[index]
    }
}

/// Routes sharing a prefix and a filter chain.
///
/// Created by [`Router::group`] or [`RouteGroup::group`]. A filter added to
/// the group applies to the routes and nested groups registered on it
/// afterwards.
#[derive(Debug)]
pub struct RouteGroup<'a> {
    router: &'a mut Router,
    prefix: String,
    filters: Vec<Filter>,
}

impl RouteGroup<'_> {
    /// Returns the full path prefix.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Appends a filter to this group's chain.
    pub fn filter(&mut self, filter: Filter) -> &mut Self {
        self.filters.push(filter);
        self
    }

    /// Returns the group's filter chain, inherited filters first.
    #[must_use]
    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    /// Registers a handler under this group's prefix.
    pub fn route<M>(
        &mut self,
        method: Method,
        path: &str,
        handler: impl IntoEndpoint<M>,
    ) -> &mut Route {
        let pattern = join_paths(&self.prefix, path);
        self.router.push(
            method,
            pattern,
            self.filters.clone(),
            handler.into_endpoint(),
        )
    }

    /// Registers a `GET` handler.
    pub fn get<M>(&mut self, path: &str, handler: impl IntoEndpoint<M>) -> &mut Route {
        self.route(Method::GET, path, handler)
    }

    /// Registers a `POST` handler.
    pub fn post<M>(&mut self, path: &str, handler: impl IntoEndpoint<M>) -> &mut Route {
        self.route(Method::POST, path, handler)
    }

    /// Registers a `PUT` handler.
    pub fn put<M>(&mut self, path: &str, handler: impl IntoEndpoint<M>) -> &mut Route {
        self.route(Method::PUT, path, handler)
    }

    /// Registers a `PATCH` handler.
    pub fn patch<M>(&mut self, path: &str, handler: impl IntoEndpoint<M>) -> &mut Route {
        self.route(Method::PATCH, path, handler)
    }

    /// Registers a `DELETE` handler.
    pub fn delete<M>(&mut self, path: &str, handler: impl IntoEndpoint<M>) -> &mut Route {
        self.route(Method::DELETE, path, handler)
    }

    /// Opens a nested group. It inherits this group's prefix and filters.
    pub fn group(&mut self, prefix: &str) -> RouteGroup<'_> {
        RouteGroup {
            prefix: join_paths(&self.prefix, prefix),
            filters: self.filters.clone(),
            router: &mut *self.router,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters;
    use fabriq_core::{Ctx, HandlerError};
    use proptest::prelude::*;

    async fn noop(_ctx: Ctx) -> Result<(), HandlerError> {
        Ok(())
    }

    fn found<'a>(lookup: RouteLookup<'a>) -> (&'a Route, HashMap<String, String>) {
        match lookup {
            RouteLookup::Found(route, params) => (route, params),
            other => panic!("expected a match, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_segments() {
        assert_eq!(
            parse_segments("/users/{id}/posts"),
            vec![
                PathSegment::Literal("users".into()),
                PathSegment::Param("id".into()),
                PathSegment::Literal("posts".into()),
            ]
        );
        assert!(parse_segments("/").is_empty());
    }

    #[test]
    fn test_join_paths() {
        assert_eq!(join_paths("", "/users"), "/users");
        assert_eq!(join_paths("/api/", "/users"), "/api/users");
        assert_eq!(join_paths("/api", ""), "/api");
        assert_eq!(join_paths("", ""), "/");
    }

    #[test]
    fn test_verbs_register_routes() {
        let mut router = Router::new();
        router.get("/a", noop);
        router.post("/a", noop);
        router.put("/a", noop);
        router.patch("/a", noop);
        router.delete("/a", noop);

        let methods: Vec<_> = router.routes().iter().map(|r| r.method().clone()).collect();
        assert_eq!(
            methods,
            [Method::GET, Method::POST, Method::PUT, Method::PATCH, Method::DELETE]
        );
    }

    #[test]
    fn test_path_params_are_decoded() {
        let mut router = Router::new();
        router.get("/files/{name}", noop);

        let (route, params) = found(router.match_route(&Method::GET, "/files/a%20b.txt"));
        assert_eq!(route.pattern(), "/files/{name}");
        assert_eq!(params["name"], "a b.txt");
    }

    #[test]
    fn test_first_match_wins() {
        let mut router = Router::new();
        router.get("/users/me", noop).filter(filters::authenticated());
        router.get("/users/{id}", noop);

        let (route, _) = found(router.match_route(&Method::GET, "/users/me"));
        assert_eq!(route.pattern(), "/users/me");
        assert_eq!(route.filters().len(), 1);
    }

    #[test]
    fn test_trailing_slash_is_strict() {
        let mut router = Router::new();
        router.get("/users", noop);
        router.get("/", noop);

        assert!(matches!(
            router.match_route(&Method::GET, "/users/"),
            RouteLookup::NotFound
        ));
        let (root, _) = found(router.match_route(&Method::GET, "/"));
        assert_eq!(root.pattern(), "/");
    }

    #[test]
    fn test_not_found_and_method_not_allowed() {
        let mut router = Router::new();
        router.get("/orders", noop);
        router.post("/orders", noop);

        assert!(matches!(
            router.match_route(&Method::GET, "/missing"),
            RouteLookup::NotFound
        ));
        match router.match_route(&Method::DELETE, "/orders") {
            RouteLookup::MethodNotAllowed(allowed) => {
                assert_eq!(allowed, [Method::GET, Method::POST]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_nested_groups_inherit_filters() {
        let mut router = Router::new();
        {
            let mut api = router.group("/api");
            api.filter(filters::authenticated());
            api.get("/status", noop);

            let mut admin = api.group("/admin/");
            admin.filter(filters::has_role("admin"));
            admin
                .delete("/users/{id}", noop)
                .filter(filters::has_permission("users:delete"));
        }

        let (status, _) = found(router.match_route(&Method::GET, "/api/status"));
        assert_eq!(status.filters().len(), 1);

        let (route, params) = found(router.match_route(&Method::DELETE, "/api/admin/users/7"));
        assert_eq!(route.pattern(), "/api/admin/users/{id}");
        assert_eq!(params["id"], "7");
        let names: Vec<_> = route.filters().iter().map(Filter::name).collect();
        assert_eq!(
            names,
            ["authenticated", "has_role:admin", "has_permission:users:delete"]
        );
    }

    #[test]
    fn test_group_filter_applies_to_later_routes() {
        let mut router = Router::new();
        {
            let mut shop = router.group("/shop");
            shop.get("/catalog", noop);
            shop.filter(filters::authenticated())
                .filter(filters::has_role("buyer"));
            shop.post("/orders", noop);
            assert_eq!(shop.filters().len(), 2);

            let mut inner = shop.group("/returns");
            inner.get("", noop);
        }

        let (catalog, _) = found(router.match_route(&Method::GET, "/shop/catalog"));
        assert!(catalog.filters().is_empty());

        let (orders, _) = found(router.match_route(&Method::POST, "/shop/orders"));
        let names: Vec<_> = orders.filters().iter().map(Filter::name).collect();
        assert_eq!(names, ["authenticated", "has_role:buyer"]);

        let (returns, _) = found(router.match_route(&Method::GET, "/shop/returns"));
        assert_eq!(returns.filters().len(), 2);
    }

    proptest! {
        #[test]
        fn test_join_paths_never_doubles_slashes(
            prefix in "(/?[a-z]{1,6}){0,3}/?",
            path in "(/?[a-z{}]{1,6}){0,3}/?",
        ) {
            let joined = join_paths(&prefix, &path);
            prop_assert!(!joined.contains("//"));
            prop_assert!(joined.ends_with(path.trim_start_matches('/')));
        }
    }
}
