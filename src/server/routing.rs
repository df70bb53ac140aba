//! Route table: method + path pattern to a registered endpoint.
//!
//! Patterns are made of literal segments and `{name}` parameters:
//! `/users/{id}/posts`. Matching is segment-wise; when several patterns
//! match a path the one with more literal segments wins, then the one
//! registered first.

use std::collections::HashMap;

use http::Method;
use percent_encoding::percent_decode_str;

use crate::config::ConfigError;
use crate::middleware::{BoxService, StageQueue};

#[derive(Clone, Debug, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
}

/// A registered route.
pub struct Route {
    /// `None` matches any method.
    method: Option<Method>,
    pattern: String,
    segments: Vec<Segment>,
    /// Stages of the group the route was registered in.
    queue: StageQueue,
    service: BoxService,
}

impl Route {
    pub fn method(&self) -> Option<&Method> {
        self.method.as_ref()
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn queue(&self) -> &StageQueue {
        &self.queue
    }

    pub fn service(&self) -> &BoxService {
        &self.service
    }

    fn literal_count(&self) -> usize {
        self.segments
            .iter()
            .filter(|s| matches!(s, Segment::Literal(_)))
            .count()
    }

    /// Param-insensitive shape used for duplicate detection.
    fn shape(&self) -> Vec<Option<&str>> {
        self.segments
            .iter()
            .map(|s| match s {
                Segment::Literal(lit) => Some(lit.as_str()),
                Segment::Param(_) => None,
            })
            .collect()
    }

    fn match_path(&self, parts: &[&str]) -> Option<HashMap<String, String>> {
        if parts.len() != self.segments.len() {
            return None;
        }
        let mut params = HashMap::new();
        for (segment, part) in self.segments.iter().zip(parts) {
            match segment {
                Segment::Literal(lit) if lit == part => {}
                Segment::Literal(_) => return None,
                Segment::Param(name) => {
                    let value = percent_decode_str(part).decode_utf8_lossy().into_owned();
                    params.insert(name.clone(), value);
                }
            }
        }
        Some(params)
    }
}

/// Result of resolving a request against the table.
pub enum RouteMatch<'a> {
    Found {
        route: &'a Route,
        params: HashMap<String, String>,
    },
    /// The path exists but not for this method. Holds the allowed methods.
    MethodNotAllowed(Vec<Method>),
    NotFound,
}

/// All routes of an application.
#[derive(Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    /// Register a route. Fails on malformed patterns and on a second
    /// registration of the same method and path shape.
    pub fn insert(
        &mut self,
        method: Option<Method>,
        pattern: &str,
        queue: StageQueue,
        service: BoxService,
    ) -> Result<(), ConfigError> {
        let segments = parse_pattern(pattern)?;
        let route = Route {
            method,
            pattern: normalize(pattern).to_string(),
            segments,
            queue,
            service,
        };

        let duplicate = self
            .routes
            .iter()
            .any(|r| r.method == route.method && r.shape() == route.shape());
        if duplicate {
            return Err(ConfigError::DuplicateRoute {
                method: route
                    .method
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| "ANY".to_string()),
                path: route.pattern,
            });
        }

        self.routes.push(route);
        Ok(())
    }

    /// Find the route for `method` and `path`.
    pub fn resolve(&self, method: &Method, path: &str) -> RouteMatch<'_> {
        let parts = split(normalize(path));

        let mut best: Option<(&Route, HashMap<String, String>)> = None;
        let mut allowed: Vec<Method> = Vec::new();
        let mut path_known = false;

        for route in &self.routes {
            let Some(params) = route.match_path(&parts) else {
                continue;
            };
            path_known = true;

            let method_ok = match &route.method {
                None => true,
                Some(m) => m == method,
            };
            if !method_ok {
                if let Some(m) = &route.method {
                    if !allowed.contains(m) {
                        allowed.push(m.clone());
                    }
                }
                continue;
            }

            let better = match &best {
                None => true,
                Some((current, _)) => route.literal_count() > current.literal_count(),
            };
            if better {
                best = Some((route, params));
            }
        }

        match best {
            Some((route, params)) => RouteMatch::Found { route, params },
            None if path_known => RouteMatch::MethodNotAllowed(allowed),
            None => RouteMatch::NotFound,
        }
    }
}

/// Join a group prefix and a route path.
pub fn join_path(prefix: &str, path: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    if path.is_empty() {
        if prefix.is_empty() {
            "/".to_string()
        } else {
            prefix.to_string()
        }
    } else {
        format!("{}/{}", prefix, path)
    }
}

fn normalize(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/"
    } else {
        trimmed
    }
}

fn split(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

fn parse_pattern(pattern: &str) -> Result<Vec<Segment>, ConfigError> {
    let invalid = |message: &str| ConfigError::InvalidRoute {
        path: pattern.to_string(),
        message: message.to_string(),
    };

    if !pattern.starts_with('/') {
        return Err(invalid("path must start with '/'"));
    }

    let mut names: Vec<&str> = Vec::new();
    let mut segments = Vec::new();
    for part in split(normalize(pattern)) {
        if let Some(inner) = part.strip_prefix('{') {
            let name = inner
                .strip_suffix('}')
                .ok_or_else(|| invalid("unterminated parameter"))?;
            if name.is_empty() || name.contains(['{', '}']) {
                return Err(invalid("empty or malformed parameter name"));
            }
            if names.contains(&name) {
                return Err(invalid("parameter name used twice"));
            }
            names.push(name);
            segments.push(Segment::Param(name.to_string()));
        } else if part.contains(['{', '}']) {
            return Err(invalid("parameters must span a whole segment"));
        } else {
            segments.push(Segment::Literal(part.to_string()));
        }
    }
    Ok(segments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::service_fn;
    use std::sync::Arc;

    fn noop() -> BoxService {
        Arc::new(service_fn(|_ctx| async {}))
    }

    fn table(routes: &[(Option<Method>, &str)]) -> RouteTable {
        let mut table = RouteTable::new();
        for (method, path) in routes {
            table
                .insert(method.clone(), path, StageQueue::new(), noop())
                .unwrap();
        }
        table
    }

    #[test]
    fn test_literal_and_param_match() {
        let table = table(&[
            (Some(Method::GET), "/users"),
            (Some(Method::GET), "/users/{id}"),
        ]);

        match table.resolve(&Method::GET, "/users/42") {
            RouteMatch::Found { route, params } => {
                assert_eq!(route.pattern(), "/users/{id}");
                assert_eq!(params.get("id").map(String::as_str), Some("42"));
            }
            _ => panic!("expected match"),
        }

        assert!(matches!(
            table.resolve(&Method::GET, "/users/"),
            RouteMatch::Found { .. }
        ));
    }

    #[test]
    fn test_literal_beats_param() {
        let table = table(&[
            (Some(Method::GET), "/users/{id}"),
            (Some(Method::GET), "/users/me"),
        ]);

        match table.resolve(&Method::GET, "/users/me") {
            RouteMatch::Found { route, params } => {
                assert_eq!(route.pattern(), "/users/me");
                assert!(params.is_empty());
            }
            _ => panic!("expected match"),
        }
    }

    #[test]
    fn test_param_is_percent_decoded() {
        let table = table(&[(Some(Method::GET), "/files/{name}")]);
        match table.resolve(&Method::GET, "/files/a%20b") {
            RouteMatch::Found { params, .. } => assert_eq!(params["name"], "a b"),
            _ => panic!("expected match"),
        }
    }

    #[test]
    fn test_method_not_allowed_lists_methods() {
        let table = table(&[
            (Some(Method::GET), "/items"),
            (Some(Method::POST), "/items"),
        ]);

        match table.resolve(&Method::DELETE, "/items") {
            RouteMatch::MethodNotAllowed(allowed) => {
                assert_eq!(allowed, vec![Method::GET, Method::POST]);
            }
            _ => panic!("expected 405"),
        }
        assert!(matches!(
            table.resolve(&Method::GET, "/missing"),
            RouteMatch::NotFound
        ));
    }

    #[test]
    fn test_any_method_route() {
        let table = table(&[(None, "/echo")]);
        assert!(matches!(
            table.resolve(&Method::PATCH, "/echo"),
            RouteMatch::Found { .. }
        ));
    }

    #[test]
    fn test_duplicate_route_rejected() {
        let mut table = table(&[(Some(Method::GET), "/users/{id}")]);
        let err = table
            .insert(Some(Method::GET), "/users/{uid}/", StageQueue::new(), noop())
            .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateRoute { .. }));

        // Same path, other method is fine
        table
            .insert(Some(Method::PUT), "/users/{id}", StageQueue::new(), noop())
            .unwrap();
    }

    #[test]
    fn test_invalid_patterns() {
        let mut table = RouteTable::new();
        for bad in ["users", "/users/{", "/users/{}", "/a{b}", "/{id}/{id}"] {
            let err = table
                .insert(Some(Method::GET), bad, StageQueue::new(), noop())
                .unwrap_err();
            assert!(matches!(err, ConfigError::InvalidRoute { .. }), "{}", bad);
        }
    }

    #[test]
    fn test_join_path() {
        assert_eq!(join_path("/api", "/users"), "/api/users");
        assert_eq!(join_path("/api/", "users"), "/api/users");
        assert_eq!(join_path("/api", "/"), "/api");
        assert_eq!(join_path("", "/"), "/");
    }
}
