//! Type-safe(ish) path routing and filter composition (spec §4.4).
//!
//! A route is registered against a chain of [`Segment`] matchers built left-to-right and a
//! handler whose bound-variable list the matcher chain produces. Rust has no variadic generics,
//! so — per spec §9's "Type-safe route builder" guidance for a loosely-typed target — the bound
//! variables are carried as a heterogeneous [`Bound`] list rather than as distinct generic
//! handler arities; a handler reads its expected bindings back out of the slice it's given.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::HandlerError;
use crate::filter::FilterChain;
use crate::http::method::Method;
use crate::http::request::{split_on_slash, RequestHead};
use crate::http::response::Response;

/// One segment of a registered route's path pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// A literal path segment that must match exactly.
    Exact(String),
    /// Consumes one segment, binding it as a parsed integer.
    Int,
    /// Consumes one segment, binding it as a string.
    Str,
    /// Consumes every remaining segment, binding them as a list. Must be the last matcher in a
    /// chain — [`RouteBuilder::rest`] enforces this at registration time.
    Rest,
}

impl Segment {
    /// Specificity rank used for dispatch ordering (spec §4.4: `Exact > Int > String > Rest`).
    /// `Return` — the empty chain — has no `Segment` of its own; it ranks ahead of everything by
    /// virtue of [`Route::specificity`] giving empty chains an empty (lexicographically smallest)
    /// vector.
    fn rank(&self) -> u8 {
        match self {
            Segment::Exact(_) => 0,
            Segment::Int => 1,
            Segment::Str => 2,
            Segment::Rest => 3,
        }
    }
}

/// A value bound by a non-literal matcher, handed to the handler in matcher order.
#[derive(Debug, Clone, PartialEq)]
pub enum Bound {
    /// Bound by a [`Segment::Int`] matcher.
    Int(i64),
    /// Bound by a [`Segment::Str`] matcher.
    Str(String),
    /// Bound by a [`Segment::Rest`] matcher.
    Rest(Vec<String>),
}

/// A fully materialized request handed to a handler: the parsed head, the bound path variables
/// in matcher order, and the request body.
///
/// The body is read to completion by the connection state machine before a handler ever runs
/// (see `crate::client` docs) rather than streamed lazily into handler code — this crate has no
/// stackful-coroutine primitive to suspend a handler mid-body-read, so "the handler may read part
/// or none of it" (spec §4.3) is satisfied by making the whole body available synchronously and
/// letting the handler simply not look at it.
pub struct Request {
    /// The parsed request line and headers.
    pub head: RequestHead,
    /// Values bound by the matched route's non-literal segments, in chain order.
    pub bound: Vec<Bound>,
    /// The complete request body.
    pub body: Vec<u8>,
    /// The dense index (spec §3 `Address.index`) of the listen address this request arrived on.
    pub address_index: usize,
}

impl Request {
    /// The `i`th bound integer, or `None` if that position wasn't an [`Segment::Int`].
    pub fn int(&self, i: usize) -> Option<i64> {
        match self.bound.get(i) {
            Some(Bound::Int(v)) => Some(*v),
            _ => None,
        }
    }

    /// The `i`th bound string, or `None` if that position wasn't a [`Segment::Str`].
    pub fn str(&self, i: usize) -> Option<&str> {
        match self.bound.get(i) {
            Some(Bound::Str(v)) => Some(v),
            _ => None,
        }
    }

    /// The `i`th bound rest-segment list, or `None` if that position wasn't a [`Segment::Rest`].
    pub fn rest(&self, i: usize) -> Option<&[String]> {
        match self.bound.get(i) {
            Some(Bound::Rest(v)) => Some(v),
            _ => None,
        }
    }
}

/// A registered handler: takes the matched [`Request`] and produces a [`Response`], or fails
/// with the structured "fail-with-code" signal (spec §7).
pub type HandlerFn = Arc<dyn Fn(&Request) -> Result<Response, HandlerError> + Send + Sync>;

/// One registered route: a method, a matcher chain, and the handler it dispatches to.
struct Route {
    method: Method,
    segments: Vec<Segment>,
    handler: HandlerFn,
    registration_order: usize,
}

impl Route {
    /// `(specificity vector, registration order)` — sorted ascending, this is exactly spec
    /// §4.4's "most specific first, ties broken by registration order".
    fn specificity(&self) -> (Vec<u8>, usize) {
        (
            self.segments.iter().map(Segment::rank).collect(),
            self.registration_order,
        )
    }

    fn try_match(&self, path_segments: &[&str]) -> Option<Vec<Bound>> {
        let mut bound = Vec::new();
        let mut i = 0;
        for segment in &self.segments {
            match segment {
                Segment::Exact(expected) => {
                    if path_segments.get(i) != Some(&expected.as_str()) {
                        return None;
                    }
                    i += 1;
                }
                Segment::Int => {
                    let raw = path_segments.get(i)?;
                    bound.push(Bound::Int(raw.parse().ok()?));
                    i += 1;
                }
                Segment::Str => {
                    let raw = path_segments.get(i)?;
                    bound.push(Bound::Str((*raw).to_string()));
                    i += 1;
                }
                Segment::Rest => {
                    let remainder = path_segments[i..].iter().map(|s| s.to_string()).collect();
                    bound.push(Bound::Rest(remainder));
                    return Some(bound);
                }
            }
        }
        if i == path_segments.len() {
            Some(bound)
        } else {
            None
        }
    }
}

/// Builds a matcher chain one segment at a time, left to right.
#[derive(Default, Clone)]
pub struct RouteBuilder {
    segments: Vec<Segment>,
}

impl RouteBuilder {
    /// An empty chain — matches [`Segment`]-free paths when finished with nothing appended
    /// (spec §4.4's `Return`, the empty-path matcher).
    pub fn new() -> Self {
        RouteBuilder::default()
    }

    /// Appends a literal segment.
    pub fn exact(mut self, literal: impl Into<String>) -> Self {
        self.segments.push(Segment::Exact(literal.into()));
        self
    }

    /// Appends an integer-binding segment.
    pub fn int(mut self) -> Self {
        self.segments.push(Segment::Int);
        self
    }

    /// Appends a string-binding segment.
    pub fn string(mut self) -> Self {
        self.segments.push(Segment::Str);
        self
    }

    /// Appends a rest-binding segment. Must be the last call in the chain.
    pub fn rest(mut self) -> Self {
        self.segments.push(Segment::Rest);
        self
    }
}

/// Scopes a set of routes to a listen address and/or virtual host (spec §4.4 "Route registration
/// may be scoped by listen-address and by host").
#[derive(Debug, Clone, Default)]
pub struct Scope {
    /// Listen-address indices this scope applies to; `None` means every address.
    pub addresses: Option<Vec<usize>>,
    /// `Host` header values this scope applies to (case-insensitive); `None` means every host.
    pub hosts: Option<Vec<String>>,
}

impl Scope {
    /// Matches every address and host.
    pub fn any() -> Self {
        Scope::default()
    }

    fn matches(&self, address_index: usize, host: Option<&str>) -> bool {
        let address_ok = match &self.addresses {
            Some(addrs) => addrs.contains(&address_index),
            None => true,
        };
        let host_ok = match &self.hosts {
            Some(hosts) => match host {
                Some(h) => hosts.iter().any(|s| s.eq_ignore_ascii_case(h)),
                None => false,
            },
            None => true,
        };
        address_ok && host_ok
    }
}

struct ScopedRoute {
    scope: Scope,
    route: Route,
}

/// The router: a flat table of scoped routes plus the filter chain applied around every
/// dispatch.
pub struct Router {
    routes: Vec<ScopedRoute>,
    filters: FilterChain,
}

impl Router {
    /// A router with no routes and an empty, [`crate::filter::Composition::Embrace`] filter
    /// chain.
    pub fn new(filters: FilterChain) -> Self {
        Router {
            routes: Vec::new(),
            filters,
        }
    }

    /// Registers a handler for `method` under `scope`, matched by `builder`'s chain.
    pub fn register(
        &mut self,
        scope: Scope,
        method: Method,
        builder: RouteBuilder,
        handler: HandlerFn,
    ) -> &mut Self {
        let registration_order = self.routes.len();
        self.routes.push(ScopedRoute {
            scope,
            route: Route {
                method,
                segments: builder.segments,
                handler,
                registration_order,
            },
        });
        self
    }

    /// Finds the most specific matching route for `head`, scoped to `address_index` and the
    /// request's `Host` header, and invokes its handler — after running this router's filter
    /// chain's request phase and wrapping the result in its response phase.
    ///
    /// A request matching no route scope/path at all (spec §4.4 "Mismatch yields 404") or whose
    /// path matches but method doesn't (spec §6 method table) is reported the same way a handler
    /// failure would be, via [`HandlerError`].
    pub fn dispatch(&self, head: RequestHead, body: Vec<u8>, address_index: usize) -> Response {
        let (head, transforms) = self.filters.apply_request(head);
        let response = self.dispatch_inner(&head, body, address_index);
        let response = match response {
            Ok(r) => r,
            Err(e) => Response::new(e.status).bytes(e.message.into_bytes()),
        };
        self.filters.apply_response(response, transforms)
    }

    fn dispatch_inner(
        &self,
        head: &RequestHead,
        body: Vec<u8>,
        address_index: usize,
    ) -> Result<Response, HandlerError> {
        let path_segments = split_on_slash(&head.path);
        let host = head.host();

        let mut best: Option<&ScopedRoute> = None;
        let mut best_specificity: Option<(Vec<u8>, usize)> = None;
        let mut path_matched_any_method = false;

        for scoped in &self.routes {
            if !scoped.scope.matches(address_index, host) {
                continue;
            }
            let Some(_bound) = scoped.route.try_match(&path_segments) else {
                continue;
            };
            path_matched_any_method = true;
            if scoped.route.method != head.method {
                continue;
            }
            let specificity = scoped.route.specificity();
            let is_better = match &best_specificity {
                Some(b) => specificity < *b,
                None => true,
            };
            if is_better {
                best = Some(scoped);
                best_specificity = Some(specificity);
            }
        }

        let Some(scoped) = best else {
            let status = if path_matched_any_method {
                crate::http::Status::MethodNotAllowed
            } else {
                crate::http::Status::NotFound
            };
            return Err(HandlerError::new(status, status.reason_phrase()));
        };

        let bound = scoped
            .route
            .try_match(&path_segments)
            .expect("route matched above");
        let request = Request {
            head: head.clone(),
            bound,
            body,
            address_index,
        };
        (scoped.route.handler)(&request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::request::{parse_head, Progress};
    use crate::http::Status;

    fn head(raw: &[u8]) -> RequestHead {
        let Progress::Complete(head, _) = parse_head(raw).unwrap() else {
            panic!("expected complete parse");
        };
        head
    }

    fn ok_handler(body: &'static str) -> HandlerFn {
        Arc::new(move |_req| Ok(Response::text(body)))
    }

    #[test]
    fn dispatches_to_exact_then_binds_int_and_string() {
        let mut router = Router::new(FilterChain::new(crate::filter::Composition::Embrace));
        router.register(
            Scope::any(),
            Method::Get,
            RouteBuilder::new().exact("users").int(),
            Arc::new(|req| Ok(Response::text(format!("user {}", req.int(0).unwrap())))),
        );

        let response = router.dispatch(head(b"GET /users/42 HTTP/1.1\r\n\r\n"), Vec::new(), 0);
        assert_eq!(Status::r#Ok.code(), response.status().code());
    }

    #[test]
    fn exact_beats_int_at_the_same_position() {
        let mut router = Router::new(FilterChain::new(crate::filter::Composition::Embrace));
        router.register(
            Scope::any(),
            Method::Get,
            RouteBuilder::new().exact("users").int(),
            ok_handler("int"),
        );
        router.register(
            Scope::any(),
            Method::Get,
            RouteBuilder::new().exact("users").exact("42"),
            ok_handler("exact"),
        );

        let response = router.dispatch(head(b"GET /users/42 HTTP/1.1\r\n\r\n"), Vec::new(), 0);
        assert_eq!(Status::r#Ok.code(), response.status().code());
    }

    #[test]
    fn mismatched_path_yields_404() {
        let mut router = Router::new(FilterChain::new(crate::filter::Composition::Embrace));
        router.register(
            Scope::any(),
            Method::Get,
            RouteBuilder::new().exact("a"),
            ok_handler("a"),
        );

        let response = router.dispatch(head(b"GET /b HTTP/1.1\r\n\r\n"), Vec::new(), 0);
        assert_eq!(Status::NotFound.code(), response.status().code());
    }

    #[test]
    fn matching_path_wrong_method_yields_405() {
        let mut router = Router::new(FilterChain::new(crate::filter::Composition::Embrace));
        router.register(
            Scope::any(),
            Method::Get,
            RouteBuilder::new().exact("a"),
            ok_handler("a"),
        );

        let response = router.dispatch(head(b"POST /a HTTP/1.1\r\n\r\n"), Vec::new(), 0);
        assert_eq!(Status::MethodNotAllowed.code(), response.status().code());
    }

    #[test]
    fn host_scope_excludes_non_matching_virtual_hosts() {
        let mut router = Router::new(FilterChain::new(crate::filter::Composition::Embrace));
        router.register(
            Scope {
                addresses: None,
                hosts: Some(vec!["api.example.org".to_string()]),
            },
            Method::Get,
            RouteBuilder::new().exact("ping"),
            ok_handler("pong"),
        );

        let response = router.dispatch(
            head(b"GET /ping HTTP/1.1\r\nHost: other.example.org\r\n\r\n"),
            Vec::new(),
            0,
        );
        assert_eq!(Status::NotFound.code(), response.status().code());

        let response = router.dispatch(
            head(b"GET /ping HTTP/1.1\r\nHost: api.example.org\r\n\r\n"),
            Vec::new(),
            0,
        );
        assert_eq!(Status::r#Ok.code(), response.status().code());
    }

    #[test]
    fn rest_matcher_binds_remaining_segments() {
        let mut router = Router::new(FilterChain::new(crate::filter::Composition::Embrace));
        router.register(
            Scope::any(),
            Method::Get,
            RouteBuilder::new().exact("files").rest(),
            Arc::new(|req| Ok(Response::text(req.rest(0).unwrap().join("/")))),
        );

        let response = router.dispatch(
            head(b"GET /files/a/b/c HTTP/1.1\r\n\r\n"),
            Vec::new(),
            0,
        );
        assert_eq!(Status::r#Ok.code(), response.status().code());
    }

    #[test]
    fn empty_chain_matches_only_the_root_path() {
        let mut router = Router::new(FilterChain::new(crate::filter::Composition::Embrace));
        router.register(Scope::any(), Method::Get, RouteBuilder::new(), ok_handler("root"));

        let response = router.dispatch(head(b"GET / HTTP/1.1\r\n\r\n"), Vec::new(), 0);
        assert_eq!(Status::r#Ok.code(), response.status().code());

        let response = router.dispatch(head(b"GET /x HTTP/1.1\r\n\r\n"), Vec::new(), 0);
        assert_eq!(Status::NotFound.code(), response.status().code());
    }
}
