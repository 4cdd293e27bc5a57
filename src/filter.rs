//! Request/response filters and their two composition modes (spec §4.4).
//!
//! A filter may transform or reject the request before the handler runs, and transform the
//! response afterward. Filters are modeled as two explicit callback fields — a request transform
//! returning the (possibly modified) request plus a response transform — rather than closures
//! capturing implicit shared state (spec §9 "Post hooks and filters").

use std::sync::Arc;

use crate::http::request::RequestHead;
use crate::http::response::Response;

/// The response-side half of a filter invocation, run once the handler (and every other filter's
/// request phase) has produced a response.
pub type ResponseTransform = Box<dyn FnOnce(Response) -> Response + Send>;

/// A filter: given the request so far, returns the request to hand to the next filter (or the
/// handler) and the transform to apply to the eventual response.
pub type FilterFn = Arc<dyn Fn(RequestHead) -> (RequestHead, ResponseTransform) + Send + Sync>;

/// How a chain's response transforms are ordered relative to its request-phase (registration)
/// order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Composition {
    /// Response transforms run in the same order filters were registered.
    Embrace,
    /// Response transforms run in reverse registration order — used when a later filter (e.g.
    /// compression) must see the response before an earlier one (e.g. statistics) records its
    /// final size.
    Cross,
}

/// An ordered sequence of filters sharing one [`Composition`] mode. The request phase always
/// runs in registration order; only the response phase's order depends on the mode.
#[derive(Clone)]
pub struct FilterChain {
    filters: Vec<FilterFn>,
    composition: Composition,
}

impl FilterChain {
    /// An empty chain with the given composition mode.
    pub fn new(composition: Composition) -> Self {
        FilterChain {
            filters: Vec::new(),
            composition,
        }
    }

    /// Appends a filter, to run after every filter already in the chain.
    pub fn push(&mut self, filter: FilterFn) -> &mut Self {
        self.filters.push(filter);
        self
    }

    /// `true` if no filters are registered — callers can skip the whole apply/unapply dance.
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Runs every filter's request phase in registration order, collecting each one's response
    /// transform for [`FilterChain::apply_response`].
    pub fn apply_request(&self, mut head: RequestHead) -> (RequestHead, Vec<ResponseTransform>) {
        let mut transforms = Vec::with_capacity(self.filters.len());
        for filter in &self.filters {
            let (next_head, transform) = (filter)(head);
            head = next_head;
            transforms.push(transform);
        }
        (head, transforms)
    }

    /// Runs the collected response transforms in the order this chain's [`Composition`] calls
    /// for.
    pub fn apply_response(&self, mut response: Response, mut transforms: Vec<ResponseTransform>) -> Response {
        if self.composition == Composition::Cross {
            transforms.reverse();
        }
        for transform in transforms {
            response = transform(response);
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Status;

    fn tagging_filter(tag: &'static str) -> FilterFn {
        Arc::new(move |head: RequestHead| {
            let response_tag = tag;
            let transform: ResponseTransform = Box::new(move |response| {
                response.header("X-Filter", response_tag)
            });
            (head, transform)
        })
    }

    fn sample_head() -> RequestHead {
        use crate::http::request::{parse_head, Progress};
        let Progress::Complete(head, _) = parse_head(b"GET / HTTP/1.1\r\n\r\n").unwrap() else {
            panic!("expected complete parse");
        };
        head
    }

    #[test]
    fn embrace_runs_response_transforms_in_registration_order() {
        let mut chain = FilterChain::new(Composition::Embrace);
        chain.push(tagging_filter("g")).push(tagging_filter("f"));

        let (head, transforms) = chain.apply_request(sample_head());
        let response = chain.apply_response(Response::new(Status::r#Ok), transforms);
        let headers: Vec<_> = response_header_values(&response, "X-Filter");
        assert_eq!(vec!["g", "f"], headers);
        let _ = head;
    }

    #[test]
    fn cross_runs_response_transforms_in_reverse_order() {
        let mut chain = FilterChain::new(Composition::Cross);
        chain.push(tagging_filter("g")).push(tagging_filter("f"));

        let (_, transforms) = chain.apply_request(sample_head());
        let response = chain.apply_response(Response::new(Status::r#Ok), transforms);
        let headers: Vec<_> = response_header_values(&response, "X-Filter");
        assert_eq!(vec!["f", "g"], headers);
    }

    fn response_header_values(response: &Response, name: &str) -> Vec<String> {
        response
            .headers_for_test()
            .iter()
            .filter(|h| h.name_eq_ignore_ascii_case(name))
            .map(|h| h.value().to_string())
            .collect()
    }
}
