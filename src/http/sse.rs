//! Server-Sent Events: formatting `event:`/`id:`/`retry:`/`data:` lines for a
//! `text/event-stream` response.

/// The `Content-Type` value a handler returning SSE events must set (and which
/// [`crate::http::response::Response::sse`] sets automatically).
pub const CONTENT_TYPE: &str = "text/event-stream";

/// One event in a server-sent-events stream. Built with [`SseEvent::new`]/[`SseEvent::data`] and
/// the optional-field setters, then serialized with [`SseEvent::to_bytes`] before being written
/// to a chunked response body.
#[derive(Debug, Clone, Default)]
pub struct SseEvent {
    event: Option<String>,
    id: Option<String>,
    retry: Option<u64>,
    data: String,
}

impl SseEvent {
    /// An event carrying `data`. Embedded newlines are each emitted as their own `data:` line,
    /// per the spec's multi-line data framing.
    pub fn data(data: impl Into<String>) -> Self {
        SseEvent {
            data: data.into(),
            ..Default::default()
        }
    }

    /// Sets the `event:` field (the event type browsers dispatch on).
    pub fn event(mut self, name: impl Into<String>) -> Self {
        self.event = Some(name.into());
        self
    }

    /// Sets the `id:` field (the last-event-id the client will report on reconnect).
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Sets the `retry:` field, in milliseconds.
    pub fn retry(mut self, millis: u64) -> Self {
        self.retry = Some(millis);
        self
    }

    /// Renders the event as its wire form, including the terminating blank line.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = String::new();
        if let Some(event) = &self.event {
            out.push_str("event: ");
            out.push_str(event);
            out.push('\n');
        }
        if let Some(id) = &self.id {
            out.push_str("id: ");
            out.push_str(id);
            out.push('\n');
        }
        if let Some(retry) = self.retry {
            out.push_str(&format!("retry: {}\n", retry));
        }
        for line in self.data.split('\n') {
            out.push_str("data: ");
            out.push_str(line);
            out.push('\n');
        }
        out.push('\n');
        out.into_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_a_minimal_data_only_event() {
        let event = SseEvent::data("hello");
        assert_eq!(b"data: hello\n\n".to_vec(), event.to_bytes());
    }

    #[test]
    fn renders_every_field_in_order() {
        let event = SseEvent::data("hi").event("greeting").id("1").retry(3000);
        assert_eq!(
            b"event: greeting\nid: 1\nretry: 3000\ndata: hi\n\n".to_vec(),
            event.to_bytes()
        );
    }

    #[test]
    fn splits_multiline_data_across_several_data_lines() {
        let event = SseEvent::data("line one\nline two");
        assert_eq!(
            b"data: line one\ndata: line two\n\n".to_vec(),
            event.to_bytes()
        );
    }
}
