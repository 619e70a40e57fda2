//! Session side of the chat: keeps the visible conversation, streams replies
//! from `/api/chat` and reacts to navigation requests embedded in them.

pub mod decode;
pub mod display;

use crate::config::routes::RouteTable;
use crate::models::chat::{ ChatRequestBody, Conversation, ErrorBody, Turn };
use crate::models::stream::{ StreamFrame, NDJSON };
use crate::redirect::find_redirect_from;

use decode::Utf8Decoder;
use futures_util::{ pin_mut, Stream, StreamExt };
use log::{ debug, error, info, warn };
use reqwest::header::ACCEPT;
use std::fmt::Display;
use std::ops::Range;

/// Where a session shows its state. Implemented by whatever front-end owns
/// the widget.
pub trait ChatView {
    /// Current display text of the assistant turn being streamed.
    fn render(&mut self, text: &str);
    fn navigate(&mut self, path: &str);
    fn show_error(&mut self, message: &str);
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("message is empty")] EmptyInput,
    #[error("could not reach the assistant: {0}")] Transport(String),
    #[error("assistant returned {status}: {message}")] Status {
        status: u16,
        message: String,
    },
    #[error("reply was cut off: {0}")] Stream(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnOutcome {
    /// Display text stored as the assistant turn.
    pub text: String,
    pub navigated_to: Option<String>,
}

/// One open chat widget. `send` takes `&mut self`, so a session never has
/// two requests in flight; dropping the `send` future cancels the read and
/// keeps whatever partial text was already stored.
pub struct ChatSession {
    http: reqwest::Client,
    endpoint: String,
    conversation: Conversation,
    routes: RouteTable,
    structured: bool,
    pathname: String,
    last_error: Option<String>,
}

impl ChatSession {
    pub fn new(endpoint: impl Into<String>, routes: RouteTable) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
            conversation: Conversation::new(),
            routes,
            structured: false,
            pathname: "/".to_string(),
            last_error: None,
        }
    }

    /// Ask for NDJSON frames instead of plain text.
    pub fn structured(mut self, structured: bool) -> Self {
        self.structured = structured;
        self
    }

    pub fn starting_at(mut self, pathname: impl Into<String>) -> Self {
        self.pathname = pathname.into();
        self
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn pathname(&self) -> &str {
        &self.pathname
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub async fn send(&mut self, input: &str, view: &mut dyn ChatView) -> Result<TurnOutcome, SessionError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(SessionError::EmptyInput);
        }

        self.last_error = None;
        self.conversation.push(Turn::user(input));

        // Turns left empty by a cancelled read are not sent back.
        let body = ChatRequestBody {
            messages: self.conversation
                .turns()
                .iter()
                .filter(|t| !t.content.trim().is_empty())
                .cloned()
                .collect(),
            pathname: Some(self.pathname.clone()),
        };

        let mut request = self.http.post(&self.endpoint).json(&body);
        if self.structured {
            request = request.header(ACCEPT, NDJSON);
        }
        debug!("Sending {} turns to {}", body.messages.len(), self.endpoint);

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                return Err(self.fail(view, SessionError::Transport(e.to_string())));
            }
        };

        let status = response.status();
        if !status.is_success() {
            let raw = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorBody>(&raw)
                .map(|b| b.error)
                .unwrap_or_else(|_| if raw.is_empty() { status.to_string() } else { raw });
            return Err(self.fail(view, SessionError::Status { status: status.as_u16(), message }));
        }

        let index = self.conversation.push(Turn::assistant(""));
        let stream = response.bytes_stream();
        if self.structured {
            self.consume_frames(index, stream, view).await
        } else {
            self.consume_stream(index, stream, view).await
        }
    }

    /// Reads a plain-text reply into the assistant turn at `index`.
    ///
    /// The redirect tag is matched against the whole accumulated buffer, so a
    /// tag split over several chunks is still found. Reading stops at the
    /// first tag whose path resolves; tags that do not resolve are hidden and
    /// reading continues past them.
    pub async fn consume_stream<S, B, E>(
        &mut self,
        index: usize,
        stream: S,
        view: &mut dyn ChatView
    ) -> Result<TurnOutcome, SessionError>
        where S: Stream<Item = Result<B, E>>, B: AsRef<[u8]>, E: Display
    {
        pin_mut!(stream);
        let mut decoder = Utf8Decoder::new();
        let mut buffer = String::new();
        let mut hidden: Vec<Range<usize>> = Vec::new();
        let mut scan_from = 0;

        while let Some(chunk) = stream.next().await {
            let bytes = match chunk {
                Ok(bytes) => bytes,
                Err(e) => {
                    let text = display::sanitize(&without(&buffer, &hidden));
                    self.store(index, text, view);
                    return Err(self.fail(view, SessionError::Stream(e.to_string())));
                }
            };
            buffer.push_str(&decoder.push(bytes.as_ref()));

            while let Some(found) = find_redirect_from(&buffer, scan_from) {
                match self.routes.resolve(&found.path) {
                    Some(path) => {
                        let path = path.to_string();
                        let text = display::sanitize(&without(&buffer[..found.start], &hidden));
                        return Ok(self.finish_with_navigation(index, text, path, view));
                    }
                    None => {
                        warn!("Ignoring redirect to unknown page '{}'", found.path);
                        hidden.push(found.start..found.end);
                        scan_from = found.end;
                    }
                }
            }

            let text = display::sanitize_partial(&without(&buffer, &hidden));
            self.store(index, text, view);
        }

        buffer.push_str(&decoder.finish());
        let text = display::sanitize(&without(&buffer, &hidden));
        self.store(index, text.clone(), view);
        Ok(TurnOutcome { text, navigated_to: None })
    }

    /// Reads an NDJSON frame reply. Same observable behaviour as
    /// [`ChatSession::consume_stream`].
    pub async fn consume_frames<S, B, E>(
        &mut self,
        index: usize,
        stream: S,
        view: &mut dyn ChatView
    ) -> Result<TurnOutcome, SessionError>
        where S: Stream<Item = Result<B, E>>, B: AsRef<[u8]>, E: Display
    {
        pin_mut!(stream);
        let mut decoder = Utf8Decoder::new();
        let mut lines = String::new();
        let mut raw = String::new();
        let mut ended = false;

        while !ended {
            match stream.next().await {
                Some(Ok(bytes)) => lines.push_str(&decoder.push(bytes.as_ref())),
                Some(Err(e)) => {
                    let text = display::sanitize(&raw);
                    self.store(index, text, view);
                    return Err(self.fail(view, SessionError::Stream(e.to_string())));
                }
                None => {
                    lines.push_str(&decoder.finish());
                    lines.push('\n');
                    ended = true;
                }
            }

            while let Some(newline) = lines.find('\n') {
                let line: String = lines.drain(..=newline).collect();
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<StreamFrame>(line) {
                    Ok(StreamFrame::Text { delta }) => raw.push_str(&delta),
                    Ok(StreamFrame::Navigate { path }) => {
                        match self.routes.resolve(&path) {
                            Some(resolved) => {
                                let resolved = resolved.to_string();
                                let text = display::sanitize(&raw);
                                return Ok(self.finish_with_navigation(index, text, resolved, view));
                            }
                            None => warn!("Ignoring navigate frame to unknown page '{}'", path),
                        }
                    }
                    Ok(StreamFrame::Error { message }) => {
                        let text = display::sanitize(&raw);
                        self.store(index, text, view);
                        return Err(self.fail(view, SessionError::Stream(message)));
                    }
                    Err(e) => warn!("Skipping malformed frame: {}", e),
                }
            }

            if !ended {
                let text = display::sanitize_partial(&raw);
                self.store(index, text, view);
            }
        }

        let text = display::sanitize(&raw);
        self.store(index, text.clone(), view);
        Ok(TurnOutcome { text, navigated_to: None })
    }

    fn store(&mut self, index: usize, text: String, view: &mut dyn ChatView) {
        let changed = self.conversation.turns().get(index).map(|t| t.content != text).unwrap_or(false);
        if changed {
            view.render(&text);
            self.conversation.set_content(index, text);
        }
    }

    fn finish_with_navigation(
        &mut self,
        index: usize,
        text: String,
        path: String,
        view: &mut dyn ChatView
    ) -> TurnOutcome {
        self.store(index, text.clone(), view);
        info!("Navigating to {}", path);
        self.pathname = path.clone();
        view.navigate(&path);
        TurnOutcome { text, navigated_to: Some(path) }
    }

    fn fail(&mut self, view: &mut dyn ChatView, err: SessionError) -> SessionError {
        let message = err.to_string();
        error!("Chat turn failed: {}", message);
        view.show_error(&message);
        self.last_error = Some(message);
        err
    }
}

/// `text` with the byte ranges in `hidden` cut out.
fn without(text: &str, hidden: &[Range<usize>]) -> String {
    let mut out = String::with_capacity(text.len());
    let mut at = 0;
    for range in hidden {
        if range.start >= text.len() {
            break;
        }
        out.push_str(&text[at..range.start]);
        at = range.end.min(text.len());
    }
    out.push_str(&text[at..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use std::task::Poll;

    #[derive(Default)]
    struct RecordingView {
        renders: Vec<String>,
        navigations: Vec<String>,
        errors: Vec<String>,
    }

    impl ChatView for RecordingView {
        fn render(&mut self, text: &str) {
            self.renders.push(text.to_string());
        }
        fn navigate(&mut self, path: &str) {
            self.navigations.push(path.to_string());
        }
        fn show_error(&mut self, message: &str) {
            self.errors.push(message.to_string());
        }
    }

    fn session() -> (ChatSession, usize) {
        let mut session = ChatSession::new("http://127.0.0.1:9/api/chat", RouteTable::default());
        session.conversation.push(Turn::user("where do I report my keys?"));
        let index = session.conversation.push(Turn::assistant(""));
        (session, index)
    }

    fn chunks(parts: &[&str]) -> Vec<Result<Vec<u8>, String>> {
        parts.iter().map(|p| Ok(p.as_bytes().to_vec())).collect()
    }

    #[tokio::test]
    async fn split_tag_navigates_and_stops_reading() {
        let (mut session, index) = session();
        let mut view = RecordingView::default();
        let poisoned = stream::poll_fn(|_| -> Poll<Option<Result<Vec<u8>, String>>> {
            panic!("stream polled after the redirect was found")
        });
        let input = stream::iter(chunks(&["Taking you there. __REDIR", "ECT:/items__ more"])).chain(poisoned);

        let outcome = session.consume_stream(index, input, &mut view).await.unwrap();

        assert_eq!(outcome.navigated_to.as_deref(), Some("/items"));
        assert_eq!(outcome.text, "Taking you there.");
        assert_eq!(view.navigations, vec!["/items"]);
        assert_eq!(session.pathname(), "/items");
        assert_eq!(session.conversation().turns()[index].content, "Taking you there.");
        assert!(view.renders.iter().all(|r| !r.contains("__")));
    }

    #[tokio::test]
    async fn text_without_tag_renders_verbatim() {
        let (mut session, index) = session();
        let mut view = RecordingView::default();
        let input = stream::iter(chunks(&["You can report ", "lost keys on the ", "report page."]));

        let outcome = session.consume_stream(index, input, &mut view).await.unwrap();

        assert_eq!(outcome.navigated_to, None);
        assert_eq!(outcome.text, "You can report lost keys on the report page.");
        assert!(view.navigations.is_empty());
        assert_eq!(view.renders.last().unwrap(), "You can report lost keys on the report page.");
    }

    #[tokio::test]
    async fn unknown_redirect_is_hidden_and_reading_continues() {
        let (mut session, index) = session();
        let mut view = RecordingView::default();
        let input = stream::iter(chunks(&["One sec __REDIRECT:/admin__", " ok. __REDIRECT:/report-lost__"]));

        let outcome = session.consume_stream(index, input, &mut view).await.unwrap();

        assert_eq!(outcome.navigated_to.as_deref(), Some("/report/lost"));
        assert_eq!(outcome.text, "One sec  ok.");
    }

    #[tokio::test]
    async fn stream_error_keeps_partial_text() {
        let (mut session, index) = session();
        let mut view = RecordingView::default();
        let input = stream::iter(vec![Ok(b"Searching for keys...".to_vec()), Err("connection reset".to_string())]);

        let err = session.consume_stream(index, input, &mut view).await.unwrap_err();

        assert!(matches!(err, SessionError::Stream(_)));
        assert_eq!(session.conversation().turns()[index].content, "Searching for keys...");
        assert_eq!(view.errors.len(), 1);
        assert!(session.last_error().unwrap().contains("connection reset"));
    }

    #[tokio::test]
    async fn frames_drive_the_same_behaviour() {
        let (mut session, index) = session();
        let mut view = RecordingView::default();
        let body = [
            StreamFrame::Text { delta: "Sure, ".into() }.to_line(),
            StreamFrame::Text { delta: "opening the form.".into() }.to_line(),
            StreamFrame::Navigate { path: "/report/lost".into() }.to_line(),
        ].concat();
        let (a, b) = body.split_at(17);
        let input = stream::iter(chunks(&[a, b]));

        let outcome = session.consume_frames(index, input, &mut view).await.unwrap();

        assert_eq!(outcome.text, "Sure, opening the form.");
        assert_eq!(outcome.navigated_to.as_deref(), Some("/report/lost"));
        assert_eq!(view.navigations, vec!["/report/lost"]);
    }

    #[tokio::test]
    async fn error_frame_surfaces_as_stream_error() {
        let (mut session, index) = session();
        let mut view = RecordingView::default();
        let body = [
            StreamFrame::Text { delta: "Let me check".into() }.to_line(),
            StreamFrame::Error { message: "turn exceeded its time budget".into() }.to_line(),
        ].concat();

        let err = session
            .consume_frames(index, stream::iter(chunks(&[body.as_str()])), &mut view).await
            .unwrap_err();

        assert!(matches!(err, SessionError::Stream(ref m) if m.contains("time budget")));
        assert_eq!(session.conversation().turns()[index].content, "Let me check");
    }

    #[tokio::test]
    async fn empty_input_is_rejected_without_touching_history() {
        let mut session = ChatSession::new("http://127.0.0.1:9/api/chat", RouteTable::default());
        let mut view = RecordingView::default();
        assert!(matches!(session.send("   ", &mut view).await, Err(SessionError::EmptyInput)));
        assert!(session.conversation().is_empty());
    }

    #[test]
    fn without_cuts_ranges() {
        assert_eq!(without("abcdef", &[1..2, 4..5]), "acdf");
        assert_eq!(without("abc", &[]), "abc");
        assert_eq!(without("abc", &[5..7]), "abc");
    }
}
