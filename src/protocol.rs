//! Automation-protocol contract.
//!
//! The engine talks to the browser through an external tool-call protocol:
//! a tool name plus a JSON argument map in, opaque text content out.
//! Protocol errors surface two ways, thrown transport errors and textual
//! failure markers inside nominally successful content, and both are
//! normalized to [`EngineError::Protocol`] here.

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use webpilot_core_types::{CommandInvocation, PageElement, PageSnapshot};

use crate::errors::{EngineError, EngineResult};

/// Markers that flag a failure reported inside response content.
const FAILURE_MARKERS: &[&str] = &["Error:", "Failed:", "error:", "failed:"];

/// Opaque response content from a tool call.
#[derive(Clone, Debug, Default)]
pub struct ProtocolResponse {
    pub content: String,
}

impl ProtocolResponse {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }

    /// First failure marker found in the content, if any.
    pub fn failure_marker(&self) -> Option<&'static str> {
        FAILURE_MARKERS
            .iter()
            .copied()
            .find(|marker| self.content.contains(marker))
    }
}

/// Normalize a marker-bearing response into a protocol error.
pub fn check_response(response: ProtocolResponse) -> EngineResult<ProtocolResponse> {
    match response.failure_marker() {
        Some(marker) => Err(EngineError::Protocol(format!(
            "tool reported failure ({marker} in content): {}",
            response.content.chars().take(200).collect::<String>()
        ))),
        None => Ok(response),
    }
}

/// One exclusive automation session. A session belongs to exactly one run
/// and sees one in-flight call at a time.
#[async_trait]
pub trait ProtocolClient: Send + Sync {
    async fn open(&self) -> EngineResult<()>;

    /// Close the session. Must be safe to call on every exit path.
    async fn close(&self) -> EngineResult<()>;

    /// Dispatch one validated invocation.
    async fn call(&self, invocation: &CommandInvocation) -> EngineResult<ProtocolResponse>;

    /// Enumerate the current page's interactive elements.
    async fn snapshot(&self) -> EngineResult<PageSnapshot>;

    /// Current page URL, if the session has navigated anywhere yet.
    async fn current_url(&self) -> EngineResult<Option<String>>;
}

#[derive(Default)]
struct NullState {
    url: Option<String>,
    version: u64,
    calls: Vec<CommandInvocation>,
}

/// In-memory client for dry runs: accepts every call, tracks the URL from
/// navigations, and synthesizes a generic snapshot. No browser involved.
#[derive(Default)]
pub struct NullClient {
    state: Mutex<NullState>,
}

impl NullClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Invocations dispatched so far, in order.
    pub fn calls(&self) -> Vec<CommandInvocation> {
        self.state.lock().calls.clone()
    }
}

#[async_trait]
impl ProtocolClient for NullClient {
    async fn open(&self) -> EngineResult<()> {
        debug!("null protocol session opened");
        Ok(())
    }

    async fn close(&self) -> EngineResult<()> {
        debug!("null protocol session closed");
        Ok(())
    }

    async fn call(&self, invocation: &CommandInvocation) -> EngineResult<ProtocolResponse> {
        let mut state = self.state.lock();
        state.calls.push(invocation.clone());
        state.version += 1;
        if invocation.tool_name == "browser_navigate" {
            state.url = invocation.str_arg("url").map(str::to_string);
        }
        Ok(ProtocolResponse::new(format!(
            "ok: {} accepted",
            invocation.tool_name
        )))
    }

    async fn snapshot(&self) -> EngineResult<PageSnapshot> {
        let state = self.state.lock();
        let page = state.url.clone().unwrap_or_else(|| "about:blank".into());
        Ok(PageSnapshot::new(
            state.version,
            vec![
                PageElement::new(
                    "null-body",
                    "generic",
                    format!("Synthetic page for {page} with enough visible text to count as alive"),
                ),
                PageElement::new("null-button", "button", "Submit"),
                PageElement::new("null-textbox", "textbox", "")
                    .with_attr("placeholder", "Search"),
            ],
        ))
    }

    async fn current_url(&self) -> EngineResult<Option<String>> {
        Ok(self.state.lock().url.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn clean_content_passes_through() {
        let response = check_response(ProtocolResponse::new("clicked element e1")).unwrap();
        assert_eq!(response.content, "clicked element e1");
    }

    #[test]
    fn failure_markers_become_protocol_errors() {
        for content in [
            "Error: element is not attached",
            "action Failed: timeout waiting for selector",
        ] {
            let err = check_response(ProtocolResponse::new(content)).unwrap_err();
            assert!(matches!(err, EngineError::Protocol(_)), "{content}");
        }
    }

    #[tokio::test]
    async fn null_client_tracks_navigation() {
        let client = NullClient::new();
        client.open().await.unwrap();
        assert_eq!(client.current_url().await.unwrap(), None);

        let invocation = CommandInvocation::new("browser_navigate")
            .with_arg("url", json!("https://example.com"));
        client.call(&invocation).await.unwrap();

        assert_eq!(
            client.current_url().await.unwrap().as_deref(),
            Some("https://example.com")
        );
        assert_eq!(client.calls().len(), 1);
        assert!(client.snapshot().await.unwrap().combined_text_len() > 50);
        client.close().await.unwrap();
    }
}
