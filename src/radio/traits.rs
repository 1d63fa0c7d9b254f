//! Radio stack trait abstraction for pluggable BLE backends

use anyhow::Result;
use async_trait::async_trait;
use payload_link_shared::{RadioEvent, RadioRequest};
use tokio::sync::mpsc;

/// Channel the radio stack delivers its events on
pub type RadioEventSender = mpsc::UnboundedSender<RadioEvent>;

/// A BLE central stack driven by fire-and-forget requests
#[async_trait]
pub trait RadioStack: Send + 'static {
    /// Register the event receiver. Called once, before any request.
    ///
    /// The stack reports its current power state through `events` once
    /// attached.
    async fn attach(&mut self, events: RadioEventSender) -> Result<()>;

    /// Hand a request to the stack.
    ///
    /// Must return as soon as the request is issued; outcomes arrive later
    /// as events.
    async fn submit(&mut self, request: RadioRequest) -> Result<()>;

    /// Human-readable name for this stack
    fn name(&self) -> &'static str;
}
