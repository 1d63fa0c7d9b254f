//! Status sinks for the connection manager

use payload_link_shared::StatusSink;
use tokio::sync::watch;
use tracing::info;

/// Logs every status string and mirrors the latest one for display
pub struct StatusDisplay {
    latest: watch::Sender<String>,
}

impl StatusDisplay {
    pub fn new() -> (Self, watch::Receiver<String>) {
        let (latest, rx) = watch::channel(String::new());
        (Self { latest }, rx)
    }
}

impl StatusSink for StatusDisplay {
    fn update(&self, status: &str) {
        info!("[STATUS] {}", status);
        self.latest.send_replace(status.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_mirrors_latest_status() {
        let (display, rx) = StatusDisplay::new();
        display.update("Scanning");
        display.update("Connected to device");
        assert_eq!(*rx.borrow(), "Connected to device");
    }
}
