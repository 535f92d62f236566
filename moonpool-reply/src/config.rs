//! Configuration for reply correlation.

use std::time::Duration;

/// Settings shared by every request going through one [`ReplyManager`](crate::ReplyManager).
#[derive(Debug, Clone)]
pub struct ReplyConfig {
    /// Deadline applied when a request does not set its own.
    pub default_timeout: Duration,

    /// Queue replies should be sent to. Copied into `reply_to` of outgoing
    /// requests that do not already name one.
    pub reply_to: Option<String>,

    /// Prefix for generated correlation ids. `None` picks a random one.
    pub correlation_prefix: Option<String>,

    /// Abort the deadline timer once a reply has resolved the request.
    ///
    /// Disabling this lets the timer fire anyway; the late timeout is then
    /// absorbed by the manager as a duplicate.
    pub cancel_timer_on_reply: bool,
}

impl Default for ReplyConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(20),
            reply_to: None,
            correlation_prefix: None,
            cancel_timer_on_reply: true,
        }
    }
}

impl ReplyConfig {
    /// Create a configuration with a custom default timeout.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            default_timeout: timeout,
            ..Self::default()
        }
    }

    /// Set the reply queue advertised on outgoing requests.
    pub fn reply_to(mut self, queue: impl Into<String>) -> Self {
        self.reply_to = Some(queue.into());
        self
    }

    /// Use a fixed prefix for generated correlation ids.
    pub fn correlation_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.correlation_prefix = Some(prefix.into());
        self
    }

    /// Keep deadline timers running after a reply arrives.
    pub fn keep_timer_on_reply(mut self) -> Self {
        self.cancel_timer_on_reply = false;
        self
    }
}
