//! # moonpool-reply
//!
//! Request-reply correlation over a message broker.
//!
//! A caller publishes a request and suspends until either a reply carrying
//! the request's correlation id shows up on the reply channel, or the
//! request's deadline elapses. Both events may fire, in any order and on any
//! thread; the caller is resumed exactly once, by whichever reaches the
//! [`ReplyManager`] first.
//!
//! ## Components
//!
//! ```text
//! ┌────────────────────┐  on_reply / on_timeout  ┌────────────────────────┐
//! │ broker consumer    │────────────────────────▶│ CorrelatedReplyHandler │
//! │ deadline timer     │                         └───────────┬────────────┘
//! └────────────────────┘                                     │ ReplyHolder
//!                                                            ▼
//! ┌────────────────────┐        Resumption       ┌────────────────────────┐
//! │ caller             │◀────────────────────────│ ReplyManager           │
//! │ (ReplyReceiver)    │      (first one wins)   │ (registry by id)       │
//! └────────────────────┘                         └────────────────────────┘
//! ```
//!
//! - [`ReplyHolder`]: immutable record of one reply or timeout.
//! - [`ReplyHandler`]: per-request endpoint invoked by the consumer and the timer.
//! - [`ReplyManager`]: registry that resumes each caller at most once.
//!
//! ## Quick Start
//!
//! ```ignore
//! use moonpool_reply::{OutboundRequest, ReplyConfig, ReplyManager};
//!
//! let manager = ReplyManager::new(ReplyConfig::default().reply_to("replies"));
//!
//! // consumer side: every message on the reply queue
//! manager.on_delivery(delivery);
//!
//! // caller side
//! let request = OutboundRequest::new("rpc", "pricing", payload);
//! let reply = manager.request(&publisher, context, request, None).await?.into_result()?;
//! ```
//!
//! Transport concerns (connections, queue declaration, acknowledgements) are
//! left to the [`RequestPublisher`] implementation and to whoever consumes
//! the reply queue.

#![deny(missing_docs)]

pub mod config;
pub mod correlation;
pub mod error;
pub mod handler;
pub mod holder;
pub mod manager;
pub mod message;
pub mod resume;
pub mod stats;
pub mod transport;

pub use config::ReplyConfig;
pub use correlation::{CorrelationId, CorrelationIdFactory};
pub use error::{PublishError, ReplyError};
pub use handler::{CorrelatedReplyHandler, ReplyHandler};
pub use holder::{ReplyHolder, Resolution};
pub use manager::{Registration, ReplyManager};
pub use message::{Delivery, MessageProperties, OutboundRequest};
pub use resume::{
    CorrelationMismatch, Reply, ReplyOutcome, ReplyReceiver, ResumeHandle, Resumption,
};
pub use stats::{ReplyStats, ReplyStatsSnapshot};
pub use transport::RequestPublisher;
