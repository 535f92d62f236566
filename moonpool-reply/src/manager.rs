//! Registry of in-flight requests and the dispatcher that resumes them.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ ReplyManager<C>                              │
//! │                                              │
//! │  ┌────────────────────────────────────────┐  │
//! │  │ registry: Mutex<Registry>              │  │
//! │  │   pending: request_id → PendingReply   │  │
//! │  │   aliases: wire id    → request_id     │  │
//! │  └────────────────────────────────────────┘  │
//! │                                              │
//! │  ┌────────────────────────────────────────┐  │
//! │  │ ids: CorrelationIdFactory              │  │
//! │  └────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────┘
//!
//! Request Flow:
//!   1. register() creates a CorrelatedReplyHandler and spawns its timer
//!   2. caller publishes the request and awaits the ReplyReceiver
//!
//! Resolution Flow (reply and timer race):
//!   3. on_reply() / on_timeout() build a ReplyHolder
//!   4. process_reply() removes the entry under the registry lock
//!   5. the first holder to remove it resumes the caller
//!   6. any later holder finds nothing and is dropped
//! ```
//!
//! The remove is the only point of arbitration: a reply and a timeout for the
//! same request may be processed concurrently from different threads, and
//! exactly one of them finds the entry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::ReplyConfig;
use crate::correlation::{CorrelationId, CorrelationIdFactory};
use crate::error::ReplyError;
use crate::handler::{CorrelatedReplyHandler, ReplyHandler};
use crate::holder::ReplyHolder;
use crate::message::{Delivery, OutboundRequest};
use crate::resume::{self, ReplyReceiver, Resumption};
use crate::stats::{ReplyStats, ReplyStatsSnapshot};
use crate::transport::RequestPublisher;

/// A registered request: the handler the consumption layer feeds, and the
/// receiver the caller waits on.
pub struct Registration<C> {
    /// Correlation endpoint for this request.
    pub handler: Arc<CorrelatedReplyHandler<C>>,

    /// Resolves once, with a reply or a timeout.
    pub receiver: ReplyReceiver<C>,
}

struct PendingReply<C> {
    handler: Arc<CorrelatedReplyHandler<C>>,
    registered_at: Instant,
    timer: JoinHandle<()>,
}

struct Registry<C> {
    pending: HashMap<CorrelationId, PendingReply<C>>,
    // only populated when the wire correlation id differs from the request id
    aliases: HashMap<CorrelationId, CorrelationId>,
}

impl<C> Registry<C> {
    fn lookup(&self, id: &CorrelationId) -> Option<&PendingReply<C>> {
        self.pending.get(id).or_else(|| {
            self.aliases
                .get(id)
                .and_then(|request_id| self.pending.get(request_id))
        })
    }

    fn remove(&mut self, request_id: &CorrelationId) -> Option<PendingReply<C>> {
        let entry = self.pending.remove(request_id)?;
        self.aliases.remove(entry.handler.correlation_id());
        Some(entry)
    }

    /// Remove the entry only if it still belongs to the holder's caller. A
    /// stale event for a recycled id must not resolve the newer request.
    fn remove_for(&mut self, holder: &ReplyHolder<C>) -> Option<PendingReply<C>> {
        let owned = self
            .pending
            .get(holder.request_id())
            .is_some_and(|entry| entry.handler.resume_handle().same_target(holder.resume_handle()));
        if owned {
            self.remove(holder.request_id())
        } else {
            None
        }
    }
}

/// Tracks every outstanding request of one messaging client and resumes each
/// caller exactly once.
///
/// Shared through an `Arc`: handlers and timer tasks keep a handle to it.
pub struct ReplyManager<C> {
    config: ReplyConfig,
    ids: CorrelationIdFactory,
    registry: Mutex<Registry<C>>,
    stats: ReplyStats,
}

impl<C> ReplyManager<C> {
    /// Create a manager.
    pub fn new(config: ReplyConfig) -> Arc<Self> {
        let ids = match &config.correlation_prefix {
            Some(prefix) => CorrelationIdFactory::new(prefix.clone()),
            None => CorrelationIdFactory::random(),
        };
        Arc::new(Self {
            config,
            ids,
            registry: Mutex::new(Registry {
                pending: HashMap::new(),
                aliases: HashMap::new(),
            }),
            stats: ReplyStats::default(),
        })
    }

    /// The manager's configuration.
    pub fn config(&self) -> &ReplyConfig {
        &self.config
    }

    /// Generate a fresh correlation id.
    pub fn next_correlation_id(&self) -> CorrelationId {
        self.ids.next()
    }

    /// Number of requests still waiting.
    pub fn pending_count(&self) -> usize {
        self.registry().pending.len()
    }

    /// Whether `request_id` is still waiting.
    pub fn is_pending(&self, request_id: &CorrelationId) -> bool {
        self.registry().pending.contains_key(request_id)
    }

    /// Resolution counters.
    pub fn stats(&self) -> ReplyStatsSnapshot {
        self.stats.snapshot()
    }

    /// Withdraw a pending request without resuming it.
    ///
    /// For callers that lose interest before a reply or timeout. The timer is
    /// aborted and the receiver observes [`ReplyError::Abandoned`]. Returns
    /// `false` if the request was not pending.
    pub fn unregister(&self, request_id: &CorrelationId) -> bool {
        let Some(entry) = self.registry().remove(request_id) else {
            return false;
        };
        self.abandon(entry);
        true
    }

    /// Withdraw every pending request.
    pub fn shutdown(&self) {
        let drained: Vec<_> = {
            let mut registry = self.registry();
            registry.aliases.clear();
            registry.pending.drain().map(|(_, entry)| entry).collect()
        };
        tracing::debug!(count = drained.len(), "shutting down reply manager");
        for entry in drained {
            self.abandon(entry);
        }
    }

    /// Resolve a pending request from a handler's holder.
    ///
    /// The first holder for a request removes it and resumes the caller.
    /// Holders for requests that are no longer pending (the other side of a
    /// reply/timeout race, or a duplicate delivery) are dropped silently.
    ///
    /// Safe to call concurrently from any thread. The registry remove is the
    /// single point where a reply and a timeout for the same request are
    /// ordered.
    ///
    /// # Parameters
    ///
    /// - `holder`: The reply or timeout built by the request's handler
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// // What CorrelatedReplyHandler::on_timeout does:
    /// let holder = ReplyHolder::timeout(context, resume, request_id, correlation_id, timeout);
    /// manager.process_reply(holder);
    /// ```
    pub fn process_reply(&self, holder: ReplyHolder<C>) {
        let Some(entry) = self.registry().remove_for(&holder) else {
            self.stats.record_duplicate();
            tracing::debug!(
                request_id = %holder.request_id(),
                timeout = holder.is_timeout(),
                "ignoring event for already resolved request"
            );
            return;
        };

        if holder.is_timeout() {
            self.stats.record_timeout();
        } else {
            if self.config.cancel_timer_on_reply {
                // the entry is already gone, so a timer that fires anyway is
                // absorbed above
                entry.timer.abort();
            }
            self.stats.record_reply();
        }

        if let Some(mismatch) = holder.correlation_mismatch() {
            self.stats.record_mismatch();
            tracing::warn!(
                request_id = %holder.request_id(),
                expected = %mismatch.expected,
                observed = ?mismatch.observed,
                "reply carried a different correlation id, resuming by original id"
            );
        }

        let request_id = holder.request_id().clone();
        let timed_out = holder.is_timeout();
        let (resume, resumption) = holder.into_resumption();
        let delivered = resume.resume(resumption);
        tracing::debug!(
            request_id = %request_id,
            timed_out,
            delivered,
            elapsed = ?entry.registered_at.elapsed(),
            "request resolved"
        );
    }

    /// Route a message consumed from a shared reply queue to its handler.
    ///
    /// The delivery's correlation id is matched against request ids and
    /// registered wire ids.
    ///
    /// # Returns
    ///
    /// - `true`: A pending request was found and its handler was invoked
    /// - `false`: Nothing is waiting for this id, typically a reply that
    ///   arrived after its request timed out
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// // In the reply queue consumer loop:
    /// while let Some(message) = consumer.next().await {
    ///     manager.on_delivery(Delivery::new(message.properties, message.body));
    /// }
    /// ```
    pub fn on_delivery(&self, delivery: Delivery) -> bool
    where
        C: Clone + Send + Sync + 'static,
    {
        let Delivery {
            properties,
            payload,
        } = delivery;

        let handler = match properties.correlation_id.as_ref() {
            Some(id) => self.registry().lookup(id).map(|entry| entry.handler.clone()),
            None => None,
        };

        match handler {
            Some(handler) => {
                handler.on_reply(properties.correlation_id.clone(), properties, payload);
                true
            }
            None => {
                self.stats.record_unknown();
                tracing::debug!(
                    correlation_id = ?properties.correlation_id,
                    "reply received for unknown correlation id, ignoring"
                );
                false
            }
        }
    }

    fn abandon(&self, entry: PendingReply<C>) {
        entry.timer.abort();
        entry.handler.resume_handle().abandon();
        self.stats.record_abandoned();
        tracing::debug!(request_id = %entry.handler.request_id(), "request abandoned");
    }

    fn registry(&self) -> MutexGuard<'_, Registry<C>> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<C: Clone + Send + Sync + 'static> ReplyManager<C> {
    /// Register a request whose reply is expected to echo `request_id`.
    ///
    /// Creates the request's handler, stores it in the registry and starts
    /// its deadline timer. The deadline counts from this call. Must be called
    /// from within a tokio runtime, which runs the timer.
    ///
    /// # Parameters
    ///
    /// - `context`: Caller state handed back on resumption
    /// - `request_id`: The id the request is published with
    /// - `timeout`: Deadline, falling back to [`ReplyConfig::default_timeout`]
    ///
    /// # Returns
    ///
    /// - `Ok(Registration)`: The handler to feed and the receiver to await
    /// - `Err(ReplyError::DuplicateCorrelationId)`: `request_id` is already pending
    /// - `Err(ReplyError::NoRuntime)`: Called outside a tokio runtime
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// let request_id = manager.next_correlation_id();
    /// let registration = manager.register(context, request_id.clone(), None)?;
    ///
    /// publish_with_correlation_id(request_id).await?;
    ///
    /// // Later, reply or timeout
    /// let resumption = registration.receiver.recv().await?;
    /// ```
    pub fn register(
        self: &Arc<Self>,
        context: C,
        request_id: CorrelationId,
        timeout: Option<Duration>,
    ) -> Result<Registration<C>, ReplyError> {
        let correlation_id = request_id.clone();
        self.register_with_correlation(context, request_id, correlation_id, timeout)
    }

    /// Register a request whose reply is expected to carry `correlation_id`
    /// rather than its own `request_id`.
    ///
    /// Both ids route deliveries to the request; only `request_id` identifies
    /// it for resolution. Fails with
    /// [`ReplyError::DuplicateCorrelationId`] if either id is already in use.
    pub fn register_with_correlation(
        self: &Arc<Self>,
        context: C,
        request_id: CorrelationId,
        correlation_id: CorrelationId,
        timeout: Option<Duration>,
    ) -> Result<Registration<C>, ReplyError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| ReplyError::NoRuntime)?;
        let timeout = timeout.unwrap_or(self.config.default_timeout);

        let mut registry = self.registry();
        if registry.lookup(&request_id).is_some() {
            return Err(ReplyError::DuplicateCorrelationId(request_id));
        }
        if registry.lookup(&correlation_id).is_some() {
            return Err(ReplyError::DuplicateCorrelationId(correlation_id));
        }

        let (resume, receiver) = resume::channel(request_id.clone());
        let handler = Arc::new(CorrelatedReplyHandler::new(
            self.clone(),
            context,
            resume,
            request_id.clone(),
            correlation_id.clone(),
            timeout,
        ));

        // the deadline counts from registration, not from the timer's first poll
        let registered_at = Instant::now();
        let deadline = registered_at + timeout;

        // spawned under the lock, so even a zero deadline finds the entry
        let timer = runtime.spawn({
            let handler = handler.clone();
            async move {
                tokio::time::sleep_until(deadline).await;
                let correlation_id = handler.correlation_id().clone();
                handler.on_timeout(correlation_id);
            }
        });

        if correlation_id != request_id {
            registry
                .aliases
                .insert(correlation_id.clone(), request_id.clone());
        }
        registry.pending.insert(
            request_id.clone(),
            PendingReply {
                handler: handler.clone(),
                registered_at,
                timer,
            },
        );
        drop(registry);

        self.stats.record_registered();
        tracing::debug!(
            request_id = %request_id,
            correlation_id = %correlation_id,
            timeout = ?timeout,
            "registered pending reply"
        );

        Ok(Registration { handler, receiver })
    }

    /// Send a request and wait for its reply or timeout.
    ///
    /// Keeps a correlation id already set on the request, otherwise generates
    /// one, and advertises [`ReplyConfig::reply_to`] when the request names no
    /// reply queue. The request is registered before it is published, so a
    /// fast reply always finds its entry.
    ///
    /// # Parameters
    ///
    /// - `publisher`: Broker seam the request is sent through
    /// - `context`: Caller state handed back on resumption
    /// - `request`: The outbound message
    /// - `timeout`: Deadline, falling back to [`ReplyConfig::default_timeout`]
    ///
    /// # Returns
    ///
    /// - `Ok(Resumption)`: Resolved by a reply or by the deadline
    /// - `Err(ReplyError::Publish)`: Publishing failed; the registration is withdrawn
    /// - `Err(ReplyError::Abandoned)`: Withdrawn by `unregister` or `shutdown`
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// let request = OutboundRequest::new("rpc", "pricing", payload);
    /// let reply = manager
    ///     .request(&publisher, context, request, Some(Duration::from_secs(5)))
    ///     .await?
    ///     .into_result()?;
    /// ```
    pub async fn request<P>(
        self: &Arc<Self>,
        publisher: &P,
        context: C,
        mut request: OutboundRequest,
        timeout: Option<Duration>,
    ) -> Result<Resumption<C>, ReplyError>
    where
        P: RequestPublisher + ?Sized,
    {
        let request_id = match &request.properties.correlation_id {
            Some(id) => id.clone(),
            None => {
                let id = self.next_correlation_id();
                request.properties.correlation_id = Some(id.clone());
                id
            }
        };
        if request.properties.reply_to.is_none() {
            request.properties.reply_to = self.config.reply_to.clone();
        }

        let registration = self.register(context, request_id.clone(), timeout)?;

        tracing::debug!(
            request_id = %request_id,
            exchange = %request.exchange,
            routing_key = %request.routing_key,
            "publishing request"
        );
        if let Err(err) = publisher.publish(request).await {
            tracing::warn!(request_id = %request_id, error = %err, "publish failed");
            self.unregister(&request_id);
            return Err(err.into());
        }

        registration.receiver.recv().await
    }
}
