//! Per-request correlation endpoint.
//!
//! The consumption layer calls [`ReplyHandler::on_reply`] when a message for
//! the request shows up on the reply channel; the deadline timer calls
//! [`ReplyHandler::on_timeout`]. The two may run concurrently. Neither
//! decides anything: both just wrap the event in a
//! [`ReplyHolder`](crate::ReplyHolder) and hand it to the manager, which
//! resumes the caller for whichever arrives first.

use std::sync::Arc;
use std::time::Duration;

use crate::correlation::CorrelationId;
use crate::holder::ReplyHolder;
use crate::manager::ReplyManager;
use crate::message::MessageProperties;
use crate::resume::ResumeHandle;

/// Receiver of correlation events for one outstanding request.
pub trait ReplyHandler: Send + Sync {
    /// A reply arrived. `correlation_id` is what the reply carried, which a
    /// misbehaving peer may have mangled or left out.
    fn on_reply(
        &self,
        correlation_id: Option<CorrelationId>,
        properties: MessageProperties,
        payload: Vec<u8>,
    );

    /// The deadline elapsed without a reply.
    fn on_timeout(&self, correlation_id: CorrelationId);
}

/// Handler created by [`ReplyManager::register`] for every request.
pub struct CorrelatedReplyHandler<C> {
    manager: Arc<ReplyManager<C>>,
    context: C,
    resume: ResumeHandle<C>,
    // kept apart from `correlation_id` in case the peer echoes back a
    // different id than the one we expect
    request_id: CorrelationId,
    correlation_id: CorrelationId,
    timeout: Duration,
}

impl<C> CorrelatedReplyHandler<C> {
    pub(crate) fn new(
        manager: Arc<ReplyManager<C>>,
        context: C,
        resume: ResumeHandle<C>,
        request_id: CorrelationId,
        correlation_id: CorrelationId,
        timeout: Duration,
    ) -> Self {
        Self {
            manager,
            context,
            resume,
            request_id,
            correlation_id,
            timeout,
        }
    }

    /// Id the request was registered under.
    pub fn request_id(&self) -> &CorrelationId {
        &self.request_id
    }

    /// Id the reply is expected to carry.
    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    /// The request's deadline.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub(crate) fn resume_handle(&self) -> &ResumeHandle<C> {
        &self.resume
    }
}

impl<C: Clone + Send + Sync + 'static> ReplyHandler for CorrelatedReplyHandler<C> {
    fn on_reply(
        &self,
        correlation_id: Option<CorrelationId>,
        properties: MessageProperties,
        payload: Vec<u8>,
    ) {
        tracing::debug!(
            request_id = %self.request_id,
            observed = ?correlation_id,
            "reply received"
        );
        let holder = ReplyHolder::reply(
            self.context.clone(),
            self.resume.clone(),
            self.request_id.clone(),
            self.correlation_id.clone(),
            correlation_id,
            properties,
            payload,
        );
        self.manager.process_reply(holder);
    }

    fn on_timeout(&self, correlation_id: CorrelationId) {
        tracing::debug!(
            request_id = %self.request_id,
            correlation_id = %correlation_id,
            timeout = ?self.timeout,
            "reply timed out"
        );
        let holder = ReplyHolder::timeout(
            self.context.clone(),
            self.resume.clone(),
            self.request_id.clone(),
            self.correlation_id.clone(),
            self.timeout,
        );
        self.manager.process_reply(holder);
    }
}
