//! Resuming the suspended caller.
//!
//! The caller parks on a [`ReplyReceiver`]; whoever resolves the request
//! fulfils the matching [`ResumeHandle`]. Handles are cheap to clone (the
//! handler copies one into every [`ReplyHolder`](crate::ReplyHolder)), but
//! the underlying oneshot sender is taken on first use, so at most one
//! resumption ever reaches the caller.
//!
//! ```text
//!   caller                     handler / manager
//!     │  register()                 │
//!     │────────────────────────────▶│ ResumeHandle (clone per event)
//!     │  receiver.recv().await      │
//!     │◀────────────────────────────│ resume(Resumption), first wins
//! ```

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot::{self, error::TryRecvError};

use crate::correlation::CorrelationId;
use crate::error::ReplyError;
use crate::message::MessageProperties;

type ResumeSlot<C> = Arc<Mutex<Option<oneshot::Sender<Resumption<C>>>>>;

/// Create a linked resume handle and receiver for one request.
pub fn channel<C>(request_id: CorrelationId) -> (ResumeHandle<C>, ReplyReceiver<C>) {
    let (tx, rx) = oneshot::channel();
    (
        ResumeHandle {
            slot: Arc::new(Mutex::new(Some(tx))),
        },
        ReplyReceiver {
            request_id,
            rx: Some(rx),
        },
    )
}

/// Fulfil-once handle to a suspended caller.
pub struct ResumeHandle<C> {
    slot: ResumeSlot<C>,
}

impl<C> Clone for ResumeHandle<C> {
    fn clone(&self) -> Self {
        Self {
            slot: self.slot.clone(),
        }
    }
}

impl<C> std::fmt::Debug for ResumeHandle<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResumeHandle")
            .field("resumed", &self.is_resumed())
            .finish()
    }
}

impl<C> ResumeHandle<C> {
    /// Resume the caller with `resumption`.
    ///
    /// Returns `false` if this handle (or a clone) was already used or
    /// abandoned, or if the caller stopped waiting.
    pub fn resume(&self, resumption: Resumption<C>) -> bool {
        let Some(sender) = self.take() else {
            tracing::warn!("ResumeHandle::resume: sender already taken (double resumption?)");
            return false;
        };

        match sender.send(resumption) {
            Ok(()) => true,
            Err(_) => {
                tracing::warn!("ResumeHandle::resume: receiver dropped before resumption");
                false
            }
        }
    }

    /// Drop the sender without resuming; the receiver observes
    /// [`ReplyError::Abandoned`].
    pub fn abandon(&self) {
        drop(self.take());
    }

    /// Whether the caller was resumed or abandoned through any clone.
    pub fn is_resumed(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Whether both handles resume the same caller.
    pub fn same_target(&self, other: &ResumeHandle<C>) -> bool {
        Arc::ptr_eq(&self.slot, &other.slot)
    }

    fn take(&self) -> Option<oneshot::Sender<Resumption<C>>> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

/// The caller's side of a pending request.
#[derive(Debug)]
pub struct ReplyReceiver<C> {
    request_id: CorrelationId,
    // taken once a resumption or abandonment has been observed
    rx: Option<oneshot::Receiver<Resumption<C>>>,
}

impl<C> ReplyReceiver<C> {
    /// The correlation id this receiver waits on.
    pub fn request_id(&self) -> &CorrelationId {
        &self.request_id
    }

    /// Suspend until the request is resolved by a reply or a timeout.
    ///
    /// Fails with [`ReplyError::Abandoned`] if the request was withdrawn, or
    /// if [`try_recv`](Self::try_recv) already returned the final result.
    pub async fn recv(self) -> Result<Resumption<C>, ReplyError> {
        let Some(rx) = self.rx else {
            return Err(ReplyError::Abandoned(self.request_id));
        };
        rx.await.map_err(|_| ReplyError::Abandoned(self.request_id))
    }

    /// Non-blocking check, for callers polling from synchronous code.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(resumption))`: The request was resolved
    /// - `Ok(None)`: Still pending
    /// - `Err(ReplyError::Abandoned)`: Withdrawn without resumption, or the
    ///   resumption was already taken by an earlier call
    pub fn try_recv(&mut self) -> Result<Option<Resumption<C>>, ReplyError> {
        let Some(rx) = self.rx.as_mut() else {
            return Err(ReplyError::Abandoned(self.request_id.clone()));
        };
        match rx.try_recv() {
            Ok(resumption) => {
                self.rx = None;
                Ok(Some(resumption))
            }
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Closed) => {
                self.rx = None;
                Err(ReplyError::Abandoned(self.request_id.clone()))
            }
        }
    }
}

/// What the caller is resumed with.
#[derive(Debug)]
pub struct Resumption<C> {
    /// The request context that was registered with the request.
    pub context: C,

    /// Reply or timeout.
    pub outcome: ReplyOutcome,
}

impl<C> Resumption<C> {
    /// Whether the request was resolved by its deadline.
    pub fn is_timeout(&self) -> bool {
        matches!(self.outcome, ReplyOutcome::TimedOut { .. })
    }

    /// Collapse into a plain result, turning a timeout into
    /// [`ReplyError::Timeout`].
    pub fn into_result(self) -> Result<Reply, ReplyError> {
        match self.outcome {
            ReplyOutcome::Replied(reply) => Ok(reply),
            ReplyOutcome::TimedOut {
                request_id,
                timeout,
            } => Err(ReplyError::Timeout {
                correlation_id: request_id,
                timeout,
            }),
        }
    }
}

/// How a request was resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyOutcome {
    /// A reply arrived.
    Replied(Reply),

    /// The deadline elapsed first.
    TimedOut {
        /// The request's original correlation id.
        request_id: CorrelationId,
        /// The configured deadline.
        timeout: Duration,
    },
}

/// A reply delivered to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Id the request was registered under.
    pub request_id: CorrelationId,

    /// Id the reply was expected to carry.
    pub correlation_id: CorrelationId,

    /// Id actually found on the reply, if any.
    pub observed_correlation_id: Option<CorrelationId>,

    /// Reply properties.
    pub properties: MessageProperties,

    /// Reply body.
    pub payload: Vec<u8>,
}

impl Reply {
    /// The correlation mismatch, if the peer did not echo the expected id.
    pub fn mismatch(&self) -> Option<CorrelationMismatch> {
        if self.observed_correlation_id.as_ref() == Some(&self.correlation_id) {
            return None;
        }
        Some(CorrelationMismatch {
            expected: self.correlation_id.clone(),
            observed: self.observed_correlation_id.clone(),
        })
    }
}

/// Diagnostic annotation for a reply whose correlation id was tampered with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelationMismatch {
    /// Id the request expected.
    pub expected: CorrelationId,
    /// Id the reply carried (`None` if it carried none).
    pub observed: Option<CorrelationId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timed_out(id: &str) -> Resumption<&'static str> {
        Resumption {
            context: "ctx",
            outcome: ReplyOutcome::TimedOut {
                request_id: CorrelationId::from(id),
                timeout: Duration::from_millis(200),
            },
        }
    }

    #[test]
    fn test_resume_once_across_clones() {
        let (handle, mut rx) = channel::<&'static str>(CorrelationId::from("R1"));
        let clone = handle.clone();

        assert!(!handle.is_resumed());
        assert!(handle.resume(timed_out("R1")));
        assert!(clone.is_resumed());
        assert!(!clone.resume(timed_out("R1")));

        let resumption = rx.try_recv().unwrap().unwrap();
        assert!(resumption.is_timeout());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_try_recv_pending_then_resolved() {
        let (handle, mut rx) = channel::<&'static str>(CorrelationId::from("R7"));
        assert!(matches!(rx.try_recv(), Ok(None)));

        assert!(handle.resume(timed_out("R7")));
        assert!(matches!(rx.try_recv(), Ok(Some(_))));
    }

    #[tokio::test]
    async fn test_try_recv_reports_abandonment() {
        let (handle, mut rx) = channel::<&'static str>(CorrelationId::from("R8"));
        handle.abandon();

        assert_eq!(
            rx.try_recv().unwrap_err(),
            ReplyError::Abandoned(CorrelationId::from("R8"))
        );
        // falling back to the async path after a final answer must not panic
        let err = rx.recv().await.unwrap_err();
        assert_eq!(err, ReplyError::Abandoned(CorrelationId::from("R8")));
    }

    #[tokio::test]
    async fn test_abandon_surfaces_error() {
        let (handle, rx) = channel::<&'static str>(CorrelationId::from("R5"));
        let clone = handle.clone();
        handle.abandon();

        assert!(!clone.resume(timed_out("R5")));
        let err = rx.recv().await.unwrap_err();
        assert_eq!(err, ReplyError::Abandoned(CorrelationId::from("R5")));
    }

    #[test]
    fn test_resume_after_receiver_dropped() {
        let (handle, rx) = channel::<&'static str>(CorrelationId::from("R6"));
        drop(rx);
        assert!(!handle.resume(timed_out("R6")));
        assert!(handle.is_resumed());
    }

    #[test]
    fn test_into_result_maps_timeout() {
        let err = timed_out("R2").into_result().unwrap_err();
        assert_eq!(
            err,
            ReplyError::Timeout {
                correlation_id: CorrelationId::from("R2"),
                timeout: Duration::from_millis(200),
            }
        );
    }

    #[test]
    fn test_reply_mismatch() {
        let mut reply = Reply {
            request_id: CorrelationId::from("R3"),
            correlation_id: CorrelationId::from("R3"),
            observed_correlation_id: Some(CorrelationId::from("R3")),
            properties: MessageProperties::default(),
            payload: b"ok".to_vec(),
        };
        assert_eq!(reply.mismatch(), None);

        reply.observed_correlation_id = Some(CorrelationId::from("R3-mutated"));
        assert_eq!(
            reply.mismatch(),
            Some(CorrelationMismatch {
                expected: CorrelationId::from("R3"),
                observed: Some(CorrelationId::from("R3-mutated")),
            })
        );

        reply.observed_correlation_id = None;
        assert_eq!(reply.mismatch().map(|m| m.observed), Some(None));
    }
}
