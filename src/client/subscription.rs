//! Subscription streams.
//!
//! A subscription yields every frame routed to it. After a reconnect it
//! yields `Err(RequestError::Connected)` once without ending: the server has
//! forgotten the subscription and the caller should subscribe again.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::marker::PhantomData;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use futures_util::Stream;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::identifiers::CorrelationId;

use super::correlator::Reply;

// ============================================================================
// Subscription
// ============================================================================

/// Raw frames of one subscription or shared publisher.
pub struct Subscription {
    id: CorrelationId,
    replies: mpsc::UnboundedReceiver<Reply>,
}

impl Subscription {
    pub(crate) fn new(id: CorrelationId, replies: mpsc::UnboundedReceiver<Reply>) -> Self {
        Self { id, replies }
    }

    /// ID of the request that opened the subscription.
    #[inline]
    #[must_use]
    pub fn id(&self) -> &CorrelationId {
        &self.id
    }

    /// Receives the next reply, or `None` once the subscription has ended.
    pub async fn recv(&mut self) -> Option<Reply> {
        self.replies.recv().await
    }

    /// Returns the next reply if one is queued.
    pub fn try_recv(&mut self) -> Option<Reply> {
        self.replies.try_recv().ok()
    }

    /// Decodes notifications as `T`, skipping acknowledgments.
    #[must_use]
    pub fn typed<T: DeserializeOwned>(self) -> TypedSubscription<T> {
        TypedSubscription {
            inner: self,
            _marker: PhantomData,
        }
    }
}

impl Stream for Subscription {
    type Item = Reply;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.replies.poll_recv(cx)
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// TypedSubscription
// ============================================================================

/// Subscription whose notifications decode as `T`.
///
/// Successful acknowledgments (frames carrying an `id`) are skipped; an
/// acknowledgment with an `error` member is yielded as
/// [`Error::Rpc`](crate::Error::Rpc).
pub struct TypedSubscription<T> {
    inner: Subscription,
    _marker: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> TypedSubscription<T> {
    /// ID of the request that opened the subscription.
    #[inline]
    #[must_use]
    pub fn id(&self) -> &CorrelationId {
        self.inner.id()
    }

    /// Returns the raw subscription.
    #[inline]
    #[must_use]
    pub fn into_inner(self) -> Subscription {
        self.inner
    }
}

impl<T: DeserializeOwned> Stream for TypedSubscription<T> {
    type Item = Result<T>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            let Some(reply) = ready!(self.inner.replies.poll_recv(cx)) else {
                return Poll::Ready(None);
            };

            match reply {
                Ok(response) if response.id().is_some() && !response.is_error() => continue,
                Ok(response) => return Poll::Ready(Some(response.result())),
                Err(e) => return Poll::Ready(Some(Err(e.into()))),
            }
        }
    }
}

impl<T> fmt::Debug for TypedSubscription<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypedSubscription")
            .field("id", &self.inner.id)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================
