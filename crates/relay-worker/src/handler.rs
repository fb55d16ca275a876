//! The embedder-supplied request handler seam (C5).

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// A handler failure. The worker logs this and replies with an empty frame
/// rather than dropping the request or crashing.
#[derive(Debug, Error)]
#[error("request handler failed: {0}")]
pub struct HandlerError(#[from] pub anyhow::Error);

/// Application logic invoked for each REQUEST a worker receives. Takes the
/// request's payload frames and returns the reply's payload frames.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle(&self, request: Vec<Bytes>) -> Result<Vec<Bytes>, HandlerError>;
}

/// Adapts a plain async closure into a [`RequestHandler`], for simple
/// embedders and for tests that don't need a full trait impl.
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F, Fut> RequestHandler for FnHandler<F>
where
    F: Fn(Vec<Bytes>) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<Vec<Bytes>, HandlerError>> + Send,
{
    async fn handle(&self, request: Vec<Bytes>) -> Result<Vec<Bytes>, HandlerError> {
        (self.0)(request).await
    }
}
