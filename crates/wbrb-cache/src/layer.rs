//! Optional Tower `Service`/`Layer` facade over [`Cache::read`], for callers
//! who want to compose the cache into an existing `tower::ServiceBuilder`
//! stack instead of calling `Cache::read` directly.

use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use tower::{Layer, Service};

use crate::error::CacheError;
use crate::Cache;

/// A Tower [`Service`] that serves `read` calls against a [`Cache`].
///
/// Cloning is cheap: the underlying cache is `Arc`-shared.
pub struct CacheService<K, V, U, R, W, A> {
    cache: Arc<Cache<K, V, U, R, W, A>>,
    timeout: Duration,
}

impl<K, V, U, R, W, A> Clone for CacheService<K, V, U, R, W, A> {
    fn clone(&self) -> Self {
        Self {
            cache: self.cache.clone(),
            timeout: self.timeout,
        }
    }
}

impl<K, V, U, R, W, A> CacheService<K, V, U, R, W, A> {
    pub fn new(cache: Arc<Cache<K, V, U, R, W, A>>, timeout: Duration) -> Self {
        Self { cache, timeout }
    }
}

impl<K, V, U, R, W, A> Service<K> for CacheService<K, V, U, R, W, A>
where
    K: Eq + Hash + Clone + fmt::Display + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    U: Clone + Send + Sync + 'static,
    R: Send + Sync + 'static,
    W: Send + Sync + 'static,
    A: fmt::Display + fmt::Debug + Clone + Send + Sync + 'static,
{
    type Response = V;
    type Error = CacheError<A>;
    type Future = Pin<Box<dyn Future<Output = Result<V, CacheError<A>>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, key: K) -> Self::Future {
        let cache = self.cache.clone();
        let timeout = self.timeout;
        Box::pin(async move { cache.read(key, timeout).await })
    }
}

/// A Tower [`Layer`] that hands out a [`CacheService`] regardless of the
/// service it's applied to: a [`Cache`] already owns its own storage
/// adapter, so there is no inner service for the layer to delegate to. This
/// exists purely so a cache can sit in a `ServiceBuilder` stack alongside
/// other middleware (timeouts, retries, circuit breakers) the same way
/// response-caching layers elsewhere in this workspace compose with
/// `ServiceBuilder`.
pub struct CacheLayer<K, V, U, R, W, A> {
    cache: Arc<Cache<K, V, U, R, W, A>>,
    timeout: Duration,
}

impl<K, V, U, R, W, A> CacheLayer<K, V, U, R, W, A> {
    pub fn new(cache: Arc<Cache<K, V, U, R, W, A>>, timeout: Duration) -> Self {
        Self { cache, timeout }
    }
}

impl<K, V, U, R, W, A> Clone for CacheLayer<K, V, U, R, W, A> {
    fn clone(&self) -> Self {
        Self {
            cache: self.cache.clone(),
            timeout: self.timeout,
        }
    }
}

impl<S, K, V, U, R, W, A> Layer<S> for CacheLayer<K, V, U, R, W, A> {
    type Service = CacheService<K, V, U, R, W, A>;

    fn layer(&self, _inner: S) -> Self::Service {
        CacheService::new(self.cache.clone(), self.timeout)
    }
}
