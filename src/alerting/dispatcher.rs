//! Alert persistence and fan-out to notification sinks.

use super::RetryPolicy;
use crate::db::{Alert, Repository};
use crate::notify::{build_sink, delivery_timeout, Sink, SinkError};

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// How long a delivery may wait for a pool slot before it is dropped.
pub const DELIVERY_SLOT_WAIT: Duration = Duration::from_secs(1);

#[derive(Clone)]
struct CachedSink {
    id: i64,
    sink: Arc<dyn Sink>,
    timeout: Duration,
}

struct SinkCache {
    loaded_at: Instant,
    sinks: Arc<Vec<CachedSink>>,
}

/// Result of handing one alert to the dispatcher.
pub struct Dispatched {
    /// The persisted id, if persistence succeeded.
    pub alert_id: Option<i64>,
    /// One handle per sink; a delivery that finds no pool slot ends without sending.
    pub deliveries: Vec<JoinHandle<()>>,
}

pub struct Dispatcher {
    repository: Arc<dyn Repository>,
    client: reqwest::Client,
    cache: RwLock<Option<SinkCache>>,
    cache_ttl: Duration,
    pool: Arc<Semaphore>,
    retry: RetryPolicy,
}

impl Dispatcher {
    pub fn new(repository: Arc<dyn Repository>, max_concurrent_deliveries: usize, cache_ttl: Duration) -> Self {
        Self {
            repository,
            client: reqwest::Client::new(),
            cache: RwLock::new(None),
            cache_ttl,
            pool: Arc::new(Semaphore::new(max_concurrent_deliveries.max(1))),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Forget the cached sink list; the next alert reloads it.
    pub async fn invalidate_sinks(&self) {
        *self.cache.write().await = None;
    }

    async fn sinks(&self) -> Arc<Vec<CachedSink>> {
        {
            let cache = self.cache.read().await;
            if let Some(c) = cache.as_ref() {
                if c.loaded_at.elapsed() < self.cache_ttl {
                    return c.sinks.clone();
                }
            }
        }

        let mut cache = self.cache.write().await;
        if let Some(c) = cache.as_ref() {
            if c.loaded_at.elapsed() < self.cache_ttl {
                return c.sinks.clone();
            }
        }

        let rows = match self.repository.list_sinks() {
            Ok(rows) => rows,
            Err(e) => {
                tracing::error!("Dispatcher: failed to list sinks: {}", e);
                // Stale list stays in use until a reload succeeds.
                return cache.as_ref().map(|c| c.sinks.clone()).unwrap_or_default();
            }
        };

        let sinks: Vec<CachedSink> = rows
            .iter()
            .filter_map(|row| match build_sink(row, &self.client) {
                Ok(sink) => Some(CachedSink {
                    id: row.id,
                    sink,
                    timeout: delivery_timeout(&row.config),
                }),
                Err(e) => {
                    tracing::warn!("Dispatcher: skipping sink {}: {}", row.id, e);
                    None
                }
            })
            .collect();

        let sinks = Arc::new(sinks);
        *cache = Some(SinkCache {
            loaded_at: Instant::now(),
            sinks: sinks.clone(),
        });
        sinks
    }

    /// Persist an alert and schedule one delivery per sink.
    pub async fn dispatch(&self, mut alert: Alert) -> Dispatched {
        let alert_id = match self.repository.append_alert(&alert) {
            Ok(id) => {
                alert.id = id;
                Some(id)
            }
            Err(e) => {
                tracing::error!("Dispatcher: failed to persist alert for target {}: {}", alert.target_id, e);
                None
            }
        };

        let alert = Arc::new(alert);
        let mut deliveries = Vec::new();

        // Each delivery waits for its own pool slot so the caller never blocks on it.
        for cached in self.sinks().await.iter() {
            let alert = alert.clone();
            let cached = cached.clone();
            let pool = self.pool.clone();
            let retry = self.retry;
            deliveries.push(tokio::spawn(async move {
                let _permit = match tokio::time::timeout(DELIVERY_SLOT_WAIT, pool.acquire_owned()).await {
                    Ok(Ok(permit)) => permit,
                    Ok(Err(_)) => return,
                    Err(_) => {
                        tracing::warn!(
                            "Dispatcher: delivery pool saturated, dropping delivery of alert {} to sink {}",
                            alert.id,
                            cached.id
                        );
                        return;
                    }
                };
                deliver_with_retry(&cached, &alert, retry).await;
            }));
        }

        Dispatched { alert_id, deliveries }
    }
}

async fn deliver_with_retry(cached: &CachedSink, alert: &Alert, retry: RetryPolicy) {
    let mut attempt = 1;
    loop {
        let result = match tokio::time::timeout(cached.timeout, cached.sink.deliver(alert, cached.timeout)).await {
            Ok(result) => result,
            Err(_) => Err(SinkError::Timeout(cached.timeout)),
        };

        match result {
            Ok(()) => {
                tracing::debug!(
                    "Dispatcher: alert {} delivered to {} sink {} (attempt {})",
                    alert.id,
                    cached.sink.kind().as_str(),
                    cached.id,
                    attempt
                );
                return;
            }
            Err(e) if retry.should_retry(attempt) => {
                let delay = retry.delay(attempt);
                tracing::warn!(
                    "Dispatcher: delivery of alert {} to sink {} failed (attempt {}): {}; retrying in {:?}",
                    alert.id,
                    cached.id,
                    attempt,
                    e,
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                tracing::error!(
                    "Dispatcher: giving up on alert {} for sink {} after {} attempts: {}",
                    alert.id,
                    cached.id,
                    attempt,
                    e
                );
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{AlertStatus, MemoryStore, NotificationSink, SinkKind, SourceKind};
    use axum::{extract::State, http::StatusCode, routing::post, Router};
    use chrono::Utc;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn alert() -> Alert {
        Alert {
            id: 0,
            source_kind: SourceKind::Service,
            target_id: 1,
            metric: "service_status".to_string(),
            threshold: "up".to_string(),
            current_value: "down".to_string(),
            status: AlertStatus::Triggered,
            triggered_at: Utc::now(),
            resolved_at: None,
            message: "svc is down".to_string(),
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            base: Duration::from_millis(10),
            ..RetryPolicy::default()
        }
    }

    async fn counting_server(status: StatusCode) -> (String, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let router = Router::new()
            .route(
                "/hook",
                post(move |State(hits): State<Arc<AtomicUsize>>| async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    status
                }),
            )
            .with_state(hits.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        (format!("http://{}/hook", addr), hits)
    }

    fn webhook(id: i64, url: &str) -> NotificationSink {
        NotificationSink {
            id,
            kind: SinkKind::Webhook,
            config: json!({ "url": url }),
        }
    }

    #[tokio::test]
    async fn test_fan_out_with_one_failing_sink() {
        let (url_a, hits_a) = counting_server(StatusCode::OK).await;
        let (url_b, hits_b) = counting_server(StatusCode::INTERNAL_SERVER_ERROR).await;

        let store = Arc::new(MemoryStore::new());
        store.set_sinks(vec![webhook(1, &url_a), webhook(2, &url_b)]);
        let dispatcher = Dispatcher::new(store.clone(), 4, Duration::from_secs(30)).with_retry(fast_retry());

        let dispatched = dispatcher.dispatch(alert()).await;
        assert!(dispatched.alert_id.is_some());
        assert_eq!(dispatched.deliveries.len(), 2);
        for handle in dispatched.deliveries {
            handle.await.unwrap();
        }

        assert_eq!(hits_a.load(Ordering::SeqCst), 1);
        assert_eq!(hits_b.load(Ordering::SeqCst), 3);
        assert_eq!(store.alerts().len(), 1);
    }

    #[tokio::test]
    async fn test_persistence_failure_still_delivers() {
        let (url, hits) = counting_server(StatusCode::OK).await;
        let store = Arc::new(MemoryStore::new());
        store.set_sinks(vec![webhook(1, &url)]);
        store.set_fail_appends(true);
        let dispatcher = Dispatcher::new(store.clone(), 4, Duration::from_secs(30));

        let dispatched = dispatcher.dispatch(alert()).await;
        assert!(dispatched.alert_id.is_none());
        for handle in dispatched.deliveries {
            handle.await.unwrap();
        }
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_sink_cache_and_invalidation() {
        let (url, hits) = counting_server(StatusCode::OK).await;
        let store = Arc::new(MemoryStore::new());
        let dispatcher = Dispatcher::new(store.clone(), 4, Duration::from_secs(30));

        // Empty list gets cached.
        assert!(dispatcher.dispatch(alert()).await.deliveries.is_empty());
        store.set_sinks(vec![webhook(1, &url)]);
        assert!(dispatcher.dispatch(alert()).await.deliveries.is_empty());

        dispatcher.invalidate_sinks().await;
        let dispatched = dispatcher.dispatch(alert()).await;
        assert_eq!(dispatched.deliveries.len(), 1);
        for handle in dispatched.deliveries {
            handle.await.unwrap();
        }
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalid_sink_config_is_skipped() {
        let store = Arc::new(MemoryStore::new());
        store.set_sinks(vec![NotificationSink {
            id: 9,
            kind: SinkKind::Telegram,
            config: json!({ "chat_id": "1" }),
        }]);
        let dispatcher = Dispatcher::new(store.clone(), 4, Duration::from_secs(30));
        let dispatched = dispatcher.dispatch(alert()).await;
        assert!(dispatched.deliveries.is_empty());
        assert_eq!(store.alerts().len(), 1);
    }

    /// Accepts connections and never answers.
    async fn hung_server() -> (String, JoinHandle<()>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });
        (format!("http://{}/hook", addr), handle)
    }

    #[tokio::test]
    async fn test_saturated_delivery_pool_drops_after_slot_wait() {
        let (hung_url, server) = hung_server().await;
        let (url, hits) = counting_server(StatusCode::OK).await;

        let store = Arc::new(MemoryStore::new());
        store.set_sinks(vec![
            NotificationSink {
                id: 1,
                kind: SinkKind::Webhook,
                config: json!({ "url": hung_url, "timeout_secs": 30 }),
            },
            webhook(2, &url),
        ]);
        let dispatcher = Dispatcher::new(store.clone(), 1, Duration::from_secs(30));

        let started = std::time::Instant::now();
        let mut dispatched = dispatcher.dispatch(alert()).await;
        assert!(started.elapsed() < Duration::from_millis(500), "dispatch blocked on the pool");
        assert_eq!(dispatched.deliveries.len(), 2);

        let dropped = dispatched.deliveries.pop().unwrap();
        dropped.await.unwrap();
        let waited = started.elapsed();
        assert!(waited >= Duration::from_millis(900), "gave up after {:?}", waited);
        assert!(waited < Duration::from_secs(3), "gave up after {:?}", waited);
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        for handle in dispatched.deliveries {
            handle.abort();
        }
        server.abort();
    }
}
