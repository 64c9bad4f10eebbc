//! Batch uploader: serializes queued records and posts them to the ingest
//! endpoint.
//!
//! The queue is drained *before* the POST begins, so location fixes arriving
//! mid-upload land in a fresh queue and are neither blocked by the network
//! call nor lost from the in-flight batch. On any failure (transport error,
//! timeout, non-2xx status) the drained batch is re-added to the queue
//! exactly once and retried on the next cycle.
//!
//! The HTTP seam is the `Postable` trait so tests can swap the real reqwest
//! client for a scripted fake.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::{debug, error, warn};

use crate::config::UPLOAD_TIMEOUT_SECS;
use crate::queue::RecordQueue;
use crate::types::LocationRecord;

/// Field name the batch is keyed by in the request body.
const LOCATIONS_KEY: &str = "locations";

/// Upload errors. Never surfaced to the host synchronously; handled by
/// requeue and logging.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server returned status {0}")]
    Status(reqwest::StatusCode),
    #[error("invalid header: {0}")]
    Header(String),
}

/// Async JSON POST seam.
#[async_trait]
pub trait Postable: Send + Sync {
    async fn post_json(&self, body: &serde_json::Value) -> Result<(), UploadError>;
}

/// reqwest-backed poster with the configured URL, headers, and a bounded
/// timeout. A timed-out request is treated like any other network failure.
pub struct HttpPoster {
    http: reqwest::Client,
    url: String,
    headers: HeaderMap,
}

impl HttpPoster {
    pub fn new(url: &str, headers: &[(String, String)]) -> Result<Self, UploadError> {
        let mut header_map = HeaderMap::new();
        for (name, value) in headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| UploadError::Header(format!("{name}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| UploadError::Header(e.to_string()))?;
            header_map.insert(name, value);
        }

        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(UPLOAD_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            http,
            url: url.to_string(),
            headers: header_map,
        })
    }
}

#[async_trait]
impl Postable for HttpPoster {
    async fn post_json(&self, body: &serde_json::Value) -> Result<(), UploadError> {
        let resp = self
            .http
            .post(&self.url)
            .headers(self.headers.clone())
            .json(body)
            .send()
            .await?;

        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(UploadError::Status(status))
        }
    }
}

/// OS-level "keep running in background" lease wrapped around each upload
/// attempt. Acquired before the request, released on both the success and
/// failure paths. The default implementation does nothing; mobile hosts
/// plug in their platform's background-task API.
pub trait BackgroundLease: Send + Sync {
    fn acquire(&self);
    fn release(&self);
}

/// Lease for hosts without background-execution limits.
pub struct NoopLease;

impl BackgroundLease for NoopLease {
    fn acquire(&self) {}
    fn release(&self) {}
}

/// What happened to one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcome {
    /// Empty input; no HTTP call was made and the lease was not touched.
    Skipped,
    /// The server accepted the batch.
    Delivered(usize),
    /// The attempt failed and the batch was re-added to the queue.
    Requeued(usize),
}

pub struct LocationUploader {
    poster: Arc<dyn Postable>,
    queue: Arc<dyn RecordQueue<LocationRecord>>,
    lease: Arc<dyn BackgroundLease>,
}

impl LocationUploader {
    pub fn new(
        poster: Arc<dyn Postable>,
        queue: Arc<dyn RecordQueue<LocationRecord>>,
        lease: Arc<dyn BackgroundLease>,
    ) -> Self {
        Self {
            poster,
            queue,
            lease,
        }
    }

    /// Post one batch of already-drained records.
    ///
    /// The caller removed these records from the queue before calling; on
    /// failure they are re-added here, exactly once, so the next cycle
    /// retries them.
    pub async fn post_locations(&self, records: Vec<LocationRecord>) -> UploadOutcome {
        if records.is_empty() {
            return UploadOutcome::Skipped;
        }

        let count = records.len();
        let body = serde_json::json!({
            (LOCATIONS_KEY): records.iter().map(LocationRecord::wire_json).collect::<Vec<_>>(),
        });

        self.lease.acquire();
        let result = self.poster.post_json(&body).await;
        self.lease.release();

        match result {
            Ok(()) => {
                debug!(count, "location batch delivered");
                UploadOutcome::Delivered(count)
            }
            Err(e) => {
                warn!(count, error = %e, "upload failed, requeuing batch");
                if let Err(requeue_err) = self.queue.add_all(&records) {
                    error!(count, error = %requeue_err, "could not requeue batch after failed upload");
                }
                UploadOutcome::Requeued(count)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CollectingFields;
    use crate::queue::MemoryQueue;
    use crate::types::{AdvertisingInfo, Fix, LocationContext};
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn make_record(seq: i64) -> LocationRecord {
        let fix = Fix {
            latitude: 51.5,
            longitude: -0.12,
            horizontal_accuracy: 8.0,
            vertical_accuracy: 3.0,
            altitude: 30.0,
            course: None,
            speed: None,
            timestamp: Utc.timestamp_opt(1_700_000_000 + seq, 0).unwrap(),
        };
        LocationRecord::from_fix(
            &fix,
            AdvertisingInfo::new("uploader-test", true),
            None,
            &CollectingFields::default(),
            LocationContext::Passive,
        )
    }

    /// Scripted poster: fails or succeeds, recording every body it sees.
    struct FakePoster {
        fail: bool,
        bodies: Mutex<Vec<serde_json::Value>>,
    }

    impl FakePoster {
        fn new(fail: bool) -> Self {
            Self {
                fail,
                bodies: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> usize {
            self.bodies
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .len()
        }
    }

    #[async_trait]
    impl Postable for FakePoster {
        async fn post_json(&self, body: &serde_json::Value) -> Result<(), UploadError> {
            self.bodies
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .push(body.clone());
            if self.fail {
                Err(UploadError::Status(
                    reqwest::StatusCode::INTERNAL_SERVER_ERROR,
                ))
            } else {
                Ok(())
            }
        }
    }

    /// Lease that counts acquire/release so tests can assert balance.
    #[derive(Default)]
    struct CountingLease {
        acquired: AtomicUsize,
        released: AtomicUsize,
    }

    impl BackgroundLease for CountingLease {
        fn acquire(&self) {
            self.acquired.fetch_add(1, Ordering::SeqCst);
        }
        fn release(&self) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn uploader(
        fail: bool,
    ) -> (
        LocationUploader,
        Arc<FakePoster>,
        Arc<MemoryQueue<LocationRecord>>,
        Arc<CountingLease>,
    ) {
        let poster = Arc::new(FakePoster::new(fail));
        let queue = Arc::new(MemoryQueue::new());
        let lease = Arc::new(CountingLease::default());
        let uploader = LocationUploader::new(
            Arc::clone(&poster) as Arc<dyn Postable>,
            Arc::clone(&queue) as Arc<dyn RecordQueue<LocationRecord>>,
            Arc::clone(&lease) as Arc<dyn BackgroundLease>,
        );
        (uploader, poster, queue, lease)
    }

    #[tokio::test]
    async fn empty_batch_is_a_full_no_op() {
        let (uploader, poster, queue, lease) = uploader(false);

        let outcome = uploader.post_locations(Vec::new()).await;

        assert_eq!(outcome, UploadOutcome::Skipped);
        assert_eq!(poster.calls(), 0, "no HTTP call for an empty batch");
        assert_eq!(queue.count(), 0);
        assert_eq!(lease.acquired.load(Ordering::SeqCst), 0);
        assert_eq!(lease.released.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn success_leaves_queue_untouched() {
        let (uploader, poster, queue, lease) = uploader(false);

        let outcome = uploader
            .post_locations(vec![make_record(0), make_record(1)])
            .await;

        assert_eq!(outcome, UploadOutcome::Delivered(2));
        assert_eq!(poster.calls(), 1);
        assert_eq!(queue.count(), 0, "delivered records are not re-added");
        assert_eq!(lease.acquired.load(Ordering::SeqCst), 1);
        assert_eq!(lease.released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failure_requeues_batch_exactly_once() {
        let (uploader, poster, queue, lease) = uploader(true);
        let batch = vec![make_record(0), make_record(1), make_record(2)];

        let outcome = uploader.post_locations(batch.clone()).await;

        assert_eq!(outcome, UploadOutcome::Requeued(3));
        assert_eq!(poster.calls(), 1, "one attempt per batch");
        assert_eq!(queue.count(), 3, "failed batch went back into the queue");
        assert_eq!(queue.pop_all(), batch);
        // Lease is released on the failure path too.
        assert_eq!(lease.acquired.load(Ordering::SeqCst), 1);
        assert_eq!(lease.released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn body_is_keyed_by_locations_field() {
        let (uploader, poster, _queue, _lease) = uploader(false);

        uploader.post_locations(vec![make_record(0)]).await;

        let bodies = poster
            .bodies
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let body = &bodies[0];
        let locations = body["locations"].as_array().unwrap();
        assert_eq!(locations.len(), 1);
        assert_eq!(locations[0]["ad_id"], "uploader-test");
        assert_eq!(locations[0]["ad_opt_out"], true);
    }
}
