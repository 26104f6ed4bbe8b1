//! Off-thread parsing with request ids, timeouts and cancellation
//!
//! Requests run on tokio's blocking pool, at most `max_concurrency` at a
//! time. Responses are delivered in completion order and carry the request
//! id, either the caller's own ([`ParseService::submit_as`]) or one minted by
//! [`ParseService::submit`], so callers match them up even when they finish
//! out of order. The timeout runs from submission, queueing included; a
//! request that exceeds it is cancelled and reported as [`Error::Timeout`].
//! It is never retried.

use crate::config::WorkerConfig;
use crate::facade::Bytescope;
use crate::viewport::RangeResult;
use crate::{Error, Result};
use bytescope_engine::CancelToken;
use bytescope_ir::Document;
use bytescope_stream::ByteSource;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Semaphore, mpsc};
use tokio::time::Instant;
use tracing::{debug, trace, warn};

/// Caller-visible identity of a submitted request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Work for the service
#[derive(Clone)]
pub enum ParseRequest {
    Full {
        data: Arc<[u8]>,
        format: Option<String>,
    },
    Range {
        source: Arc<dyn ByteSource>,
        start: usize,
        end: usize,
        format: Option<String>,
    },
}

impl ParseRequest {
    pub fn full(data: impl Into<Arc<[u8]>>, format: Option<&str>) -> Self {
        Self::Full {
            data: data.into(),
            format: format.map(str::to_string),
        }
    }

    pub fn range(data: impl Into<Arc<[u8]>>, start: usize, end: usize, format: Option<&str>) -> Self {
        let data: Arc<[u8]> = data.into();
        Self::range_of(Arc::new(data), start, end, format)
    }

    /// Range request over any byte source, such as a paged file loader
    pub fn range_of(
        source: Arc<dyn ByteSource>,
        start: usize,
        end: usize,
        format: Option<&str>,
    ) -> Self {
        Self::Range {
            source,
            start,
            end,
            format: format.map(str::to_string),
        }
    }
}

impl fmt::Debug for ParseRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseRequest::Full { data, format } => f
                .debug_struct("Full")
                .field("len", &data.len())
                .field("format", format)
                .finish(),
            ParseRequest::Range {
                source,
                start,
                end,
                format,
            } => f
                .debug_struct("Range")
                .field("len", &source.len())
                .field("start", start)
                .field("end", end)
                .field("format", format)
                .finish(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum ParseOutput {
    Document(Arc<Document>),
    Range(Arc<RangeResult>),
}

impl ParseOutput {
    pub fn document(&self) -> Option<&Arc<Document>> {
        match self {
            ParseOutput::Document(document) => Some(document),
            ParseOutput::Range(_) => None,
        }
    }

    pub fn range(&self) -> Option<&Arc<RangeResult>> {
        match self {
            ParseOutput::Range(range) => Some(range),
            ParseOutput::Document(_) => None,
        }
    }
}

/// Outcome of one submitted request
#[derive(Debug)]
pub struct ParseResponse {
    pub id: RequestId,
    pub result: Result<ParseOutput>,
}

/// A registered request: its id, cancel flag and deadline
struct Ticket {
    id: RequestId,
    cancel: CancelToken,
    deadline: Instant,
}

struct ServiceInner {
    bytescope: Arc<Bytescope>,
    semaphore: Arc<Semaphore>,
    pending: DashMap<RequestId, CancelToken>,
    next_id: AtomicU64,
    timeout: Duration,
}

/// Bounded worker pool in front of a [`Bytescope`]
#[derive(Clone)]
pub struct ParseService {
    inner: Arc<ServiceInner>,
    responses: mpsc::UnboundedSender<ParseResponse>,
}

impl ParseService {
    /// A service and the receiver its responses arrive on
    pub fn new(
        bytescope: Arc<Bytescope>,
        config: &WorkerConfig,
    ) -> (Self, mpsc::UnboundedReceiver<ParseResponse>) {
        let (responses, receiver) = mpsc::unbounded_channel();
        let inner = ServiceInner {
            bytescope,
            semaphore: Arc::new(Semaphore::new(config.max_concurrency.max(1))),
            pending: DashMap::new(),
            next_id: AtomicU64::new(1),
            timeout: config.timeout(),
        };
        (
            Self {
                inner: Arc::new(inner),
                responses,
            },
            receiver,
        )
    }

    /// Queue a request; its response arrives on the receiver
    ///
    /// Must be called from within a tokio runtime.
    pub fn submit(&self, request: ParseRequest) -> RequestId {
        let ticket = self.inner.register();
        let id = ticket.id;
        self.dispatch(ticket, request);
        id
    }

    /// Queue a request under the caller's own id
    ///
    /// Fails with [`Error::DuplicateRequest`] while another request with the
    /// same id is pending. Must be called from within a tokio runtime.
    pub fn submit_as(&self, id: RequestId, request: ParseRequest) -> Result<()> {
        let ticket = self.inner.register_as(id)?;
        self.dispatch(ticket, request);
        Ok(())
    }

    /// Run one request and wait for its result
    pub async fn call(&self, request: ParseRequest) -> Result<ParseOutput> {
        let ticket = self.inner.register();
        self.inner.execute(ticket, request).await
    }

    fn dispatch(&self, ticket: Ticket, request: ParseRequest) {
        let inner = Arc::clone(&self.inner);
        let responses = self.responses.clone();

        tokio::spawn(async move {
            let id = ticket.id;
            let result = inner.execute(ticket, request).await;
            if responses.send(ParseResponse { id, result }).is_err() {
                debug!("Response for request {} dropped: receiver closed", id);
            }
        });
    }

    /// Signal a pending request to stop; `false` when it already finished
    pub fn cancel(&self, id: RequestId) -> bool {
        match self.inner.pending.get(&id) {
            Some(token) => {
                debug!("Cancelling request {}", id);
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Requests submitted and not yet answered
    pub fn pending(&self) -> usize {
        self.inner.pending.len()
    }

    pub fn bytescope(&self) -> &Arc<Bytescope> {
        &self.inner.bytescope
    }
}

impl fmt::Debug for ParseService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParseService")
            .field("pending", &self.inner.pending.len())
            .field("timeout", &self.inner.timeout)
            .finish_non_exhaustive()
    }
}

impl ServiceInner {
    fn register(&self) -> Ticket {
        loop {
            let id = RequestId(self.next_id.fetch_add(1, Ordering::Relaxed));
            // Skip ids a caller picked for itself
            if let Ok(ticket) = self.register_as(id) {
                return ticket;
            }
        }
    }

    fn register_as(&self, id: RequestId) -> Result<Ticket> {
        let cancel = CancelToken::new();
        let Entry::Vacant(slot) = self.pending.entry(id) else {
            return Err(Error::DuplicateRequest(id.0));
        };
        slot.insert(cancel.clone());
        trace!("Registered request {}", id);
        Ok(Ticket {
            id,
            cancel,
            deadline: Instant::now() + self.timeout,
        })
    }

    async fn execute(&self, ticket: Ticket, request: ParseRequest) -> Result<ParseOutput> {
        let Ticket {
            id,
            cancel,
            deadline,
        } = ticket;
        let result = match tokio::time::timeout_at(deadline, self.run(id, request, &cancel)).await {
            Ok(result) => result,
            Err(_) => {
                cancel.cancel();
                warn!("Request {} timed out after {:?}", id, self.timeout);
                Err(Error::Timeout {
                    id: id.0,
                    after_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
                })
            }
        };
        self.pending.remove(&id);
        result
    }

    async fn run(&self, id: RequestId, request: ParseRequest, cancel: &CancelToken) -> Result<ParseOutput> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|e| Error::worker(format!("semaphore closed: {e}")))?;
        if cancel.is_cancelled() {
            return Err(Error::Cancelled(id.0));
        }

        let bytescope = Arc::clone(&self.bytescope);
        let token = cancel.clone();
        // The permit stays with the blocking work, even after a timeout
        let task = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            match request {
                ParseRequest::Full { data, format } => Ok(ParseOutput::Document(
                    bytescope.parse_cancellable(&data, format.as_deref(), &token),
                )),
                ParseRequest::Range {
                    source,
                    start,
                    end,
                    format,
                } => bytescope
                    .parse_range_cancellable(source.as_ref(), start, end, format.as_deref(), &token)
                    .map(ParseOutput::Range),
            }
        });

        match task.await {
            Ok(_) if cancel.is_cancelled() => Err(Error::Cancelled(id.0)),
            Ok(result) => result,
            Err(join) => Err(Error::worker(join.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytescope_registry::{Category, FormatRegistry};

    const PAIRS: &str = "
meta:
  id: pairs
  endian: le
seq:
  - id: magic
    contents: PR
  - id: pairs
    type: u2
    repeat: eos
";

    fn service(config: &WorkerConfig) -> (ParseService, mpsc::UnboundedReceiver<ParseResponse>) {
        let registry = FormatRegistry::new();
        registry.register(PAIRS, Category::User).unwrap();
        ParseService::new(Arc::new(Bytescope::new(Arc::new(registry))), config)
    }

    fn sample() -> Vec<u8> {
        vec![b'P', b'R', 1, 0, 2, 0, 3, 0]
    }

    #[tokio::test]
    async fn test_call_round_trip() {
        let (service, _responses) = service(&WorkerConfig::default());
        let output = service.call(ParseRequest::full(sample(), None)).await.unwrap();
        let document = output.document().unwrap();
        assert_eq!(document.metadata.format_id.as_deref(), Some("pairs"));
        assert_eq!(service.pending(), 0);
    }

    #[tokio::test]
    async fn test_responses_carry_request_ids() {
        let (service, mut responses) = service(&WorkerConfig::default());
        let full = service.submit(ParseRequest::full(sample(), None));
        let range = service.submit(ParseRequest::range(sample(), 4, 6, Some("pairs")));
        assert_ne!(full, range);

        let mut seen = Vec::new();
        for _ in 0..2 {
            let response = responses.recv().await.unwrap();
            match response.result.unwrap() {
                ParseOutput::Document(_) => assert_eq!(response.id, full),
                ParseOutput::Range(result) => {
                    assert_eq!(response.id, range);
                    assert_eq!(result.nodes[0].children.len(), 1);
                }
            }
            seen.push(response.id);
        }
        seen.sort();
        assert_eq!(seen, vec![full, range]);
    }

    #[tokio::test]
    async fn test_cancel_before_start() {
        let (service, mut responses) = service(&WorkerConfig::default());
        let id = service.submit(ParseRequest::full(sample(), None));
        assert!(service.cancel(id));

        let response = responses.recv().await.unwrap();
        assert_eq!(response.id, id);
        assert!(matches!(response.result, Err(Error::Cancelled(n)) if n == id.0));
        assert!(!service.cancel(id));
    }

    #[tokio::test]
    async fn test_timeout_counts_time_spent_queued() {
        let config = WorkerConfig {
            max_concurrency: 1,
            timeout_ms: 20,
        };
        let (service, _responses) = service(&config);
        let busy = Arc::clone(&service.inner.semaphore).acquire_owned().await.unwrap();

        let result = service.call(ParseRequest::full(sample(), None)).await;
        assert!(matches!(result, Err(Error::Timeout { after_ms: 20, .. })));
        assert_eq!(service.pending(), 0);

        drop(busy);
        let output = service.call(ParseRequest::full(sample(), None)).await.unwrap();
        assert!(output.document().is_some());
    }

    #[tokio::test]
    async fn test_caller_supplied_ids() {
        let (service, mut responses) = service(&WorkerConfig::default());
        let busy = Arc::clone(&service.inner.semaphore)
            .acquire_many_owned(4)
            .await
            .unwrap();

        service.submit_as(RequestId(1), ParseRequest::full(sample(), None)).unwrap();
        assert!(matches!(
            service.submit_as(RequestId(1), ParseRequest::full(sample(), None)),
            Err(Error::DuplicateRequest(1))
        ));
        // minted ids step over the caller's
        let minted = service.submit(ParseRequest::full(sample(), None));
        assert_ne!(minted, RequestId(1));
        drop(busy);

        let mut seen = vec![
            responses.recv().await.unwrap().id,
            responses.recv().await.unwrap().id,
        ];
        seen.sort();
        assert_eq!(seen, vec![RequestId(1), minted]);
        assert_eq!(service.pending(), 0);
    }

    #[tokio::test]
    async fn test_unknown_range_format_is_an_error() {
        let (service, _responses) = service(&WorkerConfig::default());
        let result = service.call(ParseRequest::range(sample(), 0, 4, Some("bmp"))).await;
        assert!(matches!(result, Err(Error::Registry(_))));
    }
}
