//! Client-side checkout: one claim in flight at a time, resolved once.
//!
//! [`CheckoutSession::submit`] hands the request to a background thread and
//! returns immediately; the caller polls (or waits) for the single
//! [`ClaimResponse`]. While a claim is unresolved further submits are
//! refused, so a double click can never send the same selection twice.
//! Nothing is retried: a failed claim must be re-selected against a fresh
//! grid first.

use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, TryRecvError};
use std::thread;
use std::time::Duration;

use thiserror::Error;

use crate::api::ClaimResponse;
use crate::claim::{ClaimRequest, ClaimService};
use crate::grid::Cell;

/// Transport used to deliver a claim. Must always produce a response;
/// transport failures are reported as [`ClaimResponse::Error`].
pub trait ClaimClient: Send + Sync {
    fn submit(&self, request: &ClaimRequest) -> ClaimResponse;
}

// ============================================================================
// TRANSPORTS
// ============================================================================

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Http(#[from] ureq::Error),
    #[error("server answered HTTP {0}")]
    Status(u16),
}

const MAX_GRID_BODY: u64 = 512 * 1024 * 1024;

/// Talks to a running grid server over HTTP.
pub struct HttpClaimClient {
    agent: ureq::Agent,
    base_url: String,
}

impl HttpClaimClient {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        // Conflict and invalid replies arrive as 4xx with a well-formed body,
        // so statuses are inspected here rather than raised as errors.
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .build();
        Self {
            agent: ureq::Agent::new_with_config(config),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Fetch every cell (`GET /grid`).
    pub fn fetch_grid(&self) -> Result<Vec<Cell>, TransportError> {
        let mut response = self.agent.get(&format!("{}/grid", self.base_url)).call()?;
        let status = response.status().as_u16();
        if status != 200 {
            return Err(TransportError::Status(status));
        }
        // A full grid is far larger than ureq's default body cap.
        let cells = response.body_mut().with_config().limit(MAX_GRID_BODY).read_json()?;
        Ok(cells)
    }
}

impl ClaimClient for HttpClaimClient {
    fn submit(&self, request: &ClaimRequest) -> ClaimResponse {
        let url = format!("{}/claim", self.base_url);
        let mut response = match self.agent.post(&url).send_json(request) {
            Ok(r) => r,
            Err(e) => return ClaimResponse::Error { message: format!("transport failure: {}", e) },
        };
        let status = response.status();
        response
            .body_mut()
            .read_json()
            .unwrap_or_else(|e| ClaimResponse::Error {
                message: format!("unreadable reply (HTTP {}): {}", status, e),
            })
    }
}

/// Calls a [`ClaimService`] in the same process.
pub struct LocalClaimClient {
    service: Arc<ClaimService>,
}

impl LocalClaimClient {
    pub fn new(service: Arc<ClaimService>) -> Self {
        Self { service }
    }
}

impl ClaimClient for LocalClaimClient {
    fn submit(&self, request: &ClaimRequest) -> ClaimResponse {
        self.service.claim(request).into()
    }
}

// ============================================================================
// SESSION
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum CheckoutError {
    #[error("a checkout is already in flight")]
    InFlight,
}

pub struct CheckoutSession {
    client: Arc<dyn ClaimClient>,
    pending: Option<Receiver<ClaimResponse>>,
}

impl CheckoutSession {
    pub fn new(client: Arc<dyn ClaimClient>) -> Self {
        Self { client, pending: None }
    }

    pub fn is_in_flight(&self) -> bool {
        self.pending.is_some()
    }

    /// Start the claim. Refused while a previous one is unresolved.
    pub fn submit(&mut self, request: ClaimRequest) -> Result<(), CheckoutError> {
        if self.pending.is_some() {
            return Err(CheckoutError::InFlight);
        }
        let (tx, rx) = mpsc::channel();
        let client = Arc::clone(&self.client);
        log::debug!("checkout: submitting {} cells", request.cells.len());
        thread::spawn(move || {
            let response = client.submit(&request);
            let _ = tx.send(response);
        });
        self.pending = Some(rx);
        Ok(())
    }

    /// Non-blocking. Yields the outcome exactly once, then re-enables submit.
    pub fn poll(&mut self) -> Option<ClaimResponse> {
        let rx = self.pending.as_ref()?;
        let outcome = match rx.try_recv() {
            Ok(response) => response,
            Err(TryRecvError::Empty) => return None,
            Err(TryRecvError::Disconnected) => worker_lost(),
        };
        self.pending = None;
        Some(outcome)
    }

    /// Block up to `timeout` for the outcome. On timeout the claim stays in
    /// flight; it cannot be cancelled.
    pub fn wait(&mut self, timeout: Duration) -> Option<ClaimResponse> {
        let rx = self.pending.as_ref()?;
        let outcome = match rx.recv_timeout(timeout) {
            Ok(response) => response,
            Err(RecvTimeoutError::Timeout) => return None,
            Err(RecvTimeoutError::Disconnected) => worker_lost(),
        };
        self.pending = None;
        Some(outcome)
    }
}

fn worker_lost() -> ClaimResponse {
    log::error!("checkout worker exited without a reply");
    ClaimResponse::Error { message: "checkout worker stopped".to_string() }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::mpsc::Sender;

    use super::*;
    use crate::claim::ClaimCell;
    use crate::grid::Coord;
    use crate::store::MemoryGridStore;

    /// Holds every submit until the test releases it.
    struct GatedClient {
        gate: Mutex<Receiver<()>>,
        calls: Mutex<usize>,
    }

    impl ClaimClient for GatedClient {
        fn submit(&self, _request: &ClaimRequest) -> ClaimResponse {
            *self.calls.lock().unwrap() += 1;
            let _ = self.gate.lock().unwrap().recv();
            ClaimResponse::Ok
        }
    }

    fn gated() -> (Arc<GatedClient>, Sender<()>) {
        let (tx, rx) = mpsc::channel();
        let client = GatedClient { gate: Mutex::new(rx), calls: Mutex::new(0) };
        (Arc::new(client), tx)
    }

    fn one_cell(owner: &str) -> ClaimRequest {
        ClaimRequest {
            owner_id: owner.into(),
            cells: vec![ClaimCell { x: 4, y: 2, color: "rgba(0,0,0,1)".into() }],
            image_url: None,
            link_url: None,
        }
    }

    #[test]
    fn second_submit_is_refused_until_settled() {
        let (client, release) = gated();
        let mut session = CheckoutSession::new(client.clone());

        session.submit(one_cell("a")).unwrap();
        assert_eq!(session.submit(one_cell("a")), Err(CheckoutError::InFlight));
        assert!(session.is_in_flight());
        assert_eq!(session.poll(), None);

        release.send(()).unwrap();
        assert_eq!(session.wait(Duration::from_secs(5)), Some(ClaimResponse::Ok));
        // Resolved exactly once.
        assert_eq!(session.poll(), None);
        assert!(!session.is_in_flight());
        assert_eq!(*client.calls.lock().unwrap(), 1);

        session.submit(one_cell("a")).unwrap();
        release.send(()).unwrap();
        assert_eq!(session.wait(Duration::from_secs(5)), Some(ClaimResponse::Ok));
    }

    #[test]
    fn wait_timeout_keeps_claim_in_flight() {
        let (client, release) = gated();
        let mut session = CheckoutSession::new(client);
        session.submit(one_cell("a")).unwrap();
        assert_eq!(session.wait(Duration::from_millis(20)), None);
        assert!(session.is_in_flight());
        release.send(()).unwrap();
        assert!(session.wait(Duration::from_secs(5)).is_some());
    }

    #[test]
    fn local_client_reports_conflicts() {
        let service = Arc::new(ClaimService::new(Arc::new(MemoryGridStore::new())));
        let mut session = CheckoutSession::new(Arc::new(LocalClaimClient::new(service)));

        session.submit(one_cell("a")).unwrap();
        assert_eq!(session.wait(Duration::from_secs(5)), Some(ClaimResponse::Ok));

        session.submit(one_cell("b")).unwrap();
        assert_eq!(
            session.wait(Duration::from_secs(5)),
            Some(ClaimResponse::Conflict { cells: vec![Coord::new(4, 2)] })
        );
    }

    #[test]
    fn idle_session_has_nothing_to_report() {
        let (client, _release) = gated();
        let mut session = CheckoutSession::new(client);
        assert_eq!(session.poll(), None);
        assert_eq!(session.wait(Duration::from_millis(1)), None);
    }
}
