//! Endpoint handlers, independent of the socket layer.
//!
//! | route                          | reply                                   |
//! |--------------------------------|-----------------------------------------|
//! | `GET /grid[?page=P&limit=L]`   | JSON array of cell records              |
//! | `GET /api/pixels`              | alias of `/grid`                        |
//! | `POST /claim`                  | [`ClaimResponse`]                       |

use serde::{Deserialize, Serialize};

use crate::claim::{ClaimError, ClaimReceipt, ClaimRequest, ClaimService};
use crate::grid::{Cell, Coord};
use crate::store::{GridStore, StoreError};

/// Default page size when only `page` is given.
pub const DEFAULT_PAGE_LIMIT: usize = 10_000;
pub const MAX_PAGE_LIMIT: usize = 100_000;
/// Storage failures never carry cell-level detail back to the caller.
pub const STORAGE_RETRY_MESSAGE: &str = "storage unavailable, try again";

// ============================================================================
// RESPONSE SHAPES
// ============================================================================

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ClaimResponse {
    Ok,
    Conflict { cells: Vec<Coord> },
    Invalid { reason: String },
    Error { message: String },
}

impl ClaimResponse {
    pub fn http_status(&self) -> u16 {
        match self {
            ClaimResponse::Ok => 200,
            ClaimResponse::Conflict { .. } => 409,
            ClaimResponse::Invalid { .. } => 400,
            ClaimResponse::Error { .. } => 503,
        }
    }
}

impl From<Result<ClaimReceipt, ClaimError>> for ClaimResponse {
    fn from(result: Result<ClaimReceipt, ClaimError>) -> Self {
        match result {
            Ok(_) => ClaimResponse::Ok,
            Err(ClaimError::Conflict { cells }) => ClaimResponse::Conflict { cells },
            Err(ClaimError::Invalid { reason }) => ClaimResponse::Invalid { reason },
            Err(ClaimError::Storage(_)) => ClaimResponse::Error {
                message: STORAGE_RETRY_MESSAGE.to_string(),
            },
        }
    }
}

// ============================================================================
// REQUESTS
// ============================================================================

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GridQuery {
    pub page: Option<usize>,
    pub limit: Option<usize>,
}

impl GridQuery {
    /// Parse `page=..&limit=..`; unknown keys are ignored.
    pub fn parse(query: &str) -> Result<Self, String> {
        let mut q = GridQuery::default();
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, val) = pair.split_once('=').unwrap_or((pair, ""));
            let number = || {
                val.parse::<usize>()
                    .map_err(|_| format!("'{}' must be a non-negative integer", key))
            };
            match key {
                "page" => q.page = Some(number()?),
                "limit" => q.limit = Some(number()?),
                _ => {}
            }
        }
        if q.limit == Some(0) || q.limit.is_some_and(|l| l > MAX_PAGE_LIMIT) {
            return Err(format!("'limit' must be between 1 and {}", MAX_PAGE_LIMIT));
        }
        Ok(q)
    }

    /// `(offset, limit)` window, or `None` for the whole grid.
    pub fn window(&self) -> Option<(usize, usize)> {
        match (self.page, self.limit) {
            (None, None) => None,
            (page, limit) => {
                let limit = limit.unwrap_or(DEFAULT_PAGE_LIMIT);
                Some((page.unwrap_or(0).saturating_mul(limit), limit))
            }
        }
    }
}

pub fn get_grid(store: &dyn GridStore, query: &GridQuery) -> Result<Vec<Cell>, StoreError> {
    match query.window() {
        Some((offset, limit)) => store.get_page(offset, limit),
        None => store.get_all(),
    }
}

pub fn post_claim(service: &ClaimService, body: &[u8]) -> ClaimResponse {
    match serde_json::from_slice::<ClaimRequest>(body) {
        Ok(request) => service.claim(&request).into(),
        Err(e) => ClaimResponse::Invalid { reason: format!("malformed claim body: {}", e) },
    }
}

// ============================================================================
// ROUTING
// ============================================================================

pub struct ApiRequest<'a> {
    pub method: &'a str,
    pub path: &'a str,
    pub query: Option<&'a str>,
    pub body: &'a [u8],
}

#[derive(Debug)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl ApiResponse {
    fn json<T: Serialize>(status: u16, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => Self { status, body },
            Err(e) => {
                log::error!("response serialization failed: {}", e);
                Self::error(500, "internal error")
            }
        }
    }

    fn error(status: u16, message: &str) -> Self {
        let reply = ClaimResponse::Error { message: message.to_string() };
        Self {
            status,
            body: serde_json::to_vec(&reply).unwrap_or_default(),
        }
    }
}

pub fn handle(service: &ClaimService, req: &ApiRequest<'_>) -> ApiResponse {
    match (req.method, req.path) {
        ("GET", "/grid" | "/api/pixels") => {
            let query = match GridQuery::parse(req.query.unwrap_or("")) {
                Ok(q) => q,
                Err(reason) => return ApiResponse::json(400, &ClaimResponse::Invalid { reason }),
            };
            match get_grid(service.store(), &query) {
                Ok(cells) => ApiResponse::json(200, &cells),
                Err(e) => {
                    log::error!("grid read failed: {}", e);
                    ApiResponse::error(503, STORAGE_RETRY_MESSAGE)
                }
            }
        }
        ("POST", "/claim") => {
            let reply = post_claim(service, req.body);
            ApiResponse::json(reply.http_status(), &reply)
        }
        (_, "/grid" | "/api/pixels" | "/claim") => ApiResponse::error(405, "method not allowed"),
        _ => ApiResponse::error(404, "not found"),
    }
}
