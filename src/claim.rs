//! Atomic multi-cell ownership claims.
//!
//! A claim either moves every requested cell from unowned to owned, or
//! changes nothing. The check and the write run inside one
//! [`GridTxn`](crate::store::GridTxn); cells are visited in ascending
//! `(x, y)` order, and a rejected claim names every cell that was already
//! owned, not just the first one found.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::color;
use crate::grid::{Coord, TOTAL_CELLS};
use crate::store::{CellWrite, GridStore, StoreError};

/// Default per-claim cap: the whole grid.
pub const DEFAULT_MAX_CLAIM_CELLS: usize = TOTAL_CELLS;

// ============================================================================
// REQUEST
// ============================================================================

/// One requested cell as it arrives on the wire. Coordinates are kept
/// signed and wide so out-of-range input can be reported instead of
/// failing deserialization.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimCell {
    pub x: i64,
    pub y: i64,
    pub color: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimRequest {
    #[serde(rename = "ownerId")]
    pub owner_id: String,
    pub cells: Vec<ClaimCell>,
    #[serde(rename = "imageUrl", default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(rename = "linkUrl", default, skip_serializing_if = "Option::is_none")]
    pub link_url: Option<String>,
}

#[derive(Debug, Error)]
pub enum ClaimError {
    #[error("invalid claim: {reason}")]
    Invalid { reason: String },
    #[error("{} requested cell(s) already owned", cells.len())]
    Conflict { cells: Vec<Coord> },
    #[error("storage failure: {0}")]
    Storage(#[from] StoreError),
}

impl ClaimError {
    fn invalid(reason: impl Into<String>) -> Self {
        ClaimError::Invalid { reason: reason.into() }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClaimReceipt {
    pub request_id: Uuid,
    pub claimed: usize,
}

// ============================================================================
// SERVICE
// ============================================================================

/// The only writer of cell ownership.
pub struct ClaimService {
    store: Arc<dyn GridStore>,
    max_cells: usize,
}

impl ClaimService {
    pub fn new(store: Arc<dyn GridStore>) -> Self {
        Self { store, max_cells: DEFAULT_MAX_CLAIM_CELLS }
    }

    /// Cap the number of cells a single claim may carry.
    pub fn with_max_cells(mut self, max_cells: usize) -> Self {
        self.max_cells = max_cells.clamp(1, TOTAL_CELLS);
        self
    }

    pub fn store(&self) -> &dyn GridStore {
        self.store.as_ref()
    }

    pub fn claim(&self, request: &ClaimRequest) -> Result<ClaimReceipt, ClaimError> {
        let request_id = Uuid::new_v4();
        let result = self.run(request);
        match &result {
            Ok(claimed) => log::info!(
                "claim {}: owner '{}' took {} cells",
                request_id,
                request.owner_id,
                claimed
            ),
            Err(ClaimError::Conflict { cells }) => log::warn!(
                "claim {}: rejected, {} of {} cells already owned",
                request_id,
                cells.len(),
                request.cells.len()
            ),
            Err(ClaimError::Invalid { reason }) => {
                log::warn!("claim {}: rejected as invalid: {}", request_id, reason)
            }
            Err(ClaimError::Storage(e)) => log::error!("claim {}: storage failure: {}", request_id, e),
        }
        result.map(|claimed| ClaimReceipt { request_id, claimed })
    }

    fn run(&self, request: &ClaimRequest) -> Result<usize, ClaimError> {
        let writes = self.validate(request)?;
        let coords: Vec<Coord> = writes.iter().map(|w| w.coord).collect();

        let mut txn = self.store.begin(&coords)?;
        let current = txn.get_by_coords(&coords)?;
        let conflicts: Vec<Coord> = coords
            .iter()
            .filter(|c| current.get(c).is_some_and(|cell| cell.is_owned))
            .copied()
            .collect();
        if !conflicts.is_empty() {
            // Dropping the transaction rolls it back; nothing was written.
            return Err(ClaimError::Conflict { cells: conflicts });
        }

        txn.apply_claim(&writes)?;
        txn.commit()?;
        Ok(writes.len())
    }

    /// Turn a wire request into store writes sorted by coordinate, or say
    /// exactly what is wrong with it.
    fn validate(&self, request: &ClaimRequest) -> Result<Vec<CellWrite>, ClaimError> {
        let owner = request.owner_id.trim();
        if owner.is_empty() {
            return Err(ClaimError::invalid("ownerId must not be empty"));
        }
        if request.cells.is_empty() {
            return Err(ClaimError::invalid("claim contains no cells"));
        }
        if request.cells.len() > self.max_cells {
            return Err(ClaimError::invalid(format!(
                "claim of {} cells exceeds the limit of {}",
                request.cells.len(),
                self.max_cells
            )));
        }

        let image_url = non_blank(&request.image_url);
        let link_url = non_blank(&request.link_url);

        let mut writes = Vec::with_capacity(request.cells.len());
        for cell in &request.cells {
            let coord = Coord::checked(cell.x, cell.y).ok_or_else(|| {
                ClaimError::invalid(format!(
                    "cell ({}, {}) is outside the 1000x1000 grid",
                    cell.x, cell.y
                ))
            })?;
            let color = color::normalize(&cell.color).map_err(|e| {
                ClaimError::invalid(format!("cell {}: {}", coord, e))
            })?;
            writes.push(CellWrite {
                coord,
                color,
                owner: owner.to_string(),
                image_url: image_url.clone(),
                link_url: link_url.clone(),
            });
        }

        writes.sort_unstable_by_key(|w| w.coord);
        if let Some(pair) = writes.windows(2).find(|p| p[0].coord == p[1].coord) {
            return Err(ClaimError::invalid(format!("duplicate cell {}", pair[0].coord)));
        }
        Ok(writes)
    }
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::Cell;
    use crate::store::MemoryGridStore;

    fn service() -> ClaimService {
        ClaimService::new(Arc::new(MemoryGridStore::new()))
    }

    fn request(owner: &str, cells: &[(i64, i64)]) -> ClaimRequest {
        ClaimRequest {
            owner_id: owner.into(),
            cells: cells
                .iter()
                .map(|&(x, y)| ClaimCell { x, y, color: "rgba(255,0,0,1)".into() })
                .collect(),
            image_url: Some("https://img.example/a.png".into()),
            link_url: None,
        }
    }

    fn cell(service: &ClaimService, x: u16, y: u16) -> Cell {
        service.store().get_page(Coord::new(x, y).index(), 1).unwrap().remove(0)
    }

    #[test_log::test]
    fn successful_claim_stores_hex_and_metadata() {
        let svc = service();
        let receipt = svc.claim(&request("alice", &[(1, 2), (0, 0)])).unwrap();
        assert_eq!(receipt.claimed, 2);

        let c = cell(&svc, 1, 2);
        assert!(c.is_owned);
        assert_eq!(c.owner.as_deref(), Some("alice"));
        assert_eq!(c.color, "#ff0000");
        assert_eq!(c.image_url.as_deref(), Some("https://img.example/a.png"));
        assert!(cell(&svc, 0, 0).is_owned);
    }

    #[test_log::test]
    fn partial_overlap_changes_nothing_and_lists_every_owned_cell() {
        let svc = service();
        svc.claim(&request("alice", &[(5, 5), (5, 7)])).unwrap();

        let err = svc
            .claim(&request("bob", &[(5, 7), (4, 4), (5, 5), (6, 6)]))
            .unwrap_err();
        match err {
            ClaimError::Conflict { cells } => {
                assert_eq!(cells, vec![Coord::new(5, 5), Coord::new(5, 7)]);
            }
            other => panic!("expected conflict, got {other:?}"),
        }
        assert!(!cell(&svc, 4, 4).is_owned);
        assert!(!cell(&svc, 6, 6).is_owned);
        assert_eq!(cell(&svc, 5, 5).owner.as_deref(), Some("alice"));
    }

    #[test]
    fn malformed_color_rejects_whole_batch() {
        let svc = service();
        let mut req = request("alice", &[(0, 0), (0, 1)]);
        req.cells[1].color = "not-a-color".into();

        let err = svc.claim(&req).unwrap_err();
        assert!(matches!(err, ClaimError::Invalid { ref reason } if reason.contains("(0, 1)")));
        assert!(!cell(&svc, 0, 0).is_owned);
    }

    #[test]
    fn invalid_inputs_are_named() {
        let svc = service().with_max_cells(3);
        let cases = [
            (request("", &[(0, 0)]), "ownerId"),
            (request("a", &[]), "no cells"),
            (request("a", &[(1000, 0)]), "outside"),
            (request("a", &[(0, -1)]), "outside"),
            (request("a", &[(2, 2), (1, 1), (2, 2)]), "duplicate cell (2, 2)"),
            (request("a", &[(0, 0), (0, 1), (0, 2), (0, 3)]), "limit of 3"),
        ];
        for (req, needle) in cases {
            match svc.claim(&req) {
                Err(ClaimError::Invalid { reason }) => {
                    assert!(reason.contains(needle), "{reason:?} should mention {needle:?}")
                }
                other => panic!("expected invalid for {needle:?}, got {other:?}"),
            }
        }
    }

    #[test]
    fn blank_urls_are_stored_as_null() {
        let svc = service();
        let mut req = request("alice", &[(9, 9)]);
        req.image_url = Some("   ".into());
        req.link_url = Some(" https://x.example ".into());
        svc.claim(&req).unwrap();

        let c = cell(&svc, 9, 9);
        assert_eq!(c.image_url, None);
        assert_eq!(c.link_url.as_deref(), Some("https://x.example"));
    }

    #[test]
    fn wire_names_match_the_claim_endpoint() {
        let json = r##"{"ownerId":"o","cells":[{"x":1,"y":2,"color":"#fff"}],"imageUrl":"u"}"##;
        let req: ClaimRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.owner_id, "o");
        assert_eq!(req.cells[0], ClaimCell { x: 1, y: 2, color: "#fff".into() });
        assert_eq!(req.image_url.as_deref(), Some("u"));
        assert_eq!(req.link_url, None);
    }
}
