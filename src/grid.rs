//! Cell model and the client-side ownership snapshot.
//!
//! The grid is a fixed 1000×1000 square. Cells are addressed by [`Coord`],
//! whose ordering (`x` first, then `y`) is the one global order used for
//! reads, pagination and lock acquisition.

use serde::{Deserialize, Serialize};

use crate::color;

/// Cells per axis.
pub const GRID_SIZE: u16 = 1000;
/// Total number of cells (one persisted row each).
pub const TOTAL_CELLS: usize = GRID_SIZE as usize * GRID_SIZE as usize;
/// Color stored for cells nobody owns yet.
pub const UNOWNED_COLOR: &str = "gray";

// ============================================================================
// COORDINATES
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Coord {
    pub x: u16,
    pub y: u16,
}

impl Coord {
    pub const fn new(x: u16, y: u16) -> Self {
        Self { x, y }
    }

    /// Range-checked construction from untrusted integers.
    pub fn checked(x: i64, y: i64) -> Option<Self> {
        let limit = GRID_SIZE as i64;
        if (0..limit).contains(&x) && (0..limit).contains(&y) {
            Some(Self::new(x as u16, y as u16))
        } else {
            None
        }
    }

    /// Dense index in `(x, y)` order, matching [`Coord`]'s `Ord`.
    pub fn index(self) -> usize {
        self.x as usize * GRID_SIZE as usize + self.y as usize
    }

    pub fn from_index(index: usize) -> Self {
        let size = GRID_SIZE as usize;
        Self::new((index / size) as u16, (index % size) as u16)
    }
}

impl std::fmt::Display for Coord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

// ============================================================================
// CELL
// ============================================================================

/// One persisted cell. Serializes as the `/grid` wire record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cell {
    pub x: u16,
    pub y: u16,
    pub owner: Option<String>,
    pub image_url: Option<String>,
    pub link_url: Option<String>,
    /// Always equal to `owner.is_some()`.
    pub is_owned: bool,
    pub color: String,
}

impl Cell {
    pub fn unowned(coord: Coord) -> Self {
        Self {
            x: coord.x,
            y: coord.y,
            owner: None,
            image_url: None,
            link_url: None,
            is_owned: false,
            color: UNOWNED_COLOR.to_string(),
        }
    }

    pub fn coord(&self) -> Coord {
        Coord::new(self.x, self.y)
    }
}

// ============================================================================
// SNAPSHOT – dense read-only view held by the client
// ============================================================================

/// Client-side copy of grid ownership, indexed by [`Coord::index`].
///
/// Built from whatever cell records were fetched; anything not present in
/// those records is treated as unowned, so a partial (paginated) fetch
/// still yields a usable snapshot.
#[derive(Clone, Debug)]
pub struct GridSnapshot {
    owned: Vec<bool>,
    colors: Vec<[u8; 3]>,
}

impl Default for GridSnapshot {
    fn default() -> Self {
        Self::empty()
    }
}

impl GridSnapshot {
    /// Snapshot of a freshly provisioned grid.
    pub fn empty() -> Self {
        Self {
            owned: vec![false; TOTAL_CELLS],
            colors: vec![[0, 0, 0]; TOTAL_CELLS],
        }
    }

    pub fn from_cells<'a>(cells: impl IntoIterator<Item = &'a Cell>) -> Self {
        let mut snapshot = Self::empty();
        for cell in cells {
            if cell.x >= GRID_SIZE || cell.y >= GRID_SIZE || !cell.is_owned {
                continue;
            }
            let idx = cell.coord().index();
            snapshot.owned[idx] = true;
            // Stored colors are canonical hex; anything else renders black.
            snapshot.colors[idx] = color::parse_rgba(&cell.color)
                .map(|[r, g, b, _]| [r, g, b])
                .unwrap_or([0, 0, 0]);
        }
        snapshot
    }

    pub fn is_owned(&self, coord: Coord) -> bool {
        self.owned[coord.index()]
    }

    /// Display color of an owned cell, `None` for unowned cells.
    pub fn color(&self, coord: Coord) -> Option<[u8; 3]> {
        let idx = coord.index();
        self.owned[idx].then(|| self.colors[idx])
    }

    pub fn owned_count(&self) -> usize {
        self.owned.iter().filter(|&&o| o).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coord_checked_rejects_out_of_range() {
        assert_eq!(Coord::checked(0, 999), Some(Coord::new(0, 999)));
        assert_eq!(Coord::checked(-1, 0), None);
        assert_eq!(Coord::checked(1000, 0), None);
        assert_eq!(Coord::checked(3, 1000), None);
    }

    #[test]
    fn index_follows_coord_ordering() {
        let a = Coord::new(1, 999);
        let b = Coord::new(2, 0);
        assert!(a < b);
        assert!(a.index() < b.index());
        assert_eq!(Coord::from_index(b.index()), b);
        assert_eq!(Coord::new(999, 999).index(), TOTAL_CELLS - 1);
    }

    #[test]
    fn snapshot_marks_owned_cells_only() {
        let mut owned = Cell::unowned(Coord::new(5, 5));
        owned.owner = Some("buyer".into());
        owned.is_owned = true;
        owned.color = "#ff0000".into();
        let free = Cell::unowned(Coord::new(6, 5));

        let snapshot = GridSnapshot::from_cells([&owned, &free]);
        assert!(snapshot.is_owned(Coord::new(5, 5)));
        assert!(!snapshot.is_owned(Coord::new(6, 5)));
        assert_eq!(snapshot.color(Coord::new(5, 5)), Some([255, 0, 0]));
        assert_eq!(snapshot.color(Coord::new(6, 5)), None);
        assert_eq!(snapshot.owned_count(), 1);
    }
}
