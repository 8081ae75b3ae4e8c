//! Durable ownership truth.
//!
//! All reads and writes of cell state go through [`GridStore`]. Reads of the
//! whole grid (or a page of it) are plain queries; anything that inspects
//! cells in order to change them happens inside a [`GridTxn`] opened with
//! [`GridStore::begin`], which is the single isolation boundary of a claim.
//!
//! Two backends:
//! * [`SqliteGridStore`] – one row per cell, `BEGIN IMMEDIATE` transactions.
//! * [`MemoryGridStore`] – one lock per grid column, taken in ascending order.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, RwLock, RwLockWriteGuard};
use std::time::Duration;

use rusqlite::{Connection, OptionalExtension, Row, params};
use thiserror::Error;

use crate::grid::{Cell, Coord, GRID_SIZE, TOTAL_CELLS};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("grid lock poisoned")]
    Poisoned,
    #[error("cell {0} is not provisioned")]
    MissingCell(Coord),
    #[error("cell {0} is outside the transaction's lock set")]
    NotLocked(Coord),
    #[error("cell {0} was already owned when the write landed")]
    LostUpdate(Coord),
}

/// One ownership write produced by a validated claim.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CellWrite {
    pub coord: Coord,
    /// Canonical `#rrggbb`.
    pub color: String,
    pub owner: String,
    pub image_url: Option<String>,
    pub link_url: Option<String>,
}

pub trait GridStore: Send + Sync {
    /// Every cell, ascending by `(x, y)`.
    fn get_all(&self) -> Result<Vec<Cell>, StoreError>;

    /// `limit` cells starting at `offset`, same ordering as [`get_all`](Self::get_all).
    fn get_page(&self, offset: usize, limit: usize) -> Result<Vec<Cell>, StoreError>;

    /// Open an isolation boundary covering `coords`.
    ///
    /// Dropping the returned transaction without committing rolls it back.
    fn begin<'a>(&'a self, coords: &[Coord]) -> Result<Box<dyn GridTxn + 'a>, StoreError>;
}

pub trait GridTxn {
    fn get_by_coords(&mut self, coords: &[Coord]) -> Result<HashMap<Coord, Cell>, StoreError>;

    /// Transition every target from unowned to owned. Fails (and leaves the
    /// transaction to be rolled back) if any target is already owned.
    fn apply_claim(&mut self, writes: &[CellWrite]) -> Result<(), StoreError>;

    fn commit(self: Box<Self>) -> Result<(), StoreError>;
}

// ============================================================================
// SQLITE
// ============================================================================

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS pixels (
        id        INTEGER PRIMARY KEY,
        x         INTEGER NOT NULL,
        y         INTEGER NOT NULL,
        owner     TEXT,
        image_url TEXT,
        link_url  TEXT,
        is_owned  INTEGER NOT NULL DEFAULT 0,
        color     TEXT NOT NULL DEFAULT 'gray',
        CHECK (is_owned = (owner IS NOT NULL))
    );
    CREATE UNIQUE INDEX IF NOT EXISTS pixels_xy ON pixels (x, y);";

const CELL_COLUMNS: &str = "x, y, owner, image_url, link_url, is_owned, color";

pub struct SqliteGridStore {
    conn: Mutex<Connection>,
}

impl SqliteGridStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        // Other processes holding the write lock make BEGIN IMMEDIATE wait
        // this long before surfacing SQLITE_BUSY.
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Insert any missing rows so the table holds exactly one unowned row
    /// per cell. Returns the number of rows inserted; `0` on an already
    /// provisioned grid.
    pub fn provision(&self) -> Result<usize, StoreError> {
        let mut conn = self.lock()?;
        let existing: i64 = conn.query_row("SELECT COUNT(*) FROM pixels", [], |r| r.get(0))?;
        if existing as usize >= TOTAL_CELLS {
            return Ok(0);
        }

        let tx = conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO pixels (x, y, owner, image_url, link_url, is_owned, color)
                 VALUES (?1, ?2, NULL, NULL, NULL, 0, 'gray')",
            )?;
            for x in 0..GRID_SIZE {
                for y in 0..GRID_SIZE {
                    inserted += stmt.execute(params![x, y])?;
                }
            }
        }
        tx.commit()?;
        log::info!("provisioned {} grid rows", inserted);
        Ok(inserted)
    }

    pub fn cell_count(&self) -> Result<usize, StoreError> {
        let conn = self.lock()?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM pixels", [], |r| r.get(0))?;
        Ok(n as usize)
    }
}

fn read_cell(row: &Row<'_>) -> rusqlite::Result<Cell> {
    Ok(Cell {
        x: row.get(0)?,
        y: row.get(1)?,
        owner: row.get(2)?,
        image_url: row.get(3)?,
        link_url: row.get(4)?,
        is_owned: row.get(5)?,
        color: row.get(6)?,
    })
}

impl GridStore for SqliteGridStore {
    fn get_all(&self) -> Result<Vec<Cell>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!("SELECT {CELL_COLUMNS} FROM pixels ORDER BY x, y"))?;
        let cells = stmt
            .query_map([], read_cell)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(cells)
    }

    fn get_page(&self, offset: usize, limit: usize) -> Result<Vec<Cell>, StoreError> {
        // SQLite reads a negative OFFSET as 0, so anything past the grid
        // must stop here rather than wrap.
        if offset >= TOTAL_CELLS || limit == 0 {
            return Ok(Vec::new());
        }
        let limit = limit.min(TOTAL_CELLS - offset);
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {CELL_COLUMNS} FROM pixels ORDER BY x, y LIMIT ?1 OFFSET ?2"
        ))?;
        let cells = stmt
            .query_map(params![limit as i64, offset as i64], read_cell)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(cells)
    }

    fn begin<'a>(&'a self, _coords: &[Coord]) -> Result<Box<dyn GridTxn + 'a>, StoreError> {
        // The database write lock covers every row, so the lock set is the
        // whole grid; IMMEDIATE takes it before the first read.
        let conn = self.lock()?;
        conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(Box::new(SqliteTxn { conn, finished: false }))
    }
}

struct SqliteTxn<'a> {
    conn: MutexGuard<'a, Connection>,
    finished: bool,
}

impl GridTxn for SqliteTxn<'_> {
    fn get_by_coords(&mut self, coords: &[Coord]) -> Result<HashMap<Coord, Cell>, StoreError> {
        let mut stmt = self
            .conn
            .prepare_cached(&format!("SELECT {CELL_COLUMNS} FROM pixels WHERE x = ?1 AND y = ?2"))?;
        let mut found = HashMap::with_capacity(coords.len());
        for &coord in coords {
            let cell = stmt
                .query_row(params![coord.x, coord.y], read_cell)
                .optional()?
                .ok_or(StoreError::MissingCell(coord))?;
            found.insert(coord, cell);
        }
        Ok(found)
    }

    fn apply_claim(&mut self, writes: &[CellWrite]) -> Result<(), StoreError> {
        let mut stmt = self.conn.prepare_cached(
            "UPDATE pixels
             SET owner = ?1, color = ?2, image_url = ?3, link_url = ?4, is_owned = 1
             WHERE x = ?5 AND y = ?6 AND is_owned = 0",
        )?;
        for w in writes {
            let changed = stmt.execute(params![
                w.owner,
                w.color,
                w.image_url,
                w.link_url,
                w.coord.x,
                w.coord.y
            ])?;
            if changed != 1 {
                return Err(StoreError::LostUpdate(w.coord));
            }
        }
        Ok(())
    }

    fn commit(mut self: Box<Self>) -> Result<(), StoreError> {
        self.conn.execute_batch("COMMIT")?;
        self.finished = true;
        Ok(())
    }
}

impl Drop for SqliteTxn<'_> {
    fn drop(&mut self) {
        if !self.finished
            && let Err(e) = self.conn.execute_batch("ROLLBACK")
        {
            log::error!("rollback failed: {}", e);
        }
    }
}

// ============================================================================
// IN-MEMORY
// ============================================================================

/// Column-striped in-process store.
///
/// Each grid column (fixed `x`) sits behind its own lock. A transaction
/// write-locks the distinct columns it touches in ascending `x`, so two
/// claims that overlap only partially can never wait on each other in a
/// cycle, and claims on disjoint columns never contend.
pub struct MemoryGridStore {
    columns: Vec<RwLock<Vec<Cell>>>,
}

impl Default for MemoryGridStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryGridStore {
    pub fn new() -> Self {
        let columns = (0..GRID_SIZE)
            .map(|x| {
                let column = (0..GRID_SIZE).map(|y| Cell::unowned(Coord::new(x, y))).collect();
                RwLock::new(column)
            })
            .collect();
        Self { columns }
    }
}

impl GridStore for MemoryGridStore {
    fn get_all(&self) -> Result<Vec<Cell>, StoreError> {
        self.get_page(0, TOTAL_CELLS)
    }

    /// Consistent with claims: every column in the window is read-locked,
    /// in ascending `x` like [`begin`](GridStore::begin), before any cell is
    /// copied, so a claim is seen whole or not at all.
    fn get_page(&self, offset: usize, limit: usize) -> Result<Vec<Cell>, StoreError> {
        let end = offset.saturating_add(limit).min(TOTAL_CELLS);
        if offset >= end {
            return Ok(Vec::new());
        }
        let size = GRID_SIZE as usize;
        let first = offset / size;
        let last = (end - 1) / size;
        let guards = self.columns[first..=last]
            .iter()
            .map(|c| c.read().map_err(|_| StoreError::Poisoned))
            .collect::<Result<Vec<_>, _>>()?;

        let mut out = Vec::with_capacity(end - offset);
        for (i, column) in guards.iter().enumerate() {
            let base = (first + i) * size;
            let from = offset.saturating_sub(base);
            let to = (end - base).min(size);
            out.extend_from_slice(&column[from..to]);
        }
        Ok(out)
    }

    fn begin<'a>(&'a self, coords: &[Coord]) -> Result<Box<dyn GridTxn + 'a>, StoreError> {
        let mut xs: Vec<u16> = coords.iter().map(|c| c.x).collect();
        xs.sort_unstable();
        xs.dedup();

        let mut locked = Vec::with_capacity(xs.len());
        for x in xs {
            let guard = self.columns[x as usize].write().map_err(|_| StoreError::Poisoned)?;
            locked.push((x, guard));
        }
        Ok(Box::new(MemoryTxn { locked, undo: Vec::new(), committed: false }))
    }
}

struct MemoryTxn<'a> {
    /// Sorted by column.
    locked: Vec<(u16, RwLockWriteGuard<'a, Vec<Cell>>)>,
    undo: Vec<Cell>,
    committed: bool,
}

impl MemoryTxn<'_> {
    fn cell_mut(&mut self, coord: Coord) -> Result<&mut Cell, StoreError> {
        let slot = self
            .locked
            .binary_search_by_key(&coord.x, |(x, _)| *x)
            .map_err(|_| StoreError::NotLocked(coord))?;
        self.locked[slot]
            .1
            .get_mut(coord.y as usize)
            .ok_or(StoreError::MissingCell(coord))
    }
}

impl GridTxn for MemoryTxn<'_> {
    fn get_by_coords(&mut self, coords: &[Coord]) -> Result<HashMap<Coord, Cell>, StoreError> {
        let mut found = HashMap::with_capacity(coords.len());
        for &coord in coords {
            let cell = self.cell_mut(coord)?.clone();
            found.insert(coord, cell);
        }
        Ok(found)
    }

    fn apply_claim(&mut self, writes: &[CellWrite]) -> Result<(), StoreError> {
        for w in writes {
            let cell = self.cell_mut(w.coord)?;
            if cell.is_owned {
                return Err(StoreError::LostUpdate(w.coord));
            }
            let previous = cell.clone();
            cell.owner = Some(w.owner.clone());
            cell.color = w.color.clone();
            cell.image_url = w.image_url.clone();
            cell.link_url = w.link_url.clone();
            cell.is_owned = true;
            self.undo.push(previous);
        }
        Ok(())
    }

    fn commit(mut self: Box<Self>) -> Result<(), StoreError> {
        self.committed = true;
        self.undo.clear();
        Ok(())
    }
}

impl Drop for MemoryTxn<'_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        while let Some(previous) = self.undo.pop() {
            if let Ok(cell) = self.cell_mut(previous.coord()) {
                *cell = previous;
            }
        }
    }
}
