use std::sync::Arc;

use crate::grid::{Coord, GRID_SIZE, GridSnapshot};

// ============================================================================
// SELECTION
// ============================================================================

/// Axis-aligned rectangle in cell coordinates, bounds inclusive.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SelectionRect {
    pub min_x: u16,
    pub min_y: u16,
    pub max_x: u16,
    pub max_y: u16,
}

impl SelectionRect {
    /// Rectangle spanned by two corners given in any order.
    pub fn spanning(a: Coord, b: Coord) -> Self {
        Self {
            min_x: a.x.min(b.x),
            min_y: a.y.min(b.y),
            max_x: a.x.max(b.x),
            max_y: a.y.max(b.y),
        }
    }

    pub fn contains(&self, c: Coord) -> bool {
        c.x >= self.min_x && c.x <= self.max_x && c.y >= self.min_y && c.y <= self.max_y
    }

    pub fn width(&self) -> u32 {
        (self.max_x - self.min_x) as u32 + 1
    }

    pub fn height(&self) -> u32 {
        (self.max_y - self.min_y) as u32 + 1
    }

    pub fn area(&self) -> usize {
        self.width() as usize * self.height() as usize
    }
}

/// A proposed set of cells: the unowned cells of a dragged rectangle.
///
/// Owned cells inside the rectangle are left out, so the set may have
/// holes; `bounds` is always the full dragged rectangle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Selection {
    bounds: SelectionRect,
    /// Ascending by `(x, y)`.
    cells: Vec<Coord>,
}

impl Selection {
    /// Collect the cells of `rect` that `snapshot` does not mark as owned.
    pub fn clipped(rect: SelectionRect, snapshot: &GridSnapshot) -> Self {
        let mut cells = Vec::with_capacity(rect.area());
        for x in rect.min_x..=rect.max_x {
            for y in rect.min_y..=rect.max_y {
                let c = Coord::new(x, y);
                if !snapshot.is_owned(c) {
                    cells.push(c);
                }
            }
        }
        Self { bounds: rect, cells }
    }

    pub fn bounds(&self) -> SelectionRect {
        self.bounds
    }

    /// Top-left cell of the bounding rectangle.
    pub fn origin(&self) -> Coord {
        Coord::new(self.bounds.min_x, self.bounds.min_y)
    }

    pub fn width(&self) -> u32 {
        self.bounds.width()
    }

    pub fn height(&self) -> u32 {
        self.bounds.height()
    }

    pub fn cells(&self) -> &[Coord] {
        &self.cells
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn contains(&self, c: Coord) -> bool {
        self.bounds.contains(c) && self.cells.binary_search(&c).is_ok()
    }

    /// True when no owned cell was clipped out of the rectangle.
    pub fn is_full_rect(&self) -> bool {
        self.cells.len() == self.bounds.area()
    }
}

// ============================================================================
// ENGINE
// ============================================================================

/// Pointer position relative to the rendering surface's origin, in surface
/// units (pixels at zoom 1).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PointerPos {
    pub x: f32,
    pub y: f32,
}

impl PointerPos {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

enum DragState {
    Idle,
    Dragging { anchor: Coord, preview: Selection },
}

/// Turns pointer-down / move / up into a [`Selection`] that never contains a
/// cell the current snapshot marks as owned.
///
/// ```text
/// Idle --down--> Dragging --move--> Dragging --up--> Idle (emit if non-empty)
/// ```
pub struct SelectionEngine {
    snapshot: Arc<GridSnapshot>,
    /// Surface units per cell.
    cell_size: f32,
    state: DragState,
}

impl SelectionEngine {
    pub fn new(snapshot: Arc<GridSnapshot>) -> Self {
        Self { snapshot, cell_size: 1.0, state: DragState::Idle }
    }

    /// Use a zoomed surface where each cell spans `cell_size` units.
    pub fn with_cell_size(mut self, cell_size: f32) -> Self {
        self.cell_size = if cell_size.is_finite() && cell_size > 0.0 { cell_size } else { 1.0 };
        self
    }

    pub fn snapshot(&self) -> &GridSnapshot {
        &self.snapshot
    }

    /// Install a fresher snapshot. Any drag in progress is dropped, since its
    /// preview was computed against stale ownership.
    pub fn replace_snapshot(&mut self, snapshot: Arc<GridSnapshot>) {
        self.snapshot = snapshot;
        self.state = DragState::Idle;
    }

    pub fn is_dragging(&self) -> bool {
        matches!(self.state, DragState::Dragging { .. })
    }

    /// Cell under a pointer position: floored, then clamped into the grid.
    pub fn cell_at(&self, pos: PointerPos) -> Coord {
        let max = (GRID_SIZE - 1) as f32;
        // `as` saturates and maps NaN to 0.
        let axis = |v: f32| (v / self.cell_size).floor().clamp(0.0, max) as u16;
        Coord::new(axis(pos.x), axis(pos.y))
    }

    /// Start a new drag, discarding any previous one.
    pub fn pointer_down(&mut self, pos: PointerPos) {
        let anchor = self.cell_at(pos);
        let preview = Selection::clipped(SelectionRect::spanning(anchor, anchor), &self.snapshot);
        self.state = DragState::Dragging { anchor, preview };
    }

    /// Recompute the preview. Returns `None` when no drag is active.
    pub fn pointer_move(&mut self, pos: PointerPos) -> Option<&Selection> {
        let current = self.cell_at(pos);
        match &mut self.state {
            DragState::Dragging { anchor, preview } => {
                let rect = SelectionRect::spanning(*anchor, current);
                if preview.bounds != rect {
                    *preview = Selection::clipped(rect, &self.snapshot);
                }
                Some(preview)
            }
            DragState::Idle => None,
        }
    }

    /// Finish the drag. Emits the selection only if it has at least one cell.
    pub fn pointer_up(&mut self) -> Option<Selection> {
        match std::mem::replace(&mut self.state, DragState::Idle) {
            DragState::Dragging { preview, .. } if !preview.is_empty() => Some(preview),
            _ => None,
        }
    }

    /// Abandon the drag without emitting anything.
    pub fn cancel(&mut self) {
        self.state = DragState::Idle;
    }

    pub fn preview(&self) -> Option<&Selection> {
        match &self.state {
            DragState::Dragging { preview, .. } => Some(preview),
            DragState::Idle => None,
        }
    }
}
