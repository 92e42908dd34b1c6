//! Spatial split grid.
//!
//! A field's bounds are cut into cells of 75% of the client view. A user
//! watches the 3x3 block of cells around its own, which always covers
//! everything on its screen.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use super::object::{FieldObj, ObjectId, ObjectKind};
use crate::template::{Point, Rect};

pub const SCREEN_WIDTH: i32 = 1024;
pub const SCREEN_HEIGHT: i32 = 768;
pub const SPLIT_WIDTH: i32 = SCREEN_WIDTH * 75 / 100;
pub const SPLIT_HEIGHT: i32 = SCREEN_HEIGHT * 75 / 100;

/// Grid coordinates of one split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SplitPos {
    pub col: i32,
    pub row: i32,
}

impl SplitPos {
    pub const fn new(col: i32, row: i32) -> Self {
        Self { col, row }
    }
}

pub struct FieldSplit {
    pos: SplitPos,
    objects: Mutex<HashMap<(ObjectKind, ObjectId), Arc<FieldObj>>>,
    watchers: Mutex<HashMap<ObjectId, Arc<FieldObj>>>,
}

impl FieldSplit {
    fn new(pos: SplitPos) -> Self {
        Self {
            pos,
            objects: Mutex::new(HashMap::new()),
            watchers: Mutex::new(HashMap::new()),
        }
    }

    pub fn pos(&self) -> SplitPos {
        self.pos
    }

    pub(crate) fn insert(&self, obj: &Arc<FieldObj>) {
        self.objects.lock().insert((obj.kind(), obj.id()), Arc::clone(obj));
    }

    pub(crate) fn remove(&self, obj: &FieldObj) -> bool {
        self.objects.lock().remove(&(obj.kind(), obj.id())).is_some()
    }

    pub(crate) fn add_watcher(&self, user: &Arc<FieldObj>) {
        self.watchers.lock().insert(user.id(), Arc::clone(user));
    }

    pub(crate) fn remove_watcher(&self, user: &FieldObj) {
        self.watchers.lock().remove(&user.id());
    }

    pub fn contains(&self, obj: &FieldObj) -> bool {
        self.objects.lock().contains_key(&(obj.kind(), obj.id()))
    }

    /// Snapshot of the objects positioned in this split.
    pub fn objects(&self) -> Vec<Arc<FieldObj>> {
        self.objects.lock().values().cloned().collect()
    }

    /// Snapshot of the users whose neighbourhood includes this split.
    pub fn watchers(&self) -> Vec<Arc<FieldObj>> {
        self.watchers.lock().values().cloned().collect()
    }

    pub fn is_watched_by(&self, id: ObjectId) -> bool {
        self.watchers.lock().contains_key(&id)
    }
}

pub struct SplitGrid {
    bounds: Rect,
    origin: Point,
    cell_width: i32,
    cell_height: i32,
    cols: i32,
    rows: i32,
    cells: Vec<FieldSplit>,
}

impl SplitGrid {
    pub fn new(bounds: Rect) -> Self {
        Self::with_cell_size(bounds, SPLIT_WIDTH, SPLIT_HEIGHT)
    }

    pub fn with_cell_size(bounds: Rect, cell_width: i32, cell_height: i32) -> Self {
        let cols = (bounds.width().max(0) + cell_width - 1) / cell_width;
        let rows = (bounds.height().max(0) + cell_height - 1) / cell_height;
        let mut cells = Vec::with_capacity((cols * rows) as usize);
        for row in 0..rows {
            for col in 0..cols {
                cells.push(FieldSplit::new(SplitPos::new(col, row)));
            }
        }
        Self {
            bounds,
            origin: Point::new(bounds.left, bounds.top),
            cell_width,
            cell_height,
            cols,
            rows,
            cells,
        }
    }

    pub fn cols(&self) -> i32 {
        self.cols
    }

    pub fn rows(&self) -> i32 {
        self.rows
    }

    /// Grid coordinates of the split containing `p`, whether or not it is
    /// inside the grid.
    pub fn locate(&self, p: Point) -> SplitPos {
        SplitPos::new(
            (p.x - self.origin.x).div_euclid(self.cell_width),
            (p.y - self.origin.y).div_euclid(self.cell_height),
        )
    }

    pub fn split_at(&self, pos: SplitPos) -> Option<&FieldSplit> {
        if pos.col < 0 || pos.col >= self.cols || pos.row < 0 || pos.row >= self.rows {
            return None;
        }
        self.cells.get((pos.row * self.cols + pos.col) as usize)
    }

    /// The split containing `p`. The last column and row extend past the
    /// field's edge; points in that slack have no split.
    pub fn get_split(&self, p: Point) -> Option<&FieldSplit> {
        if !self.bounds.contains(p) {
            return None;
        }
        self.split_at(self.locate(p))
    }

    /// The 3x3 neighbourhood around `p`, row-major, centre at index 4.
    /// Slots off the grid are `None`; a point off the grid yields nine `None`s.
    pub fn enclosing_splits(&self, p: Point) -> [Option<&FieldSplit>; 9] {
        match self.get_split(p) {
            Some(split) => self.enclosing_of(split.pos()),
            None => [None; 9],
        }
    }

    pub fn enclosing_of(&self, center: SplitPos) -> [Option<&FieldSplit>; 9] {
        let mut out = [None; 9];
        if self.split_at(center).is_none() {
            return out;
        }
        for (i, slot) in out.iter_mut().enumerate() {
            let dc = (i % 3) as i32 - 1;
            let dr = (i / 3) as i32 - 1;
            *slot = self.split_at(SplitPos::new(center.col + dc, center.row + dr));
        }
        out
    }

    /// Positions of the enclosing splits around `center`.
    pub fn enclosing_positions(&self, center: Option<SplitPos>) -> [Option<SplitPos>; 9] {
        let mut out = [None; 9];
        if let Some(center) = center {
            for (slot, split) in out.iter_mut().zip(self.enclosing_of(center)) {
                *slot = split.map(FieldSplit::pos);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid() -> SplitGrid {
        // 2000 x 1000 field offset from the origin: 3 cols x 2 rows.
        SplitGrid::new(Rect::new(-500, -300, 1500, 700))
    }

    #[test]
    fn test_split_constants() {
        assert_eq!(SPLIT_WIDTH, 768);
        assert_eq!(SPLIT_HEIGHT, 576);
    }

    #[test]
    fn test_grid_dimensions_round_up() {
        let g = grid();
        assert_eq!(g.cols(), 3);
        assert_eq!(g.rows(), 2);
    }

    #[test]
    fn test_get_split_matches_floor_division() {
        let g = grid();
        for &(x, y) in &[(-500, -300), (267, 275), (268, 276), (1499, 699), (0, 0), (1000, 500)] {
            let split = g.get_split(Point::new(x, y)).unwrap();
            assert_eq!(split.pos().col, (x + 500) / SPLIT_WIDTH);
            assert_eq!(split.pos().row, (y + 300) / SPLIT_HEIGHT);
        }
    }

    #[test]
    fn test_get_split_outside_bounds() {
        let g = grid();
        assert!(g.get_split(Point::new(-501, 0)).is_none());
        assert!(g.get_split(Point::new(0, -301)).is_none());
        assert!(g.get_split(Point::new(1500 + SPLIT_WIDTH, 0)).is_none());
        assert!(g.get_split(Point::new(0, 700 + SPLIT_HEIGHT)).is_none());
    }

    #[test]
    fn test_get_split_past_edge_inside_last_cell_is_none() {
        // 1000 x 600: two columns and two rows, the last of each only partly
        // covered by the field.
        let g = SplitGrid::new(Rect::new(0, 0, 1000, 600));
        assert_eq!((g.cols(), g.rows()), (2, 2));
        assert!(g.get_split(Point::new(1200, 100)).is_none());
        assert!(g.get_split(Point::new(1000, 100)).is_none());
        assert!(g.get_split(Point::new(500, 650)).is_none());
        assert!(g.enclosing_splits(Point::new(1200, 100)).iter().all(Option::is_none));
        assert_eq!(g.get_split(Point::new(999, 599)).unwrap().pos(), SplitPos::new(1, 1));
    }

    #[test]
    fn test_enclosing_corner_has_absent_slots() {
        let g = grid();
        let splits = g.enclosing_splits(Point::new(-500, -300));
        assert_eq!(splits.len(), 9);
        let present: Vec<usize> = (0..9).filter(|&i| splits[i].is_some()).collect();
        assert_eq!(present, vec![4, 5, 7, 8]);
        assert_eq!(splits[4].unwrap().pos(), SplitPos::new(0, 0));
        assert_eq!(splits[8].unwrap().pos(), SplitPos::new(1, 1));
    }

    #[test]
    fn test_enclosing_centre_column() {
        let g = grid();
        let splits = g.enclosing_splits(Point::new(500, 0));
        // Middle column, top row: everything in rows 0..=1 is present.
        let present: Vec<usize> = (0..9).filter(|&i| splits[i].is_some()).collect();
        assert_eq!(present, vec![3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_enclosing_outside_is_all_absent() {
        let g = grid();
        assert!(g.enclosing_splits(Point::new(-10_000, 0)).iter().all(Option::is_none));
        assert!(g.enclosing_positions(None).iter().all(Option::is_none));
    }
}
