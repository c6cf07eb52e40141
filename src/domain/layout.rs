// Layout engine - Grid placement, clamping and vertical compaction
//
// Everything here is a pure function of the current placements and the
// column count. Callers own the widget collection and apply the returned
// placements themselves.
use super::error::{DashboardError, DashboardResult};
use super::ids::WidgetId;
use super::widget::{MAX_ROW, MAX_ROW_SPAN, MIN_CELL_SIZE, Rect};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Placement {
    pub id: WidgetId,
    pub rect: Rect,
}

impl Placement {
    pub fn new(id: WidgetId, rect: Rect) -> Self {
        Self { id, rect }
    }
}

/// One step of a drag or resize gesture, in grid units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum LayoutChange {
    Move { id: WidgetId, x: u32, y: u32 },
    Resize { id: WidgetId, w: u32, h: u32 },
}

impl LayoutChange {
    fn id(&self) -> &WidgetId {
        match self {
            LayoutChange::Move { id, .. } | LayoutChange::Resize { id, .. } => id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutEngine {
    columns: u32,
}

impl LayoutEngine {
    pub fn new(columns: u32) -> DashboardResult<Self> {
        if columns < MIN_CELL_SIZE {
            return Err(DashboardError::validation(format!(
                "grid needs at least {} columns, got {}",
                MIN_CELL_SIZE, columns
            )));
        }
        Ok(Self { columns })
    }

    pub fn columns(&self) -> u32 {
        self.columns
    }

    /// Rejects rectangles that break the size or column bounds. Used before
    /// accepting new widgets, where clamping would silently change intent.
    pub fn validate(&self, rect: &Rect) -> DashboardResult<()> {
        if rect.w < MIN_CELL_SIZE || rect.h < MIN_CELL_SIZE {
            return Err(DashboardError::validation(format!(
                "widget size {}x{} is below the {}x{} minimum",
                rect.w, rect.h, MIN_CELL_SIZE, MIN_CELL_SIZE
            )));
        }
        if rect.h > MAX_ROW_SPAN {
            return Err(DashboardError::validation(format!(
                "widget height {} exceeds the {} row maximum",
                rect.h, MAX_ROW_SPAN
            )));
        }
        if !rect.fits_within(self.columns) {
            return Err(DashboardError::validation(format!(
                "widget at column {} with width {} does not fit a {} column grid",
                rect.x, rect.w, self.columns
            )));
        }
        Ok(())
    }

    pub fn clamp_move(&self, rect: Rect, x: u32, y: u32) -> Rect {
        let max_x = self.columns.saturating_sub(rect.w);
        Rect::new(x.min(max_x), y.min(MAX_ROW), rect.w, rect.h)
    }

    pub fn clamp_resize(&self, rect: Rect, w: u32, h: u32) -> Rect {
        let max_w = self.columns.saturating_sub(rect.x).max(MIN_CELL_SIZE);
        let w = w.clamp(MIN_CELL_SIZE, max_w);
        let x = rect.x.min(self.columns.saturating_sub(w));
        Rect::new(x, rect.y, w, h.clamp(MIN_CELL_SIZE, MAX_ROW_SPAN))
    }

    /// Mid-gesture move: clamped, but overlaps are tolerated.
    pub fn preview_move(&self, items: &[Placement], id: &WidgetId, x: u32, y: u32) -> DashboardResult<Vec<Placement>> {
        self.apply_changes(items, &[LayoutChange::Move { id: id.clone(), x, y }])
    }

    pub fn preview_resize(&self, items: &[Placement], id: &WidgetId, w: u32, h: u32) -> DashboardResult<Vec<Placement>> {
        self.apply_changes(items, &[LayoutChange::Resize { id: id.clone(), w, h }])
    }

    pub fn apply_move(&self, items: &[Placement], id: &WidgetId, x: u32, y: u32) -> DashboardResult<Vec<Placement>> {
        self.apply_batch(items, &[LayoutChange::Move { id: id.clone(), x, y }])
    }

    pub fn apply_resize(&self, items: &[Placement], id: &WidgetId, w: u32, h: u32) -> DashboardResult<Vec<Placement>> {
        self.apply_batch(items, &[LayoutChange::Resize { id: id.clone(), w, h }])
    }

    /// Applies every change in order, then compacts once.
    pub fn apply_batch(&self, items: &[Placement], changes: &[LayoutChange]) -> DashboardResult<Vec<Placement>> {
        let moved = self.apply_changes(items, changes)?;
        Ok(self.compact(&moved))
    }

    /// Validates the new placements and compacts them in after the existing ones.
    pub fn insert(&self, items: &[Placement], new: &[Placement]) -> DashboardResult<Vec<Placement>> {
        let mut seen: HashSet<&WidgetId> = items.iter().map(|p| &p.id).collect();
        for placement in new {
            self.validate(&placement.rect)?;
            if !seen.insert(&placement.id) {
                return Err(DashboardError::validation(format!(
                    "duplicate widget id {}",
                    placement.id
                )));
            }
        }
        let mut all = items.to_vec();
        all.extend_from_slice(new);
        Ok(self.compact(&all))
    }

    /// Vertical compaction. Widgets are visited by `(y, x, input order)` and
    /// each drops to the lowest row where it collides with nothing already
    /// placed. Output keeps the input order.
    pub fn compact(&self, items: &[Placement]) -> Vec<Placement> {
        let mut order: Vec<usize> = (0..items.len()).collect();
        order.sort_by_key(|&i| (items[i].rect.y, items[i].rect.x, i));

        let mut result = items.to_vec();
        let mut placed: Vec<Rect> = Vec::with_capacity(items.len());

        for i in order {
            let mut candidate = Rect { y: 0, ..items[i].rect };
            loop {
                let blocker = placed
                    .iter()
                    .filter(|other| other.intersects(&candidate))
                    .map(Rect::bottom)
                    .max();
                match blocker {
                    Some(bottom) => candidate.y = bottom,
                    None => break,
                }
            }
            placed.push(candidate);
            result[i].rect = candidate;
        }

        result
    }

    /// Checks the committed-layout invariants: bounds, minimum size, no overlap.
    pub fn check(&self, items: &[Placement]) -> DashboardResult<()> {
        for (i, a) in items.iter().enumerate() {
            self.validate(&a.rect)?;
            if let Some(b) = items[i + 1..].iter().find(|b| a.rect.intersects(&b.rect)) {
                return Err(DashboardError::validation(format!(
                    "widgets {} and {} overlap",
                    a.id, b.id
                )));
            }
        }
        Ok(())
    }

    fn apply_changes(&self, items: &[Placement], changes: &[LayoutChange]) -> DashboardResult<Vec<Placement>> {
        let mut result = items.to_vec();
        for change in changes {
            let slot = result
                .iter_mut()
                .find(|p| &p.id == change.id())
                .ok_or_else(|| DashboardError::widget_not_found(change.id()))?;
            slot.rect = match *change {
                LayoutChange::Move { x, y, .. } => self.clamp_move(slot.rect, x, y),
                LayoutChange::Resize { w, h, .. } => self.clamp_resize(slot.rect, w, h),
            };
        }
        Ok(result)
    }
}

/// Placements in `after` whose rectangle differs from `before`.
pub fn changed_placements(before: &[Placement], after: &[Placement]) -> Vec<Placement> {
    after
        .iter()
        .filter(|p| {
            before
                .iter()
                .find(|b| b.id == p.id)
                .is_none_or(|b| b.rect != p.rect)
        })
        .cloned()
        .collect()
}
