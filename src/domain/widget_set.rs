// Widget arena - id-indexed storage with a separate ordering
use super::error::{DashboardError, DashboardResult};
use super::ids::WidgetId;
use super::layout::Placement;
use super::widget::{Widget, WidgetPatch};
use std::collections::HashMap;

/// Widgets keyed by id. Order is kept apart from storage and is only
/// exposed where ordering matters (layout, rendering, persistence views).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WidgetSet {
    order: Vec<WidgetId>,
    by_id: HashMap<WidgetId, Widget>,
}

impl WidgetSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_widgets(widgets: Vec<Widget>) -> DashboardResult<Self> {
        let mut set = Self::new();
        for widget in widgets {
            if set.contains(&widget.id) {
                return Err(DashboardError::validation(format!(
                    "duplicate widget id {}",
                    widget.id
                )));
            }
            set.push(widget);
        }
        Ok(set)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, id: &WidgetId) -> bool {
        self.by_id.contains_key(id)
    }

    pub fn get(&self, id: &WidgetId) -> Option<&Widget> {
        self.by_id.get(id)
    }

    pub fn position(&self, id: &WidgetId) -> Option<usize> {
        self.order.iter().position(|candidate| candidate == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Widget> {
        self.order.iter().filter_map(|id| self.by_id.get(id))
    }

    pub fn to_vec(&self) -> Vec<Widget> {
        self.iter().cloned().collect()
    }

    pub fn placements(&self) -> Vec<Placement> {
        self.iter()
            .map(|w| Placement::new(w.id.clone(), w.rect()))
            .collect()
    }

    /// Appends, or replaces in place when the id is already present.
    pub fn push(&mut self, widget: Widget) {
        if !self.by_id.contains_key(&widget.id) {
            self.order.push(widget.id.clone());
        }
        self.by_id.insert(widget.id.clone(), widget);
    }

    pub fn insert_at(&mut self, index: usize, widget: Widget) {
        if self.by_id.contains_key(&widget.id) {
            self.by_id.insert(widget.id.clone(), widget);
            return;
        }
        let index = index.min(self.order.len());
        self.order.insert(index, widget.id.clone());
        self.by_id.insert(widget.id.clone(), widget);
    }

    pub fn remove(&mut self, id: &WidgetId) -> Option<(usize, Widget)> {
        let index = self.position(id)?;
        self.order.remove(index);
        self.by_id.remove(id).map(|widget| (index, widget))
    }

    /// Swaps the entry stored under `old` for `widget`, keeping its slot.
    /// Used when the server confirms an optimistic entity under a new id.
    pub fn replace(&mut self, old: &WidgetId, widget: Widget) -> bool {
        let Some(index) = self.position(old) else {
            return false;
        };
        self.by_id.remove(old);
        self.order[index] = widget.id.clone();
        self.by_id.insert(widget.id.clone(), widget);
        true
    }

    /// Moves/resizes only; every other field is left alone.
    pub fn apply_placements(&mut self, placements: &[Placement]) {
        for placement in placements {
            if let Some(widget) = self.by_id.get_mut(&placement.id) {
                widget.set_rect(placement.rect);
            }
        }
    }

    pub fn apply_content(&mut self, id: &WidgetId, patch: &WidgetPatch) -> bool {
        match self.by_id.get_mut(id) {
            Some(widget) => {
                patch.apply_content(widget);
                true
            }
            None => false,
        }
    }
}
