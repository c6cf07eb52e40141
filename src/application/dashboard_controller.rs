// Dashboard controller - optimistic dashboard and widget mutations
use crate::application::dashboard_repository::DashboardRepository;
use crate::application::data_fetcher::WidgetDataFetcher;
use crate::application::notifier::Notifier;
use crate::application::widget_registry::{self, RenderedCell};
use crate::domain::dashboard::{Dashboard, DashboardPatch, DashboardSummary, NewDashboard};
use crate::domain::error::{DashboardError, DashboardResult};
use crate::domain::ids::{DashboardId, WidgetId};
use crate::domain::layout::{LayoutChange, LayoutEngine, Placement, changed_placements};
use crate::domain::widget::{NewWidget, Widget, WidgetPatch};
use crate::domain::widget_set::WidgetSet;
use chrono::Utc;
use futures::future::join_all;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// What a widget looked like before an operation touched it.
#[derive(Debug, Clone)]
struct WidgetUndo {
    id: WidgetId,
    /// Slot and value, or `None` if the operation created the widget.
    previous: Option<(usize, Widget)>,
    /// Operation that held the widget before this one claimed it.
    previous_writer: Option<u64>,
}

struct LoadedDashboard {
    /// Dashboard fields; `meta.widgets` stays empty, widgets live in `widgets`.
    meta: Dashboard,
    widgets: WidgetSet,
    writers: HashMap<WidgetId, u64>,
    meta_writer: Option<u64>,
}

impl LoadedDashboard {
    fn from_remote(mut dashboard: Dashboard) -> DashboardResult<Self> {
        let widgets = WidgetSet::from_widgets(std::mem::take(&mut dashboard.widgets))?;
        Ok(Self {
            meta: dashboard,
            widgets,
            writers: HashMap::new(),
            meta_writer: None,
        })
    }

    fn engine(&self) -> DashboardResult<LayoutEngine> {
        LayoutEngine::new(self.meta.layout_config.columns)
    }

    fn snapshot(&self) -> Dashboard {
        let mut dashboard = self.meta.clone();
        dashboard.widgets = self.widgets.to_vec();
        dashboard
    }

    fn widget(&self, id: &WidgetId) -> DashboardResult<&Widget> {
        self.widgets
            .get(id)
            .ok_or_else(|| DashboardError::widget_not_found(id))
    }

    fn fresh_widget_id(&self) -> WidgetId {
        loop {
            let id = WidgetId::generate();
            if !self.widgets.contains(&id) {
                return id;
            }
        }
    }

    fn claim(&mut self, op: u64, id: &WidgetId) -> WidgetUndo {
        let previous = self
            .widgets
            .position(id)
            .zip(self.widgets.get(id).cloned());
        let previous_writer = self.writers.insert(id.clone(), op);
        WidgetUndo {
            id: id.clone(),
            previous,
            previous_writer,
        }
    }

    /// True if `op` is still the latest writer of `id`; releases the claim.
    fn settle(&mut self, op: u64, id: &WidgetId) -> bool {
        if self.writers.get(id) == Some(&op) {
            self.writers.remove(id);
            true
        } else {
            false
        }
    }

    /// Restores every widget `op` still owns, newest change first, and hands
    /// each one back to the operation that held it before.
    fn rollback(&mut self, op: u64, undo: &[WidgetUndo]) -> Vec<Widget> {
        let mut restored = Vec::new();
        for entry in undo.iter().rev() {
            if self.writers.get(&entry.id) != Some(&op) {
                continue;
            }
            match entry.previous_writer {
                Some(writer) => self.writers.insert(entry.id.clone(), writer),
                None => self.writers.remove(&entry.id),
            };
            match &entry.previous {
                Some((index, widget)) => {
                    if self.widgets.contains(&entry.id) {
                        self.widgets.push(widget.clone());
                    } else {
                        self.widgets.insert_at(*index, widget.clone());
                        restored.push(widget.clone());
                    }
                }
                None => {
                    self.widgets.remove(&entry.id);
                }
            }
        }
        restored
    }
}

#[derive(Default)]
struct ControllerState {
    dashboards: HashMap<DashboardId, LoadedDashboard>,
    /// Adds, reloads and dashboard deletes hold a dashboard's gate
    /// exclusively; every other mutation shares it.
    gates: HashMap<DashboardId, Arc<RwLock<()>>>,
    next_op: u64,
}

impl ControllerState {
    fn next_op(&mut self) -> u64 {
        self.next_op += 1;
        self.next_op
    }

    fn gate(&mut self, id: &DashboardId) -> Arc<RwLock<()>> {
        self.gates.entry(id.clone()).or_default().clone()
    }

    fn loaded(&mut self, id: &DashboardId) -> DashboardResult<&mut LoadedDashboard> {
        self.dashboards
            .get_mut(id)
            .ok_or_else(|| DashboardError::dashboard_not_found(id))
    }
}

/// Remote writes one optimistic operation needs.
#[derive(Default)]
struct PendingWrites {
    /// Optimistic id and the widget to create.
    creates: Vec<(WidgetId, NewWidget)>,
    /// Widget, patch to send, patch that undoes it.
    updates: Vec<(WidgetId, WidgetPatch, WidgetPatch)>,
    deletes: Vec<WidgetId>,
}

#[derive(Default)]
struct WriteOutcome {
    /// Optimistic id and the server-confirmed widget.
    created: Vec<(WidgetId, Widget)>,
    updated: Vec<Widget>,
}

/// A patch carrying every field of `widget`, used to undo a remote update.
fn full_patch(widget: &Widget) -> WidgetPatch {
    WidgetPatch {
        title: Some(widget.title.clone()),
        config: Some(widget.config.clone()),
        position_x: Some(widget.position_x),
        position_y: Some(widget.position_y),
        size_w: Some(widget.size_w),
        size_h: Some(widget.size_h),
        data_source: Some(widget.data_source.clone()),
        refresh_interval_seconds: widget.refresh_interval_seconds,
    }
}

fn revert_for(undo: &[WidgetUndo], id: &WidgetId) -> WidgetPatch {
    undo.iter()
        .find(|u| &u.id == id)
        .and_then(|u| u.previous.as_ref())
        .map(|(_, widget)| full_patch(widget))
        .unwrap_or_default()
}

/// Layout patches for neighbours moved by compaction, skipping `except`.
fn neighbour_moves(
    before: &[Placement],
    after: &[Placement],
    except: &HashSet<WidgetId>,
    undo: &[WidgetUndo],
) -> Vec<(WidgetId, WidgetPatch, WidgetPatch)> {
    changed_placements(before, after)
        .into_iter()
        .filter(|p| !except.contains(&p.id))
        .map(|p| {
            let revert = revert_for(undo, &p.id);
            (p.id, WidgetPatch::layout(p.rect), revert)
        })
        .collect()
}

/// Owns the authoritative in-memory copy of every loaded dashboard and runs
/// each mutation optimistically: validate, apply locally, persist with the
/// state lock released, then swap in the server's entities or restore what
/// was replaced and notify.
///
/// Every operation gets a number and marks itself as the latest writer of
/// the widgets it touches. Confirmation and rollback only land on widgets
/// whose latest writer is still that operation, so the last write to a
/// widget wins. A widget added optimistically has an id the server has not
/// seen yet, so no other mutation of that dashboard runs until the add
/// settles.
pub struct DashboardController {
    repository: Arc<dyn DashboardRepository>,
    fetcher: WidgetDataFetcher,
    notifier: Arc<dyn Notifier>,
    state: Mutex<ControllerState>,
}

impl DashboardController {
    pub fn new(
        repository: Arc<dyn DashboardRepository>,
        fetcher: WidgetDataFetcher,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            repository,
            fetcher,
            notifier,
            state: Mutex::new(ControllerState::default()),
        }
    }

    pub fn fetcher(&self) -> &WidgetDataFetcher {
        &self.fetcher
    }

    pub async fn list_dashboards(&self) -> DashboardResult<Vec<DashboardSummary>> {
        self.repository.list_dashboards().await
    }

    /// Loads a dashboard from the server, makes it the local authority and
    /// (re)mounts its widgets' data fetches.
    pub async fn get_dashboard(&self, id: &DashboardId) -> DashboardResult<Dashboard> {
        let gate = self.state.lock().await.gate(id);
        let _exclusive = gate.write().await;
        let remote = self.repository.get_dashboard(id).await?;
        let loaded = LoadedDashboard::from_remote(remote)?;

        let mut state = self.state.lock().await;
        let previous = state.dashboards.remove(id);
        for widget in loaded.widgets.iter() {
            let unchanged = previous
                .as_ref()
                .and_then(|p| p.widgets.get(&widget.id))
                .is_some_and(|old| old.same_data_binding(widget));
            if !unchanged {
                self.fetcher.mount(id, widget).await;
            }
        }
        if let Some(previous) = &previous {
            for old in previous.widgets.iter() {
                if !loaded.widgets.contains(&old.id) {
                    self.fetcher.unmount(id, &old.id).await;
                }
            }
        }

        let snapshot = loaded.snapshot();
        state.dashboards.insert(id.clone(), loaded);
        debug!(dashboard_id = %id, widgets = snapshot.widgets.len(), "dashboard loaded");
        Ok(snapshot)
    }

    /// Current local view, optimistic changes included.
    pub async fn snapshot(&self, id: &DashboardId) -> Option<Dashboard> {
        self.state.lock().await.dashboards.get(id).map(LoadedDashboard::snapshot)
    }

    /// Drops the local copy and cancels its fetches; nothing is deleted.
    pub async fn close_dashboard(&self, id: &DashboardId) -> bool {
        let mut state = self.state.lock().await;
        let was_loaded = state.dashboards.remove(id).is_some();
        self.fetcher.unmount_dashboard(id).await;
        was_loaded
    }

    pub async fn create_dashboard(&self, new: NewDashboard) -> DashboardResult<Dashboard> {
        let layout = new.layout.unwrap_or_default();
        LayoutEngine::new(layout.columns)?;

        let temp_id = DashboardId::generate();
        let now = Utc::now();
        {
            let mut state = self.state.lock().await;
            let placeholder = Dashboard {
                id: temp_id.clone(),
                name: new.name.clone(),
                layout_config: layout,
                is_default: new.is_default.unwrap_or(false),
                widgets: Vec::new(),
                created_at: now,
                updated_at: now,
            };
            state
                .dashboards
                .insert(temp_id.clone(), LoadedDashboard::from_remote(placeholder)?);
        }

        let result = self.repository.create_dashboard(&new).await;

        let mut state = self.state.lock().await;
        state.dashboards.remove(&temp_id);
        match result {
            Ok(created) => {
                let loaded = LoadedDashboard::from_remote(created)?;
                for widget in loaded.widgets.iter() {
                    self.fetcher.mount(&loaded.meta.id, widget).await;
                }
                let snapshot = loaded.snapshot();
                info!(dashboard_id = %snapshot.id, name = %snapshot.name, "dashboard created");
                state.dashboards.insert(snapshot.id.clone(), loaded);
                Ok(snapshot)
            }
            Err(e) => {
                drop(state);
                Err(self.fail("create dashboard", e))
            }
        }
    }

    pub async fn update_dashboard(&self, id: &DashboardId, patch: DashboardPatch) -> DashboardResult<Dashboard> {
        self.ensure_loaded(id).await?;
        let gate = self.state.lock().await.gate(id);
        let _shared = gate.read().await;

        let (op, previous_meta) = {
            let mut state = self.state.lock().await;
            let op = state.next_op();
            let loaded = state.loaded(id)?;
            if let Some(layout) = patch.layout {
                let engine = LayoutEngine::new(layout.columns)?;
                for widget in loaded.widgets.iter() {
                    engine.validate(&widget.rect())?;
                }
            }
            let previous_meta = loaded.meta.clone();
            patch.apply_to(&mut loaded.meta);
            loaded.meta_writer = Some(op);
            (op, previous_meta)
        };

        let result = self.repository.update_dashboard(id, &patch).await;

        let mut state = self.state.lock().await;
        let Some(loaded) = state.dashboards.get_mut(id) else {
            return result.map_err(|e| self.fail("update dashboard", e));
        };
        let owns_meta = loaded.meta_writer == Some(op);
        if owns_meta {
            loaded.meta_writer = None;
        }
        match result {
            Ok(mut confirmed) => {
                if owns_meta {
                    confirmed.widgets.clear();
                    loaded.meta = confirmed;
                }
                Ok(loaded.snapshot())
            }
            Err(e) => {
                if owns_meta {
                    loaded.meta = previous_meta;
                }
                drop(state);
                Err(self.fail("update dashboard", e))
            }
        }
    }

    /// Removes the dashboard locally at once; it comes back if the server refuses.
    pub async fn delete_dashboard(&self, id: &DashboardId) -> DashboardResult<()> {
        let gate = self.state.lock().await.gate(id);
        let _exclusive = gate.write().await;
        let removed = {
            let mut state = self.state.lock().await;
            let removed = state.dashboards.remove(id);
            self.fetcher.unmount_dashboard(id).await;
            removed
        };

        match self.repository.delete_dashboard(id).await {
            Ok(()) => {
                info!(dashboard_id = %id, "dashboard deleted");
                Ok(())
            }
            Err(e) => {
                if let Some(loaded) = removed {
                    let mut state = self.state.lock().await;
                    if !state.dashboards.contains_key(id) {
                        for widget in loaded.widgets.iter() {
                            self.fetcher.mount(id, widget).await;
                        }
                        state.dashboards.insert(id.clone(), loaded);
                    }
                }
                Err(self.fail("delete dashboard", e))
            }
        }
    }

    pub async fn add_widget(&self, dashboard_id: &DashboardId, new: NewWidget) -> DashboardResult<Widget> {
        let mut confirmed = self.add_widgets(dashboard_id, vec![new]).await?;
        confirmed
            .pop()
            .ok_or_else(|| DashboardError::Network("server confirmed no widget".to_string()))
    }

    /// Adds several widgets as one operation with a single compaction pass.
    pub async fn add_widgets(&self, dashboard_id: &DashboardId, new: Vec<NewWidget>) -> DashboardResult<Vec<Widget>> {
        self.ensure_loaded(dashboard_id).await?;
        let gate = self.state.lock().await.gate(dashboard_id);
        let _exclusive = gate.write().await;

        let (op, undo, writes) = {
            let mut state = self.state.lock().await;
            let op = state.next_op();
            let loaded = state.loaded(dashboard_id)?;
            let engine = loaded.engine()?;

            let mut incoming = Vec::with_capacity(new.len());
            for widget in new {
                let widget_type = widget_registry::lookup(&widget.kind)?;
                widget_registry::validate_config(widget_type, &widget.config)?;
                engine.validate(&widget.rect())?;
                let mut id = loaded.fresh_widget_id();
                while incoming.iter().any(|w: &Widget| w.id == id) {
                    id = loaded.fresh_widget_id();
                }
                incoming.push(Widget::from_new(id, widget));
            }

            let before = loaded.widgets.placements();
            let new_placements: Vec<Placement> = incoming
                .iter()
                .map(|w| Placement::new(w.id.clone(), w.rect()))
                .collect();
            let after = engine.insert(&before, &new_placements)?;

            let new_ids: HashSet<WidgetId> = incoming.iter().map(|w| w.id.clone()).collect();
            let mut undo = Vec::new();
            for placement in changed_placements(&before, &after) {
                if !new_ids.contains(&placement.id) {
                    undo.push(loaded.claim(op, &placement.id));
                }
            }
            let mut order = Vec::with_capacity(incoming.len());
            for widget in incoming {
                undo.push(loaded.claim(op, &widget.id));
                order.push(widget.id.clone());
                loaded.widgets.push(widget);
            }
            loaded.widgets.apply_placements(&after);

            let writes = PendingWrites {
                creates: order
                    .iter()
                    .filter_map(|id| loaded.widgets.get(id))
                    .map(|w| (w.id.clone(), NewWidget::from(w)))
                    .collect(),
                updates: neighbour_moves(&before, &after, &new_ids, &undo),
                deletes: Vec::new(),
            };
            (op, undo, writes)
        };

        let outcome = self.persist(dashboard_id, writes, "add widget", op, &undo).await?;

        let mut state = self.state.lock().await;
        let Some(loaded) = state.dashboards.get_mut(dashboard_id) else {
            return Ok(outcome.created.into_iter().map(|(_, w)| w).collect());
        };
        let mut confirmed = Vec::new();
        for (temp_id, widget) in outcome.created {
            if loaded.settle(op, &temp_id) {
                loaded.widgets.replace(&temp_id, widget.clone());
                self.fetcher.mount(dashboard_id, &widget).await;
            }
            confirmed.push(widget);
        }
        Self::confirm_updates(loaded, op, outcome.updated);
        Ok(confirmed)
    }

    pub async fn update_widget(
        &self,
        dashboard_id: &DashboardId,
        widget_id: &WidgetId,
        patch: WidgetPatch,
    ) -> DashboardResult<Widget> {
        self.ensure_loaded(dashboard_id).await?;
        let gate = self.state.lock().await.gate(dashboard_id);
        let _shared = gate.read().await;

        let (op, undo, writes, before_widget) = {
            let mut state = self.state.lock().await;
            let op = state.next_op();
            let loaded = state.loaded(dashboard_id)?;
            let engine = loaded.engine()?;
            let current = loaded.widget(widget_id)?.clone();

            if let Some(config) = &patch.config {
                let widget_type = widget_registry::lookup(&current.kind)?;
                widget_registry::validate_config(widget_type, config)?;
            }

            let before = loaded.widgets.placements();
            let after = if patch.touches_layout() {
                let target = patch.target_rect(current.rect());
                engine.validate(&target)?;
                engine.apply_batch(
                    &before,
                    &[
                        LayoutChange::Move {
                            id: widget_id.clone(),
                            x: target.x,
                            y: target.y,
                        },
                        LayoutChange::Resize {
                            id: widget_id.clone(),
                            w: target.w,
                            h: target.h,
                        },
                    ],
                )?
            } else {
                before.clone()
            };

            let mut undo = vec![loaded.claim(op, widget_id)];
            for placement in changed_placements(&before, &after) {
                if &placement.id != widget_id {
                    undo.push(loaded.claim(op, &placement.id));
                }
            }
            loaded.widgets.apply_content(widget_id, &patch);
            loaded.widgets.apply_placements(&after);

            let mut sent = patch.clone();
            if patch.touches_layout() {
                let rect = loaded.widget(widget_id)?.rect();
                sent = WidgetPatch {
                    position_x: Some(rect.x),
                    position_y: Some(rect.y),
                    size_w: Some(rect.w),
                    size_h: Some(rect.h),
                    ..sent
                };
            }
            let mut updates = vec![(widget_id.clone(), sent, full_patch(&current))];
            updates.extend(neighbour_moves(
                &before,
                &after,
                &HashSet::from([widget_id.clone()]),
                &undo,
            ));

            let writes = PendingWrites {
                updates,
                ..PendingWrites::default()
            };
            (op, undo, writes, current)
        };

        let outcome = self.persist(dashboard_id, writes, "update widget", op, &undo).await?;

        let confirmed = outcome
            .updated
            .iter()
            .find(|w| &w.id == widget_id)
            .cloned()
            .ok_or_else(|| DashboardError::widget_not_found(widget_id))?;

        let mut state = self.state.lock().await;
        if let Some(loaded) = state.dashboards.get_mut(dashboard_id) {
            let still_ours = loaded.writers.get(widget_id) == Some(&op);
            Self::confirm_updates(loaded, op, outcome.updated);
            if still_ours && !before_widget.same_data_binding(&confirmed) {
                self.fetcher.mount(dashboard_id, &confirmed).await;
            }
        }
        Ok(confirmed)
    }

    /// Removes the widget and cancels its fetch immediately.
    pub async fn delete_widget(&self, dashboard_id: &DashboardId, widget_id: &WidgetId) -> DashboardResult<()> {
        self.ensure_loaded(dashboard_id).await?;
        let gate = self.state.lock().await.gate(dashboard_id);
        let _shared = gate.read().await;

        let (op, undo, writes) = {
            let mut state = self.state.lock().await;
            let op = state.next_op();
            let loaded = state.loaded(dashboard_id)?;
            let engine = loaded.engine()?;
            loaded.widget(widget_id)?;

            let mut undo = vec![loaded.claim(op, widget_id)];
            loaded.widgets.remove(widget_id);
            let before = loaded.widgets.placements();
            let after = engine.compact(&before);
            for placement in changed_placements(&before, &after) {
                undo.push(loaded.claim(op, &placement.id));
            }
            loaded.widgets.apply_placements(&after);
            self.fetcher.unmount(dashboard_id, widget_id).await;

            let writes = PendingWrites {
                updates: neighbour_moves(&before, &after, &HashSet::new(), &undo),
                deletes: vec![widget_id.clone()],
                ..PendingWrites::default()
            };
            (op, undo, writes)
        };

        let outcome = self.persist(dashboard_id, writes, "delete widget", op, &undo).await?;

        let mut state = self.state.lock().await;
        if let Some(loaded) = state.dashboards.get_mut(dashboard_id) {
            loaded.settle(op, widget_id);
            Self::confirm_updates(loaded, op, outcome.updated);
        }
        Ok(())
    }

    /// Commits a finished drag/resize gesture: the final change for each
    /// widget is applied, the grid is compacted once, and each widget whose
    /// rectangle changed is persisted once.
    pub async fn commit_layout(&self, dashboard_id: &DashboardId, changes: Vec<LayoutChange>) -> DashboardResult<Vec<Widget>> {
        self.ensure_loaded(dashboard_id).await?;
        let gate = self.state.lock().await.gate(dashboard_id);
        let _shared = gate.read().await;

        let (op, undo, writes) = {
            let mut state = self.state.lock().await;
            let op = state.next_op();
            let loaded = state.loaded(dashboard_id)?;
            let engine = loaded.engine()?;

            let before = loaded.widgets.placements();
            let after = engine.apply_batch(&before, &changes)?;
            let changed = changed_placements(&before, &after);
            if changed.is_empty() {
                return Ok(Vec::new());
            }

            let undo: Vec<WidgetUndo> = changed.iter().map(|p| loaded.claim(op, &p.id)).collect();
            loaded.widgets.apply_placements(&after);

            let writes = PendingWrites {
                updates: neighbour_moves(&before, &after, &HashSet::new(), &undo),
                ..PendingWrites::default()
            };
            (op, undo, writes)
        };

        let outcome = self.persist(dashboard_id, writes, "save layout", op, &undo).await?;

        let confirmed = outcome.updated.clone();
        let mut state = self.state.lock().await;
        if let Some(loaded) = state.dashboards.get_mut(dashboard_id) {
            Self::confirm_updates(loaded, op, outcome.updated);
        }
        Ok(confirmed)
    }

    /// Where widgets would sit mid-gesture. Overlaps are allowed and nothing
    /// is stored.
    pub async fn preview_layout(&self, dashboard_id: &DashboardId, change: LayoutChange) -> DashboardResult<Vec<Placement>> {
        let mut state = self.state.lock().await;
        let loaded = state.loaded(dashboard_id)?;
        let engine = loaded.engine()?;
        let current = loaded.widgets.placements();
        match change {
            LayoutChange::Move { id, x, y } => engine.preview_move(&current, &id, x, y),
            LayoutChange::Resize { id, w, h } => engine.preview_resize(&current, &id, w, h),
        }
    }

    pub async fn render(&self, dashboard_id: &DashboardId) -> DashboardResult<Vec<RenderedCell>> {
        let widgets = {
            let mut state = self.state.lock().await;
            state.loaded(dashboard_id)?.widgets.to_vec()
        };
        let states = self.fetcher.states(dashboard_id).await;
        Ok(widget_registry::render_dashboard(&widgets, &states))
    }

    pub async fn retry_widget(&self, dashboard_id: &DashboardId, widget_id: &WidgetId) -> DashboardResult<()> {
        self.fetcher.retry(dashboard_id, widget_id).await
    }

    pub async fn refresh_widget(&self, dashboard_id: &DashboardId, widget_id: &WidgetId) -> DashboardResult<()> {
        self.fetcher.refresh(dashboard_id, widget_id).await
    }

    async fn ensure_loaded(&self, id: &DashboardId) -> DashboardResult<()> {
        if self.state.lock().await.dashboards.contains_key(id) {
            return Ok(());
        }
        self.get_dashboard(id).await.map(|_| ())
    }

    fn confirm_updates(loaded: &mut LoadedDashboard, op: u64, updated: Vec<Widget>) {
        for widget in updated {
            let id = widget.id.clone();
            if loaded.settle(op, &id) {
                loaded.widgets.replace(&id, widget);
            }
        }
    }

    /// Sends the writes; on any failure undoes what already reached the
    /// server, rolls the local state back and notifies.
    async fn persist(
        &self,
        dashboard_id: &DashboardId,
        writes: PendingWrites,
        action: &str,
        op: u64,
        undo: &[WidgetUndo],
    ) -> DashboardResult<WriteOutcome> {
        let repository = &self.repository;
        let creates = join_all(
            writes
                .creates
                .iter()
                .map(|(_, new)| repository.create_widget(dashboard_id, new)),
        );
        let updates = join_all(
            writes
                .updates
                .iter()
                .map(|(id, patch, _)| repository.update_widget(dashboard_id, id, patch)),
        );
        let (created, updated) = futures::join!(creates, updates);

        let mut outcome = WriteOutcome::default();
        let mut failure = None;
        for ((temp_id, _), result) in writes.creates.iter().zip(created) {
            match result {
                Ok(widget) => outcome.created.push((temp_id.clone(), widget)),
                Err(e) => {
                    failure.get_or_insert(e);
                }
            }
        }
        for result in updated {
            match result {
                Ok(widget) => outcome.updated.push(widget),
                Err(e) => {
                    failure.get_or_insert(e);
                }
            }
        }
        // Deletes cannot be undone remotely, so they go last.
        if failure.is_none() {
            for id in &writes.deletes {
                if let Err(e) = repository.delete_widget(dashboard_id, id).await {
                    failure = Some(e);
                    break;
                }
            }
        }

        let Some(error) = failure else {
            return Ok(outcome);
        };

        self.compensate(dashboard_id, &writes, &outcome).await;
        {
            let mut state = self.state.lock().await;
            if let Some(loaded) = state.dashboards.get_mut(dashboard_id) {
                let restored = loaded.rollback(op, undo);
                for widget in &restored {
                    self.fetcher.mount(dashboard_id, widget).await;
                }
            }
        }
        warn!(dashboard_id = %dashboard_id, op, error = %error, "rolled back {}", action);
        Err(self.fail(action, error))
    }

    async fn compensate(&self, dashboard_id: &DashboardId, writes: &PendingWrites, outcome: &WriteOutcome) {
        for (_, widget) in &outcome.created {
            if let Err(e) = self.repository.delete_widget(dashboard_id, &widget.id).await {
                warn!(widget_id = %widget.id, error = %e, "could not remove widget created by a failed operation");
            }
        }
        for widget in &outcome.updated {
            let Some((_, _, revert)) = writes.updates.iter().find(|(id, _, _)| id == &widget.id) else {
                continue;
            };
            if let Err(e) = self.repository.update_widget(dashboard_id, &widget.id, revert).await {
                warn!(widget_id = %widget.id, error = %e, "could not revert widget update");
            }
        }
    }

    fn fail(&self, action: &str, error: DashboardError) -> DashboardError {
        self.notifier
            .notify_failure(&format!("Could not {}: {}", action, error));
        error
    }
}
