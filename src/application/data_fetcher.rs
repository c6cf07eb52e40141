// Widget data fetcher - one cancellable task per mounted widget
use crate::application::widget_data_source::WidgetDataSource;
use crate::application::widget_registry;
use crate::domain::error::{DashboardError, DashboardResult};
use crate::domain::fetch_state::FetchState;
use crate::domain::ids::{DashboardId, WidgetId};
use crate::domain::widget::{Widget, WidgetType};
use futures::future::{BoxFuture, OptionFuture};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tracing::{debug, warn};

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WidgetKey {
    pub dashboard_id: DashboardId,
    pub widget_id: WidgetId,
}

impl WidgetKey {
    pub fn new(dashboard_id: DashboardId, widget_id: WidgetId) -> Self {
        Self {
            dashboard_id,
            widget_id,
        }
    }
}

/// Published whenever a widget's fetch state actually changes.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchEvent {
    pub dashboard_id: DashboardId,
    pub widget_id: WidgetId,
    pub state: FetchState,
}

#[derive(Debug)]
enum Command {
    Refresh,
}

struct Slot {
    epoch: u64,
    latest_request: u64,
    state: FetchState,
    type_tag: String,
    /// `None` for widgets whose type cannot be fetched at all.
    commands: Option<mpsc::UnboundedSender<Command>>,
    task: Option<JoinHandle<()>>,
}

impl Drop for Slot {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

struct FetchTable {
    slots: HashMap<WidgetKey, Slot>,
    next_epoch: u64,
    events: broadcast::Sender<FetchEvent>,
}

fn publish(events: &broadcast::Sender<FetchEvent>, key: &WidgetKey, state: &FetchState) {
    // Nobody listening is fine.
    let _ = events.send(FetchEvent {
        dashboard_id: key.dashboard_id.clone(),
        widget_id: key.widget_id.clone(),
        state: state.clone(),
    });
}

fn live_slot<'a>(slots: &'a mut HashMap<WidgetKey, Slot>, key: &WidgetKey, epoch: u64) -> DashboardResult<&'a mut Slot> {
    match slots.get_mut(key) {
        Some(slot) if slot.epoch == epoch => Ok(slot),
        _ => Err(DashboardError::StaleResponseDiscarded),
    }
}

impl FetchTable {
    fn new(events: broadcast::Sender<FetchEvent>) -> Self {
        Self {
            slots: HashMap::new(),
            next_epoch: 0,
            events,
        }
    }

    fn allocate_epoch(&mut self) -> u64 {
        self.next_epoch += 1;
        self.next_epoch
    }

    /// Replacing an existing slot drops it, which aborts its task.
    fn insert(&mut self, key: WidgetKey, slot: Slot) {
        publish(&self.events, &key, &slot.state);
        self.slots.insert(key, slot);
    }

    fn set_state(&mut self, key: &WidgetKey, state: FetchState) -> DashboardResult<()> {
        let slot = self
            .slots
            .get_mut(key)
            .ok_or_else(|| DashboardError::widget_not_found(&key.widget_id))?;
        if slot.state != state {
            slot.state = state;
            publish(&self.events, key, &slot.state);
        }
        Ok(())
    }

    fn begin_request(&mut self, key: &WidgetKey, epoch: u64) -> DashboardResult<u64> {
        let slot = live_slot(&mut self.slots, key, epoch)?;
        slot.latest_request += 1;
        if !slot.state.is_loading() {
            slot.state = FetchState::Loading;
            publish(&self.events, key, &slot.state);
        }
        Ok(slot.latest_request)
    }

    fn complete(&mut self, key: &WidgetKey, epoch: u64, request: u64, state: FetchState) -> DashboardResult<()> {
        let slot = live_slot(&mut self.slots, key, epoch)?;
        if request != slot.latest_request {
            return Err(DashboardError::StaleResponseDiscarded);
        }
        slot.state = state;
        publish(&self.events, key, &slot.state);
        Ok(())
    }
}

type PendingFetch = (u64, BoxFuture<'static, DashboardResult<Value>>);

struct WidgetTask {
    key: WidgetKey,
    epoch: u64,
    widget: Widget,
    widget_type: WidgetType,
    source: Arc<dyn WidgetDataSource>,
    table: Weak<Mutex<FetchTable>>,
}

impl WidgetTask {
    async fn run(self, mut commands: mpsc::UnboundedReceiver<Command>) {
        let mut ticker: Option<Interval> = self.widget.refresh_interval().map(|period| {
            let mut ticker = time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });

        let Some(first) = self.issue().await else {
            return;
        };
        let mut in_flight: Option<PendingFetch> = Some(first);

        loop {
            tokio::select! {
                Some(result) = OptionFuture::from(in_flight.as_mut().map(|(_, fut)| fut)) => {
                    if let Some((request, _)) = in_flight.take() {
                        if !self.complete(request, result).await {
                            return;
                        }
                    }
                }
                Some(_) = OptionFuture::from(ticker.as_mut().map(|t| t.tick())) => {
                    debug!(widget_id = %self.key.widget_id, "scheduled refresh");
                    match self.issue().await {
                        Some(next) => in_flight = Some(next),
                        None => return,
                    }
                }
                command = commands.recv() => match command {
                    Some(Command::Refresh) => match self.issue().await {
                        Some(next) => in_flight = Some(next),
                        None => return,
                    },
                    None => return,
                },
            }
        }
    }

    /// Numbers and starts a request. Any request still in flight is dropped
    /// by the caller when this one replaces it.
    async fn issue(&self) -> Option<PendingFetch> {
        let table = self.table.upgrade()?;
        let request = table.lock().await.begin_request(&self.key, self.epoch).ok()?;
        debug!(
            dashboard_id = %self.key.dashboard_id,
            widget_id = %self.key.widget_id,
            request,
            "fetching widget data"
        );

        let source = Arc::clone(&self.source);
        let dashboard_id = self.key.dashboard_id.clone();
        let widget = self.widget.clone();
        let fetch: BoxFuture<'static, DashboardResult<Value>> =
            Box::pin(async move { source.fetch_widget_data(&dashboard_id, &widget).await });
        Some((request, fetch))
    }

    /// Returns false once the table is gone and the task should stop.
    async fn complete(&self, request: u64, result: DashboardResult<Value>) -> bool {
        let state = match result.and_then(|data| {
            widget_registry::check_data_shape(self.widget_type, &data)?;
            Ok(data)
        }) {
            Ok(data) => FetchState::Success { data },
            Err(e) => {
                warn!(widget_id = %self.key.widget_id, error = %e, "widget fetch failed");
                FetchState::Error {
                    reason: e.to_string(),
                    retryable: true,
                }
            }
        };

        let Some(table) = self.table.upgrade() else {
            return false;
        };
        if let Err(e) = table.lock().await.complete(&self.key, self.epoch, request, state) {
            debug!(widget_id = %self.key.widget_id, request, error = %e, "dropping response");
        }
        true
    }
}

/// Every mounted widget gets one tokio task that owns its initial load,
/// periodic refreshes and manual retries. Removing the widget's slot aborts
/// the task, and the task only holds a weak reference back to the table.
///
/// Requests are numbered per widget. A response is written only while the
/// widget is still mounted under the same epoch and it answers the newest
/// request.
pub struct WidgetDataFetcher {
    source: Arc<dyn WidgetDataSource>,
    table: Arc<Mutex<FetchTable>>,
    events: broadcast::Sender<FetchEvent>,
}

impl WidgetDataFetcher {
    pub fn new(source: Arc<dyn WidgetDataSource>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            source,
            table: Arc::new(Mutex::new(FetchTable::new(events.clone()))),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FetchEvent> {
        self.events.subscribe()
    }

    /// Starts loading a widget. Mounting an already mounted widget restarts
    /// it from scratch.
    pub async fn mount(&self, dashboard_id: &DashboardId, widget: &Widget) {
        let key = WidgetKey::new(dashboard_id.clone(), widget.id.clone());
        let type_tag = String::from(widget.kind.clone());
        let mut table = self.table.lock().await;
        let epoch = table.allocate_epoch();

        let widget_type = match widget_registry::lookup(&widget.kind) {
            Ok(widget_type) => widget_type,
            Err(e) => {
                warn!(widget_id = %widget.id, error = %e, "not fetching widget");
                let slot = Slot {
                    epoch,
                    latest_request: 0,
                    state: FetchState::Error {
                        reason: e.to_string(),
                        retryable: false,
                    },
                    type_tag,
                    commands: None,
                    task: None,
                };
                table.insert(key, slot);
                return;
            }
        };

        let (commands, receiver) = mpsc::unbounded_channel();
        let task = WidgetTask {
            key: key.clone(),
            epoch,
            widget: widget.clone(),
            widget_type,
            source: Arc::clone(&self.source),
            table: Arc::downgrade(&self.table),
        };
        let handle = tokio::spawn(task.run(receiver));

        debug!(dashboard_id = %dashboard_id, widget_id = %widget.id, epoch, "widget mounted");
        table.insert(
            key,
            Slot {
                epoch,
                latest_request: 0,
                state: FetchState::Loading,
                type_tag,
                commands: Some(commands),
                task: Some(handle),
            },
        );
    }

    /// Cancels whatever is pending for the widget and forgets its state.
    pub async fn unmount(&self, dashboard_id: &DashboardId, widget_id: &WidgetId) -> bool {
        let key = WidgetKey::new(dashboard_id.clone(), widget_id.clone());
        let removed = self.table.lock().await.slots.remove(&key).is_some();
        if removed {
            debug!(dashboard_id = %dashboard_id, widget_id = %widget_id, "widget unmounted");
        }
        removed
    }

    pub async fn unmount_dashboard(&self, dashboard_id: &DashboardId) -> usize {
        let mut table = self.table.lock().await;
        let before = table.slots.len();
        table.slots.retain(|key, _| &key.dashboard_id != dashboard_id);
        before - table.slots.len()
    }

    /// Re-enters loading from an error state.
    pub async fn retry(&self, dashboard_id: &DashboardId, widget_id: &WidgetId) -> DashboardResult<()> {
        let key = WidgetKey::new(dashboard_id.clone(), widget_id.clone());
        let mut table = self.table.lock().await;
        let slot = table
            .slots
            .get(&key)
            .ok_or_else(|| DashboardError::widget_not_found(widget_id))?;
        if !slot.state.is_error() {
            return Err(DashboardError::validation(format!(
                "widget {} is not in an error state",
                widget_id
            )));
        }
        Self::request_refresh(&mut table, &key)
    }

    /// Forces a new request regardless of the current state.
    pub async fn refresh(&self, dashboard_id: &DashboardId, widget_id: &WidgetId) -> DashboardResult<()> {
        let key = WidgetKey::new(dashboard_id.clone(), widget_id.clone());
        let mut table = self.table.lock().await;
        Self::request_refresh(&mut table, &key)
    }

    fn request_refresh(table: &mut FetchTable, key: &WidgetKey) -> DashboardResult<()> {
        let slot = table
            .slots
            .get(key)
            .ok_or_else(|| DashboardError::widget_not_found(&key.widget_id))?;
        let commands = slot
            .commands
            .clone()
            .ok_or_else(|| DashboardError::UnsupportedWidgetType(slot.type_tag.clone()))?;
        table.set_state(key, FetchState::Loading)?;
        commands
            .send(Command::Refresh)
            .map_err(|_| DashboardError::widget_not_found(&key.widget_id))
    }

    pub async fn state(&self, dashboard_id: &DashboardId, widget_id: &WidgetId) -> Option<FetchState> {
        let key = WidgetKey::new(dashboard_id.clone(), widget_id.clone());
        self.table.lock().await.slots.get(&key).map(|slot| slot.state.clone())
    }

    pub async fn states(&self, dashboard_id: &DashboardId) -> HashMap<WidgetId, FetchState> {
        self.table
            .lock()
            .await
            .slots
            .iter()
            .filter(|(key, _)| &key.dashboard_id == dashboard_id)
            .map(|(key, slot)| (key.widget_id.clone(), slot.state.clone()))
            .collect()
    }

    pub async fn is_mounted(&self, dashboard_id: &DashboardId, widget_id: &WidgetId) -> bool {
        self.state(dashboard_id, widget_id).await.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::widget::{NewWidget, Rect, WidgetKind};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;

    /// Answers every call immediately, failing the first `failures` calls.
    struct CountingSource {
        calls: AtomicUsize,
        failures: usize,
        payload: Value,
    }

    impl CountingSource {
        fn new(payload: Value) -> Arc<Self> {
            Self::failing_first(0, payload)
        }

        fn failing_first(failures: usize, payload: Value) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                failures,
                payload,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl WidgetDataSource for CountingSource {
        async fn fetch_widget_data(&self, _: &DashboardId, _: &Widget) -> DashboardResult<Value> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(DashboardError::Network("connection reset".to_string()));
            }
            Ok(self.payload.clone())
        }
    }

    /// The first call hangs until released; later calls answer at once.
    struct GatedSource {
        calls: AtomicUsize,
        gate: Notify,
    }

    impl GatedSource {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                gate: Notify::new(),
            })
        }
    }

    #[async_trait]
    impl WidgetDataSource for GatedSource {
        async fn fetch_widget_data(&self, _: &DashboardId, _: &Widget) -> DashboardResult<Value> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call == 0 {
                self.gate.notified().await;
                return Ok(json!({"content": "first"}));
            }
            Ok(json!({"content": "second"}))
        }
    }

    fn text_widget(id: &str) -> Widget {
        Widget::from_new(
            WidgetId::from(id),
            NewWidget::new(WidgetType::Text, "Notes", "notes", Rect::new(0, 0, 4, 2)),
        )
    }

    async fn wait_for(events: &mut broadcast::Receiver<FetchEvent>, wanted: impl Fn(&FetchState) -> bool) -> FetchEvent {
        time::timeout(Duration::from_secs(5), async {
            loop {
                let event = events.recv().await.unwrap();
                if wanted(&event.state) {
                    return event;
                }
            }
        })
        .await
        .expect("timed out waiting for fetch event")
    }

    async fn wait_until(mut ready: impl FnMut() -> bool) {
        time::timeout(Duration::from_secs(5), async {
            while !ready() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("condition never became true");
    }

    #[tokio::test]
    async fn test_mount_loads_then_succeeds() {
        let source = CountingSource::new(json!({"content": "hello"}));
        let fetcher = WidgetDataFetcher::new(source.clone());
        let mut events = fetcher.subscribe();
        let dashboard = DashboardId::from("d1");
        let widget = text_widget("w1");

        fetcher.mount(&dashboard, &widget).await;

        assert_eq!(events.recv().await.unwrap().state, FetchState::Loading);
        let done = wait_for(&mut events, |s| !s.is_loading()).await;
        assert_eq!(
            done.state,
            FetchState::Success {
                data: json!({"content": "hello"})
            }
        );
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn test_retry_reenters_loading_from_error() {
        let source = CountingSource::failing_first(1, json!({"content": "ok"}));
        let fetcher = WidgetDataFetcher::new(source.clone());
        let mut events = fetcher.subscribe();
        let dashboard = DashboardId::from("d1");
        let widget = text_widget("w1");

        fetcher.mount(&dashboard, &widget).await;
        let failed = wait_for(&mut events, FetchState::is_error).await;
        assert!(matches!(failed.state, FetchState::Error { retryable: true, .. }));

        fetcher.retry(&dashboard, &widget.id).await.unwrap();
        assert_eq!(fetcher.state(&dashboard, &widget.id).await, Some(FetchState::Loading));

        wait_for(&mut events, |s| matches!(s, FetchState::Success { .. })).await;
        assert_eq!(source.calls(), 2);

        let err = fetcher.retry(&dashboard, &widget.id).await.unwrap_err();
        assert!(matches!(err, DashboardError::Validation(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_interval_issues_fetches_on_cadence() {
        let source = CountingSource::new(json!({"content": "tick"}));
        let fetcher = WidgetDataFetcher::new(source.clone());
        let dashboard = DashboardId::from("d1");
        let mut widget = text_widget("w1");
        widget.refresh_interval_seconds = Some(5);

        fetcher.mount(&dashboard, &widget).await;
        time::sleep(Duration::from_secs(12)).await;

        // Initial load plus refreshes at t=5 and t=10.
        assert_eq!(source.calls(), 3);
    }

    #[tokio::test]
    async fn test_unmount_while_pending_never_writes_state() {
        let source = GatedSource::new();
        let fetcher = WidgetDataFetcher::new(source.clone());
        let mut events = fetcher.subscribe();
        let dashboard = DashboardId::from("d1");
        let widget = text_widget("w1");

        fetcher.mount(&dashboard, &widget).await;
        assert_eq!(events.recv().await.unwrap().state, FetchState::Loading);
        wait_until(|| source.calls.load(Ordering::SeqCst) == 1).await;

        assert!(fetcher.unmount(&dashboard, &widget.id).await);
        source.gate.notify_waiters();
        time::sleep(Duration::from_millis(50)).await;

        assert!(matches!(
            events.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
        assert_eq!(fetcher.state(&dashboard, &widget.id).await, None);
        assert!(!fetcher.is_mounted(&dashboard, &widget.id).await);
    }

    #[tokio::test]
    async fn test_refresh_supersedes_in_flight_request() {
        let source = GatedSource::new();
        let fetcher = WidgetDataFetcher::new(source.clone());
        let mut events = fetcher.subscribe();
        let dashboard = DashboardId::from("d1");
        let widget = text_widget("w1");

        fetcher.mount(&dashboard, &widget).await;
        wait_until(|| source.calls.load(Ordering::SeqCst) == 1).await;

        fetcher.refresh(&dashboard, &widget.id).await.unwrap();
        let done = wait_for(&mut events, |s| matches!(s, FetchState::Success { .. })).await;
        assert_eq!(
            done.state,
            FetchState::Success {
                data: json!({"content": "second"})
            }
        );

        // The first request's answer has nowhere to land any more.
        source.gate.notify_waiters();
        time::sleep(Duration::from_millis(50)).await;
        assert_eq!(
            fetcher.state(&dashboard, &widget.id).await,
            Some(FetchState::Success {
                data: json!({"content": "second"})
            })
        );
    }

    #[tokio::test]
    async fn test_stale_completion_is_discarded() {
        let (events, _) = broadcast::channel(8);
        let mut table = FetchTable::new(events);
        let key = WidgetKey::new(DashboardId::from("d1"), WidgetId::from("w1"));
        let epoch = table.allocate_epoch();
        table.insert(
            key.clone(),
            Slot {
                epoch,
                latest_request: 0,
                state: FetchState::Loading,
                type_tag: "TEXT".to_string(),
                commands: None,
                task: None,
            },
        );

        let first = table.begin_request(&key, epoch).unwrap();
        let second = table.begin_request(&key, epoch).unwrap();
        let stale = table.complete(&key, epoch, first, FetchState::Success { data: json!({}) });
        assert_eq!(stale, Err(DashboardError::StaleResponseDiscarded));
        assert!(table.complete(&key, epoch, second, FetchState::Success { data: json!({}) }).is_ok());

        // A response from an earlier mount of the same widget is just as stale.
        let old_epoch = table.complete(&key, epoch + 1, second, FetchState::Loading);
        assert_eq!(old_epoch, Err(DashboardError::StaleResponseDiscarded));

        table.slots.remove(&key);
        let gone = table.complete(&key, epoch, second, FetchState::Loading);
        assert_eq!(gone, Err(DashboardError::StaleResponseDiscarded));
    }

    #[tokio::test]
    async fn test_unsupported_type_is_an_isolated_error() {
        let source = CountingSource::new(json!({}));
        let fetcher = WidgetDataFetcher::new(source.clone());
        let dashboard = DashboardId::from("d1");
        let mut widget = text_widget("w1");
        widget.kind = WidgetKind::Unsupported("SANKEY".to_string());

        fetcher.mount(&dashboard, &widget).await;

        assert!(matches!(
            fetcher.state(&dashboard, &widget.id).await,
            Some(FetchState::Error { retryable: false, .. })
        ));
        let err = fetcher.retry(&dashboard, &widget.id).await.unwrap_err();
        assert_eq!(err, DashboardError::UnsupportedWidgetType("SANKEY".to_string()));
        assert_eq!(source.calls(), 0);
    }

    #[tokio::test]
    async fn test_payload_missing_required_keys_is_an_error() {
        let source = CountingSource::new(json!({"body": "wrong key"}));
        let fetcher = WidgetDataFetcher::new(source);
        let mut events = fetcher.subscribe();
        let dashboard = DashboardId::from("d1");

        fetcher.mount(&dashboard, &text_widget("w1")).await;

        let failed = wait_for(&mut events, FetchState::is_error).await;
        let FetchState::Error { reason, .. } = failed.state else {
            unreachable!()
        };
        assert!(reason.contains("content"));
    }

    #[tokio::test]
    async fn test_unmount_dashboard_only_touches_that_dashboard() {
        let source = CountingSource::new(json!({"content": "x"}));
        let fetcher = WidgetDataFetcher::new(source);
        let a = DashboardId::from("a");
        let b = DashboardId::from("b");

        fetcher.mount(&a, &text_widget("w1")).await;
        fetcher.mount(&a, &text_widget("w2")).await;
        fetcher.mount(&b, &text_widget("w1")).await;

        assert_eq!(fetcher.unmount_dashboard(&a).await, 2);
        assert!(fetcher.states(&a).await.is_empty());
        assert_eq!(fetcher.states(&b).await.len(), 1);
    }
}
