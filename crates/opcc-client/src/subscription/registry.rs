// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use opcc_buffer::OverflowPolicy;
use opcc_config::{SubscriptionConfig, TagDefinition};
use opcc_core::client::{ClientEvent, MonitoredItemRequest, MonitoredItemResult, SubscriptionParams};
use opcc_core::status::{ConnectionStatus, SubscriptionStatus, SubscriptionStatusReport};
use opcc_core::types::{AlarmEvent, DataPoint, ServerId, SubscriptionId};
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{trace, warn};

use super::deadband::DeadbandFilter;
use super::queue::ItemQueue;
use crate::tags::to_engineering;

// =============================================================================
// Entries
// =============================================================================

/// One monitored item of a subscription.
#[derive(Debug, Clone)]
pub(crate) struct MonitoredItem {
    pub tag: TagDefinition,
    pub client_handle: u32,
    pub sampling_interval: Duration,
    pub queue_size: u32,
    pub discard_oldest: bool,
    pub monitored_id: Option<u32>,
    pub error: Option<String>,
    pub filter: DeadbandFilter,
    pub queue: ItemQueue<DataPoint>,
}

impl MonitoredItem {
    fn request(&self) -> MonitoredItemRequest {
        MonitoredItemRequest {
            client_handle: self.client_handle,
            address: self.tag.address.clone(),
            sampling_interval: self.sampling_interval,
            queue_size: self.queue_size,
            discard_oldest: self.discard_oldest,
            deadband: self.filter.settings(),
            eu_range: self.tag.eu_range,
        }
    }
}

/// Client-side state of one subscription.
#[derive(Debug, Clone)]
pub(crate) struct SubscriptionEntry {
    pub id: SubscriptionId,
    pub server_id: ServerId,
    pub config: SubscriptionConfig,
    pub protocol_id: Option<u32>,
    pub items: BTreeMap<u32, MonitoredItem>,
    pub status: SubscriptionStatus,
    pub error: Option<String>,
    pub last_activity: Option<DateTime<Utc>>,
    activity_at: Option<Instant>,
    registered_at: Option<Instant>,
}

impl SubscriptionEntry {
    pub fn new(id: SubscriptionId, config: SubscriptionConfig, items: Vec<MonitoredItem>) -> Self {
        Self {
            id,
            server_id: config.server_id.clone(),
            config,
            protocol_id: None,
            items: items.into_iter().map(|i| (i.client_handle, i)).collect(),
            status: SubscriptionStatus::Connecting,
            error: None,
            last_activity: None,
            activity_at: None,
            registered_at: None,
        }
    }

    pub fn params(&self) -> SubscriptionParams {
        SubscriptionParams {
            publishing_interval: self.config.publishing_interval,
            lifetime_count: self.config.lifetime_count,
            keep_alive_count: self.config.keep_alive_count,
            priority: self.config.priority,
        }
    }

    pub fn item_requests(&self) -> Vec<MonitoredItemRequest> {
        self.items.values().map(MonitoredItem::request).collect()
    }

    fn monitored_count(&self) -> usize {
        self.items.values().filter(|i| i.monitored_id.is_some()).count()
    }

    fn touch(&mut self) {
        self.activity_at = Some(Instant::now());
        self.last_activity = Some(Utc::now());
        if self.protocol_id.is_some() && self.error.is_none() {
            self.status = SubscriptionStatus::Active;
        }
    }

    fn is_stale(&self, now: Instant) -> bool {
        match self.activity_at.or(self.registered_at) {
            Some(since) => now.saturating_duration_since(since) > self.config.lifetime(),
            None => false,
        }
    }

    fn compute_status(&self, connection: ConnectionStatus, now: Instant) -> SubscriptionStatus {
        match connection {
            ConnectionStatus::Connected => {
                if self.error.is_some() {
                    SubscriptionStatus::Error
                } else if self.protocol_id.is_none() {
                    SubscriptionStatus::Connecting
                } else if self.is_stale(now) {
                    SubscriptionStatus::Error
                } else {
                    SubscriptionStatus::Active
                }
            }
            ConnectionStatus::Connecting | ConnectionStatus::Reconnecting => SubscriptionStatus::Connecting,
            ConnectionStatus::Disconnected | ConnectionStatus::Disconnecting | ConnectionStatus::Error => {
                SubscriptionStatus::Disconnected
            }
        }
    }

    fn report(&self) -> SubscriptionStatusReport {
        let error = self.error.clone().or_else(|| {
            if self.status == SubscriptionStatus::Error {
                Some(format!(
                    "no activity within lifetime of {:?}",
                    self.config.lifetime()
                ))
            } else {
                let rejected = self.items.values().filter(|i| i.error.is_some()).count();
                (rejected > 0).then(|| format!("{} monitored item(s) rejected", rejected))
            }
        });
        SubscriptionStatusReport {
            server_id: self.server_id.clone(),
            subscription_id: Some(self.id),
            status: self.status,
            monitored_items: self.monitored_count(),
            last_activity: self.last_activity,
            error,
        }
    }
}

// =============================================================================
// Event outcome
// =============================================================================

/// Records produced from one batch of client events.
#[derive(Debug, Default)]
pub struct EventOutcome {
    /// Reported data points with the overflow policy of their item.
    pub data_points: Vec<(DataPoint, OverflowPolicy)>,
    /// Alarm events to forward.
    pub alarms: Vec<AlarmEvent>,
    /// Keep-alives received.
    pub keep_alives: usize,
    /// Notifications suppressed by a deadband.
    pub filtered: usize,
    /// Values dropped by item queue overflow.
    pub dropped: usize,
    /// Notifications for unknown subscriptions or items.
    pub unmatched: usize,
    /// Whether the batch reported a lost session.
    pub connection_lost: bool,
}

// =============================================================================
// SubscriptionRegistry
// =============================================================================

#[derive(Debug, Default)]
struct RegistryState {
    entries: BTreeMap<SubscriptionId, SubscriptionEntry>,
    by_protocol: HashMap<(ServerId, u32), SubscriptionId>,
}

impl RegistryState {
    fn unbind_server(&mut self, server_id: &ServerId) -> usize {
        self.by_protocol.retain(|(server, _), _| server != server_id);
        let mut count = 0;
        for entry in self.entries.values_mut().filter(|e| &e.server_id == server_id) {
            entry.protocol_id = None;
            entry.registered_at = None;
            entry.activity_at = None;
            entry.status = SubscriptionStatus::Disconnected;
            for item in entry.items.values_mut() {
                item.monitored_id = None;
            }
            count += 1;
        }
        count
    }
}

/// Subscription state shared between the manager and the event pumps.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    state: Mutex<RegistryState>,
}

impl SubscriptionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of subscriptions.
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Returns `true` if there are no subscriptions.
    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    /// Returns `true` if `id` is registered.
    pub fn contains(&self, id: SubscriptionId) -> bool {
        self.state.lock().entries.contains_key(&id)
    }

    /// Server owning `id`.
    pub fn server_of(&self, id: SubscriptionId) -> Option<ServerId> {
        self.state.lock().entries.get(&id).map(|e| e.server_id.clone())
    }

    /// Subscriptions of `server_id`.
    pub fn ids_for_server(&self, server_id: &ServerId) -> Vec<SubscriptionId> {
        self.state
            .lock()
            .entries
            .values()
            .filter(|e| &e.server_id == server_id)
            .map(|e| e.id)
            .collect()
    }

    /// Protocol id currently bound to `id`.
    pub fn protocol_id(&self, id: SubscriptionId) -> Option<u32> {
        self.state.lock().entries.get(&id).and_then(|e| e.protocol_id)
    }

    pub(crate) fn insert(&self, entry: SubscriptionEntry) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if let Some(protocol_id) = entry.protocol_id {
            state
                .by_protocol
                .insert((entry.server_id.clone(), protocol_id), entry.id);
        }
        state.entries.insert(entry.id, entry);
    }

    pub(crate) fn remove(&self, id: SubscriptionId) -> Option<SubscriptionEntry> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let entry = state.entries.remove(&id)?;
        if let Some(protocol_id) = entry.protocol_id {
            state.by_protocol.remove(&(entry.server_id.clone(), protocol_id));
        }
        Some(entry)
    }

    /// Protocol parameters and item requests needed to register `id` again.
    pub(crate) fn registration(&self, id: SubscriptionId) -> Option<(SubscriptionParams, Vec<MonitoredItemRequest>)> {
        self.state
            .lock()
            .entries
            .get(&id)
            .map(|e| (e.params(), e.item_requests()))
    }

    /// Binds a protocol subscription to `id`.
    pub(crate) fn bind(&self, id: SubscriptionId, protocol_id: u32) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let Some(entry) = state.entries.get_mut(&id) else {
            return;
        };
        if let Some(previous) = entry.protocol_id.replace(protocol_id) {
            state.by_protocol.remove(&(entry.server_id.clone(), previous));
        }
        state
            .by_protocol
            .insert((entry.server_id.clone(), protocol_id), id);
        entry.registered_at = Some(Instant::now());
        entry.activity_at = None;
        entry.error = None;
        entry.status = SubscriptionStatus::Active;
    }

    /// Drops the protocol binding of `id`, returning the released id.
    pub(crate) fn release(&self, id: SubscriptionId) -> Option<u32> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let entry = state.entries.get_mut(&id)?;
        let protocol_id = entry.protocol_id.take()?;
        state.by_protocol.remove(&(entry.server_id.clone(), protocol_id));
        entry.registered_at = None;
        for item in entry.items.values_mut() {
            item.monitored_id = None;
        }
        Some(protocol_id)
    }

    /// Records the outcome of monitored item registration.
    pub(crate) fn bind_items(&self, id: SubscriptionId, results: &[MonitoredItemResult]) {
        let mut state = self.state.lock();
        let Some(entry) = state.entries.get_mut(&id) else {
            return;
        };
        for result in results {
            let Some(item) = entry.items.get_mut(&result.client_handle) else {
                continue;
            };
            match &result.result {
                Ok(monitored_id) => {
                    item.monitored_id = Some(*monitored_id);
                    item.error = None;
                }
                Err(reason) => {
                    warn!(
                        server_id = %entry.server_id,
                        subscription_id = %id,
                        tag_id = %item.tag.id,
                        reason = %reason,
                        "Monitored item rejected"
                    );
                    item.monitored_id = None;
                    item.error = Some(reason.clone());
                }
            }
        }
        if !entry.items.is_empty() && entry.items.values().all(|i| i.monitored_id.is_none()) {
            entry.error = Some("all monitored items were rejected".to_string());
            entry.status = SubscriptionStatus::Error;
        }
    }

    /// Records a registration failure.
    pub(crate) fn set_error(&self, id: SubscriptionId, error: String) {
        if let Some(entry) = self.state.lock().entries.get_mut(&id) {
            entry.error = Some(error);
            entry.status = SubscriptionStatus::Error;
        }
    }

    /// Forgets the protocol bindings of a server whose session ended.
    pub fn unbind_server(&self, server_id: &ServerId) -> usize {
        self.state.lock().unbind_server(server_id)
    }

    /// Applies a batch of client events from `server_id`.
    ///
    /// Data changes are scaled to engineering units, pass the item's
    /// deadband in those units and are queued per item; the queues are flushed into the outcome
    /// once the whole batch is processed.
    pub fn apply_events(&self, server_id: &ServerId, events: Vec<ClientEvent>) -> EventOutcome {
        let mut outcome = EventOutcome::default();
        let mut touched: Vec<(SubscriptionId, u32)> = Vec::new();
        let mut seen = HashSet::new();

        let mut guard = self.state.lock();
        let state = &mut *guard;

        for event in events {
            match event {
                ClientEvent::DataChange {
                    subscription,
                    client_handle,
                    value,
                    quality,
                    source_timestamp,
                } => {
                    let Some(id) = state.by_protocol.get(&(server_id.clone(), subscription)).copied() else {
                        outcome.unmatched += 1;
                        continue;
                    };
                    let Some(entry) = state.entries.get_mut(&id) else {
                        outcome.unmatched += 1;
                        continue;
                    };
                    entry.touch();
                    let Some(item) = entry.items.get_mut(&client_handle) else {
                        outcome.unmatched += 1;
                        continue;
                    };

                    let value = to_engineering(&item.tag, value);
                    if !item.filter.should_report(&value, &quality) {
                        outcome.filtered += 1;
                        continue;
                    }
                    let point = DataPoint::new(server_id.clone(), item.tag.id.clone(), value, quality)
                        .with_source_timestamp(source_timestamp);

                    if item.queue.push(point).is_some() {
                        outcome.dropped += 1;
                    }
                    if seen.insert((id, client_handle)) {
                        touched.push((id, client_handle));
                    }
                }
                ClientEvent::KeepAlive { subscription } => {
                    outcome.keep_alives += 1;
                    let id = state.by_protocol.get(&(server_id.clone(), subscription)).copied();
                    match id.and_then(|id| state.entries.get_mut(&id)) {
                        Some(entry) => entry.touch(),
                        None => outcome.unmatched += 1,
                    }
                }
                ClientEvent::Alarm(event) => outcome.alarms.push(event),
                ClientEvent::ConnectionLost { .. } => {
                    state.unbind_server(server_id);
                    outcome.connection_lost = true;
                }
            }
        }

        for (id, handle) in touched {
            if let Some(item) = state.entries.get_mut(&id).and_then(|e| e.items.get_mut(&handle)) {
                let policy = OverflowPolicy::from_discard_oldest(item.queue.discard_oldest());
                outcome
                    .data_points
                    .extend(item.queue.drain().into_iter().map(|p| (p, policy)));
            }
        }

        trace!(
            server_id = %server_id,
            points = outcome.data_points.len(),
            alarms = outcome.alarms.len(),
            filtered = outcome.filtered,
            "Applied client events"
        );
        outcome
    }

    /// Recomputes the status of every subscription of `server_id`.
    pub fn refresh_server(&self, server_id: &ServerId, connection: ConnectionStatus) {
        let now = Instant::now();
        let mut state = self.state.lock();
        for entry in state.entries.values_mut().filter(|e| &e.server_id == server_id) {
            let status = entry.compute_status(connection, now);
            if status != entry.status {
                trace!(
                    server_id = %server_id,
                    subscription_id = %entry.id,
                    from = %entry.status,
                    to = %status,
                    "Subscription status changed"
                );
                entry.status = status;
            }
        }
    }

    /// Status reports of `server_id`'s subscriptions.
    pub fn reports_for_server(&self, server_id: &ServerId) -> Vec<SubscriptionStatusReport> {
        self.state
            .lock()
            .entries
            .values()
            .filter(|e| &e.server_id == server_id)
            .map(SubscriptionEntry::report)
            .collect()
    }

    /// Status of one subscription.
    pub fn status(&self, id: SubscriptionId) -> Option<SubscriptionStatus> {
        self.state.lock().entries.get(&id).map(|e| e.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opcc_config::MonitoredItemConfig;
    use opcc_core::types::{DeadbandSettings, EuRange, Quality, Value};

    fn item(tag: &str, address: &str, handle: u32, queue: usize, discard_oldest: bool) -> MonitoredItem {
        let mut tag = TagDefinition::new(tag, "plc", address);
        tag.scale = 2.0;
        MonitoredItem {
            tag,
            client_handle: handle,
            sampling_interval: Duration::from_millis(100),
            queue_size: queue as u32,
            discard_oldest,
            monitored_id: None,
            error: None,
            filter: DeadbandFilter::new(DeadbandSettings::none(), None).unwrap(),
            queue: ItemQueue::new(queue, discard_oldest),
        }
    }

    fn registry_with(items: Vec<MonitoredItem>) -> (SubscriptionRegistry, SubscriptionId) {
        let registry = SubscriptionRegistry::new();
        let id = SubscriptionId::new(1);
        let config = SubscriptionConfig::new("plc").with_item(MonitoredItemConfig::new("t1"));
        registry.insert(SubscriptionEntry::new(id, config, items));
        registry.bind(id, 7);
        (registry, id)
    }

    fn change(handle: u32, value: f64) -> ClientEvent {
        ClientEvent::DataChange {
            subscription: 7,
            client_handle: handle,
            value: Value::Float64(value),
            quality: Quality::Good,
            source_timestamp: None,
        }
    }

    #[tokio::test]
    async fn test_values_are_scaled_and_queued_per_item() {
        let (registry, _) = registry_with(vec![item("t1", "A", 1, 10, true), item("t2", "B", 2, 10, true)]);
        let server = ServerId::new("plc");

        let outcome = registry.apply_events(&server, vec![change(1, 1.0), change(2, 5.0), change(1, 2.0)]);
        let values: Vec<_> = outcome
            .data_points
            .iter()
            .map(|(p, _)| (p.tag_id.as_str().to_string(), p.value.clone()))
            .collect();
        assert_eq!(
            values,
            vec![
                ("t1".to_string(), Value::Float64(2.0)),
                ("t1".to_string(), Value::Float64(4.0)),
                ("t2".to_string(), Value::Float64(10.0)),
            ]
        );
    }

    #[tokio::test]
    async fn test_percent_deadband_compares_engineering_values() {
        let mut scaled = item("t1", "A", 1, 10, true);
        scaled.tag.scale = 0.1;
        scaled.tag.eu_range = Some(EuRange::new(0.0, 200.0));
        scaled.filter = DeadbandFilter::new(DeadbandSettings::percent(10.0), scaled.tag.eu_range).unwrap();
        let (registry, _) = registry_with(vec![scaled]);

        // 20 engineering units; raw steps of 100 and 50 are 10 and 5 units
        let outcome = registry.apply_events(
            &ServerId::new("plc"),
            vec![change(1, 1000.0), change(1, 1100.0), change(1, 1150.0), change(1, 1250.0)],
        );
        let values: Vec<f64> = outcome
            .data_points
            .iter()
            .filter_map(|(p, _)| p.value.as_f64())
            .collect();
        assert_eq!(values.len(), 2, "reported {:?}", values);
        assert!((values[0] - 100.0).abs() < 1e-9);
        assert!((values[1] - 125.0).abs() < 1e-9);
        assert_eq!(outcome.filtered, 2);
    }

    #[tokio::test]
    async fn test_item_queue_overflow_in_one_batch() {
        let (registry, _) = registry_with(vec![item("t1", "A", 1, 3, true), item("t2", "B", 2, 3, false)]);
        let server = ServerId::new("plc");
        let events = (1..=5)
            .flat_map(|i| [change(1, i as f64), change(2, i as f64)])
            .collect();

        let outcome = registry.apply_events(&server, events);
        assert_eq!(outcome.dropped, 4);
        let by_tag = |tag: &str| -> Vec<Value> {
            outcome
                .data_points
                .iter()
                .filter(|(p, _)| p.tag_id.as_str() == tag)
                .map(|(p, _)| p.value.clone())
                .collect()
        };
        assert_eq!(by_tag("t1"), vec![Value::Float64(6.0), Value::Float64(8.0), Value::Float64(10.0)]);
        assert_eq!(by_tag("t2"), vec![Value::Float64(2.0), Value::Float64(4.0), Value::Float64(6.0)]);
        assert!(outcome
            .data_points
            .iter()
            .any(|(p, policy)| p.tag_id.as_str() == "t2" && *policy == OverflowPolicy::DiscardNewest));
    }

    #[tokio::test]
    async fn test_unknown_subscription_is_unmatched() {
        let (registry, _) = registry_with(vec![item("t1", "A", 1, 1, true)]);
        let outcome = registry.apply_events(
            &ServerId::new("plc"),
            vec![ClientEvent::KeepAlive { subscription: 99 }, change(5, 1.0)],
        );
        assert_eq!(outcome.unmatched, 2);
        assert!(outcome.data_points.is_empty());
    }

    #[tokio::test]
    async fn test_connection_lost_unbinds_server() {
        let (registry, id) = registry_with(vec![item("t1", "A", 1, 1, true)]);
        let outcome = registry.apply_events(
            &ServerId::new("plc"),
            vec![ClientEvent::ConnectionLost { reason: "gone".into() }, change(1, 1.0)],
        );
        assert!(outcome.connection_lost);
        assert_eq!(outcome.unmatched, 1);
        assert_eq!(registry.protocol_id(id), None);
        assert_eq!(registry.status(id), Some(SubscriptionStatus::Disconnected));
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_goes_stale_after_lifetime() {
        let (registry, id) = registry_with(vec![item("t1", "A", 1, 1, true)]);
        let server = ServerId::new("plc");

        registry.refresh_server(&server, ConnectionStatus::Connected);
        assert_eq!(registry.status(id), Some(SubscriptionStatus::Active));

        // default lifetime: 1s * 60
        tokio::time::advance(Duration::from_secs(61)).await;
        registry.refresh_server(&server, ConnectionStatus::Connected);
        assert_eq!(registry.status(id), Some(SubscriptionStatus::Error));
        assert!(registry.reports_for_server(&server)[0].error.is_some());

        registry.apply_events(&server, vec![ClientEvent::KeepAlive { subscription: 7 }]);
        assert_eq!(registry.status(id), Some(SubscriptionStatus::Active));

        registry.refresh_server(&server, ConnectionStatus::Reconnecting);
        assert_eq!(registry.status(id), Some(SubscriptionStatus::Connecting));
        registry.refresh_server(&server, ConnectionStatus::Error);
        assert_eq!(registry.status(id), Some(SubscriptionStatus::Disconnected));
    }

    #[tokio::test]
    async fn test_all_items_rejected_is_error() {
        let (registry, id) = registry_with(vec![item("t1", "A", 1, 1, true)]);
        registry.bind_items(
            id,
            &[MonitoredItemResult {
                client_handle: 1,
                result: Err("BadNodeIdUnknown".into()),
            }],
        );
        assert_eq!(registry.status(id), Some(SubscriptionStatus::Error));
        let report = &registry.reports_for_server(&ServerId::new("plc"))[0];
        assert_eq!(report.monitored_items, 0);
    }
}
