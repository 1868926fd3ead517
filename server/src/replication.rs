//! C5: State Replicator.
//!
//! Three independently configured tiers (`core_common::tiers::Tier`) share one
//! mechanism: a keyed, versioned slot per `(entity, property)`. The version counter is
//! global across every entry so "later version supersedes earlier" holds across keys,
//! not just within one.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use core_common::ids::{EntityId, EventId, PlayerId};
use core_common::messages::{EventStatus, ReplicatedEvent};
use core_common::tiers::{PersistentConflictPolicy, Property, Tier};
use dashmap::DashMap;

use crate::events::{CoreEvent, EventSink};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StateKey {
	pub entity: EntityId,
	pub property: Property,
}

#[derive(Debug, Clone)]
pub struct StateEntry {
	pub tier: Tier,
	pub value: Vec<u8>,
	pub timestamp_ms: u64,
	pub version: u64,
	pub source: PlayerId,
	pub dirty: bool,
	pub requires_sync: bool,
}

struct RetryTracker {
	created_at: Instant,
	last_attempt: Instant,
	retry_count: u32,
	max_retries: u32,
}

/// Retry threshold: a tracker is only offered for resend once this much time has
/// passed since the last attempt.
pub const RETRY_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Default)]
pub struct Replicator {
	transient: DashMap<StateKey, StateEntry>,
	persistent: DashMap<StateKey, StateEntry>,
	events: DashMap<EventId, ReplicatedEvent>,
	event_queue: Mutex<VecDeque<EventId>>,
	retry_trackers: DashMap<EventId, RetryTracker>,
	version_counter: AtomicU64,
	sink: Option<EventSink>,
}

impl Replicator {
	pub fn new(sink: EventSink) -> Self {
		Self { sink: Some(sink), ..Default::default() }
	}

	fn next_version(&self) -> u64 {
		self.version_counter.fetch_add(1, Ordering::Relaxed) + 1
	}

	/// `UpdateTransient(entity, property, value, source)`: overwrites
	/// unconditionally — tier config is `ServerWins` conflict but in practice the
	/// transient tier just takes the latest write, server-authored or not; the trust
	/// boundary is what gates whether a client write reaches here at all.
	pub fn update_transient(
		&self,
		entity: EntityId,
		property: Property,
		value: Vec<u8>,
		source: PlayerId,
		now_ms: u64,
	) -> u64 {
		let version = self.next_version();
		let key = StateKey { entity, property: property.clone() };
		self.transient.insert(
			key,
			StateEntry {
				tier: property.default_tier(),
				value,
				timestamp_ms: now_ms,
				version,
				source,
				dirty: true,
				requires_sync: true,
			},
		);
		version
	}

	/// `QueueEvent(evt)`: assigns id, version, status=Pending, registers a
	/// retry tracker with the Event tier's max retry count.
	pub fn queue_event(
		&self,
		event_type: String,
		entity: EntityId,
		source_player: PlayerId,
		target_entity: Option<EntityId>,
		payload: core_common::messages::PropertyBag,
		now_ms: u64,
	) -> ReplicatedEvent {
		let id = EventId::random();
		let version = self.next_version();
		let event = ReplicatedEvent {
			id,
			event_type,
			entity,
			source_player,
			target_entity,
			payload,
			timestamp_ms: now_ms,
			version,
			status: EventStatus::Pending,
		};
		self.events.insert(id, event.clone());
		self.event_queue.lock().unwrap().push_back(id);
		let now = Instant::now();
		self.retry_trackers.insert(
			id,
			RetryTracker {
				created_at: now,
				last_attempt: now,
				retry_count: 0,
				max_retries: Tier::Event.config().max_retries,
			},
		);
		event
	}

	/// `UpdatePersistent(entity, property, value, source)`: applies `policy`
	/// against the existing entry (if any); on success writes the entry, marks it
	/// dirty for the save store, and stamps a fresh version.
	pub fn update_persistent(
		&self,
		entity: EntityId,
		property: Property,
		value: Vec<u8>,
		source: PlayerId,
		policy: PersistentConflictPolicy,
		now_ms: u64,
	) -> Result<u64, ()> {
		let key = StateKey { entity, property: property.clone() };
		let existing = self.persistent.get(&key).map(|e| e.clone());

		let should_apply = match policy {
			PersistentConflictPolicy::ServerWins => match &existing {
				Some(e) if e.source.is_server() && !source.is_server() => false,
				_ => true,
			},
			PersistentConflictPolicy::LastWriteWins => true,
			PersistentConflictPolicy::Reject => existing.is_none(),
			// Default merger: take the new value.
			PersistentConflictPolicy::Merge => true,
		};

		if !should_apply {
			return Err(());
		}

		let version = self.next_version();
		self.persistent.insert(
			key,
			StateEntry {
				tier: Tier::Persistent,
				value,
				timestamp_ms: now_ms,
				version,
				source,
				dirty: true,
				requires_sync: true,
			},
		);
		Ok(version)
	}

	/// `GetDirtyTransient()`: entries with `requires_sync = true`. The caller clears
	/// flags afterwards via [`Replicator::clear_transient_sync`].
	pub fn get_dirty_transient(&self) -> Vec<(StateKey, StateEntry)> {
		self.transient
			.iter()
			.filter(|e| e.requires_sync)
			.map(|e| (e.key().clone(), e.value().clone()))
			.collect()
	}

	pub fn clear_transient_sync(&self, keys: &[StateKey]) {
		for key in keys {
			if let Some(mut entry) = self.transient.get_mut(key) {
				entry.requires_sync = false;
			}
		}
	}

	/// `GetPendingEvents(max)`: dequeues up to `max` events FIFO, transitioning
	/// Pending -> Sent.
	pub fn get_pending_events(&self, max: usize) -> Vec<ReplicatedEvent> {
		let mut queue = self.event_queue.lock().unwrap();
		let mut out = Vec::new();
		while out.len() < max {
			let Some(id) = queue.pop_front() else { break };
			if let Some(mut event) = self.events.get_mut(&id) {
				if event.status == EventStatus::Pending {
					event.status = EventStatus::Sent;
				}
				out.push(event.clone());
			}
		}
		out
	}

	/// `GetDirtyPersistent()`: the dirty set for persistence.
	pub fn get_dirty_persistent(&self) -> Vec<(StateKey, StateEntry)> {
		self.persistent
			.iter()
			.filter(|e| e.dirty)
			.map(|e| (e.key().clone(), e.value().clone()))
			.collect()
	}

	pub fn mark_persistent_saved(&self, keys: &[StateKey]) {
		for key in keys {
			if let Some(mut entry) = self.persistent.get_mut(key) {
				entry.dirty = false;
			}
		}
	}

	/// Marks an event acknowledged, removing its retry tracker.
	pub fn acknowledge(&self, event_id: EventId) {
		if let Some(mut event) = self.events.get_mut(&event_id) {
			event.status = EventStatus::Acknowledged;
		}
		self.retry_trackers.remove(&event_id);
	}

	/// `GetPendingRetries()`: trackers overdue for resend and not yet exhausted.
	pub fn get_pending_retries(&self) -> Vec<EventId> {
		let now = Instant::now();
		self.retry_trackers
			.iter()
			.filter(|t| {
				now.saturating_duration_since(t.last_attempt) > RETRY_INTERVAL
					&& t.retry_count < t.max_retries
			})
			.map(|t| *t.key())
			.collect()
	}

	pub fn record_retry_attempt(&self, event_id: EventId) {
		if let Some(mut tracker) = self.retry_trackers.get_mut(&event_id) {
			tracker.last_attempt = Instant::now();
			tracker.retry_count += 1;
		}
	}

	/// `RemoveFailedReplications()`: evicts trackers at/after their retry ceiling,
	/// marking the event Failed and firing `ReplicationFailed` for each.
	pub fn remove_failed_replications(&self) -> Vec<EventId> {
		let expired: Vec<EventId> = self
			.retry_trackers
			.iter()
			.filter(|t| t.retry_count >= t.max_retries)
			.map(|t| *t.key())
			.collect();
		for id in &expired {
			self.retry_trackers.remove(id);
			if let Some(mut event) = self.events.get_mut(id) {
				event.status = EventStatus::Failed;
				if let Some(sink) = &self.sink {
					let _ = sink.send(CoreEvent::ReplicationFailed {
						entity: event.entity,
						event_id: *id,
					});
				}
			}
		}
		expired
	}

	/// `ApplyServerCorrection(entity, property, serverValue, serverVersion)`:
	/// used client-side to force-overwrite transient state regardless of local
	/// version, clearing dirty. Included here because both sides share this type.
	pub fn apply_server_correction(
		&self,
		entity: EntityId,
		property: Property,
		server_value: Vec<u8>,
		server_version: u64,
		now_ms: u64,
	) {
		let tier = property.default_tier();
		let key = StateKey { entity, property };
		self.transient.insert(
			key,
			StateEntry {
				tier,
				value: server_value,
				timestamp_ms: now_ms,
				version: server_version,
				source: PlayerId::server(),
				dirty: false,
				requires_sync: false,
			},
		);
	}

	pub fn get_transient(&self, entity: EntityId, property: &Property) -> Option<StateEntry> {
		self.transient
			.get(&StateKey { entity, property: property.clone() })
			.map(|e| e.clone())
	}

	pub fn get_persistent(&self, entity: EntityId, property: &Property) -> Option<StateEntry> {
		self.persistent
			.get(&StateKey { entity, property: property.clone() })
			.map(|e| e.clone())
	}
}

#[cfg(test)]
mod test {
	use super::*;

	fn server() -> PlayerId {
		PlayerId::server()
	}

	#[test]
	fn update_transient_stamps_monotonic_version() {
		let (tx, _rx) = crate::events::channel(8);
		let rep = Replicator::new(tx);
		let v1 = rep.update_transient(EntityId(1), Property::Position, vec![1], server(), 0);
		let v2 = rep.update_transient(EntityId(1), Property::Position, vec![2], server(), 1);
		assert!(v2 > v1);
	}

	#[test]
	fn dirty_transient_round_trip() {
		let (tx, _rx) = crate::events::channel(8);
		let rep = Replicator::new(tx);
		rep.update_transient(EntityId(1), Property::Position, vec![1], server(), 0);
		let dirty = rep.get_dirty_transient();
		assert_eq!(dirty.len(), 1);
		let keys: Vec<_> = dirty.into_iter().map(|(k, _)| k).collect();
		rep.clear_transient_sync(&keys);
		assert!(rep.get_dirty_transient().is_empty());
	}

	#[test]
	fn server_wins_rejects_client_write_over_server_write() {
		let (tx, _rx) = crate::events::channel(8);
		let rep = Replicator::new(tx);
		rep.update_persistent(
			EntityId(1),
			Property::Health,
			vec![1],
			server(),
			PersistentConflictPolicy::ServerWins,
			0,
		)
		.unwrap();
		let result = rep.update_persistent(
			EntityId(1),
			Property::Health,
			vec![2],
			"alice".into(),
			PersistentConflictPolicy::ServerWins,
			1,
		);
		assert!(result.is_err());
	}

	#[test]
	fn last_write_wins_always_applies() {
		let (tx, _rx) = crate::events::channel(8);
		let rep = Replicator::new(tx);
		rep.update_persistent(
			EntityId(1),
			Property::Health,
			vec![1],
			server(),
			PersistentConflictPolicy::LastWriteWins,
			0,
		)
		.unwrap();
		let result = rep.update_persistent(
			EntityId(1),
			Property::Health,
			vec![2],
			"alice".into(),
			PersistentConflictPolicy::LastWriteWins,
			1,
		);
		assert!(result.is_ok());
	}

	#[test]
	fn pending_events_drain_fifo_and_transition_to_sent() {
		let (tx, _rx) = crate::events::channel(8);
		let rep = Replicator::new(tx);
		rep.queue_event(
			"CombatAction".into(),
			EntityId(1),
			server(),
			None,
			Default::default(),
			0,
		);
		rep.queue_event(
			"CombatAction".into(),
			EntityId(2),
			server(),
			None,
			Default::default(),
			0,
		);
		let drained = rep.get_pending_events(10);
		assert_eq!(drained.len(), 2);
		assert!(drained.iter().all(|e| e.status == EventStatus::Sent));
		assert_eq!(drained[0].entity, EntityId(1));
	}

	#[test]
	fn failed_replications_are_evicted_and_reported() {
		let (tx, mut rx) = crate::events::channel(8);
		let rep = Replicator::new(tx);
		let event = rep.queue_event(
			"CombatAction".into(),
			EntityId(1),
			server(),
			None,
			Default::default(),
			0,
		);
		for _ in 0..Tier::Event.config().max_retries {
			rep.record_retry_attempt(event.id);
		}
		let failed = rep.remove_failed_replications();
		assert_eq!(failed, vec![event.id]);
		assert!(matches!(rx.try_recv().unwrap(), CoreEvent::ReplicationFailed { .. }));
	}
}
