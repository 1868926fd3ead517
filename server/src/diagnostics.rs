//! C10: Diagnostics Logger.
//!
//! A lock-guarded ring buffer plus per-player aggregates and tick snapshots for desync
//! diffing. Structured writers emit through `tracing` in addition to being retained here for JSONL export.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use core_common::ids::PlayerId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const RING_CAPACITY: usize = 10_000;
pub const SNAPSHOT_CAPACITY: usize = 100;
pub const ROTATION_BYTES: u64 = 100 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiagnosticKind {
	Tick,
	Position,
	Combat,
	Connection,
	Violation,
	Desync,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticEvent {
	pub id: u64,
	pub kind: DiagnosticKind,
	pub player: Option<PlayerId>,
	pub details: String,
	pub payload: HashMap<String, Value>,
	pub timestamp_ms: u64,
	pub server_tick: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct EntitySnapshot {
	pub entity: u64,
	pub position: core_common::entity::Vec3,
	pub health: f64,
}

/// A tick-keyed world snapshot, retained for [`DiagnosticsLogger::compare_snapshots`].
#[derive(Debug, Clone, Default)]
pub struct StateSnapshot {
	pub tick: u64,
	pub entities: HashMap<u64, EntitySnapshot>,
}

#[derive(Debug, Clone, Default)]
pub struct SnapshotDiff {
	pub position_distance: HashMap<u64, f64>,
	pub health_delta: HashMap<u64, f64>,
	pub appeared: Vec<u64>,
	pub disappeared: Vec<u64>,
}

#[derive(Debug, Default, Clone)]
struct PlayerAggregate {
	totals: HashMap<DiagnosticKind, u64>,
}

pub struct DiagnosticsLogger {
	ring: Mutex<VecDeque<DiagnosticEvent>>,
	snapshots: Mutex<VecDeque<StateSnapshot>>,
	aggregates: Mutex<HashMap<PlayerId, PlayerAggregate>>,
	next_id: AtomicU64,
	flushed_through: AtomicU64,
}

impl Default for DiagnosticsLogger {
	fn default() -> Self {
		Self::new()
	}
}

impl DiagnosticsLogger {
	pub fn new() -> Self {
		Self {
			ring: Mutex::new(VecDeque::with_capacity(RING_CAPACITY)),
			snapshots: Mutex::new(VecDeque::with_capacity(SNAPSHOT_CAPACITY)),
			aggregates: Mutex::new(HashMap::new()),
			next_id: AtomicU64::new(0),
			flushed_through: AtomicU64::new(0),
		}
	}

	fn record(
		&self,
		kind: DiagnosticKind,
		player: Option<PlayerId>,
		details: impl Into<String>,
		payload: HashMap<String, Value>,
		timestamp_ms: u64,
		server_tick: u64,
	) {
		let id = self.next_id.fetch_add(1, Ordering::Relaxed);
		let event = DiagnosticEvent {
			id,
			kind,
			player: player.clone(),
			details: details.into(),
			payload,
			timestamp_ms,
			server_tick,
		};
		tracing::debug!(?kind, ?player, details = %event.details, "diagnostic event");

		{
			let mut ring = self.ring.lock().unwrap();
			ring.push_back(event);
			while ring.len() > RING_CAPACITY {
				ring.pop_front();
			}
		}
		if let Some(player) = player {
			let mut aggregates = self.aggregates.lock().unwrap();
			*aggregates.entry(player).or_default().totals.entry(kind).or_insert(0) += 1;
		}
	}

	pub fn log_tick(&self, server_tick: u64, timestamp_ms: u64, delta_time_ms: u32) {
		let mut payload = HashMap::new();
		payload.insert("delta_time_ms".into(), Value::from(delta_time_ms));
		self.record(
			DiagnosticKind::Tick,
			None,
			format!("tick {server_tick}"),
			payload,
			timestamp_ms,
			server_tick,
		);
	}

	pub fn log_position(
		&self,
		player: PlayerId,
		details: impl Into<String>,
		timestamp_ms: u64,
		server_tick: u64,
	) {
		self.record(
			DiagnosticKind::Position,
			Some(player),
			details,
			HashMap::new(),
			timestamp_ms,
			server_tick,
		);
	}

	pub fn log_combat(
		&self,
		player: PlayerId,
		details: impl Into<String>,
		timestamp_ms: u64,
		server_tick: u64,
	) {
		self.record(
			DiagnosticKind::Combat,
			Some(player),
			details,
			HashMap::new(),
			timestamp_ms,
			server_tick,
		);
	}

	pub fn log_connection(
		&self,
		player: PlayerId,
		details: impl Into<String>,
		timestamp_ms: u64,
		server_tick: u64,
	) {
		self.record(
			DiagnosticKind::Connection,
			Some(player),
			details,
			HashMap::new(),
			timestamp_ms,
			server_tick,
		);
	}

	pub fn log_violation(
		&self,
		player: PlayerId,
		details: impl Into<String>,
		timestamp_ms: u64,
		server_tick: u64,
	) {
		self.record(
			DiagnosticKind::Violation,
			Some(player),
			details,
			HashMap::new(),
			timestamp_ms,
			server_tick,
		);
	}

	pub fn log_desync(
		&self,
		player: PlayerId,
		details: impl Into<String>,
		timestamp_ms: u64,
		server_tick: u64,
	) {
		self.record(
			DiagnosticKind::Desync,
			Some(player),
			details,
			HashMap::new(),
			timestamp_ms,
			server_tick,
		);
	}

	pub fn push_snapshot(&self, snapshot: StateSnapshot) {
		let mut snapshots = self.snapshots.lock().unwrap();
		snapshots.push_back(snapshot);
		while snapshots.len() > SNAPSHOT_CAPACITY {
			snapshots.pop_front();
		}
	}

	pub fn snapshot_at(&self, tick: u64) -> Option<StateSnapshot> {
		self.snapshots.lock().unwrap().iter().find(|s| s.tick == tick).cloned()
	}

	/// `CompareSnapshots(a, b)`: position distance, health delta, and
	/// presence/absence sets between two ticks.
	pub fn compare_snapshots(&self, a: &StateSnapshot, b: &StateSnapshot) -> SnapshotDiff {
		let mut diff = SnapshotDiff::default();
		for (entity, before) in &a.entities {
			match b.entities.get(entity) {
				Some(after) => {
					diff.position_distance
						.insert(*entity, before.position.distance(&after.position));
					diff.health_delta.insert(*entity, after.health - before.health);
				}
				None => diff.disappeared.push(*entity),
			}
		}
		for entity in b.entities.keys() {
			if !a.entities.contains_key(entity) {
				diff.appeared.push(*entity);
			}
		}
		diff
	}

	pub fn player_totals(&self, player: &PlayerId) -> HashMap<DiagnosticKind, u64> {
		self.aggregates
			.lock()
			.unwrap()
			.get(player)
			.map(|a| a.totals.clone())
			.unwrap_or_default()
	}

	/// JSONL export over a range of the ring, for replay.
	pub fn export_range(&self, from_id: u64, to_id: u64) -> Vec<String> {
		self.ring
			.lock()
			.unwrap()
			.iter()
			.filter(|e| e.id >= from_id && e.id <= to_id)
			.filter_map(|e| serde_json::to_string(e).ok())
			.collect()
	}

	/// Returns every event recorded since the last `drain_unflushed` call as JSONL
	/// lines, advancing the flush cursor past them. Events evicted from the ring
	/// before a flush pass reaches them are lost, same as any other bounded buffer.
	pub fn drain_unflushed(&self) -> Vec<String> {
		let cursor = self.flushed_through.load(Ordering::Relaxed);
		let ring = self.ring.lock().unwrap();
		let mut max_id = cursor;
		let lines: Vec<String> = ring
			.iter()
			.filter(|e| e.id >= cursor)
			.filter_map(|e| {
				max_id = max_id.max(e.id + 1);
				serde_json::to_string(e).ok()
			})
			.collect();
		drop(ring);
		self.flushed_through.store(max_id, Ordering::Relaxed);
		lines
	}

	pub fn len(&self) -> usize {
		self.ring.lock().unwrap().len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

/// Formats a Unix-epoch millisecond timestamp as `yyyymmdd_HHMMSS`, UTC, for the
/// rotating diagnostics log filename.
pub fn format_rotation_timestamp(now_ms: u64) -> String {
	let total_secs = now_ms / 1000;
	let days = (total_secs / 86_400) as i64;
	let secs_of_day = total_secs % 86_400;
	let (year, month, day) = civil_from_days(days);
	let hour = secs_of_day / 3600;
	let minute = (secs_of_day % 3600) / 60;
	let second = secs_of_day % 60;
	format!("{year:04}{month:02}{day:02}_{hour:02}{minute:02}{second:02}")
}

/// Howard Hinnant's `civil_from_days`: days since 1970-01-01 (UTC) to (year, month, day).
fn civil_from_days(z: i64) -> (i64, u32, u32) {
	let z = z + 719_468;
	let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
	let doe = (z - era * 146_097) as u64;
	let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
	let y = yoe as i64 + era * 400;
	let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
	let mp = (5 * doy + 2) / 153;
	let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
	let m = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
	let y = if m <= 2 { y + 1 } else { y };
	(y, m, d)
}

#[cfg(test)]
mod test {
	use super::*;
	use core_common::entity::Vec3;

	#[test]
	fn ring_buffer_is_capped() {
		let logger = DiagnosticsLogger::new();
		for i in 0..(RING_CAPACITY + 50) {
			logger.log_tick(i as u64, 0, 50);
		}
		assert_eq!(logger.len(), RING_CAPACITY);
	}

	#[test]
	fn player_aggregates_count_by_kind() {
		let logger = DiagnosticsLogger::new();
		let alice: PlayerId = "alice".into();
		logger.log_violation(alice.clone(), "speed", 0, 0);
		logger.log_violation(alice.clone(), "speed", 0, 0);
		logger.log_position(alice.clone(), "moved", 0, 0);
		let totals = logger.player_totals(&alice);
		assert_eq!(totals.get(&DiagnosticKind::Violation), Some(&2));
		assert_eq!(totals.get(&DiagnosticKind::Position), Some(&1));
	}

	#[test]
	fn snapshot_diff_reports_distance_health_and_presence() {
		let logger = DiagnosticsLogger::new();
		let mut a = StateSnapshot { tick: 1, entities: HashMap::new() };
		a.entities.insert(
			1,
			EntitySnapshot { entity: 1, position: Vec3::ZERO, health: 100.0 },
		);
		a.entities.insert(
			2,
			EntitySnapshot { entity: 2, position: Vec3::ZERO, health: 50.0 },
		);
		let mut b = StateSnapshot { tick: 2, entities: HashMap::new() };
		b.entities.insert(
			1,
			EntitySnapshot {
				entity: 1,
				position: Vec3 { x: 3.0, y: 0.0, z: 4.0 },
				health: 80.0,
			},
		);
		b.entities.insert(
			3,
			EntitySnapshot { entity: 3, position: Vec3::ZERO, health: 10.0 },
		);

		let diff = logger.compare_snapshots(&a, &b);
		assert_eq!(diff.position_distance.get(&1), Some(&5.0));
		assert_eq!(diff.health_delta.get(&1), Some(&-20.0));
		assert_eq!(diff.disappeared, vec![2]);
		assert_eq!(diff.appeared, vec![3]);
	}

	#[test]
	fn export_range_is_filtered_by_id() {
		let logger = DiagnosticsLogger::new();
		for i in 0..5 {
			logger.log_tick(i, 0, 50);
		}
		let exported = logger.export_range(1, 3);
		assert_eq!(exported.len(), 3);
	}

	#[test]
	fn drain_unflushed_only_returns_events_once() {
		let logger = DiagnosticsLogger::new();
		for i in 0..3 {
			logger.log_tick(i, 0, 50);
		}
		let first = logger.drain_unflushed();
		assert_eq!(first.len(), 3);
		assert!(logger.drain_unflushed().is_empty());

		logger.log_tick(3, 0, 50);
		let second = logger.drain_unflushed();
		assert_eq!(second.len(), 1);
	}

	#[test]
	fn rotation_timestamp_formats_a_known_instant() {
		// 2024-01-02T03:04:05Z
		assert_eq!(format_rotation_timestamp(1_704_164_645_000), "20240102_030405");
	}
}
