//! C3: Trust Boundary.
//!
//! Every client-authored message that reaches a validator here has already crossed the
//! wire; nothing downstream (conflict resolution, replication, persistence) trusts a
//! value the trust boundary hasn't checked.
//!
//! Note on an ambiguity between two rules: the flat average-speed cap (15 m/s)
//! and the per-tick movement budget both constrain the same position update, but a
//! burst that's well within one tick's soft-clamp band is expected
//! to be *accepted* via clamping rather than hard-rejected for speed. We resolve this
//! by gating the flat speed check on `dt` exceeding one nominal tick (50 ms, C6's main
//! rate): within a single tick, the per-tick budget/soft-clamp logic is authoritative;
//! the flat cap exists to catch multi-tick bursts (lag spikes, skipped frames) where
//! the per-tick budget alone would otherwise scale up to absurd allowances.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use core_common::entity::Vec3;
use core_common::ids::PlayerId;
use core_common::messages::RejectionReason;
use dashmap::DashMap;

use crate::events::{CoreEvent, EventSink};

pub const MAX_TELEPORT_M: f64 = 50.0;
pub const MAX_SPEED_MPS: f64 = 15.0;
pub const NOMINAL_TICK: Duration = Duration::from_millis(50);
pub const PER_TICK_BUDGET_M: f64 = 3.0;
pub const SOFT_CLAMP_BAND: f64 = 1.5;

pub const MELEE_RANGE_M: f64 = 5.0;
pub const RANGED_RANGE_M: f64 = 100.0;
pub const ATTACK_COOLDOWN: Duration = Duration::from_millis(500);

pub const MIN_QUANTITY: u32 = 1;
pub const MAX_QUANTITY: u32 = 999;
pub const PICKUP_RANGE_M: f64 = 5.0;

pub const MAX_CHAT_LEN: usize = 500;

/// A token bucket, refilled continuously at `refill_per_sec`.
#[derive(Debug, Clone, Copy)]
struct TokenBucket {
	capacity: f64,
	tokens: f64,
	refill_per_sec: f64,
	last_refill: Instant,
}

impl TokenBucket {
	fn new(capacity: f64, refill_per_sec: f64, now: Instant) -> Self {
		Self { capacity, tokens: capacity, refill_per_sec, last_refill: now }
	}

	fn try_consume(&mut self, now: Instant) -> bool {
		let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
		self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
		self.last_refill = now;
		if self.tokens >= 1.0 {
			self.tokens -= 1.0;
			true
		} else {
			false
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum BucketKind {
	General,
	Attack,
	Inventory,
	Chat,
}

struct PlayerBuckets {
	buckets: HashMap<BucketKind, TokenBucket>,
	attack_cooldown: Option<Instant>,
}

impl PlayerBuckets {
	fn new(now: Instant) -> Self {
		let mut buckets = HashMap::new();
		buckets.insert(BucketKind::General, TokenBucket::new(60.0, 60.0, now));
		buckets.insert(BucketKind::Attack, TokenBucket::new(3.0, 3.0, now));
		buckets.insert(BucketKind::Inventory, TokenBucket::new(10.0, 10.0, now));
		buckets.insert(BucketKind::Chat, TokenBucket::new(30.0, 30.0 / 60.0, now));
		Self { buckets, attack_cooldown: None }
	}

	fn allow(&mut self, kind: BucketKind, now: Instant) -> bool {
		self.buckets.get_mut(&kind).expect("all kinds pre-populated").try_consume(now)
	}
}

/// Thresholds at which a violation count triggers an escalation event.
#[derive(Debug, Clone, Copy)]
pub struct ViolationThresholds {
	pub warn_at: u32,
	pub kick_at: u32,
	pub ban_at: u32,
}

impl Default for ViolationThresholds {
	fn default() -> Self {
		Self { warn_at: 3, kick_at: 10, ban_at: 25 }
	}
}

#[derive(Debug, Default, Clone)]
pub struct ViolationRecord {
	pub total: u32,
	pub per_kind: HashMap<String, u32>,
	pub last_violation_ms: u64,
}

pub struct TrustBoundary {
	buckets: DashMap<PlayerId, PlayerBuckets>,
	violations: DashMap<PlayerId, ViolationRecord>,
	thresholds: ViolationThresholds,
	events: EventSink,
}

impl TrustBoundary {
	pub fn new(thresholds: ViolationThresholds, events: EventSink) -> Self {
		Self {
			buckets: DashMap::new(),
			violations: DashMap::new(),
			thresholds,
			events,
		}
	}

	fn buckets_for(&self, player: &PlayerId, now: Instant) -> dashmap::mapref::one::RefMut<'_, PlayerId, PlayerBuckets> {
		self.buckets
			.entry(player.clone())
			.or_insert_with(|| PlayerBuckets::new(now));
		self.buckets.get_mut(player).expect("just inserted")
	}

	/// Records a rejection against `player` for `kind`, firing warn/kick/ban events as
	/// thresholds are crossed.
	fn record_violation(&self, player: &PlayerId, kind: &str, now_ms: u64) {
		let mut record = self.violations.entry(player.clone()).or_default();
		record.total += 1;
		*record.per_kind.entry(kind.to_string()).or_insert(0) += 1;
		record.last_violation_ms = now_ms;
		let total = record.total;
		drop(record);

		if total == self.thresholds.warn_at {
			let _ = self.events.send(CoreEvent::ViolationDetected {
				player: player.clone(),
				kind: kind.to_string(),
				count: total,
			});
		}
		if total == self.thresholds.kick_at {
			let _ = self
				.events
				.send(CoreEvent::PlayerShouldBeKicked { player: player.clone() });
		}
		if total == self.thresholds.ban_at {
			let _ = self
				.events
				.send(CoreEvent::PlayerShouldBeBanned { player: player.clone() });
		}
	}

	/// Explicit operator action: clears all violation counters for `player`.
	pub fn clear_violations(&self, player: &PlayerId) {
		self.violations.remove(player);
	}

	pub fn violation_count(&self, player: &PlayerId) -> u32 {
		self.violations.get(player).map(|r| r.total).unwrap_or(0)
	}

	/// Position update validator.
	pub fn validate_position(
		&self,
		player: &PlayerId,
		old: Vec3,
		new: Vec3,
		dt: Duration,
		now_ms: u64,
	) -> Result<Vec3, RejectionReason> {
		let distance = old.distance(&new);
		let dt_secs = dt.as_secs_f64().max(f64::EPSILON);

		if distance > MAX_TELEPORT_M {
			self.record_violation(player, "teleport", now_ms);
			return Err(RejectionReason::Teleport { distance });
		}

		if dt > NOMINAL_TICK {
			let speed = distance / dt_secs;
			if speed > MAX_SPEED_MPS {
				self.record_violation(player, "speed", now_ms);
				return Err(RejectionReason::SpeedViolation { speed });
			}
		}

		let expected = PER_TICK_BUDGET_M * (dt_secs / NOMINAL_TICK.as_secs_f64());
		if distance > SOFT_CLAMP_BAND * expected {
			self.record_violation(player, "movement_anomaly", now_ms);
			return Err(RejectionReason::MovementAnomaly { distance, budget: expected });
		}
		if distance > expected && expected > 0.0 {
			let t = expected / distance;
			let corrected = Vec3 {
				x: old.x + (new.x - old.x) * t,
				y: old.y + (new.y - old.y) * t,
				z: old.z + (new.z - old.z) * t,
			};
			return Ok(corrected);
		}
		Ok(new)
	}

	/// Combat action validator.
	pub fn validate_combat(
		&self,
		player: &PlayerId,
		attacker_entity: core_common::ids::EntityId,
		attacker_pos: Vec3,
		target_entity: core_common::ids::EntityId,
		target_pos: Vec3,
		ranged: bool,
		now: Instant,
		now_ms: u64,
	) -> Result<(), RejectionReason> {
		if attacker_entity == target_entity {
			self.record_violation(player, "self_target", now_ms);
			return Err(RejectionReason::SelfTarget);
		}

		if !self.buckets_for(player, now).allow(BucketKind::Attack, now) {
			self.record_violation(player, "rate_limited", now_ms);
			return Err(RejectionReason::RateLimited);
		}

		// Cooldown is lag-tolerant: rejected but never counted as a violation.
		{
			let mut buckets = self.buckets_for(player, now);
			if let Some(last) = buckets.attack_cooldown {
				if now.saturating_duration_since(last) < ATTACK_COOLDOWN {
					return Err(RejectionReason::OnCooldown);
				}
			}
		}

		let max_range = if ranged { RANGED_RANGE_M } else { MELEE_RANGE_M };
		let distance = attacker_pos.distance(&target_pos);
		if distance > max_range {
			self.record_violation(player, "range", now_ms);
			return Err(RejectionReason::OutOfRange { distance, max: max_range });
		}

		self.buckets_for(player, now).attack_cooldown = Some(now);
		Ok(())
	}

	/// Inventory action validator.
	pub fn validate_inventory(
		&self,
		player: &PlayerId,
		item_id: &str,
		quantity: u32,
		is_pickup: bool,
		player_pos: Vec3,
		item_pos: Option<Vec3>,
		now: Instant,
		now_ms: u64,
	) -> Result<(), RejectionReason> {
		if !self.buckets_for(player, now).allow(BucketKind::Inventory, now) {
			self.record_violation(player, "rate_limited", now_ms);
			return Err(RejectionReason::RateLimited);
		}
		if item_id.is_empty() {
			self.record_violation(player, "empty_item", now_ms);
			return Err(RejectionReason::EmptyItemId);
		}
		if !(MIN_QUANTITY..=MAX_QUANTITY).contains(&quantity) {
			self.record_violation(player, "quantity", now_ms);
			return Err(RejectionReason::InvalidQuantity);
		}
		if is_pickup {
			let Some(item_pos) = item_pos else {
				self.record_violation(player, "not_near_item", now_ms);
				return Err(RejectionReason::NotNearItem);
			};
			if player_pos.distance(&item_pos) > PICKUP_RANGE_M {
				self.record_violation(player, "not_near_item", now_ms);
				return Err(RejectionReason::NotNearItem);
			}
		}
		Ok(())
	}

	/// Chat validator. Chat itself is an out-of-scope collaborator, but the
	/// trust boundary still rate-limits and bounds it before forwarding.
	pub fn validate_chat(
		&self,
		player: &PlayerId,
		message: &str,
		now: Instant,
		now_ms: u64,
	) -> Result<(), RejectionReason> {
		if !self.buckets_for(player, now).allow(BucketKind::Chat, now) {
			self.record_violation(player, "rate_limited", now_ms);
			return Err(RejectionReason::RateLimited);
		}
		if message.is_empty() {
			return Err(RejectionReason::EmptyChat);
		}
		if message.len() > MAX_CHAT_LEN {
			self.record_violation(player, "chat_length", now_ms);
			return Err(RejectionReason::ChatTooLong);
		}
		Ok(())
	}

	pub fn general_rate_limit(&self, player: &PlayerId, now: Instant) -> bool {
		self.buckets_for(player, now).allow(BucketKind::General, now)
	}
}

#[cfg(test)]
mod test {
	use super::*;

	fn pid() -> PlayerId {
		"alice".into()
	}

	fn bus() -> EventSink {
		crate::events::channel(16).0
	}

	#[test]
	fn speed_hack_is_rejected() {
		let tb = TrustBoundary::new(ViolationThresholds::default(), bus());
		let old = Vec3::ZERO;
		let new = Vec3 { x: 20.0, y: 0.0, z: 0.0 };
		let err = tb
			.validate_position(&pid(), old, new, Duration::from_millis(500), 0)
			.unwrap_err();
		assert!(matches!(err, RejectionReason::SpeedViolation { speed } if (speed - 40.0).abs() < 1e-9));
		assert_eq!(tb.violation_count(&pid()), 1);
	}

	#[test]
	fn soft_clamp_accepts_and_does_not_count_as_violation() {
		let tb = TrustBoundary::new(ViolationThresholds::default(), bus());
		let old = Vec3::ZERO;
		let new = Vec3 { x: 3.5, y: 0.0, z: 0.0 };
		let corrected = tb
			.validate_position(&pid(), old, new, Duration::from_millis(50), 0)
			.expect("should be accepted with soft clamp");
		assert!((corrected.x - 3.0).abs() < 1e-9);
		assert_eq!(tb.violation_count(&pid()), 0);
	}

	#[test]
	fn teleport_is_rejected_regardless_of_dt() {
		let tb = TrustBoundary::new(ViolationThresholds::default(), bus());
		let old = Vec3::ZERO;
		let new = Vec3 { x: 80.0, y: 0.0, z: 0.0 };
		let err = tb
			.validate_position(&pid(), old, new, Duration::from_millis(50), 0)
			.unwrap_err();
		assert!(matches!(err, RejectionReason::Teleport { .. }));
	}

	#[test]
	fn combat_rejects_self_target() {
		let tb = TrustBoundary::new(ViolationThresholds::default(), bus());
		let now = Instant::now();
		let e = core_common::ids::EntityId(1);
		let err = tb
			.validate_combat(&pid(), e, Vec3::ZERO, e, Vec3::ZERO, false, now, 0)
			.unwrap_err();
		assert_eq!(err, RejectionReason::SelfTarget);
	}

	#[test]
	fn combat_cooldown_is_not_counted_as_violation() {
		let tb = TrustBoundary::new(ViolationThresholds::default(), bus());
		let now = Instant::now();
		let a = core_common::ids::EntityId(1);
		let b = core_common::ids::EntityId(2);
		tb.validate_combat(&pid(), a, Vec3::ZERO, b, Vec3::ZERO, false, now, 0).unwrap();
		let err = tb
			.validate_combat(&pid(), a, Vec3::ZERO, b, Vec3::ZERO, false, now, 0)
			.unwrap_err();
		assert_eq!(err, RejectionReason::OnCooldown);
		assert_eq!(tb.violation_count(&pid()), 0);
	}

	#[test]
	fn violation_escalation_fires_each_threshold_exactly_once() {
		let (tx, mut rx) = crate::events::channel(256);
		let tb = TrustBoundary::new(ViolationThresholds::default(), tx);
		for _ in 0..25 {
			let _ = tb.validate_position(
				&pid(),
				Vec3::ZERO,
				Vec3 { x: 999.0, y: 0.0, z: 0.0 },
				Duration::from_millis(50),
				0,
			);
		}
		assert_eq!(tb.violation_count(&pid()), 25);
		let mut kicked = 0;
		let mut banned = 0;
		while let Ok(event) = rx.try_recv() {
			match event {
				CoreEvent::PlayerShouldBeKicked { .. } => kicked += 1,
				CoreEvent::PlayerShouldBeBanned { .. } => banned += 1,
				_ => {}
			}
		}
		assert_eq!(kicked, 1);
		assert_eq!(banned, 1);
	}
}
