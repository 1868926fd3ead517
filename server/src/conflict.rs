//! C4: Conflict Resolver.
//!
//! Concurrent writers to the same target are serialized through a per-target pending
//! list rather than a single global lock, mirroring the registry's per-shard locking.

use std::time::{Duration, Instant};

use core_common::ids::{ActionId, EntityId, PlayerId};
use core_common::tiers::{ConflictStrategy, ConflictType};
use dashmap::DashMap;

/// A conflict target: either a single entity or a named resource (e.g. an item pickup
/// that isn't itself an entity).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ConflictTarget {
	Entity(EntityId),
	Resource(String),
}

/// An action waiting on a lock for `target`.
#[derive(Debug, Clone)]
pub struct PendingAction {
	pub id: ActionId,
	pub player: PlayerId,
	pub conflict_type: ConflictType,
	pub submitted_at: Instant,
	pub server_timestamp_ms: u64,
}

/// How a submission was resolved against the current lock holder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
	/// No contention: this action now holds the lock.
	Granted,
	/// This action wins; the given action id (if it was mid-flight) is displaced.
	WinsOver(ActionId),
	/// This action loses to the current holder.
	LosesTo(PlayerId),
	/// `RejectBoth`: both the incoming and the current holder are rejected.
	BothRejected { other_holder: PlayerId },
}

/// Locks are released if unheld/unrefreshed for this long, reclaiming targets whose
/// holder disappeared without an explicit release.
pub const STALE_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

struct Lock {
	holder: PendingAction,
}

/// Per-target locking plus a deterministic resolution strategy per [`ConflictType`].
#[derive(Default)]
pub struct ConflictResolver {
	locks: DashMap<ConflictTarget, Lock>,
}

impl ConflictResolver {
	pub fn new() -> Self {
		Self { locks: DashMap::new() }
	}

	/// Submits an action against `target`, resolving against any existing holder using
	/// `conflict_type`'s strategy.
	pub fn submit(
		&self,
		target: ConflictTarget,
		action: PendingAction,
	) -> Resolution {
		self.reclaim_if_stale(&target);

		let Some(mut existing) = self.locks.get_mut(&target) else {
			let id = action.id;
			self.locks.insert(target, Lock { holder: action });
			let _ = id;
			return Resolution::Granted;
		};

		let strategy = action.conflict_type.strategy();
		match strategy {
			ConflictStrategy::FirstWins => {
				Resolution::LosesTo(existing.holder.player.clone())
			}
			ConflictStrategy::ServerTimestamp => {
				if action.server_timestamp_ms < existing.holder.server_timestamp_ms {
					let displaced = existing.holder.id;
					existing.holder = action;
					Resolution::WinsOver(displaced)
				} else {
					Resolution::LosesTo(existing.holder.player.clone())
				}
			}
			ConflictStrategy::LowerIdWins => {
				if action.player < existing.holder.player {
					let displaced = existing.holder.id;
					existing.holder = action;
					Resolution::WinsOver(displaced)
				} else {
					Resolution::LosesTo(existing.holder.player.clone())
				}
			}
			ConflictStrategy::RejectBoth => {
				let other = existing.holder.player.clone();
				drop(existing);
				self.locks.remove(&target);
				Resolution::BothRejected { other_holder: other }
			}
		}
	}

	/// Explicit release, called once an action completes.
	pub fn release(&self, target: &ConflictTarget, holder: &PlayerId) {
		if let Some(lock) = self.locks.get(target) {
			if &lock.holder.player != holder {
				return;
			}
		} else {
			return;
		}
		self.locks.remove(target);
	}

	pub fn is_locked(&self, target: &ConflictTarget) -> bool {
		self.reclaim_if_stale(target);
		self.locks.contains_key(target)
	}

	fn reclaim_if_stale(&self, target: &ConflictTarget) {
		let stale = self
			.locks
			.get(target)
			.map(|lock| lock.holder.submitted_at.elapsed() > STALE_LOCK_TIMEOUT)
			.unwrap_or(false);
		if stale {
			self.locks.remove(target);
		}
	}
}

#[cfg(test)]
mod test {
	use super::*;

	fn action(id: ActionId, player: &str, conflict: ConflictType, ts: u64) -> PendingAction {
		PendingAction {
			id,
			player: player.into(),
			conflict_type: conflict,
			submitted_at: Instant::now(),
			server_timestamp_ms: ts,
		}
	}

	#[test]
	fn first_submission_is_granted() {
		let cr = ConflictResolver::new();
		let target = ConflictTarget::Resource("item-1".into());
		let resolution = cr.submit(
			target,
			action(ActionId::random(), "alice", ConflictType::ItemPickup, 0),
		);
		assert_eq!(resolution, Resolution::Granted);
	}

	#[test]
	fn item_pickup_race_first_wins() {
		let cr = ConflictResolver::new();
		let target = ConflictTarget::Resource("item-1".into());
		cr.submit(
			target.clone(),
			action(ActionId::random(), "alice", ConflictType::ItemPickup, 0),
		);
		let second = cr.submit(
			target,
			action(ActionId::random(), "bob", ConflictType::ItemPickup, 0),
		);
		assert_eq!(second, Resolution::LosesTo("alice".into()));
	}

	#[test]
	fn entity_modification_is_first_wins() {
		let cr = ConflictResolver::new();
		let target = ConflictTarget::Entity(EntityId(1));
		cr.submit(
			target.clone(),
			action(ActionId::random(), "zed", ConflictType::EntityModification, 0),
		);
		let resolution = cr.submit(
			target,
			action(ActionId::random(), "alice", ConflictType::EntityModification, 0),
		);
		assert_eq!(resolution, Resolution::LosesTo("zed".into()));
	}

	#[test]
	fn combat_target_uses_server_timestamp_lowest_wins() {
		let cr = ConflictResolver::new();
		let target = ConflictTarget::Entity(EntityId(1));
		cr.submit(
			target.clone(),
			action(ActionId::random(), "alice", ConflictType::CombatTarget, 100),
		);
		let earlier = cr.submit(
			target.clone(),
			action(ActionId::random(), "bob", ConflictType::CombatTarget, 50),
		);
		assert!(matches!(earlier, Resolution::WinsOver(_)));
		let later = cr.submit(
			target,
			action(ActionId::random(), "carol", ConflictType::CombatTarget, 999),
		);
		assert_eq!(later, Resolution::LosesTo("bob".into()));
	}

	#[test]
	fn release_frees_the_target_for_a_new_holder() {
		let cr = ConflictResolver::new();
		let target = ConflictTarget::Resource("item-1".into());
		cr.submit(
			target.clone(),
			action(ActionId::random(), "alice", ConflictType::ItemPickup, 0),
		);
		cr.release(&target, &"alice".into());
		assert!(!cr.is_locked(&target));
		let resolution = cr.submit(
			target,
			action(ActionId::random(), "bob", ConflictType::ItemPickup, 0),
		);
		assert_eq!(resolution, Resolution::Granted);
	}
}
