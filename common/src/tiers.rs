//! Replication tiers and conflict taxonomy, shared between the server's
//! replicator/resolver and the wire messages that carry their results.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// A replication class. Each tier has its own rate, reliability, and persistence rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tier {
	/// High-rate, server-wins, never persisted.
	Transient,
	/// Reliable, acked, retried, rejected on conflict.
	Event,
	/// Low-rate, dirty-flagged, acked, retried, persisted.
	Persistent,
}

/// Static per-tier configuration.
#[derive(Debug, Clone, Copy)]
pub struct TierConfig {
	pub rate_hz: u32,
	pub window: Duration,
	pub persist: bool,
	pub max_retries: u32,
	pub ack: bool,
}

impl Tier {
	pub const fn config(self) -> TierConfig {
		match self {
			Tier::Transient => TierConfig {
				rate_hz: 20,
				window: Duration::from_millis(200),
				persist: false,
				max_retries: 0,
				ack: false,
			},
			Tier::Event => TierConfig {
				rate_hz: 30,
				window: Duration::from_millis(500),
				persist: false,
				max_retries: 3,
				ack: true,
			},
			Tier::Persistent => TierConfig {
				rate_hz: 1,
				window: Duration::from_secs(5),
				persist: true,
				max_retries: 5,
				ack: true,
			},
		}
	}
}

/// A replicated game-state property. Unknown/custom properties are carried as
/// `Other(name)` and default to [`Tier::Transient`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Property {
	Position,
	Rotation,
	Velocity,
	Animation,
	CombatAction,
	DamageEvent,
	ItemPickup,
	AbilityUse,
	StatusEffect,
	Inventory,
	Equipment,
	Health,
	Stats,
	Skills,
	FactionRelations,
	QuestProgress,
	Experience,
	Level,
	Buildings,
	Money,
	Other(String),
}

impl Property {
	/// Default property -> tier mapping.
	pub fn default_tier(&self) -> Tier {
		use Property::*;
		match self {
			Position | Rotation | Velocity | Animation => Tier::Transient,
			CombatAction | DamageEvent | ItemPickup | AbilityUse | StatusEffect => {
				Tier::Event
			}
			Inventory | Equipment | Health | Stats | Skills | FactionRelations
			| QuestProgress | Experience | Level | Buildings | Money => {
				Tier::Persistent
			}
			Other(_) => Tier::Transient,
		}
	}
}

/// The kind of contention a pending action participates in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConflictType {
	ItemPickup,
	NpcRecruit,
	ShopInteraction,
	BuildingPlacement,
	EntityModification,
	CombatTarget,
}

/// The resolution strategy applied to a conflict type's pending list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictStrategy {
	FirstWins,
	ServerTimestamp,
	LowerIdWins,
	RejectBoth,
}

impl ConflictType {
	pub fn strategy(self) -> ConflictStrategy {
		use ConflictType::*;
		match self {
			ItemPickup | NpcRecruit | ShopInteraction | BuildingPlacement
			| EntityModification => ConflictStrategy::FirstWins,
			CombatTarget => ConflictStrategy::ServerTimestamp,
		}
	}
}

/// Conflict-resolution strategy applied when a persistent write competes with the
/// existing value in the replicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistentConflictPolicy {
	ServerWins,
	LastWriteWins,
	Reject,
	Merge,
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn tier_config_matches_spec_table() {
		assert_eq!(Tier::Transient.config().rate_hz, 20);
		assert_eq!(Tier::Event.config().max_retries, 3);
		assert_eq!(Tier::Persistent.config().window, Duration::from_secs(5));
		assert!(Tier::Persistent.config().persist);
		assert!(!Tier::Transient.config().persist);
	}

	#[test]
	fn property_defaults_match_spec_mapping() {
		assert_eq!(Property::Position.default_tier(), Tier::Transient);
		assert_eq!(Property::DamageEvent.default_tier(), Tier::Event);
		assert_eq!(Property::Inventory.default_tier(), Tier::Persistent);
		assert_eq!(
			Property::Other("Unknown".into()).default_tier(),
			Tier::Transient
		);
	}

	#[test]
	fn conflict_type_strategy_mapping() {
		assert_eq!(ConflictType::ItemPickup.strategy(), ConflictStrategy::FirstWins);
		assert_eq!(
			ConflictType::CombatTarget.strategy(),
			ConflictStrategy::ServerTimestamp
		);
	}
}
