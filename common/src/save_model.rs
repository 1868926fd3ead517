//! Persistent save shapes,
//! shared verbatim between the authoritative server save store and the
//! read-only client mirror.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::entity::Vec3;
use crate::ids::PlayerId;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Stats {
	pub health: f64,
	pub max_health: f64,
	pub level: u32,
	pub xp: f64,
	pub money: i64,
}

impl Default for Stats {
	fn default() -> Self {
		Self { health: 100.0, max_health: 100.0, level: 1, xp: 0.0, money: 100 }
	}
}

/// A single quest's progress, opaque beyond its stage counter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestProgress {
	pub stage: u32,
	pub completed: bool,
}

/// Authoritative per-player persistent state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerSave {
	pub player: PlayerId,
	pub save_version: u64,
	pub created_at_ms: u64,
	pub last_saved_ms: u64,
	pub dirty: bool,
	pub stats: Stats,
	pub position: Vec3,
	pub inventory: HashMap<String, u32>,
	pub skills: HashMap<String, f64>,
	pub faction_relations: HashMap<String, i64>,
	pub quest_progress: HashMap<String, QuestProgress>,
	pub equipment: Vec<String>,
	pub limb_health: HashMap<String, f64>,
}

impl PlayerSave {
	/// A fresh default save: health 100/100, level 1, money 100,
	/// zero position, empty collections.
	pub fn default_for(player: PlayerId, now_ms: u64) -> Self {
		Self {
			player,
			save_version: 0,
			created_at_ms: now_ms,
			last_saved_ms: now_ms,
			dirty: false,
			stats: Stats::default(),
			position: Vec3::ZERO,
			inventory: HashMap::new(),
			skills: HashMap::new(),
			faction_relations: HashMap::new(),
			quest_progress: HashMap::new(),
			equipment: Vec::new(),
			limb_health: HashMap::new(),
		}
	}
}

/// A building placed by a player, as recorded in a world save.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildingRecord {
	pub id: String,
	pub owner: PlayerId,
	pub position: Vec3,
	pub kind: String,
}

/// An NPC's persistent state within a world save.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NpcState {
	pub id: String,
	pub position: Vec3,
	pub health: f64,
}

/// A recorded world event, for replay/audit purposes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldEventRecord {
	pub kind: String,
	pub timestamp_ms: u64,
}

/// Authoritative per-world persistent state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldSave {
	pub world_id: String,
	pub save_version: u64,
	pub dirty: bool,
	pub buildings: Vec<BuildingRecord>,
	pub npc_states: HashMap<String, NpcState>,
	pub world_events: Vec<WorldEventRecord>,
}

impl WorldSave {
	pub fn new(world_id: impl Into<String>) -> Self {
		Self {
			world_id: world_id.into(),
			save_version: 0,
			dirty: false,
			buildings: Vec::new(),
			npc_states: HashMap::new(),
			world_events: Vec::new(),
		}
	}
}
