//! The canonical entity record.

use serde::{Deserialize, Serialize};

use crate::ids::{EntityId, PlayerId};

/// A 3-component position or velocity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
	pub x: f64,
	pub y: f64,
	pub z: f64,
}

impl Vec3 {
	pub const ZERO: Vec3 = Vec3 { x: 0.0, y: 0.0, z: 0.0 };

	pub fn distance(&self, other: &Vec3) -> f64 {
		((self.x - other.x).powi(2)
			+ (self.y - other.y).powi(2)
			+ (self.z - other.z).powi(2))
		.sqrt()
	}
}

/// Orientation, represented as a quaternion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quaternion {
	pub x: f64,
	pub y: f64,
	pub z: f64,
	pub w: f64,
}

impl Default for Quaternion {
	fn default() -> Self {
		Self { x: 0.0, y: 0.0, z: 0.0, w: 1.0 }
	}
}

/// A zone coordinate, derived from position by coarse bucketing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ZoneCoord {
	pub cx: i32,
	pub cz: i32,
}

/// Width in world units of a single zone bucket.
pub const ZONE_SIZE: f64 = 64.0;

impl ZoneCoord {
	pub fn from_position(pos: &Vec3) -> Self {
		Self {
			cx: (pos.x / ZONE_SIZE).floor() as i32,
			cz: (pos.z / ZONE_SIZE).floor() as i32,
		}
	}
}

/// The kind of thing an entity represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityType {
	Player,
	Npc,
	Building,
	Item,
	Vehicle,
}

/// An opaque handle into the host process's native game object. Two distinct live
/// entities never share a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NativeHandle(pub u64);

/// A single piece of equipment, by item id.
pub type EquipmentSlot = String;

/// The canonical, server-owned representation of a networked entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
	pub id: EntityId,
	pub entity_type: EntityType,
	pub owner: PlayerId,
	pub position: Vec3,
	pub rotation: Quaternion,
	pub handle: Option<NativeHandle>,
	pub zone: ZoneCoord,
	pub last_update_tick: u64,
	pub is_remote: bool,
	pub equipment: Vec<EquipmentSlot>,
}

impl Entity {
	pub fn new(
		id: EntityId,
		entity_type: EntityType,
		owner: PlayerId,
		position: Vec3,
	) -> Self {
		Self {
			id,
			entity_type,
			owner,
			position,
			rotation: Quaternion::default(),
			handle: None,
			zone: ZoneCoord::from_position(&position),
			last_update_tick: 0,
			is_remote: false,
			equipment: Vec::new(),
		}
	}

	pub fn set_position(&mut self, position: Vec3, tick: u64) {
		self.position = position;
		self.zone = ZoneCoord::from_position(&position);
		self.last_update_tick = tick;
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn zone_coord_buckets_by_zone_size() {
		let a = ZoneCoord::from_position(&Vec3 { x: 10.0, y: 0.0, z: 10.0 });
		let b = ZoneCoord::from_position(&Vec3 { x: 63.9, y: 0.0, z: 0.0 });
		let c = ZoneCoord::from_position(&Vec3 { x: 64.0, y: 0.0, z: 0.0 });
		assert_eq!(a, ZoneCoord { cx: 0, cz: 0 });
		assert_eq!(b, ZoneCoord { cx: 0, cz: 0 });
		assert_eq!(c, ZoneCoord { cx: 1, cz: 0 });
	}

	#[test]
	fn distance_is_euclidean() {
		let a = Vec3::ZERO;
		let b = Vec3 { x: 3.0, y: 0.0, z: 4.0 };
		assert_eq!(a.distance(&b), 5.0);
	}
}
