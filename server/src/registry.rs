//! C1: Identity & Ownership Registry.
//!
//! Arena-style design: entities live in a dense map keyed by a generational
//! network id (`EntityId`, monotonically allocated — see `core_common::ids`), with the
//! native-handle map as a side index, rather than the handle being primary.

use std::sync::Arc;

use core_common::entity::{Entity, EntityType, NativeHandle, Vec3};
use core_common::ids::{EntityId, EntityIdAllocator, PlayerId};
use dashmap::DashMap;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
	#[error("entity {0} is not registered")]
	NotFound(EntityId),
	#[error("requester {requester} may not transfer ownership of entity {entity} held by {owner}")]
	NotAuthorized { entity: EntityId, owner: PlayerId, requester: PlayerId },
}

/// Owns all entity records and the owner-index. Concurrency: `DashMap` gives
/// per-shard locking, matching the spec's "shared-read, exclusive-write" requirement
/// without a single global lock.
#[derive(Debug, Default)]
pub struct Registry {
	entities: DashMap<EntityId, Entity>,
	by_handle: DashMap<NativeHandle, EntityId>,
	owned_by: DashMap<PlayerId, Vec<EntityId>>,
	allocator: EntityIdAllocator,
}

impl Registry {
	pub fn new() -> Self {
		Self {
			entities: DashMap::new(),
			by_handle: DashMap::new(),
			owned_by: DashMap::new(),
			allocator: EntityIdAllocator::new(),
		}
	}

	/// `Register(handle, type, owner?)`: allocates the next id if `handle` is unknown,
	/// else returns the existing id.
	pub fn register(
		&self,
		handle: NativeHandle,
		entity_type: EntityType,
		owner: Option<PlayerId>,
		position: Vec3,
	) -> EntityId {
		if let Some(existing) = self.by_handle.get(&handle) {
			return *existing;
		}
		let id = self.allocator.alloc();
		let owner = owner.unwrap_or_else(PlayerId::server);
		let mut entity = Entity::new(id, entity_type, owner.clone(), position);
		entity.handle = Some(handle);
		self.entities.insert(id, entity);
		self.by_handle.insert(handle, id);
		self.index_owner(&owner, id);
		id
	}

	/// `RegisterRemote(id, type, owner, position)`: inserts a handle-less record for an
	/// entity spawned by a network directive, advancing the allocator past `id` so
	/// later local allocations never collide with it.
	pub fn register_remote(
		&self,
		id: EntityId,
		entity_type: EntityType,
		owner: PlayerId,
		position: Vec3,
	) {
		let mut entity = Entity::new(id, entity_type, owner.clone(), position);
		entity.is_remote = true;
		self.entities.insert(id, entity);
		self.index_owner(&owner, id);
		self.allocator.advance_past(id);
	}

	/// `SetGameObject(id, handle)`: binds a handle to an existing remote entity.
	pub fn set_game_object(
		&self,
		id: EntityId,
		handle: NativeHandle,
	) -> Result<(), RegistryError> {
		let mut entry =
			self.entities.get_mut(&id).ok_or(RegistryError::NotFound(id))?;
		entry.handle = Some(handle);
		self.by_handle.insert(handle, id);
		Ok(())
	}

	/// `RemapEntityId(oldId, newId)`: rewrites a locally allocated record's id to a
	/// server-assigned one without disturbing handle or state, used when the server
	/// confirms an optimistically spawned entity.
	pub fn remap_entity_id(
		&self,
		old_id: EntityId,
		new_id: EntityId,
	) -> Result<(), RegistryError> {
		let (_, mut entity) =
			self.entities.remove(&old_id).ok_or(RegistryError::NotFound(old_id))?;
		entity.id = new_id;
		if let Some(handle) = entity.handle {
			self.by_handle.insert(handle, new_id);
		}
		if let Some(mut owned) = self.owned_by.get_mut(&entity.owner) {
			if let Some(slot) = owned.iter_mut().find(|e| **e == old_id) {
				*slot = new_id;
			}
		}
		self.entities.insert(new_id, entity);
		self.allocator.advance_past(new_id);
		Ok(())
	}

	/// `FindLocalEntityNear(pos, owner, maxDist)`: linear search for the first
	/// owner-matching entity within `max_dist` (default 5.0).
	pub fn find_local_entity_near(
		&self,
		pos: Vec3,
		owner: &PlayerId,
		max_dist: f64,
	) -> Option<EntityId> {
		self.entities
			.iter()
			.find(|entry| {
				!entry.is_remote
					&& &entry.owner == owner
					&& entry.position.distance(&pos) <= max_dist
			})
			.map(|entry| *entry.key())
	}

	/// `TransferOwnership(id, newOwner, requester)`: succeeds only if `requester` is
	/// SERVER or the current owner.
	pub fn transfer_ownership(
		&self,
		id: EntityId,
		new_owner: PlayerId,
		requester: &PlayerId,
	) -> Result<(), RegistryError> {
		let mut entry =
			self.entities.get_mut(&id).ok_or(RegistryError::NotFound(id))?;
		if !requester.is_server() && requester != &entry.owner {
			return Err(RegistryError::NotAuthorized {
				entity: id,
				owner: entry.owner.clone(),
				requester: requester.clone(),
			});
		}
		let old_owner = entry.owner.clone();
		entry.owner = new_owner.clone();
		drop(entry);
		self.unindex_owner(&old_owner, id);
		self.index_owner(&new_owner, id);
		Ok(())
	}

	/// `RemovePlayer(id)`: deletes all of the owner's entities from the registry.
	///
	/// This is a hard delete, not a reassignment to SERVER. If
	/// reassignment-on-disconnect is desired it must be layered on top by the caller
	/// (e.g. session recovery transferring ownership before eviction), since the
	/// registry itself has no opinion on what "should" happen to a departing player's
	/// entities beyond what it's told.
	pub fn remove_player(&self, owner: &PlayerId) -> Vec<EntityId> {
		let removed = self.owned_by.remove(owner).map(|(_, v)| v).unwrap_or_default();
		for id in &removed {
			if let Some((_, entity)) = self.entities.remove(id) {
				if let Some(handle) = entity.handle {
					self.by_handle.remove(&handle);
				}
			}
		}
		removed
	}

	/// Allocates a fresh id without registering a record, for callers that need the id
	/// before they have a position or handle to register with (e.g. C9 assigning a
	/// newly connecting player's entity id).
	pub fn alloc_id(&self) -> EntityId {
		self.allocator.alloc()
	}

	/// Finds the player's existing entity near `position`, else registers a fresh
	/// handle-less one. Used by C9 when a player reconnects or connects for the first
	/// time and has no native handle yet.
	pub fn register_player_entity(&self, player: PlayerId, position: Vec3) -> EntityId {
		if let Some(existing) = self.find_local_entity_near(position, &player, f64::MAX) {
			return existing;
		}
		let id = self.alloc_id();
		self.register_remote(id, EntityType::Player, player, position);
		id
	}

	pub fn get(&self, id: EntityId) -> Option<Entity> {
		self.entities.get(&id).map(|e| e.clone())
	}

	pub fn update_position(
		&self,
		id: EntityId,
		position: Vec3,
		tick: u64,
	) -> Result<(), RegistryError> {
		let mut entry =
			self.entities.get_mut(&id).ok_or(RegistryError::NotFound(id))?;
		entry.set_position(position, tick);
		Ok(())
	}

	fn index_owner(&self, owner: &PlayerId, id: EntityId) {
		self.owned_by.entry(owner.clone()).or_default().push(id);
	}

	fn unindex_owner(&self, owner: &PlayerId, id: EntityId) {
		if let Some(mut list) = self.owned_by.get_mut(owner) {
			list.retain(|e| *e != id);
		}
	}
}

pub type SharedRegistry = Arc<Registry>;

#[cfg(test)]
mod test {
	use super::*;

	fn server() -> PlayerId {
		PlayerId::server()
	}

	#[test]
	fn register_is_idempotent_per_handle() {
		let reg = Registry::new();
		let handle = NativeHandle(1);
		let id1 = reg.register(handle, EntityType::Player, None, Vec3::ZERO);
		let id2 = reg.register(handle, EntityType::Player, None, Vec3::ZERO);
		assert_eq!(id1, id2);
	}

	#[test]
	fn register_remote_advances_allocator_past_supplied_id() {
		let reg = Registry::new();
		reg.register_remote(EntityId(100), EntityType::Npc, server(), Vec3::ZERO);
		let local_id = reg.register(NativeHandle(9), EntityType::Item, None, Vec3::ZERO);
		assert!(local_id.0 > 100);
	}

	#[test]
	fn remap_preserves_handle_and_state() {
		let reg = Registry::new();
		let handle = NativeHandle(5);
		let id = reg.register(handle, EntityType::Player, Some("alice".into()), Vec3::ZERO);
		reg.remap_entity_id(id, EntityId(9000)).unwrap();
		let entity = reg.get(EntityId(9000)).unwrap();
		assert_eq!(entity.handle, Some(handle));
		assert_eq!(entity.owner, PlayerId::from("alice"));
		assert!(reg.get(id).is_none());
	}

	#[test]
	fn transfer_ownership_requires_server_or_current_owner() {
		let reg = Registry::new();
		let id = reg.register(NativeHandle(1), EntityType::Item, Some("alice".into()), Vec3::ZERO);
		let bob: PlayerId = "bob".into();
		let err = reg.transfer_ownership(id, bob.clone(), &bob).unwrap_err();
		assert!(matches!(err, RegistryError::NotAuthorized { .. }));

		reg.transfer_ownership(id, bob.clone(), &server()).unwrap();
		assert_eq!(reg.get(id).unwrap().owner, bob);
	}

	#[test]
	fn remove_player_deletes_all_their_entities() {
		let reg = Registry::new();
		let alice: PlayerId = "alice".into();
		let a = reg.register(NativeHandle(1), EntityType::Player, Some(alice.clone()), Vec3::ZERO);
		let b = reg.register(NativeHandle(2), EntityType::Item, Some(alice.clone()), Vec3::ZERO);
		let removed = reg.remove_player(&alice);
		assert_eq!(removed.len(), 2);
		assert!(reg.get(a).is_none());
		assert!(reg.get(b).is_none());
	}

	#[test]
	fn find_local_entity_near_respects_owner_and_distance() {
		let reg = Registry::new();
		let alice: PlayerId = "alice".into();
		let near = Vec3 { x: 1.0, y: 0.0, z: 0.0 };
		let far = Vec3 { x: 100.0, y: 0.0, z: 0.0 };
		reg.register(NativeHandle(1), EntityType::Item, Some(alice.clone()), near);
		reg.register(NativeHandle(2), EntityType::Item, Some(alice.clone()), far);

		let found = reg.find_local_entity_near(Vec3::ZERO, &alice, 5.0);
		assert!(found.is_some());
	}
}
