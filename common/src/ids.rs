//! Identifiers shared between the server core and the client mirror.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Sentinel owner id denoting server ownership of an entity.
pub const SERVER_OWNER: &str = "SERVER";

/// A player's stable identity, stable across disconnects and reconnects.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PlayerId(pub String);

impl PlayerId {
	pub fn server() -> Self {
		Self(SERVER_OWNER.to_string())
	}

	pub fn is_server(&self) -> bool {
		self.0 == SERVER_OWNER
	}
}

impl std::fmt::Display for PlayerId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		self.0.fmt(f)
	}
}

impl From<&str> for PlayerId {
	fn from(value: &str) -> Self {
		Self(value.to_string())
	}
}

/// A stable, monotonically allocated network id for an entity.
///
/// Ids are never reused within a process lifetime.
#[derive(
	Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct EntityId(pub u64);

impl std::fmt::Display for EntityId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		self.0.fmt(f)
	}
}

/// Monotonic allocator for [`EntityId`]s. Shared behind an `Arc` by the registry.
#[derive(Debug, Default)]
pub struct EntityIdAllocator {
	next: AtomicU64,
}

impl EntityIdAllocator {
	/// Entity ids start at 1; 0 is never issued.
	pub fn new() -> Self {
		Self {
			next: AtomicU64::new(1),
		}
	}

	pub fn alloc(&self) -> EntityId {
		EntityId(self.next.fetch_add(1, Ordering::Relaxed))
	}

	/// Advances the allocator past `id` so a later local allocation never collides with
	/// it. Used by `RegisterRemote`.
	pub fn advance_past(&self, id: EntityId) {
		self.next.fetch_max(id.0 + 1, Ordering::Relaxed);
	}
}

macro_rules! make_uuid {
	{$(
		$(#[$meta:meta])*
		$vis:vis struct $ident:ident;
	)*} => {$(
		$(#[$meta])*
		#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
		$vis struct $ident(Uuid);

		impl $ident {
			pub fn random() -> Self {
				Self(Uuid::new_v4())
			}

			pub fn uuid(&self) -> &Uuid {
				&self.0
			}
		}

		impl std::fmt::Display for $ident {
			fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
				self.0.fmt(f)
			}
		}
	)*}
}

make_uuid! {
	/// Identifies a replicated event. Fresh on every
	/// `QueueEvent` call.
	pub struct EventId;

	/// Identifies a pending conflict action.
	pub struct ActionId;
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn allocator_starts_at_one_and_is_monotonic() {
		let alloc = EntityIdAllocator::new();
		assert_eq!(alloc.alloc(), EntityId(1));
		assert_eq!(alloc.alloc(), EntityId(2));
		assert_eq!(alloc.alloc(), EntityId(3));
	}

	#[test]
	fn advance_past_prevents_collision_with_remote_ids() {
		let alloc = EntityIdAllocator::new();
		alloc.advance_past(EntityId(50));
		assert_eq!(alloc.alloc(), EntityId(51));
	}

	#[test]
	fn advance_past_never_goes_backwards() {
		let alloc = EntityIdAllocator::new();
		let _ = alloc.alloc();
		let _ = alloc.alloc();
		alloc.advance_past(EntityId(1));
		// alloc already handed out 1 and 2; advancing past 1 must not rewind it.
		assert_eq!(alloc.alloc(), EntityId(3));
	}
}
