//! C2: Authority Policy — a static mapping from game system to {Server, Client}.

use core_common::ids::PlayerId;

/// A tagged game system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GameSystem {
	Position,
	Combat,
	Inventory,
	Ai,
	Trading,
	Building,
	Quests,
	Faction,
	WorldEvents,
	Animation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authority {
	Server,
	Client,
}

impl GameSystem {
	/// The canonical assignment. Unknown systems default to `Server` — there is
	/// no "unknown" variant in this closed enum, but `authority_of` documents the
	/// fallback for callers that map from a wire string.
	pub const fn authority(self) -> Authority {
		match self {
			GameSystem::Animation => Authority::Client,
			_ => Authority::Server,
		}
	}
}

/// Total function: unknown systems default to `Server`.
pub fn authority_of(system: Option<GameSystem>) -> Authority {
	system.map(GameSystem::authority).unwrap_or(Authority::Server)
}

pub fn is_server_authoritative(system: GameSystem) -> bool {
	system.authority() == Authority::Server
}

pub fn is_client_authoritative(system: GameSystem) -> bool {
	system.authority() == Authority::Client
}

/// `CanModify(player, entity, system)`:
/// - SERVER may always modify.
/// - Server-authoritative systems: clients may *request*; the server still validates
///   downstream (trust boundary, conflict resolution). This returns `true` here
///   because the gate at this layer is "may submit a request", not "request accepted".
/// - Client-authoritative systems: only the entity's owner may modify.
pub fn can_modify(
	player: &PlayerId,
	entity_owner: &PlayerId,
	system: GameSystem,
) -> bool {
	if player.is_server() {
		return true;
	}
	match system.authority() {
		Authority::Server => true,
		Authority::Client => player == entity_owner,
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn animation_is_client_authoritative_everything_else_is_server() {
		assert_eq!(GameSystem::Animation.authority(), Authority::Client);
		for system in [
			GameSystem::Position,
			GameSystem::Combat,
			GameSystem::Inventory,
			GameSystem::Ai,
			GameSystem::Trading,
			GameSystem::Building,
			GameSystem::Quests,
			GameSystem::Faction,
			GameSystem::WorldEvents,
		] {
			assert_eq!(system.authority(), Authority::Server, "{system:?}");
		}
	}

	#[test]
	fn server_can_modify_anything() {
		let server = PlayerId::server();
		let owner: PlayerId = "alice".into();
		assert!(can_modify(&server, &owner, GameSystem::Animation));
	}

	#[test]
	fn client_authoritative_requires_ownership() {
		let owner: PlayerId = "alice".into();
		let other: PlayerId = "bob".into();
		assert!(can_modify(&owner, &owner, GameSystem::Animation));
		assert!(!can_modify(&other, &owner, GameSystem::Animation));
	}

	#[test]
	fn server_authoritative_allows_client_request() {
		let owner: PlayerId = "alice".into();
		let other: PlayerId = "bob".into();
		assert!(can_modify(&other, &owner, GameSystem::Position));
	}

	#[test]
	fn unknown_system_defaults_to_server() {
		assert_eq!(authority_of(None), Authority::Server);
	}
}
