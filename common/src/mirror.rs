//! Read-only client-side save projection.
//!
//! Lives in `core-common` rather than `core-server` so `core-client` can depend on it
//! without pulling in the server's authority engine — the mirror only ever consumes
//! [`SaveSnapshotMessage`]s the server sends, never writes to disk, and has no opinion
//! on how those messages arrived.

use std::collections::HashMap;

use crate::ids::PlayerId;
use crate::messages::SaveSnapshotMessage;
use crate::save_model::PlayerSave;

#[derive(Default)]
pub struct SaveMirror {
	saves: HashMap<PlayerId, PlayerSave>,
	last_sync_version: u64,
}

impl SaveMirror {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn needs_sync(&self, server_version: u64) -> bool {
		server_version > self.last_sync_version
	}

	/// Accepts only authoritative snapshots newer than `last_sync_version`.
	pub fn apply_server_snapshot(
		&mut self,
		snapshot: &SaveSnapshotMessage,
	) -> Result<(), &'static str> {
		if !snapshot.is_authoritative {
			return Err("snapshot is not authoritative");
		}
		if snapshot.save_version <= self.last_sync_version {
			return Err("snapshot is not newer than last synced version");
		}
		self.saves.insert(snapshot.player.clone(), snapshot.payload.clone());
		self.last_sync_version = snapshot.save_version;
		Ok(())
	}

	pub fn get(&self, player: &PlayerId) -> Option<&PlayerSave> {
		self.saves.get(player)
	}

	pub fn last_sync_version(&self) -> u64 {
		self.last_sync_version
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn rejects_non_authoritative_and_stale_snapshots() {
		let mut mirror = SaveMirror::new();
		let save = PlayerSave::default_for("alice".into(), 0);
		let mut snapshot = SaveSnapshotMessage {
			player: "alice".into(),
			save_version: 1,
			timestamp_ms: 0,
			payload: save.clone(),
			is_authoritative: false,
		};
		assert!(mirror.apply_server_snapshot(&snapshot).is_err());

		snapshot.is_authoritative = true;
		assert!(mirror.apply_server_snapshot(&snapshot).is_ok());
		assert_eq!(mirror.last_sync_version(), 1);

		assert!(mirror.apply_server_snapshot(&snapshot).is_err());
		assert!(!mirror.needs_sync(1));
		assert!(mirror.needs_sync(2));
	}
}
