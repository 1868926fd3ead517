//! C8: Save Store.
//!
//! Disk layout and defaulting follow `std::fs` + `serde_json` the way the wider
//! monorepo's web backend persists user records (`legacy_web/backend/src/database.rs`);
//! here the write path is async (`tokio::fs`) and single-writer via a semaphore rather
//! than a blocking mutex, since the save store is shared across the tick and transport
//! executors.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use core_common::entity::Vec3;
use core_common::ids::PlayerId;
use core_common::messages::SaveSnapshotMessage;
use core_common::save_model::{PlayerSave, WorldSave};
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::Semaphore;

use crate::events::{CoreEvent, EventSink};

/// Backups beyond this count (by creation order) are pruned.
pub const MAX_BACKUPS: usize = 10;

/// Single default world id this core persists, absent multi-world sharding.
pub const DEFAULT_WORLD_ID: &str = "default";

#[derive(Debug, Error)]
pub enum SaveError {
	#[error("io error: {0}")]
	Io(#[from] std::io::Error),
	#[error("serialization error: {0}")]
	Serde(#[from] serde_json::Error),
}

pub enum StateUpdate {
	Health(f64),
	Experience(f64),
	Money(i64),
	Position(Vec3),
}

pub struct SaveStore {
	base_path: PathBuf,
	players: DashMap<PlayerId, PlayerSave>,
	worlds: DashMap<String, WorldSave>,
	writer: Semaphore,
	version_counter: AtomicU64,
	events: EventSink,
}

impl SaveStore {
	pub fn new(base_path: impl Into<PathBuf>, events: EventSink) -> Self {
		Self {
			base_path: base_path.into(),
			players: DashMap::new(),
			worlds: DashMap::new(),
			writer: Semaphore::new(1),
			version_counter: AtomicU64::new(0),
			events,
		}
	}

	fn next_version(&self) -> u64 {
		self.version_counter.fetch_add(1, Ordering::Relaxed) + 1
	}

	fn player_path(&self, player: &PlayerId) -> PathBuf {
		self.base_path.join("players").join(format!("{player}.json"))
	}

	fn player_backup_path(&self, player: &PlayerId, version: u64) -> PathBuf {
		self.base_path.join("backups").join(format!("{player}_{version}.json"))
	}

	fn world_path(&self, world_id: &str) -> PathBuf {
		self.base_path.join("worlds").join(format!("{world_id}.json"))
	}

	fn world_backup_path(&self, world_id: &str, version: u64) -> PathBuf {
		self.base_path.join("backups").join(format!("world_{world_id}_{version}.json"))
	}

	/// `SavePlayerData(player, data)`.
	pub async fn save_player_data(
		&self,
		player: &PlayerId,
		mut data: PlayerSave,
		now_ms: u64,
	) -> bool {
		let _permit = self.writer.acquire().await.expect("semaphore never closed");
		match self.save_player_inner(player, &mut data, now_ms).await {
			Ok(()) => {
				self.players.insert(player.clone(), data.clone());
				let _ = self.events.send(CoreEvent::PlayerSaved {
					player: player.clone(),
					save_version: data.save_version,
				});
				true
			}
			Err(err) => {
				tracing::error!(%player, error = %err, "player save failed");
				let _ = self.events.send(CoreEvent::SaveError {
					player: Some(player.clone()),
					message: err.to_string(),
				});
				false
			}
		}
	}

	async fn save_player_inner(
		&self,
		player: &PlayerId,
		data: &mut PlayerSave,
		now_ms: u64,
	) -> Result<(), SaveError> {
		let path = self.player_path(player);
		if let Some(parent) = path.parent() {
			tokio::fs::create_dir_all(parent).await?;
		}

		if let Ok(existing) = tokio::fs::read(&path).await {
			let old: PlayerSave = serde_json::from_slice(&existing)?;
			let backup_path = self.player_backup_path(player, old.save_version);
			if let Some(parent) = backup_path.parent() {
				tokio::fs::create_dir_all(parent).await?;
			}
			tokio::fs::write(&backup_path, &existing).await?;
		}

		data.save_version = self.next_version();
		data.last_saved_ms = now_ms;
		data.dirty = false;
		let bytes = serde_json::to_vec_pretty(data)?;
		tokio::fs::write(&path, bytes).await?;
		self.prune_backups(player).await;
		Ok(())
	}

	pub async fn save_world_data(&self, mut data: WorldSave, _now_ms: u64) -> bool {
		let _permit = self.writer.acquire().await.expect("semaphore never closed");
		let world_id = data.world_id.clone();
		match self.save_world_inner(&world_id, &mut data).await {
			Ok(()) => {
				self.worlds.insert(world_id.clone(), data.clone());
				let _ = self.events.send(CoreEvent::WorldSaved {
					world_id,
					save_version: data.save_version,
				});
				true
			}
			Err(err) => {
				tracing::error!(world = %world_id, error = %err, "world save failed");
				let _ = self.events.send(CoreEvent::SaveError {
					player: None,
					message: err.to_string(),
				});
				false
			}
		}
	}

	async fn save_world_inner(
		&self,
		world_id: &str,
		data: &mut WorldSave,
	) -> Result<(), SaveError> {
		let path = self.world_path(world_id);
		if let Some(parent) = path.parent() {
			tokio::fs::create_dir_all(parent).await?;
		}
		if let Ok(existing) = tokio::fs::read(&path).await {
			let old: WorldSave = serde_json::from_slice(&existing)?;
			let backup_path = self.world_backup_path(world_id, old.save_version);
			if let Some(parent) = backup_path.parent() {
				tokio::fs::create_dir_all(parent).await?;
			}
			tokio::fs::write(&backup_path, &existing).await?;
		}
		data.save_version = self.next_version();
		data.dirty = false;
		let bytes = serde_json::to_vec_pretty(data)?;
		tokio::fs::write(&path, bytes).await?;
		Ok(())
	}

	/// Returns a cached world snapshot for resync packets, if one has been loaded.
	pub fn world_snapshot(&self, world_id: &str) -> Option<WorldSave> {
		self.worlds.get(world_id).map(|w| w.clone())
	}

	/// Seeds the in-memory cache with a save obtained out-of-band, e.g. a preserved
	/// session handed back by C7 on reconnect. Does not
	/// touch disk; the next dirty-save pass persists it normally.
	pub fn seed_cache(&self, save: PlayerSave) {
		self.players.insert(save.player.clone(), save);
	}

	/// `LoadPlayerSave(id)`: cache, then disk, then a fresh default.
	pub async fn load_player_save(&self, player: &PlayerId, now_ms: u64) -> PlayerSave {
		if let Some(cached) = self.players.get(player) {
			return cached.clone();
		}
		let path = self.player_path(player);
		let save = match tokio::fs::read(&path).await {
			Ok(bytes) => serde_json::from_slice(&bytes)
				.unwrap_or_else(|_| PlayerSave::default_for(player.clone(), now_ms)),
			Err(_) => PlayerSave::default_for(player.clone(), now_ms),
		};
		self.players.insert(player.clone(), save.clone());
		save
	}

	/// `UpdatePlayerPersistentState(player, property, value)`.
	pub fn update_player_persistent_state(
		&self,
		player: &PlayerId,
		update: StateUpdate,
	) -> Result<(), ()> {
		let Some(mut save) = self.players.get_mut(player) else { return Err(()) };
		match update {
			StateUpdate::Health(value) => {
				if value < 0.0 || value > save.stats.max_health {
					return Err(());
				}
				save.stats.health = value;
			}
			StateUpdate::Experience(value) => {
				if value < 0.0 {
					return Err(());
				}
				save.stats.xp = value;
			}
			StateUpdate::Money(value) => {
				if value < 0 {
					return Err(());
				}
				save.stats.money = value;
			}
			StateUpdate::Position(position) => {
				save.position = position;
			}
		}
		save.dirty = true;
		Ok(())
	}

	/// `SaveAllDirty`: saves and clears dirty on every dirty
	/// player/world. Returns the count of each.
	pub async fn save_all_dirty(&self, now_ms: u64) -> (usize, usize) {
		let dirty_players: Vec<PlayerSave> = self
			.players
			.iter()
			.filter(|e| e.dirty)
			.map(|e| e.value().clone())
			.collect();
		let mut saved_players = 0;
		for save in dirty_players {
			let player = save.player.clone();
			if self.save_player_data(&player, save, now_ms).await {
				saved_players += 1;
			}
		}

		let dirty_worlds: Vec<WorldSave> = self
			.worlds
			.iter()
			.filter(|e| e.dirty)
			.map(|e| e.value().clone())
			.collect();
		let mut saved_worlds = 0;
		for world in dirty_worlds {
			if self.save_world_data(world, now_ms).await {
				saved_worlds += 1;
			}
		}
		(saved_players, saved_worlds)
	}

	/// Keeps the `MAX_BACKUPS` most recent backups for `player`, by file creation
	/// time, pruning the rest.
	async fn prune_backups(&self, player: &PlayerId) {
		let backups_dir = self.base_path.join("backups");
		let prefix = format!("{player}_");
		let mut entries = match tokio::fs::read_dir(&backups_dir).await {
			Ok(entries) => entries,
			Err(_) => return,
		};

		let mut files: Vec<(PathBuf, std::time::SystemTime)> = Vec::new();
		while let Ok(Some(entry)) = entries.next_entry().await {
			let name = entry.file_name();
			let name = name.to_string_lossy();
			if !name.starts_with(&prefix) {
				continue;
			}
			if let Ok(metadata) = entry.metadata().await {
				if let Ok(created) = metadata.created().or_else(|_| metadata.modified()) {
					files.push((entry.path(), created));
				}
			}
		}
		files.sort_by(|a, b| b.1.cmp(&a.1));
		for (path, _) in files.into_iter().skip(MAX_BACKUPS) {
			let _ = tokio::fs::remove_file(path).await;
		}
	}

	/// `CreateClientSnapshot(player)`.
	pub fn create_client_snapshot(
		&self,
		player: &PlayerId,
		now_ms: u64,
	) -> Option<SaveSnapshotMessage> {
		let save = self.players.get(player)?.clone();
		Some(SaveSnapshotMessage {
			player: player.clone(),
			save_version: save.save_version,
			timestamp_ms: now_ms,
			payload: save,
			is_authoritative: true,
		})
	}

	pub fn player_dirty_count(&self) -> usize {
		self.players.iter().filter(|e| e.dirty).count()
	}

	/// Direct mutable access to a cached save, for callers (C9) that need to mutate a
	/// field `update_player_persistent_state` doesn't cover, e.g. inventory counts.
	pub fn players_mut(
		&self,
		player: &PlayerId,
	) -> Option<dashmap::mapref::one::RefMut<'_, PlayerId, PlayerSave>> {
		self.players.get_mut(player)
	}
}

#[cfg(test)]
mod test {
	use super::*;

	fn store() -> (SaveStore, tempfile::TempDir) {
		let dir = tempfile::tempdir().unwrap();
		let (tx, _rx) = crate::events::channel(8);
		(SaveStore::new(dir.path(), tx), dir)
	}

	#[tokio::test]
	async fn load_missing_save_returns_default() {
		let (store, _dir) = store();
		let save = store.load_player_save(&"alice".into(), 0).await;
		assert_eq!(save.stats.health, 100.0);
		assert_eq!(save.stats.money, 100);
	}

	#[tokio::test]
	async fn save_then_load_round_trips_and_bumps_version() {
		let (store, _dir) = store();
		let mut save = store.load_player_save(&"alice".into(), 0).await;
		save.stats.money = 500;
		let ok = store.save_player_data(&"alice".into(), save, 10).await;
		assert!(ok);

		let mut reloaded = store.load_player_save(&"alice".into(), 20).await;
		// force a cache miss to prove the disk copy round-trips too
		reloaded = store.load_player_save(&"alice".into(), 20).await;
		assert_eq!(reloaded.stats.money, 500);
		assert!(reloaded.save_version >= 1);
	}

	#[tokio::test]
	async fn second_save_creates_a_backup_of_the_first() {
		let (store, dir) = store();
		let save = store.load_player_save(&"alice".into(), 0).await;
		store.save_player_data(&"alice".into(), save.clone(), 0).await;
		let mut second = save;
		second.stats.money = 999;
		store.save_player_data(&"alice".into(), second, 10).await;

		let backups_dir = dir.path().join("backups");
		let mut found = 0;
		let mut entries = tokio::fs::read_dir(&backups_dir).await.unwrap();
		while let Ok(Some(_entry)) = entries.next_entry().await {
			found += 1;
		}
		assert!(found >= 1);
	}

	#[test]
	fn update_persistent_state_validates_health_bounds() {
		let (tx, _rx) = crate::events::channel(8);
		let store = SaveStore::new("/tmp/irrelevant", tx);
		store.players.insert(
			"alice".into(),
			PlayerSave::default_for("alice".into(), 0),
		);
		assert!(store
			.update_player_persistent_state(&"alice".into(), StateUpdate::Health(50.0))
			.is_ok());
		assert!(store
			.update_player_persistent_state(&"alice".into(), StateUpdate::Health(-1.0))
			.is_err());
		assert!(store
			.update_player_persistent_state(&"alice".into(), StateUpdate::Money(-5))
			.is_err());
	}

}
