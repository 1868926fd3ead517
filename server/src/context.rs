//! C9: Server Context — the facade every transport handler calls into.
//!
//! Composes C1–C8 behind the high-level validators, threading
//! C3 -> C5 -> (C8 for persistent properties). `ServerContext` is the only subscriber
//! of the [`EventSink`](crate::events::EventSink)
//! every sub-component emits through; it never hands a sub-component a reference back
//! to itself. It also holds its own sink clone, used only to emit the handful of
//! composite events (e.g. `ResyncRequested`) that need state from more than one
//! sub-component to assemble.

use std::sync::Arc;
use std::time::{Duration, Instant};

use core_common::entity::Vec3;
use core_common::ids::{ActionId, EntityId, PlayerId};
use core_common::messages::{
	InventoryActionKind, PropertyBag, RejectionReason, ReplicatedEvent, ResyncPacket,
	ResyncReason, StatePacket, TransientUpdate,
};
use core_common::tiers::{ConflictType, PersistentConflictPolicy, Property};
use dashmap::DashMap;

use crate::conflict::{ConflictResolver, ConflictTarget, PendingAction, Resolution};
use crate::diagnostics::DiagnosticsLogger;
use crate::events::{CoreEvent, EventSink};
use crate::registry::Registry;
use crate::replication::Replicator;
use crate::save::{SaveStore, StateUpdate};
use crate::session::{SessionError, SessionRecovery};
use crate::tick::{DriftOutcome, TickScheduler};
use crate::trust::TrustBoundary;

#[derive(Debug, Clone)]
pub struct ConnectedPlayer {
	pub entity: EntityId,
	pub session_token: String,
}

/// Everything a transport handler or embedding launcher needs, wired together.
pub struct ServerContext {
	pub registry: Arc<Registry>,
	pub trust: Arc<TrustBoundary>,
	pub conflict: Arc<ConflictResolver>,
	pub replicator: Arc<Replicator>,
	pub tick: Arc<TickScheduler>,
	pub session: Arc<SessionRecovery>,
	pub save: Arc<SaveStore>,
	pub diagnostics: Arc<DiagnosticsLogger>,
	/// Used only for composite events this facade itself assembles (e.g.
	/// `ResyncRequested`, which needs save + tick state no single sub-component holds).
	events: EventSink,
	connected: DashMap<PlayerId, ConnectedPlayer>,
}

impl ServerContext {
	pub fn new(base_save_path: impl Into<std::path::PathBuf>) -> (Self, tokio::sync::broadcast::Receiver<CoreEvent>) {
		let (sink, receiver) = crate::events::channel(1024);
		let ctx = Self {
			registry: Arc::new(Registry::new()),
			trust: Arc::new(TrustBoundary::new(Default::default(), sink.clone())),
			conflict: Arc::new(ConflictResolver::new()),
			replicator: Arc::new(Replicator::new(sink.clone())),
			tick: Arc::new(TickScheduler::new(sink.clone())),
			session: Arc::new(SessionRecovery::new(sink.clone())),
			save: Arc::new(SaveStore::new(base_save_path, sink.clone())),
			diagnostics: Arc::new(DiagnosticsLogger::new()),
			events: sink,
			connected: DashMap::new(),
		};
		(ctx, receiver)
	}

	/// `RegisterPlayer(id, username)`.
	pub async fn register_player(
		&self,
		player: PlayerId,
		session_token: String,
		now_ms: u64,
	) -> EntityId {
		let save = self.save.load_player_save(&player, now_ms).await;
		let entity = self.registry.register_player_entity(player.clone(), save.position);
		self.connected.insert(player.clone(), ConnectedPlayer { entity, session_token });
		self.diagnostics.log_connection(player, "registered", now_ms, self.tick.main.current_id());
		entity
	}

	/// `UnregisterPlayer(id)`: persists the save if dirty, then removes the
	/// player's entities. Session preservation is a separate, transport-driven call.
	pub async fn unregister_player(&self, player: &PlayerId, now_ms: u64) {
		let dirty_save = self.save.players_mut(player).filter(|s| s.dirty).map(|s| s.clone());
		if let Some(save) = dirty_save {
			self.save.save_player_data(player, save, now_ms).await;
		}
		self.registry.remove_player(player);
		self.connected.remove(player);
		self.diagnostics.log_connection(
			player.clone(),
			"unregistered",
			now_ms,
			self.tick.main.current_id(),
		);
	}

	/// `PreserveOnDisconnect`: persists a dirty save, hands the cached save
	/// to C7 for the 5-minute preservation window, and drops the connection record
	/// without deleting the player's registry entities — those stay alive for AI
	/// takeover to possibly assume control of.
	pub async fn preserve_on_disconnect(&self, player: &PlayerId, now: Instant, now_ms: u64) {
		let save = match self.save.players_mut(player).map(|s| s.clone()) {
			Some(save) => save,
			None => self.save.load_player_save(player, now_ms).await,
		};
		if save.dirty {
			self.save.save_player_data(player, save.clone(), now_ms).await;
		}
		self.session.preserve(player.clone(), save, Vec::new(), now);
		self.connected.remove(player);
		self.diagnostics.log_connection(player.clone(), "preserved", now_ms, self.tick.main.current_id());
	}

	/// `RestoreSession` entry point for a reconnecting Login. Seeds the
	/// save cache from the preserved data and re-establishes the connected-player
	/// record; the caller falls back to [`Self::register_player`] on `NotFound`.
	pub fn reconnect_player(
		&self,
		player: PlayerId,
		session_token: String,
		now: Instant,
		now_ms: u64,
	) -> Result<EntityId, SessionError> {
		let preserved = self.session.restore_session(&player, now)?;
		self.save.seed_cache(preserved.save.clone());
		let entity = self.registry.register_player_entity(player.clone(), preserved.save.position);
		self.connected.insert(player.clone(), ConnectedPlayer { entity, session_token });
		self.diagnostics.log_connection(player, "reconnected", now_ms, self.tick.main.current_id());
		Ok(entity)
	}

	fn connected_entity(&self, player: &PlayerId) -> Option<EntityId> {
		self.connected.get(player).map(|c| c.entity)
	}

	/// `ValidatePositionUpdate`: C3 check, then `UpdateTransient("Position")`.
	pub fn validate_position_update(
		&self,
		player: &PlayerId,
		entity: EntityId,
		new_position: Vec3,
		delta_time_ms: u32,
		now_ms: u64,
	) -> Result<Vec3, RejectionReason> {
		let Some(current) = self.registry.get(entity) else {
			return Err(RejectionReason::Other("unknown entity".into()));
		};
		let accepted = self.trust.validate_position(
			player,
			current.position,
			new_position,
			Duration::from_millis(delta_time_ms as u64),
			now_ms,
		)?;
		let tick = self.tick.main.current_id();
		let _ = self.registry.update_position(entity, accepted, tick);
		self.replicator.update_transient(
			entity,
			Property::Position,
			position_bytes(accepted),
			player.clone(),
			now_ms,
		);
		Ok(accepted)
	}

	/// `ValidateCombatAction`: C3 check, C4 conflict resolution against the target
	/// (two attackers racing the same target in the same instant; the loser is
	/// rejected rather than both landing), then queue a `CombatAction` event. The
	/// target stays locked until [`STALE_LOCK_TIMEOUT`](crate::conflict::STALE_LOCK_TIMEOUT)
	/// reclaims it; combat has no distinct "action complete" signal to release on.
	pub fn validate_combat_action(
		&self,
		player: &PlayerId,
		attacker: EntityId,
		target: EntityId,
		ranged: bool,
		now_ms: u64,
	) -> Result<ReplicatedEvent, RejectionReason> {
		let attacker_entity =
			self.registry.get(attacker).ok_or(RejectionReason::Other("unknown attacker".into()))?;
		let target_entity =
			self.registry.get(target).ok_or(RejectionReason::Other("unknown target".into()))?;
		self.trust.validate_combat(
			player,
			attacker,
			attacker_entity.position,
			target,
			target_entity.position,
			ranged,
			Instant::now(),
			now_ms,
		)?;

		let pending = PendingAction {
			id: ActionId::random(),
			player: player.clone(),
			conflict_type: ConflictType::CombatTarget,
			submitted_at: Instant::now(),
			server_timestamp_ms: now_ms,
		};
		resolution_result(self.conflict.submit(ConflictTarget::Entity(target), pending))?;

		let mut payload = PropertyBag::new();
		payload.insert("ranged".into(), ranged.to_string());
		let event = self.replicator.queue_event(
			"CombatAction".into(),
			attacker,
			player.clone(),
			Some(target),
			payload,
			now_ms,
		);
		Ok(event)
	}

	/// `ValidateInventoryChange`: trust-boundary checks, then (for `Pickup`) C4
	/// conflict resolution against the item so only one of two racing pickups
	/// succeeds, then mutate the cached save's inventory, mark it dirty,
	/// `UpdatePersistent("Inventory")`, and queue an `InventoryChange` event. A
	/// granted pickup lock is held until it's reclaimed as stale; the item is gone
	/// from the world once picked up, so the id won't be resubmitted in practice.
	pub fn validate_inventory_change(
		&self,
		player: &PlayerId,
		action: InventoryActionKind,
		item_id: &str,
		quantity: u32,
		player_position: Vec3,
		item_position: Option<Vec3>,
		now_ms: u64,
	) -> Result<ReplicatedEvent, RejectionReason> {
		self.trust.validate_inventory(
			player,
			item_id,
			quantity,
			action == InventoryActionKind::Pickup,
			player_position,
			item_position,
			Instant::now(),
			now_ms,
		)?;

		let entity = self
			.connected_entity(player)
			.ok_or(RejectionReason::Other("player not registered".into()))?;

		if action == InventoryActionKind::Pickup {
			let pending = PendingAction {
				id: ActionId::random(),
				player: player.clone(),
				conflict_type: ConflictType::ItemPickup,
				submitted_at: Instant::now(),
				server_timestamp_ms: now_ms,
			};
			resolution_result(
				self.conflict.submit(ConflictTarget::Resource(item_id.to_string()), pending),
			)?;
		}

		match action {
			InventoryActionKind::Pickup => {
				self.mutate_inventory(player, item_id, quantity as i64);
			}
			InventoryActionKind::Drop => {
				self.mutate_inventory(player, item_id, -(quantity as i64));
			}
			InventoryActionKind::Use => {
				self.mutate_inventory(player, item_id, -(quantity as i64));
			}
		}

		self.replicator.update_persistent(
			entity,
			Property::Inventory,
			item_id.as_bytes().to_vec(),
			player.clone(),
			PersistentConflictPolicy::ServerWins,
			now_ms,
		).ok();

		let mut payload = PropertyBag::new();
		payload.insert("item_id".into(), item_id.to_string());
		payload.insert("quantity".into(), quantity.to_string());
		Ok(self.replicator.queue_event(
			"InventoryChange".into(),
			entity,
			player.clone(),
			None,
			payload,
			now_ms,
		))
	}

	fn mutate_inventory(&self, player: &PlayerId, item_id: &str, delta: i64) {
		if let Some(mut save) = self.save.players_mut(player) {
			let entry = save.inventory.entry(item_id.to_string()).or_insert(0);
			*entry = (*entry as i64 + delta).max(0) as u32;
			save.dirty = true;
		}
	}

	/// `UpdatePlayerStats(stat, value)`: delegates to C8's validation, then
	/// `UpdatePersistent(stat)` on success.
	pub fn update_player_stats(
		&self,
		player: &PlayerId,
		update: StateUpdate,
		property: Property,
		now_ms: u64,
	) -> Result<(), RejectionReason> {
		let entity = self
			.connected_entity(player)
			.ok_or(RejectionReason::Other("player not registered".into()))?;
		self.save
			.update_player_persistent_state(player, update)
			.map_err(|_| RejectionReason::Other("invalid stat value".into()))?;
		self.replicator
			.update_persistent(
				entity,
				property,
				Vec::new(),
				player.clone(),
				PersistentConflictPolicy::ServerWins,
				now_ms,
			)
			.ok();
		Ok(())
	}

	/// `GetStateUpdatesForClient(client)`.
	pub fn get_state_updates_for_client(&self, player: &PlayerId, now_ms: u64) -> StatePacket {
		let dirty = self.replicator.get_dirty_transient();
		let keys: Vec<_> = dirty.iter().map(|(k, _)| k.clone()).collect();
		let transient_updates = dirty
			.into_iter()
			.map(|(key, entry)| TransientUpdate {
				entity: key.entity,
				property: key.property,
				value: entry.value,
				version: entry.version,
			})
			.collect();
		self.replicator.clear_transient_sync(&keys);

		let events = self.replicator.get_pending_events(64);
		StatePacket {
			client_id: player.clone(),
			timestamp_ms: now_ms,
			transient_updates,
			events,
		}
	}

	/// `ProcessAcknowledgment(eventId)`.
	pub fn process_acknowledgment(&self, event_id: core_common::ids::EventId) {
		self.replicator.acknowledge(event_id);
	}

	/// `ValidateAnimationUpdate`: C2 gate — Animation is the one client-authoritative
	/// system, so only the entity's owner may drive it — then `UpdateTransient("Animation")`.
	pub fn validate_animation_update(
		&self,
		player: &PlayerId,
		entity: EntityId,
		clip: &str,
		now_ms: u64,
	) -> Result<(), RejectionReason> {
		let current =
			self.registry.get(entity).ok_or(RejectionReason::Other("unknown entity".into()))?;
		if !crate::authority::can_modify(player, &current.owner, crate::authority::GameSystem::Animation) {
			return Err(RejectionReason::AuthorityViolation);
		}
		self.replicator.update_transient(
			entity,
			Property::Animation,
			clip.as_bytes().to_vec(),
			player.clone(),
			now_ms,
		);
		Ok(())
	}

	/// `Heartbeat`: records round-trip latency (C7) and advances the client's
	/// tick-drift tracking (C6). When drift crosses the resync threshold, assembles and
	/// emits the recovery payload the caller forwards to the client in place of the
	/// usual state packet.
	pub async fn handle_heartbeat(
		&self,
		player: &PlayerId,
		client_tick: u64,
		client_time_ms: u64,
		now: Instant,
		now_ms: u64,
	) -> Option<ResyncPacket> {
		self.session.receive_heartbeat(player, client_time_ms, now_ms, now);
		if self.tick.process_client_tick(player, client_tick) != DriftOutcome::RequiresResync {
			return None;
		}
		Some(self.request_resync_inner(player, ResyncReason::DriftThreshold, now_ms).await)
	}

	/// `RequestResync`: assembles and emits a resync packet on explicit client
	/// request, without requiring a drift breach.
	pub async fn request_resync(&self, player: &PlayerId, now_ms: u64) -> ResyncPacket {
		self.request_resync_inner(player, ResyncReason::ExplicitRequest, now_ms).await
	}

	async fn request_resync_inner(
		&self,
		player: &PlayerId,
		reason: ResyncReason,
		now_ms: u64,
	) -> ResyncPacket {
		let packet = self.build_resync_packet(player, reason, now_ms).await;
		let _ = self.events.send(CoreEvent::ResyncRequested { packet: Box::new(packet.clone()) });
		packet
	}

	async fn build_resync_packet(
		&self,
		player: &PlayerId,
		reason: ResyncReason,
		now_ms: u64,
	) -> ResyncPacket {
		let save = match self.save.players_mut(player).map(|s| s.clone()) {
			Some(save) => save,
			None => self.save.load_player_save(player, now_ms).await,
		};
		ResyncPacket {
			player: player.clone(),
			save,
			server_tick: self.tick.main.current_id(),
			timestamp_ms: now_ms,
			world_snapshot: self.save.world_snapshot(crate::save::DEFAULT_WORLD_ID),
			reason,
		}
	}
}

/// Maps a conflict [`Resolution`] to the validator result: only the winner proceeds.
fn resolution_result(resolution: Resolution) -> Result<(), RejectionReason> {
	match resolution {
		Resolution::Granted | Resolution::WinsOver(_) => Ok(()),
		Resolution::LosesTo(holder) => Err(RejectionReason::ConflictLost { holder }),
		Resolution::BothRejected { other_holder } => {
			Err(RejectionReason::ConflictLost { holder: other_holder })
		}
	}
}

fn position_bytes(position: Vec3) -> Vec<u8> {
	serde_json::to_vec(&position).unwrap_or_default()
}

#[cfg(test)]
mod test {
	use super::*;

	#[tokio::test]
	async fn register_then_validate_position_update_round_trips() {
		let (ctx, _rx) = ServerContext::new(tempfile::tempdir().unwrap().path());
		let player: PlayerId = "alice".into();
		let entity = ctx.register_player(player.clone(), "token".into(), 0).await;

		let outcome = ctx.validate_position_update(
			&player,
			entity,
			Vec3 { x: 1.0, y: 0.0, z: 0.0 },
			50,
			0,
		);
		assert!(outcome.is_ok());

		let packet = ctx.get_state_updates_for_client(&player, 0);
		assert_eq!(packet.transient_updates.len(), 1);
	}

	#[tokio::test]
	async fn combat_action_queues_an_event() {
		let (ctx, _rx) = ServerContext::new(tempfile::tempdir().unwrap().path());
		let alice: PlayerId = "alice".into();
		let bob: PlayerId = "bob".into();
		let a = ctx.register_player(alice.clone(), "t".into(), 0).await;
		let b = ctx.register_player(bob.clone(), "t".into(), 0).await;

		let event = ctx.validate_combat_action(&alice, a, b, false, 0);
		assert!(event.is_ok());
	}

	#[tokio::test]
	async fn two_attackers_on_the_same_target_only_one_wins() {
		let (ctx, _rx) = ServerContext::new(tempfile::tempdir().unwrap().path());
		let alice: PlayerId = "alice".into();
		let carol: PlayerId = "carol".into();
		let bob: PlayerId = "bob".into();
		let a = ctx.register_player(alice.clone(), "t".into(), 0).await;
		let c = ctx.register_player(carol.clone(), "t".into(), 0).await;
		let b = ctx.register_player(bob.clone(), "t".into(), 0).await;

		assert!(ctx.validate_combat_action(&alice, a, b, false, 0).is_ok());
		let second = ctx.validate_combat_action(&carol, c, b, false, 0);
		assert_eq!(second.unwrap_err(), RejectionReason::ConflictLost { holder: alice });
	}

	#[tokio::test]
	async fn two_pickups_of_the_same_item_only_one_wins() {
		let (ctx, _rx) = ServerContext::new(tempfile::tempdir().unwrap().path());
		let alice: PlayerId = "alice".into();
		let bob: PlayerId = "bob".into();
		ctx.register_player(alice.clone(), "t".into(), 0).await;
		ctx.register_player(bob.clone(), "t".into(), 0).await;
		let item_pos = Vec3::ZERO;

		let first = ctx.validate_inventory_change(
			&alice,
			InventoryActionKind::Pickup,
			"sword-1",
			1,
			Vec3::ZERO,
			Some(item_pos),
			0,
		);
		assert!(first.is_ok());

		let second = ctx.validate_inventory_change(
			&bob,
			InventoryActionKind::Pickup,
			"sword-1",
			1,
			Vec3::ZERO,
			Some(item_pos),
			0,
		);
		assert_eq!(second.unwrap_err(), RejectionReason::ConflictLost { holder: alice });
	}

	#[tokio::test]
	async fn animation_update_requires_entity_ownership() {
		let (ctx, _rx) = ServerContext::new(tempfile::tempdir().unwrap().path());
		let alice: PlayerId = "alice".into();
		let bob: PlayerId = "bob".into();
		let a = ctx.register_player(alice.clone(), "t".into(), 0).await;
		ctx.register_player(bob.clone(), "t".into(), 0).await;

		assert!(ctx.validate_animation_update(&alice, a, "run", 0).is_ok());
		assert_eq!(
			ctx.validate_animation_update(&bob, a, "run", 0).unwrap_err(),
			RejectionReason::AuthorityViolation
		);
	}

	#[tokio::test]
	async fn heartbeat_within_drift_budget_returns_no_resync() {
		let (ctx, _rx) = ServerContext::new(tempfile::tempdir().unwrap().path());
		let alice: PlayerId = "alice".into();
		ctx.register_player(alice.clone(), "t".into(), 0).await;
		ctx.tick.run_main_tick(0);

		let resync = ctx.handle_heartbeat(&alice, 1, 0, Instant::now(), 0).await;
		assert!(resync.is_none());
	}

	#[tokio::test]
	async fn heartbeat_beyond_drift_threshold_returns_a_resync_packet() {
		let (ctx, _rx) = ServerContext::new(tempfile::tempdir().unwrap().path());
		let alice: PlayerId = "alice".into();
		ctx.register_player(alice.clone(), "t".into(), 0).await;
		ctx.tick.run_main_tick(0);

		let resync = ctx.handle_heartbeat(&alice, 50, 0, Instant::now(), 0).await;
		let packet = resync.expect("drift beyond threshold should request a resync");
		assert_eq!(packet.player, alice);
		assert_eq!(packet.reason, ResyncReason::DriftThreshold);
	}
}
