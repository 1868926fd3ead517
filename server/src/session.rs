//! C7: Session Recovery.
//!
//! Heartbeat tracking, disconnect preservation, delayed AI takeover, and latency-based
//! degradation policy. The scheduling of the 3 s takeover delay and the 30 s
//! cleanup sweep lives in the embedding executor; this module
//! exposes the pure state transitions those timers drive.

use std::time::{Duration, Instant};

use core_common::ids::PlayerId;
use core_common::save_model::PlayerSave;
use dashmap::DashMap;
use thiserror::Error;

use crate::events::{CoreEvent, EventSink};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
	#[error("no preserved session for this player")]
	NotFound,
	#[error("Session expired")]
	Expired,
}

pub const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(15);
pub const PRESERVATION_DURATION: Duration = Duration::from_secs(5 * 60);
pub const AI_TAKEOVER_DELAY: Duration = Duration::from_secs(3);
pub const AI_INVULNERABILITY_WINDOW: Duration = Duration::from_secs(5);
pub const LATENCY_DEGRADED: Duration = Duration::from_millis(200);
pub const LATENCY_SEVERE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct HeartbeatState {
	pub last_heartbeat: Instant,
	pub healthy: bool,
	pub consecutive_misses: u32,
	pub estimated_latency_ms: u64,
	pub timeout_triggered: bool,
}

#[derive(Debug, Clone)]
pub struct PreservedSession {
	pub save: PlayerSave,
	pub world_slice: Vec<u8>,
	pub disconnect_time: Instant,
	pub expiry: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AiBehavior {
	None,
	Idle,
	Defensive,
	Flee,
	Aggressive,
}

#[derive(Debug, Clone)]
pub struct AiControlState {
	pub takeover_time: Instant,
	pub invulnerability_end: Instant,
	pub behavior: AiBehavior,
}

/// Latency-derived client degradation policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DegradationPolicy {
	pub interpolation_buffer_ms: u64,
	pub reduced_update_rate: bool,
	pub reduced_sync_scope: bool,
	pub disable_non_essential_sync: bool,
	pub prepare_for_disconnect: bool,
}

impl DegradationPolicy {
	fn healthy() -> Self {
		Self {
			interpolation_buffer_ms: 0,
			reduced_update_rate: false,
			reduced_sync_scope: false,
			disable_non_essential_sync: false,
			prepare_for_disconnect: false,
		}
	}
}

pub struct SessionRecovery {
	heartbeats: DashMap<PlayerId, HeartbeatState>,
	preserved: DashMap<PlayerId, PreservedSession>,
	ai_control: DashMap<PlayerId, AiControlState>,
	events: EventSink,
}

impl SessionRecovery {
	pub fn new(events: EventSink) -> Self {
		Self {
			heartbeats: DashMap::new(),
			preserved: DashMap::new(),
			ai_control: DashMap::new(),
			events,
		}
	}

	pub fn register_heartbeat(&self, player: PlayerId, now: Instant) {
		self.heartbeats.insert(
			player,
			HeartbeatState {
				last_heartbeat: now,
				healthy: true,
				consecutive_misses: 0,
				estimated_latency_ms: 0,
				timeout_triggered: false,
			},
		);
	}

	/// Records a heartbeat; latency is estimated as `(server_now - client_time) / 2`.
	pub fn receive_heartbeat(
		&self,
		player: &PlayerId,
		client_time_ms: u64,
		server_now_ms: u64,
		now: Instant,
	) -> u64 {
		let latency = server_now_ms.saturating_sub(client_time_ms) / 2;
		let mut state = self.heartbeats.entry(player.clone()).or_insert_with(|| HeartbeatState {
			last_heartbeat: now,
			healthy: true,
			consecutive_misses: 0,
			estimated_latency_ms: 0,
			timeout_triggered: false,
		});
		state.last_heartbeat = now;
		state.healthy = true;
		state.consecutive_misses = 0;
		state.estimated_latency_ms = latency;
		state.timeout_triggered = false;
		latency
	}

	/// Periodic sweep: marks clients timed out (`now - last > 15s`), firing
	/// `HeartbeatTimeout` exactly once per timeout.
	pub fn sweep_timeouts(&self, now: Instant) {
		for mut entry in self.heartbeats.iter_mut() {
			if now.saturating_duration_since(entry.last_heartbeat) > HEARTBEAT_TIMEOUT {
				entry.consecutive_misses += 1;
				entry.healthy = false;
				if !entry.timeout_triggered {
					entry.timeout_triggered = true;
					let _ = self
						.events
						.send(CoreEvent::HeartbeatTimeout { player: entry.key().clone() });
				}
			}
		}
	}

	pub fn degradation_policy(&self, player: &PlayerId) -> DegradationPolicy {
		let Some(state) = self.heartbeats.get(player) else {
			return DegradationPolicy::healthy();
		};
		let latency = Duration::from_millis(state.estimated_latency_ms);
		let mut policy = DegradationPolicy::healthy();
		if latency > LATENCY_DEGRADED {
			policy.interpolation_buffer_ms = (2 * latency.as_millis() as u64).min(500);
			policy.reduced_update_rate = true;
		}
		if latency > LATENCY_SEVERE {
			policy.reduced_sync_scope = true;
			policy.disable_non_essential_sync = true;
		}
		if !state.healthy {
			policy.prepare_for_disconnect = true;
		}
		policy
	}

	/// On disconnect: stores save + world slice for up to 5 minutes.
	pub fn preserve(
		&self,
		player: PlayerId,
		save: PlayerSave,
		world_slice: Vec<u8>,
		now: Instant,
	) {
		self.preserved.insert(
			player.clone(),
			PreservedSession {
				save,
				world_slice,
				disconnect_time: now,
				expiry: now + PRESERVATION_DURATION,
			},
		);
		let _ = self.events.send(CoreEvent::SessionPreserved { player });
	}

	/// Driven by the embedding executor 3 s after preservation.
	/// A no-op if the session is no longer preserved or already has a controller.
	pub fn maybe_take_over(&self, player: &PlayerId, now: Instant) {
		let Some(preserved) = self.preserved.get(player) else { return };
		if now.saturating_duration_since(preserved.disconnect_time) < AI_TAKEOVER_DELAY {
			return;
		}
		drop(preserved);
		if self.ai_control.contains_key(player) {
			return;
		}
		self.ai_control.insert(
			player.clone(),
			AiControlState {
				takeover_time: now,
				invulnerability_end: now + AI_INVULNERABILITY_WINDOW,
				behavior: AiBehavior::Defensive,
			},
		);
		let _ = self.events.send(CoreEvent::AiTakeover { player: player.clone() });
	}

	/// `IsInvulnerable`: a state transition on read — once the window elapses the
	/// flag clears itself.
	pub fn is_invulnerable(&self, player: &PlayerId, now: Instant) -> bool {
		self.ai_control.get(player).map(|ai| now < ai.invulnerability_end).unwrap_or(false)
	}

	pub fn ai_behavior(&self, player: &PlayerId) -> Option<AiBehavior> {
		self.ai_control.get(player).map(|ai| ai.behavior)
	}

	/// `RestoreSession`: returns the preserved data, clears AI control, re-registers
	/// the heartbeat. A session past its expiry is left for the cleanup sweep
	/// to evict and is reported as expired here rather than silently restored.
	pub fn restore_session(
		&self,
		player: &PlayerId,
		now: Instant,
	) -> Result<PreservedSession, SessionError> {
		let expired = self.preserved.get(player).map(|p| now >= p.expiry).ok_or(SessionError::NotFound)?;
		if expired {
			return Err(SessionError::Expired);
		}
		let (_, preserved) = self.preserved.remove(player).ok_or(SessionError::NotFound)?;
		self.ai_control.remove(player);
		self.register_heartbeat(player.clone(), now);
		let disconnect_duration_ms =
			now.saturating_duration_since(preserved.disconnect_time).as_millis() as u64;
		let _ = self.events.send(CoreEvent::PlayerReconnected {
			player: player.clone(),
			disconnect_duration_ms,
		});
		Ok(preserved)
	}

	/// 30 s cleanup timer: evicts expired preserved sessions and their AI state.
	pub fn cleanup_expired(&self, now: Instant) -> Vec<PlayerId> {
		let expired: Vec<PlayerId> = self
			.preserved
			.iter()
			.filter(|e| now >= e.expiry)
			.map(|e| e.key().clone())
			.collect();
		for player in &expired {
			self.preserved.remove(player);
			self.ai_control.remove(player);
		}
		expired
	}
}

#[cfg(test)]
mod test {
	use super::*;

	fn save() -> PlayerSave {
		PlayerSave::default_for("alice".into(), 0)
	}

	#[test]
	fn heartbeat_latency_is_half_round_trip() {
		let (tx, _rx) = crate::events::channel(8);
		let sr = SessionRecovery::new(tx);
		let now = Instant::now();
		let latency = sr.receive_heartbeat(&"alice".into(), 1000, 1100, now);
		assert_eq!(latency, 50);
	}

	#[test]
	fn takeover_waits_for_the_delay_then_applies_defensive_and_invulnerability() {
		let (tx, mut rx) = crate::events::channel(8);
		let sr = SessionRecovery::new(tx);
		let t0 = Instant::now();
		sr.preserve("alice".into(), save(), vec![], t0);
		assert!(matches!(rx.try_recv().unwrap(), CoreEvent::SessionPreserved { .. }));

		sr.maybe_take_over(&"alice".into(), t0);
		assert!(sr.ai_behavior(&"alice".into()).is_none());

		let t1 = t0 + AI_TAKEOVER_DELAY + Duration::from_millis(1);
		sr.maybe_take_over(&"alice".into(), t1);
		assert_eq!(sr.ai_behavior(&"alice".into()), Some(AiBehavior::Defensive));
		assert!(sr.is_invulnerable(&"alice".into(), t1));
		assert!(matches!(rx.try_recv().unwrap(), CoreEvent::AiTakeover { .. }));

		let t2 = t1 + AI_INVULNERABILITY_WINDOW + Duration::from_millis(1);
		assert!(!sr.is_invulnerable(&"alice".into(), t2));
	}

	#[test]
	fn restore_clears_ai_control_and_fires_reconnected() {
		let (tx, mut rx) = crate::events::channel(8);
		let sr = SessionRecovery::new(tx);
		let t0 = Instant::now();
		sr.preserve("alice".into(), save(), vec![], t0);
		let t1 = t0 + AI_TAKEOVER_DELAY + Duration::from_millis(1);
		sr.maybe_take_over(&"alice".into(), t1);

		let t2 = t1 + Duration::from_secs(1);
		let restored = sr.restore_session(&"alice".into(), t2);
		assert!(restored.is_ok());
		assert!(sr.ai_behavior(&"alice".into()).is_none());
		assert!(matches!(rx.try_recv().unwrap(), CoreEvent::SessionPreserved { .. }));
		assert!(matches!(rx.try_recv().unwrap(), CoreEvent::AiTakeover { .. }));
		assert!(matches!(rx.try_recv().unwrap(), CoreEvent::PlayerReconnected { .. }));
	}

	#[test]
	fn expired_sessions_are_cleaned_up() {
		let (tx, _rx) = crate::events::channel(8);
		let sr = SessionRecovery::new(tx);
		let t0 = Instant::now();
		sr.preserve("alice".into(), save(), vec![], t0);
		let after_expiry = t0 + PRESERVATION_DURATION + Duration::from_secs(1);
		let removed = sr.cleanup_expired(after_expiry);
		assert_eq!(removed, vec!["alice".into()]);
		assert_eq!(
			sr.restore_session(&"alice".into(), after_expiry).unwrap_err(),
			SessionError::NotFound
		);
	}

	#[test]
	fn restore_past_expiry_without_a_cleanup_sweep_reports_expired() {
		let (tx, _rx) = crate::events::channel(8);
		let sr = SessionRecovery::new(tx);
		let t0 = Instant::now();
		sr.preserve("alice".into(), save(), vec![], t0);
		let after_expiry = t0 + PRESERVATION_DURATION + Duration::from_secs(1);
		assert_eq!(
			sr.restore_session(&"alice".into(), after_expiry).unwrap_err(),
			SessionError::Expired
		);
	}

	#[test]
	fn degradation_policy_escalates_with_latency() {
		let (tx, _rx) = crate::events::channel(8);
		let sr = SessionRecovery::new(tx);
		let now = Instant::now();
		sr.receive_heartbeat(&"alice".into(), 0, 1000, now);
		let policy = sr.degradation_policy(&"alice".into());
		assert!(policy.reduced_update_rate);
		assert!(policy.reduced_sync_scope);
		assert!(policy.disable_non_essential_sync);
	}
}
