//! C6: Tick Scheduler.
//!
//! Two independent fixed-step clocks (main 20 Hz, combat 30 Hz) plus per-client drift
//! tracking. Callback exceptions map to Rust panics; a tick must never die
//! because one callback misbehaved, so callbacks run under `catch_unwind` and a
//! failure is logged rather than propagated.

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use core_common::ids::PlayerId;
use dashmap::DashMap;

use crate::events::{CoreEvent, EventSink};

pub const MAIN_TICK_RATE: Duration = Duration::from_millis(50);
pub const COMBAT_TICK_RATE: Duration = Duration::from_millis(33);
pub const MAX_SNAPSHOTS: usize = 100;
pub const DRIFT_WARN_THRESHOLD: i64 = 5;
pub const DRIFT_RESYNC_THRESHOLD: i64 = 10;
const DRIFT_HISTORY_LEN: usize = 10;

#[derive(Debug, Clone)]
pub struct TickSnapshot {
	pub id: u64,
	pub wall_time_ms: u64,
	pub delta_time_ms: u32,
}

#[derive(Debug, Clone, Default)]
pub struct ClientTickState {
	pub last_acknowledged_tick: u64,
	pub last_received_tick: u64,
	pub current_drift: i64,
	pub drift_history: VecDeque<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriftOutcome {
	Valid { warning: bool },
	RequiresResync,
}

type Callback = Box<dyn Fn(&TickSnapshot) + Send + Sync>;

#[derive(Default)]
pub struct TickClock {
	counter: AtomicU64,
	history: Mutex<VecDeque<TickSnapshot>>,
	callbacks: Mutex<Vec<Callback>>,
}

impl TickClock {
	pub fn register_callback(&self, callback: Callback) {
		self.callbacks.lock().unwrap().push(callback);
	}

	/// Advances the tick counter, records a snapshot, and runs every registered
	/// callback, isolating panics per-callback.
	pub fn tick(&self, wall_time_ms: u64, delta_time_ms: u32) -> TickSnapshot {
		let id = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
		let snapshot = TickSnapshot { id, wall_time_ms, delta_time_ms };

		{
			let mut history = self.history.lock().unwrap();
			history.push_back(snapshot.clone());
			while history.len() > MAX_SNAPSHOTS {
				history.pop_front();
			}
		}

		let callbacks = self.callbacks.lock().unwrap();
		for callback in callbacks.iter() {
			let result = std::panic::catch_unwind(AssertUnwindSafe(|| callback(&snapshot)));
			if let Err(panic) = result {
				tracing::error!(tick = id, ?panic, "tick callback panicked");
			}
		}

		snapshot
	}

	pub fn current_id(&self) -> u64 {
		self.counter.load(Ordering::SeqCst)
	}

	pub fn history(&self) -> Vec<TickSnapshot> {
		self.history.lock().unwrap().iter().cloned().collect()
	}
}

/// Owns both clocks and all per-client drift state.
pub struct TickScheduler {
	pub main: TickClock,
	pub combat: TickClock,
	clients: DashMap<PlayerId, ClientTickState>,
	events: EventSink,
}

impl TickScheduler {
	pub fn new(events: EventSink) -> Self {
		Self {
			main: TickClock::default(),
			combat: TickClock::default(),
			clients: DashMap::new(),
			events,
		}
	}

	/// `ProcessClientTick(player, clientTick)`.
	pub fn process_client_tick(&self, player: &PlayerId, client_tick: u64) -> DriftOutcome {
		let server_tick = self.main.current_id();
		let drift = client_tick as i64 - server_tick as i64;

		let mut state = self.clients.entry(player.clone()).or_default();
		state.last_received_tick = client_tick;
		state.current_drift = drift;
		state.drift_history.push_back(drift);
		while state.drift_history.len() > DRIFT_HISTORY_LEN {
			state.drift_history.pop_front();
		}
		drop(state);

		let magnitude = drift.unsigned_abs();
		if magnitude > DRIFT_RESYNC_THRESHOLD as u64 {
			let _ = self.events.send(CoreEvent::ClientRequiresResync {
				player: player.clone(),
				drift,
			});
			DriftOutcome::RequiresResync
		} else if magnitude > DRIFT_WARN_THRESHOLD as u64 {
			let _ = self.events.send(CoreEvent::ClientDriftDetected {
				player: player.clone(),
				drift,
			});
			DriftOutcome::Valid { warning: true }
		} else {
			DriftOutcome::Valid { warning: false }
		}
	}

	pub fn acknowledge(&self, player: &PlayerId, tick: u64) {
		if let Some(mut state) = self.clients.get_mut(player) {
			state.last_acknowledged_tick = tick;
		}
	}

	pub fn client_state(&self, player: &PlayerId) -> Option<ClientTickState> {
		self.clients.get(player).map(|s| s.clone())
	}

	pub fn run_main_tick(&self, wall_time_ms: u64) -> TickSnapshot {
		let snapshot = self.main.tick(wall_time_ms, MAIN_TICK_RATE.as_millis() as u32);
		let _ = self.events.send(CoreEvent::TickCompleted { tick_id: snapshot.id });
		snapshot
	}

	pub fn run_combat_tick(&self, wall_time_ms: u64) -> TickSnapshot {
		self.combat.tick(wall_time_ms, COMBAT_TICK_RATE.as_millis() as u32)
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use std::sync::atomic::AtomicU32;
	use std::sync::Arc;

	fn scheduler() -> (TickScheduler, tokio::sync::broadcast::Receiver<CoreEvent>) {
		let (tx, rx) = crate::events::channel(32);
		(TickScheduler::new(tx), rx)
	}

	#[test]
	fn callbacks_fire_every_tick() {
		let (scheduler, _rx) = scheduler();
		let counter = Arc::new(AtomicU32::new(0));
		let counter_clone = counter.clone();
		scheduler
			.main
			.register_callback(Box::new(move |_| {
				counter_clone.fetch_add(1, Ordering::SeqCst);
			}));
		scheduler.run_main_tick(0);
		scheduler.run_main_tick(50);
		assert_eq!(counter.load(Ordering::SeqCst), 2);
	}

	#[test]
	fn panicking_callback_does_not_stop_the_scheduler() {
		let (scheduler, _rx) = scheduler();
		scheduler.main.register_callback(Box::new(|_| panic!("boom")));
		let snapshot = scheduler.run_main_tick(0);
		assert_eq!(snapshot.id, 1);
		let snapshot2 = scheduler.run_main_tick(50);
		assert_eq!(snapshot2.id, 2);
	}

	#[test]
	fn drift_within_five_is_valid_no_warning() {
		let (scheduler, _rx) = scheduler();
		scheduler.run_main_tick(0);
		let outcome = scheduler.process_client_tick(&"alice".into(), 1);
		assert_eq!(outcome, DriftOutcome::Valid { warning: false });
	}

	#[test]
	fn drift_between_five_and_ten_warns() {
		let (scheduler, mut rx) = scheduler();
		for _ in 0..8 {
			scheduler.run_main_tick(0);
		}
		let outcome = scheduler.process_client_tick(&"alice".into(), 15);
		assert_eq!(outcome, DriftOutcome::Valid { warning: true });
		assert!(matches!(rx.try_recv().unwrap(), CoreEvent::ClientDriftDetected { .. }));
	}

	#[test]
	fn drift_beyond_ten_requires_resync() {
		let (scheduler, mut rx) = scheduler();
		for _ in 0..1 {
			scheduler.run_main_tick(0);
		}
		let outcome = scheduler.process_client_tick(&"alice".into(), 50);
		assert_eq!(outcome, DriftOutcome::RequiresResync);
		assert!(matches!(rx.try_recv().unwrap(), CoreEvent::ClientRequiresResync { .. }));
	}

	#[test]
	fn snapshot_history_is_capped() {
		let (scheduler, _rx) = scheduler();
		for i in 0..(MAX_SNAPSHOTS + 20) {
			scheduler.run_main_tick(i as u64);
		}
		assert_eq!(scheduler.main.history().len(), MAX_SNAPSHOTS);
	}
}
