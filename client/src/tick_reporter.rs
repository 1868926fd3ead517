//! Client-side counterpart to C6's drift tracking. The client owns nothing
//! about drift classification — that's the server's call — it just keeps a local tick
//! counter, frames it into the wire `Heartbeat` message, and snaps to whatever tick the
//! server hands back in a [`ResyncPacket`].

use core_common::messages::{Inbound, ResyncPacket};
use core_common::save_model::PlayerSave;

/// Local simulation clock a client advances once per frame/fixed-step and reports to
/// the server via `Heartbeat` messages.
#[derive(Debug, Default)]
pub struct TickReporter {
	local_tick: u64,
}

impl TickReporter {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn current_tick(&self) -> u64 {
		self.local_tick
	}

	/// Advances the local clock by one tick and returns the new value.
	pub fn advance(&mut self) -> u64 {
		self.local_tick += 1;
		self.local_tick
	}

	/// Builds the `Heartbeat` message to send this frame.
	pub fn heartbeat(&self, client_time_ms: u64) -> Inbound {
		Inbound::Heartbeat { client_tick: self.local_tick, client_time_ms }
	}

	/// Snaps the local clock to the server's authoritative tick after a resync
	/// (the client does not attempt to smooth through the jump; that's a rendering
	/// concern out of scope here).
	pub fn apply_resync(&mut self, packet: &ResyncPacket) -> &PlayerSave {
		self.local_tick = packet.server_tick;
		&packet.save
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use core_common::ids::PlayerId;

	fn packet(server_tick: u64) -> ResyncPacket {
		ResyncPacket {
			player: PlayerId::from("alice"),
			save: PlayerSave::default_for("alice".into(), 0),
			server_tick,
			timestamp_ms: 0,
			world_snapshot: None,
			reason: core_common::messages::ResyncReason::DriftThreshold,
		}
	}

	#[test]
	fn advance_increments_monotonically() {
		let mut reporter = TickReporter::new();
		assert_eq!(reporter.advance(), 1);
		assert_eq!(reporter.advance(), 2);
		assert_eq!(reporter.current_tick(), 2);
	}

	#[test]
	fn heartbeat_reports_current_tick() {
		let mut reporter = TickReporter::new();
		reporter.advance();
		reporter.advance();
		let Inbound::Heartbeat { client_tick, client_time_ms } = reporter.heartbeat(1234) else {
			panic!("expected Heartbeat");
		};
		assert_eq!(client_tick, 2);
		assert_eq!(client_time_ms, 1234);
	}

	#[test]
	fn resync_snaps_local_tick_to_server_tick() {
		let mut reporter = TickReporter::new();
		reporter.advance();
		reporter.apply_resync(&packet(500));
		assert_eq!(reporter.current_tick(), 500);
	}
}
