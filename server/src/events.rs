//! Cross-component event hooks.
//!
//! Sub-components never hold a reference back
//! to [`crate::context::ServerContext`]; they only hold a clone of an [`EventSink`] and
//! emit. `ServerContext` (and, through it, the embedding launcher) is the only
//! subscriber. This keeps the dependency graph one-way: sub-component -> facade.

use core_common::ids::{EntityId, PlayerId};
use core_common::messages::{RejectionReason, ResyncPacket};
use tokio::sync::broadcast;

/// One of the operator-facing hooks an embedding launcher can subscribe to.
#[derive(Debug, Clone)]
pub enum CoreEvent {
	ActionRejected { player: PlayerId, reason: RejectionReason },
	SaveError { player: Option<PlayerId>, message: String },
	SaveUpdated { player: PlayerId, save_version: u64 },
	PlayerSaved { player: PlayerId, save_version: u64 },
	WorldSaved { world_id: String, save_version: u64 },
	ViolationDetected { player: PlayerId, kind: String, count: u32 },
	PlayerShouldBeKicked { player: PlayerId },
	PlayerShouldBeBanned { player: PlayerId },
	ClientDriftDetected { player: PlayerId, drift: i64 },
	ClientRequiresResync { player: PlayerId, drift: i64 },
	HeartbeatTimeout { player: PlayerId },
	SessionPreserved { player: PlayerId },
	AiTakeover { player: PlayerId },
	PlayerReconnected { player: PlayerId, disconnect_duration_ms: u64 },
	TickCompleted { tick_id: u64 },
	ResyncRequested { packet: Box<ResyncPacket> },
	ReplicationFailed { entity: EntityId, event_id: core_common::ids::EventId },
}

/// Shared sender handle every component emits through.
pub type EventSink = broadcast::Sender<CoreEvent>;

/// Creates a fresh hook channel. `capacity` bounds how many events can be buffered for
/// a lagging subscriber before it starts missing them (broadcast semantics).
pub fn channel(capacity: usize) -> (EventSink, broadcast::Receiver<CoreEvent>) {
	broadcast::channel(capacity)
}
