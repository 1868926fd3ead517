//! Wire messages.
//!
//! The envelope is deliberately dumb: a type tag, player id, session token, timestamp,
//! and an opaque property bag. Internally every message gets a tagged variant with
//! typed fields; the string-keyed bag only
//! exists at the transport boundary, e.g. for forwarding message kinds the core itself
//! ignores (Chat, Trade, Marketplace, Building, file-transfer).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::entity::{EntityType, Quaternion, Vec3};
use crate::ids::{EntityId, EventId, PlayerId};
use crate::tiers::Property;

/// Opaque transport-only payload bag, for message kinds the core forwards verbatim to
/// an external collaborator without interpreting.
pub type PropertyBag = HashMap<String, String>;

/// Every inbound message the core itself interprets. Message kinds the core
/// ignores (Chat, Trade, Marketplace, Building, file-transfer) are represented as
/// [`Inbound::Forwarded`] so a malformed payload can't panic the deframer even though
/// the core never acts on it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Inbound {
	Login { player: PlayerId, session_token: String },
	Register { player: PlayerId, username: String },
	Position { entity: EntityId, position: Vec3, delta_time_ms: u32 },
	Combat { attacker: EntityId, target: EntityId, ranged: bool },
	Inventory { action: InventoryActionKind, item_id: String, quantity: u32 },
	Animation { entity: EntityId, clip: String },
	Health { new_health: f64 },
	SpawnRequest { entity_type: EntityType, position: Vec3 },
	GroupSpawnRequest { entity_type: EntityType, positions: Vec<Vec3> },
	GroupSpawnReady { entity_ids: Vec<EntityId> },
	MoveCommand { entity: EntityId, target: Vec3 },
	AttackCommand { entity: EntityId, target: EntityId },
	FollowCommand { entity: EntityId, target: EntityId },
	Heartbeat { client_tick: u64, client_time_ms: u64 },
	Ack { event_id: EventId },
	/// A message kind external to the core (chat/trade/marketplace/building/file
	/// transfer). The core never interprets `body`.
	Forwarded { kind: String, body: PropertyBag },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InventoryActionKind {
	Pickup,
	Drop,
	Use,
}

/// The envelope every inbound message travels in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
	pub player: PlayerId,
	pub session_token: String,
	pub timestamp_ms: u64,
	pub message: Inbound,
}

/// Status of a [`ReplicatedEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventStatus {
	Pending,
	Sent,
	Acknowledged,
	Failed,
}

/// A tier-1 event queued for reliable delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicatedEvent {
	pub id: EventId,
	pub event_type: String,
	pub entity: EntityId,
	pub source_player: PlayerId,
	pub target_entity: Option<EntityId>,
	pub payload: PropertyBag,
	pub timestamp_ms: u64,
	pub version: u64,
	pub status: EventStatus,
}

/// A single transient-state update line item in an outbound packet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransientUpdate {
	pub entity: EntityId,
	pub property: Property,
	pub value: Vec<u8>,
	pub version: u64,
}

/// `{clientId, timestamp, transientUpdates, events}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatePacket {
	pub client_id: PlayerId,
	pub timestamp_ms: u64,
	pub transient_updates: Vec<TransientUpdate>,
	pub events: Vec<ReplicatedEvent>,
}

/// `{playerId, saveVersion, timestamp, payload, isAuthoritative}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveSnapshotMessage {
	pub player: PlayerId,
	pub save_version: u64,
	pub timestamp_ms: u64,
	pub payload: crate::save_model::PlayerSave,
	pub is_authoritative: bool,
}

/// `{playerId, save data, server tick, timestamp, world snapshot, reason}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResyncPacket {
	pub player: PlayerId,
	pub save: crate::save_model::PlayerSave,
	pub server_tick: u64,
	pub timestamp_ms: u64,
	pub world_snapshot: Option<crate::save_model::WorldSave>,
	pub reason: ResyncReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResyncReason {
	ExplicitRequest,
	DriftThreshold,
}

/// A reason a client-authored action was rejected. Included in the reply so
/// clients can display it, never parsed by clients to influence control flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectionReason {
	Teleport { distance: f64 },
	SpeedViolation { speed: f64 },
	MovementAnomaly { distance: f64, budget: f64 },
	RateLimited,
	OnCooldown,
	OutOfRange { distance: f64, max: f64 },
	SelfTarget,
	InvalidQuantity,
	NotNearItem,
	EmptyItemId,
	EmptyChat,
	ChatTooLong,
	AuthorityViolation,
	ConflictLost { holder: PlayerId },
	Other(String),
}

/// Every outbound message kind the core sends over the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Outbound {
	HandshakeAck,
	State(StatePacket),
	SaveSnapshot(SaveSnapshotMessage),
	Resync(Box<ResyncPacket>),
	Rejection { reason: RejectionReason },
}

impl std::fmt::Display for RejectionReason {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			RejectionReason::Teleport { distance } => {
				write!(f, "Teleport violation: distance {distance:.2}")
			}
			RejectionReason::SpeedViolation { speed } => {
				write!(f, "Speed violation: {speed:.2} m/s")
			}
			RejectionReason::MovementAnomaly { distance, budget } => {
				write!(f, "Movement anomaly: {distance:.2} exceeds budget {budget:.2}")
			}
			RejectionReason::RateLimited => write!(f, "rate limited"),
			RejectionReason::OnCooldown => write!(f, "action on cooldown"),
			RejectionReason::OutOfRange { distance, max } => {
				write!(f, "out of range: {distance:.2} > {max:.2}")
			}
			RejectionReason::SelfTarget => write!(f, "cannot target self"),
			RejectionReason::InvalidQuantity => write!(f, "invalid quantity"),
			RejectionReason::NotNearItem => write!(f, "not near item"),
			RejectionReason::EmptyItemId => write!(f, "empty item id"),
			RejectionReason::EmptyChat => write!(f, "empty chat message"),
			RejectionReason::ChatTooLong => write!(f, "chat message too long"),
			RejectionReason::AuthorityViolation => write!(f, "authority violation"),
			RejectionReason::ConflictLost { holder } => {
				write!(f, "conflict lost to {holder}")
			}
			RejectionReason::Other(s) => write!(f, "{s}"),
		}
	}
}
