//! Shared, wire-level error types. Component-internal errors live alongside their
//! owning component in `core-server`.

/// An error while decoding or handling a framed wire message.
#[derive(thiserror::Error, Debug)]
pub enum WireError {
	#[error("connection closed before message was fully received")]
	ConnectionClosed,
	#[error("io error: {0}")]
	Io(#[from] std::io::Error),
}
