pub mod entity;
pub mod error;
mod framed;
pub mod ids;
pub mod messages;
pub mod mirror;
pub mod save_model;
pub mod tiers;

pub use self::framed::Framed;
