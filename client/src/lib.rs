//! `core-client`: the minimal client-side surface this project actually calls for
//! — a read-only save mirror and a drift-aware tick-ack helper.
//! It is not a full game client: rendering, prediction, and interpolation stay out of
//! scope, the same way the teacher's own `replicate-client` stops at the manager/
//! connection layer and leaves simulation to the embedding game engine.

pub mod tick_reporter;

pub use core_common::mirror::SaveMirror;
