//! # World Simulation Server Library
//!
//! Authoritative server for a multiplayer absorption arena. The server
//! owns every world's canonical state; clients only ever send movement
//! targets and receive per-tick frames describing what actually
//! happened.
//!
//! ## Architecture
//!
//! ### One task per world
//! Each world runs its fixed-rate tick loop in its own async task and
//! is the sole owner of its state. There is no shared mutable world
//! state and no cross-world locking: a slow or failed world cannot
//! stall the others or the manager.
//!
//! ### Command in, frames out
//! Transports talk to a world through a bounded command channel (join,
//! intent, leave, stop) and receive state through a broadcast frame
//! stream. Inside a tick the order is fixed: intents, movement, pellet
//! consumption, absorption, frame publish.
//!
//! ### UDP communication
//! The bundled transport speaks bincode-framed packets over UDP. Frames
//! are fire-and-forget; a lost frame is superseded by the next tick's.
//!
//! ## Module Organization
//!
//! - [`world`]: world state, entities, spawn and pellet placement
//! - [`simulation`]: the tick pipeline and its rules
//! - [`session`]: connection-to-player bindings and buffered intents
//! - [`broadcast`]: per-tick frame fan-out with bounded backlogs
//! - [`snapshot`]: frame encoding, durable snapshots, the blob store
//! - [`manager`]: world lifecycle and per-world tick tasks
//! - [`network`]: the UDP request surface and connection table

pub mod broadcast;
pub mod manager;
pub mod network;
pub mod session;
pub mod simulation;
pub mod snapshot;
pub mod world;
