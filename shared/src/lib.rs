use serde::{Deserialize, Serialize};

// Default arena and simulation parameters. Worlds copy these into their
// own config, so they are tunable per world; these are the documented
// defaults.
pub const WORLD_WIDTH: f32 = 1000.0;
pub const WORLD_HEIGHT: f32 = 1000.0;
pub const TICK_RATE: u32 = 30;
pub const PELLET_COUNT: usize = 200;
pub const PELLET_VALUE: f32 = 5.0;
pub const PELLET_RADIUS: f32 = 3.0;
pub const STARTING_MASS: f32 = 100.0;

// Movement policy: speed falls off linearly with radius so bigger
// players are slower.
pub const BASE_SPEED: f32 = 260.0;
pub const MIN_SPEED: f32 = 45.0;
pub const MASS_SLOWDOWN: f32 = 0.45;

// Absorption policy: the larger radius must exceed the smaller by this
// ratio, and only 80% of the absorbed mass transfers to the winner.
pub const ABSORB_RATIO: f32 = 1.2;
pub const ABSORB_EFFICIENCY: f32 = 0.8;

/// Largest dt the simulation will integrate in one tick; longer gaps
/// (scheduler hiccups) are capped rather than extrapolated.
pub const MAX_DELTA_TIME: f32 = 1.0 / 20.0;

/// Wire protocol between clients and the server. Framed with bincode,
/// one packet per datagram.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum Packet {
    // Client -> server
    Join {
        token: String,
        world_id: u64,
        name: String,
    },
    SetTarget {
        x: f32,
        y: f32,
    },
    Leave,
    CreateWorld {
        token: String,
        name: String,
    },
    ListWorlds {
        token: String,
    },

    // Server -> client
    Joined {
        world_id: u64,
        player_id: u64,
    },
    Frame(Frame),
    WorldCreated(WorldSummary),
    WorldList(Vec<WorldSummary>),
    Error {
        message: String,
    },
}

/// One tick's worth of public world state, broadcast to every session
/// after the tick completes. Tick numbers are monotonic so clients can
/// drop duplicate or reordered frames.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Frame {
    pub tick: u64,
    pub players: Vec<FramePlayer>,
    pub pellets: Vec<FramePellet>,
    pub events: Vec<FrameEvent>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct FramePlayer {
    pub id: u64,
    pub name: String,
    pub x: f32,
    pub y: f32,
    pub mass: f32,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct FramePellet {
    pub id: u64,
    pub x: f32,
    pub y: f32,
}

/// Simulation events that occurred during the tick a frame describes.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub enum FrameEvent {
    Spawned { player: u64 },
    Absorbed { winner: u64, loser: u64 },
    Eliminated { player: u64 },
}

/// Listing entry for a live world, exposed to any request-handling
/// layer (CLI, UDP, future HTTP).
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct WorldSummary {
    pub id: u64,
    pub name: String,
    pub player_count: u32,
    pub tick_rate: u32,
}

/// Radius of a circle whose area tracks the given mass. Clamped below
/// so a zero-mass entity still has a usable collision radius.
pub fn radius_for_mass(mass: f32) -> f32 {
    mass.max(1.0).sqrt()
}

pub fn distance(ax: f32, ay: f32, bx: f32, by: f32) -> f32 {
    let dx = bx - ax;
    let dy = by - ay;
    (dx * dx + dy * dy).sqrt()
}

/// True when two circles overlap (touching counts as no overlap).
pub fn circles_overlap(ax: f32, ay: f32, ar: f32, bx: f32, by: f32, br: f32) -> bool {
    let dx = bx - ax;
    let dy = by - ay;
    dx * dx + dy * dy < (ar + br) * (ar + br)
}
