//! Per-tick simulation: intent application, pellet consumption, player
//! absorption and removed-entity cleanup.
//!
//! One call to [`step`] advances a world by exactly one tick. The whole
//! pass is synchronous and touches no I/O, so the caller can run it
//! inside its tick task without ever suspending mid-mutation. All
//! pairwise work iterates in ascending id order, which makes chained
//! absorptions within a tick reproducible from identical state.

use log::{debug, info};
use shared::{circles_overlap, distance, MAX_DELTA_TIME};
use std::collections::HashMap;
use std::fmt;

use crate::world::World;

/// Events produced while advancing a tick, in the order they occurred.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickEvent {
    Spawned { player: u64 },
    Absorbed { winner: u64, loser: u64 },
    Eliminated { player: u64 },
}

/// A whole-tick failure. Fatal to the affected world only; the manager
/// stops that world and leaves the rest of the process alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimulationError {
    CorruptState { tick: u64, detail: String },
}

impl fmt::Display for SimulationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SimulationError::CorruptState { tick, detail } => {
                write!(f, "corrupt world state at tick {}: {}", tick, detail)
            }
        }
    }
}

impl std::error::Error for SimulationError {}

#[derive(Debug)]
pub struct StepOutcome {
    pub events: Vec<TickEvent>,
    /// Players absorbed this tick; the caller flags their sessions as
    /// eliminated (they are not disconnected and may rejoin fresh).
    pub removed_players: Vec<u64>,
}

/// Advances `world` by one tick.
///
/// `intents` maps player ids to their latest movement target; targets
/// persist between ticks, so an absent entry simply means the player
/// has never sent one. Pellets consumed this tick are respawned within
/// the same tick, so the population is back at its target before the
/// frame is encoded.
pub fn step(
    world: &mut World,
    intents: &HashMap<u64, (f32, f32)>,
    dt: f32,
) -> Result<StepOutcome, SimulationError> {
    // Keep the integration stable across scheduler hiccups.
    let dt = dt.clamp(1e-4, MAX_DELTA_TIME);

    let mut events: Vec<TickEvent> = world.pending_events.drain(..).collect();

    apply_intents(world, intents, dt);
    consume_pellets(world);
    resolve_absorptions(world, &mut events);
    let removed_players = purge_removed(world, &mut events);

    world.tick += 1;
    check_invariants(world)?;

    Ok(StepOutcome {
        events,
        removed_players,
    })
}

/// Moves each player a bounded distance toward its latest target.
/// Malformed targets (non-finite coordinates) mean no movement this
/// tick; out-of-range targets are clamped. Neither is an error.
fn apply_intents(world: &mut World, intents: &HashMap<u64, (f32, f32)>, dt: f32) {
    let width = world.config.width;
    let height = world.config.height;
    let base_speed = world.config.base_speed;
    let min_speed = world.config.min_speed;
    let mass_slowdown = world.config.mass_slowdown;

    for (id, player) in world.players.iter_mut() {
        let Some(&(tx, ty)) = intents.get(id) else {
            continue;
        };
        if !tx.is_finite() || !ty.is_finite() {
            continue;
        }
        let tx = tx.clamp(0.0, width);
        let ty = ty.clamp(0.0, height);

        let dist = distance(player.x, player.y, tx, ty);
        if dist <= f32::EPSILON {
            continue;
        }

        // Bigger players are slower; linear falloff with radius.
        let speed = (base_speed - player.radius() * mass_slowdown).clamp(min_speed, base_speed);
        let travel = (speed * dt).min(dist);
        player.x = (player.x + (tx - player.x) / dist * travel).clamp(0.0, width);
        player.y = (player.y + (ty - player.y) / dist * travel).clamp(0.0, height);
    }
}

/// Eats every pellet within reach of a player and respawns replacements
/// in the same tick. Each pellet goes to the lowest-id player touching
/// it, so contested pellets resolve deterministically.
fn consume_pellets(world: &mut World) {
    let mut eaten: Vec<(u64, u64, f32)> = Vec::new();
    for (pellet_id, pellet) in &world.pellets {
        for (player_id, player) in &world.players {
            if distance(player.x, player.y, pellet.x, pellet.y) <= player.radius() {
                eaten.push((*pellet_id, *player_id, pellet.value));
                break;
            }
        }
    }

    if eaten.is_empty() {
        return;
    }

    for (pellet_id, player_id, value) in &eaten {
        world.pellets.remove(pellet_id);
        if let Some(player) = world.players.get_mut(player_id) {
            player.mass += value;
        }
    }
    debug!("world {}: {} pellet(s) consumed", world.id, eaten.len());
    world.populate_pellets();
}

/// Resolves absorption for every unordered pair of alive players in
/// ascending (id, id) order. A pair absorbs when the circles overlap
/// and the larger radius is at least `absorb_ratio` times the smaller;
/// the winner gains `absorb_efficiency` of the loser's mass.
fn resolve_absorptions(world: &mut World, events: &mut Vec<TickEvent>) {
    let ratio = world.config.absorb_ratio;
    let efficiency = world.config.absorb_efficiency;
    let ids: Vec<u64> = world.players.keys().copied().collect();

    for i in 0..ids.len() {
        for j in (i + 1)..ids.len() {
            let (first, second) = (ids[i], ids[j]);
            let (Some(a), Some(b)) = (world.players.get(&first), world.players.get(&second))
            else {
                continue;
            };
            if a.removed || b.removed {
                continue;
            }
            if !circles_overlap(a.x, a.y, a.radius(), b.x, b.y, b.radius()) {
                continue;
            }

            let (ra, rb) = (a.radius(), b.radius());
            let (winner, loser, loser_mass) = if ra >= rb * ratio {
                (first, second, b.mass)
            } else if rb >= ra * ratio {
                (second, first, a.mass)
            } else {
                continue;
            };

            if let Some(l) = world.players.get_mut(&loser) {
                l.removed = true;
            }
            if let Some(w) = world.players.get_mut(&winner) {
                w.mass += loser_mass * efficiency;
            }
            info!(
                "world {}: player {} absorbed player {}",
                world.id, winner, loser
            );
            events.push(TickEvent::Absorbed { winner, loser });
        }
    }
}

/// Purges players marked removed during this tick and emits their
/// elimination events.
fn purge_removed(world: &mut World, events: &mut Vec<TickEvent>) -> Vec<u64> {
    let removed: Vec<u64> = world
        .players
        .iter()
        .filter(|(_, p)| p.removed)
        .map(|(id, _)| *id)
        .collect();
    for id in &removed {
        world.players.remove(id);
        events.push(TickEvent::Eliminated { player: *id });
    }
    removed
}

fn check_invariants(world: &World) -> Result<(), SimulationError> {
    for player in world.players.values() {
        if !(player.x.is_finite() && player.y.is_finite() && player.mass.is_finite()) {
            return Err(SimulationError::CorruptState {
                tick: world.tick,
                detail: format!("player {} has non-finite state", player.id),
            });
        }
    }
    Ok(())
}
