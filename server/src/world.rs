//! Canonical mutable state for one world instance: players, pellets,
//! arena geometry and the per-world id/rng bookkeeping.
//!
//! A `World` is owned exclusively by its tick task in the world manager;
//! nothing else mutates it. Entity ids come from one monotonic counter
//! shared by players and pellets, so an id is never reused while the
//! world lives and in-flight events can never alias a new entity.

use log::info;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::{distance, radius_for_mass};
use std::collections::BTreeMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::simulation::TickEvent;

/// Attempts at finding a clear spawn position before giving up and
/// placing the player wherever the last roll landed.
const SPAWN_ATTEMPTS: u32 = 8;

/// Per-world configuration. Policy constants are deliberately part of
/// the config rather than hard-coded so they can be tuned per world;
/// the defaults in `shared` are the documented baseline.
#[derive(Debug, Clone, PartialEq)]
pub struct WorldConfig {
    pub name: String,
    pub width: f32,
    pub height: f32,
    pub tick_rate: u32,
    pub pellet_count: usize,
    pub snapshot_interval: Duration,
    pub base_speed: f32,
    pub min_speed: f32,
    pub mass_slowdown: f32,
    pub absorb_ratio: f32,
    pub absorb_efficiency: f32,
    pub starting_mass: f32,
    pub pellet_value: f32,
}

impl WorldConfig {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            width: shared::WORLD_WIDTH,
            height: shared::WORLD_HEIGHT,
            tick_rate: shared::TICK_RATE,
            pellet_count: shared::PELLET_COUNT,
            snapshot_interval: Duration::from_secs(10),
            base_speed: shared::BASE_SPEED,
            min_speed: shared::MIN_SPEED,
            mass_slowdown: shared::MASS_SLOWDOWN,
            absorb_ratio: shared::ABSORB_RATIO,
            absorb_efficiency: shared::ABSORB_EFFICIENCY,
            starting_mass: shared::STARTING_MASS,
            pellet_value: shared::PELLET_VALUE,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Player {
    pub id: u64,
    pub name: String,
    pub x: f32,
    pub y: f32,
    pub mass: f32,
    /// Set during a tick when the player is absorbed; purged at the end
    /// of that tick.
    pub removed: bool,
}

impl Player {
    pub fn radius(&self) -> f32 {
        radius_for_mass(self.mass)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Pellet {
    pub id: u64,
    pub x: f32,
    pub y: f32,
    pub value: f32,
}

/// One world's entity sets plus the bookkeeping the simulation needs.
///
/// Entity maps are `BTreeMap` so every iteration is in ascending id
/// order; the simulation relies on that for deterministic pairwise
/// collision resolution.
pub struct World {
    pub id: u64,
    pub config: WorldConfig,
    pub tick: u64,
    /// Unix seconds at creation, recorded in durable snapshots.
    pub created_at: u64,
    pub(crate) players: BTreeMap<u64, Player>,
    pub(crate) pellets: BTreeMap<u64, Pellet>,
    pub(crate) pending_events: Vec<TickEvent>,
    next_entity_id: u64,
    rng: StdRng,
}

impl World {
    pub fn new(id: u64, config: WorldConfig) -> Self {
        Self::with_rng(id, config, StdRng::from_entropy())
    }

    /// Seeded constructor for deterministic tests.
    pub fn with_seed(id: u64, config: WorldConfig, seed: u64) -> Self {
        Self::with_rng(id, config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(id: u64, config: WorldConfig, rng: StdRng) -> Self {
        let created_at = unix_now();
        Self {
            id,
            config,
            tick: 0,
            created_at,
            players: BTreeMap::new(),
            pellets: BTreeMap::new(),
            pending_events: Vec::new(),
            next_entity_id: 1,
            rng,
        }
    }

    /// Rebuilds a world from durable snapshot data. The id counter
    /// resumes past the highest restored id so restored entities can
    /// never collide with new ones, and the rng is reseeded from the
    /// snapshot identity so two restores of the same snapshot evolve
    /// identically under identical intents.
    pub(crate) fn from_parts(
        id: u64,
        config: WorldConfig,
        tick: u64,
        created_at: u64,
        players: Vec<Player>,
        pellets: Vec<Pellet>,
    ) -> Self {
        let max_id = players
            .iter()
            .map(|p| p.id)
            .chain(pellets.iter().map(|p| p.id))
            .max()
            .unwrap_or(0);
        Self {
            id,
            config,
            tick,
            created_at,
            players: players.into_iter().map(|p| (p.id, p)).collect(),
            pellets: pellets.into_iter().map(|p| (p.id, p)).collect(),
            pending_events: Vec::new(),
            next_entity_id: max_id + 1,
            rng: StdRng::seed_from_u64(id.wrapping_mul(0x9E37_79B9_7F4A_7C15) ^ tick),
        }
    }

    fn alloc_id(&mut self) -> u64 {
        let id = self.next_entity_id;
        self.next_entity_id += 1;
        id
    }

    pub fn player(&self, id: u64) -> Option<&Player> {
        self.players.get(&id)
    }

    /// Players in ascending id order.
    pub fn players(&self) -> impl Iterator<Item = &Player> {
        self.players.values()
    }

    /// Pellets in ascending id order.
    pub fn pellets(&self) -> impl Iterator<Item = &Pellet> {
        self.pellets.values()
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn pellet_count(&self) -> usize {
        self.pellets.len()
    }

    pub fn clamp_point(&self, x: f32, y: f32) -> (f32, f32) {
        (
            x.clamp(0.0, self.config.width),
            y.clamp(0.0, self.config.height),
        )
    }

    fn random_point(&mut self) -> (f32, f32) {
        (
            self.rng.gen_range(0.0..=self.config.width),
            self.rng.gen_range(0.0..=self.config.height),
        )
    }

    /// Adds a player with a fresh unique id. The spawn position retries
    /// a few random candidates that keep clear of existing players and
    /// falls back to the last roll when the arena is saturated.
    pub fn spawn_player(&mut self, name: &str) -> u64 {
        let radius = radius_for_mass(self.config.starting_mass);
        let mut position = self.random_point();
        for _ in 0..SPAWN_ATTEMPTS {
            let clear = self
                .players
                .values()
                .all(|p| distance(p.x, p.y, position.0, position.1) > p.radius() + radius * 2.0);
            if clear {
                break;
            }
            position = self.random_point();
        }

        let id = self.alloc_id();
        let player = Player {
            id,
            name: name.to_string(),
            x: position.0,
            y: position.1,
            mass: self.config.starting_mass,
            removed: false,
        };
        info!(
            "world {}: player {} ({}) spawned at ({:.1}, {:.1})",
            self.id, id, player.name, player.x, player.y
        );
        self.players.insert(id, player);
        self.pending_events.push(TickEvent::Spawned { player: id });
        id
    }

    /// Removes a player outright (session left). Idempotent.
    pub fn remove_player(&mut self, id: u64) -> bool {
        if self.players.remove(&id).is_some() {
            info!("world {}: player {} removed", self.id, id);
            true
        } else {
            false
        }
    }

    /// Tops up (or trims) the pellet set to the configured population.
    pub fn populate_pellets(&mut self) {
        let target = self.config.pellet_count;
        while self.pellets.len() > target {
            if let Some(id) = self.pellets.keys().next_back().copied() {
                self.pellets.remove(&id);
            }
        }
        while self.pellets.len() < target {
            let (x, y) = self.random_point();
            let id = self.alloc_id();
            self.pellets.insert(
                id,
                Pellet {
                    id,
                    x,
                    y,
                    value: self.config.pellet_value,
                },
            );
        }
    }
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_world() -> World {
        World::with_seed(1, WorldConfig::new("test"), 42)
    }

    #[test]
    fn test_spawn_player_in_bounds() {
        let mut world = test_world();
        for i in 0..20 {
            let id = world.spawn_player(&format!("p{}", i));
            let player = world.player(id).unwrap();
            assert!(player.x >= 0.0 && player.x <= world.config.width);
            assert!(player.y >= 0.0 && player.y <= world.config.height);
            assert_eq!(player.mass, world.config.starting_mass);
            assert!(!player.removed);
        }
        assert_eq!(world.player_count(), 20);
    }

    #[test]
    fn test_spawned_event_queued() {
        let mut world = test_world();
        let id = world.spawn_player("blob");
        assert_eq!(world.pending_events, vec![TickEvent::Spawned { player: id }]);
    }

    #[test]
    fn test_entity_ids_unique_and_not_reused() {
        let mut world = test_world();
        let a = world.spawn_player("a");
        world.populate_pellets();
        let b = world.spawn_player("b");
        assert_ne!(a, b);

        // Removing a player must not make its id available again
        world.remove_player(a);
        let c = world.spawn_player("c");
        assert_ne!(c, a);
        assert!(c > b);
    }

    #[test]
    fn test_remove_player_idempotent() {
        let mut world = test_world();
        let id = world.spawn_player("blob");
        assert!(world.remove_player(id));
        assert!(!world.remove_player(id));
        assert!(!world.remove_player(9999));
    }

    #[test]
    fn test_populate_pellets_reaches_target() {
        let mut world = test_world();
        world.populate_pellets();
        assert_eq!(world.pellet_count(), world.config.pellet_count);

        // Shrinking the target trims the population
        world.config.pellet_count = 50;
        world.populate_pellets();
        assert_eq!(world.pellet_count(), 50);

        // Growing it tops back up
        world.config.pellet_count = 120;
        world.populate_pellets();
        assert_eq!(world.pellet_count(), 120);

        for pellet in world.pellets() {
            assert!(pellet.x >= 0.0 && pellet.x <= world.config.width);
            assert!(pellet.y >= 0.0 && pellet.y <= world.config.height);
        }
    }

    #[test]
    fn test_clamp_point() {
        let world = test_world();
        assert_eq!(world.clamp_point(-5.0, 2000.0), (0.0, world.config.height));
        assert_eq!(world.clamp_point(500.0, 500.0), (500.0, 500.0));
    }

    #[test]
    fn test_from_parts_resumes_id_counter() {
        let players = vec![Player {
            id: 7,
            name: "blob".to_string(),
            x: 10.0,
            y: 20.0,
            mass: 150.0,
            removed: false,
        }];
        let pellets = vec![Pellet {
            id: 12,
            x: 1.0,
            y: 2.0,
            value: 5.0,
        }];
        let mut world = World::from_parts(3, WorldConfig::new("restored"), 99, 1234, players, pellets);
        assert_eq!(world.tick, 99);
        let fresh = world.spawn_player("new");
        assert!(fresh > 12);
    }
}
