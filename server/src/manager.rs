//! Ownership and scheduling of live worlds.
//!
//! The manager holds a table of world handles behind its own
//! short-lived lock; each world runs its tick loop in its own spawned
//! task, so a stalled or panicking world can never block world
//! creation, listing, or any other world's ticks. Commands reach a
//! world task through a bounded channel, and a watcher task removes the
//! table entry once the task ends for any reason, panics included.
//!
//! World lifecycle: ACTIVE (loop running) -> STOPPING (final flush,
//! channels closed, sessions released) -> DESTROYED (entry removed).

use log::{debug, error, info, warn};
use shared::WorldSummary;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::{interval, Duration, Instant, MissedTickBehavior};

use crate::broadcast::{Dispatcher, FrameStream, DEFAULT_QUEUE_DEPTH};
use crate::session::SessionRegistry;
use crate::simulation;
use crate::snapshot::{self, SnapshotStore};
use crate::world::{World, WorldConfig};

/// Depth of each world's command channel. Commands are tiny and the
/// tick loop drains them continuously; overflow only happens if a
/// client floods intents, which are lossy by design.
const COMMAND_QUEUE_DEPTH: usize = 256;

/// Commands delivered to a world's tick task.
pub enum WorldCommand {
    Join {
        name: String,
        reply: oneshot::Sender<JoinAck>,
    },
    SetIntent {
        session_id: u64,
        x: f32,
        y: f32,
    },
    Leave {
        session_id: u64,
    },
    Subscribe {
        reply: oneshot::Sender<FrameStream>,
    },
    Stop,
}

/// Everything a transport needs to service one joined session.
pub struct JoinAck {
    pub session_id: u64,
    pub player_id: u64,
    pub stream: FrameStream,
}

/// Cheap cloneable handle to one live world. Deliberately holds no
/// frame sender of its own: when the tick task ends, its dispatcher is
/// the last one standing and every subscriber's stream terminates.
#[derive(Clone)]
pub struct WorldHandle {
    pub id: u64,
    pub name: String,
    pub tick_rate: u32,
    cmd_tx: mpsc::Sender<WorldCommand>,
    player_count: Arc<AtomicUsize>,
}

impl WorldHandle {
    /// Joins a new session; `None` when the world is stopping.
    pub async fn join(&self, name: &str) -> Option<JoinAck> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(WorldCommand::Join {
                name: name.to_string(),
                reply,
            })
            .await
            .ok()?;
        rx.await.ok()
    }

    /// Forwards the latest movement target. Lossy on overflow: the
    /// intent slot is last-write-wins anyway, so dropping a flooded
    /// update loses nothing that the next one would not replace.
    pub fn set_intent(&self, session_id: u64, x: f32, y: f32) {
        let _ = self
            .cmd_tx
            .try_send(WorldCommand::SetIntent { session_id, x, y });
    }

    pub async fn leave(&self, session_id: u64) {
        let _ = self.cmd_tx.send(WorldCommand::Leave { session_id }).await;
    }

    /// Frame stream without a bound player (observer view). `None` when
    /// the world is stopping.
    pub async fn subscribe(&self) -> Option<FrameStream> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(WorldCommand::Subscribe { reply })
            .await
            .ok()?;
        rx.await.ok()
    }

    pub fn player_count(&self) -> usize {
        self.player_count.load(Ordering::Relaxed)
    }

    pub fn summary(&self) -> WorldSummary {
        WorldSummary {
            id: self.id,
            name: self.name.clone(),
            player_count: self.player_count() as u32,
            tick_rate: self.tick_rate,
        }
    }

    async fn stop(&self) {
        let _ = self.cmd_tx.send(WorldCommand::Stop).await;
    }
}

pub struct WorldManager {
    worlds: Arc<Mutex<HashMap<u64, WorldHandle>>>,
    next_world_id: AtomicU64,
    store: Arc<SnapshotStore>,
    defaults: WorldConfig,
}

impl WorldManager {
    pub fn new(store: SnapshotStore, defaults: WorldConfig) -> Self {
        Self {
            worlds: Arc::new(Mutex::new(HashMap::new())),
            next_world_id: AtomicU64::new(1),
            store: Arc::new(store),
            defaults,
        }
    }

    /// Creates a world and starts its tick loop immediately.
    pub async fn create_world(&self, name: &str) -> WorldSummary {
        let id = self.next_world_id.fetch_add(1, Ordering::Relaxed);
        let mut config = self.defaults.clone();
        config.name = name.to_string();

        let mut world = World::new(id, config);
        world.populate_pellets();
        self.spawn_world(world).await
    }

    /// Takes ownership of an already-built world (typically restored
    /// from a durable snapshot) and starts ticking it. Future generated
    /// ids skip past the adopted one.
    pub async fn adopt_world(&self, world: World) -> WorldSummary {
        self.next_world_id.fetch_max(world.id + 1, Ordering::Relaxed);
        self.spawn_world(world).await
    }

    async fn spawn_world(&self, world: World) -> WorldSummary {
        let id = world.id;
        let name = world.config.name.clone();
        let tick_rate = world.config.tick_rate;

        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let dispatcher = Dispatcher::new(DEFAULT_QUEUE_DEPTH);
        let player_count = Arc::new(AtomicUsize::new(0));

        let handle = WorldHandle {
            id,
            name: name.clone(),
            tick_rate,
            cmd_tx,
            player_count: Arc::clone(&player_count),
        };

        let task = tokio::spawn(run_world(
            world,
            cmd_rx,
            dispatcher,
            Arc::clone(&self.store),
            player_count,
        ));

        self.worlds.lock().await.insert(id, handle.clone());

        // Watcher: whatever ends the tick task (stop, fatal error,
        // panic), the table entry goes away and nothing else is touched.
        {
            let worlds = Arc::clone(&self.worlds);
            tokio::spawn(async move {
                if let Err(e) = task.await {
                    error!("world {} task panicked: {}", id, e);
                }
                worlds.lock().await.remove(&id);
                info!("world {} destroyed", id);
            });
        }

        info!("world {} ({}) registered", id, name);
        handle.summary()
    }

    pub async fn list_worlds(&self) -> Vec<WorldSummary> {
        let worlds = self.worlds.lock().await;
        let mut summaries: Vec<WorldSummary> = worlds.values().map(|h| h.summary()).collect();
        summaries.sort_by_key(|s| s.id);
        summaries
    }

    pub async fn world(&self, id: u64) -> Option<WorldHandle> {
        self.worlds.lock().await.get(&id).cloned()
    }

    /// Requests shutdown of a world: in-flight tick finishes, a final
    /// flush runs, sessions are released. Returns false when the id is
    /// unknown. The table entry is removed by the watcher once the task
    /// has actually ended.
    pub async fn destroy_world(&self, id: u64) -> bool {
        let handle = { self.worlds.lock().await.get(&id).cloned() };
        match handle {
            Some(handle) => {
                handle.stop().await;
                true
            }
            None => false,
        }
    }
}

/// One world's tick loop. Sole owner and sole mutator of the world
/// state; everything else talks to it through commands and the frame
/// dispatcher. The loop never suspends inside a tick computation, and
/// durable flushes run on their own spawned task so disk I/O cannot
/// stall the schedule.
async fn run_world(
    mut world: World,
    mut cmd_rx: mpsc::Receiver<WorldCommand>,
    dispatcher: Dispatcher,
    store: Arc<SnapshotStore>,
    player_count: Arc<AtomicUsize>,
) {
    let mut registry = SessionRegistry::new();

    let tick_duration = Duration::from_secs_f32(1.0 / world.config.tick_rate.max(1) as f32);
    let mut ticker = interval(tick_duration);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut flusher = interval(world.config.snapshot_interval.max(Duration::from_millis(100)));
    flusher.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let flush_guard = Arc::new(Mutex::new(()));

    player_count.store(world.player_count(), Ordering::Relaxed);
    info!(
        "world {} ({}) active at {} Hz",
        world.id, world.config.name, world.config.tick_rate
    );

    // Both intervals fire immediately on the first tick; consume those.
    ticker.tick().await;
    flusher.tick().await;
    let mut last_tick = Instant::now();

    loop {
        tokio::select! {
            command = cmd_rx.recv() => {
                match command {
                    Some(WorldCommand::Join { name, reply }) => {
                        let player_id = world.spawn_player(&name);
                        let session_id = registry.bind(player_id);
                        player_count.store(world.player_count(), Ordering::Relaxed);
                        let ack = JoinAck {
                            session_id,
                            player_id,
                            stream: dispatcher.subscribe(),
                        };
                        if reply.send(ack).is_err() {
                            // Caller vanished before the ack; roll the join back
                            registry.release(session_id);
                            world.remove_player(player_id);
                            player_count.store(world.player_count(), Ordering::Relaxed);
                        }
                    }
                    Some(WorldCommand::SetIntent { session_id, x, y }) => {
                        registry.set_intent(session_id, x, y);
                    }
                    Some(WorldCommand::Leave { session_id }) => {
                        if let Some(player_id) = registry.release(session_id) {
                            world.remove_player(player_id);
                            player_count.store(world.player_count(), Ordering::Relaxed);
                        }
                    }
                    Some(WorldCommand::Subscribe { reply }) => {
                        let _ = reply.send(dispatcher.subscribe());
                    }
                    Some(WorldCommand::Stop) | None => break,
                }
            }

            _ = ticker.tick() => {
                let now = Instant::now();
                let dt = now.duration_since(last_tick).as_secs_f32();
                last_tick = now;

                let intents = registry.intents();
                let outcome = match simulation::step(&mut world, &intents, dt) {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        // World-fatal: stop this world, leave the rest alone
                        error!("world {} fatal simulation error: {}", world.id, e);
                        break;
                    }
                };

                for player_id in &outcome.removed_players {
                    registry.mark_eliminated(*player_id);
                }
                player_count.store(world.player_count(), Ordering::Relaxed);

                dispatcher.publish(snapshot::encode_frame(&world, &outcome.events));
            }

            _ = flusher.tick() => {
                // Never stack flushes of the same world: skip this round
                // if the previous write is still in flight.
                match Arc::clone(&flush_guard).try_lock_owned() {
                    Ok(guard) => {
                        let durable = snapshot::encode_durable(&world);
                        let store = Arc::clone(&store);
                        let world_id = world.id;
                        tokio::spawn(async move {
                            if let Err(e) = store.save(&durable).await {
                                warn!("snapshot flush for world {} failed: {}", world_id, e);
                            }
                            drop(guard);
                        });
                    }
                    Err(_) => {
                        debug!("world {}: previous flush still running, skipping", world.id);
                    }
                }
            }
        }
    }

    // STOPPING: final best-effort flush, then drop the dispatcher and
    // registry, which closes every session's frame stream.
    info!("world {} ({}) stopping", world.id, world.config.name);
    if let Err(e) = store.save(&snapshot::encode_durable(&world)).await {
        warn!("final snapshot flush for world {} failed: {}", world.id, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::FrameEvent;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(5);

    fn test_manager() -> WorldManager {
        let dir = std::env::temp_dir().join(format!("petri-manager-{}", std::process::id()));
        let store = SnapshotStore::new(dir).unwrap();
        let mut defaults = WorldConfig::new("");
        // Fast ticks and few pellets keep the tests snappy
        defaults.tick_rate = 120;
        defaults.pellet_count = 5;
        defaults.snapshot_interval = Duration::from_secs(3600);
        WorldManager::new(store, defaults)
    }

    #[tokio::test]
    async fn test_create_and_list_worlds() {
        let manager = test_manager();
        let a = manager.create_world("alpha").await;
        let b = manager.create_world("beta").await;
        assert_ne!(a.id, b.id);

        let listed = manager.list_worlds().await;
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].name, "alpha");
        assert_eq!(listed[1].name, "beta");
        assert_eq!(listed[0].player_count, 0);
        assert_eq!(listed[0].tick_rate, 120);
    }

    #[tokio::test]
    async fn test_join_receives_frames_with_player() {
        let manager = test_manager();
        let summary = manager.create_world("arena").await;
        let handle = manager.world(summary.id).await.unwrap();

        let mut ack = handle.join("blob").await.unwrap();
        let frame = timeout(WAIT, ack.stream.next()).await.unwrap().unwrap();

        assert!(frame.players.iter().any(|p| p.id == ack.player_id));
        assert_eq!(frame.pellets.len(), 5);
        assert!(frame
            .events
            .iter()
            .any(|e| *e == FrameEvent::Spawned { player: ack.player_id })
            || frame.tick > 1);
        assert_eq!(handle.player_count(), 1);
    }

    #[tokio::test]
    async fn test_leave_removes_player_from_frames() {
        let manager = test_manager();
        let summary = manager.create_world("arena").await;
        let handle = manager.world(summary.id).await.unwrap();

        let ack = handle.join("blob").await.unwrap();
        let player_id = ack.player_id;
        handle.leave(ack.session_id).await;
        // Leaving twice is harmless
        handle.leave(ack.session_id).await;

        let mut observer = handle.subscribe().await.unwrap();
        // The first observed frame may straddle the leave; the next
        // tick's frame must omit the player.
        let mut omitted = false;
        for _ in 0..5 {
            let frame = timeout(WAIT, observer.next()).await.unwrap().unwrap();
            if frame.players.iter().all(|p| p.id != player_id) {
                omitted = true;
                break;
            }
        }
        assert!(omitted);
        assert_eq!(handle.player_count(), 0);
    }

    #[tokio::test]
    async fn test_intent_moves_player() {
        let manager = test_manager();
        let summary = manager.create_world("arena").await;
        let handle = manager.world(summary.id).await.unwrap();

        let mut ack = handle.join("blob").await.unwrap();
        let start = timeout(WAIT, ack.stream.next()).await.unwrap().unwrap();
        let me = start
            .players
            .iter()
            .find(|p| p.id == ack.player_id)
            .unwrap()
            .clone();

        // Aim at the far corner from wherever we spawned
        let target = if me.x < 500.0 { (1000.0, me.y) } else { (0.0, me.y) };
        handle.set_intent(ack.session_id, target.0, target.1);

        let mut moved = false;
        for _ in 0..30 {
            let frame = timeout(WAIT, ack.stream.next()).await.unwrap().unwrap();
            if let Some(p) = frame.players.iter().find(|p| p.id == ack.player_id) {
                if (p.x - me.x).abs() > 1.0 {
                    moved = true;
                    break;
                }
            }
        }
        assert!(moved);
    }

    #[tokio::test]
    async fn test_destroy_world_closes_streams() {
        let manager = test_manager();
        let summary = manager.create_world("doomed").await;
        let handle = manager.world(summary.id).await.unwrap();
        let mut ack = handle.join("blob").await.unwrap();

        assert!(manager.destroy_world(summary.id).await);

        // The stream drains any buffered frames and then ends
        let ended = timeout(WAIT, async {
            while ack.stream.next().await.is_some() {}
        })
        .await;
        assert!(ended.is_ok());

        // Eventually gone from the table as well
        let mut gone = false;
        for _ in 0..50 {
            if manager.world(summary.id).await.is_none() {
                gone = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(gone);

        assert!(!manager.destroy_world(summary.id).await);
    }

    #[tokio::test]
    async fn test_worlds_are_isolated() {
        let manager = test_manager();
        let a = manager.create_world("a").await;
        let b = manager.create_world("b").await;

        assert!(manager.destroy_world(a.id).await);

        // World b keeps ticking after a is gone
        let handle = manager.world(b.id).await.unwrap();
        let mut stream = handle.subscribe().await.unwrap();
        let first = timeout(WAIT, stream.next()).await.unwrap().unwrap();
        let second = timeout(WAIT, stream.next()).await.unwrap().unwrap();
        assert!(second.tick > first.tick);
    }

    #[tokio::test]
    async fn test_adopted_world_resumes_ticking() {
        let manager = test_manager();

        let mut config = WorldConfig::new("restored");
        config.tick_rate = 120;
        config.pellet_count = 5;
        config.snapshot_interval = Duration::from_secs(3600);
        let mut world = World::new(41, config);
        world.populate_pellets();
        world.tick = 500;

        let summary = manager.adopt_world(world).await;
        assert_eq!(summary.id, 41);
        assert_eq!(summary.name, "restored");

        // Ticking continues from the stored tick number
        let handle = manager.world(41).await.unwrap();
        let mut stream = handle.subscribe().await.unwrap();
        let frame = timeout(WAIT, stream.next()).await.unwrap().unwrap();
        assert!(frame.tick > 500);

        // Generated ids skip past the adopted one
        let fresh = manager.create_world("next").await;
        assert!(fresh.id > 41);
    }
}
