//! Fan-out of per-tick frames to every session of a world.
//!
//! Built on `tokio::sync::broadcast`: the dispatcher publishes one
//! frame per tick and never waits for consumers. Each subscriber owns a
//! bounded backlog inside the channel; when a slow consumer falls more
//! than the queue depth behind, its oldest pending frames are dropped
//! and counted, and the newest frame still comes through. The next
//! tick's snapshot supersedes anything lost, so state stays eventually
//! consistent without ever stalling the tick loop.

use log::debug;
use shared::Frame;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Frames a session may fall behind before the oldest are dropped.
pub const DEFAULT_QUEUE_DEPTH: usize = 8;

#[derive(Clone)]
pub struct Dispatcher {
    tx: broadcast::Sender<Arc<Frame>>,
}

impl Dispatcher {
    pub fn new(depth: usize) -> Self {
        let (tx, _) = broadcast::channel(depth.max(1));
        Self { tx }
    }

    /// Publishes one tick's frame to all current subscribers. Returns
    /// how many subscribers there were; an idle world with none is not
    /// an error.
    pub fn publish(&self, frame: Frame) -> usize {
        self.tx.send(Arc::new(frame)).unwrap_or(0)
    }

    pub fn subscribe(&self) -> FrameStream {
        FrameStream {
            rx: self.tx.subscribe(),
            frames_lost: 0,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// One session's view of the frame stream, in tick order.
pub struct FrameStream {
    rx: broadcast::Receiver<Arc<Frame>>,
    frames_lost: u64,
}

impl FrameStream {
    /// Next frame, or `None` once the world's dispatcher is gone.
    /// Lagged gaps are skipped transparently and tallied.
    pub async fn next(&mut self) -> Option<Arc<Frame>> {
        loop {
            match self.rx.recv().await {
                Ok(frame) => return Some(frame),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    self.frames_lost += skipped;
                    debug!(
                        "slow consumer dropped {} frame(s), {} lost total",
                        skipped, self.frames_lost
                    );
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Total frames dropped for this subscriber due to falling behind.
    pub fn frames_lost(&self) -> u64 {
        self.frames_lost
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(tick: u64) -> Frame {
        Frame {
            tick,
            players: vec![],
            pellets: vec![],
            events: vec![],
        }
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let dispatcher = Dispatcher::new(DEFAULT_QUEUE_DEPTH);
        assert_eq!(dispatcher.publish(frame(1)), 0);
        assert_eq!(dispatcher.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_frames_arrive_in_tick_order() {
        let dispatcher = Dispatcher::new(DEFAULT_QUEUE_DEPTH);
        let mut stream = dispatcher.subscribe();

        for tick in 1..=4 {
            dispatcher.publish(frame(tick));
        }
        for tick in 1..=4 {
            assert_eq!(stream.next().await.unwrap().tick, tick);
        }
        assert_eq!(stream.frames_lost(), 0);
    }

    #[tokio::test]
    async fn test_slow_subscriber_drops_oldest_and_counts() {
        let dispatcher = Dispatcher::new(2);
        let mut stream = dispatcher.subscribe();

        // Push well past the queue depth before the subscriber reads
        for tick in 1..=10 {
            dispatcher.publish(frame(tick));
        }

        // Oldest frames are gone; the newest still arrive
        let first = stream.next().await.unwrap();
        assert!(first.tick > 1);
        assert_eq!(stream.frames_lost(), 10 - 2);

        let second = stream.next().await.unwrap();
        assert_eq!(second.tick, first.tick + 1);
    }

    #[tokio::test]
    async fn test_stream_ends_when_dispatcher_dropped() {
        let dispatcher = Dispatcher::new(DEFAULT_QUEUE_DEPTH);
        let mut stream = dispatcher.subscribe();
        dispatcher.publish(frame(1));
        drop(dispatcher);

        assert_eq!(stream.next().await.unwrap().tick, 1);
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_subscribers_are_independent() {
        let dispatcher = Dispatcher::new(2);
        let mut fast = dispatcher.subscribe();
        let mut slow = dispatcher.subscribe();

        dispatcher.publish(frame(1));
        assert_eq!(fast.next().await.unwrap().tick, 1);

        for tick in 2..=6 {
            dispatcher.publish(frame(tick));
            assert_eq!(fast.next().await.unwrap().tick, tick);
        }

        // The slow subscriber lagged on its own; the fast one lost nothing
        assert!(slow.next().await.unwrap().tick > 1);
        assert!(slow.frames_lost() > 0);
        assert_eq!(fast.frames_lost(), 0);
    }
}
