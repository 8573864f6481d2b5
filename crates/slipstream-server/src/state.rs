use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::RwLock;

use crate::config::ServerConfig;
use crate::room_manager::RoomManager;

pub type SharedRoomManager = Arc<RwLock<RoomManager>>;

#[derive(Clone)]
pub struct AppState {
    pub rooms: SharedRoomManager,
    pub config: Arc<ServerConfig>,
    pub ws_connection_count: Arc<AtomicUsize>,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        let rooms = RoomManager::new(config.rooms.clone(), config.bump.clone());
        Self {
            rooms: Arc::new(RwLock::new(rooms)),
            config: Arc::new(config),
            ws_connection_count: Arc::new(AtomicUsize::new(0)),
        }
    }
}

/// Counts one open WebSocket for as long as it lives.
pub struct ConnectionGuard {
    count: Arc<AtomicUsize>,
}

impl ConnectionGuard {
    /// Take a slot unless `max` connections are already open.
    pub fn try_acquire(count: &Arc<AtomicUsize>, max: usize) -> Option<Self> {
        count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < max).then_some(n + 1)
            })
            .ok()
            .map(|_| Self {
                count: Arc::clone(count),
            })
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.count.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_enforces_limit_and_releases() {
        let count = Arc::new(AtomicUsize::new(0));
        let a = ConnectionGuard::try_acquire(&count, 2).unwrap();
        let _b = ConnectionGuard::try_acquire(&count, 2).unwrap();
        assert!(ConnectionGuard::try_acquire(&count, 2).is_none());
        drop(a);
        assert_eq!(count.load(Ordering::Acquire), 1);
        assert!(ConnectionGuard::try_acquire(&count, 2).is_some());
    }
}
