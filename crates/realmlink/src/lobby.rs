//! Public game list, refreshed on a fixed interval.

use std::time::Duration;

use realmlink_session::{Directory, PublicGame};
use realmlink_timer::Poller;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Polls [`Directory::list_public`] in a background task and publishes each
/// result. The task stops when the `Lobby` is dropped.
pub struct Lobby {
    games: watch::Receiver<Vec<PublicGame>>,
    task: JoinHandle<()>,
}

impl Lobby {
    /// Starts polling `directory` every `period`. The first poll runs
    /// immediately.
    pub fn spawn<D: Directory>(directory: D, period: Duration) -> Self {
        let (tx, rx) = watch::channel(Vec::new());
        let task = tokio::spawn(async move {
            let mut poller = Poller::new(period);
            loop {
                let poll = poller.tick().await;
                match directory.list_public().await {
                    Ok(games) => {
                        tracing::debug!(poll, count = games.len(), "lobby refreshed");
                        if tx.send(games).is_err() {
                            break;
                        }
                    }
                    // Keep the last good list on screen.
                    Err(e) => tracing::warn!(poll, error = %e, "lobby refresh failed"),
                }
            }
        });
        Self { games: rx, task }
    }

    /// The latest list.
    pub fn games(&self) -> Vec<PublicGame> {
        self.games.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<PublicGame>> {
        self.games.clone()
    }
}

impl Drop for Lobby {
    fn drop(&mut self) {
        self.task.abort();
    }
}
