// Random disconnect scheduler — one cancellable one-shot timer while connected.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::DelayWindow;

/// Handle to an armed disconnect timer. Dropping it does not cancel the timer.
#[derive(Debug)]
pub struct DisconnectTimer {
    token: CancellationToken,
    delay: Duration,
}

impl DisconnectTimer {
    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

pub struct DisconnectScheduler {
    window: DelayWindow,
}

impl DisconnectScheduler {
    pub fn new(window: DelayWindow) -> Self {
        Self { window }
    }

    pub fn window(&self) -> DelayWindow {
        self.window
    }

    /// Draw a delay uniformly from the inclusive window.
    pub fn draw_delay(&self) -> Duration {
        let DelayWindow { min_ms, max_ms } = self.window;
        let ms = if min_ms >= max_ms {
            min_ms
        } else {
            rand::thread_rng().gen_range(min_ms..=max_ms)
        };
        Duration::from_millis(ms)
    }

    /// Replace whatever timer `slot` holds with a freshly drawn one.
    ///
    /// `on_fire` runs once after the delay unless the timer is cancelled first.
    pub fn arm<F, Fut>(&self, slot: &mut Option<DisconnectTimer>, on_fire: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self::disarm(slot);

        let delay = self.draw_delay();
        let token = CancellationToken::new();
        let task_token = token.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    if task_token.is_cancelled() {
                        return;
                    }
                    // Spent: the handle no longer reports an armed timer.
                    task_token.cancel();
                    info!("random disconnect timer fired after {}s", delay.as_secs());
                    on_fire().await;
                }
                _ = task_token.cancelled() => {
                    debug!("random disconnect timer cancelled");
                }
            }
        });

        info!("random disconnect scheduled in {} seconds", delay.as_millis().div_ceil(1000));
        *slot = Some(DisconnectTimer { token, delay });
    }

    /// Cancel the timer held in `slot`, if any.
    pub fn disarm(slot: &mut Option<DisconnectTimer>) {
        if let Some(timer) = slot.take() {
            timer.cancel();
        }
    }
}
