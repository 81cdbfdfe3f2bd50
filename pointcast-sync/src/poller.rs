use std::{future::Future, time::Duration};

use tokio::{task::JoinHandle, time};

/// A handle to a running poll task, which stops the task when dropped.
///
/// Dropping every handle at teardown is what guarantees no timer outlives
/// its room session.
pub struct PollHandle {
    handle: JoinHandle<()>,
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Spawns a corrective sweep that runs immediately and then on every interval
/// tick until the handle is dropped.
///
/// The sweep runs concurrently with the push feed at all times. It is not a
/// fallback: it heals missed or out-of-order push events within one interval.
pub fn spawn_poller<F, Fut>(interval: Duration, mut sweep: F) -> PollHandle
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    let handle = tokio::spawn(async move {
        let mut timer = time::interval(interval);
        timer.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            timer.tick().await;
            sweep().await;
        }
    });

    PollHandle { handle }
}

#[cfg(test)]
mod test {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn sweeps_immediately_and_on_every_tick() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();

        let _handle = spawn_poller(Duration::from_secs(5), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        time::sleep(Duration::from_millis(1)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        time::sleep(Duration::from_secs(11)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_handle_stops_the_sweep() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();

        let handle = spawn_poller(Duration::from_secs(5), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        time::sleep(Duration::from_millis(1)).await;
        drop(handle);
        time::sleep(Duration::from_secs(30)).await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
