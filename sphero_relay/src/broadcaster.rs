// Periodic stimulus to every registered unit.
//
// The broadcaster is a plain timer thread. It never touches relay state: on
// each tick it calls the supplied closure, which in the server posts a
// `BroadcastTick` event into the main loop. The session then sends the
// configured `Stimulus` through the router to every unit it knows about.
//
// Ticks are scheduled against a fixed start time (tick n fires at
// start + n * interval), so a slow event loop does not make the schedule
// drift. Missed ticks are not made up; ticks are never coalesced either.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::thread;
use std::time::{Duration, Instant};

use serde_json::Value;

use crate::config::BroadcastConfig;
use crate::transport::sleep_until;

/// Kind and payload pushed to each unit on every tick.
#[derive(Clone, Debug, PartialEq)]
pub struct Stimulus {
    pub kind: String,
    pub payload: Value,
}

impl From<&BroadcastConfig> for Stimulus {
    fn from(config: &BroadcastConfig) -> Self {
        Self {
            kind: config.kind.clone(),
            payload: config.payload.clone(),
        }
    }
}

/// Spawn the ticker. It stops when `keep_running` is cleared or when
/// `on_tick` returns false (the main loop has gone away).
pub fn spawn_ticker<F>(
    interval: Duration,
    keep_running: Arc<AtomicBool>,
    mut on_tick: F,
) -> thread::JoinHandle<()>
where
    F: FnMut() -> bool + Send + 'static,
{
    thread::spawn(move || {
        let start = Instant::now();
        let mut next = start + interval;
        loop {
            if !sleep_until(next, &keep_running) {
                break;
            }
            if !on_tick() {
                break;
            }
            next += interval;
            // Skip ticks we are already late for rather than bursting.
            let now = Instant::now();
            while next <= now {
                next += interval;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::sync::mpsc;

    use super::*;

    #[test]
    fn ticks_repeat_until_stopped() {
        let keep_running = Arc::new(AtomicBool::new(true));
        let (tx, rx) = mpsc::channel();
        let handle = spawn_ticker(Duration::from_millis(10), keep_running.clone(), move || {
            tx.send(Instant::now()).is_ok()
        });

        let first = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        let second = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(second > first);

        keep_running.store(false, Ordering::SeqCst);
        handle.join().unwrap();
    }

    #[test]
    fn stops_when_receiver_is_gone() {
        let keep_running = Arc::new(AtomicBool::new(true));
        let (tx, rx) = mpsc::channel::<()>();
        drop(rx);
        let handle = spawn_ticker(Duration::from_millis(5), keep_running, move || {
            tx.send(()).is_ok()
        });
        handle.join().unwrap();
    }

    #[test]
    fn stimulus_from_config() {
        let stimulus = Stimulus::from(&BroadcastConfig::default());
        assert_eq!(stimulus.kind, "SpheroMatrix");
        assert_eq!(stimulus.payload, Value::from("X"));
    }
}
