//! Manual clock driving

use ringplay_ap::audio::ManualClock;
use std::time::{Duration, Instant};

/// Pull `frames`-sized callbacks until `done` returns true or `timeout`
/// passes, sleeping briefly between callbacks so the refill thread runs.
///
/// Returns every rendered sample in order and whether `done` was reached.
pub fn pull_until<F>(
    clock: &ManualClock,
    frames: usize,
    timeout: Duration,
    mut done: F,
) -> (Vec<i16>, bool)
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + timeout;
    let mut rendered = Vec::new();

    while Instant::now() < deadline {
        if done() {
            return (rendered, true);
        }
        rendered.extend(clock.pull(frames));
        std::thread::sleep(Duration::from_millis(1));
    }
    (rendered, done())
}
