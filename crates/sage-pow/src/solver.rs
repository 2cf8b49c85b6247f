//! Client-side challenge solver.

use crate::{hash_hex, meets_difficulty};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

/// Search for a solution to a challenge.
///
/// Spawns one worker per available core. Worker `k` enumerates decimal
/// candidates `k, k + n, k + 2n, …` so the workers partition the search
/// space without coordination. The first candidate whose hash satisfies the
/// difficulty wins; any valid solution is acceptable, so the result is not
/// deterministic across runs.
///
/// Returns `None` if `stop` is raised before a solution is found. Workers
/// poll the flag between candidates.
pub fn solve(prefix: &str, difficulty: u8, stop: &AtomicBool) -> Option<String> {
    let workers = thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);

    let found = AtomicBool::new(false);
    let result: Mutex<Option<String>> = Mutex::new(None);

    thread::scope(|scope| {
        for worker in 0..workers {
            let found = &found;
            let result = &result;
            scope.spawn(move || {
                let mut candidate = worker as u64;
                while !stop.load(Ordering::Relaxed) && !found.load(Ordering::Relaxed) {
                    let solution = candidate.to_string();
                    let hash = hash_hex(&format!("{prefix}{solution}"));

                    if meets_difficulty(&hash, difficulty) {
                        let mut slot = result.lock();
                        if slot.is_none() {
                            *slot = Some(solution);
                        }
                        found.store(true, Ordering::Relaxed);
                        return;
                    }

                    candidate += workers as u64;
                }
            });
        }
    });

    result.into_inner()
}

/// Solve on the blocking thread pool, for async callers.
pub async fn solve_blocking(
    prefix: String,
    difficulty: u8,
    stop: Arc<AtomicBool>,
) -> Option<String> {
    tokio::task::spawn_blocking(move || solve(&prefix, difficulty, &stop))
        .await
        .unwrap_or(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_solver_finds_valid_solution() {
        let stop = AtomicBool::new(false);
        let solution = solve("a1b2c3d4", 1, &stop).expect("difficulty 1 must be solvable");

        let hash = hash_hex(&format!("a1b2c3d4{solution}"));
        assert!(meets_difficulty(&hash, 1));
    }

    #[test]
    fn test_solver_two_leading_zeros() {
        let stop = AtomicBool::new(false);
        let solution = solve("prefix", 2, &stop).expect("difficulty 2 must be solvable");

        let hash = hash_hex(&format!("prefix{solution}"));
        assert!(hash.starts_with("00"));
    }

    #[test]
    fn test_cancelled_solver_returns_none() {
        let stop = AtomicBool::new(true);
        // Difficulty far beyond practical: the workers must exit on the flag
        assert_eq!(solve("prefix", 64, &stop), None);
    }

    #[tokio::test]
    async fn test_solve_blocking() {
        let stop = Arc::new(AtomicBool::new(false));
        let solution = solve_blocking("async".to_string(), 1, stop).await;
        assert!(solution.is_some());
    }
}
