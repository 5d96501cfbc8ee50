//! Non-binding random resolution among the current options.
//!
//! The draw is revealed after a fixed delay. Only one draw may be in flight;
//! a second request during the delay is ignored. A reset during the delay
//! cancels the draw so it never reveals a winner from a stale board.

use crate::error::ValidationError;
use crate::types::BoardEntry;
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::watch;

pub const DEFAULT_PICK_DELAY: Duration = Duration::from_millis(1500);

/// What the UI should show for the random pick
#[derive(Debug, Clone, PartialEq)]
pub enum PickStatus {
    Idle,
    Picking,
    /// The winner; its vote key is the highlight target
    Picked(BoardEntry),
}

#[derive(Debug, Clone, PartialEq)]
pub enum PickOutcome {
    Winner(BoardEntry),
    /// Another draw is still in flight; nothing happened
    AlreadyPicking,
    /// The options were replaced during the delay; nothing was revealed
    Cancelled,
}

/// Uniform index in `[0, len)`; `len` must be non-zero
pub fn choose_index<R: Rng + ?Sized>(rng: &mut R, len: usize) -> usize {
    rng.random_range(0..len)
}

/// Releases the single-flight flag even if the draw is cancelled
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct RandomSelector {
    delay: Duration,
    in_flight: AtomicBool,
    status: watch::Sender<PickStatus>,
    /// Bumped by every reset
    epoch: watch::Sender<u64>,
}

impl RandomSelector {
    pub fn new(delay: Duration) -> Self {
        let (status, _rx) = watch::channel(PickStatus::Idle);
        let (epoch, _rx) = watch::channel(0);
        Self {
            delay,
            in_flight: AtomicBool::new(false),
            status,
            epoch,
        }
    }

    pub async fn pick(&self, candidates: &[BoardEntry]) -> Result<PickOutcome, ValidationError> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("Random pick already in progress, ignoring");
            return Ok(PickOutcome::AlreadyPicking);
        }
        let _guard = InFlight(&self.in_flight);

        if candidates.is_empty() {
            return Err(ValidationError::EmptyCandidateSet);
        }

        let mut epoch = self.epoch.subscribe();
        self.status.send_replace(PickStatus::Picking);
        tokio::select! {
            _ = tokio::time::sleep(self.delay) => {}
            _ = epoch.changed() => {
                tracing::debug!("Random pick cancelled, options changed");
                return Ok(PickOutcome::Cancelled);
            }
        }
        if epoch.has_changed().unwrap_or(true) {
            return Ok(PickOutcome::Cancelled);
        }

        let index = choose_index(&mut rand::rng(), candidates.len());
        let winner = candidates[index].clone();
        tracing::info!(
            "Random pick: {} ({})",
            winner.candidate.display_name(),
            winner.vote_key
        );

        self.status.send_replace(PickStatus::Picked(winner.clone()));
        Ok(PickOutcome::Winner(winner))
    }

    /// Forget the winner and cancel a draw in flight (the options changed)
    pub fn reset(&self) {
        self.epoch.send_modify(|epoch| *epoch = epoch.wrapping_add(1));
        self.status.send_if_modified(|status| {
            if *status != PickStatus::Idle {
                *status = PickStatus::Idle;
                true
            } else {
                false
            }
        });
    }

    pub fn is_picking(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn status(&self) -> PickStatus {
        self.status.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<PickStatus> {
        self.status.subscribe()
    }
}

impl Default for RandomSelector {
    fn default() -> Self {
        Self::new(DEFAULT_PICK_DELAY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{RestaurantCandidate, VoteKey};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::sync::Arc;

    fn entries(n: usize) -> Vec<BoardEntry> {
        (0..n)
            .map(|i| BoardEntry {
                vote_key: VoteKey::new(format!("place_{}", i)),
                candidate: RestaurantCandidate::named(format!("Place {}", i)),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_empty_set_never_selects() {
        let selector = RandomSelector::new(Duration::ZERO);
        assert_eq!(
            selector.pick(&[]).await,
            Err(ValidationError::EmptyCandidateSet)
        );
        assert_eq!(selector.status(), PickStatus::Idle);
        assert!(!selector.is_picking());
    }

    #[tokio::test]
    async fn test_pick_returns_a_member_of_the_list() {
        let selector = RandomSelector::new(Duration::ZERO);
        let options = entries(3);

        for _ in 0..20 {
            match selector.pick(&options).await.unwrap() {
                PickOutcome::Winner(winner) => assert!(options.contains(&winner)),
                other => panic!("unexpected outcome {:?}", other),
            }
        }
        assert!(matches!(selector.status(), PickStatus::Picked(_)));
    }

    #[test]
    fn test_index_distribution_is_uniform() {
        let mut rng = StdRng::seed_from_u64(42);
        let len = 4;
        let trials = 40_000;
        let mut counts = vec![0usize; len];
        for _ in 0..trials {
            counts[choose_index(&mut rng, len)] += 1;
        }

        let expected = trials / len;
        for count in counts {
            let deviation = (count as f64 - expected as f64).abs() / expected as f64;
            assert!(deviation < 0.05, "count {} too far from {}", count, expected);
        }
    }

    #[tokio::test]
    async fn test_second_pick_during_delay_is_ignored() {
        let selector = Arc::new(RandomSelector::new(Duration::from_millis(200)));
        let options = entries(2);

        let first = {
            let selector = selector.clone();
            let options = options.clone();
            tokio::spawn(async move { selector.pick(&options).await })
        };
        let mut status = selector.watch_status();
        status
            .wait_for(|s| *s == PickStatus::Picking)
            .await
            .unwrap();

        assert_eq!(
            selector.pick(&options).await,
            Ok(PickOutcome::AlreadyPicking)
        );
        // Re-entry while busy is ignored, even with nothing to pick from
        assert_eq!(selector.pick(&[]).await, Ok(PickOutcome::AlreadyPicking));

        assert!(matches!(
            first.await.unwrap(),
            Ok(PickOutcome::Winner(_))
        ));
        assert!(!selector.is_picking());
    }

    #[tokio::test]
    async fn test_reset_cancels_draw_in_flight() {
        let selector = Arc::new(RandomSelector::new(Duration::from_secs(5)));
        let options = entries(2);

        let draw = {
            let selector = selector.clone();
            tokio::spawn(async move { selector.pick(&options).await })
        };
        let mut status = selector.watch_status();
        status
            .wait_for(|s| *s == PickStatus::Picking)
            .await
            .unwrap();

        selector.reset();
        let outcome = tokio::time::timeout(Duration::from_secs(1), draw)
            .await
            .expect("reset should end the delay early")
            .unwrap();

        assert_eq!(outcome, Ok(PickOutcome::Cancelled));
        assert_eq!(selector.status(), PickStatus::Idle);
        // The guard is released, so the next draw is not ignored
        assert!(!selector.is_picking());
    }

    #[tokio::test]
    async fn test_reset_clears_winner() {
        let selector = RandomSelector::new(Duration::ZERO);
        selector.pick(&entries(1)).await.unwrap();
        selector.reset();
        assert_eq!(selector.status(), PickStatus::Idle);
    }
}
