//! Settle detection: poll until two consecutive samples agree.

use core::future::Future;
use core::time::Duration;
use tokio::time::{Instant, sleep, timeout_at};

/// Outcome of waiting for a page to stop changing.
#[derive(Debug, Clone, PartialEq)]
pub enum Settled<T> {
    /// Two consecutive samples agreed; this is the later one.
    Stable(T),
    /// The bound elapsed first. `last` is the most recent complete sample.
    TimedOut { last: Option<T>, waited: Duration },
}

/// Samples repeatedly, `interval` apart, until two consecutive samples are
/// equal or `bound` has elapsed. A sample still in flight when the bound
/// elapses is abandoned.
///
/// # Errors
///
/// Returns the first error produced by `sample`.
pub async fn wait_for_settle<T, E, F, Fut>(
    mut sample: F,
    interval: Duration,
    bound: Duration,
) -> Result<Settled<T>, E>
where
    T: PartialEq,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let started = Instant::now();
    let deadline = started + bound;
    let mut last: Option<T> = None;
    loop {
        let Ok(outcome) = timeout_at(deadline, sample()).await else {
            return Ok(Settled::TimedOut {
                last,
                waited: started.elapsed(),
            });
        };
        let current = outcome?;
        if last.as_ref() == Some(&current) {
            return Ok(Settled::Stable(current));
        }
        last = Some(current);
        if Instant::now() + interval > deadline {
            return Ok(Settled::TimedOut {
                last,
                waited: started.elapsed(),
            });
        }
        sleep(interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    const INTERVAL: Duration = Duration::from_millis(50);
    const BOUND: Duration = Duration::from_millis(1000);

    #[tokio::test(start_paused = true)]
    async fn static_page_settles_after_two_samples() {
        let calls = Cell::new(0_u32);
        let started = Instant::now();
        let settled = wait_for_settle(
            || {
                calls.set(calls.get() + 1);
                async { Ok::<_, ()>(42) }
            },
            INTERVAL,
            BOUND,
        )
        .await;
        assert_eq!(settled, Ok(Settled::Stable(42)));
        assert_eq!(calls.get(), 2);
        assert_eq!(started.elapsed(), INTERVAL);
    }

    #[tokio::test(start_paused = true)]
    async fn waits_out_a_transition() {
        let calls = Cell::new(0_u32);
        let settled = wait_for_settle(
            || {
                calls.set(calls.get() + 1);
                let value = calls.get().min(4);
                async move { Ok::<_, ()>(value) }
            },
            INTERVAL,
            BOUND,
        )
        .await;
        assert_eq!(settled, Ok(Settled::Stable(4)));
        assert_eq!(calls.get(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn never_settling_page_times_out() {
        let calls = Cell::new(0_u32);
        let settled = wait_for_settle(
            || {
                calls.set(calls.get() + 1);
                let value = calls.get();
                async move { Ok::<_, ()>(value) }
            },
            INTERVAL,
            BOUND,
        )
        .await;
        let Ok(Settled::TimedOut { last, waited }) = settled else {
            panic!("expected a timeout, got {settled:?}");
        };
        assert_eq!(last, Some(calls.get()));
        assert!(waited <= BOUND);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_sample_is_bounded() {
        let settled = wait_for_settle(
            || async {
                sleep(Duration::from_secs(30)).await;
                Ok::<_, ()>(1)
            },
            INTERVAL,
            BOUND,
        )
        .await;
        assert_eq!(
            settled,
            Ok(Settled::TimedOut {
                last: None,
                waited: BOUND
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn sample_errors_propagate() {
        let settled =
            wait_for_settle(|| async { Err::<u32, _>("page gone") }, INTERVAL, BOUND).await;
        assert_eq!(settled, Err("page gone"));
    }
}
