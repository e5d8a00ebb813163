//! Bounded polling of asynchronous backend operations. A poll that exhausts
//! its budget surfaces a distinct timeout, never a backend error.

use manager::errors::SvcError;

use std::{future::Future, time::Duration};

/// Poll `poll` every `period` until it yields a value, for at most `attempts`
/// attempts. Backend errors from the poll abort immediately.
pub(crate) async fn poll_until<F, Fut, T>(
    operation: &str,
    period: Duration,
    attempts: u32,
    mut poll: F,
) -> Result<T, SvcError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, SvcError>>,
{
    for _ in 0..attempts {
        if let Some(value) = poll().await? {
            return Ok(value);
        }
        tokio::time::sleep(period).await;
    }
    Err(SvcError::PollTimedOut {
        operation: operation.to_string(),
        attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn yields_value_within_budget() {
        let mut polls = 0;
        let result = poll_until("op", Duration::from_millis(1), 5, || {
            polls += 1;
            let done = polls == 3;
            async move { Ok(done.then_some(42)) }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn times_out_distinctly() {
        let result: Result<u32, _> = poll_until("op", Duration::from_millis(1), 3, || async {
            Ok(None)
        })
        .await;
        assert!(matches!(
            result,
            Err(SvcError::PollTimedOut { attempts: 3, .. })
        ));
    }
}
