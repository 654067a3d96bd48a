use chrono::{DateTime, Utc};
use std::future::Future;
use std::time::Duration;

use crate::error::AppError;

/// Source of the current instant. Injected so expiry logic can be tested
/// without sleeping.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Runs a storage call under `limit`, surfacing expiry as `AppError::StorageTimeout`.
pub async fn within<T, F>(limit: Duration, fut: F) -> Result<T, AppError>
where
    F: Future<Output = Result<T, AppError>>,
{
    tokio::time::timeout(limit, fut).await?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_is_close_to_utc_now() {
        let diff = (SystemClock.now() - Utc::now()).num_seconds().abs();
        assert!(diff < 2, "Difference should be less than 2 seconds");
    }

    #[tokio::test]
    async fn within_passes_through_results() {
        let ok = within(Duration::from_millis(50), async { Ok::<_, AppError>(7) }).await;
        assert_eq!(ok.ok(), Some(7));

        let err = within(Duration::from_millis(50), async {
            Err::<i32, _>(AppError::BadRequest("nope".into()))
        })
        .await;
        assert!(matches!(err, Err(AppError::BadRequest(_))));
    }

    #[tokio::test]
    async fn within_maps_elapsed_to_storage_timeout() {
        let result = within(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<_, AppError>(())
        })
        .await;
        assert!(matches!(result, Err(AppError::StorageTimeout)));
    }
}
