use std::fmt::Display;
use std::future::Future;
use std::time::Instant;
use tracing::info;

/// Wrapper function to measure duration of an async operation
///
/// Logs one line per call: `name | detail, took=<ms>` on success and
/// `name | failed: <error>, took=<ms>` otherwise.
pub async fn measure_dur_async<F, Fut, T, E>(
    metric_name: &str,
    operation: F,
    trace_log_fn: Option<fn(&T) -> String>,
) -> Result<T, E>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let start = Instant::now();
    let result = operation().await;
    let dur = start.elapsed();
    match &result {
        Ok(r) => {
            let log_line = trace_log_fn.map(|f| f(r)).unwrap_or_default();
            info!("{} | {}, took={}", metric_name, log_line, dur.as_millis());
        }
        Err(e) => info!("{} | failed: {}, took={}", metric_name, e, dur.as_millis()),
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_measure_dur_async_passes_result_through() {
        let ok: Result<u32, String> =
            measure_dur_async("ok", || async { Ok(3) }, Some(|v: &u32| format!("v={}", v))).await;
        assert_eq!(ok, Ok(3));

        let err: Result<u32, String> =
            measure_dur_async("err", || async { Err("boom".to_string()) }, None).await;
        assert_eq!(err, Err("boom".to_string()));
    }
}
