use std::sync::atomic::Ordering;

use axum::extract::State;

use crate::AppState;

/// Prometheus text exposition. The gauge is 0 until the first successful
/// non-dry run.
pub async fn metrics(State(state): State<AppState>) -> String {
    let last_success = state.last_success.load(Ordering::Relaxed);
    format!(
        "# HELP dipex_last_success_timestamp_seconds Unix time of the last successful sync run.\n\
         # TYPE dipex_last_success_timestamp_seconds gauge\n\
         dipex_last_success_timestamp_seconds {last_success}\n"
    )
}
