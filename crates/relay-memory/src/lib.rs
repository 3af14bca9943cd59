pub mod context;
pub mod limiter;
pub mod session;

pub use context::{ChatMessage, assemble_context, estimate_tokens};
pub use limiter::{Decision, RateLimiter, Usage};
pub use session::{Role, SessionStore, StoreStats, TranscriptError, Turn};

use std::time::{SystemTime, UNIX_EPOCH};

pub(crate) fn now_epoch_ms() -> i64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    now.as_millis() as i64
}
