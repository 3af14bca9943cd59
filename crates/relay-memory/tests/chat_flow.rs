use std::time::Duration;

use relay_memory::{RateLimiter, Role, SessionStore, assemble_context};

// Exercises the same sequence a bot message handler runs: admission check,
// history append, context assembly, then periodic sweeps.
#[test]
fn gated_append_and_assemble_flow() {
    let store = SessionStore::new(10);
    let limiter = RateLimiter::new(5, 60);
    let t0 = 1_000_000;

    for i in 0..5 {
        let decision = limiter.check_and_record_at("user-1", t0 + i * 1_000);
        assert!(decision.allowed);
        store.append_at("chan-1", Role::User, &format!("question {i}"), t0 + i * 1_000);
        store.append_at(
            "chan-1",
            Role::Assistant,
            &format!("answer {i}"),
            t0 + i * 1_000 + 500,
        );
    }

    // Sixth attempt inside the window is rejected and nothing is recorded.
    let rejected = limiter.check_and_record_at("user-1", t0 + 5_000);
    assert!(!rejected.allowed);
    assert!(rejected.retry_after_seconds > 0);
    assert_eq!(store.history("chan-1", None).len(), 10);

    let context = assemble_context(&store.history("chan-1", None), 4096);
    assert_eq!(context.len(), 10);
    assert_eq!(context[0].content, "question 0");
    assert_eq!(context[9].content, "answer 4");
}

#[test]
fn cap_and_budget_interact_recency_first() {
    let store = SessionStore::new(4);
    for i in 0..8 {
        // 80-char turns are 20 estimated tokens each.
        store.append_at("chan-1", Role::User, &format!("{i}").repeat(80), i);
    }

    // Store cap already dropped turns 0..4.
    let history = store.history("chan-1", None);
    assert_eq!(history.len(), 4);
    assert!(history[0].content.starts_with('4'));

    // Budget of 50 tokens then keeps only the newest two of those.
    let context = assemble_context(&history, 50);
    assert_eq!(context.len(), 2);
    assert!(context[0].content.starts_with('6'));
    assert!(context[1].content.starts_with('7'));
}

#[test]
fn maintenance_sweeps_both_stores() {
    let store = SessionStore::new(10);
    let limiter = RateLimiter::new(5, 60);
    let day_ms = 86_400_000;
    let now_ms = 10 * day_ms;

    store.append_at("stale", Role::User, "old question", now_ms - 2 * day_ms);
    store.append_at("fresh", Role::User, "new question", now_ms - 1_000);
    limiter.check_and_record_at("gone", now_ms - 2 * day_ms);
    limiter.check_and_record_at("here", now_ms - 1_000);

    assert_eq!(store.sweep_at(Duration::from_secs(86_400), now_ms), 1);
    assert_eq!(limiter.sweep_at(now_ms), 1);

    let stats = store.stats_at(now_ms);
    assert_eq!(stats.conversations, 1);
    assert_eq!(limiter.stats_at("here", now_ms).used, 1);
}
