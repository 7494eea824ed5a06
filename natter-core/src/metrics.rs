// ABOUTME: Counters describing turn coordination activity
// ABOUTME: Thin wrappers over the metrics facade; a no-op until a recorder is installed

use ::metrics::counter;

/// A turn started generating for a channel
pub fn record_turn_started() {
    counter!("natter_turns_started_total").increment(1);
}

/// A turn ended without sending anything
pub fn record_turn_skipped(reason: &'static str) {
    counter!("natter_turns_skipped_total", "reason" => reason).increment(1);
}

/// The generation backend failed
pub fn record_backend_error(backend: &'static str, kind: &'static str) {
    counter!("natter_backend_errors_total", "backend" => backend, "kind" => kind).increment(1);
}

/// A reply was delivered to the chat surface
pub fn record_reply_sent() {
    counter!("natter_replies_sent_total").increment(1);
}

/// The typing probe delayed a turn
pub fn record_typing_backoff() {
    counter!("natter_typing_backoffs_total").increment(1);
}

/// The idle-chatter trigger synthesized a message
pub fn record_idle_chatter() {
    counter!("natter_idle_chatter_total").increment(1);
}

/// Entries merged into memory from a concept summary
pub fn record_concepts_integrated(count: usize) {
    counter!("natter_concepts_integrated_total").increment(count as u64);
}
