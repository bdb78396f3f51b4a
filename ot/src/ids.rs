//! Sortable id generation for version `groupId`s and synthetic changes. A
//! UUIDv7 embeds a millisecond timestamp in its high bits, so lexical and
//! chronological order coincide.

pub fn fresh_sortable_id() -> String {
    uuid::Uuid::now_v7().to_string()
}

pub fn now_millis() -> f64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f64() * 1000.0
}
