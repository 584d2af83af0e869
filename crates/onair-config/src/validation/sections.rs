//! Per-section validators.

use crate::schema::OnAirConfig;

use super::helpers::validate_range;

pub(crate) fn validate_rooms(errors: &mut Vec<String>, config: &OnAirConfig) {
    let rooms = &config.rooms;
    validate_range(errors, "rooms.max_guests_limit", rooms.max_guests_limit.into(), 1, 16);
    validate_range(
        errors,
        "rooms.default_max_guests",
        rooms.default_max_guests.into(),
        0,
        16,
    );
    if rooms.default_max_guests > rooms.max_guests_limit {
        errors.push(format!(
            "rooms.default_max_guests = {} exceeds rooms.max_guests_limit = {}",
            rooms.default_max_guests, rooms.max_guests_limit
        ));
    }
    validate_range(errors, "rooms.max_title_length", rooms.max_title_length.into(), 1, 500);
}

pub(crate) fn validate_chat(errors: &mut Vec<String>, config: &OnAirConfig) {
    let chat = &config.chat;
    validate_range(
        errors,
        "chat.min_send_interval_ms",
        chat.min_send_interval_ms,
        100,
        10_000,
    );
    validate_range(errors, "chat.newcomer_mute_secs", chat.newcomer_mute_secs, 0, 3600);
    validate_range(
        errors,
        "chat.max_message_length",
        chat.max_message_length.into(),
        1,
        4000,
    );
    for word in &chat.extra_banned_words {
        if word.is_empty() || !word.chars().all(|c| c.is_alphanumeric() || c == '_') {
            errors.push(format!(
                "chat.extra_banned_words entry {word:?} must be a single non-empty word"
            ));
        }
    }
}

pub(crate) fn validate_presence(errors: &mut Vec<String>, config: &OnAirConfig) {
    let presence = &config.presence;
    validate_range(errors, "presence.lease_secs", presence.lease_secs, 10, 600);
    validate_range(errors, "presence.heartbeat_secs", presence.heartbeat_secs, 1, 300);
    validate_range(
        errors,
        "presence.sweep_interval_secs",
        presence.sweep_interval_secs,
        1,
        600,
    );
    if presence.heartbeat_secs >= presence.lease_secs {
        errors.push(format!(
            "presence.heartbeat_secs = {} must be shorter than presence.lease_secs = {}",
            presence.heartbeat_secs, presence.lease_secs
        ));
    }
}

pub(crate) fn validate_negotiation(errors: &mut Vec<String>, config: &OnAirConfig) {
    validate_range(
        errors,
        "negotiation.media_timeout_secs",
        config.negotiation.media_timeout_secs,
        1,
        120,
    );
    for url in &config.negotiation.ice_servers {
        if !(url.starts_with("stun:") || url.starts_with("turn:") || url.starts_with("turns:")) {
            errors.push(format!("negotiation.ice_servers entry {url:?} is not a stun/turn url"));
        }
    }
}

pub(crate) fn validate_retry(errors: &mut Vec<String>, config: &OnAirConfig) {
    let retry = &config.retry;
    validate_range(errors, "retry.max_attempts", retry.max_attempts.into(), 1, 10);
    validate_range(errors, "retry.base_delay_ms", retry.base_delay_ms, 10, 5000);
    validate_range(errors, "retry.max_delay_ms", retry.max_delay_ms, 10, 60_000);
    if retry.base_delay_ms > retry.max_delay_ms {
        errors.push(format!(
            "retry.base_delay_ms = {} exceeds retry.max_delay_ms = {}",
            retry.base_delay_ms, retry.max_delay_ms
        ));
    }
}
