//! Default TOML config template with inline documentation comments.

/// Generate the default TOML config content with comments.
pub(crate) fn default_config_toml() -> String {
    r##"# OnAir Configuration
# Schema version 1
# Only override what you want to change -- missing fields use defaults.

[rooms]
# default_max_guests = 3       # 0-16
# max_guests_limit = 8         # 1-16
# max_title_length = 120       # 1-500

[chat]
# min_send_interval_ms = 800   # 100-10000
# newcomer_mute_secs = 30      # 0-3600
# max_message_length = 500     # 1-4000
# extra_banned_words = []

[presence]
# lease_secs = 45              # 10-600, must exceed heartbeat_secs
# heartbeat_secs = 15          # 1-300
# sweep_interval_secs = 20     # 1-600

[negotiation]
# media_timeout_secs = 10      # 1-120
# ice_servers = ["stun:stun.l.google.com:19302", "stun:stun1.l.google.com:19302"]

[retry]
# max_attempts = 3             # 1-10
# base_delay_ms = 100          # 10-5000
# max_delay_ms = 2000          # 10-60000

[logging]
# level = "info"               # trace, debug, info, warning, error
"##
    .to_string()
}
