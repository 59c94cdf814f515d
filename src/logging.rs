//! Tracing subscriber setup and log hygiene helpers

use tracing_subscriber::EnvFilter;

const VALID_LEVELS: &[&str] = &["debug", "info", "warning", "warn", "error", "critical"];
const NOISY_TARGETS: &[&str] = &["hyper", "reqwest", "sqlx", "h2", "rustls"];
const MAX_LOG_VALUE_CHARS: usize = 100;

/// Map a configured level name onto a tracing directive; unknown → info.
pub fn normalize_level(raw: &str) -> &'static str {
    let lowered = raw.trim().to_lowercase();
    if !VALID_LEVELS.contains(&lowered.as_str()) {
        return "info";
    }
    match lowered.as_str() {
        "debug" => "debug",
        "warning" | "warn" => "warn",
        "error" | "critical" => "error",
        _ => "info",
    }
}

/// Build the filter: `RUST_LOG` wins, otherwise the configured level with
/// chatty dependencies capped at warn.
pub fn build_filter(level: &str) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }

    EnvFilter::new(directives(level))
}

fn directives(level: &str) -> String {
    let mut directives = normalize_level(level).to_string();
    for target in NOISY_TARGETS {
        directives.push_str(&format!(",{}=warn", target));
    }
    directives
}

/// Install the global subscriber. Returns the effective level name.
pub fn init(level: &str) -> &'static str {
    let effective = normalize_level(level);
    let _ = tracing_subscriber::fmt()
        .with_env_filter(build_filter(level))
        .with_target(true)
        .try_init();
    effective
}

/// Escape control characters as `\xNN` and cap the value at 100 chars.
pub fn sanitize_for_log(value: &str) -> String {
    let mut out = String::with_capacity(value.len().min(MAX_LOG_VALUE_CHARS + 3));
    let mut count = 0;

    for ch in value.chars() {
        if count == MAX_LOG_VALUE_CHARS {
            out.push_str("...");
            return out;
        }
        let code = ch as u32;
        if code <= 0x1f || (0x7f..=0x9f).contains(&code) {
            out.push_str(&format!("\\x{:02x}", code));
        } else {
            out.push(ch);
        }
        count += 1;
    }

    out
}
