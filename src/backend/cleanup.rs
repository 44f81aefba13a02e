/// Role headers a chat model sometimes echoes at the start of its reply.
const ROLE_PREFIXES: [&str; 8] = [
    "AI:",
    "AI :",
    "Assistant:",
    "Assistant :",
    "A:",
    "A :",
    "User:",
    "User :",
];

/// Drop leading whitespace and at most one echoed role header.
pub fn strip_role_prefix(text: &str) -> &str {
    let text = text.trim_start();
    ROLE_PREFIXES
        .iter()
        .find_map(|prefix| text.strip_prefix(prefix))
        .map(str::trim_start)
        .unwrap_or(text)
}

/// Cleanup applied to a complete single-shot reply.
pub fn clean_response(text: &str) -> String {
    strip_role_prefix(text).trim_end().to_string()
}
