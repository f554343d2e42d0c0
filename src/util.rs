const INTERNAL_SECRET: &str = "UPWATCH_INTERNAL_SECRET";

const QUEUE_TOKEN_PREFIX: &str = "UPWATCH_QUEUE_TOKEN_";

/// Bearer token that probes must present when submitting results
pub fn get_internal_secret() -> Option<String> {
    std::env::var(INTERNAL_SECRET)
        .ok()
        .filter(|secret| !secret.is_empty())
}

/// Environment variable holding the queue token for `region`
///
/// `us-east-1` becomes `UPWATCH_QUEUE_TOKEN_US_EAST_1`.
pub fn queue_token_var(region: &str) -> String {
    let suffix: String = region
        .chars()
        .map(|c| match c {
            '-' | '.' | ' ' => '_',
            c => c.to_ascii_uppercase(),
        })
        .collect();
    format!("{QUEUE_TOKEN_PREFIX}{suffix}")
}

/// Queue token for `region`, preferring the environment over `fallback`
pub fn get_queue_token(region: &str, fallback: Option<&str>) -> Option<String> {
    std::env::var(queue_token_var(region))
        .ok()
        .or_else(|| fallback.map(str::to_string))
}
