/// Resolve the agent identity from the environment.
///
/// Checks `CLAIM_STORE_AGENT` first. Returns `None` if unset or empty,
/// letting callers fall back to a generated identity.
pub fn resolve_agent() -> Option<String> {
    std::env::var("CLAIM_STORE_AGENT")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Generated identity written into lease markers: `<host>-<pid>-<token>`.
///
/// The random suffix keeps two agents started with the same pid on
/// different boots (or in containers) distinguishable.
pub fn generated_fallback() -> String {
    let host = hostname::get()
        .ok()
        .map(|h| h.to_string_lossy().into_owned())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "agent".to_string());
    let token = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}-{}", host, std::process::id(), &token[..8])
}

/// Explicit name, then environment, then generated.
pub fn identity(explicit: Option<String>) -> String {
    explicit
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(resolve_agent)
        .unwrap_or_else(generated_fallback)
}
