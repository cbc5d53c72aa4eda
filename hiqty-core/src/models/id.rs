use nanoid::nanoid;

/// Generate a 12-character nanoid, used for lease tokens and session ids
#[must_use]
pub fn generate_id() -> String {
    nanoid!(12)
}

/// Lease ownership token: `{node_id}:{nanoid}`, unique per acquisition
#[must_use]
pub fn lease_token(node_id: &str) -> String {
    format!("{node_id}:{}", generate_id())
}
