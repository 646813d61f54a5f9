use std::collections::HashSet;

/// Checks whether `sender` is in the allowed set.
/// Senders without a username are never allowed.
pub fn is_allowed(allowed: &HashSet<String>, sender: Option<&str>) -> bool {
    match sender {
        Some(name) => allowed.contains(name),
        None => false,
    }
}
