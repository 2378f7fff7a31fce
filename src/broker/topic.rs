//! Destination matching
//!
//! Destinations are hierarchical: everything up to and including the first
//! `/` is dropped and the remainder is split on `.`. Patterns may use `*`
//! (exactly one token) and `**` (the rest of the destination, possibly
//! nothing).
//!
//! Matching only reads its inputs and is safe to call from concurrent
//! publishes.

pub const SINGLE_WILDCARD: &str = "*";
pub const MULTI_WILDCARD: &str = "**";

pub fn tokenize(destination: &str) -> Vec<String> {
    let path = match destination.find('/') {
        Some(idx) => &destination[idx + 1..],
        None => destination,
    };
    path.split('.').map(str::to_string).collect()
}

/// Positional comparison of a subscription pattern against a destination.
pub fn matches<P, D>(pattern: &[P], destination: &[D]) -> bool
where
    P: AsRef<str>,
    D: AsRef<str>,
{
    for (idx, token) in pattern.iter().enumerate() {
        let token = token.as_ref();
        if token == MULTI_WILDCARD {
            return true;
        }
        let Some(candidate) = destination.get(idx) else {
            return false;
        };
        if token != SINGLE_WILDCARD && token != candidate.as_ref() {
            return false;
        }
    }
    pattern.len() == destination.len()
}
