//! Session-consistency token tracking.
//!
//! The gateway returns `x-ms-session-token` as a comma-separated list of
//! `{partition-range}:{token}` pairs. Under session consistency every later
//! request must echo the newest token seen for each range, so tokens are merged
//! per container and per range rather than overwritten.

use indexmap::IndexMap;
use parking_lot::RwLock;
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct SessionTokens {
    by_container: RwLock<HashMap<String, IndexMap<String, String>>>,
}

impl SessionTokens {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a response header into the tokens held for `container_link`.
    pub fn record(&self, container_link: &str, header: &str) {
        let parsed: Vec<(String, String)> = header
            .split(',')
            .filter_map(|part| {
                let part = part.trim();
                let (range, token) = part.split_once(':')?;
                (!range.is_empty() && !token.is_empty())
                    .then(|| (range.to_string(), token.to_string()))
            })
            .collect();
        if parsed.is_empty() {
            return;
        }

        let mut guard = self.by_container.write();
        let ranges = guard.entry(container_link.to_string()).or_default();
        for (range, token) in parsed {
            match ranges.get_mut(&range) {
                Some(current) if !is_newer(&token, current) => {}
                Some(current) => *current = token,
                None => {
                    ranges.insert(range, token);
                }
            }
        }
    }

    /// The header value to send for `container_link`, if any token is known.
    pub fn header_for(&self, container_link: &str) -> Option<String> {
        let guard = self.by_container.read();
        let ranges = guard.get(container_link)?;
        if ranges.is_empty() {
            return None;
        }
        Some(
            ranges
                .iter()
                .map(|(range, token)| format!("{range}:{token}"))
                .collect::<Vec<_>>()
                .join(","),
        )
    }

    pub fn clear(&self) {
        self.by_container.write().clear();
    }
}

// Tokens look like `-1#12` or `1#12#3=8`; the number after the first `#` is the
// global LSN. Unparseable tokens replace whatever is held.
fn is_newer(candidate: &str, current: &str) -> bool {
    match (global_lsn(candidate), global_lsn(current)) {
        (Some(candidate), Some(current)) => candidate >= current,
        _ => true,
    }
}

fn global_lsn(token: &str) -> Option<u64> {
    token.split('#').nth(1)?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merges_ranges() {
        let tokens = SessionTokens::new();
        assert_eq!(tokens.header_for("dbs/a/colls/b"), None);

        tokens.record("dbs/a/colls/b", "0:-1#10");
        tokens.record("dbs/a/colls/b", "1:-1#4");
        assert_eq!(
            tokens.header_for("dbs/a/colls/b").as_deref(),
            Some("0:-1#10,1:-1#4")
        );
    }

    #[test]
    fn keeps_newest_lsn() {
        let tokens = SessionTokens::new();
        tokens.record("c", "0:-1#10");
        tokens.record("c", "0:-1#7");
        assert_eq!(tokens.header_for("c").as_deref(), Some("0:-1#10"));
        tokens.record("c", "0:-1#12");
        assert_eq!(tokens.header_for("c").as_deref(), Some("0:-1#12"));
    }

    #[test]
    fn ignores_malformed_and_isolates_containers() {
        let tokens = SessionTokens::new();
        tokens.record("c1", "garbage");
        assert_eq!(tokens.header_for("c1"), None);
        tokens.record("c1", "0:-1#3");
        assert_eq!(tokens.header_for("c2"), None);
        tokens.clear();
        assert_eq!(tokens.header_for("c1"), None);
    }
}
