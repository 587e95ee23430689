use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

const SESSION_ID_MIN_LEN: usize = 5;
const SESSION_ID_MAX_LEN: usize = 63;
const SHORT_ID_SUFFIX: &str = "-sess";
const INVALID_LEAD_MARKER: char = 's';

static RESET_SEQ: AtomicU64 = AtomicU64::new(0);

/// Coerce arbitrary key material into a backend-legal session identifier:
/// `[A-Za-z0-9_-]`, alphanumeric first character, length in [5, 63].
///
/// Deterministic for identical input; not injective.
pub fn sanitize_session_id(raw: &str) -> String {
    let mut candidate = raw.to_string();
    if candidate.chars().count() < SESSION_ID_MIN_LEN {
        candidate.push_str(SHORT_ID_SUFFIX);
    }
    let leads_alphanumeric = candidate
        .chars()
        .next()
        .is_some_and(|ch| ch.is_ascii_alphanumeric());
    if !leads_alphanumeric {
        candidate.insert(0, INVALID_LEAD_MARKER);
    }
    candidate
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '-'
            }
        })
        .take(SESSION_ID_MAX_LEN)
        .collect()
}

/// Process-lifetime mapping from chat-context keys to session identifiers.
///
/// Entries are created lazily, replaced on `reset`, and never expire. Only
/// the map itself is synchronized; concurrent calls for the same key may
/// race on the same session id, which is accepted.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    entries: Mutex<HashMap<String, String>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the existing session id for `context_key`, creating one on
    /// first use. Idempotent for the same key until `reset`.
    pub fn resolve(&self, context_key: &str) -> String {
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        entries
            .entry(context_key.to_string())
            .or_insert_with(|| sanitize_session_id(context_key))
            .clone()
    }

    /// Unconditionally replace the mapping with a fresh identifier. The new
    /// id embeds unix millis plus a process-monotonic counter; the sanitized
    /// base is truncated so the uniqueness suffix always survives the
    /// 63-char cap.
    pub fn reset(&self, context_key: &str) -> String {
        let seq = RESET_SEQ.fetch_add(1, Ordering::Relaxed);
        let suffix = format!("-{}-{seq}", unix_millis());
        let base = sanitize_session_id(context_key);
        let keep = SESSION_ID_MAX_LEN.saturating_sub(suffix.len());
        let mut session_id: String = base.chars().take(keep).collect();
        session_id.push_str(&suffix);

        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        entries.insert(context_key.to_string(), session_id.clone());
        session_id
    }
}

fn unix_millis() -> u128 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_legal_session_id(id: &str) {
        let len = id.chars().count();
        assert!(
            (SESSION_ID_MIN_LEN..=SESSION_ID_MAX_LEN).contains(&len),
            "session id '{id}' length {len} out of range"
        );
        assert!(
            id.chars().next().is_some_and(|ch| ch.is_ascii_alphanumeric()),
            "session id '{id}' must start with an alphanumeric character"
        );
        assert!(
            id.chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_'),
            "session id '{id}' contains illegal characters"
        );
    }

    #[test]
    fn sanitize_produces_legal_ids_for_awkward_inputs() {
        for raw in [
            "",
            "a",
            "-leading-dash",
            "telegram:10001",
            "slack-C01/1699999999.000100",
            "☃ snowman thread ☃",
            &"x".repeat(200),
        ] {
            assert_legal_session_id(&sanitize_session_id(raw));
        }
    }

    #[test]
    fn sanitize_is_deterministic() {
        assert_eq!(
            sanitize_session_id("telegram:10001"),
            sanitize_session_id("telegram:10001")
        );
    }

    #[test]
    fn sanitize_replaces_illegal_characters_with_dashes() {
        assert_eq!(sanitize_session_id("slack:C01.x"), "slack-C01-x");
    }

    #[test]
    fn sanitize_pads_short_input_before_prefixing() {
        // "" -> "-sess" -> "s-sess"
        assert_eq!(sanitize_session_id(""), "s-sess");
        assert_eq!(sanitize_session_id("ab"), "ab-sess");
    }

    #[test]
    fn sanitize_truncates_to_sixty_three_characters() {
        let id = sanitize_session_id(&"y".repeat(500));
        assert_eq!(id.chars().count(), SESSION_ID_MAX_LEN);
    }

    #[test]
    fn resolve_is_idempotent_until_reset() {
        let registry = SessionRegistry::new();
        let first = registry.resolve("tg-main:10001");
        let second = registry.resolve("tg-main:10001");
        assert_eq!(first, second);
    }

    #[test]
    fn reset_replaces_the_mapping_with_a_fresh_id() {
        let registry = SessionRegistry::new();
        let original = registry.resolve("tg-main:10001");
        let reset = registry.reset("tg-main:10001");
        assert_ne!(reset, original);
        assert_eq!(registry.resolve("tg-main:10001"), reset);
        assert_legal_session_id(&reset);
    }

    #[test]
    fn rapid_resets_always_differ() {
        let registry = SessionRegistry::new();
        let mut previous = registry.reset("ctx");
        for _ in 0..10 {
            let next = registry.reset("ctx");
            assert_ne!(next, previous, "consecutive resets must differ");
            previous = next;
        }
    }

    #[test]
    fn reset_ids_for_long_keys_keep_the_uniqueness_suffix() {
        let registry = SessionRegistry::new();
        let key = "k".repeat(120);
        let first = registry.reset(&key);
        let second = registry.reset(&key);
        assert_legal_session_id(&first);
        assert_legal_session_id(&second);
        assert_ne!(first, second);
    }
}
