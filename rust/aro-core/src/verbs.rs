//! Verb canonicalization.
//!
//! Statements may use any synonym of a canonical verb; the registry and the
//! code generator both resolve through this table so that `calculate` and
//! `compute` reach the same action. Lookup is case-insensitive and unknown
//! verbs pass through lowercased, which makes canonicalization idempotent.

/// Map a surface verb to its canonical form.
pub fn canonicalize(verb: &str) -> String {
    let lower = verb.to_ascii_lowercase();
    match lower.as_str() {
        "calculate" => "compute".to_string(),
        "verify" => "validate".to_string(),
        "save" | "persist" => "store".to_string(),
        "initialize" | "init" => "start".to_string(),
        "observe" | "monitor" => "watch".to_string(),
        "get" | "read" | "fetch" => "extract".to_string(),
        "send" | "emit" => "publish".to_string(),
        "answer" | "reply" => "respond".to_string(),
        _ => lower,
    }
}

/// Whether the surface verb is the `emit` form used by event-chain analysis.
/// The analyzer cares about the surface spelling, not the canonical action,
/// because `publish` statements to external names go through a different
/// path than in-process event emission.
pub fn is_emit_verb(verb: &str) -> bool {
    verb.eq_ignore_ascii_case("emit")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synonyms_resolve_to_canonical_verbs() {
        assert_eq!(canonicalize("calculate"), "compute");
        assert_eq!(canonicalize("Verify"), "validate");
        assert_eq!(canonicalize("SAVE"), "store");
        assert_eq!(canonicalize("initialize"), "start");
        assert_eq!(canonicalize("observe"), "watch");
    }

    #[test]
    fn unknown_verbs_pass_through_lowercased() {
        assert_eq!(canonicalize("Transmogrify"), "transmogrify");
    }

    #[test]
    fn canonicalization_is_idempotent() {
        for verb in ["calculate", "verify", "save", "emit", "extract", "weird"] {
            let once = canonicalize(verb);
            assert_eq!(canonicalize(&once), once);
        }
    }
}
