//! Coarse script-safety filter applied to macro create/update and
//! `execute-js` payloads (spec.md §4.H "Script safety"). The
//! downstream world is assumed to run its own sandbox; this is a
//! cheap first line of defense, not a JavaScript interpreter.

use std::sync::LazyLock;

use regex::RegexSet;
use relay_core::{RelayError, RelayResult};

/// One entry per forbidden category, in the order spec.md lists them.
/// Kept as separate patterns (rather than one alternation) so a
/// rejection can name which category tripped.
const FORBIDDEN: &[(&str, &str)] = &[
    ("persisted-browser-store access", r"(?i)\b(localStorage|sessionStorage|indexedDB)\b"),
    ("cookie access", r"(?i)\bdocument\s*\.\s*cookie\b"),
    ("eval", r"(?i)\beval\s*\("),
    ("worker construction", r"(?i)\bnew\s+(Worker|SharedWorker|ServiceWorker)\s*\("),
    ("prototype-pollution marker", r"__proto__|constructor\s*\.\s*prototype"),
    ("base64 codec call", r"(?i)\b(atob|btoa)\s*\("),
    ("crypto or Intl accessor", r"(?i)\b(window\s*\.\s*)?(crypto|Intl)\b"),
    ("postMessage", r"(?i)\bpostMessage\s*\("),
    ("XHR", r"(?i)\bXMLHttpRequest\b"),
    ("importScripts", r"(?i)\bimportScripts\s*\("),
    ("literal apiKey substring", r"apiKey"),
    ("literal privateKey substring", r"privateKey"),
    ("literal password substring", r"password"),
];

static PATTERNS: LazyLock<RegexSet> =
    LazyLock::new(|| RegexSet::new(FORBIDDEN.iter().map(|(_, pattern)| pattern)).expect("forbidden patterns are valid regex"));

/// Reject `script` with a 400 [`RelayError::ScriptRejected`] if any
/// forbidden pattern appears.
pub fn check(script: &str) -> RelayResult<()> {
    let matches = PATTERNS.matches(script);
    if let Some(index) = matches.iter().next() {
        let (category, _) = FORBIDDEN[index];
        return Err(RelayError::ScriptRejected {
            suggestion: format!("remove or rewrite the code triggering the {category} filter"),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_macro_code() {
        assert!(check("game.actors.get('abc').rollSkill('perception')").is_ok());
    }

    #[test]
    fn rejects_eval() {
        let err = check("eval('1+1')").unwrap_err();
        assert!(matches!(err, RelayError::ScriptRejected { .. }));
    }

    #[test]
    fn rejects_local_storage_access() {
        assert!(check("localStorage.getItem('token')").is_err());
    }

    #[test]
    fn rejects_cookie_access() {
        assert!(check("document.cookie").is_err());
    }

    #[test]
    fn rejects_literal_api_key_substring() {
        assert!(check("const x = data.apiKey;").is_err());
    }

    #[test]
    fn rejects_worker_construction() {
        assert!(check("new Worker('evil.js')").is_err());
    }

    #[test]
    fn rejects_prototype_pollution_marker() {
        assert!(check("obj.__proto__.polluted = true").is_err());
    }

    #[test]
    fn status_code_is_400() {
        let err = check("eval('x')").unwrap_err();
        assert_eq!(err.status_code(), 400);
    }
}
