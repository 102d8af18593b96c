//! Compiled regex patterns for activation URLs and backend durations.

use once_cell::sync::Lazy;
use regex::Regex;

/// `<scheme>://session/<id>[/][?<query>]`
pub static RE_ACTIVATION_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([A-Za-z][A-Za-z0-9+.\-]*)://session/([^/?#\s]+)/?(?:\?([^#]*))?(?:#.*)?$")
        .unwrap()
});

/// `HH:MM:SS` as reported by the sessions endpoint. Hours may exceed 99.
pub static RE_SESSION_DURATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{1,4}):([0-5]\d):([0-5]\d)$").unwrap());
