//! Activation URL parsing.
//!
//! The operating system hands us an opaque string such as
//! `interviewsai://session/temp-1?settings=%7B%22userId%22%3A%22u1%22%7D`.
//! Parsing is pure and independent of the surface lifecycle: a string either
//! yields an [`ActivationRequest`] or nothing at all.

use crate::error::{OverlayError, Result};
use crate::patterns::RE_ACTIVATION_URL;
use overlay_protocol::SessionConfig;

const PROVISIONAL_PREFIX: &str = "temp-";
const SETTINGS_PARAM: &str = "settings";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationRequest {
    /// Never empty.
    pub session_id: String,
    /// Raw (still percent-encoded) value of the `settings` query parameter.
    pub encoded_config: Option<String>,
}

impl ActivationRequest {
    /// Decodes the embedded configuration.
    ///
    /// `Ok(None)` when the URL carried no settings at all.
    pub fn decode_config(&self) -> Result<Option<SessionConfig>> {
        self.encoded_config
            .as_deref()
            .map(decode_session_config)
            .transpose()
    }
}

/// Parses `raw` into an activation for `scheme`. Anything else is ignored.
pub fn parse_activation_url(raw: &str, scheme: &str) -> Option<ActivationRequest> {
    let caps = RE_ACTIVATION_URL.captures(raw.trim())?;

    if !caps[1].eq_ignore_ascii_case(scheme) {
        return None;
    }

    let session_id = caps[2].to_string();
    let encoded_config = caps
        .get(3)
        .and_then(|query| settings_param(query.as_str()))
        .map(str::to_string);

    Some(ActivationRequest {
        session_id,
        encoded_config,
    })
}

fn settings_param(query: &str) -> Option<&str> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == SETTINGS_PARAM)
        .map(|(_, value)| value)
        .filter(|value| !value.is_empty())
}

/// URL-decodes and JSON-parses a `settings` value.
pub fn decode_session_config(encoded: &str) -> Result<SessionConfig> {
    let decoded = urlencoding::decode(encoded)
        .map_err(|err| OverlayError::Parse(format!("settings are not valid UTF-8: {}", err)))?;
    serde_json::from_str(&decoded)
        .map_err(|err| OverlayError::Parse(format!("settings are not a JSON object: {}", err)))
}

/// First argument in `args` that is an activation URL for `scheme`.
///
/// Schemes compare case-insensitively, as in [`parse_activation_url`].
pub fn find_activation_arg<'a, I>(args: I, scheme: &str) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a String>,
{
    args.into_iter()
        .map(|arg| arg.trim())
        .find(|arg| has_scheme(arg, scheme))
}

fn has_scheme(arg: &str, scheme: &str) -> bool {
    arg.split_once("://")
        .is_some_and(|(candidate, _)| candidate.eq_ignore_ascii_case(scheme))
}

/// Client-generated ids look like `temp-*`; the backend never issues those.
pub fn is_provisional_session_id(session_id: &str) -> bool {
    session_id.starts_with(PROVISIONAL_PREFIX)
}
