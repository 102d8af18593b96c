//! Wire types for the interview overlay.
//!
//! Shared by the host process, the overlay surface's content and the
//! short-lived second instance that forwards its activation argument. Keeping
//! them in one crate prevents schema drift between the three.

use serde::{Deserialize, Serialize};

pub mod channel;
pub mod session;

pub use channel::*;
pub use session::*;

pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_REQUEST_BYTES: usize = 64 * 1024;
pub const MAX_FORWARDED_ARGS: usize = 64;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

/// Sent by a second process to the running instance over the instance socket.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ForwardRequest {
    pub protocol_version: u32,
    #[serde(default)]
    pub args: Vec<String>,
}

impl ForwardRequest {
    pub fn new(args: Vec<String>) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            args,
        }
    }

    pub fn validate(&self) -> Result<(), ErrorInfo> {
        if self.protocol_version != PROTOCOL_VERSION {
            return Err(ErrorInfo::new(
                "protocol_mismatch",
                "unsupported protocol version",
            ));
        }
        if self.args.len() > MAX_FORWARDED_ARGS {
            return Err(ErrorInfo::new(
                "too_many_args",
                format!("at most {} arguments may be forwarded", MAX_FORWARDED_ARGS),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ForwardResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

impl ForwardResponse {
    pub fn ok() -> Self {
        Self {
            ok: true,
            error: None,
        }
    }

    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self::error_with_info(ErrorInfo::new(code, message))
    }

    pub fn error_with_info(error: ErrorInfo) -> Self {
        Self {
            ok: false,
            error: Some(error),
        }
    }
}

pub fn parse_forward_request(bytes: &[u8]) -> Result<ForwardRequest, ErrorInfo> {
    let request: ForwardRequest = serde_json::from_slice(bytes).map_err(|err| {
        ErrorInfo::new(
            "invalid_json",
            format!("request was not valid JSON: {}", err),
        )
    })?;
    request.validate()?;
    Ok(request)
}
