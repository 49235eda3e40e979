//! JSON-RPC command handlers.

pub mod backup;
pub mod contacts;
pub mod devices;
pub mod files;
pub mod identity;
pub mod messages;
pub mod network;
pub mod privacy;
pub mod sessions;

use serde_json::Value;

use crate::rpc::RpcError;

pub type CmdResult = std::result::Result<Value, RpcError>;

/// Required string parameter.
pub(crate) fn str_param<'a>(params: &'a Value, name: &str) -> Result<&'a str, RpcError> {
    params
        .get(name)
        .and_then(|v| v.as_str())
        .ok_or_else(|| RpcError::invalid_params(&format!("{name} required")))
}

/// Required integer parameter; fractional or out-of-range numbers are
/// rejected.
pub(crate) fn u32_param(params: &Value, name: &str) -> Result<u32, RpcError> {
    let value = params
        .get(name)
        .ok_or_else(|| RpcError::invalid_params(&format!("{name} required")))?;
    // `as_i64` is `None` for fractional numbers, which rejects them too.
    let number = value
        .as_i64()
        .ok_or_else(|| RpcError::invalid_params(&format!("{name} must be an integer")))?;
    u32::try_from(number)
        .map_err(|_| RpcError::invalid_params(&format!("{name} out of range")))
}
