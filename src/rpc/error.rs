//! JSON-RPC error codes (spec §4.I, §6), mirroring the teacher's
//! `jsonrpc::Code`/`JsonRpcError` pair but standing on its own rather than
//! an SPDK error-code cast.

use std::fmt;

/// Standard JSON-RPC 2.0 error codes plus the values this server actually
/// returns (method-not-found is handled by the dispatch table, not here).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Code {
    ParseError,
    InvalidRequest,
    MethodNotFound,
    InvalidParams,
    InternalError,
}

impl From<Code> for i32 {
    fn from(code: Code) -> i32 {
        match code {
            Code::ParseError => -32700,
            Code::InvalidRequest => -32600,
            Code::MethodNotFound => -32601,
            Code::InvalidParams => -32602,
            Code::InternalError => -32603,
        }
    }
}

/// Error object returned from a method handler and serialized into the
/// response's `error` member.
#[derive(Debug, Clone)]
pub struct RpcError {
    pub code: Code,
    pub message: String,
}

impl RpcError {
    pub fn new(code: Code, message: impl ToString) -> Self {
        Self {
            code,
            message: message.to_string(),
        }
    }

    pub fn json_code(&self) -> i32 {
        self.code.into()
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for RpcError {}
