//! JSON-RPC surface of the ledger node.
//!
//! Requests arrive one per line as JSON-RPC 2.0 objects. [`handler::RpcHandler`]
//! dispatches them against a [`Blockchain`](crate::core::blockchain::Blockchain)
//! and maps every failure to a stable error code.

pub mod handler;
pub mod types;

use crate::core::admission::SubmitError;
use crate::core::block::BlockRef;
use crate::core::blockchain::ForgeError;
use crate::core::codec::MalformedTransaction;
use crate::storage::dump::{ACTION_NOT_ALLOWED_CODE, DumpError};
use evm_ledger_derive::Error;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Protocol version carried by every request and response.
pub const JSONRPC_VERSION: &str = "2.0";

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;
pub const TRANSACTION_REJECTED: i64 = -32000;
pub const MALFORMED_TRANSACTION: i64 = -32001;
pub const FORGE_FAILED: i64 = -32002;
pub const UNKNOWN_BLOCK: i64 = -32003;
pub const DUMP_WRITE_FAILED: i64 = -32004;

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("parse error: {0}")]
    Parse(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("method not found: {0}")]
    MethodNotFound(String),

    #[error("invalid params: {0}")]
    InvalidParams(String),

    #[error("{0}")]
    Rejected(#[from] SubmitError),

    #[error("malformed transaction: {0}")]
    Malformed(#[from] MalformedTransaction),

    #[error("forge failed: {0}")]
    Forge(#[from] ForgeError),

    #[error("unknown block {0}")]
    UnknownBlock(BlockRef),

    #[error("{0}")]
    Dump(#[from] DumpError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl RpcError {
    pub fn code(&self) -> i64 {
        match self {
            RpcError::Parse(_) => PARSE_ERROR,
            RpcError::InvalidRequest(_) => INVALID_REQUEST,
            RpcError::MethodNotFound(_) => METHOD_NOT_FOUND,
            RpcError::InvalidParams(_) => INVALID_PARAMS,
            RpcError::Rejected(_) => TRANSACTION_REJECTED,
            RpcError::Malformed(_) => MALFORMED_TRANSACTION,
            RpcError::Forge(_) => FORGE_FAILED,
            RpcError::UnknownBlock(_) => UNKNOWN_BLOCK,
            RpcError::Dump(e) => match e {
                DumpError::ActionNotAllowed => ACTION_NOT_ALLOWED_CODE,
                DumpError::UnknownBlock(_) => UNKNOWN_BLOCK,
                DumpError::SinkWrite(_) => DUMP_WRITE_FAILED,
                DumpError::Enumeration(_) => INTERNAL_ERROR,
            },
            RpcError::Internal(_) => INTERNAL_ERROR,
        }
    }

    pub fn to_object(&self) -> ErrorObject {
        ErrorObject {
            code: self.code(),
            message: self.to_string(),
        }
    }
}

/// Wire form of an error: `{"code": .., "message": ..}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorObject {
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct RpcRequest {
    #[serde(default)]
    pub jsonrpc: Option<String>,
    pub method: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub id: Option<Value>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum RpcResponse {
    Result {
        jsonrpc: &'static str,
        result: Value,
        id: Option<Value>,
    },
    Error {
        jsonrpc: &'static str,
        error: ErrorObject,
        id: Option<Value>,
    },
}

impl RpcResponse {
    pub fn new(id: Option<Value>, outcome: Result<Value, RpcError>) -> Self {
        match outcome {
            Ok(result) => RpcResponse::Result {
                jsonrpc: JSONRPC_VERSION,
                result,
                id,
            },
            Err(e) => RpcResponse::Error {
                jsonrpc: JSONRPC_VERSION,
                error: e.to_object(),
                id,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::validator::RejectionReason;
    use std::io;

    #[test]
    fn dump_errors_keep_distinct_codes() {
        let refused = RpcError::from(DumpError::ActionNotAllowed).to_object();
        assert_eq!(refused.code, 2);
        assert_eq!(refused.message, "Action not allowed");

        let sink = RpcError::from(DumpError::SinkWrite(io::Error::other("read-only")));
        assert_eq!(sink.code(), DUMP_WRITE_FAILED);
        assert_eq!(
            RpcError::from(DumpError::UnknownBlock(BlockRef::Number(3))).code(),
            UNKNOWN_BLOCK
        );
    }

    #[test]
    fn rejection_message_carries_reason() {
        let err = RpcError::from(SubmitError::Rejected(RejectionReason::NotSigned));
        assert_eq!(err.code(), TRANSACTION_REJECTED);
        assert!(err.to_string().contains("not signed"));
    }

    #[test]
    fn error_response_shape() {
        let response = RpcResponse::new(
            Some(Value::from(7)),
            Err(RpcError::MethodNotFound("nope".into())),
        );
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["jsonrpc"], "2.0");
        assert_eq!(json["id"], 7);
        assert_eq!(json["error"]["code"], METHOD_NOT_FOUND);
        assert!(json.get("result").is_none());
    }
}
