//! Method dispatch for the JSON-RPC surface.

use crate::core::block::BlockRef;
use crate::core::blockchain::Blockchain;
use crate::core::transaction::Transaction;
use crate::core::validator::{TransactionValidator, Validator};
use crate::crypto::keyring::Keyring;
use crate::rpc::types::{
    BlockObject, ReceiptObject, TransactionObject, TransactionRequest, parse_address,
    parse_block_ref, parse_bytes, parse_hash, quantity, u256_quantity,
};
use crate::rpc::{JSONRPC_VERSION, RpcError, RpcRequest, RpcResponse};
use crate::storage::state::{AccountStateView, StateSnapshot};
use crate::types::address::Address;
use crate::types::bytes::Bytes;
use crate::{debug, error};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::path::PathBuf;
use std::sync::Arc;

/// Serves JSON-RPC requests against one chain.
pub struct RpcHandler<V: Validator = TransactionValidator> {
    chain: Arc<Blockchain<V>>,
    keyring: Keyring,
}

fn to_json<T: Serialize>(value: T) -> Result<Value, RpcError> {
    serde_json::to_value(value).map_err(|e| RpcError::Internal(e.to_string()))
}

/// Positional parameter `index`, or field `name` when params are an object.
fn param<'a>(params: &'a Value, index: usize, name: &str) -> Option<&'a Value> {
    let value = match params {
        Value::Array(items) => items.get(index),
        Value::Object(map) => map.get(name),
        _ => None,
    };
    value.filter(|v| !v.is_null())
}

fn required<'a>(params: &'a Value, index: usize, name: &str) -> Result<&'a Value, RpcError> {
    param(params, index, name).ok_or_else(|| RpcError::InvalidParams(format!("missing {name}")))
}

fn required_str<'a>(params: &'a Value, index: usize, name: &str) -> Result<&'a str, RpcError> {
    required(params, index, name)?
        .as_str()
        .ok_or_else(|| RpcError::InvalidParams(format!("{name} must be a string")))
}

/// Single object parameter, given bare or wrapped in a one-element array.
fn object_param<T: DeserializeOwned>(params: &Value) -> Result<T, RpcError> {
    let object = match params {
        Value::Array(items) => items.first().cloned().unwrap_or(Value::Null),
        other => other.clone(),
    };
    serde_json::from_value(object).map_err(|e| RpcError::InvalidParams(e.to_string()))
}

fn decode_payload(raw: &str) -> Result<Transaction, RpcError> {
    let bytes = parse_bytes("payload", raw)?;
    Ok(Transaction::from_bytes(&bytes)?)
}

impl<V: Validator> RpcHandler<V> {
    pub fn new(chain: Arc<Blockchain<V>>, keyring: Keyring) -> Self {
        Self { chain, keyring }
    }

    pub fn chain(&self) -> &Blockchain<V> {
        &self.chain
    }

    /// Handles one raw request line and returns the serialized response.
    pub fn handle_line(&self, line: &str) -> String {
        let response = match serde_json::from_str::<Value>(line) {
            Err(e) => RpcResponse::new(None, Err(RpcError::Parse(e.to_string()))),
            Ok(raw) => {
                let id = raw.get("id").cloned();
                match serde_json::from_value::<RpcRequest>(raw) {
                    Err(e) => RpcResponse::new(id, Err(RpcError::InvalidRequest(e.to_string()))),
                    Ok(request) => {
                        let outcome = self.handle(&request);
                        RpcResponse::new(request.id, outcome)
                    }
                }
            }
        };

        serde_json::to_string(&response).unwrap_or_else(|e| {
            json!({
                "jsonrpc": JSONRPC_VERSION,
                "error": { "code": crate::rpc::INTERNAL_ERROR, "message": e.to_string() },
                "id": Value::Null
            })
            .to_string()
        })
    }

    /// Dispatches a parsed request.
    pub fn handle(&self, request: &RpcRequest) -> Result<Value, RpcError> {
        debug!("rpc request: method={}", request.method);
        if request.jsonrpc.as_deref() != Some(JSONRPC_VERSION) {
            return Err(RpcError::InvalidRequest(format!(
                "unsupported jsonrpc version: expected \"{JSONRPC_VERSION}\""
            )));
        }
        let outcome = self.dispatch(&request.method, &request.params);
        if let Err(RpcError::Internal(e)) = &outcome {
            error!("rpc internal error: method={} error={e}", request.method);
        }
        outcome
    }

    fn dispatch(&self, method: &str, params: &Value) -> Result<Value, RpcError> {
        match method {
            "eth_chainId" => Ok(json!(quantity(self.chain.chain_id()))),
            "eth_blockNumber" => Ok(json!(quantity(self.chain.store().height()))),
            "eth_accounts" => to_json(self.keyring.addresses()),
            "ledger_createRawTransaction" => {
                let request: TransactionRequest = object_param(params)?;
                let tx = request.build(self.chain.chain_id())?;
                Ok(json!(Bytes::from(tx.to_bytes()).to_hex()))
            }
            "ledger_decodeTransaction" => {
                let tx = decode_payload(required_str(params, 0, "payload")?)?;
                to_json(TransactionObject::new(&tx))
            }
            "ledger_signTransaction" => self.sign_transaction(params),
            "eth_sendRawTransaction" => {
                let tx = decode_payload(required_str(params, 0, "payload")?)?;
                let id = self.chain.submit(tx)?;
                Ok(json!(id.to_string()))
            }
            "ledger_pendingTransactions" => {
                Ok(json!({ "transactionIds": self.chain.pool().ids() }))
            }
            "ledger_forgeBlock" => self.forge_block(params),
            "eth_getBlockByHash" => {
                let hash = parse_hash("blockHash", required_str(params, 0, "blockHash")?)?;
                self.block(&BlockRef::Hash(hash), params)
            }
            "eth_getBlockByNumber" => {
                let block = parse_block_ref(required(params, 0, "block")?)?;
                self.block(&block, params)
            }
            "eth_getBalance" => {
                let (address, state) = self.account_query(params)?;
                Ok(json!(u256_quantity(state.balance(&address))))
            }
            "eth_getTransactionCount" => {
                let (address, state) = self.account_query(params)?;
                Ok(json!(quantity(state.nonce(&address))))
            }
            "eth_getCode" => {
                let (address, state) = self.account_query(params)?;
                let code = state
                    .account(&address)
                    .map(|account| account.code().to_hex())
                    .unwrap_or_else(|| "0x".to_string());
                Ok(json!(code))
            }
            "eth_getTransactionByHash" => self.transaction(params),
            "eth_getTransactionReceipt" => {
                let id = parse_hash("id", required_str(params, 0, "id")?)?;
                match self.chain.store().receipt(&id) {
                    Some(receipt) => to_json(ReceiptObject::from(&receipt)),
                    None => Ok(Value::Null),
                }
            }
            "ledger_dump" => {
                let block = parse_block_ref(required(params, 0, "block")?)?;
                let path = PathBuf::from(required_str(params, 1, "path")?);
                self.chain.dump(&block, &path)?;
                Ok(Value::Bool(true))
            }
            other => Err(RpcError::MethodNotFound(other.to_string())),
        }
    }

    fn sign_transaction(&self, params: &Value) -> Result<Value, RpcError> {
        let from = parse_address("from", required_str(params, 0, "from")?)?;
        let tx = decode_payload(required_str(params, 1, "payload")?)?;
        let key = self
            .keyring
            .get(&from)
            .ok_or_else(|| RpcError::InvalidParams(format!("no signing key for {from}")))?;
        let signed = tx
            .sign(&key)
            .map_err(|e| RpcError::Internal(e.to_string()))?;
        Ok(json!(Bytes::from(signed.to_bytes()).to_hex()))
    }

    fn forge_block(&self, params: &Value) -> Result<Value, RpcError> {
        let forced = match param(params, 0, "forcedTx") {
            Some(Value::Object(map)) => map.get("forcedTx").unwrap_or(&Value::Null),
            Some(value) => value,
            None => &Value::Null,
        };
        let forced = match forced {
            Value::Null => Vec::new(),
            Value::Array(items) => items
                .iter()
                .map(|item| match item.as_str() {
                    Some(raw) => parse_bytes("forcedTx", raw),
                    None => Err(RpcError::InvalidParams(
                        "forcedTx entries must be strings".into(),
                    )),
                })
                .collect::<Result<Vec<_>, _>>()?,
            _ => return Err(RpcError::InvalidParams("forcedTx must be an array".into())),
        };
        let block = self.chain.forge(&forced)?;
        to_json(BlockObject::new(&block, false))
    }

    fn block(&self, block: &BlockRef, params: &Value) -> Result<Value, RpcError> {
        let full = param(params, 1, "fullTransactions")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        match self.chain.store().resolve(block) {
            Some(block) => to_json(BlockObject::new(&block, full)),
            None => Ok(Value::Null),
        }
    }

    fn account_query(
        &self,
        params: &Value,
    ) -> Result<(Address, Arc<StateSnapshot>), RpcError> {
        let address = parse_address("address", required_str(params, 0, "address")?)?;
        let block = match param(params, 1, "block") {
            Some(value) => parse_block_ref(value)?,
            None => BlockRef::Latest,
        };
        let (_, state) = self
            .chain
            .store()
            .state_at(&block)
            .ok_or(RpcError::UnknownBlock(block))?;
        Ok((address, state))
    }

    fn transaction(&self, params: &Value) -> Result<Value, RpcError> {
        let id = parse_hash("id", required_str(params, 0, "id")?)?;
        if let Some((tx, block, index)) = self.chain.store().transaction(&id) {
            return to_json(TransactionObject::new(&tx).mined(&block, index));
        }
        match self.chain.pool().get(&id) {
            Some(tx) => to_json(TransactionObject::new(&tx)),
            None => Ok(Value::Null),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::{
        ErrorObject, FORGE_FAILED, INVALID_PARAMS, INVALID_REQUEST, METHOD_NOT_FOUND,
        PARSE_ERROR, TRANSACTION_REJECTED, UNKNOWN_BLOCK,
    };
    use crate::utils::test_utils::utils::{
        eip155_transfer, ether, funded_chain, funded_config, legacy_transfer, test_key,
    };
    use crate::types::U256;

    fn handler(keys: &[u8]) -> RpcHandler {
        let chain = Arc::new(funded_chain(keys));
        RpcHandler::new(chain, Keyring::with_keys(keys.iter().map(|k| test_key(*k))))
    }

    fn call(handler: &RpcHandler, method: &str, params: Value) -> Result<Value, ErrorObject> {
        let line = json!({ "jsonrpc": "2.0", "id": 1, "method": method, "params": params });
        let response: Value = serde_json::from_str(&handler.handle_line(&line.to_string())).unwrap();
        match response.get("error") {
            Some(error) => Err(serde_json::from_value(error.clone()).unwrap()),
            None => Ok(response["result"].clone()),
        }
    }

    fn hex(tx: &Transaction) -> String {
        Bytes::from(tx.to_bytes()).to_hex()
    }

    #[test]
    fn create_sign_send_and_forge() {
        let rpc = handler(&[1]);
        let alice = test_key(1).address().to_string();
        let bob = Address([0xb0; 20]).to_string();

        let payload = call(
            &rpc,
            "ledger_createRawTransaction",
            json!({
                "type": "eip155",
                "to": bob,
                "nonce": "0x0",
                "gasLimit": "0x5208",
                "gasPrice": "0x3b9aca00",
                "value": "0x64",
            }),
        )
        .unwrap();

        let decoded = call(&rpc, "ledger_decodeTransaction", json!({ "payload": payload })).unwrap();
        assert_eq!(decoded["eip155"], true);
        assert_eq!(decoded["signed"], false);
        assert_eq!(decoded["chainId"], "0x539");

        let signed = call(
            &rpc,
            "ledger_signTransaction",
            json!({ "from": alice, "payload": payload }),
        )
        .unwrap();
        let id = call(&rpc, "eth_sendRawTransaction", json!([signed])).unwrap();
        assert_eq!(
            call(&rpc, "ledger_pendingTransactions", Value::Null).unwrap()["transactionIds"],
            json!([id])
        );

        let block = call(&rpc, "ledger_forgeBlock", json!({})).unwrap();
        assert_eq!(block["number"], "0x1");
        assert_eq!(block["transactions"], json!([id]));

        assert_eq!(
            call(&rpc, "eth_getBalance", json!([bob, "latest"])).unwrap(),
            "0x64"
        );
        assert_eq!(
            call(&rpc, "eth_getBalance", json!([bob, { "blockNumber": "0x0" }])).unwrap(),
            "0x0"
        );
        assert_eq!(
            call(&rpc, "eth_getTransactionCount", json!([alice])).unwrap(),
            "0x1"
        );

        let receipt = call(&rpc, "eth_getTransactionReceipt", json!([id])).unwrap();
        assert_eq!(receipt["status"], "0x1");
        assert_eq!(receipt["blockHash"], block["hash"]);

        let mined = call(&rpc, "eth_getTransactionByHash", json!([id])).unwrap();
        assert_eq!(mined["blockNumber"], "0x1");
        assert_eq!(mined["from"], alice);
    }

    #[test]
    fn rejections_carry_reason_and_code() {
        let rpc = handler(&[1]);
        let unsigned = legacy_transfer(0, Some(Address([1; 20])), U256::ZERO);
        let err = call(&rpc, "eth_sendRawTransaction", json!([hex(&unsigned)])).unwrap_err();
        assert_eq!(err.code, TRANSACTION_REJECTED);
        assert!(err.message.contains("not signed"));

        let broke = eip155_transfer(0, Some(Address([1; 20])), U256::ZERO)
            .sign(&test_key(5))
            .unwrap();
        let err = call(&rpc, "eth_sendRawTransaction", json!([hex(&broke)])).unwrap_err();
        assert!(err.message.contains("insufficient funds"));
    }

    #[test]
    fn forced_unsigned_transaction_is_left_out() {
        let rpc = handler(&[1]);
        let unsigned = legacy_transfer(0, Some(Address([1; 20])), U256::ZERO);
        let block = call(&rpc, "ledger_forgeBlock", json!({ "forcedTx": [hex(&unsigned)] })).unwrap();
        assert_eq!(block["transactions"], json!([]));

        let err = call(&rpc, "ledger_forgeBlock", json!({ "forcedTx": ["0x01c0"] })).unwrap_err();
        assert_eq!(err.code, FORGE_FAILED);
    }

    #[test]
    fn dump_gate_and_sink_errors() {
        let chain = Arc::new(
            Blockchain::new(funded_config(&[1]).with_alloc(Address([9; 20]), ether(1))).unwrap(),
        );
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.json");

        let open = RpcHandler::new(chain, Keyring::new());
        assert_eq!(
            call(&open, "ledger_dump", json!(["latest", path.to_str().unwrap()])).unwrap(),
            true
        );
        let err = call(&open, "ledger_dump", json!(["latest", dir.path().to_str().unwrap()]))
            .unwrap_err();
        assert_eq!(err.code, crate::rpc::DUMP_WRITE_FAILED);
        let err = call(&open, "ledger_dump", json!(["0x9", path.to_str().unwrap()])).unwrap_err();
        assert_eq!(err.code, UNKNOWN_BLOCK);

        let config = crate::config::NodeConfig {
            dump_enabled: false,
            ..funded_config(&[1])
        };
        let closed = RpcHandler::new(Arc::new(Blockchain::new(config).unwrap()), Keyring::new());
        let target = dir.path().join("refused.json");
        let err = call(&closed, "ledger_dump", json!(["latest", target.to_str().unwrap()]))
            .unwrap_err();
        assert_eq!(err, ErrorObject { code: 2, message: "Action not allowed".into() });
        assert!(!target.exists());
    }

    #[test]
    fn protocol_errors() {
        let rpc = handler(&[1]);
        let response: Value = serde_json::from_str(&rpc.handle_line("{not json")).unwrap();
        assert_eq!(response["error"]["code"], PARSE_ERROR);

        for line in [
            json!({ "id": 3, "method": "eth_chainId" }),
            json!({ "jsonrpc": "1.0", "id": 3, "method": "eth_chainId" }),
        ] {
            let response: Value = serde_json::from_str(&rpc.handle_line(&line.to_string())).unwrap();
            assert_eq!(response["error"]["code"], INVALID_REQUEST);
            assert_eq!(response["id"], 3);
        }

        assert_eq!(call(&rpc, "eth_mine", Value::Null).unwrap_err().code, METHOD_NOT_FOUND);
        assert_eq!(
            call(&rpc, "eth_getBalance", json!([])).unwrap_err().code,
            INVALID_PARAMS
        );
        assert_eq!(
            call(&rpc, "eth_getBalance", json!([Address([1; 20]).to_string(), "0x7"]))
                .unwrap_err()
                .code,
            UNKNOWN_BLOCK
        );
        assert_eq!(call(&rpc, "eth_chainId", Value::Null).unwrap(), "0x539");
        assert_eq!(
            call(&rpc, "eth_getBlockByNumber", json!(["0x5"])).unwrap(),
            Value::Null
        );
    }
}
