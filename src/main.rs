//! Ledger node.
//!
//! Serves JSON-RPC 2.0 requests read line by line from stdin and writes one
//! response line per request to stdout. Logs go to stderr.
//!
//! # Usage
//! ```text
//! evm_ledger [OPTIONS]
//! ```
//!
//! Flags take precedence over the `LEDGER_*` environment variables, which take
//! precedence over the development defaults.

use evm_ledger::config::{
    ENV_LOG, NodeConfig, parse_alloc, parse_bool, parse_capacity, parse_chain_id, parse_u64,
    parse_u256,
};
use evm_ledger::core::blockchain::Blockchain;
use evm_ledger::crypto::key_pair::PrivateKey;
use evm_ledger::crypto::keyring::Keyring;
use evm_ledger::rpc::handler::RpcHandler;
use evm_ledger::types::address::Address;
use evm_ledger::utils::log::{self, Level};
use evm_ledger::{error, info, warn};
use std::env;
use std::process;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc::channel;

/// Parsed command line.
struct Args {
    config: NodeConfig,
    log_level: Option<Level>,
}

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().collect();
    let program = args.first().map(String::as_str).unwrap_or("evm_ledger");

    let Args { config, log_level } = match parse_args(&args[1.min(args.len())..]) {
        Ok(Some(parsed)) => parsed,
        Ok(None) => {
            print_usage(program);
            return;
        }
        Err(e) => {
            eprintln!("{e}\n");
            print_usage(program);
            process::exit(1);
        }
    };

    let level = match log_level {
        Some(level) => Some(level),
        None => match env::var(ENV_LOG) {
            Ok(raw) => match Level::from_str(&raw) {
                Ok(level) => Some(level),
                Err(e) => {
                    eprintln!("{ENV_LOG}: {e}");
                    process::exit(1);
                }
            },
            Err(_) => None,
        },
    };
    if let Some(level) = level {
        log::set_level(level);
    }

    let keyring = Keyring::with_keys(config.dev_keys.iter().cloned());
    for address in keyring.addresses() {
        info!("dev signing key loaded: address={address}");
    }
    let dump_enabled = config.dump_enabled;
    let chain = match Blockchain::new(config) {
        Ok(chain) => Arc::new(chain),
        Err(e) => {
            error!("failed to initialize chain: {e}");
            process::exit(1);
        }
    };
    info!(
        "node ready: chain_id={} dump_enabled={dump_enabled}",
        chain.chain_id()
    );

    let handler = Arc::new(RpcHandler::new(chain, keyring));
    let (sx, mut rx) = channel::<String>(1024);

    // Responses are written in completion order; clients match them by id.
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(line) = rx.recv().await {
            if stdout.write_all(line.as_bytes()).await.is_err()
                || stdout.write_all(b"\n").await.is_err()
                || stdout.flush().await.is_err()
            {
                warn!("stdout closed, dropping responses");
                break;
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        error!("failed to read request: {e}");
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                let handler = handler.clone();
                let sender = sx.clone();
                // Forging and dumps block; keep them off the reactor.
                tokio::spawn(async move {
                    match tokio::task::spawn_blocking(move || handler.handle_line(&line)).await {
                        Ok(response) => {
                            let _ = sender.send(response).await;
                        }
                        Err(e) => error!("request task failed: {e}"),
                    }
                });
            }
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    error!("failed to listen for Ctrl+C: {e}");
                }
                info!("Ctrl+C received, shutting down...");
                break;
            }
        }
    }

    drop(sx);
    if let Err(e) = writer.await {
        error!("writer task error: {e:?}");
    }
    info!("node stopped");
}

/// Parses flags into a config. `Ok(None)` means help was requested.
fn parse_args(args: &[String]) -> Result<Option<Args>, String> {
    let mut config = NodeConfig::default();
    config.apply_env(|key| env::var(key).ok())?;
    let mut log_level = None;

    let mut iter = args.iter();
    while let Some(flag) = iter.next() {
        let mut value = |name: &str| {
            iter.next()
                .cloned()
                .ok_or_else(|| format!("{name} requires an argument"))
        };
        match flag.as_str() {
            "-h" | "--help" => return Ok(None),
            "--chain-id" => config.chain_id = parse_chain_id(&value("--chain-id")?)?,
            "--dump-enabled" => config.dump_enabled = true,
            "--dump" => config.dump_enabled = parse_bool(&value("--dump")?)?,
            "--alloc" => config.alloc.push(parse_alloc(&value("--alloc")?)?),
            "--pool-capacity" => config.pool_capacity = parse_capacity(&value("--pool-capacity")?)?,
            "--base-fee" => config.initial_base_fee = parse_u256(&value("--base-fee")?)?,
            "--gas-limit" => config.gas.block_gas_limit = parse_u64(&value("--gas-limit")?)?,
            "--coinbase" => config.coinbase = Some(Address::from_str(&value("--coinbase")?)?),
            "--dev-key" => {
                let raw = value("--dev-key")?;
                let key = PrivateKey::from_hex(&raw)
                    .ok_or_else(|| "--dev-key: expected 32 bytes of hex".to_string())?;
                config.dev_keys.push(key);
            }
            "--log-level" => log_level = Some(Level::from_str(&value("--log-level")?)?),
            "--no-timestamps" => log::SHOW_TIMESTAMP.store(false, Ordering::Relaxed),
            other => return Err(format!("Unexpected argument: {other}")),
        }
    }

    config.validate()?;
    Ok(Some(Args { config, log_level }))
}

const USAGE: &str = "\
Ledger Node

USAGE:
    {program} [OPTIONS]

Reads JSON-RPC 2.0 requests from stdin, one per line, and writes responses
to stdout.

OPTIONS:
    --chain-id <id>          Network chain id (default 1337)
    --dump-enabled           Allow ledger_dump on this node
    --dump <bool>            Set dump access explicitly
    --alloc <addr=amount>    Genesis balance, repeatable
    --pool-capacity <n>      Maximum pooled transactions
    --base-fee <wei>         Genesis base fee (default 1 gwei)
    --gas-limit <gas>        Block gas limit (default 20000000)
    --coinbase <addr>        Recipient of priority fees
    --dev-key <hex>          Private key for ledger_signTransaction, repeatable
    --log-level <level>      debug, info, warn or error
    --no-timestamps          Omit timestamps from log lines
    -h, --help               Print this help message

ENVIRONMENT:
    LEDGER_CHAIN_ID        Default chain id
    LEDGER_DUMP_ENABLED    Default dump access (true/false)
    LEDGER_LOG             Default log level

EXAMPLES:
    {program} --dump-enabled --alloc 0x2c7536e3605d9c16a7a3d7b1898e529396a65c23=0x56bc75e2d63100000
    echo '{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"eth_chainId\"}' | {program}
";

/// Prints usage information to stderr.
fn print_usage(program: &str) {
    eprintln!("{}", USAGE.replace("{program}", program));
}
