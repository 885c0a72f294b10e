//! Deposit Sentinel
//!
//! ```text
//! ┌──────────┐    ┌──────────┐    ┌──────────┐    ┌──────────┐
//! │ EVM node │───▶│ Sentinel │───▶│ Address  │───▶│  Ledger  │
//! │ (JSON-RPC)│   │ (cursor) │    │  Index   │    │(Postgres)│
//! └──────────┘    └──────────┘    └──────────┘    └──────────┘
//! ```
//!
//! Modes:
//! - default            run the sentinel until Ctrl-C
//! - `--scan-once`      run a single scan cycle and exit
//! - `--derive <id>`    print the deposit address of a user id
//! - `--provision <name>` create a user and bind its deposit address
//! - `--withdraw <id> <to> <amount>` pay out from the hot wallet
//! - `--history <id>`   print recent transactions of a user
//!
//! `--env <name>` selects `config/<name>.yaml` (default `dev`).

use std::sync::Arc;

use anyhow::{Context, bail};
use deposit_sentinel::account::{
    EvmAddress, PgAddressIndex, TransactionRepository, UserRepository, Username,
};
use deposit_sentinel::config::AppConfig;
use deposit_sentinel::db::{Database, schema};
use deposit_sentinel::funding::{PgLedger, RpcHotWallet, WithdrawPolicy, WithdrawService};
use deposit_sentinel::money::{NATIVE_DECIMALS, parse_amount};
use deposit_sentinel::sentinel::{EthRpcClient, SentinelWorker};
use deposit_sentinel::wallet::{AddressDeriver, derive_path};
use tokio::sync::watch;

const HISTORY_LIMIT: i64 = 50;

fn get_env() -> String {
    arg_value("--env")
        .or_else(|| arg_value("-e"))
        .unwrap_or_else(|| "dev".to_string())
}

/// Value following `flag` on the command line
fn arg_value(flag: &str) -> Option<String> {
    arg_values(flag, 1).map(|mut v| v.remove(0))
}

/// `n` values following `flag` on the command line
fn arg_values(flag: &str, n: usize) -> Option<Vec<String>> {
    let args: Vec<String> = std::env::args().collect();
    let pos = args.iter().position(|a| a == flag)?;
    let values = args.get(pos + 1..pos + 1 + n)?;
    Some(values.to_vec())
}

fn has_flag(flag: &str) -> bool {
    std::env::args().any(|a| a == flag)
}

fn parse_user_id(raw: &str) -> anyhow::Result<i64> {
    raw.parse().with_context(|| format!("invalid user id: {}", raw))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let config = AppConfig::load(&env).context("failed to load configuration")?;
    let _log_guard = deposit_sentinel::logging::init_logging(&config);

    tracing::info!(
        "Starting Deposit Sentinel ({}) in {} mode",
        env!("GIT_HASH"),
        env
    );

    let deriver = AddressDeriver::new(&config.wallet.master_xpub)?;

    if let Some(raw) = arg_value("--derive") {
        let user_id = parse_user_id(&raw)?;
        println!("{} {}", derive_path(user_id)?, deriver.derive_address(user_id)?);
        return Ok(());
    }

    let db = Database::connect(&config.postgres_url)
        .await
        .context("failed to connect to PostgreSQL")?;
    schema::init_schema(db.pool()).await?;
    let ledger = Arc::new(PgLedger::new(db.pool().clone()));

    if let Some(name) = arg_value("--provision") {
        let username = Username::new(&name)?;
        let user = UserRepository::provision(db.pool(), &deriver, &username).await?;
        println!("{}", serde_json::to_string_pretty(&user)?);
        return Ok(());
    }

    if let Some(raw) = arg_value("--history") {
        let user_id = parse_user_id(&raw)?;
        let records = TransactionRepository::history(db.pool(), user_id, HISTORY_LIMIT).await?;
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if has_flag("--withdraw") {
        let Some(args) = arg_values("--withdraw", 3) else {
            bail!("usage: --withdraw <user_id> <to> <amount>");
        };
        let Some(hot_wallet) = &config.wallet.hot_wallet_address else {
            bail!("wallet.hot_wallet_address is not configured");
        };

        let wallet = RpcHotWallet::new(
            &config.sentinel.rpc_url,
            EvmAddress::new(hot_wallet)?,
            config.sentinel.rpc_timeout(),
        )?;
        let service = WithdrawService::new(
            ledger.clone(),
            Arc::new(wallet),
            WithdrawPolicy {
                currency: config.sentinel.native_currency.clone(),
                max_withdraw: config.wallet.max_withdraw,
                receipt_poll: config.wallet.receipt_poll(),
                receipt_timeout: config.wallet.receipt_timeout(),
            },
        );

        let user_id = parse_user_id(&args[0])?;
        let amount = parse_amount(&args[2], NATIVE_DECIMALS)?;
        let receipt = service.withdraw(user_id, &args[1], amount).await?;
        println!("{}", serde_json::to_string_pretty(&receipt)?);
        return Ok(());
    }

    let reader = EthRpcClient::new(&config.sentinel.rpc_url, config.sentinel.rpc_timeout())?;
    let worker = Arc::new(SentinelWorker::new(
        Arc::new(reader),
        Arc::new(PgAddressIndex::new(db.pool().clone())),
        ledger.clone(),
        ledger,
        config.sentinel.clone(),
    )?);

    if has_flag("--scan-once") {
        match worker.tick().await {
            Some(result) => println!("{:#?}", result?),
            None => bail!("a scan is already running"),
        }
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            // Keep the sender alive; the sentinel runs until killed
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
        tracing::info!("Ctrl-C received, shutting down");
        let _ = shutdown_tx.send(true);
    });

    worker.run(shutdown_rx).await;
    Ok(())
}
