use std::env;
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use ambient_client::{
    felt_to_hex, format_chain_id, load_config, parse_felt, resolve_token_decimals,
    session_banner, ActionRunner, ActionState, ApprovalConfig, ApprovalOutcome,
    ApprovalReconciler, ChainConfig, LocalKeyTransport, RpcAccount, SdkController,
    StarknetSigner, StatusLine, TokenInfo, WalletConnection, WalletSigner, WalletTransport,
};

#[derive(Parser)]
#[command(name = "ambient-cli")]
#[command(about = "ambient dex cli: readiness, approvals, swaps and liquidity", long_about = None)]
struct Cli {
    /// Config file; falls back to AMBIENT_CONFIG, then ./ambient.toml.
    #[arg(long)]
    config: Option<PathBuf>,
    #[command(flatten)]
    account: AccountArgs,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct AccountArgs {
    /// Falls back to ACCOUNT_ADDRESS.
    #[arg(long)]
    account: Option<String>,
    /// Falls back to PRIVATE_KEY.
    #[arg(long)]
    private_key: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    Status,
    Allowance {
        #[arg(long)]
        token: String,
    },
    Approve {
        #[arg(long)]
        token: String,
    },
    Swap {
        #[arg(long)]
        token_in: String,
        #[arg(long)]
        token_out: String,
        #[arg(long)]
        amount: String,
    },
    MintAmbient(MintArgs),
    MintRange(MintArgs),
}

#[derive(Args)]
struct MintArgs {
    /// Token the amount is denominated in.
    #[arg(long)]
    token: String,
    /// Other side of the pool.
    #[arg(long)]
    other: String,
    #[arg(long)]
    amount: String,
}

type Signer = StarknetSigner<RpcAccount>;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    if let Err(err) = run().await {
        error!("{err}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let config_path = cli
        .config
        .clone()
        .or_else(|| env::var("AMBIENT_CONFIG").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("ambient.toml"));
    let mut config = load_config(&config_path)?;
    info!(chain = %config.chain_label(), "config loaded");

    let account = parse_felt(&arg_or_env(cli.account.account.as_deref(), "ACCOUNT_ADDRESS")?)?;
    let private_key = parse_felt(&arg_or_env(cli.account.private_key.as_deref(), "PRIVATE_KEY")?)?;
    let transport = Arc::new(LocalKeyTransport::new(
        config.rpc_url.clone(),
        account,
        private_key,
        config.confirmation.clone(),
    ));

    let controller = SdkController::new(config.clone());
    let wallet_chain = transport.chain_id().await?;
    controller.connection_changed(WalletConnection::connected(account, wallet_chain, transport));
    controller.wait_idle().await;
    let state = controller.snapshot();
    let banner = session_banner(true, &state);

    if let Commands::Status = cli.command {
        let block = match state.signer() {
            Some(signer) => signer.block_number().await.ok(),
            None => None,
        };
        let report = serde_json::json!({
            "status": banner.message,
            "ready": state.is_ready(),
            "error": state.error(),
            "account": felt_to_hex(account),
            "wallet_chain": format_chain_id(wallet_chain),
            "expected_chain": format_chain_id(config.chain_id),
            "dex": felt_to_hex(config.dex_address),
            "block": block,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let (Some(engine), Some(signer)) = (state.engine().cloned(), state.signer().cloned()) else {
        return Err(banner.message.into());
    };
    resolve_token_decimals(&mut config, signer.clone()).await?;
    let approvals = ApprovalReconciler::new(signer.clone(), ApprovalConfig::from_chain(&config));
    let runner = ActionRunner::new(engine, Arc::new(ActionState::new()), config.slippage_bps);

    match cli.command {
        Commands::Status => {}
        Commands::Allowance { token } => {
            let token = config.resolve_token(&token)?;
            let record = approvals
                .check_allowance(token.address, signer.address(), config.dex_address)
                .await;
            println!("token={}", token.symbol);
            println!("status={}", record.status_text(&token.symbol, token.decimals));
            if let Some(message) = record.message {
                println!("message={message}");
            }
        }
        Commands::Approve { token } => {
            let token = config.resolve_token(&token)?;
            match approvals.approve_max(token.address, config.dex_address).await {
                ApprovalOutcome::Skipped(record) => {
                    println!("status={}", record.status_text(&token.symbol, token.decimals));
                }
                ApprovalOutcome::InFlight => println!("status=approval already in flight"),
                ApprovalOutcome::Confirmed { tx_hash, record } => {
                    println!("tx_hash={}", felt_to_hex(tx_hash));
                    println!("status={}", record.status_text(&token.symbol, token.decimals));
                }
                ApprovalOutcome::Failed { record, .. } => {
                    let message = record.message.unwrap_or_default();
                    return Err(format!("Failed to approve {}: {message}", token.symbol).into());
                }
            }
        }
        Commands::Swap {
            token_in,
            token_out,
            amount,
        } => {
            let token_in = config.resolve_token(&token_in)?;
            let token_out = config.resolve_token(&token_out)?;
            ensure_approved(&approvals, &config, &signer, &token_in).await?;
            report(runner.swap(&token_in, &token_out, &amount).await)?;
        }
        Commands::MintAmbient(args) => {
            let (token, other) = resolve_pair(&config, &args)?;
            ensure_approved(&approvals, &config, &signer, &token).await?;
            report(runner.add_ambient((&token, &other), &token, &args.amount).await)?;
        }
        Commands::MintRange(args) => {
            let (token, other) = resolve_pair(&config, &args)?;
            ensure_approved(&approvals, &config, &signer, &token).await?;
            report(runner.add_concentrated((&token, &other), &token, &args.amount).await)?;
        }
    }
    Ok(())
}

fn arg_or_env(value: Option<&str>, name: &str) -> Result<String, String> {
    match value {
        Some(value) => Ok(value.to_string()),
        None => env::var(name).map_err(|_| format!("missing {name}")),
    }
}

fn resolve_pair(config: &ChainConfig, args: &MintArgs) -> Result<(TokenInfo, TokenInfo), Box<dyn Error>> {
    Ok((config.resolve_token(&args.token)?, config.resolve_token(&args.other)?))
}

async fn ensure_approved(
    approvals: &ApprovalReconciler<Signer>,
    config: &ChainConfig,
    signer: &Arc<Signer>,
    token: &TokenInfo,
) -> Result<(), Box<dyn Error>> {
    let record = approvals
        .check_allowance(token.address, signer.address(), config.dex_address)
        .await;
    if approvals.permits_action(token.address, config.dex_address) {
        return Ok(());
    }
    Err(format!(
        "{} {}: run `ambient-cli approve --token {}` first",
        token.symbol,
        record.status_text(&token.symbol, token.decimals),
        token.symbol
    )
    .into())
}

fn report(line: StatusLine) -> Result<(), Box<dyn Error>> {
    println!("{line}");
    if line.is_error() {
        return Err(line.message.into());
    }
    Ok(())
}
