use capability_relay::application::codec::TokenCodec;
use capability_relay::application::consumer::{Consumer, ConsumerOptions};
use capability_relay::application::issuer::{DEFAULT_TTL_SECS, IssueRequest, Issuer, IssuerOptions};
use capability_relay::application::payment_intents::PaymentIntentService;
use capability_relay::application::relay::RelayGuard;
use capability_relay::config::{
    DEFAULT_KEY_ID, DEFAULT_SECRET, ENV_KMS_KEY_ID, ENV_KMS_SECRET, KmsConfig, parse_assignments,
    parse_list,
};
use capability_relay::domain::money::Amount;
use capability_relay::domain::payment_intent::{
    CaptureMethod, ConfirmationNext, PaymentIntent, PaymentIntentId,
};
use capability_relay::domain::payment_method::{
    CardDetails, PaymentMethod, PaymentMethodType, WalletDetails,
};
use capability_relay::domain::ports::{Clock, EventLogBox};
use capability_relay::infrastructure::clock::SystemClock;
use capability_relay::infrastructure::hmac_key_service::HmacKeyService;
use capability_relay::infrastructure::in_memory::{
    InMemoryPaymentIntentEventLog, InMemoryReplayCache,
};
use capability_relay::infrastructure::provider::ScriptedPaymentProvider;
#[cfg(feature = "storage-rocksdb")]
use capability_relay::infrastructure::rocksdb::RocksDbEventLog;
use chrono::Duration;
use clap::{Args, Parser, Subcommand};
use miette::{IntoDiagnostic, Result, miette};
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Signing key identifier
    #[arg(long, global = true, env = ENV_KMS_KEY_ID, default_value = DEFAULT_KEY_ID)]
    key_id: String,

    /// Shared HMAC secret (at least 8 characters)
    #[arg(
        long,
        global = true,
        env = ENV_KMS_SECRET,
        default_value = DEFAULT_SECRET,
        hide_env_values = true
    )]
    secret: String,

    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Issue a confirmed token and print it
    Issue(IssueArgs),
    /// Verify a token once and pass it through
    Relay(TokenArgs),
    /// Verify a token and apply capability policy
    Consume(ConsumeArgs),
    /// Drive a payment intent through its lifecycle
    PaymentFlow(PaymentFlowArgs),
}

#[derive(Args)]
struct IssueArgs {
    #[arg(long, default_value = "user_123")]
    subject: String,
    #[arg(long, default_value = "op_demo")]
    order_id: String,
    #[arg(long, default_value = "coupons.svc")]
    issuer: String,
    #[arg(long, default_value = "order-processing")]
    audience: String,
    /// Comma separated capabilities
    #[arg(long, default_value = "coupons:redeem")]
    capabilities: String,
    /// Comma separated key=value constraints
    #[arg(long)]
    constraints: Option<String>,
    /// Override the key id from the global configuration
    #[arg(long)]
    kid: Option<String>,
    #[arg(long, default_value_t = DEFAULT_TTL_SECS)]
    ttl_secs: i64,
    #[arg(long)]
    token_id: Option<String>,
}

#[derive(Args)]
struct TokenArgs {
    /// Raw token; read from --token-file or stdin when absent
    #[arg(long)]
    token: Option<String>,
    #[arg(long)]
    token_file: Option<PathBuf>,
}

#[derive(Args)]
struct ConsumeArgs {
    #[command(flatten)]
    token: TokenArgs,
    #[arg(long, default_value = "coupons:redeem")]
    capability: String,
    /// Comma separated constraint keys that must be present
    #[arg(long)]
    require: Option<String>,
    #[arg(long, default_value = "coupons")]
    domain: String,
}

#[derive(Args)]
struct PaymentFlowArgs {
    #[arg(long, default_value = "pi_demo")]
    id: String,
    /// Comma separated payment method types the intent accepts
    #[arg(long, default_value = "card")]
    types: String,
    #[arg(long, default_value = "120")]
    amount: String,
    #[arg(long, default_value = "card")]
    method_type: String,
    #[arg(long, default_value = "automatic")]
    capture_method: String,
    /// Provider confirmation result: processing, requires_action or requires_capture
    #[arg(long, default_value = "processing")]
    next: String,
    /// Make the provider reject confirmation with this message
    #[arg(long)]
    fail_confirm: Option<String>,
    /// Make the provider reject capture with this message
    #[arg(long)]
    fail_capture: Option<String>,
    /// Path to persistent event log (optional). If provided, uses RocksDB.
    #[cfg(feature = "storage-rocksdb")]
    #[arg(long)]
    db_path: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let kms = KmsConfig::new(&cli.key_id, &cli.secret).into_diagnostic()?;
    match cli.command {
        Command::Issue(args) => issue(&kms, args).await,
        Command::Relay(args) => relay(&kms, args).await,
        Command::Consume(args) => consume(&kms, args).await,
        Command::PaymentFlow(args) => payment_flow(args).await,
    }
}

async fn issue(kms: &KmsConfig, args: IssueArgs) -> Result<()> {
    let key_id = args
        .kid
        .filter(|kid| !kid.trim().is_empty())
        .unwrap_or_else(|| kms.key_id.clone());
    let codec = TokenCodec::new(Arc::new(HmacKeyService::with_key(
        key_id.clone(),
        &kms.secret,
    )));
    let issuer = Issuer::new(
        codec,
        IssuerOptions {
            issuer: args.issuer,
            audience: args.audience,
            key_id,
            default_ttl: Duration::seconds(DEFAULT_TTL_SECS),
        },
        Arc::new(SystemClock),
    )
    .into_diagnostic()?;

    let capabilities = parse_list(&args.capabilities);
    if capabilities.is_empty() {
        return Err(miette!(
            "at least one capability is required (set --capabilities)"
        ));
    }

    let constraints =
        parse_assignments(args.constraints.as_deref().unwrap_or_default()).into_diagnostic()?;
    let ttl = Duration::try_seconds(args.ttl_secs)
        .ok_or_else(|| miette!("--ttl-secs {} is out of range", args.ttl_secs))?;
    let token = issuer
        .issue_confirmed_token(&IssueRequest {
            subject: args.subject,
            order_processing_id: args.order_id,
            capabilities,
            constraints,
            ttl: Some(ttl),
            token_id: args.token_id,
        })
        .await
        .into_diagnostic()?;

    println!("{}", token.raw());
    Ok(())
}

async fn relay(kms: &KmsConfig, args: TokenArgs) -> Result<()> {
    let raw = read_token(&args)?;
    let guard = RelayGuard::new(
        codec_for(kms),
        Arc::new(InMemoryReplayCache::new()),
        Arc::new(SystemClock),
    );
    let token = guard.verify(&raw).await.into_diagnostic()?;

    eprintln!(
        "relay: token {} verified for order {}",
        token.claims().jti,
        token.claims().order_processing_id
    );
    println!("{}", token.raw());
    Ok(())
}

async fn consume(kms: &KmsConfig, args: ConsumeArgs) -> Result<()> {
    let raw = read_token(&args.token)?;
    let clock = Arc::new(SystemClock);
    let token = codec_for(kms).decode(&raw).await.into_diagnostic()?;
    token.claims().validate(clock.now()).into_diagnostic()?;

    let consumer = Consumer::new(
        ConsumerOptions {
            domain: args.domain,
        },
        clock,
    );
    let required = parse_list(args.require.as_deref().unwrap_or_default());
    let result = consumer
        .consume(&token, &args.capability, &required)
        .into_diagnostic()?;

    println!("{}", serde_json::to_string_pretty(&result).into_diagnostic()?);
    Ok(())
}

async fn payment_flow(args: PaymentFlowArgs) -> Result<()> {
    let id = PaymentIntentId::new(args.id).into_diagnostic()?;
    let types = parse_list(&args.types)
        .iter()
        .map(|t| t.parse::<PaymentMethodType>())
        .collect::<Result<Vec<_>, _>>()
        .into_diagnostic()?;
    let amount: Amount = args.amount.parse().into_diagnostic()?;
    let method_type: PaymentMethodType = args.method_type.parse().into_diagnostic()?;
    let capture_method: CaptureMethod = args.capture_method.parse().into_diagnostic()?;
    let next: ConfirmationNext = args.next.parse().into_diagnostic()?;

    let mut provider = ScriptedPaymentProvider::new(next);
    if let Some(message) = args.fail_confirm {
        provider = provider.failing_confirm(message);
    }
    if let Some(message) = args.fail_capture {
        provider = provider.failing_capture(message);
    }

    #[cfg(feature = "storage-rocksdb")]
    let log: EventLogBox = match args.db_path {
        Some(db_path) => Box::new(RocksDbEventLog::open(db_path).into_diagnostic()?),
        None => Box::new(InMemoryPaymentIntentEventLog::new()),
    };
    #[cfg(not(feature = "storage-rocksdb"))]
    let log: EventLogBox = Box::new(InMemoryPaymentIntentEventLog::new());

    let service = PaymentIntentService::new(log, Box::new(provider));

    emit(
        &service
            .create(id.clone(), types, amount)
            .await
            .into_diagnostic()?,
    );
    emit(
        &service
            .select_payment_method(&id, method_type)
            .await
            .into_diagnostic()?,
    );
    emit(
        &service
            .provide_payment_method(&id, demo_payment_method(method_type), capture_method)
            .await
            .into_diagnostic()?,
    );

    let mut intent = match service.confirm(&id).await {
        Ok(intent) => intent,
        Err(err) => {
            if let Some(intent) = service.find(&id).await.into_diagnostic()? {
                emit(&intent);
            }
            return Err(err).into_diagnostic();
        }
    };
    emit(&intent);

    loop {
        let step = match intent.status() {
            "requires_action" => service.handle_action_result(&id).await.into_diagnostic()?,
            "requires_capture" => match service.capture(&id).await {
                Ok(intent) => Some(intent),
                Err(err) => {
                    if let Some(intent) = service.find(&id).await.into_diagnostic()? {
                        emit(&intent);
                    }
                    return Err(err).into_diagnostic();
                }
            },
            "processing" => service.handle_payment_succeeded(&id).await.into_diagnostic()?,
            _ => break,
        };
        let Some(next) = step else { break };
        emit(&next);
        intent = next;
    }

    info!(id = %id, status = intent.status(), "payment flow finished");
    Ok(())
}

fn codec_for(kms: &KmsConfig) -> TokenCodec {
    TokenCodec::new(Arc::new(HmacKeyService::with_key(
        kms.key_id.clone(),
        &kms.secret,
    )))
}

fn read_token(args: &TokenArgs) -> Result<String> {
    if let Some(token) = args.token.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
        return Ok(token.to_string());
    }
    if let Some(path) = &args.token_file {
        return Ok(std::fs::read_to_string(path).into_diagnostic()?.trim().to_string());
    }

    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line).into_diagnostic()?;
    match line.trim() {
        "" => Err(miette!(
            "no token supplied via --token, --token-file, or stdin"
        )),
        token => Ok(token.to_string()),
    }
}

fn demo_payment_method(method_type: PaymentMethodType) -> PaymentMethod {
    match method_type {
        PaymentMethodType::Card => PaymentMethod::Card(CardDetails {
            number: "4242424242424242".to_string(),
            exp_month: 12,
            exp_year: 2030,
        }),
        PaymentMethodType::Wallet => PaymentMethod::Wallet(WalletDetails {
            authorization_url: "https://wallet.example/authorize".to_string(),
        }),
    }
}

fn emit(intent: &PaymentIntent) {
    let line = serde_json::json!({
        "id": intent.id(),
        "seq_nr": intent.seq_nr(),
        "status": intent.status(),
    });
    println!("{line}");
}
