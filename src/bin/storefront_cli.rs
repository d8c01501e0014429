use std::{path::PathBuf, str::FromStr, sync::Arc};

use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use storefront_api::{
    config::{self, AppConfig},
    db,
    events::{self, EventSender},
    models::{
        CartLine, CheckoutInput, CustomerInfo, OrderReceipt, PaymentInstructions,
        PaymentMethod, TrackingParameters,
    },
    repositories::{OrderStore, OrderWithItems, SeaOrmOrderStore},
    services::{
        AttributionReporter, CheckoutService, CheckoutSettings, HttpAttributionReporter,
        HttpPaymentGateway, NoopAttributionReporter, OrderService, PaymentGateway, PollOutcome,
        ReconciliationService,
    },
    session::{AccessTokenStore, Cart},
};

#[derive(Parser)]
#[command(name = "storefront-cli", about = "Storefront client: cart, checkout and payment watch", version)]
struct Cli {
    #[arg(
        long,
        global = true,
        action = ArgAction::SetTrue,
        help = "Render command output as pretty JSON when available"
    )]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(subcommand)]
    Cart(CartCommands),
    /// Place an order for the current cart
    Checkout(CheckoutArgs),
    /// Poll an order until its payment is confirmed (Ctrl-C stops)
    Watch(WatchArgs),
    /// Request a new payment for a pending order
    Retry(RetryArgs),
    /// List orders placed with this client's access token
    Orders,
}

#[derive(Subcommand)]
enum CartCommands {
    Add(CartAddArgs),
    /// Set the quantity of a product; 0 removes it
    Set { product_id: String, quantity: i32 },
    Remove { product_id: String },
    Show,
    Clear,
}

#[derive(Args)]
struct CartAddArgs {
    #[arg(long)]
    product_id: String,
    #[arg(long)]
    name: String,
    #[arg(long)]
    price: Decimal,
    #[arg(long, default_value_t = 1)]
    quantity: i32,
}

#[derive(Args)]
struct CheckoutArgs {
    #[arg(long)]
    name: String,
    #[arg(long)]
    email: String,
    #[arg(long)]
    phone: String,
    #[arg(long = "cpf")]
    tax_id: String,
    #[arg(long)]
    address: String,
    #[arg(long, value_parser = PaymentMethod::from_str, default_value = "PIX")]
    method: PaymentMethod,
    #[arg(long)]
    utm_source: Option<String>,
    #[arg(long)]
    utm_campaign: Option<String>,
    #[arg(long)]
    utm_medium: Option<String>,
    /// Keep polling after checkout until the payment is confirmed
    #[arg(long, action = ArgAction::SetTrue)]
    watch: bool,
}

#[derive(Args)]
struct WatchArgs {
    order_id: Uuid,
    payment_id: String,
}

#[derive(Args)]
struct RetryArgs {
    order_id: Uuid,
    #[arg(long, value_parser = PaymentMethod::from_str)]
    method: Option<PaymentMethod>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let session = SessionFiles::locate()?;

    match cli.command {
        Commands::Cart(command) => handle_cart_command(&session, command, cli.json)?,
        Commands::Checkout(args) => {
            let context = CliContext::initialize().await?;
            handle_checkout(&context, &session, args, cli.json).await?
        }
        Commands::Watch(args) => {
            let context = CliContext::initialize().await?;
            let outcome = watch_payment(&context, args.order_id, args.payment_id).await;
            render_outcome(&outcome);
        }
        Commands::Retry(args) => {
            let context = CliContext::initialize().await?;
            let token = session.tokens.load_or_create()?;
            let receipt = context
                .checkout_service()
                .retry_payment(args.order_id, &token, args.method)
                .await
                .context("failed to request a new payment")?;
            if cli.json {
                print_json(&receipt)?;
            } else {
                render_receipt(&receipt);
            }
        }
        Commands::Orders => {
            let context = CliContext::initialize().await?;
            let token = session.tokens.load_or_create()?;
            let orders = context.order_service().list_orders(&token).await?;
            if cli.json {
                print_json(&orders)?;
            } else if orders.is_empty() {
                println!("No orders yet.");
            } else {
                orders.iter().for_each(render_order);
            }
        }
    }

    Ok(())
}

fn handle_cart_command(session: &SessionFiles, command: CartCommands, json: bool) -> Result<()> {
    let mut cart = Cart::load(&session.cart)?;

    match command {
        CartCommands::Add(args) => {
            if args.quantity <= 0 {
                return Err(anyhow!("quantity must be at least 1"));
            }
            cart.add(CartLine {
                product_id: args.product_id,
                name: args.name,
                unit_price: args.price,
                quantity: args.quantity,
            });
        }
        CartCommands::Set {
            product_id,
            quantity,
        } => {
            if !cart.set_quantity(&product_id, quantity) {
                return Err(anyhow!("product {} is not in the cart", product_id));
            }
        }
        CartCommands::Remove { product_id } => {
            if !cart.remove(&product_id) {
                return Err(anyhow!("product {} is not in the cart", product_id));
            }
        }
        CartCommands::Show => {}
        CartCommands::Clear => cart.clear(),
    }

    cart.save(&session.cart)?;

    if json {
        print_json(&cart)?;
    } else {
        render_cart(&cart);
    }
    Ok(())
}

async fn handle_checkout(
    context: &CliContext,
    session: &SessionFiles,
    args: CheckoutArgs,
    json: bool,
) -> Result<()> {
    let mut cart = Cart::load(&session.cart)?;
    let access_token = session.tokens.load_or_create()?;

    let input = CheckoutInput {
        items: cart.lines().to_vec(),
        customer: CustomerInfo {
            name: args.name,
            email: args.email,
            phone: args.phone,
            tax_id: args.tax_id,
            shipping_address: args.address,
        },
        payment_method: args.method,
        access_token: Some(access_token),
        tracking: TrackingParameters {
            utm_source: args.utm_source,
            utm_campaign: args.utm_campaign,
            utm_medium: args.utm_medium,
            ..Default::default()
        },
    };

    let receipt = match context.checkout_service().submit_order(input).await {
        Ok(receipt) => receipt,
        Err(e) => {
            if let Some(order_id) = e.order_id() {
                eprintln!(
                    "Order {} was saved; run `storefront-cli retry {}` to request a new payment.",
                    order_id, order_id
                );
            }
            return Err(anyhow!("checkout failed [{}]: {}", e.code(), e));
        }
    };

    // The cart is only emptied once a receipt exists.
    cart.clear();
    cart.save(&session.cart)?;

    if json {
        print_json(&receipt)?;
    } else {
        render_receipt(&receipt);
    }

    if args.watch {
        let outcome = watch_payment(context, receipt.order_id, receipt.payment_id).await;
        render_outcome(&outcome);
    }
    Ok(())
}

async fn watch_payment(context: &CliContext, order_id: Uuid, payment_id: String) -> PollOutcome {
    println!("Waiting for payment of order {} (Ctrl-C to stop)...", order_id);
    let handle = context.reconciliation_service().watch(order_id, payment_id);

    tokio::select! {
        outcome = handle.outcome() => outcome,
        _ = tokio::signal::ctrl_c() => PollOutcome::StillPending,
    }
}

struct SessionFiles {
    cart: PathBuf,
    tokens: AccessTokenStore,
}

impl SessionFiles {
    fn locate() -> Result<Self> {
        let dir = std::env::var("STOREFRONT_CLI_HOME")
            .map(PathBuf::from)
            .or_else(|_| {
                std::env::var("HOME").map(|home| PathBuf::from(home).join(".storefront"))
            })
            .map_err(|_| anyhow!("set STOREFRONT_CLI_HOME or HOME to store the session"))?;

        Ok(Self {
            cart: dir.join("cart.json"),
            tokens: AccessTokenStore::new(dir.join("access_token")),
        })
    }
}

struct CliContext {
    config: AppConfig,
    store: Arc<dyn OrderStore>,
    gateway: Arc<dyn PaymentGateway>,
    event_sender: EventSender,
}

impl CliContext {
    async fn initialize() -> Result<Self> {
        let config = config::load_config().context("failed to load application config")?;
        config::init_tracing(config.log_level(), config.log_json);

        let db_pool = db::establish_connection_from_app_config(&config)
            .await
            .context("failed to connect to database")?;
        if config.auto_migrate {
            db::run_migrations(&db_pool).await?;
        }
        let store: Arc<dyn OrderStore> = Arc::new(SeaOrmOrderStore::new(Arc::new(db_pool)));

        let gateway: Arc<dyn PaymentGateway> = Arc::new(
            HttpPaymentGateway::new(&config.gateway)
                .context("failed to build payment gateway client")?,
        );

        let reporter: Arc<dyn AttributionReporter> = if config.attribution.enabled {
            Arc::new(HttpAttributionReporter::new(&config.attribution)?)
        } else {
            Arc::new(NoopAttributionReporter)
        };
        let (event_sender, event_rx) = EventSender::channel(config.event_channel_capacity);
        tokio::spawn(events::process_events(event_rx, reporter));

        Ok(Self {
            config,
            store,
            gateway,
            event_sender,
        })
    }

    fn checkout_service(&self) -> CheckoutService {
        CheckoutService::new(
            self.store.clone(),
            self.gateway.clone(),
            self.event_sender.clone(),
            CheckoutSettings::from(&self.config),
        )
    }

    fn reconciliation_service(&self) -> ReconciliationService {
        ReconciliationService::new(
            self.store.clone(),
            self.gateway.clone(),
            self.event_sender.clone(),
            self.config.poller.clone(),
        )
    }

    fn order_service(&self) -> OrderService {
        OrderService::new(self.store.clone(), self.event_sender.clone())
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn render_cart(cart: &Cart) {
    if cart.is_empty() {
        println!("Cart is empty.");
        return;
    }
    for line in cart.lines() {
        println!(
            "  • {} x {} ({}) @ {} = {}",
            line.quantity,
            line.name,
            line.product_id,
            line.unit_price,
            line.line_total()
                .map_or_else(|| "out of range".to_string(), |total| total.to_string())
        );
    }
    match cart.subtotal() {
        Some(subtotal) => println!("Subtotal: {}", subtotal),
        None => println!("Subtotal: out of range"),
    }
}

fn render_receipt(receipt: &OrderReceipt) {
    println!("Order {} placed.", receipt.order_id);
    println!("  payment {} • {} cents", receipt.payment_id, receipt.amount_cents);
    match &receipt.instructions {
        PaymentInstructions::Pix { pix_code, .. } => println!("  PIX code: {}", pix_code),
        PaymentInstructions::Billet { billet_url, .. } => println!("  Billet: {}", billet_url),
        PaymentInstructions::CreditCard => println!("  Card payment submitted"),
    }
    if let Some(expires_at) = receipt.expires_at {
        println!("  expires {}", expires_at.to_rfc3339());
    }
}

fn render_order(entry: &OrderWithItems) {
    let order = &entry.order;
    println!(
        "- Order {} • status {} • total {} • placed {}",
        order.id,
        order.status,
        order.total_amount,
        order.created_at.to_rfc3339()
    );
    for item in &entry.items {
        println!(
            "  • {} x {} @ {} (total {})",
            item.quantity, item.product_name, item.unit_price, item.line_total
        );
    }
}

fn render_outcome(outcome: &PollOutcome) {
    match outcome {
        PollOutcome::Confirmed(by) => println!("Payment confirmed ({:?}).", by),
        PollOutcome::StillPending => println!("Stopped; payment still pending."),
        PollOutcome::Error(reason) => println!("Stopped checking: {}", reason),
    }
}

