use std::{future::Future, path::PathBuf, sync::Arc};

use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use serde::Serialize;
use tracing::{debug, info};

use marketplace_api::{
    auth::CallerIdentity,
    config::{self, AppConfig},
    db,
    directory::InMemoryDirectory,
    entities::{contract, OrderStatus},
    errors::ServiceError,
    models::{
        AddCartLine, Cart, CheckoutCallback, CommitCheckout, NewContract, OrderDetails,
        RemoveCartLine, SignContractRequest,
    },
    services::AppServices,
};

#[tokio::main]
async fn main() -> Result<()> {
    let Cli {
        user,
        role,
        directory,
        json,
        command,
    } = Cli::parse();
    let config = config::load_config().context("failed to load application config")?;
    config::init_tracing(config.log_level(), config.log_json);

    // Migrations run before anything else touches the schema.
    if let Commands::Migrate = command {
        return migrate(&config).await;
    }

    let user = user.ok_or_else(|| anyhow!("--user is required for this command"))?;
    let caller = CallerIdentity::parse(user, &role)?;
    let context = CliContext::initialize(config, directory.as_deref()).await?;
    run(&context, &caller, command, json).await
}

async fn run(
    context: &CliContext,
    caller: &CallerIdentity,
    command: Commands,
    json: bool,
) -> Result<()> {
    match command {
        Commands::Migrate => migrate(&context.config).await,
        Commands::Cart(command) => handle_cart_command(context, caller, command, json).await,
        Commands::Checkout => {
            let receipt = context
                .deadline(context.services.checkout.checkout(caller))
                .await
                .context("checkout failed")?;
            if json {
                print_json(&receipt)
            } else {
                println!("Checked out {} order(s):", receipt.orders.len());
                for order in &receipt.orders {
                    println!(
                        "- Order {} • supplier {} • {} line(s) • total {}",
                        order.order_id, order.supplier_id, order.line_count, order.total
                    );
                }
                Ok(())
            }
        }
        Commands::Orders(command) => handle_orders_command(context, caller, command, json).await,
        Commands::Pay(args) => {
            let pending = context
                .deadline(context.services.payments.initiate_payment(caller, args.order_id))
                .await
                .context("failed to initiate payment")?;
            if json {
                print_json(&pending)
            } else {
                println!("Payment {} for order {}", pending.id, pending.cart.order_id);
                println!("Checkout URL: {}", pending.checkout.checkout_url);
                Ok(())
            }
        }
        Commands::Webhook(args) => {
            let commit = CommitCheckout::from(CheckoutCallback {
                order_id: args.order_id,
                order_status: args.status,
            });
            let outcome = context
                .deadline(context.services.payments.reconcile(commit))
                .await
                .context("failed to apply payment callback")?;
            if json {
                print_json(&outcome)
            } else {
                println!("{:?}", outcome);
                Ok(())
            }
        }
        Commands::Payments(PaymentsCommands::Pending(args)) => {
            let pending = context
                .deadline(context.services.payments.pending_payments(&args.prefix))
                .await
                .context("failed to list pending payments")?;
            if json {
                print_json(&pending)
            } else if pending.is_empty() {
                println!("No pending payments");
                Ok(())
            } else {
                for entry in &pending {
                    println!(
                        "- {} • order {} • {} {} • created {}",
                        entry.id,
                        entry.cart.order_id,
                        entry.cart.amount,
                        entry.cart.currency,
                        entry.created_at.to_rfc3339()
                    );
                }
                Ok(())
            }
        }
        Commands::Contracts(command) => {
            handle_contracts_command(context, caller, command, json).await
        }
    }
}

async fn migrate(config: &AppConfig) -> Result<()> {
    let pool = db::establish_connection_from_app_config(config)
        .await
        .context("failed to connect to database")?;
    db::run_migrations(&pool)
        .await
        .context("failed to run migrations")?;
    info!("migrations applied");
    println!("Migrations applied");
    Ok(())
}

#[derive(Parser)]
#[command(name = "marketplace", about = "Marketplace CLI for carts, orders, payments and contracts", version)]
struct Cli {
    #[arg(long, global = true, help = "Acting user id")]
    user: Option<i64>,
    #[arg(
        long,
        global = true,
        default_value = "customer",
        help = "Acting role: customer, supplier or admin"
    )]
    role: String,
    #[arg(
        long,
        global = true,
        help = "JSON file with the product catalog and supplier registry"
    )]
    directory: Option<PathBuf>,
    #[arg(
        long,
        global = true,
        action = ArgAction::SetTrue,
        help = "Render command output as pretty JSON"
    )]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending database migrations
    Migrate,
    #[command(subcommand)]
    Cart(CartCommands),
    /// Turn the caller's cart into one order per supplier
    Checkout,
    #[command(subcommand)]
    Orders(OrdersCommands),
    /// Request a checkout page for a pending order
    Pay(PayArgs),
    /// Apply a payment gateway callback
    Webhook(WebhookArgs),
    #[command(subcommand)]
    Payments(PaymentsCommands),
    #[command(subcommand)]
    Contracts(ContractsCommands),
}

#[derive(Subcommand)]
enum CartCommands {
    Show,
    Add(CartAddArgs),
    Remove(CartRemoveArgs),
    Clear,
}

#[derive(Args)]
struct CartAddArgs {
    #[arg(long)]
    product_id: i64,
    #[arg(long)]
    supplier_id: i64,
    #[arg(long, default_value_t = 1)]
    quantity: i32,
    #[arg(long, help = "Unit price in minor currency units")]
    price: i64,
}

#[derive(Args)]
struct CartRemoveArgs {
    #[arg(long)]
    product_id: i64,
    #[arg(long)]
    supplier_id: i64,
    #[arg(long, default_value_t = 1)]
    quantity: i32,
}

#[derive(Subcommand)]
enum OrdersCommands {
    List,
    Show(OrderIdArgs),
    Status(OrderStatusArgs),
}

#[derive(Args)]
struct OrderIdArgs {
    #[arg(long)]
    id: i64,
}

#[derive(Args)]
struct OrderStatusArgs {
    #[arg(long)]
    id: i64,
    #[arg(long, value_parser = parse_order_status, help = "pending, in_progress, completed or cancelled")]
    status: OrderStatus,
}

#[derive(Args)]
struct PayArgs {
    order_id: i64,
}

#[derive(Args)]
struct WebhookArgs {
    #[arg(long, help = "Order reference echoed by the gateway")]
    order_id: String,
    #[arg(long, help = "Gateway payment status, e.g. success or failed")]
    status: String,
}

#[derive(Subcommand)]
enum PaymentsCommands {
    Pending(PendingArgs),
}

#[derive(Args)]
struct PendingArgs {
    #[arg(long, default_value = "")]
    prefix: String,
}

#[derive(Subcommand)]
enum ContractsCommands {
    Create(ContractCreateArgs),
    Sign(ContractSignArgs),
    Show(ContractIdArgs),
    List,
}

#[derive(Args)]
struct ContractCreateArgs {
    #[arg(long)]
    order_id: i64,
    #[arg(long)]
    supplier_id: i64,
    #[arg(long)]
    customer_id: i64,
    #[arg(long)]
    content: String,
}

#[derive(Args)]
struct ContractSignArgs {
    #[arg(long)]
    id: i64,
    #[arg(long)]
    signature: String,
}

#[derive(Args)]
struct ContractIdArgs {
    #[arg(long)]
    id: i64,
}

fn parse_order_status(raw: &str) -> Result<OrderStatus, String> {
    raw.parse::<OrderStatus>()
        .map_err(|_| format!("unknown order status '{}'", raw))
}

struct CliContext {
    config: Arc<AppConfig>,
    services: AppServices,
}

impl CliContext {
    async fn initialize(config: AppConfig, directory: Option<&std::path::Path>) -> Result<Self> {
        let directory = match directory {
            Some(path) => InMemoryDirectory::from_json_file(path)
                .await
                .with_context(|| format!("failed to load directory from {}", path.display()))?,
            None => InMemoryDirectory::new(),
        };
        let directory = Arc::new(directory);

        let services = AppServices::from_config(config, directory.clone(), directory)
            .await
            .context("failed to initialize services")?;
        debug!(target: "marketplace_cli", "services initialized");

        Ok(Self {
            config: services.config.clone(),
            services,
        })
    }

    /// Runs one operation under the configured request deadline. An elapsed deadline
    /// drops the operation, and with it any open unit of work.
    async fn deadline<T, F>(&self, operation: F) -> Result<T>
    where
        F: Future<Output = Result<T, ServiceError>>,
    {
        let timeout = self.config.request_timeout();
        match tokio::time::timeout(timeout, operation).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(anyhow!("operation timed out after {:?}", timeout)),
        }
    }
}

async fn handle_cart_command(
    context: &CliContext,
    caller: &CallerIdentity,
    command: CartCommands,
    json: bool,
) -> Result<()> {
    let cart = &context.services.cart;
    match command {
        CartCommands::Show => {
            let current = context.deadline(cart.read_cart(caller)).await?;
            if json {
                return print_json(&current);
            }
            render_cart(&current)?;
        }
        CartCommands::Add(args) => {
            let input = AddCartLine {
                product_id: args.product_id,
                supplier_id: args.supplier_id,
                quantity: args.quantity,
                price: args.price,
            };
            let updated = context
                .deadline(cart.add_or_update_line(caller, input))
                .await
                .context("failed to add cart line")?;
            if json {
                return print_json(&updated);
            }
            render_cart(&updated)?;
        }
        CartCommands::Remove(args) => {
            let input = RemoveCartLine {
                product_id: args.product_id,
                supplier_id: args.supplier_id,
                quantity: args.quantity,
            };
            let remaining = context
                .deadline(cart.remove_line(caller, input))
                .await
                .context("failed to remove cart line")?;
            if json {
                return print_json(&remaining);
            }
            match remaining {
                Some(current) => render_cart(&current)?,
                None => println!("Cart is now empty"),
            }
        }
        CartCommands::Clear => {
            let removed = context.deadline(cart.clear(caller)).await?;
            if json {
                return print_json(&serde_json::json!({ "removed": removed }));
            }
            println!("Removed {} cart row(s)", removed);
        }
    }
    Ok(())
}

async fn handle_orders_command(
    context: &CliContext,
    caller: &CallerIdentity,
    command: OrdersCommands,
    json: bool,
) -> Result<()> {
    let orders = &context.services.orders;
    match command {
        OrdersCommands::List => {
            let listed = context.deadline(orders.list_for(caller)).await?;
            if json {
                return print_json(&listed);
            }
            if listed.is_empty() {
                println!("No orders");
            }
            for order in &listed {
                render_order(order);
            }
        }
        OrdersCommands::Show(args) => {
            let order = context.deadline(orders.get_for(caller, args.id)).await?;
            if json {
                return print_json(&order);
            }
            render_order(&order);
            for line in &order.lines {
                println!(
                    "    product {} ({}) x{} @ {}",
                    line.line.product_id,
                    line.product_name.as_deref().unwrap_or("unknown"),
                    line.line.quantity,
                    line.line.price
                );
            }
        }
        OrdersCommands::Status(args) => {
            let updated = context
                .deadline(orders.change_status(caller, args.id, args.status))
                .await
                .context("failed to update order status")?;
            if json {
                return print_json(&updated);
            }
            println!("Order {} is now {}", updated.id, updated.status_id);
        }
    }
    Ok(())
}

async fn handle_contracts_command(
    context: &CliContext,
    caller: &CallerIdentity,
    command: ContractsCommands,
    json: bool,
) -> Result<()> {
    let contracts = &context.services.contracts;
    match command {
        ContractsCommands::Create(args) => {
            let input = NewContract {
                order_id: args.order_id,
                supplier_id: args.supplier_id,
                customer_id: args.customer_id,
                content: args.content,
            };
            let created = context
                .deadline(contracts.create_contract(caller, input))
                .await
                .context("failed to create contract")?;
            if json {
                return print_json(&created);
            }
            render_contract(&created);
        }
        ContractsCommands::Sign(args) => {
            let request = SignContractRequest {
                contract_id: args.id,
                signature: args.signature,
            };
            let signed = context
                .deadline(contracts.sign(caller, request))
                .await
                .context("failed to sign contract")?;
            if json {
                return print_json(&signed);
            }
            render_contract(&signed);
        }
        ContractsCommands::Show(args) => {
            let found = context
                .deadline(contracts.get_contract(caller, args.id))
                .await?;
            if json {
                return print_json(&found);
            }
            render_contract(&found);
        }
        ContractsCommands::List => {
            let listed = context
                .deadline(contracts.contracts_by_user(caller, caller.user_id))
                .await?;
            if json {
                return print_json(&listed);
            }
            if listed.is_empty() {
                println!("No contracts");
            }
            for entry in &listed {
                render_contract(entry);
            }
        }
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn render_cart(cart: &Cart) -> Result<()> {
    let summary = cart.summary()?;
    println!("Cart for customer {}", cart.customer_id);
    for group in &summary.groups {
        println!(
            "- supplier {} • {} line(s) • subtotal {} • delivery {} • total {}{}",
            group.supplier_id,
            group.line_count,
            group.subtotal,
            group.delivery,
            group.total,
            if group.meets_minimum { "" } else { " • below minimum" }
        );
    }
    println!("Total: {}", summary.total);
    Ok(())
}

fn render_order(order: &OrderDetails) {
    println!(
        "- Order {} • supplier {} ({}) • status {} • total {} • fulfil by {}",
        order.order.id,
        order.order.supplier_id,
        order.supplier_name.as_deref().unwrap_or("unknown"),
        order.order.status_id,
        order.total,
        order.order.order_date.format("%Y-%m-%d")
    );
}

fn render_contract(contract: &contract::Model) {
    println!(
        "- Contract {} • order {} • supplier {} • customer {} • status {}",
        contract.id, contract.order_id, contract.supplier_id, contract.customer_id, contract.status
    );
}
