use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

use worker_client::client::WorkerClient;
use worker_client::config::ClientConfig;
use worker_client::model::{Earnings, Order};
use worker_client::sync::{ResourceKey, Snapshot, SyncEvent};

#[derive(Parser)]
#[command(name = "worker-client", version, about = "Gig-worker client core")]
struct Cli {
    /// Also write logs to a daily rotated file in this directory.
    #[arg(long, env = "WORKER_LOG_DIR")]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Sign in and persist the session.
    Login {
        email: String,
        #[arg(long, env = "WORKER_PASSWORD")]
        password: String,
    },
    /// Forget the stored session.
    Logout,
    /// Show the signed-in worker.
    Whoami,
    /// List orders.
    Orders {
        #[arg(long)]
        refresh: bool,
    },
    /// Show the accepted job, if any.
    Current,
    Accept { order_id: String },
    Complete { order_id: String },
    /// Show earnings and completed jobs.
    Earnings {
        #[arg(long)]
        refresh: bool,
    },
    /// Poll orders in the background and print every update until Ctrl-C.
    Watch,
}

fn init_tracing(log_dir: Option<&Path>) -> anyhow::Result<Option<WorkerGuard>> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let Some(dir) = log_dir else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
        return Ok(None);
    };

    std::fs::create_dir_all(dir)
        .with_context(|| format!("creating log directory {}", dir.display()))?;
    let (file_writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, "worker-client.log"));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .init();
    Ok(Some(guard))
}

fn print_orders(snapshot: &Snapshot<Vec<Order>>) {
    if snapshot.is_offline() {
        println!("(offline data)");
    }
    if snapshot.value.is_empty() {
        println!("No orders.");
    }
    for order in snapshot.value.iter() {
        println!(
            "#{:<4} {:<10} {} -> {}  eta {} min  G {:.2} ±{:.2}",
            order.id, order.status, order.pickup, order.dropoff, order.eta, order.g_mean, order.g_var
        );
    }
}

fn print_earnings(snapshot: &Snapshot<Earnings>) {
    if snapshot.is_offline() {
        println!("(offline data)");
    }
    let earnings = &snapshot.value;
    println!("Total:     ${}", earnings.total_earnings.round_dp(2));
    println!("This week: ${}", earnings.weekly_earnings.round_dp(2));
    for job in &earnings.completed_jobs {
        println!(
            "  #{:<4} {} -> {}  ${}  {}",
            job.id,
            job.pickup,
            job.dropoff,
            job.earnings.round_dp(2),
            job.completed_at.format("%Y-%m-%d %H:%M")
        );
    }
}

async fn watch(client: &WorkerClient) -> anyhow::Result<()> {
    let mut events = client.subscribe_sync();
    print_orders(&client.orders().await?);
    client.start_polling();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(SyncEvent::Updated { key: ResourceKey::Orders, .. }) => {
                    println!();
                    print_orders(&client.orders().await?);
                }
                Ok(SyncEvent::Cleared { .. }) => {
                    anyhow::bail!("session ended, log in again");
                }
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            }
        }
    }
    client.shutdown();
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _log_guard = init_tracing(cli.log_dir.as_deref())?;

    let config = ClientConfig::from_env().context("reading configuration")?;
    let client = WorkerClient::connect(config)
        .await
        .context("starting worker client")?;
    let restored = client.restore_session().await?;

    match cli.command {
        Command::Login { email, password } => {
            let user = client.login(&email, &password).await?;
            println!("Signed in as {} <{}>", user.name, user.email);
        }
        Command::Logout => {
            client.logout().await;
            println!("Signed out.");
        }
        Command::Whoami => match restored {
            Some(user) => println!("{} <{}> ({})", user.name, user.email, user.id),
            None => println!("Not signed in."),
        },
        Command::Orders { refresh } => {
            let orders = if refresh {
                client.refresh_orders().await?
            } else {
                client.orders().await?
            };
            print_orders(&orders);
        }
        Command::Current => match client.current_job().await? {
            Some(order) => println!(
                "#{} {} -> {}  eta {} min",
                order.id, order.pickup, order.dropoff, order.eta
            ),
            None => println!("No active job."),
        },
        Command::Accept { order_id } => {
            client.accept(&order_id).await?;
            println!("Accepted order {order_id}.");
        }
        Command::Complete { order_id } => {
            client.complete(&order_id).await?;
            println!("Completed order {order_id}.");
            print_earnings(&client.earnings().await?);
        }
        Command::Earnings { refresh } => {
            let earnings = if refresh {
                client.refresh_earnings().await?
            } else {
                client.earnings().await?
            };
            print_earnings(&earnings);
        }
        Command::Watch => watch(&client).await?,
    }

    Ok(())
}
