mod cli;
mod commands;
mod output;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Command, TenantCommand};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve { config, bind, port } => commands::serve(config, bind, port).await,
        Command::Tenant { command } => match command {
            TenantCommand::Create {
                name,
                config,
                provider,
                labels,
            } => commands::tenant_create(name, config, provider, labels, cli.remote, cli.token).await,
            TenantCommand::Get { name } => commands::tenant_get(name, cli.remote, cli.token).await,
            TenantCommand::List {
                include_archived,
                limit,
                offset,
            } => {
                commands::tenant_list(include_archived, limit, offset, cli.remote, cli.token).await
            }
            TenantCommand::Update { name, config } => {
                commands::tenant_update(name, config, cli.remote, cli.token).await
            }
            TenantCommand::Archive { name } => {
                commands::tenant_archive(name, cli.remote, cli.token).await
            }
            TenantCommand::Delete { name } => {
                commands::tenant_delete(name, cli.remote, cli.token).await
            }
        },
        Command::Schema { provider } => commands::schema(provider, cli.remote, cli.token).await,
        Command::Status => commands::status(cli.remote, cli.token).await,
    }
}
