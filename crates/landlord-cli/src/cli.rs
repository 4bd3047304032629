use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "landlord",
    about = "Tenant provisioning control plane",
    version
)]
pub struct Cli {
    /// Base URL of a remote landlord server (for client subcommands).
    #[arg(long, env = "LANDLORD_URL", global = true)]
    pub remote: Option<String>,

    /// Bearer token for the remote server.
    #[arg(long, env = "LANDLORD_TOKEN", global = true)]
    pub token: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the control plane: HTTP API plus the reconciler.
    Serve {
        /// Path to the YAML settings file.
        #[arg(long, env = "LANDLORD_CONFIG")]
        config: Option<PathBuf>,

        /// Override the bind address from the settings file.
        #[arg(long)]
        bind: Option<String>,

        /// Override the port from the settings file.
        #[arg(long)]
        port: Option<u16>,
    },

    /// Manage tenants on a remote server.
    Tenant {
        #[command(subcommand)]
        command: TenantCommand,
    },

    /// Show a compute provider's configuration schema.
    Schema {
        /// Provider id; omit for the default provider.
        provider: Option<String>,
    },

    /// Summarise tenant statuses.
    Status,
}

#[derive(Debug, Subcommand)]
pub enum TenantCommand {
    /// Create a tenant.
    Create {
        name: String,

        /// Desired configuration as inline JSON.
        #[arg(long)]
        config: String,

        /// Compute provider id; omit for the server default.
        #[arg(long)]
        provider: Option<String>,

        /// Label as key=value; repeatable.
        #[arg(long = "label")]
        labels: Vec<String>,
    },

    /// Fetch a tenant by name or id.
    Get { name: String },

    /// List tenants.
    List {
        #[arg(long)]
        include_archived: bool,

        #[arg(long, default_value_t = 50)]
        limit: i64,

        #[arg(long, default_value_t = 0)]
        offset: i64,
    },

    /// Replace a tenant's desired configuration.
    Update {
        name: String,

        /// New desired configuration as inline JSON.
        #[arg(long)]
        config: String,
    },

    /// Archive a tenant's compute.
    Archive { name: String },

    /// Delete a tenant (archives first when compute still exists).
    Delete { name: String },
}
