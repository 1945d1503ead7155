mod db;
mod portal;
mod remote;

use chrono::NaiveDate;
use clap::{ArgGroup, Args, Parser, Subcommand};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "ispflow")]
#[command(about = "ISP vendor-portal automation command line interface")]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub(crate) command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub(crate) enum Commands {
    /// Activate a pending installation request on the portal
    Activate(ActivateArgs),
    /// Create a portal ticket
    CreateTicket(CreateTicketArgs),
    /// Delete a portal ticket
    DeleteTicket {
        /// Portal ticket id
        ticket_id: String,
    },
    /// Change named fields of an installation's edit form
    EditInstallation {
        /// Customer external id on the portal (e.g. INST-42)
        #[arg(long)]
        external_id: String,
        /// Installation id under that customer
        #[arg(long)]
        installation_id: String,
        /// Field update; repeatable. `KEY=null` clears the field
        #[arg(long = "set", value_name = "KEY=VALUE", value_parser = parse_assignment, required = true)]
        set: Vec<(String, Value)>,
    },
    /// Delete an installation from the portal
    DeleteInstallation {
        /// Customer external id on the portal
        external_id: String,
    },
    /// Log in to the portal and report the session state
    CheckLogin,
    /// List local installation requests that are not activated yet
    Pending,
    /// Remote ticketing API commands
    Remote {
        #[command(subcommand)]
        command: RemoteCommands,
    },
    /// Database commands
    Db {
        #[command(subcommand)]
        command: DbCommands,
    },
}

#[derive(Debug, Args)]
#[command(group(ArgGroup::new("record").required(true).args(["record_id", "client"])))]
pub(crate) struct ActivateArgs {
    /// Local installation request id
    #[arg(long)]
    pub(crate) record_id: Option<i64>,
    /// Client full name, matched against pending requests
    #[arg(long)]
    pub(crate) client: Option<String>,
    /// Technician name or portal id
    #[arg(long)]
    pub(crate) technician: String,
    /// Plan label overriding the one on the request
    #[arg(long)]
    pub(crate) plan: Option<String>,
    #[arg(long)]
    pub(crate) zone: Option<String>,
    #[arg(long)]
    pub(crate) router: Option<String>,
    #[arg(long)]
    pub(crate) ap: Option<String>,
    /// Agreed installation date (YYYY-MM-DD), stored before submitting
    #[arg(long)]
    pub(crate) date: Option<NaiveDate>,
}

#[derive(Debug, Args)]
pub(crate) struct CreateTicketArgs {
    /// Ticket category id or label
    #[arg(long)]
    pub(crate) category: String,
    /// Start of the service window
    #[arg(long)]
    pub(crate) start: String,
    /// End of the service window
    #[arg(long)]
    pub(crate) end: String,
    /// Technician name or portal id
    #[arg(long)]
    pub(crate) technician: String,
    #[arg(long)]
    pub(crate) subject: String,
    #[arg(long)]
    pub(crate) description: Option<String>,
    #[arg(long)]
    pub(crate) priority: Option<String>,
    /// File uploaded with the ticket
    #[arg(long)]
    pub(crate) attachment: Option<std::path::PathBuf>,
    /// Delete the attachment file after the upload attempt
    #[arg(long, requires = "attachment")]
    pub(crate) remove_attachment: bool,
}

#[derive(Debug, Subcommand)]
pub(crate) enum RemoteCommands {
    /// Update fields of a remote ticket
    EditTicket {
        ticket_id: String,
        /// Field update; repeatable. Values that parse as JSON are sent as JSON
        #[arg(long = "set", value_name = "KEY=VALUE", value_parser = parse_assignment, required = true)]
        set: Vec<(String, Value)>,
    },
    /// Find remote tickets whose client name contains every given token
    Search { client: String },
    /// List remote staff members
    Staff,
}

#[derive(Debug, Subcommand)]
pub(crate) enum DbCommands {
    /// Check database connectivity
    Ping,
    /// Apply pending migrations
    Migrate,
}

/// Parses `KEY=VALUE`. JSON literals keep their type; anything else is a string.
pub(crate) fn parse_assignment(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in '{raw}'"));
    }
    let value = serde_json::from_str::<Value>(value.trim())
        .unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

pub(crate) fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = ispflow_core::load_app_config()?;
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log_level.clone()))?;
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Some(Commands::Activate(args)) => portal::run_activate(&config, args).await,
        Some(Commands::CreateTicket(args)) => portal::run_create_ticket(&config, args).await,
        Some(Commands::DeleteTicket { ticket_id }) => {
            portal::run_delete_ticket(&config, &ticket_id).await
        }
        Some(Commands::EditInstallation {
            external_id,
            installation_id,
            set,
        }) => portal::run_edit_installation(&config, external_id, installation_id, set).await,
        Some(Commands::DeleteInstallation { external_id }) => {
            portal::run_delete_installation(&config, &external_id).await
        }
        Some(Commands::CheckLogin) => portal::run_check_login(&config).await,
        Some(Commands::Pending) => db::run_pending(&config).await,
        Some(Commands::Remote { command }) => match command {
            RemoteCommands::EditTicket { ticket_id, set } => {
                remote::run_edit_ticket(&config, &ticket_id, set).await
            }
            RemoteCommands::Search { client } => remote::run_search(&config, &client).await,
            RemoteCommands::Staff => remote::run_staff(&config).await,
        },
        Some(Commands::Db { command }) => match command {
            DbCommands::Ping => db::run_ping(&config).await,
            DbCommands::Migrate => db::run_migrate(&config).await,
        },
        None => {
            println!("no command given; run `ispflow --help`");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests;
