use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tracing::debug;

use covenant_config::GroupConfig;
use covenant_core::{FileStorage, Storage, SystemClock};
use covenant_governance::{
    AccountId, ArchiveTag, AuthContext, GroupService, LoggingDispatcher, OpenDirectory, Operation,
    ProposalOutcome,
};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory holding the group's state
    #[arg(long, global = true, default_value = "covenant-data")]
    data_dir: PathBuf,

    /// Identity that signed this call, may be repeated
    #[arg(long = "signer", global = true)]
    signers: Vec<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new group
    Init {
        /// Governed account
        group: String,
        /// Founding custodians
        #[arg(required = true)]
        founders: Vec<String>,
        /// YAML configuration; defaults and COVENANT_* variables otherwise
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Invite a custodian
    Invite { account: String },
    /// Remove a custodian
    Remove { account: String },
    /// Change a custodian's voting weight
    Weight { account: String, weight: u8 },
    /// Record that a custodian is still around
    Heartbeat { account: String },
    /// Submit a proposal
    Propose {
        proposer: String,
        title: String,
        #[arg(long, default_value = "")]
        description: String,
        /// `target::operation`, optionally followed by `=<hex payload>`
        #[arg(long = "op", required = true)]
        operations: Vec<String>,
        /// RFC 3339 expiration time
        #[arg(long, conflicts_with = "expires_in")]
        expires: Option<String>,
        /// Expiration as seconds from now
        #[arg(long, default_value_t = 7 * 24 * 3600)]
        expires_in: u64,
    },
    /// Approve a proposal
    Approve { approver: String, id: u64 },
    /// Withdraw an approval
    Unapprove { unapprover: String, id: u64 },
    /// Cancel a proposal
    Cancel { canceler: String, id: u64 },
    /// Execute an approved proposal
    Exec { executer: String, id: u64 },
    /// Delete the oldest archived proposals of a scope
    Truncate {
        /// cancelled or executed
        scope: String,
        batch: u32,
    },
    /// Create, update or delete a threshold
    Threshold {
        name: String,
        #[arg(allow_negative_numbers = true, default_value_t = 0)]
        value: i8,
        #[arg(long)]
        delete: bool,
    },
    /// Link an operation to a threshold
    Link {
        target: String,
        operation: String,
        threshold: String,
        #[arg(long)]
        remove: bool,
    },
    /// Show or change the group configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Register as a member
    Register { account: String },
    /// Leave the group as a member
    Unregister { account: String },
    /// Print the group state as JSON
    Show,
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the configuration as YAML
    Show,
    /// Replace the configuration with a YAML file
    Set { file: PathBuf },
    /// Restore the defaults
    Reset,
}

/// Parse `target::operation[=hex]`
fn parse_operation(text: &str) -> Result<Operation> {
    let (call, payload) = match text.split_once('=') {
        Some((call, hex_payload)) => (
            call,
            hex::decode(hex_payload).with_context(|| format!("bad payload in '{}'", text))?,
        ),
        None => (text, Vec::new()),
    };
    let (target, operation) = call
        .split_once("::")
        .ok_or_else(|| anyhow!("expected target::operation, got '{}'", text))?;
    if target.is_empty() || operation.is_empty() {
        bail!("expected target::operation, got '{}'", text);
    }
    Ok(Operation::new(target, operation, payload))
}

fn parse_expiration(expires: Option<&str>, expires_in: u64, now: u64) -> Result<u64> {
    match expires {
        Some(text) => {
            let at: DateTime<Utc> = DateTime::parse_from_rfc3339(text)
                .with_context(|| format!("'{}' is not an RFC 3339 time", text))?
                .with_timezone(&Utc);
            u64::try_from(at.timestamp()).map_err(|_| anyhow!("expiration before 1970"))
        }
        None => Ok(now.saturating_add(expires_in)),
    }
}

fn account(name: &str) -> Result<AccountId> {
    AccountId::new(name).with_context(|| format!("invalid account '{}'", name))
}

async fn open(storage: Arc<dyn Storage>) -> Result<GroupService> {
    GroupService::load(
        storage,
        Arc::new(OpenDirectory),
        Arc::new(LoggingDispatcher::new()),
        Arc::new(SystemClock),
    )
    .await
    .context("no group here, run `covenant init` first")
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    covenant_core::init_tracing();

    let cli = Cli::parse();
    let storage: Arc<dyn Storage> = Arc::new(
        FileStorage::new(&cli.data_dir)
            .await
            .with_context(|| format!("can't open {}", cli.data_dir.display()))?,
    );
    let auth = AuthContext::from_signers(
        cli.signers
            .iter()
            .map(|s| account(s))
            .collect::<Result<Vec<_>>>()?,
    );
    debug!("Running with {} signers", cli.signers.len());

    if let Commands::Init { group, founders, config } = &cli.command {
        let config = match config {
            Some(path) => GroupConfig::from_file(path)?,
            None => GroupConfig::from_env()?,
        };
        let founders = founders.iter().map(|f| account(f)).collect::<Result<Vec<_>>>()?;
        GroupService::bootstrap(
            storage,
            Arc::new(OpenDirectory),
            Arc::new(LoggingDispatcher::new()),
            Arc::new(SystemClock),
            account(group)?,
            &founders,
            config,
        )
        .await?;
        println!("Group {} created with {} custodians", group, founders.len());
        return Ok(());
    }

    let service = open(storage).await?;

    match &cli.command {
        // handled before the group is opened
        Commands::Init { .. } => {}
        Commands::Invite { account: name } => {
            service.invite_custodian(&auth, &account(name)?).await?;
            println!("Invited {}", name);
        }
        Commands::Remove { account: name } => {
            service.remove_custodian(&auth, &account(name)?).await?;
            println!("Removed {}", name);
        }
        Commands::Weight { account: name, weight } => {
            service.set_custodian_weight(&auth, &account(name)?, *weight).await?;
            println!("{} now weighs {}", name, weight);
        }
        Commands::Heartbeat { account: name } => {
            let was_stale = service.heartbeat(&auth, &account(name)?).await?;
            if was_stale {
                println!("{} is active again", name);
            } else {
                println!("{} is active", name);
            }
        }
        Commands::Propose { proposer, title, description, operations, expires, expires_in } => {
            let operations = operations
                .iter()
                .map(|text| parse_operation(text))
                .collect::<Result<Vec<_>>>()?;
            let expiration = parse_expiration(expires.as_deref(), *expires_in, service.now())?;
            match service
                .propose(&auth, &account(proposer)?, title, description, operations, expiration)
                .await?
            {
                ProposalOutcome::Stored(id) => println!("Proposal {} submitted", id),
                ProposalOutcome::Dispatched(ticket) => {
                    let dispatched = ticket.settled().await;
                    println!("No approval needed, dispatched {} operations", dispatched);
                }
            }
        }
        Commands::Approve { approver, id } => {
            service.approve(&auth, &account(approver)?, *id).await?;
            println!("{} approved proposal {}", approver, id);
        }
        Commands::Unapprove { unapprover, id } => {
            service.unapprove(&auth, &account(unapprover)?, *id).await?;
            println!("{} withdrew approval of proposal {}", unapprover, id);
        }
        Commands::Cancel { canceler, id } => {
            service.cancel(&auth, &account(canceler)?, *id).await?;
            println!("Proposal {} cancelled", id);
        }
        Commands::Exec { executer, id } => {
            let ticket = service.exec(&auth, &account(executer)?, *id).await?;
            let dispatched = ticket.settled().await;
            println!("Proposal {} executed, dispatched {} operations", id, dispatched);
        }
        Commands::Truncate { scope, batch } => {
            let scope: ArchiveTag = scope.parse()?;
            let removed = service.archive_batch(&auth, scope, *batch).await?;
            println!("Removed {} archived proposals from {}", removed, scope);
        }
        Commands::Threshold { name, value, delete } => {
            service.manage_threshold(&auth, name, *value, *delete).await?;
            if *delete {
                println!("Threshold '{}' deleted", name);
            } else {
                println!("Threshold '{}' set to {}", name, value);
            }
        }
        Commands::Link { target, operation, threshold, remove } => {
            service
                .manage_action_link(&auth, target, operation, threshold, *remove)
                .await?;
            if *remove {
                println!("{}::{} now uses the default threshold", target, operation);
            } else {
                println!("{}::{} linked to '{}'", target, operation, threshold);
            }
        }
        Commands::Config { command } => match command {
            ConfigCommands::Show => print!("{}", service.config().await.to_yaml()?),
            ConfigCommands::Set { file } => {
                let config = GroupConfig::from_file(file)?;
                service.update_config(&auth, config, false).await?;
                println!("Configuration updated");
            }
            ConfigCommands::Reset => {
                service.update_config(&auth, GroupConfig::default(), true).await?;
                println!("Configuration reset to defaults");
            }
        },
        Commands::Register { account: name } => {
            service.register_member(&auth, &account(name)?).await?;
            println!("{} registered", name);
        }
        Commands::Unregister { account: name } => {
            service.unregister_member(&auth, &account(name)?).await?;
            println!("{} unregistered", name);
        }
        Commands::Show => {
            let snapshot = service.snapshot().await;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_operation() {
        let op = parse_operation("token::transfer").unwrap();
        assert_eq!(op, Operation::new("token", "transfer", Vec::new()));

        let op = parse_operation("token::transfer=0a0b").unwrap();
        assert_eq!(op.payload, vec![0x0a, 0x0b]);

        assert!(parse_operation("token").is_err());
        assert!(parse_operation("::transfer").is_err());
        assert!(parse_operation("token::transfer=zz").is_err());
    }

    #[test]
    fn test_parse_expiration() {
        assert_eq!(parse_expiration(None, 3600, 1_000).unwrap(), 4_600);
        assert_eq!(
            parse_expiration(Some("2024-01-01T00:00:00Z"), 0, 0).unwrap(),
            1_704_067_200
        );
        assert!(parse_expiration(Some("tomorrow"), 0, 0).is_err());
        assert!(parse_expiration(Some("1969-12-31T23:59:59Z"), 0, 0).is_err());
    }

    #[test]
    fn test_cli_parses_negative_threshold() {
        let cli = Cli::try_parse_from(["covenant", "--signer", "group", "threshold", "frozen", "-1"]).unwrap();
        match cli.command {
            Commands::Threshold { name, value, delete } => {
                assert_eq!(name, "frozen");
                assert_eq!(value, -1);
                assert!(!delete);
            }
            _ => panic!("expected threshold command"),
        }
        assert_eq!(cli.signers, vec!["group".to_string()]);
    }
}
