use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "kiosk",
    about = "Kiosk: entitlement ledger and receipt reconciliation",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Configuration file
    #[arg(short, long, global = true, default_value = "kiosk.toml")]
    pub config: PathBuf,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Print ledger entries
    Show(ShowArgs),
    /// Verify the local receipt and reconcile it into the ledger
    Verify(VerifyArgs),
    /// Apply a completed purchase through the transaction state machine
    Grant(GrantArgs),
    /// Spend consumable credits
    Consume(ConsumeArgs),
    /// List subscriptions past their expiry
    Expired,
}

impl Command {
    /// Subcommand name as typed on the command line.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Show(_) => "show",
            Self::Verify(_) => "verify",
            Self::Grant(_) => "grant",
            Self::Consume(_) => "consume",
            Self::Expired => "expired",
        }
    }
}

#[derive(Args)]
pub struct ShowArgs {
    /// Only this key
    pub key: Option<String>,
}

#[derive(Args)]
pub struct VerifyArgs {
    /// Retry against sandbox when production reports a test receipt
    #[arg(long)]
    pub fallback: bool,
}

#[derive(Args)]
pub struct GrantArgs {
    pub product: String,
    /// Deliver as a restored rather than a purchased transaction
    #[arg(long)]
    pub restore: bool,
}

#[derive(Args)]
pub struct ConsumeArgs {
    pub key: String,
    pub amount: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_consume_with_globals() {
        let cli = Cli::parse_from(["kiosk", "--format", "json", "consume", "coins", "3", "-c", "app.toml"]);
        assert_eq!(cli.format, OutputFormat::Json);
        assert_eq!(cli.config, PathBuf::from("app.toml"));
        match cli.command {
            Command::Consume(args) => {
                assert_eq!(args.key, "coins");
                assert_eq!(args.amount, 3);
            }
            _ => panic!("expected consume"),
        }
    }

    #[test]
    fn config_defaults_to_kiosk_toml() {
        let cli = Cli::parse_from(["kiosk", "expired"]);
        assert_eq!(cli.config, PathBuf::from("kiosk.toml"));
        assert!(!cli.verbose);
    }

    #[test]
    fn command_names_match_subcommands() {
        for name in ["show", "verify", "grant", "consume", "expired"] {
            let args = match name {
                "grant" => vec!["kiosk", "grant", "pro.unlock"],
                "consume" => vec!["kiosk", "consume", "coins", "1"],
                _ => vec!["kiosk", name],
            };
            assert_eq!(Cli::parse_from(args).command.name(), name);
        }
    }
}
