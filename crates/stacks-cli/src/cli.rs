use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "stacks",
    about = "Stacks: library circulation maintenance over JSON snapshots",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Snapshot file (`{"library": {...}}`) to operate on
    #[arg(short, long, global = true, default_value = "library.json")]
    pub data: PathBuf,

    /// Circulation policy (TOML); defaults apply when omitted
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

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
    /// Apply counter effects left behind by partial commits
    Reconcile(ReconcileArgs),
    /// Check stored counters against their invariants (read-only)
    Audit,
    /// List active loans past their due date
    Overdue,
    /// Show the fine for a transaction
    Fine(FineArgs),
    /// Lend a book to a member
    Checkout(CheckoutArgs),
    /// Return a loaned book
    Return(TransactionArgs),
    /// Report a loaned book as lost
    Lost(TransactionArgs),
    /// Pay down a member's fines
    Pay(PayArgs),
    /// Print the effective circulation policy
    ShowConfig,
}

#[derive(Args)]
pub struct ReconcileArgs {
    /// Report what would be repaired without saving the snapshot
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Args)]
pub struct FineArgs {
    pub transaction: String,
}

#[derive(Args)]
pub struct CheckoutArgs {
    pub book: String,
    pub member: String,
}

#[derive(Args)]
pub struct TransactionArgs {
    pub transaction: String,
}

#[derive(Args)]
pub struct PayArgs {
    pub member: String,
    pub amount: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_audit_defaults() {
        let cli = Cli::try_parse_from(["stacks", "audit"]).unwrap();
        assert!(matches!(cli.command, Command::Audit));
        assert_eq!(cli.data, PathBuf::from("library.json"));
        assert_eq!(cli.format, OutputFormat::Text);
        assert!(cli.config.is_none());
    }

    #[test]
    fn parse_reconcile_dry_run() {
        let cli = Cli::try_parse_from(["stacks", "reconcile", "--dry-run", "-d", "snap.json"]).unwrap();
        if let Command::Reconcile(args) = cli.command {
            assert!(args.dry_run);
        } else { panic!("wrong command"); }
        assert_eq!(cli.data, PathBuf::from("snap.json"));
    }

    #[test]
    fn parse_fine_json() {
        let cli = Cli::try_parse_from(["stacks", "fine", "t1", "--format", "json"]).unwrap();
        if let Command::Fine(args) = cli.command {
            assert_eq!(args.transaction, "t1");
        } else { panic!("wrong command"); }
        assert_eq!(cli.format, OutputFormat::Json);
    }

    #[test]
    fn parse_checkout() {
        let cli = Cli::try_parse_from(["stacks", "checkout", "b1", "m1"]).unwrap();
        if let Command::Checkout(args) = cli.command {
            assert_eq!((args.book.as_str(), args.member.as_str()), ("b1", "m1"));
        } else { panic!("wrong command"); }
    }

    #[test]
    fn parse_pay_with_config() {
        let cli = Cli::try_parse_from(["stacks", "pay", "m1", "40", "-c", "policy.toml"]).unwrap();
        if let Command::Pay(args) = cli.command {
            assert_eq!(args.amount, 40);
        } else { panic!("wrong command"); }
        assert_eq!(cli.config, Some(PathBuf::from("policy.toml")));
    }

    #[test]
    fn parse_show_config() {
        let cli = Cli::try_parse_from(["stacks", "show-config"]).unwrap();
        assert!(matches!(cli.command, Command::ShowConfig));
    }

    #[test]
    fn pay_requires_amount() {
        assert!(Cli::try_parse_from(["stacks", "pay", "m1"]).is_err());
    }
}
