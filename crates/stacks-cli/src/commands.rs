use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use colored::Colorize;
use serde::Serialize;
use stacks_catalog::Catalog;
use stacks_circulation::{
    fine, AuditReport, CirculationConfig, ReconcileReport, Reconciler, TransactionEngine,
};
use stacks_store::InMemoryRecordStore;
use stacks_types::{BookId, Clock, MemberId, SystemClock, Transaction, TransactionId};

use crate::cli::*;

pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = match &cli.config {
        Some(path) => CirculationConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => CirculationConfig::default(),
    };
    let format = cli.format;

    if let Command::ShowConfig = cli.command {
        return cmd_show_config(&config, format);
    }

    let session = Session::open(&cli.data, config)?;
    match cli.command {
        Command::Reconcile(args) => cmd_reconcile(&session, args, format).await,
        Command::Audit => cmd_audit(&session, format).await,
        Command::Overdue => cmd_overdue(&session, format).await,
        Command::Fine(args) => cmd_fine(&session, args, format).await,
        Command::Checkout(args) => cmd_checkout(&session, args, format).await,
        Command::Return(args) => cmd_return(&session, args, format).await,
        Command::Lost(args) => cmd_lost(&session, args, format).await,
        Command::Pay(args) => cmd_pay(&session, args, format).await,
        Command::ShowConfig => Ok(()),
    }
}

/// A snapshot loaded into memory, with the services that operate on it.
struct Session {
    path: PathBuf,
    store: Arc<InMemoryRecordStore>,
    engine: TransactionEngine,
    reconciler: Reconciler,
}

impl Session {
    fn open(path: &Path, config: CirculationConfig) -> anyhow::Result<Self> {
        Self::open_with_clock(path, config, Arc::new(SystemClock))
    }

    fn open_with_clock(
        path: &Path,
        config: CirculationConfig,
        clock: Arc<dyn Clock>,
    ) -> anyhow::Result<Self> {
        let store = Arc::new(
            InMemoryRecordStore::load_json(path, clock.clone())
                .with_context(|| format!("loading snapshot {}", path.display()))?,
        );
        let catalog = Catalog::new(store.clone(), clock);
        Ok(Self {
            path: path.to_path_buf(),
            engine: TransactionEngine::new(catalog, config)?,
            reconciler: Reconciler::new(store.clone()),
            store,
        })
    }

    fn save(&self) -> anyhow::Result<()> {
        self.store
            .save_json(&self.path)
            .with_context(|| format!("saving snapshot {}", self.path.display()))
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn cmd_reconcile(
    session: &Session,
    args: ReconcileArgs,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let report = session.reconciler.reconcile().await?;
    if !args.dry_run && !report.repaired.is_empty() {
        session.save()?;
    }
    if format == OutputFormat::Json {
        return print_json(&report);
    }
    print_reconcile(&report, args.dry_run);
    Ok(())
}

fn print_reconcile(report: &ReconcileReport, dry_run: bool) {
    let verb = if dry_run { "would repair" } else { "repaired" };
    if report.is_noop() {
        println!(
            "{} {} transactions scanned, all counters settled",
            "✓".green().bold(),
            report.scanned
        );
        return;
    }
    for id in &report.repaired {
        println!("  {} {}", format!("{verb}:").green(), id.as_str().yellow());
    }
    for (id, reason) in &report.skipped {
        println!("  {} {} ({})", "skipped:".red(), id.as_str().yellow(), reason.dimmed());
    }
    println!(
        "{} scanned, {} {verb}, {} skipped",
        report.scanned,
        report.repaired.len().to_string().bold(),
        report.skipped.len().to_string().bold()
    );
}

async fn cmd_audit(session: &Session, format: OutputFormat) -> anyhow::Result<()> {
    let report = session.reconciler.audit().await?;
    if format == OutputFormat::Json {
        return print_json(&report);
    }
    print_audit(&report);
    Ok(())
}

fn print_audit(report: &AuditReport) {
    println!(
        "Checked {} books, {} members, {} transactions",
        report.books_checked, report.members_checked, report.transactions_checked
    );
    if report.is_clean() {
        println!("{} No issues.", "✓".green().bold());
        return;
    }
    for v in &report.violations {
        println!(
            "  {} {}/{}: {}",
            v.kind.as_str().red(),
            v.collection,
            v.key.yellow(),
            v.description
        );
    }
    println!("{} {} violation(s)", "✗".red().bold(), report.violations.len());
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OverdueRow {
    id: TransactionId,
    book_id: BookId,
    member_id: MemberId,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    due_date: DateTime<Utc>,
    days_overdue: i64,
    fine: i64,
}

/// Overdue loans priced at the session clock's "now", the same instant the
/// engine used to select them.
async fn overdue_rows(session: &Session) -> anyhow::Result<Vec<OverdueRow>> {
    let now = session.engine.catalog().clock().now();
    let config = session.engine.config();
    let overdue = session.engine.get_overdue_transactions().await?;
    Ok(overdue
        .into_iter()
        .map(|tx| OverdueRow {
            days_overdue: fine::days_overdue(tx.due_date, now),
            fine: fine::overdue_fine(config, tx.due_date, now),
            id: tx.id,
            book_id: tx.book_id,
            member_id: tx.member_id,
            due_date: tx.due_date,
        })
        .collect())
}

async fn cmd_overdue(session: &Session, format: OutputFormat) -> anyhow::Result<()> {
    let rows = overdue_rows(session).await?;
    if format == OutputFormat::Json {
        return print_json(&rows);
    }
    if rows.is_empty() {
        println!("No overdue loans.");
        return Ok(());
    }
    for row in &rows {
        println!(
            "{}  book {}  member {}  due {}  {} day(s) late  fine {}",
            row.id.short_id().yellow().bold(),
            row.book_id.short_id(),
            row.member_id.short_id(),
            row.due_date.format("%Y-%m-%d"),
            row.days_overdue.to_string().red(),
            row.fine.to_string().bold()
        );
    }
    Ok(())
}

async fn cmd_fine(session: &Session, args: FineArgs, format: OutputFormat) -> anyhow::Result<()> {
    let id = TransactionId::parse(args.transaction)?;
    let tx = session.engine.get_transaction(&id).await?;
    let amount = session.engine.calculate_fine(&id).await?;
    if format == OutputFormat::Json {
        return print_json(&serde_json::json!({
            "id": id,
            "status": tx.status,
            "overdue": session.engine.is_overdue(&tx),
            "fine": amount,
        }));
    }
    let state = if session.engine.is_overdue(&tx) {
        "overdue".red().to_string()
    } else {
        tx.status.to_string()
    };
    println!("Transaction {} ({state}): fine {}", id.as_str().yellow(), amount.to_string().bold());
    Ok(())
}

async fn cmd_checkout(
    session: &Session,
    args: CheckoutArgs,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let book = BookId::parse(args.book)?;
    let member = MemberId::parse(args.member)?;
    let result = session.engine.checkout(&book, &member).await;
    // A partial commit still wrote the transaction record.
    session.save()?;
    let id = result?;
    let tx = session.engine.get_transaction(&id).await?;
    if format == OutputFormat::Json {
        return print_json(&tx);
    }
    println!("{} Checked out as {}", "✓".green().bold(), id.as_str().yellow());
    println!("  Due: {}", tx.due_date.format("%Y-%m-%d %H:%M UTC"));
    Ok(())
}

async fn cmd_return(
    session: &Session,
    args: TransactionArgs,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let id = TransactionId::parse(args.transaction)?;
    let result = session.engine.return_book(&id).await;
    session.save()?;
    let fine = result?;
    if format == OutputFormat::Json {
        return print_json(&serde_json::json!({ "id": id, "fine": fine }));
    }
    println!("{} Returned {}", "✓".green().bold(), id.as_str().yellow());
    if fine > 0 {
        println!("  Fine charged: {}", fine.to_string().red().bold());
    }
    Ok(())
}

async fn cmd_lost(
    session: &Session,
    args: TransactionArgs,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let id = TransactionId::parse(args.transaction)?;
    let result = session.engine.report_lost(&id).await;
    session.save()?;
    let fine = result?;
    if format == OutputFormat::Json {
        return print_json(&serde_json::json!({ "id": id, "fine": fine }));
    }
    println!("{} Reported {} lost", "✓".green().bold(), id.as_str().yellow());
    println!("  Fine charged: {}", fine.to_string().red().bold());
    Ok(())
}

async fn cmd_pay(session: &Session, args: PayArgs, format: OutputFormat) -> anyhow::Result<()> {
    let member = MemberId::parse(args.member)?;
    let remaining = session.engine.pay_fines(&member, args.amount).await?;
    session.save()?;
    if format == OutputFormat::Json {
        return print_json(&serde_json::json!({ "memberId": member, "remaining": remaining }));
    }
    println!(
        "{} Payment recorded for {}; remaining balance {}",
        "✓".green().bold(),
        member.as_str().yellow(),
        remaining.to_string().bold()
    );
    Ok(())
}

fn cmd_show_config(config: &CirculationConfig, format: OutputFormat) -> anyhow::Result<()> {
    if format == OutputFormat::Json {
        return print_json(config);
    }
    print!("{}", config.to_toml_string()?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use stacks_store::RecordStore;

    fn write_snapshot(dir: &Path) -> PathBuf {
        let path = dir.join("library.json");
        let far_future = 4_102_444_800_000_i64; // 2100-01-01
        let snapshot = json!({
            "library": {
                "books": {
                    "b1": {
                        "title": "Kindred", "author": "Octavia E. Butler", "isbn": "9780807083697",
                        "publicationYear": 1979, "copies": 2, "availableCopies": 2, "status": "available"
                    }
                },
                "members": {
                    "m1": {
                        "name": "Dana", "email": "dana@example.org", "memberType": "student",
                        "status": "active", "expiryDate": far_future,
                        "totalBooksCheckedOut": 0, "totalFines": 0, "currentFines": 0
                    }
                },
                "transactions": {
                    "t1": {
                        "bookId": "b1", "memberId": "m1",
                        "checkoutDate": 1_700_000_000_000_i64, "dueDate": 1_701_209_600_000_i64,
                        "returnDate": null, "status": "active", "fineAmount": 0,
                        "countersApplied": null
                    }
                }
            }
        });
        std::fs::write(&path, serde_json::to_vec_pretty(&snapshot).unwrap()).unwrap();
        path
    }

    #[tokio::test]
    async fn reconcile_saves_repairs_unless_dry_run() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_snapshot(dir.path());

        let session = Session::open(&path, CirculationConfig::default()).unwrap();
        cmd_reconcile(&session, ReconcileArgs { dry_run: true }, OutputFormat::Text)
            .await
            .unwrap();
        let reread = Session::open(&path, CirculationConfig::default()).unwrap();
        assert_eq!(reread.reconciler.audit().await.unwrap().violations.len(), 1);

        cmd_reconcile(&reread, ReconcileArgs { dry_run: false }, OutputFormat::Json)
            .await
            .unwrap();
        let repaired = Session::open(&path, CirculationConfig::default()).unwrap();
        assert!(repaired.reconciler.audit().await.unwrap().is_clean());
        let book = repaired
            .store
            .get(stacks_store::Collection::Books, "b1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(book["availableCopies"], json!(1));
    }

    #[tokio::test]
    async fn overdue_and_fine_read_without_writing() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_snapshot(dir.path());
        let before = std::fs::read(&path).unwrap();

        let session = Session::open(&path, CirculationConfig::default()).unwrap();
        cmd_overdue(&session, OutputFormat::Json).await.unwrap();
        cmd_fine(&session, FineArgs { transaction: "t1".into() }, OutputFormat::Text)
            .await
            .unwrap();
        assert_eq!(session.engine.calculate_fine(&TransactionId::from("t1")).await.unwrap(), 500);
        assert_eq!(std::fs::read(&path).unwrap(), before);
    }

    #[tokio::test]
    async fn overdue_rows_use_the_session_clock() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_snapshot(dir.path());
        let due = DateTime::from_timestamp_millis(1_701_209_600_000).unwrap();
        let clock = Arc::new(stacks_types::ManualClock::new(due + chrono::Duration::days(20)));

        let session =
            Session::open_with_clock(&path, CirculationConfig::default(), clock.clone()).unwrap();
        let rows = overdue_rows(&session).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!((rows[0].days_overdue, rows[0].fine), (20, 100));
        assert_eq!(
            session.engine.calculate_fine(&TransactionId::from("t1")).await.unwrap(),
            rows[0].fine
        );

        clock.advance(chrono::Duration::days(-20));
        assert!(overdue_rows(&session).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_snapshot_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = Session::open(&dir.path().join("nope.json"), CirculationConfig::default())
            .err()
            .unwrap();
        assert!(err.to_string().contains("loading snapshot"));
    }

    #[test]
    fn show_config_prints_defaults() {
        cmd_show_config(&CirculationConfig::default(), OutputFormat::Text).unwrap();
        cmd_show_config(&CirculationConfig::default(), OutputFormat::Json).unwrap();
    }
}
