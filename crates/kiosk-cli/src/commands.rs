use anyhow::Context;
use chrono::DateTime;
use colored::Colorize;
use kiosk_reconcile::expired_keys;
use kiosk_sdk::{
    EntitlementValue, EventFilter, EventKind, Kiosk, KioskConfig, QueueEvent, ReconcileOutcome,
    StoreEvent, TransactionState, TransactionUpdate,
};
use kiosk_types::{Clock, SystemClock};
use serde_json::json;
use tracing::{debug, info};
use uuid::Uuid;

use crate::cli::*;

pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    let mut config = KioskConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if let Command::Verify(ref args) = cli.command {
        config.sandbox_fallback |= args.fallback;
    }
    debug!(
        config = %cli.config.display(),
        ledger = %config.ledger_path.display(),
        environment = %config.environment,
        "configuration loaded"
    );
    let kiosk = Kiosk::open(config)?;
    info!(command = cli.command.name(), "running command");

    match cli.command {
        Command::Show(args) => cmd_show(&kiosk, args, cli.format),
        Command::Verify(_) => cmd_verify(&kiosk, cli.format).await,
        Command::Grant(args) => cmd_grant(&kiosk, args, cli.format),
        Command::Consume(args) => cmd_consume(&kiosk, args, cli.format),
        Command::Expired => cmd_expired(&kiosk, cli.format),
    }
}

fn cmd_show(kiosk: &Kiosk, args: ShowArgs, format: OutputFormat) -> anyhow::Result<()> {
    let ledger = kiosk.snapshot()?;
    let now = SystemClock.now_secs();
    let entries: Vec<_> = ledger
        .iter()
        .filter(|(key, _)| args.key.as_deref().map_or(true, |k| k == *key))
        .collect();

    if format == OutputFormat::Json {
        let map: serde_json::Map<_, _> = entries
            .iter()
            .map(|(key, value)| Ok((key.to_string(), serde_json::to_value(value)?)))
            .collect::<Result<_, serde_json::Error>>()?;
        println!("{}", serde_json::to_string_pretty(&map)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!("Ledger is empty.");
        return Ok(());
    }
    for (key, value) in entries {
        println!("{:<32} {}", key.bold(), describe(value, now));
    }
    Ok(())
}

async fn cmd_verify(kiosk: &Kiosk, format: OutputFormat) -> anyhow::Result<()> {
    let mut expired = kiosk.subscribe(EventFilter::kinds([EventKind::SubscriptionExpired]));
    let outcome = kiosk.reconcile().await?;
    let mut expired_ids = Vec::new();
    while let Ok(envelope) = expired.try_recv() {
        if let StoreEvent::SubscriptionExpired(id) = envelope.event {
            expired_ids.push(id);
        }
    }

    if format == OutputFormat::Json {
        let mut body = match &outcome {
            ReconcileOutcome::NoReceipt => json!({ "outcome": "no_receipt" }),
            ReconcileOutcome::Merged(report) => json!({
                "outcome": "merged",
                "updated": report.updated,
                "skipped": report.skipped,
                "persisted": report.dirty,
            }),
            ReconcileOutcome::Failed(e) => json!({
                "outcome": "failed",
                "code": e.code(),
                "message": e.message(),
                "retryable": e.is_retryable(),
            }),
            ReconcileOutcome::Cancelled => json!({ "outcome": "cancelled" }),
        };
        body["expired"] = json!(expired_ids);
        println!("{}", serde_json::to_string_pretty(&body)?);
    } else {
        match &outcome {
            ReconcileOutcome::NoReceipt => println!(
                "No receipt at {}; nothing to verify.",
                kiosk.config().receipt_path.display()
            ),
            ReconcileOutcome::Merged(report) => {
                println!(
                    "{} Receipt verified against {}",
                    "✓".green().bold(),
                    kiosk.config().environment.to_string().cyan()
                );
                for id in &report.updated {
                    println!("  {} {}", "updated:".green(), id);
                }
                if report.updated.is_empty() {
                    println!("  Ledger already up to date.");
                }
            }
            ReconcileOutcome::Failed(e) => {
                let hint = if e.is_retryable() { " (retryable)" } else { "" };
                println!("{} {}{}", "✗".red().bold(), e, hint.dimmed());
            }
            ReconcileOutcome::Cancelled => println!("Verification cancelled."),
        }
        for id in &expired_ids {
            println!("  {} {}", "expired:".red(), id);
        }
    }

    if let ReconcileOutcome::Failed(e) = outcome {
        anyhow::bail!("receipt verification failed: {e}");
    }
    Ok(())
}

fn cmd_grant(kiosk: &Kiosk, args: GrantArgs, format: OutputFormat) -> anyhow::Result<()> {
    let mut stream = kiosk.subscribe(EventFilter::product(args.product.clone()));
    let state = if args.restore {
        TransactionState::Restored
    } else {
        TransactionState::Purchased
    };
    let transaction_id = format!("cli-{}", Uuid::now_v7());
    kiosk
        .processor()
        .handle(QueueEvent::Transactions(vec![TransactionUpdate::new(
            transaction_id.clone(),
            args.product.clone(),
            state,
        )]))?;

    let mut failure = None;
    while let Ok(envelope) = stream.try_recv() {
        if let StoreEvent::PurchaseFailed { reason, .. } = envelope.event {
            failure = Some(reason.unwrap_or_else(|| "unknown reason".into()));
        }
    }
    if let Some(reason) = failure {
        anyhow::bail!("grant of {} refused: {reason}", args.product);
    }

    let value = kiosk.snapshot()?.get(&args.product).cloned();
    let credited = kiosk
        .config()
        .consumables
        .get(&args.product)
        .map(|def| (def.credit_key.clone(), def.credit_amount));

    if format == OutputFormat::Json {
        let body = json!({
            "transaction_id": transaction_id,
            "product_id": args.product,
            "state": state,
            "credited": credited.as_ref().map(|(key, amount)| json!({ "key": key, "amount": amount })),
        });
        println!("{}", serde_json::to_string_pretty(&body)?);
        return Ok(());
    }

    match credited {
        Some((key, amount)) => println!(
            "{} Credited {} {} (balance {})",
            "✓".green().bold(),
            amount,
            key.yellow(),
            kiosk.available_credits(&key)?
        ),
        None => println!(
            "{} {} is {}",
            "✓".green().bold(),
            args.product.yellow(),
            value.map_or_else(|| "owned".to_string(), |v| describe(&v, SystemClock.now_secs()))
        ),
    }
    println!("  Transaction: {}", transaction_id.dimmed());
    Ok(())
}

fn cmd_consume(kiosk: &Kiosk, args: ConsumeArgs, format: OutputFormat) -> anyhow::Result<()> {
    let balance = kiosk
        .consume_credits(args.amount, &args.key)
        .with_context(|| format!("consuming {} {}", args.amount, args.key))?;
    if format == OutputFormat::Json {
        println!("{}", json!({ "key": args.key, "consumed": args.amount, "balance": balance }));
    } else {
        println!(
            "{} Consumed {} {}; {} left",
            "✓".green().bold(),
            args.amount,
            args.key.yellow(),
            balance.to_string().bold()
        );
    }
    Ok(())
}

fn cmd_expired(kiosk: &Kiosk, format: OutputFormat) -> anyhow::Result<()> {
    let ledger = kiosk.snapshot()?;
    let now = SystemClock.now_secs();
    let expired = expired_keys(&ledger, now);

    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&expired)?);
        return Ok(());
    }
    if expired.is_empty() {
        println!("No expired subscriptions.");
        return Ok(());
    }
    for key in &expired {
        let expired_at = ledger.expiry(key).map(format_timestamp).unwrap_or_default();
        println!("{:<32} {} {}", key.bold(), "expired".red(), expired_at.dimmed());
    }
    Ok(())
}

fn describe(value: &EntitlementValue, now: u64) -> String {
    match value {
        EntitlementValue::Owned => "owned".green().to_string(),
        EntitlementValue::ExpiringAt(ts) if now > *ts => {
            format!("{} {}", "expired".red(), format_timestamp(*ts))
        }
        EntitlementValue::ExpiringAt(ts) => {
            format!("{} {}", "expires".green(), format_timestamp(*ts))
        }
        EntitlementValue::CreditBalance(n) => format!("{} credits", n.to_string().cyan()),
        EntitlementValue::Metadata(s) => s.dimmed().to_string(),
    }
}

fn format_timestamp(secs: u64) -> String {
    i64::try_from(secs)
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| secs.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_render_in_utc() {
        assert_eq!(format_timestamp(1_700_000_000), "2023-11-14 22:13:20 UTC");
        assert_eq!(format_timestamp(u64::MAX), u64::MAX.to_string());
    }

    #[test]
    fn describe_marks_expired_subscriptions() {
        colored::control::set_override(false);
        assert_eq!(
            describe(&EntitlementValue::ExpiringAt(100), 200),
            "expired 1970-01-01 00:01:40 UTC"
        );
        assert_eq!(describe(&EntitlementValue::CreditBalance(7), 0), "7 credits");
        assert_eq!(describe(&EntitlementValue::Owned, 0), "owned");
    }
}
