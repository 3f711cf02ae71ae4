//! MediaVault - media-library custodian for NAS hosts
//!
//! Discovers video assets on mounted shares, extracts technical metadata,
//! fingerprints content, groups likely duplicates, and stages lower-quality
//! copies in a holding area pending human approval. Nothing is ever deleted
//! without an explicit approver.

mod cli;
mod config;
mod db;
mod error;
mod services;

use std::process::ExitCode;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::Command;
use crate::config::Config;
use crate::db::Database;
use crate::error::VaultError;
use crate::services::{
    DuplicateEngine, FfprobeService, PathResolver, ScannerConfig, ScannerService, StagingService,
};

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mediavault=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let command = match Command::from_args() {
        Ok(command) => command,
        Err(message) => {
            eprintln!("{}", message);
            return ExitCode::from(64);
        }
    };

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {:#}", e);
            return ExitCode::from(78);
        }
    };

    match run(command, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::from(exit_code_for(&e))
        }
    }
}

async fn run(command: Command, config: Config) -> Result<(), VaultError> {
    let db = Database::connect(&config.database_url)
        .await
        .map_err(|e| VaultError::Dependency(format!("catalog unreachable: {}", e)))?;
    db.migrate()
        .await
        .map_err(|e| VaultError::Dependency(format!("migration failed: {}", e)))?;

    let resolver = PathResolver::from_config(&config);

    match command {
        Command::Scan { kind, roots } => {
            let probe = FfprobeService::new(config.probe_timeout_seconds);
            let scanner = std::sync::Arc::new(ScannerService::new(
                db.clone(),
                resolver,
                probe,
                ScannerConfig::from_config(&config),
            ));

            // Ctrl-C cancels cooperatively: in-flight files finish, the run
            // is marked failed with reason "cancelled"
            let cancel_target = scanner.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    eprintln!("cancellation requested, finishing in-flight files...");
                    cancel_target.request_cancel();
                }
            });

            let mut progress = scanner.subscribe();
            tokio::spawn(async move {
                while let Ok(event) = progress.recv().await {
                    if !event.is_complete {
                        eprintln!(
                            "scanned {}/{} (new {} updated {} errors {})",
                            event.files_processed,
                            event.files_found,
                            event.files_new,
                            event.files_updated,
                            event.errors
                        );
                    }
                }
            });

            let run = scanner.run_scan(kind, &roots).await?;
            println!(
                "scan {} over [{}] {}: found {} new {} updated {} unchanged {} deleted {} errors {}",
                run.id,
                run.root_list().join(", "),
                run.status,
                run.files_found,
                run.files_new,
                run.files_updated,
                run.files_unchanged,
                run.files_deleted,
                run.errors_count
            );
            for detail in run.error_detail_list().iter().take(10) {
                eprintln!("  {} [{}]: {}", detail.path, detail.kind, detail.message);
            }
        }
        Command::Duplicates { threshold } => {
            let engine = DuplicateEngine::new(db.clone(), config.fuzzy_similarity_threshold);
            if let Some(threshold) = threshold {
                engine.set_similarity_threshold(threshold);
            }

            let report = engine.rebuild_duplicates().await?;
            println!(
                "duplicates: {} groups ({} exact, {} fuzzy), {} members, {} removed",
                report.groups_total,
                report.exact_groups,
                report.fuzzy_groups,
                report.members_total,
                report.groups_removed
            );
        }
        Command::Stage {
            asset_id,
            reason,
            group_id,
            better_asset_id,
        } => {
            let staging = StagingService::new(db.clone(), resolver);
            let pending = staging.stage(asset_id, &reason, group_id, better_asset_id).await?;
            println!(
                "staged asset {} as pending {} (staged_path: {})",
                asset_id,
                pending.id,
                pending.staged_path.as_deref().unwrap_or("<source missing>")
            );
        }
        Command::Approve {
            pending_id,
            approver,
        } => {
            let staging = StagingService::new(db.clone(), resolver);
            let pending = staging.approve(pending_id, &approver).await?;
            println!("approved pending {} (asset {})", pending.id, pending.asset_id);
        }
        Command::Restore { pending_id } => {
            let staging = StagingService::new(db.clone(), resolver);
            let asset_id = staging.restore(pending_id).await?;
            println!("restored asset {}", asset_id);
        }
        Command::Cleanup { age_days } => {
            let staging = StagingService::new(db.clone(), resolver);
            let age = age_days.unwrap_or(config.pending_deletion_retention_days);
            let report = staging.cleanup(age).await?;
            println!(
                "cleanup: examined {} purged {} failed {}",
                report.examined, report.purged, report.failed
            );
        }
        Command::Groups => {
            let repo = db.duplicates();
            for group in repo.list_groups().await? {
                println!(
                    "group {} [{} {:.0}%] {} -> {}",
                    group.id,
                    group.kind,
                    group.confidence,
                    group.title.as_deref().unwrap_or("<untitled>"),
                    group.recommended_action
                );
                for member in repo.members_for_group(group.id).await? {
                    println!(
                        "  #{} asset {} {} ({})",
                        member.rank,
                        member.asset_id,
                        member.recommended_action,
                        member.action_reason.as_deref().unwrap_or("")
                    );
                }
            }
        }
        Command::Pending => {
            for row in db.pending_deletions().list_live().await? {
                println!(
                    "pending {} asset {} staged {} approved {} ({})",
                    row.id,
                    row.asset_id,
                    row.staged_at.format("%Y-%m-%d"),
                    row.approved,
                    row.staged_path.as_deref().unwrap_or("<source missing>")
                );
            }
        }
        Command::History { asset_id } => {
            for op in db.archive_operations().list_for_asset(asset_id).await? {
                println!(
                    "{} {} {} {} -> {}{}",
                    op.performed_at.format("%Y-%m-%d %H:%M:%S"),
                    op.kind,
                    if op.success { "ok" } else { "FAILED" },
                    op.source_path.as_deref().unwrap_or("-"),
                    op.destination_path.as_deref().unwrap_or("-"),
                    op.error_message
                        .as_deref()
                        .map(|e| format!(" ({})", e))
                        .unwrap_or_default()
                );
            }
        }
    }

    Ok(())
}

fn exit_code_for(err: &VaultError) -> u8 {
    match err {
        VaultError::NotFound(_) => 2,
        VaultError::InvalidState(_) => 3,
        VaultError::Conflict(_) => 4,
        VaultError::ProbeFailed { .. } => 5,
        VaultError::Io { .. } => 5,
        VaultError::Dependency(_) => 6,
        VaultError::Cancelled => 7,
    }
}
