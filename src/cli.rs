//! Minimal CLI parsing for the custodian entry points
//!
//! The binary is a thin front door: subcommands map one-to-one onto the
//! service operations, and every business rule lives behind them.

use std::env;

use crate::services::scanner::ScanKind;

/// Parsed invocation
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Scan one or more logical roots
    Scan { kind: ScanKind, roots: Vec<String> },
    /// Rebuild duplicate groups
    Duplicates { threshold: Option<f64> },
    /// Stage an asset for deletion
    Stage {
        asset_id: i64,
        reason: String,
        group_id: Option<i64>,
        better_asset_id: Option<i64>,
    },
    /// Approve (permanently delete) a staged artifact
    Approve { pending_id: i64, approver: String },
    /// Return a staged artifact to its original location
    Restore { pending_id: i64 },
    /// Purge approved pending deletions past the retention window
    Cleanup { age_days: Option<i64> },
    /// List duplicate groups and their ranked members
    Groups,
    /// List live pending deletions
    Pending,
    /// Show the archive-operation log for an asset
    History { asset_id: i64 },
}

pub const USAGE: &str = "usage: mediavault <command>
  scan [--incremental] <root>...
  duplicates [--threshold N]
  stage <asset-id> <reason> [--group N] [--better N]
  approve <pending-id> <approver>
  restore <pending-id>
  cleanup [--age-days N]
  groups
  pending
  history <asset-id>";

impl Command {
    pub fn from_args() -> Result<Self, String> {
        Self::parse(env::args().skip(1))
    }

    pub fn parse(args: impl IntoIterator<Item = String>) -> Result<Self, String> {
        let mut args = args.into_iter();
        let command = args.next().ok_or_else(|| USAGE.to_string())?;

        match command.as_str() {
            "scan" => {
                let mut kind = ScanKind::Full;
                let mut roots = Vec::new();
                for arg in args {
                    match arg.as_str() {
                        "--incremental" => kind = ScanKind::Incremental,
                        "--full" => kind = ScanKind::Full,
                        _ => roots.push(arg),
                    }
                }
                if roots.is_empty() {
                    return Err("scan requires at least one root".to_string());
                }
                Ok(Command::Scan { kind, roots })
            }
            "duplicates" => {
                let mut threshold = None;
                let mut args = args.peekable();
                while let Some(arg) = args.next() {
                    match arg.as_str() {
                        "--threshold" => {
                            let value = args
                                .next()
                                .ok_or_else(|| "--threshold requires a value".to_string())?;
                            threshold = Some(
                                value
                                    .parse()
                                    .map_err(|_| format!("invalid threshold '{}'", value))?,
                            );
                        }
                        other => return Err(format!("unknown argument '{}'", other)),
                    }
                }
                Ok(Command::Duplicates { threshold })
            }
            "stage" => {
                let mut positional = Vec::new();
                let mut group_id = None;
                let mut better_asset_id = None;
                let mut args = args.peekable();
                while let Some(arg) = args.next() {
                    match arg.as_str() {
                        "--group" => {
                            let value =
                                args.next().ok_or_else(|| "--group requires a value".to_string())?;
                            group_id =
                                Some(value.parse().map_err(|_| format!("invalid id '{}'", value))?);
                        }
                        "--better" => {
                            let value = args
                                .next()
                                .ok_or_else(|| "--better requires a value".to_string())?;
                            better_asset_id =
                                Some(value.parse().map_err(|_| format!("invalid id '{}'", value))?);
                        }
                        _ => positional.push(arg),
                    }
                }
                if positional.len() != 2 {
                    return Err("stage requires <asset-id> and <reason>".to_string());
                }
                let asset_id = positional[0]
                    .parse()
                    .map_err(|_| format!("invalid asset id '{}'", positional[0]))?;
                Ok(Command::Stage {
                    asset_id,
                    reason: positional[1].clone(),
                    group_id,
                    better_asset_id,
                })
            }
            "approve" => {
                let positional: Vec<String> = args.collect();
                if positional.len() != 2 {
                    return Err("approve requires <pending-id> and <approver>".to_string());
                }
                let pending_id = positional[0]
                    .parse()
                    .map_err(|_| format!("invalid pending id '{}'", positional[0]))?;
                Ok(Command::Approve {
                    pending_id,
                    approver: positional[1].clone(),
                })
            }
            "restore" => {
                let positional: Vec<String> = args.collect();
                if positional.len() != 1 {
                    return Err("restore requires <pending-id>".to_string());
                }
                let pending_id = positional[0]
                    .parse()
                    .map_err(|_| format!("invalid pending id '{}'", positional[0]))?;
                Ok(Command::Restore { pending_id })
            }
            "cleanup" => {
                let mut age_days = None;
                let mut args = args.peekable();
                while let Some(arg) = args.next() {
                    match arg.as_str() {
                        "--age-days" => {
                            let value = args
                                .next()
                                .ok_or_else(|| "--age-days requires a value".to_string())?;
                            age_days = Some(
                                value
                                    .parse()
                                    .map_err(|_| format!("invalid age '{}'", value))?,
                            );
                        }
                        other => return Err(format!("unknown argument '{}'", other)),
                    }
                }
                Ok(Command::Cleanup { age_days })
            }
            "groups" => Ok(Command::Groups),
            "pending" => Ok(Command::Pending),
            "history" => {
                let positional: Vec<String> = args.collect();
                if positional.len() != 1 {
                    return Err("history requires <asset-id>".to_string());
                }
                let asset_id = positional[0]
                    .parse()
                    .map_err(|_| format!("invalid asset id '{}'", positional[0]))?;
                Ok(Command::History { asset_id })
            }
            other => Err(format!("unknown command '{}'\n{}", other, USAGE)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Command, String> {
        Command::parse(args.iter().map(|s| s.to_string()))
    }

    #[test]
    fn test_parse_scan() {
        let command = parse(&["scan", "/library/movies", "/library/tv"]).unwrap();
        assert_eq!(
            command,
            Command::Scan {
                kind: ScanKind::Full,
                roots: vec!["/library/movies".to_string(), "/library/tv".to_string()],
            }
        );
    }

    #[test]
    fn test_parse_incremental_scan() {
        let command = parse(&["scan", "--incremental", "/library"]).unwrap();
        assert_eq!(
            command,
            Command::Scan {
                kind: ScanKind::Incremental,
                roots: vec!["/library".to_string()],
            }
        );
    }

    #[test]
    fn test_parse_scan_requires_roots() {
        assert!(parse(&["scan"]).is_err());
    }

    #[test]
    fn test_parse_duplicates_with_threshold() {
        let command = parse(&["duplicates", "--threshold", "90"]).unwrap();
        assert_eq!(command, Command::Duplicates { threshold: Some(90.0) });
    }

    #[test]
    fn test_parse_stage_with_flags() {
        let command =
            parse(&["stage", "42", "duplicate cleanup", "--group", "7", "--better", "41"]).unwrap();
        assert_eq!(
            command,
            Command::Stage {
                asset_id: 42,
                reason: "duplicate cleanup".to_string(),
                group_id: Some(7),
                better_asset_id: Some(41),
            }
        );
    }

    #[test]
    fn test_parse_approve() {
        let command = parse(&["approve", "9", "ops@nas"]).unwrap();
        assert_eq!(
            command,
            Command::Approve {
                pending_id: 9,
                approver: "ops@nas".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_restore() {
        assert_eq!(parse(&["restore", "3"]).unwrap(), Command::Restore { pending_id: 3 });
    }

    #[test]
    fn test_parse_cleanup_default_age() {
        assert_eq!(parse(&["cleanup"]).unwrap(), Command::Cleanup { age_days: None });
    }

    #[test]
    fn test_parse_inspection_commands() {
        assert_eq!(parse(&["groups"]).unwrap(), Command::Groups);
        assert_eq!(parse(&["pending"]).unwrap(), Command::Pending);
        assert_eq!(parse(&["history", "12"]).unwrap(), Command::History { asset_id: 12 });
        assert!(parse(&["history"]).is_err());
    }

    #[test]
    fn test_unknown_command_is_error() {
        assert!(parse(&["transcode"]).is_err());
    }
}
