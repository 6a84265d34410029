//! Command gateway: issues argv commands inside a block's controller
//! container and parses the engine's stdout. Every parser for the stringly
//! engine output lives here so CLI format drift stays a one-file concern.

use basalt_types::{Block, ReplicaMode};
use serde_json::Value;
use std::str::FromStr;

use crate::{
    core::Core,
    error::{Error, Result},
    substrate::{ExecOutput, PodOrchestrator as _, PodPhase},
};

/// Runs argv inside the controller container of the block.
///
/// Fails `NoController` when the block has no controller handle,
/// `PodNotFound` when the controller pod is gone and `PodNotRunning` when it
/// exists but is not in Running phase.
pub async fn exec(core: &Core, block: &Block, argv: &[String]) -> Result<ExecOutput> {
    if block.controller.is_none() {
        return Err(Error::NoController(block.name.clone()));
    }
    let pod = core
        .pods
        .read_pod(&block.cluster, &block.namespace, &block.name)
        .await?
        .ok_or_else(|| Error::PodNotFound(block.name.clone()))?;
    if pod.phase != PodPhase::Running {
        return Err(Error::PodNotRunning(pod.name));
    }
    core.pods
        .exec(&block.cluster, &block.namespace, &block.name, argv)
        .await
}

/// Convenience for building argv vectors from mixed literals.
pub fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|p| p.to_string()).collect()
}

/// One row of `longhorn ls-replica` output.
#[derive(Clone, Debug, PartialEq)]
pub struct ReplicaRow {
    pub endpoint: String,
    pub mode: Option<ReplicaMode>,
    /// Bracketed trailing snapshot chain, head first.
    pub chain: Vec<String>,
}

/// Parses the `ls-replica` table: header line skipped, each non-empty line
/// split on whitespace; first token endpoint, second mode, a bracketed
/// trailing group the snapshot chain. Tolerates trailing blanks and
/// variable inner spacing.
pub fn parse_replica_table(stdout: &str) -> Vec<ReplicaRow> {
    stdout
        .lines()
        .skip(1)
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| {
            let chain = match (line.find('['), line.rfind(']')) {
                (Some(open), Some(close)) if close > open => line[open + 1..close]
                    .split_whitespace()
                    .map(str::to_string)
                    .collect(),
                _ => Vec::new(),
            };
            let head = match line.find('[') {
                Some(open) => &line[..open],
                None => line,
            };
            let mut tokens = head.split_whitespace();
            let endpoint = tokens.next()?.to_string();
            let mode = tokens.next().and_then(|m| ReplicaMode::from_str(m).ok());
            Some(ReplicaRow {
                endpoint,
                mode,
                chain,
            })
        })
        .collect()
}

/// Parses `snapshots ls`: header line skipped, remaining non-empty lines are
/// snapshot names.
pub fn parse_snapshot_list(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .skip(1)
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parses stdout that is one whole JSON document (`info`, `snapshots info`,
/// `snapshots hash-status`).
pub fn parse_json(stdout: &str) -> Result<Value> {
    Ok(serde_json::from_str(stdout.trim())?)
}

/// Filesystem usage reported by `df`, converted from 1k-blocks to GiB.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct DfUsage {
    pub size_gib: f64,
    pub used_gib: f64,
    pub available_gib: f64,
    pub used_percent: f64,
}

const KB_PER_GIB: f64 = 1024.0 * 1024.0;

/// Parses `df <path>` output: the second line split on whitespace yields the
/// 1k-block total/used/available columns and the use percentage.
pub fn parse_df(stdout: &str) -> Result<DfUsage> {
    let line = stdout
        .lines()
        .nth(1)
        .ok_or_else(|| Error::EngineCommandFailed("df output has no data line".to_string()))?;
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 5 {
        return Err(Error::EngineCommandFailed(format!(
            "unexpected df line: {}",
            line
        )));
    }
    let blocks = |s: &str| -> Result<f64> {
        s.parse::<f64>()
            .map_err(|_| Error::EngineCommandFailed(format!("bad df field: {}", s)))
    };
    Ok(DfUsage {
        size_gib: blocks(fields[1])? / KB_PER_GIB,
        used_gib: blocks(fields[2])? / KB_PER_GIB,
        available_gib: blocks(fields[3])? / KB_PER_GIB,
        used_percent: blocks(fields[4].trim_end_matches('%'))?,
    })
}

/// Parses `du -s <path>`: first line, first whitespace-delimited field in
/// 1k-blocks, converted to GiB.
pub fn parse_du(stdout: &str) -> Result<f64> {
    let field = stdout
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().next())
        .ok_or_else(|| Error::EngineCommandFailed("du output is empty".to_string()))?;
    field
        .parse::<f64>()
        .map(|kb| kb / KB_PER_GIB)
        .map_err(|_| Error::EngineCommandFailed(format!("bad du field: {}", field)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replica_table_rows_with_chain() {
        let out = "ADDRESS MODE CHAIN\n\
                   tcp://10.0.0.11:10000   RW   [volume-head-001.img volume-snap-aa.img]\n\
                   tcp://10.0.0.12:10000 ERR\n\
                   \n";
        let rows = parse_replica_table(out);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].endpoint, "tcp://10.0.0.11:10000");
        assert_eq!(rows[0].mode, Some(ReplicaMode::RW));
        assert_eq!(
            rows[0].chain,
            vec!["volume-head-001.img", "volume-snap-aa.img"]
        );
        assert_eq!(rows[1].mode, Some(ReplicaMode::ERR));
        assert!(rows[1].chain.is_empty());
    }

    #[test]
    fn replica_table_tolerates_unknown_mode() {
        let out = "ADDRESS MODE\ntcp://10.0.0.13:10000 WO\n";
        let rows = parse_replica_table(out);
        assert_eq!(rows[0].mode, None);
    }

    #[test]
    fn snapshot_list_skips_header_and_blanks() {
        let out = "ID\nsnap-1\n  snap-2  \n\n";
        assert_eq!(parse_snapshot_list(out), vec!["snap-1", "snap-2"]);
    }

    #[test]
    fn df_converts_1k_blocks_to_gib() {
        let out = "Filesystem 1K-blocks Used Available Use% Mounted on\n\
                   /dev/longhorn/v1 10485760 1048576 9437184 10% /mnt/block-1\n";
        let usage = parse_df(out).unwrap();
        assert!((usage.size_gib - 10.0).abs() < 1e-9);
        assert!((usage.used_gib - 1.0).abs() < 1e-9);
        assert!((usage.available_gib - 9.0).abs() < 1e-9);
        assert!((usage.used_percent - 10.0).abs() < 1e-9);
    }

    #[test]
    fn df_without_data_line_fails() {
        assert!(parse_df("Filesystem 1K-blocks\n").is_err());
    }

    #[test]
    fn du_reads_first_field_of_first_line() {
        let out = "2097152\t/var/lib/replica\n";
        assert!((parse_du(out).unwrap() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn json_documents_parse_whole() {
        let value = parse_json("{\"frontendState\":\"up\",\"endpoint\":\"/dev/longhorn/v1\"}\n")
            .unwrap();
        assert_eq!(value["frontendState"], "up");
    }
}
