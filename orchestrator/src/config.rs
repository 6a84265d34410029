use serde::{Deserialize, Serialize};

/// Formats a GiB size the way the engine CLI expects it, e.g. `10gb`.
pub fn gb(size: u64) -> String {
    format!("{}gb", size)
}

/// Optional flags forwarded to `longhorn controller`. Flag order on the
/// command line is fixed regardless of how the options were supplied.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ControllerOpts {
    pub upgrade: bool,
    pub disable_rev_counter: bool,
    pub salvage_requested: bool,
    pub unmap_mark_snap_chain_removed: bool,
    pub snapshot_max_count: Option<u32>,
    pub snapshot_max_size: Option<String>,
    pub engine_replica_timeout: Option<u64>,
    pub data_server_protocol: Option<String>,
    pub file_sync_http_client_timeout: Option<u64>,
}

impl ControllerOpts {
    /// Appends the conditional flags in their fixed order.
    pub fn append_flags(&self, argv: &mut Vec<String>) {
        if self.upgrade {
            argv.push("--upgrade".to_string());
        }
        if self.disable_rev_counter {
            argv.push("--disableRevCounter".to_string());
        }
        if self.salvage_requested {
            argv.push("--salvageRequested".to_string());
        }
        if self.unmap_mark_snap_chain_removed {
            argv.push("--unmap-mark-snap-chain-removed".to_string());
        }
        if let Some(count) = self.snapshot_max_count {
            argv.push("--snapshot-max-count".to_string());
            argv.push(count.to_string());
        }
        if let Some(ref size) = self.snapshot_max_size {
            argv.push("--snapshot-max-size".to_string());
            argv.push(size.clone());
        }
        if let Some(timeout) = self.engine_replica_timeout {
            argv.push("--engine-replica-timeout".to_string());
            argv.push(timeout.to_string());
        }
        if let Some(ref protocol) = self.data_server_protocol {
            argv.push("--data-server-protocol".to_string());
            argv.push(protocol.clone());
        }
        if let Some(timeout) = self.file_sync_http_client_timeout {
            argv.push("--file-sync-http-client-timeout".to_string());
            argv.push(timeout.to_string());
        }
    }
}

/// Optional flags forwarded to `longhorn add-replica`.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct AddReplicaOpts {
    pub restore: bool,
    pub fast_sync: bool,
    pub file_sync_http_client_timeout: Option<u64>,
}

impl AddReplicaOpts {
    pub fn append_flags(&self, argv: &mut Vec<String>) {
        if self.restore {
            argv.push("--restore".to_string());
        }
        if self.fast_sync {
            argv.push("--fast-sync".to_string());
        }
        if let Some(timeout) = self.file_sync_http_client_timeout {
            argv.push("--file-sync-http-client-timeout".to_string());
            argv.push(timeout.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_formatting_is_lowercase() {
        assert_eq!(gb(10), "10gb");
        assert_eq!(gb(1024), "1024gb");
    }

    #[test]
    fn controller_flags_keep_fixed_order() {
        let opts = ControllerOpts {
            upgrade: true,
            salvage_requested: true,
            snapshot_max_count: Some(250),
            data_server_protocol: Some("tcp".to_string()),
            ..Default::default()
        };
        let mut argv = Vec::new();
        opts.append_flags(&mut argv);
        assert_eq!(
            argv,
            vec![
                "--upgrade",
                "--salvageRequested",
                "--snapshot-max-count",
                "250",
                "--data-server-protocol",
                "tcp",
            ]
        );
    }

    #[test]
    fn add_replica_flags() {
        let opts = AddReplicaOpts {
            fast_sync: true,
            file_sync_http_client_timeout: Some(30),
            ..Default::default()
        };
        let mut argv = Vec::new();
        opts.append_flags(&mut argv);
        assert_eq!(argv, vec!["--fast-sync", "--file-sync-http-client-timeout", "30"]);
    }
}
