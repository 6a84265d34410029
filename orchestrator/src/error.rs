/// Every failure the block orchestrator can surface, one variant per kind.
///
/// `status()` gives the HTTP mapping used by the REST facade; `kind()` gives
/// the stable machine-readable name.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // Not found (404)
    #[error("block not found: {0}")]
    BlockNotFound(String),

    #[error("replica not found: {0}")]
    ReplicaNotFound(String),

    #[error("node not found: {0}")]
    NodeNotFound(String),

    #[error("disk not found: {0}")]
    DiskNotFound(String),

    #[error("pod not found: {0}")]
    PodNotFound(String),

    #[error("no controller pod found for block '{0}'")]
    ControllerNotFound(String),

    #[error("folder not found: {0}")]
    FolderNotFound(String),

    #[error("no storage found on node '{0}'")]
    NodeStorageNotFound(String),

    // Conflict (409)
    #[error("block '{0}' already exists")]
    BlockExists(String),

    #[error("block '{0}' is mounted")]
    BlockMounted(String),

    #[error("block '{0}' is not mounted")]
    BlockNotMounted(String),

    #[error("block '{0}' is already formatted")]
    BlockFormatted(String),

    #[error("block '{0}' is not formatted")]
    BlockNotFormatted(String),

    #[error("block '{0}' already has a controller")]
    ControllerExists(String),

    #[error("controller of block '{0}' is mounted")]
    ControllerMounted(String),

    // Bad request (400)
    #[error("block '{0}' is offline")]
    BlockOffline(String),

    #[error("invalid replica mode: {0}")]
    InvalidMode(String),

    #[error("refusing to remove the last replica of block '{0}' without force")]
    LastReplica(String),

    #[error("invalid user input: {0}")]
    UserInput(String),

    // Precondition (500): control-plane state drift
    #[error("block '{0}' has no controller")]
    NoController(String),

    #[error("pod '{0}' is not running")]
    PodNotRunning(String),

    #[error("replica '{0}' has no endpoint")]
    NoReplicaEndpoint(String),

    // Upstream (500)
    #[error("failed to create pod: {0}")]
    PodCreationError(String),

    #[error("error running add replica command: {0}")]
    AddReplicaError(String),

    #[error("cannot remove last replica while the volume is up: {0}")]
    CannotRemoveLastReplica(String),

    #[error("engine command failed: {0}")]
    EngineCommandFailed(String),

    #[error("entity store error: {0}")]
    Store(String),

    #[error("Kubernetes reported error: {source}")]
    Kube {
        #[from]
        source: kube::Error,
    },

    #[error("Json error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Best-effort wrapper: swallows and logs the failure unless it came from
/// the entity store, which callers must never paper over.
pub fn tolerate<T>(result: Result<T>, context: &str) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_store() => Err(e),
        Err(e) => {
            tracing::warn!("{}: {}", context, e);
            Ok(None)
        }
    }
}

impl Error {
    /// Stable machine-readable kind name.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::BlockNotFound(_) => "BlockNotFound",
            Error::ReplicaNotFound(_) => "ReplicaNotFound",
            Error::NodeNotFound(_) => "NodeNotFound",
            Error::DiskNotFound(_) => "DiskNotFound",
            Error::PodNotFound(_) => "PodNotFound",
            Error::ControllerNotFound(_) => "ControllerNotFound",
            Error::FolderNotFound(_) => "FolderNotFound",
            Error::NodeStorageNotFound(_) => "NodeStorageNotFound",
            Error::BlockExists(_) => "BlockExists",
            Error::BlockMounted(_) => "BlockMounted",
            Error::BlockNotMounted(_) => "BlockNotMounted",
            Error::BlockFormatted(_) => "BlockFormatted",
            Error::BlockNotFormatted(_) => "BlockNotFormatted",
            Error::ControllerExists(_) => "ControllerExists",
            Error::ControllerMounted(_) => "ControllerMounted",
            Error::BlockOffline(_) => "BlockOffline",
            Error::InvalidMode(_) => "InvalidMode",
            Error::LastReplica(_) => "LastReplica",
            Error::UserInput(_) => "UserInput",
            Error::NoController(_) => "NoController",
            Error::PodNotRunning(_) => "PodNotRunning",
            Error::NoReplicaEndpoint(_) => "NoReplicaEndpoint",
            Error::PodCreationError(_) => "PodCreationError",
            Error::AddReplicaError(_) => "AddReplicaError",
            Error::CannotRemoveLastReplica(_) => "CannotRemoveLastReplica",
            Error::EngineCommandFailed(_) => "EngineCommandFailed",
            Error::Store(_) => "Store",
            Error::Kube { .. } => "Orchestrator",
            Error::Json { .. } => "Json",
        }
    }

    /// HTTP status for the REST facade.
    pub fn status(&self) -> u16 {
        match self {
            Error::BlockNotFound(_)
            | Error::ReplicaNotFound(_)
            | Error::NodeNotFound(_)
            | Error::DiskNotFound(_)
            | Error::PodNotFound(_)
            | Error::ControllerNotFound(_)
            | Error::FolderNotFound(_)
            | Error::NodeStorageNotFound(_) => 404,
            Error::BlockExists(_)
            | Error::BlockMounted(_)
            | Error::BlockNotMounted(_)
            | Error::BlockFormatted(_)
            | Error::BlockNotFormatted(_)
            | Error::ControllerExists(_)
            | Error::ControllerMounted(_) => 409,
            Error::BlockOffline(_)
            | Error::InvalidMode(_)
            | Error::LastReplica(_)
            | Error::UserInput(_) => 400,
            _ => 500,
        }
    }

    /// True for entity-store failures, which event handlers must not swallow.
    pub fn is_store(&self) -> bool {
        matches!(self, Error::Store(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_follows_kind_groups() {
        assert_eq!(Error::BlockNotFound("b".into()).status(), 404);
        assert_eq!(Error::BlockExists("b".into()).status(), 409);
        assert_eq!(Error::BlockMounted("b".into()).status(), 409);
        assert_eq!(Error::BlockOffline("b".into()).status(), 400);
        assert_eq!(Error::LastReplica("b".into()).status(), 400);
        assert_eq!(Error::NoController("b".into()).status(), 500);
        assert_eq!(Error::AddReplicaError("x".into()).status(), 500);
        assert_eq!(Error::EngineCommandFailed("x".into()).status(), 500);
    }
}
