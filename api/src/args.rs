use basalt_types::BlocksConfig;
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "basalt-api")]
#[command(about = "Control plane for replicated block-storage volumes")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the block-storage API server
    Server(ServerArgs),
}

#[derive(Parser, Debug, Clone)]
pub struct ServerArgs {
    /// Port to listen on
    #[arg(long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    /// Cluster name used when addressing node agents
    #[arg(long, env = "CLUSTER", default_value = "default")]
    pub cluster: String,

    /// Path to the node/disk inventory file (JSON)
    #[arg(long, env = "INVENTORY")]
    pub inventory: String,

    /// Allowed CORS origins; requests mirror their origin when none are set
    #[arg(long = "cors-origin", env = "CORS_ORIGINS", value_delimiter = ',')]
    pub cors_origins: Vec<String>,

    /// Desired replica count for new blocks
    #[arg(long, env = "BLOCKS_REPLICA_COUNT", default_value_t = 3)]
    pub replica_count: u32,

    /// Seconds before a stale replica is considered lost
    #[arg(long, env = "BLOCKS_STALE_REPLICA_TIMEOUT", default_value_t = 28800)]
    pub stale_replica_timeout: u64,

    /// Allow replicas to share a node when disks run short
    #[arg(
        long,
        env = "BLOCKS_REPLICA_SOFT_ANTI_AFFINITY",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    pub replica_soft_anti_affinity: bool,

    /// Engine container image for controller and replica pods
    #[arg(long, env = "BLOCKS_ENGINE_IMAGE")]
    pub engine_image: String,

    /// Frontend presentation, e.g. tgt-blockdev
    #[arg(long, env = "BLOCKS_FRONTEND", default_value = "tgt-blockdev")]
    pub frontend: String,

    /// Namespace the block pods live in
    #[arg(long, env = "BLOCKS_NAMESPACE", default_value = "storage")]
    pub namespace: String,

    /// Default volume size in GiB
    #[arg(long, env = "BLOCKS_DEFAULT_SIZE", default_value_t = 10)]
    pub default_size: u64,
}

impl ServerArgs {
    pub fn blocks_config(&self) -> BlocksConfig {
        BlocksConfig {
            replica_count: self.replica_count,
            stale_replica_timeout: self.stale_replica_timeout,
            replica_soft_anti_affinity: self.replica_soft_anti_affinity,
            engine_image: self.engine_image.clone(),
            frontend: self.frontend.clone(),
            namespace: self.namespace.clone(),
            default_size: self.default_size,
        }
    }
}
