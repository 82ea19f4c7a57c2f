use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "nexus")]
#[command(about = "Local Nexus - registry, supervisor, and port allocator for local services")]
pub struct Cli {
    /// Base directory for settings, the registry file, and logs
    #[arg(short, long)]
    pub workdir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Import a JSON bundle into the registry (upsert by service name)
    Import {
        /// Bundle file path
        file: PathBuf,
    },
    /// List registered services (statuses are refreshed first)
    #[command(alias = "ls")]
    List {
        /// Only services in this category
        #[arg(long)]
        category: Option<String>,

        /// Only services with this status (stopped, running, error)
        #[arg(long)]
        status: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show one service with its keys
    Show {
        /// Service id or name
        service: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Start a service
    Start {
        /// Service id or name
        service: String,
    },
    /// Stop a service
    Stop {
        /// Service id or name
        service: String,
    },
    /// Restart a service
    Restart {
        /// Service id or name
        service: String,
    },
    /// Reconcile a service's recorded status with the OS
    Refresh {
        /// Service id or name
        service: String,
    },
    /// Show the tail of a service's log file
    Logs {
        /// Service id or name
        service: String,

        /// Number of lines to show
        #[arg(short = 'n', long, default_value_t = 200)]
        lines: usize,
    },
    /// Remove a service and its key references
    Delete {
        /// Service id or name
        service: String,
    },
    /// Port allocation and diagnostics
    #[command(subcommand)]
    Ports(PortsCommands),
    /// Registered databases
    #[command(subcommand)]
    Db(DbCommands),
    /// Key references (names of secrets, never values)
    #[command(subcommand)]
    Keys(KeysCommands),
    /// Registry totals and alerts
    Summary {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print a .env.example listing every key reference
    EnvExample,
    /// Import bundle files dropped into a folder until interrupted
    Watch {
        /// Folder to poll for *.json bundles
        folder: PathBuf,

        /// Polling interval in seconds (defaults to LOCAL_NEXUS_WATCH_INTERVAL_SECS)
        #[arg(long)]
        interval: Option<u64>,
    },
}

#[derive(Subcommand)]
pub enum PortsCommands {
    /// Print the next free port in the configured range
    Next,
    /// Show reservations and host usage for a port range
    Map {
        /// Range start (defaults to the configured range)
        #[arg(long)]
        start: Option<u16>,

        /// Range end (defaults to the configured range)
        #[arg(long)]
        end: Option<u16>,

        /// Only list reserved, in-use, or conflicting ports
        #[arg(long)]
        busy: bool,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Reassign duplicate and squatted ports
    Resolve {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
pub enum DbCommands {
    /// List databases
    #[command(alias = "ls")]
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show a database and the services linked to it
    Show {
        /// Database id or name
        database: String,
    },
    /// Remove a database, unlinking its services
    Delete {
        /// Database id or name
        database: String,
    },
}

#[derive(Subcommand)]
pub enum KeysCommands {
    /// List key references
    #[command(alias = "ls")]
    List {
        /// Only keys of this service (id or name)
        #[arg(long)]
        service: Option<String>,
    },
    /// Record that a service needs a key
    Add {
        /// Service id or name
        service: String,

        /// Human-readable key name
        key_name: String,

        /// Environment variable the service reads it from
        env_var: String,

        /// Optional description
        #[arg(long, default_value = "")]
        description: String,
    },
    /// Remove a key reference by id
    Remove {
        /// Key reference id
        id: String,
    },
}
