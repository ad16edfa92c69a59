use clap::{Parser, Subcommand, ValueEnum};

/// Shardgate CLI - semantic analysis and sharded execution of SQL statements
#[derive(Parser, Debug)]
#[command(name = "shardgate")]
#[command(about = "Analyze SQL against a vschema and execute it over a mock shard topology")]
#[command(version = "0.1.0")]
pub struct CliArgs {
    /// Log filter used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Bind every column of a statement to its tables and print the inferred types
    Analyze {
        /// SQL statement to analyze
        #[arg(value_name = "SQL")]
        sql: String,

        /// VSchema JSON document
        #[arg(long)]
        vschema: Option<String>,

        /// Keyspace unqualified tables are looked up in first
        #[arg(short, long)]
        keyspace: Option<String>,
    },

    /// Scatter a SELECT over the shards of a keyspace and print the merged rows
    Query {
        /// SQL query to execute
        #[arg(value_name = "SQL")]
        sql: String,

        /// Target keyspace
        #[arg(short, long, default_value = "user")]
        keyspace: String,

        /// Output format
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,

        /// Engine configuration file
        #[arg(short, long)]
        config: Option<String>,

        /// Per-shard result fixtures (JSON)
        #[arg(long)]
        fixtures: Option<String>,

        /// Read the result through the streaming path
        #[arg(long)]
        stream: bool,

        /// Enable verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// List keyspaces and their shards
    Topology {
        /// Engine configuration file
        #[arg(short, long)]
        config: Option<String>,

        /// Also list the tables of each keyspace from this VSchema
        #[arg(long)]
        vschema: Option<String>,
    },
}

/// Output format options
#[derive(ValueEnum, Debug, Clone)]
pub enum OutputFormat {
    /// Formatted table output
    Table,
    /// JSON output
    Json,
    /// CSV output
    Csv,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Table => write!(f, "table"),
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::Csv => write!(f, "csv"),
        }
    }
}
