use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "tileindex-batcher")]
#[command(about = "Build one merged footprint index from a large file list by running the indexer over batches in parallel")]
#[command(version)]
pub struct Cli {
    /// Text file listing one geospatial file path per line
    #[arg(short, long)]
    pub input: String,

    /// Final merged output file
    #[arg(short, long)]
    pub output: String,

    /// Number of paths per indexer invocation
    #[arg(short, long, default_value = "1000", allow_hyphen_values = true)]
    pub batch_size: String,

    /// Concurrent indexer invocations (default: number of logical CPUs)
    #[arg(short, long, allow_hyphen_values = true)]
    pub jobs: Option<String>,

    /// Working directory for batch lists and containers (default: system temp)
    #[arg(short, long)]
    pub temp_dir: Option<String>,

    /// Keep the working directory after the run
    #[arg(short, long, default_value = "false")]
    pub keep_temp: bool,

    /// Indexer executable, resolved on PATH
    #[arg(long, default_value = "gdaltindex")]
    pub indexer: String,

    /// Merge executable, resolved on PATH
    #[arg(long, default_value = "ogrmerge.py")]
    pub merger: String,

    /// Output format passed to the merge tool
    #[arg(short, long, default_value = "FlatGeobuf")]
    pub format: String,

    /// File extension of the per-batch index containers
    #[arg(long, default_value = "gpkg")]
    pub container_ext: String,

    /// Kill any indexer or merge run that exceeds this many seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Write a JSON run report to this file
    #[arg(long)]
    pub report: Option<String>,

    /// Disable progress bars
    #[arg(long, default_value = "false")]
    pub no_progress: bool,

    /// Logging level (DEBUG, INFO, WARN, ERROR, OFF)
    #[arg(short, long, default_value = "INFO")]
    pub log_level: String,
}
