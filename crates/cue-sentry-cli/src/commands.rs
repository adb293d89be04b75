use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "cue-sentry")]
#[command(about = "Scan a media library and flag sensitive subtitle content", long_about = None)]
pub struct Cli {
    /// Configuration file (defaults to ./Config.toml when present)
    #[arg(long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the scanner and the worker pool until Ctrl-C
    Run,
    /// Perform one scanner pass and enqueue dirty files
    Scan,
    /// Run the worker pool only
    Work {
        /// Exit once the queue is empty
        #[arg(long)]
        drain: bool,
    },
    /// Manage scan folders
    Folder {
        #[command(subcommand)]
        action: FolderCommand,
    },
    /// Manage classification models
    Model {
        #[command(subcommand)]
        action: ModelCommand,
    },
    /// List or edit content categories and their severity cut points
    Categories {
        #[command(subcommand)]
        action: Option<CategoryCommand>,
    },
    /// Queue a file for classification regardless of its state
    Rescan {
        /// File id or path
        target: String,
    },
    /// Replace the verdict on a file's latest result
    Override {
        /// File id or path
        target: String,
        #[arg(long)]
        score: f64,
        /// mild, moderate, severe or none
        #[arg(long)]
        severity: String,
        #[arg(long, default_value = "")]
        notes: String,
    },
    /// Manually edit one trigger
    EditTrigger {
        id: i64,
        #[arg(long)]
        severity: Option<String>,
        #[arg(long)]
        confidence: Option<f64>,
    },
    /// Resume processing
    Start,
    /// Pause processing (expires after control_ttl_secs)
    Stop,
    /// Queue depth, file status counts and last activity
    Status,
    /// Aggregate statistics
    Stats(StatsArgs),
    /// Show a file's latest result and triggers
    Result {
        /// File id or path
        target: String,
        /// List every result recorded for the file instead
        #[arg(long)]
        history: bool,
    },
    /// List files by their latest result, riskiest first
    Results(ResultsArgs),
    /// Print configuration values
    PrintConfig,
    /// Delete all files, results and triggers
    TruncateDb,
}

#[derive(Debug, Args)]
pub struct StatsArgs {
    /// Days covered by the timeline
    #[arg(long, default_value_t = 30)]
    pub days: i64,
    /// Also write the daily timeline to this CSV file
    #[arg(long)]
    pub csv: Option<String>,
}

#[derive(Debug, Args)]
pub struct ResultsArgs {
    /// mild, moderate or severe
    #[arg(long)]
    pub severity: Option<String>,
    /// Only results with a trigger in this category
    #[arg(long)]
    pub category: Option<String>,
    #[arg(long, default_value_t = 1)]
    pub page: i64,
    #[arg(long, default_value_t = 50)]
    pub limit: i64,
}

#[derive(Debug, Subcommand)]
pub enum FolderCommand {
    Add {
        path: String,
        #[arg(long, default_value_t = 0)]
        priority: i64,
    },
    Remove {
        path: String,
    },
    Enable {
        path: String,
    },
    Disable {
        path: String,
    },
    List,
}

#[derive(Debug, Subcommand)]
pub enum ModelCommand {
    /// Register a model; --config takes JSON inline or a path to a JSON file
    Add {
        identifier: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long, value_delimiter = ',', required = true)]
        categories: Vec<String>,
        #[arg(long, default_value_t = 1.0)]
        weight: f64,
        #[arg(long)]
        config: String,
    },
    Enable {
        id: i64,
    },
    Disable {
        id: i64,
    },
    /// Change a registered model; omitted options keep their current value
    Update {
        id: i64,
        #[arg(long)]
        identifier: Option<String>,
        #[arg(long)]
        name: Option<String>,
        #[arg(long, value_delimiter = ',')]
        categories: Option<Vec<String>>,
        #[arg(long)]
        weight: Option<f64>,
        #[arg(long)]
        config: Option<String>,
    },
    /// Reload the model on the next scanner tick
    Reload {
        id: i64,
    },
    List,
}

#[derive(Debug, Subcommand)]
pub enum CategoryCommand {
    List,
    /// Create or edit a category; omitted options keep their current value
    Set {
        name: String,
        #[arg(long)]
        display_name: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        threshold: Option<f64>,
        #[arg(long)]
        mild: Option<f64>,
        #[arg(long)]
        moderate: Option<f64>,
        #[arg(long)]
        severe: Option<f64>,
        #[arg(long, conflicts_with = "disable")]
        enable: bool,
        #[arg(long)]
        disable: bool,
    },
}
