use clap::{Parser, Subcommand};
use clap_complete::Shell;

#[derive(Parser, Debug)]
#[command(
    name = "gascp",
    version,
    about = "Control plane for Google Apps Script projects"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Mirror a remote project locally and register it in the catalog
    Init {
        script_id: String,
        #[arg(long)]
        name: Option<String>,
        /// Repair drifted helper files instead of only warning
        #[arg(long)]
        force: bool,
    },
    /// Create a new remote project with verified helpers and mirror it
    Create {
        title: String,
        #[arg(long)]
        name: Option<String>,
    },
    /// List registered projects (or every remote script project)
    List {
        #[arg(long)]
        json: bool,
        #[arg(long)]
        remote: bool,
    },
    /// Switch the current project
    Use { name: String },
    /// Print a file's unwrapped content
    Cat {
        path: String,
        /// Always fetch from the remote instead of the local mirror
        #[arg(long)]
        remote: bool,
    },
    /// Write a file through the atomic pipeline (content from --file or stdin)
    Write {
        path: String,
        #[arg(long)]
        file: Option<String>,
        #[arg(long = "expected-hash")]
        expected_hash: Option<String>,
        #[arg(long)]
        force: bool,
        #[arg(long = "allow-new-local")]
        allow_new_local: bool,
    },
    /// Compare local, cached, and remote hashes for one file
    Status {
        path: String,
        #[arg(long)]
        json: bool,
    },
    /// Drop the per-file metadata cache for a project mirror
    CacheClear { script_id: String },
    /// Report whether a session access token is available
    Auth,
    /// Deployment environments
    Deploy {
        #[command(subcommand)]
        cmd: DeployCmd,
    },
    /// Parallel-development worktrees
    Worktree {
        #[command(subcommand)]
        cmd: WorktreeCmd,
    },
    Config {
        #[command(subcommand)]
        cmd: ConfigCmd,
    },
    /// Serve the MCP tool catalog over stdio
    McpServer,
    /// Emit shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand, Debug)]
pub enum DeployCmd {
    Status {
        #[arg(long)]
        script_id: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Transactionally recreate [DEV]/[STAGING]/[PROD]
    Reset {
        #[arg(long)]
        script_id: Option<String>,
    },
    /// staging (versioned snapshot) or prod (pointer move)
    Promote {
        to: String,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        script_id: Option<String>,
    },
    Rollback {
        #[arg(long = "to-version")]
        to_version: Option<u32>,
        #[arg(long)]
        script_id: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum WorktreeCmd {
    Add {
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        parent: Option<String>,
        #[arg(long)]
        claim: Option<String>,
        /// Skip the unique uuid suffix on the branch name
        #[arg(long)]
        no_suffix: bool,
    },
    List {
        #[arg(long)]
        json: bool,
    },
    Claim {
        script_id: String,
        #[arg(long)]
        agent: String,
    },
    Release {
        script_id: String,
        #[arg(long)]
        agent: String,
        #[arg(long)]
        force: bool,
    },
    Remove { script_id: String },
}

#[derive(Subcommand, Debug)]
pub enum ConfigCmd {
    Get { key: String },
    Set { key: String, value: String },
}
