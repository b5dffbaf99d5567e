//! Command-line interface definitions.
//!
//! Defines all CLI arguments and subcommands using clap.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// blogship: build, package, publish and verify a static blog
#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None, arg_required_else_help = true)]
pub struct Cli {
    /// Project root directory (default: current directory)
    #[arg(short, long, global = true)]
    pub root: Option<PathBuf>,

    /// Output directory of the site generator (relative to project root)
    #[arg(short, long, global = true)]
    pub output: Option<PathBuf>,

    /// Content directory holding the posts (relative to project root)
    #[arg(short, long, global = true)]
    pub content: Option<PathBuf>,

    /// Config file name (default: blogship.toml)
    #[arg(short = 'C', long, default_value = "blogship.toml", global = true)]
    pub config: PathBuf,

    /// Override the public URL of the live site.
    ///
    /// Useful when the same repository deploys to a preview and a production
    /// host without editing blogship.toml.
    #[arg(long = "site-url", global = true)]
    pub site_url: Option<String>,

    /// subcommands
    #[command(subcommand)]
    pub command: Commands,
}

/// What started a pipeline run.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerKind {
    /// A push to a branch; only the pipeline branch starts a run
    Push,
    /// Manual dispatch; always starts a run
    Manual,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Write a default blogship.toml into the project root
    Init,

    /// Run the whole pipeline: build, package, publish, verify
    Run {
        /// Event that triggered this run
        #[arg(short, long, value_enum, default_value = "manual")]
        trigger: TriggerKind,

        /// Branch the push went to (default: current branch of the repository)
        #[arg(short, long)]
        branch: Option<String>,

        /// Commit to build (default: HEAD of the repository)
        #[arg(long)]
        commit: Option<String>,

        /// Concurrency group; a newer run in the same group cancels this one
        #[arg(short, long)]
        group: Option<String>,

        /// Build in place instead of a fresh checkout
        #[arg(long, action = clap::ArgAction::Set, num_args = 0..=1, default_missing_value = "true", require_equals = false)]
        in_place: Option<bool>,

        /// Enable the S3 publish target for this run
        #[arg(long, action = clap::ArgAction::Set, num_args = 0..=1, default_missing_value = "true", require_equals = false)]
        s3: Option<bool>,
    },

    /// Build and package the site without publishing it
    Build {
        /// Commit to build (default: HEAD of the repository)
        #[arg(long)]
        commit: Option<String>,

        /// Build in place instead of a fresh checkout
        #[arg(long, action = clap::ArgAction::Set, num_args = 0..=1, default_missing_value = "true", require_equals = false)]
        in_place: Option<bool>,
    },

    /// Publish an already packaged artifact, then verify
    Deploy {
        /// Run id whose artifact should be published
        #[arg(short, long)]
        artifact: String,

        /// Concurrency group; a newer run in the same group cancels this one
        #[arg(short, long)]
        group: Option<String>,

        /// Enable the S3 publish target for this deploy
        #[arg(long, action = clap::ArgAction::Set, num_args = 0..=1, default_missing_value = "true", require_equals = false)]
        s3: Option<bool>,
    },

    /// Check that the live site answers with the expected status
    Verify,

    /// Validate front-matter and slugs of all posts
    Check,

    /// Print the markup for an embedded video
    Embed {
        /// Video identifier on the hosting service
        id: String,

        /// Accessible title of the frame
        title: String,
    },

    /// Show the report of the latest run
    Status,
}

impl Cli {
    pub const fn is_init(&self) -> bool {
        matches!(self.command, Commands::Init)
    }
    /// Commands that publish something need at least one target.
    pub const fn publishes(&self) -> bool {
        matches!(self.command, Commands::Run { .. } | Commands::Deploy { .. })
    }
}
