use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "chaos-gate", version, about = "Safety gate for failure-injection experiments")]
pub struct Cli {
    /// Path to the gate configuration file
    #[arg(short, long, global = true, default_value = "config.yaml")]
    pub config: PathBuf,

    /// Increase log verbosity (overrides the configured level)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Evaluate an experiment file against the safety policy
    Check {
        /// Path to the experiment YAML file
        #[arg(short, long)]
        experiment: PathBuf,

        /// Confirm the run up front (satisfies the confirmation gate)
        #[arg(short, long)]
        yes: bool,

        /// Approval token for environments that require one
        #[arg(long)]
        approval_token: Option<String>,

        /// Print the full evaluation report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run environment detection alone and print the result
    DetectEnv {
        /// Print the detection result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Write a canonical experiment template file
    Template {
        /// Kind of experiment template to generate
        #[arg(short = 't', long = "type", value_enum)]
        template_type: TemplateType,

        /// Output file path
        #[arg(short, long)]
        output: PathBuf,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum TemplateType {
    Cpu,
    Memory,
    Network,
}
