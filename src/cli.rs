use clap::{Parser, Subcommand};
use samplebox::defaults::Method;
use samplebox::humanize::Count;

#[derive(Parser, Debug)]
#[command(name = "samplebox")]
#[command(about = "Run concurrent sampling jobs and stream their output", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the jobs from the settings file, or N standard-normal chains
    Run(RunArgs),
    /// Print the default value of method arguments
    Defaults(DefaultsArgs),
}

#[derive(clap::Args, Debug)]
pub struct RunArgs {
    /// Run this many chains instead of the configured jobs
    #[arg(long)]
    pub chains: Option<u32>,

    /// Channel capacity per job (e.g. 10M)
    #[arg(long)]
    pub capacity: Option<Count>,

    /// Base random seed; chain i uses this seed with chain id i
    #[arg(long)]
    pub seed: Option<u32>,

    /// Print the batch report as JSON on stdout
    #[arg(long)]
    pub json: bool,
}

#[derive(clap::Args, Debug)]
pub struct DefaultsArgs {
    /// sample, optimize or variational
    pub method: Method,

    /// Argument names to look up (all when omitted)
    pub names: Vec<String>,
}
