use clap::{Args, Parser, Subcommand};
use convnet_nn::ImageDataFormat;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
/// Inspect convnet architectures without allocating weights.
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the AlexNet layer table or its JSON description
    Summary(SummaryArgs),
    /// Print the effective backend configuration
    Config,
}

#[derive(Args, Debug)]
pub struct SummaryArgs {
    #[arg(short, long)]
    pub width: usize,
    #[arg(long)]
    pub height: usize,
    #[arg(short, long, default_value_t = 3)]
    pub depth: usize,
    #[arg(short, long)]
    pub classes: usize,
    /// L2 coefficient on conv and dense kernels
    #[arg(short, long, default_value_t = 0.0002)]
    pub reg: f64,
    /// channels_first or channels_last; overrides the backend config
    #[arg(long = "data-format")]
    pub data_format: Option<ImageDataFormat>,
    /// Emit the architecture as JSON instead of a table
    #[arg(long)]
    pub json: bool,
}
