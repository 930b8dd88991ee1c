use std::path::PathBuf;


#[derive(clap::Parser)]
#[command(version, about)]
pub struct Cli {
    #[clap(subcommand)]
    pub cmd: Command,

    /// Specifies config file location. Default locations are: 'stampede.toml'
    /// and '/etc/stampede/config.toml'. Can also be set via env
    /// `STAMPEDE_CONFIG_PATH`. If no file is found, the built-in defaults are
    /// used.
    #[clap(long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Debug, clap::Parser)]
pub enum Command {
    /// Runs the load test and prints a summary. Exits with code 99 if any
    /// threshold failed.
    Run {
        /// Additionally writes the summary as JSON to this file.
        #[clap(long)]
        summary_out: Option<PathBuf>,
    },

    /// Checks the config and prints the resolved ramp schedule and thresholds
    /// without sending any requests. Useful to run before a long test.
    Check,

    /// Outputs a template of the configuration, including all config options
    /// with descriptions, great as a starting point.
    GenConfigTemplate {
        /// File to write it to. If unspecified, written to stdout.
        #[clap(short, long)]
        out: Option<PathBuf>,
    },
}
