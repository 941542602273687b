use clap::Parser;

/// Delta Solivia inverter exporter
#[derive(Debug, Parser)]
#[clap(author, version)]
pub struct Options {
    /// Config file to read
    #[clap(short = 'c', long = "config", default_value = "config.yaml")]
    pub config_file: String,

    /// Optional runtime limit in seconds
    #[clap(short = 't', long = "time")]
    pub runtime: Option<u64>,

    /// Poll once, print the cycle as JSON and exit
    #[clap(long = "once")]
    pub once: bool,
}

impl Options {
    pub fn new() -> Self {
        Self::parse()
    }
}
