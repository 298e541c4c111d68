use clap::Parser;

#[derive(Debug, Parser)]
#[command(
    name = "lord",
    version,
    disable_version_flag = true,
    about = "NNTP server for the local news store"
)]
pub struct Cli {
    /// TCP port to listen on
    #[arg(short = 'p', long = "port", default_value_t = 5119)]
    pub port: u16,

    /// Posting command fed each POSTed article on stdin
    #[arg(short = 'c', long = "postcmd", default_value = "lorpost")]
    pub postcmd: String,

    #[arg(short = 'v', long = "version", action = clap::ArgAction::Version, help = "Print version")]
    version: Option<bool>,
}
