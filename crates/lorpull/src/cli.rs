use clap::Parser;

#[derive(Debug, Parser)]
#[command(
    name = "lorpull",
    version,
    disable_version_flag = true,
    about = "Pull forum topics and comments into the news store"
)]
pub struct Cli {
    /// Newsgroup pattern to process (wildmat; all groups when omitted)
    pub pattern: Option<String>,

    /// Pull window in days; negative disables pulling
    #[arg(short = 'd', long = "days", default_value_t = 1, allow_negative_numbers = true)]
    pub days: i64,

    /// Expire articles older than this many days; negative disables expiry,
    /// zero expires everything
    #[arg(short = 'e', long = "expire", default_value_t = -1, allow_negative_numbers = true)]
    pub expire: i64,

    /// HTTP timeout in seconds
    #[arg(short = 't', long = "timeout", default_value_t = 20)]
    pub timeout: u64,

    /// Log warnings and errors only
    #[arg(short = 'q', long = "quiet")]
    pub quiet: bool,

    #[arg(short = 'v', long = "version", action = clap::ArgAction::Version, help = "Print version")]
    version: Option<bool>,
}
