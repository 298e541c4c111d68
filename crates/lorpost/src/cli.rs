use clap::Parser;

#[derive(Debug, Parser)]
#[command(
    name = "lorpost",
    version,
    disable_version_flag = true,
    about = "Submit a news article from stdin to the forum"
)]
pub struct Cli {
    /// HTTP timeout in seconds; also the session-refresh window
    #[arg(short = 't', long = "timeout", default_value_t = 20)]
    pub timeout: u64,

    #[arg(short = 'v', long = "version", action = clap::ArgAction::Version, help = "Print version")]
    version: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_timeout() {
        let cli = Cli::try_parse_from(["lorpost"]).expect("parse");
        assert_eq!(cli.timeout, 20);
    }

    #[test]
    fn timeout_override() {
        let cli = Cli::try_parse_from(["lorpost", "-t", "5"]).expect("parse");
        assert_eq!(cli.timeout, 5);
    }
}
