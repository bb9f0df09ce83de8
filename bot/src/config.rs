use clap::Parser;
use joblib::ToolCommand;
use std::path::PathBuf;
use std::time::Duration;

/// Telegram bot that crawls web novels into EPUB files with lncrawl
#[derive(Debug, Parser)]
#[clap(name = "lncrawl-bot", version)]
pub struct Config {
    /// Telegram bot token
    #[clap(long, env = "BOT_TOKEN", hide_env_values = true)]
    pub bot_token: String,

    /// Root folder for per-user output folders
    #[clap(long, env = "NOVELS_DIR", default_value = "novels")]
    pub novels_dir: PathBuf,

    /// Crawl tool executable
    #[clap(long, env = "LNCRAWL_PROGRAM", default_value = "lncrawl")]
    pub tool: String,

    /// Argument placed before the fixed crawl arguments, e.g. `--tool python --tool-arg lncrawl`
    #[clap(long = "tool-arg", allow_hyphen_values = true)]
    pub tool_args: Vec<String>,

    /// Telegram Bot API base URL
    #[clap(long, env = "TELEGRAM_API_URL", default_value = "https://api.telegram.org")]
    pub api_url: String,

    /// Long-poll timeout for getUpdates, in seconds
    #[clap(long, env = "POLL_TIMEOUT_SECS", default_value_t = 30)]
    pub poll_timeout_secs: u64,

    /// How long a cancelled crawl may take to exit before it is killed, in seconds
    #[clap(long, env = "TERMINATION_GRACE_SECS", default_value_t = 10)]
    pub termination_grace_secs: u64,
}

impl Config {
    pub fn tool_command(&self) -> ToolCommand {
        ToolCommand::new(self.tool.clone()).args(self.tool_args.iter().cloned())
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs)
    }

    pub fn termination_grace(&self) -> Duration {
        Duration::from_secs(self.termination_grace_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::try_parse_from(["bot", "--bot-token", "123:abc"]).unwrap();
        assert_eq!(config.bot_token, "123:abc");
        assert_eq!(config.novels_dir, PathBuf::from("novels"));
        assert_eq!(config.tool_command().program(), "lncrawl");
        assert_eq!(config.poll_timeout(), Duration::from_secs(30));
        assert_eq!(config.termination_grace(), Duration::from_secs(10));
    }

    #[test]
    fn leading_tool_args() {
        let config = Config::try_parse_from([
            "bot",
            "--bot-token",
            "t",
            "--tool",
            "python",
            "--tool-arg",
            "-m",
            "--tool-arg",
            "lncrawl",
        ])
        .unwrap();
        assert_eq!(config.tool_command().program(), "python");
        assert_eq!(config.tool_args, ["-m", "lncrawl"]);
    }
}
