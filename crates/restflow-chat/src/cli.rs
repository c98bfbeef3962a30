use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "restflow-chat")]
#[command(version, about = "Stream chat turns from a RestFlow server")]
pub struct Cli {
    /// Server base URL (defaults to http://127.0.0.1:3000)
    #[arg(long, env = "RESTFLOW_SERVER_URL")]
    pub url: Option<String>,

    /// Agent to talk to
    #[arg(long)]
    pub agent: Option<String>,

    /// Existing chat session to continue
    #[arg(long)]
    pub session: Option<String>,

    /// Use the one-shot HTTP stream instead of the WebSocket channel
    #[arg(long)]
    pub sse: bool,

    /// Idle timeout in seconds to negotiate on open
    #[arg(long)]
    pub idle_timeout: Option<u64>,

    /// Config file (defaults to ~/.config/restflow/stream.toml)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flags() {
        let cli = Cli::parse_from([
            "restflow-chat",
            "--url",
            "http://localhost:3000",
            "--agent",
            "agent-1",
            "--idle-timeout",
            "600",
            "-v",
        ]);
        assert_eq!(cli.url.as_deref(), Some("http://localhost:3000"));
        assert_eq!(cli.agent.as_deref(), Some("agent-1"));
        assert_eq!(cli.idle_timeout, Some(600));
        assert!(cli.verbose);
        assert!(!cli.sse);
    }
}
