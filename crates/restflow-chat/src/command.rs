/// One line of user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Say(String),
    Cancel,
    Timeout(u64),
    Reconnect,
    Quit,
    Empty,
    Invalid(String),
}

impl Command {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return Self::Empty;
        }
        let Some(rest) = line.strip_prefix('/') else {
            return Self::Say(line.to_string());
        };

        let mut parts = rest.split_whitespace();
        match (parts.next(), parts.next()) {
            (Some("cancel"), None) => Self::Cancel,
            (Some("reconnect"), None) => Self::Reconnect,
            (Some("quit" | "exit"), None) => Self::Quit,
            (Some("timeout"), Some(secs)) => match secs.parse() {
                Ok(secs) => Self::Timeout(secs),
                Err(_) => Self::Invalid(format!("invalid timeout: {}", secs)),
            },
            (Some("timeout"), None) => Self::Invalid("usage: /timeout <secs>".to_string()),
            _ => Self::Invalid(format!("unknown command: /{}", rest)),
        }
    }
}
