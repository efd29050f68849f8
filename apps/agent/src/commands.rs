//! Line-oriented command syntax: `<identity> <command> [args...]`.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Fetch a URL. `None` when the URL was left out.
    Get(Option<String>),
    Status,
    Cancel,
    Register { phone: String, password: String },
    Unregister,
    /// Show the stored storage password.
    Password,
    /// Log in to storage and show the resulting token.
    Token,
    Help,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    pub identity: String,
    pub command: Command,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("missing command, try: <identity> help")]
    MissingCommand,

    #[error("unknown command: {0}")]
    Unknown(String),

    #[error("usage: <identity> register <phone> <password>")]
    RegisterUsage,
}

pub const HELP: &str = "\
Commands (prefix each with your identity):
  get <url>                    fetch a file and upload it in parts
  status                       show the state of your request
  cancel                       cancel your running download
  register <phone> <password>  store your storage account
  unregister                   remove your storage account
  password                     show your stored storage password
  token                        get a temporary storage token
  help                         show this help";

/// Parses one input line. Blank lines yield `None`.
pub fn parse(line: &str) -> Result<Option<Line>, ParseError> {
    let mut words = line.split_whitespace();
    let Some(identity) = words.next() else {
        return Ok(None);
    };
    let name = words.next().ok_or(ParseError::MissingCommand)?;

    let command = match name.to_ascii_lowercase().as_str() {
        "get" => Command::Get(words.next().map(str::to_string)),
        "status" => Command::Status,
        "cancel" => Command::Cancel,
        "register" => match (words.next(), words.next()) {
            (Some(phone), Some(password)) => Command::Register {
                phone: phone.to_string(),
                password: password.to_string(),
            },
            _ => return Err(ParseError::RegisterUsage),
        },
        "unregister" => Command::Unregister,
        "password" => Command::Password,
        "token" => Command::Token,
        "help" => Command::Help,
        _ => return Err(ParseError::Unknown(name.to_string())),
    };

    Ok(Some(Line {
        identity: identity.to_string(),
        command,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(line: &str) -> Command {
        parse(line).unwrap().unwrap().command
    }

    #[test]
    fn parses_commands() {
        assert_eq!(
            command("a@example.org get https://fsf.org"),
            Command::Get(Some("https://fsf.org".into()))
        );
        assert_eq!(command("a@example.org GET"), Command::Get(None));
        assert_eq!(command("a status"), Command::Status);
        assert_eq!(command("a cancel"), Command::Cancel);
        assert_eq!(command("a unregister"), Command::Unregister);
        assert_eq!(command("a help"), Command::Help);
        assert_eq!(command("a password"), Command::Password);
        assert_eq!(command("a Token"), Command::Token);
        assert_eq!(
            command("a register 5355555 secret"),
            Command::Register {
                phone: "5355555".into(),
                password: "secret".into()
            }
        );
    }

    #[test]
    fn identity_is_first_word() {
        let line = parse("  user@example.org   status ").unwrap().unwrap();
        assert_eq!(line.identity, "user@example.org");
    }

    #[test]
    fn blank_line_is_ignored() {
        assert_eq!(parse("   ").unwrap(), None);
    }

    #[test]
    fn errors() {
        assert_eq!(parse("a"), Err(ParseError::MissingCommand));
        assert_eq!(parse("a fly"), Err(ParseError::Unknown("fly".into())));
        assert_eq!(parse("a register 123"), Err(ParseError::RegisterUsage));
    }
}
