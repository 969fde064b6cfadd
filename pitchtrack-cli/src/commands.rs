//! Line commands read from stdin while the tuner runs.

use pitchtrack_core::StreamSettings;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Reopen the stream with these settings.
    Reconfigure(StreamSettings),
    Quit,
}

/// Parses one line against the current settings.
///
/// Accepted forms: `device <name>`, `device default`, `channel <n>`,
/// `rate <hz>`, `block <samples>`, `quit`. Blank lines yield `Ok(None)`.
pub fn parse(line: &str, current: &StreamSettings) -> Result<Option<Command>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };

    let mut settings = current.clone();
    match word {
        "quit" | "exit" | "q" => return Ok(Some(Command::Quit)),
        "device" => {
            if rest.is_empty() {
                return Err("usage: device <name|default>".into());
            }
            settings.device = (rest != "default").then(|| rest.to_string());
        }
        "channel" => settings.channel_index = parse_number(rest, "channel")?,
        "rate" => settings.sample_rate = Some(parse_number(rest, "rate")?),
        "block" => settings.block_size = Some(parse_number(rest, "block")?),
        other => return Err(format!("unknown command `{other}`")),
    }
    Ok(Some(Command::Reconfigure(settings)))
}

fn parse_number<T: std::str::FromStr>(value: &str, what: &str) -> Result<T, String> {
    value
        .parse()
        .map_err(|_| format!("`{value}` is not a valid {what}"))
}
