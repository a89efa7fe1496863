/// Scan session commands and fuzzy command matching

#[derive(Debug, Clone)]
pub struct Command {
  pub name: &'static str,
  pub aliases: &'static [&'static str],
  pub description: &'static str,
}

/// Commands available as `:name [args]` during a scan session
pub const COMMANDS: &[Command] = &[
  Command {
    name: "stats",
    aliases: &["st", "progress"],
    description: "Inventory progress for the current period",
  },
  Command {
    name: "list",
    aliases: &["ls", "assets"],
    description: "List every asset",
  },
  Command {
    name: "search",
    aliases: &["s", "find"],
    description: "Search assets by text",
  },
  Command {
    name: "sync",
    aliases: &["retry", "flush"],
    description: "Replay queued updates now",
  },
  Command {
    name: "queue",
    aliases: &["q", "pending"],
    description: "Show updates waiting for the backend",
  },
  Command {
    name: "recent",
    aliases: &["r", "history"],
    description: "Show recent scans",
  },
  Command {
    name: "export",
    aliases: &["e", "report"],
    description: "Write the progress report as CSV",
  },
  Command {
    name: "help",
    aliases: &["h", "?"],
    description: "Show available commands",
  },
  Command {
    name: "quit",
    aliases: &["exit", "x"],
    description: "End the scan session",
  },
];

/// How well `cmd` matches `input`, lower is better.
fn rank(cmd: &Command, input: &str) -> Option<u32> {
  if cmd.name == input {
    Some(0)
  } else if any_alias(cmd, |a| a == input) {
    Some(1)
  } else if cmd.name.starts_with(input) {
    Some(2)
  } else if any_alias(cmd, |a| a.starts_with(input)) {
    Some(3)
  } else if cmd.name.contains(input) {
    Some(4)
  } else if any_alias(cmd, |a| a.contains(input)) {
    Some(5)
  } else {
    None
  }
}

fn any_alias(cmd: &Command, test: impl Fn(&str) -> bool) -> bool {
  cmd.aliases.iter().any(|a| test(a))
}

/// Commands matching a typed prefix, best match first
pub fn get_suggestions(input: &str) -> Vec<&'static Command> {
  let input = input.to_lowercase();
  if input.is_empty() {
    return COMMANDS.iter().collect();
  }

  let mut matches: Vec<_> = COMMANDS
    .iter()
    .filter_map(|cmd| rank(cmd, &input).map(|r| (r, cmd)))
    .collect();
  // Stable sort keeps table order among equal ranks
  matches.sort_by_key(|(r, _)| *r);
  matches.into_iter().map(|(_, cmd)| cmd).collect()
}

/// Split `:name args` into the best matching command and its argument text.
pub fn resolve(line: &str) -> Option<(&'static Command, &str)> {
  let line = line.trim().strip_prefix(':')?.trim_start();
  let (word, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
  if word.is_empty() {
    return None;
  }
  get_suggestions(word)
    .first()
    .map(|cmd| (*cmd, rest.trim()))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_empty_input_returns_all() {
    let suggestions = get_suggestions("");
    assert_eq!(suggestions.len(), COMMANDS.len());
  }

  #[test]
  fn test_exact_match() {
    let suggestions = get_suggestions("stats");
    assert!(!suggestions.is_empty());
    assert_eq!(suggestions[0].name, "stats");
  }

  #[test]
  fn test_alias_match() {
    let suggestions = get_suggestions("q");
    assert!(!suggestions.is_empty());
    assert_eq!(suggestions[0].name, "queue");
  }

  #[test]
  fn test_prefix_match() {
    let suggestions = get_suggestions("sy");
    assert!(!suggestions.is_empty());
    assert_eq!(suggestions[0].name, "sync");
  }

  #[test]
  fn test_fuzzy_match() {
    let suggestions = get_suggestions("cent");
    assert!(!suggestions.is_empty());
    assert_eq!(suggestions[0].name, "recent");
  }

  #[test]
  fn test_resolve_splits_arguments() {
    let (cmd, args) = resolve(":search  máy in ").unwrap();
    assert_eq!(cmd.name, "search");
    assert_eq!(args, "máy in");

    let (cmd, args) = resolve(":quit").unwrap();
    assert_eq!(cmd.name, "quit");
    assert_eq!(args, "");

    assert!(resolve("A0001").is_none());
    assert!(resolve(":").is_none());
    assert!(resolve(":zzz").is_none());
  }
}
