//! Slash-command intent parsing for the assistant loop.
//!
//! Anything that is not a recognized `/command` is a free-text turn for the
//! assistant. Arguments are split with shell quoting so multi-word brand
//! names survive (`/target "Wella Koleston Perfect" 8/81`).

#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    Help,
    ShowPlan,
    ShowAnalysis,
    /// Raw target arguments; the caller resolves them against the catalog or
    /// as a hex value.
    SetTarget { args: Vec<String> },
    Regenerate,
    Reanalyze { photo: String },
    Ask { text: String },
    Quit,
    Noop,
}

pub const CHAT_HELP_COMMANDS: &[&str] = &[
    "/help",
    "/plan",
    "/analysis",
    "/target",
    "/regenerate",
    "/reanalyze",
    "/quit",
];

pub fn parse_intent(input: &str) -> Intent {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Intent::Noop;
    }
    let Some(command_line) = trimmed.strip_prefix('/') else {
        return Intent::Ask {
            text: trimmed.to_string(),
        };
    };

    let (command, arg) = match command_line.split_once(char::is_whitespace) {
        Some((command, rest)) => (command, rest.trim()),
        None => (command_line, ""),
    };

    match command.to_ascii_lowercase().as_str() {
        "help" => Intent::Help,
        "plan" => Intent::ShowPlan,
        "analysis" => Intent::ShowAnalysis,
        "target" => Intent::SetTarget {
            args: split_args(arg),
        },
        "regenerate" => Intent::Regenerate,
        "reanalyze" => {
            let mut parts = split_args(arg);
            match parts.len() {
                1 => Intent::Reanalyze {
                    photo: parts.remove(0),
                },
                _ => Intent::Noop,
            }
        }
        "quit" | "exit" => Intent::Quit,
        _ => Intent::Noop,
    }
}

fn split_args(arg: &str) -> Vec<String> {
    if arg.is_empty() {
        return Vec::new();
    }
    match shell_words::split(arg) {
        Ok(parts) => parts.into_iter().filter(|value| !value.is_empty()).collect(),
        Err(_) => arg
            .split_whitespace()
            .map(str::to_string)
            .filter(|value| !value.is_empty())
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn free_text_is_an_ask() {
        assert_eq!(
            parse_intent("Can I drop to 10 vol?"),
            Intent::Ask {
                text: "Can I drop to 10 vol?".to_string()
            }
        );
        assert_eq!(parse_intent("   "), Intent::Noop);
    }

    #[test]
    fn target_args_respect_shell_quoting() {
        assert_eq!(
            parse_intent("/target \"Wella Koleston Perfect\" 8/81"),
            Intent::SetTarget {
                args: vec!["Wella Koleston Perfect".to_string(), "8/81".to_string()]
            }
        );
        assert_eq!(
            parse_intent("/target #B66FB3"),
            Intent::SetTarget {
                args: vec!["#B66FB3".to_string()]
            }
        );
    }

    #[test]
    fn reanalyze_takes_exactly_one_photo_path() {
        assert_eq!(
            parse_intent("/reanalyze \"new photo.jpg\""),
            Intent::Reanalyze {
                photo: "new photo.jpg".to_string()
            }
        );
        assert_eq!(parse_intent("/reanalyze a.jpg b.jpg"), Intent::Noop);
        assert_eq!(parse_intent("/reanalyze"), Intent::Noop);
    }

    #[test]
    fn commands_are_case_insensitive_and_unknowns_are_noops() {
        assert_eq!(parse_intent("/Regenerate"), Intent::Regenerate);
        assert_eq!(parse_intent("/QUIT"), Intent::Quit);
        assert_eq!(parse_intent("/frobnicate"), Intent::Noop);
    }
}
