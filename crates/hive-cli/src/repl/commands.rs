//! Parsing of chat input lines.

/// What a line typed at the chat prompt asks for.
#[derive(Debug, PartialEq, Eq)]
pub enum Input<'a> {
    /// A question for the model
    Query(&'a str),
    /// `use provider <name>`
    UseProvider(&'a str),
    Tools,
    Providers,
    /// Start a fresh conversation
    New,
    Help,
    Exit,
    /// A slash command nobody recognises
    Unknown(&'a str),
    Empty,
}

pub fn parse(line: &str) -> Input<'_> {
    let line = line.trim();
    if line.is_empty() {
        return Input::Empty;
    }

    if line.eq_ignore_ascii_case("quit") || line.eq_ignore_ascii_case("exit") {
        return Input::Exit;
    }

    if let Some(rest) = strip_prefix_ignore_case(line, "use provider ") {
        let name = rest.trim();
        if !name.is_empty() {
            return Input::UseProvider(name);
        }
    }

    if let Some(command) = line.strip_prefix('/') {
        let mut parts = command.split_whitespace();
        return match parts.next().unwrap_or_default() {
            "quit" | "exit" | "q" => Input::Exit,
            "tools" => Input::Tools,
            "providers" => Input::Providers,
            "provider" | "use" => match parts.next() {
                Some(name) => Input::UseProvider(name),
                None => Input::Providers,
            },
            "new" | "clear" => Input::New,
            "help" | "?" => Input::Help,
            _ => Input::Unknown(line),
        };
    }

    Input::Query(line)
}

fn strip_prefix_ignore_case<'a>(line: &'a str, prefix: &str) -> Option<&'a str> {
    let head = line.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix).then(|| &line[prefix.len()..])
}

pub const HELP: &str = "\
Commands:
  use provider <name>   Switch the model provider
  /tools                List available tools
  /providers            List model providers
  /new                  Start a new conversation
  /help                 Show this help
  quit, exit, /quit     Leave the chat

Anything else is sent to the model. Ctrl-C cancels a running query.";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_query() {
        assert_eq!(parse("  what is 2+2? "), Input::Query("what is 2+2?"));
        assert_eq!(parse("   "), Input::Empty);
    }

    #[test]
    fn test_use_provider() {
        assert_eq!(parse("use provider groq"), Input::UseProvider("groq"));
        assert_eq!(parse("Use Provider  gemini "), Input::UseProvider("gemini"));
        assert_eq!(parse("/provider anthropic"), Input::UseProvider("anthropic"));
        assert_eq!(parse("/provider"), Input::Providers);
        // Nothing after the keyword is just a question
        assert_eq!(parse("use provider"), Input::Query("use provider"));
    }

    #[test]
    fn test_exit_words() {
        assert_eq!(parse("quit"), Input::Exit);
        assert_eq!(parse("EXIT"), Input::Exit);
        assert_eq!(parse("/q"), Input::Exit);
        assert_eq!(parse("quit smoking tips"), Input::Query("quit smoking tips"));
    }

    #[test]
    fn test_slash_commands() {
        assert_eq!(parse("/tools"), Input::Tools);
        assert_eq!(parse("/new"), Input::New);
        assert_eq!(parse("/frobnicate now"), Input::Unknown("/frobnicate now"));
    }

    #[test]
    fn test_multibyte_prefix_boundary() {
        assert_eq!(parse("usé"), Input::Query("usé"));
    }
}
