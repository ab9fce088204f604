//! Client request parsing.
//!
//! A request is a command name followed by tokens. Tokens starting with `-`
//! are switches (`-name`, `-name=value`, or `-name "value"`); everything else
//! is consumed positionally into ordered-argument slots.

use std::collections::HashMap;

/// Parsed argument list of a [`ClientRequest`].
#[derive(Debug, Clone, Default)]
pub struct Arguments {
    ordered: Vec<String>,
    switches: HashMap<String, Option<String>>,
    help: bool,
}

impl Arguments {
    /// Positional argument by 1-based slot number.
    #[must_use]
    pub fn ordered_arg(&self, slot: usize) -> Option<&str> {
        if slot == 0 {
            return None;
        }
        self.ordered.get(slot - 1).map(String::as_str)
    }

    /// Number of positional arguments.
    #[must_use]
    pub fn ordered_count(&self) -> usize {
        self.ordered.len()
    }

    /// Whether a switch was supplied. Switch names are case-insensitive.
    #[must_use]
    pub fn exists(&self, name: &str) -> bool {
        self.switches.contains_key(&name.to_lowercase())
    }

    /// Value carried by a switch, if any.
    #[must_use]
    pub fn value(&self, name: &str) -> Option<&str> {
        self.switches
            .get(&name.to_lowercase())
            .and_then(|v| v.as_deref())
    }

    /// True when `-?` or `-help` was supplied.
    #[must_use]
    pub const fn contains_help_request(&self) -> bool {
        self.help
    }
}

/// An immutable parsed client request.
#[derive(Debug, Clone)]
pub struct ClientRequest {
    command: String,
    arguments: Arguments,
    raw: String,
}

struct Token {
    text: String,
    quoted: bool,
}

fn tokenize(input: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }

        let mut text = String::new();
        let quoted = c == '"';

        if quoted {
            chars.next();
            for ch in chars.by_ref() {
                if ch == '"' {
                    break;
                }
                text.push(ch);
            }
        } else {
            while let Some(&ch) = chars.peek() {
                if ch.is_whitespace() {
                    break;
                }
                chars.next();
                if ch == '"' {
                    // Embedded quote groups whitespace, e.g. -args="a b".
                    for inner in chars.by_ref() {
                        if inner == '"' {
                            break;
                        }
                        text.push(inner);
                    }
                } else {
                    text.push(ch);
                }
            }
        }

        tokens.push(Token { text, quoted });
    }

    tokens
}

impl ClientRequest {
    /// Parse raw request text. Returns `None` for empty input.
    #[must_use]
    pub fn parse(input: &str) -> Option<Self> {
        let raw = input.trim().to_string();
        let tokens = tokenize(&raw);
        let mut iter = tokens.into_iter().peekable();

        let command = iter.next()?.text;
        if command.is_empty() {
            return None;
        }

        let mut arguments = Arguments::default();
        while let Some(token) = iter.next() {
            let is_switch = !token.quoted && token.text.starts_with('-') && token.text.len() > 1;
            if !is_switch {
                arguments.ordered.push(token.text);
                continue;
            }

            let body = &token.text[1..];
            if body == "?" || body.eq_ignore_ascii_case("help") {
                arguments.help = true;
                arguments.switches.insert("?".to_string(), None);
                continue;
            }

            if let Some((name, value)) = body.split_once('=') {
                arguments
                    .switches
                    .insert(name.to_lowercase(), Some(value.to_string()));
            } else {
                // A quoted token immediately after a bare switch is its value.
                let value = match iter.peek() {
                    Some(next) if next.quoted => iter.next().map(|t| t.text),
                    _ => None,
                };
                arguments.switches.insert(body.to_lowercase(), value);
            }
        }

        Some(Self {
            command,
            arguments,
            raw,
        })
    }

    /// The command name as entered. Lookup is case-insensitive.
    #[must_use]
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Parsed arguments.
    #[must_use]
    pub const fn arguments(&self) -> &Arguments {
        &self.arguments
    }

    /// The original request line, used when forwarding to a shell session.
    #[must_use]
    pub fn to_command_line(&self) -> &str {
        &self.raw
    }
}
