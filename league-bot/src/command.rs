// Prefix command parsing: message text -> typed command.

use thiserror::Error;

use crate::protocol::UserId;

/// A recognised command with its arguments. Numeric arguments are kept
/// signed so handlers can reject out-of-range values with a proper message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Fine {
        target: UserId,
        amount: i64,
        reason: Option<String>,
    },
    Bail {
        target: UserId,
        amount: i64,
    },
    Teams,
    Profile,
    Sign {
        target: UserId,
        seasons: i64,
    },
    Release {
        target: UserId,
    },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Fine { .. } => "fine",
            Command::Bail { .. } => "bail",
            Command::Teams => "teams",
            Command::Profile => "profile",
            Command::Sign { .. } => "sign",
            Command::Release { .. } => "release",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("❌ Missing argument. Usage: `{prefix}{usage}`")]
    MissingArgument { prefix: String, usage: &'static str },

    #[error("❌ `{raw}` is not a member. Mention them or use their user ID.")]
    InvalidUser { raw: String },

    #[error("❌ `{raw}` is not a whole number. Usage: `{prefix}{usage}`")]
    InvalidNumber {
        raw: String,
        prefix: String,
        usage: &'static str,
    },
}

const FINE_USAGE: &str = "fine <user> <amount> [reason]";
const BAIL_USAGE: &str = "bail <user> <amount>";
const SIGN_USAGE: &str = "sign <user> <seasons>";
const RELEASE_USAGE: &str = "release <user>";

/// Parse `content` as a prefixed command.
///
/// Returns `None` when the message is not addressed to the bot (no prefix, or
/// an unknown command name), `Some(Err(..))` when a known command has bad
/// arguments.
pub fn parse(prefix: &str, content: &str) -> Option<Result<Command, ParseError>> {
    let body = content.trim_start().strip_prefix(prefix)?;
    let (name, rest) = split_word(body);

    let mut args = Args {
        rest,
        prefix,
        usage: "",
    };

    let result = match name {
        "fine" => {
            args.usage = FINE_USAGE;
            parse_fine(&mut args)
        }
        "bail" => {
            args.usage = BAIL_USAGE;
            parse_bail(&mut args)
        }
        "teams" => Ok(Command::Teams),
        "profile" => Ok(Command::Profile),
        "sign" => {
            args.usage = SIGN_USAGE;
            parse_sign(&mut args)
        }
        "release" => {
            args.usage = RELEASE_USAGE;
            args.user().map(|target| Command::Release { target })
        }
        _ => return None,
    };

    Some(result)
}

fn parse_fine(args: &mut Args<'_>) -> Result<Command, ParseError> {
    let target = args.user()?;
    let amount = args.number()?;
    let reason = args.remainder();
    Ok(Command::Fine {
        target,
        amount,
        reason,
    })
}

fn parse_bail(args: &mut Args<'_>) -> Result<Command, ParseError> {
    Ok(Command::Bail {
        target: args.user()?,
        amount: args.number()?,
    })
}

fn parse_sign(args: &mut Args<'_>) -> Result<Command, ParseError> {
    Ok(Command::Sign {
        target: args.user()?,
        seasons: args.number()?,
    })
}

/// Parse a user reference: `<@123>`, `<@!123>` or a bare `123`.
pub fn parse_user(raw: &str) -> Option<UserId> {
    let inner = raw
        .strip_prefix("<@")
        .and_then(|s| s.strip_suffix('>'))
        .map(|s| s.strip_prefix('!').unwrap_or(s))
        .unwrap_or(raw);
    if inner.is_empty() || !inner.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    inner.parse().ok()
}

// ---------------------------------------------------------------------------
// Argument cursor
// ---------------------------------------------------------------------------

struct Args<'a> {
    rest: &'a str,
    prefix: &'a str,
    usage: &'static str,
}

impl<'a> Args<'a> {
    fn next_word(&mut self) -> Result<&'a str, ParseError> {
        let (word, rest) = split_word(self.rest);
        if word.is_empty() {
            return Err(ParseError::MissingArgument {
                prefix: self.prefix.to_string(),
                usage: self.usage,
            });
        }
        self.rest = rest;
        Ok(word)
    }

    fn user(&mut self) -> Result<UserId, ParseError> {
        let word = self.next_word()?;
        parse_user(word).ok_or_else(|| ParseError::InvalidUser {
            raw: word.to_string(),
        })
    }

    fn number(&mut self) -> Result<i64, ParseError> {
        let word = self.next_word()?;
        word.parse().map_err(|_| ParseError::InvalidNumber {
            raw: word.to_string(),
            prefix: self.prefix.to_string(),
            usage: self.usage,
        })
    }

    /// Everything left on the line, trimmed; `None` if blank.
    fn remainder(&mut self) -> Option<String> {
        let text = self.rest.trim();
        self.rest = "";
        (!text.is_empty()).then(|| text.to_string())
    }
}

/// Split off the first whitespace-delimited word. The remainder keeps its
/// internal spacing.
fn split_word(s: &str) -> (&str, &str) {
    let s = s.trim_start();
    match s.find(char::is_whitespace) {
        Some(idx) => (&s[..idx], &s[idx..]),
        None => (s, ""),
    }
}
