use std::path::PathBuf;

use crate::common::{Error, ParsedCommand};

/// Split one input line into a [`ParsedCommand`].
///
/// Tokens are separated by whitespace. `<` and `>` take the next token as a
/// redirection path; an `&` as the final token requests background execution
/// (anywhere else it is an ordinary argument); a line whose first token
/// starts with `#` is a comment. Blank lines, comments and lines without a
/// command name yield `None`.
pub(super) fn parse_line(line: &str) -> Result<Option<ParsedCommand>, Error> {
    let mut tokens = line.split_whitespace().peekable();

    match tokens.peek() {
        None => return Ok(None),
        Some(word) if word.starts_with('#') => return Ok(None),
        Some(_) => {}
    }

    let mut cmd = ParsedCommand::default();

    while let Some(token) = tokens.next() {
        match token {
            "<" => cmd.input_file = Some(redirect_target("<", tokens.next())?),
            ">" => cmd.output_file = Some(redirect_target(">", tokens.next())?),
            "&" if tokens.peek().is_none() => cmd.is_bg = true,
            word => cmd.argv.push(word.into()),
        }
    }

    if cmd.argv.is_empty() {
        return Ok(None);
    }

    Ok(Some(cmd))
}

fn redirect_target(operator: &str, token: Option<&str>) -> Result<PathBuf, Error> {
    match token {
        Some(path) => Ok(PathBuf::from(path)),
        None => Err(Error::Parse(format!("expected a path after '{operator}'"))),
    }
}
