//! Interactive questions.
//!
//! Every question is skipped when the answer came from a flag or the config
//! file. Without a terminal, questions with a default take the default and
//! questions without one are an error.

use dialoguer::{Confirm, Input};

use crate::error::CliError;

/// Trim whitespace and surrounding double quotes from a typed path.
///
/// Paths pasted from a file manager often arrive quoted.
pub fn strip_quotes(input: &str) -> &str {
    let trimmed = input.trim();
    trimmed
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(trimmed)
        .trim()
}

/// Whether questions can be asked.
pub fn interactive() -> bool {
    console::user_attended() && console::Term::stdout().is_term()
}

/// Ask for a required text value. `flag` names the option that skips it.
pub fn ask_text(prompt: &str, flag: &str) -> Result<String, CliError> {
    if !interactive() {
        return Err(CliError::Config(format!(
            "{} is required when not running interactively",
            flag
        )));
    }

    loop {
        let answer: String = Input::new().with_prompt(prompt).interact_text()?;
        let answer = strip_quotes(&answer);
        if !answer.is_empty() {
            return Ok(answer.to_string());
        }
    }
}

/// Ask a yes/no question, taking `default` when no question can be asked.
pub fn ask_confirm(prompt: &str, default: bool, assume_yes: bool) -> Result<bool, CliError> {
    if assume_yes || !interactive() {
        return Ok(default);
    }
    Ok(Confirm::new()
        .with_prompt(prompt)
        .default(default)
        .interact()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_quotes() {
        assert_eq!(strip_quotes("\"C:\\Games\\build.manifest\""), "C:\\Games\\build.manifest");
        assert_eq!(strip_quotes("  /tmp/out  "), "/tmp/out");
        assert_eq!(strip_quotes("\" spaced \""), "spaced");
        assert_eq!(strip_quotes("\"unbalanced"), "\"unbalanced");
        assert_eq!(strip_quotes("\"\""), "");
    }

    #[test]
    fn test_confirm_assume_yes_takes_default() {
        assert!(ask_confirm("Cache?", true, true).unwrap());
        assert!(!ask_confirm("Content?", false, true).unwrap());
    }
}
