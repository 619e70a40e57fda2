//! Turns raw assistant text into what the user gets to see.

use crate::redirect::{ partial_tag_len, TAG_OPEN };
use lazy_static::lazy_static;
use regex::Regex;

pub const CHECKING_STATUS: &str = "*Checking database...*";

lazy_static! {
    static ref FUNCTION_BLOCK: Regex = Regex::new(r"(?s)<function.*?</function>").unwrap();
    static ref OPEN_FUNCTION: Regex = Regex::new(r"(?s)<function.*$").unwrap();
}

/// Final display text for a finished (or navigated) reply.
pub fn sanitize(raw: &str) -> String {
    let visible = match raw.find(TAG_OPEN) {
        Some(start) => &raw[..start],
        None => raw,
    };

    let text = FUNCTION_BLOCK.replace_all(visible, format!("\n\n{}\n\n", CHECKING_STATUS).as_str());
    let text = OPEN_FUNCTION.replace(&text, format!("\n{}", CHECKING_STATUS).as_str());
    text.replace("Action: Navigating", "Navigating").trim().to_string()
}

/// Display text while more chunks may follow. A trailing fragment that
/// could be the start of a tag is not shown yet.
pub fn sanitize_partial(raw: &str) -> String {
    let keep = raw.len() - partial_tag_len(raw);
    sanitize(&raw[..keep])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_tag_and_everything_after() {
        assert_eq!(sanitize("Sure! I'll take you there. __REDIRECT:/items__ extra"), "Sure! I'll take you there.");
        assert_eq!(sanitize("Going now __REDIRECT:/ite"), "Going now");
    }

    #[test]
    fn rewrites_tool_markup() {
        let raw = "Searching for wallet...<function=searchItems>{\"query\":\"wallet\"}</function>Found it.";
        assert_eq!(sanitize(raw), "Searching for wallet...\n\n*Checking database...*\n\nFound it.");

        assert_eq!(sanitize("Let me look. <function=searchItems>{\"query\""), "Let me look. \n*Checking database...*");
        assert_eq!(sanitize("Action: Navigating to /items."), "Navigating to /items.");
    }

    #[test]
    fn partial_holds_back_tag_prefix() {
        assert_eq!(sanitize_partial("Taking you there. __REDIR"), "Taking you there.");
        assert_eq!(sanitize_partial("snake_case"), "snake_case");
        assert_eq!(sanitize("plain text"), "plain text");
    }
}
