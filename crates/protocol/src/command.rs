//! Argument extraction for addressed and prefixed commands.
//!
//! Addressees are the leading `@name` tokens of a message. Everything
//! here works on the previewed text only and never touches the stream.

/// Collects the leading `@name` tokens of `text`, in order, without
/// duplicates. Extraction stops at the first token that does not start
/// with `@`.
pub fn leading_addressees(text: &str) -> Vec<String> {
    let mut names = Vec::new();
    for token in text.split_whitespace() {
        let Some(name) = token.strip_prefix('@') else {
            break;
        };
        if !name.is_empty() && !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    }
    names
}

/// Whether anything follows the leading addressee list.
pub fn has_text_after_addressees(text: &str) -> bool {
    let total = text.split_whitespace().count();
    let addressed = text
        .split_whitespace()
        .take_while(|t| t.starts_with('@'))
        .count();
    total > addressed
}

/// The message body after the leading addressee list, trimmed.
pub fn text_after_addressees(text: &str) -> &str {
    let mut rest = text.trim_start();
    while rest.starts_with('@') {
        match rest.find(char::is_whitespace) {
            Some(end) => rest = rest[end..].trim_start(),
            None => return "",
        }
    }
    rest.trim_end()
}

/// The argument text after a command token such as `-s` or `-p`,
/// trimmed. Empty when the command came alone.
pub fn command_argument(text: &str) -> &str {
    match text.trim().find(char::is_whitespace) {
        Some(end) => text.trim()[end..].trim(),
        None => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collects_leading_addressees() {
        assert_eq!(leading_addressees("@bob hello"), vec!["bob"]);
        assert_eq!(leading_addressees("@bob @ann hi"), vec!["bob", "ann"]);
        assert_eq!(leading_addressees("hello @bob"), Vec::<String>::new());
    }

    #[test]
    fn addressees_stop_at_first_plain_token() {
        assert_eq!(leading_addressees("@bob hi @ann"), vec!["bob"]);
    }

    #[test]
    fn duplicate_addressees_collapse() {
        assert_eq!(leading_addressees("@bob @bob hi"), vec!["bob"]);
    }

    #[test]
    fn bare_at_sign_is_not_an_addressee() {
        assert_eq!(leading_addressees("@ hello"), Vec::<String>::new());
    }

    #[test]
    fn detects_missing_message_body() {
        assert!(!has_text_after_addressees("@bob"));
        assert!(!has_text_after_addressees("@bob @ann"));
        assert!(has_text_after_addressees("@bob hi"));
        assert!(has_text_after_addressees("@bob hi @ann"));
    }

    #[test]
    fn strips_addressees_from_the_body() {
        assert_eq!(text_after_addressees("@bob hello there"), "hello there");
        assert_eq!(text_after_addressees("@bob @ann hello"), "hello");
        assert_eq!(text_after_addressees("@bob"), "");
        assert_eq!(text_after_addressees("plain text"), "plain text");
    }

    #[test]
    fn extracts_command_arguments() {
        assert_eq!(command_argument("-p busy"), "busy");
        assert_eq!(command_argument("-s @bob @ann"), "@bob @ann");
        assert_eq!(command_argument("-p"), "");
        assert_eq!(command_argument("  -p   away  "), "away");
    }
}
