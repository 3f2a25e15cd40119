//! FTS5 MATCH query escaping.

/// Parse and escape a user query for FTS5 MATCH.
///
/// Tokens are split on whitespace with double quotes grouping phrases, then
/// every token is re-quoted with internal quotes doubled, which neutralises
/// FTS5 operator syntax in user input.
pub fn parse_and_escape_query(user_input: &str) -> String {
    let tokens = tokenize(user_input);
    tokens
        .iter()
        .map(|token| format!("\"{}\"", token.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" ")
}

fn tokenize(input: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '\\' if chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => {
                if in_quotes {
                    tokens.push(std::mem::take(&mut current));
                    in_quotes = false;
                } else {
                    if !current.is_empty() {
                        tokens.push(std::mem::take(&mut current));
                    }
                    in_quotes = true;
                }
            }
            c if c.is_whitespace() && !in_quotes => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    // Unbalanced quote: treat the remainder as a phrase.
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_words_are_quoted() {
        assert_eq!(parse_and_escape_query("hello world"), "\"hello\" \"world\"");
    }

    #[test]
    fn quoted_phrases_stay_together() {
        assert_eq!(
            parse_and_escape_query("\"exact phrase\" loose"),
            "\"exact phrase\" \"loose\""
        );
    }

    #[test]
    fn operators_are_neutralised() {
        assert_eq!(parse_and_escape_query("a OR b*"), "\"a\" \"OR\" \"b*\"");
    }

    #[test]
    fn unbalanced_quote_does_not_panic() {
        assert_eq!(parse_and_escape_query("\"dangling"), "\"dangling\"");
    }

    #[test]
    fn escaped_quotes_survive() {
        assert_eq!(parse_and_escape_query(r#"say \"hi\""#), "\"say\" \"hi\"");
    }
}
