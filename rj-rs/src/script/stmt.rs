//! Line classification and statement parsing.
//!
//! A script is processed line by line.  `#` starts a comment that runs to the
//! end of the line.  A line containing `;` is a statement (everything after
//! the first `;` is ignored); any other non-blank line is output text.
//!
//! ```text
//! VAR a = RAND(1,9);      statement
//! IF a > 5;               statement
//! a is {a}                text
//! ENDIF;                  statement
//! ```

use std::fmt;

use super::token::{tokenize_statement, Token};

/// Statement keywords, matched case-insensitively.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    Var,
    If,
    Elif,
    Else,
    Endif,
    While,
    Endwhile,
    Start,
    End,
    Time,
}

impl Keyword {
    pub fn parse(word: &str) -> Option<Self> {
        let kw = match word.to_ascii_lowercase().as_str() {
            "var" => Keyword::Var,
            "if" => Keyword::If,
            "elif" => Keyword::Elif,
            "else" => Keyword::Else,
            "endif" => Keyword::Endif,
            "while" => Keyword::While,
            "endwhile" => Keyword::Endwhile,
            "start" => Keyword::Start,
            "end" => Keyword::End,
            "time" => Keyword::Time,
            _ => return None,
        };
        Some(kw)
    }
}

impl fmt::Display for Keyword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Keyword::Var => "VAR",
            Keyword::If => "IF",
            Keyword::Elif => "ELIF",
            Keyword::Else => "ELSE",
            Keyword::Endif => "ENDIF",
            Keyword::While => "WHILE",
            Keyword::Endwhile => "ENDWHILE",
            Keyword::Start => "START",
            Keyword::End => "END",
            Keyword::Time => "TIME",
        };
        f.write_str(s)
    }
}

/// A `;`-terminated line.
#[derive(Debug, Clone)]
pub struct Statement<'a> {
    /// The line with its comment removed.
    pub line: &'a str,
    /// Tokens of the text before the first `;`, spans relative to `line`.
    pub tokens: Vec<Token>,
    /// Byte offset of the first `;`.
    pub semi: usize,
    /// Byte offset of the last `;`.
    pub last_semi: usize,
}

impl Statement<'_> {
    pub fn keyword(&self) -> Option<Keyword> {
        self.tokens.first().and_then(|t| Keyword::parse(&t.text))
    }

    /// Tokens after the keyword.
    pub fn args(&self) -> &[Token] {
        self.tokens.get(1..).unwrap_or(&[])
    }

    pub fn has_multiple(&self) -> bool {
        self.semi != self.last_semi
    }
}

#[derive(Debug, Clone)]
pub enum Line<'a> {
    Blank,
    /// Output text, comment removed.
    Text(&'a str),
    Code(Statement<'a>),
}

/// Cut a line at its first `#`.
pub fn strip_comment(line: &str) -> &str {
    line.find('#').map_or(line, |i| &line[..i])
}

pub fn parse_line(raw: &str) -> Line<'_> {
    if raw.trim().is_empty() {
        return Line::Blank;
    }
    let line = strip_comment(raw);
    match (line.find(';'), line.rfind(';')) {
        (Some(semi), Some(last_semi)) => Line::Code(Statement {
            line,
            tokens: tokenize_statement(&line[..semi]),
            semi,
            last_semi,
        }),
        _ => Line::Text(line),
    }
}

/// Keyword of a line if it is a statement.
pub fn line_keyword(raw: &str) -> Option<Keyword> {
    match parse_line(raw) {
        Line::Code(stmt) => stmt.keyword(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keywords_ignore_case() {
        assert_eq!(Keyword::parse("endWhile"), Some(Keyword::Endwhile));
        assert_eq!(Keyword::parse("VAR"), Some(Keyword::Var));
        assert_eq!(Keyword::parse("LET"), None);
        assert_eq!(Keyword::Elif.to_string(), "ELIF");
    }

    #[test]
    fn classify_lines() {
        assert!(matches!(parse_line("   "), Line::Blank));
        assert!(matches!(parse_line("some {a} text"), Line::Text("some {a} text")));
        assert!(matches!(parse_line("text # VAR a = 1;"), Line::Text("text ")));
        assert!(matches!(parse_line("# only a comment"), Line::Text("")));
    }

    #[test]
    fn statement_parts() {
        let Line::Code(stmt) = parse_line("  VAR a = 1; b; # trailing") else {
            panic!("expected a statement");
        };
        assert_eq!(stmt.keyword(), Some(Keyword::Var));
        assert_eq!(stmt.tokens.len(), 4);
        assert_eq!(stmt.tokens[0].start, 2);
        assert_eq!(stmt.args()[0].text, "a");
        assert_eq!((stmt.semi, stmt.last_semi), (11, 14));
        assert!(stmt.has_multiple());
    }

    #[test]
    fn statement_without_keyword() {
        let Line::Code(stmt) = parse_line(";") else {
            panic!("expected a statement");
        };
        assert!(stmt.tokens.is_empty());
        assert_eq!(stmt.keyword(), None);
        assert!(stmt.args().is_empty());
        assert_eq!(line_keyword("if(a>1);"), Some(Keyword::If));
        assert_eq!(line_keyword("hello"), None);
    }
}
