//! Tokenizer with indentation tracking.
//!
//! Produces a flat token stream where block structure is expressed as
//! `Indent`/`Dedent` tokens. Newlines inside brackets are ignored.

use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: usize,
    pub col: usize,
}

impl Token {
    fn new(kind: TokenKind, line: usize, col: usize) -> Self {
        Self { kind, line, col }
    }
}

/// Raw piece of an f-string, before the embedded expressions are parsed.
#[derive(Debug, Clone, PartialEq)]
pub enum FStringPiece {
    Literal(String),
    Field {
        source: String,
        spec: Option<String>,
        line: usize,
        col: usize,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Newline,
    Indent,
    Dedent,
    Eof,

    Ident(String),
    /// `i64::MIN` stands for the magnitude `2**63`, which is only valid
    /// directly under a unary minus.
    Int(i64),
    Float(f64),
    Str(String),
    FStr(Vec<FStringPiece>),

    Def,
    Return,
    If,
    Elif,
    Else,
    While,
    For,
    In,
    Not,
    And,
    Or,
    Is,
    Break,
    Continue,
    Pass,
    Import,
    From,
    As,
    True,
    False,
    None,
    Lambda,
    Try,
    Except,
    Assert,

    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Colon,
    Semicolon,
    Dot,

    Assign,
    PlusAssign,
    MinusAssign,
    StarAssign,
    SlashAssign,
    DoubleSlashAssign,
    PercentAssign,

    Plus,
    Minus,
    Star,
    DoubleStar,
    Slash,
    DoubleSlash,
    Percent,

    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    EqualEqual,
    BangEqual,
}

impl TokenKind {
    /// Human-readable rendering for diagnostics.
    pub fn describe(&self) -> String {
        match self {
            TokenKind::Newline => "end of line".to_string(),
            TokenKind::Indent => "indent".to_string(),
            TokenKind::Dedent => "dedent".to_string(),
            TokenKind::Eof => "end of input".to_string(),
            TokenKind::Ident(name) => format!("name '{}'", name),
            TokenKind::Int(v) => format!("number {}", v),
            TokenKind::Float(v) => format!("number {}", v),
            TokenKind::Str(_) | TokenKind::FStr(_) => "string literal".to_string(),
            other => format!("'{}'", other.symbol()),
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            TokenKind::Def => "def",
            TokenKind::Return => "return",
            TokenKind::If => "if",
            TokenKind::Elif => "elif",
            TokenKind::Else => "else",
            TokenKind::While => "while",
            TokenKind::For => "for",
            TokenKind::In => "in",
            TokenKind::Not => "not",
            TokenKind::And => "and",
            TokenKind::Or => "or",
            TokenKind::Is => "is",
            TokenKind::Break => "break",
            TokenKind::Continue => "continue",
            TokenKind::Pass => "pass",
            TokenKind::Import => "import",
            TokenKind::From => "from",
            TokenKind::As => "as",
            TokenKind::True => "True",
            TokenKind::False => "False",
            TokenKind::None => "None",
            TokenKind::Lambda => "lambda",
            TokenKind::Try => "try",
            TokenKind::Except => "except",
            TokenKind::Assert => "assert",
            TokenKind::LParen => "(",
            TokenKind::RParen => ")",
            TokenKind::LBracket => "[",
            TokenKind::RBracket => "]",
            TokenKind::LBrace => "{",
            TokenKind::RBrace => "}",
            TokenKind::Comma => ",",
            TokenKind::Colon => ":",
            TokenKind::Semicolon => ";",
            TokenKind::Dot => ".",
            TokenKind::Assign => "=",
            TokenKind::PlusAssign => "+=",
            TokenKind::MinusAssign => "-=",
            TokenKind::StarAssign => "*=",
            TokenKind::SlashAssign => "/=",
            TokenKind::DoubleSlashAssign => "//=",
            TokenKind::PercentAssign => "%=",
            TokenKind::Plus => "+",
            TokenKind::Minus => "-",
            TokenKind::Star => "*",
            TokenKind::DoubleStar => "**",
            TokenKind::Slash => "/",
            TokenKind::DoubleSlash => "//",
            TokenKind::Percent => "%",
            TokenKind::Less => "<",
            TokenKind::LessEqual => "<=",
            TokenKind::Greater => ">",
            TokenKind::GreaterEqual => ">=",
            TokenKind::EqualEqual => "==",
            TokenKind::BangEqual => "!=",
            _ => "?",
        }
    }
}

#[derive(Debug, Clone)]
pub struct LexerError {
    pub message: String,
    pub line: usize,
    pub col: usize,
}

impl fmt::Display for LexerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}:{}", self.message, self.line, self.col)
    }
}

impl std::error::Error for LexerError {}

pub fn tokenize(source: &str) -> Result<Vec<Token>, LexerError> {
    Lexer::new(source).tokenize()
}

const TAB_WIDTH: usize = 8;
const MAX_INDENT_LEVELS: usize = 100;
const MAX_BRACKET_DEPTH: usize = 200;

struct Lexer {
    chars: Vec<char>,
    index: usize,
    line: usize,
    col: usize,
    indents: Vec<usize>,
    /// Open brackets with the position they were opened at.
    brackets: Vec<(char, usize, usize)>,
    at_line_start: bool,
    line_has_tokens: bool,
    output: Vec<Token>,
}

impl Lexer {
    fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            index: 0,
            line: 1,
            col: 1,
            indents: vec![0],
            brackets: Vec::new(),
            at_line_start: true,
            line_has_tokens: false,
            output: Vec::new(),
        }
    }

    fn tokenize(mut self) -> Result<Vec<Token>, LexerError> {
        while self.index < self.chars.len() {
            if self.at_line_start && self.brackets.is_empty() {
                if !self.handle_indentation()? {
                    continue;
                }
            }

            let c = self.chars[self.index];

            if c == '\n' {
                self.end_line();
                self.advance(1);
                continue;
            }

            if c == '\\' && self.peek_char(1) == Some('\n') {
                self.advance(2);
                continue;
            }

            if c == '#' {
                self.skip_comment();
                continue;
            }

            if c.is_whitespace() {
                self.advance(1);
                continue;
            }

            let token = if c == '"' || c == '\'' {
                self.lex_string(false)?
            } else if (c == 'f' || c == 'F')
                && matches!(self.peek_char(1), Some('"') | Some('\''))
            {
                self.advance(1);
                self.lex_string(true)?
            } else if c.is_ascii_digit()
                || (c == '.' && self.peek_char(1).map_or(false, |d| d.is_ascii_digit()))
            {
                self.lex_number()?
            } else if is_ident_start(c) {
                self.lex_ident_or_keyword()
            } else {
                let token = self.lex_punct()?;
                self.track_nesting(&token)?;
                token
            };
            self.line_has_tokens = true;
            self.output.push(token);
        }

        if let Some(&(open, line, col)) = self.brackets.last() {
            return Err(self.error(&format!("'{}' was never closed", open), line, col));
        }

        self.end_line();
        while self.indents.len() > 1 {
            self.indents.pop();
            self.output
                .push(Token::new(TokenKind::Dedent, self.line, self.col));
        }
        self.output.push(Token::new(TokenKind::Eof, self.line, self.col));
        Ok(self.output)
    }

    /// Measure leading whitespace and emit `Indent`/`Dedent` tokens.
    ///
    /// Returns `false` when the line is blank or comment-only and was skipped.
    fn handle_indentation(&mut self) -> Result<bool, LexerError> {
        let mut width = 0;
        let mut offset = 0;
        while let Some(c) = self.peek_char(offset) {
            match c {
                ' ' => width += 1,
                '\t' => width = (width / TAB_WIDTH + 1) * TAB_WIDTH,
                '\r' | '\x0c' => {}
                _ => break,
            }
            offset += 1;
        }

        match self.peek_char(offset) {
            None | Some('\n') | Some('#') => {
                self.advance(offset);
                if self.peek_char(0) == Some('#') {
                    self.skip_comment();
                }
                if self.peek_char(0) == Some('\n') {
                    self.advance(1);
                }
                return Ok(false);
            }
            _ => {}
        }

        self.advance(offset);
        self.at_line_start = false;
        let current = self.indents.last().copied().unwrap_or(0);

        if width > current {
            if self.indents.len() > MAX_INDENT_LEVELS {
                return Err(self.error("too many levels of indentation", self.line, 1));
            }
            self.indents.push(width);
            self.output.push(Token::new(TokenKind::Indent, self.line, 1));
        } else if width < current {
            while self.indents.last().copied().unwrap_or(0) > width {
                self.indents.pop();
                self.output.push(Token::new(TokenKind::Dedent, self.line, 1));
            }
            if self.indents.last().copied().unwrap_or(0) != width {
                return Err(self.error(
                    "unindent does not match any outer indentation level",
                    self.line,
                    self.col,
                ));
            }
        }
        Ok(true)
    }

    fn end_line(&mut self) {
        if self.brackets.is_empty() {
            if self.line_has_tokens {
                self.output
                    .push(Token::new(TokenKind::Newline, self.line, self.col));
            }
            self.line_has_tokens = false;
            self.at_line_start = true;
        }
    }

    fn lex_string(&mut self, formatted: bool) -> Result<Token, LexerError> {
        let start_line = self.line;
        let start_col = self.col;
        let quote = self.chars[self.index];
        let triple = self.peek_char(1) == Some(quote) && self.peek_char(2) == Some(quote);
        self.advance(if triple { 3 } else { 1 });

        let mut value = String::new();
        loop {
            let Some(c) = self.peek_char(0) else {
                return Err(self.error("unterminated string literal", start_line, start_col));
            };
            if c == quote {
                if !triple {
                    self.advance(1);
                    break;
                }
                if self.peek_char(1) == Some(quote) && self.peek_char(2) == Some(quote) {
                    self.advance(3);
                    break;
                }
            }
            if c == '\n' && !triple {
                return Err(self.error("unterminated string literal", start_line, start_col));
            }
            if c == '\\' {
                let escaped = match self.peek_char(1) {
                    Some('n') => '\n',
                    Some('t') => '\t',
                    Some('r') => '\r',
                    Some('0') => '\0',
                    Some('"') => '"',
                    Some('\'') => '\'',
                    Some('\\') => '\\',
                    Some('\n') => {
                        self.advance(2);
                        continue;
                    }
                    Some(other) => {
                        value.push('\\');
                        other
                    }
                    None => {
                        return Err(self.error(
                            "unterminated string literal",
                            start_line,
                            start_col,
                        ));
                    }
                };
                value.push(escaped);
                self.advance(2);
                continue;
            }
            value.push(c);
            self.advance(1);
        }

        if formatted {
            let pieces = split_fstring(&value, start_line, start_col)?;
            Ok(Token::new(TokenKind::FStr(pieces), start_line, start_col))
        } else {
            Ok(Token::new(TokenKind::Str(value), start_line, start_col))
        }
    }

    fn lex_number(&mut self) -> Result<Token, LexerError> {
        let start_line = self.line;
        let start_col = self.col;
        let mut raw = String::new();
        let mut has_dot = false;
        let mut has_exp = false;

        while let Some(c) = self.peek_char(0) {
            if c.is_ascii_digit() || c == '_' {
                raw.push(c);
                self.advance(1);
                continue;
            }
            if c == '.' && !has_dot && !has_exp {
                has_dot = true;
                raw.push(c);
                self.advance(1);
                continue;
            }
            if (c == 'e' || c == 'E') && !has_exp {
                let next = self.peek_char(1);
                let signed_digit = matches!(next, Some('+') | Some('-'))
                    && self.peek_char(2).map_or(false, |d| d.is_ascii_digit());
                if !(next.map_or(false, |d| d.is_ascii_digit()) || signed_digit) {
                    break;
                }
                has_exp = true;
                raw.push(c);
                self.advance(1);
                if signed_digit {
                    if let Some(sign) = self.peek_char(0) {
                        raw.push(sign);
                        self.advance(1);
                    }
                }
                continue;
            }
            break;
        }

        if self.peek_char(0).map_or(false, is_ident_start) {
            return Err(self.error("invalid decimal literal", start_line, start_col));
        }

        let clean = raw.replace('_', "");
        if has_dot || has_exp {
            let value = clean
                .parse::<f64>()
                .map_err(|_| self.error("invalid float literal", start_line, start_col))?;
            Ok(Token::new(TokenKind::Float(value), start_line, start_col))
        } else {
            let value = match clean.parse::<u64>() {
                Ok(v) if v == i64::MIN.unsigned_abs() => i64::MIN,
                Ok(v) => i64::try_from(v).map_err(|_| {
                    self.error("integer literal is too large", start_line, start_col)
                })?,
                Err(_) => {
                    return Err(self.error("integer literal is too large", start_line, start_col))
                }
            };
            Ok(Token::new(TokenKind::Int(value), start_line, start_col))
        }
    }

    fn lex_ident_or_keyword(&mut self) -> Token {
        let start_line = self.line;
        let start_col = self.col;
        let mut ident = String::new();
        while let Some(c) = self.peek_char(0) {
            if is_ident_continue(c) {
                ident.push(c);
                self.advance(1);
            } else {
                break;
            }
        }

        let kind = match ident.as_str() {
            "def" => TokenKind::Def,
            "return" => TokenKind::Return,
            "if" => TokenKind::If,
            "elif" => TokenKind::Elif,
            "else" => TokenKind::Else,
            "while" => TokenKind::While,
            "for" => TokenKind::For,
            "in" => TokenKind::In,
            "not" => TokenKind::Not,
            "and" => TokenKind::And,
            "or" => TokenKind::Or,
            "is" => TokenKind::Is,
            "break" => TokenKind::Break,
            "continue" => TokenKind::Continue,
            "pass" => TokenKind::Pass,
            "import" => TokenKind::Import,
            "from" => TokenKind::From,
            "as" => TokenKind::As,
            "True" => TokenKind::True,
            "False" => TokenKind::False,
            "None" => TokenKind::None,
            "lambda" => TokenKind::Lambda,
            "try" => TokenKind::Try,
            "except" => TokenKind::Except,
            "assert" => TokenKind::Assert,
            _ => TokenKind::Ident(ident),
        };

        Token::new(kind, start_line, start_col)
    }

    fn lex_punct(&mut self) -> Result<Token, LexerError> {
        let start_line = self.line;
        let start_col = self.col;
        let c = self.chars[self.index];
        let next = self.peek_char(1);
        let third = self.peek_char(2);

        let (kind, len) = match (c, next, third) {
            ('/', Some('/'), Some('=')) => (TokenKind::DoubleSlashAssign, 3),
            ('/', Some('/'), _) => (TokenKind::DoubleSlash, 2),
            ('*', Some('*'), _) => (TokenKind::DoubleStar, 2),
            ('=', Some('='), _) => (TokenKind::EqualEqual, 2),
            ('!', Some('='), _) => (TokenKind::BangEqual, 2),
            ('<', Some('='), _) => (TokenKind::LessEqual, 2),
            ('>', Some('='), _) => (TokenKind::GreaterEqual, 2),
            ('+', Some('='), _) => (TokenKind::PlusAssign, 2),
            ('-', Some('='), _) => (TokenKind::MinusAssign, 2),
            ('*', Some('='), _) => (TokenKind::StarAssign, 2),
            ('/', Some('='), _) => (TokenKind::SlashAssign, 2),
            ('%', Some('='), _) => (TokenKind::PercentAssign, 2),
            _ => {
                let kind = match c {
                    '(' => TokenKind::LParen,
                    ')' => TokenKind::RParen,
                    '[' => TokenKind::LBracket,
                    ']' => TokenKind::RBracket,
                    '{' => TokenKind::LBrace,
                    '}' => TokenKind::RBrace,
                    ',' => TokenKind::Comma,
                    ':' => TokenKind::Colon,
                    ';' => TokenKind::Semicolon,
                    '.' => TokenKind::Dot,
                    '=' => TokenKind::Assign,
                    '+' => TokenKind::Plus,
                    '-' => TokenKind::Minus,
                    '*' => TokenKind::Star,
                    '/' => TokenKind::Slash,
                    '%' => TokenKind::Percent,
                    '<' => TokenKind::Less,
                    '>' => TokenKind::Greater,
                    _ => {
                        return Err(self.error(
                            &format!("invalid character '{}'", c),
                            start_line,
                            start_col,
                        ));
                    }
                };
                (kind, 1)
            }
        };
        self.advance(len);
        Ok(Token::new(kind, start_line, start_col))
    }

    fn track_nesting(&mut self, token: &Token) -> Result<(), LexerError> {
        if self.brackets.len() >= MAX_BRACKET_DEPTH
            && matches!(
                token.kind,
                TokenKind::LParen | TokenKind::LBracket | TokenKind::LBrace
            )
        {
            return Err(self.error("too many nested parentheses", token.line, token.col));
        }
        let (open, close) = match token.kind {
            TokenKind::LParen => {
                self.brackets.push(('(', token.line, token.col));
                return Ok(());
            }
            TokenKind::LBracket => {
                self.brackets.push(('[', token.line, token.col));
                return Ok(());
            }
            TokenKind::LBrace => {
                self.brackets.push(('{', token.line, token.col));
                return Ok(());
            }
            TokenKind::RParen => ('(', ')'),
            TokenKind::RBracket => ('[', ']'),
            TokenKind::RBrace => ('{', '}'),
            _ => return Ok(()),
        };
        match self.brackets.pop() {
            Some((opened, _, _)) if opened == open => Ok(()),
            Some((opened, _, _)) => Err(self.error(
                &format!(
                    "closing parenthesis '{}' does not match opening parenthesis '{}'",
                    close, opened
                ),
                token.line,
                token.col,
            )),
            None => Err(self.error(&format!("unmatched '{}'", close), token.line, token.col)),
        }
    }

    fn skip_comment(&mut self) {
        while let Some(c) = self.peek_char(0) {
            if c == '\n' {
                break;
            }
            self.advance(1);
        }
    }

    fn peek_char(&self, offset: usize) -> Option<char> {
        self.chars.get(self.index + offset).copied()
    }

    fn advance(&mut self, count: usize) {
        for _ in 0..count {
            if let Some(c) = self.peek_char(0) {
                self.index += 1;
                if c == '\n' {
                    self.line += 1;
                    self.col = 1;
                } else {
                    self.col += 1;
                }
            }
        }
    }

    fn error(&self, message: &str, line: usize, col: usize) -> LexerError {
        LexerError {
            message: message.to_string(),
            line,
            col,
        }
    }
}

/// Split f-string content into literal text and `{expr[:spec]}` fields.
fn split_fstring(raw: &str, line: usize, col: usize) -> Result<Vec<FStringPiece>, LexerError> {
    let chars: Vec<char> = raw.chars().collect();
    let mut pieces = Vec::new();
    let mut literal = String::new();
    let mut i = 0;

    let err = |message: &str| LexerError {
        message: format!("f-string: {}", message),
        line,
        col,
    };

    while i < chars.len() {
        let c = chars[i];
        if c == '{' && chars.get(i + 1) == Some(&'{') {
            literal.push('{');
            i += 2;
            continue;
        }
        if c == '}' && chars.get(i + 1) == Some(&'}') {
            literal.push('}');
            i += 2;
            continue;
        }
        if c == '}' {
            return Err(err("single '}' is not allowed"));
        }
        if c != '{' {
            literal.push(c);
            i += 1;
            continue;
        }

        if !literal.is_empty() {
            pieces.push(FStringPiece::Literal(std::mem::take(&mut literal)));
        }
        i += 1;
        let mut depth = 0usize;
        let mut source = String::new();
        let mut spec: Option<String> = None;
        loop {
            let Some(&ch) = chars.get(i) else {
                return Err(err("expecting '}'"));
            };
            i += 1;
            match ch {
                '(' | '[' | '{' => depth += 1,
                ')' | ']' => depth = depth.saturating_sub(1),
                '}' if depth > 0 => depth -= 1,
                '}' => break,
                ':' if depth == 0 && spec.is_none() => {
                    spec = Some(String::new());
                    continue;
                }
                _ => {}
            }
            match spec.as_mut() {
                Some(s) => s.push(ch),
                None => source.push(ch),
            }
        }
        if source.trim().is_empty() {
            return Err(err("empty expression not allowed"));
        }
        pieces.push(FStringPiece::Field {
            source,
            spec,
            line,
            col,
        });
    }

    if !literal.is_empty() {
        pieces.push(FStringPiece::Literal(literal));
    }
    Ok(pieces)
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_ident_continue(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_indent_and_dedent() {
        let tokens = kinds("if x:\n    y = 1\nz = 2\n");
        assert_eq!(
            tokens,
            vec![
                TokenKind::If,
                TokenKind::Ident("x".into()),
                TokenKind::Colon,
                TokenKind::Newline,
                TokenKind::Indent,
                TokenKind::Ident("y".into()),
                TokenKind::Assign,
                TokenKind::Int(1),
                TokenKind::Newline,
                TokenKind::Dedent,
                TokenKind::Ident("z".into()),
                TokenKind::Assign,
                TokenKind::Int(2),
                TokenKind::Newline,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_blank_and_comment_lines_do_not_affect_blocks() {
        let tokens = kinds("x = 1\n\n   # note\n\ny = 2");
        assert!(!tokens.contains(&TokenKind::Indent));
        assert_eq!(tokens.iter().filter(|k| **k == TokenKind::Newline).count(), 2);
    }

    #[test]
    fn test_newlines_inside_brackets_are_ignored() {
        let tokens = kinds("x = [\n  1,\n  2,\n]\n");
        assert_eq!(tokens.iter().filter(|k| **k == TokenKind::Newline).count(), 1);
    }

    #[test]
    fn test_numbers() {
        assert_eq!(kinds("1_000")[0], TokenKind::Int(1000));
        assert_eq!(kinds("9223372036854775808")[0], TokenKind::Int(i64::MIN));
        assert!(tokenize("9223372036854775809").is_err());
        assert_eq!(kinds("2.5")[0], TokenKind::Float(2.5));
        assert_eq!(kinds("1e-3")[0], TokenKind::Float(0.001));
        assert_eq!(kinds(".5")[0], TokenKind::Float(0.5));
    }

    #[test]
    fn test_strings_and_escapes() {
        assert_eq!(kinds("'a\\nb'")[0], TokenKind::Str("a\nb".into()));
        assert_eq!(kinds("\"it's\"")[0], TokenKind::Str("it's".into()));
        assert_eq!(kinds("\"\"\"two\nlines\"\"\"")[0], TokenKind::Str("two\nlines".into()));
    }

    #[test]
    fn test_fstring_fields() {
        let tokens = kinds("f\"total={x:.2f} {{raw}}\"");
        let TokenKind::FStr(pieces) = &tokens[0] else {
            panic!("expected f-string");
        };
        assert_eq!(pieces.len(), 3);
        assert_eq!(pieces[0], FStringPiece::Literal("total=".into()));
        match &pieces[1] {
            FStringPiece::Field { source, spec, .. } => {
                assert_eq!(source, "x");
                assert_eq!(spec.as_deref(), Some(".2f"));
            }
            other => panic!("unexpected piece {:?}", other),
        }
        assert_eq!(pieces[2], FStringPiece::Literal(" {raw}".into()));
    }

    #[test]
    fn test_operators() {
        assert_eq!(
            kinds("a //= 2 ** 3")[..5],
            [
                TokenKind::Ident("a".into()),
                TokenKind::DoubleSlashAssign,
                TokenKind::Int(2),
                TokenKind::DoubleStar,
                TokenKind::Int(3),
            ]
        );
    }

    #[test]
    fn test_errors_carry_line() {
        let err = tokenize("x = 1\ny = 'open\n").unwrap_err();
        assert_eq!(err.line, 2);

        let err = tokenize("if x:\n        a = 1\n    b = 2\n").unwrap_err();
        assert_eq!(err.line, 3);
        assert!(err.message.contains("unindent"));

        let err = tokenize("f(1,\n2\n").unwrap_err();
        assert_eq!(err.line, 1);
        assert!(err.message.contains("never closed"));

        let err = tokenize("x = (1]").unwrap_err();
        assert!(err.message.contains("does not match"));

        let err = tokenize("x = 1 $ 2").unwrap_err();
        assert!(err.message.contains("invalid character"));
    }
}
