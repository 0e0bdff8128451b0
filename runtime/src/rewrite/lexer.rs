//! Minimal ECMAScript tokenizer.
//!
//! Produces spanned tokens for everything a locator needs to see: string,
//! template, regex and numeric literals, identifiers and punctuators.
//! Comments and whitespace are skipped, but a line break between two tokens is
//! recorded on the second one so statement boundaries can be recovered.
//!
//! The regex-versus-division ambiguity is resolved from the previous token.
//! After `)` and `}` that depends on what was closed: a control-statement
//! head (`if (…)`) or a statement block (`function f() {…}`) is followed by
//! a new expression, anything else by an operator.

/// Kind of a lexical token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Ident,
    Str,
    /// A template literal, or one piece of it around `${ … }` substitutions.
    Template,
    Num,
    Regex,
    Punct,
}

/// A token with its byte span in the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub start: usize,
    pub end: usize,
    /// A line terminator occurs between the previous token and this one.
    pub newline_before: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LexError {
    #[error("unterminated {what} starting at byte {offset}")]
    Unterminated { what: &'static str, offset: usize },
    #[error("unexpected character {ch:?} at byte {offset}")]
    Unexpected { ch: char, offset: usize },
}

/// Longest first, so the first prefix match is the right one.
const PUNCTUATORS: &[&str] = &[
    ">>>=", "...", "===", "!==", "**=", "<<=", ">>=", ">>>", "&&=", "||=", "??=", "=>", "==",
    "!=", "<=", ">=", "&&", "||", "??", "?.", "++", "--", "+=", "-=", "*=", "/=", "%=", "&=",
    "|=", "^=", "**", "<<", ">>", "{", "}", "(", ")", "[", "]", ";", ",", "<", ">", "+", "-",
    "*", "/", "%", "&", "|", "^", "!", "~", "?", ":", "=", ".", "@", "#",
];

/// Keywords after which a `/` starts a regular expression.
const EXPRESSION_KEYWORDS: &[&str] = &[
    "return", "typeof", "instanceof", "in", "of", "new", "delete", "void", "throw", "case",
    "do", "else", "yield", "await",
];

/// Keywords whose parenthesised head is followed by a statement.
const CONTROL_KEYWORDS: &[&str] = &["if", "while", "for", "with", "switch", "catch"];

/// Keywords directly followed by a statement block.
const BLOCK_KEYWORDS: &[&str] = &["else", "do", "try", "finally"];

/// What an open `{` belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Brace {
    /// `${` of a template literal.
    Substitution,
    /// A statement block: its `}` ends a statement.
    Block,
    /// Object literal, function expression or arrow body.
    Expression,
}

/// What an open `(` belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Paren {
    /// Head of `if`, `while`, `for`, `with`, `switch` or `catch`.
    ControlHead,
    /// Parameters of a function declaration.
    DeclarationParams,
    Other,
}

/// Tokenize a script.
pub fn tokenize(source: &str) -> Result<Vec<Token>, LexError> {
    let mut lexer = Lexer {
        src: source,
        bytes: source.as_bytes(),
        pos: 0,
        tokens: Vec::new(),
        newline: false,
        braces: Vec::new(),
        parens: Vec::new(),
        last_paren: Paren::Other,
        closed_statement: false,
    };
    lexer.run()?;
    Ok(lexer.tokens)
}

struct Lexer<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
    tokens: Vec<Token>,
    newline: bool,
    braces: Vec<Brace>,
    parens: Vec<Paren>,
    /// Kind of the most recently closed `(`.
    last_paren: Paren,
    /// The last `)` or `}` closed a control head or a statement block.
    closed_statement: bool,
}

impl<'a> Lexer<'a> {
    fn run(&mut self) -> Result<(), LexError> {
        if self.src.starts_with("#!") {
            self.skip_line();
        }
        while self.pos < self.bytes.len() {
            let b = self.bytes[self.pos];
            let next = self.bytes.get(self.pos + 1).copied();
            match b {
                b'\n' | b'\r' => {
                    self.newline = true;
                    self.pos += 1;
                }
                b' ' | b'\t' | 0x0b | 0x0c => self.pos += 1,
                b'/' if next == Some(b'/') => self.skip_line(),
                b'/' if next == Some(b'*') => self.skip_block_comment()?,
                b'"' | b'\'' => self.string(b)?,
                b'`' => {
                    let start = self.pos;
                    self.template(start, self.pos + 1)?;
                }
                b'0'..=b'9' => self.number(),
                b'.' if next.is_some_and(|n| n.is_ascii_digit()) => self.number(),
                b'/' if self.regex_allowed() => self.regex()?,
                b'}' if self.braces.last() == Some(&Brace::Substitution) => {
                    self.braces.pop();
                    let start = self.pos;
                    self.template(start, self.pos + 1)?;
                }
                b'{' => {
                    let brace = self.brace_kind();
                    self.braces.push(brace);
                    self.push(TokenKind::Punct, self.pos, self.pos + 1);
                }
                b'}' => {
                    self.closed_statement = self.braces.pop() == Some(Brace::Block);
                    self.push(TokenKind::Punct, self.pos, self.pos + 1);
                }
                b'(' => {
                    let paren = self.paren_kind();
                    self.parens.push(paren);
                    self.push(TokenKind::Punct, self.pos, self.pos + 1);
                }
                b')' => {
                    self.last_paren = self.parens.pop().unwrap_or(Paren::Other);
                    self.closed_statement = self.last_paren == Paren::ControlHead;
                    self.push(TokenKind::Punct, self.pos, self.pos + 1);
                }
                b if b.is_ascii_alphabetic() || b == b'_' || b == b'$' || b == b'\\' => {
                    self.ident()
                }
                b if b >= 0x80 => {
                    let ch = self.current_char();
                    if ch == '\u{2028}' || ch == '\u{2029}' {
                        self.newline = true;
                        self.pos += ch.len_utf8();
                    } else if ch.is_whitespace() || ch == '\u{feff}' {
                        self.pos += ch.len_utf8();
                    } else {
                        self.ident();
                    }
                }
                _ => self.punct()?,
            }
        }
        if self.braces.contains(&Brace::Substitution) {
            return Err(LexError::Unterminated {
                what: "template substitution",
                offset: self.pos,
            });
        }
        Ok(())
    }

    fn current_char(&self) -> char {
        self.src[self.pos..].chars().next().unwrap_or('\0')
    }

    fn push(&mut self, kind: TokenKind, start: usize, end: usize) {
        self.tokens.push(Token {
            kind,
            start,
            end,
            newline_before: self.newline,
        });
        self.newline = false;
        self.pos = end;
    }

    fn skip_line(&mut self) {
        while self.pos < self.bytes.len() && !matches!(self.bytes[self.pos], b'\n' | b'\r') {
            self.pos += 1;
        }
    }

    fn skip_block_comment(&mut self) -> Result<(), LexError> {
        let start = self.pos;
        let Some(rel) = self.src[start + 2..].find("*/") else {
            return Err(LexError::Unterminated {
                what: "comment",
                offset: start,
            });
        };
        let end = start + 2 + rel;
        if self.src[start..end].contains(['\n', '\r']) {
            self.newline = true;
        }
        self.pos = end + 2;
        Ok(())
    }

    fn string(&mut self, quote: u8) -> Result<(), LexError> {
        let start = self.pos;
        let mut i = start + 1;
        while i < self.bytes.len() {
            match self.bytes[i] {
                b'\\' => i += 2,
                b'\n' | b'\r' => break,
                c if c == quote => {
                    self.push(TokenKind::Str, start, i + 1);
                    return Ok(());
                }
                _ => i += 1,
            }
        }
        Err(LexError::Unterminated {
            what: "string",
            offset: start,
        })
    }

    /// Scan a template piece whose body starts at `from`.
    fn template(&mut self, start: usize, from: usize) -> Result<(), LexError> {
        let mut i = from;
        while i < self.bytes.len() {
            match self.bytes[i] {
                b'\\' => i += 2,
                b'`' => {
                    self.push(TokenKind::Template, start, i + 1);
                    return Ok(());
                }
                b'$' if self.bytes.get(i + 1) == Some(&b'{') => {
                    self.braces.push(Brace::Substitution);
                    self.push(TokenKind::Template, start, i + 2);
                    return Ok(());
                }
                _ => i += 1,
            }
        }
        Err(LexError::Unterminated {
            what: "template",
            offset: start,
        })
    }

    fn number(&mut self) {
        let start = self.pos;
        let mut i = start;
        let radix_prefixed = self.bytes[i] == b'0'
            && matches!(
                self.bytes.get(i + 1),
                Some(b'x' | b'X' | b'b' | b'B' | b'o' | b'O')
            );
        while i < self.bytes.len() {
            let c = self.bytes[i];
            if c.is_ascii_alphanumeric() || c == b'_' || c == b'.' {
                i += 1;
                if !radix_prefixed
                    && matches!(c, b'e' | b'E')
                    && matches!(self.bytes.get(i), Some(b'+' | b'-'))
                {
                    i += 1;
                }
            } else {
                break;
            }
        }
        self.push(TokenKind::Num, start, i);
    }

    fn regex_allowed(&self) -> bool {
        let Some(last) = self.tokens.last() else {
            return true;
        };
        let text = &self.src[last.start..last.end];
        match last.kind {
            TokenKind::Punct if matches!(text, ")" | "}") => self.closed_statement,
            TokenKind::Punct => !matches!(text, "]" | "++" | "--"),
            TokenKind::Ident => EXPRESSION_KEYWORDS.contains(&text),
            TokenKind::Template => text.ends_with("${"),
            TokenKind::Str | TokenKind::Num | TokenKind::Regex => false,
        }
    }

    fn text_at(&self, back: usize) -> Option<&'a str> {
        let index = self.tokens.len().checked_sub(back + 1)?;
        let token = self.tokens[index];
        Some(&self.src[token.start..token.end])
    }

    /// The keyword `back` tokens from the end is a keyword, not a property
    /// name such as `a.if`.
    fn is_keyword_at(&self, back: usize, keywords: &[&str]) -> bool {
        let is_ident = self
            .tokens
            .len()
            .checked_sub(back + 1)
            .is_some_and(|i| self.tokens[i].kind == TokenKind::Ident);
        is_ident
            && self.text_at(back).is_some_and(|t| keywords.contains(&t))
            && !matches!(self.text_at(back + 1), Some("." | "?."))
    }

    /// Whether the token `back` from the end begins a statement.
    fn at_statement_start(&self, back: usize) -> bool {
        let on_new_line = self
            .tokens
            .len()
            .checked_sub(back + 1)
            .is_some_and(|i| self.tokens[i].newline_before);
        if on_new_line {
            return true;
        }
        match self.text_at(back + 1) {
            None => true,
            Some("async") => self.at_statement_start(back + 1),
            Some(prev) => matches!(prev, ";" | "{" | "}"),
        }
    }

    fn paren_kind(&self) -> Paren {
        if self.is_keyword_at(0, CONTROL_KEYWORDS) {
            return Paren::ControlHead;
        }
        // `function name(` or `function* name(`
        let name_is_ident = self
            .tokens
            .last()
            .is_some_and(|t| t.kind == TokenKind::Ident);
        if name_is_ident {
            let keyword = if self.text_at(1) == Some("*") { 2 } else { 1 };
            if self.is_keyword_at(keyword, &["function"]) && self.at_statement_start(keyword) {
                return Paren::DeclarationParams;
            }
        }
        Paren::Other
    }

    fn brace_kind(&self) -> Brace {
        let Some(last) = self.tokens.last() else {
            return Brace::Block;
        };
        let text = &self.src[last.start..last.end];
        match last.kind {
            TokenKind::Punct => match text {
                ";" | "{" | "}" => Brace::Block,
                ")" if self.last_paren != Paren::Other => Brace::Block,
                _ => Brace::Expression,
            },
            TokenKind::Ident if self.is_keyword_at(0, BLOCK_KEYWORDS) => Brace::Block,
            _ => Brace::Expression,
        }
    }

    fn regex(&mut self) -> Result<(), LexError> {
        let start = self.pos;
        let mut i = start + 1;
        let mut in_class = false;
        loop {
            match self.bytes.get(i) {
                None | Some(b'\n') | Some(b'\r') => {
                    return Err(LexError::Unterminated {
                        what: "regular expression",
                        offset: start,
                    })
                }
                Some(b'\\') => i += 2,
                Some(b'[') => {
                    in_class = true;
                    i += 1;
                }
                Some(b']') => {
                    in_class = false;
                    i += 1;
                }
                Some(b'/') if !in_class => {
                    i += 1;
                    break;
                }
                Some(_) => i += 1,
            }
        }
        while i < self.bytes.len() && (self.bytes[i].is_ascii_alphanumeric() || self.bytes[i] == b'_')
        {
            i += 1;
        }
        self.push(TokenKind::Regex, start, i);
        Ok(())
    }

    fn ident(&mut self) {
        let start = self.pos;
        let mut i = start;
        for ch in self.src[start..].chars() {
            let continues = ch.is_ascii_alphanumeric()
                || ch == '_'
                || ch == '$'
                || ch == '\\'
                || (!ch.is_ascii() && !ch.is_whitespace() && ch != '\u{feff}');
            if !continues {
                break;
            }
            i += ch.len_utf8();
        }
        self.push(TokenKind::Ident, start, i.max(start + 1));
    }

    fn punct(&mut self) -> Result<(), LexError> {
        let rest = &self.src[self.pos..];
        for p in PUNCTUATORS {
            if rest.starts_with(p) {
                // `a?.5:b` is a conditional, not optional chaining
                if *p == "?."
                    && rest
                        .as_bytes()
                        .get(2)
                        .is_some_and(|b| b.is_ascii_digit())
                {
                    continue;
                }
                self.push(TokenKind::Punct, self.pos, self.pos + p.len());
                return Ok(());
            }
        }
        Err(LexError::Unexpected {
            ch: self.current_char(),
            offset: self.pos,
        })
    }
}

/// Decode the value of a string literal, quotes included in `raw`.
pub fn string_value(raw: &str) -> String {
    let inner = raw
        .get(1..raw.len().saturating_sub(1))
        .unwrap_or_default();
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('b') => out.push('\u{8}'),
            Some('f') => out.push('\u{c}'),
            Some('v') => out.push('\u{b}'),
            Some('0') => out.push('\0'),
            Some('x') => {
                let hex: String = chars.by_ref().take(2).collect();
                if let Some(ch) = u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                    out.push(ch);
                }
            }
            Some('u') => {
                let hex: String = if chars.peek() == Some(&'{') {
                    chars.next();
                    chars.by_ref().take_while(|c| *c != '}').collect()
                } else {
                    chars.by_ref().take(4).collect()
                };
                if let Some(ch) = u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                    out.push(ch);
                }
            }
            Some('\r') => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
            }
            Some('\n') | Some('\u{2028}') | Some('\u{2029}') => {}
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds_and_text(src: &str) -> Vec<(TokenKind, &str)> {
        tokenize(src)
            .unwrap()
            .into_iter()
            .map(|t| (t.kind, &src[t.start..t.end]))
            .collect()
    }

    #[test]
    fn test_basic_tokens() {
        let toks = kinds_and_text("a['decryption']=function(e){return e>>>0}");
        assert_eq!(toks[0], (TokenKind::Ident, "a"));
        assert_eq!(toks[1], (TokenKind::Punct, "["));
        assert_eq!(toks[2], (TokenKind::Str, "'decryption'"));
        assert_eq!(toks[4], (TokenKind::Punct, "="));
        assert!(toks.contains(&(TokenKind::Punct, ">>>")));
    }

    #[test]
    fn test_regex_versus_division() {
        let toks = kinds_and_text("x=a/b;y=/[/]+/g.test(s);z=(1)/2");
        assert!(toks.contains(&(TokenKind::Regex, "/[/]+/g")));
        assert_eq!(toks.iter().filter(|(k, t)| *k == TokenKind::Punct && *t == "/").count(), 2);
    }

    #[test]
    fn test_regex_after_control_head() {
        let toks = kinds_and_text("if(t)/'/.test(e)&&g();while(a.b(c))/x/.exec(d)");
        assert!(toks.contains(&(TokenKind::Regex, "/'/")));
        assert!(toks.contains(&(TokenKind::Regex, "/x/")));
    }

    #[test]
    fn test_regex_after_declaration_block() {
        let src = "function a(){}\n/\"/.test(x);if(y){}/z/g.test(y);try{}finally{}/w/";
        let toks = kinds_and_text(src);
        assert!(toks.contains(&(TokenKind::Regex, "/\"/")));
        assert!(toks.contains(&(TokenKind::Regex, "/z/g")));
        assert!(toks.contains(&(TokenKind::Regex, "/w/")));
    }

    #[test]
    fn test_division_after_expression_close() {
        let src = "v=(a+b)/2/c;f=function(){}/k;o={}/m;x.if(1)/n;g(h)/p";
        let toks = kinds_and_text(src);
        assert!(toks.iter().all(|(k, _)| *k != TokenKind::Regex));
        assert_eq!(toks.iter().filter(|(_, t)| *t == "/").count(), 6);
    }

    #[test]
    fn test_template_with_substitution() {
        let toks = kinds_and_text("f(`a${ {b:1}.b }c`)");
        assert_eq!(toks[2], (TokenKind::Template, "`a${"));
        assert_eq!(toks[3], (TokenKind::Punct, "{"));
        assert!(toks.contains(&(TokenKind::Template, "}c`")));
    }

    #[test]
    fn test_comments_and_newlines() {
        let toks = tokenize("a /* x\n */ b // c\nd").unwrap();
        assert_eq!(toks.len(), 3);
        assert!(toks[1].newline_before);
        assert!(toks[2].newline_before);
    }

    #[test]
    fn test_numbers() {
        let toks = kinds_and_text("0x1f4 1e-3 .5 10n");
        assert_eq!(
            toks,
            vec![
                (TokenKind::Num, "0x1f4"),
                (TokenKind::Num, "1e-3"),
                (TokenKind::Num, ".5"),
                (TokenKind::Num, "10n")
            ]
        );
    }

    #[test]
    fn test_unterminated_string_is_error() {
        assert!(matches!(
            tokenize("var a = 'oops"),
            Err(LexError::Unterminated { what: "string", .. })
        ));
    }

    #[test]
    fn test_string_value_escapes() {
        assert_eq!(string_value(r#""a\x41B\u{43}\n""#), "aABC\n");
        assert_eq!(string_value("'it\\'s'"), "it's");
    }

    #[test]
    fn test_non_ascii_identifiers_and_strings() {
        let toks = kinds_and_text("var 章节='第一章';");
        assert_eq!(toks[1], (TokenKind::Ident, "章节"));
        assert_eq!(toks[3], (TokenKind::Str, "'第一章'"));
    }
}
