//! Bracket tree over a token stream.
//!
//! Every `(`, `[` and `{` is paired with its closer and every token knows its
//! innermost enclosing opener. That is enough structure to answer the
//! questions the locators ask: is this a member access, which function body
//! encloses this call, where does the first top-level statement end.

use super::lexer::{self, LexError, Token, TokenKind};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error(transparent)]
    Lex(#[from] LexError),
    #[error("unbalanced {found:?} at byte {offset}")]
    Unbalanced { found: String, offset: usize },
    #[error("unclosed bracket at byte {offset}")]
    Unclosed { offset: usize },
}

/// Keywords that cannot end an object expression.
const NON_OBJECT_KEYWORDS: &[&str] = &[
    "return", "typeof", "instanceof", "in", "of", "new", "delete", "void", "throw", "case",
    "do", "else", "yield", "await", "var", "let", "const", "if", "while", "for", "function",
];

/// A property read or write: `obj.name` or `obj['name']`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyAccess {
    pub name: String,
    /// `.` or `[` token.
    pub first: usize,
    /// Name or `]` token.
    pub last: usize,
}

/// Where the first top-level statement ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatementEnd {
    pub offset: usize,
    /// The statement ends with an explicit `;`.
    pub terminated: bool,
}

pub struct SyntaxTree<'a> {
    source: &'a str,
    tokens: Vec<Token>,
    matching: Vec<Option<usize>>,
    parent: Vec<Option<usize>>,
}

impl<'a> SyntaxTree<'a> {
    pub fn parse(source: &'a str) -> Result<Self, ParseError> {
        let tokens = lexer::tokenize(source)?;
        let mut matching = vec![None; tokens.len()];
        let mut parent = vec![None; tokens.len()];
        let mut stack: Vec<usize> = Vec::new();

        for (i, tok) in tokens.iter().enumerate() {
            let text = &source[tok.start..tok.end];
            if tok.kind != TokenKind::Punct {
                parent[i] = stack.last().copied();
                continue;
            }
            match text {
                "(" | "[" | "{" => {
                    parent[i] = stack.last().copied();
                    stack.push(i);
                }
                ")" | "]" | "}" => {
                    let Some(open) = stack.pop() else {
                        return Err(ParseError::Unbalanced {
                            found: text.to_string(),
                            offset: tok.start,
                        });
                    };
                    let opener = &source[tokens[open].start..tokens[open].end];
                    if closer_of(opener) != text {
                        return Err(ParseError::Unbalanced {
                            found: text.to_string(),
                            offset: tok.start,
                        });
                    }
                    matching[open] = Some(i);
                    matching[i] = Some(open);
                    parent[i] = stack.last().copied();
                }
                _ => parent[i] = stack.last().copied(),
            }
        }
        if let Some(&open) = stack.last() {
            return Err(ParseError::Unclosed {
                offset: tokens[open].start,
            });
        }
        Ok(Self {
            source,
            tokens,
            matching,
            parent,
        })
    }

    pub fn source(&self) -> &'a str {
        self.source
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn token(&self, i: usize) -> &Token {
        &self.tokens[i]
    }

    pub fn text(&self, i: usize) -> &'a str {
        let tok = &self.tokens[i];
        &self.source[tok.start..tok.end]
    }

    pub fn kind(&self, i: usize) -> Option<TokenKind> {
        self.tokens.get(i).map(|t| t.kind)
    }

    pub fn is_punct(&self, i: usize, punct: &str) -> bool {
        self.kind(i) == Some(TokenKind::Punct) && self.text(i) == punct
    }

    pub fn is_ident(&self, i: usize, name: &str) -> bool {
        self.kind(i) == Some(TokenKind::Ident) && self.text(i) == name
    }

    /// Decoded value of a string literal token.
    pub fn str_value(&self, i: usize) -> Option<String> {
        (self.kind(i)? == TokenKind::Str).then(|| lexer::string_value(self.text(i)))
    }

    /// Value of an integer literal token, decimal or hexadecimal.
    pub fn int_value(&self, i: usize) -> Option<u64> {
        if self.kind(i)? != TokenKind::Num {
            return None;
        }
        let text = self.text(i).replace('_', "");
        match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
            Some(hex) => u64::from_str_radix(hex, 16).ok(),
            None => text.parse().ok(),
        }
    }

    /// The other half of a bracket pair.
    pub fn matching(&self, i: usize) -> Option<usize> {
        self.matching.get(i).copied().flatten()
    }

    /// Innermost opener enclosing a token. Closers share their opener's parent.
    pub fn parent(&self, i: usize) -> Option<usize> {
        self.parent.get(i).copied().flatten()
    }

    /// Enclosing openers, innermost first.
    pub fn ancestors(&self, i: usize) -> impl Iterator<Item = usize> + '_ {
        std::iter::successors(self.parent(i), move |&p| self.parent(p))
    }

    /// Direct children of a bracket pair, closer excluded.
    pub fn children(&self, open: usize) -> impl Iterator<Item = usize> + '_ {
        let close = self.matching(open).unwrap_or(open);
        (open + 1..close).filter(move |&i| self.parent(i) == Some(open))
    }

    /// Whether token `i` can end the object of a member expression.
    pub fn ends_object(&self, i: usize) -> bool {
        match self.kind(i) {
            Some(TokenKind::Ident) => !NON_OBJECT_KEYWORDS.contains(&self.text(i)),
            Some(TokenKind::Punct) => matches!(self.text(i), ")" | "]"),
            Some(TokenKind::Template) => self.text(i).ends_with('`'),
            _ => false,
        }
    }

    /// A property access whose name token (identifier or string) is `i`.
    pub fn property_access_at(&self, i: usize) -> Option<PropertyAccess> {
        match self.kind(i)? {
            TokenKind::Ident => self.property_access_ending_at(i),
            TokenKind::Str if self.is_punct(i + 1, "]") => self.property_access_ending_at(i + 1),
            _ => None,
        }
    }

    /// A property access whose last token is `j`.
    pub fn property_access_ending_at(&self, j: usize) -> Option<PropertyAccess> {
        let prev = j.checked_sub(1)?;
        if self.kind(j)? == TokenKind::Ident {
            if self.is_punct(prev, ".") || self.is_punct(prev, "?.") {
                return Some(PropertyAccess {
                    name: self.text(j).to_string(),
                    first: prev,
                    last: j,
                });
            }
            return None;
        }
        if !self.is_punct(j, "]") {
            return None;
        }
        let open = self.matching(j)?;
        if open + 2 != j || !self.ends_object(open.checked_sub(1)?) {
            return None;
        }
        Some(PropertyAccess {
            name: self.str_value(open + 1)?,
            first: open,
            last: j,
        })
    }

    /// End of the first top-level statement, recovering automatic semicolon
    /// insertion at line breaks.
    pub fn first_statement_end(&self) -> Option<StatementEnd> {
        let top: Vec<usize> = (0..self.len()).filter(|&i| self.parent(i).is_none()).collect();
        for (w, &i) in top.iter().enumerate() {
            if self.is_punct(i, ";") {
                return Some(StatementEnd {
                    offset: self.tokens[i].end,
                    terminated: true,
                });
            }
            if let Some(&next) = top.get(w + 1) {
                if self.tokens[next].newline_before && self.can_end(i) && self.can_start(next) {
                    return Some(StatementEnd {
                        offset: self.tokens[i].end,
                        terminated: false,
                    });
                }
            }
        }
        top.last().map(|&i| StatementEnd {
            offset: self.tokens[i].end,
            terminated: false,
        })
    }

    fn can_end(&self, i: usize) -> bool {
        match self.tokens[i].kind {
            TokenKind::Ident | TokenKind::Num | TokenKind::Str | TokenKind::Regex => true,
            TokenKind::Template => self.text(i).ends_with('`'),
            TokenKind::Punct => matches!(self.text(i), ")" | "]" | "}" | "++" | "--"),
        }
    }

    fn can_start(&self, i: usize) -> bool {
        match self.tokens[i].kind {
            TokenKind::Ident => !matches!(self.text(i), "in" | "instanceof" | "of"),
            TokenKind::Num | TokenKind::Str | TokenKind::Template => true,
            TokenKind::Regex => false,
            TokenKind::Punct => matches!(self.text(i), "++" | "--" | "!" | "~"),
        }
    }
}

fn closer_of(opener: &str) -> &'static str {
    match opener {
        "(" => ")",
        "[" => "]",
        _ => "}",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index_of(tree: &SyntaxTree<'_>, text: &str) -> usize {
        (0..tree.len()).find(|&i| tree.text(i) == text).unwrap()
    }

    #[test]
    fn test_matching_and_parents() {
        let tree = SyntaxTree::parse("f(a,[b,{c:1}])").unwrap();
        let paren = index_of(&tree, "(");
        assert_eq!(tree.matching(paren), Some(tree.len() - 1));
        let c = index_of(&tree, "c");
        let ancestors: Vec<&str> = tree.ancestors(c).map(|i| tree.text(i)).collect();
        assert_eq!(ancestors, vec!["{", "[", "("]);
    }

    #[test]
    fn test_unbalanced_is_error() {
        assert!(matches!(
            SyntaxTree::parse("f(a]"),
            Err(ParseError::Unbalanced { .. })
        ));
        assert!(matches!(
            SyntaxTree::parse("f(a"),
            Err(ParseError::Unclosed { .. })
        ));
    }

    #[test]
    fn test_property_access_forms() {
        let tree = SyntaxTree::parse("o['decryption']=1;p.decryption=2;q=['decryption']").unwrap();
        let hits: Vec<PropertyAccess> = (0..tree.len())
            .filter_map(|i| tree.property_access_at(i))
            .filter(|a| a.name == "decryption")
            .collect();
        // the array literal is not an access
        assert_eq!(hits.len(), 2);
        assert!(tree.is_punct(hits[0].first, "["));
        assert!(tree.is_punct(hits[1].first, "."));
    }

    #[test]
    fn test_first_statement_end_with_semicolon() {
        let src = "window.S={a:{b:1}};foo()";
        let end = SyntaxTree::parse(src).unwrap().first_statement_end().unwrap();
        assert!(end.terminated);
        assert_eq!(&src[..end.offset], "window.S={a:{b:1}};");
    }

    #[test]
    fn test_first_statement_end_by_line_break() {
        let src = "window.S={a:1}\nfoo()";
        let end = SyntaxTree::parse(src).unwrap().first_statement_end().unwrap();
        assert!(!end.terminated);
        assert_eq!(&src[..end.offset], "window.S={a:1}");
    }

    #[test]
    fn test_line_break_before_paren_continues_statement() {
        let src = "a=b\n(c)";
        let end = SyntaxTree::parse(src).unwrap().first_statement_end().unwrap();
        assert_eq!(end.offset, src.len());
    }

    #[test]
    fn test_int_values() {
        let tree = SyntaxTree::parse("f(0x1a3, 42, 'x')").unwrap();
        assert_eq!(tree.int_value(2), Some(0x1a3));
        assert_eq!(tree.int_value(4), Some(42));
        assert_eq!(tree.int_value(6), None);
    }
}
