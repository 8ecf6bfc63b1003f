//! Hand-written tokenizer for provider `.conf` files, plus the textual
//! `include "<path>";` preprocessor that runs before parsing.

use onr_types::ProviderError;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

const MAX_INCLUDE_DEPTH: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Ident,
    Str,
    Number,
    LBrace,
    RBrace,
    Semi,
    Eq,
    Comma,
    Eof,
}

#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    /// Raw text. Strings keep their surrounding quotes.
    pub text: String,
    /// Byte offset into the preprocessed source.
    pub pos: usize,
}

pub struct Scanner<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
    file: String,
}

impl<'a> Scanner<'a> {
    pub fn new(file: &str, src: &'a str) -> Self {
        Self { src, bytes: src.as_bytes(), pos: 0, file: file.to_string() }
    }

    /// 1-based line/column for a byte offset.
    pub fn line_col(&self, pos: usize) -> (usize, usize) {
        let mut line = 1;
        let mut col = 1;
        for &b in &self.bytes[..pos.min(self.bytes.len())] {
            if b == b'\n' {
                line += 1;
                col = 1;
            } else {
                col += 1;
            }
        }
        (line, col)
    }

    fn skip_trivia(&mut self) {
        loop {
            while self.pos < self.bytes.len() && self.bytes[self.pos].is_ascii_whitespace() {
                self.pos += 1;
            }
            if self.pos < self.bytes.len() && self.bytes[self.pos] == b'#' {
                while self.pos < self.bytes.len() && self.bytes[self.pos] != b'\n' {
                    self.pos += 1;
                }
                continue;
            }
            break;
        }
    }

    /// Next token, skipping whitespace and `#` comments.
    pub fn next(&mut self) -> Result<Token, String> {
        self.skip_trivia();
        let start = self.pos;
        if start >= self.bytes.len() {
            return Ok(Token { kind: TokenKind::Eof, text: String::new(), pos: start });
        }
        let b = self.bytes[start];
        let simple = |kind, text: &str, pos| Token { kind, text: text.to_string(), pos };
        match b {
            b'{' => {
                self.pos += 1;
                Ok(simple(TokenKind::LBrace, "{", start))
            }
            b'}' => {
                self.pos += 1;
                Ok(simple(TokenKind::RBrace, "}", start))
            }
            b';' => {
                self.pos += 1;
                Ok(simple(TokenKind::Semi, ";", start))
            }
            b'=' => {
                self.pos += 1;
                Ok(simple(TokenKind::Eq, "=", start))
            }
            b',' => {
                self.pos += 1;
                Ok(simple(TokenKind::Comma, ",", start))
            }
            b'"' => {
                self.pos += 1;
                let mut escaped = false;
                while self.pos < self.bytes.len() {
                    let c = self.bytes[self.pos];
                    self.pos += 1;
                    if escaped {
                        escaped = false;
                    } else if c == b'\\' {
                        escaped = true;
                    } else if c == b'"' {
                        return Ok(Token {
                            kind: TokenKind::Str,
                            text: self.src[start..self.pos].to_string(),
                            pos: start,
                        });
                    }
                }
                let (line, col) = self.line_col(start);
                Err(format!("{}:{}:{}: unterminated string", self.file, line, col))
            }
            b if b.is_ascii_digit() => {
                while self.pos < self.bytes.len()
                    && (self.bytes[self.pos].is_ascii_digit() || self.bytes[self.pos] == b'.')
                {
                    self.pos += 1;
                }
                Ok(Token {
                    kind: TokenKind::Number,
                    text: self.src[start..self.pos].to_string(),
                    pos: start,
                })
            }
            b if is_ident_byte(b) || b == b'$' => {
                self.pos += 1;
                while self.pos < self.bytes.len()
                    && (is_ident_byte(self.bytes[self.pos]) || self.bytes[self.pos] == b'.')
                {
                    self.pos += 1;
                }
                Ok(Token {
                    kind: TokenKind::Ident,
                    text: self.src[start..self.pos].to_string(),
                    pos: start,
                })
            }
            other => {
                let (line, col) = self.line_col(start);
                Err(format!(
                    "{}:{}:{}: unexpected character {:?}",
                    self.file, line, col, other as char
                ))
            }
        }
    }

    /// Read raw source text up to (and consuming) the next `;` outside of a
    /// string. Used for expression arguments, which keep their own grammar.
    pub fn raw_until_semi(&mut self) -> Result<String, String> {
        self.skip_trivia();
        let start = self.pos;
        let mut in_str = false;
        let mut escaped = false;
        while self.pos < self.bytes.len() {
            let c = self.bytes[self.pos];
            if in_str {
                if escaped {
                    escaped = false;
                } else if c == b'\\' {
                    escaped = true;
                } else if c == b'"' {
                    in_str = false;
                }
                self.pos += 1;
                continue;
            }
            match c {
                b'"' => {
                    in_str = true;
                    self.pos += 1;
                }
                b';' => {
                    let raw = self.src[start..self.pos].trim().to_string();
                    self.pos += 1;
                    return Ok(raw);
                }
                b'\n' | b'{' | b'}' => {
                    let (line, col) = self.line_col(self.pos);
                    return Err(format!(
                        "{}:{}:{}: expected ';' to end statement",
                        self.file, line, col
                    ));
                }
                _ => self.pos += 1,
            }
        }
        let (line, col) = self.line_col(start);
        Err(format!("{}:{}:{}: unexpected EOF in statement", self.file, line, col))
    }

    pub fn err_at(&self, tok: &Token, msg: &str) -> String {
        let (line, col) = self.line_col(tok.pos);
        format!("{}:{}:{}: {}", self.file, line, col, msg)
    }
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'-'
}

/// Expand `include "<path>";` statements textually before parsing.
///
/// Includes resolve against the including file's directory only; nesting is
/// depth-limited and cycles are rejected.
pub fn preprocess_includes(path: &str, content: &str) -> Result<String, ProviderError> {
    let mut visited = HashSet::new();
    visited.insert(canonical_or_raw(Path::new(path)));
    expand_includes(path, content, 0, &mut visited)
}

fn expand_includes(
    path: &str,
    content: &str,
    depth: usize,
    visited: &mut HashSet<PathBuf>,
) -> Result<String, ProviderError> {
    if depth > MAX_INCLUDE_DEPTH {
        return Err(ProviderError::Include {
            file: path.to_string(),
            message: format!("include depth exceeds {MAX_INCLUDE_DEPTH}"),
        });
    }
    let dir = Path::new(path).parent().unwrap_or_else(|| Path::new("."));
    let mut out = String::with_capacity(content.len());
    for line in content.lines() {
        let trimmed = line.trim();
        let Some(rest) = trimmed.strip_prefix("include") else {
            out.push_str(line);
            out.push('\n');
            continue;
        };
        let rest = rest.trim();
        let Some(quoted) = rest.strip_suffix(';').map(str::trim) else {
            return Err(ProviderError::Include {
                file: path.to_string(),
                message: format!("malformed include statement: {trimmed:?}"),
            });
        };
        if quoted.len() < 2 || !quoted.starts_with('"') || !quoted.ends_with('"') {
            return Err(ProviderError::Include {
                file: path.to_string(),
                message: format!("include path must be a quoted string: {trimmed:?}"),
            });
        }
        let name = &quoted[1..quoted.len() - 1];
        if name.contains('/') || name.contains('\\') {
            return Err(ProviderError::Include {
                file: path.to_string(),
                message: format!("include must reference a same-directory file: {name:?}"),
            });
        }
        let inc_path = dir.join(name);
        let canon = canonical_or_raw(&inc_path);
        if !visited.insert(canon) {
            return Err(ProviderError::Include {
                file: path.to_string(),
                message: format!("include cycle via {name:?}"),
            });
        }
        let inc_content = std::fs::read_to_string(&inc_path).map_err(|e| ProviderError::Include {
            file: path.to_string(),
            message: format!("read include {name:?}: {e}"),
        })?;
        let expanded =
            expand_includes(&inc_path.to_string_lossy(), &inc_content, depth + 1, visited)?;
        out.push_str(&expanded);
    }
    Ok(out)
}

fn canonical_or_raw(p: &Path) -> PathBuf {
    p.canonicalize().unwrap_or_else(|_| p.to_path_buf())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenizes_basic_statements() {
        let src = "provider \"openai\" {\n  # comment\n  defaults { base_url = \"https://x\"; }\n}";
        let mut s = Scanner::new("t.conf", src);
        let mut kinds = Vec::new();
        loop {
            let t = s.next().unwrap();
            if t.kind == TokenKind::Eof {
                break;
            }
            kinds.push(t.kind);
        }
        assert_eq!(
            kinds,
            vec![
                TokenKind::Ident,
                TokenKind::Str,
                TokenKind::LBrace,
                TokenKind::Ident,
                TokenKind::LBrace,
                TokenKind::Ident,
                TokenKind::Eq,
                TokenKind::Str,
                TokenKind::Semi,
                TokenKind::RBrace,
                TokenKind::RBrace,
            ]
        );
    }

    #[test]
    fn test_raw_until_semi_respects_strings() {
        let src = "concat(\"a;b\", $channel.key);";
        let mut s = Scanner::new("t.conf", src);
        assert_eq!(s.raw_until_semi().unwrap(), "concat(\"a;b\", $channel.key)");
    }

    #[test]
    fn test_raw_until_semi_rejects_newline() {
        let mut s = Scanner::new("t.conf", "set_path /x\n;");
        assert!(s.raw_until_semi().is_err());
    }

    #[test]
    fn test_line_col() {
        let s = Scanner::new("t.conf", "ab\ncd");
        assert_eq!(s.line_col(0), (1, 1));
        assert_eq!(s.line_col(3), (2, 1));
        assert_eq!(s.line_col(4), (2, 2));
    }

    #[test]
    fn test_include_same_dir_only() {
        let dir = tempfile::tempdir().unwrap();
        let main = dir.path().join("a.conf");
        std::fs::write(dir.path().join("common.inc"), "auth_bearer;\n").unwrap();
        std::fs::write(&main, "include \"common.inc\";\n").unwrap();
        let out =
            preprocess_includes(&main.to_string_lossy(), "include \"common.inc\";\n").unwrap();
        assert!(out.contains("auth_bearer;"));

        let err = preprocess_includes(&main.to_string_lossy(), "include \"../x.inc\";\n");
        assert!(err.is_err());
    }

    #[test]
    fn test_include_cycle_detected() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.conf");
        let b = dir.path().join("b.inc");
        std::fs::write(&a, "include \"b.inc\";\n").unwrap();
        std::fs::write(&b, "include \"a.conf\";\n").unwrap();
        let err = preprocess_includes(&a.to_string_lossy(), "include \"b.inc\";\n");
        assert!(err.is_err());
    }
}
