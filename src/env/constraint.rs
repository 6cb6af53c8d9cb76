//! Build constraint evaluation: file-name suffixes, `//go:build` expressions
//! and legacy `// +build` lines.

pub const KNOWN_OS: &[&str] = &[
    "aix", "android", "darwin", "dragonfly", "freebsd", "hurd", "illumos", "ios", "js", "linux",
    "nacl", "netbsd", "openbsd", "plan9", "solaris", "wasip1", "windows", "zos",
];

pub const KNOWN_ARCH: &[&str] = &[
    "386", "amd64", "amd64p32", "arm", "armbe", "arm64", "arm64be", "loong64", "mips", "mipsle",
    "mips64", "mips64le", "mips64p32", "mips64p32le", "ppc", "ppc64", "ppc64le", "riscv",
    "riscv64", "s390", "s390x", "sparc", "sparc64", "wasm",
];

/// Operating systems that satisfy the `unix` tag.
pub const UNIX_OS: &[&str] = &[
    "aix", "android", "darwin", "dragonfly", "freebsd", "hurd", "illumos", "ios", "linux",
    "netbsd", "openbsd", "solaris",
];

/// Applies the `_GOOS`, `_GOARCH` and `_GOOS_GOARCH` file-name conventions.
/// `matches` decides a single tag.
pub fn good_os_arch_file(name: &str, matches: impl Fn(&str) -> bool) -> bool {
    let name = name.split('.').next().unwrap_or(name);
    let Some(i) = name.find('_') else {
        return true;
    };
    let mut parts: Vec<&str> = name[i..].split('_').collect();
    if parts.last() == Some(&"test") {
        parts.pop();
    }

    let n = parts.len();
    if n >= 2 && KNOWN_OS.contains(&parts[n - 2]) && KNOWN_ARCH.contains(&parts[n - 1]) {
        return matches(parts[n - 2]) && matches(parts[n - 1]);
    }
    if n >= 1 && (KNOWN_OS.contains(&parts[n - 1]) || KNOWN_ARCH.contains(&parts[n - 1])) {
        return matches(parts[n - 1]);
    }
    true
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Tag(String),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
}

impl Expr {
    pub fn eval(&self, matches: &dyn Fn(&str) -> bool) -> bool {
        match self {
            Expr::Tag(tag) => matches(tag),
            Expr::Not(x) => !x.eval(matches),
            Expr::And(a, b) => a.eval(matches) && b.eval(matches),
            Expr::Or(a, b) => a.eval(matches) || b.eval(matches),
        }
    }

    /// Parses the text following `//go:build`.
    pub fn parse(text: &str) -> Option<Expr> {
        let tokens = tokenize(text)?;
        let mut parser = ExprParser { tokens, pos: 0 };
        let expr = parser.or()?;
        (parser.pos == parser.tokens.len()).then_some(expr)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Tag(String),
    Not,
    And,
    Or,
    LParen,
    RParen,
}

fn tokenize(text: &str) -> Option<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = text.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' => {
                chars.next();
            }
            '!' => {
                chars.next();
                tokens.push(Token::Not);
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '&' | '|' => {
                chars.next();
                if chars.next() != Some(c) {
                    return None;
                }
                tokens.push(if c == '&' { Token::And } else { Token::Or });
            }
            c if is_tag_char(c) => {
                let mut tag = String::new();
                while let Some(&c) = chars.peek() {
                    if !is_tag_char(c) {
                        break;
                    }
                    tag.push(c);
                    chars.next();
                }
                tokens.push(Token::Tag(tag));
            }
            _ => return None,
        }
    }
    Some(tokens)
}

fn is_tag_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '.'
}

struct ExprParser {
    tokens: Vec<Token>,
    pos: usize,
}

impl ExprParser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn or(&mut self) -> Option<Expr> {
        let mut left = self.and()?;
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            let right = self.and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Some(left)
    }

    fn and(&mut self) -> Option<Expr> {
        let mut left = self.not()?;
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            let right = self.not()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Some(left)
    }

    fn not(&mut self) -> Option<Expr> {
        if self.peek() == Some(&Token::Not) {
            self.pos += 1;
            return Some(Expr::Not(Box::new(self.not()?)));
        }
        self.atom()
    }

    fn atom(&mut self) -> Option<Expr> {
        match self.tokens.get(self.pos)?.clone() {
            Token::LParen => {
                self.pos += 1;
                let inner = self.or()?;
                if self.peek() != Some(&Token::RParen) {
                    return None;
                }
                self.pos += 1;
                Some(inner)
            }
            Token::Tag(tag) => {
                self.pos += 1;
                Some(Expr::Tag(tag))
            }
            _ => None,
        }
    }
}

/// One `// +build` line: space-separated options are OR'ed, comma-separated
/// terms within an option are AND'ed, `!` negates a term.
pub fn plus_build_line_matches(text: &str, matches: &dyn Fn(&str) -> bool) -> bool {
    text.split_whitespace().any(|option| {
        option.split(',').all(|term| match term.strip_prefix('!') {
            Some(tag) => !tag.is_empty() && !matches(tag),
            None => !term.is_empty() && matches(term),
        })
    })
}

/// Constraint comments found before the package clause.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Header {
    pub go_build: Option<String>,
    pub plus_build: Vec<String>,
}

impl Header {
    /// Scans the leading comments of a Go file. `// +build` lines only count
    /// when a blank line separates them from the package clause.
    pub fn scan(source: &[u8]) -> Self {
        let text = String::from_utf8_lossy(source);
        let mut header = Header::default();
        let mut plus_lines: Vec<(usize, String)> = Vec::new();
        let mut last_blank = None;
        let mut in_block = false;

        for (idx, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if in_block {
                if let Some(pos) = line.find("*/") {
                    in_block = false;
                    if !line[pos + 2..].trim().is_empty() {
                        break;
                    }
                }
                continue;
            }
            if line.is_empty() {
                last_blank = Some(idx);
                continue;
            }
            if let Some(comment) = line.strip_prefix("//") {
                if let Some(expr) = comment.strip_prefix("go:build") {
                    if header.go_build.is_none() && (expr.is_empty() || expr.starts_with([' ', '\t'])) {
                        header.go_build = Some(expr.trim().to_string());
                    }
                } else if let Some(rest) = comment.trim_start().strip_prefix("+build") {
                    if rest.is_empty() || rest.starts_with([' ', '\t']) {
                        plus_lines.push((idx, rest.trim().to_string()));
                    }
                }
                continue;
            }
            if let Some(rest) = line.strip_prefix("/*") {
                if !rest.contains("*/") {
                    in_block = true;
                }
                continue;
            }
            break;
        }

        header.plus_build = plus_lines
            .into_iter()
            .filter(|(idx, _)| last_blank.is_some_and(|blank| *idx < blank))
            .map(|(_, line)| line)
            .collect();
        header
    }

    /// `//go:build` wins over `// +build`; an unparsable expression matches
    /// nothing.
    pub fn matches(&self, matches: &dyn Fn(&str) -> bool) -> bool {
        if let Some(expr) = &self.go_build {
            return Expr::parse(expr).is_some_and(|e| e.eval(matches));
        }
        self.plus_build
            .iter()
            .all(|line| plus_build_line_matches(line, matches))
    }
}
