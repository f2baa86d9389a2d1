//! Lexical SQL scanner
//!
//! Deliberately partial: the query is lexed with the sqlparser tokenizer, so
//! string literals, quoted identifiers and comments are respected, and the
//! token stream is pattern-matched for table references after FROM/JOIN and
//! `qualifier.identifier` references. It never builds a parse tree, so
//! malformed candidates still scan, and deeply nested or unusual queries may
//! under-report references.

use std::collections::{HashMap, HashSet};

use sqlparser::dialect::GenericDialect;
use sqlparser::tokenizer::{Token as SqlToken, Tokenizer};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Word,
    QuotedIdent,
    Str,
    Number,
    Symbol(char),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    /// Identifier text without quotes; raw text for everything else.
    pub text: String,
    /// Byte span in the original query.
    pub start: usize,
    pub end: usize,
}

impl Token {
    pub fn is_ident(&self) -> bool {
        matches!(self.kind, TokenKind::Word | TokenKind::QuotedIdent)
    }

    pub fn is_word(&self, word: &str) -> bool {
        self.kind == TokenKind::Word && self.text.eq_ignore_ascii_case(word)
    }

    pub fn is_symbol(&self, c: char) -> bool {
        self.kind == TokenKind::Symbol(c)
    }
}

/// Words that can follow a table name but are never its alias.
const CLAUSE_KEYWORDS: &[&str] = &[
    "where", "on", "join", "inner", "left", "right", "full", "outer", "cross", "natural", "group",
    "order", "limit", "having", "union", "except", "intersect", "using", "as", "set", "window",
    "offset", "fetch", "lateral", "select", "from", "and", "or", "not", "when", "then", "else",
    "end", "returning", "qualify", "tablesample", "for", "into", "values", "with",
];

/// Functions whose argument syntax contains a FROM keyword.
const FROM_FUNCTIONS: &[&str] = &["extract", "substring", "trim", "position", "overlay"];

fn is_keyword(text: &str) -> bool {
    CLAUSE_KEYWORDS.iter().any(|k| k.eq_ignore_ascii_case(text))
}

/// Lex `sql` with the sqlparser tokenizer and attach byte spans.
///
/// Whitespace and comments are dropped after they have delimited their
/// neighbours. Text the tokenizer cannot lex (an unterminated literal, say)
/// yields no tokens, leaving the query to the engine.
pub fn tokenize(sql: &str) -> Vec<Token> {
    let dialect = GenericDialect {};
    let lexed = match Tokenizer::new(&dialect, sql).tokenize_with_location() {
        Ok(lexed) => lexed,
        Err(e) => {
            debug!("Query is not lexable, skipping reference scan: {}", e);
            return Vec::new();
        }
    };

    let offsets = LineOffsets::new(sql);
    let starts: Vec<usize> = lexed
        .iter()
        .map(|t| offsets.byte_offset(t.location.line, t.location.column))
        .collect();

    let mut tokens = Vec::new();
    for (idx, lexed_token) in lexed.iter().enumerate() {
        let start = starts[idx];
        let end = starts.get(idx + 1).copied().unwrap_or(sql.len()).max(start);
        let raw = &sql[start..end];

        let (kind, text) = match &lexed_token.token {
            SqlToken::Whitespace(_) | SqlToken::EOF => continue,
            SqlToken::Word(word) => match word.quote_style {
                Some(_) => (TokenKind::QuotedIdent, word.value.clone()),
                None => (TokenKind::Word, word.value.clone()),
            },
            SqlToken::Number(_, _) => (TokenKind::Number, raw.to_string()),
            SqlToken::SingleQuotedString(_)
            | SqlToken::DoubleQuotedString(_)
            | SqlToken::NationalStringLiteral(_)
            | SqlToken::EscapedStringLiteral(_)
            | SqlToken::HexStringLiteral(_)
            | SqlToken::DollarQuotedString(_) => (TokenKind::Str, raw.to_string()),
            _ => match raw.chars().next() {
                Some(c) => (TokenKind::Symbol(c), raw.to_string()),
                None => continue,
            },
        };

        tokens.push(Token {
            kind,
            text,
            start,
            end,
        });
    }

    tokens
}

/// Maps the tokenizer's 1-based line/column (in chars) to byte offsets.
struct LineOffsets<'a> {
    sql: &'a str,
    line_starts: Vec<usize>,
}

impl<'a> LineOffsets<'a> {
    fn new(sql: &'a str) -> Self {
        let line_starts = std::iter::once(0)
            .chain(sql.match_indices('\n').map(|(i, _)| i + 1))
            .collect();
        Self { sql, line_starts }
    }

    fn byte_offset(&self, line: u64, column: u64) -> usize {
        let line_start = self
            .line_starts
            .get((line.max(1) - 1) as usize)
            .copied()
            .unwrap_or(self.sql.len());
        self.sql[line_start..]
            .char_indices()
            .nth((column.max(1) - 1) as usize)
            .map_or(self.sql.len(), |(i, _)| line_start + i)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    /// Table name as written (last part of a dotted name, unquoted).
    pub name: String,
    pub alias: Option<String>,
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QualifiedRef {
    pub qualifier: String,
    pub column: String,
    pub start: usize,
    pub end: usize,
}

impl QualifiedRef {
    pub fn display(&self) -> String {
        format!("{}.{}", self.qualifier, self.column)
    }
}

#[derive(Debug, Clone, Default)]
pub struct QueryScan {
    pub tokens: Vec<Token>,
    pub tables: Vec<TableRef>,
    pub qualified: Vec<QualifiedRef>,
    /// Lower-cased CTE names; these are not catalog tables.
    pub cte_names: HashSet<String>,
}

impl QueryScan {
    /// Referenced table names in first-seen order, without CTEs or duplicates.
    pub fn referenced_tables(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.tables
            .iter()
            .filter(|t| !self.cte_names.contains(&t.name.to_lowercase()))
            .filter(|t| seen.insert(t.name.to_lowercase()))
            .map(|t| t.name.clone())
            .collect()
    }

    /// lower-cased alias → table name
    pub fn alias_map(&self) -> HashMap<String, String> {
        self.tables
            .iter()
            .filter_map(|t| {
                t.alias
                    .as_ref()
                    .map(|a| (a.to_lowercase(), t.name.clone()))
            })
            .collect()
    }

    /// First alias under which `table` appears in the query.
    pub fn alias_for_table(&self, table: &str) -> Option<String> {
        self.tables
            .iter()
            .filter(|t| t.name.eq_ignore_ascii_case(table))
            .find_map(|t| t.alias.clone())
    }

    pub fn references_table(&self, table: &str) -> bool {
        self.tables.iter().any(|t| t.name.eq_ignore_ascii_case(table))
    }
}

pub fn scan(sql: &str) -> QueryScan {
    let tokens = tokenize(sql);
    let cte_names = collect_cte_names(&tokens);
    let tables = collect_tables(&tokens);
    let qualified = collect_qualified(&tokens, &tables);

    QueryScan {
        tokens,
        tables,
        qualified,
        cte_names,
    }
}

/// Index just past the parenthesis that closes the one at `open`.
fn skip_balanced(tokens: &[Token], open: usize) -> usize {
    let mut depth = 0usize;
    let mut i = open;
    while i < tokens.len() {
        if tokens[i].is_symbol('(') {
            depth += 1;
        } else if tokens[i].is_symbol(')') {
            depth = depth.saturating_sub(1);
            if depth == 0 {
                return i + 1;
            }
        }
        i += 1;
    }
    tokens.len()
}

fn collect_cte_names(tokens: &[Token]) -> HashSet<String> {
    let mut names = HashSet::new();

    for (i, tok) in tokens.iter().enumerate() {
        if !tok.is_word("with") {
            continue;
        }
        let mut j = i + 1;
        if tokens.get(j).map_or(false, |t| t.is_word("recursive")) {
            j += 1;
        }

        while let Some(name) = tokens.get(j).filter(|t| t.is_ident() && !is_keyword(&t.text)) {
            names.insert(name.text.to_lowercase());

            let Some(open) = (j + 1..tokens.len()).find(|&k| tokens[k].is_symbol('(')) else {
                break;
            };
            // A column list `name(a, b) AS (...)` comes before the body.
            let mut after = skip_balanced(tokens, open);
            if tokens.get(after).map_or(false, |t| t.is_word("as")) {
                if let Some(body) = (after..tokens.len()).find(|&k| tokens[k].is_symbol('(')) {
                    after = skip_balanced(tokens, body);
                }
            }

            if tokens.get(after).map_or(false, |t| t.is_symbol(',')) {
                j = after + 1;
            } else {
                break;
            }
        }
    }

    names
}

/// Read a possibly dotted name starting at `i`. Returns the last part's
/// token index and the index after the name.
fn read_dotted_name(tokens: &[Token], i: usize) -> Option<(usize, usize)> {
    let first = tokens.get(i)?;
    if !first.is_ident() || (first.kind == TokenKind::Word && is_keyword(&first.text)) {
        return None;
    }

    let mut last = i;
    let mut j = i + 1;
    while tokens.get(j).map_or(false, |t| t.is_symbol('.'))
        && tokens.get(j + 1).map_or(false, Token::is_ident)
    {
        last = j + 1;
        j += 2;
    }
    Some((last, j))
}

fn collect_tables(tokens: &[Token]) -> Vec<TableRef> {
    let mut tables = Vec::new();
    // word preceding each open parenthesis, innermost last
    let mut paren_owner: Vec<Option<String>> = Vec::new();

    for (i, tok) in tokens.iter().enumerate() {
        if tok.is_symbol('(') {
            let owner = i
                .checked_sub(1)
                .and_then(|p| tokens.get(p))
                .filter(|p| p.kind == TokenKind::Word)
                .map(|p| p.text.to_lowercase());
            paren_owner.push(owner);
            continue;
        }
        if tok.is_symbol(')') {
            paren_owner.pop();
            continue;
        }

        let is_from = tok.is_word("from");
        if !is_from && !tok.is_word("join") {
            continue;
        }

        if is_from {
            let inside_from_function = paren_owner
                .last()
                .and_then(|o| o.as_deref())
                .map_or(false, |o| FROM_FUNCTIONS.contains(&o));
            let distinct_from = i > 0 && tokens[i - 1].is_word("distinct");
            if inside_from_function || distinct_from {
                continue;
            }
        }

        let mut j = i + 1;
        while let Some((last, next)) = read_dotted_name(tokens, j) {
            // `FROM generate_series(...)` is a function, not a table.
            if tokens.get(next).map_or(false, |t| t.is_symbol('(')) {
                break;
            }

            let name_tok = &tokens[last];
            let mut k = next;
            let mut alias = None;
            if tokens.get(k).map_or(false, |t| t.is_word("as")) {
                k += 1;
                if let Some(a) = tokens.get(k).filter(|t| t.is_ident()) {
                    alias = Some(a.text.clone());
                    k += 1;
                }
            } else if let Some(a) = tokens
                .get(k)
                .filter(|t| t.is_ident() && !(t.kind == TokenKind::Word && is_keyword(&t.text)))
            {
                alias = Some(a.text.clone());
                k += 1;
            }

            tables.push(TableRef {
                name: name_tok.text.clone(),
                alias,
                start: name_tok.start,
                end: name_tok.end,
            });

            if is_from && tokens.get(k).map_or(false, |t| t.is_symbol(',')) {
                j = k + 1;
            } else {
                break;
            }
        }
    }

    tables
}

fn collect_qualified(tokens: &[Token], tables: &[TableRef]) -> Vec<QualifiedRef> {
    let table_spans: HashSet<usize> = tables.iter().map(|t| t.start).collect();
    let mut refs = Vec::new();
    let mut i = 0;

    while i < tokens.len() {
        if !tokens[i].is_ident() {
            i += 1;
            continue;
        }

        // Collect an adjacent chain a.b.c
        let mut parts = vec![i];
        let mut j = i;
        while tokens.get(j + 1).map_or(false, |t| t.is_symbol('.') && t.start == tokens[j].end)
            && tokens.get(j + 2).map_or(false, |t| {
                (t.is_ident() || t.is_symbol('*')) && t.start == tokens[j + 1].end
            })
        {
            parts.push(j + 2);
            j += 2;
        }
        let next = j + 1;

        if parts.len() >= 2 {
            let qual = &tokens[parts[parts.len() - 2]];
            let col = &tokens[parts[parts.len() - 1]];
            let is_call = tokens.get(next).map_or(false, |t| t.is_symbol('('));
            let is_table_name = table_spans.contains(&col.start);

            if col.is_ident() && !is_call && !is_table_name {
                refs.push(QualifiedRef {
                    qualifier: qual.text.clone(),
                    column: col.text.clone(),
                    start: qual.start,
                    end: col.end,
                });
            }
        }

        i = next;
    }

    refs
}

/// Apply non-overlapping `(start, end, replacement)` edits to `sql`.
pub fn apply_replacements(sql: &str, mut edits: Vec<(usize, usize, String)>) -> String {
    edits.sort_by_key(|(start, _, _)| *start);

    let mut out = String::with_capacity(sql.len());
    let mut cursor = 0;
    for (start, end, replacement) in edits {
        if start < cursor {
            continue;
        }
        out.push_str(&sql[cursor..start]);
        out.push_str(&replacement);
        cursor = end;
    }
    out.push_str(&sql[cursor..]);
    out
}
