// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The `${...}` expression sublanguage (spec §4.1).
//!
//! Resolution: a dotted path walks a tree of JSON values. Boolean
//! evaluation: each `${...}` span is substituted by its resolved value as
//! a literal, then the remainder is parsed against a restricted grammar
//! (literals, comparisons, logical connectives, arithmetic, container
//! literals, and the builtin `coalesce(...)`). Any disallowed construct,
//! syntax error, or missing attribute fails closed: `false` for gates,
//! `null` for data resolution. Ported from
//! `original_source/agentic-workflows-v2/src/agentic_v2/engine/expressions.py`'s
//! `ExpressionEvaluator`, replacing the Python AST + sandboxed `eval` with
//! a small hand-rolled recursive-descent parser compiled once per call.

use serde_json::Value;

/// Variable reference spans: `${...}`.
fn find_var_spans(input: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let bytes = input.as_bytes();
    let mut i = 0;
    while i + 1 < bytes.len() {
        if bytes[i] == b'$' && bytes[i + 1] == b'{' {
            if let Some(end) = input[i + 2..].find('}') {
                spans.push((i, i + 2 + end + 1));
                i += 2 + end + 1;
                continue;
            }
        }
        i += 1;
    }
    spans
}

/// Navigates a dotted path through a JSON tree. A null along the way
/// short-circuits to `None` (spec §4.1: "A null along the way
/// short-circuits to null").
fn navigate<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = root;
    for part in path.split('.') {
        if part.is_empty() {
            continue;
        }
        match current {
            Value::Object(map) => current = map.get(part)?,
            Value::Null => return None,
            _ => return None,
        }
    }
    Some(current)
}

/// Resolves a single dotted path, or a `coalesce(p1, p2, ...)` call,
/// against the root view. Returns `Value::Null` on any failure (unknown
/// path, malformed coalesce).
pub fn resolve_path(root: &Value, path: &str) -> Value {
    let path = path.trim();
    if let Some(inner) = path
        .strip_prefix("coalesce(")
        .and_then(|s| s.strip_suffix(')'))
    {
        for candidate in split_args(inner) {
            let value = resolve_path(root, candidate.trim());
            if !value.is_null() {
                return value;
            }
        }
        return Value::Null;
    }
    navigate(root, path).cloned().unwrap_or(Value::Null)
}

/// Splits comma-separated arguments, respecting nested parens (so a
/// `coalesce` argument can itself be a further call in principle, though
/// in practice only paths are used).
fn split_args(input: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0usize;
    for (i, c) in input.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth -= 1,
            ',' if depth == 0 => {
                parts.push(&input[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&input[start..]);
    parts
}

/// Substitutes every `${...}` span in `template` with its resolved
/// value's JSON-literal text, returning the rewritten expression ready
/// for boolean evaluation.
fn substitute(root: &Value, template: &str) -> String {
    let spans = find_var_spans(template);
    if spans.is_empty() {
        return template.to_string();
    }
    let mut out = String::with_capacity(template.len());
    let mut last = 0;
    for (start, end) in spans {
        out.push_str(&template[last..start]);
        let path = &template[start + 2..end - 1];
        let value = resolve_path(root, path);
        out.push_str(&value_to_literal(&value));
        last = end;
    }
    out.push_str(&template[last..]);
    out
}

fn value_to_literal(value: &Value) -> String {
    match value {
        Value::String(s) => format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'")),
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

/// Resolves a `${path}` or `${coalesce(...)}` data expression against the
/// given root view. Any path, not just a lone `${...}`, is accepted: the
/// caller is expected to pass the bare path (already stripped of `${}`)
/// when resolving step outputs for data flow (§4.1, §4.4).
pub fn resolve(root: &Value, expr: &str) -> Value {
    let expr = expr.trim();
    if let Some(inner) = strip_single_var(expr) {
        return resolve_path(root, inner);
    }
    // Not a single ${...}: substitute and try to parse as a literal/path.
    let substituted = substitute(root, expr);
    match Parser::new(&substituted).parse_expr() {
        Ok(ast) => eval_ast(&ast).unwrap_or(Value::Null),
        Err(_) => Value::Null,
    }
}

fn strip_single_var(expr: &str) -> Option<&str> {
    let expr = expr.trim();
    if expr.starts_with("${") && expr.ends_with('}') && find_var_spans(expr).len() == 1 {
        let (start, end) = find_var_spans(expr)[0];
        if start == 0 && end == expr.len() {
            return Some(&expr[2..end - 1]);
        }
    }
    None
}

/// Evaluates a gating expression to a boolean. Disallowed constructs,
/// syntax errors, and missing attributes all evaluate to `false` (§4.1).
pub fn evaluate_bool(root: &Value, expr: &str) -> bool {
    let expr = expr.trim();
    if expr.eq_ignore_ascii_case("true") {
        return true;
    }
    if expr.eq_ignore_ascii_case("false") {
        return false;
    }
    if let Some(inner) = strip_single_var(expr) {
        return truthy(&resolve_path(root, inner));
    }

    let substituted = substitute(root, expr);
    let ast = match Parser::new(&substituted).parse_expr() {
        Ok(ast) => ast,
        Err(_) => return false,
    };
    match eval_ast(&ast) {
        Some(value) => truthy(&value),
        None => false,
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

// --------------------------------------------------------------------
// Restricted boolean/arithmetic grammar: literals, identifiers bound to
// already-substituted literals, comparisons, `and`/`or`/`not`,
// arithmetic, and list/tuple/set literals. No function calls (coalesce is
// handled separately before this parser runs), no attribute access, no
// subscripts, no assignment, no imports.
// --------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Ast {
    Null,
    Bool(bool),
    Num(f64),
    Str(String),
    List(Vec<Ast>),
    UnaryNot(Box<Ast>),
    UnaryNeg(Box<Ast>),
    BinOp(Box<Ast>, BinOpKind, Box<Ast>),
    BoolOp(Box<Ast>, BoolOpKind, Box<Ast>),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum BinOpKind {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
    Is,
    IsNot,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum BoolOpKind {
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Num(f64),
    Str(String),
    Ident(String),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Op(String),
    Eof,
}

struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
}

impl<'a> Lexer<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            chars: input.chars().peekable(),
        }
    }

    fn tokenize(mut self) -> Result<Vec<Tok>, ()> {
        let mut out = Vec::new();
        loop {
            self.skip_ws();
            let Some(&c) = self.chars.peek() else {
                out.push(Tok::Eof);
                break;
            };
            match c {
                '(' => {
                    self.chars.next();
                    out.push(Tok::LParen);
                }
                ')' => {
                    self.chars.next();
                    out.push(Tok::RParen);
                }
                '[' => {
                    self.chars.next();
                    out.push(Tok::LBracket);
                }
                ']' => {
                    self.chars.next();
                    out.push(Tok::RBracket);
                }
                ',' => {
                    self.chars.next();
                    out.push(Tok::Comma);
                }
                '\'' | '"' => out.push(self.lex_string(c)?),
                '0'..='9' => out.push(self.lex_number()?),
                c if c.is_alphabetic() || c == '_' => out.push(self.lex_ident()),
                '=' | '!' | '<' | '>' | '+' | '-' | '*' | '/' | '%' => {
                    out.push(self.lex_op()?)
                }
                _ => return Err(()),
            }
        }
        Ok(out)
    }

    fn skip_ws(&mut self) {
        while matches!(self.chars.peek(), Some(c) if c.is_whitespace()) {
            self.chars.next();
        }
    }

    fn lex_string(&mut self, quote: char) -> Result<Tok, ()> {
        self.chars.next();
        let mut s = String::new();
        loop {
            match self.chars.next() {
                Some('\\') => {
                    if let Some(escaped) = self.chars.next() {
                        s.push(escaped);
                    } else {
                        return Err(());
                    }
                }
                Some(c) if c == quote => return Ok(Tok::Str(s)),
                Some(c) => s.push(c),
                None => return Err(()),
            }
        }
    }

    fn lex_number(&mut self) -> Result<Tok, ()> {
        let mut s = String::new();
        while matches!(self.chars.peek(), Some(c) if c.is_ascii_digit() || *c == '.') {
            s.push(self.chars.next().unwrap());
        }
        s.parse::<f64>().map(Tok::Num).map_err(|_| ())
    }

    fn lex_ident(&mut self) -> Tok {
        let mut s = String::new();
        while matches!(self.chars.peek(), Some(c) if c.is_alphanumeric() || *c == '_') {
            s.push(self.chars.next().unwrap());
        }
        Tok::Ident(s)
    }

    fn lex_op(&mut self) -> Result<Tok, ()> {
        let first = self.chars.next().unwrap();
        if matches!(first, '=' | '!' | '<' | '>') && self.chars.peek() == Some(&'=') {
            self.chars.next();
            return Ok(Tok::Op(format!("{}=", first)));
        }
        Ok(Tok::Op(first.to_string()))
    }
}

struct Parser {
    tokens: Vec<Tok>,
    pos: usize,
}

impl Parser {
    fn new(input: &str) -> Self {
        let tokens = Lexer::new(input).tokenize().unwrap_or(vec![Tok::Eof]);
        Self { tokens, pos: 0 }
    }

    fn peek(&self) -> &Tok {
        self.tokens.get(self.pos).unwrap_or(&Tok::Eof)
    }

    fn advance(&mut self) -> Tok {
        let t = self.tokens.get(self.pos).cloned().unwrap_or(Tok::Eof);
        self.pos += 1;
        t
    }

    fn parse_expr(&mut self) -> Result<Ast, ()> {
        let ast = self.parse_or()?;
        if *self.peek() != Tok::Eof {
            return Err(());
        }
        Ok(ast)
    }

    fn parse_or(&mut self) -> Result<Ast, ()> {
        let mut left = self.parse_and()?;
        while matches!(self.peek(), Tok::Ident(s) if s == "or") {
            self.advance();
            let right = self.parse_and()?;
            left = Ast::BoolOp(Box::new(left), BoolOpKind::Or, Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Ast, ()> {
        let mut left = self.parse_not()?;
        while matches!(self.peek(), Tok::Ident(s) if s == "and") {
            self.advance();
            let right = self.parse_not()?;
            left = Ast::BoolOp(Box::new(left), BoolOpKind::And, Box::new(right));
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Ast, ()> {
        if matches!(self.peek(), Tok::Ident(s) if s == "not") {
            self.advance();
            let inner = self.parse_not()?;
            return Ok(Ast::UnaryNot(Box::new(inner)));
        }
        self.parse_compare()
    }

    fn parse_compare(&mut self) -> Result<Ast, ()> {
        let left = self.parse_arith()?;
        let op = match self.peek().clone() {
            Tok::Op(s) if s == "==" => Some(BinOpKind::Eq),
            Tok::Op(s) if s == "!=" => Some(BinOpKind::Ne),
            Tok::Op(s) if s == "<" => Some(BinOpKind::Lt),
            Tok::Op(s) if s == "<=" => Some(BinOpKind::Le),
            Tok::Op(s) if s == ">" => Some(BinOpKind::Gt),
            Tok::Op(s) if s == ">=" => Some(BinOpKind::Ge),
            Tok::Ident(s) if s == "in" => Some(BinOpKind::In),
            Tok::Ident(s) if s == "is" => {
                self.advance();
                if matches!(self.peek(), Tok::Ident(n) if n == "not") {
                    self.advance();
                    let right = self.parse_arith()?;
                    return Ok(Ast::BinOp(
                        Box::new(left),
                        BinOpKind::IsNot,
                        Box::new(right),
                    ));
                }
                let right = self.parse_arith()?;
                return Ok(Ast::BinOp(Box::new(left), BinOpKind::Is, Box::new(right)));
            }
            Tok::Ident(s) if s == "not" => {
                self.advance();
                if !matches!(self.peek(), Tok::Ident(n) if n == "in") {
                    return Err(());
                }
                self.advance();
                let right = self.parse_arith()?;
                return Ok(Ast::BinOp(
                    Box::new(left),
                    BinOpKind::NotIn,
                    Box::new(right),
                ));
            }
            _ => None,
        };
        if let Some(kind) = op {
            self.advance();
            let right = self.parse_arith()?;
            return Ok(Ast::BinOp(Box::new(left), kind, Box::new(right)));
        }
        Ok(left)
    }

    fn parse_arith(&mut self) -> Result<Ast, ()> {
        let mut left = self.parse_term()?;
        loop {
            match self.peek().clone() {
                Tok::Op(s) if s == "+" => {
                    self.advance();
                    let right = self.parse_term()?;
                    left = Ast::BinOp(Box::new(left), BinOpKind::Add, Box::new(right));
                }
                Tok::Op(s) if s == "-" => {
                    self.advance();
                    let right = self.parse_term()?;
                    left = Ast::BinOp(Box::new(left), BinOpKind::Sub, Box::new(right));
                }
                _ => break,
            }
        }
        Ok(left)
    }

    fn parse_term(&mut self) -> Result<Ast, ()> {
        let mut left = self.parse_unary()?;
        loop {
            match self.peek().clone() {
                Tok::Op(s) if s == "*" => {
                    self.advance();
                    let right = self.parse_unary()?;
                    left = Ast::BinOp(Box::new(left), BinOpKind::Mul, Box::new(right));
                }
                Tok::Op(s) if s == "/" => {
                    self.advance();
                    let right = self.parse_unary()?;
                    left = Ast::BinOp(Box::new(left), BinOpKind::Div, Box::new(right));
                }
                Tok::Op(s) if s == "%" => {
                    self.advance();
                    let right = self.parse_unary()?;
                    left = Ast::BinOp(Box::new(left), BinOpKind::Mod, Box::new(right));
                }
                _ => break,
            }
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Ast, ()> {
        if matches!(self.peek(), Tok::Op(s) if s == "-") {
            self.advance();
            let inner = self.parse_unary()?;
            return Ok(Ast::UnaryNeg(Box::new(inner)));
        }
        if matches!(self.peek(), Tok::Op(s) if s == "+") {
            self.advance();
            return self.parse_unary();
        }
        self.parse_atom()
    }

    fn parse_atom(&mut self) -> Result<Ast, ()> {
        match self.advance() {
            Tok::Num(n) => Ok(Ast::Num(n)),
            Tok::Str(s) => Ok(Ast::Str(s)),
            Tok::Ident(s) if s == "true" || s == "True" => Ok(Ast::Bool(true)),
            Tok::Ident(s) if s == "false" || s == "False" => Ok(Ast::Bool(false)),
            Tok::Ident(s) if s == "null" || s == "None" => Ok(Ast::Null),
            Tok::Ident(_) => Err(()), // bare identifiers are not allowed: disallowed attribute access
            Tok::LParen => {
                let inner = self.parse_or()?;
                if self.advance() != Tok::RParen {
                    return Err(());
                }
                Ok(inner)
            }
            Tok::LBracket => {
                let mut items = Vec::new();
                if *self.peek() != Tok::RBracket {
                    loop {
                        items.push(self.parse_or()?);
                        if *self.peek() == Tok::Comma {
                            self.advance();
                        } else {
                            break;
                        }
                    }
                }
                if self.advance() != Tok::RBracket {
                    return Err(());
                }
                Ok(Ast::List(items))
            }
            _ => Err(()),
        }
    }
}

fn eval_ast(ast: &Ast) -> Option<Value> {
    match ast {
        Ast::Null => Some(Value::Null),
        Ast::Bool(b) => Some(Value::Bool(*b)),
        Ast::Num(n) => serde_json::Number::from_f64(*n).map(Value::Number),
        Ast::Str(s) => Some(Value::String(s.clone())),
        Ast::List(items) => {
            let values: Option<Vec<Value>> = items.iter().map(eval_ast).collect();
            values.map(Value::Array)
        }
        Ast::UnaryNot(inner) => eval_ast(inner).map(|v| Value::Bool(!truthy(&v))),
        Ast::UnaryNeg(inner) => match eval_ast(inner)? {
            Value::Number(n) => n.as_f64().and_then(|f| {
                serde_json::Number::from_f64(-f).map(Value::Number)
            }),
            _ => None,
        },
        Ast::BoolOp(left, kind, right) => {
            let l = eval_ast(left)?;
            match kind {
                BoolOpKind::And => {
                    if !truthy(&l) {
                        Some(l)
                    } else {
                        eval_ast(right)
                    }
                }
                BoolOpKind::Or => {
                    if truthy(&l) {
                        Some(l)
                    } else {
                        eval_ast(right)
                    }
                }
            }
        }
        Ast::BinOp(left, kind, right) => eval_binop(left, *kind, right),
    }
}

fn eval_binop(left: &Ast, kind: BinOpKind, right: &Ast) -> Option<Value> {
    let l = eval_ast(left)?;
    let r = eval_ast(right)?;
    match kind {
        BinOpKind::Add | BinOpKind::Sub | BinOpKind::Mul | BinOpKind::Div | BinOpKind::Mod => {
            let (lf, rf) = (as_num(&l)?, as_num(&r)?);
            let result = match kind {
                BinOpKind::Add => lf + rf,
                BinOpKind::Sub => lf - rf,
                BinOpKind::Mul => lf * rf,
                BinOpKind::Div => {
                    if rf == 0.0 {
                        return None;
                    }
                    lf / rf
                }
                BinOpKind::Mod => {
                    if rf == 0.0 {
                        return None;
                    }
                    lf % rf
                }
                _ => unreachable!(),
            };
            serde_json::Number::from_f64(result).map(Value::Number)
        }
        BinOpKind::Eq => Some(Value::Bool(l == r)),
        BinOpKind::Ne => Some(Value::Bool(l != r)),
        BinOpKind::Lt | BinOpKind::Le | BinOpKind::Gt | BinOpKind::Ge => {
            let ordering = compare(&l, &r)?;
            Some(Value::Bool(match kind {
                BinOpKind::Lt => ordering.is_lt(),
                BinOpKind::Le => ordering.is_le(),
                BinOpKind::Gt => ordering.is_gt(),
                BinOpKind::Ge => ordering.is_ge(),
                _ => unreachable!(),
            }))
        }
        BinOpKind::In => Some(Value::Bool(contains(&r, &l))),
        BinOpKind::NotIn => Some(Value::Bool(!contains(&r, &l))),
        BinOpKind::Is => Some(Value::Bool(l == r)),
        BinOpKind::IsNot => Some(Value::Bool(l != r)),
    }
}

fn as_num(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

fn compare(l: &Value, r: &Value) -> Option<std::cmp::Ordering> {
    match (l, r) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn contains(container: &Value, needle: &Value) -> bool {
    match container {
        Value::Array(items) => items.contains(needle),
        Value::String(s) => match needle {
            Value::String(n) => s.contains(n.as_str()),
            _ => false,
        },
        Value::Object(map) => match needle {
            Value::String(k) => map.contains_key(k),
            _ => false,
        },
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn root() -> Value {
        json!({
            "inputs": { "mode": "quick" },
            "steps": {
                "review": { "status": "success", "outputs": { "approved": true } },
                "parse": { "status": "success", "outputs": {} }
            },
            "context": { "count": 5 }
        })
    }

    #[test]
    fn resolves_dotted_path() {
        let v = resolve(&root(), "steps.review.outputs.approved");
        assert_eq!(v, Value::Bool(true));
    }

    #[test]
    fn missing_path_resolves_null() {
        let v = resolve(&root(), "steps.ghost.outputs.x");
        assert_eq!(v, Value::Null);
    }

    #[test]
    fn coalesce_returns_first_non_null() {
        let v = resolve(
            &root(),
            "coalesce(steps.ghost.outputs.x, steps.review.outputs.approved)",
        );
        assert_eq!(v, Value::Bool(true));
    }

    #[test]
    fn boolean_gate_with_and() {
        let expr = "${inputs.mode} != 'quick' and ${steps.parse.status} == 'success'";
        assert!(!evaluate_bool(&root(), expr));
    }

    #[test]
    fn boolean_gate_true_branch() {
        let expr = "${inputs.mode} == 'quick' and ${steps.parse.status} == 'success'";
        assert!(evaluate_bool(&root(), expr));
    }

    #[test]
    fn missing_attribute_is_false_not_error() {
        let expr = "${steps.review.outputs.missing_key} == true";
        assert!(!evaluate_bool(&root(), expr));
    }

    #[test]
    fn disallowed_function_call_fails_closed() {
        // len(...) is not a recognized builtin; must evaluate to false, never panic.
        assert!(!evaluate_bool(&root(), "len('abc') == 3"));
    }

    #[test]
    fn disallowed_attribute_access_fails_closed() {
        assert!(!evaluate_bool(&root(), "os.system('rm -rf /')"));
    }

    #[test]
    fn arithmetic_on_numbers_works() {
        assert!(evaluate_bool(&root(), "${context.count} + 1 == 6"));
    }

    #[test]
    fn arithmetic_on_strings_fails_closed() {
        assert!(!evaluate_bool(&root(), "'a' + 'b' == 'ab'"));
    }

    #[test]
    fn in_operator_on_list_literal() {
        assert!(evaluate_bool(&root(), "3 in [1, 2, 3]"));
    }

    #[test]
    fn syntax_error_fails_closed() {
        assert!(!evaluate_bool(&root(), "${inputs.mode} ==="));
    }
}
