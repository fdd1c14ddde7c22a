//! Recursive-descent parser for the traced Python subset.

use std::rc::Rc;

use super::ast::*;
use super::error::SyntaxError;
use super::lexer::{hex_escape, tokenize, Tok, Token};

const KEYWORDS: &[&str] = &[
    "False", "None", "True", "and", "as", "assert", "async", "await", "break", "class",
    "continue", "def", "del", "elif", "else", "except", "finally", "for", "from", "global",
    "if", "import", "in", "is", "lambda", "nonlocal", "not", "or", "pass", "raise", "return",
    "try", "while", "with", "yield",
];

/// Parse a whole module.
pub fn parse_module(source: &str) -> Result<Vec<Stmt>, SyntaxError> {
    let mut parser = Parser::new(tokenize(source)?);
    parser.module()
}

/// Parse a single expression (argument literals, f-string fields).
pub fn parse_expression(source: &str) -> Result<Expr, SyntaxError> {
    let mut parser = Parser::new(tokenize(source)?);
    parser.skip_newlines();
    let expr = parser.testlist()?;
    parser.skip_newlines();
    if !parser.at(&Tok::Eof) {
        return Err(parser.error("unexpected trailing input"));
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    // ----- token helpers -------------------------------------------------

    fn peek(&self) -> &Tok {
        self.tokens
            .get(self.pos)
            .map(|t| &t.tok)
            .unwrap_or(&Tok::Eof)
    }

    fn peek_at(&self, offset: usize) -> &Tok {
        self.tokens
            .get(self.pos + offset)
            .map(|t| &t.tok)
            .unwrap_or(&Tok::Eof)
    }

    fn line(&self) -> u32 {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map_or(1, |t| t.line)
    }

    fn advance(&mut self) -> Tok {
        let tok = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn at(&self, tok: &Tok) -> bool {
        self.peek() == tok
    }

    fn at_op(&self, op: &str) -> bool {
        matches!(self.peek(), Tok::Op(o) if *o == op)
    }

    fn eat_op(&mut self, op: &str) -> bool {
        if self.at_op(op) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_op(&mut self, op: &str) -> Result<(), SyntaxError> {
        if self.eat_op(op) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{op}'")))
        }
    }

    fn at_keyword(&self, kw: &str) -> bool {
        matches!(self.peek(), Tok::Name(n) if n == kw)
    }

    fn eat_keyword(&mut self, kw: &str) -> bool {
        if self.at_keyword(kw) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, kw: &str) -> Result<(), SyntaxError> {
        if self.eat_keyword(kw) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{kw}'")))
        }
    }

    fn expect_name(&mut self) -> Result<String, SyntaxError> {
        match self.peek().clone() {
            Tok::Name(name) if !KEYWORDS.contains(&name.as_str()) => {
                self.pos += 1;
                Ok(name)
            }
            _ => Err(self.error("expected a name")),
        }
    }

    fn error(&self, message: impl Into<String>) -> SyntaxError {
        let found = match self.peek() {
            Tok::Name(n) => format!("'{n}'"),
            Tok::Int(i) => i.to_string(),
            Tok::BigInt(i) => i.to_string(),
            Tok::Float(f) => f.to_string(),
            Tok::Str(_) | Tok::FStr(_) => "string".to_string(),
            Tok::Op(o) => format!("'{o}'"),
            Tok::Newline => "end of line".to_string(),
            Tok::Indent => "indent".to_string(),
            Tok::Dedent => "dedent".to_string(),
            Tok::Eof => "end of input".to_string(),
        };
        SyntaxError::new(format!("invalid syntax: {}, found {found}", message.into()), self.line())
    }

    fn skip_newlines(&mut self) {
        while self.at(&Tok::Newline) {
            self.pos += 1;
        }
    }

    // ----- statements ----------------------------------------------------

    fn module(&mut self) -> Result<Vec<Stmt>, SyntaxError> {
        let mut body = Vec::new();
        loop {
            self.skip_newlines();
            if self.at(&Tok::Eof) {
                break;
            }
            if self.at(&Tok::Indent) {
                return Err(SyntaxError::new("unexpected indent", self.line()));
            }
            body.extend(self.statement()?);
        }
        Ok(body)
    }

    fn statement(&mut self) -> Result<Vec<Stmt>, SyntaxError> {
        let line = self.line();
        let Tok::Name(word) = self.peek().clone() else {
            return self.simple_statements();
        };
        let stmt = match word.as_str() {
            "if" => {
                self.pos += 1;
                self.if_rest(line)?
            }
            "while" => self.while_stmt(line)?,
            "for" => self.for_stmt(line)?,
            "def" => self.funcdef(Vec::new())?,
            "class" => self.classdef()?,
            "try" => self.try_stmt(line)?,
            "with" | "async" => {
                return Err(SyntaxError::new(
                    format!("unsupported statement '{word}'"),
                    line,
                ))
            }
            _ => return self.simple_statements(),
        };
        Ok(vec![stmt])
    }

    fn decorated(&mut self) -> Result<Stmt, SyntaxError> {
        let mut decorators = Vec::new();
        while self.eat_op("@") {
            decorators.push(self.test()?);
            if !self.at(&Tok::Newline) {
                return Err(self.error("expected newline after decorator"));
            }
            self.skip_newlines();
        }
        if self.at_keyword("def") {
            self.funcdef(decorators)
        } else {
            Err(self.error("decorators are only supported on functions"))
        }
    }

    fn block(&mut self) -> Result<Vec<Stmt>, SyntaxError> {
        self.expect_op(":")?;
        if !self.at(&Tok::Newline) {
            return self.simple_statements();
        }
        self.skip_newlines();
        if !self.at(&Tok::Indent) {
            return Err(SyntaxError::new("expected an indented block", self.line()));
        }
        self.pos += 1;
        let mut body = Vec::new();
        loop {
            self.skip_newlines();
            if self.at(&Tok::Dedent) {
                self.pos += 1;
                break;
            }
            if self.at(&Tok::Eof) {
                break;
            }
            body.extend(self.statement()?);
        }
        Ok(body)
    }

    fn if_rest(&mut self, line: u32) -> Result<Stmt, SyntaxError> {
        let test = self.namedexpr_test()?;
        let body = self.block()?;
        self.skip_newlines_before_continuation();
        let orelse = if self.at_keyword("elif") {
            let elif_line = self.line();
            self.pos += 1;
            vec![self.if_rest(elif_line)?]
        } else if self.at_keyword("else") {
            self.pos += 1;
            self.block()?
        } else {
            Vec::new()
        };
        Ok(Stmt {
            line,
            kind: StmtKind::If { test, body, orelse },
        })
    }

    /// `else`/`elif`/`except`/`finally` may follow a block's trailing newline.
    fn skip_newlines_before_continuation(&mut self) {
        let mut offset = 0;
        while self.peek_at(offset) == &Tok::Newline {
            offset += 1;
        }
        if matches!(
            self.peek_at(offset),
            Tok::Name(n) if matches!(n.as_str(), "elif" | "else" | "except" | "finally")
        ) {
            self.pos += offset;
        }
    }

    fn while_stmt(&mut self, line: u32) -> Result<Stmt, SyntaxError> {
        self.expect_keyword("while")?;
        let test = self.namedexpr_test()?;
        let body = self.block()?;
        self.skip_newlines_before_continuation();
        let orelse = if self.eat_keyword("else") {
            self.block()?
        } else {
            Vec::new()
        };
        Ok(Stmt {
            line,
            kind: StmtKind::While { test, body, orelse },
        })
    }

    fn for_stmt(&mut self, line: u32) -> Result<Stmt, SyntaxError> {
        self.expect_keyword("for")?;
        let target = self.target_list()?;
        self.expect_keyword("in")?;
        let iter = self.testlist()?;
        let body = self.block()?;
        self.skip_newlines_before_continuation();
        let orelse = if self.eat_keyword("else") {
            self.block()?
        } else {
            Vec::new()
        };
        Ok(Stmt {
            line,
            kind: StmtKind::For {
                target,
                iter,
                body,
                orelse,
            },
        })
    }

    fn funcdef(&mut self, decorators: Vec<Expr>) -> Result<Stmt, SyntaxError> {
        let line = self.line();
        self.expect_keyword("def")?;
        let name = self.expect_name()?;
        self.expect_op("(")?;
        let params = self.parameters(")", true)?;
        self.expect_op(")")?;
        if self.eat_op("->") {
            self.test()?;
        }
        let body = self.block()?;
        Ok(Stmt {
            line,
            kind: StmtKind::FunctionDef(Rc::new(FunctionDef {
                name,
                line,
                params,
                body,
                decorators,
            })),
        })
    }

    fn parameters(&mut self, close: &str, annotations: bool) -> Result<Vec<Param>, SyntaxError> {
        let mut params: Vec<Param> = Vec::new();
        while !self.at_op(close) {
            if self.at_op("*") || self.at_op("**") || self.at_op("/") {
                return Err(self.error("variadic and positional-only parameters are not supported"));
            }
            let name = self.expect_name()?;
            if annotations && self.eat_op(":") {
                self.test()?;
            }
            let default = if self.eat_op("=") {
                Some(self.test()?)
            } else {
                None
            };
            if default.is_none() && params.iter().any(|p| p.default.is_some()) {
                return Err(self.error("non-default argument follows default argument"));
            }
            params.push(Param { name, default });
            if !self.eat_op(",") {
                break;
            }
        }
        Ok(params)
    }

    fn classdef(&mut self) -> Result<Stmt, SyntaxError> {
        let line = self.line();
        self.expect_keyword("class")?;
        let name = self.expect_name()?;
        let mut bases = Vec::new();
        if self.eat_op("(") {
            while !self.at_op(")") {
                bases.push(self.test()?);
                if !self.eat_op(",") {
                    break;
                }
            }
            self.expect_op(")")?;
        }
        let body = self.block()?;
        Ok(Stmt {
            line,
            kind: StmtKind::ClassDef(Rc::new(ClassDef {
                name,
                line,
                bases,
                body,
            })),
        })
    }

    fn try_stmt(&mut self, line: u32) -> Result<Stmt, SyntaxError> {
        self.expect_keyword("try")?;
        let body = self.block()?;
        let mut handlers = Vec::new();
        self.skip_newlines_before_continuation();
        while self.at_keyword("except") {
            let handler_line = self.line();
            self.pos += 1;
            let (exc_type, name) = if self.at_op(":") {
                (None, None)
            } else {
                let exc_type = self.test()?;
                let name = if self.eat_keyword("as") {
                    Some(self.expect_name()?)
                } else {
                    None
                };
                (Some(exc_type), name)
            };
            let handler_body = self.block()?;
            handlers.push(Handler {
                line: handler_line,
                exc_type,
                name,
                body: handler_body,
            });
            self.skip_newlines_before_continuation();
        }
        let orelse = if !handlers.is_empty() && self.eat_keyword("else") {
            let block = self.block()?;
            self.skip_newlines_before_continuation();
            block
        } else {
            Vec::new()
        };
        let finalbody = if self.eat_keyword("finally") {
            self.block()?
        } else {
            Vec::new()
        };
        if handlers.is_empty() && finalbody.is_empty() {
            return Err(self.error("expected 'except' or 'finally' block"));
        }
        Ok(Stmt {
            line,
            kind: StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            },
        })
    }

    fn simple_statements(&mut self) -> Result<Vec<Stmt>, SyntaxError> {
        if self.at_op("@") {
            return Ok(vec![self.decorated()?]);
        }
        let mut stmts = vec![self.small_statement()?];
        while self.eat_op(";") {
            if self.at(&Tok::Newline) || self.at(&Tok::Eof) {
                break;
            }
            stmts.push(self.small_statement()?);
        }
        if self.at(&Tok::Newline) {
            self.pos += 1;
        } else if !self.at(&Tok::Eof) && !self.at(&Tok::Dedent) {
            return Err(self.error("expected end of statement"));
        }
        Ok(stmts)
    }

    fn small_statement(&mut self) -> Result<Stmt, SyntaxError> {
        let line = self.line();
        let kind = match self.peek().clone() {
            Tok::Name(word) => match word.as_str() {
                "pass" => {
                    self.pos += 1;
                    StmtKind::Pass
                }
                "break" => {
                    self.pos += 1;
                    StmtKind::Break
                }
                "continue" => {
                    self.pos += 1;
                    StmtKind::Continue
                }
                "return" => {
                    self.pos += 1;
                    if self.at_statement_end() {
                        StmtKind::Return(None)
                    } else {
                        StmtKind::Return(Some(self.testlist()?))
                    }
                }
                "raise" => {
                    self.pos += 1;
                    if self.at_statement_end() {
                        StmtKind::Raise(None)
                    } else {
                        let exc = self.test()?;
                        if self.eat_keyword("from") {
                            self.test()?;
                        }
                        StmtKind::Raise(Some(exc))
                    }
                }
                "global" | "nonlocal" => {
                    self.pos += 1;
                    let mut names = vec![self.expect_name()?];
                    while self.eat_op(",") {
                        names.push(self.expect_name()?);
                    }
                    if word == "global" {
                        StmtKind::Global(names)
                    } else {
                        StmtKind::Nonlocal(names)
                    }
                }
                "del" => {
                    self.pos += 1;
                    let mut targets = vec![self.bitor()?];
                    while self.eat_op(",") {
                        if self.at_statement_end() {
                            break;
                        }
                        targets.push(self.bitor()?);
                    }
                    StmtKind::Delete(targets)
                }
                "assert" => {
                    self.pos += 1;
                    let test = self.test()?;
                    let msg = if self.eat_op(",") {
                        Some(self.test()?)
                    } else {
                        None
                    };
                    StmtKind::Assert { test, msg }
                }
                "import" => {
                    self.pos += 1;
                    let mut names = vec![self.import_alias(true)?];
                    while self.eat_op(",") {
                        names.push(self.import_alias(true)?);
                    }
                    StmtKind::Import(names)
                }
                "from" => {
                    self.pos += 1;
                    let module = self.dotted_name()?;
                    self.expect_keyword("import")?;
                    let mut names = Vec::new();
                    if self.eat_op("*") {
                        names.push(Alias {
                            name: "*".to_string(),
                            asname: None,
                        });
                    } else {
                        let parens = self.eat_op("(");
                        loop {
                            if parens && self.at_op(")") {
                                break;
                            }
                            names.push(self.import_alias(false)?);
                            if !self.eat_op(",") {
                                break;
                            }
                        }
                        if parens {
                            self.expect_op(")")?;
                        }
                    }
                    StmtKind::ImportFrom { module, names }
                }
                "yield" | "await" => {
                    return Err(SyntaxError::new(
                        format!("unsupported expression '{word}'"),
                        line,
                    ))
                }
                _ => self.expression_statement()?,
            },
            _ => self.expression_statement()?,
        };
        Ok(Stmt { line, kind })
    }

    fn at_statement_end(&self) -> bool {
        matches!(self.peek(), Tok::Newline | Tok::Eof | Tok::Dedent) || self.at_op(";")
    }

    fn dotted_name(&mut self) -> Result<String, SyntaxError> {
        let mut name = self.expect_name()?;
        while self.eat_op(".") {
            name.push('.');
            name.push_str(&self.expect_name()?);
        }
        Ok(name)
    }

    fn import_alias(&mut self, dotted: bool) -> Result<Alias, SyntaxError> {
        let name = if dotted {
            self.dotted_name()?
        } else {
            self.expect_name()?
        };
        let asname = if self.eat_keyword("as") {
            Some(self.expect_name()?)
        } else {
            None
        };
        Ok(Alias { name, asname })
    }

    fn expression_statement(&mut self) -> Result<StmtKind, SyntaxError> {
        let first = self.testlist_star()?;

        if self.eat_op(":") {
            let annotation_target = first;
            self.test()?;
            let value = if self.eat_op("=") {
                Some(self.testlist()?)
            } else {
                None
            };
            return Ok(StmtKind::AnnAssign {
                target: annotation_target,
                value,
            });
        }

        if let Tok::Op(op) = self.peek().clone() {
            let aug = match op {
                "+=" => Some(BinOp::Add),
                "-=" => Some(BinOp::Sub),
                "*=" => Some(BinOp::Mul),
                "/=" => Some(BinOp::Div),
                "//=" => Some(BinOp::FloorDiv),
                "%=" => Some(BinOp::Mod),
                "**=" => Some(BinOp::Pow),
                "&=" => Some(BinOp::BitAnd),
                "|=" => Some(BinOp::BitOr),
                "^=" => Some(BinOp::BitXor),
                "<<=" => Some(BinOp::LShift),
                ">>=" => Some(BinOp::RShift),
                _ => None,
            };
            if let Some(op) = aug {
                self.pos += 1;
                check_target(&first, self.line())?;
                let value = self.testlist()?;
                return Ok(StmtKind::AugAssign {
                    target: first,
                    op,
                    value,
                });
            }
        }

        if self.at_op("=") {
            let mut targets = vec![first];
            let mut value = None;
            while self.eat_op("=") {
                let next = self.testlist_star()?;
                if let Some(prev) = value.replace(next) {
                    targets.push(prev);
                }
            }
            for target in &targets {
                check_target(target, self.line())?;
            }
            let value = value.ok_or_else(|| self.error("expected a value"))?;
            return Ok(StmtKind::Assign { targets, value });
        }

        Ok(StmtKind::Expr(first))
    }

    // ----- expressions ---------------------------------------------------

    /// Comma-separated tests; a trailing or inner comma builds a tuple.
    fn testlist(&mut self) -> Result<Expr, SyntaxError> {
        let first = self.test()?;
        if !self.at_op(",") {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.at_tuple_end() {
                break;
            }
            items.push(self.test()?);
        }
        Ok(Expr::Tuple(items))
    }

    fn testlist_star(&mut self) -> Result<Expr, SyntaxError> {
        let first = self.test_or_star()?;
        if !self.at_op(",") {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.at_tuple_end() {
                break;
            }
            items.push(self.test_or_star()?);
        }
        Ok(Expr::Tuple(items))
    }

    fn at_tuple_end(&self) -> bool {
        self.at_statement_end()
            || self.at_op("=")
            || self.at_op(")")
            || self.at_op(":")
            || matches!(self.peek(), Tok::Op(o) if o.ends_with('=') && o.len() > 1 && *o != "==" && *o != "!=" && *o != "<=" && *o != ">=")
    }

    fn test_or_star(&mut self) -> Result<Expr, SyntaxError> {
        if self.eat_op("*") {
            return Ok(Expr::Starred(Box::new(self.bitor()?)));
        }
        self.test()
    }

    fn target_list(&mut self) -> Result<Expr, SyntaxError> {
        let line = self.line();
        let first = self.target_item()?;
        let target = if self.at_op(",") {
            let mut items = vec![first];
            while self.eat_op(",") {
                if self.at_keyword("in") {
                    break;
                }
                items.push(self.target_item()?);
            }
            Expr::Tuple(items)
        } else {
            first
        };
        check_target(&target, line)?;
        Ok(target)
    }

    fn target_item(&mut self) -> Result<Expr, SyntaxError> {
        if self.eat_op("*") {
            return Ok(Expr::Starred(Box::new(self.bitor()?)));
        }
        self.bitor()
    }

    fn namedexpr_test(&mut self) -> Result<Expr, SyntaxError> {
        let expr = self.test()?;
        if self.at_op(":=") {
            return Err(self.error("assignment expressions are not supported"));
        }
        Ok(expr)
    }

    fn test(&mut self) -> Result<Expr, SyntaxError> {
        if self.at_keyword("lambda") {
            return self.lambda();
        }
        let body = self.or_test()?;
        if self.at_keyword("if") && !self.in_comprehension_if() {
            self.pos += 1;
            let test = self.or_test()?;
            self.expect_keyword("else")?;
            let orelse = self.test()?;
            return Ok(Expr::IfExp {
                test: Box::new(test),
                body: Box::new(body),
                orelse: Box::new(orelse),
            });
        }
        Ok(body)
    }

    /// A conditional expression needs an `else`; otherwise the `if` belongs
    /// to an enclosing comprehension.
    fn in_comprehension_if(&self) -> bool {
        let mut depth = 0i32;
        let mut offset = 1;
        loop {
            match self.peek_at(offset) {
                Tok::Eof | Tok::Newline => return true,
                Tok::Op("(" | "[" | "{") => depth += 1,
                Tok::Op(")" | "]" | "}") => {
                    if depth == 0 {
                        return true;
                    }
                    depth -= 1;
                }
                Tok::Op(",") if depth == 0 => return true,
                Tok::Name(n) if depth == 0 && n == "else" => return false,
                Tok::Name(n) if depth == 0 && (n == "for" || n == "if") => return true,
                _ => {}
            }
            offset += 1;
        }
    }

    fn lambda(&mut self) -> Result<Expr, SyntaxError> {
        let line = self.line();
        self.expect_keyword("lambda")?;
        let params = self.parameters(":", false)?;
        self.expect_op(":")?;
        let body = self.test()?;
        Ok(Expr::Lambda(Rc::new(FunctionDef {
            name: "<lambda>".to_string(),
            line,
            params,
            body: vec![Stmt {
                line,
                kind: StmtKind::Return(Some(body)),
            }],
            decorators: Vec::new(),
        })))
    }

    fn or_test(&mut self) -> Result<Expr, SyntaxError> {
        let mut left = self.and_test()?;
        while self.eat_keyword("or") {
            let right = self.and_test()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and_test(&mut self) -> Result<Expr, SyntaxError> {
        let mut left = self.not_test()?;
        while self.eat_keyword("and") {
            let right = self.not_test()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn not_test(&mut self) -> Result<Expr, SyntaxError> {
        if self.eat_keyword("not") {
            let operand = self.not_test()?;
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(operand)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr, SyntaxError> {
        let left = self.bitor()?;
        let mut ops = Vec::new();
        loop {
            let op = match self.peek() {
                Tok::Op("<") => CmpOp::Lt,
                Tok::Op(">") => CmpOp::Gt,
                Tok::Op("==") => CmpOp::Eq,
                Tok::Op(">=") => CmpOp::GtE,
                Tok::Op("<=") => CmpOp::LtE,
                Tok::Op("!=") => CmpOp::NotEq,
                Tok::Name(n) if n == "in" => CmpOp::In,
                Tok::Name(n) if n == "not" && matches!(self.peek_at(1), Tok::Name(m) if m == "in") => {
                    self.pos += 1;
                    CmpOp::NotIn
                }
                Tok::Name(n) if n == "is" => {
                    if matches!(self.peek_at(1), Tok::Name(m) if m == "not") {
                        self.pos += 1;
                        CmpOp::IsNot
                    } else {
                        CmpOp::Is
                    }
                }
                _ => break,
            };
            self.pos += 1;
            ops.push((op, self.bitor()?));
        }
        if ops.is_empty() {
            Ok(left)
        } else {
            Ok(Expr::Compare {
                left: Box::new(left),
                ops,
            })
        }
    }

    fn binary_level(
        &mut self,
        table: &[(&str, BinOp)],
        next: fn(&mut Self) -> Result<Expr, SyntaxError>,
    ) -> Result<Expr, SyntaxError> {
        let mut left = next(self)?;
        'outer: loop {
            for (symbol, op) in table {
                if self.at_op(symbol) {
                    self.pos += 1;
                    let right = next(self)?;
                    left = Expr::BinOp(Box::new(left), *op, Box::new(right));
                    continue 'outer;
                }
            }
            return Ok(left);
        }
    }

    fn bitor(&mut self) -> Result<Expr, SyntaxError> {
        self.binary_level(&[("|", BinOp::BitOr)], Self::bitxor)
    }

    fn bitxor(&mut self) -> Result<Expr, SyntaxError> {
        self.binary_level(&[("^", BinOp::BitXor)], Self::bitand)
    }

    fn bitand(&mut self) -> Result<Expr, SyntaxError> {
        self.binary_level(&[("&", BinOp::BitAnd)], Self::shift)
    }

    fn shift(&mut self) -> Result<Expr, SyntaxError> {
        self.binary_level(&[("<<", BinOp::LShift), (">>", BinOp::RShift)], Self::arith)
    }

    fn arith(&mut self) -> Result<Expr, SyntaxError> {
        self.binary_level(&[("+", BinOp::Add), ("-", BinOp::Sub)], Self::term)
    }

    fn term(&mut self) -> Result<Expr, SyntaxError> {
        self.binary_level(
            &[
                ("*", BinOp::Mul),
                ("/", BinOp::Div),
                ("//", BinOp::FloorDiv),
                ("%", BinOp::Mod),
            ],
            Self::factor,
        )
    }

    fn factor(&mut self) -> Result<Expr, SyntaxError> {
        let op = match self.peek() {
            Tok::Op("-") => UnaryOp::Neg,
            Tok::Op("+") => UnaryOp::Pos,
            Tok::Op("~") => UnaryOp::Invert,
            _ => return self.power(),
        };
        self.pos += 1;
        let operand = self.factor()?;
        Ok(Expr::Unary(op, Box::new(operand)))
    }

    fn power(&mut self) -> Result<Expr, SyntaxError> {
        let base = self.atom_expr()?;
        if self.eat_op("**") {
            let exponent = self.factor()?;
            return Ok(Expr::BinOp(Box::new(base), BinOp::Pow, Box::new(exponent)));
        }
        Ok(base)
    }

    fn atom_expr(&mut self) -> Result<Expr, SyntaxError> {
        let mut expr = self.atom()?;
        loop {
            if self.eat_op("(") {
                let (args, kwargs) = self.call_arguments()?;
                self.expect_op(")")?;
                expr = Expr::Call {
                    func: Box::new(expr),
                    args,
                    kwargs,
                };
            } else if self.eat_op("[") {
                let index = self.subscript_list()?;
                self.expect_op("]")?;
                expr = Expr::Subscript(Box::new(expr), Box::new(index));
            } else if self.eat_op(".") {
                let name = match self.advance() {
                    Tok::Name(n) => n,
                    _ => return Err(self.error("expected attribute name")),
                };
                expr = Expr::Attribute(Box::new(expr), name);
            } else {
                return Ok(expr);
            }
        }
    }

    fn call_arguments(&mut self) -> Result<(Vec<Expr>, Vec<(String, Expr)>), SyntaxError> {
        let mut args = Vec::new();
        let mut kwargs = Vec::new();
        while !self.at_op(")") {
            if self.eat_op("**") {
                return Err(self.error("keyword argument unpacking is not supported"));
            }
            if self.eat_op("*") {
                args.push(Expr::Starred(Box::new(self.test()?)));
            } else if matches!(self.peek(), Tok::Name(_)) && self.peek_at(1) == &Tok::Op("=") {
                let name = self.expect_name()?;
                self.expect_op("=")?;
                kwargs.push((name, self.test()?));
            } else {
                let arg = self.test()?;
                if self.at_keyword("for") {
                    let generators = self.comprehension_clauses()?;
                    args.push(Expr::ListComp(Box::new(arg), generators));
                } else {
                    if !kwargs.is_empty() {
                        return Err(self.error("positional argument follows keyword argument"));
                    }
                    args.push(arg);
                }
            }
            if !self.eat_op(",") {
                break;
            }
        }
        Ok((args, kwargs))
    }

    fn subscript_list(&mut self) -> Result<Expr, SyntaxError> {
        let first = self.subscript()?;
        if !self.at_op(",") {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.at_op("]") {
                break;
            }
            items.push(self.subscript()?);
        }
        Ok(Expr::Tuple(items))
    }

    fn subscript(&mut self) -> Result<Expr, SyntaxError> {
        let lower = if self.at_op(":") {
            None
        } else {
            let expr = self.test()?;
            if !self.at_op(":") {
                return Ok(expr);
            }
            Some(Box::new(expr))
        };
        self.expect_op(":")?;
        let upper = if self.at_op(":") || self.at_op("]") || self.at_op(",") {
            None
        } else {
            Some(Box::new(self.test()?))
        };
        let step = if self.eat_op(":") {
            if self.at_op("]") || self.at_op(",") {
                None
            } else {
                Some(Box::new(self.test()?))
            }
        } else {
            None
        };
        Ok(Expr::Slice { lower, upper, step })
    }

    fn comprehension_clauses(&mut self) -> Result<Vec<Comprehension>, SyntaxError> {
        let mut generators = Vec::new();
        while self.eat_keyword("for") {
            let target = self.target_list()?;
            self.expect_keyword("in")?;
            let iter = self.or_test()?;
            let mut ifs = Vec::new();
            while self.eat_keyword("if") {
                ifs.push(self.or_test()?);
            }
            generators.push(Comprehension { target, iter, ifs });
        }
        Ok(generators)
    }

    fn atom(&mut self) -> Result<Expr, SyntaxError> {
        let tok = self.peek().clone();
        match tok {
            Tok::Int(i) => {
                self.pos += 1;
                Ok(Expr::Const(Const::Int(i)))
            }
            Tok::BigInt(i) => {
                self.pos += 1;
                Ok(Expr::Const(Const::BigInt(i)))
            }
            Tok::Float(f) => {
                self.pos += 1;
                Ok(Expr::Const(Const::Float(f)))
            }
            Tok::Str(s) => {
                self.pos += 1;
                Ok(Expr::Const(Const::Str(Rc::from(s.as_str()))))
            }
            Tok::FStr(body) => {
                let line = self.line();
                self.pos += 1;
                Ok(Expr::FString(parse_fstring(&body, line)?))
            }
            Tok::Name(name) => match name.as_str() {
                "None" => {
                    self.pos += 1;
                    Ok(Expr::Const(Const::None))
                }
                "True" => {
                    self.pos += 1;
                    Ok(Expr::Const(Const::Bool(true)))
                }
                "False" => {
                    self.pos += 1;
                    Ok(Expr::Const(Const::Bool(false)))
                }
                _ => Ok(Expr::Name(self.expect_name()?)),
            },
            Tok::Op("(") => {
                self.pos += 1;
                if self.eat_op(")") {
                    return Ok(Expr::Tuple(Vec::new()));
                }
                let first = self.test_or_star()?;
                if self.at_keyword("for") {
                    let generators = self.comprehension_clauses()?;
                    self.expect_op(")")?;
                    return Ok(Expr::ListComp(Box::new(first), generators));
                }
                if self.eat_op(")") {
                    return Ok(first);
                }
                let mut items = vec![first];
                while self.eat_op(",") {
                    if self.at_op(")") {
                        break;
                    }
                    items.push(self.test_or_star()?);
                }
                self.expect_op(")")?;
                Ok(Expr::Tuple(items))
            }
            Tok::Op("[") => {
                self.pos += 1;
                if self.eat_op("]") {
                    return Ok(Expr::List(Vec::new()));
                }
                let first = self.test_or_star()?;
                if self.at_keyword("for") {
                    let generators = self.comprehension_clauses()?;
                    self.expect_op("]")?;
                    return Ok(Expr::ListComp(Box::new(first), generators));
                }
                let mut items = vec![first];
                while self.eat_op(",") {
                    if self.at_op("]") {
                        break;
                    }
                    items.push(self.test_or_star()?);
                }
                self.expect_op("]")?;
                Ok(Expr::List(items))
            }
            Tok::Op("{") => {
                self.pos += 1;
                self.dict_or_set()
            }
            _ => Err(self.error("expected an expression")),
        }
    }

    fn dict_or_set(&mut self) -> Result<Expr, SyntaxError> {
        if self.eat_op("}") {
            return Ok(Expr::Dict(Vec::new()));
        }
        let first = self.test_or_star()?;
        if self.eat_op(":") {
            let value = self.test()?;
            if self.at_keyword("for") {
                let generators = self.comprehension_clauses()?;
                self.expect_op("}")?;
                return Ok(Expr::DictComp(Box::new(first), Box::new(value), generators));
            }
            let mut pairs = vec![(first, value)];
            while self.eat_op(",") {
                if self.at_op("}") {
                    break;
                }
                let key = self.test()?;
                self.expect_op(":")?;
                pairs.push((key, self.test()?));
            }
            self.expect_op("}")?;
            return Ok(Expr::Dict(pairs));
        }
        if self.at_keyword("for") {
            let generators = self.comprehension_clauses()?;
            self.expect_op("}")?;
            return Ok(Expr::SetComp(Box::new(first), generators));
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.at_op("}") {
                break;
            }
            items.push(self.test_or_star()?);
        }
        self.expect_op("}")?;
        Ok(Expr::Set(items))
    }
}

fn check_target(target: &Expr, line: u32) -> Result<(), SyntaxError> {
    match target {
        Expr::Name(_) | Expr::Attribute(..) | Expr::Subscript(..) => Ok(()),
        Expr::Tuple(items) | Expr::List(items) => {
            let starred = items
                .iter()
                .filter(|item| matches!(item, Expr::Starred(_)))
                .count();
            if starred > 1 {
                return Err(SyntaxError::new(
                    "multiple starred expressions in assignment",
                    line,
                ));
            }
            items.iter().try_for_each(|item| match item {
                Expr::Starred(inner) => check_target(inner, line),
                other => check_target(other, line),
            })
        }
        Expr::Starred(_) => Err(SyntaxError::new(
            "starred assignment target must be in a list or tuple",
            line,
        )),
        _ => Err(SyntaxError::new("cannot assign to expression", line)),
    }
}

/// Split an f-string body into literal text and `{expr[!r][:spec]}` fields.
fn parse_fstring(body: &str, line: u32) -> Result<Vec<FStringPart>, SyntaxError> {
    let chars: Vec<char> = body.chars().collect();
    let mut parts = Vec::new();
    let mut literal = String::new();
    let mut i = 0;

    while i < chars.len() {
        let ch = chars[i];
        match ch {
            '{' if chars.get(i + 1) == Some(&'{') => {
                literal.push('{');
                i += 2;
            }
            '}' if chars.get(i + 1) == Some(&'}') => {
                literal.push('}');
                i += 2;
            }
            '{' => {
                if !literal.is_empty() {
                    parts.push(FStringPart::Literal(unescape(&std::mem::take(&mut literal))));
                }
                let start = i + 1;
                let mut depth = 0i32;
                let mut quote: Option<char> = None;
                let mut end = None;
                let mut conversion_at = None;
                let mut spec_at = None;
                let mut j = start;
                while j < chars.len() {
                    let c = chars[j];
                    if let Some(q) = quote {
                        if c == q {
                            quote = None;
                        }
                    } else {
                        match c {
                            '\'' | '"' => quote = Some(c),
                            '(' | '[' | '{' => depth += 1,
                            ')' | ']' => depth -= 1,
                            '}' if depth > 0 => depth -= 1,
                            '}' => {
                                end = Some(j);
                                break;
                            }
                            '!' if depth == 0
                                && spec_at.is_none()
                                && chars.get(j + 1) != Some(&'=') =>
                            {
                                conversion_at = Some(j)
                            }
                            ':' if depth == 0 && spec_at.is_none() => spec_at = Some(j),
                            _ => {}
                        }
                    }
                    j += 1;
                }
                let end = end.ok_or_else(|| SyntaxError::new("f-string: expecting '}'", line))?;
                let expr_end = conversion_at.or(spec_at).unwrap_or(end);
                let source: String = chars[start..expr_end].iter().collect();
                let expr = parse_expression(&source)
                    .map_err(|e| SyntaxError::new(format!("f-string: {}", e.message), line))?;
                let repr = conversion_at.is_some_and(|at| chars.get(at + 1) == Some(&'r'));
                let spec = spec_at.map(|at| chars[at + 1..end].iter().collect::<String>());
                parts.push(FStringPart::Field { expr, repr, spec });
                i = end + 1;
            }
            '}' => return Err(SyntaxError::new("f-string: single '}' is not allowed", line)),
            _ => {
                literal.push(ch);
                i += 1;
            }
        }
    }
    if !literal.is_empty() {
        parts.push(FStringPart::Literal(unescape(&literal)));
    }
    Ok(parts)
}

fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('\\') => out.push('\\'),
            Some('\'') => out.push('\''),
            Some('"') => out.push('"'),
            Some('\n') => {}
            Some(kind @ ('x' | 'u' | 'U')) => {
                let rest: Vec<char> = chars.clone().collect();
                match hex_escape(kind, &rest) {
                    Some((decoded, width)) => {
                        out.push(decoded);
                        chars.nth(width - 1);
                    }
                    None => {
                        out.push('\\');
                        out.push(kind);
                    }
                }
            }
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}
