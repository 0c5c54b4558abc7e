//! Recursive-descent parser producing [`Program`].
//!
//! Parsing never evaluates anything; it is safe to call concurrently with
//! running scripts and holds no global state.

use std::fmt;
use std::rc::Rc;

use super::ast::*;
use super::lexer::{tokenize, FStringPiece, LexerError, Token, TokenKind};

#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub message: String,
    pub line: usize,
    pub col: usize,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (line {}, column {})", self.message, self.line, self.col)
    }
}

impl std::error::Error for ParseError {}

impl From<LexerError> for ParseError {
    fn from(err: LexerError) -> Self {
        Self {
            message: err.message,
            line: err.line,
            col: err.col,
        }
    }
}

pub fn parse_program(source: &str) -> Result<Program, ParseError> {
    let tokens = tokenize(source)?;
    let mut parser = Parser::new(tokens);
    parser.parse_program()
}

/// Parse a standalone expression (f-string fields).
fn parse_expression_at(source: &str, line: usize, col: usize) -> Result<Expr, ParseError> {
    let relocate = |mut err: ParseError| {
        err.line = line;
        err.col = col;
        err.message = format!("f-string: {}", err.message);
        err
    };
    let tokens = tokenize(source.trim()).map_err(|e| relocate(e.into()))?;
    let mut parser = Parser::new(tokens);
    let expr = parser.parse_expr().map_err(relocate)?;
    parser.consume_newlines();
    if !parser.at_end() {
        let token = parser.current().clone();
        return Err(relocate(parser.unexpected(&token)));
    }
    Ok(expr)
}

const MAX_EXPR_DEPTH: usize = 200;

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            depth: 0,
        }
    }

    /// Run `f` one nesting level deeper, refusing pathological nesting.
    fn nested<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, ParseError>,
    ) -> Result<T, ParseError> {
        if self.depth >= MAX_EXPR_DEPTH {
            let token = self.current().clone();
            return Err(self.error("expression is nested too deeply", &token));
        }
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }

    fn parse_program(&mut self) -> Result<Program, ParseError> {
        let mut body = Vec::new();
        self.consume_newlines();
        while !self.at_end() {
            if self.check(&TokenKind::Indent) {
                let token = self.current().clone();
                return Err(self.error("unexpected indent", &token));
            }
            body.extend(self.parse_statement()?);
            self.consume_newlines();
        }
        Ok(Program { body })
    }

    // =========================================================================
    // Statements
    // =========================================================================

    /// One logical line may hold several `;`-separated simple statements.
    fn parse_statement(&mut self) -> Result<Vec<Stmt>, ParseError> {
        let line = self.current().line;
        let compound = match self.current().kind {
            TokenKind::If => Some(self.parse_if()?),
            TokenKind::While => Some(self.parse_while()?),
            TokenKind::For => Some(self.parse_for()?),
            TokenKind::Def => Some(self.parse_def()?),
            TokenKind::Try => Some(self.parse_try()?),
            _ => None,
        };
        if let Some(kind) = compound {
            return Ok(vec![Stmt { kind, line }]);
        }
        self.parse_simple_line()
    }

    fn parse_simple_line(&mut self) -> Result<Vec<Stmt>, ParseError> {
        let mut stmts = Vec::new();
        loop {
            let line = self.current().line;
            let kind = self.parse_simple()?;
            stmts.push(Stmt { kind, line });
            if !self.matches(&TokenKind::Semicolon) {
                break;
            }
            if self.check(&TokenKind::Newline) || self.at_end() {
                break;
            }
        }
        if !self.matches(&TokenKind::Newline) && !self.at_end() {
            let token = self.current().clone();
            return Err(self.unexpected(&token));
        }
        Ok(stmts)
    }

    fn parse_simple(&mut self) -> Result<StmtKind, ParseError> {
        let token = self.current().clone();
        match token.kind {
            TokenKind::Pass => {
                self.advance();
                Ok(StmtKind::Pass)
            }
            TokenKind::Break => {
                self.advance();
                Ok(StmtKind::Break)
            }
            TokenKind::Continue => {
                self.advance();
                Ok(StmtKind::Continue)
            }
            TokenKind::Return => {
                self.advance();
                if self.ends_simple() {
                    Ok(StmtKind::Return(None))
                } else {
                    Ok(StmtKind::Return(Some(self.parse_expr_list()?)))
                }
            }
            TokenKind::Import => {
                self.advance();
                self.parse_import()
            }
            TokenKind::From => {
                self.advance();
                self.parse_from_import()
            }
            TokenKind::Assert => {
                self.advance();
                let test = self.parse_expr()?;
                let message = if self.matches(&TokenKind::Comma) {
                    Some(self.parse_expr()?)
                } else {
                    None
                };
                Ok(StmtKind::Assert { test, message })
            }
            TokenKind::Indent => Err(self.error("unexpected indent", &token)),
            TokenKind::Elif | TokenKind::Else | TokenKind::Except => Err(self.unexpected(&token)),
            _ => self.parse_expr_statement(),
        }
    }

    fn ends_simple(&self) -> bool {
        matches!(
            self.current().kind,
            TokenKind::Newline | TokenKind::Semicolon | TokenKind::Eof
        )
    }

    fn parse_expr_statement(&mut self) -> Result<StmtKind, ParseError> {
        let first_token = self.current().clone();
        let first = self.parse_expr_list()?;

        if let Some(op) = self.augmented_op() {
            let op_token = self.current().clone();
            self.advance();
            let target = self.to_target(first, &first_token)?;
            if matches!(target, Target::Unpack(_)) {
                return Err(self.error(
                    "illegal expression for augmented assignment",
                    &op_token,
                ));
            }
            let value = self.parse_expr_list()?;
            return Ok(StmtKind::AugAssign { target, op, value });
        }

        if !self.check(&TokenKind::Assign) {
            return Ok(StmtKind::Expr(first));
        }

        let mut targets = vec![self.to_target(first, &first_token)?];
        let mut value;
        loop {
            self.advance(); // '='
            let value_token = self.current().clone();
            value = self.parse_expr_list()?;
            if self.check(&TokenKind::Assign) {
                targets.push(self.to_target(value, &value_token)?);
                continue;
            }
            break;
        }
        Ok(StmtKind::Assign { targets, value })
    }

    fn augmented_op(&self) -> Option<BinOp> {
        match self.current().kind {
            TokenKind::PlusAssign => Some(BinOp::Add),
            TokenKind::MinusAssign => Some(BinOp::Sub),
            TokenKind::StarAssign => Some(BinOp::Mul),
            TokenKind::SlashAssign => Some(BinOp::Div),
            TokenKind::DoubleSlashAssign => Some(BinOp::FloorDiv),
            TokenKind::PercentAssign => Some(BinOp::Mod),
            _ => None,
        }
    }

    fn to_target(&self, expr: Expr, token: &Token) -> Result<Target, ParseError> {
        match expr {
            Expr::Name(name) => Ok(Target::Name(name)),
            Expr::Index { object, index } => Ok(Target::Index {
                object: *object,
                index: *index,
            }),
            Expr::Tuple(items) | Expr::List(items) => {
                let targets = items
                    .into_iter()
                    .map(|item| self.to_target(item, token))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Target::Unpack(targets))
            }
            Expr::Attribute { .. } => Err(self.error("cannot assign to attribute", token)),
            Expr::Call { .. } => Err(self.error("cannot assign to function call", token)),
            Expr::Slice { .. } => Err(self.error("cannot assign to slice", token)),
            _ => Err(self.error("cannot assign to expression", token)),
        }
    }

    fn parse_import(&mut self) -> Result<StmtKind, ParseError> {
        let mut names = Vec::new();
        loop {
            let path = self.parse_dotted_name()?;
            let alias = if self.matches(&TokenKind::As) {
                Some(self.expect_ident("expected name after 'as'")?)
            } else {
                None
            };
            names.push(ImportName { path, alias });
            if !self.matches(&TokenKind::Comma) {
                break;
            }
        }
        Ok(StmtKind::Import(names))
    }

    fn parse_from_import(&mut self) -> Result<StmtKind, ParseError> {
        let module = self.parse_dotted_name()?;
        self.expect(&TokenKind::Import, "expected 'import'")?;
        if self.check(&TokenKind::Star) {
            let token = self.current().clone();
            return Err(self.error("wildcard import is not supported", &token));
        }
        let parenthesized = self.matches(&TokenKind::LParen);
        let mut names = Vec::new();
        loop {
            let name = self.expect_ident("expected name to import")?;
            let alias = if self.matches(&TokenKind::As) {
                Some(self.expect_ident("expected name after 'as'")?)
            } else {
                None
            };
            names.push((name, alias));
            if !self.matches(&TokenKind::Comma) {
                break;
            }
            if parenthesized && self.check(&TokenKind::RParen) {
                break;
            }
        }
        if parenthesized {
            self.expect(&TokenKind::RParen, "expected ')'")?;
        }
        Ok(StmtKind::FromImport { module, names })
    }

    fn parse_dotted_name(&mut self) -> Result<String, ParseError> {
        let mut path = self.expect_ident("expected module name")?;
        while self.matches(&TokenKind::Dot) {
            path.push('.');
            path.push_str(&self.expect_ident("expected name after '.'")?);
        }
        Ok(path)
    }

    fn parse_if(&mut self) -> Result<StmtKind, ParseError> {
        self.advance(); // 'if'
        let mut branches = Vec::new();
        let cond = self.parse_expr()?;
        let body = self.parse_block()?;
        branches.push((cond, body));

        let mut orelse = Vec::new();
        loop {
            if self.matches(&TokenKind::Elif) {
                let cond = self.parse_expr()?;
                let body = self.parse_block()?;
                branches.push((cond, body));
                continue;
            }
            if self.matches(&TokenKind::Else) {
                orelse = self.parse_block()?;
            }
            break;
        }
        Ok(StmtKind::If { branches, orelse })
    }

    fn parse_while(&mut self) -> Result<StmtKind, ParseError> {
        self.advance(); // 'while'
        let cond = self.parse_expr()?;
        let body = self.parse_block()?;
        Ok(StmtKind::While { cond, body })
    }

    fn parse_for(&mut self) -> Result<StmtKind, ParseError> {
        self.advance(); // 'for'
        let target = self.parse_target_list()?;
        self.expect(&TokenKind::In, "expected 'in'")?;
        let iter = self.parse_expr_list()?;
        let body = self.parse_block()?;
        Ok(StmtKind::For { target, iter, body })
    }

    fn parse_def(&mut self) -> Result<StmtKind, ParseError> {
        let line = self.current().line;
        self.advance(); // 'def'
        let name = self.expect_ident("expected function name")?;
        self.expect(&TokenKind::LParen, "expected '(' after function name")?;
        let params = self.parse_params(&TokenKind::RParen)?;
        self.expect(&TokenKind::RParen, "expected ')'")?;
        let body = self.parse_block()?;
        Ok(StmtKind::Def(Rc::new(FunctionDef {
            name,
            params,
            body: FunctionBody::Block(body),
            line,
        })))
    }

    fn parse_params(&mut self, terminator: &TokenKind) -> Result<Vec<Param>, ParseError> {
        let mut params: Vec<Param> = Vec::new();
        while !self.check(terminator) {
            let token = self.current().clone();
            let name = match &token.kind {
                TokenKind::Ident(name) => name.clone(),
                TokenKind::Star | TokenKind::DoubleStar => {
                    return Err(self.error("variadic parameters are not supported", &token));
                }
                _ => {
                    let expected = if *terminator == TokenKind::RParen {
                        "expected parameter name or ')'"
                    } else {
                        "expected parameter name or ':'"
                    };
                    return Err(self.error(
                        &format!("{}, found {}", expected, token.kind.describe()),
                        &token,
                    ));
                }
            };
            self.advance();
            if params.iter().any(|p| p.name == name) {
                return Err(self.error(
                    &format!("duplicate argument '{}' in function definition", name),
                    &token,
                ));
            }
            let default = if self.matches(&TokenKind::Assign) {
                Some(self.parse_expr()?)
            } else {
                if params.iter().any(|p| p.default.is_some()) {
                    return Err(self.error("non-default argument follows default argument", &token));
                }
                None
            };
            params.push(Param { name, default });
            if !self.matches(&TokenKind::Comma) {
                break;
            }
        }
        Ok(params)
    }

    fn parse_try(&mut self) -> Result<StmtKind, ParseError> {
        let try_token = self.current().clone();
        self.advance(); // 'try'
        let body = self.parse_block()?;
        let mut handlers = Vec::new();
        while self.matches(&TokenKind::Except) {
            let kind = match &self.current().kind {
                TokenKind::Ident(name) => {
                    let name = name.clone();
                    self.advance();
                    Some(name)
                }
                _ => None,
            };
            let binding = if kind.is_some() && self.matches(&TokenKind::As) {
                Some(self.expect_ident("expected name after 'as'")?)
            } else {
                None
            };
            let body = self.parse_block()?;
            handlers.push(Handler {
                kind,
                binding,
                body,
            });
        }
        if handlers.is_empty() {
            return Err(self.error("expected 'except' block", &try_token));
        }
        Ok(StmtKind::Try { body, handlers })
    }

    /// `':' simple_line` or `':' NEWLINE INDENT stmt+ DEDENT`.
    fn parse_block(&mut self) -> Result<Vec<Stmt>, ParseError> {
        self.expect(&TokenKind::Colon, "expected ':'")?;
        if !self.check(&TokenKind::Newline) {
            return self.parse_simple_line();
        }
        self.advance();
        if !self.check(&TokenKind::Indent) {
            let token = self.current().clone();
            return Err(self.error("expected an indented block", &token));
        }
        self.advance();
        let mut body = Vec::new();
        while !self.check(&TokenKind::Dedent) && !self.at_end() {
            body.extend(self.parse_statement()?);
        }
        self.matches(&TokenKind::Dedent);
        Ok(body)
    }

    /// Loop targets: names, optionally comma-separated or bracketed.
    fn parse_target_list(&mut self) -> Result<Target, ParseError> {
        let first = self.parse_target_atom()?;
        if !self.check(&TokenKind::Comma) {
            return Ok(first);
        }
        let mut targets = vec![first];
        while self.matches(&TokenKind::Comma) {
            if self.check(&TokenKind::In) {
                break;
            }
            targets.push(self.parse_target_atom()?);
        }
        Ok(Target::Unpack(targets))
    }

    fn parse_target_atom(&mut self) -> Result<Target, ParseError> {
        let token = self.current().clone();
        match &token.kind {
            TokenKind::Ident(name) => {
                self.advance();
                Ok(Target::Name(name.clone()))
            }
            TokenKind::LParen | TokenKind::LBracket => {
                let close = if token.kind == TokenKind::LParen {
                    TokenKind::RParen
                } else {
                    TokenKind::RBracket
                };
                self.advance();
                let mut targets = Vec::new();
                while !self.check(&close) {
                    targets.push(self.parse_target_atom()?);
                    if !self.matches(&TokenKind::Comma) {
                        break;
                    }
                }
                self.expect(&close, "expected closing bracket in target list")?;
                Ok(Target::Unpack(targets))
            }
            _ => Err(self.error(
                &format!("expected loop variable, found {}", token.kind.describe()),
                &token,
            )),
        }
    }

    // =========================================================================
    // Expressions
    // =========================================================================

    /// Comma-separated expressions; more than one (or a trailing comma) forms a tuple.
    fn parse_expr_list(&mut self) -> Result<Expr, ParseError> {
        let first = self.parse_expr()?;
        if !self.check(&TokenKind::Comma) {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.matches(&TokenKind::Comma) {
            if self.ends_expr_list() {
                break;
            }
            items.push(self.parse_expr()?);
        }
        Ok(Expr::Tuple(items))
    }

    fn ends_expr_list(&self) -> bool {
        matches!(
            self.current().kind,
            TokenKind::Newline
                | TokenKind::Semicolon
                | TokenKind::Eof
                | TokenKind::Assign
                | TokenKind::Colon
                | TokenKind::RParen
        ) || self.augmented_op().is_some()
    }

    fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        self.nested(Self::parse_conditional)
    }

    fn parse_conditional(&mut self) -> Result<Expr, ParseError> {
        if self.check(&TokenKind::Lambda) {
            return self.parse_lambda();
        }
        let body = self.parse_or()?;
        if !self.matches(&TokenKind::If) {
            return Ok(body);
        }
        let test = self.parse_or()?;
        self.expect(&TokenKind::Else, "expected 'else' in conditional expression")?;
        let orelse = self.parse_expr()?;
        Ok(Expr::IfElse {
            test: Box::new(test),
            body: Box::new(body),
            orelse: Box::new(orelse),
        })
    }

    fn parse_lambda(&mut self) -> Result<Expr, ParseError> {
        let line = self.current().line;
        self.advance(); // 'lambda'
        let params = self.parse_params(&TokenKind::Colon)?;
        self.expect(&TokenKind::Colon, "expected ':' in lambda")?;
        let body = self.parse_expr()?;
        Ok(Expr::Lambda(Rc::new(FunctionDef {
            name: "<lambda>".to_string(),
            params,
            body: FunctionBody::Expr(body),
            line,
        })))
    }

    fn parse_or(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_and()?;
        while self.matches(&TokenKind::Or) {
            let right = self.parse_and()?;
            expr = Expr::Or(Box::new(expr), Box::new(right));
        }
        Ok(expr)
    }

    fn parse_and(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_not()?;
        while self.matches(&TokenKind::And) {
            let right = self.parse_not()?;
            expr = Expr::And(Box::new(expr), Box::new(right));
        }
        Ok(expr)
    }

    fn parse_not(&mut self) -> Result<Expr, ParseError> {
        if self.matches(&TokenKind::Not) {
            let operand = self.nested(Self::parse_not)?;
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            });
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, ParseError> {
        let left = self.parse_arith()?;
        let mut rest = Vec::new();
        loop {
            let op = match self.current().kind {
                TokenKind::EqualEqual => CmpOp::Eq,
                TokenKind::BangEqual => CmpOp::NotEq,
                TokenKind::Less => CmpOp::Lt,
                TokenKind::LessEqual => CmpOp::LtE,
                TokenKind::Greater => CmpOp::Gt,
                TokenKind::GreaterEqual => CmpOp::GtE,
                TokenKind::In => CmpOp::In,
                TokenKind::Not if self.peek_kind(1) == Some(&TokenKind::In) => {
                    self.advance();
                    CmpOp::NotIn
                }
                TokenKind::Is if self.peek_kind(1) == Some(&TokenKind::Not) => {
                    self.advance();
                    CmpOp::IsNot
                }
                TokenKind::Is => CmpOp::Is,
                _ => break,
            };
            self.advance();
            rest.push((op, self.parse_arith()?));
        }
        if rest.is_empty() {
            Ok(left)
        } else {
            Ok(Expr::Compare {
                left: Box::new(left),
                rest,
            })
        }
    }

    fn parse_arith(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_term()?;
        loop {
            let op = match self.current().kind {
                TokenKind::Plus => BinOp::Add,
                TokenKind::Minus => BinOp::Sub,
                _ => break,
            };
            self.advance();
            let right = self.parse_term()?;
            expr = Expr::Binary {
                op,
                left: Box::new(expr),
                right: Box::new(right),
            };
        }
        Ok(expr)
    }

    fn parse_term(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_factor()?;
        loop {
            let op = match self.current().kind {
                TokenKind::Star => BinOp::Mul,
                TokenKind::Slash => BinOp::Div,
                TokenKind::DoubleSlash => BinOp::FloorDiv,
                TokenKind::Percent => BinOp::Mod,
                _ => break,
            };
            self.advance();
            let right = self.parse_factor()?;
            expr = Expr::Binary {
                op,
                left: Box::new(expr),
                right: Box::new(right),
            };
        }
        Ok(expr)
    }

    fn parse_factor(&mut self) -> Result<Expr, ParseError> {
        let op = match self.current().kind {
            TokenKind::Minus => Some(UnaryOp::Neg),
            TokenKind::Plus => Some(UnaryOp::Pos),
            _ => None,
        };
        if let Some(op) = op {
            if op == UnaryOp::Neg
                && self.peek_kind(1) == Some(&TokenKind::Int(i64::MIN))
                && self.peek_kind(2) != Some(&TokenKind::DoubleStar)
            {
                self.advance();
                self.advance();
                return Ok(Expr::Int(i64::MIN));
            }
            self.advance();
            let operand = self.nested(Self::parse_factor)?;
            return Ok(Expr::Unary {
                op,
                operand: Box::new(operand),
            });
        }
        self.parse_power()
    }

    fn parse_power(&mut self) -> Result<Expr, ParseError> {
        let base = self.parse_postfix()?;
        if self.matches(&TokenKind::DoubleStar) {
            // right-associative, binds tighter than unary minus on the left
            let exponent = self.parse_factor()?;
            return Ok(Expr::Binary {
                op: BinOp::Pow,
                left: Box::new(base),
                right: Box::new(exponent),
            });
        }
        Ok(base)
    }

    fn parse_postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_atom()?;
        loop {
            if self.matches(&TokenKind::LParen) {
                expr = self.finish_call(expr)?;
            } else if self.matches(&TokenKind::LBracket) {
                expr = self.finish_subscript(expr)?;
            } else if self.matches(&TokenKind::Dot) {
                let name = self.expect_ident("expected attribute name after '.'")?;
                expr = Expr::Attribute {
                    object: Box::new(expr),
                    name,
                };
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn finish_call(&mut self, func: Expr) -> Result<Expr, ParseError> {
        let mut args = Vec::new();
        let mut kwargs: Vec<(String, Expr)> = Vec::new();
        while !self.check(&TokenKind::RParen) {
            let token = self.current().clone();
            if let (TokenKind::Ident(name), Some(TokenKind::Assign)) =
                (&token.kind, self.peek_kind(1))
            {
                let name = name.clone();
                self.advance();
                self.advance();
                if kwargs.iter().any(|(k, _)| *k == name) {
                    return Err(self.error(&format!("keyword argument repeated: {}", name), &token));
                }
                kwargs.push((name, self.parse_expr()?));
            } else {
                if matches!(token.kind, TokenKind::Star | TokenKind::DoubleStar) {
                    return Err(self.error("argument unpacking is not supported", &token));
                }
                if !kwargs.is_empty() {
                    return Err(self.error(
                        "positional argument follows keyword argument",
                        &token,
                    ));
                }
                args.push(self.parse_expr()?);
            }
            if !self.matches(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(&TokenKind::RParen, "expected ')' to close call")?;
        Ok(Expr::Call {
            func: Box::new(func),
            args,
            kwargs,
        })
    }

    fn finish_subscript(&mut self, object: Expr) -> Result<Expr, ParseError> {
        let start = if self.check(&TokenKind::Colon) {
            None
        } else {
            Some(Box::new(self.parse_expr_list()?))
        };
        if self.matches(&TokenKind::Colon) {
            let stop = if self.check(&TokenKind::RBracket) {
                None
            } else {
                Some(Box::new(self.parse_expr()?))
            };
            self.expect(&TokenKind::RBracket, "expected ']'")?;
            return Ok(Expr::Slice {
                object: Box::new(object),
                start,
                stop,
            });
        }
        self.expect(&TokenKind::RBracket, "expected ']'")?;
        match start {
            Some(index) => Ok(Expr::Index {
                object: Box::new(object),
                index,
            }),
            None => {
                let token = self.previous().clone();
                Err(self.error("expected index expression", &token))
            }
        }
    }

    fn parse_atom(&mut self) -> Result<Expr, ParseError> {
        let token = self.current().clone();
        match token.kind {
            TokenKind::Int(i64::MIN) => Err(self.error("integer literal is too large", &token)),
            TokenKind::Int(v) => {
                self.advance();
                Ok(Expr::Int(v))
            }
            TokenKind::Float(v) => {
                self.advance();
                Ok(Expr::Float(v))
            }
            TokenKind::Str(ref s) => {
                self.advance();
                let mut text = s.clone();
                // adjacent literals concatenate
                while let TokenKind::Str(next) = &self.current().kind {
                    text.push_str(next);
                    self.advance();
                }
                Ok(Expr::Str(Rc::from(text.as_str())))
            }
            TokenKind::FStr(ref pieces) => {
                self.advance();
                self.build_fstring(pieces)
            }
            TokenKind::True => {
                self.advance();
                Ok(Expr::Bool(true))
            }
            TokenKind::False => {
                self.advance();
                Ok(Expr::Bool(false))
            }
            TokenKind::None => {
                self.advance();
                Ok(Expr::None)
            }
            TokenKind::Ident(ref name) => {
                self.advance();
                Ok(Expr::Name(name.clone()))
            }
            TokenKind::LParen => {
                self.advance();
                if self.matches(&TokenKind::RParen) {
                    return Ok(Expr::Tuple(Vec::new()));
                }
                let first = self.parse_expr()?;
                if self.matches(&TokenKind::RParen) {
                    return Ok(first);
                }
                let mut items = vec![first];
                while self.matches(&TokenKind::Comma) {
                    if self.check(&TokenKind::RParen) {
                        break;
                    }
                    items.push(self.parse_expr()?);
                }
                self.expect(&TokenKind::RParen, "expected ')'")?;
                Ok(Expr::Tuple(items))
            }
            TokenKind::LBracket => {
                self.advance();
                self.finish_list()
            }
            TokenKind::LBrace => {
                self.advance();
                self.finish_dict()
            }
            TokenKind::Indent => Err(self.error("unexpected indent", &token)),
            TokenKind::Newline | TokenKind::Eof | TokenKind::Dedent => {
                Err(self.error("invalid syntax: expression expected", &token))
            }
            _ => Err(self.unexpected(&token)),
        }
    }

    fn finish_list(&mut self) -> Result<Expr, ParseError> {
        if self.matches(&TokenKind::RBracket) {
            return Ok(Expr::List(Vec::new()));
        }
        let first = self.parse_expr()?;
        if self.matches(&TokenKind::For) {
            let target = self.parse_target_list()?;
            self.expect(&TokenKind::In, "expected 'in' in comprehension")?;
            let iter = self.parse_or()?;
            let cond = if self.matches(&TokenKind::If) {
                Some(Box::new(self.parse_or()?))
            } else {
                None
            };
            if self.check(&TokenKind::For) {
                let token = self.current().clone();
                return Err(self.error("nested comprehension clauses are not supported", &token));
            }
            self.expect(&TokenKind::RBracket, "expected ']'")?;
            return Ok(Expr::ListComp {
                element: Box::new(first),
                target: Box::new(target),
                iter: Box::new(iter),
                cond,
            });
        }
        let mut items = vec![first];
        while self.matches(&TokenKind::Comma) {
            if self.check(&TokenKind::RBracket) {
                break;
            }
            items.push(self.parse_expr()?);
        }
        self.expect(&TokenKind::RBracket, "expected ']'")?;
        Ok(Expr::List(items))
    }

    fn finish_dict(&mut self) -> Result<Expr, ParseError> {
        let mut entries = Vec::new();
        while !self.check(&TokenKind::RBrace) {
            let key = self.parse_expr()?;
            if !self.check(&TokenKind::Colon) {
                let token = self.current().clone();
                return Err(self.error("expected ':' in dict literal (sets are not supported)", &token));
            }
            self.advance();
            let value = self.parse_expr()?;
            entries.push((key, value));
            if !self.matches(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(&TokenKind::RBrace, "expected '}'")?;
        Ok(Expr::Dict(entries))
    }

    fn build_fstring(&self, pieces: &[FStringPiece]) -> Result<Expr, ParseError> {
        let mut parts = Vec::with_capacity(pieces.len());
        for piece in pieces {
            match piece {
                FStringPiece::Literal(text) => parts.push(FStringPart::Literal(text.clone())),
                FStringPiece::Field {
                    source,
                    spec,
                    line,
                    col,
                } => {
                    let expr = parse_expression_at(source, *line, *col)?;
                    parts.push(FStringPart::Field {
                        expr,
                        spec: spec.clone(),
                    });
                }
            }
        }
        Ok(Expr::FString(parts))
    }

    // =========================================================================
    // Token helpers
    // =========================================================================

    fn current(&self) -> &Token {
        let last = self.tokens.len().saturating_sub(1);
        &self.tokens[self.pos.min(last)]
    }

    fn previous(&self) -> &Token {
        &self.tokens[self.pos.saturating_sub(1)]
    }

    fn peek_kind(&self, offset: usize) -> Option<&TokenKind> {
        self.tokens.get(self.pos + offset).map(|t| &t.kind)
    }

    fn at_end(&self) -> bool {
        self.current().kind == TokenKind::Eof
    }

    fn check(&self, kind: &TokenKind) -> bool {
        self.current().kind == *kind
    }

    fn matches(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn advance(&mut self) {
        if !self.at_end() {
            self.pos += 1;
        }
    }

    fn consume_newlines(&mut self) {
        while self.matches(&TokenKind::Newline) {}
    }

    fn expect(&mut self, kind: &TokenKind, message: &str) -> Result<(), ParseError> {
        if self.matches(kind) {
            return Ok(());
        }
        let token = self.current().clone();
        Err(self.error(
            &format!("{}, found {}", message, token.kind.describe()),
            &token,
        ))
    }

    fn expect_ident(&mut self, message: &str) -> Result<String, ParseError> {
        let token = self.current().clone();
        if let TokenKind::Ident(name) = token.kind {
            self.advance();
            return Ok(name);
        }
        Err(self.error(
            &format!("{}, found {}", message, token.kind.describe()),
            &token,
        ))
    }

    fn unexpected(&self, token: &Token) -> ParseError {
        self.error(
            &format!("invalid syntax: unexpected {}", token.kind.describe()),
            token,
        )
    }

    fn error(&self, message: &str, token: &Token) -> ParseError {
        ParseError {
            message: message.to_string(),
            line: token.line,
            col: token.col,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(source: &str) -> Program {
        parse_program(source).unwrap_or_else(|e| panic!("parse failed: {}", e))
    }

    #[test]
    fn test_simple_assignment() {
        let program = parse_ok("x = 1");
        assert_eq!(program.body.len(), 1);
        assert!(matches!(program.body[0].kind, StmtKind::Assign { .. }));
    }

    #[test]
    fn test_unclosed_def_reports_line() {
        let err = parse_program("def f(:").unwrap_err();
        assert_eq!(err.line, 1);
        assert!(err.message.contains("never closed"), "{}", err.message);

        let err = parse_program("def f(:)\n    pass").unwrap_err();
        assert_eq!(err.line, 1);
        assert!(err.message.contains("parameter name"), "{}", err.message);
    }

    #[test]
    fn test_error_line_is_one_indexed() {
        let err = parse_program("a = 1\nb = 2\nc = = 3\n").unwrap_err();
        assert_eq!(err.line, 3);
    }

    #[test]
    fn test_missing_indented_block() {
        let err = parse_program("if x:\ny = 1\n").unwrap_err();
        assert_eq!(err.line, 2);
        assert!(err.message.contains("indented block"));
    }

    #[test]
    fn test_compound_statements() {
        let source = "\
def scale(rows, factor=2):
    out = []
    for i, row in enumerate(rows):
        if row['v'] > 0:
            out.append(row['v'] * factor)
        elif row['v'] == 0:
            continue
        else:
            break
    return out

try:
    total = sum(scale(input_data))
except ZeroDivisionError as e:
    total = 0
";
        let program = parse_ok(source);
        assert_eq!(program.body.len(), 2);
        match &program.body[0].kind {
            StmtKind::Def(def) => {
                assert_eq!(def.name, "scale");
                assert_eq!(def.params.len(), 2);
                assert!(def.params[1].default.is_some());
            }
            other => panic!("expected def, got {:?}", other),
        }
        assert!(matches!(program.body[1].kind, StmtKind::Try { .. }));
    }

    #[test]
    fn test_expressions() {
        parse_ok("y = [r['x'] for r in input_data if r['x'] is not None]");
        parse_ok("z = a if b else c");
        parse_ok("w = sorted(rows, key=lambda r: r['x'], reverse=True)");
        parse_ok("v = -2 ** 2");
        parse_ok("u = {'a': 1, 'b': [1, 2,]}");
        parse_ok("t = xs[1:]; s = xs[:-1]");
        parse_ok("q = not a in b and c < d <= e");
        parse_ok("a, b = b, a");
        parse_ok("print(f'{x:.2f} and {y}')");
    }

    #[test]
    fn test_imports() {
        let program = parse_ok("import numpy as np, scipy.stats\nfrom pandas import column as col");
        match &program.body[0].kind {
            StmtKind::Import(names) => {
                assert_eq!(names[0].path, "numpy");
                assert_eq!(names[0].alias.as_deref(), Some("np"));
                assert_eq!(names[1].path, "scipy.stats");
            }
            other => panic!("expected import, got {:?}", other),
        }
        assert!(parse_program("from os import *").is_err());
    }

    #[test]
    fn test_invalid_targets() {
        assert!(parse_program("f() = 1").is_err());
        assert!(parse_program("a.b = 1").is_err());
        assert!(parse_program("1 = x").is_err());
        assert!(parse_program("a, b += 1").is_err());
    }

    #[test]
    fn test_param_rules() {
        assert!(parse_program("def f(a=1, b):\n    pass").is_err());
        assert!(parse_program("def f(a, a):\n    pass").is_err());
        assert!(parse_program("def f(*args):\n    pass").is_err());
    }

    #[test]
    fn test_fstring_field_errors_are_relocated() {
        let err = parse_program("x = 1\nprint(f'{1 +}')").unwrap_err();
        assert_eq!(err.line, 2);
        assert!(err.message.starts_with("f-string"));
    }

    #[test]
    fn test_pathological_nesting_is_rejected() {
        let source = format!("x = {}1", "-".repeat(5000));
        let err = parse_program(&source).unwrap_err();
        assert!(err.message.contains("nested too deeply"));

        let source = format!("x = {}1{}", "(".repeat(500), ")".repeat(500));
        assert!(parse_program(&source).is_err());
    }

    #[test]
    fn test_single_line_blocks() {
        let program = parse_ok("if x: y = 1\nwhile False: pass");
        assert_eq!(program.body.len(), 2);
    }
}
