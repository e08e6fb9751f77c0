use crate::ast::*;
use crate::lexer::Token;

pub struct Parser {
    tokens: Vec<(Token, Span)>,
    pos: usize,
    eof: Span,
}

#[derive(Debug, thiserror::Error)]
#[error("Parse error at token {position}: {message}")]
pub struct ParseError {
    pub code: &'static str,
    pub position: usize,
    pub span: Span,
    pub message: String,
}

type Result<T> = std::result::Result<T, ParseError>;

/// Binary operator classes in ascending precedence.
enum Infix {
    Logical(LogicalOp),
    Binary(BinaryOp),
}

fn infix(token: &Token) -> Option<(u8, Infix)> {
    let entry = match token {
        Token::OrOr => (1, Infix::Logical(LogicalOp::Or)),
        Token::AndAnd => (2, Infix::Logical(LogicalOp::And)),
        Token::EqEq => (3, Infix::Binary(BinaryOp::Equals)),
        Token::NotEq => (3, Infix::Binary(BinaryOp::NotEquals)),
        Token::EqEqEq => (3, Infix::Binary(BinaryOp::StrictEquals)),
        Token::NotEqEq => (3, Infix::Binary(BinaryOp::StrictNotEquals)),
        Token::Less => (4, Infix::Binary(BinaryOp::LessThan)),
        Token::Greater => (4, Infix::Binary(BinaryOp::GreaterThan)),
        Token::LessEq => (4, Infix::Binary(BinaryOp::LessOrEqual)),
        Token::GreaterEq => (4, Infix::Binary(BinaryOp::GreaterOrEqual)),
        Token::Plus => (5, Infix::Binary(BinaryOp::Add)),
        Token::Minus => (5, Infix::Binary(BinaryOp::Subtract)),
        Token::Star => (6, Infix::Binary(BinaryOp::Multiply)),
        Token::Slash => (6, Infix::Binary(BinaryOp::Divide)),
        Token::Percent => (6, Infix::Binary(BinaryOp::Remainder)),
        _ => return None,
    };
    Some(entry)
}

fn compound_assignment(token: &Token) -> Option<Option<BinaryOp>> {
    match token {
        Token::Assign => Some(None),
        Token::PlusAssign => Some(Some(BinaryOp::Add)),
        Token::MinusAssign => Some(Some(BinaryOp::Subtract)),
        Token::StarAssign => Some(Some(BinaryOp::Multiply)),
        Token::SlashAssign => Some(Some(BinaryOp::Divide)),
        Token::PercentAssign => Some(Some(BinaryOp::Remainder)),
        _ => None,
    }
}

impl Parser {
    pub fn new(tokens: Vec<(Token, Span)>) -> Self {
        let end = tokens.last().map(|(_, s)| s.end).unwrap_or(0);
        Parser { tokens, pos: 0, eof: Span::new(end, end) }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn peek_span(&self) -> Span {
        self.tokens.get(self.pos).map(|(_, s)| *s).unwrap_or(self.eof)
    }

    fn prev_span(&self) -> Span {
        self.pos
            .checked_sub(1)
            .and_then(|i| self.tokens.get(i))
            .map(|(_, s)| *s)
            .unwrap_or(Span::UNKNOWN)
    }

    fn advance(&mut self) -> Option<&Token> {
        let tok = self.tokens.get(self.pos).map(|(t, _)| t);
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: &Token) -> Result<Span> {
        match self.peek() {
            Some(tok) if tok == expected => {
                let span = self.peek_span();
                self.advance();
                Ok(span)
            }
            Some(tok) => Err(self.error("BLK-P001", format!("expected {:?}, got {:?}", expected, tok))),
            None => Err(self.error("BLK-P002", format!("expected {:?}, got end of input", expected))),
        }
    }

    fn expect_ident(&mut self) -> Result<String> {
        match self.peek().cloned() {
            Some(Token::Ident(name)) => {
                self.advance();
                Ok(name)
            }
            Some(tok) => Err(self.error("BLK-P001", format!("expected identifier, got {:?}", tok))),
            None => Err(self.error("BLK-P002", "expected identifier, got end of input".into())),
        }
    }

    fn error(&self, code: &'static str, message: String) -> ParseError {
        ParseError {
            code,
            position: self.pos,
            span: self.peek_span(),
            message,
        }
    }

    fn unexpected(&self, what: &str) -> ParseError {
        match self.peek() {
            Some(tok) => self.error("BLK-P001", format!("expected {what}, got {:?}", tok)),
            None => self.error("BLK-P002", format!("expected {what}, got end of input")),
        }
    }

    /// Statements end in `;`; it may be left out right before `}` or at the end.
    fn end_statement(&mut self) -> Result<()> {
        match self.peek() {
            Some(Token::Semi) => {
                self.advance();
                Ok(())
            }
            None | Some(Token::RBrace) => Ok(()),
            Some(_) => Err(self.unexpected("';'")),
        }
    }

    // ---- Statements ----

    pub fn parse_program(&mut self) -> Result<Program> {
        let mut body = Vec::new();
        while self.peek().is_some() {
            body.push(self.parse_stmt()?);
        }
        Ok(Program { body })
    }

    fn parse_stmt(&mut self) -> Result<Stmt> {
        let start = self.peek_span();
        match self.peek() {
            Some(Token::Var | Token::Let | Token::Const) => {
                let stmt = self.parse_var()?;
                self.end_statement()?;
                Ok(stmt)
            }
            Some(Token::Function) => self.parse_function().map(Stmt::Function),
            Some(Token::Return) => {
                self.advance();
                let value = match self.peek() {
                    None | Some(Token::Semi) | Some(Token::RBrace) => None,
                    Some(_) => Some(self.parse_expr()?),
                };
                self.end_statement()?;
                Ok(Stmt::Return { value, span: start.merge(self.prev_span()) })
            }
            Some(Token::If) => {
                self.advance();
                let condition = self.parse_paren_expr()?;
                let then_branch = Box::new(self.parse_stmt()?);
                let else_branch = if self.eat(&Token::Else) {
                    Some(Box::new(self.parse_stmt()?))
                } else {
                    None
                };
                Ok(Stmt::If { condition, then_branch, else_branch })
            }
            Some(Token::While) => {
                self.advance();
                let condition = self.parse_paren_expr()?;
                let body = Box::new(self.parse_stmt()?);
                Ok(Stmt::While { condition, body })
            }
            Some(Token::Do) => {
                self.advance();
                let body = Box::new(self.parse_stmt()?);
                self.expect(&Token::While)?;
                let condition = self.parse_paren_expr()?;
                self.eat(&Token::Semi);
                Ok(Stmt::DoWhile { body, condition })
            }
            Some(Token::For) => self.parse_for(),
            Some(Token::Break) => {
                self.advance();
                self.end_statement()?;
                Ok(Stmt::Break { span: start })
            }
            Some(Token::Continue) => {
                self.advance();
                self.end_statement()?;
                Ok(Stmt::Continue { span: start })
            }
            Some(Token::Throw) => {
                self.advance();
                let value = self.parse_expr()?;
                self.end_statement()?;
                Ok(Stmt::Throw { value, span: start.merge(self.prev_span()) })
            }
            Some(Token::LBrace) => self.parse_block().map(Stmt::Block),
            Some(Token::Semi) => {
                self.advance();
                Ok(Stmt::Empty)
            }
            Some(_) => {
                let expr = self.parse_expr()?;
                self.end_statement()?;
                Ok(Stmt::Expr(expr))
            }
            None => Err(self.unexpected("statement")),
        }
    }

    fn parse_block(&mut self) -> Result<Vec<Stmt>> {
        self.expect(&Token::LBrace)?;
        let mut stmts = Vec::new();
        while !matches!(self.peek(), Some(Token::RBrace) | None) {
            stmts.push(self.parse_stmt()?);
        }
        self.expect(&Token::RBrace)?;
        Ok(stmts)
    }

    /// `var a = 1, b` without the trailing `;`
    fn parse_var(&mut self) -> Result<Stmt> {
        let start = self.peek_span();
        self.advance();
        let mut declarations = Vec::new();
        loop {
            let name = self.expect_ident()?;
            let init = if self.eat(&Token::Assign) { Some(self.parse_assignment()?) } else { None };
            declarations.push(VarDecl { name, init });
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        Ok(Stmt::Var { declarations, span: start.merge(self.prev_span()) })
    }

    /// `function name(a, b) { body }`
    fn parse_function(&mut self) -> Result<FunctionDecl> {
        let start = self.expect(&Token::Function)?;
        let name = self.expect_ident()?;
        self.expect(&Token::LParen)?;
        let mut params = Vec::new();
        while !self.eat(&Token::RParen) {
            params.push(self.expect_ident()?);
            if !self.eat(&Token::Comma) {
                self.expect(&Token::RParen)?;
                break;
            }
        }
        let body = self.parse_block()?;
        Ok(FunctionDecl { name, params, body, span: start.merge(self.prev_span()) })
    }

    fn parse_for(&mut self) -> Result<Stmt> {
        self.expect(&Token::For)?;
        self.expect(&Token::LParen)?;
        let init = match self.peek() {
            Some(Token::Semi) => None,
            Some(Token::Var | Token::Let | Token::Const) => Some(Box::new(self.parse_var()?)),
            _ => Some(Box::new(Stmt::Expr(self.parse_expr()?))),
        };
        self.expect(&Token::Semi)?;
        let test = if matches!(self.peek(), Some(Token::Semi)) { None } else { Some(self.parse_expr()?) };
        self.expect(&Token::Semi)?;
        let update = if matches!(self.peek(), Some(Token::RParen)) { None } else { Some(self.parse_expr()?) };
        self.expect(&Token::RParen)?;
        let body = Box::new(self.parse_stmt()?);
        Ok(Stmt::For { init, test, update, body })
    }

    fn parse_paren_expr(&mut self) -> Result<Expr> {
        self.expect(&Token::LParen)?;
        let expr = self.parse_expr()?;
        self.expect(&Token::RParen)?;
        Ok(expr)
    }

    // ---- Expressions ----

    pub fn parse_expr(&mut self) -> Result<Expr> {
        self.parse_assignment()
    }

    fn parse_assignment(&mut self) -> Result<Expr> {
        let target = self.parse_conditional()?;
        let Some(op) = self.peek().and_then(compound_assignment) else {
            return Ok(target);
        };
        if !target.is_assignable() {
            return Err(ParseError {
                code: "BLK-P003",
                position: self.pos,
                span: target.span,
                message: "invalid assignment target".into(),
            });
        }
        self.advance();
        let value = self.parse_assignment()?;
        let span = target.span.merge(value.span);
        Ok(Spanned::new(
            ExprKind::Assign { op, target: Box::new(target), value: Box::new(value) },
            span,
        ))
    }

    fn parse_conditional(&mut self) -> Result<Expr> {
        let test = self.parse_binary(1)?;
        if !self.eat(&Token::Question) {
            return Ok(test);
        }
        let consequent = self.parse_assignment()?;
        self.expect(&Token::Colon)?;
        let alternate = self.parse_assignment()?;
        let span = test.span.merge(alternate.span);
        Ok(Spanned::new(
            ExprKind::Conditional {
                test: Box::new(test),
                consequent: Box::new(consequent),
                alternate: Box::new(alternate),
            },
            span,
        ))
    }

    /// Precedence climbing over the infix operator table.
    fn parse_binary(&mut self, min_prec: u8) -> Result<Expr> {
        let mut left = self.parse_unary()?;
        while let Some((prec, op)) = self.peek().and_then(infix) {
            if prec < min_prec {
                break;
            }
            self.advance();
            let right = self.parse_binary(prec + 1)?;
            let span = left.span.merge(right.span);
            let (left_box, right_box) = (Box::new(left), Box::new(right));
            let kind = match op {
                Infix::Logical(op) => ExprKind::Logical { op, left: left_box, right: right_box },
                Infix::Binary(op) => ExprKind::Binary { op, left: left_box, right: right_box },
            };
            left = Spanned::new(kind, span);
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        let start = self.peek_span();
        let op = match self.peek() {
            Some(Token::Bang) => UnaryOp::Not,
            Some(Token::Minus) => UnaryOp::Negate,
            Some(Token::Plus) => UnaryOp::Plus,
            Some(Token::Typeof) => UnaryOp::Typeof,
            Some(Token::PlusPlus | Token::MinusMinus) => {
                let increment = matches!(self.peek(), Some(Token::PlusPlus));
                self.advance();
                let target = self.parse_unary()?;
                return self.update(increment, true, target, start);
            }
            _ => return self.parse_postfix(),
        };
        self.advance();
        let operand = self.parse_unary()?;
        let span = start.merge(operand.span);
        Ok(Spanned::new(ExprKind::Unary { op, operand: Box::new(operand) }, span))
    }

    fn update(&self, increment: bool, prefix: bool, target: Expr, start: Span) -> Result<Expr> {
        if !target.is_assignable() {
            return Err(ParseError {
                code: "BLK-P003",
                position: self.pos,
                span: target.span,
                message: "invalid increment/decrement target".into(),
            });
        }
        let span = start.merge(target.span).merge(self.prev_span());
        Ok(Spanned::new(ExprKind::Update { increment, prefix, target: Box::new(target) }, span))
    }

    fn parse_postfix(&mut self) -> Result<Expr> {
        let expr = self.parse_call_member()?;
        match self.peek() {
            Some(Token::PlusPlus | Token::MinusMinus) => {
                let increment = matches!(self.peek(), Some(Token::PlusPlus));
                self.advance();
                let start = expr.span;
                self.update(increment, false, expr, start)
            }
            _ => Ok(expr),
        }
    }

    fn parse_call_member(&mut self) -> Result<Expr> {
        let mut expr = if matches!(self.peek(), Some(Token::New)) {
            self.parse_new()?
        } else {
            self.parse_primary()?
        };
        loop {
            match self.peek() {
                Some(Token::Dot) => {
                    self.advance();
                    let property = self.expect_ident()?;
                    let span = expr.span.merge(self.prev_span());
                    expr = Spanned::new(ExprKind::Member { object: Box::new(expr), property }, span);
                }
                Some(Token::LBracket) => {
                    self.advance();
                    let index = self.parse_expr()?;
                    self.expect(&Token::RBracket)?;
                    let span = expr.span.merge(self.prev_span());
                    expr = Spanned::new(ExprKind::Index { object: Box::new(expr), index: Box::new(index) }, span);
                }
                Some(Token::LParen) => {
                    let args = self.parse_args()?;
                    let span = expr.span.merge(self.prev_span());
                    expr = Spanned::new(ExprKind::Call { callee: Box::new(expr), args }, span);
                }
                _ => return Ok(expr),
            }
        }
    }

    /// `new Callee.path(args)`; the argument list is optional.
    fn parse_new(&mut self) -> Result<Expr> {
        let start = self.expect(&Token::New)?;
        let mut callee = self.parse_primary()?;
        while self.eat(&Token::Dot) {
            let property = self.expect_ident()?;
            let span = callee.span.merge(self.prev_span());
            callee = Spanned::new(ExprKind::Member { object: Box::new(callee), property }, span);
        }
        let args = if matches!(self.peek(), Some(Token::LParen)) { self.parse_args()? } else { Vec::new() };
        let span = start.merge(self.prev_span());
        Ok(Spanned::new(ExprKind::New { callee: Box::new(callee), args }, span))
    }

    fn parse_args(&mut self) -> Result<Vec<Expr>> {
        self.expect(&Token::LParen)?;
        let mut args = Vec::new();
        while !self.eat(&Token::RParen) {
            args.push(self.parse_assignment()?);
            if !self.eat(&Token::Comma) {
                self.expect(&Token::RParen)?;
                break;
            }
        }
        Ok(args)
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        let span = self.peek_span();
        let kind = match self.peek().cloned() {
            Some(Token::Number(n)) => ExprKind::Number(n),
            Some(Token::Str(s)) => ExprKind::Text(s),
            Some(Token::True) => ExprKind::Bool(true),
            Some(Token::False) => ExprKind::Bool(false),
            Some(Token::Null) => ExprKind::Null,
            Some(Token::Ident(name)) => ExprKind::Ident(name),
            Some(Token::LParen) => {
                self.advance();
                let inner = self.parse_expr()?;
                self.expect(&Token::RParen)?;
                return Ok(Spanned::new(inner.node, span.merge(self.prev_span())));
            }
            Some(Token::LBracket) => return self.parse_array(),
            Some(Token::LBrace) => return self.parse_object(),
            Some(Token::Function) => {
                return Err(self.error("BLK-P004", "function expressions are not supported".into()));
            }
            _ => return Err(self.unexpected("expression")),
        };
        self.advance();
        Ok(Spanned::new(kind, span))
    }

    fn parse_array(&mut self) -> Result<Expr> {
        let start = self.expect(&Token::LBracket)?;
        let mut items = Vec::new();
        while !self.eat(&Token::RBracket) {
            items.push(self.parse_assignment()?);
            if !self.eat(&Token::Comma) {
                self.expect(&Token::RBracket)?;
                break;
            }
        }
        Ok(Spanned::new(ExprKind::Array(items), start.merge(self.prev_span())))
    }

    fn parse_object(&mut self) -> Result<Expr> {
        let start = self.expect(&Token::LBrace)?;
        let mut props = Vec::new();
        while !self.eat(&Token::RBrace) {
            let key = match self.peek().cloned() {
                Some(Token::Ident(k)) | Some(Token::Str(k)) => k,
                Some(Token::Number(n)) => crate::vm::value::format_number(n),
                _ => return Err(self.unexpected("property name")),
            };
            self.advance();
            self.expect(&Token::Colon)?;
            props.push((key, self.parse_assignment()?));
            if !self.eat(&Token::Comma) {
                self.expect(&Token::RBrace)?;
                break;
            }
        }
        Ok(Spanned::new(ExprKind::Object(props), start.merge(self.prev_span())))
    }
}

/// Parse a lexed token stream into a program, stopping at the first error.
pub fn parse(tokens: Vec<(Token, Span)>) -> Result<Program> {
    Parser::new(tokens).parse_program()
}
