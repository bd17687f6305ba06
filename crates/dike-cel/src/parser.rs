//! Recursive-descent parser with macro expansion.

use crate::ast::{Comprehension, Expr, ExprKind, Literal, MacroKind};
use crate::lexer::{Lexer, Token};

/// Bounds both parser recursion and the height of the resulting tree, so
/// checking and evaluation cannot exhaust the stack.
const MAX_DEPTH: usize = 100;

/// Words that cannot name a variable or a free function. They remain valid
/// as field names and member functions.
const RESERVED: &[&str] = &[
    "as", "break", "const", "continue", "else", "for", "function", "if", "import", "let", "loop",
    "package", "namespace", "return", "var", "void", "while",
];

/// A parse failure at a byte offset.
pub(crate) type ParseError = (usize, String);

/// Parses an expression.
pub(crate) fn parse(source: &str) -> Result<Expr, ParseError> {
    let tokens = Lexer::new(source).tokenize()?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let expr = parser.expr()?;
    let (offset, token) = parser.peek_full();
    if *token != Token::Eof {
        return Err((offset, format!("unexpected {}", token.describe())));
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.peek_full().1
    }

    fn peek_full(&self) -> (usize, &Token) {
        let (offset, token) = &self.tokens[self.pos.min(self.tokens.len() - 1)];
        (*offset, token)
    }

    fn peek_nth(&self, n: usize) -> &Token {
        let i = (self.pos + n).min(self.tokens.len() - 1);
        &self.tokens[i].1
    }

    fn offset(&self) -> usize {
        self.peek_full().0
    }

    fn advance(&mut self) -> (usize, Token) {
        let i = self.pos.min(self.tokens.len() - 1);
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        self.tokens[i].clone()
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == token {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Token) -> Result<usize, ParseError> {
        let (offset, next) = self.peek_full();
        if next == token {
            self.pos += 1;
            Ok(offset)
        } else {
            Err((
                offset,
                format!("expected {} but found {}", token.describe(), next.describe()),
            ))
        }
    }

    fn enter(&mut self) -> Result<(), ParseError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err((self.offset(), "expression recursion limit exceeded".to_string()));
        }
        Ok(())
    }

    fn depth_exceeded(offset: usize) -> ParseError {
        (offset, "expression recursion limit exceeded".to_string())
    }

    /// Builds a node, rejecting trees taller than [`MAX_DEPTH`].
    fn node(offset: usize, kind: ExprKind) -> Result<Expr, ParseError> {
        let expr = Expr::new(offset, kind);
        if expr.height > MAX_DEPTH {
            return Err(Self::depth_exceeded(offset));
        }
        Ok(expr)
    }

    fn call(offset: usize, target: Option<Expr>, function: String, args: Vec<Expr>) -> Result<Expr, ParseError> {
        Self::node(
            offset,
            ExprKind::Call {
                target: target.map(Box::new),
                function,
                args,
            },
        )
    }

    fn binary(offset: usize, function: &str, lhs: Expr, rhs: Expr) -> Result<Expr, ParseError> {
        Self::call(offset, None, function.to_string(), vec![lhs, rhs])
    }

    fn expr(&mut self) -> Result<Expr, ParseError> {
        self.enter()?;
        let result = self.conditional();
        self.depth -= 1;
        result
    }

    fn conditional(&mut self) -> Result<Expr, ParseError> {
        let cond = self.or()?;
        if *self.peek() != Token::Question {
            return Ok(cond);
        }
        let offset = self.advance().0;
        let then = self.or()?;
        self.expect(&Token::Colon)?;
        let otherwise = self.expr()?;
        Self::node(
            offset,
            ExprKind::Conditional(Box::new(cond), Box::new(then), Box::new(otherwise)),
        )
    }

    fn or(&mut self) -> Result<Expr, ParseError> {
        let mut operands = vec![self.and()?];
        let mut offsets = Vec::new();
        while *self.peek() == Token::OrOr {
            offsets.push(self.advance().0);
            operands.push(self.and()?);
        }
        balanced(operands, &offsets, ExprKind::Or)
    }

    fn and(&mut self) -> Result<Expr, ParseError> {
        let mut operands = vec![self.relation()?];
        let mut offsets = Vec::new();
        while *self.peek() == Token::AndAnd {
            offsets.push(self.advance().0);
            operands.push(self.relation()?);
        }
        balanced(operands, &offsets, ExprKind::And)
    }

    fn relation(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.addition()?;
        loop {
            let function = match self.peek() {
                Token::EqEq => "_==_",
                Token::NotEq => "_!=_",
                Token::Lt => "_<_",
                Token::Le => "_<=_",
                Token::Gt => "_>_",
                Token::Ge => "_>=_",
                Token::In => "@in",
                _ => return Ok(lhs),
            };
            let offset = self.advance().0;
            let rhs = self.addition()?;
            lhs = Self::binary(offset, function, lhs, rhs)?;
        }
    }

    fn addition(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.multiplication()?;
        loop {
            let function = match self.peek() {
                Token::Plus => "_+_",
                Token::Minus => "_-_",
                _ => return Ok(lhs),
            };
            let offset = self.advance().0;
            let rhs = self.multiplication()?;
            lhs = Self::binary(offset, function, lhs, rhs)?;
        }
    }

    fn multiplication(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.unary()?;
        loop {
            let function = match self.peek() {
                Token::Star => "_*_",
                Token::Slash => "_/_",
                Token::Percent => "_%_",
                _ => return Ok(lhs),
            };
            let offset = self.advance().0;
            let rhs = self.unary()?;
            lhs = Self::binary(offset, function, lhs, rhs)?;
        }
    }

    fn unary(&mut self) -> Result<Expr, ParseError> {
        match self.peek() {
            Token::Bang => {
                let mut ops = Vec::new();
                while *self.peek() == Token::Bang {
                    ops.push(self.advance().0);
                }
                let operand = self.member()?;
                wrap_unary(ops, "!_", operand)
            }
            Token::Minus => {
                let mut ops = Vec::new();
                while *self.peek() == Token::Minus {
                    ops.push(self.advance().0);
                }
                let operand = self.negated_literal(&mut ops)?;
                wrap_unary(ops, "-_", operand)
            }
            _ => self.member(),
        }
    }

    /// Folds the innermost minus into a directly following numeric literal.
    fn negated_literal(&mut self, ops: &mut Vec<usize>) -> Result<Expr, ParseError> {
        let standalone = !matches!(self.peek_nth(1), Token::Dot | Token::LBracket);
        if standalone {
            let folded = match self.peek() {
                Token::Int(v) => {
                    let v = i128::from(*v);
                    Some(
                        i64::try_from(-v)
                            .map(Literal::Int)
                            .map_err(|_| (self.offset(), format!("integer literal out of range: -{v}")))?,
                    )
                }
                Token::Double(d) => Some(Literal::Double(-*d)),
                _ => None,
            };
            if let Some(literal) = folded {
                let offset = ops.pop().unwrap_or_else(|| self.offset());
                self.advance();
                return Ok(Expr::new(offset, ExprKind::Literal(literal)));
            }
        }
        self.member()
    }

    fn member(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.primary()?;
        loop {
            match self.peek() {
                Token::Dot => {
                    let offset = self.advance().0;
                    let (name_offset, token) = self.advance();
                    let Token::Ident(name) = token else {
                        return Err((name_offset, format!("expected identifier after '.' but found {}", token.describe())));
                    };
                    if *self.peek() == Token::LParen {
                        self.advance();
                        let args = self.args(&Token::RParen)?;
                        expr = self.member_call(offset, expr, name, args)?;
                    } else {
                        expr = Self::node(
                            offset,
                            ExprKind::Select {
                                operand: Box::new(expr),
                                field: name,
                                test_only: false,
                            },
                        )?;
                    }
                }
                Token::LBracket => {
                    let offset = self.advance().0;
                    let index = self.expr()?;
                    self.expect(&Token::RBracket)?;
                    expr = Self::node(
                        offset,
                        ExprKind::Index {
                            operand: Box::new(expr),
                            index: Box::new(index),
                        },
                    )?;
                }
                _ => return Ok(expr),
            }
        }
    }

    fn primary(&mut self) -> Result<Expr, ParseError> {
        let (offset, token) = self.advance();
        let kind = match token {
            Token::Int(v) => ExprKind::Literal(Literal::Int(
                i64::try_from(v).map_err(|_| (offset, format!("integer literal out of range: {v}")))?,
            )),
            Token::Uint(v) => ExprKind::Literal(Literal::Uint(v)),
            Token::Double(d) => ExprKind::Literal(Literal::Double(d)),
            Token::String(s) => ExprKind::Literal(Literal::String(s)),
            Token::Bytes(b) => ExprKind::Literal(Literal::Bytes(b)),
            Token::True => ExprKind::Literal(Literal::Bool(true)),
            Token::False => ExprKind::Literal(Literal::Bool(false)),
            Token::Null => ExprKind::Literal(Literal::Null),
            Token::Dot => {
                let (name_offset, token) = self.advance();
                let Token::Ident(name) = token else {
                    return Err((name_offset, format!("expected identifier but found {}", token.describe())));
                };
                return self.ident_or_call(name_offset, name);
            }
            Token::Ident(name) => return self.ident_or_call(offset, name),
            Token::LParen => {
                let inner = self.expr()?;
                self.expect(&Token::RParen)?;
                return Ok(inner);
            }
            Token::LBracket => ExprKind::List(self.args(&Token::RBracket)?),
            Token::LBrace => ExprKind::Map(self.map_entries()?),
            other => return Err((offset, format!("unexpected {}", other.describe()))),
        };
        Self::node(offset, kind)
    }

    fn ident_or_call(&mut self, offset: usize, name: String) -> Result<Expr, ParseError> {
        if RESERVED.contains(&name.as_str()) {
            return Err((offset, format!("reserved identifier: {name}")));
        }
        if *self.peek() != Token::LParen {
            return Ok(Expr::new(offset, ExprKind::Ident(name)));
        }
        self.advance();
        let args = self.args(&Token::RParen)?;
        if name == "has" {
            return has_macro(offset, args);
        }
        Self::call(offset, None, name, args)
    }

    fn member_call(
        &mut self,
        offset: usize,
        target: Expr,
        name: String,
        mut args: Vec<Expr>,
    ) -> Result<Expr, ParseError> {
        let Some(kind) = MacroKind::from_name(&name) else {
            return Self::call(offset, Some(target), name, args);
        };
        let arity_ok = match kind {
            MacroKind::Map => args.len() == 2 || args.len() == 3,
            _ => args.len() == 2,
        };
        let var = match args.first() {
            Some(Expr {
                kind: ExprKind::Ident(var),
                ..
            }) if arity_ok => var.clone(),
            Some(first) if arity_ok => {
                return Err((first.offset, "argument must be a simple name".to_string()));
            }
            _ => return Self::call(offset, Some(target), name, args),
        };
        args.remove(0);
        let (predicate, transform) = match (kind, args.len()) {
            (MacroKind::Map, 1) => (None, args.pop()),
            (MacroKind::Map, _) => {
                let transform = args.pop();
                (args.pop(), transform)
            }
            _ => (args.pop(), None),
        };
        Self::node(
            offset,
            ExprKind::Comprehension(Box::new(Comprehension {
                kind,
                var,
                range: target,
                predicate,
                transform,
            })),
        )
    }

    fn args(&mut self, close: &Token) -> Result<Vec<Expr>, ParseError> {
        let mut args = Vec::new();
        if self.eat(close) {
            return Ok(args);
        }
        loop {
            args.push(self.expr()?);
            if self.eat(close) {
                return Ok(args);
            }
            self.expect(&Token::Comma)?;
            // trailing comma
            if self.eat(close) {
                return Ok(args);
            }
        }
    }

    fn map_entries(&mut self) -> Result<Vec<(Expr, Expr)>, ParseError> {
        let mut entries = Vec::new();
        if self.eat(&Token::RBrace) {
            return Ok(entries);
        }
        loop {
            let key = self.expr()?;
            self.expect(&Token::Colon)?;
            let value = self.expr()?;
            entries.push((key, value));
            if self.eat(&Token::RBrace) {
                return Ok(entries);
            }
            self.expect(&Token::Comma)?;
            if self.eat(&Token::RBrace) {
                return Ok(entries);
            }
        }
    }
}

/// Joins `operands` of a logical operator into a tree of logarithmic
/// height. `offsets[i]` is the operator between operands `i` and `i + 1`.
fn balanced(
    mut operands: Vec<Expr>,
    offsets: &[usize],
    join: fn(Box<Expr>, Box<Expr>) -> ExprKind,
) -> Result<Expr, ParseError> {
    if operands.len() == 1 {
        return operands.pop().ok_or_else(|| (0, "missing operand".to_string()));
    }
    let mid = operands.len() / 2;
    let right = operands.split_off(mid);
    let lhs = balanced(operands, &offsets[..mid - 1], join)?;
    let rhs = balanced(right, &offsets[mid..], join)?;
    Parser::node(offsets[mid - 1], join(Box::new(lhs), Box::new(rhs)))
}

fn wrap_unary(ops: Vec<usize>, function: &str, operand: Expr) -> Result<Expr, ParseError> {
    if let Some(&offset) = ops.first() {
        if operand.height + ops.len() > MAX_DEPTH {
            return Err(Parser::depth_exceeded(offset));
        }
    }
    ops.into_iter()
        .rev()
        .try_fold(operand, |inner, offset| Parser::call(offset, None, function.to_string(), vec![inner]))
}

fn has_macro(offset: usize, mut args: Vec<Expr>) -> Result<Expr, ParseError> {
    if args.len() != 1 {
        return Err((offset, "invalid argument to has() macro".to_string()));
    }
    let arg = args.remove(0);
    match arg.kind {
        ExprKind::Select {
            operand,
            field,
            test_only: false,
        } => Ok(Expr::new(
            arg.offset,
            ExprKind::Select {
                operand,
                field,
                test_only: true,
            },
        )),
        _ => Err((arg.offset, "invalid argument to has() macro".to_string())),
    }
}
