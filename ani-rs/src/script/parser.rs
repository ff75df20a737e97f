//! Recursive-descent parser for ani scripts.
//!
//! Operator precedence (lowest → highest):
//!   assign  →  ternary  →  or  →  and  →  equality  →  relational  →
//!   additive  →  multiplicative  →  unary  →  postfix  →  primary
//!
//! A `<` in primary position opens a vector literal.  Its elements, and
//! the dimensions inside `vector<..>` / `matrix<..>` type specs, are parsed
//! at additive level so that the closing `>` is never taken for a
//! comparison.

use super::ast::{
    Arg, Block, Decl, Declarator, Expr, ExprKind, Ident, LogicalOp, MemberDecl, ObjectDecl, Program, Stmt,
    StmtKind, TypeSpec,
};
use super::lexer::{Keyword, Lexer, Spanned, Token};
use super::ops::OpId;
use super::types::{ExprValueType, IncDecOp};
use super::value::ExprValue;
use crate::error::ParseError;

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
}

impl Parser {
    fn new(tokens: Vec<Spanned>) -> Self {
        Parser { tokens, pos: 0 }
    }

    fn peek(&self) -> &Token {
        self.peek_at(0)
    }

    fn peek_at(&self, n: usize) -> &Token {
        self.tokens.get(self.pos + n).map_or(&Token::Eof, |s| &s.tok)
    }

    fn line(&self) -> u32 {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map_or(1, |s| s.line)
    }

    fn advance(&mut self) -> Token {
        let t = self.peek().clone();
        self.pos += 1;
        t
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == expected {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn err<T>(&self, message: impl Into<String>) -> Result<T, ParseError> {
        Err(ParseError { line: self.line(), message: message.into() })
    }

    fn expect(&mut self, expected: &Token, context: &str) -> Result<(), ParseError> {
        if self.eat(expected) {
            Ok(())
        } else {
            self.err(format!("expected {expected} {context}, found {}", self.peek()))
        }
    }

    fn expect_ident(&mut self, context: &str) -> Result<String, ParseError> {
        match self.peek().clone() {
            Token::Ident(name) => {
                self.pos += 1;
                Ok(name)
            }
            other => self.err(format!("expected a name {context}, found {other}")),
        }
    }

    // ── Top level ─────────────────────────────────────────────────────────────

    fn parse_program(&mut self) -> Result<Program, ParseError> {
        let mut program = Program::default();
        while self.peek() != &Token::Eof {
            if self.peek() == &Token::Kw(Keyword::Object) {
                program.objects.push(self.parse_object()?);
            } else {
                program.body.stmts.push(self.parse_stmt()?);
            }
        }
        Ok(program)
    }

    fn parse_object(&mut self) -> Result<ObjectDecl, ParseError> {
        let line = self.line();
        self.pos += 1;
        let name = self.expect_ident("after `object`")?;
        self.expect(&Token::LBrace, "to open the object body")?;
        let mut members = Vec::new();
        while !self.eat(&Token::RBrace) {
            let line = self.line();
            let spec = self.parse_type_spec()?;
            let mut names = vec![self.expect_ident("for the member")?];
            while self.eat(&Token::Comma) {
                names.push(self.expect_ident("for the member")?);
            }
            self.expect(&Token::Semi, "after the member declaration")?;
            members.push(MemberDecl { spec, names, line });
        }
        self.eat(&Token::Semi);
        Ok(ObjectDecl { name, members, handle: None, line })
    }

    // ── Statements ────────────────────────────────────────────────────────────

    /// Does the upcoming input start a declaration?
    fn at_decl(&self) -> bool {
        match self.peek() {
            Token::Kw(Keyword::Vector | Keyword::Range) => self.peek_at(1) != &Token::LParen,
            Token::Kw(k) => k.is_type(),
            Token::Ident(_) => {
                matches!(self.peek_at(1), Token::Ident(_))
                    || (self.peek_at(1) == &Token::LBracket && self.peek_at(2) == &Token::RBracket)
            }
            _ => false,
        }
    }

    fn parse_block(&mut self) -> Result<Block, ParseError> {
        self.expect(&Token::LBrace, "to open a block")?;
        let mut stmts = Vec::new();
        while !self.eat(&Token::RBrace) {
            if self.peek() == &Token::Eof {
                return self.err("unterminated block");
            }
            stmts.push(self.parse_stmt()?);
        }
        Ok(Block { id: None, stmts })
    }

    fn parse_paren_expr(&mut self, what: &str) -> Result<Expr, ParseError> {
        self.expect(&Token::LParen, &format!("after `{what}`"))?;
        let e = self.parse_expr()?;
        self.expect(&Token::RParen, &format!("to close the `{what}` condition"))?;
        Ok(e)
    }

    fn parse_stmt(&mut self) -> Result<Stmt, ParseError> {
        let line = self.line();
        let kind = match self.peek() {
            Token::Semi => {
                self.pos += 1;
                StmtKind::Empty
            }
            Token::LBrace => StmtKind::Block(self.parse_block()?),
            Token::Kw(Keyword::If) => {
                self.pos += 1;
                let cond = self.parse_paren_expr("if")?;
                let then = Box::new(self.parse_stmt()?);
                let otherwise = if self.eat(&Token::Kw(Keyword::Else)) {
                    Some(Box::new(self.parse_stmt()?))
                } else {
                    None
                };
                StmtKind::If { cond, then, otherwise }
            }
            Token::Kw(Keyword::While) => {
                self.pos += 1;
                let cond = self.parse_paren_expr("while")?;
                StmtKind::While { cond, body: Box::new(self.parse_stmt()?) }
            }
            Token::Kw(Keyword::Do) => {
                self.pos += 1;
                let body = Box::new(self.parse_stmt()?);
                self.expect(&Token::Kw(Keyword::While), "after the `do` body")?;
                let cond = self.parse_paren_expr("while")?;
                self.expect(&Token::Semi, "after `do ... while (...)`")?;
                StmtKind::DoWhile { body, cond }
            }
            Token::Kw(Keyword::For) => return self.parse_for(),
            Token::Kw(Keyword::Return) => {
                self.pos += 1;
                let value = if self.peek() == &Token::Semi { None } else { Some(self.parse_expr()?) };
                self.expect(&Token::Semi, "after `return`")?;
                StmtKind::Return(value)
            }
            Token::Kw(Keyword::Break) => {
                self.pos += 1;
                self.expect(&Token::Semi, "after `break`")?;
                StmtKind::Break
            }
            Token::Kw(Keyword::Object) => return self.err("object declarations are only allowed at top level"),
            _ if self.at_decl() => {
                let decl = self.parse_decl()?;
                self.expect(&Token::Semi, "after the declaration")?;
                StmtKind::Decl(decl)
            }
            _ => {
                let e = self.parse_expr()?;
                self.expect(&Token::Semi, "after the expression")?;
                StmtKind::Expr(e)
            }
        };
        Ok(Stmt::new(kind, line))
    }

    fn parse_for(&mut self) -> Result<Stmt, ParseError> {
        let line = self.line();
        self.pos += 1;
        self.expect(&Token::LParen, "after `for`")?;
        let mut decl = None;
        let mut init = None;
        if self.at_decl() {
            decl = Some(Stmt::new(StmtKind::Decl(self.parse_decl()?), line));
        } else if self.peek() != &Token::Semi {
            init = Some(self.parse_expr()?);
        }
        self.expect(&Token::Semi, "after the `for` init clause")?;
        let cond = if self.peek() == &Token::Semi { None } else { Some(self.parse_expr()?) };
        self.expect(&Token::Semi, "after the `for` condition")?;
        let step = if self.peek() == &Token::RParen { None } else { Some(self.parse_expr()?) };
        self.expect(&Token::RParen, "to close the `for` header")?;
        let body = Box::new(self.parse_stmt()?);
        let for_stmt = Stmt::new(StmtKind::For { init, cond, step, body }, line);
        Ok(match decl {
            Some(d) => Stmt::new(StmtKind::Block(Block { id: None, stmts: vec![d, for_stmt] }), line),
            None => for_stmt,
        })
    }

    fn parse_decl(&mut self) -> Result<Decl, ParseError> {
        let spec = self.parse_type_spec()?;
        let mut vars = Vec::new();
        loop {
            let line = self.line();
            let name = self.expect_ident("in the declaration")?;
            let init = if self.eat(&Token::Assign) { Some(self.parse_assign()?) } else { None };
            vars.push(Declarator { name, init, var: None, assign: None, line });
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        Ok(Decl { spec, ty: ExprValueType::unknown(), vars })
    }

    fn parse_type_spec(&mut self) -> Result<TypeSpec, ParseError> {
        let mut spec = self.parse_base_type()?;
        while self.peek() == &Token::LBracket && self.peek_at(1) == &Token::RBracket {
            self.pos += 2;
            spec = TypeSpec::Array(Box::new(spec));
        }
        Ok(spec)
    }

    fn parse_base_type(&mut self) -> Result<TypeSpec, ParseError> {
        Ok(match self.advance() {
            Token::Kw(Keyword::Int) => TypeSpec::Integer,
            Token::Kw(Keyword::Scalar) => TypeSpec::Scalar,
            Token::Kw(Keyword::Range) => TypeSpec::Range,
            Token::Kw(Keyword::String) => TypeSpec::String,
            Token::Kw(Keyword::Vector) => {
                self.expect(&Token::Lt, "after `vector`")?;
                let n = self.parse_additive()?;
                self.expect(&Token::Gt, "to close `vector<..>`")?;
                TypeSpec::Vector(Box::new(n))
            }
            Token::Kw(Keyword::Matrix) => {
                self.expect(&Token::Lt, "after `matrix`")?;
                let r = self.parse_additive()?;
                self.expect(&Token::Comma, "between matrix dimensions")?;
                let c = self.parse_additive()?;
                self.expect(&Token::Gt, "to close `matrix<..>`")?;
                TypeSpec::Matrix(Box::new(r), Box::new(c))
            }
            Token::Ident(name) => TypeSpec::Named(name),
            other => {
                self.pos -= 1;
                return self.err(format!("expected a type, found {other}"));
            }
        })
    }

    // ── Expressions ───────────────────────────────────────────────────────────

    fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        self.parse_assign()
    }

    fn parse_assign(&mut self) -> Result<Expr, ParseError> {
        let target = self.parse_ternary()?;
        let op = match self.peek() {
            Token::Assign => None,
            Token::PlusAssign => Some(OpId::Add),
            Token::MinusAssign => Some(OpId::Sub),
            Token::StarAssign => Some(OpId::Mul),
            Token::SlashAssign => Some(OpId::Div),
            Token::PercentAssign => Some(OpId::Mod),
            _ => return Ok(target),
        };
        let line = self.line();
        self.pos += 1;
        let value = self.parse_assign()?;
        Ok(Expr::new(
            ExprKind::Assign { op, target: Box::new(target), value: Box::new(value), compute: None, assign: None },
            line,
        ))
    }

    fn parse_ternary(&mut self) -> Result<Expr, ParseError> {
        let cond = self.parse_or()?;
        if self.peek() != &Token::Question {
            return Ok(cond);
        }
        let line = self.line();
        self.pos += 1;
        let then = self.parse_assign()?;
        self.expect(&Token::Colon, "in the conditional expression")?;
        let otherwise = self.parse_ternary()?;
        Ok(Expr::new(
            ExprKind::Conditional {
                cond: Box::new(cond),
                then: Box::new(then),
                otherwise: Box::new(otherwise),
                convs: [None, None],
            },
            line,
        ))
    }

    fn parse_or(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_and()?;
        while self.peek() == &Token::Or {
            let line = self.line();
            self.pos += 1;
            let rhs = self.parse_and()?;
            lhs = Expr::new(ExprKind::Logical { op: LogicalOp::Or, lhs: Box::new(lhs), rhs: Box::new(rhs) }, line);
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_equality()?;
        while self.peek() == &Token::And {
            let line = self.line();
            self.pos += 1;
            let rhs = self.parse_equality()?;
            lhs = Expr::new(ExprKind::Logical { op: LogicalOp::And, lhs: Box::new(lhs), rhs: Box::new(rhs) }, line);
        }
        Ok(lhs)
    }

    /// One left-associative binary level.
    fn parse_binary_level(
        &mut self,
        next: fn(&mut Self) -> Result<Expr, ParseError>,
        op_for: fn(&Token) -> Option<OpId>,
    ) -> Result<Expr, ParseError> {
        let mut lhs = next(self)?;
        while let Some(op) = op_for(self.peek()) {
            let line = self.line();
            self.pos += 1;
            let rhs = next(self)?;
            lhs = Expr::new(ExprKind::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs), compute: None }, line);
        }
        Ok(lhs)
    }

    fn parse_equality(&mut self) -> Result<Expr, ParseError> {
        self.parse_binary_level(Self::parse_relational, |t| match t {
            Token::Eq => Some(OpId::Eq),
            Token::Ne => Some(OpId::Ne),
            _ => None,
        })
    }

    fn parse_relational(&mut self) -> Result<Expr, ParseError> {
        self.parse_binary_level(Self::parse_additive, |t| match t {
            Token::Lt => Some(OpId::Lt),
            Token::Le => Some(OpId::Le),
            Token::Gt => Some(OpId::Gt),
            Token::Ge => Some(OpId::Ge),
            _ => None,
        })
    }

    fn parse_additive(&mut self) -> Result<Expr, ParseError> {
        self.parse_binary_level(Self::parse_multiplicative, |t| match t {
            Token::Plus => Some(OpId::Add),
            Token::Minus => Some(OpId::Sub),
            _ => None,
        })
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ParseError> {
        self.parse_binary_level(Self::parse_unary, |t| match t {
            Token::Star => Some(OpId::Mul),
            Token::Slash => Some(OpId::Div),
            Token::Percent => Some(OpId::Mod),
            _ => None,
        })
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        let line = self.line();
        let op = match self.peek() {
            Token::Minus => OpId::Neg,
            Token::Plus => OpId::Pos,
            Token::Bang => OpId::Not,
            Token::PlusPlus | Token::MinusMinus => {
                let op = if self.advance() == Token::PlusPlus { IncDecOp::Inc } else { IncDecOp::Dec };
                let target = self.parse_unary()?;
                return Ok(Expr::new(
                    ExprKind::IncDec { op, prefix: true, target: Box::new(target), func: None },
                    line,
                ));
            }
            _ => return self.parse_postfix(),
        };
        self.pos += 1;
        // `-2147483648` has no positive counterpart, so a minus directly on
        // an integer literal is read as one negative literal.
        let negated = match (op, self.peek()) {
            (OpId::Neg, Token::Int(n)) => Some(*n),
            _ => None,
        };
        if let Some(n) = negated {
            if !matches!(self.peek_at(1), Token::LBracket | Token::Dot | Token::PlusPlus | Token::MinusMinus) {
                self.pos += 1;
                return Ok(Expr::new(ExprKind::Literal(ExprValue::integer((-n) as i32)), line));
            }
        }
        let operand = self.parse_unary()?;
        Ok(Expr::new(ExprKind::Unary { op, operand: Box::new(operand), compute: None }, line))
    }

    fn parse_postfix(&mut self) -> Result<Expr, ParseError> {
        let mut e = self.parse_primary()?;
        loop {
            let line = self.line();
            match self.peek() {
                Token::LBracket => {
                    self.pos += 1;
                    let index = self.parse_expr()?;
                    self.expect(&Token::RBracket, "to close the subscript")?;
                    e = Expr::new(ExprKind::Subscript { base: Box::new(e), index: Box::new(index) }, line);
                }
                Token::Dot => {
                    self.pos += 1;
                    let name = self.expect_ident("after `.`")?;
                    e = Expr::new(ExprKind::Member { base: Box::new(e), name, access: None }, line);
                }
                Token::PlusPlus | Token::MinusMinus => {
                    let op = if self.advance() == Token::PlusPlus { IncDecOp::Inc } else { IncDecOp::Dec };
                    e = Expr::new(ExprKind::IncDec { op, prefix: false, target: Box::new(e), func: None }, line);
                }
                _ => return Ok(e),
            }
        }
    }

    fn parse_args(&mut self, what: &str) -> Result<Vec<Arg>, ParseError> {
        self.expect(&Token::LParen, &format!("after `{what}`"))?;
        let mut args = Vec::new();
        if self.eat(&Token::RParen) {
            return Ok(args);
        }
        loop {
            let name = match self.peek().clone() {
                Token::Ident(n) if self.peek_at(1) == &Token::Colon => {
                    self.pos += 2;
                    Some(n)
                }
                _ => None,
            };
            if name.is_none() && args.iter().any(|a: &Arg| a.name.is_some()) {
                return self.err(format!("positional argument after named argument in call to `{what}`"));
            }
            args.push(Arg { name, value: self.parse_assign()? });
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect(&Token::RParen, &format!("after the arguments to `{what}`"))?;
        Ok(args)
    }

    fn call(&mut self, name: String, line: u32) -> Result<Expr, ParseError> {
        let args = self.parse_args(&name)?;
        let callee = Expr::new(ExprKind::Ident(Ident::new(name)), line);
        Ok(Expr::new(ExprKind::Call { callee: Box::new(callee), args, resolved: None }, line))
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let line = self.line();
        match self.advance() {
            Token::Int(n) => match i32::try_from(n) {
                Ok(n) => Ok(Expr::new(ExprKind::Literal(ExprValue::integer(n)), line)),
                Err(_) => Err(ParseError { line, message: format!("integer literal `{n}` out of range") }),
            },
            Token::Float(x) => Ok(Expr::new(ExprKind::Literal(ExprValue::scalar(x)), line)),
            Token::Str(s) => Ok(Expr::new(ExprKind::Literal(ExprValue::string(s)), line)),
            Token::Kw(Keyword::Null) => Ok(Expr::new(ExprKind::Literal(ExprValue::null_scope()), line)),
            Token::Ident(name) => {
                if self.peek() == &Token::LParen {
                    self.call(name, line)
                } else {
                    Ok(Expr::new(ExprKind::Ident(Ident::new(name)), line))
                }
            }
            Token::Kw(Keyword::Vector) if self.peek() == &Token::LParen => self.call("vector".into(), line),
            Token::Kw(Keyword::Range) if self.peek() == &Token::LParen => self.call("range".into(), line),
            Token::LParen => {
                let inner = self.parse_expr()?;
                self.expect(&Token::RParen, "to close the parenthesis")?;
                Ok(inner)
            }
            Token::Lt => {
                let mut elems = vec![self.parse_additive()?];
                while self.eat(&Token::Comma) {
                    elems.push(self.parse_additive()?);
                }
                self.expect(&Token::Gt, "to close the vector literal")?;
                Ok(Expr::new(ExprKind::Vector { elems }, line))
            }
            Token::LBrace => {
                let mut elems = Vec::new();
                if self.peek() != &Token::RBrace {
                    elems.push(self.parse_assign()?);
                    while self.eat(&Token::Comma) {
                        elems.push(self.parse_assign()?);
                    }
                }
                self.expect(&Token::RBrace, "to close the array literal")?;
                Ok(Expr::new(ExprKind::Array { elems, convs: Vec::new() }, line))
            }
            Token::Kw(Keyword::New) => self.parse_new(line),
            other => {
                self.pos -= 1;
                self.err(format!("unexpected {other}"))
            }
        }
    }

    fn parse_new(&mut self, line: u32) -> Result<Expr, ParseError> {
        let named = match self.peek() {
            Token::Ident(name) if self.peek_at(1) == &Token::LParen => Some(name.clone()),
            _ => None,
        };
        if let Some(name) = named {
            self.pos += 1;
            let args = self.parse_args(&name)?;
            return Ok(Expr::new(ExprKind::NewObject { name, args, resolved: None }, line));
        }
        let elem = self.parse_base_type()?;
        self.expect(&Token::LBracket, "after the element type of `new`")?;
        let size = self.parse_expr()?;
        self.expect(&Token::RBracket, "after the array size")?;
        Ok(Expr::new(
            ExprKind::NewArray { elem, size: Box::new(size), elem_ty: ExprValueType::unknown() },
            line,
        ))
    }
}

/// Parse a complete script.
pub fn parse_program(src: &str) -> Result<Program, ParseError> {
    let tokens = Lexer::new(src).tokenize()?;
    Parser::new(tokens).parse_program()
}

/// Parse a single expression, for tests and tools.
pub fn parse_expr(src: &str) -> Result<Expr, ParseError> {
    let tokens = Lexer::new(src).tokenize()?;
    let mut parser = Parser::new(tokens);
    let e = parser.parse_expr()?;
    if parser.peek() != &Token::Eof {
        return parser.err(format!("unexpected {} after the expression", parser.peek()));
    }
    Ok(e)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
