//! Effect scripts: a small expression language for user CPU effects.
//!
//! A script is one `render { ... }` block run once per frame. It can read the
//! audio globals and smoothed bins, do arithmetic, branch, loop over bounded
//! ranges and call a fixed set of drawing primitives. Nothing else is
//! reachable from a script. Drawing calls are collected into a command list
//! that only reaches the canvas if the whole frame evaluated cleanly.
//!
//! ```text
//! render {
//!     fade(rgba(0, 0, 0, 0.2));
//!     for i in 0 .. 32 {
//!         let v = bin(i * 4) * 4000;
//!         fill(hsl(i * 10, 1, 0.5));
//!         rect(i * width / 32, height - v, width / 40, v);
//!     }
//! }
//! ```

use glam::Vec2;
use tiny_skia::Color;

use super::canvas::{hsla, rgba, Canvas};
use crate::audio::BandEnergies;
use crate::error::ScriptError;

/// Operations a script may spend on a single frame.
pub const OP_BUDGET: usize = 200_000;

/// Deepest nesting of blocks and parenthesised expressions accepted.
const MAX_NESTING: usize = 64;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f32),
    Ident(String),
    Let,
    If,
    Else,
    For,
    In,
    Render,
    LParen,
    RParen,
    LBrace,
    RBrace,
    Comma,
    Semi,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Lt,
    Le,
    Gt,
    Ge,
    EqEq,
    Ne,
    AndAnd,
    OrOr,
    Bang,
    Assign,
    DotDot,
    Eof,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Number(n) => format!("number {n}"),
            Token::Ident(name) => format!("'{name}'"),
            Token::Eof => "end of script".to_string(),
            other => format!("{other:?}"),
        }
    }
}

#[derive(Debug, Clone)]
struct Lexed {
    token: Token,
    line: usize,
}

fn syntax(line: usize, message: impl Into<String>) -> ScriptError {
    ScriptError::Syntax {
        line,
        message: message.into(),
    }
}

fn tokenize(source: &str) -> Result<Vec<Lexed>, ScriptError> {
    let mut tokens = Vec::new();
    let mut chars = source.chars().peekable();
    let mut line = 1;

    while let Some(&c) = chars.peek() {
        if c == '\n' {
            line += 1;
            chars.next();
            continue;
        }
        if c.is_whitespace() {
            chars.next();
            continue;
        }

        if c.is_ascii_digit() {
            let mut text = String::new();
            while let Some(&d) = chars.peek() {
                if d.is_ascii_digit() {
                    text.push(d);
                    chars.next();
                } else if d == '.' && !text.contains('.') {
                    // `0..10` is a range, not the number `0.`
                    let mut lookahead = chars.clone();
                    lookahead.next();
                    if lookahead.peek() == Some(&'.') {
                        break;
                    }
                    text.push(d);
                    chars.next();
                } else {
                    break;
                }
            }
            let value = text
                .parse::<f32>()
                .map_err(|_| syntax(line, format!("bad number '{text}'")))?;
            tokens.push(Lexed {
                token: Token::Number(value),
                line,
            });
            continue;
        }

        if c.is_ascii_alphabetic() || c == '_' {
            let mut name = String::new();
            while let Some(&d) = chars.peek() {
                if d.is_ascii_alphanumeric() || d == '_' {
                    name.push(d);
                    chars.next();
                } else {
                    break;
                }
            }
            let token = match name.as_str() {
                "let" => Token::Let,
                "if" => Token::If,
                "else" => Token::Else,
                "for" => Token::For,
                "in" => Token::In,
                "render" => Token::Render,
                _ => Token::Ident(name),
            };
            tokens.push(Lexed { token, line });
            continue;
        }

        chars.next();
        let next = chars.peek().copied();
        let (token, pair) = match (c, next) {
            ('/', Some('/')) => {
                for d in chars.by_ref() {
                    if d == '\n' {
                        line += 1;
                        break;
                    }
                }
                continue;
            }
            ('<', Some('=')) => (Token::Le, true),
            ('>', Some('=')) => (Token::Ge, true),
            ('=', Some('=')) => (Token::EqEq, true),
            ('!', Some('=')) => (Token::Ne, true),
            ('&', Some('&')) => (Token::AndAnd, true),
            ('|', Some('|')) => (Token::OrOr, true),
            ('.', Some('.')) => (Token::DotDot, true),
            ('(', _) => (Token::LParen, false),
            (')', _) => (Token::RParen, false),
            ('{', _) => (Token::LBrace, false),
            ('}', _) => (Token::RBrace, false),
            (',', _) => (Token::Comma, false),
            (';', _) => (Token::Semi, false),
            ('+', _) => (Token::Plus, false),
            ('-', _) => (Token::Minus, false),
            ('*', _) => (Token::Star, false),
            ('/', _) => (Token::Slash, false),
            ('%', _) => (Token::Percent, false),
            ('<', _) => (Token::Lt, false),
            ('>', _) => (Token::Gt, false),
            ('!', _) => (Token::Bang, false),
            ('=', _) => (Token::Assign, false),
            _ => return Err(syntax(line, format!("unexpected character '{c}'"))),
        };
        if pair {
            chars.next();
        }
        tokens.push(Lexed { token, line });
    }

    tokens.push(Lexed {
        token: Token::Eof,
        line,
    });
    Ok(tokens)
}

#[derive(Debug, Clone, Copy)]
enum Global {
    Bass,
    Mid,
    Treble,
    Energy,
    Time,
    Width,
    Height,
    Cx,
    Cy,
    BinCount,
    Pi,
}

impl Global {
    fn lookup(name: &str) -> Option<Self> {
        Some(match name {
            "bass" => Global::Bass,
            "mid" => Global::Mid,
            "treble" => Global::Treble,
            "energy" => Global::Energy,
            "time" => Global::Time,
            "width" => Global::Width,
            "height" => Global::Height,
            "cx" => Global::Cx,
            "cy" => Global::Cy,
            "bin_count" => Global::BinCount,
            "pi" => Global::Pi,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy)]
enum Function {
    Sin,
    Cos,
    Tan,
    Abs,
    Sqrt,
    Pow,
    Min,
    Max,
    Floor,
    Ceil,
    Fract,
    Clamp,
    Mix,
    Bin,
    Random,
    Rgb,
    Rgba,
    Hsl,
    Hsla,
}

impl Function {
    fn lookup(name: &str) -> Option<(Self, usize)> {
        Some(match name {
            "sin" => (Function::Sin, 1),
            "cos" => (Function::Cos, 1),
            "tan" => (Function::Tan, 1),
            "abs" => (Function::Abs, 1),
            "sqrt" => (Function::Sqrt, 1),
            "pow" => (Function::Pow, 2),
            "min" => (Function::Min, 2),
            "max" => (Function::Max, 2),
            "floor" => (Function::Floor, 1),
            "ceil" => (Function::Ceil, 1),
            "fract" => (Function::Fract, 1),
            "clamp" => (Function::Clamp, 3),
            "mix" => (Function::Mix, 3),
            "bin" => (Function::Bin, 1),
            "random" => (Function::Random, 0),
            "rgb" => (Function::Rgb, 3),
            "rgba" => (Function::Rgba, 4),
            "hsl" => (Function::Hsl, 3),
            "hsla" => (Function::Hsla, 4),
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy)]
enum DrawOp {
    Fade,
    Fill,
    Stroke,
    Rect,
    Circle,
    Ring,
    Line,
}

impl DrawOp {
    fn lookup(name: &str) -> Option<(Self, usize)> {
        Some(match name {
            "fade" => (DrawOp::Fade, 1),
            "fill" => (DrawOp::Fill, 1),
            "stroke" => (DrawOp::Stroke, 2),
            "rect" => (DrawOp::Rect, 4),
            "circle" => (DrawOp::Circle, 3),
            "ring" => (DrawOp::Ring, 3),
            "line" => (DrawOp::Line, 4),
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    And,
    Or,
}

#[derive(Debug)]
struct Expr {
    kind: ExprKind,
    line: usize,
}

#[derive(Debug)]
enum ExprKind {
    Number(f32),
    Global(Global),
    Local(usize),
    Neg(Box<Expr>),
    Not(Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Call(Function, Vec<Expr>),
}

#[derive(Debug)]
enum Stmt {
    Let {
        slot: usize,
        value: Expr,
    },
    Assign {
        slot: usize,
        value: Expr,
    },
    If {
        condition: Expr,
        then: Vec<Stmt>,
        otherwise: Vec<Stmt>,
    },
    For {
        slot: usize,
        start: Expr,
        end: Expr,
        body: Vec<Stmt>,
    },
    Draw {
        op: DrawOp,
        args: Vec<Expr>,
        line: usize,
    },
}

const PRECEDENCE_LEVELS: usize = 5;

/// Binary operator for `token` at precedence `level`, loosest first.
fn operator(level: usize, token: &Token) -> Option<BinOp> {
    Some(match (level, token) {
        (0, Token::OrOr) => BinOp::Or,
        (1, Token::AndAnd) => BinOp::And,
        (2, Token::EqEq) => BinOp::Eq,
        (2, Token::Ne) => BinOp::Ne,
        (2, Token::Lt) => BinOp::Lt,
        (2, Token::Le) => BinOp::Le,
        (2, Token::Gt) => BinOp::Gt,
        (2, Token::Ge) => BinOp::Ge,
        (3, Token::Plus) => BinOp::Add,
        (3, Token::Minus) => BinOp::Sub,
        (4, Token::Star) => BinOp::Mul,
        (4, Token::Slash) => BinOp::Div,
        (4, Token::Percent) => BinOp::Rem,
        _ => return None,
    })
}

struct Parser {
    tokens: Vec<Lexed>,
    pos: usize,
    scopes: Vec<Vec<(String, usize)>>,
    slots: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].token
    }

    fn line(&self) -> usize {
        self.tokens[self.pos.min(self.tokens.len() - 1)].line
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == token {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: Token, context: &str) -> Result<(), ScriptError> {
        if self.eat(&token) {
            Ok(())
        } else {
            Err(syntax(
                self.line(),
                format!("expected {:?} {}, found {}", token, context, self.peek().describe()),
            ))
        }
    }

    fn ident(&mut self, context: &str) -> Result<String, ScriptError> {
        match self.advance() {
            Token::Ident(name) => Ok(name),
            other => Err(syntax(
                self.line(),
                format!("expected a name {}, found {}", context, other.describe()),
            )),
        }
    }

    fn nest(&mut self) -> Result<(), ScriptError> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(syntax(self.line(), "nesting is too deep"));
        }
        Ok(())
    }

    fn declare(&mut self, name: String) -> usize {
        let slot = self.slots;
        self.slots += 1;
        if let Some(scope) = self.scopes.last_mut() {
            scope.push((name, slot));
        }
        slot
    }

    fn resolve(&self, name: &str) -> Option<usize> {
        self.scopes
            .iter()
            .rev()
            .flat_map(|scope| scope.iter().rev())
            .find(|(declared, _)| declared == name)
            .map(|&(_, slot)| slot)
    }

    fn program(&mut self) -> Result<Vec<Stmt>, ScriptError> {
        let mut body = None;
        while *self.peek() != Token::Eof {
            let line = self.line();
            if !self.eat(&Token::Render) {
                return Err(syntax(
                    line,
                    format!("expected a render block, found {}", self.peek().describe()),
                ));
            }
            if body.is_some() {
                return Err(syntax(line, "only one render block is allowed"));
            }
            body = Some(self.block()?);
        }
        body.ok_or(ScriptError::NotCallable)
    }

    fn block(&mut self) -> Result<Vec<Stmt>, ScriptError> {
        self.nest()?;
        self.expect(Token::LBrace, "to open a block")?;
        self.scopes.push(Vec::new());

        let mut statements = Vec::new();
        while !self.eat(&Token::RBrace) {
            if *self.peek() == Token::Eof {
                return Err(syntax(self.line(), "block is never closed"));
            }
            statements.push(self.statement()?);
        }

        self.scopes.pop();
        self.depth -= 1;
        Ok(statements)
    }

    fn statement(&mut self) -> Result<Stmt, ScriptError> {
        let line = self.line();
        match self.peek().clone() {
            Token::Let => {
                self.advance();
                let name = self.ident("after 'let'")?;
                if Global::lookup(&name).is_some() {
                    return Err(syntax(line, format!("'{name}' is a built-in and cannot be redefined")));
                }
                self.expect(Token::Assign, "after the variable name")?;
                let value = self.expression()?;
                self.expect(Token::Semi, "after 'let'")?;
                let slot = self.declare(name);
                Ok(Stmt::Let { slot, value })
            }
            Token::If => {
                self.advance();
                let condition = self.expression()?;
                let then = self.block()?;
                let otherwise = if self.eat(&Token::Else) {
                    if *self.peek() == Token::If {
                        self.nest()?;
                        let nested = self.statement()?;
                        self.depth -= 1;
                        vec![nested]
                    } else {
                        self.block()?
                    }
                } else {
                    Vec::new()
                };
                Ok(Stmt::If {
                    condition,
                    then,
                    otherwise,
                })
            }
            Token::For => {
                self.advance();
                let name = self.ident("after 'for'")?;
                self.expect(Token::In, "in for loop")?;
                let start = self.expression()?;
                self.expect(Token::DotDot, "between loop bounds")?;
                let end = self.expression()?;

                self.scopes.push(Vec::new());
                let slot = self.declare(name);
                let body = self.block();
                self.scopes.pop();

                Ok(Stmt::For {
                    slot,
                    start,
                    end,
                    body: body?,
                })
            }
            Token::Ident(name) => {
                self.advance();
                if self.eat(&Token::Assign) {
                    let slot = match self.resolve(&name) {
                        Some(slot) => slot,
                        None if Global::lookup(&name).is_some() => {
                            return Err(syntax(line, format!("'{name}' is read-only")));
                        }
                        None => return Err(ScriptError::UnknownName { line, name }),
                    };
                    let value = self.expression()?;
                    self.expect(Token::Semi, "after assignment")?;
                    return Ok(Stmt::Assign { slot, value });
                }

                let Some((op, arity)) = DrawOp::lookup(&name) else {
                    if Function::lookup(&name).is_some() {
                        return Err(syntax(line, format!("result of '{name}' is unused")));
                    }
                    return Err(ScriptError::UnknownName { line, name });
                };
                let args = self.arguments(&name, arity)?;
                self.expect(Token::Semi, "after drawing call")?;
                Ok(Stmt::Draw { op, args, line })
            }
            other => Err(syntax(line, format!("unexpected {}", other.describe()))),
        }
    }

    fn arguments(&mut self, name: &str, expected: usize) -> Result<Vec<Expr>, ScriptError> {
        let line = self.line();
        self.expect(Token::LParen, &format!("after '{name}'"))?;
        let mut args = Vec::new();
        if !self.eat(&Token::RParen) {
            loop {
                args.push(self.expression()?);
                if self.eat(&Token::RParen) {
                    break;
                }
                self.expect(Token::Comma, "between arguments")?;
            }
        }
        if args.len() != expected {
            return Err(ScriptError::Arity {
                line,
                name: name.to_string(),
                expected,
                found: args.len(),
            });
        }
        Ok(args)
    }

    fn expression(&mut self) -> Result<Expr, ScriptError> {
        self.nest()?;
        let expr = self.binary(0);
        self.depth -= 1;
        expr
    }

    fn binary(&mut self, level: usize) -> Result<Expr, ScriptError> {
        if level == PRECEDENCE_LEVELS {
            return self.unary();
        }

        let mut left = self.binary(level + 1)?;
        loop {
            let line = self.line();
            let Some(op) = operator(level, self.peek()) else {
                return Ok(left);
            };
            self.advance();
            let right = self.binary(level + 1)?;
            left = Expr {
                kind: ExprKind::Binary(op, Box::new(left), Box::new(right)),
                line,
            };
        }
    }

    fn unary(&mut self) -> Result<Expr, ScriptError> {
        let line = self.line();
        if self.eat(&Token::Minus) {
            self.nest()?;
            let operand = self.unary()?;
            self.depth -= 1;
            return Ok(Expr {
                kind: ExprKind::Neg(Box::new(operand)),
                line,
            });
        }
        if self.eat(&Token::Bang) {
            self.nest()?;
            let operand = self.unary()?;
            self.depth -= 1;
            return Ok(Expr {
                kind: ExprKind::Not(Box::new(operand)),
                line,
            });
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr, ScriptError> {
        let line = self.line();
        let kind = match self.advance() {
            Token::Number(value) => ExprKind::Number(value),
            Token::LParen => {
                let inner = self.expression()?;
                self.expect(Token::RParen, "to close parenthesis")?;
                return Ok(inner);
            }
            Token::Ident(name) => {
                if *self.peek() == Token::LParen {
                    let Some((function, arity)) = Function::lookup(&name) else {
                        if DrawOp::lookup(&name).is_some() {
                            return Err(syntax(line, format!("'{name}' draws and has no value")));
                        }
                        return Err(ScriptError::UnknownName { line, name });
                    };
                    ExprKind::Call(function, self.arguments(&name, arity)?)
                } else if let Some(slot) = self.resolve(&name) {
                    ExprKind::Local(slot)
                } else if let Some(global) = Global::lookup(&name) {
                    ExprKind::Global(global)
                } else {
                    return Err(ScriptError::UnknownName { line, name });
                }
            }
            other => return Err(syntax(line, format!("expected a value, found {}", other.describe()))),
        };
        Ok(Expr { kind, line })
    }
}

/// A parsed, name-checked effect script.
#[derive(Debug)]
pub struct Script {
    body: Vec<Stmt>,
    slots: usize,
}

impl Script {
    /// Parse `source` and resolve every name it uses. Anything that would
    /// fail regardless of audio input is rejected here.
    pub fn compile(source: &str) -> Result<Self, ScriptError> {
        let mut parser = Parser {
            tokens: tokenize(source)?,
            pos: 0,
            scopes: Vec::new(),
            slots: 0,
            depth: 0,
        };
        let body = parser.program()?;
        Ok(Self {
            body,
            slots: parser.slots,
        })
    }
}

/// What a script can see of the current frame.
pub struct ScriptInputs<'a> {
    pub bins: &'a [f32],
    pub bands: BandEnergies,
    pub time: f32,
    pub width: f32,
    pub height: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DrawCommand {
    Fade(Color),
    Rect {
        x: f32,
        y: f32,
        width: f32,
        height: f32,
        color: Color,
    },
    Circle {
        center: Vec2,
        radius: f32,
        color: Color,
    },
    Ring {
        center: Vec2,
        radius: f32,
        line_width: f32,
        color: Color,
    },
    Line {
        from: Vec2,
        to: Vec2,
        line_width: f32,
        color: Color,
    },
}

impl DrawCommand {
    pub fn apply(&self, canvas: &mut Canvas) {
        match *self {
            DrawCommand::Fade(color) => canvas.fade(color),
            DrawCommand::Rect {
                x,
                y,
                width,
                height,
                color,
            } => canvas.fill_rect(x, y, width, height, color),
            DrawCommand::Circle {
                center,
                radius,
                color,
            } => canvas.fill_circle(center, radius, color),
            DrawCommand::Ring {
                center,
                radius,
                line_width,
                color,
            } => canvas.stroke_circle(center, radius, line_width, color),
            DrawCommand::Line {
                from,
                to,
                line_width,
                color,
            } => canvas.line(from, to, line_width, color),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Value {
    Number(f32),
    Color(Color),
}

/// Reusable evaluation state: local slots, the command list and the random
/// source behind `random()`.
pub struct ScriptRuntime {
    locals: Vec<Value>,
    commands: Vec<DrawCommand>,
    rng: fastrand::Rng,
}

impl ScriptRuntime {
    pub fn new(seed: u64) -> Self {
        Self {
            locals: Vec::new(),
            commands: Vec::new(),
            rng: fastrand::Rng::with_seed(seed),
        }
    }

    /// Evaluate one frame of `script`. On success returns the drawing
    /// commands in order; on failure nothing should be drawn.
    pub fn run(&mut self, script: &Script, inputs: &ScriptInputs) -> Result<&[DrawCommand], ScriptError> {
        self.locals.clear();
        self.locals.resize(script.slots, Value::Number(0.0));
        self.commands.clear();

        let mut eval = Evaluator {
            inputs,
            locals: &mut self.locals,
            commands: &mut self.commands,
            rng: &mut self.rng,
            ops: 0,
            fill: Color::WHITE,
            stroke: Color::WHITE,
            line_width: 1.0,
        };
        eval.block(&script.body)?;
        Ok(&self.commands)
    }
}

struct Evaluator<'a, 'i> {
    inputs: &'a ScriptInputs<'i>,
    locals: &'a mut Vec<Value>,
    commands: &'a mut Vec<DrawCommand>,
    rng: &'a mut fastrand::Rng,
    ops: usize,
    fill: Color,
    stroke: Color,
    line_width: f32,
}

fn runtime(line: usize, message: impl Into<String>) -> ScriptError {
    ScriptError::Runtime {
        line,
        message: message.into(),
    }
}

fn channel(value: f32) -> u8 {
    if value.is_nan() {
        0
    } else {
        value.clamp(0.0, 255.0).round() as u8
    }
}

impl Evaluator<'_, '_> {
    fn tick(&mut self) -> Result<(), ScriptError> {
        self.ops += 1;
        if self.ops > OP_BUDGET {
            return Err(ScriptError::BudgetExceeded(OP_BUDGET));
        }
        Ok(())
    }

    fn block(&mut self, statements: &[Stmt]) -> Result<(), ScriptError> {
        for statement in statements {
            self.statement(statement)?;
        }
        Ok(())
    }

    fn statement(&mut self, statement: &Stmt) -> Result<(), ScriptError> {
        self.tick()?;
        match statement {
            Stmt::Let { slot, value } | Stmt::Assign { slot, value } => {
                let value = self.eval(value)?;
                self.locals[*slot] = value;
            }
            Stmt::If {
                condition,
                then,
                otherwise,
            } => {
                if self.number(condition)? != 0.0 {
                    self.block(then)?;
                } else {
                    self.block(otherwise)?;
                }
            }
            Stmt::For {
                slot,
                start,
                end,
                body,
            } => {
                let from = self.number(start)?.floor();
                let to = self.number(end)?.floor();
                if !from.is_finite() || !to.is_finite() {
                    return Err(runtime(start.line, "loop bounds must be finite"));
                }
                let mut i = from;
                while i < to {
                    self.tick()?;
                    self.locals[*slot] = Value::Number(i);
                    self.block(body)?;
                    i += 1.0;
                }
            }
            Stmt::Draw { op, args, line } => self.draw(*op, args, *line)?,
        }
        Ok(())
    }

    fn draw(&mut self, op: DrawOp, args: &[Expr], line: usize) -> Result<(), ScriptError> {
        let command = match op {
            DrawOp::Fade => DrawCommand::Fade(self.color(&args[0])?),
            DrawOp::Fill => {
                self.fill = self.color(&args[0])?;
                return Ok(());
            }
            DrawOp::Stroke => {
                self.stroke = self.color(&args[0])?;
                self.line_width = self.number(&args[1])?;
                return Ok(());
            }
            DrawOp::Rect => DrawCommand::Rect {
                x: self.number(&args[0])?,
                y: self.number(&args[1])?,
                width: self.number(&args[2])?,
                height: self.number(&args[3])?,
                color: self.fill,
            },
            DrawOp::Circle => DrawCommand::Circle {
                center: Vec2::new(self.number(&args[0])?, self.number(&args[1])?),
                radius: self.number(&args[2])?,
                color: self.fill,
            },
            DrawOp::Ring => DrawCommand::Ring {
                center: Vec2::new(self.number(&args[0])?, self.number(&args[1])?),
                radius: self.number(&args[2])?,
                line_width: self.line_width,
                color: self.stroke,
            },
            DrawOp::Line => DrawCommand::Line {
                from: Vec2::new(self.number(&args[0])?, self.number(&args[1])?),
                to: Vec2::new(self.number(&args[2])?, self.number(&args[3])?),
                line_width: self.line_width,
                color: self.stroke,
            },
        };
        if self.commands.len() >= OP_BUDGET {
            return Err(runtime(line, "too many drawing calls in one frame"));
        }
        self.commands.push(command);
        Ok(())
    }

    fn number(&mut self, expr: &Expr) -> Result<f32, ScriptError> {
        match self.eval(expr)? {
            Value::Number(n) => Ok(n),
            Value::Color(_) => Err(runtime(expr.line, "expected a number, found a colour")),
        }
    }

    fn color(&mut self, expr: &Expr) -> Result<Color, ScriptError> {
        match self.eval(expr)? {
            Value::Color(c) => Ok(c),
            Value::Number(_) => Err(runtime(expr.line, "expected a colour, found a number")),
        }
    }

    fn eval(&mut self, expr: &Expr) -> Result<Value, ScriptError> {
        self.tick()?;
        let value = match &expr.kind {
            ExprKind::Number(n) => *n,
            ExprKind::Local(slot) => return Ok(self.locals[*slot]),
            ExprKind::Global(global) => self.global(*global),
            ExprKind::Neg(operand) => -self.number(operand)?,
            ExprKind::Not(operand) => truth(self.number(operand)? == 0.0),
            ExprKind::Binary(op, left, right) => self.binary(*op, left, right)?,
            ExprKind::Call(function, args) => return self.call(*function, args),
        };
        Ok(Value::Number(value))
    }

    fn global(&self, global: Global) -> f32 {
        let inputs = self.inputs;
        match global {
            Global::Bass => inputs.bands.bass,
            Global::Mid => inputs.bands.mid,
            Global::Treble => inputs.bands.treble,
            Global::Energy => inputs.bands.mean(),
            Global::Time => inputs.time,
            Global::Width => inputs.width,
            Global::Height => inputs.height,
            Global::Cx => inputs.width / 2.0,
            Global::Cy => inputs.height / 2.0,
            Global::BinCount => inputs.bins.len() as f32,
            Global::Pi => std::f32::consts::PI,
        }
    }

    fn binary(&mut self, op: BinOp, left: &Expr, right: &Expr) -> Result<f32, ScriptError> {
        let a = self.number(left)?;
        match op {
            BinOp::And if a == 0.0 => return Ok(0.0),
            BinOp::Or if a != 0.0 => return Ok(1.0),
            _ => {}
        }
        let b = self.number(right)?;
        Ok(match op {
            BinOp::Add => a + b,
            BinOp::Sub => a - b,
            BinOp::Mul => a * b,
            BinOp::Div => a / b,
            BinOp::Rem => a % b,
            BinOp::Lt => truth(a < b),
            BinOp::Le => truth(a <= b),
            BinOp::Gt => truth(a > b),
            BinOp::Ge => truth(a >= b),
            BinOp::Eq => truth(a == b),
            BinOp::Ne => truth(a != b),
            BinOp::And | BinOp::Or => truth(b != 0.0),
        })
    }

    fn call(&mut self, function: Function, args: &[Expr]) -> Result<Value, ScriptError> {
        let mut n = [0.0f32; 4];
        for (slot, arg) in n.iter_mut().zip(args) {
            *slot = self.number(arg)?;
        }

        let value = match function {
            Function::Sin => n[0].sin(),
            Function::Cos => n[0].cos(),
            Function::Tan => n[0].tan(),
            Function::Abs => n[0].abs(),
            Function::Sqrt => n[0].sqrt(),
            Function::Pow => n[0].powf(n[1]),
            Function::Min => n[0].min(n[1]),
            Function::Max => n[0].max(n[1]),
            Function::Floor => n[0].floor(),
            Function::Ceil => n[0].ceil(),
            Function::Fract => n[0].fract(),
            Function::Clamp => n[0].max(n[1]).min(n[2]),
            Function::Mix => n[0] + (n[1] - n[0]) * n[2],
            Function::Bin => {
                if n[0] < 0.0 || !n[0].is_finite() {
                    0.0
                } else {
                    self.inputs.bins.get(n[0] as usize).copied().unwrap_or(0.0)
                }
            }
            Function::Random => self.rng.f32(),
            Function::Rgb => return Ok(Value::Color(rgba(channel(n[0]), channel(n[1]), channel(n[2]), 1.0))),
            Function::Rgba => return Ok(Value::Color(rgba(channel(n[0]), channel(n[1]), channel(n[2]), n[3]))),
            Function::Hsl => return Ok(Value::Color(hsla(n[0], n[1], n[2], 1.0))),
            Function::Hsla => return Ok(Value::Color(hsla(n[0], n[1], n[2], n[3]))),
        };
        Ok(Value::Number(value))
    }
}

fn truth(condition: bool) -> f32 {
    if condition {
        1.0
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs(bins: &[f32]) -> ScriptInputs<'_> {
        ScriptInputs {
            bins,
            bands: BandEnergies {
                bass: 10.0,
                mid: 20.0,
                treble: 30.0,
            },
            time: 1.5,
            width: 200.0,
            height: 100.0,
        }
    }

    fn run(source: &str) -> Result<Vec<DrawCommand>, ScriptError> {
        let script = Script::compile(source)?;
        let mut runtime = ScriptRuntime::new(1);
        let bins = [0.5, 0.25];
        runtime.run(&script, &inputs(&bins)).map(|c| c.to_vec())
    }

    #[test]
    fn missing_render_block_is_not_callable() {
        assert_eq!(Script::compile("").unwrap_err(), ScriptError::NotCallable);
        assert_eq!(Script::compile("// just a comment\n").unwrap_err(), ScriptError::NotCallable);
    }

    #[test]
    fn construction_errors_carry_lines() {
        match Script::compile("render {\n  circle(cx, cy, wobble);\n}").unwrap_err() {
            ScriptError::UnknownName { line, name } => {
                assert_eq!(line, 2);
                assert_eq!(name, "wobble");
            }
            other => panic!("unexpected error {other:?}"),
        }

        assert!(matches!(
            Script::compile("render { rect(1, 2, 3); }").unwrap_err(),
            ScriptError::Arity { expected: 4, found: 3, .. }
        ));
        assert!(matches!(
            Script::compile("render { let x = ; }").unwrap_err(),
            ScriptError::Syntax { line: 1, .. }
        ));
        assert!(matches!(
            Script::compile("render { bass = 2; }").unwrap_err(),
            ScriptError::Syntax { .. }
        ));
        assert!(matches!(
            Script::compile("render { } render { }").unwrap_err(),
            ScriptError::Syntax { .. }
        ));
    }

    #[test]
    fn draws_use_current_fill_and_stroke() {
        let commands = run(
            "render {
                fill(rgb(255, 0, 0));
                rect(0, 0, width, height / 2);
                stroke(hsl(120, 1, 0.5), 3);
                line(0, 0, cx, cy);
            }",
        )
        .unwrap();

        assert_eq!(commands.len(), 2);
        assert_eq!(
            commands[0],
            DrawCommand::Rect {
                x: 0.0,
                y: 0.0,
                width: 200.0,
                height: 50.0,
                color: rgba(255, 0, 0, 1.0),
            }
        );
        match commands[1] {
            DrawCommand::Line { to, line_width, .. } => {
                assert_eq!(to, Vec2::new(100.0, 50.0));
                assert_eq!(line_width, 3.0);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn loops_branches_and_bins() {
        let commands = run(
            "render {
                let total = 0;
                for i in 0 .. bin_count {
                    total = total + bin(i);
                }
                if total > 0.7 && energy == 20 {
                    circle(total, bin(99), 1);
                } else {
                    circle(0, 0, 1);
                }
            }",
        )
        .unwrap();

        assert_eq!(
            commands,
            vec![DrawCommand::Circle {
                center: Vec2::new(0.75, 0.0),
                radius: 1.0,
                color: Color::WHITE,
            }]
        );
    }

    #[test]
    fn runaway_loops_hit_the_budget() {
        let err = run("render { for i in 0 .. 100000000 { circle(i, i, 1); } }").unwrap_err();
        assert_eq!(err, ScriptError::BudgetExceeded(OP_BUDGET));
    }

    #[test]
    fn type_errors_are_runtime_errors() {
        let err = run("render {\n let c = rgb(1, 2, 3);\n circle(c, 0, 1);\n}").unwrap_err();
        assert!(matches!(err, ScriptError::Runtime { line: 3, .. }));
    }

    #[test]
    fn loop_variables_are_scoped_to_the_loop() {
        assert!(matches!(
            Script::compile("render { for i in 0 .. 3 { } circle(i, 0, 1); }").unwrap_err(),
            ScriptError::UnknownName { .. }
        ));
    }

    #[test]
    fn deeply_nested_input_is_rejected_not_overflowed() {
        let source = format!("render {{ circle({}1{}, 0, 1); }}", "(".repeat(500), ")".repeat(500));
        assert!(matches!(Script::compile(&source).unwrap_err(), ScriptError::Syntax { .. }));
    }
}
