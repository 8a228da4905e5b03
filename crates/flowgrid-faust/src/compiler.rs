//! The compiler seam and the built-in subset compiler.
//!
//! [`BoxCompiler`] is the boundary the rest of the system sees: source text
//! in, [`BoxDesc`] and [`DspFactory`] out. [`SubsetCompiler`] implements the
//! Faust core calculus — definitions, the five composition operators,
//! pointwise arithmetic, the one-sample delay, and the UI primitives — which
//! is enough to express the wiring DSPs the workstation ships with. Real
//! Faust toolchains can be slotted in behind the same trait.

use std::collections::HashMap;

use thiserror::Error;

use crate::boxes::{BinOp, BoxDesc, BoxExpr, DspParam, ParamKind};
use crate::dsp::DspFactory;

/// Errors from DSP compilation.
#[derive(Debug, Error)]
pub enum CompileError {
    /// Source text failed to parse.
    #[error("parse error at byte {offset}: {message}")]
    Parse {
        /// Byte offset of the failure.
        offset: usize,
        /// What went wrong.
        message: String,
    },

    /// The box algebra's side conditions rejected a composition.
    #[error("{0}")]
    BoxRule(String),

    /// `process` is not defined.
    #[error("no process definition")]
    NoProcess,

    /// An identifier has no definition.
    #[error("undefined identifier '{0}'")]
    Undefined(String),

    /// Definitions reference each other cyclically.
    #[error("cyclic definition of '{0}'")]
    Cyclic(String),

    /// The compiler finished without producing a box or an error.
    #[error("compiler returned no result")]
    NoResult,
}

/// The compiler boundary: source text to boxes, boxes to a factory.
pub trait BoxCompiler: Send {
    /// Compiles `code` to a box descriptor labeled `label`.
    ///
    /// `args` carries compiler flags (library include paths, `-double`);
    /// the subset compiler accepts and ignores them.
    fn compile_boxes(
        &self,
        label: &str,
        code: &str,
        args: &[String],
    ) -> Result<BoxDesc, CompileError>;

    /// Lowers a box descriptor into an executable factory.
    fn compile_factory(
        &self,
        label: &str,
        boxes: &BoxDesc,
        args: &[String],
        opt_level: i32,
    ) -> Result<DspFactory, CompileError>;
}

/// The built-in core-calculus compiler.
#[derive(Debug, Default)]
pub struct SubsetCompiler;

impl SubsetCompiler {
    /// A fresh compiler instance.
    pub fn new() -> Self {
        SubsetCompiler
    }
}

impl BoxCompiler for SubsetCompiler {
    fn compile_boxes(
        &self,
        label: &str,
        code: &str,
        _args: &[String],
    ) -> Result<BoxDesc, CompileError> {
        let statements = Parser::new(code)?.parse_program()?;
        let mut lowering = Lowering {
            definitions: &statements,
            in_progress: Vec::new(),
            params: Vec::new(),
        };
        let process = statements
            .get("process")
            .ok_or(CompileError::NoProcess)?
            .clone();
        let expr = lowering.lower(&process)?;
        Ok(BoxDesc::new(label, expr, lowering.params))
    }

    fn compile_factory(
        &self,
        label: &str,
        boxes: &BoxDesc,
        _args: &[String],
        _opt_level: i32,
    ) -> Result<DspFactory, CompileError> {
        Ok(DspFactory::new(label, boxes.clone()))
    }
}

/// Parsed-but-unresolved expression: identifiers still by name.
#[derive(Clone, Debug)]
enum RawExpr {
    Wire,
    Cut,
    Number(f32),
    Ident(String),
    Ui(ParamKind, DspParam),
    Unary(Box<RawExpr>),
    Binary(BinOp, Box<RawExpr>, Box<RawExpr>),
    Par(Box<RawExpr>, Box<RawExpr>),
    Seq(Box<RawExpr>, Box<RawExpr>),
    Split(Box<RawExpr>, Box<RawExpr>),
    Merge(Box<RawExpr>, Box<RawExpr>),
    Rec(Box<RawExpr>, Box<RawExpr>),
    Delay1(Box<RawExpr>),
}

/// Resolves identifiers and UI primitives, producing the final box.
struct Lowering<'a> {
    definitions: &'a HashMap<String, RawExpr>,
    in_progress: Vec<String>,
    params: Vec<DspParam>,
}

impl Lowering<'_> {
    fn lower(&mut self, raw: &RawExpr) -> Result<BoxExpr, CompileError> {
        match raw {
            RawExpr::Wire => Ok(BoxExpr::Wire),
            RawExpr::Cut => Ok(BoxExpr::Cut),
            RawExpr::Number(v) => Ok(BoxExpr::Number(*v)),
            RawExpr::Ident(name) => {
                if self.in_progress.iter().any(|n| n == name) {
                    return Err(CompileError::Cyclic(name.clone()));
                }
                let definition = self
                    .definitions
                    .get(name)
                    .ok_or_else(|| CompileError::Undefined(name.clone()))?;
                self.in_progress.push(name.clone());
                let lowered = self.lower(definition);
                self.in_progress.pop();
                lowered
            }
            RawExpr::Ui(_, param) => {
                self.params.push(param.clone());
                Ok(BoxExpr::Param(self.params.len() - 1))
            }
            RawExpr::Unary(inner) => {
                let inner = self.lower(inner)?;
                BoxExpr::binary(BinOp::Sub, BoxExpr::Number(0.0), inner)
            }
            RawExpr::Binary(op, l, r) => {
                let (l, r) = (self.lower(l)?, self.lower(r)?);
                BoxExpr::binary(*op, l, r)
            }
            RawExpr::Par(l, r) => Ok(BoxExpr::par(self.lower(l)?, self.lower(r)?)),
            RawExpr::Seq(l, r) => BoxExpr::seq(self.lower(l)?, self.lower(r)?),
            RawExpr::Split(l, r) => BoxExpr::split(self.lower(l)?, self.lower(r)?),
            RawExpr::Merge(l, r) => BoxExpr::merge(self.lower(l)?, self.lower(r)?),
            RawExpr::Rec(l, r) => BoxExpr::rec(self.lower(l)?, self.lower(r)?),
            RawExpr::Delay1(inner) => BoxExpr::delay1(self.lower(inner)?),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Ident(String),
    Number(f32),
    Str(String),
    Wire,      // _
    Cut,       // !
    Comma,     // ,
    Colon,     // :
    SplitOp,   // <:
    MergeOp,   // :>
    Tilde,     // ~
    Quote,     // '
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    LParen,
    RParen,
    Equals,
    Semi,
}

struct Lexer<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    fn tokenize(src: &'a str) -> Result<Vec<(usize, Token)>, CompileError> {
        let mut lexer = Lexer { src, pos: 0 };
        let mut tokens = Vec::new();
        while let Some((offset, token)) = lexer.next_token()? {
            tokens.push((offset, token));
        }
        Ok(tokens)
    }

    fn next_token(&mut self) -> Result<Option<(usize, Token)>, CompileError> {
        loop {
            let rest = &self.src[self.pos..];
            let Some(c) = rest.chars().next() else {
                return Ok(None);
            };
            if c.is_whitespace() {
                self.pos += c.len_utf8();
                continue;
            }
            if rest.starts_with("//") {
                match rest.find('\n') {
                    Some(n) => self.pos += n + 1,
                    None => self.pos = self.src.len(),
                }
                continue;
            }
            if rest.starts_with("/*") {
                match rest[2..].find("*/") {
                    Some(n) => self.pos += n + 4,
                    None => {
                        return Err(CompileError::Parse {
                            offset: self.pos,
                            message: "unterminated block comment".to_owned(),
                        });
                    }
                }
                continue;
            }
            break;
        }

        let start = self.pos;
        let rest = &self.src[start..];
        let c = rest.chars().next().expect("checked non-empty");

        let simple = |this: &mut Self, len: usize, token: Token| {
            this.pos += len;
            Ok(Some((start, token)))
        };

        if rest.starts_with("<:") {
            return simple(self, 2, Token::SplitOp);
        }
        if rest.starts_with(":>") {
            return simple(self, 2, Token::MergeOp);
        }
        match c {
            '_' => return simple(self, 1, Token::Wire),
            '!' => return simple(self, 1, Token::Cut),
            ',' => return simple(self, 1, Token::Comma),
            ':' => return simple(self, 1, Token::Colon),
            '~' => return simple(self, 1, Token::Tilde),
            '\'' => return simple(self, 1, Token::Quote),
            '+' => return simple(self, 1, Token::Plus),
            '-' => return simple(self, 1, Token::Minus),
            '*' => return simple(self, 1, Token::Star),
            '/' => return simple(self, 1, Token::Slash),
            '%' => return simple(self, 1, Token::Percent),
            '(' => return simple(self, 1, Token::LParen),
            ')' => return simple(self, 1, Token::RParen),
            '=' => return simple(self, 1, Token::Equals),
            ';' => return simple(self, 1, Token::Semi),
            '"' => {
                let Some(end) = rest[1..].find('"') else {
                    return Err(CompileError::Parse {
                        offset: start,
                        message: "unterminated string".to_owned(),
                    });
                };
                self.pos += end + 2;
                return Ok(Some((start, Token::Str(rest[1..=end].to_owned()))));
            }
            _ => {}
        }
        if c.is_ascii_digit() {
            let len = rest
                .find(|ch: char| !(ch.is_ascii_digit() || ch == '.'))
                .unwrap_or(rest.len());
            let value: f32 = rest[..len].parse().map_err(|_| CompileError::Parse {
                offset: start,
                message: format!("malformed number '{}'", &rest[..len]),
            })?;
            self.pos += len;
            return Ok(Some((start, Token::Number(value))));
        }
        if c.is_ascii_alphabetic() {
            let len = rest
                .find(|ch: char| !(ch.is_ascii_alphanumeric() || ch == '_'))
                .unwrap_or(rest.len());
            self.pos += len;
            return Ok(Some((start, Token::Ident(rest[..len].to_owned()))));
        }
        Err(CompileError::Parse {
            offset: start,
            message: format!("unexpected character '{c}'"),
        })
    }
}

struct Parser {
    tokens: Vec<(usize, Token)>,
    index: usize,
    end_offset: usize,
}

impl Parser {
    fn new(src: &str) -> Result<Self, CompileError> {
        let tokens = Lexer::tokenize(src)?;
        Ok(Parser {
            tokens,
            index: 0,
            end_offset: src.len(),
        })
    }

    fn parse_program(mut self) -> Result<HashMap<String, RawExpr>, CompileError> {
        let mut definitions = HashMap::new();
        while self.peek().is_some() {
            match self.peek() {
                Some(Token::Ident(name)) if name == "import" || name == "declare" => {
                    self.skip_statement();
                }
                Some(Token::Ident(_)) => {
                    let (name, expr) = self.parse_definition()?;
                    definitions.insert(name, expr);
                }
                _ => {
                    return Err(self.error_here("expected a definition"));
                }
            }
        }
        Ok(definitions)
    }

    fn parse_definition(&mut self) -> Result<(String, RawExpr), CompileError> {
        let Some(Token::Ident(name)) = self.next() else {
            return Err(self.error_here("expected an identifier"));
        };
        self.expect(&Token::Equals, "expected '='")?;
        let expr = self.parse_expr()?;
        self.expect(&Token::Semi, "expected ';'")?;
        Ok((name, expr))
    }

    /// Lowest precedence: split and merge.
    fn parse_expr(&mut self) -> Result<RawExpr, CompileError> {
        let mut left = self.parse_seq()?;
        loop {
            match self.peek() {
                Some(Token::SplitOp) => {
                    self.next();
                    let right = self.parse_seq()?;
                    left = RawExpr::Split(Box::new(left), Box::new(right));
                }
                Some(Token::MergeOp) => {
                    self.next();
                    let right = self.parse_seq()?;
                    left = RawExpr::Merge(Box::new(left), Box::new(right));
                }
                _ => return Ok(left),
            }
        }
    }

    fn parse_seq(&mut self) -> Result<RawExpr, CompileError> {
        let mut left = self.parse_par()?;
        while matches!(self.peek(), Some(Token::Colon)) {
            self.next();
            let right = self.parse_par()?;
            left = RawExpr::Seq(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_par(&mut self) -> Result<RawExpr, CompileError> {
        let mut left = self.parse_rec()?;
        while matches!(self.peek(), Some(Token::Comma)) {
            self.next();
            let right = self.parse_rec()?;
            left = RawExpr::Par(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_rec(&mut self) -> Result<RawExpr, CompileError> {
        let mut left = self.parse_additive()?;
        while matches!(self.peek(), Some(Token::Tilde)) {
            self.next();
            let right = self.parse_additive()?;
            left = RawExpr::Rec(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<RawExpr, CompileError> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => return Ok(left),
            };
            self.next();
            let right = self.parse_multiplicative()?;
            left = RawExpr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn parse_multiplicative(&mut self) -> Result<RawExpr, CompileError> {
        let mut left = self.parse_postfix()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinOp::Mul,
                Some(Token::Slash) => BinOp::Div,
                Some(Token::Percent) => BinOp::Rem,
                _ => return Ok(left),
            };
            self.next();
            let right = self.parse_postfix()?;
            left = RawExpr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn parse_postfix(&mut self) -> Result<RawExpr, CompileError> {
        let mut expr = self.parse_primary()?;
        while matches!(self.peek(), Some(Token::Quote)) {
            self.next();
            expr = RawExpr::Delay1(Box::new(expr));
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<RawExpr, CompileError> {
        match self.next() {
            Some(Token::Wire) => Ok(RawExpr::Wire),
            Some(Token::Cut) => Ok(RawExpr::Cut),
            Some(Token::Number(v)) => Ok(RawExpr::Number(v)),
            Some(Token::Minus) => {
                let inner = self.parse_postfix()?;
                Ok(RawExpr::Unary(Box::new(inner)))
            }
            Some(Token::LParen) => {
                let expr = self.parse_expr()?;
                self.expect(&Token::RParen, "expected ')'")?;
                Ok(expr)
            }
            Some(Token::Ident(name)) => match ui_kind(&name) {
                Some(kind) => self.parse_ui(kind),
                None => Ok(RawExpr::Ident(name)),
            },
            _ => Err(self.error_here("expected an expression")),
        }
    }

    fn parse_ui(&mut self, kind: ParamKind) -> Result<RawExpr, CompileError> {
        self.expect(&Token::LParen, "expected '(' after UI primitive")?;
        let Some(Token::Str(label)) = self.next() else {
            return Err(self.error_here("expected a string label"));
        };
        let param = match kind {
            ParamKind::Button | ParamKind::Checkbox => DspParam {
                label,
                kind,
                init: 0.0,
                min: 0.0,
                max: 1.0,
                step: 0.0,
            },
            ParamKind::HSlider | ParamKind::VSlider | ParamKind::NumEntry => {
                let mut values = [0.0f32; 4];
                for slot in &mut values {
                    self.expect(&Token::Comma, "expected ','")?;
                    *slot = self.parse_signed_number()?;
                }
                DspParam {
                    label,
                    kind,
                    init: values[0],
                    min: values[1],
                    max: values[2],
                    step: values[3],
                }
            }
        };
        self.expect(&Token::RParen, "expected ')'")?;
        Ok(RawExpr::Ui(kind, param))
    }

    fn parse_signed_number(&mut self) -> Result<f32, CompileError> {
        match self.next() {
            Some(Token::Number(v)) => Ok(v),
            Some(Token::Minus) => match self.next() {
                Some(Token::Number(v)) => Ok(-v),
                _ => Err(self.error_here("expected a number")),
            },
            _ => Err(self.error_here("expected a number")),
        }
    }

    fn skip_statement(&mut self) {
        while let Some(token) = self.next() {
            if token == Token::Semi {
                break;
            }
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.index).map(|(_, t)| t)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.index).map(|(_, t)| t.clone());
        if token.is_some() {
            self.index += 1;
        }
        token
    }

    fn expect(&mut self, token: &Token, message: &str) -> Result<(), CompileError> {
        if self.peek() == Some(token) {
            self.next();
            Ok(())
        } else {
            Err(self.error_here(message))
        }
    }

    fn error_here(&self, message: &str) -> CompileError {
        let offset = self
            .tokens
            .get(self.index)
            .map_or(self.end_offset, |(o, _)| *o);
        CompileError::Parse {
            offset,
            message: message.to_owned(),
        }
    }
}

fn ui_kind(name: &str) -> Option<ParamKind> {
    match name {
        "hslider" => Some(ParamKind::HSlider),
        "vslider" => Some(ParamKind::VSlider),
        "nentry" => Some(ParamKind::NumEntry),
        "button" => Some(ParamKind::Button),
        "checkbox" => Some(ParamKind::Checkbox),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile(code: &str) -> Result<BoxDesc, CompileError> {
        SubsetCompiler::new().compile_boxes("test", code, &[])
    }

    #[test]
    fn identity_process() {
        let desc = compile("process = _;").unwrap();
        assert_eq!((desc.inputs, desc.outputs), (1, 1));
    }

    #[test]
    fn stereo_wires() {
        let desc = compile("process = _,_;").unwrap();
        assert_eq!((desc.inputs, desc.outputs), (2, 2));
    }

    #[test]
    fn mono_to_stereo_split() {
        let desc = compile("process = _ <: _,_;").unwrap();
        assert_eq!((desc.inputs, desc.outputs), (1, 2));
    }

    #[test]
    fn gain_with_slider() {
        let desc = compile(r#"process = _ * hslider("gain", 0.5, 0, 1, 0.01);"#).unwrap();
        assert_eq!((desc.inputs, desc.outputs), (1, 1));
        assert_eq!(desc.params.len(), 1);
        assert_eq!(desc.params[0].label, "gain");
        assert_eq!(desc.params[0].init, 0.5);
    }

    #[test]
    fn definitions_resolve() {
        let desc = compile("gain = 0.25;\nprocess = _ * gain;").unwrap();
        assert_eq!((desc.inputs, desc.outputs), (1, 1));
    }

    #[test]
    fn imports_are_ignored() {
        let desc = compile("import(\"stdfaust.lib\");\nprocess = _;").unwrap();
        assert_eq!((desc.inputs, desc.outputs), (1, 1));
    }

    #[test]
    fn comma_binds_tighter_than_seq() {
        // _,_ : _,_ must parse as (_,_) : (_,_).
        let desc = compile("process = _,_ : _,_;").unwrap();
        assert_eq!((desc.inputs, desc.outputs), (2, 2));
    }

    #[test]
    fn recursion_and_delay() {
        // A one-pole feedback accumulator.
        let desc = compile("process = (_ + _) ~ _';").unwrap();
        assert_eq!((desc.inputs, desc.outputs), (1, 1));
    }

    #[test]
    fn missing_process_is_an_error() {
        assert!(matches!(compile("x = _;"), Err(CompileError::NoProcess)));
    }

    #[test]
    fn parse_error_carries_offset() {
        let err = compile("process = $;").unwrap_err();
        match err {
            CompileError::Parse { offset, .. } => assert_eq!(offset, 10),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn arity_mismatch_is_a_box_rule_error() {
        let err = compile("process = (_,_) : _;").unwrap_err();
        assert!(matches!(err, CompileError::BoxRule(_)));
    }

    #[test]
    fn cyclic_definitions_are_rejected() {
        let err = compile("a = b; b = a; process = a;").unwrap_err();
        assert!(matches!(err, CompileError::Cyclic(_)));
    }

    #[test]
    fn unknown_identifier_is_reported() {
        let err = compile("process = mystery;").unwrap_err();
        assert!(matches!(err, CompileError::Undefined(_)));
    }
}
