//! Arithmetic tool backed by a small recursive-descent evaluator.
//!
//! Grammar, lowest precedence first:
//!
//! ```text
//! expr    := term (('+' | '-') term)*
//! term    := unary (('*' | '/' | '%') unary)*
//! unary   := ('+' | '-') unary | power
//! power   := primary ('^' unary)?
//! primary := number | ident | ident '(' expr (',' expr)* ')' | '(' expr ')'
//! ```
//!
//! Trigonometric functions take degrees.

use crate::tool::{Tool, ToolError, required_str};
use async_trait::async_trait;
use chrono::Utc;
use gemini_realtime::{FunctionDeclaration, ToolDeclaration};
use serde_json::{Value, json};
use tracing::info;

pub const FUNCTION_NAME: &str = "calculate";

/// Deepest nesting of parentheses, function calls, signs and exponents.
pub const MAX_NESTING: usize = 64;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Op(char),
    LParen,
    RParen,
    Comma,
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '0'..='9' | '.' => {
                let mut literal = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_digit() || d == '.' {
                        literal.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let value = literal
                    .parse::<f64>()
                    .map_err(|_| format!("invalid number '{literal}'"))?;
                tokens.push(Token::Number(value));
            }
            c if c.is_ascii_alphabetic() => {
                let mut ident = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_alphanumeric() || d == '_' {
                        ident.push(d.to_ascii_lowercase());
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(ident));
            }
            '+' | '-' | '*' | '/' | '%' | '^' => {
                tokens.push(Token::Op(c));
                chars.next();
            }
            '(' => {
                tokens.push(Token::LParen);
                chars.next();
            }
            ')' => {
                tokens.push(Token::RParen);
                chars.next();
            }
            ',' => {
                tokens.push(Token::Comma);
                chars.next();
            }
            other => return Err(format!("unexpected character '{other}'")),
        }
    }
    Ok(tokens)
}

/// Why an expression could not be evaluated.
#[derive(Debug, Clone, PartialEq)]
pub enum EvalError {
    Syntax(String),
    Math(String),
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expect(&mut self, expected: Token) -> Result<(), EvalError> {
        match self.next() {
            Some(t) if t == expected => Ok(()),
            Some(t) => Err(EvalError::Syntax(format!(
                "expected {expected:?}, found {t:?}"
            ))),
            None => Err(EvalError::Syntax(format!(
                "expected {expected:?}, found end of input"
            ))),
        }
    }

    fn expr(&mut self) -> Result<f64, EvalError> {
        let mut value = self.term()?;
        while let Some(Token::Op(op @ ('+' | '-'))) = self.peek().cloned() {
            self.pos += 1;
            let rhs = self.term()?;
            value = if op == '+' { value + rhs } else { value - rhs };
        }
        Ok(value)
    }

    fn term(&mut self) -> Result<f64, EvalError> {
        let mut value = self.unary()?;
        while let Some(Token::Op(op @ ('*' | '/' | '%'))) = self.peek().cloned() {
            self.pos += 1;
            let rhs = self.unary()?;
            value = match op {
                '*' => value * rhs,
                _ if rhs == 0.0 => return Err(EvalError::Math("division by zero".into())),
                '/' => value / rhs,
                _ => value % rhs,
            };
        }
        Ok(value)
    }

    /// Every nested sub-expression passes through here, so this bounds recursion.
    fn unary(&mut self) -> Result<f64, EvalError> {
        if self.depth >= MAX_NESTING {
            return Err(EvalError::Syntax("expression nested too deeply".into()));
        }
        self.depth += 1;
        let value = self.signed();
        self.depth -= 1;
        value
    }

    fn signed(&mut self) -> Result<f64, EvalError> {
        match self.peek() {
            Some(Token::Op('-')) => {
                self.pos += 1;
                Ok(-self.unary()?)
            }
            Some(Token::Op('+')) => {
                self.pos += 1;
                self.unary()
            }
            _ => self.power(),
        }
    }

    fn power(&mut self) -> Result<f64, EvalError> {
        let base = self.primary()?;
        if let Some(Token::Op('^')) = self.peek() {
            self.pos += 1;
            let exponent = self.unary()?;
            return Ok(base.powf(exponent));
        }
        Ok(base)
    }

    fn primary(&mut self) -> Result<f64, EvalError> {
        match self.next() {
            Some(Token::Number(n)) => Ok(n),
            Some(Token::LParen) => {
                let value = self.expr()?;
                self.expect(Token::RParen)?;
                Ok(value)
            }
            Some(Token::Ident(name)) => {
                if let Some(Token::LParen) = self.peek() {
                    self.pos += 1;
                    let mut args = vec![self.expr()?];
                    while let Some(Token::Comma) = self.peek() {
                        self.pos += 1;
                        args.push(self.expr()?);
                    }
                    self.expect(Token::RParen)?;
                    apply_function(&name, &args)
                } else {
                    constant(&name)
                }
            }
            Some(t) => Err(EvalError::Syntax(format!("unexpected {t:?}"))),
            None => Err(EvalError::Syntax("unexpected end of input".into())),
        }
    }
}

fn constant(name: &str) -> Result<f64, EvalError> {
    match name {
        "pi" => Ok(std::f64::consts::PI),
        "e" => Ok(std::f64::consts::E),
        other => Err(EvalError::Syntax(format!("unknown constant '{other}'"))),
    }
}

fn apply_function(name: &str, args: &[f64]) -> Result<f64, EvalError> {
    let unary = |f: fn(f64) -> f64| -> Result<f64, EvalError> {
        match args {
            [x] => Ok(f(*x)),
            _ => Err(EvalError::Syntax(format!(
                "{name}() takes 1 argument, got {}",
                args.len()
            ))),
        }
    };
    match name {
        "sqrt" => match args {
            [x] if *x < 0.0 => Err(EvalError::Math("square root of a negative number".into())),
            _ => unary(f64::sqrt),
        },
        "abs" => unary(f64::abs),
        "sin" => unary(|d| d.to_radians().sin()),
        "cos" => unary(|d| d.to_radians().cos()),
        "tan" => unary(|d| d.to_radians().tan()),
        "ln" => unary(f64::ln),
        "log" => unary(f64::log10),
        "exp" => unary(f64::exp),
        "floor" => unary(f64::floor),
        "ceil" => unary(f64::ceil),
        "round" => unary(f64::round),
        "min" | "max" if args.is_empty() => {
            Err(EvalError::Syntax(format!("{name}() needs at least 1 argument")))
        }
        "min" => Ok(args.iter().copied().fold(f64::INFINITY, f64::min)),
        "max" => Ok(args.iter().copied().fold(f64::NEG_INFINITY, f64::max)),
        other => Err(EvalError::Syntax(format!("unknown function '{other}'"))),
    }
}

/// Evaluates `expression`. The result is always finite.
pub fn evaluate(expression: &str) -> Result<f64, EvalError> {
    let tokens = tokenize(expression).map_err(EvalError::Syntax)?;
    if tokens.is_empty() {
        return Err(EvalError::Syntax("empty expression".into()));
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let value = parser.expr()?;
    if let Some(t) = parser.peek() {
        return Err(EvalError::Syntax(format!("unexpected trailing {t:?}")));
    }
    if !value.is_finite() {
        return Err(EvalError::Math("result is not a finite number".into()));
    }
    Ok(value)
}

fn is_integral(value: f64) -> bool {
    value.fract() == 0.0 && value.abs() < 1e21
}

/// Human-readable rendering: integers plainly, tiny or huge magnitudes in
/// exponent form, everything else with up to six decimals.
pub fn format_result(value: f64) -> String {
    if is_integral(value) {
        return format!("{value:.0}");
    }
    if value.abs() < 0.001 || value.abs() > 1e10 {
        return format!("{value:.6e}");
    }
    let fixed = format!("{value:.6}");
    fixed.trim_end_matches('0').trim_end_matches('.').to_string()
}

/// Integral values become JSON integers so `2+2` yields `4`, not `4.0`.
fn result_value(value: f64) -> Value {
    if is_integral(value) && value.abs() <= i64::MAX as f64 {
        json!(value as i64)
    } else {
        json!(value)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CalculatorTool;

#[async_trait]
impl Tool for CalculatorTool {
    fn declaration(&self) -> ToolDeclaration {
        ToolDeclaration::FunctionDeclarations(vec![FunctionDeclaration {
            name: FUNCTION_NAME.to_string(),
            description: "Perform mathematical calculations with basic arithmetic operations"
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "expression": {
                        "type": "string",
                        "description": "Mathematical expression to evaluate (e.g., '2 + 3 * 4', 'sqrt(16)', 'sin(30)')"
                    }
                },
                "required": ["expression"]
            }),
        }])
    }

    fn aliases(&self) -> Vec<String> {
        vec![FUNCTION_NAME.to_string()]
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        let expression = required_str(&args, "expression")?;
        info!(%expression, "Executing calculator tool.");

        let value = evaluate(expression).map_err(|e| match e {
            EvalError::Syntax(msg) => {
                ToolError::InvalidParameter(format!("Invalid mathematical expression: {msg}"))
            }
            EvalError::Math(msg) => ToolError::Execution(format!("Calculation failed: {msg}")),
        })?;

        Ok(json!({
            "expression": expression,
            "result": result_value(value),
            "formatted": format_result(value),
            "timestamp": Utc::now().to_rfc3339(),
        }))
    }
}
