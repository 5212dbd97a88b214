//! Condition expressions over prior step outcomes.
//!
//! Grammar: `steps.<id>.passed`, `steps.<id>.skipped`, `true`, `false`,
//! combined with `&&`, `||`, `!`, and parentheses. Implemented as an
//! explicit tokenizer and recursive-descent parser; condition text comes
//! from definition documents and is never handed to an evaluator of the
//! host language.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExpressionError {
    #[error("invalid condition expression: {0}")]
    Syntax(String),
}

/// Outcome flags for one completed step, as seen by later conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepFlags {
    pub passed: bool,
    pub skipped: bool,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    And,
    Or,
    Not,
    LeftParen,
    RightParen,
}

#[derive(Debug, Clone, PartialEq)]
enum Expression {
    Literal(bool),
    StepPassed(String),
    StepSkipped(String),
    Not(Box<Expression>),
    And(Box<Expression>, Box<Expression>),
    Or(Box<Expression>, Box<Expression>),
}

/// Evaluate `input` against the ledger exposed by `lookup`.
///
/// References to steps the lookup does not know (including forward
/// references) evaluate to `false`. Expressions containing characters
/// outside the allowed set are rejected as `false` without parsing;
/// syntactically invalid expressions inside the allowed set are errors
/// so the caller can surface a configuration failure.
pub fn evaluate(
    input: &str,
    lookup: &dyn Fn(&str) -> Option<StepFlags>,
) -> Result<bool, ExpressionError> {
    if !input.chars().all(is_allowed_char) {
        tracing::warn!("Rejecting condition with disallowed characters: {input}");
        return Ok(false);
    }

    let mut tokens = tokenize(input)?;
    let expr = parse_or(&mut tokens)?;
    if !tokens.is_empty() {
        return Err(ExpressionError::Syntax(format!(
            "unexpected trailing input in '{input}'"
        )));
    }
    Ok(eval(&expr, lookup))
}

fn is_allowed_char(c: char) -> bool {
    c.is_ascii_alphanumeric()
        || c.is_ascii_whitespace()
        || matches!(c, '_' | '-' | '.' | '&' | '|' | '!' | '(' | ')')
}

fn tokenize(input: &str) -> Result<Vec<Token>, ExpressionError> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&ch) = chars.peek() {
        match ch {
            c if c.is_ascii_whitespace() => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::LeftParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RightParen);
            }
            '!' => {
                chars.next();
                tokens.push(Token::Not);
            }
            '&' => {
                chars.next();
                if chars.peek() == Some(&'&') {
                    chars.next();
                    tokens.push(Token::And);
                } else {
                    return Err(ExpressionError::Syntax("expected '&&'".to_string()));
                }
            }
            '|' => {
                chars.next();
                if chars.peek() == Some(&'|') {
                    chars.next();
                    tokens.push(Token::Or);
                } else {
                    return Err(ExpressionError::Syntax("expected '||'".to_string()));
                }
            }
            c if c.is_ascii_alphanumeric() || c == '_' => {
                tokens.push(Token::Word(consume_word(&mut chars)));
            }
            c => {
                return Err(ExpressionError::Syntax(format!("unexpected character '{c}'")));
            }
        }
    }

    Ok(tokens)
}

fn consume_word(chars: &mut std::iter::Peekable<std::str::Chars>) -> String {
    let mut result = String::new();
    while let Some(&ch) = chars.peek() {
        if ch.is_ascii_alphanumeric() || matches!(ch, '_' | '-' | '.') {
            result.push(ch);
            chars.next();
        } else {
            break;
        }
    }
    result
}

fn parse_or(tokens: &mut Vec<Token>) -> Result<Expression, ExpressionError> {
    let mut left = parse_and(tokens)?;

    while tokens.first() == Some(&Token::Or) {
        tokens.remove(0);
        let right = parse_and(tokens)?;
        left = Expression::Or(Box::new(left), Box::new(right));
    }

    Ok(left)
}

fn parse_and(tokens: &mut Vec<Token>) -> Result<Expression, ExpressionError> {
    let mut left = parse_unary(tokens)?;

    while tokens.first() == Some(&Token::And) {
        tokens.remove(0);
        let right = parse_unary(tokens)?;
        left = Expression::And(Box::new(left), Box::new(right));
    }

    Ok(left)
}

fn parse_unary(tokens: &mut Vec<Token>) -> Result<Expression, ExpressionError> {
    if tokens.is_empty() {
        return Err(ExpressionError::Syntax("unexpected end of expression".to_string()));
    }

    match tokens.remove(0) {
        Token::Not => {
            let inner = parse_unary(tokens)?;
            Ok(Expression::Not(Box::new(inner)))
        }
        Token::LeftParen => {
            let inner = parse_or(tokens)?;
            if tokens.is_empty() || tokens.remove(0) != Token::RightParen {
                return Err(ExpressionError::Syntax(
                    "expected closing parenthesis".to_string(),
                ));
            }
            Ok(inner)
        }
        Token::Word(word) => parse_terminal(&word),
        token => Err(ExpressionError::Syntax(format!(
            "unexpected token {token:?}"
        ))),
    }
}

fn parse_terminal(word: &str) -> Result<Expression, ExpressionError> {
    match word {
        "true" => return Ok(Expression::Literal(true)),
        "false" => return Ok(Expression::Literal(false)),
        _ => {}
    }

    if let Some(rest) = word.strip_prefix("steps.") {
        if let Some(id) = rest.strip_suffix(".passed") {
            if !id.is_empty() {
                return Ok(Expression::StepPassed(id.to_string()));
            }
        }
        if let Some(id) = rest.strip_suffix(".skipped") {
            if !id.is_empty() {
                return Ok(Expression::StepSkipped(id.to_string()));
            }
        }
    }

    Err(ExpressionError::Syntax(format!("unknown terminal '{word}'")))
}

fn eval(expr: &Expression, lookup: &dyn Fn(&str) -> Option<StepFlags>) -> bool {
    match expr {
        Expression::Literal(value) => *value,
        Expression::StepPassed(id) => lookup(id).map(|f| f.passed).unwrap_or(false),
        Expression::StepSkipped(id) => lookup(id).map(|f| f.skipped).unwrap_or(false),
        Expression::Not(inner) => !eval(inner, lookup),
        Expression::And(left, right) => eval(left, lookup) && eval(right, lookup),
        Expression::Or(left, right) => eval(left, lookup) || eval(right, lookup),
    }
}
