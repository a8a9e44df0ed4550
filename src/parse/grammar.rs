use std::cell::Cell;

use thiserror::Error;
use winnow::ascii::{digit1, till_line_ending};
use winnow::combinator::{alt, cut_err, delimited, opt, preceded, repeat, separated, terminated};
use winnow::error::{
    ContextError, ErrMode, FromExternalError, ModalResult, StrContext, StrContextValue,
};
use winnow::prelude::*;
use winnow::token::{any, one_of, take_while};

use crate::{BinaryOp, Expr, Literal, RuleSource, UnaryOp, MAX_DEPTH};

use super::error::ParseError;
use super::parser::ParsedRules;

// -- Nesting ----------------------------------------------------------------

#[derive(Debug, Error)]
#[error("expression nests deeper than {} levels", MAX_DEPTH)]
struct TooDeep;

fn too_deep(input: &&str) -> ErrMode<ContextError> {
    ErrMode::<ContextError>::from_external_error(input, TooDeep).cut()
}

thread_local! {
    static NESTING: Cell<usize> = const { Cell::new(0) };
}

/// One level of parser recursion, released on drop.
struct Nesting;

impl Nesting {
    fn enter(input: &&str) -> ModalResult<Self> {
        let depth = NESTING.with(|n| {
            n.set(n.get() + 1);
            n.get()
        });
        let guard = Nesting;
        if depth > MAX_DEPTH {
            return Err(too_deep(input));
        }
        Ok(guard)
    }
}

impl Drop for Nesting {
    fn drop(&mut self) {
        NESTING.with(|n| n.set(n.get().saturating_sub(1)));
    }
}

/// Depth of a new node whose deepest child has depth `below`.
fn deepen(input: &&str, below: usize) -> ModalResult<usize> {
    if below >= MAX_DEPTH {
        return Err(too_deep(input));
    }
    Ok(below + 1)
}

// -- Whitespace & comments --------------------------------------------------

fn ws(input: &mut &str) -> ModalResult<()> {
    let _: () = repeat(
        0..,
        alt((
            take_while(1.., |c: char| c.is_ascii_whitespace()).void(),
            ("//", till_line_ending).void(),
        )),
    )
    .parse_next(input)?;
    Ok(())
}

// -- Identifiers ------------------------------------------------------------

fn ident<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    (
        take_while(1.., |c: char| c.is_ascii_alphabetic() || c == '_'),
        take_while(0.., |c: char| c.is_ascii_alphanumeric() || c == '_'),
    )
        .take()
        .parse_next(input)
}

// -- Literals ---------------------------------------------------------------

fn string_literal(input: &mut &str) -> ModalResult<String> {
    let quote = one_of(['"', '\'']).parse_next(input)?;
    let mut s = String::new();
    loop {
        let ch = cut_err(any)
            .context(StrContext::Expected(StrContextValue::Description(
                "closing quote",
            )))
            .parse_next(input)?;
        if ch == quote {
            return Ok(s);
        }
        if ch == '\\' {
            let esc = cut_err(any).parse_next(input)?;
            match esc {
                'n' => s.push('\n'),
                't' => s.push('\t'),
                'r' => s.push('\r'),
                '\\' | '\'' | '"' => s.push(esc),
                other => {
                    s.push('\\');
                    s.push(other);
                }
            }
        } else {
            s.push(ch);
        }
    }
}

fn number(input: &mut &str) -> ModalResult<Literal> {
    let text = (
        digit1,
        opt(('.', digit1)),
        opt((one_of(['e', 'E']), opt(one_of(['+', '-'])), digit1)),
    )
        .take()
        .parse_next(input)?;
    if text.contains(['.', 'e', 'E']) {
        text.parse::<f64>()
            .map(Literal::Float)
            .map_err(|_| ErrMode::from_input(input).cut())
    } else {
        text.parse::<i64>()
            .map(Literal::Int)
            .map_err(|_| ErrMode::from_input(input).cut())
    }
}

fn list_literal(input: &mut &str) -> ModalResult<Expr> {
    '['.parse_next(input)?;
    let items: Vec<Expr> = separated(0.., expression, (ws, ',')).parse_next(input)?;
    cut_err((ws, ']'))
        .context(StrContext::Expected(StrContextValue::CharLiteral(']')))
        .parse_next(input)?;
    Ok(Expr::List(items))
}

/// Call arguments, after the opening parenthesis.
fn arguments(input: &mut &str) -> ModalResult<Vec<Expr>> {
    let args: Vec<Expr> = separated(0.., expression, (ws, ',')).parse_next(input)?;
    cut_err((ws, ')'))
        .context(StrContext::Expected(StrContextValue::CharLiteral(')')))
        .parse_next(input)?;
    Ok(args)
}

// -- Primary & postfix ------------------------------------------------------

fn ident_or_call(input: &mut &str) -> ModalResult<Expr> {
    let name = ident.parse_next(input)?;
    match name {
        "true" => return Ok(Expr::Literal(Literal::Bool(true))),
        "false" => return Ok(Expr::Literal(Literal::Bool(false))),
        _ => {}
    }
    let checkpoint = input.checkpoint();
    ws.parse_next(input)?;
    if opt('(').parse_next(input)?.is_some() {
        let args = arguments.parse_next(input)?;
        Ok(Expr::Call {
            target: None,
            function: name.to_owned(),
            args,
        })
    } else {
        input.reset(&checkpoint);
        Ok(Expr::Ident(name.to_owned()))
    }
}

fn primary(input: &mut &str) -> ModalResult<Expr> {
    ws.parse_next(input)?;
    alt((
        delimited('(', cut_err(expression), cut_err((ws, ')'))),
        list_literal,
        number.map(Expr::Literal),
        string_literal.map(|s| Expr::Literal(Literal::String(s))),
        ident_or_call,
    ))
    .context(StrContext::Expected(StrContextValue::Description(
        "expression",
    )))
    .parse_next(input)
}

fn member(input: &mut &str) -> ModalResult<Expr> {
    let mut expr = primary(input)?;
    let mut depth = expr.depth();
    loop {
        let checkpoint = input.checkpoint();
        ws.parse_next(input)?;
        if opt('.').parse_next(input)?.is_some() {
            ws.parse_next(input)?;
            let name = cut_err(ident)
                .context(StrContext::Expected(StrContextValue::Description(
                    "field or method name",
                )))
                .parse_next(input)?;
            let call_checkpoint = input.checkpoint();
            ws.parse_next(input)?;
            if opt('(').parse_next(input)?.is_some() {
                let args = arguments.parse_next(input)?;
                let below = args.iter().map(Expr::depth).fold(depth, usize::max);
                depth = deepen(input, below)?;
                expr = Expr::Call {
                    target: Some(Box::new(expr)),
                    function: name.to_owned(),
                    args,
                };
            } else {
                input.reset(&call_checkpoint);
                depth = deepen(input, depth)?;
                expr = Expr::Member {
                    target: Box::new(expr),
                    field: name.to_owned(),
                };
            }
        } else if opt('[').parse_next(input)?.is_some() {
            let key = cut_err(expression).parse_next(input)?;
            cut_err((ws, ']'))
                .context(StrContext::Expected(StrContextValue::CharLiteral(']')))
                .parse_next(input)?;
            depth = deepen(input, depth.max(key.depth()))?;
            expr = Expr::Index {
                target: Box::new(expr),
                key: Box::new(key),
            };
        } else {
            input.reset(&checkpoint);
            return Ok(expr);
        }
    }
}

// -- Operators (precedence: ?: < || < && < relations < +- < */% < unary) ----

fn unary(input: &mut &str) -> ModalResult<Expr> {
    ws.parse_next(input)?;
    if opt('!').parse_next(input)?.is_some() {
        let _nesting = Nesting::enter(input)?;
        let operand = cut_err(unary).parse_next(input)?;
        return Ok(Expr::Unary {
            op: UnaryOp::Not,
            operand: Box::new(operand),
        });
    }
    if opt('-').parse_next(input)?.is_some() {
        let _nesting = Nesting::enter(input)?;
        let operand = cut_err(unary).parse_next(input)?;
        // Negative literals fold into a single literal node.
        return Ok(match operand {
            Expr::Literal(Literal::Int(v)) => Expr::Literal(Literal::Int(-v)),
            Expr::Literal(Literal::Float(v)) => Expr::Literal(Literal::Float(-v)),
            other => Expr::Unary {
                op: UnaryOp::Neg,
                operand: Box::new(other),
            },
        });
    }
    member(input)
}

/// Fold a left-associative chain, failing once it grows too deep.
fn fold(input: &&str, first: Expr, rest: Vec<(BinaryOp, Expr)>) -> ModalResult<Expr> {
    let mut depth = first.depth();
    let mut acc = first;
    for (op, rhs) in rest {
        depth = deepen(input, depth.max(rhs.depth()))?;
        acc = Expr::binary(op, acc, rhs);
    }
    Ok(acc)
}

fn multiplicative(input: &mut &str) -> ModalResult<Expr> {
    let first = unary(input)?;
    let rest: Vec<(BinaryOp, Expr)> = repeat(
        0..,
        (
            preceded(
                ws,
                alt((
                    '*'.value(BinaryOp::Mul),
                    '/'.value(BinaryOp::Div),
                    '%'.value(BinaryOp::Rem),
                )),
            ),
            cut_err(unary),
        ),
    )
    .parse_next(input)?;
    fold(input, first, rest)
}

fn additive(input: &mut &str) -> ModalResult<Expr> {
    let first = multiplicative(input)?;
    let rest: Vec<(BinaryOp, Expr)> = repeat(
        0..,
        (
            preceded(
                ws,
                alt(('+'.value(BinaryOp::Add), '-'.value(BinaryOp::Sub))),
            ),
            cut_err(multiplicative),
        ),
    )
    .parse_next(input)?;
    fold(input, first, rest)
}

fn in_keyword(input: &mut &str) -> ModalResult<()> {
    let word = ident.parse_next(input)?;
    if word == "in" {
        Ok(())
    } else {
        Err(ErrMode::from_input(input))
    }
}

fn relop(input: &mut &str) -> ModalResult<BinaryOp> {
    alt((
        "<=".value(BinaryOp::Lte),
        "<".value(BinaryOp::Lt),
        ">=".value(BinaryOp::Gte),
        ">".value(BinaryOp::Gt),
        "==".value(BinaryOp::Eq),
        "!=".value(BinaryOp::Neq),
        in_keyword.value(BinaryOp::In),
    ))
    .parse_next(input)
}

fn relation(input: &mut &str) -> ModalResult<Expr> {
    let first = additive(input)?;
    let rest: Vec<(BinaryOp, Expr)> =
        repeat(0.., (preceded(ws, relop), cut_err(additive))).parse_next(input)?;
    fold(input, first, rest)
}

fn and_expr(input: &mut &str) -> ModalResult<Expr> {
    let first = relation(input)?;
    let rest: Vec<(BinaryOp, Expr)> = repeat(
        0..,
        (preceded(ws, "&&").value(BinaryOp::And), cut_err(relation)),
    )
    .parse_next(input)?;
    fold(input, first, rest)
}

fn or_expr(input: &mut &str) -> ModalResult<Expr> {
    let first = and_expr(input)?;
    let rest: Vec<(BinaryOp, Expr)> = repeat(
        0..,
        (preceded(ws, "||").value(BinaryOp::Or), cut_err(and_expr)),
    )
    .parse_next(input)?;
    fold(input, first, rest)
}

fn conditional(input: &mut &str) -> ModalResult<Expr> {
    let _nesting = Nesting::enter(input)?;
    let cond = or_expr(input)?;
    let checkpoint = input.checkpoint();
    ws.parse_next(input)?;
    if opt('?').parse_next(input)?.is_some() {
        let then = cut_err(conditional).parse_next(input)?;
        cut_err((ws, ':'))
            .context(StrContext::Expected(StrContextValue::CharLiteral(':')))
            .parse_next(input)?;
        let otherwise = cut_err(conditional).parse_next(input)?;
        Ok(Expr::Conditional {
            cond: Box::new(cond),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        })
    } else {
        input.reset(&checkpoint);
        Ok(cond)
    }
}

fn expression(input: &mut &str) -> ModalResult<Expr> {
    ws.parse_next(input)?;
    conditional(input)
}

// -- Entry points -----------------------------------------------------------

pub(crate) fn parse_expression(source: &str) -> Result<Expr, ParseError> {
    NESTING.with(|n| n.set(0));
    terminated(expression, ws)
        .parse(source)
        .map_err(|e| {
            let message = e.inner().to_string();
            let message = if message.is_empty() {
                "unexpected input".to_owned()
            } else {
                message
            };
            ParseError::new(message, e.offset())
        })
}

// -- Rule files -------------------------------------------------------------

fn rule_name<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    take_while(1.., |c: char| {
        c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.'
    })
    .parse_next(input)
}

/// `rule <name>:`; leaves the rest of the line in `input`.
fn rule_header(input: &mut &str) -> ModalResult<String> {
    "rule".parse_next(input)?;
    take_while(1.., [' ', '\t']).parse_next(input)?;
    let name = cut_err(alt((string_literal, rule_name.map(str::to_owned))))
        .context(StrContext::Expected(StrContextValue::Description(
            "rule name",
        )))
        .parse_next(input)?;
    take_while(0.., [' ', '\t']).parse_next(input)?;
    cut_err(':')
        .context(StrContext::Expected(StrContextValue::CharLiteral(':')))
        .parse_next(input)?;
    Ok(name)
}

fn is_header_line(line: &str) -> bool {
    line.strip_prefix("rule")
        .is_some_and(|rest| rest.starts_with([' ', '\t']))
}

pub(crate) fn parse_rule_file(input: &str) -> Result<ParsedRules, ParseError> {
    let mut rules: Vec<(RuleSource, usize)> = Vec::new();
    let mut offset = 0;

    for line in input.split_inclusive('\n') {
        let line_offset = offset;
        offset += line.len();

        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        if is_header_line(line) {
            let mut rest = line.trim_end();
            let name = rule_header.parse_next(&mut rest).map_err(|e| {
                let at = line_offset + (line.trim_end().len() - rest.len());
                let message = match e {
                    ErrMode::Backtrack(ctx) | ErrMode::Cut(ctx) => ctx.to_string(),
                    ErrMode::Incomplete(_) => String::new(),
                };
                ParseError::new(
                    if message.is_empty() {
                        "malformed rule header".to_owned()
                    } else {
                        message
                    },
                    at,
                )
            })?;
            rules.push((RuleSource::new(name, rest.trim()), line_offset));
            continue;
        }

        match rules.last_mut() {
            Some((rule, _)) => {
                if !rule.text.is_empty() {
                    rule.text.push('\n');
                }
                rule.text.push_str(line.trim_end());
            }
            None => {
                return Err(ParseError::new(
                    "expected 'rule <name>:' header",
                    line_offset,
                ))
            }
        }
    }

    let mut parsed = ParsedRules::default();
    for (mut rule, header_offset) in rules {
        rule.text = rule.text.trim().to_owned();
        if rule.text.is_empty() {
            return Err(ParseError::new(
                format!("rule '{}' has an empty body", rule.name),
                header_offset,
            ));
        }
        parsed.rules.push(rule);
    }
    Ok(parsed)
}
