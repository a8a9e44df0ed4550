mod error;
mod grammar;
mod parser;

pub use error::ParseError;
pub use parser::ParsedRules;

use crate::Expr;

/// Parse a single rule expression into its syntax tree.
///
/// # Errors
///
/// Returns [`ParseError`] if the input is not a valid expression.
pub fn parse_expression(input: &str) -> Result<Expr, ParseError> {
    grammar::parse_expression(input)
}

/// Parse a rule file: a sequence of `rule <name>:` headers, each followed
/// by an expression body.
///
/// # Errors
///
/// Returns [`ParseError`] on a malformed header, a body with no header,
/// or a rule with an empty body. Bodies are not parsed here.
pub fn parse_rules(input: &str) -> Result<ParsedRules, ParseError> {
    grammar::parse_rule_file(input)
}
