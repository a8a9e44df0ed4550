use crate::RuleSource;

/// The result of parsing a rule file.
#[derive(Debug, Default)]
pub struct ParsedRules {
    pub rules: Vec<RuleSource>,
}
