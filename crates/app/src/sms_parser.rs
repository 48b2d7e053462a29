//! Grammar splitting SMS bodies into named fields.
//!
//! A grammar is literal text with `{address}`, `{payload}` and `{value}`
//! placeholders, e.g. `"{address}:{payload}"` or `"T {address}={value}"`.
//! It compiles into an anchored regular expression with one named group
//! per placeholder.

use regex::Regex;

use homegate_domain::error::{GatewayError, ValidationError};

const FIELDS: [&str; 3] = ["address", "payload", "value"];

/// Fields extracted from one message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SmsFields {
    pub address: Option<String>,
    pub payload: Option<String>,
    pub value: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SmsParser {
    regex: Regex,
}

impl SmsParser {
    /// Compile a grammar.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidParser`] on an unknown or repeated
    /// placeholder, or an unterminated `{`.
    pub fn compile(grammar: &str) -> Result<Self, GatewayError> {
        let mut pattern = String::from("(?s)^");
        let mut rest = grammar;
        while let Some(start) = rest.find('{') {
            pattern.push_str(&regex::escape(&rest[..start]));
            let Some(len) = rest[start..].find('}') else {
                return Err(invalid(format!("unterminated placeholder in {grammar:?}")));
            };
            let name = &rest[start + 1..start + len];
            if !FIELDS.contains(&name) {
                return Err(invalid(format!("unknown placeholder {{{name}}}")));
            }
            pattern.push_str(&format!("(?P<{name}>.+?)"));
            rest = &rest[start + len + 1..];
        }
        pattern.push_str(&regex::escape(rest));
        pattern.push('$');

        let regex = Regex::new(&pattern).map_err(|err| invalid(err.to_string()))?;
        Ok(Self { regex })
    }

    /// Extract fields from `message`, or `None` when it does not fit the grammar.
    #[must_use]
    pub fn parse(&self, message: &str) -> Option<SmsFields> {
        let captures = self.regex.captures(message.trim())?;
        let field = |name: &str| captures.name(name).map(|m| m.as_str().to_string());
        Some(SmsFields {
            address: field("address"),
            payload: field("payload"),
            value: field("value"),
        })
    }
}

fn invalid(reason: String) -> GatewayError {
    ValidationError::InvalidParser(reason).into()
}
