//! Command templates.
//!
//! Templates are SCPI strings with `{name}` placeholders, rendered with `strfmt`.
//! The engine provides `channel` for every command and `value` for set commands.
//! A literal brace is written `{{` or `}}`.

use crate::error::CommandSetError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Variables available while rendering a template.
pub type TemplateVars = HashMap<String, String>;

/// A command string with `{placeholder}` substitution.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Template(String);

impl Template {
    /// Wrap a raw template string.
    pub fn new(template: impl Into<String>) -> Self {
        Self(template.into())
    }

    /// The unrendered template text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Substitute `vars` into the template.
    pub fn render(&self, vars: &TemplateVars) -> Result<String, CommandSetError> {
        if !self.0.contains('{') && !self.0.contains('}') {
            return Ok(self.0.clone());
        }
        strfmt::strfmt(&self.0, vars).map_err(|e| CommandSetError::Template {
            template: self.0.clone(),
            reason: e.to_string(),
        })
    }

    /// Render with one extra `value` variable on top of `vars`.
    pub fn render_with_value(
        &self,
        vars: &TemplateVars,
        value: &str,
    ) -> Result<String, CommandSetError> {
        let mut vars = vars.clone();
        vars.insert("value".to_string(), value.to_string());
        self.render(&vars)
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Template {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Template {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(ch: &str) -> TemplateVars {
        TemplateVars::from([("channel".to_string(), ch.to_string())])
    }

    #[test]
    fn renders_channel_and_value() {
        let template = Template::new("SOUR{channel}:FREQ {value}");
        let rendered = template.render_with_value(&channel("2"), "1000").unwrap();
        assert_eq!(rendered, "SOUR2:FREQ 1000");
    }

    #[test]
    fn plain_commands_skip_formatting() {
        let template = Template::new("*CLS");
        assert_eq!(template.render(&TemplateVars::new()).unwrap(), "*CLS");
    }

    #[test]
    fn missing_variable_is_reported() {
        let template = Template::new("INST:SEL {channel}");
        let err = template.render(&TemplateVars::new()).unwrap_err();
        assert!(matches!(err, CommandSetError::Template { .. }));
        assert!(err.to_string().contains("INST:SEL {channel}"));
    }
}
