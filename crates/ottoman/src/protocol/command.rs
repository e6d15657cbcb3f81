//! Decoded input commands and positional argument access.

use std::collections::VecDeque;

use serde_json::Value;

use crate::error::QueryError;

/// One input line: an instruction name plus its positional arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    name: String,
    arguments: Arguments,
}

impl Command {
    /// Splits a decoded line into name and arguments.
    ///
    /// # Errors
    ///
    /// Returns a fatal `query_protocol_error` when the line is not a
    /// non-empty array headed by a string.
    pub fn from_value(value: Value) -> Result<Self, QueryError> {
        let Value::Array(items) = value else {
            return Err(QueryError::protocol("command line must be a JSON array"));
        };
        let mut items = items.into_iter();
        let name = match items.next() {
            Some(Value::String(name)) => name,
            Some(other) => {
                return Err(QueryError::protocol(format!(
                    "command name must be a string, got {other}"
                )));
            }
            None => return Err(QueryError::protocol("command line is empty")),
        };
        let arguments = Arguments::new(name.clone(), items.collect());
        Ok(Self { name, arguments })
    }

    /// Instruction name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Consumes the command, yielding its arguments.
    #[must_use]
    pub fn into_arguments(self) -> Arguments {
        self.arguments
    }
}

/// Positional arguments consumed front to back.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Arguments {
    command: String,
    values: VecDeque<Value>,
}

impl Arguments {
    /// Wraps the arguments of `command`.
    pub fn new(command: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            command: command.into(),
            values: values.into(),
        }
    }

    /// Number of arguments not yet consumed.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.values.len()
    }

    /// Takes the next argument, which must be present.
    ///
    /// # Errors
    ///
    /// Returns `invalid_arguments` when no argument is left.
    pub fn value(&mut self, name: &str) -> Result<Value, QueryError> {
        self.values.pop_front().ok_or_else(|| {
            QueryError::invalid_arguments(format!(
                "`{}` is missing its `{name}` argument",
                self.command
            ))
        })
    }

    /// Takes the next argument if present.
    pub fn optional(&mut self) -> Option<Value> {
        self.values.pop_front()
    }

    /// Takes the next argument, which must be a string.
    ///
    /// # Errors
    ///
    /// Returns `invalid_arguments` when missing or not a string.
    pub fn string(&mut self, name: &str) -> Result<String, QueryError> {
        match self.value(name)? {
            Value::String(text) => Ok(text),
            other => Err(self.mismatch(name, "a string", &other)),
        }
    }

    /// Takes the next argument, which must be an array.
    ///
    /// # Errors
    ///
    /// Returns `invalid_arguments` when missing or not an array.
    pub fn array(&mut self, name: &str) -> Result<Vec<Value>, QueryError> {
        match self.value(name)? {
            Value::Array(items) => Ok(items),
            other => Err(self.mismatch(name, "an array", &other)),
        }
    }

    /// Takes the next argument, which must be an object.
    ///
    /// # Errors
    ///
    /// Returns `invalid_arguments` when missing or not an object.
    pub fn object(&mut self, name: &str) -> Result<Value, QueryError> {
        match self.value(name)? {
            object @ Value::Object(_) => Ok(object),
            other => Err(self.mismatch(name, "an object", &other)),
        }
    }

    fn mismatch(&self, name: &str, expected: &str, found: &Value) -> QueryError {
        QueryError::invalid_arguments(format!(
            "`{}` expects `{name}` to be {expected}, got {found}",
            self.command
        ))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::error::Severity;

    #[test]
    fn splits_name_and_arguments() {
        let command = Command::from_value(json!(["map_doc", {"_id": "a"}])).expect("command");
        assert_eq!(command.name(), "map_doc");

        let mut arguments = command.into_arguments();
        assert_eq!(arguments.remaining(), 1);
        assert_eq!(arguments.object("doc").expect("doc"), json!({"_id": "a"}));
        assert!(arguments.optional().is_none());
    }

    #[test]
    fn rejects_non_array_lines_fatally() {
        let error = Command::from_value(json!({"cmd": "reset"})).expect_err("object line");
        assert_eq!(error.severity(), Severity::Fatal);
        assert_eq!(error.kind(), "query_protocol_error");
    }

    #[test]
    fn rejects_empty_lines_fatally() {
        let error = Command::from_value(json!([])).expect_err("empty line");
        assert!(error.is_fatal());
    }

    #[test]
    fn reports_shape_mismatches_as_recoverable() {
        let mut arguments = Arguments::new("add_fun", vec![json!(42)]);
        let error = arguments.string("source").expect_err("number is not a string");
        assert_eq!(error.severity(), Severity::Error);
        assert_eq!(error.kind(), "invalid_arguments");
        assert!(error.message().contains("add_fun"));
    }
}
