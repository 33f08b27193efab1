use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

/// Pipeline-level operation, independent of the source's vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Create,
    Update,
    Delete,
    Unknown,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
            Operation::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lookup table from source operation codes to [`Operation`].
///
/// Default table follows Debezium: `c` create, `u` update, `r` snapshot
/// read (treated as create), `d` delete. Anything else is `Unknown`.
#[derive(Debug, Clone)]
pub struct OperationClassifier {
    codes: HashMap<String, Operation>,
}

impl Default for OperationClassifier {
    fn default() -> Self {
        Self::empty()
            .with_code("c", Operation::Create)
            .with_code("u", Operation::Update)
            .with_code("r", Operation::Create)
            .with_code("d", Operation::Delete)
    }
}

impl OperationClassifier {
    pub fn empty() -> Self {
        Self {
            codes: HashMap::new(),
        }
    }

    /// Register (or override) a source code.
    pub fn with_code(mut self, code: impl Into<String>, operation: Operation) -> Self {
        self.codes.insert(code.into(), operation);
        self
    }

    /// Never fails; unmapped codes are `Unknown`.
    pub fn classify(&self, raw_code: &str) -> Operation {
        self.codes
            .get(raw_code.trim())
            .copied()
            .unwrap_or(Operation::Unknown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_mapping() {
        let classifier = OperationClassifier::default();

        assert_eq!(classifier.classify("c"), Operation::Create);
        assert_eq!(classifier.classify("u"), Operation::Update);
        assert_eq!(classifier.classify("r"), Operation::Create);
        assert_eq!(classifier.classify("d"), Operation::Delete);
    }

    #[test]
    fn test_unmapped_codes_are_unknown() {
        let classifier = OperationClassifier::default();

        assert_eq!(classifier.classify("t"), Operation::Unknown);
        assert_eq!(classifier.classify(""), Operation::Unknown);
        assert_eq!(classifier.classify("C"), Operation::Unknown);
    }

    #[test]
    fn test_extending_the_table() {
        let classifier = OperationClassifier::default().with_code("m", Operation::Update);

        assert_eq!(classifier.classify("m"), Operation::Update);
        assert_eq!(classifier.classify("c"), Operation::Create);
    }
}
