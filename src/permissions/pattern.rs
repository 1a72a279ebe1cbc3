use regex::Regex;

use super::PermissionError;

/// A tool or resource glob compiled to an anchored regex.
///
/// `*` matches zero or more characters; every other character is literal.
#[derive(Debug, Clone)]
pub struct GlobPattern {
    source: String,
    regex: Regex,
}

impl GlobPattern {
    pub fn compile(pattern: &str) -> Result<Self, PermissionError> {
        let body = pattern
            .split('*')
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join(".*");
        let regex = Regex::new(&format!("^(?s:{body})$")).map_err(|source| {
            PermissionError::InvalidPattern {
                pattern: pattern.to_string(),
                source,
            }
        })?;

        Ok(Self {
            source: pattern.to_string(),
            regex,
        })
    }

    pub fn matches(&self, candidate: &str) -> bool {
        self.regex.is_match(candidate)
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}
