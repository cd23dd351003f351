//! Strict-mode deny-list.

use regex::Regex;

use crate::error::ChatResult;

const DENY_PATTERN: &str = r"(?i)input\.onButtonPressed|basic\.forever|ultrasonic|readUltrasonic|line|music\.|rekabit|ws2812|radio\.";

/// Flags constructs that go beyond an exact, minimal request.
#[derive(Debug, Clone)]
pub struct StrictValidator {
    deny: Regex,
}

impl StrictValidator {
    pub fn new() -> ChatResult<Self> {
        Ok(Self {
            deny: Regex::new(DENY_PATTERN)?,
        })
    }

    /// Distinct disallowed constructs found in `code`, in order of appearance.
    pub fn violations(&self, code: &str) -> Vec<String> {
        let mut found: Vec<String> = Vec::new();
        for m in self.deny.find_iter(code) {
            let hit = m.as_str().to_string();
            if !found.contains(&hit) {
                found.push(hit);
            }
        }
        found
    }

    pub fn is_clean(&self, code: &str) -> bool {
        !self.deny.is_match(code)
    }
}
