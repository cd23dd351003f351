//! Deterministic intent rules.
//!
//! A handful of very common requests are answered without any remote call.
//! The same patterns decide whether a prompt is simple enough for strict
//! mode and repair headlight calls in generated code.

use regex::Regex;

use crate::error::ChatResult;

/// Motor speed used by generated movement programs.
pub const MOVE_SPEED: u32 = 120;

/// Prompts with more words than this are never strict.
pub const STRICT_MAX_WORDS: usize = 16;

/// Compiled intent and heuristic patterns.
#[derive(Debug, Clone)]
pub struct IntentRules {
    headlight: Regex,
    headlight_on: Regex,
    headlight_off: Regex,
    movement: Regex,
    extras: Regex,
    duration: Regex,
    simple_action: Regex,
    wants_on: Regex,
    wants_off: Regex,
    headlight_call: Regex,
    pin_write: Regex,
}

impl IntentRules {
    pub fn new() -> ChatResult<Self> {
        Ok(Self {
            headlight: Regex::new(
                r"\b(headlight|head\s*light|light\s*up\s*led|turn\s*on\s*led|turn\s*off\s*led)\b",
            )?,
            headlight_on: Regex::new(r"\b(on|turn\s*on|light\s*up)\b")?,
            headlight_off: Regex::new(r"\b(off|turn\s*off)\b")?,
            movement: Regex::new(
                r"\b(move|go|drive)\s+(forward|back|backward)\s+for\s+(\d+)\s*(ms|milliseconds|sec|secs|second|seconds)\b",
            )?,
            extras: Regex::new(r"(button|forever|ultrasonic|sensor|line|rgb|led|music|tone|radio|rekabit)")?,
            duration: Regex::new(r"\b\d+\s*(ms|milliseconds|sec|secs|second|seconds)\b")?,
            simple_action: Regex::new(r"(move|go|drive)\s+(forward|backward|back)|turn\s+(left|right)")?,
            wants_on: Regex::new(r"(?i)\b(on|turn\s*on|light\s*up|enable)\b")?,
            wants_off: Regex::new(r"(?i)\b(off|turn\s*off|disable)\b")?,
            headlight_call: Regex::new(r"zoombit\.setHeadlight\s*\(([^)]*)\)")?,
            pin_write: Regex::new(r"pins\.digitalWritePin\s*\(")?,
        })
    }

    /// Canonical program for a recognized intent, or `None`.
    pub fn generate(&self, prompt: &str) -> Option<String> {
        let original = prompt.trim();
        if original.is_empty() {
            return None;
        }
        let p = original.to_lowercase();

        if self.headlight.is_match(&p) {
            let on = self.headlight_on.is_match(&p) && !self.headlight_off.is_match(&p);
            return Some(
                [
                    format!("// Auto-generated headlight control for: {}", original),
                    headlight_call(on),
                ]
                .join("\n"),
            );
        }

        let caps = self.movement.captures(&p)?;
        let direction = if caps[2].contains("back") {
            "MotorDirection.Backward"
        } else {
            "MotorDirection.Forward"
        };
        let amount: u64 = caps[3].parse().ok().filter(|n| *n > 0)?;
        let ms = if caps[4].starts_with("ms") || caps[4].starts_with("millisecond") {
            amount
        } else {
            amount.checked_mul(1000)?
        };

        Some(
            [
                format!("// Auto-generated minimal program for: {}", original),
                format!("zoombit.move({}, {})", direction, MOVE_SPEED),
                format!("basic.pause({})", ms),
                "zoombit.brake()".to_string(),
            ]
            .join("\n"),
        )
    }

    /// Whether a prompt asks for something small and exact.
    ///
    /// Short, mentions no auxiliary feature, and has either an explicit
    /// duration or a plain directional action.
    pub fn infer_strict(&self, prompt: &str) -> bool {
        let p = prompt.to_lowercase();
        if p.trim().is_empty() {
            return false;
        }
        let words = p.split_whitespace().count();
        !self.extras.is_match(&p)
            && words <= STRICT_MAX_WORDS
            && (self.duration.is_match(&p) || self.simple_action.is_match(&p))
    }

    /// Rewrite malformed headlight calls to the canonical form.
    ///
    /// When the program drives pins directly and never calls the headlight
    /// API, a canonical call is appended.
    pub fn normalize_headlight(&self, code: &str, prompt: &str) -> String {
        let wants_on = self.wants_on.is_match(prompt) && !self.wants_off.is_match(prompt);
        let wants_off = self.wants_off.is_match(prompt) && !wants_on;
        let canonical = headlight_call(!wants_off);

        let mut out = self
            .headlight_call
            .replace_all(code, |caps: &regex::Captures| {
                let args = &caps[1];
                if args.contains("HeadlightChannel.") && args.contains("digitalStatePicker") {
                    caps[0].to_string()
                } else {
                    canonical.clone()
                }
            })
            .into_owned();

        if self.pin_write.is_match(&out) && !self.headlight_call.is_match(&out) {
            out.push_str(&format!(
                "\n\n// Normalize to Zoombit headlight API\n{}\n",
                canonical
            ));
        }
        out
    }
}

fn headlight_call(on: bool) -> String {
    let state = if on { "DigitalIoState.On" } else { "DigitalIoState.Off" };
    format!(
        "zoombit.setHeadlight(HeadlightChannel.All, zoombit.digitalStatePicker({}))",
        state
    )
}
