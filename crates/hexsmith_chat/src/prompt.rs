//! Generation prompt assembly.

use crate::knowledge::{KnowledgeContent, KnowledgeResult};
use crate::llm::truncate;

/// System message sent with every generation request.
pub const SYSTEM_PROMPT: &str = "You are a helpful Microsoft MakeCode (PXT) micro:bit code generator for the Zoombit robot. Assume the hardware has: 2 DC motors, 1 ultrasonic sensor, 1 line sensor, 2 RGB LEDs, 2 single-color LEDs, and a light sensor. Generate concise, self-contained TypeScript for this project only.";

const HEADER: &str = "You are a MakeCode (PXT) micro:bit TypeScript assistant for the Zoombit robot. Generate a single self-contained TypeScript program compatible with this PXT project. Output only TypeScript (no markdown). Avoid external dependencies. Prefer Zoombit APIs for hardware control: use zoombit.setHeadlight(...) for headlights and zoombit.move/turn/brake for motors; use basic.showString() for text display. Avoid raw pin writes unless explicitly requested.";

const STRICT_CONSTRAINTS: &[&str] = &[
    "// Constraints:",
    "// - Implement exactly what is asked; no extra features or handlers.",
    "// - Do NOT use input.onButtonPressed, basic.forever, sensors (ultrasonic/line/light), music, or RGBs unless explicitly requested.",
    "// - Prefer direct commands at top-level (setup code that runs once).",
    "// - For headlights, use zoombit.setHeadlight(HeadlightChannel.All, zoombit.digitalStatePicker(DigitalIoState.On|Off)). Avoid pins.digitalWritePin() unless specifically asked to control GPIO.",
    "// - After completing the action(s), stop the motors with zoombit.brake() if using motors.",
];

/// Task used when the caller gave no prompt.
pub const DEFAULT_TASK: &str = "Generate a simple Zoombit demo using buttons and movement (minimal).";

/// Note attached to the single strict-mode regeneration.
pub const REGENERATION_NOTE: &str = "Your previous attempt included disallowed constructs (event handlers, forever loops, sensors). Regenerate a minimal program with only the exact actions requested.";

pub const MAX_RAW_CONTEXT: usize = 2000;
pub const MAX_SECTIONS: usize = 20;

/// Inputs of one generation prompt.
#[derive(Debug, Clone, Default)]
pub struct GenerationContext {
    pub prompt: String,
    pub knowledge: Option<KnowledgeResult>,
    pub strict: bool,
    /// Corrective note, only set on a regeneration pass
    pub note: Option<String>,
}

impl GenerationContext {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    pub fn knowledge(mut self, knowledge: Option<KnowledgeResult>) -> Self {
        self.knowledge = knowledge;
        self
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    /// The regeneration pass: same task, strict, no reference material.
    pub fn regeneration(&self) -> Self {
        Self::new(self.prompt.clone()).strict(true).note(REGENERATION_NOTE)
    }

    /// Render the user message.
    pub fn render(&self) -> String {
        let constraints = if self.strict {
            STRICT_CONSTRAINTS.join("\n")
        } else {
            String::new()
        };

        let context = match (&self.knowledge, self.strict) {
            (Some(knowledge), false) => render_knowledge(&knowledge.content),
            _ => String::new(),
        };

        let task = match self.prompt.trim() {
            "" => DEFAULT_TASK,
            task => task,
        };

        let note = self
            .note
            .as_ref()
            .map(|n| format!("\n// Note: {}", n))
            .unwrap_or_default();

        format!(
            "{}\n{}{}\n\n// Task:\n// {}{}\n",
            HEADER, constraints, context, task, note
        )
    }
}

fn render_knowledge(content: &KnowledgeContent) -> String {
    match content {
        KnowledgeContent::Raw(text) if !text.trim().is_empty() => {
            let mut block = format!("\n\n/* Examples (raw) */\n{}", truncate(text, MAX_RAW_CONTEXT));
            if text.len() > MAX_RAW_CONTEXT {
                block.push_str("\n/* ...truncated... */");
            }
            block
        }
        KnowledgeContent::Sections(sections) if !sections.is_empty() => {
            let lines: Vec<String> = sections
                .iter()
                .take(MAX_SECTIONS)
                .map(|s| {
                    if s.snippets.is_empty() {
                        s.id.clone()
                    } else {
                        format!("{}:\n{}", s.id, s.snippets.join("\n"))
                    }
                })
                .collect();
            format!("\n\n/* Sections in codes.md */\n{}", lines.join("\n"))
        }
        _ => String::new(),
    }
}
