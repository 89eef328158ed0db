//! Stage prompts
//!
//! System prompts, sampling temperatures and user-message builders for each
//! completion the engine makes.

use crate::context::CurrentState;
use forge_llm::CompletionRequest;

pub const INTENT_TEMPERATURE: f32 = 0.1;
pub const DRAFT_TEMPERATURE: f32 = 0.7;
pub const CRITIQUE_TEMPERATURE: f32 = 0.1;
pub const REFINE_TEMPERATURE: f32 = 0.3;
pub const MODIFY_TEMPERATURE: f32 = 0.3;
pub const SUGGESTION_TEMPERATURE: f32 = 0.8;
pub const SUGGESTION_MAX_TOKENS: u32 = 200;

/// Characters of source shown to the suggestion prompt
pub const SUGGESTION_SOURCE_LIMIT: usize = 1500;

pub const INTENT_SYSTEM: &str = "You classify requests for an animation scene editor. \
Given the user's instruction, the current scene and recent conversation, reply with one JSON \
object: {\"intent\": \"add\" | \"modify\" | \"new\", \"targets\": [object names], \
\"keep_existing\": true | false, \"summary\": \"one sentence\"}. Reply with JSON only.";

pub const DRAFT_SYSTEM: &str = "You write complete Manim Community scenes in Python. \
Produce one runnable file containing `from manim import *`, `import math`, `import numpy as np` \
and a single Scene subclass with a `construct` method. Never elide code with placeholders such \
as `# ...` or `# rest of the code`; always write the whole file. Use Text() for non-ASCII text, \
never MathTex. Keep every object inside the frame. Reply with one ```python block.";

pub const CRITIQUE_SYSTEM: &str = "You review Manim scenes before they are rendered. \
List concrete problems: overlapping or off-screen objects, non-ASCII text inside MathTex, missing \
imports, undefined names, API misuse, and any part of the request the code ignores. Be brief. \
If the scene is fine, say so.";

pub const REFINE_SYSTEM: &str = "You fix Manim scenes using a reviewer's report. \
Apply every valid point of the report to the draft and return the complete corrected file in \
one ```python block. Keep the scene class name unless it is invalid. Never elide code.";

pub const REPAIR_SYSTEM: &str = "You repair Manim scenes that failed to render. \
You receive the renderer's error output and the failing source. Return the complete corrected \
file in one ```python block, changing only what the error requires.";

pub const MODIFY_SYSTEM: &str = "You edit existing Manim scenes on request. \
Apply the user's instruction to the given source, keep its structure and everything the \
instruction does not mention, and return the complete file in one ```python block.";

pub const SUGGESTION_SYSTEM: &str = "You are a Manim animation assistant. \
Reply only with a JSON array of short edit suggestions.";

/// Suggestions used when the reply cannot be parsed
pub const DEFAULT_SUGGESTIONS: &[&str] = &[
    "Add an animation effect",
    "Change the shape colors",
    "Add a title",
    "Resize the shapes",
    "Add more objects",
];

/// Suggestions used when the backend is unreachable
pub const FALLBACK_SUGGESTIONS: &[&str] = &[
    "Fill the shape with blue",
    "Make the shape rotate",
    "Add an explanatory label",
];

#[must_use]
pub fn intent(request: &str, current: &CurrentState, context: &str) -> CompletionRequest {
    let state = serde_json::to_string(current).unwrap_or_default();
    let user = format!(
        "User instruction: {request}\nCurrent state: {state}\nContext summary: {}\n\nWhat does the user actually want?",
        or_none(context)
    );
    CompletionRequest::new(INTENT_SYSTEM, user).with_temperature(INTENT_TEMPERATURE)
}

#[must_use]
pub fn draft(
    request: &str,
    intent: Option<&serde_json::Value>,
    current: &CurrentState,
    context: &str,
) -> CompletionRequest {
    let intent = intent.map_or_else(|| "not analysed".to_string(), ToString::to_string);
    let preview = current.code_preview.as_deref().unwrap_or("no existing code");
    let objects = if current.objects.is_empty() {
        "none".to_string()
    } else {
        current.objects.join(", ")
    };
    let user = format!(
        "[User instruction]\n{request}\n\n[Intent analysis]\n{intent}\n\n[Current code]\n{preview}\n\n\
         [Objects on screen]\n{objects}\n\n[Context summary]\n{}\n\n[Requirements]\n\
         1. Start the file with `import math` and `import numpy as np`.\n\
         2. Never put non-ASCII text in MathTex; use Text().\n\
         3. For additions or modifications build on the current code; for a new scene you may rewrite it.\n\
         4. Keep everything on screen.",
        or_none(context)
    );
    CompletionRequest::new(DRAFT_SYSTEM, user).with_temperature(DRAFT_TEMPERATURE)
}

#[must_use]
pub fn critique(request: &str, draft: &str) -> CompletionRequest {
    let user = format!(
        "[User instruction] {request}\n[Draft]\n{draft}\n\nCheck layout, overlaps and non-ASCII text in MathTex."
    );
    CompletionRequest::new(CRITIQUE_SYSTEM, user).with_temperature(CRITIQUE_TEMPERATURE)
}

#[must_use]
pub fn refine(request: &str, draft: &str, critique: &str) -> CompletionRequest {
    let user = format!(
        "[User instruction] {request}\n[Draft]\n{draft}\n[Review]\n{}\n\nFix every problem, in particular MathTex text and the math import.",
        or_none(critique)
    );
    CompletionRequest::new(REFINE_SYSTEM, user).with_temperature(REFINE_TEMPERATURE)
}

/// Repair keeps the backend's default temperature
#[must_use]
pub fn repair(diagnostic: &str, source: &str) -> CompletionRequest {
    let user = format!(
        "The scene below failed to render.\n\n[Error output]\n{diagnostic}\n\n[Source]\n```python\n{source}\n```\n\nReturn the fixed file."
    );
    CompletionRequest::new(REPAIR_SYSTEM, user)
}

#[must_use]
pub fn modify(code: &str, instruction: &str) -> CompletionRequest {
    let user = format!(
        "[Existing code]\n```python\n{code}\n```\n\n[Instruction]\n{instruction}\n\nModify only what the instruction requires."
    );
    CompletionRequest::new(MODIFY_SYSTEM, user).with_temperature(MODIFY_TEMPERATURE)
}

#[must_use]
pub fn suggestions(code: &str, count: usize) -> CompletionRequest {
    let excerpt: String = code.chars().take(SUGGESTION_SOURCE_LIMIT).collect();
    let user = format!(
        "Suggest {count} short edits for this scene.\n\n```python\n{excerpt}\n```\n\n\
         Each suggestion is at most a few words, concrete (\"make the circle blue\", not \
         \"change colors\"), refers to objects actually in the code, and some are creative \
         (new animations, a title). Reply with a JSON array of strings only."
    );
    CompletionRequest::new(SUGGESTION_SYSTEM, user)
        .with_temperature(SUGGESTION_TEMPERATURE)
        .with_max_tokens(SUGGESTION_MAX_TOKENS)
}

fn or_none(text: &str) -> &str {
    if text.trim().is_empty() {
        "none"
    } else {
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_temperatures() {
        let current = CurrentState::default();
        assert_eq!(intent("x", &current, "").temperature, Some(INTENT_TEMPERATURE));
        assert_eq!(draft("x", None, &current, "").temperature, Some(DRAFT_TEMPERATURE));
        assert_eq!(critique("x", "d").temperature, Some(CRITIQUE_TEMPERATURE));
        assert_eq!(refine("x", "d", "c").temperature, Some(REFINE_TEMPERATURE));
        assert_eq!(repair("err", "src").temperature, None);
        assert_eq!(suggestions("src", 3).max_tokens, Some(SUGGESTION_MAX_TOKENS));
    }

    #[test]
    fn draft_prompt_carries_context() {
        let request = draft("add a square", None, &CurrentState::default(), "1. [new] \"a circle\"");
        let user = request.user_prompt().unwrap();
        assert!(user.contains("add a square"));
        assert!(user.contains("no existing code"));
        assert!(user.contains("1. [new] \"a circle\""));
        assert!(user.contains("not analysed"));
    }

    #[test]
    fn suggestion_source_is_bounded() {
        let long = "x".repeat(4000);
        let request = suggestions(&long, 3);
        let user = request.user_prompt().unwrap();
        assert!(user.matches('x').count() <= SUGGESTION_SOURCE_LIMIT + 1);
    }
}
