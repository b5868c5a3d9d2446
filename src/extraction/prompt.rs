//! Oracle prompt construction.

use std::fmt::Write;

const INSTRUCTIONS: &str = r#"You are an expert at analysing arguments in text.
Identify the issues (questions under debate) discussed in the text below.
For each issue give its possible positions (answers), and for each position
the arguments that support or rebut it. Every argument names its warrant
(the reasoning that connects evidence to the position) and quotes its
evidence verbatim from the text.

Classify each issue with "issue_type":
- "regular": an open question with any number of answers
- "mutex": answers are mutually exclusive
- "hypothesis": a single claim that is either true or false
- "world": alternative scenarios, exactly one of which holds

Respond with JSON only, in this shape:
[
  {
    "question": "...",
    "issue_type": "regular",
    "description": "...",
    "positions": [
      {
        "answer": "...",
        "arguments": [
          {
            "polarity": "support",
            "warrant": "...",
            "evidence": ["exact quote from the text"]
          }
        ]
      }
    ]
  }
]
Use "support" or "rebut" for "polarity". Return [] if the text debates nothing."#;

/// Builds the oracle prompt for one chunk.
///
/// `context` lists issue questions already known; the oracle is asked to
/// reuse their wording when the chunk discusses the same question.
#[must_use]
pub fn build_prompt(chunk_text: &str, context: &[String]) -> String {
    let mut prompt = String::with_capacity(INSTRUCTIONS.len() + chunk_text.len() + 256);
    prompt.push_str(INSTRUCTIONS);
    prompt.push_str("\n\n");
    if !context.is_empty() {
        prompt.push_str("Issues already identified (reuse their exact wording when the text discusses them):\n");
        for question in context {
            let _ = writeln!(prompt, "- {question}");
        }
        prompt.push('\n');
    }
    prompt.push_str("Text:\n\"\"\"\n");
    prompt.push_str(chunk_text);
    prompt.push_str("\n\"\"\"\n");
    prompt
}
