use crate::Conversation;

/// Instruction text placed in front of every rendered prompt.
pub const PERSONA_PREAMBLE: &str = "You are a helpful assistant. You do not respond as 'User' or pretend to be 'User'. You only respond once as 'Assistant'.\n\n";

const TURN_SEPARATOR: &str = "\n\n";

/// Render the history plus `new_input` into the single prompt string the model expects.
///
/// The layout is fixed: preamble, then `"User: "` / `"Assistant: "` followed by the
/// content and a blank line for each turn, then `" {new_input} Assistant: "`.
pub fn render_prompt(conversation: &Conversation, new_input: &str) -> String {
    let mut prompt = String::from(PERSONA_PREAMBLE);

    for turn in conversation.turns() {
        prompt.push_str(turn.role().label());
        prompt.push_str(": ");
        prompt.push_str(turn.content());
        prompt.push_str(TURN_SEPARATOR);
    }

    prompt.push(' ');
    prompt.push_str(new_input);
    prompt.push_str(" Assistant: ");
    prompt
}
