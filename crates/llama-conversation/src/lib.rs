pub mod conversation;
pub mod prompt;

pub use conversation::Conversation;
pub use prompt::{render_prompt, PERSONA_PREAMBLE};
