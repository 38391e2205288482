use llama_core::{Role, Turn};
use std::io::{self, Write};

/// Get an avatar for a speaker
pub fn role_avatar(role: Role) -> &'static str {
    match role {
        Role::User => "🧑",
        Role::Assistant => "🦙",
    }
}

/// Format a committed turn as one chat bubble line
pub fn format_turn(turn: &Turn) -> String {
    format!("{} {}> {}", role_avatar(turn.role()), turn.role(), turn.content())
}

pub fn format_warning(attempt: usize, max_attempts: usize) -> String {
    if attempt < max_attempts {
        format!("⏱ Timeout on attempt {attempt}. Retrying...")
    } else {
        format!("⏱ Timeout on attempt {attempt}.")
    }
}

pub fn format_error(message: &str) -> String {
    format!("❌ {message}")
}

pub fn display_turn(turn: &Turn) {
    println!("{}", format_turn(turn));
}

/// Print a streamed fragment without a newline so the reply builds up in place
pub fn display_fragment(fragment: &str) {
    print!("{fragment}");
    io::stdout().flush().ok();
}

pub fn display_warning(attempt: usize, max_attempts: usize) {
    eprintln!("⚠️  {}", format_warning(attempt, max_attempts));
}

pub fn display_error(message: &str) {
    eprintln!("{}", format_error(message));
}
