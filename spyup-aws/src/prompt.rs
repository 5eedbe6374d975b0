use std::io;

use dialoguer::{theme::ColorfulTheme, Input};

/// Asks the operator whether to proceed.
pub trait Confirm {
    fn confirm(&self, prompt: &str) -> io::Result<bool>;
}

/// Returns true for "y" or "yes", ignoring case and surrounding whitespace.
pub fn is_affirmative(answer: &str) -> bool {
    let answer = answer.trim().to_ascii_lowercase();
    answer == "y" || answer == "yes"
}

/// Reads the answer from the terminal.
pub struct Prompt;

impl Confirm for Prompt {
    fn confirm(&self, prompt: &str) -> io::Result<bool> {
        println!("{}", prompt);
        let answer = Input::<String>::with_theme(&ColorfulTheme::default())
            .with_prompt("Okay to proceed? (y/n)")
            .allow_empty(true)
            .interact_text()?;
        Ok(is_affirmative(&answer))
    }
}

/// Approves every prompt (e.g., "--skip-prompt").
pub struct AutoApprove;

impl Confirm for AutoApprove {
    fn confirm(&self, prompt: &str) -> io::Result<bool> {
        log::info!("skipping prompt '{}'", prompt);
        Ok(true)
    }
}

#[test]
fn test_is_affirmative() {
    for yes in ["y", "Y", "yes", "YES", "Yes", " y ", "yEs\n"] {
        assert!(is_affirmative(yes), "{:?}", yes);
    }
    for no in ["", "n", "no", "yess", "ye", "sure", "y es", "1"] {
        assert!(!is_affirmative(no), "{:?}", no);
    }
}

#[test]
fn test_auto_approve() {
    assert!(AutoApprove.confirm("anything").unwrap());
}
