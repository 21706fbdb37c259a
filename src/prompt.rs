//! Line input for the login and user forms.

use anyhow::Result;
use rustyline::completion::Completer;
use rustyline::error::ReadlineError;
use rustyline::highlight::{CmdKind, Highlighter};
use rustyline::hint::Hinter;
use rustyline::history::DefaultHistory;
use rustyline::validate::Validator;
use rustyline::{Editor, Helper};
use std::borrow::Cow;
use std::path::Path;

/// Source of operator input
pub trait Prompter {
    /// Ask for a value, pre-filled with `initial`. `None` means no answer
    /// (end of input or interrupted).
    fn ask(&mut self, label: &str, initial: &str) -> Result<Option<String>>;
    /// Ask for a value without echoing it
    fn secret(&mut self, label: &str) -> Result<Option<String>>;
    fn confirm(&mut self, question: &str) -> Result<bool>;
}

/// Hides what is typed while `masking` is on
#[derive(Default)]
pub struct MaskingHelper {
    masking: bool,
}

impl Completer for MaskingHelper {
    type Candidate = String;
}

impl Hinter for MaskingHelper {
    type Hint = String;
}

impl Validator for MaskingHelper {}

impl Highlighter for MaskingHelper {
    fn highlight<'l>(&self, line: &'l str, _pos: usize) -> Cow<'l, str> {
        if self.masking {
            Cow::Owned("*".repeat(line.chars().count()))
        } else {
            Cow::Borrowed(line)
        }
    }

    fn highlight_char(&self, _line: &str, _pos: usize, _kind: CmdKind) -> bool {
        self.masking
    }
}

impl Helper for MaskingHelper {}

/// Terminal prompter; also reads shell commands so the shell and the forms
/// share one history
pub struct LinePrompter {
    editor: Editor<MaskingHelper, DefaultHistory>,
}

impl LinePrompter {
    pub fn new() -> Result<Self> {
        let mut editor = Editor::new()?;
        editor.set_helper(Some(MaskingHelper::default()));
        Ok(Self { editor })
    }

    /// Read one shell command line
    pub fn readline(&mut self, prompt: &str) -> rustyline::Result<String> {
        self.editor.readline(prompt)
    }

    pub fn add_history(&mut self, line: &str) -> Result<()> {
        self.editor.add_history_entry(line)?;
        Ok(())
    }

    /// Shell history is kept across runs; a missing file is not an error
    pub fn load_history(&mut self, path: &Path) {
        if let Err(e) = self.editor.load_history(path) {
            tracing::debug!(error = %e, "no shell history loaded");
        }
    }

    pub fn save_history(&mut self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        self.editor.save_history(path)?;
        Ok(())
    }

    fn set_masking(&mut self, on: bool) {
        if let Some(helper) = self.editor.helper_mut() {
            helper.masking = on;
        }
    }
}

fn answer(result: rustyline::Result<String>) -> Result<Option<String>> {
    match result {
        Ok(line) => Ok(Some(line.trim().to_string())),
        Err(ReadlineError::Interrupted | ReadlineError::Eof) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

impl Prompter for LinePrompter {
    fn ask(&mut self, label: &str, initial: &str) -> Result<Option<String>> {
        let prompt = format!("{}: ", label);
        answer(self.editor.readline_with_initial(&prompt, (initial, "")))
    }

    fn secret(&mut self, label: &str) -> Result<Option<String>> {
        self.set_masking(true);
        let result = self.editor.readline(&format!("{}: ", label));
        self.set_masking(false);
        answer(result)
    }

    fn confirm(&mut self, question: &str) -> Result<bool> {
        let reply = answer(self.editor.readline(&format!("{} [s/N]: ", question)))?;
        Ok(is_yes(reply.as_deref().unwrap_or("")))
    }
}

fn is_yes(input: &str) -> bool {
    matches!(
        input.trim().to_lowercase().as_str(),
        "s" | "si" | "sí" | "y" | "yes"
    )
}

/// Prompter for one-shot commands run without a terminal: every question
/// goes unanswered
pub struct NoPrompt;

impl Prompter for NoPrompt {
    fn ask(&mut self, _label: &str, _initial: &str) -> Result<Option<String>> {
        Ok(None)
    }

    fn secret(&mut self, _label: &str) -> Result<Option<String>> {
        Ok(None)
    }

    fn confirm(&mut self, _question: &str) -> Result<bool> {
        Ok(false)
    }
}
