//! Interactive prompts. Flows talk to a [`Prompter`] so the terminal front end
//! and the tests can drive the same code.

use std::io::{self, BufRead, Write};

use tracing::warn;

/// One entry in a pick list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PickItem {
    pub label: String,
    pub detail: String,
}

impl PickItem {
    pub fn new(label: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    Info,
    Warning,
    Error,
}

/// User interaction surface. Every method returns `None`/empty when the user
/// cancels.
pub trait Prompter {
    /// Returns the index of the chosen item.
    fn pick(&mut self, placeholder: &str, items: &[PickItem]) -> Option<usize>;
    /// Returns the indices of the chosen items.
    fn pick_many(&mut self, placeholder: &str, items: &[PickItem]) -> Vec<usize>;
    fn input(&mut self, prompt: &str, placeholder: &str, value: &str) -> Option<String>;
    fn password(&mut self, prompt: &str) -> Option<String>;
    fn notify(&mut self, level: Notice, message: &str);
}

/// Prompts on stdin/stderr; results go to stdout.
#[derive(Debug, Default)]
pub struct TerminalPrompter;

impl TerminalPrompter {
    fn read_line(&self) -> Option<String> {
        let mut line = String::new();
        match io::stdin().lock().read_line(&mut line) {
            Ok(0) => None,
            Ok(_) => Some(line.trim_end_matches(['\r', '\n']).to_string()),
            Err(e) => {
                warn!(error = %e, "failed to read from stdin");
                None
            }
        }
    }

    fn show_items(&self, placeholder: &str, items: &[PickItem]) {
        eprintln!("{placeholder}");
        for (index, item) in items.iter().enumerate() {
            if item.detail.is_empty() {
                eprintln!("  {:>3}) {}", index + 1, item.label);
            } else {
                eprintln!("  {:>3}) {}  ({})", index + 1, item.label, item.detail);
            }
        }
    }
}

/// Parses a 1-based selection into a 0-based index.
fn parse_choice(raw: &str, len: usize) -> Option<usize> {
    let choice: usize = raw.trim().parse().ok()?;
    (1..=len).contains(&choice).then(|| choice - 1)
}

impl Prompter for TerminalPrompter {
    fn pick(&mut self, placeholder: &str, items: &[PickItem]) -> Option<usize> {
        if items.is_empty() {
            return None;
        }
        self.show_items(placeholder, items);
        eprint!("> ");
        let _ = io::stderr().flush();
        parse_choice(&self.read_line()?, items.len())
    }

    fn pick_many(&mut self, placeholder: &str, items: &[PickItem]) -> Vec<usize> {
        if items.is_empty() {
            return Vec::new();
        }
        self.show_items(placeholder, items);
        eprint!("numbers separated by commas> ");
        let _ = io::stderr().flush();
        let Some(line) = self.read_line() else {
            return Vec::new();
        };
        let mut chosen: Vec<usize> = line
            .split([',', ' '])
            .filter_map(|part| parse_choice(part, items.len()))
            .collect();
        chosen.sort_unstable();
        chosen.dedup();
        chosen
    }

    fn input(&mut self, prompt: &str, placeholder: &str, value: &str) -> Option<String> {
        if value.is_empty() {
            eprint!("{prompt} [{placeholder}]: ");
        } else {
            eprint!("{prompt} (default: {value}): ");
        }
        let _ = io::stderr().flush();
        let line = self.read_line()?;
        let answer = if line.trim().is_empty() { value.to_string() } else { line.trim().to_string() };
        (!answer.is_empty()).then_some(answer)
    }

    fn password(&mut self, prompt: &str) -> Option<String> {
        eprint!("{prompt}: ");
        let _ = io::stderr().flush();
        match rpassword::read_password() {
            Ok(password) if !password.is_empty() => Some(password),
            Ok(_) => None,
            Err(e) => {
                warn!(error = %e, "failed to read password");
                None
            }
        }
    }

    fn notify(&mut self, level: Notice, message: &str) {
        match level {
            Notice::Info => println!("{message}"),
            Notice::Warning => eprintln!("warning: {message}"),
            Notice::Error => eprintln!("error: {message}"),
        }
    }
}

#[cfg(test)]
pub(crate) mod scripted {
    //! Prompter that replays canned answers and records notifications.

    use std::collections::VecDeque;

    use super::{Notice, PickItem, Prompter};

    #[derive(Debug)]
    pub enum Answer {
        Pick(Option<usize>),
        PickLabel(String),
        PickMany(Vec<usize>),
        Input(Option<String>),
        Password(Option<String>),
    }

    #[derive(Debug, Default)]
    pub struct ScriptedPrompter {
        answers: VecDeque<Answer>,
        pub notices: Vec<(Notice, String)>,
        pub shown: Vec<Vec<PickItem>>,
        pub input_defaults: Vec<String>,
    }

    impl ScriptedPrompter {
        pub fn new(answers: Vec<Answer>) -> Self {
            Self {
                answers: answers.into(),
                ..Self::default()
            }
        }

        pub fn has(&self, level: Notice, fragment: &str) -> bool {
            self.notices
                .iter()
                .any(|(l, message)| *l == level && message.contains(fragment))
        }

        fn next(&mut self) -> Answer {
            self.answers.pop_front().expect("script ran out of answers")
        }
    }

    impl Prompter for ScriptedPrompter {
        fn pick(&mut self, _placeholder: &str, items: &[PickItem]) -> Option<usize> {
            self.shown.push(items.to_vec());
            match self.next() {
                Answer::Pick(choice) => choice,
                Answer::PickLabel(label) => items.iter().position(|item| item.label == label),
                other => panic!("expected pick, script had {other:?}"),
            }
        }

        fn pick_many(&mut self, _placeholder: &str, items: &[PickItem]) -> Vec<usize> {
            self.shown.push(items.to_vec());
            match self.next() {
                Answer::PickMany(choices) => choices,
                other => panic!("expected pick_many, script had {other:?}"),
            }
        }

        fn input(&mut self, _prompt: &str, _placeholder: &str, value: &str) -> Option<String> {
            self.input_defaults.push(value.to_string());
            match self.next() {
                Answer::Input(answer) => answer,
                other => panic!("expected input, script had {other:?}"),
            }
        }

        fn password(&mut self, _prompt: &str) -> Option<String> {
            match self.next() {
                Answer::Password(answer) => answer,
                other => panic!("expected password, script had {other:?}"),
            }
        }

        fn notify(&mut self, level: Notice, message: &str) {
            self.notices.push((level, message.to_string()));
        }
    }
}
