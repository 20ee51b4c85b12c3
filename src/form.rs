//! Line-oriented contact form engine.
//!
//! The SSH channel runs in raw mode, so the server owns every part of the
//! line discipline: echo, backspace-erase, Enter handling. The engine is a
//! pure per-channel state machine; each incoming byte produces a list of
//! [`Action`]s that the transport layer executes. It never touches the
//! network itself, which keeps the whole flow testable byte-by-byte.

use std::mem;
use std::time::Duration;

use tracing::debug;

use crate::contact::{ContactForm, SOURCE_SSH};

const CTRL_C: u8 = 0x03;
const BACKSPACE: u8 = 0x08;
const DEL: u8 = 0x7f;

/// Delay before disconnecting after a successful submission, long enough
/// for the user to read the confirmation.
const SUCCESS_LINGER: Duration = Duration::from_secs(3);

/// Narrowest terminal the boxed banner fits in.
const BANNER_MIN_COLS: u32 = 66;

const CLEAR_SCREEN: &str = "\x1b[2J\x1b[H";

const BANNER: &str = "\
\x1b[36m╔═══════════════════════════════════════════════════════════════╗
║                                                               ║
║   ██████╗  ██████╗███████╗████████╗██╗   ██╗██╗     ███████╗ ║
║   ██╔══██╗██╔════╝██╔════╝╚══██╔══╝╚██╗ ██╔╝██║     ██╔════╝ ║
║   ██████╔╝██║     ███████╗   ██║    ╚████╔╝ ██║     █████╗   ║
║   ██╔═══╝ ██║     ╚════██║   ██║     ╚██╔╝  ██║     ██╔══╝   ║
║   ██║     ╚██████╗███████║   ██║      ██║   ███████╗███████╗ ║
║   ╚═╝      ╚═════╝╚══════╝   ╚═╝      ╚═╝   ╚══════╝╚══════╝ ║
║                                                               ║
║                  Terminal Contact Form v1.0                  ║
║                     https://pcstyle.dev                      ║
╚═══════════════════════════════════════════════════════════════╝\x1b[0m
";

const COMPACT_BANNER: &str = "\
\x1b[36mpcstyle.dev
Terminal Contact Form v1.0\x1b[0m
";

const INSTRUCTIONS: &str =
    "\n\x1b[33mFill out the form below. Press Enter after each field, Ctrl+C to exit.\x1b[0m\n";

/// One entry in the fixed, ordered field sequence.
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub key: &'static str,
    pub name: &'static str,
    pub label: &'static str,
    pub required: bool,
    pub max_len: usize,
}

/// The form's field sequence, in prompt order. Only `message` is validated
/// locally; the contact endpoint validates the optional fields.
pub const FIELDS: [FieldSpec; 6] = [
    FieldSpec {
        key: "message",
        name: "Message",
        label: "\x1b[35m* Message\x1b[0m (required, max 2000 chars)",
        required: true,
        max_len: 2000,
    },
    FieldSpec {
        key: "name",
        name: "Name",
        label: "\x1b[36mName\x1b[0m (optional)",
        required: false,
        max_len: 100,
    },
    FieldSpec {
        key: "email",
        name: "Email",
        label: "\x1b[36mEmail\x1b[0m (optional)",
        required: false,
        max_len: 100,
    },
    FieldSpec {
        key: "discord",
        name: "Discord",
        label: "\x1b[36mDiscord\x1b[0m (optional)",
        required: false,
        max_len: 100,
    },
    FieldSpec {
        key: "phone",
        name: "Phone",
        label: "\x1b[36mPhone\x1b[0m (optional)",
        required: false,
        max_len: 50,
    },
    FieldSpec {
        key: "facebook",
        name: "Facebook",
        label: "\x1b[36mFacebook\x1b[0m (optional)",
        required: false,
        max_len: 200,
    },
];

/// Terminal dimensions reported by the pty request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TermSize {
    pub cols: u32,
    pub rows: u32,
}

impl Default for TermSize {
    fn default() -> Self {
        Self { cols: 80, rows: 24 }
    }
}

/// Engine state, one instance per channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Collecting input for the field at this index.
    Prompting(usize),
    /// All fields collected; submission in flight.
    Submitting,
    Succeeded,
    FailedValidation,
    FailedSubmission,
    Aborted,
}

/// Side effect the transport must perform on behalf of the engine.
/// `Submit` is always the last action in a batch; the driver feeds the
/// result back through [`FormEngine::submission_result`].
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Write bytes to the channel.
    Write(Vec<u8>),
    /// Deliver the form to the contact endpoint.
    Submit(ContactForm),
    /// Close the channel after letting the last output sit on screen.
    CloseAfter(Duration),
    /// Close the channel now.
    Close,
}

/// Per-channel form state machine.
pub struct FormEngine {
    index: usize,
    buffer: String,
    values: Vec<String>,
    state: EngineState,
    size: TermSize,
}

impl FormEngine {
    pub fn new(size: TermSize) -> Self {
        Self {
            index: 0,
            buffer: String::new(),
            values: Vec::with_capacity(FIELDS.len()),
            state: EngineState::Prompting(0),
            size,
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Record new terminal dimensions from a window-change request.
    /// The form is a plain prompt/response flow, so nothing is redrawn;
    /// the size only matters for the banner drawn at start.
    pub fn resize(&mut self, size: TermSize) {
        self.size = size;
    }

    /// Clear the screen, draw the banner and the first prompt.
    pub fn start(&mut self) -> Vec<Action> {
        let banner = if self.size.cols >= BANNER_MIN_COLS {
            BANNER
        } else {
            COMPACT_BANNER
        };

        let mut header = String::new();
        header.push_str(CLEAR_SCREEN);
        header.push_str(&crlf(banner));
        header.push_str(&crlf(INSTRUCTIONS));
        header.push_str(&prompt(0));
        vec![Action::Write(header.into_bytes())]
    }

    /// Process one raw byte from the channel.
    pub fn handle_byte(&mut self, byte: u8) -> Vec<Action> {
        match self.state {
            EngineState::Prompting(_) => self.handle_prompt_byte(byte),
            // "Press Enter to exit": any further keypress ends the session.
            EngineState::FailedValidation | EngineState::FailedSubmission => vec![Action::Close],
            // Succeeded already scheduled its close; Submitting never sees
            // input because the driver awaits the submission first; Aborted
            // is terminal.
            EngineState::Submitting | EngineState::Succeeded | EngineState::Aborted => Vec::new(),
        }
    }

    fn handle_prompt_byte(&mut self, byte: u8) -> Vec<Action> {
        match byte {
            CTRL_C => {
                self.state = EngineState::Aborted;
                vec![
                    Action::Write(b"\r\n\x1b[33mGoodbye!\x1b[0m\r\n".to_vec()),
                    Action::Close,
                ]
            }
            b'\r' | b'\n' => {
                let line = mem::take(&mut self.buffer);
                let mut actions = vec![Action::Write(b"\r\n".to_vec())];
                actions.extend(self.complete_field(line));
                actions
            }
            DEL | BACKSPACE => {
                if self.buffer.is_empty() {
                    Vec::new()
                } else {
                    self.buffer.pop();
                    // Erase visually: cursor left, overwrite, cursor left.
                    vec![Action::Write(b"\x08 \x08".to_vec())]
                }
            }
            b' '..=b'~' => {
                self.buffer.push(byte as char);
                // Raw mode: the client does not echo, so we must.
                vec![Action::Write(vec![byte])]
            }
            _ => Vec::new(),
        }
    }

    /// Store a finished line and either advance to the next prompt or move
    /// into submission.
    fn complete_field(&mut self, line: String) -> Vec<Action> {
        self.values.push(line.trim().to_string());
        // Field values never get logged, only which field finished.
        debug!("Field '{}' completed", FIELDS[self.index].key);
        self.index += 1;

        if self.index < FIELDS.len() {
            self.state = EngineState::Prompting(self.index);
            return vec![Action::Write(prompt(self.index).into_bytes())];
        }

        self.state = EngineState::Submitting;
        let mut actions = vec![Action::Write(
            b"\r\n\x1b[33mSubmitting...\x1b[0m\r\n".to_vec(),
        )];

        if let Err(reason) = self.validate() {
            self.state = EngineState::FailedValidation;
            actions.push(Action::Write(error_line(&reason).into_bytes()));
            actions.push(Action::Write(b"\r\nPress Enter to exit...".to_vec()));
        } else {
            actions.push(Action::Submit(self.form()));
        }
        actions
    }

    /// Local validation of required fields. Optional fields pass through
    /// untouched; the contact endpoint has the real schema.
    fn validate(&self) -> Result<(), String> {
        for (spec, value) in FIELDS.iter().zip(&self.values) {
            if !spec.required {
                continue;
            }
            if value.is_empty() {
                return Err(format!("{} is required!", spec.name));
            }
            if value.chars().count() > spec.max_len {
                return Err(format!(
                    "{} too long (max {} characters)!",
                    spec.name, spec.max_len
                ));
            }
        }
        Ok(())
    }

    /// Feed the submission outcome back into the state machine.
    pub fn submission_result(&mut self, success: bool) -> Vec<Action> {
        if success {
            self.state = EngineState::Succeeded;
            vec![
                Action::Write(
                    success_line("Message sent successfully! Thanks for reaching out.")
                        .into_bytes(),
                ),
                Action::Write(b"\r\nDisconnecting in 3 seconds...\r\n".to_vec()),
                Action::CloseAfter(SUCCESS_LINGER),
            ]
        } else {
            self.state = EngineState::FailedSubmission;
            vec![
                Action::Write(
                    error_line("Failed to send message. Please try again later.").into_bytes(),
                ),
                Action::Write(b"\r\nPress Enter to exit...".to_vec()),
            ]
        }
    }

    fn form(&self) -> ContactForm {
        debug_assert_eq!(self.values.len(), FIELDS.len());
        ContactForm {
            message: self.values[0].clone(),
            name: self.values[1].clone(),
            email: self.values[2].clone(),
            discord: self.values[3].clone(),
            phone: self.values[4].clone(),
            facebook: self.values[5].clone(),
            source: SOURCE_SSH,
        }
    }
}

fn prompt(index: usize) -> String {
    format!("\r\n{}: ", FIELDS[index].label)
}

fn error_line(message: &str) -> String {
    format!("\r\n\x1b[31m✗ {}\x1b[0m\r\n", message)
}

fn success_line(message: &str) -> String {
    format!("\r\n\x1b[32m✓ {}\x1b[0m\r\n", message)
}

/// Raw mode gets no output post-processing either, so bare LFs would
/// stair-step. Normalize to CRLF.
fn crlf(text: &str) -> String {
    text.replace('\n', "\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> FormEngine {
        let mut engine = FormEngine::new(TermSize::default());
        engine.start();
        engine
    }

    fn feed(engine: &mut FormEngine, bytes: &[u8]) -> Vec<Action> {
        let mut actions = Vec::new();
        for &b in bytes {
            actions.extend(engine.handle_byte(b));
        }
        actions
    }

    fn type_lines(engine: &mut FormEngine, lines: &[&str]) -> Vec<Action> {
        let mut actions = Vec::new();
        for line in lines {
            actions.extend(feed(engine, line.as_bytes()));
            actions.extend(engine.handle_byte(b'\r'));
        }
        actions
    }

    fn submitted(actions: &[Action]) -> Option<&ContactForm> {
        actions.iter().find_map(|a| match a {
            Action::Submit(form) => Some(form),
            _ => None,
        })
    }

    fn written(actions: &[Action]) -> String {
        let mut out = Vec::new();
        for action in actions {
            if let Action::Write(bytes) = action {
                out.extend_from_slice(bytes);
            }
        }
        String::from_utf8_lossy(&out).into_owned()
    }

    #[test]
    fn test_six_lines_produce_submission_in_field_order() {
        let mut engine = engine();
        let actions = type_lines(
            &mut engine,
            &["hello there", "Jan", "jan@example.com", "jan#1234", "123", "fb"],
        );

        let form = submitted(&actions).expect("no submission produced");
        assert_eq!(form.message, "hello there");
        assert_eq!(form.name, "Jan");
        assert_eq!(form.email, "jan@example.com");
        assert_eq!(form.discord, "jan#1234");
        assert_eq!(form.phone, "123");
        assert_eq!(form.facebook, "fb");
        assert_eq!(form.source, "ssh");
        assert_eq!(engine.state(), EngineState::Submitting);
    }

    #[test]
    fn test_optional_fields_may_be_empty() {
        let mut engine = engine();
        let actions = type_lines(&mut engine, &["hello world", "", "", "", "", ""]);

        let form = submitted(&actions).expect("no submission produced");
        assert_eq!(form.message, "hello world");
        assert_eq!(form.name, "");
        assert_eq!(form.email, "");
        assert_eq!(form.discord, "");
        assert_eq!(form.phone, "");
        assert_eq!(form.facebook, "");
    }

    #[test]
    fn test_values_are_trimmed() {
        let mut engine = engine();
        let actions = type_lines(&mut engine, &["  hi  ", " a ", "", "", "", ""]);

        let form = submitted(&actions).expect("no submission produced");
        assert_eq!(form.message, "hi");
        assert_eq!(form.name, "a");
    }

    #[test]
    fn test_printable_bytes_are_echoed() {
        let mut engine = engine();
        let actions = feed(&mut engine, b"hi");
        assert_eq!(
            actions,
            vec![Action::Write(vec![b'h']), Action::Write(vec![b'i'])]
        );
    }

    #[test]
    fn test_printable_range_bounds() {
        let mut engine = engine();
        assert!(!feed(&mut engine, &[b' ']).is_empty());
        assert!(!feed(&mut engine, &[b'~']).is_empty());
        assert!(feed(&mut engine, &[0x1f]).is_empty());
        assert!(feed(&mut engine, &[0x80]).is_empty());
    }

    #[test]
    fn test_non_printable_bytes_are_ignored() {
        let mut engine = engine();
        // Escape, NUL, tab, a stray continuation byte.
        let actions = feed(&mut engine, &[0x1b, 0x00, 0x09, 0xbf]);
        assert!(actions.is_empty());

        let actions = type_lines(&mut engine, &["ok", "", "", "", "", ""]);
        assert_eq!(submitted(&actions).unwrap().message, "ok");
    }

    #[test]
    fn test_backspace_removes_last_character() {
        let mut engine = engine();
        feed(&mut engine, b"abcd");
        let actions = feed(&mut engine, &[0x7f, 0x7f]);
        assert_eq!(
            actions,
            vec![
                Action::Write(b"\x08 \x08".to_vec()),
                Action::Write(b"\x08 \x08".to_vec()),
            ]
        );
        feed(&mut engine, b"e");

        let actions = type_lines(&mut engine, &["", "", "", "", "", ""]);
        assert_eq!(submitted(&actions).unwrap().message, "abe");
    }

    #[test]
    fn test_ctrl_h_also_erases() {
        let mut engine = engine();
        feed(&mut engine, b"xy");
        feed(&mut engine, &[0x08]);
        let actions = type_lines(&mut engine, &["", "", "", "", "", ""]);
        assert_eq!(submitted(&actions).unwrap().message, "x");
    }

    #[test]
    fn test_backspace_on_empty_buffer_is_noop() {
        let mut engine = engine();
        let actions = feed(&mut engine, &[0x7f, 0x7f, 0x7f]);
        assert!(actions.is_empty());

        feed(&mut engine, b"ok");
        let actions = type_lines(&mut engine, &["", "", "", "", "", ""]);
        assert_eq!(submitted(&actions).unwrap().message, "ok");
    }

    #[test]
    fn test_interrupt_aborts_without_submitting() {
        let mut engine = engine();
        feed(&mut engine, b"half a mess");
        let actions = feed(&mut engine, &[0x03]);

        assert_eq!(engine.state(), EngineState::Aborted);
        assert!(submitted(&actions).is_none());
        assert!(actions.contains(&Action::Close));
        assert!(written(&actions).contains("Goodbye!"));

        // Terminal state: further input does nothing.
        assert!(feed(&mut engine, b"more\r").is_empty());
    }

    #[test]
    fn test_interrupt_in_later_field_aborts() {
        let mut engine = engine();
        type_lines(&mut engine, &["hello", "Jan", "jan@example.com"]);
        let actions = feed(&mut engine, &[0x03]);
        assert_eq!(engine.state(), EngineState::Aborted);
        assert!(submitted(&actions).is_none());
    }

    #[test]
    fn test_empty_message_fails_validation() {
        let mut engine = engine();
        let actions = type_lines(&mut engine, &["", "", "", "", "", ""]);

        assert_eq!(engine.state(), EngineState::FailedValidation);
        assert!(submitted(&actions).is_none());
        assert!(written(&actions).contains("Message is required!"));
        assert!(written(&actions).contains("Press Enter to exit..."));

        // Any keypress ends the session.
        assert_eq!(engine.handle_byte(b'\r'), vec![Action::Close]);
    }

    #[test]
    fn test_whitespace_only_message_fails_validation() {
        let mut engine = engine();
        let actions = type_lines(&mut engine, &["   ", "", "", "", "", ""]);
        assert_eq!(engine.state(), EngineState::FailedValidation);
        assert!(submitted(&actions).is_none());
    }

    #[test]
    fn test_message_length_boundary() {
        let exact = "a".repeat(2000);
        let mut engine = engine();
        let actions = type_lines(&mut engine, &[exact.as_str(), "", "", "", "", ""]);
        assert_eq!(submitted(&actions).unwrap().message.len(), 2000);

        let over = "a".repeat(2001);
        let mut engine = self::engine();
        let actions = type_lines(&mut engine, &[over.as_str(), "", "", "", "", ""]);
        assert_eq!(engine.state(), EngineState::FailedValidation);
        assert!(submitted(&actions).is_none());
        assert!(written(&actions).contains("Message too long (max 2000 characters)!"));
    }

    #[test]
    fn test_successful_submission_schedules_delayed_close() {
        let mut engine = engine();
        type_lines(&mut engine, &["hello", "", "", "", "", ""]);

        let actions = engine.submission_result(true);
        assert_eq!(engine.state(), EngineState::Succeeded);
        assert!(written(&actions).contains("Message sent successfully!"));
        assert!(actions.contains(&Action::CloseAfter(Duration::from_secs(3))));

        // Input after success is ignored; the close is already scheduled.
        assert!(engine.handle_byte(b'x').is_empty());
    }

    #[test]
    fn test_failed_submission_waits_for_keypress() {
        let mut engine = engine();
        let actions = type_lines(&mut engine, &["hello", "", "", "", "", ""]);
        assert!(submitted(&actions).is_some());

        let actions = engine.submission_result(false);
        assert_eq!(engine.state(), EngineState::FailedSubmission);
        assert!(written(&actions).contains("Failed to send message."));
        assert!(submitted(&actions).is_none());
        assert!(!actions.iter().any(|a| matches!(a, Action::CloseAfter(_))));

        // One further keypress closes; no retry is ever produced.
        assert_eq!(engine.handle_byte(b'q'), vec![Action::Close]);
    }

    #[test]
    fn test_enter_accepts_lf_as_well_as_cr() {
        let mut engine = engine();
        feed(&mut engine, b"hey");
        engine.handle_byte(b'\n');
        assert_eq!(engine.state(), EngineState::Prompting(1));
    }

    #[test]
    fn test_prompts_advance_through_all_fields() {
        let mut engine = engine();
        let mut all = String::new();
        all.push_str(&written(&engine.start()));
        all.push_str(&written(&type_lines(
            &mut engine,
            &["msg", "", "", "", "", ""],
        )));
        for spec in &FIELDS {
            assert!(all.contains(spec.label), "missing prompt for {}", spec.key);
        }
    }

    #[test]
    fn test_wide_terminal_gets_boxed_banner() {
        let mut engine = FormEngine::new(TermSize { cols: 80, rows: 24 });
        let header = written(&engine.start());
        assert!(header.contains("██"));
        assert!(header.contains("Ctrl+C to exit"));
    }

    #[test]
    fn test_narrow_terminal_gets_compact_banner() {
        let mut engine = FormEngine::new(TermSize { cols: 40, rows: 12 });
        let header = written(&engine.start());
        assert!(!header.contains("██"));
        assert!(header.contains("pcstyle.dev"));
        assert!(header.contains("Ctrl+C to exit"));
    }
}
