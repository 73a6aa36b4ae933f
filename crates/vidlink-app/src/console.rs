//! Line-oriented console: user commands and incoming-call prompts.
//!
//! ```text
//!  stdin thread ──lines──► console loop ──┬── y / n ──► ConsoleUi (pending prompt)
//!                                         └── command ─► CallControl / directory
//! ```
//!
//! Stdin is read on a plain OS thread. A blocking tokio task would hold the
//! runtime open at exit while it waits for a line that never comes.

use std::io::{self, BufRead};
use std::str::FromStr;
use std::sync::mpsc as std_mpsc;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info};
use vidlink_signaling::CallUi;

pub const HELP: &str = "\
commands:
  call <nick>   call a registered user
  hold          put the current call on hold
  resume        resume a held call
  end           hang up
  list          list registered users
  status        show the call state
  quit          hang up, unregister and exit";

// ── Commands ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Call(String),
    Hold,
    Resume,
    End,
    List,
    Status,
    Help,
    Quit,
}

impl FromStr for Command {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let verb = words.next().ok_or_else(|| "empty command".to_owned())?;
        let cmd = match verb.to_ascii_lowercase().as_str() {
            "call" => match words.next() {
                Some(nick) => Command::Call(nick.to_owned()),
                None => return Err("usage: call <nick>".to_owned()),
            },
            "hold" => Command::Hold,
            "resume" => Command::Resume,
            "end" | "hangup" => Command::End,
            "list" => Command::List,
            "status" => Command::Status,
            "help" | "?" => Command::Help,
            "quit" | "exit" => Command::Quit,
            other => return Err(format!("unknown command '{other}' (try 'help')")),
        };
        if words.next().is_some() {
            return Err(format!("too many arguments for '{verb}'"));
        }
        Ok(cmd)
    }
}

/// Forward stdin lines until EOF.
pub fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            match line {
                Ok(line) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    debug!("stdin closed: {}", e);
                    break;
                }
            }
        }
    });
    rx
}

// ── ConsoleUi ─────────────────────────────────────────────────────────────────

/// [`CallUi`] on the terminal. An incoming call parks the listener until the
/// console loop routes a `y`/`n` line here, or `answer_timeout` passes.
pub struct ConsoleUi {
    pending: Mutex<Option<std_mpsc::Sender<bool>>>,
    answer_timeout: Duration,
}

impl ConsoleUi {
    pub fn new(answer_timeout: Duration) -> Self {
        Self { pending: Mutex::new(None), answer_timeout }
    }

    /// Deliver `line` to a waiting prompt. Returns `false` when the line is
    /// not a yes/no answer or nothing is waiting for one.
    pub fn answer(&self, line: &str) -> bool {
        let accept = match line.trim().to_ascii_lowercase().as_str() {
            "y" | "yes" => true,
            "n" | "no" => false,
            _ => return false,
        };
        let pending = match self.pending.lock() {
            Ok(mut pending) => pending.take(),
            Err(_) => None,
        };
        match pending {
            Some(tx) => tx.send(accept).is_ok(),
            None => false,
        }
    }

    pub fn is_prompting(&self) -> bool {
        self.pending.lock().map(|p| p.is_some()).unwrap_or(false)
    }
}

impl CallUi for ConsoleUi {
    fn confirm_incoming(&self, nick: &str) -> bool {
        let (tx, rx) = std_mpsc::channel();
        match self.pending.lock() {
            Ok(mut pending) => *pending = Some(tx),
            Err(_) => return false,
        }
        println!("Incoming call from {nick}. Accept? [y/n]");

        let accepted = rx.recv_timeout(self.answer_timeout).unwrap_or(false);
        if let Ok(mut pending) = self.pending.lock() {
            pending.take();
        }
        if !accepted {
            info!("Declined call from {}", nick);
        }
        accepted
    }

    fn notify(&self, title: &str, message: &str) {
        println!("[{title}] {message}");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn parses_commands() {
        assert_eq!("call alice".parse::<Command>().unwrap(), Command::Call("alice".into()));
        assert_eq!("  HOLD ".parse::<Command>().unwrap(), Command::Hold);
        assert_eq!("hangup".parse::<Command>().unwrap(), Command::End);
        assert_eq!("exit".parse::<Command>().unwrap(), Command::Quit);
    }

    #[test]
    fn rejects_bad_commands() {
        assert!("call".parse::<Command>().is_err());
        assert!("status now".parse::<Command>().is_err());
        assert!("dance".parse::<Command>().is_err());
        assert!("".parse::<Command>().is_err());
    }

    #[test]
    fn answer_without_prompt_is_not_consumed() {
        let ui = ConsoleUi::new(Duration::from_secs(1));
        assert!(!ui.answer("y"));
        assert!(!ui.is_prompting());
    }

    #[test]
    fn prompt_takes_console_answer() {
        let ui = Arc::new(ConsoleUi::new(Duration::from_secs(5)));
        let prompt = {
            let ui = ui.clone();
            std::thread::spawn(move || ui.confirm_incoming("bob"))
        };
        while !ui.is_prompting() {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(!ui.answer("maybe"));
        assert!(ui.answer("Y"));
        assert!(prompt.join().unwrap());
        assert!(!ui.is_prompting());
    }

    #[test]
    fn unanswered_prompt_declines() {
        let ui = ConsoleUi::new(Duration::from_millis(30));
        assert!(!ui.confirm_incoming("carol"));
        assert!(!ui.is_prompting());
    }
}
