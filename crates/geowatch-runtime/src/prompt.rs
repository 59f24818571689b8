//! Consent prompt on the terminal, or a fixed answer from `--answer`.

use std::io::Write;

use geowatch::{ConsentAction, ConsentPrompt, ConsentRequest};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::runtime::Handle;

pub struct TerminalPrompt {
    fixed: Option<ConsentAction>,
    runtime: Handle,
}

impl TerminalPrompt {
    pub fn new(fixed: Option<ConsentAction>, runtime: Handle) -> Self {
        Self { fixed, runtime }
    }
}

impl ConsentPrompt for TerminalPrompt {
    fn prompt(&self, request: ConsentRequest) {
        if let Some(action) = self.fixed {
            tracing::info!(app_id = request.app_id(), action = %action, "answering consent prompt from --answer");
            request.respond(action);
            return;
        }

        self.runtime.spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            loop {
                print_menu(&request);
                match lines.next_line().await {
                    Ok(Some(line)) => match parse_answer(&line) {
                        Some(action) => {
                            request.respond(action);
                            return;
                        }
                        None => println!("unrecognized answer: {:?}", line.trim()),
                    },
                    Ok(None) => {
                        tracing::warn!(app_id = request.app_id(), "stdin closed, consent prompt left unanswered");
                        return;
                    }
                    Err(e) => {
                        tracing::warn!(app_id = request.app_id(), error = %e, "failed to read consent answer");
                        return;
                    }
                }
            }
        });
    }
}

fn print_menu(request: &ConsentRequest) {
    println!("{}", request.message());
    for (n, action) in request.actions().iter().enumerate() {
        println!("  {}) {}", n + 1, action.label());
    }
    print!("> ");
    let _ = std::io::stdout().flush();
}

/// Menu number (1-based) or action name.
fn parse_answer(input: &str) -> Option<ConsentAction> {
    let input = input.trim();
    if let Ok(n) = input.parse::<usize>() {
        return n.checked_sub(1).and_then(|i| ConsentAction::ALL.get(i).copied());
    }
    input.parse().ok()
}
