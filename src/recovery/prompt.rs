use std::io::{self, BufRead, Write};
use std::str::FromStr;

use log::{info, warn};
use rocket::tokio::task;
use serde::{Deserialize, Serialize};

use crate::model::VoteSession;

/// The operator's answer when an unfinished session is found at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecoveryChoice {
    /// Hand the recovered results to the export collaborator and finish.
    Export,
    /// Throw the recovered results away.
    Discard,
    /// Carry on voting where the interrupted session left off.
    Resume,
}

impl FromStr for RecoveryChoice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "1" | "export" | "guardar" => Ok(Self::Export),
            "2" | "discard" | "descartar" => Ok(Self::Discard),
            "3" | "resume" | "continuar" => Ok(Self::Resume),
            other => Err(format!("not a recovery choice: {other:?}")),
        }
    }
}

/// Asks the operator what to do with a recovered session.
/// There is no way to decline: an answer must be produced.
#[rocket::async_trait]
pub trait OperatorPrompt: Send + Sync {
    async fn choose(&self, recovered: &VoteSession) -> RecoveryChoice;
}

/// A choice fixed in advance, for unattended stations.
#[rocket::async_trait]
impl OperatorPrompt for RecoveryChoice {
    async fn choose(&self, recovered: &VoteSession) -> RecoveryChoice {
        info!(
            "Recovered session with {} votes; preconfigured choice is {self:?}",
            recovered.total_votes()
        );
        *self
    }
}

/// Asks on the controlling terminal.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalPrompt;

impl TerminalPrompt {
    fn ask(summary: String) -> RecoveryChoice {
        let stdin = io::stdin();
        let mut stdout = io::stdout();
        loop {
            let _ = write!(
                stdout,
                "{summary}\n\
                 Unsaved votes from last time were found. What do you want to do?\n  \
                 [1] Export results\n  \
                 [2] Discard\n  \
                 [3] Continue voting\n> "
            );
            let _ = stdout.flush();

            let mut line = String::new();
            match stdin.lock().read_line(&mut line) {
                // No terminal to ask; keep the votes rather than lose them.
                Ok(0) => {
                    warn!("No operator input available, resuming the recovered session");
                    return RecoveryChoice::Resume;
                }
                Ok(_) => match line.parse() {
                    Ok(choice) => return choice,
                    Err(e) => {
                        let _ = writeln!(stdout, "{e}");
                    }
                },
                Err(e) => {
                    warn!("Could not read operator input ({e}), resuming the recovered session");
                    return RecoveryChoice::Resume;
                }
            }
        }
    }
}

#[rocket::async_trait]
impl OperatorPrompt for TerminalPrompt {
    async fn choose(&self, recovered: &VoteSession) -> RecoveryChoice {
        let summary = recovered
            .iter()
            .map(|tally| format!("  {} ({}): {}", tally.name, tally.id, tally.votes))
            .collect::<Vec<_>>()
            .join("\n");
        task::spawn_blocking(move || Self::ask(summary))
            .await
            .unwrap_or(RecoveryChoice::Resume)
    }
}
