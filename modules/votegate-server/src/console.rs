//! Interactive run loop for [`ConsoleHost`].
//!
//! This loop is the main context: it reads host events one line at a time
//! and executes whatever the gate schedules. Suspended attempts are not
//! awaited inline; their verdicts arrive on the main queue.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::AsyncBufRead;
use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use votegate_common::load_config;
use votegate_engine::{Interception, MainTask, Resolution};
use votegate_events::{MigrationOutcome, StoreError};

use crate::app::VoteGate;
use crate::host::ConsoleHost;

pub const USAGE: &str = "\
commands:
  join <name>                     bring a player online
  leave <name>                    take a player offline
  grant <name> <permission>       give a player a permission
  vote <name> [service]           deliver a vote
  cmd <name> </command ...>       a player runs a command
  console [player] <name> <cmd>   the console dispatches a directed command
  voted <name>                    cached vote status
  info                            store and gate status
  wipe confirm                    delete every vote
  migrate <from> <to>             copy votes between sqlite and mysql
  reload                          re-read the config file
  quit";

/// One parsed input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleLine {
    Join(String),
    Leave(String),
    Grant { name: String, permission: String },
    Vote { name: String, service: Option<String> },
    Command { name: String, message: String },
    Console(String),
    Voted(String),
    Info,
    Wipe(String),
    Migrate { from: String, to: String },
    Reload,
    Help,
    Quit,
}

impl ConsoleLine {
    /// `Ok(None)` for a blank line.
    pub fn parse(line: &str) -> Result<Option<Self>, String> {
        let line = line.trim();
        let Some(verb) = line.split_whitespace().next() else {
            return Ok(None);
        };
        let rest = line[verb.len()..].trim();
        let mut args = rest.split_whitespace();

        let parsed = match verb.to_lowercase().as_str() {
            "join" => ConsoleLine::Join(required(args.next(), "join <name>")?),
            "leave" => ConsoleLine::Leave(required(args.next(), "leave <name>")?),
            "grant" => ConsoleLine::Grant {
                name: required(args.next(), "grant <name> <permission>")?,
                permission: required(args.next(), "grant <name> <permission>")?,
            },
            "vote" => ConsoleLine::Vote {
                name: required(args.next(), "vote <name> [service]")?,
                service: args.next().map(str::to_string),
            },
            "cmd" => {
                let name = required(args.next(), "cmd <name> </command ...>")?;
                let message = rest[name.len()..].trim();
                if message.is_empty() {
                    return Err("usage: cmd <name> </command ...>".to_string());
                }
                let message = if message.starts_with('/') {
                    message.to_string()
                } else {
                    format!("/{message}")
                };
                ConsoleLine::Command { name, message }
            }
            "console" if !rest.is_empty() => ConsoleLine::Console(rest.to_string()),
            "console" => return Err("usage: console <command ...>".to_string()),
            "voted" => ConsoleLine::Voted(required(args.next(), "voted <name>")?),
            "info" => ConsoleLine::Info,
            "wipe" => ConsoleLine::Wipe(args.next().unwrap_or_default().to_string()),
            "migrate" => ConsoleLine::Migrate {
                from: required(args.next(), "migrate <from> <to>")?,
                to: required(args.next(), "migrate <from> <to>")?,
            },
            "reload" => ConsoleLine::Reload,
            "help" => ConsoleLine::Help,
            "quit" | "exit" => ConsoleLine::Quit,
            other => return Err(format!("unknown command `{other}`, try `help`")),
        };
        Ok(Some(parsed))
    }
}

fn required(arg: Option<&str>, usage: &str) -> Result<String, String> {
    arg.map(str::to_string).ok_or_else(|| format!("usage: {usage}"))
}

#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

pub struct Console<'a, W> {
    app: &'a VoteGate<ConsoleHost>,
    host: Arc<ConsoleHost>,
    config_path: Option<PathBuf>,
    out: W,
    pending: Vec<JoinHandle<Resolution>>,
}

impl<'a, W: Write> Console<'a, W> {
    pub fn new(
        app: &'a VoteGate<ConsoleHost>,
        host: Arc<ConsoleHost>,
        config_path: Option<PathBuf>,
        out: W,
    ) -> Self {
        Self {
            app,
            host,
            config_path,
            out,
            pending: Vec::new(),
        }
    }

    pub fn into_output(self) -> W {
        self.out
    }

    /// Process `input` until it ends or `quit`, then let every suspended
    /// attempt settle and run what it scheduled.
    pub async fn run<R>(&mut self, input: R, main: &mut mpsc::UnboundedReceiver<MainTask>) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = input.lines();
        loop {
            tokio::select! {
                biased;
                Some(task) = main.recv() => self.perform(task)?,
                line = lines.next_line() => {
                    let Some(line) = line.context("Failed to read console input")? else {
                        break;
                    };
                    if self.handle_line(&line).await? == Flow::Quit {
                        break;
                    }
                }
            }
        }
        self.settle(main).await
    }

    async fn settle(&mut self, main: &mut mpsc::UnboundedReceiver<MainTask>) -> Result<()> {
        loop {
            for handle in std::mem::take(&mut self.pending) {
                let _ = handle.await;
            }
            let mut ran = false;
            while let Ok(task) = main.try_recv() {
                self.perform(task)?;
                ran = true;
            }
            if !ran && self.pending.is_empty() {
                return Ok(());
            }
        }
    }

    /// Execute a main-context task.
    fn perform(&mut self, task: MainTask) -> Result<()> {
        match task {
            MainTask::PerformCommand { actor, command } => {
                let message = format!("/{command}");
                let interception = self.app.on_command(&actor, &message);
                self.track(interception, |out| writeln!(out, "{} ran {message}", actor.name))?;
            }
            MainTask::DispatchConsole { command } => {
                writeln!(self.out, "console ran {command}")?;
            }
            MainTask::Notify { actor, message } => {
                writeln!(self.out, "[to {}] {message}", actor.name)?;
            }
        }
        Ok(())
    }

    /// Run `proceed` for a pass-through, or remember the suspended attempt.
    fn track(
        &mut self,
        interception: Interception,
        proceed: impl FnOnce(&mut W) -> std::io::Result<()>,
    ) -> Result<()> {
        match interception {
            Interception::PassThrough => proceed(&mut self.out)?,
            Interception::Suspended(handle) => self.pending.push(handle),
        }
        Ok(())
    }

    async fn handle_line(&mut self, line: &str) -> Result<Flow> {
        let parsed = match ConsoleLine::parse(line) {
            Ok(Some(parsed)) => parsed,
            Ok(None) => return Ok(Flow::Continue),
            Err(usage) => {
                writeln!(self.out, "{usage}")?;
                return Ok(Flow::Continue);
            }
        };

        match parsed {
            ConsoleLine::Join(name) => {
                let actor = self.host.join(&name);
                writeln!(self.out, "{actor} joined")?;
            }
            ConsoleLine::Leave(name) => {
                if self.host.leave(&name).is_some() {
                    writeln!(self.out, "{name} left")?;
                }
            }
            ConsoleLine::Grant { name, permission } => {
                self.host.grant(&name, &permission);
                writeln!(self.out, "{name} granted {permission}")?;
            }
            ConsoleLine::Vote { name, service } => match self.app.on_vote(&name, service.as_deref()) {
                Some(vote) => writeln!(self.out, "vote from {} recorded for {}", vote.source, vote.actor)?,
                None => writeln!(self.out, "vote ignored")?,
            },
            ConsoleLine::Command { name, message } => {
                let actor = self.host.actor(&name);
                let interception = self.app.on_command(&actor, &message);
                self.track(interception, |out| writeln!(out, "{name} ran {message}"))?;
            }
            ConsoleLine::Console(command) => {
                let interception = self.app.on_console(&command);
                self.track(interception, |out| writeln!(out, "console ran {command}"))?;
            }
            ConsoleLine::Voted(name) => {
                let voted = self.app.has_voted(&self.host.actor(&name));
                writeln!(self.out, "{name} has voted: {}", if voted { "yes" } else { "no" })?;
            }
            ConsoleLine::Info => {
                let report = self.app.info().await;
                writeln!(self.out, "{report}")?;
            }
            ConsoleLine::Wipe(token) => match self.app.wipe(&token).await {
                Ok(deleted) => writeln!(self.out, "wiped {deleted} vote records")?,
                Err(e) => writeln!(self.out, "{e}")?,
            },
            ConsoleLine::Migrate { from, to } => match self.app.migrate(&from, &to).await {
                Ok(MigrationOutcome::Copied(n)) => writeln!(self.out, "migrated {n} vote records")?,
                Ok(MigrationOutcome::Skipped) => {
                    writeln!(self.out, "source and destination are the same database")?
                }
                Ok(MigrationOutcome::Failed(e)) => writeln!(self.out, "migration failed: {e}")?,
                Err(e) => writeln!(self.out, "{e}")?,
            },
            ConsoleLine::Reload => self.reload().await?,
            ConsoleLine::Help => writeln!(self.out, "{USAGE}")?,
            ConsoleLine::Quit => return Ok(Flow::Quit),
        }
        Ok(Flow::Continue)
    }

    async fn reload(&mut self) -> Result<()> {
        let Some(path) = self.config_path.clone() else {
            writeln!(self.out, "no config file to reload")?;
            return Ok(());
        };
        match load_config(&path) {
            Ok(config) => match self.app.reload(config).await {
                Ok(()) => writeln!(self.out, "configuration reloaded")?,
                Err(StoreError::Config(e)) => writeln!(self.out, "reload failed: {e}")?,
                Err(e) => writeln!(self.out, "configuration reloaded, store unavailable: {e}")?,
            },
            Err(e) => writeln!(self.out, "reload failed: {e}")?,
        }
        Ok(())
    }
}
