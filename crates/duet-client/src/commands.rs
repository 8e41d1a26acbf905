//! Terminal command parsing and dispatch.

use std::future::Future;
use std::ops::ControlFlow;
use std::str::FromStr;

use tokio::task::JoinHandle;
use tracing::debug;

use duet_core::application::call_controller::CallHandle;
use duet_core::error::{ActivationError, CallError};

pub const HELP: &str = "\
commands:
  call <id>   ring a peer
  accept      answer the ringing call
  reject      decline the ringing call
  mute        toggle the microphone
  leave       hang up
  peers       list call participants
  state       show the call state
  help        show this text
  quit        leave and exit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Call(String),
    Accept,
    Reject,
    Mute,
    Leave,
    Peers,
    State,
    Help,
    Quit,
}

impl FromStr for Command {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (verb, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        match verb.to_ascii_lowercase().as_str() {
            "call" => Ok(Self::Call(rest.trim().to_owned())),
            "accept" | "a" => Ok(Self::Accept),
            "reject" | "r" => Ok(Self::Reject),
            "mute" | "m" => Ok(Self::Mute),
            "leave" | "hangup" => Ok(Self::Leave),
            "peers" | "p" => Ok(Self::Peers),
            "state" | "s" => Ok(Self::State),
            "help" | "?" => Ok(Self::Help),
            "quit" | "exit" | "q" => Ok(Self::Quit),
            other => Err(format!("unknown command `{other}`; type `help`")),
        }
    }
}

/// Queue one command on the call controller and return without waiting for
/// it, so a slow accept never holds up the next line. The reply is printed
/// by the returned task.
pub fn dispatch(handle: &CallHandle, command: Command) -> ControlFlow<(), Option<JoinHandle<()>>> {
    debug!(?command, "Dispatching command");
    match command {
        Command::Call(target) => ControlFlow::Continue(Some(report(handle.call(&target)))),
        Command::Accept => ControlFlow::Continue(Some(report(handle.accept()))),
        Command::Reject => ControlFlow::Continue(Some(report(handle.reject()))),
        Command::Leave => ControlFlow::Continue(Some(report(handle.leave()))),
        Command::Mute => {
            let muted = handle.toggle_mute();
            ControlFlow::Continue(Some(report(async move { muted.await.map(|_| ()) })))
        }
        Command::State => {
            let state = handle.state();
            let handle = handle.clone();
            ControlFlow::Continue(Some(report(async move {
                let state = state.await?;
                let muted = if handle.is_muted() { ", muted" } else { "" };
                println!("{state}{muted}");
                Ok(())
            })))
        }
        Command::Peers => {
            print_participants(handle);
            ControlFlow::Continue(None)
        }
        Command::Help => {
            println!("{HELP}");
            ControlFlow::Continue(None)
        }
        Command::Quit => ControlFlow::Break(()),
    }
}

fn report(
    reply: impl Future<Output = Result<(), CallError>> + Send + 'static,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        match reply.await {
            Ok(()) | Err(CallError::Activation(ActivationError::Cancelled)) => {}
            Err(e) => println!("! {e}"),
        }
    })
}

fn print_participants(handle: &CallHandle) {
    let participants = handle.participants();
    if participants.is_empty() {
        println!("no participants");
    }
    for p in participants {
        let me = if p.id == *handle.local_id() { " (you)" } else { "" };
        println!(
            "  {}{me}  audio={} video={}",
            p.id,
            p.audio_track.is_some(),
            p.video_track.is_some()
        );
    }
}
