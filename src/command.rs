//! The command-language parser (a trivial whitespace tokenizer, per
//! SPEC_FULL.md's scope note) and the enum it produces.

use crate::error::{ControllerError, Result};
use crate::topology::Topology;
use crate::types::NodeId;

#[derive(Debug, Clone)]
pub enum Command {
    Node { id: NodeId, argv: Vec<String> },
    Connect { source: NodeId, sinks: Vec<NodeId> },
    Disconnect { source: NodeId, sink: NodeId },
    Inject { target: NodeId, argv: Vec<String> },
    Remove { id: NodeId },
    Change { id: NodeId, argv: Vec<String> },
    Debug,
    Help,
}

fn parse_id(tok: &str) -> Result<NodeId> {
    tok.parse::<NodeId>()
        .map_err(|_| ControllerError::BadCommand(format!("not a node id: {tok}")))
}

/// Parse one line of input into a `Command`. Blank lines and lines whose
/// only content is whitespace parse to `None` rather than `BadCommand`, so
/// the REPL can silently skip them.
pub fn parse_line(line: &str) -> Result<Option<Command>> {
    let mut tokens = line.split_whitespace();
    let verb = match tokens.next() {
        Some(v) => v,
        None => return Ok(None),
    };
    let rest: Vec<&str> = tokens.collect();

    let cmd = match verb {
        "node" => {
            if rest.len() < 2 {
                return Err(ControllerError::BadCommand(
                    "usage: node <id> <cmd> <args...>".into(),
                ));
            }
            let id = parse_id(rest[0])?;
            let argv = rest[1..].iter().map(|s| s.to_string()).collect();
            Command::Node { id, argv }
        }
        "connect" => {
            if rest.len() < 2 {
                return Err(ControllerError::BadCommand(
                    "usage: connect <src> <dst...>".into(),
                ));
            }
            let source = parse_id(rest[0])?;
            let sinks = rest[1..]
                .iter()
                .map(|s| parse_id(s))
                .collect::<Result<Vec<_>>>()?;
            Command::Connect { source, sinks }
        }
        "disconnect" => {
            if rest.len() != 2 {
                return Err(ControllerError::BadCommand(
                    "usage: disconnect <src> <dst>".into(),
                ));
            }
            Command::Disconnect {
                source: parse_id(rest[0])?,
                sink: parse_id(rest[1])?,
            }
        }
        "inject" => {
            if rest.len() < 2 {
                return Err(ControllerError::BadCommand(
                    "usage: inject <id> <cmd> <args...>".into(),
                ));
            }
            let target = parse_id(rest[0])?;
            let argv = rest[1..].iter().map(|s| s.to_string()).collect();
            Command::Inject { target, argv }
        }
        "remove" => {
            if rest.len() != 1 {
                return Err(ControllerError::BadCommand("usage: remove <id>".into()));
            }
            Command::Remove { id: parse_id(rest[0])? }
        }
        "change" => {
            if rest.len() < 2 {
                return Err(ControllerError::BadCommand(
                    "usage: change <id> <cmd> <args...>".into(),
                ));
            }
            let id = parse_id(rest[0])?;
            let argv = rest[1..].iter().map(|s| s.to_string()).collect();
            Command::Change { id, argv }
        }
        "debug" => Command::Debug,
        "help" => Command::Help,
        other => return Err(ControllerError::BadCommand(other.to_string())),
    };

    Ok(Some(cmd))
}

pub const HELP_TEXT: &str = "\
node <id> <cmd> <args...>      create node <id> running <cmd> <args...>
connect <src> <dst...>         merge destinations into src's outgoing sink set
disconnect <src> <dst>         remove a single edge
inject <id> <cmd> <args...>    feed <id>'s input with the stdout of <cmd> <args...>
remove <id>                    tear down a node and all adjacent edges
change <id> <cmd> <args...>    replace node <id>'s binary, preserving edges
debug                          forward controller stdin to node 1's input until EOF
help                           print this text";

/// Execute a parsed command against `topology`, returning the one-line
/// confirmation message printed on success.
pub fn dispatch(topology: &mut Topology, cmd: Command) -> Result<String> {
    topology.reap_injectors();
    match cmd {
        Command::Node { id, argv } => {
            topology.node(id, argv)?;
            Ok(format!("ok: node {id} running"))
        }
        Command::Connect { source, sinks } => {
            topology.connect(source, &sinks)?;
            Ok(format!("ok: {source} connected"))
        }
        Command::Disconnect { source, sink } => {
            topology.disconnect(source, sink)?;
            Ok(format!("ok: {source} disconnected from {sink}"))
        }
        Command::Inject { target, argv } => {
            topology.inject(target, argv)?;
            Ok(format!("ok: injecting into {target}"))
        }
        Command::Remove { id } => {
            topology.remove(id)?;
            Ok(format!("ok: {id} removed"))
        }
        Command::Change { id, argv } => {
            topology.change(id, argv)?;
            Ok(format!("ok: {id} changed"))
        }
        Command::Debug => {
            topology.debug_forward_stdin()?;
            Ok("ok: debug forwarding complete".to_string())
        }
        Command::Help => Ok(HELP_TEXT.to_string()),
    }
}
