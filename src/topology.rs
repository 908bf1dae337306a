//! Connection manager: the owned `Topology` value driving the node registry
//! and relay table through the six mutating commands.

use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};

use crate::channel;
use crate::error::{ControllerError, Result};
use crate::node::NodeRegistry;
use crate::relay::{self, Relay};
use crate::types::{NodeId, SINK_CLASSIFIER_SET};

pub struct Topology {
    nodes: NodeRegistry,
    relays: HashMap<NodeId, Relay>,
    max_id: NodeId,
    scratch_dir: PathBuf,
    pipe_atomic: usize,
    /// Injector children, reaped opportunistically between commands rather
    /// than synchronously (SPEC_FULL.md §4.4, resolving Open Question 4).
    pending_injectors: Vec<Child>,
}

impl Topology {
    pub fn new(
        scratch_dir: PathBuf,
        sibling_bin_dir: PathBuf,
        max_id: NodeId,
        pipe_atomic: usize,
    ) -> Self {
        Topology {
            nodes: NodeRegistry::new(scratch_dir.clone(), sibling_bin_dir),
            relays: HashMap::new(),
            max_id,
            scratch_dir,
            pipe_atomic,
            pending_injectors: Vec::new(),
        }
    }

    fn validate_id(&self, id: NodeId) -> Result<()> {
        if id > self.max_id {
            return Err(ControllerError::BadCommand(format!(
                "node id {id} exceeds max id {}",
                self.max_id
            )));
        }
        Ok(())
    }

    /// Reap any injector children that have already exited. Called between
    /// commands so the list never grows without bound.
    pub fn reap_injectors(&mut self) {
        self.pending_injectors.retain_mut(|child| {
            match child.try_wait() {
                Ok(Some(_status)) => false,
                Ok(None) => true,
                Err(e) => {
                    tracing::warn!(error = %e, "inject: failed to poll injector");
                    false
                }
            }
        });
    }

    // -- node -----------------------------------------------------------

    pub fn node(&mut self, id: NodeId, argv: Vec<String>) -> Result<()> {
        self.validate_id(id)?;
        let argv0 = argv
            .first()
            .ok_or_else(|| ControllerError::BadCommand("node requires a command".into()))?;
        let discard_output = !SINK_CLASSIFIER_SET.contains(&argv0.as_str());
        self.nodes.spawn(id, &argv, discard_output)
    }

    // -- connect ----------------------------------------------------------

    pub fn connect(&mut self, source: NodeId, new_sinks: &[NodeId]) -> Result<()> {
        self.validate_id(source)?;
        if new_sinks.is_empty() {
            return Err(ControllerError::BadCommand(
                "connect requires at least one sink".into(),
            ));
        }
        let src_node = self.nodes.get(source).ok_or(ControllerError::NotFound(source))?;
        if src_node.discard_output {
            return Err(ControllerError::NotFound(source));
        }
        for &sink in new_sinks {
            self.validate_id(sink)?;
            match self.nodes.get(sink) {
                Some(n) if !n.discard_output => {}
                _ => return Err(ControllerError::NotFound(sink)),
            }
        }

        let merged = if let Some(existing) = self.relays.remove(&source) {
            relay::teardown(&self.scratch_dir, &existing)?;
            let mut sinks = existing.sinks;
            sinks.extend_from_slice(new_sinks);
            sinks
        } else {
            new_sinks.to_vec()
        };

        let fresh = relay::spawn(&self.scratch_dir, source, merged, self.pipe_atomic)?;
        self.relays.insert(source, fresh);
        Ok(())
    }

    // -- disconnect -------------------------------------------------------

    pub fn disconnect(&mut self, source: NodeId, sink: NodeId) -> Result<()> {
        let relay = self.relays.get(&source).ok_or(ControllerError::NotConnected { src: source, sink })?;
        if !relay.sinks.contains(&sink) {
            return Err(ControllerError::NotConnected { src: source, sink });
        }

        let relay = self.relays.remove(&source).expect("checked above");
        relay::teardown(&self.scratch_dir, &relay)?;

        let mut remaining = relay.sinks;
        if let Some(pos) = remaining.iter().position(|&s| s == sink) {
            remaining.remove(pos);
        }

        if remaining.is_empty() {
            return Ok(());
        }

        let fresh = relay::spawn(&self.scratch_dir, source, remaining, self.pipe_atomic)?;
        self.relays.insert(source, fresh);
        Ok(())
    }

    // -- inject -------------------------------------------------------------

    pub fn inject(&mut self, target: NodeId, argv: Vec<String>) -> Result<()> {
        self.reap_injectors();
        if !self.nodes.is_live(target) {
            return Err(ControllerError::NotFound(target));
        }
        let argv0 = argv
            .first()
            .ok_or_else(|| ControllerError::BadCommand("inject requires a command".into()))?;

        let path = channel::input_path(&self.scratch_dir, target);
        let file = std::fs::OpenOptions::new()
            .write(true)
            .open(&path)
            .map_err(|source| ControllerError::Channel { path, source })?;

        let child = Command::new(argv0)
            .args(&argv[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::from(file))
            .spawn()
            .map_err(ControllerError::Io)?;
        // `file`'s original fd was already duplicated into the child by
        // `Command::spawn`; it is dropped here in the parent, closing the
        // parent's copy immediately (resolves Open Question 4, §9).

        tracing::info!(target, pid = child.id(), "inject.spawn");
        self.pending_injectors.push(child);
        Ok(())
    }

    // -- remove -------------------------------------------------------------

    pub fn remove(&mut self, id: NodeId) -> Result<()> {
        if !self.nodes.is_live(id) {
            return Err(ControllerError::NotFound(id));
        }

        if let Some(relay) = self.relays.remove(&id) {
            relay::teardown(&self.scratch_dir, &relay)?;
        }

        let affected_sources: Vec<NodeId> = self
            .relays
            .iter()
            .filter(|(&src, r)| src != id && r.sinks.contains(&id))
            .map(|(&src, _)| src)
            .collect();
        for src in affected_sources {
            self.disconnect(src, id)?;
        }

        self.nodes.kill(id)
    }

    // -- change ---------------------------------------------------------

    pub fn change(&mut self, id: NodeId, argv: Vec<String>) -> Result<()> {
        if !self.nodes.is_live(id) {
            return Err(ControllerError::NotFound(id));
        }

        let outgoing = self.relays.get(&id).map(|r| r.sinks.clone());

        let mut inbound_counts: HashMap<NodeId, usize> = HashMap::new();
        for (&src, r) in self.relays.iter() {
            if src == id {
                continue;
            }
            let count = r.sinks.iter().filter(|&&s| s == id).count();
            if count > 0 {
                inbound_counts.insert(src, count);
            }
        }

        self.remove(id)?;
        self.node(id, argv)?;

        if let Some(sinks) = outgoing {
            if !sinks.is_empty() {
                self.connect(id, &sinks)?;
            }
        }

        for (src, count) in inbound_counts {
            let occurrences = vec![id; count];
            self.connect(src, &occurrences)?;
        }

        Ok(())
    }

    // -- debug ------------------------------------------------------------

    /// Forward controller stdin verbatim into node 1's input channel until
    /// EOF. Reads synchronously on the command thread like every other
    /// command; there is only ever one `debug` session at a time.
    pub fn debug_forward_stdin(&mut self) -> Result<()> {
        const DEBUG_TARGET: NodeId = 1;
        if !self.nodes.is_live(DEBUG_TARGET) {
            return Err(ControllerError::NotFound(DEBUG_TARGET));
        }
        let path = channel::input_path(&self.scratch_dir, DEBUG_TARGET);
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .open(&path)
            .map_err(|source| ControllerError::Channel { path, source })?;
        std::io::copy(&mut std::io::stdin(), &mut file).map_err(ControllerError::Io)?;
        file.flush().map_err(ControllerError::Io)?;
        Ok(())
    }
}
