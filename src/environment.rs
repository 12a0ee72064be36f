//! Activation records for local scopes.
//!
//! Every block or call creates one [`Frame`]: an ordered list of value slots
//! plus a link to the enclosing frame.  Frames live in an arena owned by the
//! interpreter and are addressed by [`EnvId`], so closures and bound methods
//! may keep a frame alive (and even form cycles through `this`) without any
//! reference counting.  Nothing is reclaimed until the arena is dropped.
//!
//! Globals are not frames; `None` as an enclosing link means "the global
//! namespace" and is handled by name in the interpreter.

use log::debug;

use crate::error::{LoxError, Result};
use crate::value::Value;

/// Index of a frame in the [`Environments`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EnvId(usize);

#[derive(Debug)]
struct Frame {
    values: Vec<Value>,
    enclosing: Option<EnvId>,
}

/// Arena of every frame created during a run.
#[derive(Debug, Default)]
pub struct Environments {
    frames: Vec<Frame>,
}

impl Environments {
    pub fn new() -> Self {
        Self { frames: Vec::new() }
    }

    /// Allocate an empty frame whose parent is `enclosing`.
    pub fn alloc(&mut self, enclosing: Option<EnvId>) -> EnvId {
        let id = EnvId(self.frames.len());
        self.frames.push(Frame {
            values: Vec::new(),
            enclosing,
        });
        id
    }

    /// Number of frames ever allocated.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Append `value` as the next slot of `env`, returning its index.
    pub fn define(&mut self, env: EnvId, value: Value) -> usize {
        let values = &mut self.frames[env.0].values;
        values.push(value);
        values.len() - 1
    }

    /// Walk exactly `depth` enclosing links from `env`.
    pub fn ancestor(&self, env: EnvId, depth: usize, line: usize) -> Result<EnvId> {
        let mut current = env;

        for _ in 0..depth {
            current = self.frames[current.0].enclosing.ok_or_else(|| {
                LoxError::runtime(line, format!("Scope depth {} escapes the local chain.", depth))
            })?;
        }

        Ok(current)
    }

    /// Read slot `slot` of the frame `depth` links above `env`.
    pub fn get_at(&self, env: EnvId, depth: usize, slot: usize, line: usize) -> Result<Value> {
        let target = self.ancestor(env, depth, line)?;
        debug!("get_at frame={:?} slot={}", target, slot);

        self.frames[target.0]
            .values
            .get(slot)
            .cloned()
            .ok_or_else(|| LoxError::runtime(line, format!("Unbound local slot {}.", slot)))
    }

    /// Overwrite slot `slot` of the frame `depth` links above `env`.
    pub fn assign_at(
        &mut self,
        env: EnvId,
        depth: usize,
        slot: usize,
        value: Value,
        line: usize,
    ) -> Result<()> {
        let target = self.ancestor(env, depth, line)?;
        debug!("assign_at frame={:?} slot={}", target, slot);

        match self.frames[target.0].values.get_mut(slot) {
            Some(cell) => {
                *cell = value;
                Ok(())
            }
            None => Err(LoxError::runtime(line, format!("Unbound local slot {}.", slot))),
        }
    }
}
