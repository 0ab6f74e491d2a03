//! Ordered lists of codec steps.
//!
//! Encoding and decoding each build a validation list and an execution
//! list. Steps run in insertion order against a caller supplied context and
//! the first failure aborts the rest of the list. Optional steps (TLM, the
//! Part 2 MCT group, indexing) are appended only when they apply.

use crate::error::J2kError;

pub type Procedure<C> = Box<dyn FnMut(&mut C) -> Result<(), J2kError>>;

pub struct ProcedureList<C> {
    steps: Vec<(&'static str, Procedure<C>)>,
}

impl<C> ProcedureList<C> {
    pub fn new() -> Self {
        Self { steps: Vec::new() }
    }

    pub fn push<F>(&mut self, name: &'static str, step: F)
    where
        F: FnMut(&mut C) -> Result<(), J2kError> + 'static,
    {
        self.steps.push((name, Box::new(step)));
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|(name, _)| *name).collect()
    }

    /// Runs and removes every step. The list is empty afterwards, whether
    /// or not a step failed.
    pub fn execute(&mut self, context: &mut C) -> Result<(), J2kError> {
        for (name, mut step) in std::mem::take(&mut self.steps) {
            log::trace!("Running procedure {name}");
            if let Err(error) = step(context) {
                log::debug!("Procedure {name} failed: {error}");
                return Err(error);
            }
        }
        Ok(())
    }
}

impl<C> Default for ProcedureList<C> {
    fn default() -> Self {
        Self::new()
    }
}
