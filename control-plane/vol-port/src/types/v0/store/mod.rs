pub mod definitions;
pub mod group;
pub mod group_snapshot;
pub mod mem;
pub mod snapshot;
pub mod volume;

use serde::{Deserialize, Serialize};

/// Transaction operations for a spec: a mutating operation is first logged
/// on the spec and persisted, then either committed or cleared depending on
/// the outcome of the backend call.
pub trait SpecTransaction<Operation> {
    /// Check for a pending operation.
    fn pending_op(&self) -> bool;
    /// Commit the operation to the spec and clear it.
    fn commit_op(&mut self);
    /// Clear the operation, reverting the spec to its pre-operation state.
    fn clear_op(&mut self);
    /// Add a new pending operation.
    fn start_op(&mut self, operation: Operation);
    /// Set the result of the operation.
    fn set_op_result(&mut self, result: bool);
    /// The result of the pending operation, if any.
    fn operation_result(&self) -> Option<Option<bool>>;
}

/// Trait which allows a UUID to be returned as the associated type Id.
pub trait ResourceUuid {
    /// The associated type for Id.
    type Id: Clone;
    /// The id of the resource.
    fn uuid(&self) -> Self::Id;
}

/// Serializes operations for a resource: only one exclusive operation may be
/// in flight at any time. This is the named-lock of the manager, keyed by
/// the resource id carried for observability.
#[derive(Default, Debug, Clone, Eq, PartialEq)]
pub struct OperationSequence {
    uuid: String,
    state: OperationSequenceState,
}

impl OperationSequence {
    /// Create new `Self` with a uuid for observability.
    pub fn new(uuid: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            state: Default::default(),
        }
    }
    /// The id of the sequenced resource.
    pub fn uuid(&self) -> &str {
        &self.uuid
    }
    /// Whether an operation currently holds the sequence.
    pub fn busy(&self) -> bool {
        self.state == OperationSequenceState::Exclusive
    }
    /// Try to start an exclusive operation.
    pub fn sequence(&mut self) -> Result<(), ()> {
        match self.state {
            OperationSequenceState::Idle => {
                self.state = OperationSequenceState::Exclusive;
                Ok(())
            }
            OperationSequenceState::Exclusive => Err(()),
        }
    }
    /// Complete the exclusive operation.
    pub fn complete(&mut self) {
        self.state = OperationSequenceState::Idle;
    }
}

/// Sequence states.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum OperationSequenceState {
    /// No operation in progress.
    #[default]
    Idle,
    /// A single exclusive operation in progress.
    Exclusive,
}

/// Access to the operation sequence embedded in a spec.
pub trait AsOperationSequencer {
    /// A reference to the sequencer.
    fn as_ref(&self) -> &OperationSequence;
    /// A mutable reference to the sequencer.
    fn as_mut(&mut self) -> &mut OperationSequence;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exclusive_sequence() {
        let mut seq = OperationSequence::new("a0653eb4-a31c-47c4-8ddb-6bead1d202d5");
        assert!(!seq.busy());
        assert!(seq.sequence().is_ok());
        assert!(seq.busy());
        assert!(seq.sequence().is_err());
        seq.complete();
        assert!(seq.sequence().is_ok());
    }
}
