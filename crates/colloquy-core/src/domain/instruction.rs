//! Compiled instructions and the serializable instruction queue.

use crate::CoreError;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// A primitive execution step compiled from a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Instruction {
    /// Action run on arrival at a node
    OnEnter {
        /// Action call or `say` directive
        #[serde(rename = "fn")]
        function: String,
    },
    /// Action run after the session received input
    OnReceive {
        /// Action call or `say` directive
        #[serde(rename = "fn")]
        function: String,
    },
    /// Conditional jump
    Transition {
        /// Condition source
        #[serde(rename = "fn")]
        function: String,
        /// Destination token
        #[serde(rename = "node")]
        destination: String,
    },
    /// Suspend until the next inbound event
    Wait,
}

/// Tag of an [`Instruction`], used to look up its strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstructionKind {
    /// `on-enter`
    OnEnter,
    /// `on-receive`
    OnReceive,
    /// `transition`
    Transition,
    /// `wait`
    Wait,
}

impl Instruction {
    /// Create an `on-enter` instruction
    pub fn on_enter(function: impl Into<String>) -> Self {
        Instruction::OnEnter {
            function: function.into(),
        }
    }

    /// Create an `on-receive` instruction
    pub fn on_receive(function: impl Into<String>) -> Self {
        Instruction::OnReceive {
            function: function.into(),
        }
    }

    /// Create a `transition` instruction
    pub fn transition(condition: impl Into<String>, destination: impl Into<String>) -> Self {
        Instruction::Transition {
            function: condition.into(),
            destination: destination.into(),
        }
    }

    /// The instruction tag
    pub fn kind(&self) -> InstructionKind {
        match self {
            Instruction::OnEnter { .. } => InstructionKind::OnEnter,
            Instruction::OnReceive { .. } => InstructionKind::OnReceive,
            Instruction::Transition { .. } => InstructionKind::Transition,
            Instruction::Wait => InstructionKind::Wait,
        }
    }

    /// Source text of the instruction
    pub fn function(&self) -> &str {
        match self {
            Instruction::OnEnter { function }
            | Instruction::OnReceive { function }
            | Instruction::Transition { function, .. } => function,
            Instruction::Wait => "wait",
        }
    }
}

/// FIFO of pending instructions, persisted in the session context
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstructionQueue {
    instructions: VecDeque<Instruction>,
}

impl InstructionQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one instruction
    pub fn enqueue(&mut self, instruction: Instruction) {
        self.instructions.push_back(instruction);
    }

    /// Append instructions in order
    pub fn enqueue_all<I: IntoIterator<Item = Instruction>>(&mut self, instructions: I) {
        self.instructions.extend(instructions);
    }

    /// Remove and return the head
    pub fn dequeue(&mut self) -> Option<Instruction> {
        self.instructions.pop_front()
    }

    /// Whether anything is left
    pub fn has_instructions(&self) -> bool {
        !self.instructions.is_empty()
    }

    /// Number of pending instructions
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    /// Whether the queue is empty
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Pending instructions, head first
    pub fn iter(&self) -> impl Iterator<Item = &Instruction> {
        self.instructions.iter()
    }

    /// Serialize to the persisted string form
    pub fn serialize(&self) -> Result<String, CoreError> {
        Ok(serde_json::to_string(&self.instructions)?)
    }

    /// Rebuild a queue from its persisted string form
    pub fn deserialize(raw: &str) -> Result<Self, CoreError> {
        let instructions: VecDeque<Instruction> = serde_json::from_str(raw).map_err(|e| {
            CoreError::SerializationError(format!("Invalid instruction queue: {}", e))
        })?;
        Ok(Self { instructions })
    }
}

impl FromIterator<Instruction> for InstructionQueue {
    fn from_iter<I: IntoIterator<Item = Instruction>>(iter: I) -> Self {
        Self {
            instructions: iter.into_iter().collect(),
        }
    }
}
