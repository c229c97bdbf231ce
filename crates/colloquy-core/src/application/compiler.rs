use crate::domain::flow_definition::{FlowDefinition, NodeDefinition, NodeKind};
use crate::domain::instruction::{Instruction, InstructionQueue};

/// Options of [`compile`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompileOptions {
    /// Leave out the node's entry instructions
    pub skip_on_enter: bool,
    /// Only emit transition instructions
    pub only_transitions: bool,
}

impl CompileOptions {
    /// Full compilation
    pub fn full() -> Self {
        Self::default()
    }

    /// Compilation without entry instructions
    pub fn skip_on_enter() -> Self {
        Self {
            skip_on_enter: true,
            only_transitions: false,
        }
    }

    /// Transitions only
    pub fn only_transitions() -> Self {
        Self {
            skip_on_enter: true,
            only_transitions: true,
        }
    }
}

/// Compile a node of `flow` into its instruction queue.
///
/// Order is entry instructions, then the wait and receive instructions,
/// then transitions. Flow-level rules always come before the node's own.
pub fn compile(node: &NodeDefinition, flow: &FlowDefinition, options: CompileOptions) -> InstructionQueue {
    let mut queue = InstructionQueue::new();

    if !options.only_transitions {
        if !options.skip_on_enter {
            if let Some(say) = say_something_instruction(node) {
                queue.enqueue(say);
            }
            queue.enqueue_all(node.on_enter.iter().map(Instruction::on_enter));
        }

        if let Some(on_receive) = &node.on_receive {
            queue.enqueue(Instruction::Wait);
            queue.enqueue_all(
                flow.catch_all
                    .on_receive
                    .iter()
                    .chain(on_receive.iter())
                    .map(Instruction::on_receive),
            );
        }
    }

    // A catch-all rule pointing at the node itself would loop forever.
    let flow_rules = flow
        .catch_all
        .next
        .iter()
        .filter(|rule| rule.destination != node.name);

    queue.enqueue_all(
        flow_rules
            .chain(node.next.iter())
            .map(|rule| Instruction::transition(&rule.condition, &rule.destination)),
    );

    queue
}

fn say_something_instruction(node: &NodeDefinition) -> Option<Instruction> {
    if node.kind != NodeKind::SaySomething {
        return None;
    }
    let content = node.content.as_ref()?;
    Some(Instruction::on_enter(format!(
        "say #{} {}",
        content.content_type.trim_start_matches('#'),
        content.form_data
    )))
}
