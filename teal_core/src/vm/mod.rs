pub mod builtins;
pub mod executable;
pub mod instruction;
pub mod machine;
pub mod state;

pub use executable::{Executable, ExecutableError, FunctionInfo};
pub use instruction::{Instruction, InstructionError, Opcode, OpcodeTable, OperandKind};
pub use machine::{Machine, MachineError, SessionOutcome};
pub use state::{Frame, Session, SessionStatus, TaskState, World};
