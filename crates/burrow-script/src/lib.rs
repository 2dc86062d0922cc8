//! Script-facing surface of burrow.
//!
//! The interpreter (out of tree) compiles a user script down to a stream
//! of typed [`Instruction`]s; the [`InstructionExecutor`] applies them in
//! order against one enclave's service network, collecting per-instruction
//! outcomes for diagnostics.

pub mod executor;
pub mod instruction;

pub use executor::{InstructionExecutor, InstructionOutcome, RunReport, ScriptError};
pub use instruction::{Instruction, InstructionKind, RunTaskRunner, SourcePosition};
