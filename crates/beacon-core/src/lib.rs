pub mod eval;
pub mod expr;
pub mod temporal;
pub mod tri;
pub mod value;

pub use eval::{
    CycleSnapshot, EvalReport, Evaluator, StagedBufferAppend, StagedMessage, StagedWrite,
    WriteSet,
};
pub use temporal::{TemporalBuffer, WindowMode};
pub use tri::Tri;
pub use value::TaggedValue;
