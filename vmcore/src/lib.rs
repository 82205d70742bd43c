pub mod chunk;
pub mod diagnostics;
#[cfg(feature = "debug-bytecode")]
pub mod disassemble;
pub mod object;
pub mod opcode;
pub mod table;
pub mod value;

pub use chunk::Chunk;
pub use object::{Closure, Function, Native, NativeFn, Obj, Upvalue};
pub use opcode::OpCode;
pub use value::Value;
