use std::fmt;

/// Every distinct runtime failure this VM can raise. Grounded on the donor's
/// `compiler/src/error.rs` `RuntimeError` enum, simplified: the donor carries
/// a `Backtrace` inside every variant because its errors are constructed deep
/// inside recursive tree-walking calls with no single unwind point, but this
/// VM already reconstructs its trace once, uniformly, from `self.frames` at
/// the `interpret` boundary (see `Vm::build_trace`), so no variant needs to
/// carry one itself.
#[derive(Debug, Clone)]
pub enum RuntimeError {
    StackOverflow,
    OperandMustBeANumber,
    OperandsMustBeNumbers,
    OperandsMustBeNumbersOrStrings,
    UndefinedVariable(std::rc::Rc<str>),
    NotCallable,
    WrongArity { expected: u8, got: usize },
    Io(String),
    Native(String),
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StackOverflow => write!(f, "Stack overflow."),
            Self::OperandMustBeANumber => write!(f, "Operand must be a number."),
            Self::OperandsMustBeNumbers => write!(f, "Operands must be numbers."),
            Self::OperandsMustBeNumbersOrStrings => {
                write!(f, "Operands must be two numbers or two strings.")
            }
            Self::UndefinedVariable(name) => write!(f, "Undefined variable '{name}'."),
            Self::NotCallable => write!(f, "Can only call functions and classes."),
            Self::WrongArity { expected, got } => {
                write!(f, "Expected {expected} arguments but got {got}.")
            }
            Self::Io(message) => write!(f, "{message}"),
            Self::Native(message) => write!(f, "{message}"),
        }
    }
}
