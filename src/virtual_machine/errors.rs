use crate::ledger::errors::LedgerError;
use ledger_derive::Error;

/// Errors raised while assembling, resolving or executing contracts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VMError {
    /// Name does not resolve to a contract in the root scope.
    #[error("unknown contract {0}")]
    UnknownContract(String),
    /// Name does not resolve to anything callable.
    #[error("unknown function {0}")]
    UnknownFunction(String),
    /// A declared Tx field was not supplied by the caller.
    #[error("{field} is not defined for contract {contract}")]
    FieldNotDefined { contract: String, field: String },
    /// Parameter names and values differ in count.
    #[error("wrong parameters for {contract}: {names} names, {values} values")]
    WrongParameters {
        contract: String,
        names: usize,
        values: usize,
    },
    /// Contract is already running in the current call chain.
    #[error("there is loop in {0} contract")]
    Loop(String),
    #[error("contract {0} is not active")]
    InactiveContract(String),
    #[error("signature check failed: {0}")]
    Signature(String),
    /// The invocation ran out of budget.
    #[error("paid CPU resource is over")]
    CostExceeded,
    #[error("call depth exceeded the limit of {0}")]
    CallDepthExceeded(usize),
    #[error("{name} expects {expected} arguments but got {got}")]
    ArityMismatch {
        name: String,
        expected: usize,
        got: usize,
    },
    #[error("expected {expected} but found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },
    #[error("{0} is not callable")]
    NotCallable(String),
    #[error("stack underflow in {0}")]
    StackUnderflow(&'static str),
    #[error("division by zero")]
    DivisionByZero,
    #[error("integer overflow")]
    Overflow,
    #[error("jump target {0} is out of range")]
    InvalidJump(usize),
    #[error("variable index {0} is out of range")]
    InvalidVariable(usize),
    /// Environment variable read before it was set.
    #[error("undefined variable ${0}")]
    UndefinedExtend(String),
    #[error("no database session")]
    NoSession,
    /// Error raised by contract code.
    #[error("{0}")]
    Raised(String),
    #[error("line {line}: {message}")]
    AssemblyError { line: usize, message: String },
    #[error("io error: {0}")]
    IoError(String),
    #[error("{0}")]
    Ledger(#[from] LedgerError),
}
