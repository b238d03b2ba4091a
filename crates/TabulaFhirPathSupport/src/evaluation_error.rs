//! Error type for FHIRPath evaluation failures.

/// Runtime failure while evaluating a FHIRPath expression.
///
/// These errors surface per resource and never invalidate the view that
/// triggered them; the caller decides whether to skip the resource or abort.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvaluationError {
    /// Operands or function arguments had incompatible types.
    ///
    /// Example: "Cannot compare Boolean and Integer"
    TypeError(String),
    /// A function was called with the wrong number of arguments.
    ///
    /// Example: "Function 'join' expects 0 or 1 arguments, got 2"
    InvalidArity(String),
    /// A function outside the supported SQL-on-FHIR dialect was called.
    ///
    /// Example: "Unknown function 'aggregate'"
    UnknownFunction(String),
    /// An indexer expression did not produce a usable index.
    InvalidIndex(String),
    /// A `%name` reference was not resolved before evaluation.
    ///
    /// Constants are substituted at validation time, so hitting this at
    /// runtime means the expression never went through a validated view.
    UndefinedVariable(String),
    /// An operation that requires a single value saw a larger collection.
    ///
    /// Example: "toString() expects a singleton, found 3 items"
    SingletonRequired(String),
}

impl std::error::Error for EvaluationError {}

impl std::fmt::Display for EvaluationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EvaluationError::TypeError(msg) => write!(f, "Type error: {}", msg),
            EvaluationError::InvalidArity(msg) => write!(f, "Invalid arity: {}", msg),
            EvaluationError::UnknownFunction(name) => write!(f, "Unknown function: {}", name),
            EvaluationError::InvalidIndex(msg) => write!(f, "Invalid index: {}", msg),
            EvaluationError::UndefinedVariable(name) => write!(f, "Undefined variable: {}", name),
            EvaluationError::SingletonRequired(msg) => {
                write!(f, "Singleton required: {}", msg)
            }
        }
    }
}
