//! Safe expression language for transition guards and continuous rate functions.
//!
//! Source text is compiled once by [`validate`] into a closed AST. The
//! grammar has no attribute access, assignment or imports, and calls can
//! only name an allow-listed [`ast::Builtin`], so a compiled expression can
//! do nothing but compute a value from the variables it is given.
//!
//! Variables are resolved at evaluation time through a [`Scope`]. The
//! engine's scope maps kinetic parameters, place names (to their current
//! marking) and `t` / `time` (to simulation time). `pi` and `e` are
//! available unless shadowed.

pub mod ast;
mod eval;
pub mod lexer;
mod parser;

use std::collections::{BTreeMap, HashMap};

use ast::Expr;

/// Names resolved to the simulation clock.
pub const TIME_VARIABLES: [&str; 2] = ["t", "time"];

/// Names resolved to mathematical constants when nothing shadows them.
pub const CONSTANTS: [&str; 2] = ["pi", "e"];

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised while compiling or evaluating an expression.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExpressionError {
    #[error("syntax error at offset {position}: {message}")]
    Syntax { position: usize, message: String },

    /// A construct outside the safe subset (attribute access, reserved names).
    #[error("forbidden construct: {0}")]
    Forbidden(String),

    #[error("function '{0}' is not allowed")]
    UnknownFunction(String),

    #[error("function '{function}' expects {expected} argument(s), got {got}")]
    Arity {
        function: &'static str,
        expected: String,
        got: usize,
    },

    #[error("undefined variable '{0}'")]
    UndefinedVariable(String),

    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    #[error("division by zero")]
    DivisionByZero,

    #[error("index {index} out of range for list of length {len}")]
    IndexOutOfRange { index: i64, len: usize },

    #[error("key {0} not found")]
    KeyNotFound(String),

    #[error("invalid argument to '{function}': {message}")]
    InvalidArgument {
        function: &'static str,
        message: String,
    },

    #[error("expression produced a non-finite number")]
    NonFinite,
}

impl ExpressionError {
    /// Whether the error is detected by [`validate`] rather than at evaluation.
    pub fn is_compile_error(&self) -> bool {
        matches!(
            self,
            ExpressionError::Syntax { .. }
                | ExpressionError::Forbidden(_)
                | ExpressionError::UnknownFunction(_)
                | ExpressionError::Arity { .. }
        )
    }
}

// ---------------------------------------------------------------------------
// Values and scopes
// ---------------------------------------------------------------------------

/// Runtime value of an expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Number(f64),
    Bool(bool),
    Str(String),
    List(Vec<Value>),
    /// Insertion-ordered key/value pairs.
    Dict(Vec<(Value, Value)>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Number(_) => "number",
            Value::Bool(_) => "bool",
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Dict(_) => "dict",
        }
    }

    pub fn as_number(&self) -> Result<f64, ExpressionError> {
        match self {
            Value::Number(n) => Ok(*n),
            other => Err(ExpressionError::TypeMismatch {
                expected: "number",
                found: other.type_name(),
            }),
        }
    }

    pub fn as_bool(&self) -> Result<bool, ExpressionError> {
        match self {
            Value::Bool(b) => Ok(*b),
            other => Err(ExpressionError::TypeMismatch {
                expected: "bool",
                found: other.type_name(),
            }),
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Number(n) => write!(f, "{n}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Str(s) => write!(f, "{s:?}"),
            Value::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Value::Dict(entries) => {
                f.write_str("{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                f.write_str("}")
            }
        }
    }
}

/// Variable resolution for evaluation.
pub trait Scope {
    /// Numeric value bound to `name`, if any.
    fn lookup(&self, name: &str) -> Option<f64>;
}

impl Scope for BTreeMap<String, f64> {
    fn lookup(&self, name: &str) -> Option<f64> {
        self.get(name).copied()
    }
}

impl Scope for HashMap<String, f64> {
    fn lookup(&self, name: &str) -> Option<f64> {
        self.get(name).copied()
    }
}

// ---------------------------------------------------------------------------
// Compiled expressions
// ---------------------------------------------------------------------------

/// A validated expression, ready for repeated evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledExpr {
    source: String,
    ast: Expr,
    variables: Vec<String>,
}

impl CompiledExpr {
    /// The original source text.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn ast(&self) -> &Expr {
        &self.ast
    }

    /// Free variable names, in first-seen order.
    pub fn variables(&self) -> &[String] {
        &self.variables
    }

    /// Evaluate to a value of any type.
    pub fn evaluate(&self, scope: &dyn Scope) -> Result<Value, ExpressionError> {
        eval::eval(&self.ast, scope)
    }

    /// Evaluate and require a finite number (rate functions).
    pub fn eval_number(&self, scope: &dyn Scope) -> Result<f64, ExpressionError> {
        let n = self.evaluate(scope)?.as_number()?;
        if !n.is_finite() {
            return Err(ExpressionError::NonFinite);
        }
        Ok(n)
    }

    /// Evaluate and require a boolean (guards).
    pub fn eval_bool(&self, scope: &dyn Scope) -> Result<bool, ExpressionError> {
        self.evaluate(scope)?.as_bool()
    }
}

/// Compile `source`, rejecting syntax errors and anything outside the safe subset.
pub fn validate(source: &str) -> Result<CompiledExpr, ExpressionError> {
    let tokens = lexer::tokenize(source)?;
    let ast = parser::parse(&tokens, source.len())?;
    let mut variables = Vec::new();
    ast.variables(&mut variables);
    Ok(CompiledExpr {
        source: source.to_string(),
        ast,
        variables,
    })
}

/// Evaluate a compiled expression against `scope`.
pub fn evaluate(compiled: &CompiledExpr, scope: &dyn Scope) -> Result<Value, ExpressionError> {
    compiled.evaluate(scope)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_collects_free_variables() {
        let c = validate("Vmax * S / (Km + S)").unwrap();
        assert_eq!(c.variables(), ["Vmax", "S", "Km"]);
        assert_eq!(c.source(), "Vmax * S / (Km + S)");
    }

    #[test]
    fn compile_errors_are_classified() {
        assert!(validate("S.__class__").unwrap_err().is_compile_error());
        assert!(validate("open(S)").unwrap_err().is_compile_error());
        assert!(validate("1 +").unwrap_err().is_compile_error());
        let scope = BTreeMap::new();
        let runtime = validate("S").unwrap().eval_number(&scope).unwrap_err();
        assert!(!runtime.is_compile_error());
    }

    #[test]
    fn free_function_matches_method() {
        let c = validate("1 + 2").unwrap();
        let scope = HashMap::new();
        assert_eq!(evaluate(&c, &scope).unwrap(), Value::Number(3.0));
    }

    #[test]
    fn value_display() {
        let v = Value::Dict(vec![(
            Value::Str("k".into()),
            Value::List(vec![Value::Number(1.0), Value::Bool(true)]),
        )]);
        assert_eq!(v.to_string(), r#"{"k": [1, true]}"#);
    }
}
