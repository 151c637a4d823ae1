//! Closed expression tree produced by the parser.
//!
//! Function calls can only name a [`Builtin`], so anything outside the
//! allow-list is unrepresentable once parsing succeeds.

/// Binary operators, lowest to highest precedence group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
}

/// Prefix operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

/// Allow-listed functions callable from expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Builtin {
    Abs,
    Min,
    Max,
    Sum,
    Len,
    Pow,
    Sqrt,
    Exp,
    Log,
    Log10,
    Sin,
    Cos,
    Tan,
    Floor,
    Ceil,
    Round,
    Clamp,
    /// `michaelis_menten(S, vmax, km)` = `vmax * S / (km + S)`
    MichaelisMenten,
    /// `hill(S, vmax, k, n)` = `vmax * S^n / (k^n + S^n)`
    Hill,
    /// `mass_action(k, a, b, ...)` = `k * a * b * ...`
    MassAction,
    /// `sigmoid(x)`, `sigmoid(x, k)` or `sigmoid(x, k, x0)`
    Sigmoid,
}

impl Builtin {
    pub const ALL: [Builtin; 21] = [
        Builtin::Abs,
        Builtin::Min,
        Builtin::Max,
        Builtin::Sum,
        Builtin::Len,
        Builtin::Pow,
        Builtin::Sqrt,
        Builtin::Exp,
        Builtin::Log,
        Builtin::Log10,
        Builtin::Sin,
        Builtin::Cos,
        Builtin::Tan,
        Builtin::Floor,
        Builtin::Ceil,
        Builtin::Round,
        Builtin::Clamp,
        Builtin::MichaelisMenten,
        Builtin::Hill,
        Builtin::MassAction,
        Builtin::Sigmoid,
    ];

    /// Resolve a function name against the allow-list.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|b| b.name() == name)
    }

    pub fn name(self) -> &'static str {
        match self {
            Builtin::Abs => "abs",
            Builtin::Min => "min",
            Builtin::Max => "max",
            Builtin::Sum => "sum",
            Builtin::Len => "len",
            Builtin::Pow => "pow",
            Builtin::Sqrt => "sqrt",
            Builtin::Exp => "exp",
            Builtin::Log => "log",
            Builtin::Log10 => "log10",
            Builtin::Sin => "sin",
            Builtin::Cos => "cos",
            Builtin::Tan => "tan",
            Builtin::Floor => "floor",
            Builtin::Ceil => "ceil",
            Builtin::Round => "round",
            Builtin::Clamp => "clamp",
            Builtin::MichaelisMenten => "michaelis_menten",
            Builtin::Hill => "hill",
            Builtin::MassAction => "mass_action",
            Builtin::Sigmoid => "sigmoid",
        }
    }

    /// Accepted argument counts as `(min, max)`; `None` means variadic.
    pub fn arity(self) -> (usize, Option<usize>) {
        match self {
            Builtin::Abs
            | Builtin::Sqrt
            | Builtin::Exp
            | Builtin::Log10
            | Builtin::Sin
            | Builtin::Cos
            | Builtin::Tan
            | Builtin::Floor
            | Builtin::Ceil
            | Builtin::Len => (1, Some(1)),
            Builtin::Log | Builtin::Round => (1, Some(2)),
            Builtin::Pow => (2, Some(2)),
            Builtin::Clamp | Builtin::MichaelisMenten => (3, Some(3)),
            Builtin::Hill => (4, Some(4)),
            Builtin::Sigmoid => (1, Some(3)),
            Builtin::Min | Builtin::Max | Builtin::Sum | Builtin::MassAction => (1, None),
        }
    }
}

/// Expression node.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Bool(bool),
    Str(String),
    /// Place marking, kinetic parameter, simulation time or constant.
    Var(String),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Ternary {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    Call {
        func: Builtin,
        args: Vec<Expr>,
    },
    List(Vec<Expr>),
    Dict(Vec<(Expr, Expr)>),
    Index {
        target: Box<Expr>,
        index: Box<Expr>,
    },
}

impl Expr {
    /// Collect every free variable name, in first-seen order.
    pub fn variables(&self, out: &mut Vec<String>) {
        match self {
            Expr::Number(_) | Expr::Bool(_) | Expr::Str(_) => {}
            Expr::Var(name) => {
                if !out.iter().any(|n| n == name) {
                    out.push(name.clone());
                }
            }
            Expr::Unary { operand, .. } => operand.variables(out),
            Expr::Binary { left, right, .. } => {
                left.variables(out);
                right.variables(out);
            }
            Expr::Ternary {
                cond,
                then,
                otherwise,
            } => {
                cond.variables(out);
                then.variables(out);
                otherwise.variables(out);
            }
            Expr::Call { args, .. } | Expr::List(args) => {
                for arg in args {
                    arg.variables(out);
                }
            }
            Expr::Dict(entries) => {
                for (k, v) in entries {
                    k.variables(out);
                    v.variables(out);
                }
            }
            Expr::Index { target, index } => {
                target.variables(out);
                index.variables(out);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_builtin_round_trips_by_name() {
        for b in Builtin::ALL {
            assert_eq!(Builtin::from_name(b.name()), Some(b));
        }
    }

    #[test]
    fn host_functions_are_not_builtins() {
        for name in ["eval", "exec", "open", "__import__", "getattr", "print"] {
            assert_eq!(Builtin::from_name(name), None, "{name} must not resolve");
        }
    }

    #[test]
    fn variables_are_deduplicated() {
        let e = Expr::Binary {
            op: BinaryOp::Add,
            left: Box::new(Expr::Var("S".into())),
            right: Box::new(Expr::Binary {
                op: BinaryOp::Mul,
                left: Box::new(Expr::Var("S".into())),
                right: Box::new(Expr::Var("k".into())),
            }),
        };
        let mut vars = Vec::new();
        e.variables(&mut vars);
        assert_eq!(vars, vec!["S".to_string(), "k".to_string()]);
    }
}
