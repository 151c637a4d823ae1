//! Tree-walking evaluator over the closed AST.

use super::ast::{BinaryOp, Builtin, Expr, UnaryOp};
use super::{ExpressionError, Scope, Value};

/// Evaluate `expr` with variables resolved through `scope`.
///
/// Names the scope does not know fall back to the constants `pi` and `e`.
pub fn eval(expr: &Expr, scope: &dyn Scope) -> Result<Value, ExpressionError> {
    match expr {
        Expr::Number(n) => Ok(Value::Number(*n)),
        Expr::Bool(b) => Ok(Value::Bool(*b)),
        Expr::Str(s) => Ok(Value::Str(s.clone())),
        Expr::Var(name) => lookup(name, scope).map(Value::Number),
        Expr::Unary { op, operand } => {
            let v = eval(operand, scope)?;
            match op {
                UnaryOp::Neg => Ok(Value::Number(-v.as_number()?)),
                UnaryOp::Not => Ok(Value::Bool(!v.as_bool()?)),
            }
        }
        Expr::Binary { op, left, right } => binary(*op, left, right, scope),
        Expr::Ternary {
            cond,
            then,
            otherwise,
        } => {
            if eval(cond, scope)?.as_bool()? {
                eval(then, scope)
            } else {
                eval(otherwise, scope)
            }
        }
        Expr::Call { func, args } => {
            let values = args
                .iter()
                .map(|a| eval(a, scope))
                .collect::<Result<Vec<_>, _>>()?;
            call(*func, values)
        }
        Expr::List(items) => items
            .iter()
            .map(|i| eval(i, scope))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::List),
        Expr::Dict(entries) => {
            let mut out = Vec::with_capacity(entries.len());
            for (k, v) in entries {
                let key = eval(k, scope)?;
                if !matches!(key, Value::Str(_) | Value::Number(_) | Value::Bool(_)) {
                    return Err(ExpressionError::TypeMismatch {
                        expected: "hashable key",
                        found: key.type_name(),
                    });
                }
                let value = eval(v, scope)?;
                match out.iter_mut().find(|(existing, _)| *existing == key) {
                    Some(slot) => slot.1 = value,
                    None => out.push((key, value)),
                }
            }
            Ok(Value::Dict(out))
        }
        Expr::Index { target, index } => {
            let target = eval(target, scope)?;
            let index = eval(index, scope)?;
            subscript(target, index)
        }
    }
}

fn lookup(name: &str, scope: &dyn Scope) -> Result<f64, ExpressionError> {
    if let Some(v) = scope.lookup(name) {
        return Ok(v);
    }
    match name {
        "pi" => Ok(std::f64::consts::PI),
        "e" => Ok(std::f64::consts::E),
        _ => Err(ExpressionError::UndefinedVariable(name.to_string())),
    }
}

fn binary(op: BinaryOp, left: &Expr, right: &Expr, scope: &dyn Scope) -> Result<Value, ExpressionError> {
    // Boolean connectives short-circuit.
    match op {
        BinaryOp::And => {
            if !eval(left, scope)?.as_bool()? {
                return Ok(Value::Bool(false));
            }
            return eval(right, scope)?.as_bool().map(Value::Bool);
        }
        BinaryOp::Or => {
            if eval(left, scope)?.as_bool()? {
                return Ok(Value::Bool(true));
            }
            return eval(right, scope)?.as_bool().map(Value::Bool);
        }
        _ => {}
    }

    let l = eval(left, scope)?;
    let r = eval(right, scope)?;

    match op {
        BinaryOp::Eq => Ok(Value::Bool(l == r)),
        BinaryOp::Ne => Ok(Value::Bool(l != r)),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = match (&l, &r) {
                (Value::Str(a), Value::Str(b)) => a.partial_cmp(b),
                _ => l.as_number()?.partial_cmp(&r.as_number()?),
            };
            let Some(ordering) = ordering else {
                return Ok(Value::Bool(false));
            };
            let result = match op {
                BinaryOp::Lt => ordering.is_lt(),
                BinaryOp::Le => ordering.is_le(),
                BinaryOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            };
            Ok(Value::Bool(result))
        }
        BinaryOp::Add => match (l, r) {
            (Value::List(mut a), Value::List(b)) => {
                a.extend(b);
                Ok(Value::List(a))
            }
            (Value::Str(a), Value::Str(b)) => Ok(Value::Str(a + &b)),
            (l, r) => Ok(Value::Number(l.as_number()? + r.as_number()?)),
        },
        BinaryOp::Sub => Ok(Value::Number(l.as_number()? - r.as_number()?)),
        BinaryOp::Mul => Ok(Value::Number(l.as_number()? * r.as_number()?)),
        BinaryOp::Div => {
            let d = r.as_number()?;
            if d == 0.0 {
                return Err(ExpressionError::DivisionByZero);
            }
            Ok(Value::Number(l.as_number()? / d))
        }
        BinaryOp::Mod => {
            let d = r.as_number()?;
            if d == 0.0 {
                return Err(ExpressionError::DivisionByZero);
            }
            let n = l.as_number()?;
            // Result takes the sign of the divisor.
            Ok(Value::Number(n - d * (n / d).floor()))
        }
        BinaryOp::Pow => Ok(Value::Number(l.as_number()?.powf(r.as_number()?))),
        BinaryOp::And => Ok(Value::Bool(l.as_bool()? && r.as_bool()?)),
        BinaryOp::Or => Ok(Value::Bool(l.as_bool()? || r.as_bool()?)),
    }
}

fn subscript(target: Value, index: Value) -> Result<Value, ExpressionError> {
    match target {
        Value::List(items) => {
            let raw = index.as_number()?;
            if raw.fract() != 0.0 {
                return Err(ExpressionError::TypeMismatch {
                    expected: "integer index",
                    found: "number",
                });
            }
            let len = items.len();
            let i = raw as i64;
            let resolved = if i < 0 { i + len as i64 } else { i };
            if resolved < 0 || resolved >= len as i64 {
                return Err(ExpressionError::IndexOutOfRange { index: i, len });
            }
            Ok(items[resolved as usize].clone())
        }
        Value::Dict(entries) => entries
            .into_iter()
            .find(|(k, _)| *k == index)
            .map(|(_, v)| v)
            .ok_or_else(|| ExpressionError::KeyNotFound(index.to_string())),
        other => Err(ExpressionError::TypeMismatch {
            expected: "list or dict",
            found: other.type_name(),
        }),
    }
}

/// Flatten `min(xs)` / `min(a, b, c)` style arguments into numbers.
fn numbers_of(func: Builtin, args: Vec<Value>) -> Result<Vec<f64>, ExpressionError> {
    let items = if matches!(args.as_slice(), [Value::List(_)]) {
        match args.into_iter().next() {
            Some(Value::List(items)) => items,
            _ => Vec::new(),
        }
    } else {
        args
    };
    let nums = items
        .iter()
        .map(Value::as_number)
        .collect::<Result<Vec<_>, _>>()?;
    if nums.is_empty() && matches!(func, Builtin::Min | Builtin::Max) {
        return Err(ExpressionError::InvalidArgument {
            function: func.name(),
            message: "empty sequence".to_string(),
        });
    }
    Ok(nums)
}

fn call(func: Builtin, args: Vec<Value>) -> Result<Value, ExpressionError> {
    let n = |i: usize| -> Result<f64, ExpressionError> {
        args.get(i)
            .ok_or_else(|| ExpressionError::Arity {
                function: func.name(),
                expected: format!("at least {}", i + 1),
                got: args.len(),
            })
            .and_then(Value::as_number)
    };

    let result = match func {
        Builtin::Abs => n(0)?.abs(),
        Builtin::Sqrt => n(0)?.sqrt(),
        Builtin::Exp => n(0)?.exp(),
        Builtin::Log => {
            let x = n(0)?;
            if args.len() == 2 {
                x.ln() / n(1)?.ln()
            } else {
                x.ln()
            }
        }
        Builtin::Log10 => n(0)?.log10(),
        Builtin::Sin => n(0)?.sin(),
        Builtin::Cos => n(0)?.cos(),
        Builtin::Tan => n(0)?.tan(),
        Builtin::Floor => n(0)?.floor(),
        Builtin::Ceil => n(0)?.ceil(),
        Builtin::Round => {
            let x = n(0)?;
            if args.len() == 2 {
                let scale = 10f64.powi(n(1)? as i32);
                (x * scale).round_ties_even() / scale
            } else {
                x.round_ties_even()
            }
        }
        Builtin::Pow => n(0)?.powf(n(1)?),
        Builtin::Clamp => {
            let (x, lo, hi) = (n(0)?, n(1)?, n(2)?);
            if lo > hi {
                return Err(ExpressionError::InvalidArgument {
                    function: func.name(),
                    message: format!("lower bound {lo} exceeds upper bound {hi}"),
                });
            }
            x.max(lo).min(hi)
        }
        Builtin::Len => match args.first() {
            Some(Value::List(items)) => items.len() as f64,
            Some(Value::Dict(entries)) => entries.len() as f64,
            Some(Value::Str(s)) => s.chars().count() as f64,
            Some(other) => {
                return Err(ExpressionError::TypeMismatch {
                    expected: "list, dict or string",
                    found: other.type_name(),
                });
            }
            None => 0.0,
        },
        Builtin::Min => numbers_of(func, args)?
            .into_iter()
            .fold(f64::INFINITY, f64::min),
        Builtin::Max => numbers_of(func, args)?
            .into_iter()
            .fold(f64::NEG_INFINITY, f64::max),
        Builtin::Sum => numbers_of(func, args)?.into_iter().sum(),
        Builtin::MassAction => numbers_of(func, args)?.into_iter().product(),
        Builtin::MichaelisMenten => {
            let (s, vmax, km) = (n(0)?, n(1)?, n(2)?);
            let denom = km + s;
            if denom == 0.0 {
                return Err(ExpressionError::DivisionByZero);
            }
            vmax * s / denom
        }
        Builtin::Hill => {
            let (s, vmax, k, h) = (n(0)?, n(1)?, n(2)?, n(3)?);
            let sn = s.powf(h);
            let denom = k.powf(h) + sn;
            if denom == 0.0 {
                return Err(ExpressionError::DivisionByZero);
            }
            vmax * sn / denom
        }
        Builtin::Sigmoid => {
            let x = n(0)?;
            let k = if args.len() > 1 { n(1)? } else { 1.0 };
            let x0 = if args.len() > 2 { n(2)? } else { 0.0 };
            1.0 / (1.0 + (-k * (x - x0)).exp())
        }
    };
    Ok(Value::Number(result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::validate;
    use std::collections::BTreeMap;

    fn scope() -> BTreeMap<String, f64> {
        BTreeMap::from([
            ("S".to_string(), 10.0),
            ("Vmax".to_string(), 10.0),
            ("Km".to_string(), 5.0),
            ("zero".to_string(), 0.0),
        ])
    }

    fn num(source: &str) -> Result<f64, ExpressionError> {
        validate(source)?.eval_number(&scope())
    }

    fn boolean(source: &str) -> Result<bool, ExpressionError> {
        validate(source)?.eval_bool(&scope())
    }

    #[test]
    fn michaelis_menten_by_hand_and_builtin_agree() {
        let by_hand = num("Vmax*S/(Km+S)").unwrap();
        let builtin = num("michaelis_menten(S, Vmax, Km)").unwrap();
        assert!((by_hand - 100.0 / 15.0).abs() < 1e-12);
        assert_eq!(by_hand, builtin);
    }

    #[test]
    fn arithmetic_and_power() {
        assert_eq!(num("2 ** 3 ** 2").unwrap(), 512.0);
        assert_eq!(num("2 ^ 10").unwrap(), 1024.0);
        assert_eq!(num("-2 ** 2").unwrap(), -4.0);
        assert_eq!(num("7 % 3").unwrap(), 1.0);
        assert_eq!(num("-7 % 3").unwrap(), 2.0);
    }

    #[test]
    fn division_by_zero_is_an_error() {
        assert_eq!(num("S / zero"), Err(ExpressionError::DivisionByZero));
        assert_eq!(num("S % 0"), Err(ExpressionError::DivisionByZero));
    }

    #[test]
    fn boolean_connectives_short_circuit() {
        // The right side would divide by zero if evaluated.
        assert!(!boolean("S < 0 and S / zero > 1").unwrap());
        assert!(boolean("S > 0 || S / zero > 1").unwrap());
        assert!(boolean("not (S < 5) && !false").unwrap());
    }

    #[test]
    fn ternary_forms() {
        assert_eq!(num("S > 5 ? 1 : 2").unwrap(), 1.0);
        assert_eq!(num("1 if S < 5 else 2").unwrap(), 2.0);
    }

    #[test]
    fn lists_dicts_and_builtins() {
        assert_eq!(num("sum([1, 2, 3])").unwrap(), 6.0);
        assert_eq!(num("max(1, S, 3)").unwrap(), 10.0);
        assert_eq!(num("min([4, 2, 8])").unwrap(), 2.0);
        assert_eq!(num("len([1, 2] + [3])").unwrap(), 3.0);
        assert_eq!(num(r#"{"a": 1, "b": S}["b"]"#).unwrap(), 10.0);
        assert_eq!(num("[1, 2, 3][-1]").unwrap(), 3.0);
        assert_eq!(num("clamp(S, 0, 4)").unwrap(), 4.0);
        assert_eq!(num("round(2.5)").unwrap(), 2.0);
        assert_eq!(num("mass_action(0.5, 2, 3)").unwrap(), 3.0);
        assert!((num("sigmoid(0)").unwrap() - 0.5).abs() < 1e-12);
        assert!((num("hill(S, 1, S, 2)").unwrap() - 0.5).abs() < 1e-12);
        assert!((num("log(8, 2)").unwrap() - 3.0).abs() < 1e-12);
    }

    #[test]
    fn constants_resolve_after_scope() {
        assert!((num("pi").unwrap() - std::f64::consts::PI).abs() < 1e-15);
        let shadow = BTreeMap::from([("e".to_string(), 2.0)]);
        assert_eq!(validate("e").unwrap().eval_number(&shadow).unwrap(), 2.0);
    }

    #[test]
    fn undefined_variable() {
        assert_eq!(
            num("S + missing"),
            Err(ExpressionError::UndefinedVariable("missing".into()))
        );
    }

    #[test]
    fn type_mismatches() {
        assert!(matches!(num("S > 1"), Err(ExpressionError::TypeMismatch { .. })));
        assert!(matches!(boolean("S + 1"), Err(ExpressionError::TypeMismatch { .. })));
        assert!(matches!(num("true + 1"), Err(ExpressionError::TypeMismatch { .. })));
        assert!(matches!(num("S[0]"), Err(ExpressionError::TypeMismatch { .. })));
    }

    #[test]
    fn subscript_errors() {
        assert!(matches!(
            num("[1, 2][5]"),
            Err(ExpressionError::IndexOutOfRange { index: 5, len: 2 })
        ));
        assert!(matches!(num(r#"{"a": 1}["b"]"#), Err(ExpressionError::KeyNotFound(_))));
    }

    #[test]
    fn non_finite_results_rejected() {
        assert_eq!(num("sqrt(0 - 1)"), Err(ExpressionError::NonFinite));
        assert_eq!(num("exp(1000)"), Err(ExpressionError::NonFinite));
    }

    #[test]
    fn clamp_with_inverted_bounds_is_invalid() {
        assert!(matches!(
            num("clamp(1, 5, 0)"),
            Err(ExpressionError::InvalidArgument { function: "clamp", .. })
        ));
    }
}
