//! Constant folding.
//!
//! Statically evaluates an expression to a literal when every operand is a
//! literal, a grouped constant, or a constant collection, and the operator
//! is one of the folded forms. The folder never panics and never reports:
//! anything it cannot fold simply stays for the runtime evaluator.
//!
//! `concat`, `is`, `is_not`, `contains`, and `matches` are runtime-only
//! operators and are never folded, even over literal operands.

use aro_core::ast::{BinaryOp, Expression, LiteralValue, UnaryOp};

/// True iff the expression contains no free variable references or
/// resolution forms and every nested expression is itself constant.
pub fn is_constant(expr: &Expression) -> bool {
    match expr {
        Expression::Literal(_) => true,
        Expression::Grouped(inner) => is_constant(inner),
        Expression::ArrayLiteral(items) => items.iter().all(is_constant),
        Expression::MapLiteral(entries) => entries.iter().all(|(_, v)| is_constant(v)),
        Expression::Binary { left, right, .. } => is_constant(left) && is_constant(right),
        Expression::Unary { operand, .. } => is_constant(operand),
        // Interpolation, member access, subscripting, existence, and type
        // checks all resolve against runtime state.
        Expression::VariableRef(_)
        | Expression::InterpolatedString(_)
        | Expression::MemberAccess { .. }
        | Expression::Subscript { .. }
        | Expression::Existence(_)
        | Expression::TypeCheck { .. } => false,
    }
}

/// Fold the expression to a literal, or `None` when any part is not
/// foldable.
pub fn evaluate(expr: &Expression) -> Option<LiteralValue> {
    match expr {
        Expression::Literal(lit) => Some(lit.clone()),
        Expression::Grouped(inner) => evaluate(inner),
        Expression::ArrayLiteral(items) => {
            let folded: Option<Vec<LiteralValue>> = items.iter().map(evaluate).collect();
            folded.map(LiteralValue::Array)
        }
        Expression::MapLiteral(entries) => {
            let folded: Option<Vec<(String, LiteralValue)>> = entries
                .iter()
                .map(|(k, v)| evaluate(v).map(|lit| (k.clone(), lit)))
                .collect();
            folded.map(LiteralValue::Object)
        }
        Expression::Binary { op, left, right } => {
            let lhs = evaluate(left)?;
            let rhs = evaluate(right)?;
            fold_binary(*op, &lhs, &rhs)
        }
        Expression::Unary { op, operand } => {
            let value = evaluate(operand)?;
            fold_unary(*op, &value)
        }
        _ => None,
    }
}

fn fold_binary(op: BinaryOp, lhs: &LiteralValue, rhs: &LiteralValue) -> Option<LiteralValue> {
    use LiteralValue::{Boolean, Float, Integer, String as Str};
    match op {
        BinaryOp::Add => match (lhs, rhs) {
            (Integer(a), Integer(b)) => a.checked_add(*b).map(Integer),
            (Str(a), Str(b)) => Some(Str(format!("{a}{b}"))),
            _ => numeric_pair(lhs, rhs).map(|(a, b)| Float(a + b)),
        },
        BinaryOp::Subtract => match (lhs, rhs) {
            (Integer(a), Integer(b)) => a.checked_sub(*b).map(Integer),
            _ => numeric_pair(lhs, rhs).map(|(a, b)| Float(a - b)),
        },
        BinaryOp::Multiply => match (lhs, rhs) {
            (Integer(a), Integer(b)) => a.checked_mul(*b).map(Integer),
            _ => numeric_pair(lhs, rhs).map(|(a, b)| Float(a * b)),
        },
        BinaryOp::Divide => match (lhs, rhs) {
            (Integer(a), Integer(b)) => a.checked_div(*b).map(Integer),
            _ => {
                let (a, b) = numeric_pair(lhs, rhs)?;
                // Float division by zero stays a runtime concern.
                if b == 0.0 {
                    None
                } else {
                    Some(Float(a / b))
                }
            }
        },
        BinaryOp::Modulo => match (lhs, rhs) {
            (Integer(a), Integer(b)) => a.checked_rem(*b).map(Integer),
            _ => None,
        },
        BinaryOp::Equal => fold_equality(lhs, rhs).map(Boolean),
        BinaryOp::NotEqual => fold_equality(lhs, rhs).map(|eq| Boolean(!eq)),
        BinaryOp::LessThan => fold_ordering(lhs, rhs).map(|ord| Boolean(ord.is_lt())),
        BinaryOp::LessThanOrEqual => fold_ordering(lhs, rhs).map(|ord| Boolean(ord.is_le())),
        BinaryOp::GreaterThan => fold_ordering(lhs, rhs).map(|ord| Boolean(ord.is_gt())),
        BinaryOp::GreaterThanOrEqual => fold_ordering(lhs, rhs).map(|ord| Boolean(ord.is_ge())),
        BinaryOp::And => match (lhs, rhs) {
            (Boolean(a), Boolean(b)) => Some(Boolean(*a && *b)),
            _ => None,
        },
        BinaryOp::Or => match (lhs, rhs) {
            (Boolean(a), Boolean(b)) => Some(Boolean(*a || *b)),
            _ => None,
        },
        BinaryOp::Concat
        | BinaryOp::Is
        | BinaryOp::IsNot
        | BinaryOp::Contains
        | BinaryOp::Matches => None,
    }
}

fn fold_unary(op: UnaryOp, value: &LiteralValue) -> Option<LiteralValue> {
    match (op, value) {
        (UnaryOp::Not, LiteralValue::Boolean(b)) => Some(LiteralValue::Boolean(!b)),
        (UnaryOp::Negate, LiteralValue::Integer(i)) => i.checked_neg().map(LiteralValue::Integer),
        (UnaryOp::Negate, LiteralValue::Float(f)) => Some(LiteralValue::Float(-f)),
        _ => None,
    }
}

/// Numeric coercion for mixed int/float operands. `None` when either side
/// is not numeric or both are integers (the integer paths are handled by
/// the caller).
fn numeric_pair(lhs: &LiteralValue, rhs: &LiteralValue) -> Option<(f64, f64)> {
    let promote = |v: &LiteralValue| match v {
        LiteralValue::Integer(i) => Some(*i as f64),
        LiteralValue::Float(f) => Some(*f),
        _ => None,
    };
    match (lhs, rhs) {
        (LiteralValue::Integer(_), LiteralValue::Integer(_)) => None,
        _ => Some((promote(lhs)?, promote(rhs)?)),
    }
}

/// Equality on primitive kinds. `null == null` is true; mixed int/float
/// promotes; any other cross-kind pair compares unequal. Collections and
/// regexes are left to the runtime.
fn fold_equality(lhs: &LiteralValue, rhs: &LiteralValue) -> Option<bool> {
    use LiteralValue::{Boolean, Float, Integer, Null, String as Str};
    match (lhs, rhs) {
        (Null, Null) => Some(true),
        (Integer(a), Integer(b)) => Some(a == b),
        (Float(a), Float(b)) => Some(a == b),
        (Integer(a), Float(b)) | (Float(b), Integer(a)) => Some(*a as f64 == *b),
        (Str(a), Str(b)) => Some(a == b),
        (Boolean(a), Boolean(b)) => Some(a == b),
        (LiteralValue::Array(_), _)
        | (_, LiteralValue::Array(_))
        | (LiteralValue::Object(_), _)
        | (_, LiteralValue::Object(_))
        | (LiteralValue::Regex { .. }, _)
        | (_, LiteralValue::Regex { .. }) => None,
        _ => Some(false),
    }
}

/// Ordering on integers, floats, strings, and mixed numeric pairs.
fn fold_ordering(lhs: &LiteralValue, rhs: &LiteralValue) -> Option<std::cmp::Ordering> {
    use LiteralValue::{Float, Integer, String as Str};
    match (lhs, rhs) {
        (Integer(a), Integer(b)) => Some(a.cmp(b)),
        (Float(a), Float(b)) => a.partial_cmp(b),
        (Integer(a), Float(b)) => (*a as f64).partial_cmp(b),
        (Float(a), Integer(b)) => a.partial_cmp(&(*b as f64)),
        (Str(a), Str(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aro_core::ast::QualifiedNoun;

    fn int(i: i64) -> Expression {
        Expression::Literal(LiteralValue::Integer(i))
    }

    fn float(f: f64) -> Expression {
        Expression::Literal(LiteralValue::Float(f))
    }

    fn string(s: &str) -> Expression {
        Expression::Literal(LiteralValue::String(s.to_string()))
    }

    fn boolean(b: bool) -> Expression {
        Expression::Literal(LiteralValue::Boolean(b))
    }

    fn binary(op: BinaryOp, left: Expression, right: Expression) -> Expression {
        Expression::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    #[test]
    fn arithmetic_with_precedence_folds() {
        // 2 + 3 * 4
        let expr = binary(
            BinaryOp::Add,
            int(2),
            binary(BinaryOp::Multiply, int(3), int(4)),
        );
        assert_eq!(evaluate(&expr), Some(LiteralValue::Integer(14)));
        assert!(is_constant(&expr));
    }

    #[test]
    fn string_addition_concatenates() {
        let expr = binary(BinaryOp::Add, string("a"), string("b"));
        assert_eq!(evaluate(&expr), Some(LiteralValue::String("ab".into())));
    }

    #[test]
    fn integer_division_by_zero_is_not_foldable() {
        let expr = binary(BinaryOp::Divide, int(10), int(0));
        assert_eq!(evaluate(&expr), None);
    }

    #[test]
    fn logical_and_folds_on_booleans_only() {
        let expr = binary(BinaryOp::And, boolean(true), boolean(false));
        assert_eq!(evaluate(&expr), Some(LiteralValue::Boolean(false)));
        let bad = binary(BinaryOp::And, boolean(true), int(1));
        assert_eq!(evaluate(&bad), None);
    }

    #[test]
    fn mixed_numeric_pairs_promote_to_float() {
        let expr = binary(BinaryOp::Add, int(1), float(0.5));
        assert_eq!(evaluate(&expr), Some(LiteralValue::Float(1.5)));
        let cmp = binary(BinaryOp::LessThan, int(1), float(1.5));
        assert_eq!(evaluate(&cmp), Some(LiteralValue::Boolean(true)));
    }

    #[test]
    fn null_equality_and_cross_kind_equality() {
        let nulls = binary(
            BinaryOp::Equal,
            Expression::Literal(LiteralValue::Null),
            Expression::Literal(LiteralValue::Null),
        );
        assert_eq!(evaluate(&nulls), Some(LiteralValue::Boolean(true)));
        let cross = binary(BinaryOp::Equal, int(1), string("1"));
        assert_eq!(evaluate(&cross), Some(LiteralValue::Boolean(false)));
        let cross_ne = binary(BinaryOp::NotEqual, int(1), string("1"));
        assert_eq!(evaluate(&cross_ne), Some(LiteralValue::Boolean(true)));
    }

    #[test]
    fn runtime_only_operators_do_not_fold() {
        for op in [
            BinaryOp::Concat,
            BinaryOp::Is,
            BinaryOp::IsNot,
            BinaryOp::Contains,
            BinaryOp::Matches,
        ] {
            let expr = binary(op, string("a"), string("a"));
            assert_eq!(evaluate(&expr), None, "{op} must not fold");
        }
    }

    #[test]
    fn free_variables_block_folding() {
        let expr = binary(
            BinaryOp::Add,
            int(1),
            Expression::VariableRef(QualifiedNoun::new("count")),
        );
        assert!(!is_constant(&expr));
        assert_eq!(evaluate(&expr), None);
    }

    #[test]
    fn constant_collections_fold_elementwise() {
        let expr = Expression::ArrayLiteral(vec![
            int(1),
            binary(BinaryOp::Add, int(1), int(1)),
            string("x"),
        ]);
        assert_eq!(
            evaluate(&expr),
            Some(LiteralValue::Array(vec![
                LiteralValue::Integer(1),
                LiteralValue::Integer(2),
                LiteralValue::String("x".into()),
            ]))
        );
    }

    #[test]
    fn unary_forms_fold() {
        let not = Expression::Unary {
            op: UnaryOp::Not,
            operand: Box::new(boolean(false)),
        };
        assert_eq!(evaluate(&not), Some(LiteralValue::Boolean(true)));
        let neg = Expression::Unary {
            op: UnaryOp::Negate,
            operand: Box::new(float(2.5)),
        };
        assert_eq!(evaluate(&neg), Some(LiteralValue::Float(-2.5)));
    }

    #[test]
    fn evaluation_is_deterministic() {
        let expr = binary(
            BinaryOp::Multiply,
            binary(BinaryOp::Add, int(2), int(3)),
            float(2.0),
        );
        let first = evaluate(&expr);
        for _ in 0..10 {
            assert_eq!(evaluate(&expr), first);
        }
    }

    #[test]
    fn integer_overflow_is_not_foldable() {
        let expr = binary(BinaryOp::Add, int(i64::MAX), int(1));
        assert_eq!(evaluate(&expr), None);
    }
}
