//! The condition-expression language used by `conditions` and
//! `target_conditions` clauses.
//!
//! The grammar is deliberately small: string and integer literals, variable
//! references by bare identifier, `==`/`!=`/`<`/`<=`/`>`/`>=`, and
//! `and`/`or`/`not` with the usual precedence (`or` loosest, then `and`,
//! then `not`). Nothing else resolves: no attribute access, no calls, no
//! arithmetic. Conditions are data, not programs.

use nom::branch::alt;
use nom::bytes::complete::tag;
use nom::character::complete::{char as literal_char, satisfy};
use nom::combinator::{all_consuming, map, opt, recognize, verify};
use nom::multi::{many0, many0_count};
use nom::sequence::{delimited, pair, preceded};

use crate::error::{Error, Result};
use crate::parser::{integer_literal, space, string_literal, token, word, PResult};
use crate::value::{Value, Variables};

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Str(String),
    Int(i64),
    Var(String),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Compare(Box<Expr>, Comparison, Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Comparison {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// Evaluate `cond_expr` against `variables`. The expression must evaluate
/// to a boolean.
pub fn evaluate(cond_expr: &str, variables: &Variables) -> Result<bool> {
    let expr = parse(cond_expr)?;
    match eval(&expr, cond_expr, variables)? {
        Value::Bool(result) => Ok(result),
        other => Err(Error::type_mismatch(format!(
            "condition {:?} evaluated to a {}, not a boolean",
            cond_expr,
            other.type_name()
        ))),
    }
}

fn parse(cond_expr: &str) -> Result<Expr> {
    match all_consuming(delimited(space, or_expr, space))(cond_expr) {
        Ok((_, expr)) => Ok(expr),
        Err(_) => Err(Error::type_mismatch(format!(
            "condition {:?} is not a valid expression",
            cond_expr
        ))),
    }
}

fn or_expr(input: &str) -> PResult<Expr> {
    let (input, first) = and_expr(input)?;
    let (input, rest) = many0(preceded(token(word("or")), and_expr))(input)?;
    Ok((input, fold_binary(first, rest, Expr::Or)))
}

fn and_expr(input: &str) -> PResult<Expr> {
    let (input, first) = not_expr(input)?;
    let (input, rest) = many0(preceded(token(word("and")), not_expr))(input)?;
    Ok((input, fold_binary(first, rest, Expr::And)))
}

fn fold_binary(
    first: Expr,
    rest: Vec<Expr>,
    combine: fn(Box<Expr>, Box<Expr>) -> Expr,
) -> Expr {
    rest.into_iter()
        .fold(first, |left, right| combine(Box::new(left), Box::new(right)))
}

fn not_expr(input: &str) -> PResult<Expr> {
    alt((
        map(preceded(token(word("not")), not_expr), |inner| {
            Expr::Not(Box::new(inner))
        }),
        comparison,
    ))(input)
}

fn comparison(input: &str) -> PResult<Expr> {
    let (input, left) = term(input)?;
    let (input, tail) = opt(pair(token(comparison_op), term))(input)?;
    Ok((input, match tail {
        Some((op, right)) => Expr::Compare(Box::new(left), op, Box::new(right)),
        None => left,
    }))
}

fn comparison_op(input: &str) -> PResult<Comparison> {
    alt((
        map(tag("=="), |_| Comparison::Eq),
        map(tag("!="), |_| Comparison::Ne),
        map(tag("<="), |_| Comparison::Le),
        map(tag(">="), |_| Comparison::Ge),
        map(tag("<"), |_| Comparison::Lt),
        map(tag(">"), |_| Comparison::Gt),
    ))(input)
}

fn term(input: &str) -> PResult<Expr> {
    token(alt((
        map(string_literal, Expr::Str),
        map(integer_literal, Expr::Int),
        map(identifier, |name| Expr::Var(name.to_owned())),
        delimited(
            literal_char('('),
            or_expr,
            token(literal_char(')')),
        ),
    )))(input)
}

fn identifier(input: &str) -> PResult<&str> {
    verify(
        recognize(pair(
            satisfy(|c: char| c.is_alphabetic() || c == '_'),
            many0_count(satisfy(|c: char| c.is_alphanumeric() || c == '_')),
        )),
        |name: &str| !matches!(name, "and" | "or" | "not"),
    )(input)
}

fn eval(expr: &Expr, cond_expr: &str, variables: &Variables) -> Result<Value> {
    match expr {
        Expr::Str(s) => Ok(Value::Str(s.clone())),
        Expr::Int(i) => Ok(Value::Int(*i)),
        Expr::Var(name) => match variables.get(name) {
            Some(value) if value.is_scalar() => Ok(value.clone()),
            Some(value) => Err(Error::type_mismatch(format!(
                "variable {} is a {} and cannot be used in condition {:?}",
                name,
                value.type_name(),
                cond_expr
            ))),
            None => Err(Error::UndefinedVariable {
                name: name.clone(),
                input: cond_expr.to_owned(),
            }),
        },
        Expr::Not(inner) => Ok(Value::Bool(!eval_bool(inner, cond_expr, variables)?)),
        Expr::And(left, right) => {
            // Short-circuit, so the right side may reference variables that
            // only exist when the left side holds.
            if !eval_bool(left, cond_expr, variables)? {
                return Ok(Value::Bool(false));
            }
            Ok(Value::Bool(eval_bool(right, cond_expr, variables)?))
        }
        Expr::Or(left, right) => {
            if eval_bool(left, cond_expr, variables)? {
                return Ok(Value::Bool(true));
            }
            Ok(Value::Bool(eval_bool(right, cond_expr, variables)?))
        }
        Expr::Compare(left, op, right) => {
            let left = eval(left, cond_expr, variables)?;
            let right = eval(right, cond_expr, variables)?;
            compare(&left, *op, &right, cond_expr)
        }
    }
}

fn eval_bool(expr: &Expr, cond_expr: &str, variables: &Variables) -> Result<bool> {
    match eval(expr, cond_expr, variables)? {
        Value::Bool(b) => Ok(b),
        other => Err(Error::type_mismatch(format!(
            "operand of a boolean operator in condition {:?} is a {}, not a boolean",
            cond_expr,
            other.type_name()
        ))),
    }
}

fn compare(left: &Value, op: Comparison, right: &Value, cond_expr: &str) -> Result<Value> {
    // Equality across differing types is just inequality; ordering across
    // differing types has no meaning.
    let result = match (op, left, right) {
        (Comparison::Eq, a, b) => a.same_variant(b) && a == b,
        (Comparison::Ne, a, b) => !(a.same_variant(b) && a == b),
        (op, Value::Int(a), Value::Int(b)) => ordered(op, a.cmp(b)),
        (op, Value::Str(a), Value::Str(b)) => ordered(op, a.cmp(b)),
        _ => {
            return Err(Error::type_mismatch(format!(
                "cannot order a {} against a {} in condition {:?}",
                left.type_name(),
                right.type_name(),
                cond_expr
            )))
        }
    };
    Ok(Value::Bool(result))
}

fn ordered(op: Comparison, ordering: std::cmp::Ordering) -> bool {
    match op {
        Comparison::Lt => ordering.is_lt(),
        Comparison::Le => ordering.is_le(),
        Comparison::Gt => ordering.is_gt(),
        Comparison::Ge => ordering.is_ge(),
        Comparison::Eq | Comparison::Ne => unreachable!("handled before ordering"),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use maplit::btreemap;

    fn vars() -> Variables {
        btreemap! {
            "os".to_string() => Value::Str("mac".into()),
            "jobs".to_string() => Value::Int(4),
            "fast".to_string() => Value::Bool(true),
            "sources".to_string() => Value::List(vec![]),
        }
    }

    #[test]
    fn string_and_integer_comparisons() {
        assert!(evaluate("os==\"mac\"", &vars()).unwrap());
        assert!(!evaluate("os=='linux'", &vars()).unwrap());
        assert!(evaluate("jobs>=4", &vars()).unwrap());
        assert!(evaluate("jobs<10", &vars()).unwrap());
        assert!(evaluate("os!='win'", &vars()).unwrap());
    }

    #[test]
    fn boolean_operators_and_precedence() {
        // "or" binds looser than "and": true or (false and false).
        assert!(evaluate("os=='mac' or os=='win' and jobs>100", &vars()).unwrap());
        assert!(!evaluate("(os=='mac' or os=='win') and jobs>100", &vars()).unwrap());
        assert!(evaluate("not os=='win'", &vars()).unwrap());
        assert!(evaluate("fast and jobs==4", &vars()).unwrap());
    }

    #[test]
    fn bare_boolean_variables() {
        assert!(evaluate("fast", &vars()).unwrap());
        assert!(!evaluate("not fast", &vars()).unwrap());
    }

    #[test]
    fn equality_across_types_is_inequality() {
        assert!(!evaluate("jobs=='4'", &vars()).unwrap());
        assert!(evaluate("jobs!='4'", &vars()).unwrap());
    }

    #[test]
    fn undefined_variable_is_fatal() {
        match evaluate("arch=='x64'", &vars()).unwrap_err() {
            Error::UndefinedVariable { name, input } => {
                assert_eq!(name, "arch");
                assert_eq!(input, "arch=='x64'");
            }
            other => panic!("expected UndefinedVariable, got {:?}", other),
        }
    }

    #[test]
    fn type_errors_are_fatal() {
        // A string is not a boolean operand.
        assert!(evaluate("os and fast", &vars()).is_err());
        // Ordering a string against an integer has no meaning.
        assert!(evaluate("os < 3", &vars()).is_err());
        // A list-valued variable cannot appear in a condition.
        assert!(evaluate("sources=='x'", &vars()).is_err());
        // The whole expression must be a boolean.
        assert!(evaluate("jobs", &vars()).is_err());
    }

    #[test]
    fn malformed_expressions_are_fatal() {
        assert!(evaluate("os ==", &vars()).is_err());
        assert!(evaluate("os === 'mac'", &vars()).is_err());
        assert!(evaluate("", &vars()).is_err());
        assert!(evaluate("(os=='mac'", &vars()).is_err());
    }

    #[test]
    fn keywords_are_not_identifiers() {
        assert!(evaluate("not", &vars()).is_err());
    }
}
