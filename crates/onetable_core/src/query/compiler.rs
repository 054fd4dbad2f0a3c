//! Query description to parameterized statement.
//!
//! # Invariants
//! - Constants never appear in statement text; each one is a `?` placeholder
//!   with its value at the same position in `parameters`.
//! - Parameters follow left-to-right AST order.
//! - Compilation failures are `QueryCompilationError`s and are never retried.

use super::predicate::{EnumType, Membership, Operand, Predicate};
use super::{QueryError, QueryResult};
use crate::model::document::Value;
use std::fmt::{Display, Formatter};
use thiserror::Error;

pub type CompileResult<T> = Result<T, QueryCompilationError>;

/// Programmer errors detected while compiling a query.
#[derive(Debug, Error, PartialEq)]
pub enum QueryCompilationError {
    #[error("null constant is not allowed in {context}")]
    NullConstant { context: &'static str },
    #[error("cannot resolve enum discriminant {discriminant}: {reason}")]
    UnresolvedEnum { discriminant: i64, reason: String },
    #[error("membership test on `{attribute}` needs at least one value")]
    EmptyMembershipList { attribute: String },
    #[error("unsupported operand in {context}: {detail}")]
    UnsupportedOperand {
        context: &'static str,
        detail: String,
    },
    #[error("sort key operator `{operator}` takes {expected} value(s), got {actual}")]
    SortKeyArity {
        operator: SortKeyOperator,
        expected: usize,
        actual: usize,
    },
}

/// Sort key condition operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKeyOperator {
    Equal,
    LessThan,
    LessOrEqual,
    GreaterThan,
    GreaterOrEqual,
    BeginsWith,
    Between,
}

impl SortKeyOperator {
    pub fn arity(self) -> usize {
        match self {
            Self::Between => 2,
            _ => 1,
        }
    }
}

impl Display for SortKeyOperator {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Equal => "equal",
            Self::LessThan => "less_than",
            Self::LessOrEqual => "less_or_equal",
            Self::GreaterThan => "greater_than",
            Self::GreaterOrEqual => "greater_or_equal",
            Self::BeginsWith => "begins_with",
            Self::Between => "between",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SortKeyCondition {
    pub operator: SortKeyOperator,
    pub values: Vec<Value>,
}

impl SortKeyCondition {
    pub fn new(operator: SortKeyOperator, values: Vec<Value>) -> Self {
        Self { operator, values }
    }
}

/// Everything needed to compile one query.
#[derive(Debug, Clone, PartialEq)]
pub struct QuerySpec {
    pub table_name: String,
    pub index_name: Option<String>,
    pub partition_key_attribute: String,
    pub sort_key_attribute: String,
    pub partition_key: Option<Value>,
    pub sort_key: Option<SortKeyCondition>,
    pub filter: Option<Predicate>,
    pub limit: Option<u32>,
    pub consistent_read: bool,
    pub descending: bool,
}

impl QuerySpec {
    pub fn new(
        table_name: impl Into<String>,
        partition_key_attribute: impl Into<String>,
        sort_key_attribute: impl Into<String>,
    ) -> Self {
        Self {
            table_name: table_name.into(),
            index_name: None,
            partition_key_attribute: partition_key_attribute.into(),
            sort_key_attribute: sort_key_attribute.into(),
            partition_key: None,
            sort_key: None,
            filter: None,
            limit: None,
            consistent_read: false,
            descending: false,
        }
    }
}

/// Statement text plus positional parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompiledStatement {
    pub statement: String,
    pub parameters: Vec<Value>,
}

/// Compiles a full query statement.
///
/// Fails with `QueryError::MissingPartitionKey` before anything else when the
/// partition key value is absent or empty.
pub fn compile_query(spec: &QuerySpec) -> QueryResult<CompiledStatement> {
    let partition_key = match &spec.partition_key {
        Some(Value::Null) | None => None,
        Some(Value::String(text)) if text.is_empty() => None,
        Some(value) => Some(value.clone()),
    };
    let Some(partition_key) = partition_key else {
        return Err(QueryError::MissingPartitionKey {
            table: spec.table_name.clone(),
        });
    };

    let mut parameters = vec![partition_key];
    let mut statement = format!("SELECT * FROM {}", quote(&spec.table_name));
    if let Some(index) = &spec.index_name {
        statement.push('.');
        statement.push_str(&quote(index));
    }
    statement.push_str(&format!(
        " WHERE {} = ?",
        quote(&spec.partition_key_attribute)
    ));

    if let Some(condition) = &spec.sort_key {
        let fragment = compile_sort_key(&spec.sort_key_attribute, condition, &mut parameters)?;
        statement.push_str(" AND ");
        statement.push_str(&fragment);
    }

    if let Some(filter) = &spec.filter {
        let fragment = render_nested(filter, &mut parameters)?;
        statement.push_str(" AND ");
        statement.push_str(&fragment);
    }

    if spec.descending {
        statement.push_str(&format!(
            " ORDER BY {} DESC",
            quote(&spec.sort_key_attribute)
        ));
    }

    Ok(CompiledStatement {
        statement,
        parameters,
    })
}

/// Compiles a standalone filter predicate.
///
/// A combinator is parenthesized only when one of its sides is itself a
/// combinator; nested combinators are always parenthesized.
pub fn compile_predicate(predicate: &Predicate) -> CompileResult<CompiledStatement> {
    let mut parameters = Vec::new();
    let statement = render(predicate, &mut parameters)?;
    Ok(CompiledStatement {
        statement,
        parameters,
    })
}

fn compile_sort_key(
    attribute: &str,
    condition: &SortKeyCondition,
    parameters: &mut Vec<Value>,
) -> CompileResult<String> {
    let expected = condition.operator.arity();
    if condition.values.len() != expected {
        return Err(QueryCompilationError::SortKeyArity {
            operator: condition.operator,
            expected,
            actual: condition.values.len(),
        });
    }
    if condition.values.iter().any(Value::is_null) {
        return Err(QueryCompilationError::NullConstant {
            context: "sort key condition",
        });
    }
    parameters.extend(condition.values.iter().cloned());

    let attribute = quote(attribute);
    let fragment = match condition.operator {
        SortKeyOperator::Equal => format!("{attribute} = ?"),
        SortKeyOperator::LessThan => format!("{attribute} < ?"),
        SortKeyOperator::LessOrEqual => format!("{attribute} <= ?"),
        SortKeyOperator::GreaterThan => format!("{attribute} > ?"),
        SortKeyOperator::GreaterOrEqual => format!("{attribute} >= ?"),
        SortKeyOperator::BeginsWith => format!("begins_with({attribute}, ?)"),
        SortKeyOperator::Between => format!("{attribute} BETWEEN ? AND ?"),
    };
    Ok(fragment)
}

fn render(predicate: &Predicate, parameters: &mut Vec<Value>) -> CompileResult<String> {
    match predicate {
        Predicate::And(left, right) => render_combinator(left, "AND", right, parameters),
        Predicate::Or(left, right) => render_combinator(left, "OR", right, parameters),
        Predicate::Not(inner) => Ok(format!("NOT ({})", render(inner, parameters)?)),
        Predicate::Comparison { left, op, right } => {
            let left_text = render_operand(left, right.enum_type(), "comparison", parameters)?;
            let right_text = render_operand(right, left.enum_type(), "comparison", parameters)?;
            Ok(format!("{left_text} {} {right_text}", op.symbol()))
        }
        Predicate::BeginsWith { attribute, prefix } => {
            let attribute = attribute_path(attribute, "begins_with")?;
            let prefix = render_operand(prefix, None, "begins_with", parameters)?;
            Ok(format!("begins_with({attribute}, {prefix})"))
        }
        Predicate::Contains { attribute, value } => {
            let attribute_text = attribute_path(attribute, "contains")?;
            let value = render_operand(value, attribute.enum_type(), "contains", parameters)?;
            Ok(format!("contains({attribute_text}, {value})"))
        }
        Predicate::In {
            attribute,
            membership,
        } => render_membership(attribute, membership, parameters),
        Predicate::Between {
            attribute,
            low,
            high,
        } => {
            let enum_type = attribute.enum_type();
            let attribute = attribute_path(attribute, "between")?;
            let low = render_operand(low, enum_type, "between", parameters)?;
            let high = render_operand(high, enum_type, "between", parameters)?;
            Ok(format!("{attribute} BETWEEN {low} AND {high}"))
        }
    }
}

/// Renders `predicate` as a child of a combinator or WHERE clause.
fn render_nested(predicate: &Predicate, parameters: &mut Vec<Value>) -> CompileResult<String> {
    let text = render(predicate, parameters)?;
    let wrapped = match predicate {
        Predicate::And(left, right) | Predicate::Or(left, right) => {
            left.is_combinator() || right.is_combinator()
        }
        _ => true,
    };
    if !wrapped {
        Ok(format!("({text})"))
    } else {
        Ok(text)
    }
}

fn render_combinator(
    left: &Predicate,
    keyword: &str,
    right: &Predicate,
    parameters: &mut Vec<Value>,
) -> CompileResult<String> {
    let left_text = render_nested(left, parameters)?;
    let right_text = render_nested(right, parameters)?;
    if left.is_combinator() || right.is_combinator() {
        Ok(format!("({left_text} {keyword} {right_text})"))
    } else {
        Ok(format!("{left_text} {keyword} {right_text}"))
    }
}

fn render_membership(
    attribute: &Operand,
    membership: &Membership,
    parameters: &mut Vec<Value>,
) -> CompileResult<String> {
    let enum_type = attribute.enum_type();
    let path = attribute_path(attribute, "membership test")?;
    let (values, open, close) = match membership {
        Membership::Constants(values) => (values.clone(), '(', ')'),
        Membership::Collection(Operand::Value(Value::Array(items))) => (
            items.iter().cloned().map(Operand::Value).collect(),
            '[',
            ']',
        ),
        Membership::Collection(other) => {
            return Err(QueryCompilationError::UnsupportedOperand {
                context: "membership test",
                detail: format!("expected a collection, got {other:?}"),
            })
        }
    };
    if values.is_empty() {
        return Err(QueryCompilationError::EmptyMembershipList { attribute: path });
    }
    let mut placeholders = Vec::with_capacity(values.len());
    for value in &values {
        placeholders.push(render_operand(value, enum_type, "membership test", parameters)?);
    }
    Ok(format!("{path} IN {open}{}{close}", placeholders.join(", ")))
}

fn render_operand(
    operand: &Operand,
    peer_enum: Option<EnumType>,
    context: &'static str,
    parameters: &mut Vec<Value>,
) -> CompileResult<String> {
    match operand {
        Operand::Attribute { path, .. } => Ok(quote_path(path)),
        Operand::Value(Value::Null) => Err(QueryCompilationError::NullConstant { context }),
        Operand::Value(Value::Number(number)) if peer_enum.is_some() && number.is_i64() => {
            let discriminant = number.as_i64().unwrap_or_default();
            push_variant(discriminant, peer_enum, parameters)
        }
        Operand::Value(value) => {
            parameters.push(value.clone());
            Ok("?".to_string())
        }
        Operand::Discriminant(discriminant) => push_variant(*discriminant, peer_enum, parameters),
    }
}

fn push_variant(
    discriminant: i64,
    enum_type: Option<EnumType>,
    parameters: &mut Vec<Value>,
) -> CompileResult<String> {
    let Some(enum_type) = enum_type else {
        return Err(QueryCompilationError::UnresolvedEnum {
            discriminant,
            reason: "no operand declares an enum type".to_string(),
        });
    };
    let Some(name) = enum_type.variant_name(discriminant) else {
        return Err(QueryCompilationError::UnresolvedEnum {
            discriminant,
            reason: format!("`{}` has no such variant", enum_type.name),
        });
    };
    parameters.push(Value::String(name.to_string()));
    Ok("?".to_string())
}

fn attribute_path(operand: &Operand, context: &'static str) -> CompileResult<String> {
    match operand {
        Operand::Attribute { path, .. } => Ok(quote_path(path)),
        other => Err(QueryCompilationError::UnsupportedOperand {
            context,
            detail: format!("expected an attribute, got {other:?}"),
        }),
    }
}

fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

fn quote_path(path: &str) -> String {
    path.split('.').map(quote).collect::<Vec<_>>().join(".")
}
