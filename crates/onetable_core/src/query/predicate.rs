//! Typed filter predicate AST and its builder.
//!
//! Predicates are plain data; [`crate::query::compiler`] turns them into
//! statement fragments. Build them with [`attr`]:
//!
//! ```
//! use onetable_core::query::predicate::attr;
//!
//! let filter = attr("status").eq("Shipped") & (attr("total").gt(10) | attr("rush").eq(true));
//! ```

use crate::model::document::Value;
use std::ops::{BitAnd, BitOr, Not};

/// Binary comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl ComparisonOp {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }
}

/// Declared enum type of an attribute: variant names by discriminant.
///
/// Enums are stored by variant name, so untyped discriminant constants are
/// resolved through the enum type of the attribute they are compared with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnumType {
    pub name: &'static str,
    pub variants: &'static [(&'static str, i64)],
}

impl EnumType {
    pub const fn new(name: &'static str, variants: &'static [(&'static str, i64)]) -> Self {
        Self { name, variants }
    }

    pub fn variant_name(&self, discriminant: i64) -> Option<&'static str> {
        self.variants
            .iter()
            .find(|(_, value)| *value == discriminant)
            .map(|(name, _)| *name)
    }
}

/// Leaf of a predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// Document attribute, addressed by dotted path.
    Attribute {
        path: String,
        enum_type: Option<EnumType>,
    },
    /// Typed constant.
    Value(Value),
    /// Enum constant carrying no type information.
    Discriminant(i64),
}

impl Operand {
    pub fn discriminant(value: i64) -> Self {
        Self::Discriminant(value)
    }

    pub(crate) fn enum_type(&self) -> Option<EnumType> {
        match self {
            Self::Attribute { enum_type, .. } => *enum_type,
            _ => None,
        }
    }
}

/// Value source of a membership test.
#[derive(Debug, Clone, PartialEq)]
pub enum Membership {
    /// A short list of constants: `IN (?, ?)`.
    Constants(Vec<Operand>),
    /// A runtime collection, expanded at compile time: `IN [?, ?]`.
    Collection(Operand),
}

/// Filter predicate AST.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Comparison {
        left: Operand,
        op: ComparisonOp,
        right: Operand,
    },
    And(Box<Predicate>, Box<Predicate>),
    Or(Box<Predicate>, Box<Predicate>),
    Not(Box<Predicate>),
    BeginsWith {
        attribute: Operand,
        prefix: Operand,
    },
    Contains {
        attribute: Operand,
        value: Operand,
    },
    In {
        attribute: Operand,
        membership: Membership,
    },
    Between {
        attribute: Operand,
        low: Operand,
        high: Operand,
    },
}

impl Predicate {
    pub fn and(self, other: Predicate) -> Predicate {
        Predicate::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: Predicate) -> Predicate {
        Predicate::Or(Box::new(self), Box::new(other))
    }

    pub fn is_combinator(&self) -> bool {
        matches!(self, Predicate::And(..) | Predicate::Or(..))
    }
}

impl BitAnd for Predicate {
    type Output = Predicate;

    fn bitand(self, rhs: Predicate) -> Predicate {
        self.and(rhs)
    }
}

impl BitOr for Predicate {
    type Output = Predicate;

    fn bitor(self, rhs: Predicate) -> Predicate {
        self.or(rhs)
    }
}

impl Not for Predicate {
    type Output = Predicate;

    fn not(self) -> Predicate {
        Predicate::Not(Box::new(self))
    }
}

/// Starts a predicate on the attribute at `path`.
pub fn attr(path: &str) -> Attr {
    Attr {
        path: path.to_string(),
        enum_type: None,
    }
}

/// Attribute reference under construction.
#[derive(Debug, Clone)]
pub struct Attr {
    path: String,
    enum_type: Option<EnumType>,
}

impl Attr {
    /// Declares the attribute as holding variants of `enum_type`.
    pub fn of_enum(mut self, enum_type: EnumType) -> Self {
        self.enum_type = Some(enum_type);
        self
    }

    pub fn eq(self, value: impl Into<Operand>) -> Predicate {
        self.compare(ComparisonOp::Eq, value)
    }

    pub fn ne(self, value: impl Into<Operand>) -> Predicate {
        self.compare(ComparisonOp::Ne, value)
    }

    pub fn lt(self, value: impl Into<Operand>) -> Predicate {
        self.compare(ComparisonOp::Lt, value)
    }

    pub fn le(self, value: impl Into<Operand>) -> Predicate {
        self.compare(ComparisonOp::Le, value)
    }

    pub fn gt(self, value: impl Into<Operand>) -> Predicate {
        self.compare(ComparisonOp::Gt, value)
    }

    pub fn ge(self, value: impl Into<Operand>) -> Predicate {
        self.compare(ComparisonOp::Ge, value)
    }

    pub fn begins_with(self, prefix: impl Into<Operand>) -> Predicate {
        Predicate::BeginsWith {
            attribute: self.into(),
            prefix: prefix.into(),
        }
    }

    pub fn contains(self, value: impl Into<Operand>) -> Predicate {
        Predicate::Contains {
            attribute: self.into(),
            value: value.into(),
        }
    }

    /// Membership in a fixed list of constants.
    pub fn is_in<I, V>(self, values: I) -> Predicate
    where
        I: IntoIterator<Item = V>,
        V: Into<Operand>,
    {
        Predicate::In {
            attribute: self.into(),
            membership: Membership::Constants(values.into_iter().map(Into::into).collect()),
        }
    }

    /// Membership in a runtime collection, e.g. a `Vec` of ids.
    pub fn in_collection(self, collection: impl Into<Value>) -> Predicate {
        Predicate::In {
            attribute: self.into(),
            membership: Membership::Collection(Operand::Value(collection.into())),
        }
    }

    pub fn between(self, low: impl Into<Operand>, high: impl Into<Operand>) -> Predicate {
        Predicate::Between {
            attribute: self.into(),
            low: low.into(),
            high: high.into(),
        }
    }

    fn compare(self, op: ComparisonOp, value: impl Into<Operand>) -> Predicate {
        Predicate::Comparison {
            left: self.into(),
            op,
            right: value.into(),
        }
    }
}

impl From<Attr> for Operand {
    fn from(attr: Attr) -> Self {
        Operand::Attribute {
            path: attr.path,
            enum_type: attr.enum_type,
        }
    }
}

impl From<Value> for Operand {
    fn from(value: Value) -> Self {
        Operand::Value(value)
    }
}

macro_rules! value_operand {
    ($($source:ty),*) => {
        $(
            impl From<$source> for Operand {
                fn from(value: $source) -> Self {
                    Operand::Value(Value::from(value))
                }
            }
        )*
    };
}

value_operand!(&str, String, bool, i32, i64, u32, u64, f64);

impl<T: Into<Operand>> From<Option<T>> for Operand {
    fn from(value: Option<T>) -> Self {
        value.map_or(Operand::Value(Value::Null), Into::into)
    }
}
