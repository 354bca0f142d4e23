//! The analyzed AST.
//!
//! These nodes arrive from the surface parser already analyzed; they are
//! immutable from this point on and are shared (behind `Arc`) between the
//! code generator, the event-chain analyzer, and the contract validator.

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::span::Span;

// ── Nouns and prepositions ──

/// A qualified noun: a base name plus an ordered list of sub-selectors.
///
/// `user: id: parameters` parses to base `user` with specifiers
/// `[id, parameters]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QualifiedNoun {
    pub base: String,
    pub specifiers: Vec<String>,
}

impl QualifiedNoun {
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            specifiers: Vec::new(),
        }
    }

    pub fn with_specifiers(base: impl Into<String>, specifiers: Vec<String>) -> Self {
        Self {
            base: base.into(),
            specifiers,
        }
    }
}

/// The ten connector tokens between a verb and its object.
///
/// The integer encoding is part of the runtime ABI and must never be
/// renumbered: it appears verbatim in the second field of every emitted
/// object descriptor.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "lowercase")]
pub enum Preposition {
    From,
    For,
    With,
    To,
    Into,
    Via,
    Against,
    On,
    By,
    At,
}

impl Preposition {
    /// The stable ABI integer for this preposition.
    pub fn encoding(self) -> i32 {
        match self {
            Preposition::From => 1,
            Preposition::For => 2,
            Preposition::With => 3,
            Preposition::To => 4,
            Preposition::Into => 5,
            Preposition::Via => 6,
            Preposition::Against => 7,
            Preposition::On => 8,
            Preposition::By => 9,
            Preposition::At => 10,
        }
    }

    pub fn all() -> [Preposition; 10] {
        [
            Preposition::From,
            Preposition::For,
            Preposition::With,
            Preposition::To,
            Preposition::Into,
            Preposition::Via,
            Preposition::Against,
            Preposition::On,
            Preposition::By,
            Preposition::At,
        ]
    }
}

// ── Literals ──

/// A literal value as it appears in source.
///
/// Float comparisons are bitwise-exact structural equality; the folder is
/// careful never to manufacture NaN.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LiteralValue {
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Null,
    Array(Vec<LiteralValue>),
    Object(Vec<(String, LiteralValue)>),
    Regex { pattern: String, flags: String },
}

impl LiteralValue {
    /// Kind name used in diagnostics and type-check expressions.
    pub fn kind_name(&self) -> &'static str {
        match self {
            LiteralValue::String(_) => "string",
            LiteralValue::Integer(_) => "integer",
            LiteralValue::Float(_) => "float",
            LiteralValue::Boolean(_) => "boolean",
            LiteralValue::Null => "null",
            LiteralValue::Array(_) => "array",
            LiteralValue::Object(_) => "object",
            LiteralValue::Regex { .. } => "regex",
        }
    }

    /// Plain JSON form of this literal (no wrapper markers).
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            LiteralValue::String(s) => serde_json::Value::String(s.clone()),
            LiteralValue::Integer(i) => serde_json::Value::from(*i),
            LiteralValue::Float(f) => {
                serde_json::Number::from_f64(*f).map_or(serde_json::Value::Null, serde_json::Value::Number)
            }
            LiteralValue::Boolean(b) => serde_json::Value::Bool(*b),
            LiteralValue::Null => serde_json::Value::Null,
            LiteralValue::Array(items) => {
                serde_json::Value::Array(items.iter().map(LiteralValue::to_json).collect())
            }
            LiteralValue::Object(entries) => serde_json::Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            LiteralValue::Regex { pattern, .. } => serde_json::Value::String(pattern.clone()),
        }
    }
}

// ── Expressions ──

/// Binary operators. `Concat`, `Is`, `IsNot`, `Contains`, and `Matches`
/// exist only at runtime and are never constant-folded.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "snake_case")]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    And,
    Or,
    Concat,
    Is,
    IsNot,
    Contains,
    Matches,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "snake_case")]
pub enum UnaryOp {
    Not,
    Negate,
}

/// An expression tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expression {
    Literal(LiteralValue),
    VariableRef(QualifiedNoun),
    Binary {
        op: BinaryOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expression>,
    },
    Grouped(Box<Expression>),
    /// Template text with `${var}` markers left in place.
    InterpolatedString(String),
    ArrayLiteral(Vec<Expression>),
    MapLiteral(Vec<(String, Expression)>),
    MemberAccess {
        base: Box<Expression>,
        member: String,
    },
    Subscript {
        base: Box<Expression>,
        index: Box<Expression>,
    },
    Existence(Box<Expression>),
    TypeCheck {
        expr: Box<Expression>,
        type_name: String,
    },
}

// ── Statements ──

/// Where an action statement's input value comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ValueSource {
    None,
    Literal(LiteralValue),
    Expression(Expression),
    /// A sink expression whose result is bound for the action to consume.
    Sink(Expression),
}

/// Query modifiers attached to an action statement (`where`, aggregation,
/// `by` pattern). Bound as reserved variables before the action runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryModifiers {
    pub where_field: Option<String>,
    pub where_op: Option<String>,
    pub where_value: Option<LiteralValue>,
    pub aggregation_type: Option<String>,
    pub aggregation_field: Option<String>,
    pub by_pattern: Option<String>,
    pub by_flags: Option<String>,
}

impl QueryModifiers {
    pub fn is_empty(&self) -> bool {
        self.where_field.is_none()
            && self.where_op.is_none()
            && self.where_value.is_none()
            && self.aggregation_type.is_none()
            && self.aggregation_field.is_none()
            && self.by_pattern.is_none()
            && self.by_flags.is_none()
    }
}

/// Range modifiers (`to`, `with`) attached to an action statement.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RangeModifiers {
    pub to: Option<LiteralValue>,
    pub with: Option<LiteralValue>,
}

impl RangeModifiers {
    pub fn is_empty(&self) -> bool {
        self.to.is_none() && self.with.is_none()
    }
}

/// The object half of an action statement: a preposition plus a noun.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectRef {
    pub preposition: Preposition,
    pub noun: QualifiedNoun,
}

/// One arm of a match statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchCase {
    pub pattern: Expression,
    pub body: Vec<Statement>,
}

/// Where a `require` statement's value comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RequireSource {
    /// Framework services are auto-bound by the runtime; requiring one is
    /// a no-op in emitted code.
    Framework,
    Environment,
    FeatureSet(String),
}

/// A single analyzed statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Statement {
    Action {
        verb: String,
        result: QualifiedNoun,
        object: Option<ObjectRef>,
        value: ValueSource,
        query: QueryModifiers,
        range: RangeModifiers,
        guard: Option<Expression>,
        span: Span,
    },
    Match {
        subject: QualifiedNoun,
        cases: Vec<MatchCase>,
        otherwise: Option<Vec<Statement>>,
        span: Span,
    },
    ForEach {
        item: String,
        index: Option<String>,
        collection: QualifiedNoun,
        filter: Option<Expression>,
        body: Vec<Statement>,
        span: Span,
    },
    Publish {
        external_name: String,
        internal_variable: String,
        span: Span,
    },
    Require {
        variable: String,
        source: RequireSource,
        span: Span,
    },
}

impl Statement {
    pub fn span(&self) -> &Span {
        match self {
            Statement::Action { span, .. } => span,
            Statement::Match { span, .. } => span,
            Statement::ForEach { span, .. } => span,
            Statement::Publish { span, .. } => span,
            Statement::Require { span, .. } => span,
        }
    }
}

// ── Feature sets and programs ──

/// Business-activity suffixes that discriminate dispatch roles.
const HANDLER_SUFFIX: &str = " Handler";
const OBSERVER_SUFFIX: &str = " Observer";

/// Activities that look like handlers but are wired through dedicated
/// runtime channels instead of the event-type registry. The match is by
/// substring, mirroring the reference behavior.
const EXCLUDED_HANDLER_MARKERS: [&str; 3] = ["Socket Event", "File Event", "Application-End"];

/// The feature-set name that marks an application entry point.
pub const ENTRY_POINT_NAME: &str = "Application-Start";

/// A named, statement-bearing unit of ARO code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSet {
    pub name: String,
    pub business_activity: String,
    pub statements: Vec<Statement>,
    pub span: Span,
}

impl FeatureSet {
    pub fn is_entry_point(&self) -> bool {
        self.name == ENTRY_POINT_NAME
    }

    /// The event type this feature set handles, when its business activity
    /// ends in `" Handler"` and is not one of the excluded channels.
    pub fn handler_event_type(&self) -> Option<&str> {
        let prefix = self.business_activity.strip_suffix(HANDLER_SUFFIX)?;
        if EXCLUDED_HANDLER_MARKERS
            .iter()
            .any(|marker| self.business_activity.contains(marker))
        {
            return None;
        }
        Some(prefix)
    }

    /// The repository this feature set observes, when its business activity
    /// ends in `" Observer"`.
    pub fn observed_repository(&self) -> Option<&str> {
        self.business_activity.strip_suffix(OBSERVER_SUFFIX)
    }
}

/// An ordered collection of analyzed feature sets.
///
/// Invariant: at least one entry point exists. Multiple entry points are
/// legal (module imports); the last one is the application's main.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzedProgram {
    pub feature_sets: Vec<FeatureSet>,
}

impl AnalyzedProgram {
    pub fn new(feature_sets: Vec<FeatureSet>) -> Self {
        Self { feature_sets }
    }

    pub fn entry_points(&self) -> impl Iterator<Item = &FeatureSet> {
        self.feature_sets.iter().filter(|fs| fs.is_entry_point())
    }

    /// The entry point that becomes the application main: the last one in
    /// program order.
    pub fn main_entry_point(&self) -> Option<&FeatureSet> {
        self.feature_sets.iter().rev().find(|fs| fs.is_entry_point())
    }

    pub fn find(&self, name: &str) -> Option<&FeatureSet> {
        self.feature_sets.iter().find(|fs| fs.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feature_set(name: &str, activity: &str) -> FeatureSet {
        FeatureSet {
            name: name.to_string(),
            business_activity: activity.to_string(),
            statements: Vec::new(),
            span: Span::synthetic(),
        }
    }

    #[test]
    fn preposition_encoding_is_stable() {
        let expected = [
            (Preposition::From, 1),
            (Preposition::For, 2),
            (Preposition::With, 3),
            (Preposition::To, 4),
            (Preposition::Into, 5),
            (Preposition::Via, 6),
            (Preposition::Against, 7),
            (Preposition::On, 8),
            (Preposition::By, 9),
            (Preposition::At, 10),
        ];
        for (prep, code) in expected {
            assert_eq!(prep.encoding(), code, "{prep} must encode as {code}");
        }
    }

    #[test]
    fn preposition_parses_lowercase() {
        use std::str::FromStr;
        assert_eq!(Preposition::from_str("from").unwrap(), Preposition::From);
        assert_eq!(Preposition::from_str("against").unwrap(), Preposition::Against);
        assert!(Preposition::from_str("around").is_err());
    }

    #[test]
    fn handler_activity_yields_event_type() {
        let fs = feature_set("order-notifier", "Order-Placed Handler");
        assert_eq!(fs.handler_event_type(), Some("Order-Placed"));
    }

    #[test]
    fn excluded_handler_activities_are_not_handlers() {
        for activity in [
            "Socket Event Handler",
            "File Event Handler",
            "Application-End Handler",
        ] {
            let fs = feature_set("x", activity);
            assert_eq!(fs.handler_event_type(), None, "{activity} must be excluded");
        }
    }

    #[test]
    fn observer_activity_yields_repository() {
        let fs = feature_set("audit", "orders Observer");
        assert_eq!(fs.observed_repository(), Some("orders"));
        assert_eq!(fs.handler_event_type(), None);
    }

    #[test]
    fn last_entry_point_is_main() {
        let program = AnalyzedProgram::new(vec![
            feature_set(ENTRY_POINT_NAME, "Module Init"),
            feature_set("other", "Helper"),
            feature_set(ENTRY_POINT_NAME, "Serve API"),
        ]);
        assert_eq!(program.entry_points().count(), 2);
        assert_eq!(
            program.main_entry_point().unwrap().business_activity,
            "Serve API"
        );
    }
}
