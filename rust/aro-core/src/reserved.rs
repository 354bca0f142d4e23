//! Reserved variable names.
//!
//! The code generator lowers statement modifiers and value sources into
//! bindings under these names; actions consume (and unbind) them. Both
//! sides must agree on the exact spellings, so they live here.

pub const WHERE_FIELD: &str = "_where_field_";
pub const WHERE_OP: &str = "_where_op_";
pub const WHERE_VALUE: &str = "_where_value_";
pub const AGGREGATION_TYPE: &str = "_aggregation_type_";
pub const AGGREGATION_FIELD: &str = "_aggregation_field_";
pub const BY_PATTERN: &str = "_by_pattern_";
pub const BY_FLAGS: &str = "_by_flags_";
pub const RANGE_TO: &str = "_to_";
pub const RANGE_WITH: &str = "_with_";
pub const RESULT_EXPRESSION: &str = "_result_expression_";
pub const PUBLISH_ALIAS: &str = "_publish_alias_";
pub const PUBLISH_VARIABLE: &str = "_publish_variable_";
pub const REQUIRE_VARIABLE: &str = "_require_variable_";
pub const REQUIRE_SOURCE: &str = "_require_source_";

/// Every reserved name, in the order the string-constant pre-pass interns
/// them.
pub const ALL: [&str; 14] = [
    WHERE_FIELD,
    WHERE_OP,
    WHERE_VALUE,
    AGGREGATION_TYPE,
    AGGREGATION_FIELD,
    BY_PATTERN,
    BY_FLAGS,
    RANGE_TO,
    RANGE_WITH,
    RESULT_EXPRESSION,
    PUBLISH_ALIAS,
    PUBLISH_VARIABLE,
    REQUIRE_VARIABLE,
    REQUIRE_SOURCE,
];
