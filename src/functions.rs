//! HogQL function catalog.
//!
//! Maps every HogQL function name to its ClickHouse spelling, arity and known
//! signatures. Aggregate functions are kept in a separate table; combinator
//! suffixes (`If`, `State`, `Merge`, `OrNull`) are recognized on top of it.

use std::sync::LazyLock;

use indexmap::IndexMap;

use crate::ast::{ConstantDataType, ConstantType};

/// Argument or return kind in a signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Any,
    Int,
    Float,
    Numeric,
    Str,
    Bool,
    Date,
    DateTime,
    Interval,
    Uuid,
    Array
}

impl Kind {
    fn matches(self, ty: &ConstantDataType) -> bool {
        use ConstantDataType as D;
        match (self, ty) {
            (Self::Any, _) | (_, D::Unknown) => true,
            (Self::Int, D::Integer) | (Self::Float, D::Float | D::Decimal) => true,
            (Self::Numeric, D::Integer | D::Float | D::Decimal) => true,
            (Self::Str, D::String) | (Self::Bool, D::Boolean) => true,
            (Self::Date, D::Date) | (Self::DateTime, D::DateTime) => true,
            (Self::Interval, D::Interval) | (Self::Uuid, D::Uuid) => true,
            (Self::Array, D::Array(_)) => true,
            _ => false
        }
    }

    fn data_type(self) -> ConstantDataType {
        match self {
            Self::Any | Self::Array => ConstantDataType::Unknown,
            Self::Int => ConstantDataType::Integer,
            Self::Float | Self::Numeric => ConstantDataType::Float,
            Self::Str => ConstantDataType::String,
            Self::Bool => ConstantDataType::Boolean,
            Self::Date => ConstantDataType::Date,
            Self::DateTime => ConstantDataType::DateTime,
            Self::Interval => ConstantDataType::Interval,
            Self::Uuid => ConstantDataType::Uuid
        }
    }
}

pub type Signature = (&'static [Kind], Kind);

#[derive(Debug, Clone)]
pub struct FunctionMeta {
    pub clickhouse_name: &'static str,
    pub min_args:        usize,
    /// `None` for variadic functions
    pub max_args:        Option<usize>,
    pub min_params:      usize,
    pub max_params:      usize,
    pub aggregate:       bool,
    pub signatures:      &'static [Signature],
    /// String constants appended to the arguments when printing
    pub suffix_args:     &'static [&'static str]
}

impl FunctionMeta {
    const fn new(clickhouse_name: &'static str, min_args: usize, max_args: Option<usize>) -> Self {
        Self {
            clickhouse_name,
            min_args,
            max_args,
            min_params: 0,
            max_params: 0,
            aggregate: false,
            signatures: &[],
            suffix_args: &[]
        }
    }

    const fn suffix(mut self, suffix_args: &'static [&'static str]) -> Self {
        self.suffix_args = suffix_args;
        self
    }

    const fn sig(mut self, signatures: &'static [Signature]) -> Self {
        self.signatures = signatures;
        self
    }

    const fn agg(mut self) -> Self {
        self.aggregate = true;
        self
    }

    const fn params(mut self, min: usize, max: usize) -> Self {
        self.min_params = min;
        self.max_params = max;
        self
    }

    /// Return type for the given argument types, `None` if no signature fits.
    pub fn return_type(&self, args: &[ConstantType]) -> Option<ConstantType> {
        self.signatures.iter().find_map(|(pattern, ret)| {
            let fits = pattern.len() == args.len()
                && pattern.iter().zip(args).all(|(kind, arg)| kind.matches(&arg.data_type));
            fits.then(|| {
                ConstantType::new(ret.data_type()).with_nullable(args.iter().any(|a| a.nullable))
            })
        })
    }
}

use Kind::{Any, Bool, Date, DateTime, Float, Int, Interval, Numeric, Str};

const ARITHMETIC: &[Signature] = &[
    (&[Int, Int], Int),
    (&[Numeric, Numeric], Float),
    (&[DateTime, Interval], DateTime),
    (&[Date, Interval], Date),
    (&[DateTime, Any], DateTime)
];
const COMPARISON: &[Signature] = &[(&[Any, Any], Bool)];
const STRING_TO_STRING: &[Signature] = &[(&[Str], Str)];
const TO_DATETIME: &[Signature] = &[(&[Any], DateTime), (&[Any, Str], DateTime)];
const TO_DATE: &[Signature] = &[(&[Any], Date), (&[Any, Str], Date)];
const TO_INTERVAL: &[Signature] = &[(&[Any], Interval)];
const TO_INT: &[Signature] = &[(&[Any], Int)];
const TO_FLOAT: &[Signature] = &[(&[Any], Float)];
const TO_STRING: &[Signature] = &[(&[Any], Str)];
const TO_BOOL: &[Signature] = &[(&[Any], Bool)];
const NOW: &[Signature] = &[(&[], DateTime), (&[Str], DateTime)];
const TODAY: &[Signature] = &[(&[], Date)];
const LENGTH: &[Signature] = &[(&[Any], Int)];
const COUNT: &[Signature] = &[(&[], Int), (&[Any], Int)];
const DATE_DIFF: &[Signature] = &[(&[Str, Any, Any], Int)];

static FUNCTIONS: LazyLock<IndexMap<&'static str, FunctionMeta>> = LazyLock::new(|| {
    let f = FunctionMeta::new;
    IndexMap::from_iter([
        // arithmetic
        ("plus", f("plus", 2, Some(2)).sig(ARITHMETIC)),
        ("minus", f("minus", 2, Some(2)).sig(ARITHMETIC)),
        ("multiply", f("multiply", 2, Some(2)).sig(ARITHMETIC)),
        ("divide", f("divide", 2, Some(2)).sig(&[(&[Numeric, Numeric], Float)])),
        ("intDiv", f("intDiv", 2, Some(2)).sig(&[(&[Numeric, Numeric], Int)])),
        ("modulo", f("modulo", 2, Some(2)).sig(ARITHMETIC)),
        ("negate", f("negate", 1, Some(1))),
        ("abs", f("abs", 1, Some(1))),
        ("round", f("round", 1, Some(2))),
        ("floor", f("floor", 1, Some(2))),
        ("ceil", f("ceil", 1, Some(2))),
        ("sqrt", f("sqrt", 1, Some(1)).sig(&[(&[Numeric], Float)])),
        ("pow", f("pow", 2, Some(2)).sig(&[(&[Numeric, Numeric], Float)])),
        ("greatest", f("greatest", 2, None)),
        ("least", f("least", 2, None)),
        // comparison
        ("equals", f("equals", 2, Some(2)).sig(COMPARISON)),
        ("notEquals", f("notEquals", 2, Some(2)).sig(COMPARISON)),
        ("less", f("less", 2, Some(2)).sig(COMPARISON)),
        ("greater", f("greater", 2, Some(2)).sig(COMPARISON)),
        ("lessOrEquals", f("lessOrEquals", 2, Some(2)).sig(COMPARISON)),
        ("greaterOrEquals", f("greaterOrEquals", 2, Some(2)).sig(COMPARISON)),
        ("like", f("like", 2, Some(2)).sig(COMPARISON)),
        ("ilike", f("ilike", 2, Some(2)).sig(COMPARISON)),
        ("notLike", f("notLike", 2, Some(2)).sig(COMPARISON)),
        ("notILike", f("notILike", 2, Some(2)).sig(COMPARISON)),
        ("in", f("in", 2, Some(2)).sig(COMPARISON)),
        ("notIn", f("notIn", 2, Some(2)).sig(COMPARISON)),
        ("match", f("match", 2, Some(2)).sig(COMPARISON)),
        // logic
        ("and", f("and", 2, None)),
        ("or", f("or", 2, None)),
        ("not", f("not", 1, Some(1)).sig(&[(&[Any], Bool)])),
        ("xor", f("xor", 2, None)),
        ("if", f("if", 3, Some(3))),
        ("multiIf", f("multiIf", 3, None)),
        ("transform", f("transform", 3, Some(4))),
        // nulls
        ("isNull", f("isNull", 1, Some(1)).sig(&[(&[Any], Bool)])),
        ("isNotNull", f("isNotNull", 1, Some(1)).sig(&[(&[Any], Bool)])),
        ("ifNull", f("ifNull", 2, Some(2))),
        ("coalesce", f("coalesce", 1, None)),
        ("nullIf", f("nullIf", 2, Some(2))),
        ("assumeNotNull", f("assumeNotNull", 1, Some(1))),
        ("toNullable", f("toNullable", 1, Some(1))),
        // conversions
        ("toInt", f("accurateCastOrNull", 1, Some(1)).sig(TO_INT).suffix(&["Int64"])),
        ("toFloat", f("accurateCastOrNull", 1, Some(1)).sig(TO_FLOAT).suffix(&["Float64"])),
        ("toString", f("toString", 1, Some(1)).sig(TO_STRING)),
        ("toBool", f("toBool", 1, Some(1)).sig(TO_BOOL)),
        ("toUUID", f("toUUIDOrNull", 1, Some(1)).sig(&[(&[Any], Kind::Uuid)])),
        ("toDate", f("toDate", 1, Some(2)).sig(TO_DATE)),
        ("toDateTime", f("toDateTime", 1, Some(2)).sig(TO_DATETIME)),
        ("toDateTime64", f("toDateTime64", 1, Some(3)).sig(&[(&[Any, Int], DateTime), (&[Any, Int, Str], DateTime)])),
        ("toDecimal", f("toDecimal64OrNull", 2, Some(2))),
        ("toTypeName", f("toTypeName", 1, Some(1)).sig(TO_STRING)),
        ("parseDateTimeBestEffort", f("parseDateTime64BestEffortOrNull", 1, Some(2)).sig(TO_DATETIME)),
        ("parseDateTime64BestEffortOrNull", f("parseDateTime64BestEffortOrNull", 1, Some(3)).sig(TO_DATETIME)),
        // strings
        ("length", f("length", 1, Some(1)).sig(LENGTH)),
        ("empty", f("empty", 1, Some(1)).sig(TO_BOOL)),
        ("notEmpty", f("notEmpty", 1, Some(1)).sig(TO_BOOL)),
        ("lower", f("lower", 1, Some(1)).sig(STRING_TO_STRING)),
        ("upper", f("upper", 1, Some(1)).sig(STRING_TO_STRING)),
        ("trim", f("trimBoth", 1, Some(1)).sig(STRING_TO_STRING)),
        ("concat", f("concat", 2, None).sig(&[(&[Any, Any], Str), (&[Any, Any, Any], Str)])),
        ("substring", f("substring", 2, Some(3)).sig(&[(&[Str, Int], Str), (&[Str, Int, Int], Str)])),
        ("replaceAll", f("replaceAll", 3, Some(3)).sig(&[(&[Str, Str, Str], Str)])),
        ("replaceRegexpAll", f("replaceRegexpAll", 3, Some(3)).sig(&[(&[Str, Str, Str], Str)])),
        ("splitByChar", f("splitByChar", 2, Some(3))),
        ("splitByString", f("splitByString", 2, Some(3))),
        ("extract", f("extract", 2, Some(2)).sig(&[(&[Str, Str], Str)])),
        ("startsWith", f("startsWith", 2, Some(2)).sig(&[(&[Str, Str], Bool)])),
        ("endsWith", f("endsWith", 2, Some(2)).sig(&[(&[Str, Str], Bool)])),
        ("position", f("position", 2, Some(3)).sig(&[(&[Str, Str], Int)])),
        ("JSONExtractRaw", f("JSONExtractRaw", 1, None).sig(&[(&[Str, Str], Str)])),
        ("JSONExtractString", f("JSONExtractString", 1, None).sig(&[(&[Str, Str], Str)])),
        ("JSONExtractInt", f("JSONExtractInt", 1, None).sig(&[(&[Str, Str], Int)])),
        ("JSONExtractFloat", f("JSONExtractFloat", 1, None).sig(&[(&[Str, Str], Float)])),
        ("JSONExtractBool", f("JSONExtractBool", 1, None).sig(&[(&[Str, Str], Bool)])),
        ("JSONHas", f("JSONHas", 1, None)),
        // dates
        ("now", f("now64", 0, Some(1)).sig(NOW)),
        ("today", f("today", 0, Some(0)).sig(TODAY)),
        ("yesterday", f("yesterday", 0, Some(0)).sig(TODAY)),
        ("toTimeZone", f("toTimeZone", 2, Some(2)).sig(&[(&[Any, Str], DateTime)])),
        ("toStartOfMinute", f("toStartOfMinute", 1, Some(2)).sig(TO_DATETIME)),
        ("toStartOfFiveMinutes", f("toStartOfFiveMinutes", 1, Some(2)).sig(TO_DATETIME)),
        ("toStartOfHour", f("toStartOfHour", 1, Some(2)).sig(TO_DATETIME)),
        ("toStartOfDay", f("toStartOfDay", 1, Some(2)).sig(TO_DATETIME)),
        ("toStartOfWeek", f("toStartOfWeek", 1, Some(3)).sig(TO_DATE)),
        ("toStartOfMonth", f("toStartOfMonth", 1, Some(2)).sig(TO_DATE)),
        ("toStartOfYear", f("toStartOfYear", 1, Some(2)).sig(TO_DATE)),
        ("toStartOfInterval", f("toStartOfInterval", 2, Some(3)).sig(&[(&[Any, Interval], DateTime)])),
        ("toYear", f("toYear", 1, Some(2)).sig(TO_INT)),
        ("toMonth", f("toMonth", 1, Some(2)).sig(TO_INT)),
        ("toDayOfWeek", f("toDayOfWeek", 1, Some(3)).sig(TO_INT)),
        ("toHour", f("toHour", 1, Some(2)).sig(TO_INT)),
        ("toUnixTimestamp", f("toUnixTimestamp", 1, Some(2)).sig(TO_INT)),
        ("dateDiff", f("dateDiff", 3, Some(4)).sig(DATE_DIFF)),
        ("dateAdd", f("dateAdd", 3, Some(3))),
        ("dateSub", f("dateSub", 3, Some(3))),
        ("formatDateTime", f("formatDateTime", 2, Some(3)).sig(&[(&[Any, Str], Str)])),
        ("toIntervalSecond", f("toIntervalSecond", 1, Some(1)).sig(TO_INTERVAL)),
        ("toIntervalMinute", f("toIntervalMinute", 1, Some(1)).sig(TO_INTERVAL)),
        ("toIntervalHour", f("toIntervalHour", 1, Some(1)).sig(TO_INTERVAL)),
        ("toIntervalDay", f("toIntervalDay", 1, Some(1)).sig(TO_INTERVAL)),
        ("toIntervalWeek", f("toIntervalWeek", 1, Some(1)).sig(TO_INTERVAL)),
        ("toIntervalMonth", f("toIntervalMonth", 1, Some(1)).sig(TO_INTERVAL)),
        ("toIntervalQuarter", f("toIntervalQuarter", 1, Some(1)).sig(TO_INTERVAL)),
        ("toIntervalYear", f("toIntervalYear", 1, Some(1)).sig(TO_INTERVAL)),
        // arrays and tuples
        ("array", f("array", 0, None)),
        ("tuple", f("tuple", 0, None)),
        ("range", f("range", 1, Some(3))),
        ("arrayJoin", f("arrayJoin", 1, Some(1))),
        ("has", f("has", 2, Some(2)).sig(COMPARISON)),
        ("hasAny", f("hasAny", 2, Some(2)).sig(COMPARISON)),
        ("hasAll", f("hasAll", 2, Some(2)).sig(COMPARISON)),
        ("indexOf", f("indexOf", 2, Some(2)).sig(&[(&[Any, Any], Int)])),
        ("arrayElement", f("arrayElement", 2, Some(2))),
        ("tupleElement", f("tupleElement", 2, Some(3))),
        ("arrayMap", f("arrayMap", 2, None)),
        ("arrayFilter", f("arrayFilter", 2, None)),
        ("arrayExists", f("arrayExists", 1, None)),
        ("arrayStringConcat", f("arrayStringConcat", 1, Some(2)).sig(&[(&[Any], Str), (&[Any, Str], Str)])),
        ("mapContains", f("mapContains", 2, Some(2))),
        // hashing and misc
        ("cityHash64", f("cityHash64", 1, None).sig(&[(&[Any], Int)])),
        ("sipHash64", f("sipHash64", 1, None).sig(&[(&[Any], Int)])),
        ("generateUUIDv4", f("generateUUIDv4", 0, Some(0)).sig(&[(&[], Kind::Uuid)])),
        ("rand", f("rand", 0, Some(1)).sig(&[(&[], Int)])),
        // window functions
        ("row_number", f("row_number", 0, Some(0)).sig(&[(&[], Int)])),
        ("rank", f("rank", 0, Some(0)).sig(&[(&[], Int)])),
        ("dense_rank", f("dense_rank", 0, Some(0)).sig(&[(&[], Int)])),
        ("lag", f("lagInFrame", 1, Some(3))),
        ("lead", f("leadInFrame", 1, Some(3))),
        ("lagInFrame", f("lagInFrame", 1, Some(3))),
        ("leadInFrame", f("leadInFrame", 1, Some(3))),
        ("first_value", f("first_value", 1, Some(1))),
        ("last_value", f("last_value", 1, Some(1))),
        ("nth_value", f("nth_value", 2, Some(2)))
    ])
});

static AGGREGATIONS: LazyLock<IndexMap<&'static str, FunctionMeta>> = LazyLock::new(|| {
    let f = FunctionMeta::new;
    IndexMap::from_iter([
        ("count", f("count", 0, Some(1)).agg().sig(COUNT)),
        ("countIf", f("countIf", 1, Some(2)).agg().sig(&[(&[Any], Int), (&[Any, Any], Int)])),
        ("countDistinct", f("uniqExact", 1, Some(1)).agg().sig(&[(&[Any], Int)])),
        ("sum", f("sum", 1, Some(1)).agg().sig(&[(&[Int], Int), (&[Numeric], Float)])),
        ("sumIf", f("sumIf", 2, Some(2)).agg()),
        ("avg", f("avg", 1, Some(1)).agg().sig(&[(&[Numeric], Float)])),
        ("avgIf", f("avgIf", 2, Some(2)).agg()),
        ("min", f("min", 1, Some(1)).agg()),
        ("max", f("max", 1, Some(1)).agg()),
        ("minIf", f("minIf", 2, Some(2)).agg()),
        ("maxIf", f("maxIf", 2, Some(2)).agg()),
        ("any", f("any", 1, Some(1)).agg()),
        ("anyLast", f("anyLast", 1, Some(1)).agg()),
        ("argMax", f("argMax", 2, Some(2)).agg()),
        ("argMin", f("argMin", 2, Some(2)).agg()),
        ("uniq", f("uniq", 1, None).agg().sig(&[(&[Any], Int)])),
        ("uniqIf", f("uniqIf", 2, None).agg()),
        ("uniqExact", f("uniqExact", 1, None).agg().sig(&[(&[Any], Int)])),
        ("groupArray", f("groupArray", 1, Some(1)).agg()),
        ("groupUniqArray", f("groupUniqArray", 1, Some(1)).agg()),
        ("median", f("median", 1, Some(1)).agg()),
        ("quantile", f("quantile", 1, Some(1)).agg().params(1, 1)),
        ("quantiles", f("quantiles", 1, Some(1)).agg().params(1, 10)),
        ("topK", f("topK", 1, Some(1)).agg().params(1, 1)),
        ("stddevPop", f("stddevPop", 1, Some(1)).agg()),
        ("varPop", f("varPop", 1, Some(1)).agg())
    ])
});

/// Aggregates with a `State`/`Merge` pair used for two-phase aggregation.
pub const STATE_AGGREGATES: &[&str] = &[
    "count", "countIf", "sum", "sumIf", "avg", "avgIf", "min", "max", "uniq", "uniqIf",
    "uniqExact", "any", "argMax", "argMin"
];

/// Combinator suffixes accepted on aggregate names.
const COMBINATORS: &[&str] = &["State", "Merge", "OrNull", "If"];

pub fn find_function(name: &str) -> Option<&'static FunctionMeta> {
    FUNCTIONS.get(name)
}

/// Aggregate by name, including combinator forms like `sumState`.
pub fn find_aggregation(name: &str) -> Option<FunctionMeta> {
    if let Some(meta) = AGGREGATIONS.get(name) {
        return Some(meta.clone());
    }
    for suffix in COMBINATORS {
        if let Some(base) = name.strip_suffix(suffix)
            && let Some(meta) = find_aggregation(base)
        {
            let mut meta = meta;
            meta.signatures = &[];
            if *suffix == "If" {
                meta.min_args += 1;
                meta.max_args = meta.max_args.map(|m| m + 1);
            }
            if *suffix == "Merge" || *suffix == "State" {
                meta.min_args = meta.min_args.min(1);
            }
            meta.clickhouse_name = "";
            return Some(meta);
        }
    }
    None
}

pub fn is_aggregation(name: &str) -> bool {
    find_aggregation(name).is_some()
}

/// Whether calls to `name` produce NULL for inputs they can not handle.
pub fn forces_nullable(name: &str) -> bool {
    name.ends_with("OrNull") || name == "nullIf"
}

/// ClickHouse name for a HogQL function or aggregate; combinator forms keep
/// their HogQL spelling.
pub fn clickhouse_name(name: &str) -> Option<&'static str> {
    if let Some(meta) = find_function(name) {
        return Some(meta.clickhouse_name);
    }
    AGGREGATIONS.get(name).map(|meta| meta.clickhouse_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_matching() {
        let lower = find_function("lower").expect("lower");
        let ret = lower.return_type(&[ConstantType::new(ConstantDataType::String)]);
        assert_eq!(ret, Some(ConstantType::new(ConstantDataType::String)));
        let ret = lower.return_type(&[ConstantType::new(ConstantDataType::Integer)]);
        assert_eq!(ret, None);
    }

    #[test]
    fn test_combinators() {
        assert!(is_aggregation("count"));
        assert!(is_aggregation("countState"));
        assert!(is_aggregation("uniqMerge"));
        assert!(is_aggregation("sumIfOrNull"));
        assert!(!is_aggregation("lower"));
        assert_eq!(find_aggregation("countIf").map(|m| m.min_args), Some(1));
    }

    #[test]
    fn test_forces_nullable() {
        assert!(forces_nullable("toUUIDOrNull"));
        assert!(forces_nullable("nullIf"));
        assert!(!forces_nullable("lower"));
    }
}
