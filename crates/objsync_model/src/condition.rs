//! Composable where-conditions.
//!
//! Conditions are data, not SQL strings. A store evaluates them (see
//! [`WhereCondition::matches_with`]) and `Display` renders an SQL-like form
//! for logs and plans.

use crate::value::{Row, Value};
use std::fmt;

/// A row filter over one object type.
#[derive(Debug, Clone, PartialEq)]
pub enum WhereCondition {
    /// Matches every row.
    All,
    /// `column = value`.
    Eq {
        /// Column name.
        column: String,
        /// Compared value.
        value: Value,
    },
    /// `column IN (values)`.
    In {
        /// Column name.
        column: String,
        /// Accepted values.
        values: Vec<Value>,
    },
    /// `column IN (SELECT select_column FROM object_type WHERE condition)`.
    InSubquery {
        /// Column on the filtered type.
        column: String,
        /// Type the subquery selects from.
        object_type: String,
        /// Column the subquery projects.
        select_column: String,
        /// Subquery filter.
        condition: Box<WhereCondition>,
    },
    /// Path is a strict descendant of `path`.
    PathDescendantOf {
        /// Path column.
        column: String,
        /// Ancestor path.
        path: String,
    },
    /// Conjunction.
    And(Vec<WhereCondition>),
    /// Disjunction.
    Or(Vec<WhereCondition>),
}

impl WhereCondition {
    /// `column = value`.
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Eq {
            column: column.into(),
            value: value.into(),
        }
    }

    /// `column IN (values)`.
    pub fn in_values(column: impl Into<String>, values: Vec<Value>) -> Self {
        Self::In {
            column: column.into(),
            values,
        }
    }

    /// `column IN (SELECT select_column FROM object_type WHERE condition)`.
    pub fn in_subquery(
        column: impl Into<String>,
        object_type: impl Into<String>,
        select_column: impl Into<String>,
        condition: WhereCondition,
    ) -> Self {
        Self::InSubquery {
            column: column.into(),
            object_type: object_type.into(),
            select_column: select_column.into(),
            condition: Box::new(condition),
        }
    }

    /// Strict descendants of `path`.
    pub fn path_descendants_of(column: impl Into<String>, path: impl Into<String>) -> Self {
        Self::PathDescendantOf {
            column: column.into(),
            path: path.into(),
        }
    }

    /// Combines with another condition using AND, flattening nested ANDs.
    pub fn and(self, other: WhereCondition) -> Self {
        match (self, other) {
            (WhereCondition::All, c) | (c, WhereCondition::All) => c,
            (WhereCondition::And(mut a), WhereCondition::And(b)) => {
                a.extend(b);
                WhereCondition::And(a)
            }
            (WhereCondition::And(mut a), c) => {
                a.push(c);
                WhereCondition::And(a)
            }
            (c, WhereCondition::And(mut b)) => {
                b.insert(0, c);
                WhereCondition::And(b)
            }
            (a, b) => WhereCondition::And(vec![a, b]),
        }
    }

    /// Combines with another condition using OR.
    pub fn or(self, other: WhereCondition) -> Self {
        match (self, other) {
            (WhereCondition::Or(mut a), c) => {
                a.push(c);
                WhereCondition::Or(a)
            }
            (a, b) => WhereCondition::Or(vec![a, b]),
        }
    }

    /// Evaluates the condition against a row.
    ///
    /// `subquery` returns the projected values of an inner select; it is
    /// called once per `InSubquery` node reached.
    pub fn matches_with<F>(&self, row: &Row, subquery: &F) -> bool
    where
        F: Fn(&str, &str, &WhereCondition) -> Vec<Value>,
    {
        match self {
            WhereCondition::All => true,
            WhereCondition::Eq { column, value } => {
                !value.is_null() && row.get(column) == Some(value)
            }
            WhereCondition::In { column, values } => row
                .get(column)
                .map(|v| !v.is_null() && values.contains(v))
                .unwrap_or(false),
            WhereCondition::InSubquery {
                column,
                object_type,
                select_column,
                condition,
            } => match row.get(column) {
                Some(v) if !v.is_null() => {
                    subquery(object_type, select_column, condition).contains(v)
                }
                _ => false,
            },
            WhereCondition::PathDescendantOf { column, path } => row
                .get(column)
                .and_then(Value::as_text)
                .map(|candidate| is_strict_descendant(candidate, path))
                .unwrap_or(false),
            WhereCondition::And(parts) => parts.iter().all(|c| c.matches_with(row, subquery)),
            WhereCondition::Or(parts) => parts.iter().any(|c| c.matches_with(row, subquery)),
        }
    }

    /// Object types referenced through subqueries.
    pub fn referenced_types(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_types(&mut out);
        out
    }

    fn collect_types<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            WhereCondition::InSubquery {
                object_type,
                condition,
                ..
            } => {
                out.push(object_type);
                condition.collect_types(out);
            }
            WhereCondition::And(parts) | WhereCondition::Or(parts) => {
                for part in parts {
                    part.collect_types(out);
                }
            }
            _ => {}
        }
    }
}

/// True when `candidate` lies strictly below `ancestor`.
pub fn is_strict_descendant(candidate: &str, ancestor: &str) -> bool {
    let prefix = format!("{}/", ancestor.trim_end_matches('/'));
    candidate != ancestor && candidate.starts_with(&prefix)
}

impl fmt::Display for WhereCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WhereCondition::All => write!(f, "1 = 1"),
            WhereCondition::Eq { column, value } => write!(f, "{column} = {value}"),
            WhereCondition::In { column, values } => {
                let list: Vec<String> = values.iter().map(ToString::to_string).collect();
                write!(f, "{column} IN ({})", list.join(", "))
            }
            WhereCondition::InSubquery {
                column,
                object_type,
                select_column,
                condition,
            } => write!(
                f,
                "{column} IN (SELECT {select_column} FROM [{object_type}] WHERE {condition})"
            ),
            WhereCondition::PathDescendantOf { column, path } => {
                write!(f, "{column} LIKE '{}/%'", path.trim_end_matches('/'))
            }
            WhereCondition::And(parts) => write_joined(f, parts, " AND "),
            WhereCondition::Or(parts) => write_joined(f, parts, " OR "),
        }
    }
}

fn write_joined(f: &mut fmt::Formatter<'_>, parts: &[WhereCondition], sep: &str) -> fmt::Result {
    write!(f, "(")?;
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            f.write_str(sep)?;
        }
        write!(f, "{part}")?;
    }
    write!(f, ")")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, Value)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn no_subquery(_: &str, _: &str, _: &WhereCondition) -> Vec<Value> {
        Vec::new()
    }

    #[test]
    fn strict_descendants() {
        assert!(is_strict_descendant("/a/b", "/a"));
        assert!(is_strict_descendant("/a/b/c", "/a/"));
        assert!(!is_strict_descendant("/a", "/a"));
        assert!(!is_strict_descendant("/ab", "/a"));
        assert!(is_strict_descendant("/x", "/"));
    }

    #[test]
    fn eq_never_matches_null() {
        let r = row(&[("tag_id", Value::Null)]);
        assert!(!WhereCondition::eq("tag_id", Value::Null).matches_with(&r, &no_subquery));
    }

    #[test]
    fn subquery_membership() {
        let r = row(&[("tag_id", Value::Integer(4))]);
        let cond = WhereCondition::in_subquery(
            "tag_id",
            "blog.tag",
            "id",
            WhereCondition::eq("id", 4),
        );
        let hit = |_: &str, _: &str, _: &WhereCondition| vec![Value::Integer(4)];
        assert!(cond.matches_with(&r, &hit));
        assert!(!cond.matches_with(&r, &no_subquery));
        assert_eq!(cond.referenced_types(), vec!["blog.tag"]);
    }

    #[test]
    fn and_flattens() {
        let cond = WhereCondition::All
            .and(WhereCondition::eq("a", 1))
            .and(WhereCondition::eq("b", 2))
            .and(WhereCondition::eq("c", 3));
        match cond {
            WhereCondition::And(parts) => assert_eq!(parts.len(), 3),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn renders_sql_like() {
        let cond = WhereCondition::eq("type", "blog.tag")
            .and(WhereCondition::path_descendants_of("path", "/a"));
        assert_eq!(cond.to_string(), "(type = 'blog.tag' AND path LIKE '/a/%')");
    }

    proptest::proptest! {
        #[test]
        fn child_paths_are_descendants(
            segments in proptest::collection::vec("[a-z]{1,6}", 1..5),
            child in "[a-z]{1,6}",
        ) {
            let parent = format!("/{}", segments.join("/"));
            let nested = format!("{parent}/{child}");
            proptest::prop_assert!(is_strict_descendant(&nested, &parent));
            proptest::prop_assert!(!is_strict_descendant(&parent, &nested));
            proptest::prop_assert!(!is_strict_descendant(&parent, &parent));
        }
    }
}
