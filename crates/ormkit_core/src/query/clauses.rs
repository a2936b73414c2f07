//! Clause pieces shared by the typed builders: table references, joins,
//! AND/OR condition trees, ordering.

use crate::dialect::SqlDialect;
use crate::sql_format;
use crate::{OrmError, ParameterBag, Value};
use std::collections::HashSet;

#[derive(Debug, Clone)]
pub(crate) struct TableRef {
    pub table: String,
    pub alias: Option<String>,
}

impl TableRef {
    pub fn new(table: impl Into<String>, alias: Option<String>) -> Self {
        Self {
            table: table.into(),
            alias,
        }
    }

    pub fn render(&self, dialect: &dyn SqlDialect) -> String {
        match &self.alias {
            Some(alias) => sql_format::format_alias(&self.table, alias),
            None => dialect.quote_identifier(&self.table),
        }
    }

    /// The name this table is visible under in expressions.
    pub fn exposed_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.table)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
    Right,
}

impl JoinKind {
    pub fn keyword(&self) -> &'static str {
        match self {
            JoinKind::Inner => "INNER JOIN",
            JoinKind::Left => "LEFT JOIN",
            JoinKind::Right => "RIGHT JOIN",
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Join {
    pub kind: JoinKind,
    pub table: TableRef,
    /// ON expression with placeholders already resolved into the bag.
    pub on: String,
}

impl Join {
    pub fn render(&self, dialect: &dyn SqlDialect) -> String {
        format!(
            "{} {} ON {}",
            self.kind.keyword(),
            self.table.render(dialect),
            self.on
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conjunction {
    And,
    Or,
}

impl Conjunction {
    fn keyword(&self) -> &'static str {
        match self {
            Conjunction::And => "AND",
            Conjunction::Or => "OR",
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) enum ConditionNode {
    Fragment(String),
    Group(ConditionGroup),
}

#[derive(Debug, Clone)]
pub(crate) struct ConditionEntry {
    pub conjunction: Conjunction,
    pub node: ConditionNode,
}

/// Tree of AND/OR-combined boolean fragments.
#[derive(Debug, Clone, Default)]
pub(crate) struct ConditionGroup {
    pub entries: Vec<ConditionEntry>,
}

impl ConditionGroup {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn push_fragment(&mut self, conjunction: Conjunction, fragment: String) {
        self.entries.push(ConditionEntry {
            conjunction,
            node: ConditionNode::Fragment(fragment),
        });
    }

    pub fn push_group(&mut self, conjunction: Conjunction, group: ConditionGroup) {
        if group.is_empty() {
            return;
        }
        self.entries.push(ConditionEntry {
            conjunction,
            node: ConditionNode::Group(group),
        });
    }

    pub fn render(&self) -> Option<String> {
        if self.is_empty() {
            return None;
        }
        let mut out = String::new();
        for (index, entry) in self.entries.iter().enumerate() {
            if index > 0 {
                out.push(' ');
                out.push_str(entry.conjunction.keyword());
                out.push(' ');
            }
            match &entry.node {
                ConditionNode::Fragment(fragment) => out.push_str(fragment),
                ConditionNode::Group(group) => {
                    if let Some(inner) = group.render() {
                        out.push('(');
                        out.push_str(&inner);
                        out.push(')');
                    }
                }
            }
        }
        Some(out)
    }

    /// All leaf fragments, for alias validation.
    pub fn fragments(&self) -> Vec<&str> {
        let mut out = Vec::new();
        collect_fragments(self, &mut out);
        out
    }
}

fn collect_fragments<'a>(group: &'a ConditionGroup, out: &mut Vec<&'a str>) {
    for entry in &group.entries {
        match &entry.node {
            ConditionNode::Fragment(fragment) => out.push(fragment),
            ConditionNode::Group(inner) => collect_fragments(inner, out),
        }
    }
}

/// Builds a nested condition group against the shared parameter bag.
pub struct GroupBuilder<'b> {
    pub(crate) bag: &'b mut ParameterBag,
    pub(crate) group: ConditionGroup,
}

impl<'b> GroupBuilder<'b> {
    pub(crate) fn new(bag: &'b mut ParameterBag) -> Self {
        Self {
            bag,
            group: ConditionGroup::default(),
        }
    }

    /// Append a fragment with positional `?` markers.
    pub fn condition(
        &mut self,
        conjunction: Conjunction,
        fragment: &str,
        params: Vec<Value>,
    ) -> Result<&mut Self, OrmError> {
        let resolved = self.bag.bind_positional(fragment, params)?;
        self.group.push_fragment(conjunction, resolved);
        Ok(self)
    }

    /// Append a fragment with `:name` markers bound from `params`.
    pub fn condition_named(
        &mut self,
        conjunction: Conjunction,
        fragment: &str,
        params: Vec<(&str, Value)>,
    ) -> &mut Self {
        for (name, value) in params {
            self.bag.add_named(name, value);
        }
        self.group.push_fragment(conjunction, fragment.to_string());
        self
    }

    /// Append a nested group.
    pub fn group(
        &mut self,
        conjunction: Conjunction,
        build: impl FnOnce(&mut GroupBuilder<'_>) -> Result<(), OrmError>,
    ) -> Result<&mut Self, OrmError> {
        let mut nested = GroupBuilder::new(self.bag);
        build(&mut nested)?;
        let group = nested.group;
        self.group.push_group(conjunction, group);
        Ok(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub fn keyword(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct OrderBy {
    pub expr: String,
    pub order: SortOrder,
}

impl OrderBy {
    pub fn render(&self, dialect: &dyn SqlDialect) -> String {
        format!(
            "{} {}",
            dialect.quote_identifier(&self.expr),
            self.order.keyword()
        )
    }
}

/// Validate `alias.column` references in expression fragments against the
/// names introduced by FROM/JOIN/CTE. An unknown prefix is an
/// `UnknownAlias` error at build time.
pub(crate) fn check_alias_references<'a>(
    fragments: impl Iterator<Item = &'a str>,
    known: &HashSet<String>,
) -> Result<(), OrmError> {
    for fragment in fragments {
        for prefix in qualified_prefixes(fragment) {
            if !known.contains(&prefix) {
                return Err(OrmError::UnknownAlias(prefix));
            }
        }
    }
    Ok(())
}

/// Extract the `name` parts of `name.column` references in a fragment,
/// skipping string literals, numeric literals and function-call names.
fn qualified_prefixes(fragment: &str) -> Vec<String> {
    let mut prefixes = Vec::new();
    let chars: Vec<char> = fragment.chars().collect();
    let mut index = 0;
    let mut in_string = false;

    while index < chars.len() {
        let c = chars[index];
        if in_string {
            if c == '\'' {
                if chars.get(index + 1) == Some(&'\'') {
                    index += 1;
                } else {
                    in_string = false;
                }
            }
            index += 1;
            continue;
        }
        if c == '\'' {
            in_string = true;
            index += 1;
            continue;
        }
        if c.is_ascii_alphabetic() || c == '_' {
            let start = index;
            while index < chars.len()
                && (chars[index].is_ascii_alphanumeric() || chars[index] == '_')
            {
                index += 1;
            }
            // Identifier followed by a dot and another identifier is a
            // qualified reference.
            if chars.get(index) == Some(&'.')
                && chars
                    .get(index + 1)
                    .is_some_and(|n| n.is_ascii_alphabetic() || *n == '_' || *n == '*')
            {
                prefixes.push(chars[start..index].iter().collect());
            }
            continue;
        }
        if c.is_ascii_digit() {
            // Skip numeric literals, including decimals.
            while index < chars.len()
                && (chars[index].is_ascii_alphanumeric() || chars[index] == '.')
            {
                index += 1;
            }
            continue;
        }
        index += 1;
    }

    prefixes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn condition_group_renders_mixed_connectors() {
        let mut group = ConditionGroup::default();
        group.push_fragment(Conjunction::And, "a = 1".to_string());
        group.push_fragment(Conjunction::And, "b = 2".to_string());
        group.push_fragment(Conjunction::Or, "c = 3".to_string());

        assert_eq!(group.render().unwrap(), "a = 1 AND b = 2 OR c = 3");
    }

    #[test]
    fn nested_groups_render_in_parens() {
        let mut inner = ConditionGroup::default();
        inner.push_fragment(Conjunction::And, "x = 1".to_string());
        inner.push_fragment(Conjunction::Or, "y = 2".to_string());

        let mut root = ConditionGroup::default();
        root.push_fragment(Conjunction::And, "a = 0".to_string());
        root.push_group(Conjunction::And, inner);

        assert_eq!(root.render().unwrap(), "a = 0 AND (x = 1 OR y = 2)");
    }

    #[test]
    fn qualified_prefixes_skip_literals_and_strings() {
        assert_eq!(qualified_prefixes("u.id = 1"), vec!["u".to_string()]);
        assert_eq!(qualified_prefixes("price > 1.5"), Vec::<String>::new());
        assert_eq!(
            qualified_prefixes("name = 'a.b' AND t.col = 2"),
            vec!["t".to_string()]
        );
    }

    #[test]
    fn unknown_alias_is_rejected() {
        let known: HashSet<String> = ["u".to_string()].into_iter().collect();
        assert!(check_alias_references(["u.id = 1"].into_iter(), &known).is_ok());

        let err = check_alias_references(["x.id = 1"].into_iter(), &known).unwrap_err();
        assert!(matches!(err, OrmError::UnknownAlias(a) if a == "x"));
    }
}
