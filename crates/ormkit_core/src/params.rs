use crate::driver::Statement;
use crate::{OrmError, ParamType, Value};
use indexmap::IndexMap;

/// A typed parameter binding.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundParam {
    pub value: Value,
    pub param_type: ParamType,
}

/// Accumulates typed query parameters and assigns placeholder names.
///
/// Auto-assigned placeholders follow `:param<n>` with a monotone counter.
/// The bag is append-only except for named overwrites (last write wins) and
/// `clear`, and iterates in insertion order when binding.
#[derive(Debug, Clone, Default)]
pub struct ParameterBag {
    entries: IndexMap<String, BoundParam>,
    counter: usize,
}

impl ParameterBag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a value with an auto-assigned placeholder; type detected from the
    /// value. Returns the placeholder including the leading colon.
    pub fn add(&mut self, value: Value) -> String {
        let param_type = ParamType::detect(&value);
        self.add_typed(value, param_type)
    }

    /// Add a value with an auto-assigned placeholder and an explicit type.
    pub fn add_typed(&mut self, value: Value, param_type: ParamType) -> String {
        self.counter += 1;
        let name = format!("param{}", self.counter);
        self.entries.insert(name.clone(), BoundParam { value, param_type });
        format!(":{}", name)
    }

    /// Add a value under a caller-chosen placeholder; a prior binding with
    /// the same name is replaced in place.
    pub fn add_named(&mut self, name: &str, value: Value) -> String {
        let param_type = ParamType::detect(&value);
        self.add_named_typed(name, value, param_type)
    }

    pub fn add_named_typed(&mut self, name: &str, value: Value, param_type: ParamType) -> String {
        let key = name.trim_start_matches(':').to_string();
        self.entries.insert(key.clone(), BoundParam { value, param_type });
        format!(":{}", key)
    }

    /// Combine with another bag into a new one.
    ///
    /// On name collision the right-hand side wins. Auto-assigned placeholders
    /// of the right-hand side are renumbered past this bag's counter so the
    /// two numbering sequences cannot collide.
    pub fn merge(&self, other: &ParameterBag) -> ParameterBag {
        let mut merged = self.clone();
        merged.absorb(other);
        merged
    }

    /// Fold another bag into this one, renumbering the other bag's
    /// auto-assigned placeholders. Returns the renames applied as
    /// `(old, new)` pairs including the leading colon, so callers can
    /// rewrite SQL that referenced the old names.
    pub fn absorb(&mut self, other: &ParameterBag) -> Vec<(String, String)> {
        let mut renames = Vec::new();
        for (name, param) in &other.entries {
            if is_auto_name(name) {
                let placeholder = self.add_typed(param.value.clone(), param.param_type);
                renames.push((format!(":{}", name), placeholder));
            } else {
                self.entries.insert(name.clone(), param.clone());
            }
        }
        renames
    }

    /// Bind every parameter onto a prepared statement in insertion order.
    pub fn bind(&self, statement: &mut dyn Statement) -> Result<(), OrmError> {
        for (name, param) in &self.entries {
            statement.bind_value(
                &format!(":{}", name),
                param.value.clone(),
                param.param_type,
            )?;
        }
        Ok(())
    }

    /// Reset counter and contents.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.counter = 0;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up a binding by placeholder name (with or without colon).
    pub fn get(&self, name: &str) -> Option<&BoundParam> {
        self.entries.get(name.trim_start_matches(':'))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &BoundParam)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Snapshot of bindings for error payloads.
    pub fn to_vec(&self) -> Vec<(String, Value)> {
        self.entries
            .iter()
            .map(|(k, v)| (k.clone(), v.value.clone()))
            .collect()
    }

    /// Rewrite positional `?` markers in a fragment into auto-assigned
    /// placeholders bound to `params`, in order. Marker and parameter counts
    /// must match.
    pub fn bind_positional(
        &mut self,
        fragment: &str,
        params: Vec<Value>,
    ) -> Result<String, OrmError> {
        let mut out = String::with_capacity(fragment.len());
        let mut remaining = params.into_iter();
        let mut in_string = false;
        let mut chars = fragment.chars().peekable();

        while let Some(c) = chars.next() {
            if in_string {
                out.push(c);
                if c == '\'' {
                    if chars.peek() == Some(&'\'') {
                        out.push(chars.next().unwrap());
                    } else {
                        in_string = false;
                    }
                }
                continue;
            }
            match c {
                '\'' => {
                    in_string = true;
                    out.push(c);
                }
                '?' => match remaining.next() {
                    Some(value) => out.push_str(&self.add(value)),
                    None => {
                        return Err(OrmError::UnboundParameter(format!(
                            "positional marker without a value in fragment: {}",
                            fragment
                        )));
                    }
                },
                _ => out.push(c),
            }
        }

        if remaining.next().is_some() {
            return Err(OrmError::UnboundParameter(format!(
                "more values than positional markers in fragment: {}",
                fragment
            )));
        }

        Ok(out)
    }

    /// Verify every binding appears in the SQL; a binding without a matching
    /// placeholder is an `UnboundParameter` error.
    pub fn verify_against(&self, sql: &str) -> Result<(), OrmError> {
        let present = collect_placeholders(sql);
        for (name, _) in &self.entries {
            if !present.iter().any(|p| p == name) {
                return Err(OrmError::UnboundParameter(format!(":{}", name)));
            }
        }
        Ok(())
    }
}

fn is_auto_name(name: &str) -> bool {
    name.strip_prefix("param")
        .is_some_and(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()))
}

/// Collect `:name` placeholders from a SQL string, skipping string literals
/// and comments.
pub fn collect_placeholders(sql: &str) -> Vec<String> {
    #[derive(PartialEq)]
    enum State {
        Normal,
        SingleQuote,
        LineComment,
        BlockComment,
    }

    let mut placeholders = Vec::new();
    let mut state = State::Normal;
    let chars: Vec<char> = sql.chars().collect();
    let mut index = 0;

    while index < chars.len() {
        let current = chars[index];
        let next = chars.get(index + 1).copied();

        match state {
            State::Normal => {
                if current == '-' && next == Some('-') {
                    state = State::LineComment;
                    index += 2;
                    continue;
                }
                if current == '/' && next == Some('*') {
                    state = State::BlockComment;
                    index += 2;
                    continue;
                }
                if current == '\'' {
                    state = State::SingleQuote;
                    index += 1;
                    continue;
                }
                if current == ':' {
                    let mut end = index + 1;
                    while end < chars.len()
                        && (chars[end].is_ascii_alphanumeric() || chars[end] == '_')
                    {
                        end += 1;
                    }
                    if end > index + 1 {
                        placeholders.push(chars[index + 1..end].iter().collect());
                        index = end;
                        continue;
                    }
                }
                index += 1;
            }
            State::SingleQuote => {
                if current == '\'' {
                    if next == Some('\'') {
                        index += 2;
                        continue;
                    }
                    state = State::Normal;
                }
                index += 1;
            }
            State::LineComment => {
                if current == '\n' {
                    state = State::Normal;
                }
                index += 1;
            }
            State::BlockComment => {
                if current == '*' && next == Some('/') {
                    state = State::Normal;
                    index += 2;
                } else {
                    index += 1;
                }
            }
        }
    }

    placeholders
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_placeholders_are_monotone() {
        let mut bag = ParameterBag::new();
        assert_eq!(bag.add(Value::Int(1)), ":param1");
        assert_eq!(bag.add(Value::Text("a".into())), ":param2");
        assert_eq!(bag.len(), 2);
    }

    #[test]
    fn named_overwrite_is_last_write_wins() {
        let mut bag = ParameterBag::new();
        bag.add_named("id", Value::Int(1));
        bag.add_named(":id", Value::Int(2));
        assert_eq!(bag.len(), 1);
        assert_eq!(bag.get("id").unwrap().value, Value::Int(2));
    }

    #[test]
    fn merge_renumbers_right_hand_auto_params() {
        let mut left = ParameterBag::new();
        left.add(Value::Int(1));
        left.add(Value::Int(2));

        let mut right = ParameterBag::new();
        right.add(Value::Int(3));
        right.add_named("name", Value::Text("x".into()));

        let merged = left.merge(&right);
        assert_eq!(merged.len(), 4);
        assert!(merged.get("param3").is_some());
        assert_eq!(merged.get("param3").unwrap().value, Value::Int(3));
        assert_eq!(merged.get("name").unwrap().value, Value::Text("x".into()));
    }

    #[test]
    fn merge_with_empty_is_identity() {
        let mut bag = ParameterBag::new();
        bag.add(Value::Int(7));
        bag.add_named("k", Value::Bool(true));

        let empty = ParameterBag::new();
        let left = bag.merge(&empty);
        let right = empty.merge(&bag);

        assert_eq!(left.to_vec(), bag.to_vec());
        assert_eq!(right.to_vec(), bag.to_vec());
    }

    #[test]
    fn name_collision_right_side_wins() {
        let mut left = ParameterBag::new();
        left.add_named("k", Value::Int(1));
        let mut right = ParameterBag::new();
        right.add_named("k", Value::Int(2));

        let merged = left.merge(&right);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged.get("k").unwrap().value, Value::Int(2));
    }

    #[test]
    fn positional_markers_rewrite_in_order() {
        let mut bag = ParameterBag::new();
        let sql = bag
            .bind_positional("a = ? AND b = ?", vec![Value::Int(1), Value::Int(2)])
            .unwrap();
        assert_eq!(sql, "a = :param1 AND b = :param2");
    }

    #[test]
    fn positional_marker_count_mismatch_fails() {
        let mut bag = ParameterBag::new();
        let err = bag.bind_positional("a = ?", vec![]).unwrap_err();
        assert!(matches!(err, OrmError::UnboundParameter(_)));

        let err = bag
            .bind_positional("a = ?", vec![Value::Int(1), Value::Int(2)])
            .unwrap_err();
        assert!(matches!(err, OrmError::UnboundParameter(_)));
    }

    #[test]
    fn question_mark_inside_string_is_preserved() {
        let mut bag = ParameterBag::new();
        let sql = bag
            .bind_positional("a = '?' AND b = ?", vec![Value::Int(1)])
            .unwrap();
        assert_eq!(sql, "a = '?' AND b = :param1");
    }

    #[test]
    fn collects_placeholders_outside_literals() {
        let found = collect_placeholders("SELECT :a FROM t WHERE x = ':no' AND y = :b -- :c");
        assert_eq!(found, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn verify_against_rejects_missing_placeholder() {
        let mut bag = ParameterBag::new();
        bag.add_named("present", Value::Int(1));
        bag.add_named("absent", Value::Int(2));

        let err = bag
            .verify_against("SELECT * FROM t WHERE id = :present")
            .unwrap_err();
        assert!(matches!(err, OrmError::UnboundParameter(p) if p == ":absent"));
    }

    #[test]
    fn bind_visits_parameters_in_insertion_order() {
        use crate::driver::{RowSet, Statement};

        #[derive(Default)]
        struct RecordingStatement {
            bound: Vec<(String, Value, ParamType)>,
        }

        impl Statement for RecordingStatement {
            fn bind_value(
                &mut self,
                placeholder: &str,
                value: Value,
                param_type: ParamType,
            ) -> Result<(), OrmError> {
                self.bound.push((placeholder.to_string(), value, param_type));
                Ok(())
            }

            fn exec(&mut self) -> Result<u64, OrmError> {
                Ok(0)
            }

            fn query(&mut self) -> Result<RowSet, OrmError> {
                Ok(RowSet::empty())
            }
        }

        let mut bag = ParameterBag::new();
        bag.add_named("b", Value::Int(2));
        bag.add(Value::Int(1));
        bag.add_typed(Value::Bytes(vec![0xff]), ParamType::Lob);

        let mut statement = RecordingStatement::default();
        bag.bind(&mut statement).unwrap();

        let names: Vec<&str> = statement.bound.iter().map(|(n, _, _)| n.as_str()).collect();
        assert_eq!(names, vec![":b", ":param1", ":param2"]);
        assert_eq!(statement.bound[2].2, ParamType::Lob);
    }

    #[test]
    fn clear_resets_counter() {
        let mut bag = ParameterBag::new();
        bag.add(Value::Int(1));
        bag.clear();
        assert!(bag.is_empty());
        assert_eq!(bag.add(Value::Int(2)), ":param1");
    }
}
