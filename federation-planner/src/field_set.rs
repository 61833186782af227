//! Parser for the selection-set strings carried by `@key`, `@requires` and
//! `@provides` configurations, e.g. `"id info { age }"` or
//! `"... on Admin { permissions }"`.
//!
//! Field arguments are not part of this grammar; a field set containing them
//! is rejected.

use nom::IResult;
use nom::branch::alt;
use nom::bytes::complete::tag;
use nom::bytes::complete::take_while;
use nom::bytes::complete::take_while1;
use nom::character::complete::multispace0;
use nom::combinator::map;
use nom::combinator::opt;
use nom::multi::many1;
use nom::sequence::delimited;
use nom::sequence::pair;
use nom::sequence::preceded;

use crate::error::PlanError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldSetItem {
    Field {
        name: String,
        selections: Vec<FieldSetItem>,
    },
    InlineFragment {
        type_condition: String,
        selections: Vec<FieldSetItem>,
    },
}

impl FieldSetItem {
    pub fn field(name: &str) -> Self {
        Self::Field {
            name: name.to_string(),
            selections: Vec::new(),
        }
    }

    pub fn field_with(name: &str, selections: Vec<Self>) -> Self {
        Self::Field {
            name: name.to_string(),
            selections,
        }
    }
}

/// Parse a field-set string into its selection items.
pub fn parse_field_set(input: &str) -> Result<Vec<FieldSetItem>, PlanError> {
    match selections(input) {
        Ok((rest, items)) if rest.trim().is_empty() => Ok(items),
        Ok((rest, _)) => Err(PlanError::FieldSetSyntax {
            field_set: input.to_string(),
            message: format!("unexpected trailing input {rest:?}"),
        }),
        Err(e) => Err(PlanError::FieldSetSyntax {
            field_set: input.to_string(),
            message: e.to_string(),
        }),
    }
}

/// Every field in the set as a dot-delimited path, intermediate fields
/// included: `"id info { age }"` yields `id`, `info` and `info.age`.
pub fn field_set_paths(items: &[FieldSetItem]) -> Vec<String> {
    let mut paths = Vec::new();
    collect_paths(items, "", &mut paths);
    paths
}

fn collect_paths(items: &[FieldSetItem], prefix: &str, out: &mut Vec<String>) {
    for item in items {
        match item {
            FieldSetItem::Field { name, selections } => {
                let path = if prefix.is_empty() {
                    name.clone()
                } else {
                    format!("{prefix}.{name}")
                };
                out.push(path.clone());
                collect_paths(selections, &path, out);
            }
            FieldSetItem::InlineFragment { selections, .. } => {
                // Fragment conditions do not contribute a path segment.
                collect_paths(selections, prefix, out);
            }
        }
    }
}

fn identifier(input: &str) -> IResult<&str, &str> {
    let (rest, _) = take_while1(|c: char| c.is_ascii_alphabetic() || c == '_')(input)?;
    let (rest, _) = take_while(|c: char| c.is_ascii_alphanumeric() || c == '_')(rest)?;
    let len = input.len() - rest.len();
    Ok((rest, &input[..len]))
}

fn ws<'a, F, O>(inner: F) -> impl FnMut(&'a str) -> IResult<&'a str, O>
where
    F: FnMut(&'a str) -> IResult<&'a str, O>,
{
    preceded(multispace0, inner)
}

fn braced_selections(input: &str) -> IResult<&str, Vec<FieldSetItem>> {
    delimited(ws(tag("{")), selections, ws(tag("}")))(input)
}

fn field_item(input: &str) -> IResult<&str, FieldSetItem> {
    map(
        pair(ws(identifier), opt(braced_selections)),
        |(name, selections)| FieldSetItem::Field {
            name: name.to_string(),
            selections: selections.unwrap_or_default(),
        },
    )(input)
}

fn fragment_item(input: &str) -> IResult<&str, FieldSetItem> {
    let (input, _) = ws(tag("..."))(input)?;
    let (input, _) = ws(tag("on"))(input)?;
    let (input, type_condition) = ws(identifier)(input)?;
    let (input, selections) = braced_selections(input)?;
    Ok((
        input,
        FieldSetItem::InlineFragment {
            type_condition: type_condition.to_string(),
            selections,
        },
    ))
}

fn selections(input: &str) -> IResult<&str, Vec<FieldSetItem>> {
    many1(alt((fragment_item, field_item)))(input)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[test]
    fn flat_and_nested_fields() {
        let items = parse_field_set("id info { age }").unwrap();
        assert_eq!(
            items,
            vec![
                FieldSetItem::field("id"),
                FieldSetItem::field_with("info", vec![FieldSetItem::field("age")]),
            ]
        );
        assert_eq!(field_set_paths(&items), vec!["id", "info", "info.age"]);
    }

    #[test]
    fn inline_fragments() {
        let items = parse_field_set("id ... on Admin { permissions { scope } }").unwrap();
        assert_eq!(
            items,
            vec![
                FieldSetItem::field("id"),
                FieldSetItem::InlineFragment {
                    type_condition: "Admin".to_string(),
                    selections: vec![FieldSetItem::field_with(
                        "permissions",
                        vec![FieldSetItem::field("scope")]
                    )],
                },
            ]
        );
    }

    #[rstest]
    #[case("")]
    #[case("id {")]
    #[case("id(first: 1)")]
    #[case("... on { id }")]
    fn rejects_malformed_sets(#[case] input: &str) {
        assert!(matches!(
            parse_field_set(input),
            Err(PlanError::FieldSetSyntax { .. })
        ));
    }

    #[test]
    fn deeply_nested_paths() {
        let items = parse_field_set("a { b { c } d }").unwrap();
        assert_eq!(field_set_paths(&items), vec!["a", "a.b", "a.b.c", "a.d"]);
    }
}
