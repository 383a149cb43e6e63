//! Filter evaluation, ordering and projection over BSON documents.
//!
//! A field that is missing from a document evaluates as `null`, so `Eq(field, null)`
//! matches documents without the field and `Exists(field, true)` matches only
//! documents holding a non-null value.

use std::{cmp::Ordering, collections::HashMap};

use bson::{Bson, Document, datetime::DateTime};

use docrepo_core::{
    error::{DocumentStoreError, DocumentStoreResult},
    query::{Expr, FieldOp, QueryVisitor, Sort, SortDirection},
};

/// Comparable view of a BSON value. Integers and doubles compare as `f64`.
#[derive(Debug)]
pub(crate) enum Comparable<'a> {
    Null,
    Bool(bool),
    Number(f64),
    DateTime(DateTime),
    String(&'a str),
    Array(Vec<Comparable<'a>>),
    Map(HashMap<&'a str, Comparable<'a>>),
    /// Values with no ordering of their own, such as binary data or object ids.
    Opaque(&'a Bson),
}

impl<'a> From<&'a Bson> for Comparable<'a> {
    fn from(bson: &'a Bson) -> Self {
        match bson {
            Bson::Null | Bson::Undefined => Comparable::Null,
            Bson::Boolean(value) => Comparable::Bool(*value),
            Bson::Int32(value) => Comparable::Number(f64::from(*value)),
            Bson::Int64(value) => Comparable::Number(*value as f64),
            Bson::Double(value) => Comparable::Number(*value),
            Bson::DateTime(value) => Comparable::DateTime(*value),
            Bson::String(value) => Comparable::String(value),
            Bson::Array(items) => Comparable::Array(items.iter().map(Comparable::from).collect()),
            Bson::Document(doc) => Comparable::Map(
                doc.iter()
                    .map(|(key, value)| (key.as_str(), Comparable::from(value)))
                    .collect(),
            ),
            other => Comparable::Opaque(other),
        }
    }
}

impl Comparable<'_> {
    /// Cross-type precedence used when sorting values of different types.
    fn rank(&self) -> u8 {
        match self {
            Comparable::Null => 0,
            Comparable::Number(_) => 1,
            Comparable::String(_) => 2,
            Comparable::Map(_) => 3,
            Comparable::Array(_) => 4,
            Comparable::Opaque(_) => 5,
            Comparable::Bool(_) => 6,
            Comparable::DateTime(_) => 7,
        }
    }

    /// Total order used for sorting: first by type rank, then by value.
    fn sort_cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Comparable::Array(left), Comparable::Array(right)) => left
                .iter()
                .zip(right)
                .map(|(l, r)| l.sort_cmp(r))
                .find(|ordering| ordering.is_ne())
                .unwrap_or_else(|| left.len().cmp(&right.len())),
            _ => self
                .partial_cmp(other)
                .unwrap_or_else(|| self.rank().cmp(&other.rank())),
        }
    }
}

impl PartialEq for Comparable<'_> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Comparable::Null, Comparable::Null) => true,
            (Comparable::Bool(a), Comparable::Bool(b)) => a == b,
            (Comparable::Number(a), Comparable::Number(b)) => a == b,
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a == b,
            (Comparable::String(a), Comparable::String(b)) => a == b,
            (Comparable::Array(a), Comparable::Array(b)) => a == b,
            (Comparable::Map(a), Comparable::Map(b)) => a == b,
            (Comparable::Opaque(a), Comparable::Opaque(b)) => a == b,
            _ => false,
        }
    }
}

impl PartialOrd for Comparable<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Comparable::Null, Comparable::Null) => Some(Ordering::Equal),
            (Comparable::Bool(a), Comparable::Bool(b)) => a.partial_cmp(b),
            (Comparable::Number(a), Comparable::Number(b)) => a.partial_cmp(b),
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a.partial_cmp(b),
            (Comparable::String(a), Comparable::String(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

/// Resolves a possibly dotted field path inside `document`.
pub(crate) fn lookup<'a>(document: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut segments = path.split('.');
    let mut current = document.get(segments.next()?)?;

    for segment in segments {
        current = current.as_document()?.get(segment)?;
    }

    Some(current)
}

static NULL: Bson = Bson::Null;

/// Evaluates a filter [`Expr`] against one document.
pub(crate) struct DocumentEvaluator<'a> {
    document: &'a Document,
}

impl<'a> DocumentEvaluator<'a> {
    pub fn new(document: &'a Document) -> Self {
        Self { document }
    }

    pub fn evaluate(&mut self, expr: &Expr) -> DocumentStoreResult<bool> {
        self.visit_expr(expr)
    }

    /// Keeps the documents matching `expr`. Evaluation errors are returned, not skipped.
    pub fn filter_documents<I>(documents: I, expr: &Expr) -> DocumentStoreResult<Vec<Document>>
    where
        I: IntoIterator<Item = &'a Document>,
    {
        let mut matched = Vec::new();

        for document in documents {
            if DocumentEvaluator::new(document).evaluate(expr)? {
                matched.push(document.clone());
            }
        }

        Ok(matched)
    }

    fn value(&self, field: &str) -> &'a Bson {
        lookup(self.document, field).unwrap_or(&NULL)
    }
}

impl QueryVisitor for DocumentEvaluator<'_> {
    type Output = bool;
    type Error = DocumentStoreError;

    fn visit_and(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        for expr in exprs {
            if !self.visit_expr(expr)? {
                return Ok(false);
            }
        }

        Ok(true)
    }

    fn visit_or(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        for expr in exprs {
            if self.visit_expr(expr)? {
                return Ok(true);
            }
        }

        Ok(false)
    }

    fn visit_not(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error> {
        Ok(!self.visit_expr(expr)?)
    }

    fn visit_exists(
        &mut self,
        field: &str,
        should_exist: bool,
    ) -> Result<Self::Output, Self::Error> {
        let exists = !matches!(Comparable::from(self.value(field)), Comparable::Null);
        Ok(exists == should_exist)
    }

    fn visit_field(
        &mut self,
        field: &str,
        op: &FieldOp,
        value: &Bson,
    ) -> Result<Self::Output, Self::Error> {
        let left = Comparable::from(self.value(field));
        let right = Comparable::from(value);

        match op {
            FieldOp::Eq => Ok(left == right),
            FieldOp::Ne => Ok(left != right),
            FieldOp::Gt => Ok(left.partial_cmp(&right).is_some_and(Ordering::is_gt)),
            FieldOp::Gte => Ok(left.partial_cmp(&right).is_some_and(Ordering::is_ge)),
            FieldOp::Lt => Ok(left.partial_cmp(&right).is_some_and(Ordering::is_lt)),
            FieldOp::Lte => Ok(left.partial_cmp(&right).is_some_and(Ordering::is_le)),
            FieldOp::Contains => Ok(contains(&left, &right)),
            FieldOp::NotContains => Ok(!contains(&left, &right)),
            FieldOp::StartsWith => {
                let prefix = text_operand(field, op, value)?;
                Ok(matches!(left, Comparable::String(text) if text.starts_with(prefix)))
            }
            FieldOp::EndsWith => {
                let suffix = text_operand(field, op, value)?;
                Ok(matches!(left, Comparable::String(text) if text.ends_with(suffix)))
            }
            FieldOp::AnyOf => Ok(any_of(&left, array_operand(field, op, right)?)),
            FieldOp::NoneOf => Ok(!any_of(&left, array_operand(field, op, right)?)),
        }
    }
}

fn contains(left: &Comparable<'_>, right: &Comparable<'_>) -> bool {
    match (left, right) {
        (Comparable::Array(items), _) => items.iter().any(|item| item == right),
        (Comparable::String(text), Comparable::String(needle)) => text.contains(needle),
        _ => false,
    }
}

/// A scalar matches when it equals one of `candidates`; an array matches when any of
/// its elements does.
fn any_of(left: &Comparable<'_>, candidates: Vec<Comparable<'_>>) -> bool {
    match left {
        Comparable::Array(items) => items.iter().any(|item| candidates.contains(item)),
        scalar => candidates.contains(scalar),
    }
}

fn text_operand<'v>(field: &str, op: &FieldOp, value: &'v Bson) -> DocumentStoreResult<&'v str> {
    value.as_str().ok_or_else(|| {
        DocumentStoreError::InvalidQuery(format!(
            "operator {op:?} on field '{field}' requires a string operand"
        ))
    })
}

fn array_operand<'v>(
    field: &str,
    op: &FieldOp,
    value: Comparable<'v>,
) -> DocumentStoreResult<Vec<Comparable<'v>>> {
    match value {
        Comparable::Array(items) => Ok(items),
        _ => Err(DocumentStoreError::InvalidQuery(format!(
            "operator {op:?} on field '{field}' requires an array operand"
        ))),
    }
}

/// Sorts `documents` by the keys of `sort`, earlier keys taking precedence.
///
/// The sort is stable, so documents equal on every key keep their incoming order.
pub(crate) fn sort_documents(documents: &mut [Document], sort: &[Sort]) {
    if sort.is_empty() {
        return;
    }

    documents.sort_by(|a, b| {
        sort.iter()
            .map(|key| {
                let left = Comparable::from(lookup(a, &key.field).unwrap_or(&NULL));
                let right = Comparable::from(lookup(b, &key.field).unwrap_or(&NULL));

                match key.direction {
                    SortDirection::Asc => left.sort_cmp(&right),
                    SortDirection::Desc => right.sort_cmp(&left),
                }
            })
            .find(|ordering| ordering.is_ne())
            .unwrap_or(Ordering::Equal)
    });
}

/// Keeps only the top-level fields named in `fields`, in stored order.
pub(crate) fn project(document: Document, fields: &[String]) -> Document {
    document
        .into_iter()
        .filter(|(key, _)| fields.iter().any(|field| field == key))
        .collect()
}

#[cfg(test)]
mod tests {
    use bson::doc;
    use docrepo_core::query::Filter;

    use super::*;

    fn matches(document: &Document, expr: &Expr) -> bool {
        DocumentEvaluator::new(document)
            .evaluate(expr)
            .expect("evaluates")
    }

    #[test]
    fn missing_fields_evaluate_as_null() {
        let document = doc! { "_id": "b1", "caption": "One", "subtitle": null };

        assert!(matches(&document, &Filter::eq("isbn", Bson::Null)));
        assert!(matches(&document, &Filter::eq("subtitle", Bson::Null)));
        assert!(matches(&document, &Filter::ne("isbn", "x")));
        assert!(!matches(&document, &Filter::exists("subtitle")));
        assert!(matches(&document, &Filter::exists("caption")));
        assert!(!matches(&document, &Filter::gt("isbn", 1)));
    }

    #[test]
    fn numbers_compare_across_integer_and_double() {
        let document = doc! { "pages": 120_i32, "weight": 0.5 };

        assert!(matches(&document, &Filter::eq("pages", 120_i64)));
        assert!(matches(&document, &Filter::gte("pages", 119.5)));
        assert!(matches(&document, &Filter::lt("weight", 1)));
        assert!(!matches(&document, &Filter::gt("pages", "a")));
    }

    #[test]
    fn text_operators_are_case_sensitive() {
        let document = doc! { "caption": "The Two Towers" };

        assert!(matches(&document, &Filter::starts_with("caption", "The")));
        assert!(!matches(&document, &Filter::starts_with("caption", "the")));
        assert!(matches(&document, &Filter::ends_with("caption", "Towers")));
        assert!(matches(&document, &Filter::contains("caption", "Two")));
        assert!(matches(&document, &Filter::not_contains("caption", "two")));
    }

    #[test]
    fn any_of_matches_scalars_and_array_elements() {
        let scalar = doc! { "genre": "fantasy" };
        let tags = doc! { "tags": ["epic", "classic"] };

        let genres = Filter::any_of("genre", ["fantasy".into(), "horror".into()]);
        assert!(matches(&scalar, &genres));
        assert!(!matches(&scalar, &Filter::none_of("genre", ["fantasy".into()])));
        assert!(matches(&tags, &Filter::any_of("tags", ["classic".into()])));
    }

    #[test]
    fn malformed_operands_are_reported() {
        let document = doc! { "caption": "One" };

        let err = DocumentEvaluator::new(&document)
            .evaluate(&Expr::field("caption", FieldOp::AnyOf, "One"))
            .expect_err("scalar operand");
        assert!(matches!(err, DocumentStoreError::InvalidQuery(_)));

        let err = DocumentEvaluator::filter_documents(
            [&document],
            &Expr::field("caption", FieldOp::StartsWith, 1),
        )
        .expect_err("numeric prefix");
        assert!(matches!(err, DocumentStoreError::InvalidQuery(_)));
    }

    #[test]
    fn dotted_paths_reach_nested_documents() {
        let document = doc! { "publisher": { "name": "Allen" } };

        assert!(matches(&document, &Filter::eq("publisher.name", "Allen")));
        assert!(matches(&document, &Filter::eq("publisher.city", Bson::Null)));
    }

    #[test]
    fn sort_applies_keys_in_precedence_order() {
        let mut documents = vec![
            doc! { "_id": "a", "caption": "Two", "pages": 10 },
            doc! { "_id": "b", "caption": "One", "pages": 30 },
            doc! { "_id": "c", "caption": "Two", "pages": 20 },
            doc! { "_id": "d" },
        ];

        sort_documents(
            &mut documents,
            &[
                Sort { field: "caption".into(), direction: SortDirection::Asc },
                Sort { field: "pages".into(), direction: SortDirection::Desc },
            ],
        );

        let ids = documents
            .iter()
            .map(|document| document.get_str("_id").expect("id"))
            .collect::<Vec<_>>();
        assert_eq!(ids, vec!["d", "b", "c", "a"]);
    }

    #[test]
    fn projection_keeps_requested_fields_only() {
        let document = doc! { "_id": "b1", "caption": "One", "pages": 10 };

        let projected = project(document, &["_id".to_string(), "caption".to_string()]);

        assert_eq!(projected, doc! { "_id": "b1", "caption": "One" });
    }
}
