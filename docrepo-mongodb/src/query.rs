//! Translation of provider queries into MongoDB query documents.
//!
//! The translation keeps the semantics of the in-memory evaluator: a missing field
//! behaves like `null`, text operators are case-sensitive and match literally, and
//! `Exists(field, true)` requires a non-null value.

use bson::{Bson, Document, doc};
use mongodb::options::FindOptions;

use docrepo_core::{
    error::DocumentStoreError,
    query::{Expr, FieldOp, Query, QueryVisitor, SortDirection},
};

use crate::sanitizer::KeySanitizer;

/// Translates filter expressions into MongoDB filter documents.
pub(crate) struct MongoQueryTranslator;

impl MongoQueryTranslator {
    /// The filter document for `filter`; an empty document matches everything.
    pub(crate) fn filter(filter: Option<&Expr>) -> Result<Document, DocumentStoreError> {
        match filter {
            Some(expr) => MongoQueryTranslator.visit_expr(expr),
            None => Ok(Document::new()),
        }
    }

    /// Find options carrying the sort, paging and projection of `query`.
    ///
    /// Returns `None` for a limit of zero: the server reads `limit: 0` as "no limit",
    /// while the query asks for no documents at all.
    pub(crate) fn find_options(query: &Query) -> Option<FindOptions> {
        if query.limit == Some(0) {
            return None;
        }

        let mut options = FindOptions::default();

        if !query.sort.is_empty() {
            let mut sort = Document::new();
            for key in &query.sort {
                sort.insert(
                    KeySanitizer::sanitize_key(&key.field),
                    match key.direction {
                        SortDirection::Asc => 1,
                        SortDirection::Desc => -1,
                    },
                );
            }
            options.sort = Some(sort);
        }
        if let Some(limit) = query.limit {
            options.limit = Some(limit as i64);
        }
        if let Some(skip) = query.offset {
            options.skip = Some(skip as u64);
        }
        if let Some(fields) = &query.projection {
            options.projection = Some(
                fields
                    .iter()
                    .map(|field| (KeySanitizer::sanitize_key(field), Bson::Int32(1)))
                    .collect(),
            );
        }

        Some(options)
    }
}

impl QueryVisitor for MongoQueryTranslator {
    type Output = Document;
    type Error = DocumentStoreError;

    fn visit_and(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        Ok(doc! {
            "$and": exprs
                .iter()
                .map(|expr| self.visit_expr(expr))
                .collect::<Result<Vec<_>, _>>()?,
        })
    }

    fn visit_or(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        Ok(doc! {
            "$or": exprs
                .iter()
                .map(|expr| self.visit_expr(expr))
                .collect::<Result<Vec<_>, _>>()?,
        })
    }

    // `$not` is only valid on field operators, `$nor` negates any filter.
    fn visit_not(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error> {
        Ok(doc! {
            "$nor": [self.visit_expr(expr)?],
        })
    }

    fn visit_exists(
        &mut self,
        field: &str,
        should_exist: bool,
    ) -> Result<Self::Output, Self::Error> {
        let field = KeySanitizer::sanitize_key(field);

        Ok(match should_exist {
            true => doc! { field: { "$ne": Bson::Null } },
            false => doc! { field: { "$eq": Bson::Null } },
        })
    }

    fn visit_field(
        &mut self,
        field: &str,
        op: &FieldOp,
        value: &Bson,
    ) -> Result<Self::Output, Self::Error> {
        let condition = match op {
            FieldOp::Eq => doc! { "$eq": value },
            FieldOp::Ne => doc! { "$ne": value },
            FieldOp::Gt => doc! { "$gt": value },
            FieldOp::Gte => doc! { "$gte": value },
            FieldOp::Lt => doc! { "$lt": value },
            FieldOp::Lte => doc! { "$lte": value },
            FieldOp::Contains => match value {
                Bson::String(text) => doc! { "$regex": escape_regex(text) },
                other => doc! { "$eq": other },
            },
            FieldOp::NotContains => match value {
                Bson::String(text) => doc! { "$not": { "$regex": escape_regex(text) } },
                other => doc! { "$ne": other },
            },
            FieldOp::StartsWith => {
                doc! { "$regex": format!("^{}", escape_regex(text_operand(field, op, value)?)) }
            }
            FieldOp::EndsWith => {
                doc! { "$regex": format!("{}$", escape_regex(text_operand(field, op, value)?)) }
            }
            FieldOp::AnyOf => doc! { "$in": array_operand(field, op, value)? },
            FieldOp::NoneOf => doc! { "$nin": array_operand(field, op, value)? },
        };

        let field = KeySanitizer::sanitize_key(field);
        Ok(doc! { field: condition })
    }
}

fn text_operand<'v>(field: &str, op: &FieldOp, value: &'v Bson) -> Result<&'v str, DocumentStoreError> {
    value.as_str().ok_or_else(|| {
        DocumentStoreError::InvalidQuery(format!(
            "operator {op:?} on field '{field}' requires a string operand"
        ))
    })
}

fn array_operand<'v>(field: &str, op: &FieldOp, value: &'v Bson) -> Result<&'v Bson, DocumentStoreError> {
    match value {
        Bson::Array(_) => Ok(value),
        _ => Err(DocumentStoreError::InvalidQuery(format!(
            "operator {op:?} on field '{field}' requires an array operand"
        ))),
    }
}

/// Escapes regular expression metacharacters so `text` matches literally.
fn escape_regex(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());

    for c in text.chars() {
        if matches!(
            c,
            '\\' | '.' | '+' | '*' | '?' | '(' | ')' | '|' | '[' | ']' | '{' | '}' | '^' | '$' | '/'
        ) {
            escaped.push('\\');
        }
        escaped.push(c);
    }

    escaped
}
