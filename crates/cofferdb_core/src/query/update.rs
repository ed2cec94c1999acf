//! Update documents: parsing and application.

use super::filter::values_equal;
use crate::error::{CoreError, CoreResult};
use cofferdb_codec::{Document, Value, ID_FIELD};

/// A parsed update document.
#[derive(Debug, Clone)]
pub enum Update {
    /// Field-level operators applied in order.
    Operators(Vec<UpdateOp>),
    /// Whole-body replacement. The identifier is kept.
    Replace(Document),
}

/// One field-level update operator.
#[derive(Debug, Clone)]
pub enum UpdateOp {
    /// `$set`: assign a value.
    Set(String, Value),
    /// `$unset`: remove a field.
    Unset(String),
    /// `$inc`: add a numeric delta, treating an absent field as 0.
    Inc(String, Value),
    /// `$push`: append to an array, creating it if absent or not an array.
    Push(String, Value),
    /// `$addToSet`: append unless an equal element exists.
    AddToSet(String, Value),
    /// `$pull`: remove every equal element.
    Pull(String, Value),
}

impl UpdateOp {
    fn path(&self) -> &str {
        match self {
            UpdateOp::Set(p, _)
            | UpdateOp::Unset(p)
            | UpdateOp::Inc(p, _)
            | UpdateOp::Push(p, _)
            | UpdateOp::AddToSet(p, _)
            | UpdateOp::Pull(p, _) => p,
        }
    }
}

fn names_id(path: &str) -> bool {
    path == ID_FIELD || path.starts_with("_id.")
}

impl Update {
    /// Parses an update document.
    ///
    /// A document whose keys all start with `$` is an operator update; a
    /// document with no `$` keys is a replacement.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` for unknown operators, mixed operator and
    /// plain keys, operator values that are not documents, and `$inc` with
    /// a non-numeric delta.
    pub fn parse(update: &Document) -> CoreResult<Self> {
        let operator_keys = update.keys().filter(|k| k.starts_with('$')).count();
        if operator_keys == 0 {
            return Ok(Update::Replace(update.clone()));
        }
        if operator_keys != update.len() {
            return Err(CoreError::invalid_operation(
                "update mixes operators and plain fields",
            ));
        }

        let mut ops = Vec::new();
        for (op, fields) in update.iter() {
            let fields = fields.as_document().ok_or_else(|| {
                CoreError::invalid_operation(format!("{op} expects a document"))
            })?;
            for (path, value) in fields.iter() {
                let path = path.to_string();
                let value = value.clone();
                let parsed = match op {
                    "$set" => UpdateOp::Set(path, value),
                    "$unset" => UpdateOp::Unset(path),
                    "$inc" => {
                        if !value.is_number() {
                            return Err(CoreError::invalid_operation(format!(
                                "$inc on {path} expects a number, found {}",
                                value.type_name()
                            )));
                        }
                        UpdateOp::Inc(path, value)
                    }
                    "$push" => UpdateOp::Push(path, value),
                    "$addToSet" => UpdateOp::AddToSet(path, value),
                    "$pull" => UpdateOp::Pull(path, value),
                    unknown => {
                        return Err(CoreError::invalid_operation(format!(
                            "unknown update operator: {unknown}"
                        )))
                    }
                };
                ops.push(parsed);
            }
        }
        Ok(Update::Operators(ops))
    }

    /// Applies the update to a document in place.
    ///
    /// The identifier field is never changed.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` when `$inc` targets an existing non-numeric
    /// field. The document may be partially updated in that case; callers
    /// apply updates to a copy.
    pub fn apply(&self, doc: &mut Document) -> CoreResult<()> {
        match self {
            Update::Replace(body) => {
                let id = doc.remove(ID_FIELD);
                let mut replaced = Document::with_capacity(body.len() + 1);
                if let Some(id) = id {
                    replaced.insert(ID_FIELD, id);
                }
                for (key, value) in body.iter() {
                    if key != ID_FIELD {
                        replaced.insert(key, value.clone());
                    }
                }
                *doc = replaced;
            }
            Update::Operators(ops) => {
                for op in ops.iter().filter(|op| !names_id(op.path())) {
                    apply_op(op, doc)?;
                }
            }
        }
        Ok(())
    }
}

fn apply_op(op: &UpdateOp, doc: &mut Document) -> CoreResult<()> {
    match op {
        UpdateOp::Set(path, value) => {
            doc.set_path(path, value.clone());
        }
        UpdateOp::Unset(path) => {
            doc.remove_path(path);
        }
        UpdateOp::Inc(path, delta) => {
            let sum = match doc.get_path(path) {
                None | Some(Value::Null) => delta.clone(),
                Some(current) => add_numbers(path, current, delta)?,
            };
            doc.set_path(path, sum);
        }
        UpdateOp::Push(path, value) => match doc.get_path_mut(path) {
            Some(Value::Array(items)) => items.push(value.clone()),
            _ => {
                doc.set_path(path, Value::Array(vec![value.clone()]));
            }
        },
        UpdateOp::AddToSet(path, value) => match doc.get_path_mut(path) {
            Some(Value::Array(items)) => {
                if !items.iter().any(|item| values_equal(item, value)) {
                    items.push(value.clone());
                }
            }
            _ => {
                doc.set_path(path, Value::Array(vec![value.clone()]));
            }
        },
        UpdateOp::Pull(path, value) => {
            if let Some(Value::Array(items)) = doc.get_path_mut(path) {
                items.retain(|item| !values_equal(item, value));
            }
        }
    }
    Ok(())
}

fn add_numbers(path: &str, current: &Value, delta: &Value) -> CoreResult<Value> {
    match (current, delta) {
        (Value::Integer(a), Value::Integer(b)) => Ok(match a.checked_add(*b) {
            Some(sum) => Value::Integer(sum),
            None => Value::Float(*a as f64 + *b as f64),
        }),
        (a, b) => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) if current.is_number() => Ok(Value::Float(a + b)),
            _ => Err(CoreError::invalid_operation(format!(
                "$inc on {path}: field holds {}",
                current.type_name()
            ))),
        },
    }
}
