//! Purpose: Turn a resolved schema plus converted field values into caller types.
//! Exports: `Materializer`, `JsonObjectMaterializer`, `SerdeMaterializer`.
//! Role: The single seam through which typed CSV records leave the engine.
//! Invariants: Called once per emitted record, after field conversion.
//! Notes: Closures `Fn(&Schema, Vec<FieldValue>) -> Result<T, Error>` are materializers too.
use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::core::csv::schema::{FieldValue, Schema};
use crate::core::error::{Error, ErrorKind};

pub trait Materializer<T> {
    fn materialize(&self, schema: &Schema, values: Vec<FieldValue>) -> Result<T, Error>;
}

impl<T, F> Materializer<T> for F
where
    F: Fn(&Schema, Vec<FieldValue>) -> Result<T, Error>,
{
    fn materialize(&self, schema: &Schema, values: Vec<FieldValue>) -> Result<T, Error> {
        self(schema, values)
    }
}

/// Builds an ordered JSON object keyed by column name.
#[derive(Copy, Clone, Debug, Default)]
pub struct JsonObjectMaterializer;

impl Materializer<Map<String, Value>> for JsonObjectMaterializer {
    fn materialize(
        &self,
        schema: &Schema,
        values: Vec<FieldValue>,
    ) -> Result<Map<String, Value>, Error> {
        Ok(to_object(schema, &values))
    }
}

/// Deserializes each record into `T` via its JSON object form.
pub struct SerdeMaterializer<T> {
    _target: PhantomData<fn() -> T>,
}

impl<T> SerdeMaterializer<T> {
    pub fn new() -> Self {
        Self {
            _target: PhantomData,
        }
    }
}

impl<T> Default for SerdeMaterializer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: DeserializeOwned> Materializer<T> for SerdeMaterializer<T> {
    fn materialize(&self, schema: &Schema, values: Vec<FieldValue>) -> Result<T, Error> {
        let object = Value::Object(to_object(schema, &values));
        serde_json::from_value(object).map_err(|err| {
            Error::new(ErrorKind::Materialize)
                .with_message(format!("record does not match target type: {err}"))
                .with_source(err)
        })
    }
}

fn to_object(schema: &Schema, values: &[FieldValue]) -> Map<String, Value> {
    let mut object = Map::new();
    for (name, value) in schema.names().zip(values) {
        object.insert(name.to_string(), value.to_json());
    }
    object
}

#[cfg(test)]
mod tests {
    use super::{JsonObjectMaterializer, Materializer, SerdeMaterializer};
    use crate::core::csv::schema::{Column, ColumnType, FieldValue, Schema};
    use crate::core::error::{Error, ErrorKind};
    use serde::Deserialize;

    fn schema() -> Schema {
        let column = |name: &str, ty| Column {
            name: name.to_string(),
            ty,
            demoted: false,
        };
        Schema::new(
            vec![column("id", ColumnType::Int32), column("name", ColumnType::String)],
            true,
        )
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Person {
        id: i32,
        name: String,
    }

    #[test]
    fn json_object_keeps_column_order() {
        let values = vec![FieldValue::Int32(1), FieldValue::String("Ann".into())];
        let object = JsonObjectMaterializer
            .materialize(&schema(), values)
            .expect("materialize");
        let keys: Vec<&String> = object.keys().collect();
        assert_eq!(keys, vec!["id", "name"]);
        assert_eq!(object["id"], serde_json::json!(1));
    }

    #[test]
    fn serde_target_roundtrip_and_mismatch() {
        let materializer = SerdeMaterializer::<Person>::new();
        let person = materializer
            .materialize(&schema(), vec![FieldValue::Int32(2), FieldValue::String("Bo".into())])
            .expect("person");
        assert_eq!(person, Person { id: 2, name: "Bo".into() });

        let err = materializer
            .materialize(&schema(), vec![FieldValue::String("x".into()), FieldValue::Null])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Materialize);
    }

    #[test]
    fn closures_are_materializers() {
        let count = |_schema: &Schema, values: Vec<FieldValue>| -> Result<usize, Error> {
            Ok(values.len())
        };
        assert_eq!(count.materialize(&schema(), vec![FieldValue::Null]).expect("count"), 1);
    }
}
