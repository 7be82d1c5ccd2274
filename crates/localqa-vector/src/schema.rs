use arrow_schema::{DataType, Field, Schema, TimeUnit};
use std::sync::Arc;

/// Arrow schema of a collection table whose vectors have `dimension` components.
pub fn build_entry_schema(dimension: usize) -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new("document_id", DataType::Utf8, false),
        Field::new("source", DataType::Utf8, false),
        Field::new("full_path", DataType::Utf8, false),
        Field::new("format", DataType::Utf8, false),
        Field::new("content", DataType::Utf8, false),
        Field::new("chunk_index", DataType::Int32, false),
        Field::new("char_offset", DataType::Int64, false),
        Field::new("char_length", DataType::Int64, false),
        Field::new("indexed_at", DataType::Timestamp(TimeUnit::Millisecond, None), false),
        Field::new(
            "vector",
            DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float32, true)), dimension as i32),
            true,
        ),
    ]))
}

/// Vector width recorded in an existing table's schema.
pub fn vector_dimension(schema: &Schema) -> Option<usize> {
    match schema.field_with_name("vector").ok()?.data_type() {
        DataType::FixedSizeList(_, size) => usize::try_from(*size).ok(),
        _ => None,
    }
}

pub fn build_meta_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("key", DataType::Utf8, false),
        Field::new("value", DataType::Utf8, false),
        Field::new("updated_at", DataType::Timestamp(TimeUnit::Millisecond, None), false),
    ]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dimension_round_trips_through_schema() {
        assert_eq!(vector_dimension(&build_entry_schema(384)), Some(384));
        assert_eq!(vector_dimension(&build_meta_schema()), None);
    }
}
