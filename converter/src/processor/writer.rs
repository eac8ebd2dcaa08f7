use super::types::FlatRecord;
use arrow::datatypes::{DataType, Field, Schema};
use arrow::json::reader::{infer_json_schema_from_iterator, ReaderBuilder};
use arrow::record_batch::RecordBatch;
use chrono::Utc;
use common::{Error, Result};
use parquet::arrow::ArrowWriter;
use parquet::basic::{BrotliLevel, Compression, GzipLevel};
use parquet::file::properties::WriterProperties;
use parquet::format::KeyValue;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

const BATCH_SIZE: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Codec {
    #[default]
    Snappy,
    Gzip,
    Brotli,
    Lz4,
}

impl Codec {
    pub const NAMES: [&'static str; 4] = ["snappy", "gzip", "brotli", "lz4"];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Snappy => "snappy",
            Self::Gzip => "gzip",
            Self::Brotli => "brotli",
            Self::Lz4 => "lz4",
        }
    }

    fn compression(&self) -> Compression {
        match self {
            Self::Snappy => Compression::SNAPPY,
            Self::Gzip => Compression::GZIP(GzipLevel::default()),
            Self::Brotli => Compression::BROTLI(BrotliLevel::default()),
            Self::Lz4 => Compression::LZ4_RAW,
        }
    }
}

impl FromStr for Codec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "snappy" => Ok(Self::Snappy),
            "gzip" => Ok(Self::Gzip),
            "brotli" => Ok(Self::Brotli),
            "lz4" => Ok(Self::Lz4),
            other => Err(Error::InvalidInput(format!(
                "unsupported compression '{}', expected one of {}",
                other,
                Self::NAMES.join(", ")
            ))),
        }
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Encodes a batch of flat rows as one parquet file held in memory.
#[derive(Debug, Clone, Copy, Default)]
pub struct TableWriter {
    codec: Codec,
}

impl TableWriter {
    pub fn new(codec: Codec) -> Self {
        Self { codec }
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    pub fn encode(&self, docket_id: &str, table: &str, rows: &[FlatRecord]) -> Result<Vec<u8>> {
        if rows.is_empty() {
            return Err(Error::InvalidInput(format!(
                "no rows to write for {}/{}",
                docket_id, table
            )));
        }

        let rows: Vec<FlatRecord> = rows.iter().map(stringify_nested).collect();
        let schema = Arc::new(infer_schema(&rows)?);
        let batches = decode(schema.clone(), &rows)?;

        let properties = WriterProperties::builder()
            .set_compression(self.codec.compression())
            .set_key_value_metadata(Some(vec![
                KeyValue::new("docket_id".to_string(), docket_id.to_string()),
                KeyValue::new("table".to_string(), table.to_string()),
                KeyValue::new("converted_at".to_string(), Utc::now().to_rfc3339()),
            ]))
            .build();

        let mut buffer: Vec<u8> = Vec::new();
        let mut writer = ArrowWriter::try_new(&mut buffer, schema, Some(properties))?;
        for batch in &batches {
            writer.write(batch)?;
        }
        writer.close()?;

        Ok(buffer)
    }
}

/// Objects and arrays become their JSON text so every column stays scalar.
fn stringify_nested(row: &FlatRecord) -> FlatRecord {
    row.iter()
        .map(|(name, value)| {
            let value = match value {
                Value::Object(_) | Value::Array(_) => Value::String(value.to_string()),
                other => other.clone(),
            };
            (name.clone(), value)
        })
        .collect()
}

fn infer_schema(rows: &[FlatRecord]) -> Result<Schema> {
    let inferred = infer_json_schema_from_iterator(
        rows.iter().map(|row| Ok(Value::Object(row.clone()))),
    )?;

    // Columns that were null in every row carry no type information.
    let fields: Vec<Field> = inferred
        .fields()
        .iter()
        .map(|field| match field.data_type() {
            DataType::Null => Field::new(field.name(), DataType::Utf8, true),
            _ => field.as_ref().clone().with_nullable(true),
        })
        .collect();

    Ok(Schema::new(fields))
}

fn decode(schema: Arc<Schema>, rows: &[FlatRecord]) -> Result<Vec<RecordBatch>> {
    let mut decoder = ReaderBuilder::new(schema)
        .with_batch_size(BATCH_SIZE)
        .with_coerce_primitive(true)
        .build_decoder()?;

    let mut batches = Vec::new();
    for chunk in rows.chunks(BATCH_SIZE) {
        decoder.serialize(chunk)?;
        if let Some(batch) = decoder.flush()? {
            batches.push(batch);
        }
    }
    Ok(batches)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Array, BooleanArray, Int64Array, StringArray};
    use bytes::Bytes;
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
    use serde_json::json;

    fn row(value: Value) -> FlatRecord {
        value.as_object().unwrap().clone()
    }

    fn read_back(buffer: Vec<u8>) -> (Vec<RecordBatch>, Vec<(String, Option<String>)>) {
        let builder = ParquetRecordBatchReaderBuilder::try_new(Bytes::from(buffer)).unwrap();
        let metadata = builder
            .metadata()
            .file_metadata()
            .key_value_metadata()
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .map(|kv| (kv.key, kv.value))
            .collect();
        let batches = builder.build().unwrap().collect::<std::result::Result<_, _>>().unwrap();
        (batches, metadata)
    }

    #[test]
    fn test_codec_parsing() {
        assert_eq!("snappy".parse::<Codec>().unwrap(), Codec::Snappy);
        assert_eq!("GZIP".parse::<Codec>().unwrap(), Codec::Gzip);
        assert_eq!("lz4".parse::<Codec>().unwrap(), Codec::Lz4);
        assert!(matches!(
            "zip".parse::<Codec>(),
            Err(Error::InvalidInput(_))
        ));
        assert_eq!(Codec::default().to_string(), "snappy");
    }

    #[test]
    fn test_encode_preserves_rows_and_types() {
        let rows = vec![
            row(json!({"id": "d1", "type": "documents", "link": null, "pageCount": 3, "withdrawn": false})),
            row(json!({"id": "d2", "type": "documents", "link": "https://x", "pageCount": 7, "withdrawn": true})),
        ];

        let buffer = TableWriter::new(Codec::Snappy)
            .encode("FAA-2000-7032", "documents", &rows)
            .unwrap();
        let (batches, metadata) = read_back(buffer);

        assert_eq!(batches.iter().map(|b| b.num_rows()).sum::<usize>(), 2);
        let batch = &batches[0];
        let ids = batch
            .column_by_name("id")
            .unwrap()
            .as_any()
            .downcast_ref::<StringArray>()
            .unwrap();
        assert_eq!(ids.value(1), "d2");
        let pages = batch
            .column_by_name("pageCount")
            .unwrap()
            .as_any()
            .downcast_ref::<Int64Array>()
            .unwrap();
        assert_eq!(pages.value(0), 3);
        let withdrawn = batch
            .column_by_name("withdrawn")
            .unwrap()
            .as_any()
            .downcast_ref::<BooleanArray>()
            .unwrap();
        assert!(withdrawn.value(1));
        assert!(batch.column_by_name("link").unwrap().is_null(0));

        assert!(metadata.contains(&("docket_id".to_string(), Some("FAA-2000-7032".to_string()))));
        assert!(metadata.contains(&("table".to_string(), Some("documents".to_string()))));
        assert!(metadata.iter().any(|(k, _)| k == "converted_at"));
    }

    #[test]
    fn test_sparse_nested_and_null_columns() {
        let rows = vec![
            row(json!({"id": "c1", "type": null, "keywords": ["a", "b"], "address": {"city": "x"}})),
            row(json!({"id": "c2", "type": null, "title": "only here"})),
        ];

        for codec in [Codec::Snappy, Codec::Gzip, Codec::Brotli, Codec::Lz4] {
            let buffer = TableWriter::new(codec).encode("D", "comments", &rows).unwrap();
            let (batches, _) = read_back(buffer);
            let batch = &batches[0];

            let schema = batch.schema();
            assert_eq!(schema.field_with_name("type").unwrap().data_type(), &DataType::Utf8);
            assert_eq!(
                schema.field_with_name("keywords").unwrap().data_type(),
                &DataType::Utf8
            );

            let keywords = batch
                .column_by_name("keywords")
                .unwrap()
                .as_any()
                .downcast_ref::<StringArray>()
                .unwrap();
            assert_eq!(keywords.value(0), r#"["a","b"]"#);
            assert!(keywords.is_null(1));
            assert!(batch.column_by_name("title").unwrap().is_null(0));
        }
    }

    #[test]
    fn test_mixed_scalar_types_fall_back_to_text() {
        let rows = vec![
            row(json!({"id": "1", "docketNumber": 42})),
            row(json!({"id": "2", "docketNumber": "42-A"})),
        ];
        let buffer = TableWriter::default().encode("D", "documents", &rows).unwrap();
        let (batches, _) = read_back(buffer);
        let column = batches[0]
            .column_by_name("docketNumber")
            .unwrap()
            .as_any()
            .downcast_ref::<StringArray>()
            .unwrap();
        assert_eq!(column.value(0), "42");
        assert_eq!(column.value(1), "42-A");
    }

    #[test]
    fn test_many_rows_span_batches() {
        let rows: Vec<FlatRecord> = (0..2500)
            .map(|i| row(json!({"id": format!("c{}", i), "n": i})))
            .collect();
        let buffer = TableWriter::default().encode("D", "comments", &rows).unwrap();
        let (batches, _) = read_back(buffer);
        assert_eq!(batches.iter().map(|b| b.num_rows()).sum::<usize>(), 2500);
    }

    #[test]
    fn test_empty_rows_rejected() {
        assert!(TableWriter::default().encode("D", "comments", &[]).is_err());
    }
}
