//! Table-level metadata and the logical schema stored in the log.
//!
//! The first commit of every table records a [`TableMeta`] describing the
//! column layout and which column is the time index. Later writes are checked
//! against it, so a table never holds segments with different schemas.
use std::{collections::HashSet, fmt, sync::Arc};

use arrow::datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use snafu::prelude::*;

/// Current on-disk metadata format version.
pub const FORMAT_VERSION: u32 = 1;

/// Table metadata recorded by `UpdateTableMeta` actions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TableMeta {
    /// Name of the timestamp column that orders and deduplicates rows.
    pub time_column: String,
    /// Column layout of every segment in the table.
    pub logical_schema: LogicalSchema,
    /// When the table was first created.
    pub created_at: DateTime<Utc>,
    /// Metadata format version.
    pub format_version: u32,
}

impl TableMeta {
    /// Build metadata for a new table with the given time column and schema.
    pub fn new(time_column: impl Into<String>, logical_schema: LogicalSchema) -> Self {
        Self {
            time_column: time_column.into(),
            logical_schema,
            created_at: Utc::now(),
            format_version: FORMAT_VERSION,
        }
    }

    /// Arrow view of the logical schema.
    pub fn arrow_schema_ref(&self) -> SchemaRef {
        self.logical_schema.to_arrow_schema_ref()
    }
}

/// Units for logical timestamps recorded in the table metadata.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum LogicalTimestampUnit {
    /// Second precision timestamps.
    Seconds,
    /// Millisecond precision timestamps.
    Millis,
    /// Microsecond precision timestamps.
    Micros,
    /// Nanosecond precision timestamps.
    Nanos,
}

impl LogicalTimestampUnit {
    fn to_arrow_time_unit(self) -> TimeUnit {
        match self {
            LogicalTimestampUnit::Seconds => TimeUnit::Second,
            LogicalTimestampUnit::Millis => TimeUnit::Millisecond,
            LogicalTimestampUnit::Micros => TimeUnit::Microsecond,
            LogicalTimestampUnit::Nanos => TimeUnit::Nanosecond,
        }
    }

    fn from_arrow_time_unit(unit: &TimeUnit) -> Self {
        match unit {
            TimeUnit::Second => LogicalTimestampUnit::Seconds,
            TimeUnit::Millisecond => LogicalTimestampUnit::Millis,
            TimeUnit::Microsecond => LogicalTimestampUnit::Micros,
            TimeUnit::Nanosecond => LogicalTimestampUnit::Nanos,
        }
    }
}

impl fmt::Display for LogicalTimestampUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogicalTimestampUnit::Seconds => write!(f, "s"),
            LogicalTimestampUnit::Millis => write!(f, "ms"),
            LogicalTimestampUnit::Micros => write!(f, "us"),
            LogicalTimestampUnit::Nanos => write!(f, "ns"),
        }
    }
}

/// Logical data types that can be stored in a table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum LogicalDataType {
    /// Boolean value.
    Bool,
    /// 32-bit signed integer.
    Int32,
    /// 64-bit signed integer.
    Int64,
    /// 32-bit floating point.
    Float32,
    /// 64-bit floating point.
    Float64,
    /// UTF-8 encoded string.
    Utf8,
    /// Timestamp value with a precision unit and optional timezone.
    Timestamp {
        /// Timestamp precision unit.
        unit: LogicalTimestampUnit,
        /// Optional timezone identifier attached to the Arrow type.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timezone: Option<String>,
    },
}

impl LogicalDataType {
    fn to_arrow_datatype(&self) -> DataType {
        match self {
            LogicalDataType::Bool => DataType::Boolean,
            LogicalDataType::Int32 => DataType::Int32,
            LogicalDataType::Int64 => DataType::Int64,
            LogicalDataType::Float32 => DataType::Float32,
            LogicalDataType::Float64 => DataType::Float64,
            LogicalDataType::Utf8 => DataType::Utf8,
            LogicalDataType::Timestamp { unit, timezone } => DataType::Timestamp(
                unit.to_arrow_time_unit(),
                timezone.as_deref().map(Arc::from),
            ),
        }
    }

    fn from_arrow_datatype(column: &str, dt: &DataType) -> Result<Self, LogicalSchemaError> {
        Ok(match dt {
            DataType::Boolean => LogicalDataType::Bool,
            DataType::Int32 => LogicalDataType::Int32,
            DataType::Int64 => LogicalDataType::Int64,
            DataType::Float32 => LogicalDataType::Float32,
            DataType::Float64 => LogicalDataType::Float64,
            DataType::Utf8 => LogicalDataType::Utf8,
            DataType::Timestamp(unit, tz) => LogicalDataType::Timestamp {
                unit: LogicalTimestampUnit::from_arrow_time_unit(unit),
                timezone: tz.as_deref().map(str::to_string),
            },
            other => {
                return UnsupportedArrowTypeSnafu {
                    column: column.to_string(),
                    data_type: other.to_string(),
                }
                .fail();
            }
        })
    }
}

impl fmt::Display for LogicalDataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogicalDataType::Bool => write!(f, "bool"),
            LogicalDataType::Int32 => write!(f, "int32"),
            LogicalDataType::Int64 => write!(f, "int64"),
            LogicalDataType::Float32 => write!(f, "float32"),
            LogicalDataType::Float64 => write!(f, "float64"),
            LogicalDataType::Utf8 => write!(f, "utf8"),
            LogicalDataType::Timestamp { unit, timezone } => match timezone {
                Some(tz) => write!(f, "timestamp[{unit}, {tz}]"),
                None => write!(f, "timestamp[{unit}]"),
            },
        }
    }
}

/// Logical column definition in a schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogicalField {
    /// Column name as stored in the schema.
    pub name: String,
    /// Logical data type for the column.
    pub data_type: LogicalDataType,
    /// Whether the column allows null values.
    #[serde(default)]
    pub nullable: bool,
}

impl fmt::Display for LogicalField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.nullable {
            write!(f, "{}?: {}", self.name, self.data_type)
        } else {
            write!(f, "{}: {}", self.name, self.data_type)
        }
    }
}

/// Ordered collection of logical columns.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogicalSchema {
    columns: Vec<LogicalField>,
}

/// Errors that can occur while constructing a logical schema.
#[derive(Debug, Clone, Snafu, PartialEq, Eq)]
pub enum LogicalSchemaError {
    /// Duplicate column names are not allowed.
    #[snafu(display("Duplicate column name: {column}"))]
    DuplicateColumn {
        /// The duplicate column name.
        column: String,
    },

    /// The Arrow type has no logical counterpart.
    #[snafu(display("Unsupported Arrow type for column '{column}': {data_type}"))]
    UnsupportedArrowType {
        /// Column name that failed conversion.
        column: String,
        /// Arrow type rendered as text.
        data_type: String,
    },
}

impl LogicalSchema {
    /// Construct a validated logical schema (rejects duplicate column names).
    pub fn new(columns: Vec<LogicalField>) -> Result<Self, LogicalSchemaError> {
        let mut seen = HashSet::new();
        for col in &columns {
            if !seen.insert(col.name.as_str()) {
                return DuplicateColumnSnafu {
                    column: col.name.clone(),
                }
                .fail();
            }
        }
        Ok(Self { columns })
    }

    /// Derive a logical schema from an Arrow schema.
    pub fn from_arrow_schema(schema: &Schema) -> Result<Self, LogicalSchemaError> {
        let columns = schema
            .fields()
            .iter()
            .map(|f| {
                Ok(LogicalField {
                    name: f.name().clone(),
                    data_type: LogicalDataType::from_arrow_datatype(f.name(), f.data_type())?,
                    nullable: f.is_nullable(),
                })
            })
            .collect::<Result<Vec<_>, LogicalSchemaError>>()?;
        Self::new(columns)
    }

    /// Borrow the logical columns.
    pub fn columns(&self) -> &[LogicalField] {
        &self.columns
    }

    /// Look up a column by name.
    pub fn column(&self, name: &str) -> Option<&LogicalField> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Convert this logical schema to an owned Arrow [`Schema`].
    pub fn to_arrow_schema(&self) -> Schema {
        Schema::new(
            self.columns
                .iter()
                .map(|c| Field::new(c.name.clone(), c.data_type.to_arrow_datatype(), c.nullable))
                .collect::<Vec<_>>(),
        )
    }

    /// Convert this logical schema to a shared Arrow [`SchemaRef`].
    pub fn to_arrow_schema_ref(&self) -> SchemaRef {
        Arc::new(self.to_arrow_schema())
    }
}
