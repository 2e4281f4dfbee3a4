//! PostgreSQL Type OID Constants and the Arrow type mapping used by binary COPY.
//!
//! Reference: https://github.com/postgres/postgres/blob/master/src/include/catalog/pg_type.dat

use arrow::datatypes::DataType;

/// PostgreSQL Type OIDs
pub mod oid {
    // Boolean
    pub const BOOL: u32 = 16;

    // Bytes
    pub const BYTEA: u32 = 17;

    // Integers
    pub const INT8: u32 = 20; // bigint
    pub const INT2: u32 = 21; // smallint
    pub const INT4: u32 = 23; // integer

    // Text
    pub const TEXT: u32 = 25;

    // Float
    pub const FLOAT4: u32 = 700;
    pub const FLOAT8: u32 = 701;

    // Date/Time
    pub const DATE: u32 = 1082;
    pub const TIME: u32 = 1083;
    pub const TIMESTAMP: u32 = 1114;
    pub const TIMESTAMPTZ: u32 = 1184;

    // Anonymous composite
    pub const RECORD: u32 = 2249;

    // Arrays
    pub const BOOL_ARRAY: u32 = 1000;
    pub const BYTEA_ARRAY: u32 = 1001;
    pub const INT2_ARRAY: u32 = 1005;
    pub const INT4_ARRAY: u32 = 1007;
    pub const TEXT_ARRAY: u32 = 1009;
    pub const INT8_ARRAY: u32 = 1016;
    pub const FLOAT4_ARRAY: u32 = 1021;
    pub const FLOAT8_ARRAY: u32 = 1022;
    pub const TIMESTAMP_ARRAY: u32 = 1115;
    pub const DATE_ARRAY: u32 = 1182;
    pub const TIME_ARRAY: u32 = 1183;
    pub const TIMESTAMPTZ_ARRAY: u32 = 1185;
}

/// OID a scalar Arrow type is sent as in binary COPY.
///
/// Unsigned types widen to the next signed integer so every value fits,
/// except `UInt64` which is range-checked per value.
pub fn scalar_oid(data_type: &DataType) -> Option<u32> {
    let oid = match data_type {
        DataType::Boolean => oid::BOOL,
        DataType::Int8 | DataType::Int16 | DataType::UInt8 => oid::INT2,
        DataType::Int32 | DataType::UInt16 => oid::INT4,
        DataType::Int64 | DataType::UInt32 | DataType::UInt64 => oid::INT8,
        DataType::Float32 => oid::FLOAT4,
        DataType::Float64 => oid::FLOAT8,
        DataType::Utf8 | DataType::LargeUtf8 => oid::TEXT,
        DataType::Binary | DataType::LargeBinary | DataType::FixedSizeBinary(_) => oid::BYTEA,
        DataType::Date32 | DataType::Date64 => oid::DATE,
        DataType::Timestamp(_, None) => oid::TIMESTAMP,
        DataType::Timestamp(_, Some(_)) => oid::TIMESTAMPTZ,
        DataType::Time32(_) | DataType::Time64(_) => oid::TIME,
        _ => return None,
    };
    Some(oid)
}

/// Array OID for a given element OID.
pub fn array_oid(element: u32) -> Option<u32> {
    let oid = match element {
        oid::BOOL => oid::BOOL_ARRAY,
        oid::BYTEA => oid::BYTEA_ARRAY,
        oid::INT2 => oid::INT2_ARRAY,
        oid::INT4 => oid::INT4_ARRAY,
        oid::INT8 => oid::INT8_ARRAY,
        oid::TEXT => oid::TEXT_ARRAY,
        oid::FLOAT4 => oid::FLOAT4_ARRAY,
        oid::FLOAT8 => oid::FLOAT8_ARRAY,
        oid::DATE => oid::DATE_ARRAY,
        oid::TIME => oid::TIME_ARRAY,
        oid::TIMESTAMP => oid::TIMESTAMP_ARRAY,
        oid::TIMESTAMPTZ => oid::TIMESTAMPTZ_ARRAY,
        _ => return None,
    };
    Some(oid)
}

/// Element type of a list-like Arrow type.
pub fn list_element(data_type: &DataType) -> Option<&DataType> {
    match data_type {
        DataType::List(field) | DataType::LargeList(field) | DataType::FixedSizeList(field, _) => {
            Some(field.data_type())
        }
        _ => None,
    }
}

/// OID for a column in binary COPY: a scalar, a one-dimensional array of
/// scalars, or a record of those. `None` means the column needs the text format.
pub fn pg_type_oid(data_type: &DataType) -> Option<u32> {
    match data_type {
        DataType::Struct(fields) => fields
            .iter()
            .all(|f| field_oid(f.data_type()).is_some())
            .then_some(oid::RECORD),
        _ => field_oid(data_type),
    }
}

/// OID for a value inside a record or an array.
///
/// Composites are excluded: the server checks each element and field oid
/// against the declared type, which an anonymous `record` never matches.
pub fn field_oid(data_type: &DataType) -> Option<u32> {
    match list_element(data_type) {
        Some(element) => scalar_oid(element).and_then(array_oid),
        None => scalar_oid(data_type),
    }
}
