//! Result accumulation.
//!
//! - [`ResultSink`]
//! - [`ResultSet`]
//! - [`RecordSet`]
//! - [`Record`]
//!
//! The protocol state machine feeds a [`ResultSink`] as messages stream in.
//! [`ResultSet`] is the provided sink, decoding each column with a
//! [`DecodeTable`] supplied by the caller.
use std::{ops, sync::Arc};

use crate::postgres::{FieldSpec, Oid, PgFormat, SqlError};

mod decode;
mod value;

pub use decode::{DecodeError, DecodeTable, Decoder};
pub use value::{FromValue, Value};

/// Receiver of query results.
///
/// Calls for one statement are, in order: [`begin_result`][1] or
/// [`begin_error`][2], then for each row [`add_row`][3] followed by
/// [`add_column`][4] for each column, then [`complete`][5].
///
/// [1]: ResultSink::begin_result
/// [2]: ResultSink::begin_error
/// [3]: ResultSink::add_row
/// [4]: ResultSink::add_column
/// [5]: ResultSink::complete
pub trait ResultSink {
    /// Start a new statement result.
    fn begin_result(&mut self, fields: Vec<FieldSpec>);

    /// Statement failed with server error.
    fn begin_error(&mut self, error: SqlError);

    /// Start a new row in the current result.
    fn add_row(&mut self);

    /// Add column to the current row, `None` is sql `NULL`.
    ///
    /// Returned error is reported after the server finish sending the result.
    fn add_column(&mut self, index: usize, raw: Option<&[u8]>) -> Result<(), DecodeError>;

    /// Statement completed with command tag.
    fn complete(&mut self, tag: &str) {
        let _ = tag;
    }

    /// Parameter types of a described statement.
    fn parameter_types(&mut self, oids: &[Oid]) {
        let _ = oids;
    }
}

/// Discard all results.
impl ResultSink for () {
    fn begin_result(&mut self, _: Vec<FieldSpec>) { }

    fn begin_error(&mut self, _: SqlError) { }

    fn add_row(&mut self) { }

    fn add_column(&mut self, _: usize, _: Option<&[u8]>) -> Result<(), DecodeError> {
        Ok(())
    }
}

impl<S: ResultSink + ?Sized> ResultSink for &mut S {
    fn begin_result(&mut self, fields: Vec<FieldSpec>) {
        S::begin_result(self, fields);
    }

    fn begin_error(&mut self, error: SqlError) {
        S::begin_error(self, error);
    }

    fn add_row(&mut self) {
        S::add_row(self);
    }

    fn add_column(&mut self, index: usize, raw: Option<&[u8]>) -> Result<(), DecodeError> {
        S::add_column(self, index, raw)
    }

    fn complete(&mut self, tag: &str) {
        S::complete(self, tag);
    }

    fn parameter_types(&mut self, oids: &[Oid]) {
        S::parameter_types(self, oids);
    }
}

/// All statement results of one exec call.
#[derive(Debug)]
pub struct ResultSet {
    table: Arc<DecodeTable>,
    sets: Vec<RecordSet>,
    /// Last set still receives rows.
    open: bool,
    parameter_types: Vec<Oid>,
}

impl ResultSet {
    /// Empty result set decoding with `table`.
    pub fn new(table: Arc<DecodeTable>) -> ResultSet {
        ResultSet { table, sets: vec![], open: false, parameter_types: vec![] }
    }

    pub fn decode_table(&self) -> &Arc<DecodeTable> {
        &self.table
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&RecordSet> {
        self.sets.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, RecordSet> {
        self.sets.iter()
    }

    /// Returns `true` if every statement succeeded.
    pub fn is_success(&self) -> bool {
        self.sets.iter().all(RecordSet::is_success)
    }

    /// Parameter types reported for the last described statement.
    pub fn parameter_types(&self) -> &[Oid] {
        &self.parameter_types
    }

    pub fn into_inner(self) -> Vec<RecordSet> {
        self.sets
    }

    /// Current open set, or a new one without field description.
    fn current(&mut self) -> &mut RecordSet {
        if !self.open {
            self.sets.push(RecordSet::new(vec![]));
            self.open = true;
        }
        let last = self.sets.len() - 1;
        &mut self.sets[last]
    }
}

impl Default for ResultSet {
    fn default() -> Self {
        Self::new(Arc::new(DecodeTable::new()))
    }
}

impl ResultSink for ResultSet {
    fn begin_result(&mut self, fields: Vec<FieldSpec>) {
        self.sets.push(RecordSet::new(fields));
        self.open = true;
    }

    fn begin_error(&mut self, error: SqlError) {
        // an error may abort a statement that already sent rows
        if self.open {
            self.sets.pop();
        }
        self.sets.push(RecordSet::from_error(error));
        self.open = false;
    }

    fn add_row(&mut self) {
        self.current().rows.push(Record::default());
    }

    fn add_column(&mut self, index: usize, raw: Option<&[u8]>) -> Result<(), DecodeError> {
        let table = self.table.clone();
        let set = self.current();

        let (oid, format) = match set.fields.get(index) {
            Some(field) => (field.type_oid, field.pg_format()),
            None => (0, Some(PgFormat::Text)),
        };

        let result = match (raw, format) {
            (None, _) => Ok(Value::Null),
            (Some(raw), Some(PgFormat::Text)) => table.decode(oid, raw),
            (Some(_), _) => Err(DecodeError::UnsupportedFormat { column: index, oid }),
        };

        if set.rows.is_empty() {
            set.rows.push(Record::default());
        }
        let last = set.rows.len() - 1;
        let row = &mut set.rows[last];

        match result {
            Ok(value) => {
                row.values.push(value);
                Ok(())
            },
            Err(err) => {
                // keep column position
                row.values.push(Value::Null);
                Err(err)
            },
        }
    }

    fn complete(&mut self, tag: &str) {
        self.current().tag = Some(tag.to_owned());
        self.open = false;
    }

    fn parameter_types(&mut self, oids: &[Oid]) {
        self.parameter_types = oids.to_vec();
    }
}

impl ops::Index<usize> for ResultSet {
    type Output = RecordSet;

    fn index(&self, index: usize) -> &Self::Output {
        &self.sets[index]
    }
}

impl<'a> IntoIterator for &'a ResultSet {
    type Item = &'a RecordSet;

    type IntoIter = std::slice::Iter<'a, RecordSet>;

    fn into_iter(self) -> Self::IntoIter {
        self.sets.iter()
    }
}

/// One statement result, either rows or server error.
#[derive(Debug, Clone, Default)]
pub struct RecordSet {
    fields: Vec<FieldSpec>,
    rows: Vec<Record>,
    error: Option<SqlError>,
    tag: Option<String>,
}

impl RecordSet {
    pub fn new(fields: Vec<FieldSpec>) -> RecordSet {
        RecordSet { fields, ..Default::default() }
    }

    pub fn from_error(error: SqlError) -> RecordSet {
        RecordSet { error: Some(error), ..Default::default() }
    }

    /// Returns `false` if server reported error with `CODE` other than `00000`.
    pub fn is_success(&self) -> bool {
        self.error.as_ref().is_none_or(SqlError::is_success)
    }

    pub fn error(&self) -> Option<&SqlError> {
        self.error.as_ref()
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn rows(&self) -> &[Record] {
        &self.rows
    }

    /// Command tag, e.g. `SELECT 1`.
    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    /// Row count from the command tag.
    ///
    /// Returns `0` for command that does not report row count.
    pub fn rows_affected(&self) -> u64 {
        self.tag
            .as_deref()
            .and_then(|tag| tag.rsplit(' ').next())
            .and_then(|count| count.parse().ok())
            .unwrap_or(0)
    }

    /// Column position by name or index.
    pub fn column<I: ColumnIndex>(&self, index: I) -> Result<usize, DecodeError> {
        index.position(&self.fields)
    }

    /// Get and convert value at `row` and `column`.
    pub fn get<T: FromValue, I: ColumnIndex>(&self, row: usize, column: I) -> Result<T, DecodeError> {
        let column = self.column(column)?;
        let record = self.rows.get(row).ok_or(DecodeError::IndexOutOfBounds(row))?;
        record.try_get(column)
    }
}

/// A decoded row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    values: Vec<Value>,
}

impl Record {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Get and convert value at `index`.
    pub fn try_get<T: FromValue>(&self, index: usize) -> Result<T, DecodeError> {
        self.values.get(index).ok_or(DecodeError::IndexOutOfBounds(index))?.decode()
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

impl ops::Index<usize> for Record {
    type Output = Value;

    fn index(&self, index: usize) -> &Self::Output {
        &self.values[index]
    }
}

/// Type that can be used for indexing column.
pub trait ColumnIndex: sealed::Sealed {
    /// Returns the column position.
    fn position(self, fields: &[FieldSpec]) -> Result<usize, DecodeError>;
}

impl ColumnIndex for usize {
    fn position(self, fields: &[FieldSpec]) -> Result<usize, DecodeError> {
        match self < fields.len() {
            true => Ok(self),
            false => Err(DecodeError::IndexOutOfBounds(self)),
        }
    }
}

impl ColumnIndex for &str {
    fn position(self, fields: &[FieldSpec]) -> Result<usize, DecodeError> {
        fields
            .iter()
            .position(|f| f.name == self)
            .ok_or_else(|| DecodeError::ColumnNotFound(String::from(self).into()))
    }
}

mod sealed {
    pub trait Sealed { }
    impl Sealed for usize { }
    impl Sealed for &str { }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{common::ByteStr, postgres::pg_type};

    fn field(name: &'static str, type_oid: Oid, format: i16) -> FieldSpec {
        FieldSpec {
            name: ByteStr::from_static(name),
            table_oid: 0,
            column: 0,
            type_oid,
            type_size: -1,
            type_modifier: -1,
            format,
        }
    }

    #[test]
    fn success_predicate() {
        assert!(RecordSet::new(vec![]).is_success());
        assert!(RecordSet::from_error(SqlError::success()).is_success());
        let mut err = SqlError::success();
        err.insert(SqlError::CODE, "42601");
        assert!(!RecordSet::from_error(err).is_success());
    }

    #[test]
    fn accumulate_rows() {
        let mut rs = ResultSet::default();
        rs.begin_result(vec![field("abc", pg_type::TEXT, 0), field("n", pg_type::INT4, 0)]);
        rs.add_row();
        rs.add_column(0, Some(b"Ok")).unwrap();
        rs.add_column(1, None).unwrap();
        rs.complete("SELECT 1");

        assert_eq!(rs.len(), 1);
        let set = &rs[0];
        assert_eq!(set.rows().len(), 1);
        assert_eq!(set.get::<String, _>(0, "abc").unwrap(), "Ok");
        assert_eq!(set.get::<Option<i32>, _>(0, 1).unwrap(), None);
        assert_eq!(set.rows_affected(), 1);
        assert!(matches!(set.get::<String, _>(0, "missing"), Err(DecodeError::ColumnNotFound(_))));
        assert!(matches!(set.get::<String, _>(1, 0), Err(DecodeError::IndexOutOfBounds(1))));
    }

    #[test]
    fn unknown_type_falls_back_to_text() {
        let mut rs = ResultSet::default();
        rs.begin_result(vec![field("v", 650 /* cidr */, 0)]);
        rs.add_row();
        rs.add_column(0, Some(b"10.0.0.0/8")).unwrap();
        assert_eq!(rs[0].rows()[0][0], Value::Text("10.0.0.0/8".into()));
    }

    #[test]
    fn binary_format_is_recoverable_error() {
        let mut rs = ResultSet::default();
        rs.begin_result(vec![field("n", pg_type::INT4, 1), field("s", pg_type::TEXT, 0)]);
        rs.add_row();
        let err = rs.add_column(0, Some(&[0, 0, 0, 1])).unwrap_err();
        assert!(matches!(err, DecodeError::UnsupportedFormat { column: 0, oid: 23 }));
        rs.add_column(1, Some(b"still here")).unwrap();
        assert_eq!(rs[0].rows()[0].values(), [Value::Null, Value::Text("still here".into())]);
    }

    #[test]
    fn custom_decode_table() {
        let table = DecodeTable::empty().with(pg_type::INT4, |raw| Ok(Value::Bytes(raw.to_vec())));
        let mut rs = ResultSet::new(Arc::new(table));
        rs.begin_result(vec![field("n", pg_type::INT4, 0)]);
        rs.add_row();
        rs.add_column(0, Some(b"7")).unwrap();
        assert_eq!(rs[0].rows()[0][0], Value::Bytes(b"7".to_vec()));
    }

    #[test]
    fn one_entry_per_statement() {
        let mut rs = ResultSet::default();
        // INSERT has no row description
        rs.complete("INSERT 0 3");
        rs.begin_result(vec![field("a", pg_type::INT4, 0)]);
        rs.add_row();
        rs.add_column(0, Some(b"1")).unwrap();
        // error after some rows replaces the partial result
        let mut err = SqlError::success();
        err.insert(SqlError::CODE, "22012");
        rs.begin_error(err);

        assert_eq!(rs.len(), 2);
        assert_eq!(rs[0].rows_affected(), 3);
        assert!(rs[0].fields().is_empty());
        assert!(!rs[1].is_success());
        assert!(rs[1].rows().is_empty());
        assert!(!rs.is_success());
    }
}
