//! Prepared query container.
use std::sync::atomic::{AtomicU32, Ordering};

/// A named statement with its bound parameters.
///
/// ```
/// use pqwire::PreparedQuery;
///
/// let query = PreparedQuery::new("by_id", "select $1::int4 + $2")
///     .bind(41)
///     .bind("1");
/// assert_eq!(query.portal(), "by_idport");
/// assert_eq!(query.params(), [Some("41".to_owned()), Some("1".to_owned())]);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedQuery {
    name: String,
    portal: String,
    sql: String,
    params: Vec<Option<String>>,
}

impl PreparedQuery {
    /// Suffix appended to statement name to form its portal name.
    pub const PORTAL_SUFFIX: &'static str = "port";

    /// Create named statement.
    ///
    /// Empty `name` selects the unnamed statement and portal.
    pub fn new(name: impl Into<String>, sql: impl Into<String>) -> PreparedQuery {
        let name = name.into();
        let portal = match name.is_empty() {
            true => String::new(),
            false => format!("{name}{}", Self::PORTAL_SUFFIX),
        };
        PreparedQuery { name, portal, sql: sql.into(), params: vec![] }
    }

    /// Create statement with generated unique name.
    pub fn generated(sql: impl Into<String>) -> PreparedQuery {
        static ID: AtomicU32 = AtomicU32::new(0);
        let id = ID.fetch_add(1, Ordering::Relaxed);
        let mut buf = itoa::Buffer::new();
        Self::new(format!("q{}", buf.format(id)), sql)
    }

    /// Create the unnamed statement.
    pub fn unnamed(sql: impl Into<String>) -> PreparedQuery {
        Self::new("", sql)
    }

    /// Statement name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Portal name, empty for the unnamed statement.
    pub fn portal(&self) -> &str {
        &self.portal
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Textual parameter values, `None` is sql `NULL`.
    pub fn params(&self) -> &[Option<String>] {
        &self.params
    }

    /// Bind next parameter.
    pub fn bind<V: BindValue>(mut self, value: V) -> PreparedQuery {
        self.params.push(value.to_param());
        self
    }

    /// Bind sql `NULL` as next parameter.
    pub fn bind_null(mut self) -> PreparedQuery {
        self.params.push(None);
        self
    }

    /// Remove bound parameters, to execute again with other values.
    pub fn clear_params(&mut self) {
        self.params.clear();
    }

    /// Bind next parameter by reference.
    pub fn push<V: BindValue>(&mut self, value: V) {
        self.params.push(value.to_param());
    }
}

/// Type that can be sent as text formatted parameter.
pub trait BindValue {
    /// Text representation, `None` is sql `NULL`.
    fn to_param(&self) -> Option<String>;
}

impl<T: BindValue + ?Sized> BindValue for &T {
    fn to_param(&self) -> Option<String> {
        T::to_param(self)
    }
}

impl<T: BindValue> BindValue for Option<T> {
    fn to_param(&self) -> Option<String> {
        self.as_ref().and_then(T::to_param)
    }
}

impl BindValue for str {
    fn to_param(&self) -> Option<String> {
        Some(self.to_owned())
    }
}

impl BindValue for String {
    fn to_param(&self) -> Option<String> {
        Some(self.clone())
    }
}

impl BindValue for bool {
    fn to_param(&self) -> Option<String> {
        Some(if *self { "t" } else { "f" }.to_owned())
    }
}

macro_rules! bind_int {
    ($($ty:ty),*) => {$(
        impl BindValue for $ty {
            fn to_param(&self) -> Option<String> {
                Some(itoa::Buffer::new().format(*self).to_owned())
            }
        }
    )*};
}

bind_int!(i8, i16, i32, i64, u8, u16, u32, u64);

macro_rules! bind_float {
    ($($ty:ty),*) => {$(
        impl BindValue for $ty {
            fn to_param(&self) -> Option<String> {
                let text = match *self {
                    f if f.is_nan() => "NaN".to_owned(),
                    f if f == <$ty>::INFINITY => "Infinity".to_owned(),
                    f if f == <$ty>::NEG_INFINITY => "-Infinity".to_owned(),
                    f => f.to_string(),
                };
                Some(text)
            }
        }
    )*};
}

bind_float!(f32, f64);
