//! Item weight accounting.

/// Byte weight of an item, used for batch and buffer size accounting.
///
/// The weight does not need to be the exact serialized size; it only has to
/// track payload size closely enough to keep transport requests bounded.
pub trait Weighted {
    fn weight(&self) -> usize;
}

impl Weighted for String {
    fn weight(&self) -> usize {
        self.len()
    }
}

impl Weighted for Vec<u8> {
    fn weight(&self) -> usize {
        self.len()
    }
}

impl Weighted for serde_json::Value {
    fn weight(&self) -> usize {
        match self {
            serde_json::Value::String(s) => s.len(),
            serde_json::Value::Null => 0,
            other => other.to_string().len(),
        }
    }
}

impl<T: Weighted + ?Sized> Weighted for Box<T> {
    fn weight(&self) -> usize {
        (**self).weight()
    }
}

impl<T: Weighted + ?Sized> Weighted for std::sync::Arc<T> {
    fn weight(&self) -> usize {
        (**self).weight()
    }
}
