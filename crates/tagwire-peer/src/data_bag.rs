use std::any::Any;
use std::collections::HashMap;
use std::fmt;

/// Per-connection store of arbitrary values keyed by name.
///
/// Handlers use it to remember things about a peer between messages, such
/// as the permissions granted at login.
#[derive(Default)]
pub struct DataBag {
    entries: HashMap<String, Box<dyn Any + Send + Sync>>,
}

impl DataBag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a value, replacing anything under the same key.
    /// Returns true if a previous value was replaced.
    pub fn put<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) -> bool {
        self.entries.insert(key.into(), Box::new(value)).is_some()
    }

    /// Borrow a value if it exists and has type `T`.
    pub fn get<T: Any>(&self, key: &str) -> Option<&T> {
        self.entries.get(key)?.downcast_ref::<T>()
    }

    pub fn get_mut<T: Any>(&mut self, key: &str) -> Option<&mut T> {
        self.entries.get_mut(key)?.downcast_mut::<T>()
    }

    /// A copy of the value, or `default` when missing or of another type.
    pub fn get_or<T: Any + Clone>(&self, key: &str, default: T) -> T {
        self.get::<T>(key).cloned().unwrap_or(default)
    }

    /// Remove and return a value of type `T`. A value of another type is
    /// left in place.
    pub fn take<T: Any>(&mut self, key: &str) -> Option<T> {
        if !self.entries.get(key)?.is::<T>() {
            return None;
        }
        let boxed = self.entries.remove(key)?;
        boxed.downcast::<T>().ok().map(|value| *value)
    }

    pub fn remove(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

impl fmt::Debug for DataBag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<&str> = self.keys().collect();
        keys.sort_unstable();
        f.debug_struct("DataBag").field("keys", &keys).finish()
    }
}
