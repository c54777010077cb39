use std::collections::HashMap;
use std::collections::HashSet;

pub mod serde_helpers;
pub mod test;
pub mod time;

pub type FastHashMap<K, V> = HashMap<K, V, ahash::RandomState>;
pub type FastHashSet<K> = HashSet<K, ahash::RandomState>;
