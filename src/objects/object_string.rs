use crate::objects::object::{Object, ObjectType};

/// FNV-1a, the hash the intern table and every string key use.
pub fn hash_string(bytes: &[u8]) -> u32 {
    let mut hash: u32 = 2166136261;
    for byte in bytes {
        hash ^= *byte as u32;
        hash = hash.wrapping_mul(16777619);
    }
    hash
}

#[repr(C)]
pub struct ObjectString {
    pub object: Object,
    pub content: String,
    pub hash: u32,
}

impl ObjectString {
    pub fn new(content: &str, hash: u32) -> Box<ObjectString> {
        Box::new(ObjectString {
            object: Object::new(ObjectType::ObjString),
            content: content.to_string(),
            hash,
        })
    }
}

#[cfg(feature = "debug_trace_object")]
mod debug_feature {
    use super::ObjectString;

    impl Drop for ObjectString {
        fn drop(&mut self) {
            println!("drop string object: content={}", self.content);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::hash_string;

    #[test]
    fn test_fnv1a_basis() {
        assert_eq!(hash_string(b""), 2166136261);
    }

    #[test]
    fn test_distinct_contents_hash_differently() {
        assert_ne!(hash_string(b"init"), hash_string(b"tini"));
        assert_ne!(hash_string(b"a"), hash_string(b"b"));
    }

    #[test]
    fn test_hash_is_stable() {
        assert_eq!(hash_string(b"clock"), hash_string(b"clock"));
    }
}
