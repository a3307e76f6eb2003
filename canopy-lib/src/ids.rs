pub type NodeId = i64;
pub type NodeKey = String;
pub type CollectionId = i64;
pub type CollectionKey = String;
pub type TagId = i64;
pub type VersionedId = String;
pub type LogId = i64;
pub type UserRef = String;

pub fn create_key() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// the wire format uses an empty string for "no parent". this collapses
/// both representations into an Option
pub fn parent_key(given: Option<&str>) -> Option<&str> {
    match given {
        Some(v) if !v.is_empty() => Some(v),
        _ => None,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn unique_keys() {
        let a = create_key();
        let b = create_key();

        assert_ne!(a, b);
        assert_eq!(a.len(), 36, "unexpected key length {:?}", a);
    }

    #[test]
    fn empty_parent_is_top_level() {
        assert_eq!(parent_key(None), None);
        assert_eq!(parent_key(Some("")), None);
        assert_eq!(parent_key(Some("abc")), Some("abc"));
    }
}
