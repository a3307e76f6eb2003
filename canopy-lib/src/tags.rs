use crate::validation::check_control_leading_trailing;

pub const MAX_TAG_CHARS: usize = 128;

/// tag names are case sensitive and compared as given
pub fn name_valid(given: &str) -> bool {
    !given.is_empty() && check_control_leading_trailing(given, Some(MAX_TAG_CHARS))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn name_validation() {
        let valid = [
            String::from("holiday"),
            String::from("i am also a tag 😈"),
        ];

        for test in valid {
            assert!(name_valid(&test), "valid string failed {:?}", test);
        }

        let invalid = [
            String::new(),
            String::from(" padded "),
            crate::string_to_len(MAX_TAG_CHARS + 1),
        ];

        for test in invalid {
            assert!(!name_valid(&test), "invalid string failed {:?}", test);
        }
    }
}
