//! Caller-supplied checks that run after the level checks.

use std::sync::Arc;

use super::response::Verdict;

/// A pure extra check on accepted text.
pub trait CustomValidator: Send + Sync {
    fn check(&self, text: &str) -> Verdict;
}

impl<F> CustomValidator for F
where
    F: Fn(&str) -> Verdict + Send + Sync,
{
    fn check(&self, text: &str) -> Verdict {
        self(text)
    }
}

/// Shared handle stored on a request.
pub type SharedValidator = Arc<dyn CustomValidator>;

/// Accept translations whose length is 80-125 % of the original's.
///
/// `original_len` is in characters. An empty original rejects everything.
pub fn translation_validator(original_len: usize) -> impl CustomValidator {
    move |text: &str| {
        let ratio = if original_len == 0 {
            0.0
        } else {
            text.chars().count() as f64 / original_len as f64
        };
        if (0.8..=1.25).contains(&ratio) {
            Verdict::accept()
        } else {
            Verdict::reject(format!("length_ratio_out_of_range ({:.1}%)", ratio * 100.0))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_translation_ratio_bounds() {
        let check = translation_validator(100);
        assert!(check.check(&"a".repeat(80)).accepted);
        assert!(check.check(&"a".repeat(125)).accepted);
        assert_eq!(
            check.check(&"a".repeat(79)).reason,
            "length_ratio_out_of_range (79.0%)"
        );
        assert_eq!(
            check.check(&"a".repeat(126)).reason,
            "length_ratio_out_of_range (126.0%)"
        );
    }

    #[test]
    fn test_zero_original_rejects() {
        assert!(!translation_validator(0).check("anything").accepted);
    }

    #[test]
    fn test_closure_validator() {
        let no_lorem = |text: &str| {
            if text.contains("lorem") {
                Verdict::reject("placeholder_text")
            } else {
                Verdict::accept()
            }
        };
        let shared: SharedValidator = Arc::new(no_lorem);
        assert_eq!(shared.check("lorem ipsum").reason, "placeholder_text");
        assert!(shared.check("real text").accepted);
    }
}
