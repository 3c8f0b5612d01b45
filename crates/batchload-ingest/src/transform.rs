//! Per-record transformation applied before persistence

use batchload_common::Result;

use crate::record::Student;

/// Transformation applied to every record of a chunk, in read order
pub trait RecordTransformer: Send + Sync {
    fn transform(&self, record: Student) -> Result<Student>;
}

/// Drops any identifier carried by the input so storage assigns a fresh one
#[derive(Debug, Clone, Copy, Default)]
pub struct ClearIdTransformer;

impl RecordTransformer for ClearIdTransformer {
    fn transform(&self, mut record: Student) -> Result<Student> {
        record.id = None;
        Ok(record)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn student() -> impl Strategy<Value = Student> {
        (any::<Option<i64>>(), ".{0,16}", ".{0,16}", any::<i32>()).prop_map(
            |(id, first_name, last_name, age)| Student {
                id,
                first_name,
                last_name,
                age,
            },
        )
    }

    #[test]
    fn test_clears_input_id() {
        let out = ClearIdTransformer
            .transform(Student::new("Ann", "Lee", 30).with_id(1))
            .unwrap();
        assert_eq!(out, Student::new("Ann", "Lee", 30));
    }

    proptest! {
        #[test]
        fn prop_id_is_always_unassigned(input in student()) {
            let out = ClearIdTransformer.transform(input.clone()).unwrap();
            prop_assert_eq!(out.id, None);
            prop_assert_eq!(out.first_name, input.first_name);
            prop_assert_eq!(out.last_name, input.last_name);
            prop_assert_eq!(out.age, input.age);
        }

        #[test]
        fn prop_transform_is_idempotent(input in student()) {
            let once = ClearIdTransformer.transform(input).unwrap();
            let twice = ClearIdTransformer.transform(once.clone()).unwrap();
            prop_assert_eq!(once, twice);
        }
    }
}
