//! Progress reporting.
//!
//! Long operations poll a caller-supplied reporter.  There is no
//! cancellation flag; callers abort by dropping the operation, which rolls
//! back through the normal cleanup paths.

pub trait Progress {
    fn update(&self, message: &str, current: usize, total: usize);

    fn clear(&self) {}
}

/// A reporter that swallows everything.
#[derive(Default)]
pub struct SilentProgress;

impl Progress for SilentProgress {
    fn update(&self, _message: &str, _current: usize, _total: usize) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    pub struct RecordingProgress(pub RefCell<Vec<String>>);

    impl Progress for RecordingProgress {
        fn update(&self, message: &str, current: usize, total: usize) {
            self.0
                .borrow_mut()
                .push(format!("{} {}/{}", message, current, total));
        }
    }

    #[test]
    fn test_recording() {
        let p = RecordingProgress(RefCell::new(vec![]));
        p.update("apply phase", 0, 2);
        assert_eq!(p.0.borrow().as_slice(), ["apply phase 0/2"]);
    }
}
