//! Step cursor - decides which pipe runs next

/// Cursor over the ordered step list of one invocation
#[derive(Debug, Clone)]
pub struct StepCursor {
    len: usize,
    next: usize,
    /// The error handler is current
    error_routed: bool,
    last_step: Option<usize>,
}

impl StepCursor {
    pub fn new(len: usize) -> Self {
        Self {
            len,
            next: 0,
            error_routed: false,
            last_step: None,
        }
    }

    /// Index of the last ordinary step that started
    pub fn last_step(&self) -> Option<usize> {
        self.last_step
    }

    /// Move to the next ordinary step; `None` once the list is exhausted
    ///
    /// After the error handler ran, this resumes after the step that faulted.
    pub fn advance(&mut self) -> Option<usize> {
        self.error_routed = false;
        if self.next < self.len {
            let idx = self.next;
            self.next += 1;
            self.last_step = Some(idx);
            Some(idx)
        } else {
            None
        }
    }

    pub fn route_error(&mut self) {
        self.error_routed = true;
    }

    pub fn is_error_routed(&self) -> bool {
        self.error_routed
    }
}
