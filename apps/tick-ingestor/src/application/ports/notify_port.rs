//! Notifier Port (Driven Port)
//!
//! Operator notification for session start, batch loss and abnormal
//! termination. Not on the correctness-critical path: implementations
//! must return immediately and swallow their own failures.

/// Fire-and-forget operator notification.
#[cfg_attr(test, mockall::automock)]
pub trait Notifier: Send + Sync {
    /// Send a notification.
    fn notify(&self, subject: &str, body: &str);
}
