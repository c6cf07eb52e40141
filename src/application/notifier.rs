// Notification collaborator - user-visible failure messages
pub trait Notifier: Send + Sync {
    fn notify_failure(&self, message: &str);
}
