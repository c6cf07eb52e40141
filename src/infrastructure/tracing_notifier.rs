// Notifier that reports user-visible failures through the log
use crate::application::notifier::Notifier;

#[derive(Debug, Clone, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify_failure(&self, message: &str) {
        tracing::warn!(target: "finance_dashboard::notify", "{}", message);
    }
}
