use biometrics::{Collector, Counter, Moments};

pub(crate) static CLIENT_REQUESTS: Counter = Counter::new("obelisca.client.requests");
pub(crate) static CLIENT_REQUEST_ERRORS: Counter = Counter::new("obelisca.client.request_errors");
pub(crate) static CLIENT_REQUEST_DURATION: Moments =
    Moments::new("obelisca.client.request_duration_seconds");
pub(crate) static CLIENT_TOTAL_TOKENS: Counter = Counter::new("obelisca.client.total_tokens");

pub(crate) static SESSION_MESSAGES: Counter = Counter::new("obelisca.session.messages");
pub(crate) static SESSION_TRIMMED_MESSAGES: Counter =
    Counter::new("obelisca.session.trimmed_messages");

pub(crate) static ATTACHMENTS_READ: Counter = Counter::new("obelisca.attachments.read");
pub(crate) static ATTACHMENTS_SKIPPED: Counter = Counter::new("obelisca.attachments.skipped");
pub(crate) static ATTACHMENT_BYTES: Counter = Counter::new("obelisca.attachments.bytes");

pub(crate) static STORE_WRITES: Counter = Counter::new("obelisca.store.writes");
pub(crate) static STORE_ERRORS: Counter = Counter::new("obelisca.store.errors");

/// Register this crate's biometrics with the provided collector.
pub fn register_biometrics(collector: Collector) {
    collector.register_counter(&CLIENT_REQUESTS);
    collector.register_counter(&CLIENT_REQUEST_ERRORS);
    collector.register_moments(&CLIENT_REQUEST_DURATION);
    collector.register_counter(&CLIENT_TOTAL_TOKENS);

    collector.register_counter(&SESSION_MESSAGES);
    collector.register_counter(&SESSION_TRIMMED_MESSAGES);

    collector.register_counter(&ATTACHMENTS_READ);
    collector.register_counter(&ATTACHMENTS_SKIPPED);
    collector.register_counter(&ATTACHMENT_BYTES);

    collector.register_counter(&STORE_WRITES);
    collector.register_counter(&STORE_ERRORS);
}
