//! Subject naming for the NATS buses.
//!
//! Queue subjects carry one normalized event each; realtime subjects fan
//! notifications out to connected viewers.

use uuid::Uuid;

use crate::Platform;

/// Durable queue subject for an inbound event:
/// `odm.msg.in.{tenant}.{platform}.{sender}`.
pub fn queue_subject(tenant: &str, platform: Platform, sender: &str) -> String {
    format!(
        "odm.msg.in.{tenant}.{platform}.{sender}",
        platform = platform.as_str()
    )
}

/// Tenant-scope realtime subject: every viewer of the tenant's inbox.
pub fn realtime_tenant_subject(tenant: &str) -> String {
    format!("odm.rt.tenant.{tenant}")
}

/// Conversation-scope realtime subject: viewers of one thread.
pub fn realtime_conversation_subject(conversation_id: Uuid) -> String {
    format!("odm.rt.convo.{conversation_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subjects_are_stable() {
        assert_eq!(
            queue_subject("acme", Platform::Messenger, "psid-1"),
            "odm.msg.in.acme.messenger.psid-1"
        );
        assert_eq!(realtime_tenant_subject("acme"), "odm.rt.tenant.acme");
        let id = Uuid::nil();
        assert_eq!(
            realtime_conversation_subject(id),
            format!("odm.rt.convo.{id}")
        );
    }
}
