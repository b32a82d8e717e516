//! Shared plumbing for the two Meta-family platforms (Messenger and
//! Instagram DMs): both deliver `entry[].messaging[]` webhook batches and
//! send through the Graph `me/messages` endpoint.

use odm_core::{Connection, EventKind, InboundEvent, OutboundMessage, Platform, SendReceipt};
use serde_json::{Value, json};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::debug;

use crate::errors::{ParseError, SendError};

pub(crate) const GRAPH_API_BASE: &str = "https://graph.facebook.com";
const GRAPH_API_VERSION: &str = "v19.0";

/// Walks a Meta webhook batch into normalized events. Echoes of our own
/// outbound messages are dropped here.
pub(crate) fn parse_events(
    platform: Platform,
    tenant: &str,
    body: &[u8],
    expected_object: &str,
) -> Result<Vec<InboundEvent>, ParseError> {
    let payload: Value = serde_json::from_slice(body)?;
    let object = payload.get("object").and_then(|v| v.as_str()).unwrap_or("");
    if object != expected_object {
        return Err(ParseError::Unsupported(format!(
            "expected object `{expected_object}`, got `{object}`"
        )));
    }

    let mut out = Vec::new();
    let Some(entries) = payload.get("entry").and_then(|v| v.as_array()) else {
        return Ok(out);
    };
    for entry in entries {
        let account_id = entry.get("id").and_then(|v| v.as_str()).unwrap_or("");
        let Some(messaging) = entry.get("messaging").and_then(|v| v.as_array()) else {
            continue;
        };
        for item in messaging {
            if let Some(event) = event_from_messaging(platform, tenant, account_id, item) {
                out.push(event);
            }
        }
    }
    Ok(out)
}

fn event_from_messaging(
    platform: Platform,
    tenant: &str,
    account_id: &str,
    item: &Value,
) -> Option<InboundEvent> {
    let sender = item
        .get("sender")
        .and_then(|s| s.get("id"))
        .and_then(|v| v.as_str())?
        .to_string();
    let timestamp = item
        .get("timestamp")
        .and_then(|v| v.as_i64())
        .map(format_ms_timestamp)
        .unwrap_or_else(now_rfc3339);

    let mut event = InboundEvent {
        tenant: tenant.to_string(),
        platform,
        connection_external_id: account_id.to_string(),
        sender_external_id: sender,
        kind: EventKind::Other,
        text: None,
        attachment_url: None,
        platform_message_id: None,
        timestamp,
        profile: None,
        payload: item.clone(),
    };

    if let Some(message) = item.get("message") {
        if message
            .get("is_echo")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
        {
            debug!(platform = %platform, "dropping echo of our own message");
            return None;
        }
        event.platform_message_id = message
            .get("mid")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        if let Some(url) = first_attachment_url(message) {
            event.kind = EventKind::Attachment;
            event.attachment_url = Some(url);
            event.text = message
                .get("text")
                .and_then(|v| v.as_str())
                .map(str::to_string);
        } else if let Some(text) = message.get("text").and_then(|v| v.as_str()) {
            event.kind = EventKind::Text;
            event.text = Some(text.to_string());
        }
        return Some(event);
    }

    if let Some(postback) = item.get("postback") {
        event.kind = EventKind::Postback;
        event.text = postback
            .get("title")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        return Some(event);
    }

    if item.get("delivery").is_some() {
        event.kind = EventKind::Delivery;
        return Some(event);
    }
    if item.get("read").is_some() {
        event.kind = EventKind::Read;
        return Some(event);
    }
    if let Some(reaction) = item.get("reaction") {
        event.kind = EventKind::Reaction;
        event.platform_message_id = reaction
            .get("mid")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        return Some(event);
    }

    Some(event)
}

fn first_attachment_url(message: &Value) -> Option<String> {
    message
        .get("attachments")
        .and_then(|v| v.as_array())
        .and_then(|list| list.first())
        .and_then(|att| att.get("payload"))
        .and_then(|p| p.get("url"))
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

/// Sends one message through the Graph `me/messages` endpoint.
pub(crate) async fn send_graph_message(
    client: &reqwest::Client,
    api_base: &str,
    code_prefix: &str,
    connection: &Connection,
    message: &OutboundMessage,
) -> Result<SendReceipt, SendError> {
    let token = connection.credential.as_deref().filter(|t| !t.is_empty()).ok_or_else(|| {
        SendError::permanent(
            format!("{code_prefix}_missing_credential"),
            "connection has no outbound credential",
        )
    })?;

    let body = build_graph_payload(code_prefix, message)?;

    if let Some(scenario) = api_base.strip_prefix("mock://") {
        return match scenario {
            "success" => Ok(SendReceipt {
                platform_message_id: format!("mid.mock.{}", message.correlation_id),
                raw: body,
            }),
            "throttle" => Err(SendError::retryable(
                format!("{code_prefix}_retryable"),
                "mock throttled",
                Some(1_000),
            )),
            other => Err(SendError::permanent(
                format!("{code_prefix}_mock"),
                format!("unknown mock scenario `{other}`"),
            )),
        };
    }

    let endpoint = format!("{api_base}/{GRAPH_API_VERSION}/me/messages");
    let response = client
        .post(&endpoint)
        .query(&[("access_token", token)])
        .json(&body)
        .send()
        .await
        .map_err(|err| {
            SendError::retryable(
                format!("{code_prefix}_http"),
                "failed to call Graph API",
                Some(1_000),
            )
            .with_source(err)
        })?;

    let status = response.status();
    let body_text = response.text().await.map_err(|err| {
        SendError::retryable(
            format!("{code_prefix}_body"),
            "failed to read response body",
            Some(1_000),
        )
        .with_source(err)
    })?;
    let raw: Value = serde_json::from_str(&body_text).unwrap_or(Value::Null);

    if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        return Err(SendError::retryable(
            format!("{code_prefix}_retryable"),
            format!("status={} body={}", status.as_u16(), body_text),
            Some(1_000),
        ));
    }
    if status.is_client_error() {
        return Err(SendError::permanent(
            format!("{code_prefix}_send_failed"),
            format!("status={} body={}", status.as_u16(), body_text),
        ));
    }

    let platform_message_id = raw
        .get("message_id")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    if platform_message_id.is_empty() {
        return Err(SendError::permanent(
            format!("{code_prefix}_bad_response"),
            format!("Graph response carried no message_id: {body_text}"),
        ));
    }
    Ok(SendReceipt {
        platform_message_id,
        raw,
    })
}

fn build_graph_payload(code_prefix: &str, message: &OutboundMessage) -> Result<Value, SendError> {
    let content = if let Some(url) = message.attachment_url.as_deref() {
        json!({"attachment": {"type": "image", "payload": {"url": url, "is_reusable": false}}})
    } else {
        let text = message.text.as_deref().unwrap_or_default();
        if text.trim().is_empty() {
            return Err(SendError::permanent(
                format!("{code_prefix}_missing_text"),
                "message text cannot be empty",
            ));
        }
        json!({"text": text})
    };
    Ok(json!({
        "recipient": {"id": message.recipient_external_id},
        "messaging_type": "RESPONSE",
        "message": content,
    }))
}

pub(crate) fn format_ms_timestamp(ms: i64) -> String {
    OffsetDateTime::from_unix_timestamp_nanos(ms as i128 * 1_000_000)
        .ok()
        .and_then(|ts| ts.format(&Rfc3339).ok())
        .unwrap_or_else(now_rfc3339)
}

pub(crate) fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".into())
}
