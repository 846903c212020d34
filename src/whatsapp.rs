use std::collections::HashMap;

use axum::body::Bytes;
use axum::http::header;
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::Sha256;

use crate::store;
use crate::types::AppState;

const GRAPH_API_BASE: &str = "https://graph.facebook.com/v19.0";

const HEADER_IMAGE_URL: &str =
    "https://pauloleads.com.br/wp-content/uploads/2025/10/300000.png";

/// Templates whose header slot expects the fixed campaign image.
const IMAGE_HEADER_TEMPLATES: [&str; 3] = ["primeiro", "segundo", "terceiro"];

/// Every inbound message shape the webhook delivers, plus a catch-all for
/// kinds this server does not model. Decoding is total: malformed or
/// unrecognized payloads land in `Unknown`, never in an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundPayload {
    Text { body: String },
    TemplateButton { text: String, payload: String },
    ButtonReply { title: String, id: String },
    ListReply { title: String, id: String },
    Reaction { emoji: String },
    Media { kind: String, media_id: String },
    Unknown { kind: String },
}

impl InboundPayload {
    pub fn from_value(message: &Value) -> InboundPayload {
        let kind = message
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();

        match kind.as_str() {
            "text" => {
                let body = message
                    .get("text")
                    .and_then(|t| t.get("body"))
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_string();
                InboundPayload::Text { body }
            }
            "button" => {
                let Some(button) = message.get("button") else {
                    return InboundPayload::Unknown { kind };
                };
                InboundPayload::TemplateButton {
                    text: button
                        .get("text")
                        .and_then(Value::as_str)
                        .unwrap_or("")
                        .to_string(),
                    payload: button
                        .get("payload")
                        .and_then(Value::as_str)
                        .unwrap_or("")
                        .to_string(),
                }
            }
            "interactive" => {
                let interactive = message.get("interactive").cloned().unwrap_or_default();
                if let Some(reply) = interactive.get("button_reply") {
                    InboundPayload::ButtonReply {
                        title: reply
                            .get("title")
                            .and_then(Value::as_str)
                            .unwrap_or("")
                            .to_string(),
                        id: reply
                            .get("id")
                            .and_then(Value::as_str)
                            .unwrap_or("")
                            .to_string(),
                    }
                } else if let Some(reply) = interactive.get("list_reply") {
                    InboundPayload::ListReply {
                        title: reply
                            .get("title")
                            .and_then(Value::as_str)
                            .unwrap_or("")
                            .to_string(),
                        id: reply
                            .get("id")
                            .and_then(Value::as_str)
                            .unwrap_or("")
                            .to_string(),
                    }
                } else {
                    InboundPayload::Unknown { kind }
                }
            }
            "reaction" => {
                let Some(reaction) = message.get("reaction") else {
                    return InboundPayload::Unknown { kind };
                };
                InboundPayload::Reaction {
                    emoji: reaction
                        .get("emoji")
                        .and_then(Value::as_str)
                        .unwrap_or("")
                        .to_string(),
                }
            }
            "image" | "audio" | "video" | "document" => {
                let media_id = message
                    .get(&kind)
                    .and_then(|m| m.get("id"))
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_string();
                if media_id.is_empty() {
                    InboundPayload::Unknown { kind }
                } else {
                    InboundPayload::Media { kind, media_id }
                }
            }
            _ => InboundPayload::Unknown { kind },
        }
    }
}

/// Collapses an inbound payload into the (type, content) pair stored in the
/// message history. Media content is the platform media id, not the binary.
pub fn classify(payload: &InboundPayload) -> (String, String) {
    match payload {
        InboundPayload::Text { body } => ("text".to_string(), body.clone()),
        InboundPayload::TemplateButton { text, payload } => (
            "button_click".to_string(),
            format!("(Button: \"{text}\" | Payload: {payload})"),
        ),
        InboundPayload::ButtonReply { title, id } => (
            "button_click".to_string(),
            format!("(Button: \"{title}\" | ID: {id})"),
        ),
        InboundPayload::ListReply { title, id } => (
            "list_click".to_string(),
            format!("(List: \"{title}\" | ID: {id})"),
        ),
        InboundPayload::Reaction { emoji } => {
            ("reaction".to_string(), format!("(Reaction: {emoji})"))
        }
        InboundPayload::Media { kind, media_id } => (kind.clone(), media_id.clone()),
        InboundPayload::Unknown { kind } => (kind.clone(), format!("({kind})")),
    }
}

pub fn classify_inbound(message: &Value) -> (String, String) {
    classify(&InboundPayload::from_value(message))
}

/// Maps each contact's wa_id to its profile name from the webhook value.
pub fn contact_profile_names(value: &Value) -> HashMap<String, String> {
    let contacts = value
        .get("contacts")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let mut map = HashMap::new();
    for contact in contacts {
        let wa_id = contact
            .get("wa_id")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        if wa_id.is_empty() {
            continue;
        }
        let name = contact
            .get("profile")
            .and_then(|p| p.get("name"))
            .and_then(Value::as_str)
            .unwrap_or("")
            .trim()
            .to_string();
        if !name.is_empty() {
            map.insert(wa_id, name);
        }
    }
    map
}

/// An empty app secret disables the check; deployments without one keep the
/// original open-webhook behavior.
pub fn verify_webhook_signature(
    app_secret: &str,
    signature_header: Option<&str>,
    body: &[u8],
) -> bool {
    if app_secret.is_empty() {
        return true;
    }
    let signature = signature_header.unwrap_or("").trim();
    let signature = signature
        .strip_prefix("sha256=")
        .unwrap_or(signature)
        .trim();
    if signature.is_empty() {
        return false;
    }
    let Ok(signature_bytes) = hex::decode(signature) else {
        return false;
    };
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(app_secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&signature_bytes).is_ok()
}

pub fn text_send_payload(phone: &str, body: &str) -> Value {
    json!({
        "messaging_product": "whatsapp",
        "to": phone,
        "type": "text",
        "text": { "body": body }
    })
}

pub fn template_send_payload(phone: &str, template_name: &str) -> Value {
    let mut template = json!({
        "name": template_name,
        "language": { "code": "pt_BR" }
    });
    if IMAGE_HEADER_TEMPLATES.contains(&template_name) {
        template["components"] = json!([{
            "type": "header",
            "parameters": [{
                "type": "image",
                "image": { "link": HEADER_IMAGE_URL }
            }]
        }]);
    }
    json!({
        "messaging_product": "whatsapp",
        "to": phone,
        "type": "template",
        "template": template
    })
}

fn outbound_log_content(data: &Value) -> String {
    if data.get("type").and_then(Value::as_str) == Some("template") {
        let name = data
            .get("template")
            .and_then(|t| t.get("name"))
            .and_then(Value::as_str)
            .unwrap_or("");
        format!("Template: {name}")
    } else {
        data.get("text")
            .and_then(|t| t.get("body"))
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string()
    }
}

/// POSTs a message payload to the platform and records the send in the
/// outbound history. The network call happens before the persistence write;
/// a crash between the two leaves the send unlogged. No retry, no backoff.
pub async fn send_message(state: &AppState, data: &Value) -> Result<Value, Value> {
    let to = data
        .get("to")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    let url = format!("{GRAPH_API_BASE}/{}/messages", state.config.phone_number_id);

    let response = state
        .http
        .post(url)
        .bearer_auth(&state.config.access_token)
        .json(data)
        .send()
        .await
        .map_err(|e| {
            eprintln!("[dispatch] request to {to} failed: {e}");
            json!({ "error": e.to_string() })
        })?;

    let status = response.status();
    let body = response.json::<Value>().await.unwrap_or_else(|_| json!({}));
    if !status.is_success() {
        eprintln!("[dispatch] send to {to} rejected ({status}): {body}");
        return Err(json!({ "status": status.as_u16(), "body": body }));
    }
    println!("[dispatch] send to {to} accepted");

    let message_type = data
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or("text")
        .to_string();
    let content = outbound_log_content(data);
    if let Err(err) =
        store::insert_message(&state.db, &to, None, "outbound", &message_type, &content).await
    {
        eprintln!("[dispatch] failed to record outbound message for {to}: {err}");
        return Err(json!({ "error": "failed to record outbound message" }));
    }
    println!("[dispatch] outbound message saved to history of {to}");
    Ok(body)
}

/// Two-hop media fetch: resolve the short-lived URL for a media id, then
/// download the binary, both with bearer auth.
pub async fn fetch_media(state: &AppState, media_id: &str) -> Result<(Bytes, String), String> {
    let metadata_response = state
        .http
        .get(format!("{GRAPH_API_BASE}/{media_id}"))
        .bearer_auth(&state.config.access_token)
        .send()
        .await
        .map_err(|e| e.to_string())?;

    if !metadata_response.status().is_success() {
        let status = metadata_response.status();
        let body = metadata_response.text().await.unwrap_or_default();
        return Err(format!("media metadata error {}: {}", status.as_u16(), body));
    }

    let metadata = metadata_response
        .json::<Value>()
        .await
        .unwrap_or_else(|_| json!({}));
    let media_url = metadata
        .get("url")
        .and_then(Value::as_str)
        .unwrap_or("")
        .trim()
        .to_string();
    if media_url.is_empty() {
        return Err("platform returned no media url".to_string());
    }
    let fallback_mime = metadata
        .get("mime_type")
        .and_then(Value::as_str)
        .unwrap_or("application/octet-stream")
        .to_string();

    let media_response = state
        .http
        .get(media_url)
        .bearer_auth(&state.config.access_token)
        .send()
        .await
        .map_err(|e| e.to_string())?;

    if !media_response.status().is_success() {
        let status = media_response.status();
        let body = media_response.text().await.unwrap_or_default();
        return Err(format!("media download error {}: {}", status.as_u16(), body));
    }

    let content_type = media_response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or(&fallback_mime)
        .to_string();
    let bytes = media_response.bytes().await.map_err(|e| e.to_string())?;
    Ok((bytes, content_type))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_text_as_raw_body() {
        let message = json!({ "type": "text", "text": { "body": "hello there" } });
        assert_eq!(
            classify_inbound(&message),
            ("text".to_string(), "hello there".to_string())
        );
    }

    #[test]
    fn template_button_becomes_button_click_with_label_and_payload() {
        let message = json!({
            "type": "button",
            "button": { "text": "Yes, I want it", "payload": "OFFER_ACCEPT" }
        });
        let (kind, content) = classify_inbound(&message);
        assert_eq!(kind, "button_click");
        assert!(content.contains("Yes, I want it"));
        assert!(content.contains("OFFER_ACCEPT"));
    }

    #[test]
    fn interactive_button_reply_becomes_button_click() {
        let message = json!({
            "type": "interactive",
            "interactive": { "button_reply": { "title": "More info", "id": "btn_1" } }
        });
        let (kind, content) = classify_inbound(&message);
        assert_eq!(kind, "button_click");
        assert!(content.contains("More info"));
        assert!(content.contains("btn_1"));
    }

    #[test]
    fn interactive_list_reply_becomes_list_click() {
        let message = json!({
            "type": "interactive",
            "interactive": { "list_reply": { "title": "Plan B", "id": "row_2" } }
        });
        let (kind, content) = classify_inbound(&message);
        assert_eq!(kind, "list_click");
        assert!(content.contains("Plan B"));
    }

    #[test]
    fn reaction_keeps_emoji() {
        let message = json!({ "type": "reaction", "reaction": { "emoji": "👍" } });
        assert_eq!(
            classify_inbound(&message),
            ("reaction".to_string(), "(Reaction: 👍)".to_string())
        );
    }

    #[test]
    fn media_kinds_store_only_the_media_id() {
        let message = json!({ "type": "image", "image": { "id": "MEDIA123" } });
        assert_eq!(
            classify_inbound(&message),
            ("image".to_string(), "MEDIA123".to_string())
        );
    }

    #[test]
    fn unrecognized_kind_falls_back_to_placeholder() {
        let message = json!({ "type": "order", "order": {} });
        assert_eq!(
            classify_inbound(&message),
            ("order".to_string(), "(order)".to_string())
        );
    }

    #[test]
    fn interactive_without_reply_falls_back_to_placeholder() {
        let message = json!({ "type": "interactive", "interactive": {} });
        assert_eq!(
            classify_inbound(&message),
            ("interactive".to_string(), "(interactive)".to_string())
        );
    }

    #[test]
    fn missing_type_is_still_classified() {
        let message = json!({ "text": { "body": "orphan" } });
        assert_eq!(
            classify_inbound(&message),
            ("unknown".to_string(), "(unknown)".to_string())
        );
    }

    #[test]
    fn allowlisted_template_carries_image_header() {
        let payload = template_send_payload("5511999990000", "primeiro");
        let components = payload["template"]["components"]
            .as_array()
            .expect("expected components array");
        assert_eq!(components[0]["type"], "header");
        assert_eq!(components[0]["parameters"][0]["type"], "image");
    }

    #[test]
    fn other_templates_have_no_components() {
        let payload = template_send_payload("5511999990000", "followup");
        assert!(payload["template"].get("components").is_none());
        assert_eq!(payload["template"]["language"]["code"], "pt_BR");
    }

    #[test]
    fn outbound_log_content_prefers_template_name() {
        let template = template_send_payload("111", "primeiro");
        assert_eq!(outbound_log_content(&template), "Template: primeiro");
        let text = text_send_payload("111", "manual reply");
        assert_eq!(outbound_log_content(&text), "manual reply");
    }

    #[test]
    fn signature_check_accepts_valid_and_rejects_tampered() {
        let secret = "top-secret";
        let body = br#"{"entry":[]}"#;
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        let header = format!("sha256={}", hex::encode(mac.finalize().into_bytes()));

        assert!(verify_webhook_signature(secret, Some(&header), body));
        assert!(!verify_webhook_signature(secret, Some("sha256=00"), body));
        assert!(!verify_webhook_signature(secret, None, body));
        // No configured secret keeps the webhook open.
        assert!(verify_webhook_signature("", None, body));
    }
}
