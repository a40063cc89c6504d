//! Usage: Reduce raw data-source pages to the fields the CLI reports.

use serde::Serialize;
use serde_json::Value;

const UNTITLED: &str = "(untitled)";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SimplifiedPage {
    pub id: String,
    pub url: String,
    pub created_time: String,
    pub last_edited_time: String,
    pub status: String,
    pub title: String,
}

pub fn simplify_page(page: &Value, status_property: &str, title_property: &str) -> SimplifiedPage {
    let text = |key: &str| {
        page.get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    SimplifiedPage {
        id: text("id"),
        url: text("url"),
        created_time: text("created_time"),
        last_edited_time: text("last_edited_time"),
        status: extract_status(page, status_property),
        title: extract_title(page, title_property),
    }
}

/// Name of a `status` or `select` property; empty when unset.
pub fn extract_status(page: &Value, property: &str) -> String {
    let Some(node) = page
        .get("properties")
        .and_then(|props| props.get(property))
        .filter(|node| node.is_object())
    else {
        return String::new();
    };
    ["status", "select"]
        .iter()
        .filter_map(|kind| node.get(*kind))
        .filter_map(|option| option.get("name").and_then(Value::as_str))
        .find(|name| !name.is_empty())
        .unwrap_or_default()
        .to_string()
}

/// Preferred title property first, then any property of type `title`.
pub fn extract_title(page: &Value, preferred_property: &str) -> String {
    let Some(props) = page.get("properties").and_then(Value::as_object) else {
        return UNTITLED.to_string();
    };

    let preferred = props
        .get(preferred_property)
        .and_then(|prop| prop.get("title"))
        .and_then(Value::as_array)
        .map(|nodes| flatten_text(nodes))
        .filter(|text| !text.is_empty());
    if let Some(text) = preferred {
        return text;
    }

    props
        .values()
        .filter(|prop| prop.get("type").and_then(Value::as_str) == Some("title"))
        .filter_map(|prop| prop.get("title").and_then(Value::as_array))
        .map(|nodes| flatten_text(nodes))
        .find(|text| !text.is_empty())
        .unwrap_or_else(|| UNTITLED.to_string())
}

fn flatten_text(rich: &[Value]) -> String {
    let mut out = String::new();
    for node in rich {
        let plain = node
            .get("plain_text")
            .and_then(Value::as_str)
            .filter(|v| !v.is_empty())
            .or_else(|| {
                node.get("text")
                    .and_then(|text| text.get("content"))
                    .and_then(Value::as_str)
            });
        if let Some(part) = plain {
            out.push_str(part);
        }
    }
    out.trim().to_string()
}
