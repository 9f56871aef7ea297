//! Submitted policy settings.
//!
//! [`PolicyForm`] is what an admin screen posts; [`PolicyForm::into_tree`]
//! turns it into a sanitized policy tree ready for `PolicyStore::update`.
//! Text inputs arrive as strings and checkboxes as booleans, but numbers and
//! lists are accepted in either shape.

use serde::Deserialize;
use serde_json::{Map, Value, json};
use time::OffsetDateTime;

use super::hooks::CacheHooks;
use super::policy::truthy;
use super::registry::DriverRegistry;

const OBJECT_BLOCKS: [&str; 3] = ["term", "post", "user"];

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PolicyForm {
    pub engine: Option<Value>,
    pub general: Option<GeneralForm>,
    pub options: Option<OptionsForm>,
    pub post: Option<ObjectForm>,
    pub term: Option<ObjectForm>,
    pub user: Option<ObjectForm>,
    pub comment: Option<CommentForm>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GeneralForm {
    pub flushing: Option<Value>,
    pub pagination: Option<Value>,
    pub expire: Option<Value>,
    pub https_indifferent: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct OptionsForm {
    pub additional: Option<String>,
    pub cookies: Option<String>,
    pub exclude: Option<String>,
    pub statuscode: Option<Value>,
    pub revalidate: bool,
    #[serde(rename = "compress-html")]
    pub compress_html: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ObjectForm {
    pub enabled: bool,
    pub feed: Option<Value>,
    pub additional: Option<String>,
    pub purge: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CommentForm {
    pub enabled: bool,
    #[serde(rename = "type")]
    pub types: Option<Value>,
}

impl PolicyForm {
    /// Sanitize into a policy tree stamped with `now` as its etag.
    pub fn into_tree(self, registry: &DriverRegistry, hooks: &CacheHooks, now: OffsetDateTime) -> Value {
        let mut tree = Map::new();

        tree.insert("engine".to_string(), engine_block(self.engine, registry, hooks));
        if let Some(general) = self.general {
            tree.insert("general".to_string(), general.into_value());
        }
        if let Some(options) = self.options {
            tree.insert("options".to_string(), options.into_value());
        }

        let mut objects = [self.term, self.post, self.user];
        for (name, form) in OBJECT_BLOCKS.iter().zip(objects.iter_mut()) {
            let block = form.take().map_or_else(
                || json!({ "purge": {}, "feed": [] }),
                ObjectForm::into_value,
            );
            tree.insert(name.to_string(), block);
        }

        let comment = self.comment.unwrap_or_default();
        tree.insert(
            "comment".to_string(),
            json!({
                "enabled": comment.enabled,
                "type": comment
                    .types
                    .as_ref()
                    .map(string_items)
                    .unwrap_or_default()
                    .iter()
                    .map(|item| sanitize_title(item))
                    .filter(|item| !item.is_empty())
                    .collect::<Vec<_>>(),
            }),
        );

        tree.insert("etag".to_string(), Value::from(now.unix_timestamp()));
        Value::Object(tree)
    }
}

/// Unknown engine ids are replaced by the fallback driver before hooks run.
fn engine_block(engine: Option<Value>, registry: &DriverRegistry, hooks: &CacheHooks) -> Value {
    let mut block = match engine {
        Some(Value::Object(map)) => map,
        _ => Map::new(),
    };
    let requested = block
        .get("type")
        .and_then(Value::as_str)
        .filter(|id| registry.contains(id))
        .map(str::to_string);
    let id = requested.unwrap_or_else(|| registry.fallback_id().to_string());
    block.insert("type".to_string(), Value::String(id.clone()));

    hooks.process_engine(&id, Value::Object(block))
}

impl GeneralForm {
    fn into_value(self) -> Value {
        let mut general = Map::new();
        if let Some(flushing) = int_field(self.flushing.as_ref()) {
            general.insert("flushing".to_string(), Value::from(flushing.max(0)));
        }
        if let Some(pagination) = int_field(self.pagination.as_ref()) {
            general.insert("pagination".to_string(), Value::from(pagination));
        }
        if let Some(expire) = int_field(self.expire.as_ref()).filter(|expire| *expire >= 0) {
            general.insert("expire".to_string(), Value::from(expire));
        }
        general.insert(
            "https_indifferent".to_string(),
            Value::Bool(self.https_indifferent),
        );
        Value::Object(general)
    }
}

impl OptionsForm {
    fn into_value(self) -> Value {
        let mut options = Map::new();
        for (name, raw) in [
            ("additional", self.additional),
            ("cookies", self.cookies),
            ("exclude", self.exclude),
        ] {
            if let Some(raw) = raw.filter(|raw| !raw.trim().is_empty()) {
                options.insert(name.to_string(), json!(split_list(&raw, &[',', '\n', '\r'])));
            }
        }
        let statuscode = self
            .statuscode
            .as_ref()
            .map_or(Value::Bool(false), |code| Value::from(int_value(code)));
        options.insert("statuscode".to_string(), statuscode);
        options.insert("revalidate".to_string(), Value::Bool(self.revalidate));
        options.insert("compress-html".to_string(), Value::Bool(self.compress_html));
        Value::Object(options)
    }
}

impl ObjectForm {
    fn into_value(self) -> Value {
        let mut block = Map::new();
        block.insert(
            "purge".to_string(),
            self.purge.map_or_else(|| json!({}), coerce_flags),
        );
        block.insert(
            "feed".to_string(),
            json!(
                self.feed
                    .as_ref()
                    .map(string_items)
                    .unwrap_or_default()
                    .into_iter()
                    .filter(|feed| !feed.is_empty())
                    .collect::<Vec<_>>()
            ),
        );
        block.insert("enabled".to_string(), Value::Bool(self.enabled));
        if let Some(raw) = self.additional.filter(|raw| !raw.trim().is_empty()) {
            block.insert("additional".to_string(), json!(split_list(&raw, &['\n', '\r'])));
        }
        Value::Object(block)
    }
}

/// Recursively turn every leaf of a purge table into a boolean.
pub fn coerce_flags(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, value)| (key, coerce_flags(value)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(coerce_flags).collect()),
        leaf => Value::Bool(truthy(&leaf)),
    }
}

/// Split on any of `separators`, trim, drop empties.
fn split_list(raw: &str, separators: &[char]) -> Vec<String> {
    raw.split(separators)
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn string_items(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(text) => Some(text.trim().to_string()),
                Value::Number(number) => Some(number.to_string()),
                _ => None,
            })
            .collect(),
        Value::String(text) => vec![text.trim().to_string()],
        _ => Vec::new(),
    }
}

/// Integer reading of a form value; unparsable text counts as zero.
fn int_value(value: &Value) -> i64 {
    match value {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().map(|n| n as i64))
            .unwrap_or_default(),
        Value::String(text) => leading_int(text.trim()),
        Value::Bool(flag) => i64::from(*flag),
        _ => 0,
    }
}

/// Like [`int_value`], but blank or zero inputs count as not submitted.
fn int_field(value: Option<&Value>) -> Option<i64> {
    let value = value?;
    if !truthy(value) {
        return None;
    }
    Some(int_value(value))
}

fn leading_int(text: &str) -> i64 {
    let sign_len = usize::from(text.starts_with(['-', '+']));
    let digits = text[sign_len..]
        .char_indices()
        .find(|(_, ch)| !ch.is_ascii_digit())
        .map_or(text.len(), |(index, _)| index + sign_len);
    text[..digits].parse().unwrap_or_default()
}

fn sanitize_title(raw: &str) -> String {
    let mut slug = String::with_capacity(raw.len());
    for ch in raw.trim().chars().flat_map(char::to_lowercase) {
        if ch.is_alphanumeric() || ch == '_' {
            slug.push(ch);
        } else if (ch == '-' || ch.is_whitespace()) && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    slug.trim_matches('-').to_string()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use time::macros::datetime;

    use super::*;
    use crate::cache::drivers::{MemoryDriver, ProxyCacheDriver};

    fn registry() -> DriverRegistry {
        let registry = DriverRegistry::new();
        registry.register(Arc::new(
            ProxyCacheDriver::new("http://127.0.0.1:9", Duration::from_millis(50), "http://site")
                .expect("proxy"),
        ));
        registry.register(Arc::new(MemoryDriver::new(4)));
        registry
    }

    fn process(form: Value) -> Value {
        let form: PolicyForm = serde_json::from_value(form).expect("form");
        form.into_tree(
            &registry(),
            &CacheHooks::new(),
            datetime!(2024-05-01 12:00:00 UTC),
        )
    }

    #[test]
    fn unknown_engine_falls_back_to_proxy() {
        let tree = process(json!({ "engine": { "type": "memcached" } }));
        assert_eq!(tree["engine"]["type"], "proxy");

        let tree = process(json!({ "engine": { "type": "memory" } }));
        assert_eq!(tree["engine"]["type"], "memory");
    }

    #[test]
    fn engine_hooks_see_resolved_driver() {
        let hooks = CacheHooks::new();
        hooks.add_engine_filter(Some("memory"), |mut engine| {
            engine["limit"] = json!(64);
            engine
        });
        let form: PolicyForm =
            serde_json::from_value(json!({ "engine": { "type": "memory" } })).expect("form");
        let tree = form.into_tree(&registry(), &hooks, datetime!(2024-05-01 12:00:00 UTC));
        assert_eq!(tree["engine"], json!({ "type": "memory", "limit": 64 }));
    }

    #[test]
    fn general_numbers_are_clamped() {
        let tree = process(json!({
            "general": { "flushing": "-5", "pagination": "12", "expire": "-1" }
        }));
        assert_eq!(tree["general"]["flushing"], 0);
        assert_eq!(tree["general"]["pagination"], 12);
        assert!(tree["general"].get("expire").is_none());
        assert_eq!(tree["general"]["https_indifferent"], false);
    }

    #[test]
    fn option_lists_are_split_and_trimmed() {
        let tree = process(json!({
            "options": {
                "cookies": "wp_logged, session_.*\n\ncomment_author",
                "statuscode": "200",
                "revalidate": true
            }
        }));
        assert_eq!(
            tree["options"]["cookies"],
            json!(["wp_logged", "session_.*", "comment_author"])
        );
        assert_eq!(tree["options"]["statuscode"], 200);
        assert_eq!(tree["options"]["revalidate"], true);
        assert_eq!(tree["options"]["compress-html"], false);
        assert!(tree["options"].get("exclude").is_none());
    }

    #[test]
    fn missing_statuscode_becomes_false() {
        let tree = process(json!({ "options": {} }));
        assert_eq!(tree["options"]["statuscode"], false);
    }

    #[test]
    fn object_blocks_always_exist() {
        let tree = process(json!({
            "post": {
                "enabled": true,
                "feed": "atom",
                "additional": "/extra\n\n/other ",
                "purge": { "global": { "front": "1", "posts": 0 }, "post": { "term": "" } }
            }
        }));

        assert_eq!(tree["term"], json!({ "purge": {}, "feed": [] }));
        assert_eq!(tree["post"]["enabled"], true);
        assert_eq!(tree["post"]["feed"], json!(["atom"]));
        assert_eq!(tree["post"]["additional"], json!(["/extra", "/other"]));
        assert_eq!(
            tree["post"]["purge"],
            json!({ "global": { "front": true, "posts": false }, "post": { "term": false } })
        );
    }

    #[test]
    fn comment_types_are_slugged_and_etag_is_stamped() {
        let tree = process(json!({
            "comment": { "enabled": true, "type": ["Comment", "Ping Back"] }
        }));
        assert_eq!(
            tree["comment"],
            json!({ "enabled": true, "type": ["comment", "ping-back"] })
        );
        assert_eq!(tree["etag"], 1_714_564_800);
    }

    #[test]
    fn leading_int_reads_like_a_form_parser() {
        assert_eq!(leading_int("42px"), 42);
        assert_eq!(leading_int("-7"), -7);
        assert_eq!(leading_int("abc"), 0);
        assert_eq!(leading_int(""), 0);
    }
}
