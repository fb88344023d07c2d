//! OneBot v11 message segments.
//!
//! Inbound segments are decoded through the dispatch engine: one
//! [`DeserializeElement`] perform per segment `type`, registered at the
//! application layer so an embedding application can shadow individual
//! decoders. Outbound chains are encoded with plain functions; there is
//! nothing protocol-variable to dispatch on.

use anyhow::Context;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::artifact::{Layer, RegistrationConflict};
use crate::collector::{Collector, Template};
use crate::elements::{Element, MessageChain};
use crate::resolve::{DispatchError, PerformEnv, Resolver};
use crate::selector::Selector;
use crate::standard::{DeserializeElement, RawElement};

use super::{value_string, LAND};

/// Build the element-decoding collector.
pub fn collector() -> Result<Collector, RegistrationConflict> {
    let mut collector = Collector::new(
        "onebot::message",
        Layer::Application,
        Template::empty().with_application(),
    );
    collector.collect::<DeserializeElement, _, _>("text", text)?;
    collector.collect::<DeserializeElement, _, _>("at", at)?;
    collector.collect::<DeserializeElement, _, _>("face", face)?;
    collector.collect::<DeserializeElement, _, _>("image", image)?;
    collector.collect::<DeserializeElement, _, _>("reply", reply)?;
    collector.collect::<DeserializeElement, _, _>("dice", dice)?;
    collector.collect::<DeserializeElement, _, _>("shake", shake)?;
    collector.collect::<DeserializeElement, _, _>("json", json_card)?;
    collector.collect::<DeserializeElement, _, _>("xml", xml_card)?;
    collector.collect::<DeserializeElement, _, _>("share", share)?;
    Ok(collector)
}

fn data_value<'a>(raw: &'a RawElement, key: &str) -> Option<&'a Value> {
    raw.value.get("data")?.get(key)
}

fn data_string(raw: &RawElement, key: &str) -> Option<String> {
    value_string(data_value(raw, key)?)
}

async fn text(_env: PerformEnv, raw: RawElement) -> anyhow::Result<Element> {
    let content = data_string(&raw, "text").context("text segment missing data.text")?;
    Ok(Element::Text(content))
}

async fn at(_env: PerformEnv, raw: RawElement) -> anyhow::Result<Element> {
    let qq = data_string(&raw, "qq").context("at segment missing data.qq")?;
    if qq == "all" {
        return Ok(Element::NoticeAll);
    }
    Ok(Element::Notice {
        target: Selector::new().land(LAND).member(qq),
    })
}

async fn face(_env: PerformEnv, raw: RawElement) -> anyhow::Result<Element> {
    let id = data_string(&raw, "id").context("face segment missing data.id")?;
    Ok(Element::Face { id })
}

async fn image(_env: PerformEnv, raw: RawElement) -> anyhow::Result<Element> {
    let file = data_string(&raw, "file").context("image segment missing data.file")?;
    let url = data_string(&raw, "url");
    let flash = data_value(&raw, "type").and_then(Value::as_str) == Some("flash");
    Ok(Element::Picture {
        resource: Selector::new().land(LAND).push("picture", file),
        url,
        flash,
    })
}

async fn reply(_env: PerformEnv, raw: RawElement) -> anyhow::Result<Element> {
    let id = data_string(&raw, "id").context("reply segment missing data.id")?;
    Ok(Element::Reply { id })
}

async fn dice(_env: PerformEnv, _raw: RawElement) -> anyhow::Result<Element> {
    Ok(Element::Dice)
}

async fn shake(_env: PerformEnv, _raw: RawElement) -> anyhow::Result<Element> {
    Ok(Element::Poke)
}

async fn json_card(_env: PerformEnv, raw: RawElement) -> anyhow::Result<Element> {
    let content = data_string(&raw, "data").context("json segment missing data.data")?;
    Ok(Element::Json(content))
}

async fn xml_card(_env: PerformEnv, raw: RawElement) -> anyhow::Result<Element> {
    let content = data_string(&raw, "data").context("xml segment missing data.data")?;
    Ok(Element::Xml(content))
}

async fn share(_env: PerformEnv, raw: RawElement) -> anyhow::Result<Element> {
    let url = data_string(&raw, "url").context("share segment missing data.url")?;
    let title = data_string(&raw, "title").context("share segment missing data.title")?;
    Ok(Element::Share {
        url,
        title,
        content: data_string(&raw, "content"),
        image: data_string(&raw, "image"),
    })
}

/// Decode a raw OneBot message array into a [`MessageChain`].
///
/// Undecodable segments are skipped: a segment kind nobody registered a
/// decoder for is logged at debug level, a failing decoder at warn. A
/// plain-string message (array format disabled on the peer) becomes one
/// text element.
pub async fn deserialize_chain(resolver: &Resolver, raw: &Value) -> MessageChain {
    if let Some(content) = raw.as_str() {
        return MessageChain::text(content);
    }
    let Some(items) = raw.as_array() else {
        warn!("message payload is neither array nor string, dropping content");
        return MessageChain::default();
    };
    let mut elements = Vec::new();
    for item in items {
        let Some(kind) = item.get("type").and_then(Value::as_str) else {
            warn!("message segment without a type, skipping");
            continue;
        };
        let args = RawElement {
            kind: kind.to_owned(),
            value: item.clone(),
        };
        match resolver.call::<DeserializeElement>(args).await {
            Ok(element) => elements.push(element),
            Err(DispatchError::Resolution(_)) => {
                debug!(kind, "no decoder for segment, skipping");
            }
            Err(DispatchError::Perform(error)) => {
                warn!(kind, %error, "segment decode failed, skipping");
            }
        }
    }
    MessageChain(elements)
}

/// Encode a [`MessageChain`] as an OneBot segment array.
pub fn serialize_chain(message: &MessageChain) -> Vec<Value> {
    message.elements().iter().map(serialize_element).collect()
}

fn serialize_element(element: &Element) -> Value {
    match element {
        Element::Text(text) => json!({ "type": "text", "data": { "text": text } }),
        Element::Notice { target } => json!({
            "type": "at",
            "data": { "qq": target.last_value().unwrap_or_default() }
        }),
        Element::NoticeAll => json!({ "type": "at", "data": { "qq": "all" } }),
        Element::Face { id } => json!({ "type": "face", "data": { "id": id } }),
        Element::Picture { resource, url, flash } => {
            let file = url
                .clone()
                .or_else(|| resource.last_value().map(str::to_owned))
                .unwrap_or_default();
            if *flash {
                json!({ "type": "image", "data": { "file": file, "type": "flash" } })
            } else {
                json!({ "type": "image", "data": { "file": file } })
            }
        }
        Element::Reply { id } => json!({ "type": "reply", "data": { "id": id } }),
        Element::Dice => json!({ "type": "dice", "data": {} }),
        Element::Poke => json!({ "type": "shake", "data": {} }),
        Element::Json(content) => json!({ "type": "json", "data": { "data": content } }),
        Element::Xml(content) => json!({ "type": "xml", "data": { "data": content } }),
        Element::Share { url, title, content, image } => {
            let mut data = Map::new();
            data.insert("url".to_owned(), Value::String(url.clone()));
            data.insert("title".to_owned(), Value::String(title.clone()));
            if let Some(content) = content {
                data.insert("content".to_owned(), Value::String(content.clone()));
            }
            if let Some(image) = image {
                data.insert("image".to_owned(), Value::String(image.clone()));
            }
            json!({ "type": "share", "data": data })
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::artifact::Isolate;

    fn resolver() -> Resolver {
        let mut isolate = Isolate::new();
        isolate.attach(collector().expect("collector")).expect("attach");
        Resolver::new(Arc::new(isolate))
    }

    #[tokio::test]
    async fn decodes_common_segments() {
        let raw = json!([
            { "type": "text", "data": { "text": "hello " } },
            { "type": "at", "data": { "qq": 12345 } },
            { "type": "at", "data": { "qq": "all" } },
            { "type": "face", "data": { "id": "14" } },
            { "type": "reply", "data": { "id": "77" } },
        ]);
        let chain = deserialize_chain(&resolver(), &raw).await;
        assert_eq!(chain.elements().len(), 5);
        assert_eq!(chain.plain_text(), "hello ");
        assert_eq!(
            chain.elements()[1],
            Element::Notice {
                target: Selector::new().land(LAND).member("12345")
            }
        );
        assert_eq!(chain.elements()[2], Element::NoticeAll);
    }

    #[tokio::test]
    async fn flash_image_is_flagged() {
        let raw = json!([
            { "type": "image", "data": { "file": "abc.png", "url": "http://x/abc.png", "type": "flash" } }
        ]);
        let chain = deserialize_chain(&resolver(), &raw).await;
        match chain.elements() {
            [Element::Picture { url, flash, .. }] => {
                assert_eq!(url.as_deref(), Some("http://x/abc.png"));
                assert!(*flash);
            }
            other => panic!("unexpected decode: {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_segments_are_skipped() {
        let raw = json!([
            { "type": "text", "data": { "text": "kept" } },
            { "type": "hologram", "data": {} },
            { "data": { "no": "type" } },
        ]);
        let chain = deserialize_chain(&resolver(), &raw).await;
        assert_eq!(chain.elements().len(), 1);
        assert_eq!(chain.plain_text(), "kept");
    }

    #[tokio::test]
    async fn string_message_becomes_text() {
        let chain = deserialize_chain(&resolver(), &json!("plain")).await;
        assert_eq!(chain, MessageChain::text("plain"));
    }

    #[test]
    fn serialize_mirrors_wire_shapes() {
        let chain = MessageChain(vec![
            Element::Text("hi".to_owned()),
            Element::NoticeAll,
            Element::Poke,
        ]);
        let segments = serialize_chain(&chain);
        assert_eq!(
            segments,
            vec![
                json!({ "type": "text", "data": { "text": "hi" } }),
                json!({ "type": "at", "data": { "qq": "all" } }),
                json!({ "type": "shake", "data": {} }),
            ]
        );
    }
}
