//! Message content model shared by all protocols.
//!
//! Inbound rich messages are decoded element-by-element through the
//! dispatch engine (see [`crate::standard::DeserializeElement`]); outbound
//! messages are assembled from the same elements by each adapter.

use std::fmt;

use crate::selector::Selector;

/// One piece of message content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Element {
    /// Plain text.
    Text(String),
    /// Mention of a single member or user.
    Notice {
        /// Who is mentioned.
        target: Selector,
    },
    /// Mention of everyone in the scene.
    NoticeAll,
    /// A platform emote, by platform-assigned id.
    Face {
        /// Emote id.
        id: String,
    },
    /// An image.
    Picture {
        /// Resource address of the image.
        resource: Selector,
        /// Direct download URL, when the platform provides one.
        url: Option<String>,
        /// Whether the image is a one-shot "flash" picture.
        flash: bool,
    },
    /// Reference to an earlier message.
    Reply {
        /// Message id being replied to.
        id: String,
    },
    /// A dice roll.
    Dice,
    /// A poke/nudge.
    Poke,
    /// Raw platform JSON card content.
    Json(String),
    /// Raw platform XML card content.
    Xml(String),
    /// A link share card.
    Share {
        /// Link URL.
        url: String,
        /// Card title.
        title: String,
        /// Optional card body text.
        content: Option<String>,
        /// Optional preview image URL.
        image: Option<String>,
    },
}

impl Element {
    /// The discriminator name of this element kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Element::Text(_) => "text",
            Element::Notice { .. } => "notice",
            Element::NoticeAll => "notice_all",
            Element::Face { .. } => "face",
            Element::Picture { .. } => "picture",
            Element::Reply { .. } => "reply",
            Element::Dice => "dice",
            Element::Poke => "poke",
            Element::Json(_) => "json",
            Element::Xml(_) => "xml",
            Element::Share { .. } => "share",
        }
    }
}

impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Element::Text(text) => f.write_str(text),
            Element::Notice { target } => write!(f, "[$notice:{target}]"),
            Element::NoticeAll => f.write_str("[$notice_all]"),
            Element::Face { id } => write!(f, "[$face:{id}]"),
            Element::Picture { resource, .. } => write!(f, "[$picture:{resource}]"),
            Element::Reply { id } => write!(f, "[$reply:{id}]"),
            Element::Dice => f.write_str("[$dice]"),
            Element::Poke => f.write_str("[$poke]"),
            Element::Json(_) => f.write_str("[$json]"),
            Element::Xml(_) => f.write_str("[$xml]"),
            Element::Share { url, .. } => write!(f, "[$share:{url}]"),
        }
    }
}

/// An ordered sequence of message elements.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageChain(pub Vec<Element>);

impl MessageChain {
    /// A chain holding a single text element.
    pub fn text(content: impl Into<String>) -> Self {
        Self(vec![Element::Text(content.into())])
    }

    /// The elements in order.
    pub fn elements(&self) -> &[Element] {
        &self.0
    }

    /// Whether the chain has no elements.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Concatenated plain-text content of all `Text` elements.
    pub fn plain_text(&self) -> String {
        self.0
            .iter()
            .filter_map(|e| match e {
                Element::Text(t) => Some(t.as_str()),
                _ => None,
            })
            .collect()
    }
}

impl fmt::Display for MessageChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for element in &self.0 {
            write!(f, "{element}")?;
        }
        Ok(())
    }
}

impl From<Vec<Element>> for MessageChain {
    fn from(elements: Vec<Element>) -> Self {
        Self(elements)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_skips_non_text_elements() {
        let chain = MessageChain(vec![
            Element::Text("hello ".to_owned()),
            Element::NoticeAll,
            Element::Text("world".to_owned()),
        ]);
        assert_eq!(chain.plain_text(), "hello world");
    }

    #[test]
    fn display_renders_markers() {
        let chain = MessageChain(vec![
            Element::Text("hi".to_owned()),
            Element::Face { id: "14".to_owned() },
        ]);
        assert_eq!(chain.to_string(), "hi[$face:14]");
    }
}
