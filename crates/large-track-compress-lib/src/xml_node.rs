//! Generic XML node model used to carry every subtree the engine does not model
//!
//! Metadata blocks, waypoints, routes, extensions and unknown per-point children are
//! all kept as [`XmlNode`] trees so they round-trip untouched. Nodes are assembled
//! incrementally with an [`XmlNodeBuilder`] while the document is scanned.

use std::collections::BTreeMap;
use std::fmt::Write;

/// Immutable XML element: name, attributes, optional text and ordered children
#[derive(Clone, Debug, PartialEq, Eq, Hash, Default)]
pub struct XmlNode {
    pub name: String,
    /// Attributes keyed by qualified name, kept sorted for deterministic output
    pub attributes: BTreeMap<String, String>,
    pub text: Option<String>,
    pub children: Vec<XmlNode>,
}

impl XmlNode {
    /// Create an element with no attributes, text or children
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Convenience constructor for a leaf element carrying text
    pub fn with_text(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            text: Some(text.into()),
            ..Self::default()
        }
    }

    /// Render the node as indented markup, one tab per level, ending with a newline
    pub fn render(&self, indentation: usize) -> String {
        let mut output = String::new();
        self.render_into(&mut output, indentation, &|_| true);
        output
    }

    /// Render into an existing buffer, skipping any descendant rejected by `keep`
    pub(crate) fn render_into(
        &self,
        output: &mut String,
        indentation: usize,
        keep: &dyn Fn(&XmlNode) -> bool,
    ) {
        push_indent(output, indentation);
        output.push('<');
        output.push_str(&self.name);
        push_attributes(output, &self.attributes);

        let text = self.text.as_deref().filter(|t| !t.is_empty());
        let children: Vec<&XmlNode> = self.children.iter().filter(|c| keep(c)).collect();
        if children.is_empty() && text.is_none() {
            output.push_str("/>\n");
            return;
        }

        output.push('>');
        // Mixed content: the text goes ahead of the children
        if let Some(text) = text {
            output.push_str(&escape(text));
        }
        if !children.is_empty() {
            output.push('\n');
            for child in children {
                child.render_into(output, indentation + 1, keep);
            }
            push_indent(output, indentation);
        }
        let _ = writeln!(output, "</{}>", self.name);
    }

    /// Find the first direct child with the given name
    pub fn child(&self, name: &str) -> Option<&XmlNode> {
        self.children.iter().find(|c| c.name == name)
    }
}

/// Mutable accumulator for a node that is still open in the document
#[derive(Debug, Clone)]
pub struct XmlNodeBuilder {
    name: String,
    attributes: BTreeMap<String, String>,
    text_fragments: Vec<String>,
    children: Vec<XmlNode>,
}

impl XmlNodeBuilder {
    pub fn new(name: impl Into<String>, attributes: BTreeMap<String, String>) -> Self {
        Self {
            name: name.into(),
            attributes,
            text_fragments: Vec::new(),
            children: Vec::new(),
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Append a text fragment; fragments are concatenated in arrival order
    pub fn append_text(&mut self, text: &str) {
        if !text.is_empty() {
            self.text_fragments.push(text.to_owned());
        }
    }

    pub fn append_child(&mut self, child: XmlNode) {
        self.children.push(child);
    }

    /// Freeze into an immutable node. Empty text becomes `None`.
    pub fn build(self) -> XmlNode {
        let combined = self.text_fragments.concat();
        XmlNode {
            name: self.name,
            attributes: self.attributes,
            text: (!combined.is_empty()).then_some(combined),
            children: self.children,
        }
    }
}

/// Escape the five XML entities
pub fn escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            other => escaped.push(other),
        }
    }
    escaped
}

#[inline]
pub(crate) fn push_indent(output: &mut String, indentation: usize) {
    for _ in 0..indentation {
        output.push('\t');
    }
}

/// Append ` key="value"` pairs in key order
pub(crate) fn push_attributes(output: &mut String, attributes: &BTreeMap<String, String>) {
    for (key, value) in attributes {
        let _ = write!(output, " {}=\"{}\"", key, escape(value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_escape_all_entities() {
        assert_eq!(
            escape(r#"a & b < c > d "e" 'f'"#),
            "a &amp; b &lt; c &gt; d &quot;e&quot; &apos;f&apos;"
        );
    }

    #[test]
    fn test_builder_concatenates_fragments() {
        let mut builder = XmlNodeBuilder::new("desc", BTreeMap::new());
        builder.append_text("Hello");
        builder.append_text("");
        builder.append_text(", world");
        let node = builder.build();
        assert_eq!(node.text.as_deref(), Some("Hello, world"));
    }

    #[test]
    fn test_builder_empty_text_is_none() {
        let node = XmlNodeBuilder::new("link", attrs(&[("href", "x")])).build();
        assert!(node.text.is_none());
        assert_eq!(node.attributes["href"], "x");
    }

    #[test]
    fn test_render_self_closing() {
        let node = XmlNode {
            name: "link".into(),
            attributes: attrs(&[("href", "https://a.b/?q=1&r=2")]),
            ..XmlNode::default()
        };
        assert_eq!(
            node.render(1),
            "\t<link href=\"https://a.b/?q=1&amp;r=2\"/>\n"
        );
    }

    #[test]
    fn test_render_sorted_attributes_and_children() {
        let node = XmlNode {
            name: "extensions".into(),
            attributes: attrs(&[("z", "1"), ("a", "2")]),
            text: None,
            children: vec![XmlNode::with_text("gpxtpx:hr", "142")],
        };
        assert_eq!(
            node.render(0),
            "<extensions a=\"2\" z=\"1\">\n\t<gpxtpx:hr>142</gpxtpx:hr>\n</extensions>\n"
        );
    }

    #[test]
    fn test_render_escapes_text() {
        let node = XmlNode::with_text("name", "Tom & Jerry's <run>");
        assert_eq!(
            node.render(0),
            "<name>Tom &amp; Jerry&apos;s &lt;run&gt;</name>\n"
        );
    }

    #[test]
    fn test_render_with_filter() {
        let node = XmlNode {
            name: "wpt".into(),
            attributes: BTreeMap::new(),
            text: None,
            children: vec![XmlNode::with_text("name", "A"), XmlNode::new("extensions")],
        };
        let mut output = String::new();
        node.render_into(&mut output, 0, &|n| n.name != "extensions");
        assert_eq!(output, "<wpt>\n\t<name>A</name>\n</wpt>\n");
    }

    #[test]
    fn test_render_self_closes_when_every_child_is_filtered() {
        let node = XmlNode {
            name: "link".into(),
            attributes: attrs(&[("href", "x")]),
            text: None,
            children: vec![XmlNode::new("extensions")],
        };
        let mut output = String::new();
        node.render_into(&mut output, 1, &|n| n.name != "extensions");
        assert_eq!(output, "\t<link href=\"x\"/>\n");
    }

    #[test]
    fn test_render_mixed_content_keeps_text() {
        let node = XmlNode {
            name: "desc".into(),
            attributes: BTreeMap::new(),
            text: Some("Hello".into()),
            children: vec![XmlNode::new("b")],
        };
        assert_eq!(node.render(0), "<desc>Hello\n\t<b/>\n</desc>\n");
    }
}
