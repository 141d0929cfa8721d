//! Owned XML element tree for libvirt documents.
//!
//! Domain, snapshot and pool descriptions are parsed into an [`Element`]
//! value so they can be inspected and rewritten without string surgery.
//! Everything the clone engine does not touch (comments, whitespace,
//! unknown elements, attribute order) survives a parse/serialize cycle.

use quick_xml::events::{BytesCData, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::error::{CloneError, Result};

/// A node inside an element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Element(Element),
    Text(String),
    CData(String),
    Comment(String),
}

/// An XML element with ordered attributes and children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<Node>,
}

impl Element {
    /// Create an empty element.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Set (or replace) an attribute.
    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_attr(key, value);
        self
    }

    /// Append a child element.
    pub fn with_child(mut self, child: Element) -> Self {
        self.children.push(Node::Element(child));
        self
    }

    /// Append a text node.
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.children.push(Node::Text(text.into()));
        self
    }

    /// Get an attribute value.
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn set_attr(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.attributes.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.attributes.push((key, value)),
        }
    }

    /// Iterate over child elements.
    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|node| match node {
            Node::Element(e) => Some(e),
            _ => None,
        })
    }

    /// Iterate over child elements with the given name.
    pub fn children_named<'a, 'n>(
        &'a self,
        name: &'n str,
    ) -> impl Iterator<Item = &'a Element> + 'n
    where
        'a: 'n,
    {
        self.elements().filter(move |e| e.name == name)
    }

    /// First child element with the given name.
    pub fn child(&self, name: &str) -> Option<&Element> {
        self.elements().find(|e| e.name == name)
    }

    /// Follow a `/`-separated path of child names, returning the first match.
    pub fn find(&self, path: &str) -> Option<&Element> {
        path.split('/')
            .filter(|s| !s.is_empty())
            .try_fold(self, |el, step| el.child(step))
    }

    /// All elements reached by a `/`-separated path of child names.
    pub fn find_all(&self, path: &str) -> Vec<&Element> {
        let mut current = vec![self];
        for step in path.split('/').filter(|s| !s.is_empty()) {
            current = current
                .into_iter()
                .flat_map(|el| el.elements().filter(move |e| e.name == step))
                .collect();
        }
        current
    }

    /// Concatenated text content of direct text children.
    pub fn text(&self) -> String {
        self.children
            .iter()
            .filter_map(|node| match node {
                Node::Text(t) | Node::CData(t) => Some(t.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Copy of this element with the text content replaced.
    pub fn with_replaced_text(&self, text: impl Into<String>) -> Self {
        let mut children: Vec<Node> = self
            .children
            .iter()
            .filter(|n| !matches!(n, Node::Text(_) | Node::CData(_)))
            .cloned()
            .collect();
        children.insert(0, Node::Text(text.into()));
        Self {
            name: self.name.clone(),
            attributes: self.attributes.clone(),
            children,
        }
    }

    /// Depth-first search for any element with the given name.
    pub fn contains_element(&self, name: &str) -> bool {
        self.elements()
            .any(|e| e.name == name || e.contains_element(name))
    }

    /// Parse a document and return its root element.
    pub fn parse(xml: &str) -> Result<Element> {
        let mut reader = Reader::from_str(xml);
        reader.trim_text(false);

        let mut stack: Vec<Element> = Vec::new();
        let mut root: Option<Element> = None;

        loop {
            match reader.read_event()? {
                Event::Start(start) => {
                    stack.push(element_from_start(&start)?);
                }
                Event::Empty(start) => {
                    let el = element_from_start(&start)?;
                    attach(&mut stack, &mut root, el)?;
                }
                Event::End(_) => {
                    let el = stack.pop().ok_or_else(|| {
                        CloneError::XmlError("Unbalanced closing tag".to_string())
                    })?;
                    attach(&mut stack, &mut root, el)?;
                }
                Event::Text(text) => {
                    if let Some(parent) = stack.last_mut() {
                        let text = text.unescape()?;
                        parent.children.push(Node::Text(text.into_owned()));
                    }
                }
                Event::CData(data) => {
                    if let Some(parent) = stack.last_mut() {
                        let data = String::from_utf8_lossy(&data.into_inner()).into_owned();
                        parent.children.push(Node::CData(data));
                    }
                }
                Event::Comment(comment) => {
                    if let Some(parent) = stack.last_mut() {
                        let comment = String::from_utf8_lossy(&comment.into_inner()).into_owned();
                        parent.children.push(Node::Comment(comment));
                    }
                }
                Event::Decl(_) | Event::PI(_) | Event::DocType(_) => {}
                Event::Eof => break,
            }
        }

        if !stack.is_empty() {
            return Err(CloneError::XmlError(format!(
                "Unclosed element <{}>",
                stack.last().map(|e| e.name.as_str()).unwrap_or_default()
            )));
        }

        root.ok_or_else(|| CloneError::XmlError("Document has no root element".to_string()))
    }

    /// Serialize this element as a standalone document.
    pub fn to_xml(&self) -> Result<String> {
        let mut writer = Writer::new(Vec::new());
        write_element(&mut writer, self)?;
        String::from_utf8(writer.into_inner())
            .map_err(|e| CloneError::XmlError(format!("Serialized XML is not UTF-8: {}", e)))
    }
}

fn element_from_start(start: &BytesStart<'_>) -> Result<Element> {
    let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    let mut el = Element::new(name);
    for attr in start.attributes() {
        let attr = attr.map_err(|e| CloneError::XmlError(e.to_string()))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value()?.into_owned();
        el.attributes.push((key, value));
    }
    Ok(el)
}

fn attach(stack: &mut [Element], root: &mut Option<Element>, el: Element) -> Result<()> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(Node::Element(el)),
        None if root.is_none() => *root = Some(el),
        None => {
            return Err(CloneError::XmlError(
                "Document has more than one root element".to_string(),
            ))
        }
    }
    Ok(())
}

fn write_element(writer: &mut Writer<Vec<u8>>, el: &Element) -> Result<()> {
    let mut start = BytesStart::new(el.name.as_str());
    for (key, value) in &el.attributes {
        start.push_attribute((key.as_str(), value.as_str()));
    }

    if el.children.is_empty() {
        return write_event(writer, Event::Empty(start));
    }

    write_event(writer, Event::Start(start))?;
    for node in &el.children {
        match node {
            Node::Element(child) => write_element(writer, child)?,
            Node::Text(text) => write_event(writer, Event::Text(BytesText::new(text)))?,
            Node::CData(data) => write_event(writer, Event::CData(BytesCData::new(data.as_str())))?,
            Node::Comment(comment) => {
                write_event(writer, Event::Comment(BytesText::from_escaped(comment.as_str())))?
            }
        }
    }
    write_event(writer, Event::End(BytesEnd::new(el.name.as_str())))
}

fn write_event(writer: &mut Writer<Vec<u8>>, event: Event<'_>) -> Result<()> {
    writer
        .write_event(event)
        .map_err(|e| CloneError::XmlError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_navigate() {
        let xml = r#"<domain type='kvm'>
  <name>web01</name>
  <devices>
    <disk type='file' device='disk'><source file='/a.qcow2'/></disk>
    <disk type='file' device='cdrom'/>
  </devices>
</domain>"#;

        let root = Element::parse(xml).unwrap();
        assert_eq!(root.name, "domain");
        assert_eq!(root.attr("type"), Some("kvm"));
        assert_eq!(root.child("name").unwrap().text(), "web01");
        assert_eq!(root.find_all("devices/disk").len(), 2);
        assert_eq!(
            root.find("devices/disk/source").and_then(|s| s.attr("file")),
            Some("/a.qcow2")
        );
        assert!(root.contains_element("source"));
        assert!(!root.contains_element("uuid"));
    }

    #[test]
    fn test_lookups_outlive_path_strings() {
        let root = Element::parse("<pool><target><path>/images</path></target></pool>").unwrap();

        let path = {
            let step = String::from("target");
            root.child(&step).and_then(|t| t.child("path"))
        };
        let all = {
            let query = format!("{}/{}", "target", "path");
            root.find_all(&query)
        };

        assert_eq!(path.map(|p| p.text()), Some("/images".to_string()));
        assert_eq!(all.len(), 1);
    }

    #[test]
    fn test_serialize_preserves_unknown_content() {
        let xml = "<domain><!-- keep me --><memory unit=\"KiB\">1048576</memory><seclabel type=\"dynamic\"/></domain>";
        let root = Element::parse(xml).unwrap();
        let out = root.to_xml().unwrap();

        assert_eq!(Element::parse(&out).unwrap(), root);
        assert!(out.contains("<!-- keep me -->"));
        assert!(out.contains(r#"<memory unit="KiB">1048576</memory>"#));
        assert!(out.contains(r#"<seclabel type="dynamic"/>"#));
    }

    #[test]
    fn test_escaping() {
        let root = Element::new("description").with_text("a < b & 'c'");
        let out = root.to_xml().unwrap();
        assert!(!out.contains("a < b"));
        assert_eq!(Element::parse(&out).unwrap().text(), "a < b & 'c'");
    }

    #[test]
    fn test_set_attr_replaces() {
        let el = Element::new("disk")
            .with_attr("type", "volume")
            .with_attr("type", "file");
        assert_eq!(el.attributes.len(), 1);
        assert_eq!(el.attr("type"), Some("file"));
    }

    #[test]
    fn test_malformed_documents() {
        assert!(Element::parse("").is_err());
        assert!(Element::parse("<domain><name></domain>").is_err());
    }
}
