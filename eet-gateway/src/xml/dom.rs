//! A small namespace-aware XML tree.
//!
//! Signature processing needs what general-purpose deserializers throw away:
//! the exact prefixes, the namespace declarations on each element and the
//! whitespace between elements. [`Document::parse`] keeps all of that, resolves
//! every prefix against its scope and drops comments.
//!
//! Elements are addressed by an [`ElementPath`], a list of child indices from
//! the root, so a reference can be resolved without parent pointers.

use std::{borrow::Cow, collections::BTreeMap};

use quick_xml::{
    Reader,
    events::{BytesStart, Event},
};

use super::XmlError;

/// Namespace bound to the `xml` prefix.
pub const XML_NS: &str = "http://www.w3.org/XML/1998/namespace";

/// Child indices from the document element down to an element.
///
/// The empty path addresses the document element itself.
pub type ElementPath = Vec<usize>;

/// In-scope namespace bindings, keyed by prefix (`None` for the default namespace).
pub type NamespaceScope = BTreeMap<Option<String>, String>;

/// A parsed XML document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// The document element.
    pub root: Element,
}

/// An element with its namespace context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    /// Prefix as written in the source.
    pub prefix: Option<String>,
    /// Local name.
    pub local: String,
    /// Resolved namespace URI.
    pub namespace: Option<String>,
    /// Namespace declarations made on this element, in source order.
    pub ns_decls: Vec<Namespace>,
    /// Ordinary attributes, in source order.
    pub attributes: Vec<Attribute>,
    /// Child nodes.
    pub children: Vec<Node>,
}

/// A namespace declaration. An empty `uri` undeclares the default namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespace {
    /// Declared prefix, `None` for `xmlns="..."`.
    pub prefix: Option<String>,
    /// Namespace URI.
    pub uri: String,
}

/// An attribute with its value already unescaped and normalised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    /// Prefix as written in the source.
    pub prefix: Option<String>,
    /// Local name.
    pub local: String,
    /// Resolved namespace URI; unprefixed attributes have none.
    pub namespace: Option<String>,
    /// Attribute value.
    pub value: String,
}

/// Content of an element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    /// Child element.
    Element(Element),
    /// Character data, unescaped.
    Text(String),
    /// Processing instruction.
    ProcessingInstruction {
        /// PI target.
        target: String,
        /// Everything after the target, leading whitespace removed.
        data: String,
    },
}

impl Element {
    /// Returns the name as written, `prefix:local` or `local`.
    #[must_use]
    pub fn qualified_name(&self) -> Cow<'_, str> {
        match &self.prefix {
            Some(prefix) => Cow::Owned(format!("{prefix}:{}", self.local)),
            None => Cow::Borrowed(&self.local),
        }
    }

    /// Returns `true` when the element has the given namespace and local name.
    #[must_use]
    pub fn is(&self, namespace: &str, local: &str) -> bool {
        self.local == local && self.namespace.as_deref() == Some(namespace)
    }

    /// Iterates over child elements with their index in `children`.
    pub fn child_elements(&self) -> impl Iterator<Item = (usize, &Element)> {
        self.children.iter().enumerate().filter_map(|(i, node)| match node {
            Node::Element(element) => Some((i, element)),
            _ => None,
        })
    }

    /// Finds the first child element with the given name.
    #[must_use]
    pub fn child(&self, namespace: &str, local: &str) -> Option<(usize, &Element)> {
        self.child_elements().find(|(_, element)| element.is(namespace, local))
    }

    /// Iterates over every child element with the given name.
    pub fn children_named<'a>(
        &'a self,
        namespace: &'a str,
        local: &'a str,
    ) -> impl Iterator<Item = &'a Element> + 'a {
        self.child_elements().map(|(_, e)| e).filter(move |e| e.is(namespace, local))
    }

    /// Looks up an unqualified attribute.
    #[must_use]
    pub fn attribute(&self, local: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.namespace.is_none() && a.local == local)
            .map(|a| a.value.as_str())
    }

    /// Looks up an attribute in a namespace.
    #[must_use]
    pub fn attribute_ns(&self, namespace: &str, local: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.local == local && a.namespace.as_deref() == Some(namespace))
            .map(|a| a.value.as_str())
    }

    /// Concatenated text of the direct text children.
    #[must_use]
    pub fn text(&self) -> String {
        self.children
            .iter()
            .filter_map(|node| match node {
                Node::Text(text) => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Follows `path` from this element.
    #[must_use]
    pub fn descend(&self, path: &[usize]) -> Option<&Element> {
        path.iter().try_fold(self, |element, &index| match element.children.get(index) {
            Some(Node::Element(child)) => Some(child),
            _ => None,
        })
    }
}

impl Document {
    /// Parses a complete document.
    ///
    /// Document type declarations are rejected; comments are dropped.
    pub fn parse(input: &[u8]) -> Result<Self, XmlError> {
        let text = std::str::from_utf8(input).map_err(|e| XmlError::Malformed(e.to_string()))?;
        let mut reader = Reader::from_str(text);
        reader.config_mut().trim_text(false);

        let mut scopes: Vec<Vec<Namespace>> = Vec::new();
        let mut open: Vec<Element> = Vec::new();
        let mut root: Option<Element> = None;

        loop {
            let event = reader
                .read_event()
                .map_err(|e| XmlError::Malformed(format!("at {}: {e}", reader.buffer_position())))?;
            match event {
                Event::Start(start) => {
                    let element = open_element(&start, &mut scopes)?;
                    open.push(element);
                }
                Event::Empty(start) => {
                    let element = open_element(&start, &mut scopes)?;
                    scopes.pop();
                    attach(element, &mut open, &mut root)?;
                }
                Event::End(_) => {
                    let element = open
                        .pop()
                        .ok_or_else(|| XmlError::Malformed("unexpected end tag".to_owned()))?;
                    scopes.pop();
                    attach(element, &mut open, &mut root)?;
                }
                Event::Text(text) => {
                    let raw = std::str::from_utf8(&text).map_err(|e| XmlError::Malformed(e.to_string()))?;
                    let normalized = normalize_line_endings(raw);
                    let value = quick_xml::escape::unescape(&normalized)
                        .map_err(|e| XmlError::Malformed(e.to_string()))?;
                    push_text(&mut open, &value)?;
                }
                Event::CData(data) => {
                    let raw = std::str::from_utf8(&data).map_err(|e| XmlError::Malformed(e.to_string()))?;
                    push_text(&mut open, &normalize_line_endings(raw))?;
                }
                Event::PI(pi) => {
                    let raw = std::str::from_utf8(&pi).map_err(|e| XmlError::Malformed(e.to_string()))?;
                    let (target, data) = raw.split_once(char::is_whitespace).unwrap_or((raw, ""));
                    if let Some(parent) = open.last_mut() {
                        parent.children.push(Node::ProcessingInstruction {
                            target: target.to_owned(),
                            data: data.trim_start().to_owned(),
                        });
                    }
                }
                Event::DocType(_) => return Err(XmlError::DocType),
                Event::Decl(_) | Event::Comment(_) => {}
                Event::Eof => break,
            }
        }

        if !open.is_empty() {
            return Err(XmlError::Malformed("unclosed element at end of input".to_owned()));
        }
        root.map(|root| Self { root }).ok_or(XmlError::Empty)
    }

    /// Returns the element at `path`.
    #[must_use]
    pub fn element_at(&self, path: &[usize]) -> Option<&Element> {
        self.root.descend(path)
    }

    /// Resolves a chain of `(namespace, local)` names starting with the
    /// document element, taking the first match at every level.
    #[must_use]
    pub fn find_path(&self, steps: &[(&str, &str)]) -> Option<ElementPath> {
        let ((ns, local), rest) = steps.split_first()?;
        if !self.root.is(ns, local) {
            return None;
        }
        let mut path = Vec::with_capacity(rest.len());
        let mut current = &self.root;
        for (ns, local) in rest {
            let (index, child) = current.child(ns, local)?;
            path.push(index);
            current = child;
        }
        Some(path)
    }

    /// Namespace bindings visible at the element addressed by `path`,
    /// including its own declarations.
    #[must_use]
    pub fn namespaces_in_scope(&self, path: &[usize]) -> NamespaceScope {
        let mut scope = NamespaceScope::new();
        let mut current = Some(&self.root);
        let mut remaining = path.iter();
        while let Some(element) = current {
            for ns in &element.ns_decls {
                scope.insert(ns.prefix.clone(), ns.uri.clone());
            }
            current = remaining.next().and_then(|&index| match element.children.get(index) {
                Some(Node::Element(child)) => Some(child),
                _ => None,
            });
        }
        scope
    }
}

fn open_element(start: &BytesStart<'_>, scopes: &mut Vec<Vec<Namespace>>) -> Result<Element, XmlError> {
    let (prefix, local) = split_qname(start.name().as_ref())?;

    let mut ns_decls = Vec::new();
    let mut raw_attributes = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|e| XmlError::Malformed(e.to_string()))?;
        let value = attribute_value(&attr.value)?;
        let (attr_prefix, attr_local) = split_qname(attr.key.as_ref())?;
        match (attr_prefix.as_deref(), attr_local.as_str()) {
            (None, "xmlns") => ns_decls.push(Namespace { prefix: None, uri: value }),
            (Some("xmlns"), declared) => {
                if value.is_empty() {
                    return Err(XmlError::Malformed(format!("prefix {declared} bound to empty namespace")));
                }
                ns_decls.push(Namespace { prefix: Some(declared.to_owned()), uri: value });
            }
            _ => raw_attributes.push((attr_prefix, attr_local, value)),
        }
    }
    scopes.push(ns_decls.clone());

    let namespace = match &prefix {
        Some(p) => Some(resolve(scopes, Some(p))?),
        None => resolve(scopes, None).ok().filter(|uri| !uri.is_empty()),
    };

    let attributes = raw_attributes
        .into_iter()
        .map(|(prefix, local, value)| {
            let namespace = prefix.as_deref().map(|p| resolve(scopes, Some(p))).transpose()?;
            Ok(Attribute { prefix, local, namespace, value })
        })
        .collect::<Result<Vec<_>, XmlError>>()?;

    Ok(Element { prefix, local, namespace, ns_decls, attributes, children: Vec::new() })
}

fn resolve(scopes: &[Vec<Namespace>], prefix: Option<&str>) -> Result<String, XmlError> {
    if prefix == Some("xml") {
        return Ok(XML_NS.to_owned());
    }
    scopes
        .iter()
        .rev()
        .flat_map(|scope| scope.iter())
        .find(|ns| ns.prefix.as_deref() == prefix)
        .map(|ns| ns.uri.clone())
        .ok_or_else(|| XmlError::UnboundPrefix(prefix.unwrap_or_default().to_owned()))
}

fn split_qname(raw: &[u8]) -> Result<(Option<String>, String), XmlError> {
    let name = std::str::from_utf8(raw).map_err(|e| XmlError::Malformed(e.to_string()))?;
    Ok(match name.split_once(':') {
        Some((prefix, local)) => (Some(prefix.to_owned()), local.to_owned()),
        None => (None, name.to_owned()),
    })
}

// Literal whitespace becomes a space before references are expanded, so
// `&#10;` survives as a newline.
fn attribute_value(raw: &[u8]) -> Result<String, XmlError> {
    let raw = std::str::from_utf8(raw).map_err(|e| XmlError::Malformed(e.to_string()))?;
    let normalized = normalize_line_endings(raw).replace(['\t', '\n'], " ");
    quick_xml::escape::unescape(&normalized)
        .map(Cow::into_owned)
        .map_err(|e| XmlError::Malformed(e.to_string()))
}

fn normalize_line_endings(raw: &str) -> Cow<'_, str> {
    if raw.contains('\r') {
        Cow::Owned(raw.replace("\r\n", "\n").replace('\r', "\n"))
    } else {
        Cow::Borrowed(raw)
    }
}

fn push_text(open: &mut [Element], text: &str) -> Result<(), XmlError> {
    match open.last_mut() {
        Some(parent) => {
            if let Some(Node::Text(previous)) = parent.children.last_mut() {
                previous.push_str(text);
            } else {
                parent.children.push(Node::Text(text.to_owned()));
            }
            Ok(())
        }
        None if text.trim().is_empty() => Ok(()),
        None => Err(XmlError::Malformed("text outside the document element".to_owned())),
    }
}

fn attach(element: Element, open: &mut [Element], root: &mut Option<Element>) -> Result<(), XmlError> {
    match open.last_mut() {
        Some(parent) => {
            parent.children.push(Node::Element(element));
            Ok(())
        }
        None if root.is_none() => {
            *root = Some(element);
            Ok(())
        }
        None => Err(XmlError::Malformed("more than one document element".to_owned())),
    }
}
