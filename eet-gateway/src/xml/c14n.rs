//! Exclusive XML Canonicalization 1.0, without comments.
//!
//! Output follows `http://www.w3.org/2001/10/xml-exc-c14n#`: a namespace
//! declaration is emitted on an element only when the element or one of its
//! attributes uses the prefix (or the prefix is in the inclusive list) and the
//! nearest output ancestor did not already emit the same binding. Attributes
//! are ordered by namespace URI then local name, empty elements are written
//! as start/end tag pairs.
//!
//! # Examples
//!
//! ```
//! use eet_gateway::xml::{Document, canonicalize};
//!
//! let doc = Document::parse(br#"<a:r xmlns:a="urn:a" xmlns:b="urn:b"><a:c z="1"/></a:r>"#)?;
//! let out = canonicalize(&doc, &[0], &[])?;
//! assert_eq!(out, br#"<a:c xmlns:a="urn:a" z="1"></a:c>"#);
//! # Ok::<(), eet_gateway::xml::XmlError>(())
//! ```

use std::collections::BTreeSet;

use super::{
    XmlError,
    dom::{Document, Element, NamespaceScope, Node},
};

/// Token that selects the default namespace in an inclusive prefix list.
pub const DEFAULT_PREFIX_TOKEN: &str = "#default";

/// Canonicalizes the subtree rooted at `path`.
///
/// `inclusive_prefixes` is the whitespace-split `PrefixList` of an
/// `InclusiveNamespaces` element; `#default` stands for the default namespace.
pub fn canonicalize(
    doc: &Document,
    path: &[usize],
    inclusive_prefixes: &[&str],
) -> Result<Vec<u8>, XmlError> {
    let apex = doc.element_at(path).ok_or_else(|| XmlError::InvalidPath(path.to_vec()))?;
    let inherited = match path.split_last() {
        Some((_, parent)) => doc.namespaces_in_scope(parent),
        None => NamespaceScope::new(),
    };
    let inclusive: Vec<Option<String>> = inclusive_prefixes
        .iter()
        .map(|p| if *p == DEFAULT_PREFIX_TOKEN { None } else { Some((*p).to_owned()) })
        .collect();

    let mut out = Vec::new();
    write_element(apex, &inherited, &NamespaceScope::new(), &inclusive, &mut out)?;
    Ok(out)
}

fn write_element(
    element: &Element,
    parent_scope: &NamespaceScope,
    rendered: &NamespaceScope,
    inclusive: &[Option<String>],
    out: &mut Vec<u8>,
) -> Result<(), XmlError> {
    let mut scope = parent_scope.clone();
    for ns in &element.ns_decls {
        scope.insert(ns.prefix.clone(), ns.uri.clone());
    }

    let mut utilized: BTreeSet<Option<String>> = BTreeSet::new();
    utilized.insert(element.prefix.clone());
    for attr in &element.attributes {
        if attr.prefix.is_some() {
            utilized.insert(attr.prefix.clone());
        }
    }
    for prefix in inclusive {
        if scope.contains_key(prefix) {
            utilized.insert(prefix.clone());
        }
    }

    let mut now_rendered = rendered.clone();
    let mut declarations: Vec<(Option<String>, String)> = Vec::new();
    for prefix in utilized {
        if prefix.as_deref() == Some("xml") {
            continue;
        }
        let uri = match (&prefix, scope.get(&prefix)) {
            (_, Some(uri)) => uri.clone(),
            (None, None) => String::new(),
            (Some(p), None) => return Err(XmlError::UnboundPrefix(p.clone())),
        };
        if prefix.is_none() && uri.is_empty() {
            if rendered.get(&None).is_some_and(|u| !u.is_empty()) {
                now_rendered.insert(None, String::new());
                declarations.push((None, String::new()));
            }
            continue;
        }
        if rendered.get(&prefix) != Some(&uri) {
            now_rendered.insert(prefix.clone(), uri.clone());
            declarations.push((prefix, uri));
        }
    }

    let name = element.qualified_name();
    out.push(b'<');
    out.extend_from_slice(name.as_bytes());
    for (prefix, uri) in &declarations {
        match prefix {
            Some(p) => {
                out.extend_from_slice(b" xmlns:");
                out.extend_from_slice(p.as_bytes());
            }
            None => out.extend_from_slice(b" xmlns"),
        }
        out.extend_from_slice(b"=\"");
        escape_attribute(uri, out);
        out.push(b'"');
    }

    let mut attributes: Vec<_> = element.attributes.iter().collect();
    attributes.sort_by(|a, b| {
        (a.namespace.as_deref().unwrap_or(""), a.local.as_str())
            .cmp(&(b.namespace.as_deref().unwrap_or(""), b.local.as_str()))
    });
    for attr in attributes {
        out.push(b' ');
        if let Some(prefix) = &attr.prefix {
            out.extend_from_slice(prefix.as_bytes());
            out.push(b':');
        }
        out.extend_from_slice(attr.local.as_bytes());
        out.extend_from_slice(b"=\"");
        escape_attribute(&attr.value, out);
        out.push(b'"');
    }
    out.push(b'>');

    for child in &element.children {
        match child {
            Node::Element(child) => write_element(child, &scope, &now_rendered, inclusive, out)?,
            Node::Text(text) => escape_text(text, out),
            Node::ProcessingInstruction { target, data } => {
                out.extend_from_slice(b"<?");
                out.extend_from_slice(target.as_bytes());
                if !data.is_empty() {
                    out.push(b' ');
                    out.extend_from_slice(data.as_bytes());
                }
                out.extend_from_slice(b"?>");
            }
        }
    }

    out.extend_from_slice(b"</");
    out.extend_from_slice(name.as_bytes());
    out.push(b'>');
    Ok(())
}

fn escape_text(text: &str, out: &mut Vec<u8>) {
    for ch in text.chars() {
        match ch {
            '&' => out.extend_from_slice(b"&amp;"),
            '<' => out.extend_from_slice(b"&lt;"),
            '>' => out.extend_from_slice(b"&gt;"),
            '\r' => out.extend_from_slice(b"&#xD;"),
            other => push_char(other, out),
        }
    }
}

fn escape_attribute(value: &str, out: &mut Vec<u8>) {
    for ch in value.chars() {
        match ch {
            '&' => out.extend_from_slice(b"&amp;"),
            '<' => out.extend_from_slice(b"&lt;"),
            '"' => out.extend_from_slice(b"&quot;"),
            '\t' => out.extend_from_slice(b"&#x9;"),
            '\n' => out.extend_from_slice(b"&#xA;"),
            '\r' => out.extend_from_slice(b"&#xD;"),
            other => push_char(other, out),
        }
    }
}

fn push_char(ch: char, out: &mut Vec<u8>) {
    let mut buf = [0u8; 4];
    out.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn canon(xml: &str, path: &[usize], inclusive: &[&str]) -> String {
        let doc = Document::parse(xml.as_bytes()).unwrap();
        String::from_utf8(canonicalize(&doc, path, inclusive).unwrap()).unwrap()
    }

    #[test]
    fn test_orders_namespaces_and_attributes() {
        let xml = r#"<a:root xmlns:a="urn:a" xmlns:b="urn:b"><a:child b:attr="1" z="2" a:y="3"/></a:root>"#;
        assert_eq!(
            canon(xml, &[0], &[]),
            r#"<a:child xmlns:a="urn:a" xmlns:b="urn:b" z="2" a:y="3" b:attr="1"></a:child>"#
        );
    }

    #[test]
    fn test_omits_unused_namespaces() {
        let xml = r#"<a:root xmlns:a="urn:a" xmlns:b="urn:b" xmlns="urn:d"><a:x/></a:root>"#;
        assert_eq!(canon(xml, &[], &[]), r#"<a:root xmlns:a="urn:a"><a:x></a:x></a:root>"#);
    }

    #[test]
    fn test_inclusive_prefixes_are_rendered() {
        let xml = r#"<a:root xmlns:a="urn:a" xmlns:b="urn:b" xmlns="urn:d"><a:x/></a:root>"#;
        assert_eq!(
            canon(xml, &[], &["b", "#default"]),
            r#"<a:root xmlns="urn:d" xmlns:a="urn:a" xmlns:b="urn:b"><a:x></a:x></a:root>"#
        );
    }

    #[test]
    fn test_apex_inherits_ancestor_bindings() {
        let xml = r#"<s:Envelope xmlns:s="urn:s" xmlns:u="urn:u"><s:Header/><s:Body u:Id="_1"><t xmlns="urn:t">v</t></s:Body></s:Envelope>"#;
        assert_eq!(
            canon(xml, &[1], &[]),
            r#"<s:Body xmlns:s="urn:s" xmlns:u="urn:u" u:Id="_1"><t xmlns="urn:t">v</t></s:Body>"#
        );
    }

    #[test]
    fn test_default_namespace_undeclaration() {
        let xml = r#"<root xmlns="urn:x"><inner xmlns=""><leaf/></inner></root>"#;
        assert_eq!(
            canon(xml, &[], &[]),
            r#"<root xmlns="urn:x"><inner xmlns=""><leaf></leaf></inner></root>"#
        );
        // Nothing to undeclare when no ancestor rendered a default namespace.
        assert_eq!(canon(xml, &[0], &[]), "<inner><leaf></leaf></inner>");
    }

    #[test]
    fn test_redundant_declarations_dropped() {
        let xml = r#"<a:r xmlns:a="urn:a"><a:c xmlns:a="urn:a"><a:d/></a:c></a:r>"#;
        assert_eq!(canon(xml, &[], &[]), r#"<a:r xmlns:a="urn:a"><a:c><a:d></a:d></a:c></a:r>"#);
    }

    #[test]
    fn test_escaping() {
        let xml = "<a attr=\"&quot;&lt;&gt;&#9;&#10;\">1 &lt; 2 &gt; 0 &amp; \"q\"<![CDATA[<x>]]></a>";
        assert_eq!(
            canon(xml, &[], &[]),
            "<a attr=\"&quot;&lt;>&#x9;&#xA;\">1 &lt; 2 &gt; 0 &amp; \"q\"&lt;x&gt;</a>"
        );
    }

    #[test]
    fn test_invalid_path() {
        let doc = Document::parse(b"<a>text</a>").unwrap();
        assert!(matches!(canonicalize(&doc, &[0], &[]), Err(XmlError::InvalidPath(_))));
        assert!(matches!(canonicalize(&doc, &[5], &[]), Err(XmlError::InvalidPath(_))));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_canonicalization_is_idempotent(
            text in "[a-zA-Z0-9 &<>\"'\t\n]{0,24}",
            value in "[a-zA-Z0-9 &<>\"'\t\n]{0,24}",
            declare_unused in any::<bool>(),
        ) {
            let extra = if declare_unused { r#" xmlns:unused="urn:unused""# } else { "" };
            let xml = format!(
                r#"<p:root xmlns:p="urn:p"{extra} xmlns="urn:d"><p:item b="{v}" a="{v}">{t}<leaf/></p:item></p:root>"#,
                v = quick_xml::escape::escape(value.as_str()),
                t = quick_xml::escape::escape(text.as_str()),
            );
            let doc = Document::parse(xml.as_bytes()).unwrap();
            let first = canonicalize(&doc, &[0], &[]).unwrap();
            let reparsed = Document::parse(&first).unwrap();
            let second = canonicalize(&reparsed, &[], &[]).unwrap();
            prop_assert_eq!(first, second);
        }
    }
}
