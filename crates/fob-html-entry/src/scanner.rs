//! Subresource reference scanning and rewriting.
//!
//! A document is parsed with html5ever into an `RcDom`. Matching elements are
//! found in document order:
//!
//! - `<script src>` with no `type`, an empty `type`,
//!   `type="application/javascript"` or `type="module"`
//! - `<link rel="stylesheet" href>`
//!
//! References that point at `data:` URLs, absolute paths or anything with a
//! scheme (`://`) are left alone. Module scripts build as ESM; classic scripts
//! and stylesheets build as IIFE.
//!
//! The DOM is `Rc`-based and therefore not `Send`. [`ScannedDocument`] keeps
//! only the source text and the element list, and re-parses when it is
//! serialised, so the handle can be held across `.await` points.

use std::cell::RefCell;
use std::rc::Rc;

use html5ever::serialize::{SerializeOpts, serialize};
use html5ever::tendril::{StrTendril, TendrilSink};
use html5ever::{Attribute, LocalName, Namespace, ParseOpts, QualName, parse_document};
use markup5ever_rcdom::{Handle, Node, NodeData, RcDom, SerializableHandle};

use crate::types::Mode;
use crate::{Error, Result};

const HTML_NAMESPACE: &str = "http://www.w3.org/1999/xhtml";

/// One reference found in a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredElement {
    /// Position among the discovered elements, in document order.
    pub index: usize,
    /// Attribute holding the reference: `src` or `href`.
    pub attribute: &'static str,
    pub href: String,
    pub mode: Mode,
}

/// A stylesheet `<link>` to insert before a script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompanionLink {
    pub href: String,
    pub integrity: Option<String>,
}

/// Replacement attributes for one discovered element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementEdit {
    pub index: usize,
    pub href: String,
    pub integrity: Option<String>,
    pub companion: Option<CompanionLink>,
}

/// A parsed document and the references it contains.
#[derive(Debug, Clone)]
pub struct ScannedDocument {
    path: String,
    source: String,
    elements: Vec<DiscoveredElement>,
}

impl ScannedDocument {
    pub fn parse(source: impl Into<String>) -> Self {
        let source = source.into();
        let dom = parse(&source);
        let elements = find_elements(&dom.document)
            .into_iter()
            .map(|(_, element)| element)
            .collect();
        Self {
            path: String::new(),
            source,
            elements,
        }
    }

    /// Name the document in error messages.
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn elements(&self) -> &[DiscoveredElement] {
        &self.elements
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Apply `edits` and serialise.
    ///
    /// Without edits the source text is returned as-is; the document is only
    /// re-serialised when something in it changed.
    pub fn serialize(&self, edits: &[ElementEdit]) -> Result<String> {
        if edits.is_empty() {
            return Ok(self.source.clone());
        }

        let dom = parse(&self.source);
        let elements = find_elements(&dom.document);

        for edit in edits {
            let (handle, element) = elements.get(edit.index).ok_or_else(|| Error::Scan {
                path: self.path.clone(),
                message: format!("no element at index {}", edit.index),
            })?;

            set_attribute(handle, element.attribute, &edit.href);
            if let Some(integrity) = &edit.integrity {
                set_attribute(handle, "integrity", integrity);
            }

            if let Some(companion) = &edit.companion {
                insert_companion_link(handle, companion).map_err(|message| Error::Scan {
                    path: self.path.clone(),
                    message,
                })?;
            }
        }

        let mut bytes = Vec::with_capacity(self.source.len() + 64);
        let document: SerializableHandle = dom.document.clone().into();
        serialize(&mut bytes, &document, SerializeOpts::default()).map_err(|e| Error::Scan {
            path: self.path.clone(),
            message: format!("failed to serialise document: {}", e),
        })?;

        String::from_utf8(bytes).map_err(|e| Error::Scan {
            path: self.path.clone(),
            message: format!("serialised document is not UTF-8: {}", e),
        })
    }
}

fn parse(source: &str) -> RcDom {
    parse_document(RcDom::default(), ParseOpts::default()).one(source)
}

fn find_elements(document: &Handle) -> Vec<(Handle, DiscoveredElement)> {
    let mut found = Vec::new();
    walk(document, &mut found);
    found
}

fn walk(handle: &Handle, found: &mut Vec<(Handle, DiscoveredElement)>) {
    if let Some((attribute, href, mode)) = classify(handle) {
        let index = found.len();
        found.push((
            Rc::clone(handle),
            DiscoveredElement {
                index,
                attribute,
                href,
                mode,
            },
        ));
    }

    for child in handle.children.borrow().iter() {
        walk(child, found);
    }
}

fn classify(handle: &Handle) -> Option<(&'static str, String, Mode)> {
    let NodeData::Element { name, attrs, .. } = &handle.data else {
        return None;
    };
    if name.ns.as_ref() != HTML_NAMESPACE {
        return None;
    }

    let attrs = attrs.borrow();
    let attr = |key: &str| {
        attrs
            .iter()
            .find(|a| a.name.local.as_ref() == key)
            .map(|a| a.value.to_string())
    };

    let (attribute, href, mode) = match name.local.as_ref() {
        "script" => {
            let mode = match attr("type").as_deref() {
                None | Some("") | Some("application/javascript") => Mode::Iife,
                Some("module") => Mode::Esm,
                Some(_) => return None,
            };
            ("src", attr("src")?, mode)
        }
        "link" => {
            let rel = attr("rel")?;
            if !rel.split_ascii_whitespace().any(|token| token.eq_ignore_ascii_case("stylesheet")) {
                return None;
            }
            ("href", attr("href")?, Mode::Iife)
        }
        _ => return None,
    };

    if is_local_reference(&href) {
        Some((attribute, href, mode))
    } else {
        None
    }
}

/// Whether `href` names a file the build should compile.
pub fn is_local_reference(href: &str) -> bool {
    !(href.starts_with("data:")
        || href.starts_with('/')
        || href.starts_with('\\')
        || std::path::Path::new(href).is_absolute()
        || href.contains("://"))
}

fn attribute_name(local: &str) -> QualName {
    QualName::new(None, Namespace::from(""), LocalName::from(local))
}

fn set_attribute(handle: &Handle, key: &str, value: &str) {
    let NodeData::Element { attrs, .. } = &handle.data else {
        return;
    };
    let mut attrs = attrs.borrow_mut();
    match attrs.iter_mut().find(|a| a.name.local.as_ref() == key) {
        Some(existing) => existing.value = StrTendril::from_slice(value),
        None => attrs.push(Attribute {
            name: attribute_name(key),
            value: StrTendril::from_slice(value),
        }),
    }
}

/// Insert `<link rel="stylesheet">` before `script`, followed by the
/// whitespace that preceded the script on its line so both keep the same
/// indentation.
fn insert_companion_link(
    script: &Handle,
    companion: &CompanionLink,
) -> std::result::Result<(), String> {
    let parent = script
        .parent
        .take()
        .and_then(|weak| {
            let parent = weak.upgrade();
            script.parent.set(Some(weak));
            parent
        })
        .ok_or_else(|| "script element has no parent".to_string())?;

    let mut attrs = vec![
        Attribute {
            name: attribute_name("rel"),
            value: StrTendril::from_slice("stylesheet"),
        },
        Attribute {
            name: attribute_name("href"),
            value: StrTendril::from_slice(&companion.href),
        },
    ];
    if let Some(integrity) = &companion.integrity {
        attrs.push(Attribute {
            name: attribute_name("integrity"),
            value: StrTendril::from_slice(integrity),
        });
    }

    let link = Node::new(NodeData::Element {
        name: QualName::new(None, Namespace::from(HTML_NAMESPACE), LocalName::from("link")),
        attrs: RefCell::new(attrs),
        template_contents: RefCell::new(None),
        mathml_annotation_xml_integration_point: false,
    });
    link.parent.set(Some(Rc::downgrade(&parent)));

    let mut children = parent.children.borrow_mut();
    let position = children
        .iter()
        .position(|child| Rc::ptr_eq(child, script))
        .ok_or_else(|| "script element not found under its parent".to_string())?;

    let indentation = position
        .checked_sub(1)
        .and_then(|previous| match &children[previous].data {
            NodeData::Text { contents } => Some(line_indentation(&contents.borrow())),
            _ => None,
        });

    children.insert(position, link);

    if let Some(indentation) = indentation {
        let text = Node::new(NodeData::Text {
            contents: RefCell::new(StrTendril::from_slice(&indentation)),
        });
        text.parent.set(Some(Rc::downgrade(&parent)));
        children.insert(position + 1, text);
    }

    Ok(())
}

/// The trailing newline and whitespace of `text`; non-whitespace is dropped.
fn line_indentation(text: &str) -> String {
    let tail = match text.rfind('\n') {
        Some(newline) => &text[newline..],
        None => text,
    };
    tail.chars().filter(|c| c.is_whitespace()).collect()
}
