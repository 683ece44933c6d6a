//! Parsed page document with attribute rewriting
//!
//! Rewritten attributes are written straight into the `scraper` tree, so the
//! document serializes through html5ever with every other node untouched.

use crate::MirrorError;
use ego_tree::NodeId;
use html5ever::{LocalName, Namespace, QualName};
use scraper::node::Node;
use scraper::{ElementRef, Html, Selector, StrTendril};
use std::collections::HashSet;

/// An HTML document with rewritable attributes
pub struct Dom {
    html: Html,
}

impl Dom {
    /// Parses a full HTML document
    pub fn parse(html: &str) -> Self {
        Self {
            html: Html::parse_document(html),
        }
    }

    /// The underlying parsed document
    pub fn document(&self) -> &Html {
        &self.html
    }

    fn selector(selector: &str) -> Result<Selector, MirrorError> {
        Selector::parse(selector).map_err(|e| MirrorError::Selector {
            selector: selector.to_string(),
            message: format!("{:?}", e),
        })
    }

    fn element(&self, id: NodeId) -> Option<ElementRef<'_>> {
        self.html.tree.get(id).and_then(ElementRef::wrap)
    }

    /// Returns the elements matching a CSS selector, in document order
    pub fn select(&self, selector: &str) -> Result<Vec<NodeId>, MirrorError> {
        let selector = Self::selector(selector)?;
        Ok(self.html.select(&selector).map(|e| e.id()).collect())
    }

    /// Returns the `inner` elements found inside any `scope` element
    ///
    /// Elements reachable from several scopes are returned once.
    pub fn select_in(&self, scope: &str, inner: &str) -> Result<Vec<NodeId>, MirrorError> {
        let scope = Self::selector(scope)?;
        let inner = Self::selector(inner)?;

        let mut seen = HashSet::new();
        let mut ids = Vec::new();
        for container in self.html.select(&scope) {
            for element in container.select(&inner) {
                if seen.insert(element.id()) {
                    ids.push(element.id());
                }
            }
        }
        Ok(ids)
    }

    /// Reads an attribute without namespace
    pub fn attr(&self, id: NodeId, name: &str) -> Option<&str> {
        self.element(id).and_then(|e| e.value().attr(name))
    }

    /// Rewrites (or adds) an attribute without namespace
    ///
    /// Only for attributes other than `id` and `class`, which `scraper` caches.
    pub fn set_attr(&mut self, id: NodeId, name: &str, value: impl Into<String>) {
        let Some(mut node) = self.html.tree.get_mut(id) else {
            return;
        };
        if let Node::Element(element) = node.value() {
            let name = QualName::new(None, Namespace::from(""), LocalName::from(name));
            let value: String = value.into();
            element.attrs.insert(name, StrTendril::from(value));
        }
    }

    /// Text content of an element
    pub fn text(&self, id: NodeId) -> String {
        self.element(id)
            .map(|e| e.text().collect::<String>())
            .unwrap_or_default()
    }

    /// Attribute of the first element matching `selector`
    pub fn first_attr(&self, selector: &str, name: &str) -> Option<String> {
        let ids = self.select(selector).ok()?;
        ids.into_iter()
            .next()
            .and_then(|id| self.attr(id, name))
            .map(str::to_string)
    }

    /// Page title with line breaks removed
    pub fn title(&self) -> Option<String> {
        let id = self.select("title").ok()?.into_iter().next()?;
        let title = self.text(id).replace(['\r', '\n'], "");
        let title = title.trim();
        (!title.is_empty()).then(|| title.to_string())
    }

    /// `href` of the `<base>` element in the head
    pub fn base_href(&self) -> Option<String> {
        self.first_attr("head base", "href")
            .filter(|href| !href.trim().is_empty())
    }

    /// Serializes the whole document, rewritten attributes included
    pub fn html(&self) -> String {
        self.html.html()
    }

    /// Serializes the children of the first element matching `selector`
    pub fn inner_html(&self, selector: &str) -> Option<String> {
        let id = self.select(selector).ok()?.into_iter().next()?;
        self.element(id).map(|e| e.inner_html())
    }
}
