//! `install.rdf` id lookup.
//!
//! The install manifest is RDF/XML. Rather than matching on element paths,
//! the document is read into a flat list of triples (in document order) and
//! the id is looked up on the install-manifest root subject. Nested
//! `em:targetApplication` descriptions carry their own `em:id`, so a path
//! match would be ambiguous.
//!
//! Supported RDF/XML subset: `rdf:Description` and typed node elements,
//! `rdf:about` (and the legacy unqualified `about`), `rdf:ID`,
//! `rdf:nodeID`, property attributes, literal property elements,
//! `rdf:resource`, nested node elements and `rdf:parseType="Resource"`.

use std::collections::HashMap;

use roxmltree::{Document, Node};

use crate::error::{SignError, SignResult};

use super::INSTALL_RDF;

/// RDF syntax namespace.
pub const RDF_NS: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#";

/// Extension manager namespace.
pub const EM_NS: &str = "http://www.mozilla.org/2004/em-rdf#";

/// Subject of the install manifest.
pub const INSTALL_MANIFEST: &str = "urn:mozilla:install-manifest";

const XML_NS: &str = "http://www.w3.org/XML/1998/namespace";
const RDF_TYPE: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#type";
const MAX_DEPTH: usize = 64;

/// An RDF term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Term {
    Uri(String),
    Blank(usize),
    Literal(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Triple {
    pub subject: Term,
    pub predicate: String,
    pub object: Term,
}

/// Triples of one RDF/XML document, in document order.
#[derive(Debug, Default)]
pub struct Graph {
    triples: Vec<Triple>,
    blank_count: usize,
    node_ids: HashMap<String, usize>,
}

impl Graph {
    /// Parse an RDF/XML document.
    pub fn parse(bytes: &[u8]) -> SignResult<Self> {
        let text = std::str::from_utf8(bytes).map_err(|e| invalid(e.to_string()))?;
        let text = text.strip_prefix('\u{feff}').unwrap_or(text);
        let doc = Document::parse(text).map_err(|e| invalid(e.to_string()))?;

        let mut graph = Self::default();
        let root = doc.root_element();
        if is_rdf(root, "RDF") {
            for child in root.children().filter(Node::is_element) {
                graph.node_element(child, 0)?;
            }
        } else {
            graph.node_element(root, 0)?;
        }
        Ok(graph)
    }

    pub fn triples(&self) -> &[Triple] {
        &self.triples
    }

    /// Objects of `(subject, predicate, *)`, in document order.
    pub fn objects<'a>(
        &'a self,
        subject: &'a Term,
        predicate: &'a str,
    ) -> impl Iterator<Item = &'a Term> + 'a {
        self.triples
            .iter()
            .filter(move |t| &t.subject == subject && t.predicate == predicate)
            .map(|t| &t.object)
    }

    /// The install-manifest root subject.
    ///
    /// `urn:mozilla:install-manifest` itself when it is the subject of any
    /// triple, otherwise the first subject (document order) that points at
    /// it.
    pub fn manifest_root(&self) -> Option<Term> {
        let manifest = Term::Uri(INSTALL_MANIFEST.to_string());
        if self.triples.iter().any(|t| t.subject == manifest) {
            return Some(manifest);
        }
        self.triples
            .iter()
            .find(|t| t.object == manifest)
            .map(|t| t.subject.clone())
    }

    fn push(&mut self, subject: Term, predicate: String, object: Term) {
        self.triples.push(Triple {
            subject,
            predicate,
            object,
        });
    }

    fn fresh_blank(&mut self) -> Term {
        self.blank_count += 1;
        Term::Blank(self.blank_count)
    }

    fn named_blank(&mut self, name: &str) -> Term {
        if let Some(id) = self.node_ids.get(name) {
            return Term::Blank(*id);
        }
        self.blank_count += 1;
        self.node_ids.insert(name.to_string(), self.blank_count);
        Term::Blank(self.blank_count)
    }

    fn node_element(&mut self, node: Node<'_, '_>, depth: usize) -> SignResult<Term> {
        if depth > MAX_DEPTH {
            return Err(invalid(format!("nesting deeper than {MAX_DEPTH}")));
        }

        let subject = if let Some(about) = syntax_attr(node, "about") {
            Term::Uri(about.to_string())
        } else if let Some(id) = syntax_attr(node, "ID") {
            Term::Uri(format!("#{id}"))
        } else if let Some(name) = syntax_attr(node, "nodeID") {
            self.named_blank(name)
        } else {
            self.fresh_blank()
        };

        if !is_rdf(node, "Description") {
            self.push(subject.clone(), RDF_TYPE.to_string(), Term::Uri(expand(node)));
        }

        self.property_attributes(node, &subject);

        for child in node.children().filter(Node::is_element) {
            self.property_element(child, &subject, depth + 1)?;
        }

        Ok(subject)
    }

    fn property_attributes(&mut self, node: Node<'_, '_>, subject: &Term) {
        for attr in node.attributes() {
            let Some(ns) = attr.namespace() else {
                continue;
            };
            if ns == XML_NS {
                continue;
            }
            if ns == RDF_NS {
                if attr.name() == "type" {
                    self.push(
                        subject.clone(),
                        RDF_TYPE.to_string(),
                        Term::Uri(attr.value().to_string()),
                    );
                }
                continue;
            }
            self.push(
                subject.clone(),
                format!("{ns}{}", attr.name()),
                Term::Literal(attr.value().to_string()),
            );
        }
    }

    fn property_element(
        &mut self,
        node: Node<'_, '_>,
        subject: &Term,
        depth: usize,
    ) -> SignResult<()> {
        if depth > MAX_DEPTH {
            return Err(invalid(format!("nesting deeper than {MAX_DEPTH}")));
        }

        let predicate = expand(node);
        let mut elements = node.children().filter(Node::is_element);

        let object = if let Some(resource) = syntax_attr(node, "resource") {
            Term::Uri(resource.to_string())
        } else if let Some(name) = syntax_attr(node, "nodeID") {
            self.named_blank(name)
        } else if syntax_attr(node, "parseType") == Some("Resource") {
            let object = self.fresh_blank();
            for child in elements {
                self.property_element(child, &object, depth + 1)?;
            }
            object
        } else if let Some(first) = elements.next() {
            self.node_element(first, depth + 1)?
        } else if has_property_attributes(node) {
            let object = self.fresh_blank();
            self.property_attributes(node, &object);
            object
        } else {
            Term::Literal(text_of(node))
        };

        self.push(subject.clone(), predicate, object);
        Ok(())
    }
}

/// Read the raw extension id from an `install.rdf` document.
pub fn extension_id(bytes: &[u8]) -> SignResult<String> {
    let graph = Graph::parse(bytes)?;
    let missing = || SignError::IdentityMissing {
        manifest: INSTALL_RDF.to_string(),
    };

    let root = graph.manifest_root().ok_or_else(missing)?;
    let em_id = format!("{EM_NS}id");

    let id = graph.objects(&root, &em_id).next().cloned();
    match id {
        Some(Term::Literal(id) | Term::Uri(id)) if !id.is_empty() => Ok(id),
        _ => Err(missing()),
    }
}

fn invalid(reason: String) -> SignError {
    SignError::ManifestInvalid {
        manifest: INSTALL_RDF.to_string(),
        reason,
    }
}

fn is_rdf(node: Node<'_, '_>, local: &str) -> bool {
    node.tag_name().namespace() == Some(RDF_NS) && node.tag_name().name() == local
}

fn expand(node: Node<'_, '_>) -> String {
    let tag = node.tag_name();
    format!("{}{}", tag.namespace().unwrap_or_default(), tag.name())
}

/// An `rdf:` syntax attribute, also accepting the legacy unqualified form.
fn syntax_attr<'a>(node: Node<'a, '_>, name: &str) -> Option<&'a str> {
    node.attribute((RDF_NS, name)).or_else(|| node.attribute(name))
}

fn has_property_attributes(node: Node<'_, '_>) -> bool {
    node.attributes().any(|a| {
        a.namespace()
            .is_some_and(|ns| ns != RDF_NS && ns != XML_NS)
    })
}

fn text_of(node: Node<'_, '_>) -> String {
    node.children()
        .filter(Node::is_text)
        .filter_map(|n| n.text())
        .collect()
}
